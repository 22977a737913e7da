pub mod args;
pub mod local;
