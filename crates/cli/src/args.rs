use std::path::PathBuf;

use clap::Parser;
use tracing::Level;

#[derive(Debug, Clone, Parser)]
#[clap(name = "spine")]
#[clap(version)]
#[clap(about = "Run SQL against an in-process transactional key-value store", long_about = None)]
pub struct Cli {
    /// Query to execute. May be provided more than once, each query is run
    /// as its own batch.
    #[clap(short = 'q', long = "query")]
    pub queries: Vec<String>,

    /// File containing SQL to execute as a single batch.
    #[clap(short, long)]
    pub file: Option<PathBuf>,

    /// Path to a TOML config file.
    #[clap(long, env = "SPINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Default log level, overridden by `RUST_LOG`.
    #[clap(long, default_value_t = Level::WARN)]
    pub log_level: Level,

    /// Output logs in json format.
    #[clap(long)]
    pub log_json: bool,
}
