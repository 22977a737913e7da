use std::io::{self, Read};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use cli::args::Cli;
use cli::local::LocalSession;
use logutil::LogFormat;
use sqlexec::ExecutorConfig;
use tracing::info;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::HumanReadable
    };
    logutil::configure_global_logger(cli.log_level, format, io::stderr);

    let config = ExecutorConfig::load(cli.config.as_deref())
        .with_context(|| format!("failed to load config from {:?}", cli.config))?;
    info!(version = env!("CARGO_PKG_VERSION"), ?config, "starting");

    let mut batches = cli.queries.clone();
    if let Some(path) = &cli.file {
        let sql = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        batches.push(sql);
    }
    if batches.is_empty() {
        let mut sql = String::new();
        io::stdin().read_to_string(&mut sql)?;
        batches.push(sql);
    }

    let mut session = LocalSession::new(&config);
    let mut ok = true;
    for sql in &batches {
        ok &= session
            .execute(sql, &mut io::stdout(), &mut io::stderr())
            .await?;
    }
    session.close().await?;

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
