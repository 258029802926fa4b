//! Demo CLI (SPEC_FULL §10.5) — wires a [`Logger`] to an LTB instance and,
//! if the config names a remote, to a [`Publisher`] behind it, then ingests
//! a handful of sample records and closes cleanly.
//!
//! Usage:
//!   edgepack-demo run    --config config.toml
//!   edgepack-demo status --config config.toml

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use edgepack::config::Config;
use edgepack::logger::Logger;
use edgepack::ltb::{LtbHandle, LtbInstanceSender};
use edgepack::publisher::{Publisher, ResourceDescriptor};
use edgepack::record::{Record, RecordValue, Timestamp, Unit};
use edgepack::transfer::TransferDriver;

#[derive(Parser)]
#[command(name = "edgepack-demo", about = "SenML/CBOR telemetry pipeline", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a handful of sample records through the configured pipeline.
    Run {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Print the pending-file count for the configured pool and exit.
    Status {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => run(config).await,
        Command::Status { config } => status(config),
    }
}

async fn run(config_path: PathBuf) {
    let cfg = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    info!(
        pool_path = ?cfg.ltb.pool_path,
        nb_files_lim = cfg.ltb.nb_files_lim,
        record_queue_size = cfg.logger.record_queue_size,
        "starting pipeline"
    );

    let sender: Option<Arc<dyn TransferDriver>> = match &cfg.ltb.sender {
        Some(p) => Some(Arc::new(
            Publisher::new(
                ResourceDescriptor { host: p.host.clone(), port: p.port, path: p.path.clone() },
                p.retry_cnt,
                p.queue_bound,
                cfg.block_size_exp,
            )
            .await,
        )),
        None => None,
    };

    let ltb = LtbHandle::spawn(cfg.ltb.dispatch_queue_bound, cfg.ltb.nb_files_lim, None);
    let instance = match ltb
        .create_instance(cfg.ltb.pool_path.clone(), cfg.ltb.name.clone(), sender)
        .await
    {
        Ok(id) => id,
        Err(e) => {
            error!(error = %e, "failed to create LTB instance");
            std::process::exit(1);
        }
    };

    let driver: Arc<dyn TransferDriver> = Arc::new(LtbInstanceSender::new(ltb.clone(), instance));
    let logger = match Logger::new(
        cfg.logger.record_queue_size,
        cfg.logger.encoding_buf_size,
        cfg.logger.base_name.clone(),
        cfg.logger.name.clone(),
        driver,
    ) {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "failed to construct logger");
            std::process::exit(1);
        }
    };

    for (i, sample) in sample_records().iter().enumerate() {
        if let Err(e) = logger.put(sample) {
            error!(error = %e, record = i, "failed to ingest sample record");
        }
    }

    if let Err(e) = logger.close() {
        error!(error = %e, "failed to flush logger on close");
        std::process::exit(1);
    }

    if let Err(e) = ltb.force_publish().await {
        error!(error = %e, "force-publish failed");
    }

    info!("pipeline run complete");
}

fn sample_records() -> Vec<Record<'static>> {
    vec![
        Record::new("temp", Timestamp::new(1_700_000_000, 0), Unit::Celsius, RecordValue::U32(21)).unwrap(),
        Record::new("humidity", Timestamp::new(1_700_000_001, 0), Unit::Percent, RecordValue::U32(47)).unwrap(),
        Record::new("battery", Timestamp::new(1_700_000_002, 0), Unit::Volt, RecordValue::I32(3)).unwrap(),
    ]
}

fn status(config_path: PathBuf) {
    let cfg = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    match edgepack::pool::size(&cfg.ltb.pool_path) {
        Ok(n) => {
            println!("=== Pipeline Status ===");
            println!("Pool path  : {}", cfg.ltb.pool_path.display());
            println!("Pending    : {} file(s)", n);
            println!("Threshold  : {} file(s)", cfg.ltb.nb_files_lim);
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
