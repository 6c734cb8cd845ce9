//! Mooring Ingest - dataset driver command line

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mooring_common::logging::{init_logging, LogConfig, LogLevel};
use mooring_common::types::{DriverState, Sample};
use mooring_ingest::config::DriverConfig;
use mooring_ingest::driver::{DatasetDriver, DriverCallbacks, DriverEvent, DriverException};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "mooring-ingest")]
#[command(author, version, about = "Mooring instrument data ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Harvest and parse until interrupted
    Run {
        /// Driver configuration file
        #[arg(short, long, env = "MOORING_CONFIG")]
        config: PathBuf,

        /// Memento file, read at startup and rewritten after every batch
        #[arg(short, long, env = "MOORING_STATE")]
        state: PathBuf,

        /// Sample output as JSON lines (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check a configuration file and exit
    Validate {
        #[arg(short, long, env = "MOORING_CONFIG")]
        config: PathBuf,
    },
}

/// Callbacks that write samples as JSON lines and keep the memento on disk.
struct FileCallbacks {
    output: Mutex<Box<dyn Write + Send>>,
    state_path: PathBuf,
}

impl FileCallbacks {
    fn new(output: Option<&Path>, state_path: PathBuf) -> Result<Self> {
        let output: Box<dyn Write + Send> = match output {
            Some(path) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("Failed to open output {}", path.display()))?;
                Box::new(BufWriter::new(file))
            }
            None => Box::new(std::io::stdout()),
        };
        Ok(Self {
            output: Mutex::new(output),
            state_path,
        })
    }

    fn write_samples(&self, samples: &[Sample]) -> Result<()> {
        let mut output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        for sample in samples {
            serde_json::to_writer(&mut *output, sample)?;
            output.write_all(b"\n")?;
        }
        output.flush()?;
        Ok(())
    }

    /// Write to a sibling temp file, then rename over the memento.
    fn save_state(&self, state: &DriverState) -> Result<()> {
        let tmp = self.state_path.with_extension("tmp");
        std::fs::write(&tmp, state.to_json()?)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.state_path)
            .with_context(|| format!("Failed to replace {}", self.state_path.display()))?;
        Ok(())
    }
}

impl DriverCallbacks for FileCallbacks {
    fn on_data(&self, key: &str, samples: Vec<Sample>) {
        if let Err(e) = self.write_samples(&samples) {
            error!(key, error = %e, "failed to write samples");
        }
    }

    fn on_state_change(&self, state: &DriverState) {
        if let Err(e) = self.save_state(state) {
            error!(error = %e, "failed to persist driver state");
        }
    }

    fn on_event(&self, event: DriverEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => info!(key = event.key(), event = %json, "driver event"),
            Err(e) => warn!(error = %e, "unserializable driver event"),
        }
    }

    fn on_exception(&self, exception: DriverException) {
        error!(error = %exception, "data source stopped");
    }
}

fn load_state(path: &Path) -> Result<Option<DriverState>> {
    if !path.exists() {
        return Ok(None);
    }
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let state = DriverState::from_json(&json)
        .with_context(|| format!("Failed to parse memento {}", path.display()))?;
    Ok(Some(state))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, stopping"),
        _ = terminate => info!("Received terminate signal, stopping"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("mooring-ingest")
        .build()
        .merge_env()?;
    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Validate { config } => {
            let config = DriverConfig::load(&config)?;
            config.validate()?;
            info!(sources = config.harvester.len(), "configuration is valid");
        }
        Command::Run {
            config,
            state,
            output,
        } => {
            let config = DriverConfig::load(&config)?;
            let memento = load_state(&state)?;
            if memento.is_some() {
                info!(path = %state.display(), "resuming from memento");
            }

            let callbacks = Arc::new(FileCallbacks::new(output.as_deref(), state)?);
            let mut driver = DatasetDriver::new(config, memento, callbacks)?;
            driver.start_sampling()?;

            shutdown_signal().await;
            driver.stop_sampling().await?;
        }
    }

    info!("Ingestion complete");
    Ok(())
}
