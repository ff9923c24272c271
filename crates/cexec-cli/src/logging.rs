//! Subscriber setup from an explicit LoggingConfig

use anyhow::{Context, Result};
use cexec_config::{LogFormat, LoggingConfig};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Layered<EnvFilter, Registry>> + Send + Sync>;

/// Filter derived from the configured level
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::new(config.level.as_directive())
}

/// Install the global subscriber.
///
/// Without a log directory everything goes to stderr. With one, all events
/// are appended to `out.log` and errors additionally to `err.log`.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let layers = match (config.out_log_path(), config.err_log_path()) {
        (Some(out), Some(err)) => {
            if let Some(dir) = &config.log_dir {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create log directory {:?}", dir))?;
            }
            vec![
                fmt_layer(config.format, Arc::new(open_log(&out)?)),
                fmt_layer(config.format, Arc::new(open_log(&err)?))
                    .with_filter(LevelFilter::ERROR)
                    .boxed(),
            ]
        }
        _ => vec![fmt_layer(config.format, std::io::stderr)],
    };

    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(layers)
        .try_init()
        .context("Failed to install log subscriber")?;
    Ok(())
}

fn fmt_layer<W>(format: LogFormat, writer: W) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(false)
        .with_writer(writer);
    match format {
        LogFormat::Text => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

fn open_log(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {:?}", path))
}
