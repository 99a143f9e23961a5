use std::{fs::OpenOptions, path::Path, sync::Mutex};

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::{
    fmt::{self, time::UtcTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

static INITIALIZED: OnceCell<()> = OnceCell::new();

const LOG_FILE: &str = "sally.log";

/**
 * \brief Install the global tracing subscriber. Later calls are no-ops.
 * \param verbose Default to `debug` instead of `info` when `RUST_LOG` is unset
 * \param log_dir Optional directory; lines are also appended to `<dir>/sally.log`
 */
pub fn init(verbose: bool, log_dir: Option<&Path>) -> Result<()> {
    INITIALIZED
        .get_or_try_init(|| install(verbose, log_dir))
        .map(|_| ())
}

fn install(verbose: bool, log_dir: Option<&Path>) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create log dir {}", dir.display()))?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(LOG_FILE))
                .context("open log file")?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_timer(UtcTime::new(Rfc3339))
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_timer(UtcTime::new(Rfc3339)))
        .with(file_layer)
        .try_init()
        .context("install tracing subscriber")?;
    Ok(())
}
