//! Structured logging initialization.

use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Name of the log file inside the policy's log directory.
const LOG_FILE: &str = "hearth.log";

/// Initialize the global tracing subscriber from the validated policy's
/// log settings. `RUST_LOG` still wins when set.
///
/// `dir` of `None` means stdout.
pub fn init_logging(level: Option<&str>, dir: Option<&Path>) -> io::Result<()> {
    let level = level.unwrap_or("info");
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("hearth={level},tower_http={level}")));

    match dir {
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let file = File::options()
                .create(true)
                .append(true)
                .open(dir.join(LOG_FILE))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(Arc::new(file))
                        .with_ansi(false),
                )
                .init();
        }
    }
    Ok(())
}
