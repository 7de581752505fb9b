//! Worker process for the taskroute process pool.
//!
//! Speaks the JSON-lines protocol on stdin/stdout with the built-in jobs.
//! Logs go to stderr so they never corrupt the protocol stream.

use tracing_subscriber::EnvFilter;

use taskroute::worker::{self, JobRegistry};

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let registry = JobRegistry::with_builtin_jobs();
    let served = worker::run_stdio(&registry)?;
    tracing::debug!(served, "Worker input closed, exiting");
    Ok(())
}
