//! The operations the endpoints combine: reading a file, the artificial
//! calculation and the outbound request fan-out. Each comes in the flavour an
//! endpoint needs (async vs blocking); placement is up to the caller.

use std::path::Path;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tracing::{debug, warn};

pub use taskroute::worker::jobs::name_length;

/// Read the whole file without blocking the scheduler. Returns its size.
pub async fn read_file(path: &Path) -> std::io::Result<usize> {
    let contents = tokio::fs::read(path).await?;
    debug!(path = %path.display(), bytes = contents.len(), "Read file (async)");
    Ok(contents.len())
}

/// Read the whole file with blocking I/O. Returns its size.
pub fn read_file_sync(path: &Path) -> std::io::Result<usize> {
    let contents = std::fs::read(path)?;
    debug!(path = %path.display(), bytes = contents.len(), "Read file (sync)");
    Ok(contents.len())
}

/// GET every URL concurrently; returns elapsed seconds.
///
/// Failed requests are logged and do not fail the batch.
pub async fn fanout(client: &reqwest::Client, urls: &[String], timeout: Duration) -> f64 {
    let started = Instant::now();
    let requests = urls.iter().map(|url| async move {
        match client.get(url).timeout(timeout).send().await {
            Ok(response) => debug!(url = %url, status = %response.status(), "Fan-out response"),
            Err(e) => warn!(url = %url, error = %e, "Fan-out request failed"),
        }
    });
    join_all(requests).await;
    started.elapsed().as_secs_f64()
}

/// GET every URL one after another with a blocking client; returns elapsed
/// seconds. Must run off the scheduler.
pub fn fanout_blocking(urls: &[String], timeout: Duration) -> Result<f64, reqwest::Error> {
    let started = Instant::now();
    let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
    for url in urls {
        match client.get(url).send() {
            Ok(response) => debug!(url = %url, status = %response.status(), "Fan-out response"),
            Err(e) => warn!(url = %url, error = %e, "Fan-out request failed"),
        }
    }
    Ok(started.elapsed().as_secs_f64())
}
