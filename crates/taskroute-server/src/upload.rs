//! Uploaded files, spooled to disk for the duration of one request.
//!
//! The body is written to `<upload_dir>/<uuid>-<name>` so every endpoint reads
//! the file from where it actually lives. The spooled copy is removed when the
//! [`Upload`] is dropped.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::{Result, ServerError};

/// Extract and decode the `filename` query parameter.
pub fn filename_from_query(query: Option<&str>) -> Result<String> {
    let raw = query
        .unwrap_or_default()
        .split('&')
        .find_map(|pair| pair.strip_prefix("filename="))
        .ok_or_else(|| ServerError::InvalidRequest("missing ?filename= parameter".into()))?;
    let decoded = urlencoding::decode(&raw.replace('+', " "))
        .map_err(|e| ServerError::InvalidRequest(format!("filename is not valid UTF-8: {e}")))?
        .into_owned();
    if decoded.trim().is_empty() {
        return Err(ServerError::InvalidRequest("filename is empty".into()));
    }
    Ok(decoded)
}

/// File name safe to join onto the upload directory: the last path segment,
/// with anything outside `[A-Za-z0-9._-]` replaced by `_`.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "upload".to_string(),
        _ => cleaned,
    }
}

/// An uploaded file spooled under the upload directory.
#[derive(Debug)]
pub struct Upload {
    filename: String,
    path: PathBuf,
    size: usize,
}

impl Upload {
    /// Write `body` under `dir`, creating the directory if needed.
    pub async fn spool(dir: &Path, filename: &str, body: &[u8]) -> Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{}-{}", Uuid::now_v7(), sanitize_filename(filename)));
        tokio::fs::write(&path, body).await?;
        debug!(filename, path = %path.display(), bytes = body.len(), "Spooled upload");
        Ok(Self {
            filename: filename.to_string(),
            path,
            size: body.len(),
        })
    }

    /// Name as given by the client.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Location of the spooled copy.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for Upload {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove spooled upload");
        }
    }
}
