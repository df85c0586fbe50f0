//! HuggingFace artifact fetch
//!
//! Blocking download into a staging directory with an atomic rename at
//! the end, so a failed or interrupted transfer never leaves a partial
//! file where the registry would mistake it for a real artifact.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("I/O error while storing artifact: {0}")]
    Storage(#[from] std::io::Error),

    #[error("download size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
}

/// Downloads `hf_file` from the `hf_repo` HuggingFace repository into
/// `models_dir`, returning the final path. Already-present files are
/// returned as-is.
pub fn fetch_hf_file(
    hf_repo: &str,
    hf_file: &str,
    models_dir: &Path,
) -> Result<PathBuf, DownloadError> {
    let dest = models_dir.join(hf_file);
    if dest.exists() {
        return Ok(dest);
    }

    fs::create_dir_all(models_dir)?;
    let staging_dir = models_dir.join(".downloading");
    fs::create_dir_all(&staging_dir)?;
    let staging_path = staging_dir.join(hf_file);

    let url = format!("https://huggingface.co/{hf_repo}/resolve/main/{hf_file}");
    tracing::info!("fetching {url}");

    let response = ureq::get(&url)
        .call()
        .map_err(|e| DownloadError::Request(e.to_string()))?;

    let total_bytes = response
        .headers()
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    let mut reader = response.into_body().into_reader();
    let mut file = fs::File::create(&staging_path)?;

    let written = match stream_to_file(&mut reader, &mut file, total_bytes) {
        Ok(written) => written,
        Err(e) => {
            let _ = fs::remove_file(&staging_path);
            return Err(e);
        }
    };

    if total_bytes > 0 && written != total_bytes {
        let _ = fs::remove_file(&staging_path);
        return Err(DownloadError::SizeMismatch {
            expected: total_bytes,
            actual: written,
        });
    }

    fs::rename(&staging_path, &dest)?;
    tracing::info!("fetched {hf_file} ({written} bytes)");

    Ok(dest)
}

/// Streams the response body to disk, logging progress roughly every
/// tenth of the transfer when the size is known.
fn stream_to_file(
    reader: &mut impl Read,
    file: &mut fs::File,
    total_bytes: u64,
) -> Result<u64, DownloadError> {
    let mut written: u64 = 0;
    let mut next_report = total_bytes / 10;
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])?;
        written += n as u64;
        if total_bytes > 0 && written >= next_report {
            tracing::debug!("downloaded {written}/{total_bytes} bytes");
            next_report = written + total_bytes / 10;
        }
    }

    file.flush()?;
    Ok(written)
}
