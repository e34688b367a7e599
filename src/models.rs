use std::fs;
use std::io;
use std::path::Path;

use crate::error::{RecapError, Result};

/// Accepted size range of a quantized weight file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightSize {
    pub expected_bytes: u64,
    pub tolerance_bytes: u64,
}

impl WeightSize {
    #[must_use]
    pub const fn new(expected_bytes: u64, tolerance_bytes: u64) -> Self {
        Self {
            expected_bytes,
            tolerance_bytes,
        }
    }

    #[must_use]
    pub const fn contains(self, size: u64) -> bool {
        size >= self.expected_bytes.saturating_sub(self.tolerance_bytes)
            && size <= self.expected_bytes.saturating_add(self.tolerance_bytes)
    }
}

/// Check that the weights at `path` exist and have a plausible size.
/// Returns the size in bytes.
pub fn verify_weights(path: &Path, expected: WeightSize) -> Result<u64> {
    let meta = fs::metadata(path).map_err(|e| {
        RecapError::FatalModel(format!("model weights missing at {}: {e}", path.display()))
    })?;

    if !meta.is_file() {
        return Err(RecapError::FatalModel(format!(
            "model weights at {} are not a regular file",
            path.display()
        )));
    }

    let size = meta.len();
    if !expected.contains(size) {
        return Err(RecapError::FatalModel(format!(
            "model weights at {} are {size} bytes, expected {} ± {}",
            path.display(),
            expected.expected_bytes,
            expected.tolerance_bytes
        )));
    }

    Ok(size)
}

/// Ensure a weight file exists at `path`, downloading it from `url` if it is
/// missing or has the wrong size.
///
/// Downloads to a `{path}.part` file first, then renames it into place.
pub fn ensure_model(path: &Path, url: &str, expected: WeightSize) -> Result<()> {
    match verify_weights(path, expected) {
        Ok(_) => return Ok(()),
        Err(e) if path.exists() => tracing::warn!("{e}; downloading again"),
        Err(_) => {}
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let part_path = path.with_extension(
        path.extension()
            .map_or_else(|| "part".to_string(), |e| format!("{}.part", e.to_string_lossy())),
    );

    tracing::info!("downloading model weights from {url}");

    let response = ureq::get(url)
        .call()
        .map_err(|e| RecapError::Network(format!("failed to download model weights: {e}")))?;

    let mut reader = response.into_body().into_reader();
    let mut file = fs::File::create(&part_path)?;
    io::copy(&mut reader, &mut file)?;
    drop(file);

    if let Err(e) = verify_weights(&part_path, expected) {
        let _ = fs::remove_file(&part_path);
        return Err(e);
    }

    fs::rename(&part_path, path)?;

    tracing::info!("downloaded model weights to {}", path.display());
    Ok(())
}
