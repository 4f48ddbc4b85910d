//! Atomic file writes using a temp-and-rename strategy.

use crate::utils::fs::dirs::ensure_dir;
use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically writes bytes to a file.
///
/// The content goes to a temporary file in the same directory, is synced to
/// disk, and is then renamed over the target. Readers observe either the old
/// content or the new content, never a partial write.
///
/// # Errors
///
/// Fails if the parent directory cannot be created, or the temporary file
/// cannot be written, synced or persisted.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    ensure_dir(parent)?;

    let mut temp = NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
    temp.write_all(content)
        .with_context(|| format!("Failed to write temp file for {}", path.display()))?;
    temp.as_file().sync_all().context("Failed to sync file to disk")?;

    temp.persist(path)
        .with_context(|| format!("Failed to rename temp file to: {}", path.display()))?;

    Ok(())
}
