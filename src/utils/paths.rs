//! Mapping between manifest entry names and filesystem paths.
//!
//! Entry names are stored with forward slashes on every platform and are
//! always relative to the libraries directory. Names arrive from a remote
//! manifest, so they are validated before being joined onto a local path.

use anyhow::{Result, anyhow};
use std::path::{Component, Path, PathBuf};

/// Join a manifest entry name onto `base`, rejecting names that would escape it.
///
/// # Errors
///
/// Fails for empty names, absolute names, and names containing `..`.
pub fn safe_join(base: &Path, name: &str) -> Result<PathBuf> {
    if name.is_empty() {
        return Err(anyhow!("Empty artifact name"));
    }

    let relative = Path::new(name);
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(anyhow!("Artifact name contains parent directory reference (..): {name}"));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(anyhow!("Artifact name must be relative: {name}"));
            }
        }
    }

    Ok(base.join(relative))
}

/// Render a relative path with forward slashes, the form used for entry names.
#[must_use]
pub fn normalize_path_for_storage<P: AsRef<Path>>(path: P) -> String {
    path.as_ref()
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
