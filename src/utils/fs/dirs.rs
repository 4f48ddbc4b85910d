//! Directory operations for creating, copying, mirroring and removing trees.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Ensures a directory exists, creating it and all parents if needed.
///
/// # Errors
///
/// Fails if the directory cannot be created or if `path` exists but is not a
/// directory.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    } else if !path.is_dir() {
        return Err(anyhow::anyhow!("Path exists but is not a directory: {}", path.display()));
    }
    Ok(())
}

/// Ensures the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    Ok(())
}

/// Recursively copies a directory and all its contents.
///
/// The destination is created if missing and existing files in it are
/// overwritten. Only regular files and directories are copied; symlinks and
/// special files are skipped.
///
/// # Errors
///
/// Fails if `src` cannot be read or any file cannot be copied.
pub fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    ensure_dir(dst)?;

    for entry in
        fs::read_dir(src).with_context(|| format!("Failed to read directory: {}", src.display()))?
    {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if file_type.is_dir() {
            copy_dir(&src_path, &dst_path)?;
        } else if file_type.is_file() {
            fs::copy(&src_path, &dst_path).with_context(|| {
                format!("Failed to copy file from {} to {}", src_path.display(), dst_path.display())
            })?;
        }
    }

    Ok(())
}

/// Makes `dst` an exact copy of `src`.
///
/// Copies every file from `src` over `dst` (like [`copy_dir`]) and then
/// removes files under `dst` that do not exist under `src`. Empty directories
/// left behind by the removal are pruned as well.
///
/// # Errors
///
/// Fails if the copy fails or an extraneous file cannot be removed.
pub fn mirror_dir(src: &Path, dst: &Path) -> Result<()> {
    copy_dir(src, dst)?;

    let wanted: BTreeSet<PathBuf> = list_relative_files(src)?.into_iter().collect();
    for relative in list_relative_files(dst)? {
        if !wanted.contains(&relative) {
            let path = dst.join(&relative);
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove file: {}", path.display()))?;
        }
    }

    // Deepest first so parents become empty before they are visited
    let mut dirs: Vec<PathBuf> = WalkDir::new(dst)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect();
    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
    for dir in dirs {
        let relative = dir.strip_prefix(dst).unwrap_or(dir.as_path());
        let is_empty = fs::read_dir(&dir).map(|mut d| d.next().is_none()).unwrap_or(false);
        if is_empty && !src.join(relative).is_dir() {
            fs::remove_dir(&dir)
                .with_context(|| format!("Failed to remove directory: {}", dir.display()))?;
        }
    }

    Ok(())
}

/// Lists every regular file under `root` as a path relative to `root`.
///
/// Returns an empty list when `root` does not exist. The result is sorted.
pub fn list_relative_files(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry =
            entry.with_context(|| format!("Failed to walk directory: {}", root.display()))?;
        if entry.file_type().is_file() {
            let relative = entry
                .path()
                .strip_prefix(root)
                .with_context(|| format!("Path escaped walk root: {}", entry.path().display()))?;
            files.push(relative.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

/// Recursively removes a directory and all its contents.
///
/// Succeeds silently if the directory does not exist.
pub fn remove_dir_all(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)
            .with_context(|| format!("Failed to remove directory: {}", path.display()))?;
    }
    Ok(())
}
