//! File system utilities used by the backup, rollback and sync steps.
//!
//! These are the recursive copy/delete primitives and the atomic write the
//! reconciliation engine relies on. They are deliberately synchronous: every
//! update step runs to completion on the calling task before the next starts.
//!
//! # Examples
//!
//! ```rust,no_run
//! use refit_cli::utils::fs::{atomic_write, copy_dir, ensure_dir};
//! use std::path::Path;
//!
//! # fn example() -> anyhow::Result<()> {
//! ensure_dir(Path::new("backup/1.0.0_2024-01-01T00-00-00.000Z/lib"))?;
//! copy_dir(Path::new("lib"), Path::new("backup/1.0.0_2024-01-01T00-00-00.000Z/lib"))?;
//! atomic_write(Path::new("MANIFEST.MF"), b"Manifest-Version: 1.0.1\r\n\r\n")?;
//! # Ok(())
//! # }
//! ```

pub mod atomic;
pub mod dirs;

pub use atomic::atomic_write;
pub use dirs::{
    copy_dir, ensure_dir, ensure_parent_dir, list_relative_files, mirror_dir, remove_dir_all,
};
