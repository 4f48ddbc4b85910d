//! Shared utilities.
//!
//! - [`fs`] - Recursive copy/mirror/delete and atomic writes
//! - [`paths`] - Manifest entry names to filesystem paths

pub mod fs;
pub mod paths;

pub use fs::{atomic_write, copy_dir, ensure_dir, remove_dir_all};
