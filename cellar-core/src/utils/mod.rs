//! General Utilities for Cellar Core.
//!
//! # Submodules
//!
//! - [`fs`]: Directory creation and content hashing.
//! - [`paths`]: XDG directories and `~`-relative path handling.

pub mod fs;
pub mod paths;

pub use fs::{ensure_dir_exists, sha256_file};
