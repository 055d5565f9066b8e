//! Shared constants and utilities for rusty-s3fs.
//!
//! This crate provides functionality used across all rusty-s3fs crates:
//! - Tunable defaults for the remote read path
//! - Mapping between filesystem paths and object keys

pub mod constants;
pub mod path_utils;

// Re-export commonly used items at crate root
pub use constants::*;
pub use path_utils::{is_directory_key, join_key, leaf_name, list_prefix, path_to_key};
