//! Mapping between filesystem paths and object keys.
//!
//! The mount exposes a flat key space as a tree: `/photos/2020/a.jpg` is the
//! key `photos/2020/a.jpg`, and directories exist only as key prefixes.

use crate::constants::KEY_DELIMITER;

/// Convert a filesystem path to an object key.
///
/// # Arguments
/// * `path` - Absolute or relative filesystem path
///
/// # Returns
/// The path with leading and trailing delimiters removed.
pub fn path_to_key(path: &str) -> &str {
    path.trim_matches(KEY_DELIMITER)
}

/// Whether a key is treated as a directory without asking the backend.
///
/// The mount has no directory objects to check, so the root (empty key) and
/// any key whose final segment has no `.` are classified as directories.
///
/// # Arguments
/// * `key` - Object key (see [`path_to_key`])
pub fn is_directory_key(key: &str) -> bool {
    let key: &str = path_to_key(key);
    key.is_empty() || !leaf_name(key).contains('.')
}

/// Final segment of a key or path.
///
/// # Arguments
/// * `key` - Object key or common prefix, trailing delimiter allowed
pub fn leaf_name(key: &str) -> &str {
    let trimmed: &str = key.trim_end_matches(KEY_DELIMITER);
    match trimmed.rfind(KEY_DELIMITER) {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Listing prefix for the directory at `key`.
///
/// # Arguments
/// * `key` - Directory key (empty for the root)
///
/// # Returns
/// `""` for the root, otherwise the key with one trailing delimiter.
pub fn list_prefix(key: &str) -> String {
    let key: &str = path_to_key(key);
    if key.is_empty() {
        String::new()
    } else {
        format!("{}{}", key, KEY_DELIMITER)
    }
}

/// Join a directory key and an entry name into a child key.
///
/// # Arguments
/// * `parent` - Parent directory key (empty for the root)
/// * `name` - Entry name
pub fn join_key(parent: &str, name: &str) -> String {
    let parent: &str = path_to_key(parent);
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}{}{}", parent, KEY_DELIMITER, name)
    }
}
