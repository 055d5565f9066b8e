//! Inode numbers for object keys.
//!
//! The object store has no inodes, so numbers are handed out on first sight
//! of a key and stay stable for the mount session.

use std::collections::HashMap;

use parking_lot::RwLock;
use rusty_s3fs_common::{join_key, path_to_key, KEY_DELIMITER};

/// Inode number of the mount root.
pub const ROOT_INODE: u64 = 1;

#[derive(Debug, Default)]
struct InodeMaps {
    by_ino: HashMap<u64, String>,
    by_key: HashMap<String, u64>,
    next: u64,
}

/// Bidirectional map between inode numbers and object keys.
#[derive(Debug)]
pub struct InodeTable {
    maps: RwLock<InodeMaps>,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    /// Create a table holding only the root (empty key).
    pub fn new() -> Self {
        let mut maps = InodeMaps {
            next: ROOT_INODE + 1,
            ..Default::default()
        };
        maps.by_ino.insert(ROOT_INODE, String::new());
        maps.by_key.insert(String::new(), ROOT_INODE);
        Self {
            maps: RwLock::new(maps),
        }
    }

    /// Key for `ino`, if it has been allocated.
    pub fn key(&self, ino: u64) -> Option<String> {
        self.maps.read().by_ino.get(&ino).cloned()
    }

    /// Inode for `path`, allocating one on first sight.
    pub fn get_or_insert(&self, path: &str) -> u64 {
        let key: &str = path_to_key(path);
        if let Some(&ino) = self.maps.read().by_key.get(key) {
            return ino;
        }
        let mut maps = self.maps.write();
        if let Some(&ino) = maps.by_key.get(key) {
            return ino;
        }
        let ino: u64 = maps.next;
        maps.next += 1;
        maps.by_ino.insert(ino, key.to_string());
        maps.by_key.insert(key.to_string(), ino);
        ino
    }

    /// Key of `name` inside directory `parent`, without allocating an inode.
    ///
    /// # Returns
    /// None if `parent` is unknown.
    pub fn child_key(&self, parent: u64, name: &str) -> Option<String> {
        let parent_key: String = self.key(parent)?;
        Some(join_key(&parent_key, name))
    }

    /// Inode and key of `name` inside directory `parent`, allocating the inode.
    ///
    /// # Returns
    /// None if `parent` is unknown.
    pub fn child(&self, parent: u64, name: &str) -> Option<(u64, String)> {
        let key: String = self.child_key(parent, name)?;
        Some((self.get_or_insert(&key), key))
    }

    /// Inode of the directory containing `ino`. The root is its own parent.
    pub fn parent(&self, ino: u64) -> u64 {
        let Some(key) = self.key(ino) else {
            return ROOT_INODE;
        };
        match key.rfind(KEY_DELIMITER) {
            Some(idx) => self.get_or_insert(&key[..idx]),
            None => ROOT_INODE,
        }
    }

    /// Number of allocated inodes, root included.
    pub fn len(&self) -> usize {
        self.maps.read().by_ino.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
