//! Inode numbers for the path-based filesystem.
//!
//! The kernel speaks inodes while the filesystem speaks paths. Numbers are
//! handed out on first sight of a path and never reused, so a path keeps its
//! inode for the life of the mount even if its submission disappears.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

pub const ROOT_INO: u64 = 1;
pub const ROOT_PATH: &str = "/";

#[derive(Debug)]
struct Inodes {
    next: u64,
    paths: HashMap<u64, String>,
    inodes: HashMap<String, u64>,
}

#[derive(Debug)]
pub struct InodeTable {
    inner: Mutex<Inodes>,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        let mut paths = HashMap::new();
        let mut inodes = HashMap::new();
        paths.insert(ROOT_INO, ROOT_PATH.to_string());
        inodes.insert(ROOT_PATH.to_string(), ROOT_INO);
        Self {
            inner: Mutex::new(Inodes {
                next: ROOT_INO + 1,
                paths,
                inodes,
            }),
        }
    }

    pub fn path_of(&self, ino: u64) -> Option<String> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.paths.get(&ino).cloned()
    }

    /// Inode of `path`, assigning a fresh one if the path is new.
    pub fn ino_of(&self, path: &str) -> u64 {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(&ino) = inner.inodes.get(path) {
            return ino;
        }
        let ino = inner.next;
        inner.next += 1;
        inner.paths.insert(ino, path.to_string());
        inner.inodes.insert(path.to_string(), ino);
        ino
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .paths
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Path of entry `name` inside directory `parent`.
pub fn child_path(parent: &str, name: &str) -> String {
    if parent == ROOT_PATH {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Containing directory of `path`; the root is its own parent.
pub fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => ROOT_PATH,
        Some(i) => &path[..i],
    }
}
