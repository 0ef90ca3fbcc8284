// Library crate for LeetFS: re-export internal modules for the daemon binary and integration tests.

pub mod cache;
pub mod config;
pub mod fuse;
pub mod index;
pub mod logging;
pub mod source;
pub mod vfs;
