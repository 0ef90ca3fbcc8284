//! VFS layer (virtual filesystem)
//!
//! Responsibilities:
//! - Resolve slash-separated paths against the submission index.
//! - Synthesize attributes and directory listings for the two-level tree.
//! - Own the file handle table serving open/read/release.
//!
//! Submodules:
//! - `path`: pure path parsing and resolution
//! - `handles`: file handle allocation and per-handle buffers
//! - `fs`: the operation set consumed by the FUSE binding
pub mod error;
pub mod fs;
pub mod handles;
pub mod path;

pub use error::FsError;
pub use fs::{DirEntry, FileAttr, FileType, StatFs, Vfs, VfsOptions};
