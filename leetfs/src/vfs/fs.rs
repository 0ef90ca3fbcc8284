//! Path-based read-only filesystem over the submission index.
//!
//! Every operation works from in-memory state only: the current index snapshot
//! for metadata and the handle table for open files.

use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, warn};

use super::error::FsError;
use super::handles::HandleTable;
use super::path::{self, PathRef};
use crate::index::{Submission, SubmissionStore};

const DIR_PERM: u16 = 0o555;
const FILE_PERM: u16 = 0o444;
const DIR_SIZE: u64 = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileType {
    Dir,
    File,
}

/// Synthesized attributes. Times are seconds since the epoch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileAttr {
    pub kind: FileType,
    pub size: u64,
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileType,
}

impl DirEntry {
    fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FileType::Dir,
        }
    }

    fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FileType::File,
        }
    }
}

/// Capacity figures reported by statfs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatFs {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

impl Default for StatFs {
    fn default() -> Self {
        Self {
            blocks: 1 << 20,
            bfree: 0,
            bavail: 0,
            files: 1 << 16,
            ffree: 0,
            bsize: 4096,
            namelen: 255,
            frsize: 4096,
        }
    }
}

/// Owner and timing defaults shared by every synthesized attribute.
#[derive(Clone, Debug)]
pub struct VfsOptions {
    pub uid: u32,
    pub gid: u32,
    /// Reported as atime, and as all times of the root directory.
    pub mounted_at: u64,
    /// Real filesystem whose statistics statfs reports.
    pub statfs_path: PathBuf,
}

impl Default for VfsOptions {
    fn default() -> Self {
        Self {
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
            mounted_at: unix_now(),
            statfs_path: PathBuf::from("/"),
        }
    }
}

pub struct Vfs<S: SubmissionStore> {
    store: S,
    handles: HandleTable,
    options: VfsOptions,
}

impl<S: SubmissionStore> Vfs<S> {
    pub fn new(store: S) -> Self {
        Self::with_options(store, VfsOptions::default())
    }

    pub fn with_options(store: S, options: VfsOptions) -> Self {
        Self {
            store,
            handles: HandleTable::new(),
            options,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Number of currently open file handles.
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    pub fn get_attr(&self, path: &str) -> Result<FileAttr, FsError> {
        debug!("getattr {path}");
        if path::components(path).len() > 2 {
            warn!("invalid path {path}");
            return Err(FsError::AlreadyExists(path.to_string()));
        }

        let index = self.store.snapshot();
        let attr = match path::resolve(path, &index)? {
            PathRef::Root => self.dir_attr(DIR_SIZE, self.options.mounted_at, self.options.mounted_at),
            PathRef::ProblemDir(slug) => {
                let submissions = index
                    .get(slug)
                    .ok_or_else(|| FsError::NotFound(path.to_string()))?;
                let size = submissions.iter().map(Submission::code_len).sum();
                let ctime = submissions.iter().map(|s| s.timestamp).min().unwrap_or(0);
                let mtime = submissions.iter().map(|s| s.timestamp).max().unwrap_or(0);
                self.dir_attr(size, ctime, mtime)
            }
            PathRef::SubmissionFile { slug, id } => {
                let submission = index
                    .find(slug, id)
                    .ok_or_else(|| FsError::NotFound(path.to_string()))?;
                FileAttr {
                    kind: FileType::File,
                    size: submission.code_len(),
                    perm: FILE_PERM,
                    nlink: 1,
                    uid: self.options.uid,
                    gid: self.options.gid,
                    atime: self.options.mounted_at,
                    mtime: submission.timestamp,
                    ctime: submission.timestamp,
                }
            }
        };
        Ok(attr)
    }

    /// The listed spelling of `path`. A submission file reached through any
    /// suffix maps to `/<slug>/<id><ext>`; every other path is returned as is.
    pub fn canonical_path(&self, path: &str) -> String {
        let index = self.store.snapshot();
        if let Ok(PathRef::SubmissionFile { slug, id }) = path::resolve(path, &index) {
            if let Some(submission) = index.find(slug, id) {
                return format!("/{slug}/{}", submission.file_name());
            }
        }
        path.to_string()
    }

    /// Lists `path` with `.` and `..` first. Paths that are not a known
    /// directory list as empty rather than failing, so traversal stays robust
    /// while a refresh is landing; only a malformed slug is rejected.
    pub fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>, FsError> {
        debug!("readdir {path}");
        let mut entries = vec![DirEntry::dir("."), DirEntry::dir("..")];
        let index = self.store.snapshot();
        match path::components(path).as_slice() {
            [] => entries.extend(index.slugs().map(DirEntry::dir)),
            [slug, ..] if !path::is_valid_slug(slug) => {
                warn!("invalid slug {slug}");
                return Err(FsError::NotFound(path.to_string()));
            }
            [slug] => {
                if let Some(submissions) = index.get(slug) {
                    entries.extend(submissions.iter().map(|s| DirEntry::file(s.file_name())));
                }
            }
            _ => {}
        }
        Ok(entries)
    }

    /// Checks that `path` may be opened as a directory.
    pub fn open_dir(&self, path: &str) -> Result<(), FsError> {
        let index = self.store.snapshot();
        match path::resolve(path, &index)? {
            PathRef::Root | PathRef::ProblemDir(_) => Ok(()),
            PathRef::SubmissionFile { .. } => Err(FsError::NotADirectory(path.to_string())),
        }
    }

    /// Opens a submission file and returns its handle. The content is copied
    /// at this point; later refreshes do not affect an open handle.
    pub fn open(&self, path: &str, flags: u32) -> Result<u64, FsError> {
        debug!("open {path} {flags:#o}");
        match path::components(path).len() {
            0 | 1 => return Err(FsError::IsADirectory(path.to_string())),
            2 => {}
            _ => return Err(FsError::NotFound(path.to_string())),
        }
        if (flags as libc::c_int) & libc::O_ACCMODE != libc::O_RDONLY {
            return Err(FsError::AccessDenied(path.to_string()));
        }

        let index = self.store.snapshot();
        let PathRef::SubmissionFile { slug, id } = path::resolve(path, &index)? else {
            return Err(FsError::NotFound(path.to_string()));
        };
        let submission = index
            .find(slug, id)
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;

        let code = Bytes::from(submission.code.clone().into_bytes());
        let fh = self.handles.insert(code);
        debug!("open {path} -> fh {fh}");
        Ok(fh)
    }

    /// Reads `[offset, offset + size)` of an open file, clipped to its end.
    pub fn read(&self, fh: u64, offset: u64, size: usize) -> Result<Bytes, FsError> {
        let data = self.handles.get(fh).ok_or(FsError::BadHandle(fh))?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        let end = start.saturating_add(size).min(data.len());
        Ok(data.slice(start..end))
    }

    pub fn release(&self, fh: u64) -> Result<(), FsError> {
        debug!("release fh {fh}");
        match self.handles.remove(fh) {
            Some(_) => Ok(()),
            None => {
                error!("release of unknown file handle {fh}");
                Err(FsError::BadHandle(fh))
            }
        }
    }

    /// Statistics of the configured reference filesystem. The numbers are
    /// cosmetic; a placeholder is returned if the call fails.
    pub fn statfs(&self, path: &str) -> StatFs {
        debug!("statfs {path}");
        statvfs(&self.options.statfs_path).unwrap_or_else(|e| {
            warn!(
                "statvfs on {} failed: {e}",
                self.options.statfs_path.display()
            );
            StatFs::default()
        })
    }

    /// Permission probes are always refused.
    pub fn check_access(&self, path: &str, mask: u32) -> Result<(), FsError> {
        debug!("access {path} {mask:#o}");
        Err(FsError::AccessDenied(path.to_string()))
    }

    fn dir_attr(&self, size: u64, ctime: u64, mtime: u64) -> FileAttr {
        FileAttr {
            kind: FileType::Dir,
            size,
            perm: DIR_PERM,
            nlink: 2,
            uid: self.options.uid,
            gid: self.options.gid,
            atime: self.options.mounted_at,
            mtime,
            ctime,
        }
    }
}

#[allow(clippy::unnecessary_cast)]
fn statvfs(path: &Path) -> nix::Result<StatFs> {
    let st = nix::sys::statvfs::statvfs(path)?;
    Ok(StatFs {
        blocks: st.blocks() as u64,
        bfree: st.blocks_free() as u64,
        bavail: st.blocks_available() as u64,
        files: st.files() as u64,
        ffree: st.files_free() as u64,
        bsize: st.block_size() as u32,
        namelen: st.name_max() as u32,
        frsize: st.fragment_size() as u32,
    })
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
