//! FUSE adapter and request handling
//!
//! Translates inode-based rfuse3 requests into the path-based [`Vfs`]
//! operations. Only the read side is implemented; every mutating request
//! falls through to rfuse3's default reply (`ENOSYS`) and the mount itself is
//! flagged read-only.
//!
//! Main components:
//! - `inode`: bidirectional inode <-> path table.
//! - `mount`: mounting helpers over rfuse3 sessions.
pub mod inode;
pub mod mount;

use bytes::Bytes;
use futures_util::stream::{self, Stream};
use rfuse3::Result as FuseResult;
use rfuse3::raw::reply::{
    DirectoryEntry, DirectoryEntryPlus, FileAttr as FuseFileAttr, ReplyAttr, ReplyData,
    ReplyDirectory, ReplyDirectoryPlus, ReplyEntry, ReplyInit, ReplyOpen, ReplyStatFs,
};
use rfuse3::raw::{Filesystem, Request};
use rfuse3::{Errno, FileType as FuseFileType, Timestamp};
use std::ffi::{OsStr, OsString};
use std::num::NonZeroU32;
use std::pin::Pin;
use std::time::{Duration, UNIX_EPOCH};
use tracing::{debug, info};

use crate::index::SubmissionStore;
use crate::vfs::{FileAttr, FileType, FsError, Vfs};
use inode::{InodeTable, ROOT_PATH, child_path, parent_path};

const TTL: Duration = Duration::from_secs(1);
const MAX_WRITE: NonZeroU32 = match NonZeroU32::new(128 * 1024) {
    Some(n) => n,
    None => NonZeroU32::MIN,
};

impl From<FsError> for Errno {
    fn from(e: FsError) -> Self {
        e.errno().into()
    }
}

/// One directory entry resolved to its inode and full path.
struct Listed {
    ino: u64,
    path: String,
    name: String,
    kind: FileType,
}

/// The mounted filesystem.
pub struct LeetFuse<S: SubmissionStore> {
    vfs: Vfs<S>,
    inodes: InodeTable,
}

impl<S: SubmissionStore> LeetFuse<S> {
    pub fn new(vfs: Vfs<S>) -> Self {
        Self {
            vfs,
            inodes: InodeTable::new(),
        }
    }

    pub fn vfs(&self) -> &Vfs<S> {
        &self.vfs
    }

    fn path_of(&self, ino: u64) -> FuseResult<String> {
        self.inodes.path_of(ino).ok_or_else(|| libc::ENOENT.into())
    }

    /// Resolves `name` under `parent`. Files are keyed by their listed name,
    /// so every suffix spelling of one submission shares an inode.
    fn entry_of(&self, parent: u64, name: &OsStr) -> FuseResult<ReplyEntry> {
        let parent_path = self.path_of(parent)?;
        let name = name.to_str().ok_or(libc::ENOENT)?;
        let path = child_path(&parent_path, name);
        let attr = self.vfs.get_attr(&path)?;
        let ino = self.inodes.ino_of(&self.vfs.canonical_path(&path));
        Ok(ReplyEntry {
            ttl: TTL,
            attr: to_fuse_attr(ino, &attr),
            generation: 0,
        })
    }

    /// Directory entries of `path` with inode numbers, `.` and `..` first.
    fn entries_with_inodes(&self, ino: u64, path: &str) -> FuseResult<Vec<Listed>> {
        let entries = self.vfs.list_directory(path)?;
        Ok(entries
            .into_iter()
            .map(|entry| {
                let (entry_ino, entry_path) = match entry.name.as_str() {
                    "." => (ino, path.to_string()),
                    ".." => {
                        let parent = parent_path(path);
                        (self.inodes.ino_of(parent), parent.to_string())
                    }
                    name => {
                        let child = child_path(path, name);
                        (self.inodes.ino_of(&child), child)
                    }
                };
                Listed {
                    ino: entry_ino,
                    path: entry_path,
                    name: entry.name,
                    kind: entry.kind,
                }
            })
            .collect())
    }
}

impl<S> Filesystem for LeetFuse<S>
where
    S: SubmissionStore + 'static,
{
    type DirEntryStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntry>> + Send + 'a>>
    where
        Self: 'a;

    type DirEntryPlusStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntryPlus>> + Send + 'a>>
    where
        Self: 'a;

    async fn init(&self, _req: Request) -> FuseResult<ReplyInit> {
        info!("filesystem initialised");
        Ok(ReplyInit {
            max_write: MAX_WRITE,
        })
    }

    async fn destroy(&self, _req: Request) {
        info!("filesystem destroyed, {} inodes known", self.inodes.len());
    }

    async fn lookup(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<ReplyEntry> {
        self.entry_of(parent, name)
    }

    async fn forget(&self, _req: Request, _inode: u64, _nlookup: u64) {}

    async fn getattr(
        &self,
        _req: Request,
        ino: u64,
        _fh: Option<u64>,
        _flags: u32,
    ) -> FuseResult<ReplyAttr> {
        let path = self.path_of(ino)?;
        let attr = self.vfs.get_attr(&path)?;
        Ok(ReplyAttr {
            ttl: TTL,
            attr: to_fuse_attr(ino, &attr),
        })
    }

    async fn open(&self, _req: Request, ino: u64, flags: u32) -> FuseResult<ReplyOpen> {
        let path = self.path_of(ino)?;
        let fh = self.vfs.open(&path, flags)?;
        Ok(ReplyOpen { fh, flags: 0 })
    }

    async fn read(
        &self,
        _req: Request,
        _ino: u64,
        fh: u64,
        offset: u64,
        size: u32,
    ) -> FuseResult<ReplyData> {
        let data: Bytes = self.vfs.read(fh, offset, size as usize)?;
        Ok(ReplyData { data })
    }

    async fn statfs(&self, _req: Request, ino: u64) -> FuseResult<ReplyStatFs> {
        let path = self.inodes.path_of(ino).unwrap_or_else(|| ROOT_PATH.to_string());
        let st = self.vfs.statfs(&path);
        Ok(ReplyStatFs {
            blocks: st.blocks,
            bfree: st.bfree,
            bavail: st.bavail,
            files: st.files,
            ffree: st.ffree,
            bsize: st.bsize,
            namelen: st.namelen,
            frsize: st.frsize,
        })
    }

    async fn release(
        &self,
        _req: Request,
        _inode: u64,
        fh: u64,
        _flags: u32,
        _lock_owner: u64,
        _flush: bool,
    ) -> FuseResult<()> {
        self.vfs.release(fh)?;
        Ok(())
    }

    // Nothing is buffered for writing.
    async fn flush(
        &self,
        _req: Request,
        _inode: u64,
        _fh: u64,
        _lock_owner: u64,
    ) -> FuseResult<()> {
        Ok(())
    }

    async fn opendir(&self, _req: Request, ino: u64, _flags: u32) -> FuseResult<ReplyOpen> {
        let path = self.path_of(ino)?;
        self.vfs.open_dir(&path)?;
        Ok(ReplyOpen { fh: 0, flags: 0 })
    }

    async fn readdir<'a>(
        &'a self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: i64,
    ) -> FuseResult<ReplyDirectory<Self::DirEntryStream<'a>>> {
        let path = self.path_of(ino)?;
        debug!("readdir ino {ino} ({path}) from {offset}");
        let skip = usize::try_from(offset).unwrap_or(0);
        let entries: Vec<_> = self
            .entries_with_inodes(ino, &path)?
            .into_iter()
            .enumerate()
            .skip(skip)
            .map(|(i, entry)| {
                Ok(DirectoryEntry {
                    inode: entry.ino,
                    kind: to_fuse_kind(entry.kind),
                    name: OsString::from(entry.name),
                    offset: i as i64 + 1,
                })
            })
            .collect();
        let boxed: Self::DirEntryStream<'a> = Box::pin(stream::iter(entries));
        Ok(ReplyDirectory { entries: boxed })
    }

    async fn readdirplus<'a>(
        &'a self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: u64,
        _lock_owner: u64,
    ) -> FuseResult<ReplyDirectoryPlus<Self::DirEntryPlusStream<'a>>> {
        let path = self.path_of(ino)?;
        debug!("readdirplus ino {ino} ({path}) from {offset}");
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        let mut entries = Vec::new();
        for (i, entry) in self
            .entries_with_inodes(ino, &path)?
            .into_iter()
            .enumerate()
            .skip(skip)
        {
            // The index may have moved on since the listing was taken.
            let Ok(attr) = self.vfs.get_attr(&entry.path) else {
                continue;
            };
            entries.push(Ok(DirectoryEntryPlus {
                inode: entry.ino,
                generation: 0,
                kind: to_fuse_kind(entry.kind),
                name: OsString::from(entry.name),
                offset: i as i64 + 1,
                attr: to_fuse_attr(entry.ino, &attr),
                entry_ttl: TTL,
                attr_ttl: TTL,
            }));
        }
        let boxed: Self::DirEntryPlusStream<'a> = Box::pin(stream::iter(entries));
        Ok(ReplyDirectoryPlus { entries: boxed })
    }

    async fn releasedir(
        &self,
        _req: Request,
        _inode: u64,
        _fh: u64,
        _flags: u32,
    ) -> FuseResult<()> {
        Ok(())
    }

    async fn access(&self, _req: Request, inode: u64, mask: u32) -> FuseResult<()> {
        let path = self.path_of(inode)?;
        self.vfs.check_access(&path, mask)?;
        Ok(())
    }
}

fn to_fuse_kind(kind: FileType) -> FuseFileType {
    match kind {
        FileType::Dir => FuseFileType::Directory,
        FileType::File => FuseFileType::RegularFile,
    }
}

fn timestamp(secs: u64) -> Timestamp {
    Timestamp::from(UNIX_EPOCH + Duration::from_secs(secs))
}

fn to_fuse_attr(ino: u64, attr: &FileAttr) -> FuseFileAttr {
    FuseFileAttr {
        ino,
        size: attr.size,
        blocks: attr.size.div_ceil(512),
        atime: timestamp(attr.atime),
        mtime: timestamp(attr.mtime),
        ctime: timestamp(attr.ctime),
        #[cfg(target_os = "macos")]
        crtime: timestamp(attr.ctime),
        kind: to_fuse_kind(attr.kind),
        perm: attr.perm,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        #[cfg(target_os = "macos")]
        flags: 0,
        blksize: 4096,
    }
}
