//! Mount helpers for starting/stopping FUSE
//!
//! Notes:
//! - Only supported on Linux. Unprivileged mounts go through fusermount3.
//! - These helpers are thin wrappers over rfuse3 raw Session APIs.

use std::path::Path;

use rfuse3::MountOptions;
use rfuse3::raw::MountHandle;

use super::LeetFuse;
use crate::index::SubmissionStore;

pub const FS_NAME: &str = "leetfs";

#[derive(Clone, Debug)]
pub struct MountConfig {
    pub fs_name: String,
    /// Mount directly instead of through fusermount3. Needs CAP_SYS_ADMIN.
    pub privileged: bool,
    pub uid: u32,
    pub gid: u32,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            fs_name: FS_NAME.to_string(),
            privileged: false,
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
        }
    }
}

fn mount_options(config: &MountConfig) -> MountOptions {
    let mut mo = MountOptions::default();
    mo.fs_name(config.fs_name.as_str())
        .read_only(true)
        .uid(config.uid)
        .gid(config.gid);
    mo
}

/// Mounts `fs` on the given empty directory. The returned handle resolves
/// when the filesystem is unmounted from outside.
#[cfg(target_os = "linux")]
pub async fn mount_leetfs<S>(
    fs: LeetFuse<S>,
    mount_point: impl AsRef<Path>,
    config: &MountConfig,
) -> std::io::Result<MountHandle>
where
    S: SubmissionStore + 'static,
{
    let session = rfuse3::raw::Session::new(mount_options(config));
    if config.privileged {
        session.mount(fs, mount_point).await
    } else {
        session.mount_with_unprivileged(fs, mount_point).await
    }
}

/// Fallback stub for non-Linux targets.
#[cfg(not(target_os = "linux"))]
pub async fn mount_leetfs<S>(
    _fs: LeetFuse<S>,
    _mount_point: impl AsRef<Path>,
    _config: &MountConfig,
) -> std::io::Result<MountHandle>
where
    S: SubmissionStore + 'static,
{
    let _ = mount_options;
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "FUSE mount is only supported on Linux in this build",
    ))
}
