//! Command line and environment configuration.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::cache::DEFAULT_POLL_INTERVAL;
use crate::source::leetcode::DEFAULT_BASE_URL;

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Mount your accepted LeetCode submissions as a read-only filesystem", long_about = None)]
pub struct Args {
    /// Empty directory to mount the filesystem on
    #[arg(long, env = "LEETFS_MOUNT_POINT")]
    pub mount_point: PathBuf,

    /// File holding the LeetCode session cookie header
    #[arg(long, env = "LEETFS_COOKIES_FILE", default_value = "cookie.txt")]
    pub cookies_file: PathBuf,

    /// Snapshot of known submissions, read at startup and written at exit
    #[arg(long, env = "LEETFS_SUBMISSIONS_FILE", default_value = "submissions.json")]
    pub submissions_file: PathBuf,

    /// Seconds between two refreshes
    #[arg(long, env = "LEETFS_POLL_DELAY_SECS", default_value_t = DEFAULT_POLL_INTERVAL.as_secs())]
    pub poll_delay_secs: u64,

    /// LeetCode API root
    #[arg(long, env = "LEETFS_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Path whose filesystem statistics are reported by statfs
    #[arg(long, env = "LEETFS_STATFS_PATH", default_value = "/")]
    pub statfs_path: PathBuf,

    /// Log verbosity; RUST_LOG takes precedence when set
    #[arg(
        long,
        env = "LEETFS_LOG_LEVEL",
        default_value = "warn",
        value_parser = ["error", "warn", "info", "debug", "trace"]
    )]
    pub log_level: String,

    /// Mount without fusermount3 (requires root)
    #[arg(long, env = "LEETFS_PRIVILEGED")]
    pub privileged: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("poll delay must be at least one second")]
    ZeroPollDelay,
    #[error("mount point {} is not a directory", .0.display())]
    MountPoint(PathBuf),
    #[error("cannot read cookies file {}: {source}", path.display())]
    Cookies {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cookies file {} is empty", .0.display())]
    EmptyCookies(PathBuf),
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub mount_point: PathBuf,
    pub cookie: String,
    pub submissions_file: PathBuf,
    pub poll_interval: Duration,
    pub base_url: String,
    pub statfs_path: PathBuf,
    pub log_level: String,
    pub privileged: bool,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        if args.poll_delay_secs == 0 {
            return Err(ConfigError::ZeroPollDelay);
        }
        if !args.mount_point.is_dir() {
            return Err(ConfigError::MountPoint(args.mount_point));
        }

        let cookie = std::fs::read_to_string(&args.cookies_file).map_err(|source| {
            ConfigError::Cookies {
                path: args.cookies_file.clone(),
                source,
            }
        })?;
        let cookie = cookie.trim().to_string();
        if cookie.is_empty() {
            return Err(ConfigError::EmptyCookies(args.cookies_file));
        }

        Ok(Self {
            mount_point: args.mount_point,
            cookie,
            submissions_file: args.submissions_file,
            poll_interval: Duration::from_secs(args.poll_delay_secs),
            base_url: args.base_url,
            statfs_path: args.statfs_path,
            log_level: args.log_level,
            privileged: args.privileged,
        })
    }
}
