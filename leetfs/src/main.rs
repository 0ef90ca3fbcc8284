use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use leetfs::cache::SubmissionCache;
use leetfs::config::{Args, Config};
use leetfs::fuse::LeetFuse;
use leetfs::fuse::mount::{MountConfig, mount_leetfs};
use leetfs::source::LeetCodeClient;
use leetfs::vfs::{Vfs, VfsOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    leetfs::logging::init(&args.log_level).map_err(|e| anyhow!(e))?;
    let config = Config::from_args(args).context("invalid configuration")?;

    let client = LeetCodeClient::new(&config.base_url, &config.cookie)
        .context("failed to build LeetCode client")?;
    let cache = Arc::new(SubmissionCache::new(Arc::new(client), config.poll_interval));

    cache
        .load_snapshot(&config.submissions_file)
        .await
        .with_context(|| format!("failed to load {}", config.submissions_file.display()))?;
    cache
        .start_polling()
        .await
        .context("initial refresh failed")?;

    let options = VfsOptions {
        statfs_path: config.statfs_path.clone(),
        ..VfsOptions::default()
    };
    let fs = LeetFuse::new(Vfs::with_options(Arc::clone(&cache), options));
    let mount_config = MountConfig {
        privileged: config.privileged,
        ..MountConfig::default()
    };

    let mut mount_handle = match mount_leetfs(fs, &config.mount_point, &mount_config).await {
        Ok(handle) => handle,
        Err(e) => {
            cache.stop_polling().await;
            return Err(e).with_context(|| format!("failed to mount {}", config.mount_point.display()));
        }
    };
    info!("mounted at {}", config.mount_point.display());

    let handle = &mut mount_handle;
    tokio::select! {
        res = handle => match res {
            Ok(()) => info!("unmounted externally"),
            Err(e) => error!("fuse session ended with error: {e}"),
        },
        _ = shutdown_signal() => {
            info!("unmounting {}", config.mount_point.display());
            if let Err(e) = mount_handle.unmount().await {
                error!("unmount failed: {e}");
            }
        }
    }

    // Persist first: stopping the poller may have to wait out a slow cycle.
    let dumped = cache.dump_snapshot(&config.submissions_file).await;
    cache.stop_polling().await;
    dumped.with_context(|| format!("failed to write {}", config.submissions_file.display()))?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
