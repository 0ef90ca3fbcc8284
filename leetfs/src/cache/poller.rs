//! Background refresh loop.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::SubmissionCache;

/// A running refresh loop. Dropping it without [`Poller::stop`] leaves the
/// task running.
pub(crate) struct Poller {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Poller {
    /// Spawns the loop; the first tick fires one `period` from now.
    pub(crate) fn spawn(cache: Arc<SubmissionCache>, period: Duration) -> Self {
        let token = CancellationToken::new();
        let handle = tokio::spawn(run(cache, period, token.clone()));
        Self { token, handle }
    }

    /// Cancels future cycles and waits up to `grace` for a running one to
    /// finish. A cycle still running after that is aborted.
    pub(crate) async fn stop(mut self, grace: Duration) {
        self.token.cancel();
        let joined = match tokio::time::timeout(grace, &mut self.handle).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!("refresh cycle still running after {grace:?}, aborting it");
                self.handle.abort();
                (&mut self.handle).await
            }
        };
        match joined {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => info!("poller aborted"),
            Err(e) => error!("poller task ended abnormally: {e}"),
        }
    }
}

async fn run(cache: Arc<SubmissionCache>, period: Duration, token: CancellationToken) {
    // `interval` panics on a zero period.
    let period = period.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("polling every {period:?}");

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        run_cycle(&cache).await;
    }
    info!("poller stopped");
}

/// One refresh cycle. Failures, panics included, end the cycle and nothing
/// else.
async fn run_cycle(cache: &SubmissionCache) {
    debug!("refresh cycle starting");
    match AssertUnwindSafe(cache.refresh_now()).catch_unwind().await {
        Ok(Ok(added)) => info!(
            "refresh cycle done: {added} new, cursor {}",
            cache.last_fetched_id()
        ),
        Ok(Err(e)) => error!("refresh cycle failed: {e}"),
        Err(_) => error!("refresh cycle panicked"),
    }
}
