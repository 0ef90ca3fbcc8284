//! Submission cache: owns the live index, keeps it in sync with the remote
//! source and persists it across restarts.
//!
//! Refresh cycles are serialized by `refresh_lock`, so the index only ever
//! has one writer. Each cycle is applied as a single copy-on-write update;
//! filesystem readers see the index either before or after a cycle.

pub mod poller;
pub mod snapshot;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::index::{SharedIndex, Submission, SubmissionIndex, SubmissionStore};
use crate::source::{FetchError, SubmissionSource};
use poller::Poller;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2 * 60 * 60);

/// How long [`SubmissionCache::stop_polling`] waits for a running cycle.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("snapshot {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("snapshot {} is malformed: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode snapshot: {0}")]
    Encode(#[source] serde_json::Error),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

pub struct SubmissionCache {
    source: Arc<dyn SubmissionSource>,
    index: Arc<SharedIndex>,
    last_fetched_id: AtomicU64,
    poll_interval: Duration,
    refresh_lock: Mutex<()>,
    poller: Mutex<Option<Poller>>,
}

impl SubmissionCache {
    pub fn new(source: Arc<dyn SubmissionSource>, poll_interval: Duration) -> Self {
        Self {
            source,
            index: Arc::new(SharedIndex::default()),
            last_fetched_id: AtomicU64::new(0),
            poll_interval,
            refresh_lock: Mutex::new(()),
            poller: Mutex::new(None),
        }
    }

    /// The live index, for readers.
    pub fn index(&self) -> Arc<SharedIndex> {
        Arc::clone(&self.index)
    }

    /// Highest submission id seen so far, from the remote or a snapshot.
    pub fn last_fetched_id(&self) -> u64 {
        self.last_fetched_id.load(Ordering::SeqCst)
    }

    /// Merges the snapshot at `path` into the index, replacing the lists of
    /// the slugs it contains. Returns the number of submissions loaded.
    pub async fn load_snapshot(&self, path: &Path) -> Result<usize, CacheError> {
        let _guard = self.refresh_lock.lock().await;
        let Some(loaded) = snapshot::read_snapshot(path).await? else {
            info!("no snapshot at {}, starting empty", path.display());
            return Ok(0);
        };

        let max_id = loaded.max_id();
        let count = loaded.submission_count();
        self.index.update(|index| {
            for (slug, submissions) in loaded.into_entries() {
                index.set(slug, submissions);
            }
        });
        self.last_fetched_id.fetch_max(max_id, Ordering::SeqCst);
        info!(
            "loaded {count} submissions from {}, cursor {}",
            path.display(),
            self.last_fetched_id()
        );
        Ok(count)
    }

    /// Writes the current index to `path`, replacing any previous snapshot.
    pub async fn dump_snapshot(&self, path: &Path) -> Result<(), CacheError> {
        let index = self.index.snapshot();
        snapshot::write_snapshot(path, &index).await
    }

    /// Runs one refresh cycle now and returns how many submissions were
    /// added. On error the index and the cursor are left untouched.
    pub async fn refresh_now(&self) -> Result<usize, CacheError> {
        let _guard = self.refresh_lock.lock().await;
        let since = self.last_fetched_id();
        let fetched = self.source.fetch_all_submissions(since).await?;
        let Some(newest) = fetched.iter().map(|s| s.id).max() else {
            debug!("no submissions newer than {since}");
            return Ok(0);
        };

        let added = self.index.update(|index| apply(index, fetched));
        self.last_fetched_id.fetch_max(newest, Ordering::SeqCst);
        Ok(added)
    }

    /// Runs the first refresh cycle inline, then keeps refreshing every poll
    /// interval in the background. A rejected identity on that first cycle
    /// is returned; any other failure is logged and polling starts anyway.
    pub async fn start_polling(self: &Arc<Self>) -> Result<(), CacheError> {
        let mut poller = self.poller.lock().await;
        if poller.is_some() {
            debug!("polling already running");
            return Ok(());
        }

        match self.refresh_now().await {
            Ok(added) => info!("initial refresh: {added} new submissions"),
            Err(CacheError::Fetch(e)) if e.is_auth() => {
                error!("initial refresh rejected: {e}");
                return Err(e.into());
            }
            Err(e) => warn!("initial refresh failed, will retry on schedule: {e}"),
        }

        *poller = Some(Poller::spawn(Arc::clone(self), self.poll_interval));
        Ok(())
    }

    /// Stops the background loop. An in-flight cycle gets [`STOP_GRACE`] to
    /// finish and is aborted after that, leaving index and cursor as they were.
    pub async fn stop_polling(&self) {
        let poller = self.poller.lock().await.take();
        if let Some(poller) = poller {
            poller.stop(STOP_GRACE).await;
        }
    }

    pub async fn is_polling(&self) -> bool {
        self.poller.lock().await.is_some()
    }
}

/// Appends the accepted part of one cycle's fetch.
fn apply(index: &mut SubmissionIndex, fetched: Vec<Submission>) -> usize {
    fetched
        .into_iter()
        .map(|submission| index.append(submission))
        .filter(|&appended| appended)
        .count()
}

impl SubmissionStore for SubmissionCache {
    fn snapshot(&self) -> Arc<SubmissionIndex> {
        self.index.snapshot()
    }

    fn set(&self, slug: &str, submissions: Vec<Submission>) {
        self.index.set(slug, submissions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ACCEPTED;
    use crate::index::tests::submission;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::Instant;

    #[derive(Clone, Copy, PartialEq)]
    enum Mode {
        Serve,
        Transient,
        Auth,
        Panic,
        Stall,
    }

    /// Serves a fixed list, honouring the cursor unless `replay` is set.
    struct FakeSource {
        submissions: std::sync::Mutex<Vec<Submission>>,
        mode: std::sync::Mutex<Mode>,
        replay: bool,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn new(submissions: Vec<Submission>) -> Arc<Self> {
            Arc::new(Self {
                submissions: std::sync::Mutex::new(submissions),
                mode: std::sync::Mutex::new(Mode::Serve),
                replay: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn replaying(submissions: Vec<Submission>) -> Arc<Self> {
            Arc::new(Self {
                submissions: std::sync::Mutex::new(submissions),
                mode: std::sync::Mutex::new(Mode::Serve),
                replay: true,
                calls: AtomicUsize::new(0),
            })
        }

        fn set_mode(&self, mode: Mode) {
            *self.mode.lock().unwrap() = mode;
        }

        fn push(&self, submission: Submission) {
            self.submissions.lock().unwrap().push(submission);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SubmissionSource for FakeSource {
        async fn fetch_problem_slugs(&self) -> Result<Vec<String>, FetchError> {
            Ok(Vec::new())
        }

        async fn fetch_submissions(&self, slug: &str) -> Result<Vec<Submission>, FetchError> {
            let all = self.submissions.lock().unwrap();
            Ok(all.iter().filter(|s| s.title_slug == slug).cloned().collect())
        }

        async fn fetch_all_submissions(&self, since_id: u64) -> Result<Vec<Submission>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mode = *self.mode.lock().unwrap();
            match mode {
                Mode::Serve => {}
                Mode::Transient => return Err(FetchError::Transient("offline".into())),
                Mode::Auth => return Err(FetchError::Auth("logged out".into())),
                Mode::Panic => panic!("source exploded"),
                Mode::Stall => std::future::pending::<()>().await,
            }
            let all = self.submissions.lock().unwrap();
            Ok(all
                .iter()
                .filter(|s| self.replay || s.id > since_id)
                .cloned()
                .collect())
        }
    }

    /// Takes `delay` per fetch and records how many fetches overlap.
    struct SlowSource {
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        spans: std::sync::Mutex<Vec<(Instant, Instant)>>,
    }

    impl SlowSource {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                spans: std::sync::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SubmissionSource for SlowSource {
        async fn fetch_problem_slugs(&self) -> Result<Vec<String>, FetchError> {
            Ok(Vec::new())
        }

        async fn fetch_submissions(&self, _slug: &str) -> Result<Vec<Submission>, FetchError> {
            Ok(Vec::new())
        }

        async fn fetch_all_submissions(&self, _since_id: u64) -> Result<Vec<Submission>, FetchError> {
            let start = Instant::now();
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.spans.lock().unwrap().push((start, Instant::now()));
            Ok(Vec::new())
        }
    }

    fn cache(source: Arc<FakeSource>, interval: Duration) -> Arc<SubmissionCache> {
        Arc::new(SubmissionCache::new(source, interval))
    }

    #[tokio::test]
    async fn test_refresh_keeps_accepted_and_advances_cursor() {
        let source = FakeSource::new(vec![
            submission(5, "two-sum", ACCEPTED, "python3", "print(1)"),
            submission(9, "two-sum", "Wrong Answer", "python3", "print(2)"),
        ]);
        let cache = cache(source, DEFAULT_POLL_INTERVAL);

        assert_eq!(cache.refresh_now().await.unwrap(), 1);
        assert_eq!(cache.last_fetched_id(), 9);
        let index = cache.index().snapshot();
        assert_eq!(index.get("two-sum").unwrap().len(), 1);
        assert_eq!(index.get("two-sum").unwrap()[0].id, 5);
    }

    #[tokio::test]
    async fn test_refresh_without_new_data_is_idempotent() {
        let source = FakeSource::new(vec![submission(5, "two-sum", ACCEPTED, "python3", "print(1)")]);
        let cache = cache(source, DEFAULT_POLL_INTERVAL);
        cache.refresh_now().await.unwrap();
        let before = serde_json::to_vec(&*cache.snapshot()).unwrap();

        assert_eq!(cache.refresh_now().await.unwrap(), 0);
        let after = serde_json::to_vec(&*cache.snapshot()).unwrap();
        assert_eq!(before, after);
        assert_eq!(cache.last_fetched_id(), 5);
    }

    #[tokio::test]
    async fn test_resent_id_is_appended_twice() {
        let source = FakeSource::replaying(vec![submission(5, "two-sum", ACCEPTED, "python3", "print(1)")]);
        let cache = cache(source, DEFAULT_POLL_INTERVAL);
        cache.refresh_now().await.unwrap();
        cache.refresh_now().await.unwrap();

        let ids: Vec<u64> = cache.get("two-sum").unwrap().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![5, 5]);
    }

    #[tokio::test]
    async fn test_failed_refresh_changes_nothing() {
        let source = FakeSource::new(vec![submission(5, "two-sum", ACCEPTED, "python3", "print(1)")]);
        let cache = cache(source.clone(), DEFAULT_POLL_INTERVAL);
        cache.refresh_now().await.unwrap();

        source.push(submission(6, "3sum", ACCEPTED, "rust", "fn main() {}"));
        source.set_mode(Mode::Transient);
        let err = cache.refresh_now().await.unwrap_err();
        assert!(matches!(err, CacheError::Fetch(ref e) if e.is_transient()));
        assert_eq!(cache.last_fetched_id(), 5);
        assert_eq!(cache.keys(), vec!["two-sum".to_string()]);

        source.set_mode(Mode::Serve);
        assert_eq!(cache.refresh_now().await.unwrap(), 1);
        assert_eq!(cache.last_fetched_id(), 6);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("submissions.json");

        let source = FakeSource::new(vec![
            submission(5, "two-sum", ACCEPTED, "python3", "print(1)"),
            submission(12, "3sum", ACCEPTED, "rust", "fn main() {}"),
            submission(8, "two-sum", ACCEPTED, "cpp", "int main() {}"),
        ]);
        let first = cache(source, DEFAULT_POLL_INTERVAL);
        first.refresh_now().await.unwrap();
        first.dump_snapshot(&path).await.unwrap();

        let restored = cache(FakeSource::new(Vec::new()), DEFAULT_POLL_INTERVAL);
        assert_eq!(restored.load_snapshot(&path).await.unwrap(), 3);
        assert_eq!(*restored.snapshot(), *first.snapshot());
        assert_eq!(restored.last_fetched_id(), 12);
    }

    #[tokio::test]
    async fn test_load_missing_snapshot_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(FakeSource::new(Vec::new()), DEFAULT_POLL_INTERVAL);
        assert_eq!(cache.load_snapshot(&dir.path().join("none.json")).await.unwrap(), 0);
        assert!(cache.snapshot().is_empty());
        assert_eq!(cache.last_fetched_id(), 0);
    }

    #[tokio::test]
    async fn test_start_polling_escalates_auth_failure() {
        let source = FakeSource::new(Vec::new());
        source.set_mode(Mode::Auth);
        let cache = cache(source, Duration::from_millis(10));

        let err = cache.start_polling().await.unwrap_err();
        assert!(matches!(err, CacheError::Fetch(FetchError::Auth(_))));
        assert!(!cache.is_polling().await);
    }

    #[tokio::test]
    async fn test_start_polling_survives_transient_first_cycle() {
        let source = FakeSource::new(vec![submission(5, "two-sum", ACCEPTED, "python3", "print(1)")]);
        source.set_mode(Mode::Transient);
        let cache = cache(source.clone(), Duration::from_millis(10));

        cache.start_polling().await.unwrap();
        assert!(cache.is_polling().await);
        assert!(cache.snapshot().is_empty());

        source.set_mode(Mode::Serve);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.snapshot().contains("two-sum"));
        cache.stop_polling().await;
    }

    #[tokio::test]
    async fn test_polling_repeats_until_stopped() {
        let source = FakeSource::new(Vec::new());
        let cache = cache(source.clone(), Duration::from_millis(10));

        cache.start_polling().await.unwrap();
        // Starting twice does not spawn a second loop.
        cache.start_polling().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(source.calls() >= 3);

        cache.stop_polling().await;
        assert!(!cache.is_polling().await);
        let calls = source.calls();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(source.calls(), calls);
    }

    #[tokio::test]
    async fn test_panicking_cycle_does_not_end_polling() {
        let source = FakeSource::new(Vec::new());
        let cache = cache(source.clone(), Duration::from_millis(10));
        cache.start_polling().await.unwrap();

        source.set_mode(Mode::Panic);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let during_panics = source.calls();

        source.set_mode(Mode::Serve);
        source.push(submission(7, "two-sum", ACCEPTED, "c", "int x;"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(source.calls() > during_panics);
        assert!(cache.snapshot().contains("two-sum"));
        cache.stop_polling().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_polling_gives_up_on_stalled_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("submissions.json");
        let source = FakeSource::new(vec![submission(5, "two-sum", ACCEPTED, "python3", "print(1)")]);
        let cache = cache(source.clone(), Duration::from_millis(10));
        cache.start_polling().await.unwrap();

        source.set_mode(Mode::Stall);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let stalled_at = source.calls();
        assert!(stalled_at >= 2);

        let stopped = tokio::time::timeout(STOP_GRACE * 2, cache.stop_polling()).await;
        assert!(stopped.is_ok());
        assert!(!cache.is_polling().await);
        assert_eq!(cache.last_fetched_id(), 5);

        // The aborted cycle no longer holds the refresh lock.
        cache.dump_snapshot(&path).await.unwrap();
        source.set_mode(Mode::Serve);
        assert_eq!(cache.refresh_now().await.unwrap(), 0);
        assert_eq!(source.calls(), stalled_at + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrunning_cycles_never_overlap() {
        let period = Duration::from_millis(100);
        let source = SlowSource::new(Duration::from_millis(250));
        let cache = Arc::new(SubmissionCache::new(source.clone(), period));
        cache.start_polling().await.unwrap();

        let manual = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.refresh_now().await })
        };
        tokio::time::sleep(Duration::from_secs(2)).await;
        manual.await.unwrap().unwrap();
        cache.stop_polling().await;

        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
        let spans = source.spans.lock().unwrap().clone();
        assert!(spans.len() >= 4, "only {} cycles ran", spans.len());
        // Past the first scheduled tick, each overrunning cycle is followed
        // straight away by the next one.
        for pair in spans[2..].windows(2) {
            let gap = pair[1].0 - pair[0].1;
            assert!(gap < period, "waited {gap:?} between cycles");
        }
    }
}
