//! Submission index: problem slug -> accepted submissions.
//!
//! The index is an immutable value shared behind [`SharedIndex`]. Writers
//! mutate a private copy (copy-on-write through `Arc::make_mut`) and swap it in
//! under the write lock, so readers always observe a complete refresh.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Verdict of the only submissions the index keeps.
pub const ACCEPTED: &str = "Accepted";

/// Extension used for languages missing from [`extension_for`].
pub const DEFAULT_EXTENSION: &str = ".txt";

/// One judged submission as reported by the remote source.
///
/// Field names follow the remote payload and the on-disk snapshot; any other
/// field in the payload is ignored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: u64,
    pub title_slug: String,
    pub status_display: String,
    pub lang: String,
    pub code: String,
    pub timestamp: u64,
}

impl Submission {
    pub fn is_accepted(&self) -> bool {
        self.status_display == ACCEPTED
    }

    /// Size of the exposed file: UTF-8 byte length of the code.
    pub fn code_len(&self) -> u64 {
        self.code.len() as u64
    }

    /// Display name inside the problem directory, e.g. `42.py`.
    pub fn file_name(&self) -> String {
        format!("{}{}", self.id, extension_for(&self.lang))
    }
}

/// Maps a judge language name to the extension shown in directory listings.
pub fn extension_for(lang: &str) -> &'static str {
    match lang {
        "bash" => ".sh",
        "csharp" => ".cs",
        "c" => ".c",
        "cpp" => ".cc",
        "dart" => ".dart",
        "elixir" => ".ex",
        "erlang" => ".erl",
        "golang" => ".go",
        "java" => ".java",
        "javascript" => ".js",
        "kotlin" => ".kt",
        "php" => ".php",
        "python" | "python3" => ".py",
        "racket" => ".rkt",
        "ruby" => ".rb",
        "rust" => ".rs",
        "scala" => ".scala",
        "sql" | "mysql" => ".sql",
        "swift" => ".swift",
        "typescript" => ".ts",
        _ => DEFAULT_EXTENSION,
    }
}

/// Accepted submissions grouped by problem slug.
///
/// Serializes as a plain JSON object `{ "<slug>": [Submission, ...] }`.
/// Lists are kept in insertion order; a slug with an empty list is treated as
/// absent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionIndex {
    problems: BTreeMap<String, Arc<Vec<Submission>>>,
}

impl SubmissionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submissions of `slug`, or `None` when the slug has none.
    pub fn get(&self, slug: &str) -> Option<&[Submission]> {
        self.problems
            .get(slug)
            .map(|list| list.as_slice())
            .filter(|list| !list.is_empty())
    }

    /// First submission of `slug` with the given id.
    pub fn find(&self, slug: &str, id: u64) -> Option<&Submission> {
        self.get(slug)?.iter().find(|s| s.id == id)
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.get(slug).is_some()
    }

    /// Slugs that currently have at least one submission.
    pub fn slugs(&self) -> impl Iterator<Item = &str> {
        self.problems
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(slug, _)| slug.as_str())
    }

    /// Replaces the list of `slug`. Non-accepted entries are dropped.
    pub fn set(&mut self, slug: impl Into<String>, mut submissions: Vec<Submission>) {
        submissions.retain(Submission::is_accepted);
        self.problems.insert(slug.into(), Arc::new(submissions));
    }

    /// Appends to the list of the submission's slug. No de-duplication is
    /// performed. Returns `false` (and stores nothing) for non-accepted input.
    pub fn append(&mut self, submission: Submission) -> bool {
        if !submission.is_accepted() {
            return false;
        }
        let list = self
            .problems
            .entry(submission.title_slug.clone())
            .or_default();
        Arc::make_mut(list).push(submission);
        true
    }

    /// Largest submission id in the index, 0 when empty.
    pub fn max_id(&self) -> u64 {
        self.problems
            .values()
            .flat_map(|list| list.iter())
            .map(|s| s.id)
            .max()
            .unwrap_or(0)
    }

    /// Number of visible problem directories.
    pub fn len(&self) -> usize {
        self.slugs().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn submission_count(&self) -> usize {
        self.problems.values().map(|list| list.len()).sum()
    }

    pub fn into_entries(self) -> impl Iterator<Item = (String, Vec<Submission>)> {
        self.problems
            .into_iter()
            .map(|(slug, list)| (slug, Arc::unwrap_or_clone(list)))
    }
}

/// Read access to the submission index as consumed by the filesystem layer.
pub trait SubmissionStore: Send + Sync {
    /// A consistent view of the whole index.
    fn snapshot(&self) -> Arc<SubmissionIndex>;

    fn set(&self, slug: &str, submissions: Vec<Submission>);

    fn get(&self, slug: &str) -> Option<Vec<Submission>> {
        self.snapshot().get(slug).map(<[Submission]>::to_vec)
    }

    fn keys(&self) -> Vec<String> {
        self.snapshot().slugs().map(str::to_owned).collect()
    }
}

impl<T: SubmissionStore + ?Sized> SubmissionStore for Arc<T> {
    fn snapshot(&self) -> Arc<SubmissionIndex> {
        (**self).snapshot()
    }

    fn set(&self, slug: &str, submissions: Vec<Submission>) {
        (**self).set(slug, submissions)
    }
}

/// The live index: one writer at a time, any number of readers.
#[derive(Debug, Default)]
pub struct SharedIndex {
    current: RwLock<Arc<SubmissionIndex>>,
}

impl SharedIndex {
    pub fn new(index: SubmissionIndex) -> Self {
        Self {
            current: RwLock::new(Arc::new(index)),
        }
    }

    /// Applies `f` to a private copy of the index and publishes the result.
    /// Readers holding an older snapshot keep it unchanged.
    pub fn update<R>(&self, f: impl FnOnce(&mut SubmissionIndex) -> R) -> R {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        f(Arc::make_mut(&mut *current))
    }
}

impl SubmissionStore for SharedIndex {
    fn snapshot(&self) -> Arc<SubmissionIndex> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*current)
    }

    fn set(&self, slug: &str, submissions: Vec<Submission>) {
        self.update(|index| index.set(slug, submissions));
    }
}
