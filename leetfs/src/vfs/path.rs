//! Path resolution for the two-level tree `/<slug>/<id>.<ext>`.
//!
//! Everything here is pure: callers pass the index snapshot they are working
//! against and get back a reference into the path string.

use super::error::FsError;
use crate::index::SubmissionIndex;

/// Logical target of a filesystem path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathRef<'a> {
    Root,
    ProblemDir(&'a str),
    SubmissionFile { slug: &'a str, id: u64 },
}

/// Splits an absolute path into its components. `/` has none.
pub fn components(path: &str) -> Vec<&str> {
    let relative = path.strip_prefix('/').unwrap_or(path);
    let relative = relative.strip_suffix('/').unwrap_or(relative);
    if relative.is_empty() {
        Vec::new()
    } else {
        relative.split('/').collect()
    }
}

/// A slug is a non-empty run of alphanumerics and `-`.
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty() && slug.chars().all(|c| c.is_alphanumeric() || c == '-')
}

/// Submission id encoded in a file name `<id>.<anything>`.
pub fn parse_file_name(name: &str) -> Option<u64> {
    let (stem, _ext) = name.split_once('.')?;
    stem.parse().ok()
}

/// Syntactic parse, without looking at the index.
pub fn parse(path: &str) -> Result<PathRef<'_>, FsError> {
    let not_found = || FsError::NotFound(path.to_string());
    match *components(path).as_slice() {
        [] => Ok(PathRef::Root),
        [slug] if is_valid_slug(slug) => Ok(PathRef::ProblemDir(slug)),
        [slug, file] if is_valid_slug(slug) => {
            let id = parse_file_name(file).ok_or_else(not_found)?;
            Ok(PathRef::SubmissionFile { slug, id })
        }
        _ => Err(not_found()),
    }
}

/// Parses `path` and checks that its target exists in `index`.
pub fn resolve<'a>(path: &'a str, index: &SubmissionIndex) -> Result<PathRef<'a>, FsError> {
    let target = parse(path)?;
    let exists = match target {
        PathRef::Root => true,
        PathRef::ProblemDir(slug) => index.contains(slug),
        PathRef::SubmissionFile { slug, id } => index.find(slug, id).is_some(),
    };
    if exists {
        Ok(target)
    } else {
        Err(FsError::NotFound(path.to_string()))
    }
}
