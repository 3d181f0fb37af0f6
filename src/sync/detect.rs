// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Change detection.
//!
//! Compare a local source path against its counterpart inside the working
//! copy. Only path structure and byte content take part in the comparison.
//! A local source that is itself a symbolic link is followed. Below the root,
//! symbolic links, permission bits, and nested `.git` directories are ignored
//! on both sides.
//!
//! Git cannot hold empty directories, so directories only matter when they
//! sit where the other side has a file. Everything else is decided by the
//! set of regular files and their bytes.

use crate::sync::model::ChangeReport;

use ignore::WalkBuilder;
use similar::{ChangeTag, TextDiff};
use std::{
    collections::BTreeMap,
    fs,
    io::ErrorKind as IoErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// Kind of entry found while walking a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryKind {
    File,
    Dir,
}

/// Map every regular file and directory under root by relative path.
///
/// The root itself is not part of the mapping. Symbolic links and `.git`
/// directories are skipped.
pub(crate) fn walk_tree(root: &Path) -> Result<BTreeMap<PathBuf, EntryKind>, ignore::Error> {
    let mut entries = BTreeMap::new();
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(|entry| entry.file_name() != ".git")
        .build();

    for entry in walker {
        let entry = entry?;
        if entry.depth() == 0 {
            continue;
        }

        let kind = match entry.file_type() {
            Some(file_type) if file_type.is_dir() => EntryKind::Dir,
            Some(file_type) if file_type.is_file() => EntryKind::File,
            _ => continue,
        };

        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_path_buf();
        entries.insert(relative, kind);
    }

    Ok(entries)
}

/// Compare local source against path inside working copy.
///
/// A repository path that does not exist means a new target. New targets only
/// count as changed when the local source holds meaningful content: a file
/// larger than zero bytes, or a directory tree with at least one regular file.
///
/// # Errors
///
/// - Return [`DetectError::MissingSource`] if the repository already tracks
///   the target but the local source is gone.
/// - Return [`DetectError::Io`] or [`DetectError::Walk`] if either side
///   cannot be read.
#[instrument(level = "debug")]
pub fn detect(local_source: &Path, repo_path: &Path) -> Result<ChangeReport> {
    let repo_kind = kind_of(repo_path)?;
    let local_kind = kind_of(local_source)?;

    let Some(repo_kind) = repo_kind else {
        let report = new_target(local_source, local_kind)?;
        debug!(?report, "new target");
        return Ok(report);
    };

    let Some(local_kind) = local_kind else {
        return Err(DetectError::MissingSource {
            path: local_source.to_path_buf(),
        });
    };

    let mut report = ChangeReport::default();
    match (local_kind, repo_kind) {
        (EntryKind::File, EntryKind::File) => {
            compare_files(local_source, repo_path, &mut report)?;
        }
        (EntryKind::Dir, EntryKind::Dir) => {
            compare_trees(local_source, repo_path, &mut report)?;
        }
        _ => {
            report.has_changes = true;
            report.changed_file_count = count_files(local_source, local_kind)?;
        }
    }

    debug!(?report, "existing target");
    Ok(report)
}

/// Local content is worth pushing as a new target.
///
/// # Errors
///
/// - Return [`DetectError::Io`] or [`DetectError::Walk`] if source cannot be
///   read.
pub fn has_content(local_source: &Path) -> Result<bool> {
    match kind_of(local_source)? {
        None => Ok(false),
        Some(EntryKind::File) => Ok(file_size(local_source)? > 0),
        Some(EntryKind::Dir) => Ok(walk(local_source)?
            .values()
            .any(|kind| *kind == EntryKind::File)),
    }
}

fn new_target(local_source: &Path, local_kind: Option<EntryKind>) -> Result<ChangeReport> {
    let mut report = ChangeReport {
        is_new_target: true,
        ..Default::default()
    };

    if !has_content(local_source)? {
        return Ok(report);
    }

    report.has_changes = true;
    match local_kind {
        Some(EntryKind::File) => {
            report.changed_file_count = 1;
            report.insertion_count = line_count(&read(local_source)?);
        }
        Some(EntryKind::Dir) => {
            for (relative, kind) in walk(local_source)? {
                if kind == EntryKind::File {
                    report.changed_file_count += 1;
                    report.insertion_count += line_count(&read(&local_source.join(relative))?);
                }
            }
        }
        None => {}
    }

    Ok(report)
}

fn compare_trees(local_root: &Path, repo_root: &Path, report: &mut ChangeReport) -> Result<()> {
    let local = walk(local_root)?;
    let repo = walk(repo_root)?;

    for (relative, local_kind) in &local {
        match (local_kind, repo.get(relative)) {
            (EntryKind::File, Some(EntryKind::File)) => {
                compare_files(&local_root.join(relative), &repo_root.join(relative), report)?;
            }
            (EntryKind::File, None) => {
                report.has_changes = true;
                report.changed_file_count += 1;
                report.insertion_count += line_count(&read(&local_root.join(relative))?);
            }
            (EntryKind::File, Some(EntryKind::Dir)) => {
                report.has_changes = true;
                report.changed_file_count += 1;
            }
            (EntryKind::Dir, Some(EntryKind::File)) => report.has_changes = true,
            (EntryKind::Dir, _) => {}
        }
    }

    // INVARIANT: Repository-only files flag drift, but mirror-merge never
    // removes them, so they are not counted as changed files.
    if repo
        .iter()
        .any(|(relative, kind)| *kind == EntryKind::File && !local.contains_key(relative))
    {
        report.has_changes = true;
    }

    Ok(())
}

fn compare_files(local: &Path, repo: &Path, report: &mut ChangeReport) -> Result<()> {
    // INVARIANT: Different sizes cannot hold equal bytes.
    let same_size = file_size(local)? == file_size(repo)?;
    let local_bytes = read(local)?;
    let repo_bytes = read(repo)?;
    if same_size && local_bytes == repo_bytes {
        return Ok(());
    }

    report.has_changes = true;
    report.changed_file_count += 1;

    let old = String::from_utf8_lossy(&repo_bytes);
    let new = String::from_utf8_lossy(&local_bytes);
    let diff = TextDiff::from_lines(old.as_ref(), new.as_ref());
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => report.insertion_count += 1,
            ChangeTag::Delete => report.deletion_count += 1,
            ChangeTag::Equal => {}
        }
    }

    Ok(())
}

fn count_files(path: &Path, kind: EntryKind) -> Result<usize> {
    match kind {
        EntryKind::File => Ok(1),
        EntryKind::Dir => Ok(walk(path)?
            .values()
            .filter(|kind| **kind == EntryKind::File)
            .count()),
    }
}

fn kind_of(path: &Path) -> Result<Option<EntryKind>> {
    // INVARIANT: A symbolic link at the root is followed. Links below the
    // root are skipped by the walk.
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => Ok(Some(EntryKind::Dir)),
        Ok(metadata) if metadata.is_file() => Ok(Some(EntryKind::File)),
        Ok(_) => Ok(None),
        Err(err) if err.kind() == IoErrorKind::NotFound => Ok(None),
        Err(source) => Err(DetectError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn walk(root: &Path) -> Result<BTreeMap<PathBuf, EntryKind>> {
    walk_tree(root).map_err(|source| DetectError::Walk {
        path: root.to_path_buf(),
        source,
    })
}

fn file_size(path: &Path) -> Result<u64> {
    fs::metadata(path)
        .map(|metadata| metadata.len())
        .map_err(|source| DetectError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|source| DetectError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn line_count(bytes: &[u8]) -> usize {
    String::from_utf8_lossy(bytes).lines().count()
}

/// Change detection error types.
#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    /// Tracked target has no local source anymore.
    #[error("local source {:?} does not exist", path.display())]
    MissingSource { path: PathBuf },

    /// Failed to read file or metadata.
    #[error("failed to read {:?}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to walk directory tree.
    #[error("failed to walk {:?}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: ignore::Error,
    },
}

/// Friendly result alias :3
type Result<T, E = DetectError> = std::result::Result<T, E>;
