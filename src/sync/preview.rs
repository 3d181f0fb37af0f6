// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Diff summaries for the confirmation gate.

use git2::{DiffFormat, DiffOptions, DiffStatsFormat, Repository};
use std::path::Path;
use tracing::{debug, instrument};

/// Largest combined insertion and deletion count that still shows a full patch.
pub const PATCH_LINE_LIMIT: usize = 50;

/// Human-readable summary of staged changes under one target.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DiffPreview {
    /// Number of files touched.
    pub files_changed: usize,

    /// Lines added.
    pub insertions: usize,

    /// Lines removed.
    pub deletions: usize,

    /// Rendered stat block in the style of `git diff --stat`.
    pub stat: String,

    /// Unified diff, only present for small single-file changes.
    pub patch: Option<String>,
}

/// Summarize what is staged under repository-relative path against HEAD.
///
/// Never fails. Any problem reading the repository simply yields no preview,
/// since the preview is a courtesy for the operator and must not block the
/// push.
#[instrument(skip(root), level = "debug")]
pub fn summarize(root: &Path, repo_relative: &str) -> Option<DiffPreview> {
    match try_summarize(root, repo_relative) {
        Ok(preview) => preview,
        Err(error) => {
            debug!("no preview available: {error}");
            None
        }
    }
}

fn try_summarize(root: &Path, repo_relative: &str) -> Result<Option<DiffPreview>, git2::Error> {
    let repo = Repository::open(root)?;
    let tree = repo.head()?.peel_to_tree()?;
    let index = repo.index()?;

    let mut opts = DiffOptions::new();
    opts.pathspec(repo_relative);
    let diff = repo.diff_tree_to_index(Some(&tree), Some(&index), Some(&mut opts))?;

    let stats = diff.stats()?;
    if stats.files_changed() == 0 {
        return Ok(None);
    }

    let stat = stats
        .to_buf(DiffStatsFormat::FULL, 80)?
        .as_str()
        .unwrap_or_default()
        .to_string();

    let mut preview = DiffPreview {
        files_changed: stats.files_changed(),
        insertions: stats.insertions(),
        deletions: stats.deletions(),
        stat,
        patch: None,
    };

    if preview.files_changed == 1 && preview.insertions + preview.deletions <= PATCH_LINE_LIMIT {
        let mut patch = String::new();
        diff.print(DiffFormat::Patch, |_, _, line| {
            if matches!(line.origin(), '+' | '-' | ' ') {
                patch.push(line.origin());
            }
            patch.push_str(&String::from_utf8_lossy(line.content()));
            true
        })?;
        preview.patch = Some(patch);
    }

    Ok(Some(preview))
}
