// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Working copy management.
//!
//! The __working copy__ is the single persistent local clone of the remote
//! configuration repository. [`GitWorkingCopy`] is the only thing allowed to
//! mutate it: branch checkout, staging, committing, and file placement all
//! flow through here so that recovery has exactly one authoritative actor.
//!
//! # Lifecycle
//!
//! One synchronization attempt walks the working copy through
//! `Absent -> Cloned -> TrackedClean -> Branched -> Staged -> Committed ->
//! Pushed`. From any state at or after `TrackedClean`,
//! [`GitWorkingCopy::cleanup_staged_changes`] brings it back to
//! `TrackedClean`.
//!
//! # Git Access
//!
//! Every mutation and every network operation shells out to the Git binary
//! through [`Syscall`], which provides timeouts and lets Git negotiate
//! credentials itself. Read-only inspection of the repository, e.g., listing
//! committed files or checking for existing branches, goes through libgit2.

use crate::{
    sync::{detect::walk_tree, detect::EntryKind, model::RepositoryHandle},
    syscall::{Syscall, SyscallError, SyscallOutput, DEFAULT_TIMEOUT},
};

use git2::{BranchType, ObjectType, Repository};
use std::{
    collections::VecDeque,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, instrument};

/// Environment variable the inline credential helper reads the token from.
const TOKEN_ENV: &str = "ANVIL_GIT_TOKEN";

/// Git stderr fragments that mean the configured branch does not exist.
const BRANCH_NOT_FOUND_SIGNATURES: [&str; 4] = [
    "not found in upstream",
    "couldn't find remote ref",
    "did not match any file(s) known to git",
    "invalid reference",
];

/// Build Git syscall that authenticates the way the handle asks for.
///
/// Tokens never land in URLs or in `.git/config`. Instead an inline
/// credential helper hands the token to Git from the child's environment.
pub(crate) fn git_syscall(handle: &RepositoryHandle, timeout: Duration) -> Syscall {
    let mut syscall = Syscall::new("git")
        .timeout(timeout)
        .env("GIT_TERMINAL_PROMPT", "0");

    if let Some(token) = &handle.auth_token {
        syscall = syscall
            .args([
                "-c",
                "credential.helper=",
                "-c",
                "credential.helper=!f() { test \"$1\" = get && echo username=x-access-token \
                 && echo \"password=$ANVIL_GIT_TOKEN\"; }; f",
            ])
            .env(TOKEN_ENV, token);
    }

    if let Some(key) = &handle.ssh_key_path {
        let mut command = OsString::from("ssh -i '");
        command.push(key.as_os_str());
        command.push("' -o IdentitiesOnly=yes");
        syscall = syscall.env("GIT_SSH_COMMAND", command);
    }

    syscall
}

/// Single persistent clone of the remote configuration repository.
#[derive(Debug, Clone)]
pub struct GitWorkingCopy {
    handle: RepositoryHandle,
    timeout: Duration,
}

impl GitWorkingCopy {
    /// Construct new working copy manager for target repository handle.
    pub fn new(handle: RepositoryHandle) -> Self {
        Self {
            handle,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Replace default timeout of Git commands.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Repository handle this working copy belongs to.
    pub fn handle(&self) -> &RepositoryHandle {
        &self.handle
    }

    /// Root directory of the working copy.
    pub fn root(&self) -> &Path {
        self.handle.local_clone_path.as_path()
    }

    /// Check if a valid non-bare repository lives at the clone path.
    pub fn is_cloned(&self) -> bool {
        Repository::open(self.root())
            .map(|repo| !repo.is_bare())
            .unwrap_or(false)
    }

    /// Clone repository at tracked branch if not cloned already.
    ///
    /// # Errors
    ///
    /// - Return [`WorkingCopyError::BranchNotFound`] if tracked branch does
    ///   not exist on remote.
    /// - Return [`WorkingCopyError::Access`] if authentication or network
    ///   fails.
    #[instrument(skip(self), level = "debug")]
    pub async fn ensure_cloned(&self) -> Result<()> {
        if self.is_cloned() {
            debug!("working copy already cloned at {:?}", self.root().display());
            return Ok(());
        }

        // INVARIANT: Parent must exist, because Git runs from inside it.
        let parent = match self.root().parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        mkdirp::mkdirp(&parent).map_err(|source| WorkingCopyError::FileSystem {
            action: "create directory",
            path: parent.clone(),
            source,
        })?;

        let syscall = git_syscall(&self.handle, self.timeout)
            .current_dir(&parent)
            .args(["clone", "--branch", self.handle.tracked_branch.as_str()])
            .arg(self.handle.clone_url())
            .arg(self.root().as_os_str());
        let output = syscall.run().await?;
        if !output.succeeded() {
            return Err(self.classify("clone", &output));
        }

        Ok(())
    }

    /// Check out tracked branch.
    ///
    /// # Errors
    ///
    /// - Return [`WorkingCopyError::BranchNotFound`] if tracked branch does
    ///   not exist.
    /// - Return [`WorkingCopyError::Access`] if checkout fails otherwise.
    pub async fn checkout_tracked(&self) -> Result<()> {
        let output = self
            .git(["checkout", self.handle.tracked_branch.as_str()])
            .run()
            .await?;
        if !output.succeeded() {
            return Err(self.classify("checkout", &output));
        }

        Ok(())
    }

    /// Fast-forward tracked branch from remote.
    ///
    /// Conflicts are never resolved automatically.
    ///
    /// # Errors
    ///
    /// - Return [`WorkingCopyError::BranchNotFound`] if tracked branch does
    ///   not exist on remote.
    /// - Return [`WorkingCopyError::Access`] on conflict or network failure.
    #[instrument(skip(self), level = "debug")]
    pub async fn pull_latest(&self) -> Result<()> {
        let output = self
            .git([
                "pull",
                "--ff-only",
                "origin",
                self.handle.tracked_branch.as_str(),
            ])
            .run()
            .await?;
        if !output.succeeded() {
            return Err(self.classify("pull", &output));
        }

        Ok(())
    }

    /// Make working copy match the last commit of the current branch.
    ///
    /// Drops staged changes, discards edits to tracked files, and removes
    /// untracked files and directories left behind by interrupted runs.
    ///
    /// # Errors
    ///
    /// - Return [`WorkingCopyError::Access`] if Git fails.
    pub async fn ensure_clean(&self) -> Result<()> {
        self.run("reset", ["reset", "--hard", "HEAD"]).await?;
        self.run("clean", ["clean", "-fd"]).await?;

        Ok(())
    }

    /// Create new branch from current HEAD, and switch to it.
    ///
    /// # Errors
    ///
    /// - Return [`WorkingCopyError::BranchExists`] if branch already exists.
    /// - Return [`WorkingCopyError::Access`] if Git fails.
    pub async fn create_and_checkout_branch(&self, name: impl AsRef<str>) -> Result<()> {
        let name = name.as_ref();
        let repo = Repository::open(self.root())?;
        if repo.find_branch(name, BranchType::Local).is_ok() {
            return Err(WorkingCopyError::BranchExists(name.to_string()));
        }

        self.run("checkout -b", ["checkout", "-b", name]).await?;
        Ok(())
    }

    /// Delete local branch that is not checked out.
    ///
    /// # Errors
    ///
    /// - Return [`WorkingCopyError::Access`] if Git fails.
    pub async fn delete_branch(&self, name: impl AsRef<str>) -> Result<()> {
        self.run("branch -D", ["branch", "-D", name.as_ref()]).await?;
        Ok(())
    }

    /// Copy local source into working copy at repository-relative path.
    ///
    /// Performs a __mirror-merge__: files from source are added or overwrite
    /// their counterparts, while files only present in the destination are
    /// left alone. Symbolic links and `.git` directories are skipped.
    ///
    /// Returns number of files copied.
    ///
    /// # Errors
    ///
    /// - Return [`WorkingCopyError::FileSystem`] if any I/O fails.
    #[instrument(skip(self, source), level = "debug")]
    pub fn mirror_into(&self, source: &Path, repo_relative: &str) -> Result<usize> {
        mirror_merge(source, &self.root().join(repo_relative))
    }

    /// Stage entire working tree.
    ///
    /// # Errors
    ///
    /// - Return [`WorkingCopyError::Access`] if Git fails.
    pub async fn stage_all(&self) -> Result<()> {
        self.run("add", ["add", "-A"]).await?;
        Ok(())
    }

    /// Commit staged changes.
    ///
    /// # Errors
    ///
    /// - Return [`WorkingCopyError::NoChanges`] if nothing differs from HEAD.
    /// - Return [`WorkingCopyError::Access`] if Git fails.
    #[instrument(skip(self, message), level = "debug")]
    pub async fn commit(&self, message: impl AsRef<str>) -> Result<()> {
        let output = self.git(["diff", "--cached", "--quiet"]).run().await?;
        match output.exit_code {
            Some(0) => return Err(WorkingCopyError::NoChanges),
            Some(1) => {}
            _ => return Err(self.access("diff --cached", &output)),
        }

        let mut syscall = git_syscall(&self.handle, self.timeout).current_dir(self.root());
        if !self.handle.committer_name.is_empty() {
            syscall = syscall
                .arg("-c")
                .arg(format!("user.name={}", self.handle.committer_name));
        }
        if !self.handle.committer_email.is_empty() {
            syscall = syscall
                .arg("-c")
                .arg(format!("user.email={}", self.handle.committer_email));
        }
        let output = syscall
            .args(["commit", "-m", message.as_ref()])
            .run()
            .await?;
        if !output.succeeded() {
            return Err(self.access("commit", &output));
        }

        Ok(())
    }

    /// Push current branch, and set its upstream.
    ///
    /// # Errors
    ///
    /// - Return [`WorkingCopyError::Access`] if remote rejects the push.
    #[instrument(skip(self, name), level = "debug")]
    pub async fn push_current_branch(&self, name: impl AsRef<str>) -> Result<()> {
        self.run("push", ["push", "--set-upstream", "origin", name.as_ref()])
            .await?;
        Ok(())
    }

    /// Unconditionally return working copy to a clean tracked branch.
    ///
    /// Resets index and working tree, deletes untracked files, and checks out
    /// tracked branch. Safe to call when nothing was ever staged, or when the
    /// working copy was never cloned.
    ///
    /// # Errors
    ///
    /// - Return [`WorkingCopyError::Access`] if Git fails.
    #[instrument(skip(self), level = "debug")]
    pub async fn cleanup_staged_changes(&self) -> Result<()> {
        if !self.is_cloned() {
            return Ok(());
        }

        self.run("reset", ["reset", "--hard", "HEAD"]).await?;
        self.run("clean", ["clean", "-fd"]).await?;
        self.run(
            "checkout",
            ["checkout", self.handle.tracked_branch.as_str()],
        )
        .await?;

        Ok(())
    }

    /// Name of currently checked out branch, if HEAD is not detached.
    ///
    /// # Errors
    ///
    /// - Return [`WorkingCopyError::Git2`] if repository cannot be opened.
    pub fn current_branch(&self) -> Result<Option<String>> {
        let repo = Repository::open(self.root())?;
        let head = repo.head()?;
        if !head.is_branch() {
            return Ok(None);
        }

        Ok(head.shorthand().map(ToString::to_string))
    }

    /// List files committed at HEAD under repository-relative path.
    ///
    /// Paths use '/' separators and are sorted.
    ///
    /// # Errors
    ///
    /// - Return [`WorkingCopyError::Git2`] if HEAD or the path cannot be read.
    pub fn committed_files(&self, repo_relative: &str) -> Result<Vec<String>> {
        let repo = Repository::open(self.root())?;
        let tree = repo.head()?.peel_to_tree()?;
        let entry = tree.get_path(Path::new(repo_relative))?;

        let mut files = Vec::new();
        match entry.kind() {
            Some(ObjectType::Blob) => files.push(repo_relative.to_string()),
            Some(ObjectType::Tree) => {
                let mut trees = VecDeque::new();
                trees.push_front((repo.find_tree(entry.id())?, repo_relative.to_string()));

                // Use DFS to traverse tree.
                while let Some((tree, prefix)) = trees.pop_front() {
                    for tree_entry in tree.iter() {
                        let name = String::from_utf8_lossy(tree_entry.name_bytes());
                        let path = format!("{prefix}/{name}");
                        match tree_entry.kind() {
                            // INVARIANT: Hit a tree? Traverse it!
                            Some(ObjectType::Tree) => {
                                trees.push_front((repo.find_tree(tree_entry.id())?, path));
                            }
                            // INVARIANT: Hit a blob? Record our current path!
                            Some(ObjectType::Blob) => files.push(path),
                            _ => continue,
                        }
                    }
                }
            }
            _ => {}
        }

        files.sort();
        Ok(files)
    }

    /// Copy repository-relative directory out of working copy.
    ///
    /// Replaces anything already at destination. Returns copied files
    /// relative to destination.
    ///
    /// # Errors
    ///
    /// - Return [`WorkingCopyError::NotFound`] if path does not exist in
    ///   working copy.
    /// - Return [`WorkingCopyError::FileSystem`] if any I/O fails.
    pub fn export(&self, repo_relative: &str, destination: &Path) -> Result<Vec<String>> {
        let source = self.root().join(repo_relative);
        if !source.exists() {
            return Err(WorkingCopyError::NotFound { path: source });
        }

        if destination.exists() {
            fs::remove_dir_all(destination).map_err(|source| WorkingCopyError::FileSystem {
                action: "remove",
                path: destination.to_path_buf(),
                source,
            })?;
        }
        mirror_merge(&source, destination)?;

        let files = walk_tree(destination)
            .map_err(|source| WorkingCopyError::Walk {
                path: destination.to_path_buf(),
                source,
            })?
            .into_iter()
            .filter(|(_, kind)| *kind == EntryKind::File)
            .map(|(path, _)| path.to_string_lossy().replace('\\', "/"))
            .collect();

        Ok(files)
    }

    fn git(&self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Syscall {
        git_syscall(&self.handle, self.timeout)
            .current_dir(self.root())
            .args(args)
    }

    async fn run(
        &self,
        operation: &'static str,
        args: impl IntoIterator<Item = impl Into<OsString>>,
    ) -> Result<SyscallOutput> {
        let output = self.git(args).run().await?;
        if !output.succeeded() {
            return Err(self.access(operation, &output));
        }

        Ok(output)
    }

    fn access(&self, operation: &'static str, output: &SyscallOutput) -> WorkingCopyError {
        WorkingCopyError::Access {
            operation,
            stderr: output.diagnostic().to_string(),
        }
    }

    fn classify(&self, operation: &'static str, output: &SyscallOutput) -> WorkingCopyError {
        let stderr = output.diagnostic();
        if BRANCH_NOT_FOUND_SIGNATURES
            .iter()
            .any(|signature| stderr.contains(signature))
        {
            return WorkingCopyError::BranchNotFound {
                operation,
                branch: self.handle.tracked_branch.clone(),
                stderr: stderr.to_string(),
            };
        }

        self.access(operation, output)
    }
}

/// Mirror-merge source file or directory onto destination.
///
/// A file source is copied to destination itself. A directory source has its
/// tree recreated under destination.
pub(crate) fn mirror_merge(source: &Path, destination: &Path) -> Result<usize> {
    let metadata = fs::metadata(source).map_err(|err| WorkingCopyError::FileSystem {
        action: "inspect",
        path: source.to_path_buf(),
        source: err,
    })?;

    if metadata.is_file() {
        copy_file(source, destination)?;
        return Ok(1);
    }

    make_dir(destination)?;
    let entries = walk_tree(source).map_err(|err| WorkingCopyError::Walk {
        path: source.to_path_buf(),
        source: err,
    })?;

    let mut copied = 0;
    for (relative, kind) in entries {
        let target = destination.join(&relative);
        match kind {
            EntryKind::Dir => make_dir(&target)?,
            EntryKind::File => {
                copy_file(&source.join(&relative), &target)?;
                copied += 1;
            }
        }
    }

    Ok(copied)
}

fn make_dir(path: &Path) -> Result<()> {
    // INVARIANT: Never create a directory through a file sitting where a
    // directory goes.
    if fs::symlink_metadata(path).is_ok_and(|metadata| !metadata.is_dir()) {
        fs::remove_file(path).map_err(|source| WorkingCopyError::FileSystem {
            action: "remove",
            path: path.to_path_buf(),
            source,
        })?;
    }

    mkdirp::mkdirp(path).map_err(|source| WorkingCopyError::FileSystem {
        action: "create directory",
        path: path.to_path_buf(),
        source,
    })?;

    Ok(())
}

fn copy_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        make_dir(parent)?;
    }

    // INVARIANT: Never write through a directory sitting where a file goes.
    if to.is_dir() {
        fs::remove_dir_all(to).map_err(|source| WorkingCopyError::FileSystem {
            action: "remove",
            path: to.to_path_buf(),
            source,
        })?;
    }

    fs::copy(from, to).map_err(|source| WorkingCopyError::FileSystem {
        action: "copy",
        path: from.to_path_buf(),
        source,
    })?;

    Ok(())
}

/// Working copy error types.
#[derive(Debug, thiserror::Error)]
pub enum WorkingCopyError {
    /// Git network, authentication, or local operation failed.
    #[error("git {operation} failed: {stderr}")]
    Access {
        operation: &'static str,
        stderr: String,
    },

    /// Configured tracked branch does not exist.
    #[error("git {operation} failed, branch {branch:?} not found: {stderr}")]
    BranchNotFound {
        operation: &'static str,
        branch: String,
        stderr: String,
    },

    /// Branch to create already exists locally.
    #[error("branch {0:?} already exists in working copy")]
    BranchExists(String),

    /// Nothing differs from HEAD, thus nothing to commit.
    #[error("no changes to commit")]
    NoChanges,

    /// Path does not exist inside working copy.
    #[error("{:?} does not exist in working copy", path.display())]
    NotFound { path: PathBuf },

    /// Local file system operation failed.
    #[error("failed to {action} {:?}", path.display())]
    FileSystem {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Directory tree could not be walked.
    #[error("failed to walk {:?}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: ignore::Error,
    },

    /// External Git process could not run to completion.
    #[error(transparent)]
    Syscall(#[from] SyscallError),

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),
}

impl WorkingCopyError {
    /// Error stems from local file system rather than Git.
    pub fn is_file_system(&self) -> bool {
        matches!(
            self,
            Self::FileSystem { .. } | Self::Walk { .. } | Self::NotFound { .. }
        )
    }
}

/// Friendly result alias :3
pub type Result<T, E = WorkingCopyError> = std::result::Result<T, E>;
