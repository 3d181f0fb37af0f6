// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration synchronization.
//!
//! The [`Synchronizer`] sequences one push or pull of a [`SyncTarget`]
//! against the private configuration repository:
//!
//! 1. Privacy gate, hard stop on failure.
//! 2. Repository readiness: clone, checkout tracked branch, fast-forward,
//!    clean.
//! 3. Change detection, returning early when nothing changed.
//! 4. Preview of staged changes for the operator.
//! 5. Confirmation gate.
//! 6. Fresh timestamped branch.
//! 7. Mirror-merge of local source into the working copy.
//! 8. Stage and commit.
//! 9. Push.
//!
//! Once the working copy has been touched by step 4, every exit other than a
//! successful push returns it to a clean tracked branch.
//!
//! The synchronizer never renders anything itself. It talks to the operator
//! through the [`Interaction`] seam, which answers confirmation requests and
//! receives progress notifications.

pub mod detect;
pub mod model;
pub mod preview;
pub mod privacy;
pub mod working_copy;

use crate::sync::{
    detect::{detect, DetectError},
    model::{
        commit_message, timestamped_name, ChangeReport, PullRecord, PushRecord, RepositoryHandle,
        SyncTarget, PUSH_BRANCH_PREFIX,
    },
    preview::{summarize, DiffPreview},
    privacy::{HttpProbe, PrivacyError, PrivacyGate, VisibilityProbe},
    working_copy::{GitWorkingCopy, WorkingCopyError},
};

use std::{path::Path, time::Duration};
use tracing::{debug, instrument};

/// Presentation seam of the synchronizer.
pub trait Interaction {
    /// Ask operator whether the previewed change should be pushed.
    fn confirm(&mut self, request: &ConfirmRequest<'_>) -> bool;

    /// Receive notification about progress of the current operation.
    fn progress(&mut self, _event: Progress) {}
}

/// Everything the operator needs to decide on a push.
#[derive(Debug, Clone, Copy)]
pub struct ConfirmRequest<'a> {
    pub target: &'a SyncTarget,
    pub report: &'a ChangeReport,
    pub preview: Option<&'a DiffPreview>,
}

/// Progress notifications emitted while synchronizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    VerifyingPrivacy,
    PreparingRepository,
    DetectingChanges,
    Branching(String),
    Committing,
    Pushing,
    Exporting(String),
    CleanedUp,
    CleanupFailed(String),
}

/// Result of a push that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Commit landed on a fresh remote branch.
    Pushed(PushRecord),

    /// Repository already matches local source.
    NoChanges,

    /// Operator declined the confirmation.
    Cancelled,
}

/// Push and pull configuration targets.
#[derive(Debug)]
pub struct Synchronizer<P = HttpProbe>
where
    P: VisibilityProbe,
{
    working_copy: GitWorkingCopy,
    gate: PrivacyGate<P>,
}

impl Synchronizer<HttpProbe> {
    /// Construct new synchronizer that probes remotes over the network.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::HttpClient`] if HTTP client cannot be
    ///   initialized.
    pub fn new(handle: RepositoryHandle, timeout: Duration) -> Result<Self> {
        Ok(Self::with_probe(handle, timeout, HttpProbe::new(timeout)?))
    }
}

impl<P> Synchronizer<P>
where
    P: VisibilityProbe,
{
    /// Construct new synchronizer with custom visibility probe.
    pub fn with_probe(handle: RepositoryHandle, timeout: Duration, probe: P) -> Self {
        Self {
            working_copy: GitWorkingCopy::new(handle).with_timeout(timeout),
            gate: PrivacyGate::new(probe),
        }
    }

    /// Working copy this synchronizer manages.
    pub fn working_copy(&self) -> &GitWorkingCopy {
        &self.working_copy
    }

    /// Push target to fresh branch of the remote repository.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::SecurityBlocked`] if repository is not provably
    ///   private.
    /// - Return [`SyncError::BranchConfig`] if tracked branch does not exist.
    /// - Return [`SyncError::WorkingCopy`] if Git or local I/O fails.
    /// - Return [`SyncError::Detect`] if local source cannot be compared.
    /// - Return [`SyncError::WorkingCopy`] if cleanup after a cancelled or
    ///   empty push fails, since the working copy may be left dirty.
    #[instrument(skip(self, ui), level = "debug")]
    pub async fn push_target(
        &self,
        target: &SyncTarget,
        ui: &mut impl Interaction,
    ) -> Result<PushOutcome> {
        ui.progress(Progress::VerifyingPrivacy);
        self.gate.verify_private(self.working_copy.handle()).await?;

        ui.progress(Progress::PreparingRepository);
        self.prepare().await?;

        ui.progress(Progress::DetectingChanges);
        let report = detect(
            &target.local_source,
            &target.repo_path(self.working_copy.root()),
        )?;
        if !report.has_changes {
            debug!("{} is up to date", target.name);
            return Ok(PushOutcome::NoChanges);
        }

        // INVARIANT: Working copy is touched from here on, so every exit other
        // than a successful push must clean up.
        let preview = self.preview(target).await;
        let request = ConfirmRequest {
            target,
            report: &report,
            preview: preview.as_ref(),
        };
        if !ui.confirm(&request) {
            self.cleanup(ui).await?;
            return Ok(PushOutcome::Cancelled);
        }

        match self.commit_and_push(target, ui).await {
            Ok(Some(record)) => Ok(PushOutcome::Pushed(record)),
            Ok(None) => Ok(PushOutcome::NoChanges),
            Err(error) => {
                // INVARIANT: Original failure wins over a failed cleanup.
                let _ = self.cleanup(ui).await;
                Err(error)
            }
        }
    }

    /// Copy target directory of the repository into review directory.
    ///
    /// Nothing leaves the machine, so the privacy gate is not consulted. The
    /// operator's live configuration is never touched.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::BranchConfig`] if tracked branch does not exist.
    /// - Return [`SyncError::TargetMissing`] if repository has no such
    ///   directory.
    /// - Return [`SyncError::WorkingCopy`] if Git or local I/O fails.
    #[instrument(skip(self, review_dir, ui), level = "debug")]
    pub async fn pull_target(
        &self,
        name: &str,
        review_dir: &Path,
        ui: &mut impl Interaction,
    ) -> Result<PullRecord> {
        ui.progress(Progress::PreparingRepository);
        self.prepare().await?;

        let destination = review_dir.join(name);
        ui.progress(Progress::Exporting(name.to_string()));
        let files = match self.working_copy.export(name, &destination) {
            Ok(files) => files,
            Err(WorkingCopyError::NotFound { .. }) => {
                return Err(SyncError::TargetMissing {
                    name: name.to_string(),
                })
            }
            Err(error) => return Err(error.into()),
        };

        Ok(PullRecord {
            target_name: name.to_string(),
            destination,
            files,
        })
    }

    async fn prepare(&self) -> Result<()> {
        let working_copy = &self.working_copy;
        let result = async {
            working_copy.ensure_cloned().await?;
            working_copy.checkout_tracked().await?;
            working_copy.pull_latest().await?;
            working_copy.ensure_clean().await
        }
        .await;

        result.map_err(|error| match error {
            WorkingCopyError::BranchNotFound { branch, stderr, .. } => SyncError::BranchConfig {
                branch,
                local_clone_path: working_copy.root().display().to_string(),
                stderr,
            },
            error => SyncError::WorkingCopy(error),
        })
    }

    async fn preview(&self, target: &SyncTarget) -> Option<DiffPreview> {
        let working_copy = &self.working_copy;
        if let Err(error) = working_copy.mirror_into(&target.local_source, &target.repo_relative) {
            debug!("cannot stage preview: {error}");
            return None;
        }
        if let Err(error) = working_copy.stage_all().await {
            debug!("cannot stage preview: {error}");
            return None;
        }

        summarize(working_copy.root(), &target.repo_relative)
    }

    /// Returns `None` if nothing ended up staged, after the working copy is
    /// back on the tracked branch and the empty feature branch is gone.
    async fn commit_and_push(
        &self,
        target: &SyncTarget,
        ui: &mut impl Interaction,
    ) -> Result<Option<PushRecord>> {
        let working_copy = &self.working_copy;
        let branch_name = timestamped_name(PUSH_BRANCH_PREFIX);
        ui.progress(Progress::Branching(branch_name.clone()));
        working_copy.create_and_checkout_branch(&branch_name).await?;

        working_copy.mirror_into(&target.local_source, &target.repo_relative)?;
        working_copy.stage_all().await?;

        ui.progress(Progress::Committing);
        let message = commit_message(&target.name);
        match working_copy.commit(&message).await {
            Ok(()) => {}
            Err(WorkingCopyError::NoChanges) => {
                self.cleanup(ui).await?;
                working_copy.delete_branch(&branch_name).await?;
                return Ok(None);
            }
            Err(error) => return Err(error.into()),
        }

        ui.progress(Progress::Pushing);
        working_copy.push_current_branch(&branch_name).await?;

        let files_committed = working_copy
            .committed_files(&target.repo_relative)
            .ok()
            .filter(|files| !files.is_empty())
            .unwrap_or_else(|| vec![format!("{}/", target.name)]);

        Ok(Some(PushRecord {
            branch_name,
            commit_message: message,
            repository_url: working_copy.handle().display_url(),
            files_committed,
        }))
    }

    async fn cleanup(&self, ui: &mut impl Interaction) -> Result<()> {
        match self.working_copy.cleanup_staged_changes().await {
            Ok(()) => {
                ui.progress(Progress::CleanedUp);
                Ok(())
            }
            Err(error) => {
                ui.progress(Progress::CleanupFailed(error.to_string()));
                Err(error.into())
            }
        }
    }
}

/// Error category for rendering and exit handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RepositoryAccess,
    BranchConfig,
    SecurityBlocked,
    FileSystem,
}

/// Synchronization error types.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Push refused by privacy gate.
    #[error(transparent)]
    SecurityBlocked(#[from] PrivacyError),

    /// Tracked branch does not exist on the remote.
    #[error(
        "branch {branch:?} not found in remote repository, either set repository.branch in \
         your settings file to an existing branch, or delete {local_clone_path:?} so it gets \
         cloned again with the correct branch: {stderr}"
    )]
    BranchConfig {
        branch: String,
        local_clone_path: String,
        stderr: String,
    },

    /// Working copy operation failed.
    #[error(transparent)]
    WorkingCopy(#[from] WorkingCopyError),

    /// Local source could not be compared with the working copy.
    #[error(transparent)]
    Detect(#[from] DetectError),

    /// Pulled directory does not exist in the repository.
    #[error("{name:?} does not exist in configuration repository")]
    TargetMissing { name: String },

    /// HTTP client for the privacy probe could not be built.
    #[error("failed to initialize HTTP client")]
    HttpClient(#[from] reqwest::Error),
}

impl SyncError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SecurityBlocked(_) => ErrorKind::SecurityBlocked,
            Self::BranchConfig { .. } => ErrorKind::BranchConfig,
            Self::WorkingCopy(error) if error.is_file_system() => ErrorKind::FileSystem,
            Self::WorkingCopy(_) | Self::HttpClient(_) => ErrorKind::RepositoryAccess,
            Self::Detect(_) | Self::TargetMissing { .. } => ErrorKind::FileSystem,
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = SyncError> = std::result::Result<T, E>;
