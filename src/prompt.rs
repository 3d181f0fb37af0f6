// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Terminal presentation of synchronization.
//!
//! A spinner tracks progress of the current operation. Whenever the operator
//! must answer a question the spinner is suspended so the prompt does not get
//! drawn over.

use crate::sync::{ConfirmRequest, Interaction, Progress};

use indicatif::{ProgressBar, ProgressStyle};
use inquire::Confirm;
use std::{fmt::Write, time::Duration};
use tracing::{info, instrument, warn};

/// Spinner and confirmation prompt on the current terminal.
#[derive(Debug, Clone)]
pub struct TerminalInteraction {
    pub(crate) bar: ProgressBar,
}

impl TerminalInteraction {
    /// Construct new terminal interaction with a ticking spinner.
    ///
    /// # Errors
    ///
    /// - Return [`PromptError::Template`] if spinner style cannot be set.
    pub fn new() -> Result<Self> {
        let style = ProgressStyle::with_template("{spinner:.green} {elapsed_precise:.green}  {msg}")?
            .tick_chars("-\\|/ ");
        let bar = ProgressBar::new_spinner();
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(100));

        Ok(Self { bar })
    }

    /// Stop spinner, and remove it from the terminal.
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Interaction for TerminalInteraction {
    #[instrument(skip(self, request), level = "debug")]
    fn confirm(&mut self, request: &ConfirmRequest<'_>) -> bool {
        let summary = render_summary(request);
        let question = format!("push {} to remote repository?", request.target.name);
        self.bar.suspend(|| -> bool {
            info!("{summary}");
            Confirm::new(&question)
                .with_default(false)
                .prompt()
                .unwrap_or(false)
        })
    }

    fn progress(&mut self, event: Progress) {
        let message = match event {
            Progress::VerifyingPrivacy => "verifying repository is private".to_string(),
            Progress::PreparingRepository => "preparing working copy".to_string(),
            Progress::DetectingChanges => "detecting changes".to_string(),
            Progress::Branching(branch) => format!("creating branch {branch}"),
            Progress::Committing => "committing".to_string(),
            Progress::Pushing => "pushing".to_string(),
            Progress::Exporting(name) => format!("copying {name} to review directory"),
            Progress::CleanedUp => "working copy restored".to_string(),
            Progress::CleanupFailed(error) => {
                self.bar
                    .suspend(|| warn!("failed to restore working copy: {error}"));
                return;
            }
        };
        self.bar.set_message(message);
    }
}

/// Render change summary shown to the operator before confirming.
pub fn render_summary(request: &ConfirmRequest<'_>) -> String {
    let report = request.report;
    let mut summary = if report.is_new_target {
        format!(
            "new app {}: {} file(s), {} line(s)",
            request.target.name, report.changed_file_count, report.insertion_count
        )
    } else {
        format!(
            "{}: {} file(s) changed, {} insertion(s)(+), {} deletion(s)(-)",
            request.target.name,
            report.changed_file_count,
            report.insertion_count,
            report.deletion_count
        )
    };

    if let Some(preview) = request.preview {
        let _ = write!(summary, "\n\n{}", preview.stat.trim_end());
        if let Some(patch) = &preview.patch {
            let _ = write!(summary, "\n\n{}", patch.trim_end());
        }
    }

    summary
}

/// Terminal presentation error types.
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    /// Style template cannot be set for spinner.
    #[error(transparent)]
    Template(#[from] indicatif::style::TemplateError),
}

/// Friendly result alias :3
type Result<T, E = PromptError> = std::result::Result<T, E>;
