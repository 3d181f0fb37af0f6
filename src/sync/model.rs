// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Data model shared by the synchronization components.

use chrono::{Local, NaiveDateTime};
use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};

/// Reserved target name for anvil's own settings file.
pub const SETTINGS_TARGET: &str = "anvil";

/// Repository-relative location of anvil's own settings file.
pub const SETTINGS_REPO_PATH: &str = "/anvil/settings.toml";

/// Branch name prefix used for every push attempt.
pub const PUSH_BRANCH_PREFIX: &str = "config-push";

/// One remote configuration repository, and the operator's access to it.
///
/// # Invariant
///
/// - Exactly one working copy exists per handle at `local_clone_path`. It is
///   reused across operations, and only cloned when absent.
#[derive(Clone, PartialEq, Eq)]
pub struct RepositoryHandle {
    /// Either "owner/name" shorthand or a full URL.
    pub remote: String,

    /// Branch treated as the canonical upstream.
    pub tracked_branch: String,

    /// Absolute path to the single persistent working copy.
    pub local_clone_path: PathBuf,

    /// Access token, tried before SSH key material when present.
    pub auth_token: Option<String>,

    /// Private key for SSH remotes.
    pub ssh_key_path: Option<PathBuf>,

    /// Commit author name.
    pub committer_name: String,

    /// Commit author email.
    pub committer_email: String,
}

impl RepositoryHandle {
    /// Split "owner/name" shorthand into its parts.
    ///
    /// Returns `None` for full URLs, scp-style remotes, and local paths.
    pub fn shorthand(&self) -> Option<(&str, &str)> {
        let remote = self.remote.as_str();
        if remote.contains("://") || remote.contains(':') || remote.starts_with(['/', '.', '~']) {
            return None;
        }

        match remote.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
                Some((owner, name.trim_end_matches(".git")))
            }
            _ => None,
        }
    }

    /// URL that Git clones, pulls, and pushes through.
    ///
    /// Shorthand resolves to HTTPS when a token is available, because tokens
    /// only authenticate over HTTPS. Otherwise shorthand resolves to SSH.
    /// Anything that is not shorthand is used verbatim.
    pub fn clone_url(&self) -> String {
        match self.shorthand() {
            Some((owner, name)) if self.auth_token.is_some() => {
                format!("https://github.com/{owner}/{name}.git")
            }
            Some((owner, name)) => format!("git@github.com:{owner}/{name}.git"),
            None => self.remote.clone(),
        }
    }

    /// Public web URL of the repository, if it has one.
    ///
    /// Local paths and `file://` remotes have no web presence, thus return
    /// `None`.
    pub fn web_url(&self) -> Option<String> {
        if let Some((owner, name)) = self.shorthand() {
            return Some(format!("https://github.com/{owner}/{name}"));
        }

        let remote = self.remote.trim_end_matches('/');
        if let Some(rest) = remote
            .strip_prefix("https://")
            .or_else(|| remote.strip_prefix("http://"))
        {
            // INVARIANT: Drop any userinfo so the probe stays anonymous.
            let rest = rest.rsplit_once('@').map_or(rest, |(_, host)| host);
            return Some(format!("https://{}", rest.trim_end_matches(".git")));
        }

        if let Some(rest) = remote.strip_prefix("ssh://") {
            let rest = rest.rsplit_once('@').map_or(rest, |(_, host)| host);
            let (host, path) = rest.split_once('/')?;
            let host = host.split(':').next().unwrap_or(host);
            return Some(format!("https://{host}/{}", path.trim_end_matches(".git")));
        }

        // scp-style, e.g., git@github.com:owner/name.git
        if !remote.contains("://") && !remote.starts_with(['/', '.', '~']) {
            if let Some((userhost, path)) = remote.split_once(':') {
                let host = userhost.rsplit_once('@').map_or(userhost, |(_, host)| host);
                if !host.is_empty() && !path.is_empty() {
                    return Some(format!(
                        "https://{host}/{}",
                        path.trim_start_matches('/').trim_end_matches(".git")
                    ));
                }
            }
        }

        None
    }

    /// Human readable location of the repository for display.
    pub fn display_url(&self) -> String {
        self.web_url().unwrap_or_else(|| self.remote.clone())
    }
}

impl Debug for RepositoryHandle {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.debug_struct("RepositoryHandle")
            .field("remote", &self.remote)
            .field("tracked_branch", &self.tracked_branch)
            .field("local_clone_path", &self.local_clone_path)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("ssh_key_path", &self.ssh_key_path)
            .field("committer_name", &self.committer_name)
            .field("committer_email", &self.committer_email)
            .finish()
    }
}

/// Subject of one push or pull operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    /// Logical subtree of the repository.
    pub name: String,

    /// Local file or directory being mirrored.
    pub local_source: PathBuf,

    /// Location inside the working copy, using '/' separators, never with a
    /// leading separator.
    pub repo_relative: String,
}

impl SyncTarget {
    /// Construct target for an application's configuration.
    ///
    /// A directory source maps onto `{name}`, while a single file source maps
    /// onto `{name}/{file_name}`.
    pub fn app(name: impl Into<String>, local_source: impl Into<PathBuf>) -> Self {
        let name = name.into();
        let local_source = local_source.into();
        let repo_relative = match local_source.file_name() {
            Some(file_name) if local_source.is_file() => {
                format!("{name}/{}", file_name.to_string_lossy())
            }
            _ => name.clone(),
        };

        Self::new(name, local_source, repo_relative)
    }

    /// Construct target for anvil's own settings file.
    pub fn settings(settings_path: impl Into<PathBuf>) -> Self {
        Self::new(SETTINGS_TARGET, settings_path, SETTINGS_REPO_PATH)
    }

    /// Construct target with explicit repository-relative path.
    ///
    /// Leading path separators are stripped from `repo_relative`.
    pub fn new(
        name: impl Into<String>,
        local_source: impl Into<PathBuf>,
        repo_relative: impl AsRef<str>,
    ) -> Self {
        Self {
            name: name.into(),
            local_source: local_source.into(),
            repo_relative: repo_relative
                .as_ref()
                .replace('\\', "/")
                .trim_start_matches('/')
                .trim_end_matches('/')
                .to_string(),
        }
    }

    /// Absolute location of target inside working copy rooted at `root`.
    pub fn repo_path(&self, root: &Path) -> PathBuf {
        root.join(&self.repo_relative)
    }
}

/// Result of comparing a target's local source with its working copy path.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChangeReport {
    /// Local source differs from working copy.
    pub has_changes: bool,

    /// Target does not exist in working copy yet.
    pub is_new_target: bool,

    /// Files that would be added or overwritten by staging.
    pub changed_file_count: usize,

    /// Lines added across changed files.
    pub insertion_count: usize,

    /// Lines removed across changed files.
    pub deletion_count: usize,
}

/// Outcome of a successful push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRecord {
    /// Freshly created branch the commit was pushed to.
    pub branch_name: String,

    /// Message of the pushed commit.
    pub commit_message: String,

    /// Where the repository can be found.
    pub repository_url: String,

    /// Repository-relative files under the target after the commit.
    pub files_committed: Vec<String>,
}

/// Outcome of a successful pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRecord {
    /// Directory that was pulled.
    pub target_name: String,

    /// Review directory the files were copied into.
    pub destination: PathBuf,

    /// Copied files relative to `destination`.
    pub files: Vec<String>,
}

/// Build branch name of form `{prefix}-{DDMMYYYY}-{HHMM}` for local time now.
pub fn timestamped_name(prefix: impl AsRef<str>) -> String {
    timestamped_name_at(prefix, Local::now().naive_local())
}

/// Build branch name of form `{prefix}-{DDMMYYYY}-{HHMM}` for a fixed time.
pub fn timestamped_name_at(prefix: impl AsRef<str>, at: NaiveDateTime) -> String {
    format!("{}-{}", prefix.as_ref(), at.format("%d%m%Y-%H%M"))
}

/// Commit message for a pushed target.
pub fn commit_message(target_name: impl AsRef<str>) -> String {
    format!("anvil[push]: {}", target_name.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    fn handle(remote: &str, token: Option<&str>) -> RepositoryHandle {
        RepositoryHandle {
            remote: remote.into(),
            tracked_branch: "main".into(),
            local_clone_path: "/tmp/dotfiles".into(),
            auth_token: token.map(Into::into),
            ssh_key_path: None,
            committer_name: "John Doe".into(),
            committer_email: "john@doe.com".into(),
        }
    }

    #[test]
    fn branch_name_is_zero_padded() {
        let at = NaiveDate::from_ymd_opt(2025, 3, 5)
            .and_then(|date| date.and_hms_opt(14, 30, 0))
            .unwrap();
        assert_eq!(
            timestamped_name_at(PUSH_BRANCH_PREFIX, at),
            "config-push-05032025-1430"
        );

        let at = NaiveDate::from_ymd_opt(2024, 12, 31)
            .and_then(|date| date.and_hms_opt(9, 7, 59))
            .unwrap();
        assert_eq!(timestamped_name_at("x", at), "x-31122024-0907");
    }

    #[test]
    fn commit_message_format() {
        assert_eq!(commit_message("app-x"), "anvil[push]: app-x");
    }

    #[test_case("owner/dotfiles", None, "git@github.com:owner/dotfiles.git"; "shorthand over ssh")]
    #[test_case("owner/dotfiles", Some("t0k3n"), "https://github.com/owner/dotfiles.git"; "shorthand over https")]
    #[test_case("https://gitlab.com/owner/dotfiles.git", None, "https://gitlab.com/owner/dotfiles.git"; "full url verbatim")]
    #[test_case("/srv/git/dotfiles.git", Some("t0k3n"), "/srv/git/dotfiles.git"; "local path verbatim")]
    #[test]
    fn clone_url_resolution(remote: &str, token: Option<&str>, expect: &str) {
        pretty_assertions::assert_eq!(handle(remote, token).clone_url(), expect);
    }

    #[test_case("owner/dotfiles", Some("https://github.com/owner/dotfiles"); "shorthand")]
    #[test_case("https://github.com/owner/dotfiles.git", Some("https://github.com/owner/dotfiles"); "https")]
    #[test_case("https://me:pw@github.com/owner/dotfiles", Some("https://github.com/owner/dotfiles"); "https with userinfo")]
    #[test_case("git@github.com:owner/dotfiles.git", Some("https://github.com/owner/dotfiles"); "scp style")]
    #[test_case("ssh://git@github.com:22/owner/dotfiles.git", Some("https://github.com/owner/dotfiles"); "ssh url")]
    #[test_case("/srv/git/dotfiles.git", None; "local path")]
    #[test_case("file:///srv/git/dotfiles.git", None; "file url")]
    #[test]
    fn web_url_resolution(remote: &str, expect: Option<&str>) {
        pretty_assertions::assert_eq!(handle(remote, None).web_url().as_deref(), expect);
    }

    #[test]
    fn debug_redacts_token() {
        let output = format!("{:?}", handle("owner/dotfiles", Some("s3cr3t")));
        assert!(!output.contains("s3cr3t"));
        assert!(output.contains("<redacted>"));
    }

    #[test]
    fn settings_target_strips_leading_separator() {
        let target = SyncTarget::settings("/home/blah/.config/anvil/settings.toml");
        assert_eq!(target.name, SETTINGS_TARGET);
        assert_eq!(target.repo_relative, "anvil/settings.toml");
    }

    #[test]
    fn app_target_maps_missing_or_directory_source_to_name() {
        let target = SyncTarget::app("app-x", "/definitely/not/here");
        assert_eq!(target.repo_relative, "app-x");
    }
}
