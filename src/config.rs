// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of anvil's settings file to simplify the process of
//! serialization and deserialization. File I/O is left to the caller to
//! figure out. The synchronization core never reads this file itself. It is
//! handed a fully resolved [`RepositoryHandle`] built from it instead.

use crate::{
    path::{default_clone_dir, NoWayHome},
    syscall::DEFAULT_TIMEOUT,
    sync::model::RepositoryHandle,
};

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

/// Settings file layout.
///
/// # General Layout
///
/// The settings file is composed of three sections. The repository section
/// names the private remote repository that configuration is synchronized
/// with. The git section provides the identity used to author commits. The
/// configs section maps application names to the local paths of their
/// configuration files.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Remote configuration repository.
    pub repository: RepositorySettings,

    /// Commit identity and SSH key material.
    #[serde(default)]
    pub git: GitSettings,

    /// Application name to local configuration path.
    #[serde(default)]
    pub configs: BTreeMap<String, PathBuf>,
}

impl Settings {
    /// Resolve the repository handle the synchronization core operates on.
    ///
    /// Reads the access token from the environment variable named by
    /// `repository.token_env_var`, if any. An unset or empty variable simply
    /// means SSH authentication will be used instead.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::MissingRemote`] if no remote is configured.
    /// - Return [`ConfigError::MissingBranch`] if no branch is configured.
    /// - Return [`ConfigError::NoWayHome`] if the default clone directory
    ///   cannot be determined.
    pub fn repository_handle(&self) -> Result<RepositoryHandle> {
        let repository = &self.repository;
        if repository.remote.trim().is_empty() {
            return Err(ConfigError::MissingRemote);
        }

        if repository.branch.trim().is_empty() {
            return Err(ConfigError::MissingBranch);
        }

        let local_clone_path = match &repository.local_path {
            Some(path) => path.clone(),
            None => default_clone_dir()?,
        };

        let auth_token = repository
            .token_env_var
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|token| !token.is_empty());

        Ok(RepositoryHandle {
            remote: repository.remote.trim().to_string(),
            tracked_branch: repository.branch.trim().to_string(),
            local_clone_path,
            auth_token,
            ssh_key_path: self.git.ssh_key_path.clone(),
            committer_name: self.git.username.clone(),
            committer_email: self.git.email.clone(),
        })
    }

    /// Timeout to apply to every git and network command.
    pub fn command_timeout(&self) -> Duration {
        self.repository
            .timeout
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    /// Local configuration path of target application, if configured.
    pub fn config_path(&self, app: impl AsRef<str>) -> Option<&PathBuf> {
        self.configs.get(app.as_ref())
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: Settings = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path field.
        if let Some(path) = settings.repository.local_path.take() {
            settings.repository.local_path = Some(expand(path)?);
        }
        if let Some(path) = settings.git.ssh_key_path.take() {
            settings.git.ssh_key_path = Some(expand(path)?);
        }
        for path in settings.configs.values_mut() {
            *path = expand(std::mem::take(path))?;
        }

        Ok(settings)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Remote repository settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct RepositorySettings {
    /// Repository as "owner/name" shorthand or full URL.
    pub remote: String,

    /// Branch treated as canonical upstream.
    pub branch: String,

    /// Location of the local working copy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,

    /// Environment variable holding an access token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_env_var: Option<String>,

    /// Seconds each git or network command may run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Commit identity settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct GitSettings {
    /// Committer name.
    #[serde(default)]
    pub username: String,

    /// Committer email.
    #[serde(default)]
    pub email: String,

    /// Private key used for SSH remotes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_key_path: Option<PathBuf>,
}

fn expand(path: PathBuf) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// No remote repository configured.
    #[error(
        "repository.remote is not configured, set it to your private repository, \
         e.g., \"username/dotfiles\""
    )]
    MissingRemote,

    /// No tracked branch configured.
    #[error(
        "repository.branch is not configured, set it to your repository's default branch, \
         e.g., \"main\""
    )]
    MissingBranch,

    /// Default locations cannot be determined.
    #[error(transparent)]
    NoWayHome(#[from] NoWayHome),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
