// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine well-known locations that anvil reads from or writes to. None of
//! these functions check whether the returned path actually exists.

use std::path::PathBuf;

/// Name of the directory anvil claims under the XDG base directories.
pub const APP_DIR: &str = "anvil";

/// File name of the settings file inside [`default_config_dir`].
pub const SETTINGS_FILE: &str = "settings.toml";

/// Determine default absolute path to anvil's configuration directory.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/anvil`.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join(APP_DIR))
        .ok_or(NoWayHome)
}

/// Determine default absolute path to the settings file.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_settings_path() -> Result<PathBuf> {
    default_config_dir().map(|path| path.join(SETTINGS_FILE))
}

/// Determine default absolute path to the local working copy of the
/// configuration repository.
///
/// Uses `$XDG_DATA_HOME/anvil/dotfiles`.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_clone_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|path| path.join(APP_DIR).join("dotfiles"))
        .ok_or(NoWayHome)
}

/// Determine default absolute path to the review area that pulled
/// configuration directories are copied into.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_review_dir() -> Result<PathBuf> {
    default_config_dir().map(|path| path.join("temp"))
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::config_dir`](https://docs.rs/dirs/latest/dirs/fn.config_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
