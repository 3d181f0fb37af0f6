// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Keep personal configuration in a private Git repository.
//!
//! Anvil synchronizes local configuration files and directories with a
//! private remote repository through a single persistent __working copy__.
//! Every push lands on a fresh timestamped branch so that the remote history
//! doubles as an audit trail of when a push was attempted, and no push ever
//! leaves the machine before the repository has been proven private.
//!
//! # Layout
//!
//! - [`syscall`] runs external commands with bounded timeouts.
//! - [`sync`] holds the synchronization core: working copy management, the
//!   privacy gate, change detection, diff previews, and the orchestrator
//!   tying them together.
//! - [`config`] describes the settings file, and resolves it into the
//!   repository handle the core works with.
//! - [`prompt`] renders progress and confirmation on a terminal.

pub mod config;
pub mod path;
pub mod prompt;
pub mod sync;
pub mod syscall;
