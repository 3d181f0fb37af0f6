// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Privacy gate.
//!
//! Before anything leaves the machine the remote repository must be proven
//! private. The gate fails closed: if the authenticated listing cannot reach
//! the repository, no conclusion about its visibility is possible, so the
//! push is blocked without ever probing the public web URL.

use crate::sync::{model::RepositoryHandle, working_copy::git_syscall};

use std::time::Duration;
use tracing::{debug, instrument};

/// Ways of looking at a remote repository from the outside.
#[async_trait::async_trait]
pub trait VisibilityProbe: Send + Sync {
    /// List `HEAD` of the remote with the handle's configured credentials.
    ///
    /// # Errors
    ///
    /// Return diagnostic text if the listing fails for any reason.
    async fn authenticated_listing(&self, handle: &RepositoryHandle) -> Result<(), String>;

    /// Check whether the web URL answers without any credentials.
    async fn reachable_anonymously(&self, web_url: &str) -> bool;
}

/// Probe remotes with `git ls-remote` and an anonymous HTTP `HEAD` request.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProbe {
    /// Construct new probe bounded by timeout.
    ///
    /// # Errors
    ///
    /// - Return [`reqwest::Error`] if HTTP client cannot be initialized.
    pub fn new(timeout: Duration) -> std::result::Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("anvil/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self { client, timeout })
    }
}

#[async_trait::async_trait]
impl VisibilityProbe for HttpProbe {
    async fn authenticated_listing(&self, handle: &RepositoryHandle) -> Result<(), String> {
        let output = git_syscall(handle, self.timeout)
            .args(["ls-remote", handle.clone_url().as_str(), "HEAD"])
            .run()
            .await
            .map_err(|error| error.to_string())?;

        if !output.succeeded() {
            return Err(output.diagnostic().to_string());
        }

        Ok(())
    }

    async fn reachable_anonymously(&self, web_url: &str) -> bool {
        match self.client.head(web_url).send().await {
            Ok(resp) => {
                debug!("HEAD {web_url} returned {}", resp.status());
                resp.status().is_success()
            }
            Err(error) => {
                debug!("HEAD {web_url} failed: {error}");
                false
            }
        }
    }
}

/// Gate that blocks pushes to repositories that are not provably private.
#[derive(Debug, Clone)]
pub struct PrivacyGate<P = HttpProbe>
where
    P: VisibilityProbe,
{
    probe: P,
}

impl<P> PrivacyGate<P>
where
    P: VisibilityProbe,
{
    /// Construct new gate on top of visibility probe.
    pub fn new(probe: P) -> Self {
        Self { probe }
    }

    /// Verify that repository is reachable with credentials, and unreachable
    /// without them.
    ///
    /// Repositories without any web form, e.g., local paths, have no public
    /// surface to probe and pass once the authenticated listing succeeds.
    ///
    /// # Errors
    ///
    /// - Return [`PrivacyError::Unauthenticated`] if authenticated listing
    ///   fails.
    /// - Return [`PrivacyError::Public`] if repository answers anonymously.
    #[instrument(skip(self), level = "debug")]
    pub async fn verify_private(&self, handle: &RepositoryHandle) -> Result<()> {
        let url = handle.display_url();
        if let Err(diagnostic) = self.probe.authenticated_listing(handle).await {
            return Err(PrivacyError::Unauthenticated { url, diagnostic });
        }

        let Some(web_url) = handle.web_url() else {
            debug!("{url} has no public web surface");
            return Ok(());
        };

        if self.probe.reachable_anonymously(&web_url).await {
            return Err(PrivacyError::Public { url: web_url });
        }

        Ok(())
    }
}

/// Reasons a push is blocked by the privacy gate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrivacyError {
    /// Repository cannot be reached with configured credentials.
    #[error(
        "cannot verify {url} is private, authenticated access failed, fix your credentials \
         before pushing: {diagnostic}"
    )]
    Unauthenticated { url: String, diagnostic: String },

    /// Repository answers without credentials.
    #[error("{url} is publicly reachable, refusing to push configuration to a public repository")]
    Public { url: String },
}

/// Friendly result alias :3
type Result<T, E = PrivacyError> = std::result::Result<T, E>;
