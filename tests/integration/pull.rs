// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{FakeProbe, ScriptedOperator, Sandbox};

use anvil::sync::{ErrorKind, SyncError};

use anyhow::Result;
use pretty_assertions::assert_eq;
use std::fs;

#[tokio::test]
async fn pull_copies_directory_into_review_area() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.remote.stage_and_commit("nvim/init.lua", "A")?;
    sandbox.remote.stage_and_commit("nvim/lua/plugins.lua", "B")?;

    let review_dir = sandbox.review_dir();
    let stale = review_dir.join("nvim/stale.lua");
    fs::create_dir_all(review_dir.join("nvim"))?;
    fs::write(&stale, "gone after pull")?;

    let record = sandbox
        .synchronizer("main", FakeProbe::default())
        .pull_target("nvim", &review_dir, &mut ScriptedOperator::default())
        .await?;

    assert_eq!(record.target_name, "nvim");
    assert_eq!(record.destination, review_dir.join("nvim"));
    assert_eq!(
        record.files,
        vec!["init.lua".to_string(), "lua/plugins.lua".to_string()]
    );
    assert_eq!(fs::read_to_string(review_dir.join("nvim/init.lua"))?, "A");
    assert!(!stale.exists());

    Ok(())
}

#[tokio::test]
async fn pull_never_consults_privacy_gate() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.remote.stage_and_commit("nvim/init.lua", "A")?;

    let probe = FakeProbe::unauthenticated();
    let record = sandbox
        .synchronizer("main", probe.clone())
        .pull_target("nvim", &sandbox.review_dir(), &mut ScriptedOperator::default())
        .await?;

    assert_eq!(record.files, vec!["init.lua".to_string()]);
    assert_eq!(probe.anonymous_calls(), 0);

    Ok(())
}

#[tokio::test]
async fn pull_missing_directory_is_error() -> Result<()> {
    let sandbox = Sandbox::new()?;

    let result = sandbox
        .synchronizer("main", FakeProbe::default())
        .pull_target("zsh", &sandbox.review_dir(), &mut ScriptedOperator::default())
        .await;

    let error = result.err().ok_or(anyhow::anyhow!("pull did not fail"))?;
    assert!(matches!(error, SyncError::TargetMissing { .. }));
    assert_eq!(error.kind(), ErrorKind::FileSystem);

    Ok(())
}
