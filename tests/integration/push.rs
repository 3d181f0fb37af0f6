// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{assert_clean_on, FakeProbe, ScriptedOperator, Sandbox};

use anvil::sync::{
    model::{SyncTarget, PUSH_BRANCH_PREFIX},
    privacy::PrivacyError,
    ConfirmRequest, ErrorKind, Interaction, Progress, PushOutcome, SyncError,
};

use anyhow::Result;
use git2::BranchType;
use pretty_assertions::assert_eq;
use std::fs;

#[tokio::test]
async fn push_new_app_directory() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.local_file("app-x/init.lua", "A")?;
    let target = SyncTarget::app("app-x", sandbox.local_dir("app-x"));

    let mut operator = ScriptedOperator::accepting();
    let outcome = sandbox
        .synchronizer("main", FakeProbe::default())
        .push_target(&target, &mut operator)
        .await?;

    let record = match outcome {
        PushOutcome::Pushed(record) => record,
        other => anyhow::bail!("expected push, got {other:?}"),
    };
    assert_eq!(record.files_committed, vec!["app-x/init.lua".to_string()]);
    assert_eq!(record.commit_message, "anvil[push]: app-x");
    assert!(record
        .branch_name
        .starts_with(&format!("{PUSH_BRANCH_PREFIX}-")));
    assert!(operator.saw_new_target);
    assert_eq!(operator.confirmations, 1);

    assert!(sandbox.remote.has_branch(&record.branch_name));
    assert_eq!(
        sandbox.remote.file_at(&record.branch_name, "app-x/init.lua")?,
        "A"
    );

    Ok(())
}

#[tokio::test]
async fn push_unchanged_app_is_no_op() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.remote.stage_and_commit("app-x/init.lua", "A")?;
    sandbox.local_file("app-x/init.lua", "A")?;
    let target = SyncTarget::app("app-x", sandbox.local_dir("app-x"));
    let tip = sandbox.remote.branch_tip("main")?;

    let mut operator = ScriptedOperator::accepting();
    let outcome = sandbox
        .synchronizer("main", FakeProbe::default())
        .push_target(&target, &mut operator)
        .await?;

    assert_eq!(outcome, PushOutcome::NoChanges);
    assert_eq!(operator.confirmations, 0);

    let working_copy = sandbox.working_copy()?;
    assert_clean_on(&working_copy, "main")?;
    assert_eq!(working_copy.head()?.peel_to_commit()?.id(), tip);
    assert_eq!(working_copy.branches(Some(BranchType::Local))?.count(), 1);
    assert_eq!(sandbox.remote.branch_tip("main")?, tip);

    Ok(())
}

#[tokio::test]
async fn push_to_public_repository_is_blocked_before_clone() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.local_file("app-x/init.lua", "A")?;
    let target = SyncTarget::app("app-x", sandbox.local_dir("app-x"));
    let mut handle = sandbox.handle("main");
    handle.remote = "owner/dotfiles".into();

    let probe = FakeProbe::public();
    let synchronizer =
        anvil::sync::Synchronizer::with_probe(handle, std::time::Duration::from_secs(5), probe);
    let mut operator = ScriptedOperator::accepting();
    let result = synchronizer.push_target(&target, &mut operator).await;

    assert!(matches!(
        result,
        Err(SyncError::SecurityBlocked(PrivacyError::Public { .. }))
    ));
    assert_eq!(operator.confirmations, 0);
    assert!(!sandbox.clone_path().exists());

    Ok(())
}

#[tokio::test]
async fn failed_authentication_blocks_without_anonymous_probe() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.local_file("app-x/init.lua", "A")?;
    let target = SyncTarget::app("app-x", sandbox.local_dir("app-x"));
    let mut handle = sandbox.handle("main");
    handle.remote = "owner/dotfiles".into();

    let probe = FakeProbe::unauthenticated();
    let synchronizer = anvil::sync::Synchronizer::with_probe(
        handle,
        std::time::Duration::from_secs(5),
        probe.clone(),
    );
    let result = synchronizer
        .push_target(&target, &mut ScriptedOperator::accepting())
        .await;

    let error = result.err().ok_or(anyhow::anyhow!("push was not blocked"))?;
    assert_eq!(error.kind(), ErrorKind::SecurityBlocked);
    assert!(matches!(
        error,
        SyncError::SecurityBlocked(PrivacyError::Unauthenticated { .. })
    ));
    assert_eq!(probe.anonymous_calls(), 0);
    assert!(!sandbox.clone_path().exists());

    Ok(())
}

#[tokio::test]
async fn declined_push_restores_tracked_branch() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.local_file("app-x/init.lua", "A")?;
    sandbox.local_file("app-x/lua/plugins.lua", "B")?;
    let target = SyncTarget::app("app-x", sandbox.local_dir("app-x"));
    let tip = sandbox.remote.branch_tip("main")?;

    let mut operator = ScriptedOperator::declining();
    let outcome = sandbox
        .synchronizer("main", FakeProbe::default())
        .push_target(&target, &mut operator)
        .await?;

    assert_eq!(outcome, PushOutcome::Cancelled);
    assert_eq!(operator.confirmations, 1);
    assert!(operator.events.contains(&Progress::CleanedUp));

    let working_copy = sandbox.working_copy()?;
    assert_clean_on(&working_copy, "main")?;
    assert_eq!(working_copy.branches(Some(BranchType::Local))?.count(), 1);
    assert!(!sandbox.clone_path().join("app-x").exists());
    assert_eq!(sandbox.remote.branch_tip("main")?, tip);

    Ok(())
}

#[tokio::test]
async fn push_keeps_repository_only_files() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.remote.stage_and_commit("nvim/init.lua", "old")?;
    sandbox.remote.stage_and_commit("nvim/orphan.lua", "keep me")?;
    sandbox.local_file("nvim/init.lua", "new")?;
    let target = SyncTarget::app("nvim", sandbox.local_dir("nvim"));

    let outcome = sandbox
        .synchronizer("main", FakeProbe::default())
        .push_target(&target, &mut ScriptedOperator::accepting())
        .await?;

    let record = match outcome {
        PushOutcome::Pushed(record) => record,
        other => anyhow::bail!("expected push, got {other:?}"),
    };
    assert_eq!(
        record.files_committed,
        vec!["nvim/init.lua".to_string(), "nvim/orphan.lua".to_string()]
    );
    assert_eq!(
        fs::read_to_string(sandbox.clone_path().join("nvim/orphan.lua"))?,
        "keep me"
    );
    assert_eq!(
        sandbox.remote.file_at(&record.branch_name, "nvim/init.lua")?,
        "new"
    );

    Ok(())
}

#[tokio::test]
async fn push_single_file_target() -> Result<()> {
    let sandbox = Sandbox::new()?;
    let zshrc = sandbox.local_file(".zshrc", "export EDITOR=nvim\n")?;
    let target = SyncTarget::app("zsh", &zshrc);

    let outcome = sandbox
        .synchronizer("main", FakeProbe::default())
        .push_target(&target, &mut ScriptedOperator::accepting())
        .await?;

    let record = match outcome {
        PushOutcome::Pushed(record) => record,
        other => anyhow::bail!("expected push, got {other:?}"),
    };
    assert_eq!(record.files_committed, vec!["zsh/.zshrc".to_string()]);

    Ok(())
}

#[tokio::test]
async fn push_settings_file_to_reserved_path() -> Result<()> {
    let sandbox = Sandbox::new()?;
    let settings = sandbox.local_file("anvil/settings.toml", "[repository]\n")?;
    let target = SyncTarget::settings(&settings);

    let outcome = sandbox
        .synchronizer("main", FakeProbe::default())
        .push_target(&target, &mut ScriptedOperator::accepting())
        .await?;

    let record = match outcome {
        PushOutcome::Pushed(record) => record,
        other => anyhow::bail!("expected push, got {other:?}"),
    };
    assert_eq!(
        record.files_committed,
        vec!["anvil/settings.toml".to_string()]
    );
    assert_eq!(record.commit_message, "anvil[push]: anvil");

    Ok(())
}

#[tokio::test]
async fn missing_tracked_branch_reports_branch_config() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.local_file("app-x/init.lua", "A")?;
    let target = SyncTarget::app("app-x", sandbox.local_dir("app-x"));

    let result = sandbox
        .synchronizer("trunk", FakeProbe::default())
        .push_target(&target, &mut ScriptedOperator::accepting())
        .await;

    let error = result.err().ok_or(anyhow::anyhow!("push did not fail"))?;
    assert_eq!(error.kind(), ErrorKind::BranchConfig);
    assert!(error.to_string().contains("repository.branch"));

    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn rejected_push_restores_tracked_branch() -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let sandbox = Sandbox::new()?;
    let hook = sandbox.remote.path().join("hooks/pre-receive");
    fs::create_dir_all(sandbox.remote.path().join("hooks"))?;
    fs::write(&hook, "#!/bin/sh\necho rejected by policy >&2\nexit 1\n")?;
    fs::set_permissions(&hook, fs::Permissions::from_mode(0o755))?;

    sandbox.local_file("app-x/init.lua", "A")?;
    let target = SyncTarget::app("app-x", sandbox.local_dir("app-x"));

    let mut operator = ScriptedOperator::accepting();
    let result = sandbox
        .synchronizer("main", FakeProbe::default())
        .push_target(&target, &mut operator)
        .await;

    let error = result.err().ok_or(anyhow::anyhow!("push did not fail"))?;
    assert_eq!(error.kind(), ErrorKind::RepositoryAccess);
    assert!(operator.events.contains(&Progress::CleanedUp));
    assert_clean_on(&sandbox.working_copy()?, "main")?;
    assert!(!sandbox.clone_path().join("app-x").exists());

    Ok(())
}

#[tokio::test]
async fn repository_only_drift_resolves_to_no_changes() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.remote.stage_and_commit("nvim/init.lua", "A")?;
    sandbox.remote.stage_and_commit("nvim/orphan.lua", "keep me")?;
    sandbox.local_file("nvim/init.lua", "A")?;
    let target = SyncTarget::app("nvim", sandbox.local_dir("nvim"));
    let tip = sandbox.remote.branch_tip("main")?;

    let mut operator = ScriptedOperator::accepting();
    let synchronizer = sandbox.synchronizer("main", FakeProbe::default());
    let outcome = synchronizer.push_target(&target, &mut operator).await?;

    assert_eq!(outcome, PushOutcome::NoChanges);
    assert_eq!(operator.confirmations, 1);
    assert!(operator.events.contains(&Progress::CleanedUp));
    assert_eq!(
        synchronizer.working_copy().current_branch()?,
        Some("main".to_string())
    );

    let working_copy = sandbox.working_copy()?;
    assert_clean_on(&working_copy, "main")?;
    assert_eq!(working_copy.branches(Some(BranchType::Local))?.count(), 1);
    let pushed = working_copy
        .branches(Some(BranchType::Remote))?
        .filter_map(|branch| branch.ok())
        .filter_map(|(branch, _)| branch.name().ok().flatten().map(ToString::to_string))
        .any(|name| name.contains(PUSH_BRANCH_PREFIX));
    assert!(!pushed);
    assert_eq!(sandbox.remote.branch_tip("main")?, tip);

    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn push_follows_symlinked_source_directory() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.local_file("dotfiles/nvim/init.lua", "A")?;
    let link = sandbox.local_dir("nvim");
    std::os::unix::fs::symlink(sandbox.local_dir("dotfiles/nvim"), &link)?;
    let target = SyncTarget::app("nvim", &link);

    let outcome = sandbox
        .synchronizer("main", FakeProbe::default())
        .push_target(&target, &mut ScriptedOperator::accepting())
        .await?;

    let record = match outcome {
        PushOutcome::Pushed(record) => record,
        other => anyhow::bail!("expected push, got {other:?}"),
    };
    assert_eq!(record.files_committed, vec!["nvim/init.lua".to_string()]);
    assert_eq!(
        sandbox.remote.file_at(&record.branch_name, "nvim/init.lua")?,
        "A"
    );

    Ok(())
}

#[tokio::test]
async fn push_replaces_file_with_directory() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.remote.stage_and_commit("nvim/lua", "was a file")?;
    sandbox.local_file("nvim/lua/init.lua", "A")?;
    let target = SyncTarget::app("nvim", sandbox.local_dir("nvim"));

    let outcome = sandbox
        .synchronizer("main", FakeProbe::default())
        .push_target(&target, &mut ScriptedOperator::accepting())
        .await?;

    let record = match outcome {
        PushOutcome::Pushed(record) => record,
        other => anyhow::bail!("expected push, got {other:?}"),
    };
    assert_eq!(record.files_committed, vec!["nvim/lua/init.lua".to_string()]);
    assert_eq!(
        sandbox.remote.file_at(&record.branch_name, "nvim/lua/init.lua")?,
        "A"
    );

    Ok(())
}

/// Operator that declines after leaving a stale index lock behind.
struct LockingOperator {
    lock: std::path::PathBuf,
    events: Vec<Progress>,
}

impl Interaction for LockingOperator {
    fn confirm(&mut self, _: &ConfirmRequest<'_>) -> bool {
        let _ = fs::write(&self.lock, "");
        false
    }

    fn progress(&mut self, event: Progress) {
        self.events.push(event);
    }
}

#[tokio::test]
async fn failed_cleanup_after_decline_is_error() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.local_file("app-x/init.lua", "A")?;
    let target = SyncTarget::app("app-x", sandbox.local_dir("app-x"));

    let mut operator = LockingOperator {
        lock: sandbox.clone_path().join(".git/index.lock"),
        events: Vec::new(),
    };
    let result = sandbox
        .synchronizer("main", FakeProbe::default())
        .push_target(&target, &mut operator)
        .await;

    let error = result.err().ok_or(anyhow::anyhow!("cleanup failure was swallowed"))?;
    assert_eq!(error.kind(), ErrorKind::RepositoryAccess);
    assert!(operator
        .events
        .iter()
        .any(|event| matches!(event, Progress::CleanupFailed(_))));

    Ok(())
}
