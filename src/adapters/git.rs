use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

use crate::build::log_stream::JobLogStream;

#[async_trait]
pub trait GitHost: Send + Sync {
    /// Shallow-clones `branch` at `depth=1`, checking out `sha`. Falls back
    /// to a full clone + explicit checkout if the shallow path fails (the
    /// SHA may not be the branch tip, e.g. a webhook racing a force-push).
    async fn checkout(&self, repo_url: &str, branch: Option<&str>, sha: &str, dest: &Path, logs: &JobLogStream) -> Result<()>;
}

pub struct ProcessGitHost;

#[async_trait]
impl GitHost for ProcessGitHost {
    async fn checkout(&self, repo_url: &str, branch: Option<&str>, sha: &str, dest: &Path, logs: &JobLogStream) -> Result<()> {
        let branch = branch.unwrap_or("HEAD");
        logs.push(None, format!("cloning {repo_url} (branch={branch}, depth=1)"));

        let shallow = Command::new("git")
            .args(["clone", "--depth=1", "--single-branch", "--branch", branch, repo_url])
            .arg(dest)
            .status()
            .await
            .context("failed to spawn git clone")?;

        if shallow.success() && verify_sha(dest, sha).await.unwrap_or(false) {
            return Ok(());
        }

        logs.push(Some("warn".to_string()), "shallow clone did not contain requested sha, falling back to full clone".to_string());
        if dest.exists() {
            tokio::fs::remove_dir_all(dest).await.ok();
        }

        let full = Command::new("git")
            .args(["clone", repo_url])
            .arg(dest)
            .status()
            .await
            .context("failed to spawn git clone (full)")?;
        if !full.success() {
            bail!("git clone of {repo_url} failed");
        }

        let checkout = Command::new("git")
            .current_dir(dest)
            .args(["checkout", sha])
            .status()
            .await
            .context("failed to spawn git checkout")?;
        if !checkout.success() {
            bail!("git checkout of {sha} failed");
        }
        Ok(())
    }
}

async fn verify_sha(dest: &std::path::Path, sha: &str) -> Result<bool> {
    let output = Command::new("git")
        .current_dir(dest)
        .args(["rev-parse", "HEAD"])
        .output()
        .await?;
    if !output.status.success() {
        return Ok(false);
    }
    let head = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Ok(head.starts_with(sha) || sha.starts_with(&head))
}
