// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Thin wrapper over the `git` CLI for worktree management.
//!
//! ```text
//! /project/                   # Source repo
//! ├── .git/
//! │   └── worktrees/wt_ab12/  # Registration created by `git worktree add`
//! └── src/
//!
//! <base_dir>/wt_ab12/         # Pooled workspace
//! ├── .git                    # "gitdir: /project/.git/worktrees/wt_ab12"
//! └── src/
//! ```

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::error::WorktreeError;

/// Run a git command in `dir` and return trimmed stdout.
pub async fn git(dir: &Path, args: &[&str]) -> Result<String, WorktreeError> {
    debug!(dir = %dir.display(), ?args, "git");
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(WorktreeError::Git(stderr.trim().to_string()))
    }
}

/// A directory is treated as a repository when it has `.git` (dir or link file).
pub fn is_repository(path: &Path) -> bool {
    path.join(".git").exists()
}

/// Branch (or `HEAD` when detached) to fork new worktrees from.
pub async fn base_ref(repo: &Path) -> String {
    match git(repo, &["branch", "--show-current"]).await {
        Ok(branch) if !branch.is_empty() => branch,
        _ => "HEAD".to_string(),
    }
}

/// `git worktree add -b <branch> <path> <base>`.
pub async fn add_worktree(
    repo: &Path,
    path: &Path,
    branch: &str,
    base: &str,
) -> Result<(), WorktreeError> {
    let path = path.to_string_lossy();
    git(repo, &["worktree", "add", "-b", branch, &path, base]).await?;
    Ok(())
}

/// `git worktree remove --force <path>`.
pub async fn remove_worktree(repo: &Path, path: &Path) -> Result<(), WorktreeError> {
    let path = path.to_string_lossy();
    git(repo, &["worktree", "remove", "--force", &path]).await?;
    Ok(())
}

/// Drop registrations whose directories are gone.
pub async fn prune(repo: &Path) -> Result<(), WorktreeError> {
    git(repo, &["worktree", "prune"]).await?;
    Ok(())
}

/// Delete a branch created for a worktree.
pub async fn delete_branch(repo: &Path, branch: &str) -> Result<(), WorktreeError> {
    git(repo, &["branch", "-D", branch]).await?;
    Ok(())
}

/// Find the source repository of a linked worktree from its `.git` file.
///
/// Returns `None` for plain directories or a `.git` that is not a link file.
pub fn linked_repository(worktree_dir: &Path) -> Option<PathBuf> {
    let link = std::fs::read_to_string(worktree_dir.join(".git")).ok()?;
    let gitdir = link.lines().find_map(|l| l.strip_prefix("gitdir:"))?.trim();
    // <repo>/.git/worktrees/<name>
    let gitdir = Path::new(gitdir);
    let dot_git = gitdir.parent()?.parent()?;
    if dot_git.file_name()? != ".git" {
        return None;
    }
    dot_git.parent().map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_repository() {
        let temp = TempDir::new().unwrap();
        assert!(!is_repository(temp.path()));
        std::fs::create_dir(temp.path().join(".git")).unwrap();
        assert!(is_repository(temp.path()));
    }

    #[test]
    fn test_linked_repository() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".git"),
            "gitdir: /home/dev/project/.git/worktrees/wt_1\n",
        )
        .unwrap();
        assert_eq!(
            linked_repository(temp.path()),
            Some(PathBuf::from("/home/dev/project"))
        );
    }

    #[test]
    fn test_linked_repository_rejects_plain_dirs() {
        let temp = TempDir::new().unwrap();
        assert!(linked_repository(temp.path()).is_none());

        std::fs::write(temp.path().join(".git"), "gitdir: /somewhere/else\n").unwrap();
        assert!(linked_repository(temp.path()).is_none());
    }
}
