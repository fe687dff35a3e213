//! The handful of git operations the engine invokes directly: reading
//! identity and HEAD, and committing/syncing at stage boundaries.
//! Everything else about the repository is out of scope — see
//! `get_git_user_name` in the reference corpus for the calling
//! convention this module generalizes (subprocess + trimmed stdout,
//! `None`/error on anything but a clean exit).

use std::path::Path;
use std::process::Command;

use crate::error::{RalphError, Result};

fn run_git(repo: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .current_dir(repo)
        .args(args)
        .output()
        .map_err(RalphError::Io)?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RalphError::Io(std::io::Error::other(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
        ))));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Current HEAD commit hash, or `"uncommitted"` if the repo has no
/// commits yet (fresh `tix init` before the first commit).
pub fn current_commit(repo: &Path) -> String {
    run_git(repo, &["rev-parse", "HEAD"]).unwrap_or_else(|_| "uncommitted".to_string())
}

pub fn get_user_name(repo: &Path) -> Option<String> {
    run_git(repo, &["config", "user.name"])
        .ok()
        .filter(|s| !s.is_empty())
}

/// Stage the plan log and commit with `{prefix} {subject}`.
pub fn commit(repo: &Path, log_path: &Path, prefix: &str, subject: &str, body: &str) -> Result<String> {
    run_git(repo, &["add", &log_path.to_string_lossy()])?;
    let message = format!("{prefix} {subject}\n\n{body}");
    run_git(repo, &["commit", "-m", &message])?;
    current_commit_checked(repo)
}

fn current_commit_checked(repo: &Path) -> Result<String> {
    run_git(repo, &["rev-parse", "HEAD"])
}

/// Fetch, rebase onto the tracked upstream, and push. Returns an `io`
/// error (retried once by the caller per spec) on any step failing.
pub fn sync(repo: &Path) -> Result<()> {
    run_git(repo, &["fetch"])?;
    run_git(repo, &["rebase", "@{u}"])?;
    run_git(repo, &["push"])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_repo_returns_uncommitted() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(current_commit(dir.path()), "uncommitted");
    }

    #[test]
    fn user_name_is_none_outside_git_config() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(get_user_name(dir.path()), None);
    }
}
