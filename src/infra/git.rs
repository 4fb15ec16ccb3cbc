//! Git operations
//!
//! Cloning and ref queries use the gix crate. Patch plumbing (`am`,
//! `format-patch`, branch moves) shells out to the git CLI, which gix does
//! not implement.

use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

use crate::config::defaults;

/// Git operation errors
#[derive(Error, Debug)]
pub enum GitError {
    /// Failed to clone repository
    #[error("Failed to clone '{url}': {error}")]
    CloneFailed { url: String, error: String },

    /// Ref not found
    #[error("Ref '{reference}' not found in repository '{repo}'")]
    RefNotFound { repo: String, reference: String },

    /// Failed to resolve ref to SHA
    #[error("Failed to resolve ref '{reference}' to SHA: {error}")]
    ResolveFailed { reference: String, error: String },

    /// IO error
    #[error("IO error for '{path}': {error}")]
    IoError { path: PathBuf, error: String },

    /// Invalid repository
    #[error("Invalid repository at '{path}': {error}")]
    InvalidRepository { path: PathBuf, error: String },

    /// git CLI invocation failed
    #[error("'git {command}' failed in '{repo}': {error}")]
    CommandFailed {
        command: String,
        repo: PathBuf,
        error: String,
    },
}

/// Git repository operations backed by gix
#[derive(Debug, Default, Clone, Copy)]
pub struct GitOperations;

impl GitOperations {
    /// Create a new git operations handler
    pub fn new() -> Self {
        Self
    }

    /// Clone a repository with all remote branches into `dest`
    ///
    /// An existing directory at `dest` is removed first, so a partially
    /// cloned repository from an interrupted run never survives.
    pub fn clone_repo(&self, url: &str, dest: &Path) -> Result<PathBuf, GitError> {
        if dest.exists() {
            std::fs::remove_dir_all(dest).map_err(|e| GitError::IoError {
                path: dest.to_path_buf(),
                error: e.to_string(),
            })?;
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| GitError::IoError {
                path: parent.to_path_buf(),
                error: e.to_string(),
            })?;
        }

        let mut prepare = gix::prepare_clone(url, dest).map_err(|e| GitError::CloneFailed {
            url: url.to_string(),
            error: e.to_string(),
        })?;

        let (mut checkout, _outcome) = prepare
            .fetch_then_checkout(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
            .map_err(|e| GitError::CloneFailed {
                url: url.to_string(),
                error: e.to_string(),
            })?;

        checkout
            .main_worktree(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
            .map_err(|e| GitError::CloneFailed {
                url: url.to_string(),
                error: e.to_string(),
            })?;

        Ok(dest.to_path_buf())
    }

    /// Resolve a branch name to its commit SHA, preferring `origin/<branch>`
    pub fn resolve_branch_to_sha(&self, repo_path: &Path, branch: &str) -> Result<String, GitError> {
        let repo = open(repo_path)?;

        for reference_name in [
            format!("refs/remotes/origin/{branch}"),
            format!("refs/heads/{branch}"),
        ] {
            if let Ok(mut reference) = repo.find_reference(reference_name.as_str()) {
                let commit = reference
                    .peel_to_commit()
                    .map_err(|e| GitError::ResolveFailed {
                        reference: branch.to_string(),
                        error: e.to_string(),
                    })?;
                return Ok(commit.id().to_hex().to_string());
            }
        }

        Err(GitError::RefNotFound {
            repo: repo_path.display().to_string(),
            reference: branch.to_string(),
        })
    }

    /// Check whether a local branch exists
    pub fn branch_exists(&self, repo_path: &Path, branch: &str) -> bool {
        open(repo_path)
            .map(|repo| repo.find_reference(format!("refs/heads/{branch}").as_str()).is_ok())
            .unwrap_or(false)
    }
}

fn open(repo_path: &Path) -> Result<gix::Repository, GitError> {
    gix::open(repo_path).map_err(|e| GitError::InvalidRepository {
        path: repo_path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Thin wrapper over the `git` executable
#[derive(Debug, Clone)]
pub struct GitCli {
    /// `-c` overrides supplying a committer identity when the host has none
    identity: Vec<String>,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    /// Create a wrapper, detecting whether a committer identity is configured
    pub fn new() -> Self {
        let configured = Command::new("git")
            .args(["config", "--get", "user.email"])
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false);

        let identity = if configured {
            Vec::new()
        } else {
            vec![
                "-c".to_string(),
                format!("user.name={}", defaults::GIT_FALLBACK_NAME),
                "-c".to_string(),
                format!("user.email={}", defaults::GIT_FALLBACK_EMAIL),
            ]
        };

        Self { identity }
    }

    /// Check whether the git executable is on `PATH`
    pub fn is_available() -> bool {
        which::which("git").is_ok()
    }

    /// Run `git <args>` inside `repo` and return its trimmed standard output
    pub fn run<S: AsRef<str>>(&self, repo: &Path, args: &[S]) -> Result<String, GitError> {
        let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
        let command = args.join(" ");
        tracing::debug!("git {} (in {})", command, repo.display());

        let output = Command::new("git")
            .arg("-C")
            .arg(repo)
            .args(&self.identity)
            .args(&args)
            .output()
            .map_err(|e| GitError::CommandFailed {
                command: command.clone(),
                repo: repo.to_path_buf(),
                error: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() { stdout } else { stderr };
            return Err(GitError::CommandFailed {
                command,
                repo: repo.to_path_buf(),
                error: detail.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Number of commits reachable from `to` but not from `from`
    pub fn count_commits(&self, repo: &Path, from: &str, to: &str) -> Result<usize, GitError> {
        let range = format!("{from}..{to}");
        let out = self.run(repo, &["rev-list", "--count", range.as_str()])?;
        out.parse().map_err(|_| GitError::ResolveFailed {
            reference: range,
            error: format!("unexpected rev-list output '{out}'"),
        })
    }

    /// Abbreviated description of `HEAD` (`<sha> <subject>`)
    pub fn describe_head(&self, repo: &Path) -> Result<String, GitError> {
        self.run(repo, &["log", "-1", "--format=%h %s"])
    }

    /// Point `branch` at `target` without touching the worktree
    pub fn move_branch(&self, repo: &Path, branch: &str, target: &str) -> Result<(), GitError> {
        self.run(repo, &["branch", "-f", branch, target]).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn init_repo(dir: &Path) -> GitCli {
        let git = GitCli::new();
        git.run(dir, &["init", "-q", "-b", "main"]).unwrap();
        std::fs::write(dir.join("README"), "one\n").unwrap();
        git.run(dir, &["add", "README"]).unwrap();
        git.run(dir, &["commit", "-q", "-m", "initial"]).unwrap();
        git
    }

    // ============================================
    // Unit Tests - gix operations
    // ============================================

    #[test]
    fn test_clone_repo_invalid_url() {
        let temp = TempDir::new().unwrap();
        let ops = GitOperations::new();

        let result = ops.clone_repo(
            "https://invalid-url-that-does-not-exist.example.com/repo.git",
            &temp.path().join("invalid"),
        );

        match result.unwrap_err() {
            GitError::CloneFailed { url, .. } => assert!(url.contains("invalid-url")),
            e => panic!("Expected CloneFailed error, got: {e:?}"),
        }
    }

    #[test]
    fn test_branch_exists_on_non_repository() {
        let temp = TempDir::new().unwrap();
        assert!(!GitOperations::new().branch_exists(temp.path(), "main"));
    }

    #[test]
    fn test_resolve_local_branch() {
        if !GitCli::is_available() {
            return;
        }
        let temp = TempDir::new().unwrap();
        let git = init_repo(temp.path());
        let ops = GitOperations::new();

        let sha = ops.resolve_branch_to_sha(temp.path(), "main").unwrap();
        assert_eq!(sha, git.run(temp.path(), &["rev-parse", "HEAD"]).unwrap());
        assert!(ops.branch_exists(temp.path(), "main"));
        assert!(matches!(
            ops.resolve_branch_to_sha(temp.path(), "nope"),
            Err(GitError::RefNotFound { .. })
        ));
    }

    // ============================================
    // Unit Tests - git CLI wrapper
    // ============================================

    #[test]
    fn test_count_commits_and_move_branch() {
        if !GitCli::is_available() {
            return;
        }
        let temp = TempDir::new().unwrap();
        let git = init_repo(temp.path());
        git.run(temp.path(), &["branch", "base"]).unwrap();

        std::fs::write(temp.path().join("README"), "two\n").unwrap();
        git.run(temp.path(), &["commit", "-q", "-am", "second"]).unwrap();
        assert_eq!(git.count_commits(temp.path(), "base", "HEAD").unwrap(), 1);
        assert!(git.describe_head(temp.path()).unwrap().ends_with("second"));

        git.move_branch(temp.path(), "base", "HEAD").unwrap();
        assert_eq!(git.count_commits(temp.path(), "base", "HEAD").unwrap(), 0);
    }

    #[test]
    fn test_failed_command_reports_stderr() {
        if !GitCli::is_available() {
            return;
        }
        let temp = TempDir::new().unwrap();
        let err = GitCli::new()
            .run(temp.path(), &["rev-parse", "HEAD"])
            .unwrap_err();
        match err {
            GitError::CommandFailed { command, error, .. } => {
                assert_eq!(command, "rev-parse HEAD");
                assert!(!error.is_empty());
            }
            e => panic!("Expected CommandFailed, got: {e:?}"),
        }
    }
}
