//! Patch application and generation
//!
//! Patches are applied one `git am` per file on the development branch.
//! After the whole list applies, the baseline branch is moved to the result
//! and the applied names are recorded in `.git/`, so the baseline always
//! means "upstream plus every recorded patch". New commits on top of it are
//! what `create_patches` exports.

use std::path::{Path, PathBuf};

use crate::config::defaults;
use crate::core::project::PatchRef;
use crate::error::PatchError;
use crate::infra::filesystem;
use crate::infra::git::{GitCli, GitError, GitOperations};

/// Outcome of [`PatchManager::apply`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Patches applied by this call
    pub applied: Vec<String>,
    /// Patches already present from an earlier run
    pub skipped: Vec<String>,
}

/// Applies and regenerates source patches
#[derive(Debug, Clone, Default)]
pub struct PatchManager {
    git: GitCli,
}

impl PatchManager {
    /// Create a patch manager
    pub fn new() -> Self {
        Self { git: GitCli::new() }
    }

    /// Apply `patches` to `repo` in order
    ///
    /// Patches recorded by an earlier successful run are skipped. Commits
    /// already made on top of the baseline by an interrupted run count as
    /// applied, so a re-run resumes at the patch that failed. On failure the
    /// repository stays at the last patch that applied.
    pub fn apply(&self, repo: &Path, patches: &[PathBuf]) -> Result<ApplyOutcome, PatchError> {
        self.ensure_prepared(repo)?;

        let names: Vec<String> = patches.iter().map(|p| file_name(p)).collect();
        let recorded = self.recorded(repo)?;
        if let Some(pos) = recorded.iter().zip(&names).position(|(r, n)| r != n) {
            return Err(PatchError::Diverged {
                repo: repo.to_path_buf(),
                patch: names[pos].clone(),
            });
        }
        if recorded.len() > names.len() {
            return Err(PatchError::Diverged {
                repo: repo.to_path_buf(),
                patch: recorded[names.len()].clone(),
            });
        }

        let pending = &patches[recorded.len()..];
        let in_progress = self
            .git
            .count_commits(repo, defaults::BASELINE_BRANCH, "HEAD")
            .map_err(|error| git_error(repo, error))?;
        let resumed = in_progress.min(pending.len());
        if resumed > 0 {
            tracing::warn!(
                "Resuming patch application in {}: {} patch(es) already committed",
                repo.display(),
                resumed
            );
        }

        let mut outcome = ApplyOutcome {
            applied: Vec::new(),
            skipped: names[..recorded.len() + resumed].to_vec(),
        };

        for patch in &pending[resumed..] {
            let name = file_name(patch);
            if !patch.is_file() {
                return Err(PatchError::NotFound {
                    patch: name,
                    path: patch.clone(),
                });
            }

            tracing::info!("Applying patch {}", name);
            let path = patch.to_string_lossy();
            if let Err(e) = self
                .git
                .run(repo, &["am", "--ignore-whitespace", path.as_ref()])
            {
                let _ = self.git.run(repo, &["am", "--abort"]);
                let last_good = self
                    .git
                    .describe_head(repo)
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(PatchError::ApplyFailed {
                    patch: name,
                    repo: repo.to_path_buf(),
                    last_good,
                    error: e.to_string(),
                });
            }
            outcome.applied.push(name);
        }

        if !pending.is_empty() {
            self.sync_baseline(repo)?;
            self.record(repo, &names)?;
        }
        Ok(outcome)
    }

    /// Export commits between `baseline` and `HEAD` into `out_dir`
    ///
    /// Returns the written file names in chronological order. Files are
    /// numbered from `0001`, so re-exporting overwrites earlier files with
    /// the same ordinal. The baseline then moves to `HEAD` and the new
    /// names are recorded as applied.
    pub fn create_patches(&self, repo: &Path, out_dir: &Path) -> Result<Vec<String>, PatchError> {
        self.ensure_prepared(repo)?;

        let count = self
            .git
            .count_commits(repo, defaults::BASELINE_BRANCH, "HEAD")
            .map_err(|error| git_error(repo, error))?;
        if count == 0 {
            tracing::info!("No new commits in {}", repo.display());
            return Ok(Vec::new());
        }

        filesystem::create_dir_all(out_dir)?;
        let range = format!("{}..HEAD", defaults::BASELINE_BRANCH);
        let out = out_dir.to_string_lossy();
        let listing = self
            .git
            .run(
                repo,
                &["format-patch", "--output-directory", out.as_ref(), range.as_str()],
            )
            .map_err(|error| git_error(repo, error))?;

        let created: Vec<String> = listing
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| file_name(Path::new(line.trim())))
            .collect();

        self.sync_baseline(repo)?;
        let mut recorded = self.recorded(repo)?;
        recorded.extend(created.iter().cloned());
        self.record(repo, &recorded)?;

        tracing::info!("Exported {} patch(es) from {}", created.len(), repo.display());
        Ok(created)
    }

    /// Patch names recorded as part of the baseline
    pub fn recorded(&self, repo: &Path) -> Result<Vec<String>, PatchError> {
        let stamp = stamp_path(repo);
        Ok(filesystem::read_optional(&stamp)?
            .map(|content| content.lines().map(str::to_string).collect())
            .unwrap_or_default())
    }

    fn record(&self, repo: &Path, names: &[String]) -> Result<(), PatchError> {
        let mut content = names.join("\n");
        content.push('\n');
        filesystem::write_file(&stamp_path(repo), &content)?;
        Ok(())
    }

    fn sync_baseline(&self, repo: &Path) -> Result<(), PatchError> {
        self.git
            .move_branch(repo, defaults::BASELINE_BRANCH, "HEAD")
            .map_err(|error| git_error(repo, error))
    }

    fn ensure_prepared(&self, repo: &Path) -> Result<(), PatchError> {
        if GitOperations::new().branch_exists(repo, defaults::BASELINE_BRANCH) {
            Ok(())
        } else {
            Err(PatchError::NotPrepared {
                repo: repo.to_path_buf(),
            })
        }
    }
}

/// Location of a configured patch file below the block's patch directory
///
/// Patches of a multi-repository block live in a subdirectory named after
/// their sub-project.
pub fn patch_path(patches_dir: &Path, patch: &PatchRef) -> PathBuf {
    match patch.project() {
        Some(project) => patches_dir.join(project).join(patch.file_name()),
        None => patches_dir.join(patch.file_name()),
    }
}

fn stamp_path(repo: &Path) -> PathBuf {
    repo.join(".git").join(defaults::PATCHES_APPLIED_STAMP)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().to_string())
}

fn git_error(repo: &Path, error: GitError) -> PatchError {
    PatchError::Git {
        repo: repo.to_path_buf(),
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Repository with a baseline and dev branch like a fresh fetch
    fn fresh_repo(dir: &Path) -> GitCli {
        let git = GitCli::new();
        git.run(dir, &["init", "-q", "-b", "main"]).unwrap();
        std::fs::write(dir.join("file.txt"), "line 1\n").unwrap();
        git.run(dir, &["add", "file.txt"]).unwrap();
        git.run(dir, &["commit", "-q", "-m", "upstream"]).unwrap();
        git.run(dir, &["switch", "-q", "-c", defaults::BASELINE_BRANCH]).unwrap();
        git.run(dir, &["switch", "-q", "-c", defaults::DEV_BRANCH]).unwrap();
        git
    }

    fn commit(git: &GitCli, dir: &Path, content: &str, msg: &str) {
        std::fs::write(dir.join("file.txt"), content).unwrap();
        git.run(dir, &["commit", "-q", "-am", msg]).unwrap();
    }

    #[test]
    fn test_patch_path() {
        let dir = Path::new("/prj/src/boot/patches");
        assert_eq!(
            patch_path(dir, &PatchRef::File("0001-a.patch".into())),
            PathBuf::from("/prj/src/boot/patches/0001-a.patch")
        );
        assert_eq!(
            patch_path(
                dir,
                &PatchRef::Project {
                    project: "atf".into(),
                    patch: "0001-b.patch".into()
                }
            ),
            PathBuf::from("/prj/src/boot/patches/atf/0001-b.patch")
        );
    }

    #[test]
    fn test_unprepared_repository() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            PatchManager::new().apply(temp.path(), &[]),
            Err(PatchError::NotPrepared { .. })
        ));
    }

    #[test]
    fn test_create_then_apply_round_trip() {
        if !GitCli::is_available() {
            return;
        }
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("repo");
        let patches = temp.path().join("patches");
        std::fs::create_dir_all(&repo).unwrap();
        let git = fresh_repo(&repo);
        let manager = PatchManager::new();

        commit(&git, &repo, "line 1\nline 2\n", "add line 2");
        commit(&git, &repo, "line 1\nline 2\nline 3\n", "add line 3");
        let created = manager.create_patches(&repo, &patches).unwrap();
        assert_eq!(created, vec!["0001-add-line-2.patch", "0002-add-line-3.patch"]);
        assert_eq!(manager.recorded(&repo).unwrap(), created);
        assert!(manager.create_patches(&repo, &patches).unwrap().is_empty());

        // A second checkout of upstream gets the same content from the files
        let other = temp.path().join("other");
        std::fs::create_dir_all(&other).unwrap();
        fresh_repo(&other);
        let files: Vec<PathBuf> = created.iter().map(|n| patches.join(n)).collect();
        let outcome = manager.apply(&other, &files).unwrap();
        assert_eq!(outcome.applied, created);
        assert_eq!(
            std::fs::read_to_string(other.join("file.txt")).unwrap(),
            "line 1\nline 2\nline 3\n"
        );

        // Idempotent
        let outcome = manager.apply(&other, &files).unwrap();
        assert!(outcome.applied.is_empty());
        assert_eq!(outcome.skipped, created);
    }

    #[test]
    fn test_conflicting_patch_stops_after_last_good() {
        if !GitCli::is_available() {
            return;
        }
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source");
        let patches = temp.path().join("patches");
        std::fs::create_dir_all(&source).unwrap();
        let git = fresh_repo(&source);
        let manager = PatchManager::new();

        commit(&git, &source, "line 1\nA\n", "first");
        commit(&git, &source, "line 1\nA\nB\n", "second");
        let good = manager.create_patches(&source, &patches).unwrap();

        // A third patch that expects different content than patch 2 leaves
        git.run(&source, &["reset", "-q", "--hard", "HEAD~1"]).unwrap();
        commit(&git, &source, "line 1\nA\nC\n", "third");
        git.run(&source, &["branch", "-f", defaults::BASELINE_BRANCH, "HEAD~1"])
            .unwrap();
        let conflicting = manager
            .create_patches(&source, &temp.path().join("conflicting"))
            .unwrap();

        let target = temp.path().join("target");
        std::fs::create_dir_all(&target).unwrap();
        fresh_repo(&target);
        let mut files: Vec<PathBuf> = good.iter().map(|n| patches.join(n)).collect();
        files.push(temp.path().join("conflicting").join(&conflicting[0]));

        match manager.apply(&target, &files).unwrap_err() {
            PatchError::ApplyFailed { patch, last_good, .. } => {
                assert_eq!(patch, conflicting[0]);
                assert!(last_good.ends_with("second"));
            }
            e => panic!("Expected ApplyFailed, got: {e:?}"),
        }
        assert_eq!(
            std::fs::read_to_string(target.join("file.txt")).unwrap(),
            "line 1\nA\nB\n"
        );
        assert!(manager.recorded(&target).unwrap().is_empty());

        // Re-running resumes at the failing patch instead of re-applying 1 and 2
        let err = manager.apply(&target, &files).unwrap_err();
        assert!(matches!(err, PatchError::ApplyFailed { patch, .. } if patch == conflicting[0]));
    }

    #[test]
    fn test_edited_patch_list_diverges() {
        if !GitCli::is_available() {
            return;
        }
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        let git = fresh_repo(&repo);
        let manager = PatchManager::new();
        commit(&git, &repo, "x\n", "change");
        manager.create_patches(&repo, &temp.path().join("p")).unwrap();

        let err = manager
            .apply(&repo, &[temp.path().join("p/0001-other.patch")])
            .unwrap_err();
        assert!(matches!(err, PatchError::Diverged { patch, .. } if patch == "0001-other.patch"));
    }
}
