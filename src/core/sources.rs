//! Source acquisition
//!
//! Remote repositories are cloned into `temp/<block>/repo/<name>` and get
//! two local branches: the baseline (`__ref`) and the development branch
//! (`__temp`) that is checked out. `file://` sources are local overrides
//! used in place and never touched.

use std::path::{Path, PathBuf};

use crate::config::defaults;
use crate::core::builder::{RepoHandle, SourceHandle};
use crate::core::project::{ScopedConfig, SourceSpec};
use crate::error::FetchError;
use crate::infra::git::{GitCli, GitError, GitOperations};

/// Acquire every source of the block, reusing existing clones
pub fn prepare(scope: &ScopedConfig<'_>) -> Result<SourceHandle, FetchError> {
    let specs = scope.spec.project.sources();
    if specs.is_empty() {
        return Err(FetchError::NoSources {
            block: scope.block_id.to_string(),
        });
    }

    let mut repos = Vec::with_capacity(specs.len());
    for spec in specs {
        let repo = if spec.is_local() {
            local_override(scope, spec)?
        } else {
            fetch_remote(scope, spec)?
        };
        repos.push(repo);
    }
    Ok(SourceHandle { repos })
}

/// Sources already on disk, without fetching anything
pub fn locate(scope: &ScopedConfig<'_>) -> SourceHandle {
    let repos = scope
        .spec
        .project
        .sources()
        .into_iter()
        .map(|spec| {
            let (path, local_override) = if spec.is_local() {
                (local_path(&scope.paths.project_dir, &spec.source), true)
            } else {
                (scope.paths.repo.join(repo_dir_name(spec)), false)
            };
            RepoHandle {
                name: spec.name.clone(),
                path,
                local_override,
            }
        })
        .filter(|repo| repo.path.is_dir())
        .collect();
    SourceHandle { repos }
}

fn local_override(scope: &ScopedConfig<'_>, spec: &SourceSpec) -> Result<RepoHandle, FetchError> {
    let path = local_path(&scope.paths.project_dir, &spec.source);
    if !path.is_dir() {
        return Err(FetchError::MissingLocalSource {
            block: scope.block_id.to_string(),
            path,
        });
    }
    tracing::warn!(
        "Block '{}' uses local source override '{}'",
        scope.block_id,
        path.display()
    );
    Ok(RepoHandle {
        name: spec.name.clone(),
        path,
        local_override: true,
    })
}

fn fetch_remote(scope: &ScopedConfig<'_>, spec: &SourceSpec) -> Result<RepoHandle, FetchError> {
    let block = scope.block_id;
    let scheme_ok = ["https://", "http://", "ssh://"]
        .iter()
        .any(|scheme| spec.source.starts_with(scheme));
    if !scheme_ok {
        return Err(FetchError::UnsupportedScheme {
            uri: spec.source.clone(),
        });
    }
    let branch = spec.branch.as_deref().ok_or_else(|| FetchError::MissingBranch {
        block: block.to_string(),
        uri: spec.source.clone(),
    })?;

    let dest = scope.paths.repo.join(repo_dir_name(spec));
    let handle = RepoHandle {
        name: spec.name.clone(),
        path: dest.clone(),
        local_override: false,
    };

    let ops = GitOperations::new();
    if ops.branch_exists(&dest, defaults::BASELINE_BRANCH) {
        tracing::debug!("Sources of '{}' already present in {}", block, dest.display());
        return Ok(handle);
    }

    tracing::info!("Fetching {} ({}) for block '{}'", spec.source, branch, block);
    let git_error = |error: GitError| FetchError::Git {
        block: block.to_string(),
        error,
    };
    ops.clone_repo(&spec.source, &dest).map_err(git_error)?;
    ops.resolve_branch_to_sha(&dest, branch).map_err(git_error)?;

    let git = GitCli::new();
    let upstream = format!("origin/{branch}");
    git.run(&dest, &["switch", "-q", "-c", defaults::BASELINE_BRANCH, upstream.as_str()])
        .map_err(git_error)?;
    git.run(&dest, &["switch", "-q", "-c", defaults::DEV_BRANCH])
        .map_err(git_error)?;

    Ok(handle)
}

/// Directory name of a managed clone: `<repo stem>-<branch>`
pub fn repo_dir_name(spec: &SourceSpec) -> String {
    let stem = spec
        .source
        .trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()
        .unwrap_or("repo")
        .trim_end_matches(".git");
    let stem = if stem.is_empty() { "repo" } else { stem };
    match &spec.branch {
        Some(branch) => format!("{}-{}", stem, branch.replace('/', "_")),
        None => stem.to_string(),
    }
}

/// Resolve a `file://` URI, relative paths being relative to the project
pub fn local_path(project_dir: &Path, uri: &str) -> PathBuf {
    let raw = uri.strip_prefix("file://").unwrap_or(uri);
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_dir.join(path)
    }
}
