//! Block packages
//!
//! Every block's output is published as `bp_<block>_<project>_<timestamp>.tar.gz`
//! in its output directory. A package is validated against the producing
//! builder's manifest before anyone can see it, and again against the
//! consumer's requirements before it is extracted as a dependency.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::defaults;
use crate::core::builder::ResolvedDependency;
use crate::core::project::BlockPaths;
use crate::core::sources::local_path;
use crate::error::{FetchError, FilesystemError, PackagingError, SocksError};
use crate::infra::archive;
use crate::infra::download::{file_checksum, DownloadManager};
use crate::infra::filesystem;

/// Result of importing a pre-built package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOutcome {
    /// Package in the block's output directory
    pub package: PathBuf,
    /// The package was unchanged and nothing was extracted
    pub unchanged: bool,
}

/// Publishes, validates, imports and resolves block packages
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    project_dir: PathBuf,
    project_name: String,
    downloads: DownloadManager,
}

impl ArtifactStore {
    /// Create a store for the project at `project_dir`
    pub fn new(project_dir: &Path, project_name: &str) -> Self {
        Self {
            project_dir: project_dir.to_path_buf(),
            project_name: project_name.to_string(),
            downloads: DownloadManager::new(),
        }
    }

    /// Use `downloads` for remote imports
    #[must_use]
    pub fn with_downloads(mut self, downloads: DownloadManager) -> Self {
        self.downloads = downloads;
        self
    }

    /// Package `content_dir` for `block` and validate it against `manifest`
    ///
    /// Earlier packages of the block are replaced. The archive is written
    /// under a temporary name and only renamed once it is complete and
    /// valid, so no partial or invalid package is ever visible.
    pub fn publish(&self, block: &str, content_dir: &Path, manifest: &[String]) -> Result<PathBuf, PackagingError> {
        let prefix = package_prefix(block);
        let is_package = |path: &Path| {
            path.file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with(&prefix))
        };

        let has_content = content_dir.is_dir()
            && std::fs::read_dir(content_dir)
                .map_err(|e| FilesystemError::ReadFile {
                    path: content_dir.to_path_buf(),
                    error: e.to_string(),
                })?
                .filter_map(Result::ok)
                .any(|entry| !is_package(&entry.path()));
        if !has_content {
            return Err(PackagingError::EmptyOutput {
                block: block.to_string(),
                path: content_dir.to_path_buf(),
            });
        }

        remove_packages(content_dir, &prefix)?;

        let package = content_dir.join(format!(
            "{}{}_{}.tar.gz",
            prefix,
            self.project_name,
            unix_timestamp()
        ));
        let partial = content_dir.join(format!("{prefix}partial"));
        let result = archive::pack_dir(content_dir, &partial, is_package)
            .map_err(PackagingError::from)
            .and_then(|()| validate(&partial, manifest));
        if let Err(e) = result {
            filesystem::remove_file(&partial)?;
            return Err(e);
        }

        std::fs::rename(&partial, &package).map_err(|e| FilesystemError::CopyFile {
            from: partial.clone(),
            to: package.clone(),
            error: e.to_string(),
        })?;

        tracing::info!("Published {}", package.display());
        Ok(package)
    }

    /// Import a pre-built package for `block` from `uri`
    ///
    /// `file://` paths are relative to the project directory. When the
    /// package's checksum matches the last import, nothing is re-extracted.
    pub async fn import(
        &self,
        block: &str,
        paths: &BlockPaths,
        uri: &str,
        manifest: &[String],
    ) -> Result<ImportOutcome, SocksError> {
        let lower = uri.to_ascii_lowercase();
        if !(lower.ends_with(".tar.gz") || lower.ends_with(".tgz")) {
            return Err(FetchError::NotAnArchive { uri: uri.to_string() }.into());
        }

        let source = if uri.starts_with("file://") {
            let path = local_path(&self.project_dir, uri);
            if !path.is_file() {
                return Err(FetchError::Artifact {
                    uri: uri.to_string(),
                    error: format!("'{}' does not exist", path.display()),
                }
                .into());
            }
            path
        } else if uri.starts_with("https://") || uri.starts_with("http://") {
            let file_name = uri.rsplit('/').next().unwrap_or("package.tar.gz");
            let dest = paths.download.join(file_name);
            filesystem::create_dir_all(&paths.download)?;
            tracing::info!("Downloading {}", uri);
            self.downloads.download(uri, &dest).await.map_err(FetchError::from)?;
            dest
        } else {
            return Err(FetchError::UnsupportedScheme { uri: uri.to_string() }.into());
        };

        let checksum = file_checksum(&source).map_err(FetchError::from)?;
        let package = paths.output.join(format!(
            "{}_{}_{}.tar.gz",
            defaults::PACKAGE_PREFIX,
            block,
            defaults::IMPORT_DISCRIMINATOR
        ));
        let stamp = paths.work.join(defaults::IMPORT_CHECKSUM_FILE);

        let previous = filesystem::read_optional(&stamp)?;
        if package.is_file() && previous.as_deref().map(str::trim) == Some(checksum.as_str()) {
            // The manifest may have grown since the last import
            if let Err(e) = validate(&package, manifest) {
                filesystem::remove_file(&package)?;
                filesystem::remove_file(&stamp)?;
                return Err(e.into());
            }
            tracing::info!("Pre-built package of '{}' is unchanged", block);
            return Ok(ImportOutcome {
                package,
                unchanged: true,
            });
        }

        filesystem::recreate_dir(&paths.output)?;
        filesystem::copy_file(&source, &package)?;
        if let Err(e) = validate(&package, manifest) {
            filesystem::remove_file(&package)?;
            return Err(e.into());
        }
        archive::unpack(&package, &paths.output).map_err(PackagingError::from)?;

        filesystem::create_dir_all(&paths.work)?;
        filesystem::write_file(&stamp, &checksum)?;

        tracing::info!("Imported {} into {}", uri, paths.output.display());
        Ok(ImportOutcome {
            package,
            unchanged: false,
        })
    }

    /// Locate, validate and extract the package `dependency` of a consumer
    ///
    /// `pattern` is a glob relative to the project directory and must match
    /// exactly one file. Every pattern in `required` must match a member.
    pub fn resolve_dependency(
        &self,
        consumer: &str,
        paths: &BlockPaths,
        dependency: &str,
        pattern: &str,
        required: &[String],
    ) -> Result<ResolvedDependency, SocksError> {
        let package = self.locate(consumer, dependency, pattern)?;
        validate(&package, required)?;

        let extracted = paths.dependencies.join(dependency);
        let stamp = paths.dependencies.join(format!(".{dependency}.sha256"));
        let checksum = file_checksum(&package).map_err(FetchError::from)?;

        let previous = filesystem::read_optional(&stamp)?;
        if extracted.is_dir() && previous.as_deref().map(str::trim) == Some(checksum.as_str()) {
            tracing::debug!("Dependency '{}' of '{}' is up to date", dependency, consumer);
        } else {
            filesystem::recreate_dir(&extracted)?;
            archive::unpack(&package, &extracted).map_err(PackagingError::from)?;
            filesystem::write_file(&stamp, &checksum)?;
            tracing::info!("Extracted {} for '{}'", package.display(), consumer);
        }

        Ok(ResolvedDependency {
            provider: dependency.to_string(),
            package,
            extracted,
        })
    }

    fn locate(&self, consumer: &str, dependency: &str, pattern: &str) -> Result<PathBuf, FetchError> {
        let full = if Path::new(pattern).is_absolute() {
            pattern.to_string()
        } else {
            format!(
                "{}/{}",
                glob::Pattern::escape(&self.project_dir.to_string_lossy()),
                pattern
            )
        };

        let matches: Vec<PathBuf> = glob::glob(&full)
            .map_err(|e| FetchError::InvalidPattern {
                pattern: pattern.to_string(),
                error: e.to_string(),
            })?
            .filter_map(Result::ok)
            .filter(|path| path.is_file())
            .collect();

        match matches.as_slice() {
            [] => Err(FetchError::DependencyNotFound {
                block: consumer.to_string(),
                dependency: dependency.to_string(),
                pattern: pattern.to_string(),
            }),
            [single] => Ok(single.clone()),
            _ => Err(FetchError::AmbiguousDependency {
                block: consumer.to_string(),
                dependency: dependency.to_string(),
                pattern: pattern.to_string(),
                count: matches.len(),
            }),
        }
    }
}

/// Check that every pattern in `manifest` matches at least one member
///
/// Patterns are regular expressions anchored at both ends.
pub fn validate(package: &Path, manifest: &[String]) -> Result<(), PackagingError> {
    if manifest.is_empty() {
        return Ok(());
    }
    let members = archive::list_members(package)?;
    for pattern in manifest {
        let regex = Regex::new(&format!("^(?:{pattern})$")).map_err(|e| PackagingError::InvalidPattern {
            pattern: pattern.clone(),
            error: e.to_string(),
        })?;
        if !members.iter().any(|m| regex.is_match(m)) {
            return Err(PackagingError::MissingMember {
                package: package.to_path_buf(),
                member: pattern.clone(),
            });
        }
    }
    Ok(())
}

fn package_prefix(block: &str) -> String {
    format!("{}_{}_", defaults::PACKAGE_PREFIX, block)
}

fn remove_packages(dir: &Path, prefix: &str) -> Result<(), FilesystemError> {
    let entries = std::fs::read_dir(dir).map_err(|e| FilesystemError::ReadFile {
        path: dir.to_path_buf(),
        error: e.to_string(),
    })?;
    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        let stale = path.is_file()
            && path
                .file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with(prefix));
        if stale {
            filesystem::remove_file(&path)?;
        }
    }
    Ok(())
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
