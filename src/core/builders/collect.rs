//! Collect builder
//!
//! Assembles a block's output from members of its dependency packages,
//! e.g. a boot image directory gathering the bootloader, kernel and
//! device tree. Needs no sources of its own.

use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::core::builder::{parse_options, BlockContext, BuildOutput, Builder, SourceHandle};
use crate::core::project::ScopedConfig;
use crate::error::{BuildError, BuilderError, FetchError};
use crate::infra::filesystem;

/// Registered name
pub const NAME: &str = "collect";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct CollectOptions {
    files: Vec<CollectFile>,
    #[serde(default)]
    outputs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct CollectFile {
    /// Dependency key
    from: String,
    /// Member pattern (anchored regular expression)
    pattern: String,
    /// Target directory inside the output; keeps the member's path if unset
    #[serde(default)]
    dest: Option<String>,
}

#[derive(Debug, Clone)]
struct Rule {
    from: String,
    regex: Regex,
    dest: Option<PathBuf>,
}

/// Builder copying files out of dependency packages
#[derive(Debug, Clone)]
pub struct CollectBuilder {
    rules: Vec<Rule>,
    outputs: Vec<String>,
    requires: BTreeMap<String, Vec<String>>,
}

impl CollectBuilder {
    /// Validate the block's options
    pub fn from_scope(scope: &ScopedConfig<'_>) -> Result<Self, BuilderError> {
        let options: CollectOptions = parse_options(scope)?;
        let invalid = |error: String| BuilderError::InvalidOptions {
            block: scope.block_id.to_string(),
            builder: NAME.to_string(),
            error,
        };

        let mut rules = Vec::new();
        let mut requires: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for file in options.files {
            if !scope.spec.project.dependencies.contains_key(&file.from) {
                return Err(invalid(format!(
                    "'{}' is not listed in project.dependencies",
                    file.from
                )));
            }
            let regex = Regex::new(&format!("^(?:{})$", file.pattern)).map_err(|e| invalid(e.to_string()))?;
            requires.entry(file.from.clone()).or_default().push(file.pattern);
            rules.push(Rule {
                from: file.from,
                regex,
                dest: file.dest.map(PathBuf::from),
            });
        }

        Ok(Self {
            rules,
            outputs: options.outputs,
            requires,
        })
    }
}

impl Builder for CollectBuilder {
    fn kind(&self) -> &str {
        NAME
    }

    fn manifest(&self) -> &[String] {
        &self.outputs
    }

    fn requires(&self, dependency: &str) -> &[String] {
        self.requires
            .get(dependency)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn requires_sources(&self) -> bool {
        false
    }

    fn prepare(&self, _ctx: &BlockContext<'_>) -> Result<SourceHandle, FetchError> {
        Ok(SourceHandle::default())
    }

    fn build(&self, ctx: &BlockContext<'_>) -> Result<BuildOutput, BuildError> {
        let output = &ctx.scope.paths.output;
        filesystem::recreate_dir(output)?;

        for rule in &self.rules {
            let dependency = ctx.dependencies.get(&rule.from).ok_or_else(|| BuildError::BuildFailed {
                block: ctx.block_id().to_string(),
                error: format!("dependency '{}' was not resolved", rule.from),
            })?;

            let copied = copy_matching(&dependency.extracted, rule, output)?;
            if copied == 0 {
                return Err(BuildError::BuildFailed {
                    block: ctx.block_id().to_string(),
                    error: format!("no member of '{}' matches '{}'", rule.from, rule.regex.as_str()),
                });
            }
            tracing::debug!("Collected {} file(s) from '{}'", copied, rule.from);
        }

        Ok(BuildOutput { dir: output.clone() })
    }
}

fn copy_matching(src: &Path, rule: &Rule, output: &Path) -> Result<usize, BuildError> {
    let mut copied = 0;
    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let member = relative.to_string_lossy().replace('\\', "/");
        if !rule.regex.is_match(&member) {
            continue;
        }
        let target = match &rule.dest {
            Some(dest) => output.join(dest).join(entry.file_name()),
            None => output.join(relative),
        };
        filesystem::copy_file(entry.path(), &target)?;
        copied += 1;
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::builder::ResolvedDependency;
    use crate::core::project::ProjectConfig;
    use tempfile::TempDir;

    fn config(dir: &Path, files: &str) -> ProjectConfig {
        let doc = format!(
            "project: {{name: demo}}\nblocks:\n  image:\n    source: build\n    builder: collect\n    project:\n      dependencies: {{kernel: 'temp/kernel/output/bp_kernel_*.tar.gz'}}\n      files: {files}\n"
        );
        ProjectConfig::from_document(serde_yaml::from_str(&doc).unwrap(), dir.to_path_buf()).unwrap()
    }

    #[test]
    fn test_unknown_dependency_in_rule() {
        let cfg = config(Path::new("/prj"), "[{from: uboot, pattern: u-boot.elf}]");
        assert!(matches!(
            CollectBuilder::from_scope(&cfg.scoped("image").unwrap()),
            Err(BuilderError::InvalidOptions { .. })
        ));
    }

    #[test]
    fn test_requirements_follow_rules() {
        let cfg = config(
            Path::new("/prj"),
            r"[{from: kernel, pattern: 'Image'}, {from: kernel, pattern: '.*\.dtb', dest: dtbs}]",
        );
        let builder = CollectBuilder::from_scope(&cfg.scoped("image").unwrap()).unwrap();
        assert_eq!(builder.requires("kernel").len(), 2);
        assert!(!builder.requires_sources());
    }

    #[test]
    fn test_build_copies_members() {
        let temp = TempDir::new().unwrap();
        let cfg = config(
            temp.path(),
            r"[{from: kernel, pattern: 'Image'}, {from: kernel, pattern: 'dts/.*\.dtb', dest: dtbs}]",
        );
        let builder = CollectBuilder::from_scope(&cfg.scoped("image").unwrap()).unwrap();

        let extracted = temp.path().join("temp/image/dependencies/kernel");
        std::fs::create_dir_all(extracted.join("dts")).unwrap();
        std::fs::write(extracted.join("Image"), "kernel").unwrap();
        std::fs::write(extracted.join("dts/board.dtb"), "dtb").unwrap();
        std::fs::write(extracted.join("System.map"), "map").unwrap();

        let mut ctx = BlockContext::new(cfg.scoped("image").unwrap());
        ctx.dependencies.insert(
            "kernel".into(),
            ResolvedDependency {
                provider: "kernel".into(),
                package: temp.path().join("unused.tar.gz"),
                extracted,
            },
        );

        let out = builder.build(&ctx).unwrap();
        assert!(out.dir.join("Image").is_file());
        assert!(out.dir.join("dtbs/board.dtb").is_file());
        assert!(!out.dir.join("System.map").exists());
    }
}
