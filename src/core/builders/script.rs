//! Script builder
//!
//! Runs the block's `commands` in its container (or natively with
//! `container_tool: none`). Commands find their directories in the
//! environment:
//!
//! | Variable          | Value                                  |
//! |-------------------|----------------------------------------|
//! | `SOCKS_BLOCK`     | block id                               |
//! | `SOCKS_REPO_DIR`  | first source repository                |
//! | `SOCKS_OUTPUT_DIR`| directory packaged after the build     |
//! | `SOCKS_DEPS_DIR`  | extracted dependency packages          |
//! | `SOCKS_WORK_DIR`  | scratch space kept between builds      |
//! | `SOCKS_MAKE_JOBS` | `external_tools.make.max_build_threads`|

use serde::Deserialize;
use std::collections::BTreeMap;

use crate::core::builder::{parse_options, BlockContext, BuildOutput, Builder};
use crate::core::project::{ScopedConfig, SourceMode};
use crate::error::{BuildError, BuilderError, SocksError};
use crate::infra::container::{
    ContainerConfig, ContainerError, ContainerExecutor, ContainerTool, HostUser, MountConfig,
};
use crate::infra::filesystem;

/// Registered name
pub const NAME: &str = "script";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScriptOptions {
    #[serde(default)]
    commands: Vec<String>,
    #[serde(default)]
    outputs: Vec<String>,
    #[serde(default)]
    requires: BTreeMap<String, Vec<String>>,
}

/// Builder running shell commands
#[derive(Debug, Clone)]
pub struct ScriptBuilder {
    options: ScriptOptions,
    image: Option<String>,
    tool: ContainerTool,
}

impl ScriptBuilder {
    /// Validate the block's options
    pub fn from_scope(scope: &ScopedConfig<'_>) -> Result<Self, BuilderError> {
        let options: ScriptOptions = parse_options(scope)?;
        let missing = |option: &str| BuilderError::MissingOption {
            block: scope.block_id.to_string(),
            builder: NAME.to_string(),
            option: option.to_string(),
        };

        let tool = scope.settings.external_tools.container_tool;
        let image = scope.spec.container.as_ref().map(|c| c.reference());

        // Imported blocks never run their commands
        if scope.spec.source == SourceMode::Build {
            if options.commands.is_empty() {
                return Err(missing("commands"));
            }
            if image.is_none() && tool != ContainerTool::None {
                return Err(missing("container"));
            }
        }
        Ok(Self { options, image, tool })
    }

    /// Mounts, identity and `SOCKS_*` variables shared by builds and shells
    fn environment(&self, ctx: &BlockContext<'_>) -> ContainerConfig {
        let paths = &ctx.scope.paths;
        let repo_dir = ctx
            .sources
            .repos
            .first()
            .map_or_else(|| paths.work.clone(), |r| r.path.clone());

        let mut config = ContainerConfig::new(self.image.clone().unwrap_or_default(), repo_dir.clone())
            .with_mount(MountConfig::same_path(paths.project_dir.clone()))
            .with_user(HostUser::current())
            .with_env("SOCKS_BLOCK", ctx.block_id())
            .with_env("SOCKS_REPO_DIR", repo_dir.to_string_lossy())
            .with_env("SOCKS_OUTPUT_DIR", paths.output.to_string_lossy())
            .with_env("SOCKS_DEPS_DIR", paths.dependencies.to_string_lossy())
            .with_env("SOCKS_WORK_DIR", paths.work.to_string_lossy())
            .with_env(
                "SOCKS_MAKE_JOBS",
                ctx.scope.settings.external_tools.make.max_build_threads.to_string(),
            );
        for repo in &ctx.sources.repos {
            if !repo.path.starts_with(&paths.project_dir) {
                config = config.with_mount(MountConfig::same_path(repo.path.clone()));
            }
        }
        config
    }
}

impl Builder for ScriptBuilder {
    fn kind(&self) -> &str {
        NAME
    }

    fn manifest(&self) -> &[String] {
        &self.options.outputs
    }

    fn requires(&self, dependency: &str) -> &[String] {
        self.options
            .requires
            .get(dependency)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn build(&self, ctx: &BlockContext<'_>) -> Result<BuildOutput, BuildError> {
        let paths = &ctx.scope.paths;
        filesystem::recreate_dir(&paths.output)?;
        filesystem::create_dir_all(&paths.work)?;

        tracing::info!("Building block '{}'", ctx.block_id());
        ContainerExecutor::new(self.tool, self.environment(ctx))?
            .run(&self.options.commands)
            .map_err(|e| match e {
                ContainerError::ExecutionFailed { .. } => BuildError::BuildFailed {
                    block: ctx.block_id().to_string(),
                    error: e.to_string(),
                },
                other => other.into(),
            })?;

        Ok(BuildOutput {
            dir: paths.output.clone(),
        })
    }

    fn start_container(&self, ctx: &BlockContext<'_>) -> Result<(), SocksError> {
        if self.tool == ContainerTool::None {
            return Err(BuildError::from(ContainerError::NoContainerTool).into());
        }
        if self.image.is_none() {
            return Err(BuilderError::MissingOption {
                block: ctx.block_id().to_string(),
                builder: NAME.to_string(),
                option: "container".to_string(),
            }
            .into());
        }
        filesystem::create_dir_all(&ctx.scope.paths.work).map_err(BuildError::from)?;

        ContainerExecutor::new(self.tool, self.environment(ctx))
            .and_then(|executor| executor.start_interactive())
            .map_err(BuildError::from)?;
        Ok(())
    }
}
