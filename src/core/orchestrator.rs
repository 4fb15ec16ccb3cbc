//! Block orchestration
//!
//! Drives every selected block through its states in dependency order:
//!
//! ```text
//! import mode:  Pending -> Importing -> Done
//! build mode:   Pending -> Fetching -> Patching -> Building -> Packaging -> Done
//! ```
//!
//! Any state may end in `Failed`; blocks depending on a failed or skipped
//! block end in `Skipped` without running. Blocks run one at a time, and a
//! block's package is published before any dependent starts.
//!
//! All configuration is validated when the orchestrator is created, before
//! anything touches the disk.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::config::defaults;
use crate::core::artifact::ArtifactStore;
use crate::core::builder::{BlockContext, Builder, BuilderRegistry, SourceHandle};
use crate::core::graph::BlockGraph;
use crate::core::patch::{patch_path, PatchManager};
use crate::core::project::{PatchRef, ProjectConfig, SourceMode};
use crate::core::sources;
use crate::core::yaml_edit;
use crate::error::{BuilderError, ConfigError, PatchError, SocksError};
use crate::infra::filesystem;

/// Operation requested for the selected blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Fetch sources and apply patches
    Prepare,
    /// Prepare, build and publish packages
    Build,
    /// Export new commits as patches and record them in `project.yml`
    CreatePatches,
    /// Remove the blocks' working directories
    Clean,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Prepare => "prepare",
            Self::Build => "build",
            Self::CreatePatches => "create-patches",
            Self::Clean => "clean",
        };
        f.write_str(name)
    }
}

/// Per-block state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    /// Not started
    Pending,
    /// Acquiring a pre-built package
    Importing,
    /// Resolving dependencies and acquiring sources
    Fetching,
    /// Applying configured patches
    Patching,
    /// Builder running
    Building,
    /// Publishing the package
    Packaging,
    /// Finished successfully
    Done,
    /// Stopped by an error
    Failed,
    /// Not run because a dependency did not complete
    Skipped,
}

impl BlockStatus {
    /// Whether the block has finished, successfully or not
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Importing => "importing",
            Self::Fetching => "fetching",
            Self::Patching => "patching",
            Self::Building => "building",
            Self::Packaging => "packaging",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// Outcome for one block
#[derive(Debug)]
pub struct BlockRun {
    /// Block id
    pub id: String,
    /// Final state
    pub status: BlockStatus,
    /// Error that failed the block
    pub error: Option<SocksError>,
    /// Published or imported package
    pub package: Option<PathBuf>,
}

impl BlockRun {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: BlockStatus::Pending,
            error: None,
            package: None,
        }
    }
}

/// Outcome of one orchestrator run, in execution order
#[derive(Debug, Default)]
pub struct RunReport {
    /// Blocks in the order they were processed
    pub blocks: Vec<BlockRun>,
}

impl RunReport {
    /// Whether no block failed or was skipped
    pub fn is_success(&self) -> bool {
        self.blocks.iter().all(|b| b.status == BlockStatus::Done)
    }

    /// Look up a block's outcome
    pub fn get(&self, id: &str) -> Option<&BlockRun> {
        self.blocks.iter().find(|b| b.id == id)
    }

    /// Blocks that failed
    pub fn failed(&self) -> impl Iterator<Item = &BlockRun> {
        self.blocks.iter().filter(|b| b.status == BlockStatus::Failed)
    }
}

/// Callback receiving every state transition
pub type StatusObserver = Box<dyn Fn(&str, BlockStatus) + Send + Sync>;

/// Sequences graph traversal, builders, patches and packages
pub struct BuildOrchestrator<'a> {
    config: &'a ProjectConfig,
    graph: BlockGraph,
    builders: BTreeMap<String, Box<dyn Builder>>,
    store: ArtifactStore,
    patches: PatchManager,
    observer: Option<StatusObserver>,
}

impl fmt::Debug for BuildOrchestrator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildOrchestrator")
            .field("graph", &self.graph)
            .field("builders", &self.builders)
            .finish_non_exhaustive()
    }
}

impl<'a> BuildOrchestrator<'a> {
    /// Validate `config` against `registry` and the dependency graph
    ///
    /// Every declared block gets its builder here, so a bad builder name or
    /// option anywhere in the project fails before any block runs.
    pub fn new(config: &'a ProjectConfig, registry: &BuilderRegistry) -> Result<Self, SocksError> {
        let mut builders = BTreeMap::new();
        for (id, spec) in config.blocks() {
            let scope = config.scoped(id)?;
            let builder = registry.resolve(&spec.builder, &scope)?;

            match spec.source {
                SourceMode::Import if spec.project.import_src.is_none() => {
                    return Err(missing_field(id, "project.import_src"));
                }
                SourceMode::Build if builder.requires_sources() && spec.project.build_srcs.is_none() => {
                    return Err(missing_field(id, "project.build_srcs"));
                }
                _ => {}
            }
            builders.insert(id.to_string(), builder);
        }

        let graph = BlockGraph::build(config)?;
        let store = ArtifactStore::new(config.project_dir(), &config.settings().project.name);

        Ok(Self {
            config,
            graph,
            builders,
            store,
            patches: PatchManager::new(),
            observer: None,
        })
    }

    /// Use `store` for packages
    #[must_use]
    pub fn with_store(mut self, store: ArtifactStore) -> Self {
        self.store = store;
        self
    }

    /// Report every state transition to `observer`
    #[must_use]
    pub fn with_observer(mut self, observer: StatusObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Dependency graph of the project
    pub fn graph(&self) -> &BlockGraph {
        &self.graph
    }

    /// Blocks `action` would process for `selected`, in execution order
    pub fn plan(&self, action: Action, selected: &[String], with_deps: bool) -> Result<Vec<String>, SocksError> {
        let order = match action {
            Action::Prepare | Action::Build if with_deps => self.graph.order(selected)?,
            Action::Clean => {
                let mut order = self.graph.order_only(selected)?;
                order.reverse();
                order
            }
            _ => self.graph.order_only(selected)?,
        };
        Ok(order)
    }

    /// Run `action` on `selected`
    ///
    /// Block failures are recorded in the report; only an invalid selection
    /// returns an error, before anything ran.
    pub async fn run(&self, action: Action, selected: &[String], with_deps: bool) -> Result<RunReport, SocksError> {
        let order = self.plan(action, selected, with_deps)?;
        tracing::info!("Running {} for: {}", action, order.join(", "));

        let mut report = RunReport::default();
        for id in &order {
            let mut run = BlockRun::new(id);

            let blocked = self.graph.providers(id).into_iter().find(|provider| {
                report
                    .get(provider)
                    .is_some_and(|r| matches!(r.status, BlockStatus::Failed | BlockStatus::Skipped))
            });
            if let Some(provider) = blocked.filter(|_| action != Action::Clean) {
                tracing::warn!("Skipping '{}': dependency '{}' did not complete", id, provider);
                self.transition(&mut run, BlockStatus::Skipped);
                report.blocks.push(run);
                continue;
            }

            match self.execute(action, id, &mut run).await {
                Ok(()) => self.transition(&mut run, BlockStatus::Done),
                Err(e) => {
                    tracing::error!("Block '{}' failed while {}: {}", id, run.status, e);
                    self.transition(&mut run, BlockStatus::Failed);
                    run.error = Some(e);
                }
            }
            report.blocks.push(run);
        }
        Ok(report)
    }

    async fn execute(&self, action: Action, id: &str, run: &mut BlockRun) -> Result<(), SocksError> {
        let spec = self.config.block(id).ok_or_else(|| ConfigError::UnknownBlock { block: id.to_string() })?;
        let builder = self.builder(id)?;
        let mut ctx = BlockContext::new(self.config.scoped(id)?);

        match (action, spec.source) {
            (Action::Clean, _) => {
                filesystem::remove_dir_all(&ctx.scope.paths.temp)?;
                tracing::info!("Removed {}", ctx.scope.paths.temp.display());
                Ok(())
            }
            (Action::CreatePatches, SourceMode::Import) => {
                tracing::info!("Block '{}' is imported; no patches to create", id);
                Ok(())
            }
            (Action::CreatePatches, SourceMode::Build) => blocking(|| self.create_patches(&ctx, builder)),
            (Action::Prepare, SourceMode::Import) => {
                tracing::info!("Block '{}' is imported; nothing to prepare", id);
                Ok(())
            }
            (Action::Build, SourceMode::Import) => {
                let uri = spec
                    .project
                    .import_src
                    .as_deref()
                    .ok_or_else(|| missing_field(id, "project.import_src"))?;
                let marker = self.begin(&ctx)?;
                self.transition(run, BlockStatus::Importing);
                let outcome = self
                    .store
                    .import(id, &ctx.scope.paths, uri, builder.manifest())
                    .await?;
                run.package = Some(outcome.package);
                filesystem::remove_file(&marker)?;
                Ok(())
            }
            (Action::Prepare | Action::Build, SourceMode::Build) => {
                let marker = self.begin(&ctx)?;

                self.transition(run, BlockStatus::Fetching);
                if action == Action::Build {
                    self.resolve_dependencies(&mut ctx, builder)?;
                }
                ctx.sources = blocking(|| builder.prepare(&ctx))?;

                self.transition(run, BlockStatus::Patching);
                blocking(|| self.apply_patches(&ctx))?;

                if action == Action::Build {
                    self.transition(run, BlockStatus::Building);
                    let output = blocking(|| builder.build(&ctx))?;

                    self.transition(run, BlockStatus::Packaging);
                    let package = blocking(|| self.store.publish(id, &output.dir, builder.manifest()))?;
                    run.package = Some(package);
                }

                filesystem::remove_file(&marker)?;
                Ok(())
            }
        }
    }

    /// Mark the block as in progress, warning if an earlier run was cut short
    fn begin(&self, ctx: &BlockContext<'_>) -> Result<PathBuf, SocksError> {
        let marker = ctx.scope.paths.temp.join(defaults::IN_PROGRESS_MARKER);
        if marker.exists() {
            tracing::warn!(
                "Previous run of block '{}' was interrupted; resuming (clean the block to start over)",
                ctx.block_id()
            );
        }
        filesystem::create_dir_all(&ctx.scope.paths.temp)?;
        filesystem::write_file(&marker, "")?;
        Ok(marker)
    }

    fn resolve_dependencies(&self, ctx: &mut BlockContext<'_>, builder: &dyn Builder) -> Result<(), SocksError> {
        let id = ctx.block_id().to_string();
        let spec = ctx.scope.spec;
        for (dependency, pattern) in &spec.project.dependencies {
            let mut required: Vec<String> = self
                .builders
                .get(dependency)
                .map(|provider| provider.manifest().to_vec())
                .unwrap_or_default();
            for extra in builder.requires(dependency) {
                if !required.contains(extra) {
                    required.push(extra.clone());
                }
            }

            let resolved = self
                .store
                .resolve_dependency(&id, &ctx.scope.paths, dependency, pattern, &required)?;
            ctx.dependencies.insert(dependency.clone(), resolved);
        }
        Ok(())
    }

    fn apply_patches(&self, ctx: &BlockContext<'_>) -> Result<(), SocksError> {
        let configured = &ctx.scope.spec.project.patches;
        if configured.is_empty() {
            return Ok(());
        }

        // Group patches per repository, keeping list order within each
        let mut per_repo: Vec<(PathBuf, Vec<PathBuf>)> = Vec::new();
        for patch in configured {
            let repo = ctx.sources.repo(patch.project()).ok_or_else(|| PatchError::UnknownProject {
                block: ctx.block_id().to_string(),
                project: patch.project().unwrap_or_default().to_string(),
                patch: patch.file_name().to_string(),
            })?;
            if repo.local_override {
                tracing::warn!(
                    "Not applying '{}' to local source {}",
                    patch.file_name(),
                    repo.path.display()
                );
                continue;
            }

            let file = patch_path(&ctx.scope.paths.patches, patch);
            match per_repo.iter_mut().find(|(path, _)| *path == repo.path) {
                Some((_, files)) => files.push(file),
                None => per_repo.push((repo.path.clone(), vec![file])),
            }
        }

        for (repo, files) in per_repo {
            let outcome = self.patches.apply(&repo, &files)?;
            tracing::info!(
                "Applied {} patch(es) to {} ({} already present)",
                outcome.applied.len(),
                repo.display(),
                outcome.skipped.len()
            );
        }
        Ok(())
    }

    fn create_patches(&self, ctx: &BlockContext<'_>, builder: &dyn Builder) -> Result<(), SocksError> {
        let prepared = builder.prepare(ctx)?;
        let managed = SourceHandle {
            repos: prepared.repos.into_iter().filter(|r| !r.local_override).collect(),
        };

        let created = builder.create_patches(ctx, &managed)?;
        if created.is_empty() {
            tracing::info!("No new patches for block '{}'", ctx.block_id());
            return Ok(());
        }

        let mut patches: Vec<PatchRef> = ctx.scope.spec.project.patches.clone();
        for file in &created {
            let patch = file.to_patch_ref();
            if !patches.contains(&patch) {
                patches.push(patch);
            }
        }
        yaml_edit::persist_patches(&self.config.root_file(), ctx.block_id(), &patches)
            .map_err(PatchError::from)?;

        tracing::info!(
            "Created {} patch(es) for block '{}' in {}",
            created.len(),
            ctx.block_id(),
            ctx.scope.paths.patches.display()
        );
        Ok(())
    }

    /// Open an interactive shell in the build environment of block `id`
    ///
    /// Sources already on disk are mounted as they are; nothing is fetched
    /// or patched, so a block stopped by a failing patch can be fixed by hand.
    pub fn start_container(&self, id: &str) -> Result<(), SocksError> {
        let builder = self.builder(id)?;
        let mut ctx = BlockContext::new(self.config.scoped(id)?);
        if ctx.scope.spec.source == SourceMode::Import {
            return Err(BuilderError::UnsupportedCommand {
                block: id.to_string(),
                builder: builder.kind().to_string(),
                command: "start-container".to_string(),
            }
            .into());
        }

        ctx.sources = sources::locate(&ctx.scope);
        if ctx.sources.repos.is_empty() && builder.requires_sources() {
            tracing::warn!("Sources of '{}' are not fetched yet; run 'prepare' first to get them", id);
        }
        blocking(|| builder.start_container(&ctx))
    }

    fn builder(&self, id: &str) -> Result<&dyn Builder, SocksError> {
        self.builders
            .get(id)
            .map(|builder| &**builder)
            .ok_or_else(|| ConfigError::UnknownBlock { block: id.to_string() }.into())
    }

    fn transition(&self, run: &mut BlockRun, status: BlockStatus) {
        tracing::debug!("Block '{}': {} -> {}", run.id, run.status, status);
        run.status = status;
        if let Some(observer) = &self.observer {
            observer(&run.id, status);
        }
    }
}

fn missing_field(block: &str, field: &str) -> SocksError {
    ConfigError::MissingField {
        block: block.to_string(),
        field: field.to_string(),
    }
    .into()
}

/// Run a step that waits on git, a container or the filesystem
///
/// On a multi-threaded runtime the worker hands its other tasks off first.
/// A current-thread runtime cannot do that and runs the step inline.
fn blocking<T>(step: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(step)
        }
        _ => step(),
    }
}
