//! Builder contract and registry
//!
//! A [`Builder`] implements how one kind of block is produced. The
//! orchestrator only talks to builders through this trait, and new kinds
//! are added by registering a factory with the [`BuilderRegistry`].

use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::core::patch::PatchManager;
use crate::core::project::{PatchRef, ScopedConfig};
use crate::core::sources;
use crate::error::{BuildError, BuilderError, FetchError, PatchError, SocksError};

/// A fetched (or locally overridden) source repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoHandle {
    /// Sub-project name for multi-repository blocks
    pub name: Option<String>,
    /// Absolute path of the working tree
    pub path: PathBuf,
    /// Local directory used in place rather than a managed clone
    pub local_override: bool,
}

/// Sources acquired by [`Builder::prepare`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceHandle {
    /// Repositories in declaration order
    pub repos: Vec<RepoHandle>,
}

impl SourceHandle {
    /// Repository for a patch's sub-project (`None` selects the first)
    pub fn repo(&self, project: Option<&str>) -> Option<&RepoHandle> {
        match project {
            None => self.repos.first(),
            Some(name) => self.repos.iter().find(|r| r.name.as_deref() == Some(name)),
        }
    }
}

/// A patch file written by [`Builder::create_patches`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchFile {
    /// Sub-project, for multi-repository blocks
    pub project: Option<String>,
    /// File name as referenced from the configuration
    pub file_name: String,
    /// Absolute path of the written file
    pub path: PathBuf,
}

impl PatchFile {
    /// Configuration entry referencing this patch
    pub fn to_patch_ref(&self) -> PatchRef {
        match &self.project {
            None => PatchRef::File(self.file_name.clone()),
            Some(project) => PatchRef::Project {
                project: project.clone(),
                patch: self.file_name.clone(),
            },
        }
    }
}

/// A validated dependency package handed to a consumer's builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDependency {
    /// Provider block id (or external dependency key)
    pub provider: String,
    /// Absolute path of the package archive
    pub package: PathBuf,
    /// Directory the package was extracted into
    pub extracted: PathBuf,
}

/// Everything a builder may see while working on its block
#[derive(Debug, Clone)]
pub struct BlockContext<'a> {
    /// Global settings plus this block's configuration
    pub scope: ScopedConfig<'a>,
    /// Validated dependency packages, by dependency key
    pub dependencies: BTreeMap<String, ResolvedDependency>,
    /// Sources returned by `prepare`
    pub sources: SourceHandle,
}

impl<'a> BlockContext<'a> {
    /// Create a context without dependencies or sources
    pub fn new(scope: ScopedConfig<'a>) -> Self {
        Self {
            scope,
            dependencies: BTreeMap::new(),
            sources: SourceHandle::default(),
        }
    }

    /// Block identifier
    pub fn block_id(&self) -> &str {
        self.scope.block_id
    }
}

/// Files staged by [`Builder::build`] for packaging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    /// Directory whose contents become the block package
    pub dir: PathBuf,
}

/// Capability contract every block builder implements
pub trait Builder: fmt::Debug + Send + Sync {
    /// Registered builder name
    fn kind(&self) -> &str;

    /// Regular expressions every member of this block's package must satisfy
    /// at least once
    fn manifest(&self) -> &[String];

    /// Additional members this block needs in the package of `dependency`
    fn requires(&self, _dependency: &str) -> &[String] {
        &[]
    }

    /// Whether build mode needs `project.build_srcs`
    fn requires_sources(&self) -> bool {
        true
    }

    /// Acquire or validate the block's sources; idempotent
    fn prepare(&self, ctx: &BlockContext<'_>) -> Result<SourceHandle, FetchError> {
        sources::prepare(&ctx.scope)
    }

    /// Export commits made on top of the baseline as patch files
    fn create_patches(
        &self,
        ctx: &BlockContext<'_>,
        sources: &SourceHandle,
    ) -> Result<Vec<PatchFile>, PatchError> {
        let manager = PatchManager::new();
        let multi = sources.repos.len() > 1;
        let mut files = Vec::new();

        for repo in &sources.repos {
            let (project, out_dir) = match (&repo.name, multi) {
                (Some(name), true) => (Some(name.clone()), ctx.scope.paths.patches.join(name)),
                _ => (None, ctx.scope.paths.patches.clone()),
            };
            for file_name in manager.create_patches(&repo.path, &out_dir)? {
                files.push(PatchFile {
                    project: project.clone(),
                    path: out_dir.join(&file_name),
                    file_name,
                });
            }
        }
        Ok(files)
    }

    /// Produce the block's outputs from its sources and dependencies
    fn build(&self, ctx: &BlockContext<'_>) -> Result<BuildOutput, BuildError>;

    /// Open an interactive shell in the block's build environment
    fn start_container(&self, ctx: &BlockContext<'_>) -> Result<(), SocksError> {
        Err(BuilderError::UnsupportedCommand {
            block: ctx.block_id().to_string(),
            builder: self.kind().to_string(),
            command: "start-container".to_string(),
        }
        .into())
    }
}

/// Creates a builder for one block, validating its options
pub type BuilderFactory =
    Box<dyn Fn(&ScopedConfig<'_>) -> Result<Box<dyn Builder>, BuilderError> + Send + Sync>;

/// Maps builder names to implementations
#[derive(Default)]
pub struct BuilderRegistry {
    factories: BTreeMap<String, BuilderFactory>,
}

impl fmt::Debug for BuilderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuilderRegistry")
            .field("builders", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl BuilderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the bundled builders
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        crate::core::builders::register_defaults(&mut registry);
        registry
    }

    /// Register (or replace) a builder
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&ScopedConfig<'_>) -> Result<Box<dyn Builder>, BuilderError> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Instantiate the builder `name` for the block in `scope`
    pub fn resolve(&self, name: &str, scope: &ScopedConfig<'_>) -> Result<Box<dyn Builder>, BuilderError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| BuilderError::UnknownBuilder {
                name: name.to_string(),
            })?;
        factory(scope)
    }
}

/// Deserialize a block's builder-specific options into `T`
///
/// Option structs should use `#[serde(deny_unknown_fields)]` so typos are
/// caught before anything runs.
pub fn parse_options<T: DeserializeOwned>(scope: &ScopedConfig<'_>) -> Result<T, BuilderError> {
    serde_yaml::from_value(scope.spec.project.options_value()).map_err(|e| {
        BuilderError::InvalidOptions {
            block: scope.block_id.to_string(),
            builder: scope.spec.builder.clone(),
            error: e.to_string(),
        }
    })
}
