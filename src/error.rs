//! Error types for socks
//!
//! Domain-specific error types using thiserror. Each block-level failure
//! carries the identifier the operator needs to act on: a file path, a
//! configuration key, a patch name or a package member.

use std::path::PathBuf;
use thiserror::Error;

use crate::infra::container::ContainerError;
use crate::infra::git::GitError;

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Root configuration file missing
    #[error("Configuration not found at '{path}'")]
    NotFound { path: PathBuf },

    /// IO error while reading a document
    #[error("IO error for '{path}': {error}")]
    IoError { path: PathBuf, error: String },

    /// Document is not valid YAML or not a mapping
    #[error("Failed to parse '{path}': {error}")]
    ParseError { path: PathBuf, error: String },

    /// Malformed `import` directive
    #[error("Invalid import list in '{path}': {error}")]
    InvalidImport { path: PathBuf, error: String },

    /// Imported document could not be located
    #[error("Import '{import}' from '{importer}' not found in any search directory")]
    ImportNotFound { import: String, importer: PathBuf },

    /// Import graph contains a cycle
    #[error("Circular import detected: {}", cycle.join(" -> "))]
    ImportCycle { cycle: Vec<String> },

    /// A mapping was merged into a scalar or list (or vice versa)
    #[error("Type conflict while merging key '{key}': cannot merge {overlay} into {base}")]
    MergeConflict {
        key: String,
        base: &'static str,
        overlay: &'static str,
    },

    /// Reference token pointing at a missing key
    #[error("Unresolved reference '{{{{{reference}}}}}' in '{key}'")]
    UnresolvedReference { reference: String, key: String },

    /// Reference chain deeper than the recursion bound
    #[error("Reference nesting in '{key}' exceeds depth {depth} (self-reference?)")]
    ReferenceTooDeep { key: String, depth: usize },

    /// Mapping or list referenced from inside a larger string
    #[error("Reference '{{{{{reference}}}}}' in '{key}' does not point at a scalar value")]
    NonScalarReference { reference: String, key: String },

    /// A global setting has an invalid value
    #[error("Invalid setting '{key}': {error}")]
    InvalidSetting { key: String, error: String },

    /// A block entry does not match the block schema
    #[error("Invalid configuration for block '{block}': {error}")]
    InvalidBlock { block: String, error: String },

    /// Block is missing a field its source mode requires
    #[error("Block '{block}' is missing required field '{field}'")]
    MissingField { block: String, field: String },

    /// Block identifier collides with a reserved word
    #[error("Block identifier '{block}' is reserved")]
    ReservedBlockId { block: String },

    /// Selected block is not declared
    #[error("Block '{block}' is not declared in the configuration")]
    UnknownBlock { block: String },

    /// Project requires another tool version
    #[error("Project requires socks {required}, but this is version {actual}")]
    IncompatibleVersion { required: String, actual: String },

    /// Writing values back into the configuration failed
    #[error("Failed to update '{path}': {error}")]
    WriteBack { path: PathBuf, error: String },
}

/// Block dependency graph errors
#[derive(Error, Debug)]
pub enum GraphError {
    /// Dependency cycle between declared blocks
    #[error("Circular block dependency detected: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    /// Dependency names a block that is expected but not declared
    #[error("Block '{block}' depends on '{dependency}', which is not a declared block")]
    UnknownDependency { block: String, dependency: String },

    /// Selection names an undeclared block
    #[error("Block '{block}' is not declared in the configuration")]
    UnknownBlock { block: String },
}

/// Builder lookup and option validation errors
#[derive(Error, Debug)]
pub enum BuilderError {
    /// No implementation registered for the name
    #[error("Unknown builder '{name}'")]
    UnknownBuilder { name: String },

    /// Builder-specific options failed validation
    #[error("Invalid options for builder '{builder}' in block '{block}': {error}")]
    InvalidOptions {
        block: String,
        builder: String,
        error: String,
    },

    /// A required option is absent or empty
    #[error("Builder '{builder}' in block '{block}' requires option '{option}'")]
    MissingOption {
        block: String,
        builder: String,
        option: String,
    },

    /// The block's builder does not offer the command
    #[error("Block '{block}' (builder '{builder}') does not support '{command}'")]
    UnsupportedCommand {
        block: String,
        builder: String,
        command: String,
    },
}

/// Source and artifact retrieval errors
#[derive(Error, Debug)]
pub enum FetchError {
    /// Block in build mode without any source information
    #[error("Block '{block}' has no sources configured (project.build_srcs)")]
    NoSources { block: String },

    /// Remote source without a branch
    #[error("Source '{uri}' of block '{block}' has no branch")]
    MissingBranch { block: String, uri: String },

    /// URI scheme not supported for the operation
    #[error("Unsupported URI scheme in '{uri}'")]
    UnsupportedScheme { uri: String },

    /// Local override path does not exist
    #[error("Local source '{path}' of block '{block}' does not exist")]
    MissingLocalSource { block: String, path: PathBuf },

    /// Cloning or checking out a repository failed
    #[error("Failed to fetch sources of block '{block}': {error}")]
    Git {
        block: String,
        #[source]
        error: GitError,
    },

    /// Artifact to import is not a tar.gz archive
    #[error("Pre-built package '{uri}' is not a .tar.gz or .tgz archive")]
    NotAnArchive { uri: String },

    /// Local artifact missing or unreadable
    #[error("Failed to read pre-built package '{uri}': {error}")]
    Artifact { uri: String, error: String },

    /// Remote artifact download failed
    #[error("Failed to download pre-built package: {0}")]
    Download(#[from] DownloadError),

    /// Dependency glob matched nothing
    #[error("No package for dependency '{dependency}' of block '{block}' matches '{pattern}'")]
    DependencyNotFound {
        block: String,
        dependency: String,
        pattern: String,
    },

    /// Dependency glob matched several packages
    #[error("Dependency '{dependency}' of block '{block}' matches {count} packages for '{pattern}', expected exactly one")]
    AmbiguousDependency {
        block: String,
        dependency: String,
        pattern: String,
        count: usize,
    },

    /// Dependency glob is not a valid pattern
    #[error("Invalid dependency pattern '{pattern}': {error}")]
    InvalidPattern { pattern: String, error: String },

    /// Filesystem error during acquisition
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
}

/// Patch application and generation errors
#[derive(Error, Debug)]
pub enum PatchError {
    /// Patch file missing from the patch directory
    #[error("Patch '{patch}' not found at '{path}'")]
    NotFound { patch: String, path: PathBuf },

    /// A patch did not apply cleanly
    #[error("Patch '{patch}' failed to apply to '{repo}' (repository left at '{last_good}'): {error}")]
    ApplyFailed {
        patch: String,
        repo: PathBuf,
        last_good: String,
        error: String,
    },

    /// Configured patch list no longer matches what the repository holds
    #[error("Patches recorded in '{repo}' diverge from the configured list at '{patch}'; clean the block and prepare again")]
    Diverged { repo: PathBuf, patch: String },

    /// Patch refers to an unknown sub-project
    #[error("Patch '{patch}' of block '{block}' refers to unknown project '{project}'")]
    UnknownProject {
        block: String,
        project: String,
        patch: String,
    },

    /// Repository has not been prepared yet
    #[error("Repository '{repo}' has no baseline branch; run prepare first")]
    NotPrepared { repo: PathBuf },

    /// Underlying git invocation failed
    #[error("Git error in '{repo}': {error}")]
    Git {
        repo: PathBuf,
        #[source]
        error: GitError,
    },

    /// Patch list could not be persisted
    #[error(transparent)]
    Persist(#[from] ConfigError),

    /// Filesystem error
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
}

/// Build step errors
#[derive(Error, Debug)]
pub enum BuildError {
    /// Build command exited unsuccessfully
    #[error("Build of block '{block}' failed: {error}")]
    BuildFailed { block: String, error: String },

    /// Container runtime failure
    #[error(transparent)]
    Container(#[from] ContainerError),

    /// Filesystem error
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
}

/// Block package errors
#[derive(Error, Debug)]
pub enum PackagingError {
    /// Required manifest member absent
    #[error("Package '{package}' is missing required member '{member}'")]
    MissingMember { package: PathBuf, member: String },

    /// Nothing to package
    #[error("Output directory '{path}' of block '{block}' is empty")]
    EmptyOutput { block: String, path: PathBuf },

    /// Manifest pattern is not a valid regular expression
    #[error("Invalid manifest pattern '{pattern}': {error}")]
    InvalidPattern { pattern: String, error: String },

    /// Archive could not be written or read
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// Filesystem error
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
}

/// Archive read/write errors
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Failed to create archive
    #[error("Failed to write archive '{path}': {error}")]
    Write { path: PathBuf, error: String },

    /// Failed to read archive
    #[error("Failed to read archive '{path}': {error}")]
    Read { path: PathBuf, error: String },

    /// Failed to unpack archive
    #[error("Failed to unpack '{path}' into '{dest}': {error}")]
    Unpack {
        path: PathBuf,
        dest: PathBuf,
        error: String,
    },
}

/// Download errors
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Network error
    #[error("Network error downloading '{url}': {error}")]
    NetworkError { url: String, error: String },

    /// IO error
    #[error("IO error for '{path}': {error}")]
    IoError { path: PathBuf, error: String },
}

/// Filesystem errors
#[derive(Error, Debug)]
pub enum FilesystemError {
    /// Failed to create directory
    #[error("Failed to create directory '{path}': {error}")]
    CreateDir { path: PathBuf, error: String },

    /// Failed to remove directory
    #[error("Failed to remove directory '{path}': {error}")]
    RemoveDir { path: PathBuf, error: String },

    /// Failed to remove file
    #[error("Failed to remove file '{path}': {error}")]
    RemoveFile { path: PathBuf, error: String },

    /// Failed to write file
    #[error("Failed to write file '{path}': {error}")]
    WriteFile { path: PathBuf, error: String },

    /// Failed to read file
    #[error("Failed to read file '{path}': {error}")]
    ReadFile { path: PathBuf, error: String },

    /// Failed to copy file
    #[error("Failed to copy '{from}' to '{to}': {error}")]
    CopyFile {
        from: PathBuf,
        to: PathBuf,
        error: String,
    },
}

/// Top-level socks error type
#[derive(Error, Debug)]
pub enum SocksError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Graph error
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Builder error
    #[error("Builder error: {0}")]
    Builder(#[from] BuilderError),

    /// Fetch error
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Patch error
    #[error("Patch error: {0}")]
    Patch(#[from] PatchError),

    /// Build error
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// Packaging error
    #[error("Packaging error: {0}")]
    Packaging(#[from] PackagingError),

    /// Filesystem error
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] FilesystemError),
}

impl SocksError {
    /// Name of the error category, as reported to the operator
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "ConfigError",
            Self::Graph(_) => "GraphError",
            Self::Builder(_) => "BuilderError",
            Self::Fetch(_) => "FetchError",
            Self::Patch(_) => "PatchError",
            Self::Build(_) | Self::Filesystem(_) => "BuildError",
            Self::Packaging(_) => "PackagingError",
        }
    }

    /// Whether the error aborts the whole invocation rather than one block
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Graph(_) | Self::Builder(_))
    }
}
