//! Resolved project configuration
//!
//! Typed view over the merged document produced by
//! [`ConfigResolver`](crate::core::resolver::ConfigResolver). A
//! [`ProjectConfig`] is immutable: builders only ever see a
//! [`ScopedConfig`] holding the global settings plus their own block.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::defaults;
use crate::error::ConfigError;
use crate::infra::container::ContainerTool;

/// Global project settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalSettings {
    /// Project identity
    pub project: ProjectInfo,
    /// Host tools used by builders
    #[serde(default)]
    pub external_tools: ExternalTools,
}

/// `project` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    /// Project name, part of every package file name
    pub name: String,
    /// Free-form project type (e.g. `zynqmp`)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Required tool version: `any` or a semver requirement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socks_version: Option<String>,
}

/// `external_tools` section
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExternalTools {
    /// Container runtime for build environments
    #[serde(default)]
    pub container_tool: ContainerTool,
    /// Settings forwarded to make-based builds
    #[serde(default)]
    pub make: MakeSettings,
}

/// `external_tools.make` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MakeSettings {
    /// Parallel jobs passed to build commands
    #[serde(default = "default_build_threads")]
    pub max_build_threads: usize,
}

impl Default for MakeSettings {
    fn default() -> Self {
        Self {
            max_build_threads: default_build_threads(),
        }
    }
}

fn default_build_threads() -> usize {
    num_cpus::get()
}

/// Whether a block is built locally or imported pre-built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Fetch, patch and build locally
    Build,
    /// Import a pre-built block package
    Import,
}

/// Per-block configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlockSpec {
    /// Build or import
    pub source: SourceMode,
    /// Registered builder name
    pub builder: String,
    /// Sources, patches, dependencies and builder-specific options
    #[serde(default)]
    pub project: BlockProject,
    /// Build environment image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerSpec>,
}

/// `blocks.<id>.project` section
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BlockProject {
    /// Source repositories (or local overrides)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_srcs: Option<BuildSources>,
    /// Pre-built package URI for import mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_src: Option<String>,
    /// Patches applied in order after fetching
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<PatchRef>,
    /// Provider block id to package path glob, relative to the project root
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    /// Remaining keys, validated by the block's builder
    #[serde(flatten)]
    pub options: BTreeMap<String, Value>,
}

impl BlockProject {
    /// Builder-specific options as a YAML mapping
    pub fn options_value(&self) -> Value {
        let mut mapping = Mapping::new();
        for (key, value) in &self.options {
            mapping.insert(Value::from(key.as_str()), value.clone());
        }
        Value::Mapping(mapping)
    }

    /// Configured sources in declaration order
    pub fn sources(&self) -> Vec<&SourceSpec> {
        match &self.build_srcs {
            None => Vec::new(),
            Some(BuildSources::Single(spec)) => vec![spec],
            Some(BuildSources::Many(specs)) => specs.iter().collect(),
        }
    }
}

/// One source or a list of sources for multi-repository builders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BuildSources {
    /// Single repository
    Single(SourceSpec),
    /// Several named repositories
    Many(Vec<SourceSpec>),
}

/// A source repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSpec {
    /// Sub-project name, used by `{project, patch}` patch references
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// `https://`, `http://`, `ssh://` repository or `file://` local override
    pub source: String,
    /// Branch to check out (remote sources only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl SourceSpec {
    /// Whether this source is a local directory used in place
    pub fn is_local(&self) -> bool {
        self.source.starts_with("file://")
    }
}

/// Reference to a patch file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatchRef {
    /// Patch for a single-repository block
    File(String),
    /// Patch for one sub-project of a multi-repository block
    Project {
        /// Sub-project name
        project: String,
        /// Patch file name
        patch: String,
    },
}

impl PatchRef {
    /// Patch file name
    pub fn file_name(&self) -> &str {
        match self {
            Self::File(name) | Self::Project { patch: name, .. } => name,
        }
    }

    /// Sub-project the patch belongs to, if any
    pub fn project(&self) -> Option<&str> {
        match self {
            Self::File(_) => None,
            Self::Project { project, .. } => Some(project),
        }
    }
}

/// Container image and tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerSpec {
    /// Image name
    pub image: String,
    /// Image tag
    #[serde(default = "default_tag")]
    pub tag: String,
}

impl ContainerSpec {
    /// `image:tag` reference
    pub fn reference(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

fn default_tag() -> String {
    defaults::DEFAULT_CONTAINER_TAG.to_string()
}

/// Fully resolved, immutable project configuration
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    project_dir: PathBuf,
    document: Value,
    settings: GlobalSettings,
    blocks: Vec<(String, BlockSpec)>,
}

impl ProjectConfig {
    /// Build the typed configuration from a merged, reference-free document
    pub fn from_document(document: Value, project_dir: PathBuf) -> Result<Self, ConfigError> {
        let settings: GlobalSettings =
            serde_yaml::from_value(document.clone()).map_err(|e| ConfigError::InvalidSetting {
                key: "project".to_string(),
                error: e.to_string(),
            })?;
        validate_project_name(&settings.project.name)?;
        check_tool_version(&settings, env!("CARGO_PKG_VERSION"))?;

        let mut blocks = Vec::new();
        match document.get("blocks") {
            None | Some(Value::Null) => {}
            Some(Value::Mapping(mapping)) => {
                for (key, value) in mapping {
                    let id = key.as_str().ok_or_else(|| ConfigError::InvalidSetting {
                        key: "blocks".to_string(),
                        error: format!("block identifiers must be strings, found {key:?}"),
                    })?;
                    validate_block_id(id)?;
                    let spec: BlockSpec = serde_yaml::from_value(value.clone()).map_err(|e| {
                        ConfigError::InvalidBlock {
                            block: id.to_string(),
                            error: e.to_string(),
                        }
                    })?;
                    blocks.push((id.to_string(), spec));
                }
            }
            Some(_) => {
                return Err(ConfigError::InvalidSetting {
                    key: "blocks".to_string(),
                    error: "expected a mapping of block id to block configuration".to_string(),
                })
            }
        }

        Ok(Self {
            project_dir,
            document,
            settings,
            blocks,
        })
    }

    /// Project root directory
    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Path of the root configuration file
    pub fn root_file(&self) -> PathBuf {
        self.project_dir.join(defaults::ROOT_CONFIG_FILE)
    }

    /// Full resolved document
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Global settings
    pub fn settings(&self) -> &GlobalSettings {
        &self.settings
    }

    /// Blocks in declaration order
    pub fn blocks(&self) -> impl Iterator<Item = (&str, &BlockSpec)> {
        self.blocks.iter().map(|(id, spec)| (id.as_str(), spec))
    }

    /// Block identifiers in declaration order
    pub fn block_ids(&self) -> Vec<&str> {
        self.blocks.iter().map(|(id, _)| id.as_str()).collect()
    }

    /// Look up a block
    pub fn block(&self, id: &str) -> Option<&BlockSpec> {
        self.blocks.iter().find(|(b, _)| b == id).map(|(_, spec)| spec)
    }

    /// Read-only view for a single block's builder
    pub fn scoped(&self, id: &str) -> Result<ScopedConfig<'_>, ConfigError> {
        let (block_id, spec) = self
            .blocks
            .iter()
            .find(|(b, _)| b == id)
            .ok_or_else(|| ConfigError::UnknownBlock { block: id.to_string() })?;
        Ok(ScopedConfig {
            block_id,
            settings: &self.settings,
            spec,
            paths: BlockPaths::new(&self.project_dir, block_id),
        })
    }

    /// Render the full document as YAML
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.document).map_err(|e| ConfigError::ParseError {
            path: self.root_file(),
            error: e.to_string(),
        })
    }
}

/// Global settings plus one block's own configuration
#[derive(Debug, Clone)]
pub struct ScopedConfig<'a> {
    /// Block identifier
    pub block_id: &'a str,
    /// Global settings
    pub settings: &'a GlobalSettings,
    /// The block's configuration
    pub spec: &'a BlockSpec,
    /// The block's working directories
    pub paths: BlockPaths,
}

impl ScopedConfig<'_> {
    /// Render the scoped view as YAML
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        #[derive(Serialize)]
        struct View<'v> {
            #[serde(flatten)]
            settings: &'v GlobalSettings,
            blocks: BTreeMap<&'v str, &'v BlockSpec>,
        }

        let view = View {
            settings: self.settings,
            blocks: BTreeMap::from([(self.block_id, self.spec)]),
        };
        serde_yaml::to_string(&view).map_err(|e| ConfigError::InvalidBlock {
            block: self.block_id.to_string(),
            error: e.to_string(),
        })
    }
}

/// Working directories of one block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPaths {
    /// Project root
    pub project_dir: PathBuf,
    /// `src/<block>/patches`
    pub patches: PathBuf,
    /// `temp/<block>`
    pub temp: PathBuf,
    /// `temp/<block>/repo`
    pub repo: PathBuf,
    /// `temp/<block>/download`
    pub download: PathBuf,
    /// `temp/<block>/work`
    pub work: PathBuf,
    /// `temp/<block>/output`
    pub output: PathBuf,
    /// `temp/<block>/dependencies`
    pub dependencies: PathBuf,
}

impl BlockPaths {
    /// Derive the directories of `block_id` under `project_dir`
    pub fn new(project_dir: &Path, block_id: &str) -> Self {
        let temp = project_dir.join(defaults::TEMP_DIR).join(block_id);
        Self {
            project_dir: project_dir.to_path_buf(),
            patches: project_dir.join(defaults::SRC_DIR).join(block_id).join("patches"),
            repo: temp.join("repo"),
            download: temp.join("download"),
            work: temp.join("work"),
            output: temp.join("output"),
            dependencies: temp.join("dependencies"),
            temp,
        }
    }
}

/// Names end up as path segments under `temp/` and in package file names
fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn validate_project_name(name: &str) -> Result<(), ConfigError> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(ConfigError::InvalidSetting {
            key: "project.name".to_string(),
            error: format!("'{name}' may only contain letters, digits, '-' and '_'"),
        })
    }
}

fn validate_block_id(id: &str) -> Result<(), ConfigError> {
    if id == defaults::ALL_BLOCKS {
        return Err(ConfigError::ReservedBlockId { block: id.to_string() });
    }
    if is_identifier(id) {
        Ok(())
    } else {
        Err(ConfigError::InvalidBlock {
            block: id.to_string(),
            error: "block identifiers may only contain letters, digits, '-' and '_'".to_string(),
        })
    }
}

/// Check `project.socks_version` against the running tool version
pub fn check_tool_version(settings: &GlobalSettings, actual: &str) -> Result<(), ConfigError> {
    let Some(required) = settings.project.socks_version.as_deref() else {
        return Ok(());
    };
    if required.trim() == "any" {
        tracing::warn!(
            "Project accepts any socks version; pin project.socks_version for reproducible builds"
        );
        return Ok(());
    }

    let requirement = semver::VersionReq::parse(required).map_err(|e| ConfigError::InvalidSetting {
        key: "project.socks_version".to_string(),
        error: e.to_string(),
    })?;
    let version = semver::Version::parse(actual).map_err(|e| ConfigError::InvalidSetting {
        key: "project.socks_version".to_string(),
        error: e.to_string(),
    })?;

    if requirement.matches(&version) {
        Ok(())
    } else {
        Err(ConfigError::IncompatibleVersion {
            required: required.to_string(),
            actual: actual.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::generators::{block_id, project_name, repo_url};
    use proptest::prelude::*;

    const DOC: &str = r"
project:
  name: demo
  type: zynqmp
external_tools:
  container_tool: none
blocks:
  kernel:
    source: build
    builder: script
    project:
      build_srcs:
        source: https://example.com/linux.git
        branch: main
      patches:
        - 0001-fix.patch
      commands: [make]
    container:
      image: builder
  uboot:
    source: import
    builder: script
    project:
      import_src: file://prebuilt/bp_uboot.tar.gz
      dependencies:
        kernel: temp/kernel/output/bp_kernel_*.tar.gz
";

    fn config() -> ProjectConfig {
        let doc: Value = serde_yaml::from_str(DOC).unwrap();
        ProjectConfig::from_document(doc, PathBuf::from("/prj")).unwrap()
    }

    #[test]
    fn test_blocks_keep_declaration_order() {
        assert_eq!(config().block_ids(), vec!["kernel", "uboot"]);
    }

    #[test]
    fn test_block_spec_fields() {
        let config = config();
        let kernel = config.block("kernel").unwrap();
        assert_eq!(kernel.source, SourceMode::Build);
        assert_eq!(kernel.project.sources()[0].branch.as_deref(), Some("main"));
        assert_eq!(kernel.project.patches, vec![PatchRef::File("0001-fix.patch".into())]);
        assert!(kernel.project.options.contains_key("commands"));
        assert_eq!(kernel.container.as_ref().unwrap().reference(), "builder:latest");

        let uboot = config.block("uboot").unwrap();
        assert_eq!(uboot.source, SourceMode::Import);
        assert_eq!(
            uboot.project.dependencies.get("kernel").map(String::as_str),
            Some("temp/kernel/output/bp_kernel_*.tar.gz")
        );
    }

    #[test]
    fn test_settings_defaults() {
        let config = config();
        assert_eq!(config.settings().external_tools.container_tool, ContainerTool::None);
        assert!(config.settings().external_tools.make.max_build_threads >= 1);
        assert_eq!(config.settings().project.kind.as_deref(), Some("zynqmp"));
    }

    #[test]
    fn test_scoped_view_hides_other_blocks() {
        let config = config();
        let scoped = config.scoped("uboot").unwrap();
        assert_eq!(scoped.paths.output, PathBuf::from("/prj/temp/uboot/output"));
        assert_eq!(scoped.paths.patches, PathBuf::from("/prj/src/uboot/patches"));

        let yaml = scoped.to_yaml().unwrap();
        assert!(yaml.contains("uboot"));
        assert!(!yaml.contains("linux.git"));
        assert!(matches!(
            config.scoped("missing"),
            Err(ConfigError::UnknownBlock { .. })
        ));
    }

    #[test]
    fn test_unknown_block_key_is_rejected() {
        let doc: Value = serde_yaml::from_str(
            "project: {name: demo}\nblocks: {kernel: {source: build, builder: x, colour: red}}\n",
        )
        .unwrap();
        match ProjectConfig::from_document(doc, PathBuf::from("/prj")).unwrap_err() {
            ConfigError::InvalidBlock { block, error } => {
                assert_eq!(block, "kernel");
                assert!(error.contains("colour"));
            }
            e => panic!("Expected InvalidBlock, got: {e:?}"),
        }
    }

    #[test]
    fn test_reserved_block_id() {
        let doc: Value =
            serde_yaml::from_str("project: {name: demo}\nblocks: {all: {source: build, builder: x}}\n")
                .unwrap();
        assert!(matches!(
            ProjectConfig::from_document(doc, PathBuf::from("/prj")),
            Err(ConfigError::ReservedBlockId { .. })
        ));
    }

    #[test]
    fn test_block_id_must_be_a_path_segment() {
        for id in ["..", ".", "a/b", "../kernel", "", "ker nel"] {
            let mut doc: Value = serde_yaml::from_str("project: {name: demo}\nblocks: {}\n").unwrap();
            let spec: Value = serde_yaml::from_str("{source: build, builder: x}").unwrap();
            doc["blocks"]
                .as_mapping_mut()
                .unwrap()
                .insert(Value::String(id.to_string()), spec);
            match ProjectConfig::from_document(doc, PathBuf::from("/prj")) {
                Err(ConfigError::InvalidBlock { block, .. }) => assert_eq!(block, id),
                other => panic!("Expected InvalidBlock for {id:?}, got: {other:?}"),
            }
        }
    }

    #[test]
    fn test_multi_repo_sources_and_project_patches() {
        let project: BlockProject = serde_yaml::from_str(
            "build_srcs:\n  - {name: atf, source: 'https://e/atf.git', branch: v2}\n  - {name: uboot, source: 'file:///src/uboot'}\npatches:\n  - {project: atf, patch: 0001-a.patch}\n",
        )
        .unwrap();
        let sources = project.sources();
        assert_eq!(sources.len(), 2);
        assert!(sources[1].is_local());
        assert_eq!(project.patches[0].project(), Some("atf"));
        assert_eq!(project.patches[0].file_name(), "0001-a.patch");
    }

    #[test]
    fn test_check_tool_version() {
        let mut settings = config().settings().clone();
        settings.project.socks_version = Some(">=0.1, <0.2".to_string());
        assert!(check_tool_version(&settings, "0.1.3").is_ok());
        assert!(matches!(
            check_tool_version(&settings, "0.2.0"),
            Err(ConfigError::IncompatibleVersion { .. })
        ));

        settings.project.socks_version = Some("any".to_string());
        assert!(check_tool_version(&settings, "9.9.9").is_ok());

        settings.project.socks_version = Some("not a version".to_string());
        assert!(matches!(
            check_tool_version(&settings, "0.1.0"),
            Err(ConfigError::InvalidSetting { .. })
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Any well-formed name and block id is accepted and kept
        #[test]
        fn prop_valid_names_accepted(name in project_name(), id in block_id()) {
            let doc = format!("project: {{name: '{name}'}}\nblocks:\n  {id}: {{source: build, builder: script}}\n");
            let cfg = ProjectConfig::from_document(serde_yaml::from_str(&doc).unwrap(), PathBuf::from("/prj")).unwrap();
            prop_assert_eq!(&cfg.settings().project.name, &name);
            prop_assert_eq!(cfg.block_ids(), vec![id.as_str()]);
        }

        /// Single-source blocks derive one source whatever the URL
        #[test]
        fn prop_single_source(url in repo_url()) {
            let doc = format!("project: {{name: demo}}\nblocks:\n  kernel:\n    source: build\n    builder: script\n    project: {{build_srcs: {{source: '{url}', branch: main}}}}\n");
            let cfg = ProjectConfig::from_document(serde_yaml::from_str(&doc).unwrap(), PathBuf::from("/prj")).unwrap();
            let sources = cfg.block("kernel").unwrap().project.sources();
            prop_assert_eq!(sources.len(), 1);
            prop_assert_eq!(&sources[0].source, &url);
        }
    }

    #[test]
    fn test_invalid_project_name() {
        let doc: Value = serde_yaml::from_str("project: {name: 'my project'}\n").unwrap();
        assert!(matches!(
            ProjectConfig::from_document(doc, PathBuf::from("/prj")),
            Err(ConfigError::InvalidSetting { key, .. }) if key == "project.name"
        ));
    }
}
