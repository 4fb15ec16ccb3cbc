//! Default configuration values

/// Root project configuration file
pub const ROOT_CONFIG_FILE: &str = "project.yml";

/// Host/user-specific overlay applied after imports
pub const USER_CONFIG_FILE: &str = "project-user.yml";

/// Maximum nesting of `{{...}}` references
pub const MAX_REFERENCE_DEPTH: usize = 10;

/// Selection sentinel for every declared block
pub const ALL_BLOCKS: &str = "all";

/// Prefix of every block package file name
pub const PACKAGE_PREFIX: &str = "bp";

/// Discriminator of imported block packages
pub const IMPORT_DISCRIMINATOR: &str = "import";

/// Per-block working tree root, relative to the project directory
pub const TEMP_DIR: &str = "temp";

/// Per-block source tree root, relative to the project directory
pub const SRC_DIR: &str = "src";

/// Branch holding the pristine baseline plus all recorded patches
pub const BASELINE_BRANCH: &str = "__ref";

/// Branch developers commit on
pub const DEV_BRANCH: &str = "__temp";

/// Names of patches already incorporated into the baseline, kept in `.git/`
pub const PATCHES_APPLIED_STAMP: &str = "socks-patches-applied";

/// Marker present while a block is executing
pub const IN_PROGRESS_MARKER: &str = ".inprogress";

/// SHA-256 of the last imported pre-built package
pub const IMPORT_CHECKSUM_FILE: &str = "import.sha256";

/// Default container image tag
pub const DEFAULT_CONTAINER_TAG: &str = "latest";

/// Committer identity used when the host has no git identity configured
pub const GIT_FALLBACK_NAME: &str = "socks";

/// Committer email used when the host has no git identity configured
pub const GIT_FALLBACK_EMAIL: &str = "socks@localhost";
