//! Core orchestration logic
//!
//! Process-level I/O (git, containers, archives, HTTP) lives in
//! [`crate::infra`]; this module decides what happens to which block.
//!
//! # Submodules
//!
//! - [`resolver`] - Import merging and `{{reference}}` substitution
//! - [`project`] - Typed, immutable project configuration
//! - [`graph`] - Block dependency graph and build order
//! - [`builder`] - Builder contract and registry
//! - [`builders`] - Bundled builders
//! - [`sources`] - Source repository acquisition
//! - [`patch`] - Patch application and generation
//! - [`artifact`] - Block package publishing, import and validation
//! - [`yaml_edit`] - Writing patch lists back into `project.yml`
//! - [`orchestrator`] - Per-block state machine

pub mod artifact;
pub mod builder;
pub mod builders;
pub mod graph;
pub mod orchestrator;
pub mod patch;
pub mod project;
pub mod resolver;
pub mod sources;
pub mod yaml_edit;
