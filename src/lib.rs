//! socks - block orchestration for embedded Linux SoC boot images
//!
//! A boot image is assembled from independently built blocks (bootloaders,
//! kernel, device tree, root filesystem, final image). Each block is either
//! built from patched upstream sources or imported pre-built, and blocks
//! exchange nothing but validated `.tar.gz` packages.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`cli`] - Command-line interface parsing and output formatting
//! - [`core`] - Configuration, graph, builders, patches, packages, orchestration
//! - [`infra`] - Infrastructure layer (git, containers, archives, network, filesystem)
//! - [`config`] - Constants and defaults
//! - [`error`] - Error types and handling

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod infra;

#[cfg(test)]
pub mod test_utils;
