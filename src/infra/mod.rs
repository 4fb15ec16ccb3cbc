//! Infrastructure layer
//!
//! Handles all I/O against external collaborators: git, HTTP, container
//! runtimes, archives and the filesystem.

pub mod archive;
pub mod container;
pub mod download;
pub mod filesystem;
pub mod git;
