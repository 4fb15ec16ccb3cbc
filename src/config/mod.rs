//! Configuration constants
//!
//! Fixed names and limits shared across the crate.

pub mod defaults;
