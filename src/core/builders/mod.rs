//! Bundled builders
//!
//! - `script`: runs configured shell commands in the block's build
//!   environment
//! - `collect`: assembles an output from files of dependency packages

pub mod collect;
pub mod script;

use crate::core::builder::BuilderRegistry;

pub use collect::CollectBuilder;
pub use script::ScriptBuilder;

/// Register every bundled builder
pub fn register_defaults(registry: &mut BuilderRegistry) {
    registry.register(script::NAME, |scope| Ok(Box::new(ScriptBuilder::from_scope(scope)?)));
    registry.register(collect::NAME, |scope| Ok(Box::new(CollectBuilder::from_scope(scope)?)));
}
