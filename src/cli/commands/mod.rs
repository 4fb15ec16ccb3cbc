//! CLI command implementations
//!
//! Each command is implemented in its own submodule.

pub mod run;
pub mod show;

use clap::ValueEnum;

use crate::core::orchestrator::Action;

/// Commands applicable to a block
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCommand {
    /// Fetch sources and apply patches
    Prepare,
    /// Build (or import) the block and publish its package
    Build,
    /// Export new commits in the block's sources as patches
    CreatePatches,
    /// Remove the block's working directories
    Clean,
    /// Open an interactive shell in the block's container
    StartContainer,
}

impl BlockCommand {
    /// Orchestrator action, `None` for interactive commands
    pub fn action(self) -> Option<Action> {
        match self {
            Self::Prepare => Some(Action::Prepare),
            Self::Build => Some(Action::Build),
            Self::CreatePatches => Some(Action::CreatePatches),
            Self::Clean => Some(Action::Clean),
            Self::StartContainer => None,
        }
    }
}
