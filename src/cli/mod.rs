//! Command-line interface module
//!
//! This module handles argument parsing and output formatting.
//! It contains no orchestration logic - that belongs in the [`crate::core`] module.

pub mod commands;
pub mod output;

use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;

use commands::BlockCommand;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\ncommit: ",
    env!("VERGEN_GIT_SHA"),
    "\nbuilt:  ",
    env!("VERGEN_BUILD_TIMESTAMP"),
    "\ntarget: ",
    env!("VERGEN_CARGO_TARGET_TRIPLE"),
);

/// socks - block orchestration for embedded Linux SoC boot images
///
/// Runs a command on one block (or `all`) of the project in the current
/// directory, building or importing its dependencies first.
#[derive(Parser, Debug)]
#[command(name = "socks")]
#[command(author, version, long_version = LONG_VERSION, about, long_about = None)]
#[command(after_help = "Examples:\n  socks all build\n  socks kernel prepare\n  socks kernel create-patches\n  socks kernel start-container\n  socks --show-configuration")]
pub struct Cli {
    /// Enable verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Print the fully resolved configuration (of BLOCK, if given) and exit
    #[arg(long)]
    pub show_configuration: bool,

    /// Project directory containing project.yml
    #[arg(short = 'C', long, default_value = ".")]
    pub project_dir: PathBuf,

    /// Directory with bundled platform default documents
    #[arg(long, env = "SOCKS_DEFAULTS_DIR")]
    pub defaults_dir: Option<PathBuf>,

    /// Run only the selected block, without its dependencies
    #[arg(long)]
    pub no_deps: bool,

    /// Block id, or `all`
    pub block: Option<String>,

    /// Command to run on the block
    #[arg(value_enum)]
    pub command: Option<BlockCommand>,
}

impl Cli {
    /// Execute the CLI command
    pub async fn run(self) -> Result<()> {
        if self.show_configuration {
            return commands::show::execute(&self.project_dir, self.defaults_dir, self.block.as_deref());
        }

        match (self.block, self.command) {
            (Some(block), Some(command)) => {
                let options = commands::run::RunOptions {
                    block,
                    command,
                    with_deps: !self.no_deps,
                    defaults_dir: self.defaults_dir,
                };
                commands::run::execute(&self.project_dir, options).await
            }
            (Some(block), None) => {
                bail!("No command given for '{block}'. Use one of: prepare, build, create-patches, clean, start-container")
            }
            (None, _) => {
                // No block provided, show help
                use clap::CommandFactory;
                let mut cmd = Self::command();
                cmd.print_help()?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_block_and_command() {
        let cli = Cli::try_parse_from(["socks", "kernel", "create-patches", "--no-deps", "-vv"]).unwrap();
        assert_eq!(cli.block.as_deref(), Some("kernel"));
        assert_eq!(cli.command, Some(BlockCommand::CreatePatches));
        assert!(cli.no_deps);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_parse_show_configuration() {
        let cli = Cli::try_parse_from(["socks", "--show-configuration", "-C", "/prj"]).unwrap();
        assert!(cli.show_configuration);
        assert_eq!(cli.project_dir, PathBuf::from("/prj"));
        assert!(cli.block.is_none());
    }

    #[test]
    fn test_parse_start_container() {
        let cli = Cli::try_parse_from(["socks", "uboot", "start-container"]).unwrap();
        assert_eq!(cli.command, Some(BlockCommand::StartContainer));
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        assert!(Cli::try_parse_from(["socks", "kernel", "flash"]).is_err());
    }
}
