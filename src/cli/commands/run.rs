//! `socks <block> <command>`
//!
//! Resolves the project, validates every block and runs the command through
//! the orchestrator.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use super::BlockCommand;
use crate::cli::output::{is_quiet, print_info, print_report, print_success};
use crate::config::defaults;
use crate::core::artifact::ArtifactStore;
use crate::core::builder::BuilderRegistry;
use crate::core::orchestrator::{BlockStatus, BuildOrchestrator};
use crate::core::resolver::ConfigResolver;
use crate::error::SocksError;
use crate::infra::download::DownloadManager;

/// Options of a block command
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Block id or `all`
    pub block: String,
    /// Command to run
    pub command: BlockCommand,
    /// Also process the block's dependencies
    pub with_deps: bool,
    /// Directory with bundled platform default documents
    pub defaults_dir: Option<PathBuf>,
}

/// Execute a block command
pub async fn execute(project_dir: &Path, options: RunOptions) -> Result<()> {
    let project_dir = project_dir
        .canonicalize()
        .with_context(|| format!("Project directory '{}' not found", project_dir.display()))?;
    let root = project_dir.join(defaults::ROOT_CONFIG_FILE);

    let config = ConfigResolver::new()
        .with_defaults_dir(options.defaults_dir)
        .resolve(&root)
        .map_err(SocksError::from)?;
    tracing::info!(
        "Project '{}' with {} block(s)",
        config.settings().project.name,
        config.block_ids().len()
    );

    let registry = BuilderRegistry::with_defaults();
    let store = ArtifactStore::new(config.project_dir(), &config.settings().project.name)
        .with_downloads(DownloadManager::new().with_progress(!is_quiet()));
    let orchestrator = BuildOrchestrator::new(&config, &registry)?
        .with_store(store)
        .with_observer(Box::new(|id: &str, status: BlockStatus| {
            if !status.is_terminal() && status != BlockStatus::Pending {
                print_info(&format!("[{id}] {status}"));
            }
        }));

    let Some(action) = options.command.action() else {
        return start_container(&orchestrator, &options.block);
    };
    let selected = vec![options.block];
    let report = orchestrator.run(action, &selected, options.with_deps).await?;

    print_report(&report);
    if report.is_success() {
        print_success(&format!("{action} finished for {} block(s)", report.blocks.len()));
        return Ok(());
    }

    let failed = report.failed().count();
    let skipped = report
        .blocks
        .iter()
        .filter(|b| b.status == BlockStatus::Skipped)
        .count();
    bail!("{action} did not complete: {failed} block(s) failed, {skipped} skipped")
}

fn start_container(orchestrator: &BuildOrchestrator<'_>, block: &str) -> Result<()> {
    if block == defaults::ALL_BLOCKS {
        bail!("start-container needs a single block, not '{block}'");
    }
    orchestrator.start_container(block)?;
    print_success(&format!("Left the container of '{block}'"));
    Ok(())
}
