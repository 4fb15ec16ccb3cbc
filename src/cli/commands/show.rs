//! `socks --show-configuration`
//!
//! Prints the import-merged, reference-resolved configuration, or the view a
//! single block's builder gets.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::config::defaults;
use crate::core::resolver::ConfigResolver;
use crate::error::SocksError;

/// Execute the show-configuration command
pub fn execute(project_dir: &Path, defaults_dir: Option<PathBuf>, block: Option<&str>) -> Result<()> {
    let root = project_dir.join(defaults::ROOT_CONFIG_FILE);
    let config = ConfigResolver::new()
        .with_defaults_dir(defaults_dir)
        .resolve(&root)
        .map_err(SocksError::from)?;

    let yaml = match block.filter(|b| *b != defaults::ALL_BLOCKS) {
        Some(block) => config
            .scoped(block)
            .and_then(|scope| scope.to_yaml())
            .map_err(SocksError::from)?,
        None => config.to_yaml().map_err(SocksError::from)?,
    };

    print!("{yaml}");
    tracing::debug!("Configuration resolved from {}", root.display());
    Ok(())
}
