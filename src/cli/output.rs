//! Output formatting
//!
//! User-facing messages go to stdout, errors and warnings to stderr.
//! `--quiet` silences everything but errors.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::core::orchestrator::{BlockStatus, RunReport};
use crate::error::SocksError;

static QUIET: AtomicBool = AtomicBool::new(false);
static VERBOSITY: AtomicU8 = AtomicU8::new(0);

/// Process-wide output settings
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress all output except errors
    pub quiet: bool,
    /// Verbosity level from `-v` flags
    pub verbose: u8,
}

impl OutputConfig {
    /// Create an output configuration
    pub fn new(quiet: bool, verbose: u8) -> Self {
        Self { quiet, verbose }
    }

    /// Make this configuration visible to the output helpers
    pub fn apply_global(self) {
        QUIET.store(self.quiet, Ordering::Relaxed);
        VERBOSITY.store(self.verbose, Ordering::Relaxed);
    }
}

/// Whether `--quiet` is active
pub fn is_quiet() -> bool {
    QUIET.load(Ordering::Relaxed)
}

/// Verbosity level from `-v` flags
pub fn verbosity() -> u8 {
    VERBOSITY.load(Ordering::Relaxed)
}

/// Print a success message
pub fn print_success(message: &str) {
    if !is_quiet() {
        println!("{} {message}", status::SUCCESS);
    }
}

/// Print an informational message
pub fn print_info(message: &str) {
    if !is_quiet() {
        println!("{} {message}", status::INFO);
    }
}

/// Print a warning
pub fn print_warning(message: &str) {
    if !is_quiet() {
        eprintln!("{} {message}", status::WARNING);
    }
}

/// Print an indented detail line
pub fn print_detail(message: &str) {
    if !is_quiet() {
        println!("  {message}");
    }
}

/// Print an error with its category and cause chain
pub fn display_error(error: &anyhow::Error) {
    let label = error
        .downcast_ref::<SocksError>()
        .map_or("Error", SocksError::category);
    eprintln!("{} {label}: {error}", status::ERROR);
    for cause in error.chain().skip(1) {
        eprintln!("  Caused by: {cause}");
    }
}

/// Print the per-block outcome of a run
pub fn print_report(report: &RunReport) {
    for block in &report.blocks {
        match (&block.status, &block.error) {
            (BlockStatus::Failed, Some(error)) => {
                eprintln!("{} {}: {}: {error}", status::ERROR, block.id, error.category());
            }
            (BlockStatus::Done, _) => {
                print_success(&block.id);
                if let Some(package) = block.package.as_ref().filter(|_| verbosity() > 0) {
                    print_detail(&package.display().to_string());
                }
            }
            (other, _) => print_warning(&format!("{}: {other}", block.id)),
        }
    }
}

/// Status message prefixes
pub mod status {
    /// Success prefix (green checkmark)
    pub const SUCCESS: &str = "✓";

    /// Error prefix (red X)
    pub const ERROR: &str = "✗";

    /// Warning prefix (yellow triangle)
    pub const WARNING: &str = "⚠";

    /// Info prefix (blue circle)
    pub const INFO: &str = "ℹ";
}
