//! Common test utilities and helpers
//!
//! This module provides shared utilities for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Test project context
///
/// Creates a temporary directory for test projects and provides
/// utilities for setting up test scenarios.
pub struct TestProject {
    /// Temporary directory for the test project
    pub dir: TempDir,
}

impl TestProject {
    /// Create a new test project in a temporary directory
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Create a project with `project.yml` set to `config`
    pub fn with_config(config: &str) -> Self {
        let project = Self::new();
        project.create_file("project.yml", config);
        project
    }

    /// Get the path to the test project directory
    pub fn path(&self) -> PathBuf {
        self.dir
            .path()
            .canonicalize()
            .expect("Failed to canonicalize temp directory")
    }

    /// Create a file in the test project
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(path, content).expect("Failed to write file");
    }

    /// Create a directory in the test project
    pub fn create_dir(&self, name: &str) {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(path).expect("Failed to create directory");
    }

    /// Check if a file exists in the test project
    pub fn file_exists(&self, name: &str) -> bool {
        self.dir.path().join(name).exists()
    }

    /// Read a file from the test project
    pub fn read_file(&self, name: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(name)).expect("Failed to read file")
    }

    /// Package files named `members` into a `.tar.gz` at `name`
    pub fn create_package(&self, name: &str, members: &[&str]) {
        let staging = TempDir::new().expect("Failed to create staging directory");
        for member in members {
            let path = staging.path().join(member);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, member).unwrap();
        }
        let dest = self.dir.path().join(name);
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        let file = std::fs::File::create(&dest).expect("Failed to create package");
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.append_dir_all(".", staging.path()).unwrap();
        builder.into_inner().unwrap().finish().unwrap();
    }

    /// Run the socks binary in the project directory
    pub fn run(&self, args: &[&str]) -> Output {
        run_socks(&self.path(), args)
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the socks binary in `dir`
pub fn run_socks(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_socks"))
        .current_dir(dir)
        .args(args)
        .env_remove("SOCKS_DEFAULTS_DIR")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute socks")
}

/// Whether the `git` executable is usable
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

/// Run git in `dir` with a fixed identity
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
        .args(args)
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Project whose blocks build natively with shell commands
///
/// `kernel` and `devicetree` are independent, `image` collects both.
pub const NATIVE_PROJECT: &str = r#"
project:
  name: demo
  type: zynqmp
external_tools:
  container_tool: none
  make:
    max_build_threads: 2
paths:
  firmware: "boot"
blocks:
  kernel:
    source: build
    builder: script
    project:
      build_srcs:
        source: file://sources/linux
      commands:
        - mkdir -p "$SOCKS_OUTPUT_DIR/{{paths.firmware}}"
        - cp Image "$SOCKS_OUTPUT_DIR/{{paths.firmware}}/Image"
      outputs:
        - 'boot/Image'
  devicetree:
    source: build
    builder: script
    project:
      build_srcs:
        source: file://sources/dts
      commands:
        - cp system.dts "$SOCKS_OUTPUT_DIR/system.dtb"
      outputs:
        - '.*\.dtb'
  image:
    source: build
    builder: collect
    project:
      dependencies:
        kernel: temp/kernel/output/bp_kernel_*.tar.gz
        devicetree: temp/devicetree/output/bp_devicetree_*.tar.gz
      files:
        - {from: kernel, pattern: 'boot/Image', dest: boot}
        - {from: devicetree, pattern: '.*\.dtb', dest: boot}
      outputs:
        - 'boot/Image'
        - 'boot/system\.dtb'
"#;

/// Create [`NATIVE_PROJECT`] with its local sources
pub fn native_project() -> TestProject {
    let project = TestProject::with_config(NATIVE_PROJECT);
    project.create_file("sources/linux/Image", "kernel image");
    project.create_file("sources/dts/system.dts", "/dts-v1/;");
    project
}
