//! Build environments using Docker/Podman containers
//!
//! Runs a block's build commands inside its configured image with the
//! project directory mounted at the same path, so paths reported by the
//! core are valid on both sides. With `container_tool: none` the same
//! commands run natively on the host.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::{Command, ExitStatus};
use thiserror::Error;

/// Container-related errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContainerError {
    /// Configured container tool is not installed
    #[error("Container tool '{tool}' not found in PATH")]
    RuntimeNotFound { tool: String },

    /// Spawning the process failed
    #[error("Failed to start '{program}': {error}")]
    SpawnFailed { program: String, error: String },

    /// Command exited unsuccessfully
    #[error("Command exited with {status}: {command}")]
    ExecutionFailed { command: String, status: String },

    /// Interactive sessions need a container runtime
    #[error("Interactive sessions require a container tool (external_tools.container_tool is 'none')")]
    NoContainerTool,
}

/// Container tool selected in `external_tools.container_tool`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerTool {
    /// Docker
    #[default]
    Docker,
    /// Podman
    Podman,
    /// Run build commands natively
    None,
}

impl ContainerTool {
    /// The container runtime, if any
    pub fn runtime(self) -> Option<ContainerRuntime> {
        match self {
            Self::Docker => Some(ContainerRuntime::Docker),
            Self::Podman => Some(ContainerRuntime::Podman),
            Self::None => None,
        }
    }
}

/// Container runtime type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerRuntime {
    /// Docker container runtime
    Docker,
    /// Podman container runtime
    Podman,
}

impl ContainerRuntime {
    /// Get the command name for this runtime
    pub fn command(&self) -> &'static str {
        match self {
            ContainerRuntime::Docker => "docker",
            ContainerRuntime::Podman => "podman",
        }
    }

    /// Check whether the runtime executable is on `PATH`
    pub fn is_available(&self) -> bool {
        which::which(self.command()).is_ok()
    }
}

/// Mount configuration for container volumes
#[derive(Debug, Clone, PartialEq)]
pub struct MountConfig {
    /// Host path to mount
    pub host_path: PathBuf,
    /// Container path to mount to
    pub container_path: PathBuf,
    /// Whether the mount is read-only
    pub read_only: bool,
}

impl MountConfig {
    /// Create a new read-only mount
    pub fn read_only(host_path: PathBuf, container_path: PathBuf) -> Self {
        Self {
            host_path,
            container_path,
            read_only: true,
        }
    }

    /// Create a new read-write mount
    pub fn read_write(host_path: PathBuf, container_path: PathBuf) -> Self {
        Self {
            host_path,
            container_path,
            read_only: false,
        }
    }

    /// Mount a host path at the identical path inside the container
    pub fn same_path(path: PathBuf) -> Self {
        Self::read_write(path.clone(), path)
    }
}

/// Identity of the invoking host user, passed to the container entrypoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostUser {
    /// Login name
    pub name: String,
    /// Numeric user id
    pub uid: u32,
    /// Numeric group id
    pub gid: u32,
}

impl HostUser {
    /// Look up the current user
    #[cfg(unix)]
    pub fn current() -> Option<Self> {
        let uid = nix::unistd::getuid();
        let gid = nix::unistd::getgid();
        let name = nix::unistd::User::from_uid(uid)
            .ok()
            .flatten()
            .map_or_else(|| uid.to_string(), |user| user.name);
        Some(Self {
            name,
            uid: uid.as_raw(),
            gid: gid.as_raw(),
        })
    }

    /// Look up the current user
    #[cfg(not(unix))]
    pub fn current() -> Option<Self> {
        None
    }
}

/// Execution environment for one block's build commands
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Container image reference (`image:tag`)
    pub image: String,
    /// Mount configurations
    pub mounts: Vec<MountConfig>,
    /// Working directory (inside the container, or on the host when native)
    pub workdir: PathBuf,
    /// Environment variables to pass
    pub env: Vec<(String, String)>,
    /// Host identity forwarded to the container
    pub user: Option<HostUser>,
}

impl ContainerConfig {
    /// Create a config for `image` with the working directory `workdir`
    pub fn new(image: impl Into<String>, workdir: PathBuf) -> Self {
        Self {
            image: image.into(),
            mounts: Vec::new(),
            workdir,
            env: Vec::new(),
            user: None,
        }
    }

    /// Add a mount configuration
    #[must_use]
    pub fn with_mount(mut self, mount: MountConfig) -> Self {
        self.mounts.push(mount);
        self
    }

    /// Add an environment variable
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Forward the host user's identity
    #[must_use]
    pub fn with_user(mut self, user: Option<HostUser>) -> Self {
        self.user = user;
        self
    }
}

/// Runs shell commands inside a container or natively
#[derive(Debug)]
pub struct ContainerExecutor {
    runtime: Option<ContainerRuntime>,
    config: ContainerConfig,
}

impl ContainerExecutor {
    /// Create an executor for the configured tool
    ///
    /// Fails if a container runtime is requested but not installed.
    pub fn new(tool: ContainerTool, config: ContainerConfig) -> Result<Self, ContainerError> {
        let runtime = tool.runtime();
        if let Some(runtime) = runtime {
            if !runtime.is_available() {
                return Err(ContainerError::RuntimeNotFound {
                    tool: runtime.command().to_string(),
                });
            }
        }
        Ok(Self { runtime, config })
    }

    /// Arguments shared by batch and interactive runs, up to the image
    fn base_args(&self, runtime: ContainerRuntime, interactive: bool) -> Vec<String> {
        let mut args = vec!["run".to_string(), "--rm".to_string()];
        if interactive {
            args.push("-it".to_string());
        }

        // Rootless podman maps the container's root to the host user
        if runtime == ContainerRuntime::Docker {
            if let Some(user) = &self.config.user {
                args.push(format!("-e=CONTAINER_USER={}", user.name));
                args.push(format!("-e=CONTAINER_USER_ID={}", user.uid));
                args.push(format!("-e=CONTAINER_GROUP_ID={}", user.gid));
            }
        }

        for mount in &self.config.mounts {
            let suffix = if mount.read_only { ":ro" } else { ":Z" };
            args.push(format!(
                "-v={}:{}{}",
                mount.host_path.display(),
                mount.container_path.display(),
                suffix
            ));
        }

        args.push(format!("-w={}", self.config.workdir.display()));

        for (key, value) in &self.config.env {
            args.push(format!("-e={key}={value}"));
        }

        args.push(self.config.image.clone());
        args
    }

    /// Build the container run command arguments for a shell script
    pub fn build_run_args(&self, runtime: ContainerRuntime, script: &str) -> Vec<String> {
        let mut args = self.base_args(runtime, false);
        args.extend(["sh".to_string(), "-c".to_string(), script.to_string()]);
        args
    }

    /// Build the arguments of an interactive session in the image's default shell
    pub fn interactive_run_args(&self, runtime: ContainerRuntime) -> Vec<String> {
        self.base_args(runtime, true)
    }

    /// Run commands joined with `&&`, inheriting standard streams
    pub fn run(&self, commands: &[String]) -> Result<(), ContainerError> {
        let script = commands.join(" && ");

        let mut command = match self.runtime {
            Some(runtime) => {
                let mut command = Command::new(runtime.command());
                command.args(self.build_run_args(runtime, &script));
                command
            }
            None => {
                let mut command = Command::new("sh");
                command
                    .arg("-c")
                    .arg(&script)
                    .current_dir(&self.config.workdir)
                    .envs(self.config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
                command
            }
        };

        let program = command.get_program().to_string_lossy().to_string();
        tracing::info!("Running '{}' via {}", script, program);

        let status = command.status().map_err(|e| ContainerError::SpawnFailed {
            program,
            error: e.to_string(),
        })?;

        check_status(&script, status)
    }

    /// Open an interactive session in the container
    ///
    /// The session's exit status is the operator's last shell command and
    /// is only logged.
    pub fn start_interactive(&self) -> Result<(), ContainerError> {
        let runtime = self.runtime.ok_or(ContainerError::NoContainerTool)?;
        tracing::info!("Starting interactive session in {}", self.config.image);

        let status = Command::new(runtime.command())
            .args(self.interactive_run_args(runtime))
            .status()
            .map_err(|e| ContainerError::SpawnFailed {
                program: runtime.command().to_string(),
                error: e.to_string(),
            })?;
        tracing::debug!("Interactive session ended with {}", status);
        Ok(())
    }
}

fn check_status(script: &str, status: ExitStatus) -> Result<(), ContainerError> {
    if status.success() {
        Ok(())
    } else {
        Err(ContainerError::ExecutionFailed {
            command: script.to_string(),
            status: status.to_string(),
        })
    }
}
