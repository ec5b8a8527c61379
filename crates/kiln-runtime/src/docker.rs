use crate::backend::{ContainerRuntime, ContainerSpec, ContainerState};
use crate::RuntimeError;
use serde::Deserialize;
use std::process::{Command, Output, Stdio};
use tracing::{debug, warn};

const INSPECT_FORMAT: &str = "{{json .State}}";

/// Drives the `docker` command line client.
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            binary: "docker".to_owned(),
        }
    }
}

impl DockerCli {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self) -> Command {
        Command::new(&self.binary)
    }

    fn spawn_err(&self, e: std::io::Error) -> RuntimeError {
        if e.kind() == std::io::ErrorKind::NotFound {
            RuntimeError::BackendUnavailable(self.binary.clone())
        } else {
            RuntimeError::Io(e)
        }
    }

    fn output(&self, args: &[&str]) -> Result<Output, RuntimeError> {
        debug!("{} {}", self.binary, args.join(" "));
        self.command()
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.spawn_err(e))
    }

    /// Run a subcommand, failing on a nonzero exit. Returns trimmed stdout.
    fn run(&self, args: &[&str]) -> Result<String, RuntimeError> {
        let output = self.output(args)?;
        if !output.status.success() {
            return Err(RuntimeError::ExecFailed(format!(
                "{} {} failed: {}",
                self.binary,
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }

    fn create_args(spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec![
            "create".to_owned(),
            "--name".to_owned(),
            spec.name.clone(),
            "--volume".to_owned(),
            format!("{}:{}", spec.bind_source.display(), spec.bind_target),
        ];
        if spec.privileged {
            args.push("--privileged".to_owned());
        }
        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());
        args
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    running: bool,
    exit_code: i64,
}

/// Parse `docker inspect --format '{{json .State}}'` output.
pub fn parse_inspect_output(out: &str) -> Result<ContainerState, RuntimeError> {
    let state: InspectState = serde_json::from_str(out.trim())
        .map_err(|e| RuntimeError::ExecFailed(format!("unexpected inspect output '{}': {e}", out.trim())))?;
    Ok(ContainerState {
        running: state.running,
        exit_code: state.exit_code,
    })
}

impl ContainerRuntime for DockerCli {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn available(&self) -> bool {
        self.output(&["version", "--format", "{{.Server.Version}}"])
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let args = Self::create_args(spec);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&args)
    }

    fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.run(&["start", id]).map(drop)
    }

    fn stream_output(&self, id: &str) -> Result<(), RuntimeError> {
        let mut child = self
            .command()
            .args(["logs", "--follow", id])
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| self.spawn_err(e))?;
        // The follower exits on its own once the container stops.
        std::thread::spawn(move || {
            if let Err(e) = child.wait() {
                warn!("log follower failed: {e}");
            }
        });
        Ok(())
    }

    fn inspect_container(&self, id: &str) -> Result<ContainerState, RuntimeError> {
        let output = self.output(&["inspect", "--format", INSPECT_FORMAT, id])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.to_lowercase().contains("no such") {
                return Err(RuntimeError::ContainerNotFound(id.to_owned()));
            }
            return Err(RuntimeError::ExecFailed(format!(
                "{} inspect failed: {}",
                self.binary,
                stderr.trim()
            )));
        }
        parse_inspect_output(&String::from_utf8_lossy(&output.stdout))
    }

    fn kill_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.run(&["kill", id]).map(drop)
    }

    fn commit_container(&self, id: &str, image: &str) -> Result<(), RuntimeError> {
        self.run(&["commit", id, image]).map(drop)
    }

    fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.run(&["rm", id]).map(drop)
    }

    fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        if self.output(&["image", "inspect", image])?.status.success() {
            return Ok(true);
        }
        debug!("{image} not present locally, trying registry");
        Ok(self.output(&["pull", image])?.status.success())
    }

    fn push_image(&self, image: &str, stream: bool) -> Result<(), RuntimeError> {
        let stdout = if stream {
            Stdio::inherit()
        } else {
            Stdio::null()
        };
        let output = self
            .command()
            .args(["push", image])
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| self.spawn_err(e))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(RuntimeError::ExecFailed(format!(
                "{} push failed: {}",
                self.binary,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    fn remove_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.run(&["rmi", image]).map(drop)
    }
}
