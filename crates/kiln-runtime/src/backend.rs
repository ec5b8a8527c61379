use crate::RuntimeError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Everything needed to create a throwaway provisioning container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    /// Fully qualified source image reference.
    pub image: String,
    pub bind_source: PathBuf,
    pub bind_target: String,
    pub privileged: bool,
    pub command: Vec<String>,
}

/// Liveness snapshot of a container. `exit_code` is meaningless while running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerState {
    pub running: bool,
    pub exit_code: i64,
}

/// The container lifecycle operations the overlay runner relies on.
///
/// Image arguments are always fully qualified (`<registry>/<name>`).
pub trait ContainerRuntime: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    /// Create (but do not start) a container, returning its id.
    fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Forward the container's combined output to this process's stdout
    /// without blocking the caller.
    fn stream_output(&self, _id: &str) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn inspect_container(&self, id: &str) -> Result<ContainerState, RuntimeError>;

    fn kill_container(&self, id: &str) -> Result<(), RuntimeError>;

    fn commit_container(&self, id: &str, image: &str) -> Result<(), RuntimeError>;

    fn remove_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// True when the image is present locally or can be pulled from its registry.
    fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;

    fn push_image(&self, image: &str, stream: bool) -> Result<(), RuntimeError>;

    fn remove_image(&self, image: &str) -> Result<(), RuntimeError>;
}

pub fn select_runtime(name: &str) -> Result<Arc<dyn ContainerRuntime>, RuntimeError> {
    match name {
        "docker" => Ok(Arc::new(crate::docker::DockerCli::new())),
        "mock" => Ok(Arc::new(crate::mock::MockRuntime::new())),
        other => Err(RuntimeError::BackendUnavailable(other.to_owned())),
    }
}
