//! Apply a host directory to an image inside a throwaway container and keep
//! the result only if the provisioning script succeeds.
//!
//! Container disposition:
//! - script exits 0 before the timeout: commit as the target image, remove the container
//! - container fails to start: remove the container, nothing ran
//! - script exits nonzero, times out, or the commit fails: keep the container
//!   for postmortem inspection and return the error

use crate::backend::{ContainerRuntime, ContainerSpec};
use crate::RuntimeError;
use kiln_schema::ImageName;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_PUSH_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Registry host every image name is qualified with.
    pub registry: String,
    /// Stream container output to stdout while the script runs.
    pub log_output: bool,
    pub poll_interval: Duration,
    pub push_backoff: Duration,
}

impl RunnerOptions {
    pub fn new(registry: &str) -> Self {
        Self {
            registry: registry.trim_end_matches('/').to_owned(),
            log_output: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            push_backoff: DEFAULT_PUSH_BACKOFF,
        }
    }

    #[must_use]
    pub fn with_log_output(mut self, log_output: bool) -> Self {
        self.log_output = log_output;
        self
    }
}

/// One overlay-and-commit invocation.
#[derive(Debug, Clone)]
pub struct OverlayJob {
    pub source: ImageName,
    pub target: ImageName,
    pub host_dir: PathBuf,
    pub container_dir: String,
    pub timeout: Duration,
    pub command: Vec<String>,
}

pub struct OverlayRunner {
    runtime: Arc<dyn ContainerRuntime>,
    options: RunnerOptions,
}

impl OverlayRunner {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, options: RunnerOptions) -> Self {
        Self { runtime, options }
    }

    pub fn registry(&self) -> &str {
        &self.options.registry
    }

    pub fn log_output(&self) -> bool {
        self.options.log_output
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub fn qualified(&self, image: &ImageName) -> String {
        image.qualified(&self.options.registry)
    }

    pub fn image_exists(&self, image: &ImageName) -> Result<bool, RuntimeError> {
        self.runtime.image_exists(&self.qualified(image))
    }

    /// Run `job.command` in a container created from `job.source` with
    /// `job.host_dir` bound at `job.container_dir`, and commit the container as
    /// `job.target` once the script exits 0. Returns the qualified target.
    pub fn overlay_and_commit(&self, job: &OverlayJob) -> Result<String, RuntimeError> {
        let target = self.qualified(&job.target);
        let spec = ContainerSpec {
            name: container_name(&job.target),
            image: self.qualified(&job.source),
            bind_source: job.host_dir.clone(),
            bind_target: job.container_dir.clone(),
            privileged: true,
            command: job.command.clone(),
        };

        let id = self.runtime.create_container(&spec)?;
        debug!("created container {id} ({}) from {}", spec.name, spec.image);

        if let Err(e) = self.runtime.start_container(&id) {
            if let Err(rm) = self.runtime.remove_container(&id) {
                warn!("failed to remove unstarted container {id}: {rm}");
            }
            return Err(e);
        }

        if self.options.log_output {
            if let Err(e) = self.runtime.stream_output(&id) {
                warn!("cannot stream output of container {id}: {e}");
            }
        }

        if let Err(e) = self.wait_for_exit(&id, job.timeout) {
            warn!("keeping container {id} ({}) for inspection: {e}", spec.name);
            return Err(e);
        }

        if let Err(e) = self.runtime.commit_container(&id, &target) {
            warn!("keeping container {id} ({}) after failed commit: {e}", spec.name);
            return Err(e);
        }
        info!("committed {target}");

        if let Err(e) = self.runtime.remove_container(&id) {
            warn!("failed to remove container {id}: {e}");
        }
        Ok(target)
    }

    fn wait_for_exit(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let deadline = Instant::now() + timeout;
        loop {
            let state = self.runtime.inspect_container(id)?;
            if !state.running {
                if state.exit_code == 0 {
                    return Ok(());
                }
                return Err(RuntimeError::ScriptFailed {
                    code: state.exit_code,
                });
            }

            let now = Instant::now();
            if now >= deadline {
                if let Err(e) = self.runtime.kill_container(id) {
                    warn!("failed to kill timed out container {id}: {e}");
                }
                return Err(RuntimeError::TimedOut { timeout });
            }
            thread::sleep(self.options.poll_interval.min(deadline - now));
        }
    }

    /// Push an image, retrying exactly once after the backoff. When the retry
    /// also fails the local image is deleted.
    pub fn push(&self, image: &ImageName, stream: bool) -> Result<(), RuntimeError> {
        let target = self.qualified(image);
        if let Err(first) = self.runtime.push_image(&target, stream) {
            warn!(
                "push of {target} failed, retrying in {}s: {first}",
                self.options.push_backoff.as_secs()
            );
            thread::sleep(self.options.push_backoff);
            if let Err(second) = self.runtime.push_image(&target, stream) {
                if let Err(e) = self.runtime.remove_image(&target) {
                    warn!("failed to remove unpushed image {target}: {e}");
                }
                return Err(RuntimeError::PushFailed {
                    image: target,
                    reason: second.to_string(),
                });
            }
        }
        info!("pushed {target}");
        Ok(())
    }
}

fn container_name(target: &ImageName) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("{}-{millis}", target.basename())
}
