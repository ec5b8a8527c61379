//! Container runtime backends for kiln.
//!
//! This crate implements the execution layer: the pluggable
//! `ContainerRuntime` trait with a Docker CLI backend and a scriptable mock,
//! the `OverlayRunner` that applies a host directory to an image inside a
//! throwaway container and commits the result, registry pushes with a single
//! bounded retry, and host prerequisite checks.

pub mod backend;
pub mod docker;
pub mod mock;
pub mod overlay;
pub mod prereq;

pub use backend::{select_runtime, ContainerRuntime, ContainerSpec, ContainerState};
pub use overlay::{OverlayJob, OverlayRunner, RunnerOptions};
pub use prereq::{check_boot_prereqs, check_build_prereqs, format_missing, MissingPrereq};

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("container runtime '{0}' is not available on this system")]
    BackendUnavailable(String),
    #[error("container runtime command failed: {0}")]
    ExecFailed(String),
    #[error("no such container: {0}")]
    ContainerNotFound(String),
    #[error("run script failed with exit code {code}")]
    ScriptFailed { code: i64 },
    #[error("run script timed out after {}s", timeout.as_secs())]
    TimedOut { timeout: Duration },
    #[error("failed to push {image}: {reason}")]
    PushFailed { image: String, reason: String },
}
