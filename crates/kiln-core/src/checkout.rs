//! Verified git checkouts.
//!
//! Remote sources are fetched into an empty repository. Sources addressed
//! with `file://` are copied from disk instead. Either way the requested ref
//! must appear in `git rev-list --all` before the working tree is reset.

use crate::fsutil;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::{debug, info};

const LOCAL_PREFIX: &str = "file://";

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("git is not installed")]
    GitUnavailable,
    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
    #[error("sha {0} not found in repository")]
    RefNotFound(String),
    #[error("source location {0} does not exist")]
    InvalidLocation(String),
    #[error("checkout I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Provenance of a checkout. Serialized as `build.json` inside the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutResult {
    #[serde(rename = "commit")]
    pub resolved_commit: String,
    #[serde(rename = "sha")]
    pub requested_ref: String,
    #[serde(rename = "rev_list")]
    pub ancestry: Vec<String>,
}

fn git(dir: &Path, args: &[&str]) -> Result<String, CheckoutError> {
    debug!("git {} (in {})", args.join(" "), dir.display());
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                CheckoutError::GitUnavailable
            } else {
                CheckoutError::Io(e)
            }
        })?;
    if !output.status.success() {
        return Err(CheckoutError::CommandFailed {
            command: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn lines(out: &str) -> Vec<String> {
    out.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Check out `commit_ref` of the repository at `location` into `dest`.
pub fn checkout(location: &str, commit_ref: &str, dest: &Path) -> Result<CheckoutResult, CheckoutError> {
    fsutil::create_private_dir(dest)?;

    let local = location.strip_prefix(LOCAL_PREFIX).map(PathBuf::from);
    if let Some(path) = &local {
        if !path.is_dir() {
            return Err(CheckoutError::InvalidLocation(location.to_owned()));
        }
        let copied = fsutil::copy_tree(path, dest, false)?;
        debug!("copied {copied} files from {}", path.display());
    } else {
        git(dest, &["init"])?;
        git(dest, &["remote", "add", "origin", location])?;
        git(dest, &["remote", "update"])?;
    }

    let known = git(dest, &["rev-list", "--all"])?;
    if !known.lines().any(|l| l.trim() == commit_ref) {
        return Err(CheckoutError::RefNotFound(commit_ref.to_owned()));
    }

    if local.is_none() {
        git(dest, &["fetch", "origin", commit_ref])?;
    }
    git(dest, &["reset", "--hard", commit_ref])?;

    let resolved_commit = git(dest, &["rev-parse", "HEAD"])?.trim().to_owned();
    let ancestry = lines(&git(dest, &["log", "--pretty=format:%H"])?);
    git(dest, &["submodule", "update", "--init", "--recursive"])?;

    info!("checked out {location} at {resolved_commit}");
    Ok(CheckoutResult {
        resolved_commit,
        requested_ref: commit_ref.to_owned(),
        ancestry,
    })
}
