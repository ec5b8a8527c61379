use crate::checkout::{checkout, CheckoutResult};
use crate::{assemble, prebuild, CoreError};
use kiln_runtime::{OverlayJob, OverlayRunner};
use kiln_schema::{parse_manifest_file, ImageName, LayerSet, MANIFEST_FILE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::info;

pub const APP_BUILD_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const OVERLAY_MOUNT: &str = "/overlay";
pub const BUILD_SCRIPT: &str = "/etc/kiln/scripts/build";

/// Identifies one application build. Also the dedup key in daemon mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildRequest {
    #[serde(alias = "URL")]
    pub url: String,
    #[serde(alias = "Sha")]
    pub sha: String,
    #[serde(rename = "relPath", alias = "RelPath")]
    pub rel_path: String,
}

impl BuildRequest {
    pub fn new(url: impl Into<String>, sha: impl Into<String>, rel_path: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            sha: sha.into(),
            rel_path: rel_path.into(),
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        for (field, value) in [("url", &self.url), ("sha", &self.sha), ("relPath", &self.rel_path)] {
            if value.trim().is_empty() {
                return Err(CoreError::EmptyField(field));
            }
        }
        let escapes = Path::new(&self.rel_path).components().any(|c| {
            matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))
        });
        if escapes {
            return Err(CoreError::InvalidRelPath(self.rel_path.clone()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Build even when the target image already exists.
    pub rebuild: bool,
    /// Parent of the clone and overlay scratch directories; the system
    /// temp dir when unset.
    pub scratch_root: Option<PathBuf>,
    pub timeout: Duration,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            rebuild: false,
            scratch_root: None,
            timeout: APP_BUILD_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildOutcome {
    pub image: ImageName,
    /// Fully qualified reference of `image`.
    pub reference: String,
    /// The image already existed and nothing was built.
    pub skipped: bool,
    pub checkout: CheckoutResult,
}

pub fn app_image_name(app_name: &str, commit: &str) -> ImageName {
    ImageName::new(format!("apps/{app_name}-{commit}"))
}

fn scratch_dir(options: &BuildOptions, prefix: &str) -> Result<TempDir, CoreError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(prefix);
    let dir = match &options.scratch_root {
        Some(root) => {
            fs::create_dir_all(root)?;
            builder.tempdir_in(root)?
        }
        None => builder.tempdir()?,
    };
    Ok(dir)
}

fn repo_basename(url: &str) -> String {
    let last = url.trim_end_matches('/').rsplit('/').next().unwrap_or(url);
    let name = last.trim_end_matches(".git");
    if name.is_empty() {
        "source".to_owned()
    } else {
        format!("{name}-")
    }
}

/// Build and push the application image for `request`.
///
/// The manifest found at `<rel_path>/manifest.toml` is copied into
/// `manifest_dir` before it is parsed, so a copy survives failed builds.
/// Scratch directories are removed on every exit path.
pub fn build_app(
    runner: &OverlayRunner,
    request: &BuildRequest,
    manifest_dir: &Path,
    layers: &LayerSet,
    options: &BuildOptions,
) -> Result<BuildOutcome, CoreError> {
    request.validate()?;
    info!(
        "building {} at {} ({})",
        request.url, request.sha, request.rel_path
    );

    let clone_dir = scratch_dir(options, &repo_basename(&request.url))?;
    let checkout = checkout(&request.url, &request.sha, clone_dir.path())?;

    let source_dir = clone_dir.path().join(&request.rel_path);
    let manifest_path = source_dir.join(MANIFEST_FILE);
    if !manifest_path.is_file() {
        return Err(CoreError::ManifestNotFound(manifest_path));
    }
    fs::create_dir_all(manifest_dir)?;
    fs::copy(&manifest_path, manifest_dir.join(MANIFEST_FILE))?;
    let manifest = parse_manifest_file(&manifest_path)?;

    let builder = layers.builder_image_name(&manifest.app_type)?;
    let image = app_image_name(&manifest.name, &checkout.resolved_commit);
    let reference = runner.qualified(&image);

    if !options.rebuild && runner.image_exists(&image)? {
        info!("{reference} already exists, skipping build");
        return Ok(BuildOutcome {
            image,
            reference,
            skipped: true,
            checkout,
        });
    }

    let overlay_dir = scratch_dir(options, &format!("{}-", manifest.name))?;
    let app_dir = assemble::copy_app(overlay_dir.path(), &source_dir)?;
    assemble::write_info(overlay_dir.path(), &checkout)?;
    assemble::write_configs(overlay_dir.path(), &manifest)?;

    if manifest.needs_java_prebuild() {
        prebuild::run_java_prebuild(&app_dir, manifest.java_type.as_deref())?;
    }

    runner.overlay_and_commit(&OverlayJob {
        source: builder,
        target: image.clone(),
        host_dir: overlay_dir.path().to_path_buf(),
        container_dir: OVERLAY_MOUNT.to_owned(),
        timeout: options.timeout,
        command: vec![BUILD_SCRIPT.to_owned(), OVERLAY_MOUNT.to_owned()],
    })?;
    runner.push(&image, runner.log_output())?;

    info!("built {reference}");
    Ok(BuildOutcome {
        image,
        reference,
        skipped: false,
        checkout,
    })
}
