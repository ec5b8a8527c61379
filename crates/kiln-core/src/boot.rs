//! Parallel rebuild of every builder layer from the base image.

use crate::build::OVERLAY_MOUNT;
use crate::{panic_message, CoreError};
use kiln_runtime::{OverlayJob, OverlayRunner};
use kiln_schema::LayerSet;
use serde::Serialize;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::{error, info};

pub const BOOT_TIMEOUT: Duration = Duration::from_secs(100 * 60);
pub const PROVISION_ENTRY: &str = "/overlay/sbin/provision_type";

/// Result of provisioning one runtime type.
#[derive(Debug, Clone, Serialize)]
pub struct BootOutcome {
    pub app_type: String,
    pub image: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BootReport {
    pub outcomes: Vec<BootOutcome>,
}

impl BootReport {
    pub fn failed(&self) -> impl Iterator<Item = &BootOutcome> {
        self.outcomes.iter().filter(|o| o.error.is_some())
    }

    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }

    /// `<type>: <cause>` for every failed type, joined with `; `.
    pub fn failure_details(&self) -> String {
        self.failed()
            .map(|o| format!("{}: {}", o.app_type, o.error.as_deref().unwrap_or_default()))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// `Err(BootFailed)` naming every failed type, if any failed.
    pub fn into_result(self) -> Result<Self, CoreError> {
        let failed: Vec<String> = self.failed().map(|o| o.app_type.clone()).collect();
        if failed.is_empty() {
            Ok(self)
        } else {
            Err(CoreError::BootFailed(failed))
        }
    }
}

pub fn boot(runner: &OverlayRunner, layers: &LayerSet, layer_root: &Path) -> Result<BootReport, CoreError> {
    boot_with_timeout(runner, layers, layer_root, BOOT_TIMEOUT)
}

/// Provision every builder layer concurrently and wait for all of them.
///
/// One type failing does not stop the others. The returned report holds an
/// outcome per type in `LayerSet` order; only a missing layer root is
/// reported as `Err` up front.
pub fn boot_with_timeout(
    runner: &OverlayRunner,
    layers: &LayerSet,
    layer_root: &Path,
    timeout: Duration,
) -> Result<BootReport, CoreError> {
    if !layer_root.is_dir() {
        return Err(CoreError::LayerRootMissing(layer_root.to_path_buf()));
    }
    let builder_root = LayerSet::builder_root(layer_root);
    let base = layers.base_image_name();
    info!("booting {} builder layers from {base}", layers.builder_layers().count());

    let outcomes = thread::scope(|scope| {
        let handles: Vec<_> = layers
            .builder_layers()
            .map(|app_type| {
                let builder_root = &builder_root;
                let base = &base;
                let handle = scope.spawn(move || -> Result<String, CoreError> {
                    let target = layers.builder_image_name(app_type)?;
                    info!("start {base} -> {target}");
                    let reference = runner.overlay_and_commit(&OverlayJob {
                        source: base.clone(),
                        target: target.clone(),
                        host_dir: builder_root.join(app_type),
                        container_dir: OVERLAY_MOUNT.to_owned(),
                        timeout,
                        command: vec![PROVISION_ENTRY.to_owned(), OVERLAY_MOUNT.to_owned()],
                    })?;
                    runner.push(&target, false)?;
                    info!("done {reference}");
                    Ok(reference)
                });
                (app_type, handle)
            })
            .collect();

        handles
            .into_iter()
            .map(|(app_type, handle)| {
                let image = layers
                    .builder_image_name(app_type)
                    .map(|name| runner.qualified(&name))
                    .unwrap_or_default();
                let error = match handle.join() {
                    Ok(Ok(_)) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(payload) => Some(format!("panicked: {}", panic_message(payload.as_ref()))),
                };
                if let Some(e) = &error {
                    error!("boot of {app_type} failed: {e}");
                }
                BootOutcome {
                    app_type: app_type.to_owned(),
                    image,
                    error,
                }
            })
            .collect()
    });

    Ok(BootReport { outcomes })
}
