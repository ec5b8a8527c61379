use crate::registry::{BootRecord, BootStatus, BuildRecord, BuildRegistry, BuildStatus};
use crate::RegistryError;
use kiln_core::{
    boot_with_timeout, build_app, panic_message, BootReport, BuildOptions, BuildRequest, CoreError,
};
use kiln_runtime::OverlayRunner;
use kiln_schema::{BuildId, LayerSet, MANIFEST_FILE};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub layer_root: PathBuf,
    pub manifest_root: PathBuf,
    pub scratch_root: Option<PathBuf>,
    pub build_timeout: Duration,
    pub boot_timeout: Duration,
}

impl ServiceConfig {
    pub fn new(layer_root: impl Into<PathBuf>, manifest_root: impl Into<PathBuf>) -> Self {
        Self {
            layer_root: layer_root.into(),
            manifest_root: manifest_root.into(),
            scratch_root: None,
            build_timeout: kiln_core::APP_BUILD_TIMEOUT,
            boot_timeout: kiln_core::BOOT_TIMEOUT,
        }
    }
}

/// Runs accepted builds and boots on background threads and records their
/// progress in the registry.
pub struct BuildService {
    registry: BuildRegistry,
    runner: OverlayRunner,
    config: ServiceConfig,
}

impl BuildService {
    pub fn new(runner: OverlayRunner, config: ServiceConfig) -> Self {
        Self {
            registry: BuildRegistry::new(),
            runner,
            config,
        }
    }

    pub fn registry(&self) -> &BuildRegistry {
        &self.registry
    }

    pub fn manifest_dir(&self, id: &BuildId) -> PathBuf {
        self.config.manifest_root.join(id.as_str())
    }

    pub fn manifest_path(&self, id: &BuildId) -> PathBuf {
        self.manifest_dir(id).join(MANIFEST_FILE)
    }

    /// Accept a build and start it in the background. Returns the record in `Init`.
    pub fn submit_build(self: &Arc<Self>, request: BuildRequest) -> Result<BuildRecord, RegistryError> {
        request.validate().map_err(RegistryError::Invalid)?;
        let record = self.registry.reserve_build(request)?;

        let service = Arc::clone(self);
        let id = record.id.clone();
        let spawned = thread::Builder::new()
            .name(format!("build-{id}"))
            .spawn(move || service.run_build(&id));
        if let Err(e) = spawned {
            error!("cannot start build {}: {e}", record.id);
            self.registry
                .update_build(&record.id, BuildStatus::Error, Some(e.to_string()))?;
        }
        Ok(record)
    }

    fn run_build(&self, id: &BuildId) {
        let Some(record) = self.registry.build(id) else {
            return;
        };
        if let Err(e) = self.registry.update_build(id, BuildStatus::Building, None) {
            warn!("build {id}: {e}");
            return;
        }

        let result = catch_unwind(AssertUnwindSafe(|| self.execute_build(id, &record.request)));
        let (status, error) = match result {
            Ok(Ok(())) => (BuildStatus::Done, None),
            Ok(Err(e)) => {
                error!("build {id} failed: {e}");
                (BuildStatus::Error, Some(e.to_string()))
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                error!("build {id} panicked: {msg}");
                (BuildStatus::Error, Some(msg))
            }
        };
        if let Err(e) = self.registry.update_build(id, status, error) {
            warn!("build {id}: {e}");
        }
    }

    fn execute_build(&self, id: &BuildId, request: &BuildRequest) -> Result<(), CoreError> {
        let layers = LayerSet::read(&self.config.layer_root)?;
        let options = BuildOptions {
            rebuild: false,
            scratch_root: self.config.scratch_root.clone(),
            timeout: self.config.build_timeout,
        };
        let outcome = build_app(&self.runner, request, &self.manifest_dir(id), &layers, &options)?;
        info!(
            "build {id} finished: {} ({})",
            outcome.reference,
            if outcome.skipped { "already existed" } else { "built" }
        );
        Ok(())
    }

    /// Start the singleton boot in the background.
    pub fn start_boot(self: &Arc<Self>) -> Result<BootRecord, RegistryError> {
        let record = self.registry.reserve_boot()?;
        let service = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("boot".to_owned())
            .spawn(move || service.run_boot());
        if let Err(e) = spawned {
            error!("cannot start boot: {e}");
            self.registry
                .update_boot(BootStatus::Error, Some(e.to_string()))?;
        }
        Ok(record)
    }

    fn run_boot(&self) {
        if let Err(e) = self.registry.update_boot(BootStatus::Booting, None) {
            warn!("boot: {e}");
            return;
        }

        let result = catch_unwind(AssertUnwindSafe(|| self.execute_boot(&self.config.layer_root)));
        let (status, error) = match result {
            Ok(Ok(report)) if report.is_success() => (BootStatus::Done, None),
            Ok(Ok(report)) => {
                let failed = report.failed().map(|o| o.app_type.clone()).collect();
                let msg = format!("{}: {}", CoreError::BootFailed(failed), report.failure_details());
                error!("{msg}");
                (BootStatus::Error, Some(msg))
            }
            Ok(Err(e)) => {
                error!("boot failed: {e}");
                (BootStatus::Error, Some(e.to_string()))
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                error!("boot panicked: {msg}");
                (BootStatus::Error, Some(msg))
            }
        };
        if let Err(e) = self.registry.update_boot(status, error) {
            warn!("boot: {e}");
        }
    }

    fn execute_boot(&self, layer_root: &Path) -> Result<BootReport, CoreError> {
        if !layer_root.is_dir() {
            return Err(CoreError::LayerRootMissing(layer_root.to_path_buf()));
        }
        let layers = LayerSet::read(layer_root)?;
        boot_with_timeout(&self.runner, &layers, layer_root, self.config.boot_timeout)
    }
}
