//! In-memory directory of builds and the singleton boot.
//!
//! Records are kept until the process exits. A dedup key is reserved together
//! with its record id under one write lock and released when the record
//! reaches a terminal state.

use crate::lifecycle::{validate_transition, Lifecycle, Phase};
use crate::RegistryError;
use kiln_core::BuildRequest;
use kiln_schema::BuildId;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

pub const BUILD_ID_LEN: usize = 20;
const ID_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BuildStatus {
    Init,
    Building,
    Done,
    Error,
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BuildStatus::Init => "INIT",
            BuildStatus::Building => "BUILDING",
            BuildStatus::Done => "DONE",
            BuildStatus::Error => "ERROR",
        })
    }
}

impl Lifecycle for BuildStatus {
    fn phase(self) -> Phase {
        match self {
            BuildStatus::Init => Phase::Init,
            BuildStatus::Building => Phase::Running,
            BuildStatus::Done => Phase::Done,
            BuildStatus::Error => Phase::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BootStatus {
    Init,
    Booting,
    Done,
    Error,
}

impl fmt::Display for BootStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BootStatus::Init => "INIT",
            BootStatus::Booting => "BOOTING",
            BootStatus::Done => "DONE",
            BootStatus::Error => "ERROR",
        })
    }
}

impl Lifecycle for BootStatus {
    fn phase(self) -> Phase {
        match self {
            BootStatus::Init => Phase::Init,
            BootStatus::Booting => Phase::Running,
            BootStatus::Done => Phase::Done,
            BootStatus::Error => Phase::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub id: BuildId,
    #[serde(flatten)]
    pub request: BuildRequest,
    pub status: BuildStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootRecord {
    pub status: BootStatus,
    pub error: Option<String>,
}

#[derive(Default)]
struct RegistryState {
    builds: HashMap<BuildId, BuildRecord>,
    active: HashMap<BuildRequest, BuildId>,
    boot: Option<BootRecord>,
}

impl RegistryState {
    fn boot_active(&self) -> bool {
        self.boot.as_ref().is_some_and(|b| !b.status.is_terminal())
    }
}

#[derive(Default)]
pub struct BuildRegistry {
    state: RwLock<RegistryState>,
}

pub fn generate_build_id() -> BuildId {
    let mut rng = rand::rng();
    let id: String = (0..BUILD_ID_LEN)
        .map(|_| char::from(ID_CHARS[rng.random_range(0..ID_CHARS.len())]))
        .collect();
    BuildId::new(id)
}

impl BuildRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve the dedup key of `request` and create its record in `Init`.
    pub fn reserve_build(&self, request: BuildRequest) -> Result<BuildRecord, RegistryError> {
        let mut state = self.write();
        if state.boot_active() {
            return Err(RegistryError::BootInProgress);
        }
        if let Some(existing) = state.active.get(&request) {
            return Err(RegistryError::Conflict(existing.clone()));
        }

        let mut id = generate_build_id();
        while state.builds.contains_key(&id) {
            debug!("build id collision on {id}, retrying");
            id = generate_build_id();
        }

        let record = BuildRecord {
            id: id.clone(),
            request: request.clone(),
            status: BuildStatus::Init,
            error: None,
        };
        state.active.insert(request, id.clone());
        state.builds.insert(id, record.clone());
        info!("reserved build {}", record.id);
        Ok(record)
    }

    /// Move a build to `status`. Terminal states release its dedup key.
    pub fn update_build(
        &self,
        id: &BuildId,
        status: BuildStatus,
        error: Option<String>,
    ) -> Result<BuildRecord, RegistryError> {
        let mut state = self.write();
        let record = state
            .builds
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        validate_transition(record.status, status)?;
        record.status = status;
        record.error = error;
        let record = record.clone();

        if status.is_terminal() {
            state.active.remove(&record.request);
        }
        Ok(record)
    }

    pub fn build(&self, id: &BuildId) -> Option<BuildRecord> {
        self.read().builds.get(id).cloned()
    }

    pub fn build_count(&self) -> usize {
        self.read().builds.len()
    }

    /// Start a new boot record, replacing a finished one.
    pub fn reserve_boot(&self) -> Result<BootRecord, RegistryError> {
        let mut state = self.write();
        if state.boot_active() {
            return Err(RegistryError::BootInProgress);
        }
        let record = BootRecord {
            status: BootStatus::Init,
            error: None,
        };
        state.boot = Some(record.clone());
        info!("reserved boot");
        Ok(record)
    }

    pub fn update_boot(
        &self,
        status: BootStatus,
        error: Option<String>,
    ) -> Result<BootRecord, RegistryError> {
        let mut state = self.write();
        let record = state.boot.as_mut().ok_or(RegistryError::BootNotStarted)?;
        validate_transition(record.status, status)?;
        record.status = status;
        record.error = error;
        Ok(record.clone())
    }

    pub fn boot(&self) -> Option<BootRecord> {
        self.read().boot.clone()
    }
}
