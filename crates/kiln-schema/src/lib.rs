//! Manifest parsing, validation, and layer naming for kiln.
//!
//! This crate defines the schema layer: TOML application manifests
//! (`ManifestData`) validated once into a typed `Manifest` with checked
//! logging facilities, the `LayerSet` that maps runtime types to builder
//! images, and the string newtypes shared by the rest of the workspace.

pub mod layers;
pub mod manifest;
pub mod types;

pub use layers::{LayerError, LayerSet};
pub use manifest::{
    parse_manifest_file, parse_manifest_str, LegacyRunCommand, LogFacility, Manifest,
    ManifestData, ManifestError, Severity, JAVA_APP_TYPE, MANIFEST_FILE, MAX_RUN_COMMANDS,
};
pub use types::{BuildId, ImageName};
