//! Builder layer naming.
//!
//! A layer root on disk looks like:
//!
//! ```text
//! <root>/basename.txt      base layer identifier, e.g. "precise"
//! <root>/version.txt       layer set version, e.g. "1.4.0"
//! <root>/builder/<type>/   provisioning overlay for each supported runtime type
//! ```

use crate::types::ImageName;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const BASENAME_FILE: &str = "basename.txt";
const VERSION_FILE: &str = "version.txt";
const BUILDER_DIR: &str = "builder";

#[derive(Debug, Error)]
pub enum LayerError {
    #[error("app type '{0}' is not supported")]
    NotSupported(String),
    #[error("failed to read layer info at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("layer {0} must not be empty")]
    EmptyField(&'static str),
    #[error("no builder layers declared")]
    NoBuilderLayers,
}

/// Immutable description of the base image and the builder images derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSet {
    version: String,
    base_layer: String,
    builder_layers: BTreeSet<String>,
}

impl LayerSet {
    pub fn new<I, S>(
        version: impl Into<String>,
        base_layer: impl Into<String>,
        builder_layers: I,
    ) -> Result<Self, LayerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let version = version.into();
        let base_layer = base_layer.into();
        if version.is_empty() {
            return Err(LayerError::EmptyField("version"));
        }
        if base_layer.is_empty() {
            return Err(LayerError::EmptyField("base name"));
        }
        let builder_layers: BTreeSet<String> =
            builder_layers.into_iter().map(Into::into).collect();
        if builder_layers.is_empty() {
            return Err(LayerError::NoBuilderLayers);
        }
        Ok(Self {
            version,
            base_layer,
            builder_layers,
        })
    }

    /// Read the layer set from a layer root directory.
    pub fn read(layer_root: &Path) -> Result<Self, LayerError> {
        let read_trimmed = |name: &str| -> Result<String, LayerError> {
            let path = layer_root.join(name);
            fs::read_to_string(&path)
                .map(|s| s.trim_end_matches(['\n', '\r']).to_owned())
                .map_err(|source| LayerError::Io { path, source })
        };

        let base_layer = read_trimmed(BASENAME_FILE)?;
        let version = read_trimmed(VERSION_FILE)?;

        let builder_dir = Self::builder_root(layer_root);
        let entries = fs::read_dir(&builder_dir).map_err(|source| LayerError::Io {
            path: builder_dir.clone(),
            source,
        })?;
        let mut types = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| LayerError::Io {
                path: builder_dir.clone(),
                source,
            })?;
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    types.push(name.to_owned());
                }
            }
        }

        Self::new(version, base_layer, types)
    }

    /// Directory holding one provisioning overlay per runtime type.
    pub fn builder_root(layer_root: &Path) -> PathBuf {
        layer_root.join(BUILDER_DIR)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn base_layer(&self) -> &str {
        &self.base_layer
    }

    pub fn builder_layers(&self) -> impl Iterator<Item = &str> {
        self.builder_layers.iter().map(String::as_str)
    }

    pub fn supports(&self, app_type: &str) -> bool {
        self.builder_layers.contains(app_type)
    }

    pub fn base_image_name(&self) -> ImageName {
        ImageName::new(format!("base/{}-{}", self.base_layer, self.version))
    }

    pub fn builder_image_name(&self, app_type: &str) -> Result<ImageName, LayerError> {
        if !self.supports(app_type) {
            return Err(LayerError::NotSupported(app_type.to_owned()));
        }
        Ok(ImageName::new(format!(
            "builder/{}-{app_type}-{}",
            self.base_layer, self.version
        )))
    }
}
