//! Build orchestration for kiln.
//!
//! This crate ties together manifest parsing, builder layer naming, and the
//! overlay runner into the two pipelines kiln exposes: `build_app`, which
//! turns a checked out commit into an application image, and `boot`, which
//! rebuilds every builder layer from the base image in parallel. It also owns
//! the git checkout protocol and the overlay directory layout.

pub mod assemble;
pub mod boot;
pub mod build;
pub mod checkout;
pub mod fsutil;
pub mod prebuild;
pub mod templates;

pub use boot::{boot, boot_with_timeout, BootOutcome, BootReport, BOOT_TIMEOUT};
pub use build::{
    app_image_name, build_app, BuildOptions, BuildOutcome, BuildRequest, APP_BUILD_TIMEOUT,
};
pub use checkout::{checkout, CheckoutError, CheckoutResult};

use std::any::Any;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("manifest error: {0}")]
    Manifest(#[from] kiln_schema::ManifestError),
    #[error("layer error: {0}")]
    Layer(#[from] kiln_schema::LayerError),
    #[error("runtime error: {0}")]
    Runtime(#[from] kiln_runtime::RuntimeError),
    #[error("checkout error: {0}")]
    Checkout(#[from] CheckoutError),
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    #[error("relative path '{0}' must stay inside the repository")]
    InvalidRelPath(String),
    #[error("manifest not found at {}", .0.display())]
    ManifestNotFound(PathBuf),
    #[error("unsupported java type '{0}', expected scala or maven")]
    UnsupportedJavaType(String),
    #[error("prebuild failed: {0}")]
    Prebuild(String),
    #[error("layer root {} is not a directory", .0.display())]
    LayerRootMissing(PathBuf),
    #[error("boot failed for {}", .0.join(", "))]
    BootFailed(Vec<String>),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Errors caused by the request or the manifest rather than the host.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            CoreError::Manifest(_)
                | CoreError::Layer(kiln_schema::LayerError::NotSupported(_))
                | CoreError::Checkout(CheckoutError::RefNotFound(_) | CheckoutError::InvalidLocation(_))
                | CoreError::EmptyField(_)
                | CoreError::InvalidRelPath(_)
                | CoreError::ManifestNotFound(_)
                | CoreError::UnsupportedJavaType(_)
        )
    }
}

/// Render a caught panic payload as a message.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
