pub mod boot;
pub mod build;

use indicatif::{ProgressBar, ProgressStyle};
use kiln_core::CoreError;
use kiln_runtime::OverlayRunner;
use kiln_schema::LayerSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_INPUT_ERROR: u8 = 2;
pub const EXIT_CONFIG_ERROR: u8 = 3;

/// One-shot mode runs a single build per process; builds are still
/// serialized through this lock.
static BUILD_LOCK: Mutex<()> = Mutex::new(());

pub fn build_lock() -> MutexGuard<'static, ()> {
    BUILD_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared state for every command.
pub struct Context {
    pub runner: OverlayRunner,
    pub layer_path: PathBuf,
    pub json: bool,
    /// Show spinners; off when logging, streaming or emitting JSON.
    pub interactive: bool,
}

impl Context {
    pub fn spinner(&self, msg: &str) -> Option<ProgressBar> {
        self.interactive.then(|| spinner(msg))
    }
}

/// Render a core error, tagging request and manifest problems so `main`
/// can pick the exit code.
pub fn describe(e: &CoreError) -> String {
    if e.is_input_error() {
        format!("input error: {e}")
    } else {
        e.to_string()
    }
}

/// A layer root that cannot be read is a host configuration problem.
pub fn read_layers(layer_path: &Path) -> Result<LayerSet, String> {
    LayerSet::read(layer_path).map_err(|e| format!("config error: {e}"))
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        style("{spinner:.cyan} {msg}")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(style("{msg}"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(style("{msg}"));
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_result(ok: bool, text: &str) -> String {
    use console::Style;
    if ok {
        Style::new().green().apply_to(text).to_string()
    } else {
        Style::new().red().bold().apply_to(text).to_string()
    }
}
