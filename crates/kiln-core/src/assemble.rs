//! Overlay directory layout for application builds.
//!
//! ```text
//! <overlay>/src/                       application tree, no .git
//! <overlay>/etc/kiln/info/build.json   checkout provenance
//! <overlay>/etc/kiln/info/build_utc    build timestamp
//! <overlay>/etc/sv/app<i>/run          one runit service per run command
//! <overlay>/etc/rsyslog.d/*.conf       log routing
//! <overlay>/etc/kiln/scripts/setup     setup commands
//! ```

use crate::checkout::CheckoutResult;
use crate::{fsutil, templates, CoreError};
use chrono::Utc;
use kiln_schema::Manifest;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const APP_DIR: &str = "src";
const INFO_DIR: &str = "etc/kiln/info";
const SCRIPTS_DIR: &str = "etc/kiln/scripts";
const SV_DIR: &str = "etc/sv";
const RSYSLOG_DIR: &str = "etc/rsyslog.d";

/// Copy the application source into `<overlay>/src` and return that path.
pub fn copy_app(overlay_dir: &Path, source_dir: &Path) -> Result<PathBuf, CoreError> {
    let app_dir = overlay_dir.join(APP_DIR);
    let copied = fsutil::copy_tree(source_dir, &app_dir, true)?;
    debug!("copied {copied} files into {}", app_dir.display());
    Ok(app_dir)
}

/// Write checkout provenance and the UTC build time.
pub fn write_info(overlay_dir: &Path, checkout: &CheckoutResult) -> Result<(), CoreError> {
    let info_dir = overlay_dir.join(INFO_DIR);
    fs::create_dir_all(&info_dir)?;
    fs::write(
        info_dir.join("build.json"),
        serde_json::to_string_pretty(checkout)?,
    )?;
    let stamp = Utc::now().format("%d %b %y %H:%M UTC").to_string();
    fs::write(info_dir.join("build_utc"), stamp)?;
    Ok(())
}

/// Materialize supervisor, log routing, and setup files for a manifest.
pub fn write_configs(overlay_dir: &Path, manifest: &Manifest) -> Result<(), CoreError> {
    for (idx, cmd) in manifest.run_commands.iter().enumerate() {
        let sv_dir = overlay_dir.join(SV_DIR).join(format!("app{idx}"));
        fsutil::create_private_dir(&sv_dir)?;
        fsutil::write_script(&sv_dir.join("run"), &templates::runit_script(cmd, idx))?;
    }

    let rsyslog_dir = overlay_dir.join(RSYSLOG_DIR);
    fsutil::create_private_dir(&rsyslog_dir)?;
    for idx in 0..manifest.run_commands.len() {
        fsutil::write_script(
            &rsyslog_dir.join(format!("app{idx}.conf")),
            &templates::rsyslog_app_config(idx),
        )?;
    }
    for facility in &manifest.facilities {
        fsutil::write_script(
            &rsyslog_dir.join(format!("{}.conf", facility.name)),
            &templates::rsyslog_custom_config(facility),
        )?;
    }

    let scripts_dir = overlay_dir.join(SCRIPTS_DIR);
    fsutil::create_private_dir(&scripts_dir)?;
    fsutil::write_script(
        &scripts_dir.join("setup"),
        &templates::setup_script(&manifest.setup_commands),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_schema::parse_manifest_str;

    fn manifest() -> Manifest {
        parse_manifest_str(
            r#"
name = "hello"
app_type = "go1.2"
run_commands = ["./web", "./worker"]
setup_commands = ["make"]

[logging.local4]
name = "audit"
info = "events"
"#,
        )
        .unwrap()
    }

    #[test]
    fn configs_cover_every_run_command_and_facility() {
        let dir = tempfile::tempdir().unwrap();
        write_configs(dir.path(), &manifest()).unwrap();

        let root = dir.path();
        assert!(root.join("etc/sv/app0/run").is_file());
        assert!(root.join("etc/sv/app1/run").is_file());
        assert!(!root.join("etc/sv/app2").exists());
        assert!(root.join("etc/rsyslog.d/app0.conf").is_file());
        assert!(root.join("etc/rsyslog.d/app1.conf").is_file());
        assert!(root.join("etc/rsyslog.d/audit.conf").is_file());

        let run = fs::read_to_string(root.join("etc/sv/app1/run")).unwrap();
        assert!(run.contains("./worker"));
        assert!(run.contains("local1.info"));
        let setup = fs::read_to_string(root.join("etc/kiln/scripts/setup")).unwrap();
        assert_eq!(setup, "#!/bin/bash -x\nmake\n");
    }

    #[test]
    fn info_records_provenance() {
        let dir = tempfile::tempdir().unwrap();
        let result = CheckoutResult {
            resolved_commit: "c0ffee".to_owned(),
            requested_ref: "c0ffee".to_owned(),
            ancestry: vec!["c0ffee".to_owned(), "beef".to_owned()],
        };
        write_info(dir.path(), &result).unwrap();

        let raw = fs::read_to_string(dir.path().join("etc/kiln/info/build.json")).unwrap();
        let parsed: CheckoutResult = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, result);
        let stamp = fs::read_to_string(dir.path().join("etc/kiln/info/build_utc")).unwrap();
        assert!(stamp.ends_with(" UTC"));
    }

    #[test]
    fn copy_app_lands_under_src() {
        let source = tempfile::tempdir().unwrap();
        fs::write(source.path().join("main.go"), "package main").unwrap();
        fs::create_dir(source.path().join(".git")).unwrap();

        let overlay = tempfile::tempdir().unwrap();
        let app_dir = copy_app(overlay.path(), source.path()).unwrap();
        assert_eq!(app_dir, overlay.path().join("src"));
        assert!(app_dir.join("main.go").is_file());
        assert!(!app_dir.join(".git").exists());
    }
}
