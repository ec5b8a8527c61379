//! CLI subprocess integration tests.
//!
//! These tests invoke the `kiln` binary as a subprocess with the mock
//! container runtime and verify exit codes and JSON output.

use std::fs;
use std::path::Path;
use std::process::Command;

const REGISTRY: &str = "registry.test:5000";

fn kiln_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_kiln"));
    cmd.env_remove("KILN_REGISTRY")
        .env_remove("REGISTRY")
        .env_remove("REBUILD_IMAGE")
        .env("KILN_SKIP_PREREQS", "1");
    cmd
}

fn mock_kiln(layers: &Path) -> Command {
    let mut cmd = kiln_bin();
    cmd.args(["--runtime", "mock", "--registry", REGISTRY, "--json"])
        .arg("--layer-path")
        .arg(layers);
    cmd
}

fn write_layer_root(dir: &Path) {
    fs::write(dir.join("basename.txt"), "precise\n").unwrap();
    fs::write(dir.join("version.txt"), "1.0\n").unwrap();
    fs::create_dir_all(dir.join("builder/go1.2/sbin")).unwrap();
    fs::create_dir_all(dir.join("builder/python2.7/sbin")).unwrap();
}

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", "user.name=kiln", "-c", "user.email=kiln@example.com"])
        .args(["-c", "commit.gpgsign=false"])
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(output.status.success());
    String::from_utf8_lossy(&output.stdout).trim().to_owned()
}

#[test]
fn cli_version_exits_zero() {
    let output = kiln_bin().arg("--version").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("kiln"), "version output: {stdout}");
}

#[test]
fn cli_help_lists_commands() {
    let output = kiln_bin().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("build"));
    assert!(stdout.contains("boot"));
}

#[test]
fn cli_missing_registry_is_config_error() {
    let layers = tempfile::tempdir().unwrap();
    write_layer_root(layers.path());
    let output = kiln_bin()
        .args(["--runtime", "mock", "--layer-path"])
        .arg(layers.path())
        .arg("boot")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("registry"), "stderr: {stderr}");
}

#[test]
fn cli_registry_env_fallback() {
    let layers = tempfile::tempdir().unwrap();
    write_layer_root(layers.path());
    let output = kiln_bin()
        .env("REGISTRY", REGISTRY)
        .args(["--runtime", "mock", "--json", "--layer-path"])
        .arg(layers.path())
        .arg("boot")
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(&format!("{REGISTRY}/builder/precise-go1.2-1.0")));
}

#[test]
fn cli_unknown_runtime_is_config_error() {
    let output = kiln_bin()
        .args(["--runtime", "lxc", "--registry", REGISTRY, "boot"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn cli_mock_boot_reports_every_type() {
    let layers = tempfile::tempdir().unwrap();
    write_layer_root(layers.path());
    let output = mock_kiln(layers.path()).arg("boot").output().unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let outcomes = report["outcomes"].as_array().unwrap();
    assert_eq!(outcomes.len(), 2);
    let mut types: Vec<_> = outcomes
        .iter()
        .map(|o| o["app_type"].as_str().unwrap().to_owned())
        .collect();
    types.sort();
    assert_eq!(types, ["go1.2", "python2.7"]);
    assert!(outcomes.iter().all(|o| o["error"].is_null()));
}

#[test]
fn cli_boot_missing_layer_root_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = mock_kiln(&dir.path().join("absent")).arg("boot").output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not a directory"), "stderr: {stderr}");
}

#[test]
fn cli_incomplete_layer_root_is_config_error() {
    let layers = tempfile::tempdir().unwrap();
    fs::write(layers.path().join("basename.txt"), "precise\n").unwrap();
    fs::create_dir_all(layers.path().join("builder/go1.2")).unwrap();

    let output = mock_kiln(layers.path()).arg("boot").output().unwrap();
    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("version.txt"), "stderr: {stderr}");

    let manifests = tempfile::tempdir().unwrap();
    let output = mock_kiln(layers.path())
        .args(["build", "--url", "file:///nowhere", "--sha", "abc"])
        .arg("--manifest-dir")
        .arg(manifests.path())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn cli_build_escaping_rel_path_is_input_error() {
    let layers = tempfile::tempdir().unwrap();
    write_layer_root(layers.path());
    let manifests = tempfile::tempdir().unwrap();
    let output = mock_kiln(layers.path())
        .args(["build", "--url", "file:///nowhere", "--sha", "abc", "--rel", "../up"])
        .arg("--manifest-dir")
        .arg(manifests.path())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(fs::read_dir(manifests.path()).unwrap().next().is_none());
}

#[test]
fn cli_build_from_local_repo() {
    if !git_available() {
        return;
    }
    let layers = tempfile::tempdir().unwrap();
    write_layer_root(layers.path());
    let repo = tempfile::tempdir().unwrap();
    let manifest = "name = \"hello\"\napp_type = \"go1.2\"\nrun_commands = [\"./hello\"]\n";
    fs::create_dir_all(repo.path().join("svc")).unwrap();
    fs::write(repo.path().join("svc/manifest.toml"), manifest).unwrap();
    git(repo.path(), &["init", "-q"]);
    git(repo.path(), &["add", "."]);
    git(repo.path(), &["commit", "-q", "-m", "initial"]);
    let sha = git(repo.path(), &["rev-parse", "HEAD"]);

    let manifests = tempfile::tempdir().unwrap();
    let output = mock_kiln(layers.path())
        .args(["build", "--sha", &sha, "--rel", "svc", "--url"])
        .arg(format!("file://{}", repo.path().display()))
        .arg("--manifest-dir")
        .arg(manifests.path())
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let outcome: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(outcome["reference"], format!("{REGISTRY}/apps/hello-{sha}"));
    assert_eq!(outcome["skipped"], false);
    assert_eq!(outcome["checkout"]["commit"], sha.as_str());
    assert_eq!(
        fs::read_to_string(manifests.path().join("manifest.toml")).unwrap(),
        manifest
    );
}

#[test]
fn cli_build_unsupported_type_is_input_error() {
    if !git_available() {
        return;
    }
    let layers = tempfile::tempdir().unwrap();
    write_layer_root(layers.path());
    let repo = tempfile::tempdir().unwrap();
    fs::write(
        repo.path().join("manifest.toml"),
        "name = \"legacy\"\napp_type = \"cobol\"\nrun_commands = [\"./run\"]\n",
    )
    .unwrap();
    git(repo.path(), &["init", "-q"]);
    git(repo.path(), &["add", "."]);
    git(repo.path(), &["commit", "-q", "-m", "initial"]);
    let sha = git(repo.path(), &["rev-parse", "HEAD"]);

    let manifests = tempfile::tempdir().unwrap();
    let output = mock_kiln(layers.path())
        .args(["build", "--sha", &sha, "--url"])
        .arg(format!("file://{}", repo.path().display()))
        .arg("--manifest-dir")
        .arg(manifests.path())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}
