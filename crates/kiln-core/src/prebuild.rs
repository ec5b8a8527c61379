use crate::{fsutil, CoreError};
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, info};

const ARTIFACT_DIR: &str = "target";
const ARTIFACT_SUFFIX: &str = ".jar";
const SBT_ARGS: &[&str] = &["assembly"];
const MVN_ARGS: &[&str] = &["package"];

/// Packaging command for a java sub-type.
pub fn java_prebuild_command(
    java_type: Option<&str>,
) -> Result<(&'static str, &'static [&'static str]), CoreError> {
    match java_type {
        Some("scala") => Ok(("sbt", SBT_ARGS)),
        Some("maven") => Ok(("mvn", MVN_ARGS)),
        other => Err(CoreError::UnsupportedJavaType(
            other.unwrap_or_default().to_owned(),
        )),
    }
}

/// Package the application in `app_dir`, then drop everything under
/// `target/` except the built jars.
pub fn run_java_prebuild(app_dir: &Path, java_type: Option<&str>) -> Result<(), CoreError> {
    let (program, args) = java_prebuild_command(java_type)?;
    info!("running {program} {} in {}", args.join(" "), app_dir.display());

    let output = Command::new(program)
        .args(args)
        .current_dir(app_dir)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| CoreError::Prebuild(format!("cannot run {program}: {e}")))?;
    debug!("{program} stdout:\n{}", String::from_utf8_lossy(&output.stdout));
    if !output.status.success() {
        return Err(CoreError::Prebuild(format!(
            "{program} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let pruned = fsutil::prune_except_suffix(&app_dir.join(ARTIFACT_DIR), ARTIFACT_SUFFIX)?;
    debug!("pruned {pruned} intermediate files");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_java_types() {
        assert_eq!(java_prebuild_command(Some("scala")).unwrap(), ("sbt", &["assembly"][..]));
        assert_eq!(java_prebuild_command(Some("maven")).unwrap(), ("mvn", &["package"][..]));
    }

    #[test]
    fn unknown_java_type_is_input_error() {
        let err = java_prebuild_command(Some("gradle")).unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedJavaType(ref t) if t == "gradle"));
        assert!(err.is_input_error());
        assert!(java_prebuild_command(None).is_err());
    }

    #[test]
    fn unknown_java_type_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("target")).unwrap();
        std::fs::write(dir.path().join("target/notes.txt"), "x").unwrap();
        assert!(run_java_prebuild(dir.path(), Some("ant")).is_err());
        assert!(dir.path().join("target/notes.txt").exists());
    }
}
