use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// File name of the manifest inside the source sub-path being built.
pub const MANIFEST_FILE: &str = "manifest.toml";

/// Each run command consumes one of the eight `local0..local7` syslog facilities.
pub const MAX_RUN_COMMANDS: usize = 8;

/// Runtime type that requires a language prebuild before containerization.
pub const JAVA_APP_TYPE: &str = "java1.7";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse manifest: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("manifest name must not be empty")]
    EmptyName,
    #[error("invalid manifest name '{0}', use lowercase letters, digits, '.', '_' and '-'")]
    InvalidName(String),
    #[error("manifest app_type must not be empty")]
    EmptyAppType,
    #[error("number of run commands must be between 1 and 8, manifest declared {0}")]
    RunCommandCount(usize),
    #[error("custom logging facilities cannot be declared with 8 run commands")]
    NoFreeFacilities,
    #[error("invalid custom facility '{facility}', must be one of local{first}..local7")]
    FacilityOutOfRange { facility: String, first: usize },
    #[error(
        "invalid key '{key}' for facility {facility}, only name and syslog severities are allowed"
    )]
    InvalidFacilityKey { facility: String, key: String },
    #[error("duplicate key '{key}' for facility {facility}")]
    DuplicateFacilityKey { facility: String, key: String },
    #[error("invalid log directory name '{name}' for facility {facility}")]
    InvalidLogDir { facility: String, name: String },
    #[error("log directory '{name}' of facility {facility} is already used by {owner}")]
    LogDirInUse {
        facility: String,
        name: String,
        owner: String,
    },
    #[error("invalid log file name '{file}' for {facility}.{severity}")]
    InvalidLogFile {
        facility: String,
        severity: Severity,
        file: String,
    },
}

/// Manifest document as authored, before validation.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ManifestData {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub internal: bool,
    #[serde(default)]
    pub app_type: String,
    #[serde(default)]
    pub java_type: String,
    #[serde(default)]
    pub run_commands: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub setup_commands: Vec<String>,
    #[serde(default)]
    pub cpu_shares: u32,
    #[serde(default)]
    pub memory_limit: u32,
    #[serde(default)]
    pub logging: BTreeMap<String, BTreeMap<String, String>>,
    /// Deprecated single-command form, only consulted when `run_commands` is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_command: Option<LegacyRunCommand>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum LegacyRunCommand {
    One(String),
    Many(Vec<String>),
}

/// Syslog severities a custom facility may route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Panic,
    Alert,
    Crit,
    Error,
    Warn,
    Notice,
    Info,
    Debug,
}

impl Severity {
    pub const ALL: [Severity; 8] = [
        Severity::Panic,
        Severity::Alert,
        Severity::Crit,
        Severity::Error,
        Severity::Warn,
        Severity::Notice,
        Severity::Info,
        Severity::Debug,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Panic => "panic",
            Severity::Alert => "alert",
            Severity::Crit => "crit",
            Severity::Error => "error",
            Severity::Warn => "warn",
            Severity::Notice => "notice",
            Severity::Info => "info",
            Severity::Debug => "debug",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Severity::ALL
            .into_iter()
            .find(|sev| sev.as_str() == lower)
            .ok_or(())
    }
}

/// A validated custom syslog facility and its per-severity log files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogFacility {
    /// Facility id, e.g. `local3`.
    pub facility: String,
    /// Directory under the log root; defaults to the facility id.
    pub name: String,
    /// Severity -> log file stem.
    pub routes: BTreeMap<Severity, String>,
}

/// A manifest that passed validation. Safe to hand to overlay assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub name: String,
    pub description: String,
    pub internal: bool,
    pub app_type: String,
    pub java_type: Option<String>,
    pub run_commands: Vec<String>,
    pub dependencies: Vec<String>,
    pub setup_commands: Vec<String>,
    pub cpu_shares: u32,
    pub memory_limit: u32,
    pub facilities: Vec<LogFacility>,
}

impl Manifest {
    pub fn needs_java_prebuild(&self) -> bool {
        self.app_type == JAVA_APP_TYPE
    }
}

impl ManifestData {
    /// Fold the legacy `run_command` field and `java1.7-<kind>` app types
    /// into their current representation.
    fn apply_compat(&mut self) {
        if let Some((base, kind)) = self.app_type.split_once('-') {
            if base == JAVA_APP_TYPE && !kind.is_empty() {
                self.java_type = kind.to_owned();
                self.app_type = base.to_owned();
            }
        }

        if !self.run_commands.is_empty() {
            return;
        }
        match self.run_command.take() {
            Some(LegacyRunCommand::One(cmd)) => self.run_commands = vec![cmd],
            Some(LegacyRunCommand::Many(cmds)) => self.run_commands = cmds,
            None => {}
        }
    }

    pub fn validate(mut self) -> Result<Manifest, ManifestError> {
        self.apply_compat();

        if self.name.trim().is_empty() {
            return Err(ManifestError::EmptyName);
        }
        if !is_image_component(&self.name) {
            return Err(ManifestError::InvalidName(self.name));
        }
        if self.app_type.trim().is_empty() {
            return Err(ManifestError::EmptyAppType);
        }

        let num_cmds = self.run_commands.len();
        if !(1..=MAX_RUN_COMMANDS).contains(&num_cmds) {
            return Err(ManifestError::RunCommandCount(num_cmds));
        }
        if num_cmds == MAX_RUN_COMMANDS && !self.logging.is_empty() {
            return Err(ManifestError::NoFreeFacilities);
        }

        let facilities = self
            .logging
            .iter()
            .map(|(facility, desc)| validate_facility(facility, desc, num_cmds))
            .collect::<Result<Vec<_>, _>>()?;
        check_log_dirs(&facilities, num_cmds)?;

        Ok(Manifest {
            name: self.name,
            description: self.description,
            internal: self.internal,
            app_type: self.app_type,
            java_type: Some(self.java_type).filter(|t| !t.is_empty()),
            run_commands: self.run_commands,
            dependencies: self.dependencies,
            setup_commands: self.setup_commands,
            cpu_shares: self.cpu_shares,
            memory_limit: self.memory_limit,
            facilities,
        })
    }
}

fn facility_index(facility: &str) -> Option<usize> {
    let digits = facility.strip_prefix("local")?;
    if digits.len() != 1 {
        return None;
    }
    digits.parse().ok()
}

fn is_dir_name(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Usable as a path component of an image reference.
fn is_image_component(s: &str) -> bool {
    s.starts_with(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit())
        && s.chars().all(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '_' || c == '-'
        })
}

/// Each run command owns `app<i>`; custom facilities must not reuse those
/// or each other's directories.
fn check_log_dirs(facilities: &[LogFacility], num_cmds: usize) -> Result<(), ManifestError> {
    let mut owners: BTreeMap<String, String> = (0..num_cmds)
        .map(|i| (format!("app{i}"), format!("run command {i}")))
        .collect();
    for fac in facilities {
        if let Some(owner) = owners.insert(fac.name.clone(), format!("facility {}", fac.facility)) {
            return Err(ManifestError::LogDirInUse {
                facility: fac.facility.clone(),
                name: fac.name.clone(),
                owner,
            });
        }
    }
    Ok(())
}

fn is_file_name(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        && s != "."
        && s != ".."
}

fn validate_facility(
    facility: &str,
    desc: &BTreeMap<String, String>,
    first_free: usize,
) -> Result<LogFacility, ManifestError> {
    match facility_index(facility) {
        Some(idx) if (first_free..MAX_RUN_COMMANDS).contains(&idx) => {}
        _ => {
            return Err(ManifestError::FacilityOutOfRange {
                facility: facility.to_owned(),
                first: first_free,
            })
        }
    }

    let mut name = None;
    let mut routes = BTreeMap::new();
    for (key, value) in desc {
        if key.eq_ignore_ascii_case("name") {
            if !is_dir_name(value) {
                return Err(ManifestError::InvalidLogDir {
                    facility: facility.to_owned(),
                    name: value.clone(),
                });
            }
            if name.replace(value.clone()).is_some() {
                return Err(ManifestError::DuplicateFacilityKey {
                    facility: facility.to_owned(),
                    key: key.clone(),
                });
            }
            continue;
        }

        let severity: Severity = key.parse().map_err(|()| ManifestError::InvalidFacilityKey {
            facility: facility.to_owned(),
            key: key.clone(),
        })?;
        if !is_file_name(value) {
            return Err(ManifestError::InvalidLogFile {
                facility: facility.to_owned(),
                severity,
                file: value.clone(),
            });
        }
        if routes.insert(severity, value.clone()).is_some() {
            return Err(ManifestError::DuplicateFacilityKey {
                facility: facility.to_owned(),
                key: key.clone(),
            });
        }
    }

    Ok(LogFacility {
        facility: facility.to_owned(),
        name: name.unwrap_or_else(|| facility.to_owned()),
        routes,
    })
}

pub fn parse_manifest_str(input: &str) -> Result<Manifest, ManifestError> {
    let data: ManifestData = toml::from_str(input)?;
    data.validate()
}

pub fn parse_manifest_file(path: impl AsRef<Path>) -> Result<Manifest, ManifestError> {
    let content = fs::read_to_string(path)?;
    parse_manifest_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_run_commands(n: usize) -> String {
        let cmds: Vec<String> = (0..n).map(|i| format!("\"./server-{i}\"")).collect();
        format!(
            r#"
name = "hello"
app_type = "go1.2"
run_commands = [{}]
"#,
            cmds.join(", ")
        )
    }

    #[test]
    fn parses_full_manifest() {
        let input = r#"
name = "hello"
description = "says hello"
internal = true
app_type = "ruby1.9.3"
run_commands = ["bundle exec rackup", "bundle exec sidekiq"]
dependencies = ["redis"]
setup_commands = ["bundle install --deployment"]
cpu_shares = 2
memory_limit = 512

[logging.local4]
name = "metrics"
info = "events"
Error = "failures"
"#;
        let manifest = parse_manifest_str(input).expect("should parse");
        assert_eq!(manifest.name, "hello");
        assert!(manifest.internal);
        assert_eq!(manifest.run_commands.len(), 2);
        assert_eq!(manifest.setup_commands, vec!["bundle install --deployment"]);
        assert_eq!(manifest.cpu_shares, 2);
        assert_eq!(manifest.memory_limit, 512);
        assert!(manifest.java_type.is_none());

        assert_eq!(manifest.facilities.len(), 1);
        let fac = &manifest.facilities[0];
        assert_eq!(fac.facility, "local4");
        assert_eq!(fac.name, "metrics");
        assert_eq!(fac.routes.get(&Severity::Info).map(String::as_str), Some("events"));
        assert_eq!(fac.routes.get(&Severity::Error).map(String::as_str), Some("failures"));
    }

    #[test]
    fn legacy_run_command_string() {
        let manifest = parse_manifest_str(
            r#"
name = "legacy"
app_type = "python2.7"
run_command = "python app.py"
"#,
        )
        .unwrap();
        assert_eq!(manifest.run_commands, vec!["python app.py"]);
    }

    #[test]
    fn legacy_run_command_array() {
        let manifest = parse_manifest_str(
            r#"
name = "legacy"
app_type = "python2.7"
run_command = ["python a.py", "python b.py"]
"#,
        )
        .unwrap();
        assert_eq!(manifest.run_commands, vec!["python a.py", "python b.py"]);
    }

    #[test]
    fn run_commands_take_precedence_over_legacy_field() {
        let manifest = parse_manifest_str(
            r#"
name = "both"
app_type = "python2.7"
run_commands = ["new"]
run_command = "old"
"#,
        )
        .unwrap();
        assert_eq!(manifest.run_commands, vec!["new"]);
    }

    #[test]
    fn java_app_type_is_split() {
        let manifest = parse_manifest_str(
            r#"
name = "jvm"
app_type = "java1.7-scala"
run_commands = ["java -jar app.jar"]
"#,
        )
        .unwrap();
        assert_eq!(manifest.app_type, "java1.7");
        assert_eq!(manifest.java_type.as_deref(), Some("scala"));
        assert!(manifest.needs_java_prebuild());
    }

    #[test]
    fn rejects_zero_run_commands() {
        let err = parse_manifest_str(&with_run_commands(0)).unwrap_err();
        assert!(matches!(err, ManifestError::RunCommandCount(0)));
    }

    #[test]
    fn rejects_nine_run_commands() {
        let err = parse_manifest_str(&with_run_commands(9)).unwrap_err();
        assert!(matches!(err, ManifestError::RunCommandCount(9)));
    }

    #[test]
    fn accepts_eight_run_commands_without_logging() {
        let manifest = parse_manifest_str(&with_run_commands(8)).unwrap();
        assert_eq!(manifest.run_commands.len(), 8);
    }

    #[test]
    fn rejects_custom_facility_with_eight_run_commands() {
        let input = format!("{}\n[logging.local7]\ninfo = \"x\"\n", with_run_commands(8));
        let err = parse_manifest_str(&input).unwrap_err();
        assert!(matches!(err, ManifestError::NoFreeFacilities));
    }

    #[test]
    fn rejects_facility_claimed_by_run_command() {
        let input = format!("{}\n[logging.local1]\ninfo = \"x\"\n", with_run_commands(2));
        let err = parse_manifest_str(&input).unwrap_err();
        assert!(matches!(
            err,
            ManifestError::FacilityOutOfRange { ref facility, first: 2 } if facility == "local1"
        ));
    }

    #[test]
    fn rejects_non_local_facility() {
        for bad in ["user", "local8", "local12", "xlocal5"] {
            let input = format!("{}\n[logging.{bad}]\ninfo = \"x\"\n", with_run_commands(1));
            assert!(
                matches!(
                    parse_manifest_str(&input),
                    Err(ManifestError::FacilityOutOfRange { .. })
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_unknown_facility_key() {
        let input = format!("{}\n[logging.local3]\nverbose = \"x\"\n", with_run_commands(1));
        let err = parse_manifest_str(&input).unwrap_err();
        assert!(matches!(err, ManifestError::InvalidFacilityKey { ref key, .. } if key == "verbose"));
    }

    #[test]
    fn rejects_bad_log_dir_and_file_names() {
        let input = format!("{}\n[logging.local3]\nname = \"../etc\"\n", with_run_commands(1));
        assert!(matches!(
            parse_manifest_str(&input),
            Err(ManifestError::InvalidLogDir { .. })
        ));

        let input = format!("{}\n[logging.local3]\ninfo = \"a/b\"\n", with_run_commands(1));
        assert!(matches!(
            parse_manifest_str(&input),
            Err(ManifestError::InvalidLogFile { .. })
        ));
    }

    #[test]
    fn rejects_case_variant_duplicates() {
        let input = format!(
            "{}\n[logging.local3]\ninfo = \"a\"\nINFO = \"b\"\n",
            with_run_commands(1)
        );
        assert!(matches!(
            parse_manifest_str(&input),
            Err(ManifestError::DuplicateFacilityKey { .. })
        ));
    }

    #[test]
    fn facility_name_defaults_to_facility_id() {
        let input = format!("{}\n[logging.local5]\nwarn = \"w\"\n", with_run_commands(3));
        let manifest = parse_manifest_str(&input).unwrap();
        assert_eq!(manifest.facilities[0].name, "local5");
    }

    #[test]
    fn rejects_log_dir_of_run_command() {
        let input = format!("{}\n[logging.local3]\nname = \"app0\"\n", with_run_commands(1));
        let err = parse_manifest_str(&input).unwrap_err();
        assert!(matches!(
            err,
            ManifestError::LogDirInUse { ref name, ref owner, .. }
                if name == "app0" && owner == "run command 0"
        ));

        // app3 is free when only two run commands exist.
        let input = format!("{}\n[logging.local3]\nname = \"app3\"\n", with_run_commands(2));
        assert_eq!(parse_manifest_str(&input).unwrap().facilities[0].name, "app3");
    }

    #[test]
    fn rejects_log_dir_shared_by_facilities() {
        let input = format!(
            "{}\n[logging.local4]\nname = \"audit\"\n\n[logging.local5]\nname = \"audit\"\n",
            with_run_commands(1)
        );
        let err = parse_manifest_str(&input).unwrap_err();
        assert!(matches!(
            err,
            ManifestError::LogDirInUse { ref facility, ref owner, .. }
                if facility == "local5" && owner == "facility local4"
        ));

        // An explicit name may not take another facility's default directory.
        let input = format!(
            "{}\n[logging.local4]\ninfo = \"i\"\n\n[logging.local5]\nname = \"local4\"\n",
            with_run_commands(1)
        );
        assert!(matches!(
            parse_manifest_str(&input),
            Err(ManifestError::LogDirInUse { .. })
        ));
    }

    #[test]
    fn rejects_names_unusable_in_image_references() {
        for bad in ["Hello", "my app", "apps/hello", "-hello", ".hidden"] {
            let input = format!("name = \"{bad}\"\napp_type = \"go1.2\"\nrun_commands = [\"x\"]\n");
            assert!(
                matches!(parse_manifest_str(&input), Err(ManifestError::InvalidName(_))),
                "{bad} should be rejected"
            );
        }
        let input = "name = \"hello_web-2.0\"\napp_type = \"go1.2\"\nrun_commands = [\"x\"]\n";
        assert_eq!(parse_manifest_str(input).unwrap().name, "hello_web-2.0");
    }

    #[test]
    fn rejects_missing_name() {
        let err = parse_manifest_str("app_type = \"go\"\nrun_commands = [\"x\"]\n").unwrap_err();
        assert!(matches!(err, ManifestError::EmptyName));
    }

    #[test]
    fn severity_parse_is_case_insensitive() {
        assert_eq!("CRIT".parse::<Severity>(), Ok(Severity::Crit));
        assert_eq!("Notice".parse::<Severity>(), Ok(Severity::Notice));
        assert!("name".parse::<Severity>().is_err());
    }

    #[test]
    fn parse_manifest_file_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        fs::write(&path, with_run_commands(1)).unwrap();
        let manifest = parse_manifest_file(&path).unwrap();
        assert_eq!(manifest.name, "hello");
        assert!(parse_manifest_file(dir.path().join("missing.toml")).is_err());
    }
}
