use std::fmt;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn docker_prereq() -> Option<MissingPrereq> {
    if command_exists("docker") {
        return None;
    }
    Some(MissingPrereq {
        name: "docker",
        purpose: "running provisioning containers and pushing images",
        install_hint: "apt install docker.io | dnf install moby-engine | pacman -S docker",
    })
}

/// Prerequisites for building application images.
pub fn check_build_prereqs() -> Vec<MissingPrereq> {
    let mut missing: Vec<_> = docker_prereq().into_iter().collect();
    if !command_exists("git") {
        missing.push(MissingPrereq {
            name: "git",
            purpose: "checking out application sources",
            install_hint: "apt install git | dnf install git | pacman -S git",
        });
    }
    missing
}

/// Prerequisites for rebuilding the builder layers.
pub fn check_boot_prereqs() -> Vec<MissingPrereq> {
    docker_prereq().into_iter().collect()
}

pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nkiln drives these tools to build container images.");
    msg
}
