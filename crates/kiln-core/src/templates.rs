//! Text of the supervisor, syslog, and setup files placed in the overlay.

use kiln_schema::LogFacility;
use std::fmt::Write as _;

/// Directory inside the image that receives per-app log files.
pub const LOG_ROOT: &str = "/var/log/kiln";
const LOG_ROTATE_SIZE: u64 = 10_485_760;
const LOG_ROTATE_CMD: &str = "/etc/logrot";

/// runit `run` script for the `idx`-th run command. stdout goes to
/// `local<idx>.info`, stderr to `local<idx>.error`.
pub fn runit_script(cmd: &str, idx: usize) -> String {
    format!(
        "#!/bin/bash\n\
         cd /app\n\
         {{ exec chpst -u user1 {cmd} | logger -p local{idx}.info; }} 2>&1 | logger -p local{idx}.error\n"
    )
}

fn outchannel(channel: &str, dir: &str, file: &str) -> String {
    format!("$outchannel {channel},{LOG_ROOT}/{dir}/{file}.log,{LOG_ROTATE_SIZE},{LOG_ROTATE_CMD}\n")
}

/// rsyslog routing for the `idx`-th run command.
pub fn rsyslog_app_config(idx: usize) -> String {
    let app = format!("app{idx}");
    let mut out = format!("# config for {app}\n");
    out.push_str(&outchannel(&format!("{app}Info"), &app, "stdout"));
    out.push_str(&outchannel(&format!("{app}Error"), &app, "stderr"));
    out.push('\n');
    let _ = writeln!(out, "local{idx}.=info  :omfile:${app}Info");
    let _ = writeln!(out, "local{idx}.=error :omfile:${app}Error");
    let _ = writeln!(out, "local{idx}.=crit  :omfile:${app}Error");
    out
}

/// rsyslog routing for a custom facility: one output channel per severity.
pub fn rsyslog_custom_config(facility: &LogFacility) -> String {
    let fac = &facility.facility;
    let mut out = format!("# config for {} on {fac}\n", facility.name);
    for (severity, file) in &facility.routes {
        let channel = format!("{fac}{severity}");
        out.push_str(&outchannel(&channel, &facility.name, file));
        let _ = writeln!(out, "{fac}.={severity}  :omfile:${channel}");
    }
    out
}

/// Bash script running every setup command in order, traced.
pub fn setup_script(commands: &[String]) -> String {
    let mut out = String::from("#!/bin/bash -x\n");
    for cmd in commands {
        out.push_str(cmd);
        out.push('\n');
    }
    out
}
