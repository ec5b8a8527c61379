use super::{
    colorize_result, describe, json_pretty, read_layers, spin_fail, spin_ok, Context, EXIT_SUCCESS,
};
use kiln_core::{boot, BootReport, CoreError};
use tracing::debug;

fn print_report(report: &BootReport) {
    for outcome in &report.outcomes {
        match &outcome.error {
            None => println!(
                "{} {} -> {}",
                colorize_result(true, "✓"),
                outcome.app_type,
                outcome.image
            ),
            Some(err) => println!(
                "{} {}: {err}",
                colorize_result(false, "✗"),
                outcome.app_type
            ),
        }
    }
}

pub fn run(ctx: &Context) -> Result<u8, String> {
    if !ctx.layer_path.is_dir() {
        return Err(describe(&CoreError::LayerRootMissing(ctx.layer_path.clone())));
    }
    let layers = read_layers(&ctx.layer_path)?;

    debug!(
        "booting from {} into {}",
        layers.base_image_name(),
        ctx.runner.registry()
    );
    let pb = ctx.spinner(&format!(
        "booting {} builder layers...",
        layers.builder_layers().count()
    ));
    let report = match boot(&ctx.runner, &layers, &ctx.layer_path) {
        Ok(r) => r,
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "boot failed");
            }
            return Err(describe(&e));
        }
    };
    if let Some(ref pb) = pb {
        if report.is_success() {
            spin_ok(pb, "builder layers provisioned");
        } else {
            spin_fail(pb, "some builder layers failed");
        }
    }

    if ctx.json {
        println!("{}", json_pretty(&report)?);
    } else {
        print_report(&report);
    }
    report.into_result().map_err(|e| describe(&e))?;
    Ok(EXIT_SUCCESS)
}
