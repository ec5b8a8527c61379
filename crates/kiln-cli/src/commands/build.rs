use super::{
    build_lock, describe, json_pretty, read_layers, spin_fail, spin_ok, Context, EXIT_SUCCESS,
};
use kiln_core::{build_app, BuildOptions, BuildRequest};
use std::path::Path;
use tracing::debug;

pub fn run(
    ctx: &Context,
    request: &BuildRequest,
    manifest_dir: &Path,
    rebuild: bool,
) -> Result<u8, String> {
    let _lock = build_lock();
    request.validate().map_err(|e| describe(&e))?;
    let layers = read_layers(&ctx.layer_path)?;

    debug!(
        "layers {}-{} from {}",
        layers.base_layer(),
        layers.version(),
        ctx.layer_path.display()
    );

    let options = BuildOptions {
        rebuild,
        ..BuildOptions::default()
    };
    let pb = ctx.spinner(&format!("building {} at {}...", request.url, request.sha));
    let outcome = match build_app(&ctx.runner, request, manifest_dir, &layers, &options) {
        Ok(o) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, if o.skipped { "image already exists" } else { "image built" });
            }
            o
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "build failed");
            }
            return Err(describe(&e));
        }
    };

    if ctx.json {
        println!("{}", json_pretty(&outcome)?);
    } else {
        if outcome.skipped {
            println!("{} already exists, nothing built", outcome.reference);
        } else {
            println!("built {}", outcome.reference);
        }
        println!("commit: {}", outcome.checkout.resolved_commit);
    }
    Ok(EXIT_SUCCESS)
}
