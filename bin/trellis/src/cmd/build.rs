//! Build command - renders every page once

use std::{path::Path, sync::Arc};

use color_eyre::eyre::{Result, WrapErr};
use trellis_generator::Builder;

use super::{builder_for, load_config, print_build_stats};

/// Run the build command.
///
/// Returns the builder so the caller can keep applying incremental updates.
pub fn run(config_path: &Path, dest: Option<&Path>) -> Result<Arc<Builder>> {
    tracing::info!(?config_path, ?dest, "Starting build");

    let mut config = load_config(config_path)?;
    if let Some(dest) = dest {
        tracing::info!(dest = %dest.display(), "Overriding destination from CLI");
        config.dest = dest.to_string_lossy().into_owned();
    }

    let builder = builder_for(config)?;
    let stats = builder.build().wrap_err("Build failed")?;
    print_build_stats(&stats);

    if let Some(render) = stats.render
        && render.failed > 0
    {
        println!("  {} page(s) failed to render, see the log for details", render.failed);
        println!();
    }
    println!("  Output:       {}", builder.config().dest);
    println!();

    Ok(Arc::new(builder))
}
