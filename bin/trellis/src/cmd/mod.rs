//! CLI command implementations.

pub mod build;
pub mod serve;
pub mod watch;

use std::{path::Path, sync::Arc};

use color_eyre::eyre::{Result, WrapErr};
use trellis_core::Config;
use trellis_generator::{BuildStats, Builder, BuiltinTemplater, TemplaterOptions};

/// Load the configuration file, layered with `TRELLIS__*` variables.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load_with_env(path)
        .wrap_err_with(|| format!("Failed to load configuration from {}", path.display()))?;
    tracing::debug!(?config, "Loaded configuration");
    Ok(config)
}

/// Create a builder backed by the built-in templater.
pub fn builder_for(config: Config) -> Result<Builder> {
    let templater = Arc::new(BuiltinTemplater::new(TemplaterOptions::from(&config)));
    Builder::new(config, templater).wrap_err("Invalid build configuration")
}

/// Print build statistics in a user-friendly format.
pub fn print_build_stats(stats: &BuildStats) {
    println!();
    println!("  Build Statistics:");
    println!("  ─────────────────────────────────");
    println!("  Files:        {:>6}", stats.files);
    println!("  Cached:       {:>6}", stats.cached);
    println!("  Generated:    {:>6}", stats.generated);
    println!("  Templates:    {:>6}", stats.templates);
    if let Some(render) = stats.render {
        println!("  Rendered:     {:>6}", render.rendered);
        println!("  Skipped:      {:>6}", render.skipped);
        println!("  Failed:       {:>6}", render.failed);
    }
    println!("  ─────────────────────────────────");
    println!("  Duration:     {:>6}ms", stats.duration_ms);
    println!();
}
