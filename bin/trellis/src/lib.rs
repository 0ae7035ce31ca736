//! Trellis CLI Library
//!
//! Command implementations and the development server behind the `trellis`
//! binary.
//!
//! # Modules
//!
//! - [`cmd`] - Command implementations (build, watch, serve)
//! - [`server`] - Development server with on-demand rendering and live reload
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use trellis::cmd;
//!
//! // Render every page once
//! cmd::build::run(Path::new("trellis.toml"), None).unwrap();
//! ```

pub mod cmd;
pub mod server;

// Re-export core types for convenience
pub use trellis_core::Config;
pub use trellis_generator::{BuildMode, BuildStats, Builder};

/// Initialize tracing with the specified verbosity level.
///
/// # Arguments
///
/// * `verbose` - Verbosity level (0 = WARN, 1 = INFO, 2 = DEBUG, 3+ = TRACE)
pub fn init_tracing(verbose: u8) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}
