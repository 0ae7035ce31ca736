//! Serve command - development server with on-demand rendering

use std::{path::Path, sync::Arc};

use color_eyre::eyre::{Result, WrapErr};
use tokio::net::TcpListener;
use trellis_generator::BuildMode;

use super::{builder_for, load_config, print_build_stats};
use crate::server::{ServerState, create_router};

/// Run the serve command.
///
/// Pages are cached but not written; the server renders them per request
/// from the live cache and reloads connected browsers on every update.
pub async fn run(config_path: &Path, port: Option<u16>, open_browser: bool) -> Result<()> {
    let mut config = load_config(config_path)?;
    config.compile_static_files = false;
    if let Some(port) = port {
        config.server.port = port;
    }
    let port = config.server.port;
    let open_browser = open_browser || config.server.open;
    tracing::info!(?config_path, port, "Starting dev server");

    let builder = Arc::new(builder_for(config)?.with_mode(BuildMode::Serve));
    let state = Arc::new(ServerState::new(
        builder.config(),
        builder.cache(),
        builder.templater(),
    ));
    state.bind_events(&builder.bus());

    let stats = builder.build().wrap_err("Initial build failed")?;
    print_build_stats(&stats);
    let routes = state.register_routes();
    tracing::info!(routes, "Registered page routes");

    let session = super::watch::start(Arc::clone(&builder))?;

    let app = create_router(state);
    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind to {addr}"))?;

    println!();
    println!("  Dev server running at http://{addr}");
    println!("  Press Ctrl+C to stop");
    println!();

    if open_browser && let Err(e) = open::that(format!("http://{addr}")) {
        tracing::warn!(error = %e, "Failed to open browser");
    }

    // Open live reload streams never finish, so the server future is dropped
    // instead of drained.
    tokio::select! {
        served = axum::serve(listener, app).into_future() => served.wrap_err("Server error")?,
        signal = tokio::signal::ctrl_c() => signal.wrap_err("Failed to listen for Ctrl+C")?,
    }

    tracing::info!("Stopping dev server");
    session.stop().await
}
