//! Watch command - incremental rebuilds on source changes

use std::{path::Path, sync::Arc};

use color_eyre::eyre::{Result, WrapErr};
use tokio::task::JoinHandle;
use trellis_generator::{Builder, SourceWatcher};

/// Run the watch command.
pub async fn run(config_path: &Path) -> Result<()> {
    let builder = super::build::run(config_path, None)?;
    follow(builder).await
}

/// Watch every declared type of an already built site until Ctrl+C.
pub async fn follow(builder: Arc<Builder>) -> Result<()> {
    let session = start(builder)?;
    tracing::info!(watchers = session.watchers(), "Watching for changes");

    println!("  Watching for changes");
    println!("  Press Ctrl+C to stop");
    println!();

    tokio::signal::ctrl_c()
        .await
        .wrap_err("Failed to listen for Ctrl+C")?;

    tracing::info!("Stopping watch mode");
    session.stop().await
}

/// Running watchers plus the task applying their events.
pub struct WatchSession {
    builder: Arc<Builder>,
    watchers: Vec<SourceWatcher>,
    task: JoinHandle<()>,
}

impl WatchSession {
    /// Number of active watchers.
    pub fn watchers(&self) -> usize {
        self.watchers.len()
    }

    /// Stop the watchers, close the event queue and wait for the update loop
    /// to finish the event it is applying.
    pub async fn stop(self) -> Result<()> {
        let Self {
            builder,
            watchers,
            task,
        } = self;
        drop(watchers);
        let removed = builder.unsubscribe();
        tracing::debug!(removed, "Closed source event queue");

        task.await.wrap_err("Update loop terminated abnormally")
    }
}

/// Start the watchers and the update loop.
///
/// Events of every type feed one queue that a single blocking task drains in
/// arrival order. The loop runs until [`WatchSession::stop`].
pub fn start(builder: Arc<Builder>) -> Result<WatchSession> {
    let events = builder.subscribe();
    let watchers = match builder.watch() {
        Ok(watchers) => watchers,
        Err(e) => {
            builder.unsubscribe();
            return Err(e).wrap_err("Failed to start file watchers");
        }
    };

    let worker = Arc::clone(&builder);
    let task = tokio::task::spawn_blocking(move || worker.run(events));
    Ok(WatchSession {
        builder,
        watchers,
        task,
    })
}
