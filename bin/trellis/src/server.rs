//! Development server with on-demand rendering and live reload support

use std::{collections::HashMap, convert::Infallible, path::PathBuf, sync::Arc, time::Duration};

use axum::{
    Router,
    extract::{Request, State},
    http::StatusCode,
    response::{
        Html, IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::get,
};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};
use tower::ServiceExt;
use tower_http::services::ServeDir;
use trellis_core::{Config, content::PAGES};
use trellis_generator::{
    Event as BusEvent, EventBus, Rendered, SharedCache, TemplateError, Templater,
};

/// Live reload notification.
#[derive(Debug, Clone)]
pub struct ReloadMessage {
    /// Page that changed, `None` after a full update.
    pub page: Option<String>,
}

/// Server state: routes, the live cache and the reload broadcaster.
pub struct ServerState {
    /// Broadcast channel for live reload events.
    pub reload_tx: broadcast::Sender<ReloadMessage>,
    routes: RwLock<HashMap<String, String>>,
    cache: SharedCache,
    templater: Arc<dyn Templater>,
    dest: PathBuf,
    ext: String,
    use_ext: bool,
}

impl ServerState {
    /// Create a new server state.
    pub fn new(config: &Config, cache: SharedCache, templater: Arc<dyn Templater>) -> Self {
        let (reload_tx, _) = broadcast::channel(16);
        Self {
            reload_tx,
            routes: RwLock::new(HashMap::new()),
            cache,
            templater,
            dest: PathBuf::from(&config.dest),
            ext: config.ext.clone(),
            use_ext: config.server.use_ext,
        }
    }

    /// Send a reload notification to all connected clients.
    pub fn notify_reload(&self, page: Option<String>) {
        tracing::debug!(?page, "Notifying live reload clients");
        let _ = self.reload_tx.send(ReloadMessage { page });
    }

    /// URL path a page with `server_file` is served under.
    pub fn route_for(&self, server_file: &str) -> String {
        if self.use_ext {
            format!("/{server_file}{}", self.ext)
        } else {
            format!("/{server_file}")
        }
    }

    /// Serve page `id` under the route of `server_file`; `index` is also
    /// served at `/`.
    pub fn register_route(&self, id: &str, server_file: &str) {
        let route = self.route_for(server_file);
        tracing::debug!(id, route = %route, "Registering route");

        let mut routes = self.routes.write();
        if server_file == "index" || server_file.ends_with("/index") {
            let root = format!("/{}", server_file.trim_end_matches("index"));
            routes.insert(root, id.to_string());
        }
        routes.insert(route, id.to_string());
    }

    /// Register a route for every cached page. Returns the number of pages.
    pub fn register_routes(&self) -> usize {
        let pages: Vec<(String, String)> = {
            let cache = self.cache.read();
            cache
                .repository(PAGES)
                .iter()
                .filter_map(|id| cache.page(id).map(|p| (id.clone(), p.server_file.clone())))
                .collect()
        };
        for (id, server_file) in &pages {
            self.register_route(id, server_file);
        }
        pages.len()
    }

    /// Page id registered for a URL path.
    pub fn resolve(&self, path: &str) -> Option<String> {
        self.routes.read().get(path).cloned()
    }

    /// Render the page behind a URL path from the current cache.
    ///
    /// `None` when no route matches or the page is no longer cached.
    pub fn render_route(&self, path: &str) -> Option<Result<Rendered, TemplateError>> {
        let id = self.resolve(path)?;
        let cache = self.cache.read();
        let page = cache.page(&id)?;
        Some(self.templater.render_one(page, &cache))
    }

    /// Reload clients on cache updates and add routes for new pages.
    pub fn bind_events(self: &Arc<Self>, bus: &EventBus) {
        let state = Arc::clone(self);
        bus.on(bus.cache_updated_name(), move |event| {
            if let BusEvent::CacheUpdated { page } = event {
                state.notify_reload(page.clone());
            }
            Ok(())
        });

        let state = Arc::clone(self);
        bus.on(bus.route_register_name(), move |event| {
            if let BusEvent::RouteRegister { id, route } = event {
                state.register_route(id, route);
            }
            Ok(())
        });
    }
}

/// Create the development server router.
pub fn create_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/__livereload", get(livereload_handler))
        .fallback(page_handler)
        .with_state(state)
}

/// Render registered routes; serve everything else from the destination.
async fn page_handler(State(state): State<Arc<ServerState>>, request: Request) -> Response {
    let path = request.uri().path().to_string();

    match state.render_route(&path) {
        Some(Ok(Rendered::Content(html))) => Html(inject_livereload(&html)).into_response(),
        Some(Ok(Rendered::Written(file))) => match tokio::fs::read_to_string(&file).await {
            Ok(html) => Html(inject_livereload(&html)).into_response(),
            Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
        },
        Some(Ok(Rendered::Skipped)) => StatusCode::NOT_FOUND.into_response(),
        Some(Err(e)) => {
            tracing::warn!(path = %path, error = %e, "Failed to render page");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        None => match ServeDir::new(&state.dest).oneshot(request).await {
            Ok(response) => response.into_response(),
            Err(never) => match never {},
        },
    }
}

/// Server-Sent Events handler for live reload.
async fn livereload_handler(
    State(state): State<Arc<ServerState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.reload_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| match msg {
        Ok(_) => Some(Ok(Event::default().data("reload"))),
        Err(_) => None, // Ignore lagged messages
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("ping"),
    )
}

/// Insert [`LIVERELOAD_SCRIPT`] before the last `</body>`, or append it.
pub fn inject_livereload(html: &str) -> String {
    if html.contains("__livereload") {
        return html.to_string();
    }
    match html.rfind("</body>") {
        Some(at) => format!("{}{LIVERELOAD_SCRIPT}{}", &html[..at], &html[at..]),
        None => format!("{html}{LIVERELOAD_SCRIPT}"),
    }
}

/// JavaScript snippet to inject for live reload.
pub const LIVERELOAD_SCRIPT: &str = r#"
<script>
(function() {
    const source = new EventSource('/__livereload');
    source.onmessage = function(event) {
        if (event.data === 'reload') {
            window.location.reload();
        }
    };
    source.onerror = function() {
        console.log('[livereload] Connection lost, retrying...');
    };
})();
</script>
"#;
