//! Namespaced publish/subscribe event bus.
//!
//! Every engine instance owns its own bus. Event names are built from the
//! instance namespace:
//!
//! - `<ns>:<type>:add`, `<ns>:<type>:changed`, `<ns>:<type>:delete`
//! - `<ns>:cache:updated`
//! - `<ns>:route:register`
//!
//! Delivery is synchronous and ordered by registration. A handler that
//! returns an error or panics is logged and does not stop delivery to the
//! remaining handlers.

use std::{
    collections::HashMap,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;
use tracing::{debug, warn};

/// Error type handlers may return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

type Handler = Arc<dyn Fn(&Event) -> Result<(), HandlerError> + Send + Sync>;

static NEXT_NAMESPACE: AtomicU64 = AtomicU64::new(1);

/// What happened to a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Add,
    Changed,
    Delete,
}

impl Action {
    /// All actions, in event-name order.
    pub const ALL: [Action; 3] = [Action::Add, Action::Changed, Action::Delete];

    /// Name segment used in event names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Changed => "changed",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A source file changed on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEvent {
    /// Content type name.
    pub kind: String,

    /// What happened.
    pub action: Action,

    /// Path of the file.
    pub path: PathBuf,
}

/// Event payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A source file was added, changed or deleted.
    Source(SourceEvent),

    /// A render finished. `page` names the page for single-page renders.
    CacheUpdated { page: Option<String> },

    /// A new page should be served under `route`.
    RouteRegister { id: String, route: String },
}

/// Handle returned by [`EventBus::on`] and [`EventBus::once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    handler: Handler,
    once: bool,
}

/// Per-instance event bus.
pub struct EventBus {
    namespace: String,
    handlers: Mutex<HashMap<String, Vec<Subscription>>>,
    next_id: AtomicU64,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("namespace", &self.namespace)
            .field("events", &self.handlers.lock().len())
            .finish()
    }
}

impl EventBus {
    /// Create a bus with an explicit namespace.
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            handlers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a bus with a namespace no other bus in this process uses.
    #[must_use]
    pub fn isolated() -> Self {
        let n = NEXT_NAMESPACE.fetch_add(1, Ordering::Relaxed);
        Self::new(format!("trellis-{n}"))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// `<ns>:<type>:<action>`
    pub fn source_event_name(&self, kind: &str, action: Action) -> String {
        format!("{}:{kind}:{action}", self.namespace)
    }

    /// `<ns>:cache:updated`
    pub fn cache_updated_name(&self) -> String {
        format!("{}:cache:updated", self.namespace)
    }

    /// `<ns>:route:register`
    pub fn route_register_name(&self) -> String {
        format!("{}:route:register", self.namespace)
    }

    /// Subscribe to every emission of `name`.
    pub fn on<F>(&self, name: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.subscribe(name.into(), Arc::new(handler), false)
    }

    /// Subscribe to the next emission of `name` only.
    pub fn once<F>(&self, name: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.subscribe(name.into(), Arc::new(handler), true)
    }

    fn subscribe(&self, name: String, handler: Handler, once: bool) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(event = %name, once, "subscribing handler");
        self.handlers
            .lock()
            .entry(name)
            .or_default()
            .push(Subscription { id, handler, once });
        id
    }

    /// Remove a subscription. Returns whether it existed.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock();
        let mut found = false;
        for subs in handlers.values_mut() {
            let before = subs.len();
            subs.retain(|s| s.id != id);
            found |= subs.len() != before;
        }
        handlers.retain(|_, subs| !subs.is_empty());
        found
    }

    /// Number of handlers subscribed to `name`.
    pub fn listener_count(&self, name: &str) -> usize {
        self.handlers.lock().get(name).map_or(0, Vec::len)
    }

    /// Deliver `event` to every handler of `name`.
    ///
    /// Handlers run on the caller's thread without the registry lock held, so
    /// they may subscribe or emit themselves. Returns the number of handlers
    /// that completed successfully.
    pub fn emit(&self, name: &str, event: &Event) -> usize {
        let targets = {
            let mut handlers = self.handlers.lock();
            let Some(subs) = handlers.get_mut(name) else {
                return 0;
            };
            let targets: Vec<Handler> = subs.iter().map(|s| Arc::clone(&s.handler)).collect();
            subs.retain(|s| !s.once);
            if subs.is_empty() {
                handlers.remove(name);
            }
            targets
        };

        let mut delivered = 0;
        for handler in targets {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!(event = %name, error = %e, "event handler failed"),
                Err(_) => warn!(event = %name, "event handler panicked"),
            }
        }
        delivered
    }

    /// Publish a source event under its `<ns>:<type>:<action>` name.
    pub fn emit_source(&self, event: SourceEvent) -> usize {
        let name = self.source_event_name(&event.kind, event.action);
        self.emit(&name, &Event::Source(event))
    }

    /// Publish `<ns>:cache:updated`.
    pub fn emit_cache_updated(&self, page: Option<String>) -> usize {
        self.emit(&self.cache_updated_name(), &Event::CacheUpdated { page })
    }

    /// Publish `<ns>:route:register`.
    pub fn emit_route_register(&self, id: impl Into<String>, route: impl Into<String>) -> usize {
        let event = Event::RouteRegister {
            id: id.into(),
            route: route.into(),
        };
        self.emit(&self.route_register_name(), &event)
    }
}
