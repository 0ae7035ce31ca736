//! Build orchestration.
//!
//! Coordinates the initial build (discover, cache, register templates,
//! render) and applies incremental updates for single source events.
//!
//! Source events reach the orchestrator through one FIFO queue (see
//! [`Builder::subscribe`]) and are applied one at a time, so every update
//! observes the cache exactly as the previous one left it.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    path::{Path, PathBuf},
    sync::{
        Arc,
        mpsc::{self, Receiver},
    },
    time::Instant,
};

use parking_lot::Mutex;
use rayon::prelude::*;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use trellis_core::{
    Config, ContentEntry, CoreError, Parsed, StoreKind, TypeConfig,
    content::{LAYOUTS, PAGES, PARTIALS},
};

use crate::{
    cache::{CacheItem, GlobalCache, SharedCache},
    events::{Action, Event, EventBus, SourceEvent, SubscriptionId},
    output,
    source::{self, ParsedData, SourceError},
    templater::{Helper, Rendered, TemplateError, Templater},
    watch::{SourceWatcher, WatchError},
};

/// Build errors.
#[derive(Debug, Error)]
pub enum BuildError {
    /// No destination directory configured.
    #[error("destination directory is not configured")]
    MissingDestination,

    /// Two sources of one type map to the same id.
    #[error("duplicate {kind} id '{id}': {first} and {second}")]
    DuplicateId {
        kind: String,
        id: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// Event for a type that is not declared.
    #[error("unknown content type '{0}'")]
    UnknownType(String),

    /// Configuration or entry derivation error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Source discovery or read error.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Rendering error.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Watcher error.
    #[error(transparent)]
    Watch(#[from] WatchError),
}

/// Result type for build operations.
pub type Result<T> = std::result::Result<T, BuildError>;

/// How pages reach their consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    /// Render every page eagerly.
    #[default]
    Static,
    /// Defer rendering to the dev server.
    Serve,
}

/// Pipeline stage the orchestrator is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildPhase {
    #[default]
    Idle,
    Discovering,
    Caching,
    RegisteringTemplates,
    Rendering,
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Discovering => "discovering",
            Self::Caching => "caching",
            Self::RegisteringTemplates => "registering-templates",
            Self::Rendering => "rendering",
        })
    }
}

/// Build statistics.
#[derive(Debug, Clone, Default)]
pub struct BuildStats {
    /// Number of source files discovered.
    pub files: usize,

    /// Number of items added to the cache.
    pub cached: usize,

    /// Number of pages generated from structured data.
    pub generated: usize,

    /// Number of partials and layouts registered.
    pub templates: usize,

    /// Render outcome, absent in serve mode.
    pub render: Option<RenderSummary>,

    /// Build duration in milliseconds.
    pub duration_ms: u64,
}

/// Outcome of a render pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderSummary {
    pub rendered: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RenderSummary {
    /// Tally render results, logging every failure.
    pub fn collect(results: &[(String, std::result::Result<Rendered, TemplateError>)]) -> Self {
        let mut summary = Self::default();
        for (id, result) in results {
            match result {
                Ok(Rendered::Skipped) => summary.skipped += 1,
                Ok(_) => summary.rendered += 1,
                Err(e) => {
                    error!(id = %id, error = %e, "failed to render page");
                    summary.failed += 1;
                }
            }
        }
        summary
    }
}

/// Result of applying one source event.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// A page was cached and, in static mode, rendered.
    Page {
        id: String,
        added: bool,
        rendered: Option<Rendered>,
    },

    /// A layout or partial was cached and re-registered.
    Template {
        kind: String,
        id: String,
        render: Option<RenderSummary>,
    },

    /// The page source was reloaded and every page regenerated.
    PagesGenerated {
        ids: Vec<String>,
        render: Option<RenderSummary>,
    },

    /// Any other item was cached.
    Cached {
        kind: String,
        id: String,
        render: Option<RenderSummary>,
    },

    /// An item was removed.
    Removed {
        kind: String,
        id: String,
        existed: bool,
    },
}

/// One source file turned into a cache item.
struct Loaded {
    id: String,
    path: PathBuf,
    item: CacheItem,
}

/// Site builder that orchestrates the build process.
pub struct Builder {
    config: Config,
    templater: Arc<dyn Templater>,
    cache: SharedCache,
    bus: Arc<EventBus>,
    mode: BuildMode,
    helpers: Vec<Helper>,
    phase: Mutex<BuildPhase>,
    page_source: Mutex<Option<PathBuf>>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("dest", &self.config.dest)
            .field("mode", &self.mode)
            .field("bus", &self.bus)
            .field("phase", &*self.phase.lock())
            .finish()
    }
}

impl Builder {
    /// Create a builder with a fresh cache and an isolated event bus.
    pub fn new(config: Config, templater: Arc<dyn Templater>) -> Result<Self> {
        if config.dest.trim().is_empty() {
            return Err(BuildError::MissingDestination);
        }
        config.validate()?;

        Ok(Self {
            cache: GlobalCache::shared(config.collections.clone()),
            config,
            templater,
            bus: Arc::new(EventBus::isolated()),
            mode: BuildMode::Static,
            helpers: Helper::defaults(),
            phase: Mutex::new(BuildPhase::Idle),
            page_source: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    /// Use an existing event bus.
    #[must_use]
    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = bus;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: BuildMode) -> Self {
        self.mode = mode;
        self
    }

    /// Register additional helpers with the templater during the build.
    #[must_use]
    pub fn with_helpers(mut self, helpers: impl IntoIterator<Item = Helper>) -> Self {
        self.helpers.extend(helpers);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared handle to the content cache.
    pub fn cache(&self) -> SharedCache {
        Arc::clone(&self.cache)
    }

    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    pub fn templater(&self) -> Arc<dyn Templater> {
        Arc::clone(&self.templater)
    }

    pub fn mode(&self) -> BuildMode {
        self.mode
    }

    pub fn phase(&self) -> BuildPhase {
        *self.phase.lock()
    }

    fn set_phase(&self, phase: BuildPhase) {
        *self.phase.lock() = phase;
    }

    /// Run one pipeline stage, logging its duration.
    fn stage<T>(&self, phase: BuildPhase, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.set_phase(phase);
        let start = Instant::now();
        let result = f();
        info!(
            stage = %phase,
            duration_ms = start.elapsed().as_millis() as u64,
            "stage finished"
        );
        result
    }

    /// Execute the full build process.
    pub fn build(&self) -> Result<BuildStats> {
        let start = Instant::now();
        let mut stats = BuildStats::default();

        info!(dest = %self.config.dest, mode = ?self.mode, "starting build");
        self.cache
            .write()
            .set_servermode(self.mode == BuildMode::Serve);

        let result = self.run_pipeline(&mut stats);
        self.set_phase(BuildPhase::Idle);
        result?;

        stats.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            files = stats.files,
            cached = stats.cached,
            generated = stats.generated,
            duration_ms = stats.duration_ms,
            "build complete"
        );
        Ok(stats)
    }

    fn run_pipeline(&self, stats: &mut BuildStats) -> Result<()> {
        let discovered = self.stage(BuildPhase::Discovering, || self.discover())?;
        stats.files = discovered.iter().map(|(_, files)| files.len()).sum();

        stats.cached = self.stage(BuildPhase::Caching, || self.cache_all(discovered))?;
        stats.generated = self.generate_pages()?.len();

        stats.templates = self.stage(BuildPhase::RegisteringTemplates, || {
            Ok(self.register_templates())
        })?;

        if self.mode == BuildMode::Static {
            let summary = self.stage(BuildPhase::Rendering, || Ok(self.render_pages()))?;
            stats.render = Some(summary);
            self.bus.emit_cache_updated(None);
        } else if self.config.export_data {
            self.export();
        }
        Ok(())
    }

    /// Expand every type's patterns, in parallel.
    fn discover(&self) -> Result<Vec<(String, Vec<PathBuf>)>> {
        self.config
            .types
            .par_iter()
            .map(|(kind, ty)| {
                let files = source::get_files(&self.config.type_patterns(ty))?;
                debug!(kind = %kind, count = files.len(), "discovered files");
                Ok((kind.clone(), files))
            })
            .collect()
    }

    /// Read and parse files in parallel, then add them to the cache in
    /// discovery order. Unreadable files are skipped.
    fn cache_all(&self, discovered: Vec<(String, Vec<PathBuf>)>) -> Result<usize> {
        let mut cached = 0;

        for (kind, files) in discovered {
            let loaded: Vec<Loaded> = files
                .par_iter()
                .filter_map(|path| match self.load(&kind, path) {
                    Ok(loaded) => Some(loaded),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "failed to load source");
                        None
                    }
                })
                .collect();

            let mut seen: HashMap<String, PathBuf> = HashMap::new();
            let mut cache = self.cache.write();
            for Loaded { id, path, item } in loaded {
                if let Some(first) = seen.insert(id.clone(), path.clone()) {
                    return Err(BuildError::DuplicateId {
                        kind,
                        id,
                        first,
                        second: path,
                    });
                }
                if self.is_page_source(&kind, &id) {
                    *self.page_source.lock() = Some(path);
                }
                cache.add_to_cache(&kind, &id, item);
                cached += 1;
            }
            debug!(kind = %kind, count = cache.len(&kind), "cached type");
        }

        Ok(cached)
    }

    fn type_config(&self, kind: &str) -> Result<&TypeConfig> {
        self.config
            .types
            .get(kind)
            .ok_or_else(|| BuildError::UnknownType(kind.to_string()))
    }

    /// Id a source path maps to, derived exactly as when it was cached.
    pub fn entry_id(&self, kind: &str, path: &Path) -> Result<String> {
        let ty = self.type_config(kind)?;
        let entry = ContentEntry::from_source(
            path,
            kind,
            ty,
            &self.config,
            String::new(),
            Parsed::default(),
        )?;
        Ok(entry.id)
    }

    /// Read one file and build its cache item.
    fn load(&self, kind: &str, path: &Path) -> Result<Loaded> {
        let ty = self.type_config(kind)?;
        let file = source::read_file(path)?;

        let (id, item) = match (StoreKind::of(kind), file.parsed) {
            (StoreKind::Data, ParsedData::Structured(value)) => {
                (self.entry_id(kind, path)?, CacheItem::Data(value))
            }
            (_, parsed) => {
                let entry = ContentEntry::from_source(
                    path,
                    kind,
                    ty,
                    &self.config,
                    file.raw,
                    parsed.into_document()?,
                )?;
                (entry.id.clone(), CacheItem::Entry(entry))
            }
        };

        Ok(Loaded {
            id,
            path: path.to_path_buf(),
            item,
        })
    }

    fn is_page_source(&self, kind: &str, id: &str) -> bool {
        StoreKind::of(kind) == StoreKind::Data
            && self.config.generate_pages_from.as_deref() == Some(id)
    }

    /// Replace every page with the virtual pages of the configured data
    /// source. Returns the generated ids; nothing happens without a source.
    fn generate_pages(&self) -> Result<Vec<String>> {
        let Some(source_id) = &self.config.generate_pages_from else {
            return Ok(Vec::new());
        };

        let mut cache = self.cache.write();
        let descriptors = match cache.data(source_id) {
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                warn!(source = %source_id, "page source is not an object");
                return Ok(Vec::new());
            }
            None => {
                warn!(source = %source_id, "page source is not cached");
                return Ok(Vec::new());
            }
        };
        let source_path = self
            .page_source
            .lock()
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| source_id.clone());

        let entries = descriptors
            .iter()
            .map(|(key, descriptor)| {
                ContentEntry::virtual_page(key, descriptor, &source_path, &self.config)
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let removed = cache.delete_all_from_repo_by_type(PAGES);
        let mut ids = Vec::with_capacity(entries.len());
        for entry in entries {
            let id = entry.id.clone();
            cache.add_to_cache(PAGES, &id, entry);
            ids.push(id);
        }

        info!(
            source = %source_id,
            removed,
            count = ids.len(),
            "generated pages from data"
        );
        Ok(ids)
    }

    /// Register helpers, partials and layouts with the templater.
    fn register_templates(&self) -> usize {
        let helpers = self.templater.register_helpers(&self.helpers);
        let cache = self.cache.read();
        let mut registered = 0;
        for kind in [PARTIALS, LAYOUTS] {
            if let Some(store) = cache.store(kind) {
                registered += self
                    .templater
                    .register_partials(cache.repository(kind), store);
            }
        }
        debug!(helpers, templates = registered, "registered templates");
        registered
    }

    /// Render every cached page. Failures are logged per page.
    pub fn render_pages(&self) -> RenderSummary {
        let summary = {
            let cache = self.cache.read();
            info!(count = cache.len(PAGES), "rendering pages");
            let results = self
                .templater
                .render_all(cache.repository(PAGES), cache.pages(), &cache);
            RenderSummary::collect(&results)
        };

        if self.config.export_data {
            self.export();
        }
        summary
    }

    /// Render a single cached page.
    pub fn render_page(&self, id: &str) -> Result<Rendered> {
        let cache = self.cache.read();
        let page = cache
            .page(id)
            .ok_or_else(|| TemplateError::UnknownPage(id.to_string()))?;
        Ok(self.templater.render_one(page, &cache)?)
    }

    /// Write the serialised cache. Failures only warn.
    fn export(&self) {
        let path = self.config.export_path();
        if let Err(e) = output::export_cache(&self.cache.read(), &path) {
            warn!(path = %path.display(), error = %e, "failed to export cache data");
        }
    }

    /// Forward this builder's source events into a queue.
    ///
    /// Pass the receiver to [`Builder::run`] or [`Builder::drain`]. The queue
    /// stays open until [`Builder::unsubscribe`] removes the forwarders.
    pub fn subscribe(&self) -> Receiver<SourceEvent> {
        let (tx, rx) = mpsc::channel();
        let mut subscriptions = self.subscriptions.lock();
        for kind in self.config.types.keys() {
            for action in Action::ALL {
                let tx = tx.clone();
                let id = self
                    .bus
                    .on(self.bus.source_event_name(kind, action), move |event| {
                        if let Event::Source(source) = event {
                            tx.send(source.clone())?;
                        }
                        Ok(())
                    });
                subscriptions.push(id);
            }
        }
        rx
    }

    /// Remove every forwarder added by [`Builder::subscribe`].
    ///
    /// Dropping the forwarders drops their senders, which closes the queue
    /// and lets a pending [`Builder::run`] return. Returns how many were
    /// removed.
    pub fn unsubscribe(&self) -> usize {
        let ids = std::mem::take(&mut *self.subscriptions.lock());
        let removed = ids.into_iter().filter(|id| self.bus.off(*id)).count();
        debug!(removed, "source event forwarders removed");
        removed
    }

    /// Start one watcher per declared type, publishing on this builder's bus.
    pub fn watch(&self) -> Result<Vec<SourceWatcher>> {
        self.config
            .types
            .iter()
            .map(|(kind, ty)| {
                let patterns = self.config.type_patterns(ty);
                Ok(SourceWatcher::new(kind, &patterns, Arc::clone(&self.bus))?)
            })
            .collect()
    }

    /// Apply queued events until every sender is gone.
    pub fn run(&self, events: Receiver<SourceEvent>) {
        info!("waiting for source events");
        for event in events {
            self.process(&event);
        }
        debug!("source event queue closed");
    }

    /// Apply every event already queued, without blocking.
    pub fn drain(&self, events: &Receiver<SourceEvent>) -> Vec<Update> {
        events
            .try_iter()
            .filter_map(|event| self.process(&event))
            .collect()
    }

    /// Apply one event, logging instead of propagating failures.
    fn process(&self, event: &SourceEvent) -> Option<Update> {
        let start = Instant::now();
        let result = self.handle(event);
        self.set_phase(BuildPhase::Idle);

        match result {
            Ok(update) => {
                info!(
                    kind = %event.kind,
                    action = %event.action,
                    path = %event.path.display(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "update applied"
                );
                Some(update)
            }
            Err(e) => {
                error!(
                    kind = %event.kind,
                    action = %event.action,
                    path = %event.path.display(),
                    error = %e,
                    "update failed"
                );
                None
            }
        }
    }

    /// Apply one source event to the cache and re-render what it affects.
    pub fn handle(&self, event: &SourceEvent) -> Result<Update> {
        let SourceEvent { kind, action, path } = event;
        self.type_config(kind)?;
        self.set_phase(BuildPhase::Caching);

        match (action, StoreKind::of(kind)) {
            (Action::Delete, _) => self.remove(kind, path),
            (_, StoreKind::Pages) => self.update_page(kind, path),
            (_, StoreKind::Data) => self.update_data(kind, path),
            (_, StoreKind::Typed) if kind == LAYOUTS || kind == PARTIALS => {
                self.update_template(kind, path)
            }
            (_, StoreKind::Typed) => self.update_cached(kind, path),
        }
    }

    fn update_page(&self, kind: &str, path: &Path) -> Result<Update> {
        let Loaded { id, item, .. } = self.load(kind, path)?;
        let added = self.cache.write().add_to_cache(kind, &id, item).is_none();

        let rendered = match self.mode {
            BuildMode::Static => {
                self.set_phase(BuildPhase::Rendering);
                match self.render_page(&id) {
                    Ok(rendered) => Some(rendered),
                    Err(e) => {
                        error!(id = %id, error = %e, "failed to render page");
                        None
                    }
                }
            }
            BuildMode::Serve => None,
        };

        let route = self.cache.read().page(&id).map(|p| p.server_file.clone());
        self.bus.emit_cache_updated(Some(id.clone()));
        if added && let Some(route) = route {
            self.bus.emit_route_register(&id, route);
        }

        Ok(Update::Page {
            id,
            added,
            rendered,
        })
    }

    fn update_template(&self, kind: &str, path: &Path) -> Result<Update> {
        let Loaded { id, item, .. } = self.load(kind, path)?;
        let template = match &item {
            CacheItem::Entry(entry) => entry.parsed.content.clone(),
            CacheItem::Data(value) => value.to_string(),
        };
        self.cache.write().add_to_cache(kind, &id, item);

        self.set_phase(BuildPhase::RegisteringTemplates);
        self.templater.register_partial(&id, &template)?;

        Ok(Update::Template {
            kind: kind.to_string(),
            id,
            render: self.rerender(),
        })
    }

    fn update_data(&self, kind: &str, path: &Path) -> Result<Update> {
        let Loaded { id, item, .. } = self.load(kind, path)?;
        self.cache.write().replace_in_cache(kind, &id, item);

        if !self.is_page_source(kind, &id) {
            return Ok(Update::Cached {
                kind: kind.to_string(),
                id,
                render: self.rerender(),
            });
        }

        *self.page_source.lock() = Some(path.to_path_buf());
        let known: HashSet<String> =
            self.cache.read().repository(PAGES).iter().cloned().collect();
        let ids = self.generate_pages()?;
        {
            let cache = self.cache.read();
            for id in ids.iter().filter(|id| !known.contains(*id)) {
                if let Some(page) = cache.page(id) {
                    self.bus.emit_route_register(id, page.server_file.clone());
                }
            }
        }

        Ok(Update::PagesGenerated {
            ids,
            render: self.rerender(),
        })
    }

    fn update_cached(&self, kind: &str, path: &Path) -> Result<Update> {
        let Loaded { id, item, .. } = self.load(kind, path)?;
        self.cache.write().replace_in_cache(kind, &id, item);

        Ok(Update::Cached {
            kind: kind.to_string(),
            id,
            render: self.rerender(),
        })
    }

    /// Re-render every page in static mode, then announce the update.
    fn rerender(&self) -> Option<RenderSummary> {
        let summary = match self.mode {
            BuildMode::Static => {
                self.set_phase(BuildPhase::Rendering);
                Some(self.render_pages())
            }
            BuildMode::Serve => None,
        };
        self.bus.emit_cache_updated(None);
        summary
    }

    /// Remove the item a deleted file maps to. Nothing is re-rendered.
    fn remove(&self, kind: &str, path: &Path) -> Result<Update> {
        let id = self.entry_id(kind, path)?;
        let existed = self.cache.write().delete_from_cache(kind, &id).is_some();
        if !existed {
            debug!(kind = %kind, id = %id, "deleted source was not cached");
        }

        Ok(Update::Removed {
            kind: kind.to_string(),
            id,
            existed,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::{TempDir, tempdir};
    use trellis_core::content::DATA;

    use super::*;
    use crate::{template::BuiltinTemplater, templater::TemplaterOptions};

    fn write(dir: &Path, rel: &str, body: &str) -> PathBuf {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create dir");
        }
        fs::write(&path, body).expect("write file");
        path
    }

    fn site() -> (TempDir, Config) {
        let dir = tempdir().expect("create temp dir");
        let root = dir.path().to_string_lossy().into_owned();
        let mut config = Config {
            cwd: root.clone(),
            dest: format!("{root}/dist"),
            ..Default::default()
        };
        config.allow.yfm_layout = true;
        config
            .types
            .insert(PAGES.into(), TypeConfig::new("pages", &["**/*.hbs"]));
        config
            .types
            .insert(LAYOUTS.into(), TypeConfig::new("layouts", &["**/*.hbs"]));
        config
            .types
            .insert(DATA.into(), TypeConfig::new("data", &["**/*.json"]));
        (dir, config)
    }

    fn builder(config: Config) -> Builder {
        let templater = Arc::new(BuiltinTemplater::new(TemplaterOptions::from(&config)));
        Builder::new(config, templater).expect("builder")
    }

    #[test]
    fn test_missing_destination() {
        let (_dir, mut config) = site();
        config.dest = String::new();
        let templater = Arc::new(BuiltinTemplater::default());

        let result = Builder::new(config, templater);
        assert!(matches!(result, Err(BuildError::MissingDestination)));
    }

    #[test]
    fn test_build_renders_pages_with_layout() {
        let (dir, config) = site();
        write(dir.path(), "layouts/base.hbs", "<main>{{{yield}}}</main>");
        write(dir.path(), "pages/index.hbs", "---\nlayout: base\n---\n{{ site.title }}");
        write(dir.path(), "data/site.json", r#"{ "title": "Trellis" }"#);

        let builder = builder(config);
        let stats = builder.build().expect("build");

        assert_eq!(stats.files, 3);
        assert_eq!(stats.templates, 1);
        assert_eq!(stats.render.map(|r| r.rendered), Some(1));
        assert_eq!(builder.phase(), BuildPhase::Idle);

        let html = fs::read_to_string(dir.path().join("dist/index.html")).expect("read");
        assert_eq!(html, "<main>Trellis</main>");
    }

    #[test]
    fn test_unreadable_file_is_skipped() {
        let (dir, config) = site();
        write(dir.path(), "pages/a.hbs", "a");
        write(dir.path(), "data/broken.json", "{ nope");

        let builder = builder(config);
        let stats = builder.build().expect("build");

        assert_eq!(stats.files, 2);
        assert_eq!(stats.cached, 1);
        assert!(builder.cache().read().data("broken").is_none());
    }

    #[test]
    fn test_duplicate_id_is_fatal() {
        let (dir, mut config) = site();
        config.types.insert(
            PAGES.into(),
            TypeConfig::new("pages", &["**/*.hbs", "**/*.md"]),
        );
        write(dir.path(), "pages/a.hbs", "a");
        write(dir.path(), "pages/a.md", "a");

        let result = builder(config).build();
        assert!(matches!(result, Err(BuildError::DuplicateId { id, .. }) if id == "a"));
    }

    #[test]
    fn test_render_failure_does_not_abort_pass() {
        let (dir, config) = site();
        write(dir.path(), "pages/a.hbs", "---\nlayout: missing\n---\na");
        write(dir.path(), "pages/b.hbs", "b");
        write(dir.path(), "pages/c.hbs", "---\npublish: false\n---\nc");

        let builder = builder(config);
        let stats = builder.build().expect("build");

        assert_eq!(
            stats.render,
            Some(RenderSummary {
                rendered: 1,
                skipped: 1,
                failed: 1
            })
        );
        assert!(dir.path().join("dist/b.html").exists());
        assert!(!dir.path().join("dist/c.html").exists());
    }

    #[test]
    fn test_serve_mode_defers_rendering() {
        let (dir, config) = site();
        write(dir.path(), "pages/a.hbs", "a");

        let builder = builder(config).with_mode(BuildMode::Serve);
        let stats = builder.build().expect("build");

        assert!(stats.render.is_none());
        assert!(builder.cache().read().servermode());
        assert!(!dir.path().join("dist/a.html").exists());
    }

    #[test]
    fn test_delete_event_removes_without_render() {
        let (dir, config) = site();
        let page = write(dir.path(), "pages/a.hbs", "a");

        let builder = builder(config);
        builder.build().expect("build");
        fs::remove_file(&page).expect("remove");

        let update = builder
            .handle(&SourceEvent {
                kind: PAGES.into(),
                action: Action::Delete,
                path: page.clone(),
            })
            .expect("handle");

        assert_eq!(
            update,
            Update::Removed {
                kind: PAGES.into(),
                id: "a".into(),
                existed: true
            }
        );
        assert!(builder.cache().read().repository(PAGES).is_empty());

        let again = builder
            .handle(&SourceEvent {
                kind: PAGES.into(),
                action: Action::Delete,
                path: page,
            })
            .expect("handle");
        assert!(matches!(again, Update::Removed { existed: false, .. }));
    }

    #[test]
    fn test_event_for_unknown_type() {
        let (_dir, config) = site();
        let builder = builder(config);

        let result = builder.handle(&SourceEvent {
            kind: "docs".into(),
            action: Action::Add,
            path: PathBuf::from("docs/a.hbs"),
        });
        assert!(matches!(result, Err(BuildError::UnknownType(kind)) if kind == "docs"));
    }

    #[test]
    fn test_failed_event_keeps_session_alive() {
        let (dir, config) = site();
        write(dir.path(), "pages/a.hbs", "a");

        let builder = builder(config);
        builder.build().expect("build");
        let events = builder.subscribe();
        let bus = builder.bus();

        bus.emit_source(SourceEvent {
            kind: PAGES.into(),
            action: Action::Changed,
            path: dir.path().join("pages/missing.hbs"),
        });
        let b = write(dir.path(), "pages/b.hbs", "b");
        bus.emit_source(SourceEvent {
            kind: PAGES.into(),
            action: Action::Add,
            path: b,
        });

        let updates = builder.drain(&events);
        assert_eq!(updates.len(), 1);
        assert_eq!(builder.cache().read().repository(PAGES), ["a", "b"]);
    }

    #[test]
    fn test_run_returns_after_unsubscribe() {
        let (dir, config) = site();
        write(dir.path(), "pages/a.hbs", "a");

        let builder = Arc::new(builder(config));
        builder.build().expect("build");
        let events = builder.subscribe();

        let (done_tx, done_rx) = mpsc::channel();
        let worker = {
            let builder = Arc::clone(&builder);
            std::thread::spawn(move || {
                builder.run(events);
                done_tx.send(()).expect("signal done");
            })
        };

        let b = write(dir.path(), "pages/b.hbs", "b");
        builder.bus().emit_source(SourceEvent {
            kind: PAGES.into(),
            action: Action::Add,
            path: b,
        });

        assert_eq!(builder.unsubscribe(), 3 * Action::ALL.len());
        done_rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("run returned");
        worker.join().expect("join worker");

        assert_eq!(builder.cache().read().repository(PAGES), ["a", "b"]);
        assert_eq!(builder.unsubscribe(), 0);
    }

    #[test]
    fn test_export_data() {
        let (dir, mut config) = site();
        config.export_data = true;
        write(dir.path(), "data/site.json", r#"{ "title": "T" }"#);

        builder(config).build().expect("build");
        let exported = dir.path().join("exported/exported-data.json");
        let json: Value =
            serde_json::from_str(&fs::read_to_string(exported).expect("read")).expect("json");
        assert_eq!(json["site"]["title"], "T");
    }
}
