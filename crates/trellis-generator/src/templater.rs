//! Rendering backend contract.
//!
//! A [`Templater`] turns one cached page into output. Backends only have to
//! implement partial registration and raw template rendering; the provided
//! methods build the render context, honour the front matter switches
//! (`publish`, `layout`, `contextData`) and optionally write the result.

use std::{collections::HashMap, fmt, path::PathBuf, sync::Arc};

use rayon::prelude::*;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{debug, warn};
use trellis_core::{
    Config, ContentEntry,
    config::AllowConfig,
    content::LAYOUTS,
};

use crate::{cache::GlobalCache, output::write_output};

/// Marker in a layout that is replaced by the page body.
pub const YIELD_MARKER: &str = "{{{yield}}}";

/// Template rendering errors.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Partial referenced but never registered.
    #[error("partial not found: {0}")]
    PartialNotFound(String),

    /// Layout named in front matter is not cached.
    #[error("page '{page}' uses missing layout '{layout}'")]
    LayoutNotFound { page: String, layout: String },

    /// Context data named in front matter is not cached.
    #[error("page '{page}' uses missing context data '{key}'")]
    ContextDataNotFound { page: String, key: String },

    /// Repository id without a cached page.
    #[error("page not cached: {0}")]
    UnknownPage(String),

    /// Invalid template syntax.
    #[error("invalid template syntax in '{template}': {message}")]
    Syntax { template: String, message: String },

    /// Partial nesting too deep.
    #[error("partial recursion limit reached at '{0}'")]
    Recursion(String),

    /// Output could not be written.
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for template operations.
pub type Result<T> = std::result::Result<T, TemplateError>;

/// Switches shared by every backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TemplaterOptions {
    /// Honoured front matter features.
    pub allow: AllowConfig,

    /// Write rendered pages to their output path instead of returning them.
    pub write_to_disk: bool,
}

impl From<&Config> for TemplaterOptions {
    fn from(config: &Config) -> Self {
        Self {
            allow: config.allow,
            write_to_disk: config.compile_static_files,
        }
    }
}

/// Outcome of rendering one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    /// Output was written to this path.
    Written(PathBuf),
    /// Output returned to the caller.
    Content(String),
    /// `publish: false`.
    Skipped,
}

/// A named template helper.
#[derive(Clone)]
pub struct Helper {
    /// Name used in templates (`{{ name arg }}`).
    pub name: String,

    /// Receives the resolved arguments.
    pub func: Arc<dyn Fn(&[Value]) -> String + Send + Sync>,
}

impl fmt::Debug for Helper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Helper").field("name", &self.name).finish()
    }
}

impl Helper {
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&[Value]) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// A helper name is usable when it is a single bare word.
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty()
            && self
                .name
                .chars()
                .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_'))
    }

    /// Built-in helpers: `upper`, `lower` and `json`.
    pub fn defaults() -> Vec<Helper> {
        vec![
            Helper::new("upper", |args| {
                args.first().map(value_text).unwrap_or_default().to_uppercase()
            }),
            Helper::new("lower", |args| {
                args.first().map(value_text).unwrap_or_default().to_lowercase()
            }),
            Helper::new("json", |args| {
                args.first().map(Value::to_string).unwrap_or_default()
            }),
        ]
    }
}

/// Text form of a value as templates print it. Null prints nothing.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Replace every case-insensitive [`YIELD_MARKER`] in `layout` with `body`.
pub fn apply_layout(layout: &str, body: &str) -> String {
    let lower = layout.to_ascii_lowercase();
    let mut out = String::with_capacity(layout.len() + body.len());
    let mut last = 0;
    for (start, _) in lower.match_indices(YIELD_MARKER) {
        out.push_str(&layout[last..start]);
        out.push_str(body);
        last = start + YIELD_MARKER.len();
    }
    out.push_str(&layout[last..]);
    out
}

/// Rendering backend.
///
/// Implementations use interior mutability for their registries so one
/// instance can be shared across the orchestrator and the dev server.
pub trait Templater: Send + Sync {
    /// Backend switches.
    fn options(&self) -> &TemplaterOptions;

    /// Register helpers. Invalid helpers are skipped with a warning; returns
    /// how many were registered.
    fn register_helpers(&self, helpers: &[Helper]) -> usize;

    /// Register one partial (or layout) under `id`.
    fn register_partial(&self, id: &str, template: &str) -> Result<()>;

    /// Register every id of `ids` found in `store`.
    fn register_partials(&self, ids: &[String], store: &HashMap<String, ContentEntry>) -> usize {
        let mut registered = 0;
        for id in ids {
            let Some(entry) = store.get(id) else {
                warn!(id = %id, "partial listed in index but not cached");
                continue;
            };
            match self.register_partial(id, &entry.parsed.content) {
                Ok(()) => registered += 1,
                Err(e) => warn!(id = %id, error = %e, "failed to register partial"),
            }
        }
        registered
    }

    /// Render `template` for `page` with the fully merged `data`.
    fn render_template(&self, page: &ContentEntry, template: &str, data: &Value)
    -> Result<String>;

    /// Render one page against the current cache.
    fn render_one(&self, page: &ContentEntry, cache: &GlobalCache) -> Result<Rendered> {
        self.render_with(page, cache, cache.render_context())
    }

    /// Render one page with a precomputed global context.
    fn render_with(
        &self,
        page: &ContentEntry,
        cache: &GlobalCache,
        global: &Map<String, Value>,
    ) -> Result<Rendered> {
        let front = page.front_matter();
        if !front.is_published() {
            debug!(id = %page.id, "skipping unpublished page");
            return Ok(Rendered::Skipped);
        }

        let mut data = global.clone();
        if let Some(Value::Object(settings)) = global.get(&format!("{}.settings", page.filename)) {
            data.extend(settings.clone());
        }
        data.extend(front.to_map());
        data.insert("assets".into(), Value::String(page.assets.clone()));
        data.insert(
            "currentPage".into(),
            json!({
                "basename": page.basename,
                "destFile": page.dest_file,
                "dirname": page.dirname,
                "filename": page.filename,
                "id": page.id,
                "serverFile": page.server_file,
            }),
        );

        let options = self.options();
        if options.allow.yfm_context_data
            && let Some(key) = &front.context_data
        {
            match cache.data(key) {
                Some(Value::Object(context)) => data.extend(context.clone()),
                Some(other) => {
                    data.insert(key.clone(), other.clone());
                }
                None => {
                    return Err(TemplateError::ContextDataNotFound {
                        page: page.id.clone(),
                        key: key.clone(),
                    });
                }
            }
        }

        let template = match (&front.layout, options.allow.yfm_layout) {
            (Some(layout), true) => {
                let entry = cache.entry(LAYOUTS, layout).ok_or_else(|| {
                    TemplateError::LayoutNotFound {
                        page: page.id.clone(),
                        layout: layout.clone(),
                    }
                })?;
                apply_layout(&entry.parsed.content, &page.parsed.content)
            }
            _ => page.parsed.content.clone(),
        };

        let output = self.render_template(page, &template, &Value::Object(data))?;

        if options.write_to_disk {
            let path = PathBuf::from(page.output_path());
            write_output(&path, &output).map_err(|source| TemplateError::Write {
                path: path.clone(),
                source,
            })?;
            Ok(Rendered::Written(path))
        } else {
            Ok(Rendered::Content(output))
        }
    }

    /// Render every page of `repository`, in parallel. Results keep
    /// repository order; a failing page does not affect the others.
    fn render_all(
        &self,
        repository: &[String],
        pages: &HashMap<String, ContentEntry>,
        cache: &GlobalCache,
    ) -> Vec<(String, Result<Rendered>)> {
        if repository.is_empty() {
            debug!("no pages to render");
            return Vec::new();
        }

        let global = cache.render_context();
        repository
            .par_iter()
            .map(|id| {
                let result = match pages.get(id) {
                    Some(page) => self.render_with(page, cache, global),
                    None => Err(TemplateError::UnknownPage(id.clone())),
                };
                (id.clone(), result)
            })
            .collect()
    }
}
