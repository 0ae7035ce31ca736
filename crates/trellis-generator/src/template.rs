//! Built-in interpolation templater.
//!
//! A lightweight backend using string interpolation rather than a full
//! template language:
//!
//! - `{{ path.to.value }}` prints a value, HTML-escaped
//! - `{{{ path }}}` prints a value unescaped
//! - `{{> partial }}` / `{{> partial path }}` renders a registered partial
//! - `{{! comment }}` and `{{!-- comment --}}` print nothing
//! - `{{ helper arg ... }}` calls a registered helper
//!
//! Missing values render empty. Markdown pages (`.md`) are converted to HTML
//! after interpolation.

use std::collections::HashMap;

use parking_lot::RwLock;
use pulldown_cmark::{Options, Parser, html};
use serde_json::Value;
use tracing::{debug, warn};
use trellis_core::ContentEntry;

use crate::templater::{Helper, Result, TemplateError, Templater, TemplaterOptions, value_text};

/// Maximum partial nesting depth.
const MAX_DEPTH: usize = 32;

/// Registered partials and helpers.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    partials: HashMap<String, String>,
    helpers: HashMap<String, Helper>,
}

impl TemplateRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a partial.
    pub fn register_partial(&mut self, id: impl Into<String>, template: impl Into<String>) {
        self.partials.insert(id.into(), template.into());
    }

    /// Register or replace a helper.
    pub fn register_helper(&mut self, helper: Helper) {
        self.helpers.insert(helper.name.clone(), helper);
    }

    pub fn has_partial(&self, id: &str) -> bool {
        self.partials.contains_key(id)
    }

    pub fn has_helper(&self, name: &str) -> bool {
        self.helpers.contains_key(name)
    }

    /// Render `template` named `name` against `data`.
    pub fn render(&self, name: &str, template: &str, data: &Value) -> Result<String> {
        self.render_depth(name, template, data, 0)
    }

    fn render_depth(
        &self,
        name: &str,
        template: &str,
        data: &Value,
        depth: usize,
    ) -> Result<String> {
        if depth > MAX_DEPTH {
            return Err(TemplateError::Recursion(name.to_string()));
        }

        let syntax = |message: &str| TemplateError::Syntax {
            template: name.to_string(),
            message: message.to_string(),
        };

        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let tag = &rest[start..];

            if let Some(inner) = tag.strip_prefix("{{{") {
                let end = inner.find("}}}").ok_or_else(|| syntax("unclosed {{{ delimiter"))?;
                out.push_str(&self.expression(inner[..end].trim(), data));
                rest = &inner[end + 3..];
                continue;
            }

            let inner = &tag[2..];
            if let Some(comment) = inner.strip_prefix("!--") {
                let end = comment.find("--}}").ok_or_else(|| syntax("unclosed comment"))?;
                rest = &comment[end + 4..];
                continue;
            }

            let end = inner.find("}}").ok_or_else(|| syntax("unclosed {{ delimiter"))?;
            let body = inner[..end].trim();
            rest = &inner[end + 2..];

            if body.starts_with('!') {
                continue;
            }

            if let Some(call) = body.strip_prefix('>') {
                let mut parts = call.split_whitespace();
                let id = parts.next().ok_or_else(|| syntax("partial without a name"))?;
                let partial = self
                    .partials
                    .get(id)
                    .ok_or_else(|| TemplateError::PartialNotFound(id.to_string()))?;
                let scope = match parts.next() {
                    Some(path) => lookup(data, path).cloned().unwrap_or(Value::Null),
                    None => data.clone(),
                };
                out.push_str(&self.render_depth(id, partial, &scope, depth + 1)?);
                continue;
            }

            out.push_str(&escape_html(&self.expression(body, data)));
        }

        out.push_str(rest);
        Ok(out)
    }

    /// Evaluate a path or a helper call to text.
    fn expression(&self, body: &str, data: &Value) -> String {
        let mut parts = body.split_whitespace();
        let Some(head) = parts.next() else {
            return String::new();
        };

        if let Some(helper) = self.helpers.get(head) {
            let args: Vec<Value> = parts
                .map(|arg| {
                    literal(arg)
                        .or_else(|| lookup(data, arg).cloned())
                        .unwrap_or(Value::Null)
                })
                .collect();
            return (helper.func)(&args);
        }

        lookup(data, body).map(value_text).unwrap_or_default()
    }
}

/// Quoted strings and numbers passed to helpers.
fn literal(arg: &str) -> Option<Value> {
    if let Some(s) = arg.strip_prefix('"').and_then(|a| a.strip_suffix('"')) {
        return Some(Value::String(s.to_string()));
    }
    arg.parse::<f64>().ok().and_then(|_| serde_json::from_str(arg).ok())
}

/// Resolve a dotted path (`a.b.0.c`); `this` and `.` name the scope itself.
pub fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path == "this" || path == "." {
        return Some(data);
    }
    let path = path.strip_prefix("this.").unwrap_or(path);

    path.split('.').try_fold(data, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Escape HTML special characters.
fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '`' => out.push_str("&#x60;"),
            '=' => out.push_str("&#x3D;"),
            _ => out.push(c),
        }
    }
    out
}

/// Convert Markdown to HTML.
fn markdown_to_html(source: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_FOOTNOTES);

    let mut out = String::with_capacity(source.len() * 3 / 2);
    html::push_html(&mut out, Parser::new_ext(source, options));
    out
}

/// Default backend built on [`TemplateRegistry`].
#[derive(Debug, Default)]
pub struct BuiltinTemplater {
    options: TemplaterOptions,
    registry: RwLock<TemplateRegistry>,
}

impl BuiltinTemplater {
    /// Create a templater with the given options.
    #[must_use]
    pub fn new(options: TemplaterOptions) -> Self {
        Self {
            options,
            registry: RwLock::new(TemplateRegistry::new()),
        }
    }

    pub fn has_partial(&self, id: &str) -> bool {
        self.registry.read().has_partial(id)
    }
}

impl Templater for BuiltinTemplater {
    fn options(&self) -> &TemplaterOptions {
        &self.options
    }

    fn register_helpers(&self, helpers: &[Helper]) -> usize {
        let mut registry = self.registry.write();
        let mut registered = 0;
        for helper in helpers {
            if !helper.is_valid() {
                warn!(helper = %helper.name, "skipping invalid helper");
                continue;
            }
            if registry.has_helper(&helper.name) {
                debug!(helper = %helper.name, "replacing helper");
            }
            registry.register_helper(helper.clone());
            registered += 1;
        }
        registered
    }

    fn register_partial(&self, id: &str, template: &str) -> Result<()> {
        debug!(id = %id, "registering partial");
        self.registry.write().register_partial(id, template);
        Ok(())
    }

    fn render_template(&self, page: &ContentEntry, template: &str, data: &Value) -> Result<String> {
        let rendered = self.registry.read().render(&page.id, template, data)?;
        if page.src_ext.eq_ignore_ascii_case(".md") {
            Ok(markdown_to_html(&rendered))
        } else {
            Ok(rendered)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn render(registry: &TemplateRegistry, template: &str, data: Value) -> String {
        registry.render("test", template, &data).expect("render")
    }

    #[test]
    fn test_interpolation() {
        let registry = TemplateRegistry::new();
        let data = json!({
            "title": "Hello",
            "site": { "name": "Trellis" },
            "list": ["x", "y"]
        });

        assert_eq!(render(&registry, "{{ title }}", data.clone()), "Hello");
        assert_eq!(render(&registry, "{{site.name}}!", data.clone()), "Trellis!");
        assert_eq!(render(&registry, "{{ list.1 }}", data.clone()), "y");
        assert_eq!(render(&registry, "[{{ missing.value }}]", data), "[]");
    }

    #[test]
    fn test_escaping() {
        let registry = TemplateRegistry::new();
        let data = json!({ "html": "<b>\"x\"</b>" });

        assert_eq!(
            render(&registry, "{{ html }}", data.clone()),
            "&lt;b&gt;&quot;x&quot;&lt;/b&gt;"
        );
        assert_eq!(render(&registry, "{{{ html }}}", data), "<b>\"x\"</b>");
    }

    #[test]
    fn test_comments() {
        let registry = TemplateRegistry::new();
        let template = "a{{! note }}b{{!-- has }} inside --}}c";
        assert_eq!(render(&registry, template, json!({})), "abc");
    }

    #[test]
    fn test_partials() {
        let mut registry = TemplateRegistry::new();
        registry.register_partial("greet", "Hi {{ name }}");
        registry.register_partial("card", "[{{ title }}]");
        let data = json!({ "name": "Ana", "item": { "title": "T" } });

        assert_eq!(render(&registry, "{{> greet }}", data.clone()), "Hi Ana");
        assert_eq!(render(&registry, "{{> card item }}", data), "[T]");
    }

    #[test]
    fn test_missing_partial() {
        let registry = TemplateRegistry::new();
        let result = registry.render("test", "{{> nope }}", &json!({}));
        assert!(matches!(result, Err(TemplateError::PartialNotFound(id)) if id == "nope"));
    }

    #[test]
    fn test_recursive_partial_is_bounded() {
        let mut registry = TemplateRegistry::new();
        registry.register_partial("loop", "{{> loop }}");
        let result = registry.render("test", "{{> loop }}", &json!({}));
        assert!(matches!(result, Err(TemplateError::Recursion(_))));
    }

    #[test]
    fn test_unclosed_tag() {
        let registry = TemplateRegistry::new();
        let result = registry.render("test", "{{ title", &json!({}));
        assert!(matches!(result, Err(TemplateError::Syntax { .. })));
    }

    #[test]
    fn test_helpers() {
        let templater = BuiltinTemplater::new(TemplaterOptions::default());
        let mut helpers = Helper::defaults();
        helpers.push(Helper::new("", |_| String::new()));
        assert_eq!(templater.register_helpers(&helpers), 3);

        let page = ContentEntry::default();
        let data = json!({ "name": "ana" });
        let out = templater
            .render_template(&page, r#"{{ upper name }} {{ lower "MIXED" }}"#, &data)
            .expect("render");
        assert_eq!(out, "ANA mixed");
    }

    #[test]
    fn test_markdown_pages() {
        let templater = BuiltinTemplater::new(TemplaterOptions::default());
        let page = ContentEntry {
            src_ext: ".md".into(),
            ..Default::default()
        };

        let out = templater
            .render_template(&page, "# {{ title }}", &json!({ "title": "Docs" }))
            .expect("render");
        assert_eq!(out.trim(), "<h1>Docs</h1>");
    }

    #[test]
    fn test_register_partial() {
        let templater = BuiltinTemplater::new(TemplaterOptions::default());
        templater.register_partial("nav", "<nav/>").expect("register");
        assert!(templater.has_partial("nav"));
    }
}
