//! Frontmatter parsing for content files.
//!
//! A small set of keys drives engine behaviour (`layout`, `publish`,
//! `contextData`); everything else is kept verbatim in [`FrontMatter::extra`]
//! and handed to templates untouched.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, Result};

/// Frontmatter metadata for content files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrontMatter {
    /// Layout id to wrap the page body with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<String>,

    /// `false` skips output generation for the page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish: Option<bool>,

    /// Id of a data entry merged into the render context.
    #[serde(
        default,
        rename = "contextData",
        skip_serializing_if = "Option::is_none"
    )]
    pub context_data: Option<String>,

    /// Every other key, passed through unchanged.
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

impl FrontMatter {
    /// Build frontmatter from an arbitrary JSON object.
    ///
    /// Non-object values yield empty frontmatter.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(_) => Ok(serde_json::from_value(value)?),
            _ => Ok(Self::default()),
        }
    }

    /// Look up a key, including the recognised ones.
    pub fn get(&self, key: &str) -> Option<Value> {
        match key {
            "layout" => self.layout.clone().map(Value::String),
            "publish" => self.publish.map(Value::Bool),
            "contextData" => self.context_data.clone().map(Value::String),
            _ => self.extra.get(key).cloned(),
        }
    }

    /// Whether the page should be generated at all.
    pub fn is_published(&self) -> bool {
        self.publish != Some(false)
    }

    /// Convert into a JSON object for template contexts.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = self.extra.clone();
        if let Some(layout) = &self.layout {
            map.insert("layout".into(), Value::String(layout.clone()));
        }
        if let Some(publish) = self.publish {
            map.insert("publish".into(), Value::Bool(publish));
        }
        if let Some(context) = &self.context_data {
            map.insert("contextData".into(), Value::String(context.clone()));
        }
        map
    }
}

/// Delimiter types for frontmatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontmatterFormat {
    /// YAML frontmatter delimited by `---`.
    Yaml,
    /// TOML frontmatter delimited by `+++`.
    Toml,
}

impl FrontmatterFormat {
    /// Get the delimiter string for this format.
    pub fn delimiter(&self) -> &'static str {
        match self {
            Self::Yaml => "---",
            Self::Toml => "+++",
        }
    }
}

/// Split content into frontmatter and body.
///
/// The opening delimiter must be the first line; the closing one must stand
/// on its own line.
pub fn split_frontmatter(content: &str) -> Option<(FrontmatterFormat, &str, &str)> {
    let content = content.trim_start_matches('\u{feff}');

    let format = if content.starts_with("---") {
        FrontmatterFormat::Yaml
    } else if content.starts_with("+++") {
        FrontmatterFormat::Toml
    } else {
        return None;
    };

    let delimiter = format.delimiter();
    let first_line_end = content.find('\n')?;
    if content[..first_line_end].trim_end() != delimiter {
        return None;
    }

    let after_first = &content[first_line_end + 1..];
    let mut offset = 0;
    for line in after_first.split_inclusive('\n') {
        if line.trim_end() == delimiter {
            let frontmatter = &after_first[..offset];
            let body = &after_first[offset + line.len()..];
            return Some((format, frontmatter, body.trim_start_matches(['\r', '\n'])));
        }
        offset += line.len();
    }

    // closing delimiter on the last line without a newline
    None
}

/// Parse frontmatter from a string, returning it with the remaining body.
pub fn parse_frontmatter(content: &str, path: &Path) -> Result<(FrontMatter, String)> {
    let Some((format, fm_str, body)) = split_frontmatter(content) else {
        return Ok((FrontMatter::default(), content.to_string()));
    };

    if fm_str.trim().is_empty() {
        return Ok((FrontMatter::default(), body.to_string()));
    }

    let frontmatter: FrontMatter = match format {
        FrontmatterFormat::Yaml => {
            serde_yaml::from_str(fm_str).map_err(|e| CoreError::frontmatter(path, e.to_string()))?
        }
        FrontmatterFormat::Toml => {
            toml::from_str(fm_str).map_err(|e| CoreError::frontmatter(path, e.to_string()))?
        }
    };

    Ok((frontmatter, body.to_string()))
}
