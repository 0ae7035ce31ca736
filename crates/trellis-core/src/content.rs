//! Content types and structures.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    config::{Config, TypeConfig},
    error::{CoreError, Result},
    frontmatter::FrontMatter,
    paths,
};

/// Type name of rendered pages.
pub const PAGES: &str = "pages";
/// Type name of structured data files.
pub const DATA: &str = "data";
/// Type name of layouts.
pub const LAYOUTS: &str = "layouts";
/// Type name of partials.
pub const PARTIALS: &str = "partials";
/// Type name of shared auxiliary assets.
pub const COMMONS: &str = "commons";

/// Which store of the global cache a content type lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// The page store.
    Pages,
    /// The flat structured-data namespace.
    Data,
    /// A dedicated per-type store (layouts, partials, commons, custom types).
    Typed,
}

impl StoreKind {
    /// Classify a content type name.
    pub fn of(type_name: &str) -> Self {
        match type_name {
            PAGES => Self::Pages,
            DATA => Self::Data,
            _ => Self::Typed,
        }
    }
}

/// Parsed source: frontmatter plus body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Parsed {
    /// Frontmatter metadata.
    pub data: FrontMatter,

    /// Body without frontmatter.
    pub content: String,
}

/// One cached source file with its computed output location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentEntry {
    /// Stable identity.
    pub id: String,

    /// Content type name.
    #[serde(rename = "type")]
    pub kind: String,

    /// File name with extension.
    pub basename: String,

    /// File name without extension.
    pub filename: String,

    /// Normalised source directory.
    pub dirname: String,

    /// Source extension, including the dot.
    pub src_ext: String,

    /// Output extension, including the dot.
    pub ext: String,

    /// Destination root with a trailing `/`.
    pub dest_dir: String,

    /// Sub-directory below `dest_dir`, empty when flattened.
    pub dest_sub_dir: String,

    /// Output file relative to `dest_dir`.
    pub dest_file: String,

    /// Route used by the dev server.
    pub server_file: String,

    /// Relative path from the output location to the assets directory.
    pub assets: String,

    /// Normalised source path.
    pub src_path: String,

    /// Unparsed source text.
    pub raw: String,

    /// Frontmatter and body.
    pub parsed: Parsed,
}

impl ContentEntry {
    /// Build an entry for a source file of type `kind`.
    pub fn from_source(
        src_path: &Path,
        kind: &str,
        ty: &TypeConfig,
        config: &Config,
        raw: String,
        parsed: Parsed,
    ) -> Result<Self> {
        let src = paths::normalize(&src_path.to_string_lossy());
        let basename = paths::basename(&src);
        if basename.is_empty() {
            return Err(CoreError::InvalidPath(src_path.to_path_buf()));
        }
        let filename = paths::file_stem(&src);
        let id = paths::derive_id(
            &src,
            &config.type_root(ty),
            &filename,
            ty.create_deep_ids,
            ty.path_delimiter.as_deref(),
        );
        let deep_dir = paths::dirname(&paths::build_id(&src, &config.type_root(ty), &filename));

        let mut entry = Self {
            id,
            kind: kind.to_string(),
            basename,
            filename,
            dirname: paths::dirname(&src),
            src_ext: paths::extension(&src),
            src_path: src,
            raw,
            parsed,
            ..Default::default()
        };
        entry.locate(config, &deep_dir);
        Ok(entry)
    }

    /// Build a virtual page from one key of a structured-data file.
    ///
    /// A string `content` field becomes the body; every other field becomes
    /// frontmatter.
    pub fn virtual_page(key: &str, descriptor: &Value, source: &str, config: &Config) -> Result<Self> {
        let mut fields = match descriptor {
            Value::Object(map) => map.clone(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".into(), other.clone());
                map
            }
        };
        let content = match fields.remove("content") {
            Some(Value::String(body)) => body,
            Some(other) => {
                fields.insert("content".into(), other);
                String::new()
            }
            None => String::new(),
        };

        let key_path = paths::normalize(key);
        let filename = paths::basename(&key_path);
        if filename.is_empty() {
            return Err(CoreError::parse(source, format!("invalid page key '{key}'")));
        }

        let mut entry = Self {
            id: key_path.clone(),
            kind: PAGES.to_string(),
            basename: filename.clone(),
            filename,
            dirname: paths::dirname(source),
            src_ext: paths::extension(source),
            src_path: paths::normalize(source),
            raw: serde_json::to_string(descriptor)?,
            parsed: Parsed {
                data: FrontMatter::from_value(Value::Object(fields))?,
                content,
            },
            ..Default::default()
        };
        entry.locate(config, &paths::dirname(&key_path));
        Ok(entry)
    }

    /// Compute destination fields from the configured output layout.
    fn locate(&mut self, config: &Config, deep_dir: &str) {
        self.ext = config.ext.clone();
        self.dest_dir = config.dest_dir();
        self.dest_sub_dir = if config.flatten {
            String::new()
        } else {
            deep_dir.to_string()
        };

        let stem = if self.dest_sub_dir.is_empty() {
            self.filename.clone()
        } else {
            format!("{}/{}", self.dest_sub_dir, self.filename)
        };
        self.dest_file = format!("{stem}{}", self.ext);
        self.server_file = stem;
        self.assets = paths::assets_path(
            &paths::join(&self.dest_dir, &self.dest_sub_dir),
            &config.assets_dir(),
        );
    }

    /// Full output path (`dest_dir` + `dest_file`).
    pub fn output_path(&self) -> String {
        format!("{}{}", self.dest_dir, self.dest_file)
    }

    /// Frontmatter of this entry.
    pub fn front_matter(&self) -> &FrontMatter {
        &self.parsed.data
    }
}
