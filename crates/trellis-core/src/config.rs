//! Build configuration management.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    content::{DATA, PAGES},
    error::{CoreError, Result},
    paths,
};

/// Main configuration structure for Trellis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Working directory that type directories are resolved against.
    #[serde(default)]
    pub cwd: String,

    /// Destination directory for rendered output.
    #[serde(default)]
    pub dest: String,

    /// Output file extension.
    #[serde(default = "default_ext")]
    pub ext: String,

    /// Shared assets directory, relative to `dest`.
    #[serde(default)]
    pub assets: String,

    /// Drop nested destination sub-directories.
    #[serde(default)]
    pub flatten: bool,

    /// Enable the filesystem watcher.
    #[serde(default)]
    pub watch: bool,

    /// Write the serialised cache after every full render.
    #[serde(default)]
    pub export_data: bool,

    /// Let templaters write output files instead of returning them.
    #[serde(default = "default_true")]
    pub compile_static_files: bool,

    /// Declared collection keys.
    #[serde(default)]
    pub collections: Vec<String>,

    /// Data id whose top-level keys become virtual pages.
    #[serde(default)]
    pub generate_pages_from: Option<String>,

    /// Front matter driven features.
    #[serde(default)]
    pub allow: AllowConfig,

    /// Declared content types by name.
    #[serde(default)]
    pub types: BTreeMap<String, TypeConfig>,

    /// Development server settings.
    #[serde(default)]
    pub server: ServerConfig,
}

/// Settings for one content type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeConfig {
    /// Root directory of the type, relative to `cwd`.
    #[serde(default)]
    pub dir: String,

    /// Glob include patterns, relative to `dir`.
    #[serde(default)]
    pub files: Vec<String>,

    /// Glob exclude patterns, relative to `dir`.
    #[serde(default)]
    pub ignore: Vec<String>,

    /// Encode sub-directories below `dir` into the id.
    #[serde(default)]
    pub create_deep_ids: bool,

    /// Replaces `/` in deep ids.
    #[serde(default)]
    pub path_delimiter: Option<String>,
}

/// Front matter features the templater honours.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowConfig {
    /// Wrap pages in the layout named by their `layout` key.
    #[serde(default)]
    pub yfm_layout: bool,

    /// Merge the data entry named by `contextData` into the render context.
    #[serde(default)]
    pub yfm_context_data: bool,
}

/// Development server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Append the output extension to registered routes.
    #[serde(default = "default_true")]
    pub use_ext: bool,

    /// Open a browser once the server is up.
    #[serde(default)]
    pub open: bool,
}

fn default_ext() -> String {
    ".html".to_string()
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            use_ext: true,
            open: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwd: String::new(),
            dest: String::new(),
            ext: default_ext(),
            assets: String::new(),
            flatten: false,
            watch: false,
            export_data: false,
            compile_static_files: true,
            collections: Vec::new(),
            generate_pages_from: None,
            allow: AllowConfig::default(),
            types: BTreeMap::new(),
            server: ServerConfig::default(),
        }
    }
}

impl TypeConfig {
    /// Create a type rooted at `dir` with the given include patterns.
    pub fn new(dir: impl Into<String>, files: &[&str]) -> Self {
        Self {
            dir: dir.into(),
            files: files.iter().map(|f| f.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Enable deep ids, optionally flattened with a delimiter.
    #[must_use]
    pub fn with_deep_ids(mut self, delimiter: Option<&str>) -> Self {
        self.create_deep_ids = true;
        self.path_delimiter = delimiter.map(str::to_string);
        self
    }

    /// Add exclude patterns.
    #[must_use]
    pub fn with_ignore(mut self, ignore: &[&str]) -> Self {
        self.ignore = ignore.iter().map(|f| f.to_string()).collect();
        self
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CoreError::config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content).map_err(|e| {
            CoreError::config_with_source(
                format!("Failed to parse config file: {}", path.display()),
                e,
            )
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file layered with `TRELLIS__*` environment
    /// variables.
    pub fn load_with_env(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("TRELLIS").separator("__"))
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.dest.trim().is_empty() {
            return Err(CoreError::config("dest cannot be empty"));
        }

        for (name, ty) in &self.types {
            if name.is_empty() || name.contains(':') {
                return Err(CoreError::config(format!(
                    "invalid content type name '{name}'"
                )));
            }
            if ty.files.is_empty() {
                return Err(CoreError::config(format!(
                    "types.{name}.files must contain at least one pattern"
                )));
            }
            if ty.path_delimiter.as_deref() == Some("") {
                return Err(CoreError::config(format!(
                    "types.{name}.path_delimiter cannot be empty"
                )));
            }
        }

        if let Some(source) = &self.generate_pages_from
            && !self.types.contains_key(DATA)
        {
            tracing::warn!(
                source = %source,
                "generate_pages_from is set but no data type is declared"
            );
        }

        if !self.types.contains_key(PAGES) && self.generate_pages_from.is_none() {
            tracing::warn!("no pages type declared, nothing will be rendered");
        }

        if !self.ext.is_empty() && !self.ext.starts_with('.') {
            tracing::warn!(ext = %self.ext, "ext should start with a dot");
        }

        Ok(())
    }

    /// Normalised root directory of a content type (`cwd/dir`).
    pub fn type_root(&self, ty: &TypeConfig) -> String {
        paths::join(&self.cwd, &ty.dir)
    }

    /// Absolute-or-relative glob patterns of a type, excludes prefixed `!`.
    pub fn type_patterns(&self, ty: &TypeConfig) -> Vec<String> {
        let root = paths::with_trailing_slash(&self.type_root(ty));
        let pattern = |p: &str| format!("{root}{}", p.trim_start_matches('/'));

        ty.files
            .iter()
            .map(|p| match p.strip_prefix('!') {
                Some(exclude) => format!("!{}", pattern(exclude)),
                None => pattern(p),
            })
            .chain(ty.ignore.iter().map(|p| format!("!{}", pattern(p))))
            .collect()
    }

    /// Destination directory with a trailing `/`.
    pub fn dest_dir(&self) -> String {
        paths::with_trailing_slash(&paths::normalize(&self.dest))
    }

    /// Shared assets directory inside `dest`.
    pub fn assets_dir(&self) -> String {
        paths::join(&self.dest, &self.assets)
    }

    /// Location of the exported cache file.
    pub fn export_path(&self) -> PathBuf {
        Path::new(&self.cwd).join("exported").join("exported-data.json")
    }

    /// Whether `name` is a declared collection key.
    pub fn is_collection(&self, name: &str) -> bool {
        self.collections.iter().any(|c| c == name)
    }
}
