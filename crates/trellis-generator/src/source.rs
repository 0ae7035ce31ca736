//! Source discovery and reading.
//!
//! Patterns are plain globs; a leading `!` marks an exclude. Discovery walks
//! the literal base directory of every include pattern and keeps the files
//! the include set matches and the exclude set does not.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use trellis_core::{CoreError, FrontMatter, Parsed, frontmatter::parse_frontmatter, paths};
use walkdir::WalkDir;

/// Source errors.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Invalid glob pattern.
    #[error("invalid pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    /// IO error while reading a file.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Parse error.
    #[error(transparent)]
    Parse(#[from] CoreError),
}

/// Result type for source operations.
pub type Result<T> = std::result::Result<T, SourceError>;

/// Compiled include/exclude patterns of one content type.
#[derive(Debug, Clone)]
pub struct PatternSet {
    include: GlobSet,
    exclude: GlobSet,
    bases: Vec<String>,
}

impl PatternSet {
    /// Compile patterns; entries starting with `!` are excludes.
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut include = GlobSetBuilder::new();
        let mut exclude = GlobSetBuilder::new();
        let mut bases = Vec::new();

        for raw in patterns {
            let (negated, pattern) = match raw.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, raw.as_str()),
            };
            let pattern = paths::normalize(pattern);
            let glob = compile(&pattern)?;
            if negated {
                exclude.add(glob);
            } else {
                let base = glob_base(&pattern);
                if !bases.contains(&base) {
                    bases.push(base);
                }
                include.add(glob);
            }
        }

        let build = |builder: GlobSetBuilder| {
            builder.build().map_err(|source| SourceError::Pattern {
                pattern: patterns.join(", "),
                source,
            })
        };

        Ok(Self {
            include: build(include)?,
            exclude: build(exclude)?,
            bases,
        })
    }

    /// Whether a path is selected by this set.
    pub fn matches(&self, path: &Path) -> bool {
        let normalized = paths::normalize(&path.to_string_lossy());
        self.include.is_match(&normalized) && !self.exclude.is_match(&normalized)
    }

    /// Literal directories the include patterns are rooted in.
    pub fn bases(&self) -> &[String] {
        &self.bases
    }

    /// Walk the base directories and return every matching file, sorted.
    ///
    /// Missing base directories contribute nothing. Entries the walk cannot
    /// read (dangling links, permission errors) are logged and skipped.
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();

        for base in &self.bases {
            let root = if base.is_empty() { "." } else { base.as_str() };
            if !Path::new(root).is_dir() {
                debug!(base = %root, "pattern base does not exist");
                continue;
            }

            for entry in WalkDir::new(root).follow_links(true) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(base = %root, error = %e, "skipping unreadable entry");
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = PathBuf::from(paths::normalize(&entry.path().to_string_lossy()));
                if self.matches(&path) && seen.insert(path.clone()) {
                    files.push(path);
                }
            }
        }

        files.sort();
        Ok(files)
    }
}

fn compile(pattern: &str) -> Result<Glob> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|source| SourceError::Pattern {
            pattern: pattern.to_string(),
            source,
        })
}

/// Leading directory of a pattern that contains no glob syntax.
///
/// A pattern without glob syntax names a file, so its parent is returned.
pub fn glob_base(pattern: &str) -> String {
    let pattern = paths::normalize(pattern);
    let segments: Vec<&str> = pattern.split('/').collect();
    let literal = segments
        .iter()
        .take_while(|s| !s.contains(['*', '?', '[', '{']))
        .count();

    let take = if literal == segments.len() {
        literal.saturating_sub(1)
    } else {
        literal
    };
    let base = segments[..take].join("/");
    if base.is_empty() && pattern.starts_with('/') {
        "/".to_string()
    } else {
        base
    }
}

/// Expand a pattern list into the matching files.
pub fn get_files(patterns: &[String]) -> Result<Vec<PathBuf>> {
    PatternSet::new(patterns)?.files()
}

/// Parsed contents of a source file.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedData {
    /// JSON, YAML or TOML data.
    Structured(Value),
    /// Frontmatter plus body.
    Document(Parsed),
}

/// A source file read from disk.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path the file was read from.
    pub path: PathBuf,

    /// Unparsed text.
    pub raw: String,

    /// Parsed contents.
    pub parsed: ParsedData,
}

impl ParsedData {
    /// Frontmatter and body. Structured data becomes frontmatter with an
    /// empty body.
    pub fn into_document(self) -> Result<Parsed> {
        match self {
            Self::Document(parsed) => Ok(parsed),
            Self::Structured(value) => Ok(Parsed {
                data: FrontMatter::from_value(value)?,
                content: String::new(),
            }),
        }
    }
}

/// Read and parse one source file, dispatching on its extension.
pub fn read_file(path: &Path) -> Result<SourceFile> {
    let raw = fs::read_to_string(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed = parse_source(path, &raw)?;
    Ok(SourceFile {
        path: path.to_path_buf(),
        raw,
        parsed,
    })
}

/// Parse source text according to the extension of `path`.
pub fn parse_source(path: &Path, raw: &str) -> Result<ParsedData> {
    let ext = paths::extension(&path.to_string_lossy()).to_ascii_lowercase();
    let parse_err = |message: String| SourceError::Parse(CoreError::parse(path, message));

    let parsed = match ext.as_str() {
        ".json" => ParsedData::Structured(
            serde_json::from_str(raw).map_err(|e| parse_err(e.to_string()))?,
        ),
        ".yaml" | ".yml" => ParsedData::Structured(
            serde_yaml::from_str(raw).map_err(|e| parse_err(e.to_string()))?,
        ),
        ".toml" => ParsedData::Structured(
            toml::from_str(raw).map_err(|e| parse_err(e.to_string()))?,
        ),
        ".hjson" => ParsedData::Structured(
            deser_hjson::from_str(raw).map_err(|e| parse_err(e.to_string()))?,
        ),
        _ => {
            let (data, content) = parse_frontmatter(raw, path)?;
            ParsedData::Document(Parsed { data, content })
        }
    };
    Ok(parsed)
}
