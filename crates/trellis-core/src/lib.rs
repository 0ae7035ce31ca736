//! Trellis Core Library
//!
//! Core types, configuration, error handling and id derivation for the Trellis
//! static content build engine.

pub mod config;
pub mod content;
pub mod error;
pub mod frontmatter;
pub mod paths;

pub use config::{Config, TypeConfig};
pub use content::{ContentEntry, Parsed, StoreKind};
pub use error::{CoreError, Result};
pub use frontmatter::FrontMatter;
