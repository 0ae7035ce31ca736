//! Trellis Generator Library
//!
//! Content caching and incremental build orchestration for Trellis.
//!
//! # Modules
//!
//! - [`cache`] - Global content cache with repository indices and collections
//! - [`events`] - Namespaced publish/subscribe event bus
//! - [`source`] - Glob expansion and source file reading
//! - [`watch`] - Filesystem watcher adapter publishing source events
//! - [`templater`] - Rendering backend contract
//! - [`template`] - Built-in interpolation templater
//! - [`output`] - Output and cache export helpers
//! - [`build`] - Build orchestration

pub mod build;
pub mod cache;
pub mod events;
pub mod output;
pub mod source;
pub mod template;
pub mod templater;
pub mod watch;

pub use build::{BuildError, BuildMode, BuildPhase, BuildStats, Builder, RenderSummary, Update};
pub use cache::{CacheItem, Collection, GlobalCache, SharedCache};
pub use events::{Action, Event, EventBus, SourceEvent, SubscriptionId};
pub use source::{ParsedData, PatternSet, SourceFile};
pub use template::{BuiltinTemplater, TemplateRegistry};
pub use templater::{Helper, Rendered, TemplateError, Templater, TemplaterOptions};
pub use watch::{SourceWatcher, WatchError, WatcherState};
