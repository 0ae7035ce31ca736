//! Output helpers.

use std::{fs, io, path::Path};

use tracing::{debug, info};

use crate::cache::GlobalCache;

/// Write a rendered file, creating parent directories as needed.
pub fn write_output(path: &Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    debug!(path = %path.display(), bytes = contents.len(), "wrote output");
    Ok(())
}

/// Serialise the cache to pretty-printed JSON at `path`.
pub fn export_cache(cache: &GlobalCache, path: &Path) -> io::Result<()> {
    let json = serde_json::to_string_pretty(&cache.to_value()).map_err(io::Error::other)?;
    write_output(path, &json)?;
    info!(path = %path.display(), "exported cache data");
    Ok(())
}
