//! Output formatting and persistence for query results.
//!
//! Supports printing JSON to stdout and writing JSON snapshots atomically.

use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

/// Writes `value` as pretty-printed JSON to `out`, followed by a newline.
pub fn write_json<W: Write, T: Serialize + ?Sized>(mut out: W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

/// Prints `value` as pretty-printed JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let stdout = std::io::stdout();
    write_json(stdout.lock(), value)
}

/// Serializes `value` to `path` through a temporary sibling file and a
/// rename, so readers never see a partial document.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
    write_json(&mut tmp, value)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;

    let bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    debug!(path = %path.display(), bytes, "JSON snapshot written");
    info!(path = %path.display(), "Snapshot saved");
    Ok(())
}
