//! Atomic replacement of output files.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use tracing::debug;

/// Write `path` through a temporary sibling and rename it into place.
///
/// Readers see either the previous file or the complete new one. If `write`
/// fails, the previous file is left untouched and the temporary is removed.
pub fn publish_atomically<F>(path: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let tmp = tempfile::Builder::new()
        .prefix(".licita-")
        .suffix(".tmp")
        .tempfile_in(dir)?;

    let mut out = BufWriter::new(tmp);
    write(&mut out)?;
    let tmp = out.into_inner().map_err(|e| e.into_error())?;
    tmp.as_file().sync_all()?;
    let file: File = tmp.persist(path).map_err(|e| e.error)?;
    drop(file);
    debug!(path = %path.display(), "published");
    Ok(())
}
