// taillight - app/export.rs
//
// Export of the currently indexed stream (typically the merged view) to a
// plain text file, one line per logical row.
//
// The export is written to a temporary file beside the target and persisted
// over it only on success, so an I/O failure never leaves a partial file at
// the target path.

use crate::app::engine::LogEngine;
use crate::util::error::ExportError;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Stream every logical line of `engine` in index order to `path`.
/// Returns the number of lines written.
pub fn save_merged(engine: &mut LogEngine, path: &Path) -> Result<usize, ExportError> {
    let io_err = |source: std::io::Error| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };

    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    let temp = match parent {
        Some(parent) => tempfile::NamedTempFile::new_in(parent),
        None => tempfile::NamedTempFile::new(),
    }
    .map_err(io_err)?;

    let mut writer = BufWriter::new(temp);
    let line_count = engine.line_count();
    for index in 0..line_count {
        let line = engine.get_line_blocking(index);
        writeln!(writer, "{line}").map_err(io_err)?;
    }

    let temp = writer
        .into_inner()
        .map_err(|e| io_err(e.into_error()))?;
    temp.persist(path).map_err(|e| io_err(e.error))?;

    tracing::info!(path = %path.display(), lines = line_count, "Saved merged stream");
    Ok(line_count)
}
