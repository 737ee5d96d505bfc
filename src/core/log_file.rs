// taillight - core/log_file.rs
//
// One open log file: plain files are read in place; gzip/bzip2 archives are
// streamed into an anonymous temporary file which then serves as the
// underlying handle. All reads are positional so the descriptor can be
// shared across the engine, the line reader, and the watcher without
// perturbing each other's view of the file.

use crate::core::format::{FormatParser, ParsedLine};
use crate::core::timestamps::TimestampScanner;
use crate::util::constants::{DECOMPRESS_CHUNK_SIZE, SCAN_BATCH_OFFSETS, TAB_SIZE};
use crate::util::error::OpenError;
use chrono::{DateTime, Utc};
use memmap2::Mmap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

// =============================================================================
// Compression detection
// =============================================================================

/// Supported archive encodings, detected from the filename extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Bzip2,
}

fn detect_compression(path: &Path) -> Option<Compression> {
    let extension = path.extension()?.to_str()?;
    if extension.eq_ignore_ascii_case("gz") {
        Some(Compression::Gzip)
    } else if extension.eq_ignore_ascii_case("bz2") || extension.eq_ignore_ascii_case("bz") {
        Some(Compression::Bzip2)
    } else {
        None
    }
}

// =============================================================================
// LogFile
// =============================================================================

/// The opened half of a `LogFile`, set once by `open`.
#[derive(Debug)]
struct OpenFile {
    file: File,
    size: u64,
    can_tail: bool,
    /// Serialises seek+read on platforms without positional reads.
    #[cfg(not(any(unix, windows)))]
    seek_lock: std::sync::Mutex<()>,
}

/// A single log file.
///
/// Construction records the path only; `open` resolves the handle. Once
/// opened, a `LogFile` is immutable apart from the interior promote-on-match
/// state of its scanner and parser, so it can be shared as `Arc<LogFile>`.
#[derive(Debug)]
pub struct LogFile {
    path: PathBuf,
    name: String,
    state: OnceLock<OpenFile>,
    pub timestamp_scanner: TimestampScanner,
    pub format_parser: FormatParser,
}

impl LogFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            path,
            name,
            state: OnceLock::new(),
            timestamp_scanner: TimestampScanner::new(),
            format_parser: FormatParser::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Display name (the final path component).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.state.get().is_some()
    }

    /// File size in bytes recorded at open time (decompressed size for
    /// archives). Zero until opened.
    pub fn size(&self) -> u64 {
        self.state.get().map(|s| s.size).unwrap_or(0)
    }

    /// Whether this file can be tailed: true only for a direct handle on an
    /// ordinary file, never for a decompressed-to-temp view.
    pub fn can_tail(&self) -> bool {
        self.state.get().map(|s| s.can_tail).unwrap_or(false)
    }

    pub fn is_compressed(&self) -> bool {
        detect_compression(&self.path).is_some()
    }

    /// Classify and render a line with this file's format parser.
    pub fn parse(&self, line: &str) -> ParsedLine {
        self.format_parser.parse(line)
    }

    /// The file's creation time, used to seed timestamp carry-forward so
    /// merge ordering is stable within a file. Filesystems without a birth
    /// time report the epoch.
    pub fn create_time(&self) -> Option<DateTime<Utc>> {
        let metadata = std::fs::metadata(&self.path).ok()?;
        match metadata.created() {
            Ok(created) => Some(created.into()),
            Err(_) => Some(DateTime::UNIX_EPOCH),
        }
    }

    // -------------------------------------------------------------------------
    // Opening
    // -------------------------------------------------------------------------

    /// Open the file for reading.
    ///
    /// Ordinary files open read-only and record their current size. Archives
    /// are streamed into an anonymous temporary file in
    /// `DECOMPRESS_CHUNK_SIZE` chunks, polling `cancel` between chunks.
    ///
    /// Returns `Ok(false)` when cancelled mid-decompression, `Ok(true)` on
    /// success (including when already open).
    pub fn open(&self, cancel: &AtomicBool) -> Result<bool, OpenError> {
        if self.is_open() {
            return Ok(true);
        }

        if let Some(compression) = detect_compression(&self.path) {
            return self.open_compressed(cancel, compression);
        }

        let file = File::open(&self.path)
            .map_err(|e| OpenError::from_io(self.path.clone(), e))?;
        let metadata = file
            .metadata()
            .map_err(|e| OpenError::from_io(self.path.clone(), e))?;
        if !metadata.is_file() {
            return Err(OpenError::NotAFile {
                path: self.path.clone(),
            });
        }

        let size = metadata.len();
        tracing::debug!(file = %self.path.display(), size, "Opened log file");
        self.install(OpenFile {
            file,
            size,
            can_tail: true,
            #[cfg(not(any(unix, windows)))]
            seek_lock: std::sync::Mutex::new(()),
        });
        Ok(true)
    }

    fn open_compressed(
        &self,
        cancel: &AtomicBool,
        compression: Compression,
    ) -> Result<bool, OpenError> {
        let source = File::open(&self.path)
            .map_err(|e| OpenError::from_io(self.path.clone(), e))?;

        let mut decoder: Box<dyn Read> = match compression {
            // MultiGzDecoder handles concatenated members, which rotated
            // then recompressed logs produce.
            Compression::Gzip => Box::new(flate2::read::MultiGzDecoder::new(source)),
            Compression::Bzip2 => Box::new(bzip2::read::BzDecoder::new(source)),
        };

        let mut temp = tempfile::tempfile().map_err(|e| OpenError::Io {
            path: self.path.clone(),
            source: e,
        })?;

        let mut chunk = vec![0u8; DECOMPRESS_CHUNK_SIZE];
        let mut size: u64 = 0;
        loop {
            let n = decoder.read(&mut chunk).map_err(|e| OpenError::Decompress {
                path: self.path.clone(),
                source: e,
            })?;
            if n == 0 {
                break;
            }
            temp.write_all(&chunk[..n]).map_err(|e| OpenError::Io {
                path: self.path.clone(),
                source: e,
            })?;
            size += n as u64;
            if cancel.load(Ordering::Relaxed) {
                tracing::debug!(file = %self.path.display(), "Decompression cancelled");
                return Ok(false);
            }
        }
        temp.flush().map_err(|e| OpenError::Io {
            path: self.path.clone(),
            source: e,
        })?;

        tracing::debug!(
            file = %self.path.display(),
            decompressed = size,
            "Decompressed archive to temporary file"
        );
        self.install(OpenFile {
            file: temp,
            size,
            can_tail: false,
            #[cfg(not(any(unix, windows)))]
            seek_lock: std::sync::Mutex::new(()),
        });
        Ok(true)
    }

    fn install(&self, open_file: OpenFile) {
        // Two racing opens are harmless: the loser's handle is dropped.
        let _ = self.state.set(open_file);
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Read the absolute byte range [start, end), returning fewer bytes only
    /// when the range extends past end-of-file.
    pub fn get_raw(&self, start: u64, end: u64) -> io::Result<Vec<u8>> {
        let Some(state) = self.state.get() else {
            return Ok(Vec::new());
        };
        if start >= end {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; (end - start) as usize];
        let n = read_at(state, &mut buf, start)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Decode the byte range as a display line: lossy UTF-8, newline and
    /// carriage-return characters stripped from both ends, tabs expanded to
    /// `TAB_SIZE`-column stops.
    ///
    /// Read failures degrade to an empty line; they are logged rather than
    /// propagated so a render pass never fails.
    pub fn get_line(&self, start: u64, end: u64) -> String {
        let raw = match self.get_raw(start, end) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(
                    file = %self.path.display(),
                    start,
                    end,
                    error = %e,
                    "Line read failed"
                );
                return String::new();
            }
        };
        let decoded = String::from_utf8_lossy(&raw);
        expand_tabs(decoded.trim_matches(['\n', '\r']), TAB_SIZE)
    }

    // -------------------------------------------------------------------------
    // Bulk scanners
    // -------------------------------------------------------------------------

    /// Scan the file for line breaks, back to front.
    ///
    /// The returned scanner memory-maps the file (unmapping on drop) and
    /// yields `(position_reached, offsets)` batches roughly every
    /// `batch_deadline` or every `SCAN_BATCH_OFFSETS` offsets, whichever
    /// comes first. Offsets within a batch are descending; the engine sorts
    /// on receipt. If the final byte is not a newline, the position just
    /// past it is included as a synthetic break so the last line is
    /// addressable.
    pub fn scan_line_breaks(&self, batch_deadline: Duration) -> io::Result<LineBreakScanner> {
        let Some(state) = self.state.get() else {
            return Ok(LineBreakScanner::empty(batch_deadline));
        };
        if state.size == 0 {
            return Ok(LineBreakScanner::empty(batch_deadline));
        }
        // SAFETY: the mapping is read-only and the handle stays open for the
        // scanner's lifetime. Concurrent appends never shrink the mapped
        // prefix.
        let mmap = unsafe { Mmap::map(&state.file)? };
        let size = (state.size as usize).min(mmap.len());
        let synthetic = if size > 0 && mmap[size - 1] != b'\n' {
            Some(size as u64)
        } else {
            None
        };
        Ok(LineBreakScanner {
            mmap: Some(mmap),
            position: size,
            synthetic,
            batch_deadline,
            done: false,
        })
    }

    /// Scan the file front to back, producing for every line the offset
    /// just past its terminating newline (or past the final byte for an
    /// unterminated last line) and its timestamp in UNIX seconds.
    ///
    /// Lines without a recognisable timestamp carry the last seen value
    /// forward, seeded from the file create time, so ordering stays stable
    /// within a file.
    pub fn scan_timestamps(&self, batch_deadline: Duration) -> io::Result<TimestampIndexScanner<'_>> {
        let Some(state) = self.state.get() else {
            return Ok(TimestampIndexScanner::empty(self, batch_deadline));
        };
        if state.size == 0 {
            return Ok(TimestampIndexScanner::empty(self, batch_deadline));
        }
        // SAFETY: read-only mapping over an open handle, as above.
        let mmap = unsafe { Mmap::map(&state.file)? };
        let size = (state.size as usize).min(mmap.len());
        let seed = self
            .create_time()
            .map(|t| t.timestamp() as f64)
            .unwrap_or(0.0);
        Ok(TimestampIndexScanner {
            log_file: self,
            mmap: Some(mmap),
            size,
            position: 0,
            line_no: 0,
            last_timestamp: seed,
            batch_deadline,
            done: false,
        })
    }
}

// =============================================================================
// Positional reads
// =============================================================================

/// Read into `buf` at `offset`, filling as much of `buf` as the file allows.
#[cfg(unix)]
fn read_at(state: &OpenFile, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    let mut filled = 0;
    while filled < buf.len() {
        match state.file.read_at(&mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(windows)]
fn read_at(state: &OpenFile, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    let mut filled = 0;
    while filled < buf.len() {
        match state.file.seek_read(&mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Fallback for platforms without positional reads: a per-file mutex
/// serialises seek + read + restore.
#[cfg(not(any(unix, windows)))]
fn read_at(state: &OpenFile, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::io::{Seek, SeekFrom};
    let _guard = state.seek_lock.lock().expect("seek lock poisoned");
    let mut file = &state.file;
    let restore = file.stream_position()?;
    file.seek(SeekFrom::Start(offset))?;
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = file.seek(SeekFrom::Start(restore));
                return Err(e);
            }
        }
    }
    file.seek(SeekFrom::Start(restore))?;
    Ok(filled)
}

// =============================================================================
// Tab expansion
// =============================================================================

/// Expand tabs to `tab_size`-column stops (column-aware, like terminal
/// rendering expects).
fn expand_tabs(line: &str, tab_size: usize) -> String {
    if !line.contains('\t') {
        return line.to_string();
    }
    let mut out = String::with_capacity(line.len());
    let mut column = 0usize;
    for ch in line.chars() {
        if ch == '\t' {
            let pad = tab_size - (column % tab_size);
            out.extend(std::iter::repeat(' ').take(pad));
            column += pad;
        } else {
            out.push(ch);
            column += 1;
        }
    }
    out
}

// =============================================================================
// LineBreakScanner
// =============================================================================

/// Finite, non-restartable reverse scan over a memory-mapped file, yielding
/// `(position_reached, offsets)` batches. Dropping the scanner unmaps.
#[derive(Debug)]
pub struct LineBreakScanner {
    mmap: Option<Mmap>,
    position: usize,
    synthetic: Option<u64>,
    batch_deadline: Duration,
    done: bool,
}

impl LineBreakScanner {
    fn empty(batch_deadline: Duration) -> Self {
        Self {
            mmap: None,
            position: 0,
            synthetic: None,
            batch_deadline,
            done: true,
        }
    }
}

impl Iterator for LineBreakScanner {
    type Item = (u64, Vec<u64>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let deadline = Instant::now() + self.batch_deadline;
        let mut batch: Vec<u64> = Vec::new();
        if let Some(synthetic) = self.synthetic.take() {
            batch.push(synthetic);
        }

        let mut position = self.position;
        let mut finished = false;
        {
            let mmap = self.mmap.as_ref()?;
            loop {
                match memchr::memrchr(b'\n', &mmap[..position]) {
                    Some(offset) => {
                        batch.push(offset as u64);
                        position = offset;
                        if batch.len() >= SCAN_BATCH_OFFSETS || Instant::now() >= deadline {
                            break;
                        }
                    }
                    None => {
                        position = 0;
                        finished = true;
                        break;
                    }
                }
            }
        }

        self.position = position;
        if finished {
            self.done = true;
            self.mmap = None;
        }
        Some((position as u64, batch))
    }
}

// =============================================================================
// TimestampIndexScanner
// =============================================================================

/// Forward scan producing `(line_no, end_position, timestamp_seconds)`
/// batches for the merge index. Dropping the scanner unmaps.
pub struct TimestampIndexScanner<'a> {
    log_file: &'a LogFile,
    mmap: Option<Mmap>,
    size: usize,
    position: usize,
    line_no: usize,
    last_timestamp: f64,
    batch_deadline: Duration,
    done: bool,
}

impl TimestampIndexScanner<'_> {
    fn empty(log_file: &LogFile, batch_deadline: Duration) -> TimestampIndexScanner<'_> {
        TimestampIndexScanner {
            log_file,
            mmap: None,
            size: 0,
            position: 0,
            line_no: 0,
            last_timestamp: 0.0,
            batch_deadline,
            done: true,
        }
    }
}

impl Iterator for TimestampIndexScanner<'_> {
    type Item = Vec<(usize, u64, f64)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let deadline = Instant::now() + self.batch_deadline;
        let mut batch: Vec<(usize, u64, f64)> = Vec::new();

        let mut position = self.position;
        let mut line_no = self.line_no;
        let mut last_timestamp = self.last_timestamp;
        let mut finished = true;
        {
            let mmap = self.mmap.as_ref()?;
            while position < self.size {
                let rest = &mmap[position..self.size];
                let end = match memchr::memchr(b'\n', rest) {
                    Some(newline) => position + newline + 1,
                    None => self.size,
                };
                let line = String::from_utf8_lossy(&mmap[position..end]);
                if let Some(timestamp) = self.log_file.timestamp_scanner.scan(&line) {
                    last_timestamp = timestamp.timestamp() as f64
                        + f64::from(timestamp.timestamp_subsec_millis()) / 1_000.0;
                }
                batch.push((line_no, end as u64, last_timestamp));
                line_no += 1;
                position = end;

                if position < self.size
                    && (batch.len() >= SCAN_BATCH_OFFSETS || Instant::now() >= deadline)
                {
                    finished = false;
                    break;
                }
            }
        }

        self.position = position;
        self.line_no = line_no;
        self.last_timestamp = last_timestamp;
        if finished {
            self.done = true;
            self.mmap = None;
        }
        if batch.is_empty() {
            None
        } else {
            Some(batch)
        }
    }
}

impl std::fmt::Debug for TimestampIndexScanner<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimestampIndexScanner")
            .field("file", &self.log_file.name)
            .field("position", &self.position)
            .field("line_no", &self.line_no)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BATCH: Duration = Duration::from_millis(250);

    fn open_fixture(content: &[u8]) -> (tempfile::TempDir, LogFile) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.log");
        std::fs::write(&path, content).unwrap();
        let log_file = LogFile::new(&path);
        assert!(log_file.open(&AtomicBool::new(false)).unwrap());
        (dir, log_file)
    }

    fn all_breaks(log_file: &LogFile) -> Vec<u64> {
        let mut breaks: Vec<u64> = log_file
            .scan_line_breaks(BATCH)
            .unwrap()
            .flat_map(|(_, batch)| batch)
            .collect();
        breaks.sort_unstable();
        breaks
    }

    #[test]
    fn test_open_records_size_and_can_tail() {
        let (_dir, log_file) = open_fixture(b"a\nbb\nccc\n");
        assert_eq!(log_file.size(), 9);
        assert!(log_file.can_tail());
    }

    #[test]
    fn test_open_missing_file_is_not_found() {
        let log_file = LogFile::new("/no/such/file.log");
        let err = log_file.open(&AtomicBool::new(false)).unwrap_err();
        assert!(matches!(err, OpenError::NotFound { .. }));
    }

    #[test]
    fn test_scan_line_breaks_terminated_file() {
        let (_dir, log_file) = open_fixture(b"a\nbb\nccc\n");
        assert_eq!(all_breaks(&log_file), vec![1, 4, 8]);
    }

    #[test]
    fn test_scan_line_breaks_synthetic_final_break() {
        let (_dir, log_file) = open_fixture(b"xx\nyy");
        assert_eq!(all_breaks(&log_file), vec![2, 5]);
    }

    #[test]
    fn test_scan_line_breaks_empty_file() {
        let (_dir, log_file) = open_fixture(b"");
        assert!(all_breaks(&log_file).is_empty());
    }

    #[test]
    fn test_scanner_terminates_at_offset_zero() {
        let (_dir, log_file) = open_fixture(b"\n\n\n");
        let batches: Vec<_> = log_file.scan_line_breaks(BATCH).unwrap().collect();
        assert_eq!(batches.last().unwrap().0, 0);
    }

    #[test]
    fn test_get_raw_exact_range() {
        let (_dir, log_file) = open_fixture(b"a\nbb\nccc\n");
        assert_eq!(log_file.get_raw(2, 5).unwrap(), b"bb\n");
        assert!(log_file.get_raw(5, 5).unwrap().is_empty());
    }

    #[test]
    fn test_get_line_strips_newlines_and_expands_tabs() {
        let (_dir, log_file) = open_fixture(b"a\nx\tY\n");
        assert_eq!(log_file.get_line(1, 5), "x   Y");
    }

    #[test]
    fn test_get_line_lossy_decodes_invalid_utf8() {
        let (_dir, log_file) = open_fixture(b"ok \xff\xfe end\n");
        let line = log_file.get_line(0, 9);
        assert!(line.contains('\u{FFFD}'));
    }

    #[test]
    fn test_expand_tabs_column_aware() {
        assert_eq!(expand_tabs("ab\tc", 4), "ab  c");
        assert_eq!(expand_tabs("\tx", 4), "    x");
        assert_eq!(expand_tabs("none", 4), "none");
    }

    #[test]
    fn test_scan_timestamps_indexes_every_line() {
        let (_dir, log_file) = open_fixture(
            b"2024-01-01 00:00:00 one\n2024-01-01 00:00:01 two\nno timestamp here\n",
        );
        let entries: Vec<_> = log_file
            .scan_timestamps(BATCH)
            .unwrap()
            .flatten()
            .collect();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].0, 0);
        assert!(entries[1].2 > entries[0].2);
        // The line without a timestamp carries the previous value forward.
        assert_eq!(entries[2].2, entries[1].2);
        // End positions are cumulative line lengths.
        assert_eq!(entries[0].1, 24);
    }

    #[test]
    fn test_scan_timestamps_unterminated_last_line() {
        let (_dir, log_file) = open_fixture(b"2024-01-01 00:00:00 a\ntail");
        let entries: Vec<_> = log_file
            .scan_timestamps(BATCH)
            .unwrap()
            .flatten()
            .collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].1, log_file.size());
    }

    #[test]
    fn test_open_gzip_decompresses_to_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log.gz");
        let mut encoder = flate2::write::GzEncoder::new(
            std::fs::File::create(&path).unwrap(),
            flate2::Compression::default(),
        );
        encoder.write_all(b"one\ntwo\nthree\n").unwrap();
        encoder.finish().unwrap();

        let log_file = LogFile::new(&path);
        assert!(log_file.is_compressed());
        assert!(log_file.open(&AtomicBool::new(false)).unwrap());
        assert_eq!(log_file.size(), 14);
        assert!(!log_file.can_tail());
        assert_eq!(log_file.get_line(3, 7), "two");
    }

    #[test]
    fn test_open_bzip2_decompresses_to_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log.bz2");
        let mut encoder = bzip2::write::BzEncoder::new(
            std::fs::File::create(&path).unwrap(),
            bzip2::Compression::default(),
        );
        encoder.write_all(b"alpha\nbeta\n").unwrap();
        encoder.finish().unwrap();

        let log_file = LogFile::new(&path);
        assert!(log_file.open(&AtomicBool::new(false)).unwrap());
        assert_eq!(log_file.size(), 11);
        assert_eq!(log_file.get_line(0, 6), "alpha");
    }

    #[test]
    fn test_open_corrupt_gzip_is_decompress_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.gz");
        std::fs::write(&path, b"this is not gzip data").unwrap();
        let log_file = LogFile::new(&path);
        let err = log_file.open(&AtomicBool::new(false)).unwrap_err();
        assert!(matches!(err, OpenError::Decompress { .. }));
    }

    #[test]
    fn test_cancelled_decompression_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.gz");
        let mut encoder = flate2::write::GzEncoder::new(
            std::fs::File::create(&path).unwrap(),
            flate2::Compression::default(),
        );
        encoder.write_all(&vec![b'x'; DECOMPRESS_CHUNK_SIZE * 2]).unwrap();
        encoder.finish().unwrap();

        let log_file = LogFile::new(&path);
        let cancelled = AtomicBool::new(true);
        assert!(!log_file.open(&cancelled).unwrap());
        assert!(!log_file.is_open());
    }
}
