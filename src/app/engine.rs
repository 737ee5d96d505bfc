// taillight - app/engine.rs
//
// The log engine: a row-oriented API over one logical stream, either a
// single file or a timestamp-merged view of several.
//
// The engine thread exclusively owns the line-break vectors, the merge
// index, the LRU caches, and the scan state. Background workers (the scan
// worker, the line reader, the watcher) communicate results exclusively by
// posting messages; `drain` processes them and hands them on to a UI
// collaborator, with engine-internal messages stopped.

use crate::app::export;
use crate::app::line_reader::LineReader;
use crate::app::messages::{self, Envelope, FileId, Message, MessageReceiver, MessageSender};
use crate::app::watcher::WatcherHandle;
use crate::core::highlight::{self, Painter};
use crate::core::log_file::LogFile;
use crate::util::constants::{
    LINE_CACHE_CAPACITY, MAX_RENDER_CELLS, MIN_INDEX_TOKEN_LEN, NAVIGATE_PROBE_LIMIT,
    RENDER_CACHE_CAPACITY, SCAN_BATCH_DEADLINE_MS, SUGGESTION_INDEX_CAPACITY,
    TEXT_CACHE_CAPACITY,
};
use crate::util::error::ExportError;
use chrono::{DateTime, Utc};
use lru::LruCache;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Line;
use regex::{Regex, RegexBuilder};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::Duration;

/// Token boundary class used by the search suggestion index.
fn split_regex() -> &'static Regex {
    static SPLIT: OnceLock<Regex> = OnceLock::new();
    SPLIT.get_or_init(|| Regex::new(r#"[\s/\[\]()"]"#).expect("split regex"))
}

/// Time navigation units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigateUnit {
    Minutes,
    Hours,
    Days,
}

impl NavigateUnit {
    /// Parse the single-letter unit used by navigation bindings.
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'm' => Some(Self::Minutes),
            'h' => Some(Self::Hours),
            'd' => Some(Self::Days),
            _ => None,
        }
    }

    fn delta(self, steps: i64) -> chrono::Duration {
        match self {
            Self::Minutes => chrono::Duration::minutes(steps),
            Self::Hours => chrono::Duration::hours(steps),
            Self::Days => chrono::Duration::hours(steps * 24),
        }
    }
}

/// One merge-index row: (timestamp, file line number, file), sorted
/// ascending by (timestamp, line_no).
#[derive(Debug, Clone, Copy)]
struct MergeLine {
    timestamp: f64,
    line_no: usize,
    file: FileId,
}

type LineKey = (FileId, u64, u64);
type TextKey = (FileId, u64, u64, bool);
type RenderKey = (FileId, u64, u64, bool, String);
type CachedText = (String, Line<'static>, Option<DateTime<Utc>>);

// =============================================================================
// LogEngine
// =============================================================================

pub struct LogEngine {
    log_files: Vec<Arc<LogFile>>,
    line_breaks: Vec<Vec<u64>>,
    merge_lines: Option<Vec<MergeLine>>,

    line_cache: LruCache<LineKey, String>,
    text_cache: LruCache<TextKey, CachedText>,
    render_cache: LruCache<RenderKey, Line<'static>>,
    search_index: LruCache<String, String>,

    line_reader: LineReader,
    sender: MessageSender,
    receiver: MessageReceiver,
    watcher: Option<WatcherHandle>,
    scan_worker: Option<JoinHandle<()>>,
    scan_cancel: Arc<AtomicBool>,

    scanned_size: u64,
    scan_start: u64,
    line_count: usize,
    pointer_line: Option<usize>,
    tail: bool,
    can_tail: bool,
    show_find: bool,
    find: String,
    case_sensitive: bool,
    regex: bool,
    find_regex: Option<Regex>,
    find_invalid: bool,
    regex_warned: bool,
    merge_enabled: bool,
    scan_complete: bool,
    error: Option<String>,
}

impl LogEngine {
    /// Create an engine over the given paths. More than one path enables
    /// merge mode. Files are not opened until `open` runs the scan worker.
    pub fn new<P: AsRef<Path>>(paths: &[P], watcher: Option<WatcherHandle>) -> Self {
        let log_files: Vec<Arc<LogFile>> = paths
            .iter()
            .map(|p| Arc::new(LogFile::new(p.as_ref())))
            .collect();
        let merge_enabled = log_files.len() > 1;
        let (sender, receiver) = messages::channel();
        let line_reader = LineReader::start(sender.clone());

        Self {
            line_breaks: vec![Vec::new(); log_files.len()],
            merge_lines: merge_enabled.then(Vec::new),
            line_cache: LruCache::new(NonZeroUsize::new(LINE_CACHE_CAPACITY).unwrap()),
            text_cache: LruCache::new(NonZeroUsize::new(TEXT_CACHE_CAPACITY).unwrap()),
            render_cache: LruCache::new(NonZeroUsize::new(RENDER_CACHE_CAPACITY).unwrap()),
            search_index: LruCache::new(NonZeroUsize::new(SUGGESTION_INDEX_CAPACITY).unwrap()),
            line_reader,
            sender,
            receiver,
            watcher,
            scan_worker: None,
            scan_cancel: Arc::new(AtomicBool::new(false)),
            scanned_size: 0,
            scan_start: 0,
            line_count: 0,
            pointer_line: None,
            tail: false,
            can_tail: !merge_enabled,
            show_find: false,
            find: String::new(),
            case_sensitive: false,
            regex: false,
            find_regex: None,
            find_invalid: false,
            regex_warned: false,
            merge_enabled,
            scan_complete: false,
            error: None,
            log_files,
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn log_files(&self) -> &[Arc<LogFile>] {
        &self.log_files
    }

    pub fn merge_enabled(&self) -> bool {
        self.merge_enabled
    }

    /// Number of addressable logical lines.
    pub fn line_count(&self) -> usize {
        self.line_count
    }

    pub fn pointer_line(&self) -> Option<usize> {
        self.pointer_line
    }

    pub fn is_tail(&self) -> bool {
        self.tail
    }

    pub fn can_tail(&self) -> bool {
        self.can_tail
    }

    pub fn scan_complete(&self) -> bool {
        self.scan_complete
    }

    /// Terminal error, set when the engine's only file cannot be opened.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// A sender handle onto this engine's bus, for workers and tests.
    pub fn sender(&self) -> MessageSender {
        self.sender.clone()
    }

    // -------------------------------------------------------------------------
    // Scan protocol
    // -------------------------------------------------------------------------

    /// Start the initial scan worker: the reverse line-break scan for a
    /// single file, or the per-file timestamp scan in merge mode.
    pub fn open(&mut self) {
        if self.scan_worker.is_some() {
            return;
        }
        let cancel = Arc::clone(&self.scan_cancel);
        let sender = self.sender.clone();
        let handle = if self.merge_enabled {
            let files: Vec<(Arc<LogFile>, FileId)> = self
                .log_files
                .iter()
                .enumerate()
                .map(|(i, f)| (Arc::clone(f), FileId(i)))
                .collect();
            std::thread::Builder::new()
                .name("scan-merge".into())
                .spawn(move || run_merge_scan(files, sender, cancel))
        } else {
            let file = Arc::clone(&self.log_files[0]);
            std::thread::Builder::new()
                .name("scan".into())
                .spawn(move || run_single_scan(file, FileId(0), sender, cancel))
        };
        self.scan_worker = Some(handle.expect("failed to spawn scan worker"));
    }

    /// User-requested cancellation: the worker still posts ScanComplete with
    /// whatever was accumulated, and the degraded state is announced.
    pub fn cancel_scan(&mut self) {
        if self.scan_complete {
            return;
        }
        self.scan_cancel.store(true, Ordering::Relaxed);
        tracing::warn!("Scan cancelled by user");
        self.sender.send(Message::ScanProgress {
            message: "Stopped scanning. Some lines may not be available.".to_string(),
            complete: 1.0,
            scan_start: None,
        });
    }

    /// Escape semantics: a running scan is cancelled (with the degraded
    /// warning); otherwise the collaborator is asked to dismiss its overlay.
    pub fn dismiss(&mut self) {
        if !self.scan_complete {
            self.cancel_scan();
        } else {
            self.sender.send(Message::DismissOverlay);
        }
    }

    /// Shutdown: silent cancel, then stop and join all workers.
    pub fn close(&mut self) {
        self.scan_cancel.store(true, Ordering::Relaxed);
        self.line_reader.stop();
        if let Some(handle) = self.scan_worker.take() {
            let _ = handle.join();
        }
    }

    // -------------------------------------------------------------------------
    // Message processing
    // -------------------------------------------------------------------------

    /// Receive and process up to `max` messages, waiting at most `timeout`
    /// for the first. Returns every envelope so a collaborator can observe
    /// the ones the engine did not stop.
    pub fn drain(&mut self, max: usize, timeout: Duration) -> Vec<Envelope> {
        let mut envelopes = Vec::new();
        if let Some(envelope) = self.receiver.recv_timeout(timeout) {
            self.process_message(&envelope);
            envelopes.push(envelope);
        }
        while envelopes.len() < max {
            match self.receiver.try_recv() {
                Some(envelope) => {
                    self.process_message(&envelope);
                    envelopes.push(envelope);
                }
                None => break,
            }
        }
        envelopes
    }

    /// Apply one message to engine state. Engine-internal messages are
    /// stopped so downstream observers skip them.
    pub fn process_message(&mut self, envelope: &Envelope) {
        match &envelope.message {
            Message::NewBreaks {
                file,
                breaks,
                scanned_size,
                tail,
            } => {
                envelope.stop();
                self.on_new_breaks(*file, breaks, *scanned_size, *tail);
            }
            Message::MergeBatch { file, entries } => {
                envelope.stop();
                if let Some(merge_lines) = &mut self.merge_lines {
                    merge_lines.extend(entries.iter().map(|&(line_no, _, timestamp)| MergeLine {
                        timestamp,
                        line_no,
                        file: *file,
                    }));
                }
                self.line_breaks[file.0].extend(entries.iter().map(|&(_, end, _)| end));
            }
            Message::ScanProgress { scan_start, .. } => {
                if let Some(scan_start) = scan_start {
                    self.scan_start = *scan_start;
                }
            }
            Message::ScanComplete { size, scan_start } => {
                self.on_scan_complete(*size, *scan_start);
            }
            Message::LineRead {
                file,
                start,
                end,
                line,
                ..
            } => {
                self.render_cache
                    .pop(&(*file, *start, *end, true, self.find.clone()));
                self.render_cache
                    .pop(&(*file, *start, *end, false, self.find.clone()));
                self.line_cache.put((*file, *start, *end), line.clone());
                self.text_cache.pop(&(*file, *start, *end, false));
                self.text_cache.pop(&(*file, *start, *end, true));
            }
            Message::FileError { error, .. } => {
                if !self.merge_enabled {
                    self.error = Some(error.clone());
                }
            }
            Message::SizeChanged { size } => {
                self.scanned_size = self.scanned_size.max(*size);
            }
            _ => {}
        }
    }

    fn on_new_breaks(&mut self, file: FileId, breaks: &[u64], scanned_size: u64, tail: bool) {
        let first = self.line_breaks[file.0].is_empty();
        self.scanned_size = self.scanned_size.max(scanned_size);

        if !self.tail && tail {
            // Queued breaks before this batch, minus the frozen line count,
            // plus one. The count trails the incoming batch and catches up
            // on the next; only the latest coalesced value is observed.
            let pending = (self.line_breaks[file.0].len() + 1).saturating_sub(self.line_count);
            self.sender.send(Message::PendingLines { count: pending });
        }

        self.line_breaks[file.0].extend_from_slice(breaks);
        if !tail {
            // Reverse-scan batches arrive out of order.
            self.line_breaks[file.0].sort_unstable();
        }

        let pointer_distance = self
            .pointer_line
            .map(|pointer| self.line_count.saturating_sub(pointer));

        if !tail || self.tail || first {
            self.update_line_count();
        }

        if self.tail {
            if let Some(distance) = pointer_distance {
                self.set_pointer(Some(self.line_count.saturating_sub(distance)));
            }
            if tail {
                // Warm the caches for the freshly appended lines so the
                // pinned view renders without a blocking read.
                for offset in 1..=breaks.len().min(self.line_count) {
                    self.prefetch(self.line_count - offset);
                }
            }
        }
    }

    fn on_scan_complete(&mut self, size: u64, scan_start: u64) {
        self.scanned_size = self.scanned_size.max(size);
        self.scan_start = scan_start;
        if let Some(merge_lines) = &mut self.merge_lines {
            merge_lines.sort_by(|a, b| {
                a.timestamp
                    .total_cmp(&b.timestamp)
                    .then(a.line_no.cmp(&b.line_no))
            });
        }
        self.update_line_count();
        self.scan_complete = true;

        if !self.merge_enabled {
            self.can_tail = self.log_files[0].can_tail();
            if self.can_tail {
                if let Some(watcher) = &self.watcher {
                    watcher.add(Arc::clone(&self.log_files[0]), FileId(0), self.sender.clone());
                }
                self.set_tail(true);
            }
        }
        tracing::debug!(
            lines = self.line_count,
            size,
            merge = self.merge_enabled,
            "Scan complete"
        );
    }

    fn update_line_count(&mut self) {
        self.line_count = match &self.merge_lines {
            Some(merge_lines) => merge_lines.len(),
            None => self.line_breaks[0].len().max(1),
        };
    }

    // -------------------------------------------------------------------------
    // Spans and line access
    // -------------------------------------------------------------------------

    /// Map a logical line index to a concrete byte span in a concrete file.
    /// Indices are clamped to the addressable range.
    pub fn index_to_span(&self, index: usize) -> (FileId, u64, u64) {
        let (file, index) = match &self.merge_lines {
            Some(merge_lines) => match merge_lines.get(index.min(merge_lines.len().saturating_sub(1))) {
                Some(entry) => (entry.file, entry.line_no),
                None => (FileId(0), index),
            },
            None => (FileId(0), index),
        };
        let breaks = &self.line_breaks[file.0];
        if breaks.is_empty() {
            return (file, self.scan_start, self.scan_start);
        }
        let index = index.min(breaks.len() - 1);
        if index == 0 {
            (file, self.scan_start, breaks[0])
        } else {
            (file, breaks[index - 1], breaks[index])
        }
    }

    /// Enqueue a background fetch for a line unless it is already decoded.
    pub fn prefetch(&mut self, index: usize) {
        let (file, start, end) = self.index_to_span(index);
        if self.line_cache.contains(&(file, start, end)) {
            return;
        }
        self.line_reader
            .request_line(&self.log_files[file.0], file, index, start, end);
    }

    fn cached_line(&mut self, file: FileId, index: usize, start: u64, end: u64) -> Option<String> {
        if let Some(line) = self.line_cache.get(&(file, start, end)) {
            return Some(line.clone());
        }
        self.line_reader
            .request_line(&self.log_files[file.0], file, index, start, end);
        None
    }

    fn cached_line_blocking(&mut self, file: FileId, start: u64, end: u64) -> String {
        if let Some(line) = self.line_cache.get(&(file, start, end)) {
            return line.clone();
        }
        let line = self.log_files[file.0].get_line(start, end);
        self.line_cache.put((file, start, end), line.clone());
        line
    }

    /// Read a logical line synchronously.
    pub fn get_line_blocking(&mut self, index: usize) -> String {
        let (file, start, end) = self.index_to_span(index);
        self.cached_line_blocking(file, start, end)
    }

    /// The primary render entry point: canonical line, styled text, and
    /// parsed timestamp. With `block` unset, a cache miss returns an empty
    /// result and enqueues a background fetch.
    pub fn get_text(
        &mut self,
        index: usize,
        abbreviate: bool,
        block: bool,
    ) -> (String, Line<'static>, Option<DateTime<Utc>>) {
        let (file, start, end) = self.index_to_span(index);
        let key: TextKey = (file, start, end, abbreviate);
        if let Some((line, text, timestamp)) = self.text_cache.get(&key) {
            return (line.clone(), text.clone(), *timestamp);
        }

        let raw_line = if block {
            self.cached_line_blocking(file, start, end)
        } else {
            match self.cached_line(file, index, start, end) {
                Some(line) => line,
                None => return (String::new(), Line::default(), None),
            }
        };

        let parsed = self.log_files[file.0].parse(&raw_line);
        let mut text = parsed.text;
        if abbreviate && text.width() > MAX_RENDER_CELLS {
            text = highlight::truncate(text, MAX_RENDER_CELLS);
        }
        self.text_cache
            .put(key, (parsed.line.clone(), text.clone(), parsed.timestamp));
        (parsed.line, text, parsed.timestamp)
    }

    /// Timestamp of a line, bypassing the caches.
    pub fn get_timestamp(&self, index: usize) -> Option<DateTime<Utc>> {
        let (file, start, end) = self.index_to_span(index);
        let log_file = &self.log_files[file.0];
        let line = log_file.get_line(start, end);
        log_file.timestamp_scanner.scan(&line)
    }

    /// Clear the derived caches (style change, find-config change).
    pub fn clear_caches(&mut self) {
        self.line_cache.clear();
        self.text_cache.clear();
        self.render_cache.clear();
    }

    // -------------------------------------------------------------------------
    // Pointer, goto, tail
    // -------------------------------------------------------------------------

    fn validate_pointer(&self, pointer: Option<usize>) -> Option<usize> {
        let pointer = pointer?;
        if self.line_count == 0 {
            return None;
        }
        Some(pointer.min(self.line_count - 1))
    }

    /// Move the pointer, clamped into range; posts PointerMoved on change.
    pub fn set_pointer(&mut self, pointer: Option<usize>) {
        let pointer = self.validate_pointer(pointer);
        if pointer != self.pointer_line {
            self.pointer_line = pointer;
            self.sender.send(Message::PointerMoved {
                pointer_line: pointer,
            });
        }
    }

    /// Position the pointer on a 1-based line number.
    pub fn goto(&mut self, line_no_1based: usize) {
        self.set_pointer(Some(line_no_1based.saturating_sub(1)));
    }

    /// Toggle tail mode. While on, the engine auto-extends the line count
    /// as new breaks arrive and a pinned view follows the end; the pointer,
    /// if set, keeps its distance from the end across extensions.
    pub fn set_tail(&mut self, tail: bool) {
        if self.tail == tail {
            return;
        }
        self.tail = tail;
        if tail {
            self.update_line_count();
            self.sender.send(Message::SizeChanged {
                size: self.scanned_size,
            });
        }
        self.sender.send(Message::TailFile { tail });
    }

    // -------------------------------------------------------------------------
    // Find
    // -------------------------------------------------------------------------

    /// Configure the find criterion. The pattern is compiled once here, not
    /// in the render loop; in plain-substring mode the escaped text is
    /// compiled so match highlighting shares one code path.
    pub fn set_find(&mut self, text: &str, case_sensitive: bool, regex: bool) {
        self.find = text.to_string();
        self.case_sensitive = case_sensitive;
        self.regex = regex;
        self.find_invalid = false;
        self.regex_warned = false;
        self.show_find = !text.is_empty();

        self.find_regex = if text.is_empty() {
            None
        } else {
            let pattern = if regex {
                text.to_string()
            } else {
                regex::escape(text)
            };
            match RegexBuilder::new(&pattern)
                .case_insensitive(!case_sensitive)
                .build()
            {
                Ok(compiled) => Some(compiled),
                Err(e) => {
                    if regex {
                        tracing::warn!(pattern = text, error = %e, "Invalid find regex");
                        self.find_invalid = true;
                    }
                    None
                }
            }
        };

        if text.is_empty() {
            self.set_pointer(None);
        }
        // The find text is part of the render key, but the case/regex flags
        // are not; drop derived state wholesale.
        self.clear_caches();
    }

    /// Whether the current find text is a regex that failed to compile.
    /// A find dialog uses this to flag the input; matching degrades to
    /// match-everything meanwhile.
    pub fn find_is_invalid(&self) -> bool {
        self.find_invalid
    }

    pub fn set_show_find(&mut self, show_find: bool) {
        if self.show_find == show_find {
            return;
        }
        self.show_find = show_find;
        self.clear_caches();
        if !show_find {
            self.set_pointer(None);
        }
    }

    /// Whether a line satisfies the current find criterion.
    ///
    /// An invalid user regex is conservatively treated as matching
    /// everything (warned once) so the user never loses their place.
    pub fn check_match(&mut self, line: &str) -> bool {
        if line.is_empty() || self.find.is_empty() {
            return true;
        }
        if self.regex {
            match &self.find_regex {
                Some(compiled) => compiled.is_match(line),
                None => {
                    if !self.regex_warned {
                        self.regex_warned = true;
                        tracing::warn!(pattern = %self.find, "Find regex is invalid; matching everything");
                    }
                    true
                }
            }
        } else if self.case_sensitive {
            line.contains(&self.find)
        } else {
            line.to_lowercase().contains(&self.find.to_lowercase())
        }
    }

    /// Move the pointer to the next (+1) or previous (-1) line matching the
    /// find criterion, starting one past the current pointer. Returns false
    /// with the pointer unchanged when nothing matches (the collaborator
    /// rings its bell).
    pub fn advance_search(&mut self, direction: isize) -> bool {
        if self.line_count == 0 {
            return false;
        }
        let start: isize = match self.pointer_line {
            Some(pointer) => pointer as isize + direction,
            None => {
                if direction >= 0 {
                    0
                } else {
                    self.line_count as isize - 1
                }
            }
        };

        let mut line_no = start;
        while line_no >= 0 && (line_no as usize) < self.line_count {
            let (file, span_start, span_end) = self.index_to_span(line_no as usize);
            let raw = self.log_files[file.0]
                .get_raw(span_start, span_end)
                .unwrap_or_default();
            let line = String::from_utf8_lossy(&raw);
            if self.check_match(line.trim_matches(['\n', '\r'])) {
                self.set_pointer(Some(line_no as usize));
                return true;
            }
            line_no += direction;
        }
        false
    }

    // -------------------------------------------------------------------------
    // Time navigation
    // -------------------------------------------------------------------------

    /// Move the pointer by a signed time delta: walk in the sign direction
    /// until the first line whose timestamp crosses `t0 + delta`. If the
    /// origin line has no timestamp, probe up to `NAVIGATE_PROBE_LIMIT`
    /// lines forward for one. Terminates at the file ends without error.
    /// Returns false when no origin timestamp could be found.
    pub fn navigate(&mut self, steps: i64, unit: NavigateUnit) -> bool {
        if self.line_count == 0 || steps == 0 {
            return false;
        }
        let mut line_no = self.pointer_line.unwrap_or(0);

        let mut origin = None;
        for probe in 0..=NAVIGATE_PROBE_LIMIT {
            if line_no + probe >= self.line_count {
                break;
            }
            if let Some(timestamp) = self.get_timestamp(line_no + probe) {
                line_no += probe;
                origin = Some(timestamp);
                break;
            }
        }
        let Some(origin) = origin else {
            return false;
        };

        let target = origin + unit.delta(steps);
        if steps > 0 {
            line_no += 1;
            while line_no < self.line_count {
                match self.get_timestamp(line_no) {
                    Some(timestamp) if timestamp >= target => break,
                    _ => line_no += 1,
                }
            }
        } else {
            line_no = line_no.saturating_sub(1);
            while line_no > 0 {
                match self.get_timestamp(line_no) {
                    Some(timestamp) if timestamp <= target => break,
                    _ => line_no -= 1,
                }
            }
        }

        self.set_pointer(Some(line_no));
        true
    }

    // -------------------------------------------------------------------------
    // Rendering and suggestions
    // -------------------------------------------------------------------------

    /// Produce the display row for a line, through the render cache. Fills
    /// the suggestion index and applies pointer emphasis and find
    /// highlighting.
    pub fn render_line(&mut self, index: usize, is_pointer: bool) -> Line<'static> {
        let (file, start, end) = self.index_to_span(index);
        let key: RenderKey = (file, start, end, is_pointer, self.find.clone());
        if let Some(cached) = self.render_cache.get(&key) {
            return cached.clone();
        }

        let (line, mut text, _timestamp) = self.get_text(index, true, true);
        self.index_tokens(&line);

        if is_pointer {
            let mut painter = Painter::from_line(&text);
            painter.paint_all(Style::default().bg(Color::Blue).add_modifier(Modifier::BOLD));
            text = painter.into_line();
        }

        if self.show_find && !self.find.is_empty() {
            text = self.highlight_find(text);
        }

        self.render_cache.put(key, text.clone());
        text
    }

    /// Overlay find-match highlighting; lines without a match are dimmed,
    /// as is everything while the user's regex is invalid.
    fn highlight_find(&self, text: Line<'static>) -> Line<'static> {
        let filter_style = Style::default().bg(Color::Yellow).fg(Color::Black);
        let plain = highlight::plain(&text);

        let Some(compiled) = &self.find_regex else {
            // Empty pattern cannot reach here; this is the invalid case.
            return highlight::dim(text);
        };
        let ranges: Vec<(usize, usize)> = compiled
            .find_iter(&plain)
            .map(|m| (m.start(), m.end()))
            .collect();
        if ranges.is_empty() {
            return highlight::dim(text);
        }
        let mut painter = Painter::from_line(&text);
        for (start, end) in ranges {
            painter.paint(start, end, filter_style);
        }
        painter.into_line()
    }

    /// Feed a rendered line's tokens into the suggestion index: for every
    /// token of at least `MIN_INDEX_TOKEN_LEN` characters, every proper
    /// prefix maps to the longest canonical token seen so far.
    fn index_tokens(&mut self, line: &str) {
        for word in split_regex().split(line) {
            let word_chars = word.chars().count();
            if word_chars < MIN_INDEX_TOKEN_LEN {
                continue;
            }
            for (offset, _) in word.char_indices().skip(1) {
                let prefix = word[..offset].to_lowercase();
                let better = match self.search_index.get(&prefix) {
                    Some(existing) => existing.chars().count() < word_chars,
                    None => true,
                };
                if better {
                    self.search_index.put(prefix, word.to_string());
                }
            }
        }
    }

    /// Complete the trailing token of a find-box entry from the suggestion
    /// index.
    pub fn suggest(&mut self, value: &str) -> Option<String> {
        let word = split_regex().split(value).last().unwrap_or("");
        if word.is_empty() {
            return None;
        }
        let hit = self.search_index.get(&word.to_lowercase())?.clone();
        Some(format!("{}{hit}", &value[..value.len() - word.len()]))
    }

    // -------------------------------------------------------------------------
    // Export
    // -------------------------------------------------------------------------

    /// Write the currently indexed stream to `path`, one line per logical
    /// row. Returns the number of lines written.
    pub fn save_merged(&mut self, path: &Path) -> Result<usize, ExportError> {
        export::save_merged(self, path)
    }

    /// Paths of the engine's inputs, for notifications.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.log_files.iter().map(|f| f.path().to_path_buf()).collect()
    }
}

impl Drop for LogEngine {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for LogEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogEngine")
            .field("files", &self.log_files.len())
            .field("line_count", &self.line_count)
            .field("merge", &self.merge_enabled)
            .field("tail", &self.tail)
            .finish()
    }
}

// =============================================================================
// Scan workers
// =============================================================================

fn batch_deadline() -> Duration {
    Duration::from_millis(SCAN_BATCH_DEADLINE_MS)
}

/// Single-file initial scan: open, then drive the reverse line-break
/// scanner, reporting progress after every batch. A cancelled scan still
/// posts ScanComplete with whatever was accumulated.
fn run_single_scan(
    file: Arc<LogFile>,
    id: FileId,
    sender: MessageSender,
    cancel: Arc<AtomicBool>,
) {
    match file.open(&cancel) {
        Ok(true) => {}
        Ok(false) => {
            sender.send(Message::ScanComplete {
                size: 0,
                scan_start: 0,
            });
            return;
        }
        Err(e) => {
            tracing::error!(file = %file.path().display(), error = %e, "Open failed");
            sender.send(Message::FileError {
                file: Some(id),
                error: e.to_string(),
            });
            sender.send(Message::ScanComplete {
                size: 0,
                scan_start: 0,
            });
            return;
        }
    }

    let size = file.size();
    if size == 0 {
        sender.send(Message::ScanComplete {
            size: 0,
            scan_start: 0,
        });
        return;
    }

    let scanner = match file.scan_line_breaks(batch_deadline()) {
        Ok(scanner) => scanner,
        Err(e) => {
            sender.send(Message::FileError {
                file: Some(id),
                error: format!("{}: {e}", file.name()),
            });
            sender.send(Message::ScanComplete {
                size,
                scan_start: 0,
            });
            return;
        }
    };

    let mut position = size;
    let mut line_count: usize = 0;
    for (reached, breaks) in scanner {
        position = reached;
        line_count += breaks.len();
        sender.send(Message::ScanProgress {
            message: format!(
                "Scanning {} ({}K lines)",
                file.name(),
                line_count / 1_000
            ),
            complete: 1.0 - (position as f64 / size as f64),
            scan_start: Some(position),
        });
        if !breaks.is_empty() {
            sender.send(Message::NewBreaks {
                file: id,
                breaks,
                scanned_size: size,
                tail: false,
            });
        }
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        throttle(&sender);
    }
    sender.send(Message::ScanComplete {
        size,
        scan_start: position,
    });
}

/// Merge-mode initial scan: open every file, then index each one forward,
/// streaming (timestamp, line_no, end) batches to the engine. Progress is
/// reported against the sum of file sizes.
fn run_merge_scan(
    files: Vec<(Arc<LogFile>, FileId)>,
    sender: MessageSender,
    cancel: Arc<AtomicBool>,
) {
    for (file, id) in &files {
        match file.open(&cancel) {
            Ok(true) => {}
            Ok(false) => {
                sender.send(Message::ScanComplete {
                    size: 0,
                    scan_start: 0,
                });
                return;
            }
            Err(e) => {
                tracing::error!(file = %file.path().display(), error = %e, "Open failed");
                sender.send(Message::FileError {
                    file: Some(*id),
                    error: e.to_string(),
                });
            }
        }
    }

    let total_size: u64 = files.iter().map(|(file, _)| file.size()).sum();
    if total_size == 0 {
        sender.send(Message::ScanComplete {
            size: 0,
            scan_start: 0,
        });
        return;
    }

    let mut position: u64 = 0;
    for (file, id) in &files {
        if !file.is_open() {
            continue;
        }
        let scanner = match file.scan_timestamps(batch_deadline()) {
            Ok(scanner) => scanner,
            Err(e) => {
                sender.send(Message::FileError {
                    file: Some(*id),
                    error: format!("{}: {e}", file.name()),
                });
                continue;
            }
        };
        for batch in scanner {
            let reached = batch.last().map(|&(_, end, _)| end).unwrap_or(0);
            sender.send(Message::MergeBatch {
                file: *id,
                entries: batch,
            });
            sender.send(Message::ScanProgress {
                message: format!("Merging {}", file.name()),
                complete: (position + reached) as f64 / total_size as f64,
                scan_start: None,
            });
            if cancel.load(Ordering::Relaxed) {
                sender.send(Message::ScanComplete {
                    size: total_size,
                    scan_start: 0,
                });
                return;
            }
            throttle(&sender);
        }
        position += file.size();
    }

    sender.send(Message::ScanComplete {
        size: total_size,
        scan_start: 0,
    });
}

/// Scanner-side backpressure: briefly sleep while the engine queue is deep
/// so a driver is never flooded.
fn throttle(sender: &MessageSender) {
    use crate::util::constants::{
        BACKPRESSURE_HIGH_WATER, BACKPRESSURE_LOW_WATER, BACKPRESSURE_SLEEP_MS,
    };
    if sender.len() > BACKPRESSURE_HIGH_WATER {
        let mut waited = 0;
        while sender.len() > BACKPRESSURE_LOW_WATER && waited < 20 {
            std::thread::sleep(Duration::from_millis(BACKPRESSURE_SLEEP_MS));
            waited += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::constants::MAX_MESSAGES_PER_DRAIN;
    use std::io::Write as _;

    fn write_fixture(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    /// Open an engine and drain until the scan completes.
    fn scanned_engine(paths: &[PathBuf]) -> LogEngine {
        let mut engine = LogEngine::new(paths, None);
        engine.open();
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while !engine.scan_complete() && std::time::Instant::now() < deadline {
            engine.drain(MAX_MESSAGES_PER_DRAIN, Duration::from_millis(50));
        }
        assert!(engine.scan_complete(), "scan did not complete in time");
        engine
    }

    #[test]
    fn test_plain_scan_three_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "s1.log", "a\nbb\nccc\n");
        let mut engine = scanned_engine(&[path]);

        assert_eq!(engine.line_count(), 3);
        assert_eq!(engine.index_to_span(0), (FileId(0), 0, 1));
        assert_eq!(engine.get_line_blocking(0), "a");
        assert_eq!(engine.get_line_blocking(1), "bb");
        assert_eq!(engine.get_line_blocking(2), "ccc");
    }

    #[test]
    fn test_no_trailing_newline_addressable() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "s2.log", "xx\nyy");
        let mut engine = scanned_engine(&[path]);

        assert_eq!(engine.line_count(), 2);
        assert_eq!(engine.get_line_blocking(1), "yy");
    }

    /// Index completeness: the lines joined with newlines reproduce the
    /// file contents.
    #[test]
    fn test_index_completeness_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let content = "alpha\nbeta\ngamma\ndelta\n";
        let path = write_fixture(&dir, "complete.log", content);
        let mut engine = scanned_engine(&[path]);

        let mut rebuilt = String::new();
        for index in 0..engine.line_count() {
            rebuilt.push_str(&engine.get_line_blocking(index));
            rebuilt.push('\n');
        }
        assert_eq!(rebuilt, content);
    }

    #[test]
    fn test_break_vector_strictly_increasing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "mono.log", &"line\n".repeat(100));
        let engine = scanned_engine(&[path]);
        let breaks = &engine.line_breaks[0];
        assert_eq!(breaks.len(), 100);
        assert!(breaks.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_missing_file_sets_error_state() {
        let mut engine = LogEngine::new(&[PathBuf::from("/no/such/file.log")], None);
        engine.open();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while engine.error().is_none() && std::time::Instant::now() < deadline {
            engine.drain(MAX_MESSAGES_PER_DRAIN, Duration::from_millis(50));
        }
        assert!(engine.error().unwrap().contains("not found"));
    }

    #[test]
    fn test_tail_new_breaks_extend_and_preserve_pointer_distance() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "s3.log", "a\n");
        let mut engine = scanned_engine(&[path]);
        assert_eq!(engine.line_count(), 1);
        assert!(engine.is_tail(), "single plain file auto-tails after scan");

        engine.set_pointer(Some(0));
        // The watcher reports the file grew to "a\nbb\n".
        let envelope = Envelope::new(Message::NewBreaks {
            file: FileId(0),
            breaks: vec![4],
            scanned_size: 5,
            tail: true,
        });
        engine.process_message(&envelope);
        assert!(envelope.is_stopped());

        assert_eq!(engine.line_count(), 2);
        // Distance from end (1) is preserved across the extension.
        assert_eq!(engine.pointer_line(), Some(1));
    }

    #[test]
    fn test_pending_lines_posted_when_not_tailing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "pend.log", "a\n");
        let mut engine = scanned_engine(&[path]);
        engine.set_tail(false);
        // Absorb the TailFile message.
        engine.drain(MAX_MESSAGES_PER_DRAIN, Duration::from_millis(10));

        engine.process_message(&Envelope::new(Message::NewBreaks {
            file: FileId(0),
            breaks: vec![4, 7],
            scanned_size: 8,
            tail: true,
        }));
        // Line count is frozen while not tailing.
        assert_eq!(engine.line_count(), 1);

        // The count is computed from the breaks queued before this batch
        // (one, from the initial scan) minus the frozen line count, plus
        // one; it trails the incoming batch.
        let pending = engine
            .drain(MAX_MESSAGES_PER_DRAIN, Duration::from_millis(100))
            .into_iter()
            .find_map(|envelope| match envelope.message {
                Message::PendingLines { count } => Some(count),
                _ => None,
            });
        assert_eq!(pending, Some(1));

        // A follow-up batch reports the accrued backlog.
        engine.process_message(&Envelope::new(Message::NewBreaks {
            file: FileId(0),
            breaks: vec![10],
            scanned_size: 11,
            tail: true,
        }));
        let pending = engine
            .drain(MAX_MESSAGES_PER_DRAIN, Duration::from_millis(100))
            .into_iter()
            .find_map(|envelope| match envelope.message {
                Message::PendingLines { count } => Some(count),
                _ => None,
            });
        assert_eq!(pending, Some(3));

        // Re-enabling tail catches the count up.
        engine.set_tail(true);
        assert_eq!(engine.line_count(), 4);
    }

    #[test]
    fn test_merge_ordering_across_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_fixture(&dir, "a.log", "2024-01-01T00:00:00 A1\n");
        let b = write_fixture(&dir, "b.log", "2024-01-01T00:00:01 B1\n");
        // Pass B first: ordering must come from timestamps, not argv order.
        let mut engine = scanned_engine(&[b, a]);

        assert!(engine.merge_enabled());
        assert_eq!(engine.line_count(), 2);
        assert_eq!(engine.get_line_blocking(0), "2024-01-01T00:00:00 A1");
        assert_eq!(engine.get_line_blocking(1), "2024-01-01T00:00:01 B1");
        assert!(!engine.is_tail(), "merge mode never tails");
    }

    #[test]
    fn test_merge_timestamps_non_decreasing() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_fixture(
            &dir,
            "a.log",
            "2024-01-01T00:00:00 a0\n2024-01-01T00:00:02 a1\n",
        );
        let b = write_fixture(
            &dir,
            "b.log",
            "2024-01-01T00:00:01 b0\n2024-01-01T00:00:03 b1\n",
        );
        let engine = scanned_engine(&[a, b]);
        let merge = engine.merge_lines.as_ref().unwrap();
        assert_eq!(merge.len(), 4);
        assert!(merge
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp));
    }

    #[test]
    fn test_navigate_by_minute() {
        let dir = tempfile::tempdir().unwrap();
        let mut content = String::new();
        for second in 0..180 {
            content.push_str(&format!(
                "2024-01-01T00:{:02}:{:02} tick\n",
                second / 60,
                second % 60
            ));
        }
        let path = write_fixture(&dir, "s5.log", &content);
        let mut engine = scanned_engine(&[path]);
        assert_eq!(engine.line_count(), 180);

        engine.set_pointer(Some(0));
        assert!(engine.navigate(1, NavigateUnit::Minutes));
        assert_eq!(engine.pointer_line(), Some(60));

        assert!(engine.navigate(-1, NavigateUnit::Minutes));
        assert_eq!(engine.pointer_line(), Some(0));
    }

    #[test]
    fn test_navigate_terminates_at_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(
            &dir,
            "short.log",
            "2024-01-01T00:00:00 a\n2024-01-01T00:00:01 b\n",
        );
        let mut engine = scanned_engine(&[path]);
        engine.set_pointer(Some(0));
        assert!(engine.navigate(1, NavigateUnit::Days));
        assert_eq!(engine.pointer_line(), Some(engine.line_count() - 1));
    }

    #[test]
    fn test_regex_search_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "s6.log", "all fine\nhuge Errror here\nmore\n");
        let mut engine = scanned_engine(&[path]);

        engine.set_find("er+or", false, true);
        assert!(engine.advance_search(1));
        assert_eq!(engine.pointer_line(), Some(1));
    }

    /// Search returns the smallest j > i that matches; a miss leaves the
    /// pointer unchanged.
    #[test]
    fn test_advance_search_semantics() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "find.log", "x\nneedle\nx\nneedle\n");
        let mut engine = scanned_engine(&[path]);

        engine.set_find("needle", true, false);
        assert!(engine.advance_search(1));
        assert_eq!(engine.pointer_line(), Some(1));
        assert!(engine.advance_search(1));
        assert_eq!(engine.pointer_line(), Some(3));
        assert!(!engine.advance_search(1));
        assert_eq!(engine.pointer_line(), Some(3));
        assert!(engine.advance_search(-1));
        assert_eq!(engine.pointer_line(), Some(1));
    }

    #[test]
    fn test_invalid_regex_matches_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "bad.log", "first\nsecond\n");
        let mut engine = scanned_engine(&[path]);

        engine.set_find("er+or[", false, true);
        assert!(engine.find_is_invalid());
        assert!(engine.check_match("anything"));
        assert!(engine.advance_search(1));
        assert_eq!(engine.pointer_line(), Some(0));
    }

    /// Cache coherency: an installed LineRead is served from cache and not
    /// re-requested.
    #[test]
    fn test_line_read_installs_into_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "cache.log", "aaa\nbbb\n");
        let mut engine = scanned_engine(&[path]);

        let (file, start, end) = engine.index_to_span(1);
        engine.process_message(&Envelope::new(Message::LineRead {
            file,
            index: 1,
            start,
            end,
            line: "bbb".to_string(),
        }));

        let (line, _text, _ts) = engine.get_text(1, false, false);
        assert_eq!(line, "bbb");
        assert!(!engine
            .line_reader
            .is_pending(&(file, 1, start, end)));
    }

    #[test]
    fn test_get_text_non_blocking_miss_requests_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "miss.log", "aaa\nbbb\n");
        let mut engine = scanned_engine(&[path]);

        let (line, text, timestamp) = engine.get_text(0, false, false);
        assert_eq!(line, "");
        assert_eq!(text.spans.len(), 0);
        assert!(timestamp.is_none());

        // The background read eventually lands and is installed by drain.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            engine.drain(MAX_MESSAGES_PER_DRAIN, Duration::from_millis(50));
            let (line, _, _) = engine.get_text(0, false, false);
            if line == "aaa" {
                break;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "line never arrived via the line reader"
            );
        }
    }

    #[test]
    fn test_goto_is_one_based_and_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "goto.log", "a\nb\nc\n");
        let mut engine = scanned_engine(&[path]);

        engine.goto(2);
        assert_eq!(engine.pointer_line(), Some(1));
        engine.goto(999);
        assert_eq!(engine.pointer_line(), Some(2));
        engine.goto(0);
        assert_eq!(engine.pointer_line(), Some(0));
    }

    #[test]
    fn test_suggestion_index_completes_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "sugg.log", "connection established\n");
        let mut engine = scanned_engine(&[path]);

        engine.render_line(0, false);
        assert_eq!(engine.suggest("conn"), Some("connection".to_string()));
        assert_eq!(engine.suggest("find estab"), Some("find established".to_string()));
        assert_eq!(engine.suggest("zzz"), None);
    }

    #[test]
    fn test_render_line_dims_non_matching_when_finding() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "dim.log", "needle here\nnothing\n");
        let mut engine = scanned_engine(&[path]);

        engine.set_find("needle", false, false);
        let hit = engine.render_line(0, false);
        assert!(hit
            .spans
            .iter()
            .any(|s| s.style.bg == Some(Color::Yellow)));
        let miss = engine.render_line(1, false);
        assert!(miss
            .spans
            .iter()
            .all(|s| s.style.add_modifier.contains(Modifier::DIM)));
    }

    #[test]
    fn test_abbreviated_text_truncated_with_ellipsis() {
        let dir = tempfile::tempdir().unwrap();
        let long_line = format!("{}\n", "z".repeat(3_000));
        let path = write_fixture(&dir, "long.log", &long_line);
        let mut engine = scanned_engine(&[path]);

        let (_, text, _) = engine.get_text(0, true, true);
        assert!(text.width() <= MAX_RENDER_CELLS);
        assert!(highlight::plain(&text).ends_with('…'));
    }

    #[test]
    fn test_save_merged_writes_stream(){
        let dir = tempfile::tempdir().unwrap();
        let a = write_fixture(&dir, "a.log", "2024-01-01T00:00:00 A\n");
        let b = write_fixture(&dir, "b.log", "2024-01-01T00:00:01 B\n");
        let mut engine = scanned_engine(&[a, b]);

        let out = dir.path().join("merged.log");
        let written = engine.save_merged(&out).unwrap();
        assert_eq!(written, 2);
        let content = std::fs::read_to_string(&out).unwrap();
        assert_eq!(
            content,
            "2024-01-01T00:00:00 A\n2024-01-01T00:00:01 B\n"
        );
    }

    #[test]
    fn test_gzip_input_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log.gz");
        let mut encoder = flate2::write::GzEncoder::new(
            std::fs::File::create(&path).unwrap(),
            flate2::Compression::default(),
        );
        encoder.write_all(b"one\ntwo\n").unwrap();
        encoder.finish().unwrap();

        let mut engine = scanned_engine(&[path]);
        assert_eq!(engine.line_count(), 2);
        assert_eq!(engine.get_line_blocking(1), "two");
        assert!(!engine.can_tail(), "decompressed views never tail");
        assert!(!engine.is_tail());
    }
}
