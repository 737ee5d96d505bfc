// taillight - util/constants.rs
//
// Single source of truth for all named constants, limits, and defaults.

// =============================================================================
// Application metadata
// =============================================================================

/// Application display name.
pub const APP_NAME: &str = "taillight";

/// Current application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Cache capacities
// =============================================================================

/// Decoded line cache: (file, start, end) -> line string.
pub const LINE_CACHE_CAPACITY: usize = 10_000;

/// Parsed text cache: (file, start, end, abbreviated) -> (line, text, timestamp).
pub const TEXT_CACHE_CAPACITY: usize = 1_000;

/// Render cache: (file, start, end, is_pointer, find) -> display row.
pub const RENDER_CACHE_CAPACITY: usize = 1_000;

/// Search suggestion index: lower-cased word prefix -> best completion.
pub const SUGGESTION_INDEX_CAPACITY: usize = 10_000;

// =============================================================================
// Scanning
// =============================================================================

/// Target interval between scan batches, so a driver can render partial results.
pub const SCAN_BATCH_DEADLINE_MS: u64 = 250;

/// Maximum offsets per scan batch; a batch is emitted when either this count
/// or the batch deadline is reached, whichever comes first.
pub const SCAN_BATCH_OFFSETS: usize = 1_000;

/// Chunk size for streaming decompression into the spill file.
pub const DECOMPRESS_CHUNK_SIZE: usize = 256 * 1024; // 256 KiB

// =============================================================================
// Line reader
// =============================================================================

/// Bound on the line-fetch request FIFO.
pub const LINE_REQUEST_QUEUE_CAPACITY: usize = 1_000;

/// How long the line reader blocks on its queue before re-checking shutdown (ms).
pub const LINE_READER_RECV_TIMEOUT_MS: u64 = 200;

// =============================================================================
// Watcher
// =============================================================================

/// Maximum bytes read from a watched file in one tick.
pub const WATCH_CHUNK_SIZE: usize = 64 * 1024; // 64 KiB

/// Polling watcher tick interval (ms).
pub const WATCH_POLL_INTERVAL_MS: u64 = 50;

/// Event-driven watcher wakeup timeout (ms). An upper bound on detection
/// latency when the notification backend misses an event.
pub const WATCH_EVENT_TIMEOUT_MS: u64 = 100;

/// Engine queue depth above which the watcher starts backing off.
pub const BACKPRESSURE_HIGH_WATER: usize = 10;

/// Engine queue depth the watcher waits for before resuming delivery.
pub const BACKPRESSURE_LOW_WATER: usize = 2;

/// Sleep interval while backing off (ms).
pub const BACKPRESSURE_SLEEP_MS: u64 = 100;

// =============================================================================
// Parsing and rendering
// =============================================================================

/// Lines longer than this many characters are truncated before format parsing.
pub const MAX_PARSE_LINE_LEN: usize = 10_000;

/// Abbreviated rendered lines are truncated to this many display cells.
pub const MAX_RENDER_CELLS: usize = 1_000;

/// Tab stops are expanded to this many columns when decoding lines.
pub const TAB_SIZE: usize = 4;

/// Minimum token length indexed for search suggestions.
pub const MIN_INDEX_TOKEN_LEN: usize = 2;

// =============================================================================
// Navigation
// =============================================================================

/// How many lines forward to probe for a timestamp when the current pointer
/// line has none.
pub const NAVIGATE_PROBE_LIMIT: usize = 10;

// =============================================================================
// Message handling
// =============================================================================

/// Maximum number of engine messages processed per drain call. Any remaining
/// messages stay in the queue and are picked up on the next call, keeping
/// render ticks stable under bursts.
pub const MAX_MESSAGES_PER_DRAIN: usize = 500;

// =============================================================================
// Logging
// =============================================================================

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";
