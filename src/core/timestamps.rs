// taillight - core/timestamps.rs
//
// Timestamp detection inside arbitrary log lines.
//
// An ordered table of (regex, parser) entries is probed in sequence. The
// scanner promotes the most recently successful entry to the head of its
// table so homogeneous files match in one probe per line after the first.
// Naive timestamps are interpreted as UTC; zone-qualified timestamps are
// converted to UTC.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use std::sync::{Mutex, OnceLock};

/// Parser half of a timestamp format entry.
type ParseFn = fn(&str) -> Option<DateTime<Utc>>;

/// A recognised timestamp shape: a locating regex plus a parser for the
/// matched text.
#[derive(Clone)]
pub struct TimestampFormat {
    regex: Regex,
    parse: ParseFn,
}

impl TimestampFormat {
    fn new(pattern: &str, parse: ParseFn) -> Self {
        Self {
            // Patterns are fixed strings validated by the unit tests below.
            regex: Regex::new(pattern).expect("timestamp format: invalid regex"),
            parse,
        }
    }
}

impl std::fmt::Debug for TimestampFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimestampFormat")
            .field("regex", &self.regex.as_str())
            .finish()
    }
}

/// The recognised formats, most specific first. ISO-8601 variants (space and
/// `T` separators, comma and dot fractions, with and without a zone), BSD
/// syslog, `DD/Mon/YYYY` date-times, the HTTP access-log form, and UNIX
/// epoch seconds / milliseconds.
fn timestamp_formats() -> &'static [TimestampFormat] {
    static FORMATS: OnceLock<Vec<TimestampFormat>> = OnceLock::new();
    FORMATS.get_or_init(|| {
        vec![
            TimestampFormat::new(
                r"\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2},\d{3}\s?(?:Z|[+-]\d{4})",
                parse_iso,
            ),
            TimestampFormat::new(r"\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2},\d{3}", parse_iso),
            TimestampFormat::new(
                r"\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\.\d{3}\s?(?:Z|[+-]\d{4})",
                parse_iso,
            ),
            TimestampFormat::new(r"\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\.\d{3}", parse_iso),
            TimestampFormat::new(
                r"\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\s?(?:Z|[+-]\d{4})",
                parse_iso,
            ),
            TimestampFormat::new(r"\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}", parse_iso),
            TimestampFormat::new(
                r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2},\d{3}\s?(?:Z|[+-]\d{4})",
                parse_iso,
            ),
            TimestampFormat::new(r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2},\d{3}", parse_iso),
            TimestampFormat::new(
                r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{3}\s?(?:Z|[+-]\d{4}Z?)",
                parse_iso,
            ),
            TimestampFormat::new(r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{3}", parse_iso),
            TimestampFormat::new(
                r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\s?(?:Z|[+-]\d{4})",
                parse_iso,
            ),
            TimestampFormat::new(r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}", parse_iso),
            TimestampFormat::new(
                r"[JFMASOND][a-z]{2}\s(?:\s|\d)\d \d{2}:\d{2}:\d{2}",
                parse_syslog,
            ),
            TimestampFormat::new(r"\d{2}/\w+/\d{4} \d{2}:\d{2}:\d{2}", parse_slash_date),
            TimestampFormat::new(
                r"\d{2}/\w+/\d{4}:\d{2}:\d{2}:\d{2} [+-]\d{4}",
                parse_http_date,
            ),
            TimestampFormat::new(r"\d{10}\.\d+", parse_epoch_seconds),
            TimestampFormat::new(r"\d{13}", parse_epoch_millis),
        ]
    })
}

// =============================================================================
// Parsers
// =============================================================================

/// Parse an ISO-8601-ish match: `T` or space separator, optional comma or
/// dot fraction, optional trailing `Z` or `±hhmm` zone (with an optional
/// space before it).
fn parse_iso(s: &str) -> Option<DateTime<Utc>> {
    let mut text = s.trim().replace('T', " ").replace(',', ".");

    // A bare trailing Z means UTC; it may also trail an explicit offset.
    if let Some(stripped) = text.strip_suffix('Z') {
        text = stripped.trim_end().to_string();
    }

    // Split off a trailing ±hhmm offset when present.
    let offset_secs = if text.len() >= 5 {
        let tail = &text[text.len() - 5..];
        let mut chars = tail.chars();
        let sign = chars.next();
        if matches!(sign, Some('+') | Some('-')) && chars.all(|c| c.is_ascii_digit()) {
            let hours: i32 = tail[1..3].parse().ok()?;
            let minutes: i32 = tail[3..5].parse().ok()?;
            let secs = (hours * 3600 + minutes * 60) * if sign == Some('-') { -1 } else { 1 };
            text.truncate(text.len() - 5);
            let trimmed = text.trim_end().len();
            text.truncate(trimmed);
            Some(secs)
        } else {
            None
        }
    } else {
        None
    };

    let naive = NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f").ok()?;
    match offset_secs {
        Some(secs) => {
            let offset = FixedOffset::east_opt(secs)?;
            offset
                .from_local_datetime(&naive)
                .single()
                .map(|dt| dt.with_timezone(&Utc))
        }
        None => Some(naive.and_utc()),
    }
}

/// BSD syslog `Mon DD HH:MM:SS` carries no year; inject the current UTC
/// year so lines land at a plausible position on the timeline.
fn parse_syslog(s: &str) -> Option<DateTime<Utc>> {
    let year = Utc::now().year();
    let with_year = format!("{year} {s}");
    NaiveDateTime::parse_from_str(&with_year, "%Y %b %e %H:%M:%S")
        .ok()
        .map(|ndt| ndt.and_utc())
}

/// `DD/Mon/YYYY HH:MM:SS` (no zone).
fn parse_slash_date(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%d/%b/%Y %H:%M:%S")
        .ok()
        .map(|ndt| ndt.and_utc())
}

/// HTTP access-log date: `DD/Mon/YYYY:HH:MM:SS ±hhmm`.
fn parse_http_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(s, "%d/%b/%Y:%H:%M:%S %z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// UNIX epoch seconds with a fraction (10 digits, dot, digits).
fn parse_epoch_seconds(s: &str) -> Option<DateTime<Utc>> {
    let (secs, frac) = s.split_once('.').unwrap_or((s, ""));
    let secs: i64 = secs.parse().ok()?;
    let nanos = if frac.is_empty() {
        0
    } else {
        let digits: String = frac.chars().take(9).collect();
        let scale = 10u32.pow(9 - digits.len() as u32);
        digits.parse::<u32>().ok()? * scale
    };
    DateTime::from_timestamp(secs, nanos)
}

/// UNIX epoch milliseconds (13 digits).
fn parse_epoch_millis(s: &str) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(s.parse().ok()?)
}

// =============================================================================
// Public API
// =============================================================================

/// Attempt to parse a timestamp anywhere in `line` against the static format
/// table, without promotion. Used where a single probe is enough (e.g. the
/// date capture of an already-classified access-log line).
pub fn parse(line: &str) -> Option<DateTime<Utc>> {
    for format in timestamp_formats() {
        if let Some(m) = format.regex.find(line) {
            if let Some(timestamp) = (format.parse)(m.as_str()) {
                return Some(timestamp);
            }
        }
    }
    None
}

/// Scan a line for something that looks like a timestamp.
///
/// Each scanner owns its own copy of the format table so that promotion in
/// one file does not perturb probing order in another. Scanning is pure
/// apart from the reorder side effect, which a mutex keeps thread-safe.
#[derive(Debug)]
pub struct TimestampScanner {
    formats: Mutex<Vec<TimestampFormat>>,
}

impl TimestampScanner {
    pub fn new() -> Self {
        Self {
            formats: Mutex::new(timestamp_formats().to_vec()),
        }
    }

    /// Scan a line, returning the first recognised timestamp or `None`.
    ///
    /// A match at position `i > 0` moves that format to the head of the
    /// table so the next line of a homogeneous file matches in one probe.
    /// Malformed matches silently move on to the next pattern.
    pub fn scan(&self, line: &str) -> Option<DateTime<Utc>> {
        let mut formats = self.formats.lock().expect("timestamp format table poisoned");
        for index in 0..formats.len() {
            let matched = match formats[index].regex.find(line) {
                Some(m) => m,
                None => continue,
            };
            let timestamp = match (formats[index].parse)(matched.as_str()) {
                Some(timestamp) => timestamp,
                None => continue,
            };
            if index > 0 {
                let format = formats.remove(index);
                formats.insert(0, format);
            }
            return Some(timestamp);
        }
        None
    }
}

impl Default for TimestampScanner {
    fn default() -> Self {
        Self::new()
    }
}
