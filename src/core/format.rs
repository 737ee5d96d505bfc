// taillight - core/format.rs
//
// Log line format classification and highlighted rendering.
//
// A line is classified as JSON, Common Log Format, Combined Log Format, or
// Default (unclassified). Like the timestamp scanner, the parser rotates the
// most recently successful format to the head of its list so homogeneous
// files classify in one probe per line.

use crate::core::highlight::{JsonHighlighter, LogHighlighter};
use crate::core::timestamps;
use crate::util::constants::MAX_PARSE_LINE_LEN;
use chrono::{DateTime, Utc};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Line;
use regex::Regex;
use std::sync::{Mutex, OnceLock};

/// The outcome of parsing one line: an optional timestamp, the canonical
/// line text, and the styled rendering whose text layer equals the
/// canonical line.
#[derive(Debug, Clone)]
pub struct ParsedLine {
    pub timestamp: Option<DateTime<Utc>>,
    pub line: String,
    pub text: Line<'static>,
}

/// HTTP request method words emphasised in access-log lines.
const HIGHLIGHT_WORDS: &[&str] = &[
    "GET", "POST", "PUT", "HEAD", "DELETE", "OPTIONS", "PATCH",
];

/// Style for an HTTP status code, by class: 1xx cyan, 2xx green, 3xx
/// yellow, 4xx red, 5xx reverse-red; anything else magenta.
fn status_style(status: &str) -> Style {
    match status.chars().next() {
        Some('1') => Style::default().fg(Color::Cyan),
        Some('2') => Style::default().fg(Color::Green),
        Some('3') => Style::default().fg(Color::Yellow),
        Some('4') => Style::default().fg(Color::Red),
        Some('5') => Style::default()
            .fg(Color::Red)
            .add_modifier(Modifier::REVERSED),
        _ => Style::default().fg(Color::Magenta),
    }
}

// =============================================================================
// Format implementations
// =============================================================================

/// One recognisable log format. Returns `None` when the line is not in this
/// format; classification then falls through to the next format.
trait LogFormat: Send {
    fn parse(&self, line: &str) -> Option<ParsedLine>;
}

/// Shared body of the two access-log formats: match the line against an
/// anchored named-group regex, pull the timestamp out of the date group,
/// and emphasise the method and status.
fn parse_access_log(regex: &Regex, line: &str) -> Option<ParsedLine> {
    let captures = regex.captures(line)?;

    let date = captures.name("date").map(|m| m.as_str()).unwrap_or("");
    let timestamp = timestamps::parse(date.trim_matches(['[', ']']));

    let mut painter = crate::core::highlight::Painter::new(line);
    LogHighlighter.apply(&mut painter);

    if let Some(status) = captures.name("status") {
        painter.paint_word(&format!(" {} ", status.as_str()), status_style(status.as_str()));
    }
    for word in HIGHLIGHT_WORDS {
        painter.paint_word(
            word,
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        );
    }

    Some(ParsedLine {
        timestamp,
        line: line.to_string(),
        text: painter.into_line(),
    })
}

/// Common Log Format (NCSA): ip, ident, user, [date], request, status,
/// length, referrer.
struct CommonLogFormat;

impl LogFormat for CommonLogFormat {
    fn parse(&self, line: &str) -> Option<ParsedLine> {
        static REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = REGEX.get_or_init(|| {
            Regex::new(concat!(
                r"^(?P<ip>.*?) (?P<remote_log_name>.*?) (?P<userid>.*?) ",
                r"\[(?P<date>[^\]]*)\] ",
                r#""(?P<request_method>.*?) (?P<path>.*?)(?P<request_version> HTTP/.*)?" "#,
                r#"(?P<status>.*?) (?P<length>.*?) "(?P<referrer>.*?)"$"#,
            ))
            .expect("common log format: invalid regex")
        });
        parse_access_log(regex, line)
    }
}

/// Combined Log Format: Common plus user agent, session, generation time
/// and virtual host fields.
struct CombinedLogFormat;

impl LogFormat for CombinedLogFormat {
    fn parse(&self, line: &str) -> Option<ParsedLine> {
        static REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = REGEX.get_or_init(|| {
            Regex::new(concat!(
                r"^(?P<ip>.*?) (?P<remote_log_name>.*?) (?P<userid>.*?) ",
                r"\[(?P<date>[^ \]]*) (?P<timezone>[^\]]*)\] ",
                r#""(?P<request_method>.*?) (?P<path>.*?)(?P<request_version> HTTP/.*)?" "#,
                r#"(?P<status>.*?) (?P<length>.*?) "(?P<referrer>.*?)" "(?P<user_agent>.*?)" "#,
                r"(?P<session_id>.*?) (?P<generation_time_micro>.*?) (?P<virtual_host>.*)$",
            ))
            .expect("combined log format: invalid regex")
        });
        parse_access_log(regex, line)
    }
}

/// One-object-per-line JSON (JSONL). The line must parse as a JSON value.
struct JsonLogFormat;

impl LogFormat for JsonLogFormat {
    fn parse(&self, line: &str) -> Option<ParsedLine> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        serde_json::from_str::<serde_json::Value>(trimmed).ok()?;
        let timestamp = timestamps::parse(line);
        Some(ParsedLine {
            timestamp,
            line: line.to_string(),
            text: JsonHighlighter.highlight(line),
        })
    }
}

/// Fallback for unclassifiable lines; never fails.
struct DefaultLogFormat;

impl LogFormat for DefaultLogFormat {
    fn parse(&self, line: &str) -> Option<ParsedLine> {
        Some(ParsedLine {
            timestamp: None,
            line: line.to_string(),
            text: LogHighlighter.highlight(line),
        })
    }
}

// =============================================================================
// FormatParser
// =============================================================================

/// Classifies lines against the known formats, rotating the most recently
/// successful format to the head of the probe order.
pub struct FormatParser {
    formats: Mutex<Vec<Box<dyn LogFormat>>>,
}

impl FormatParser {
    pub fn new() -> Self {
        Self {
            formats: Mutex::new(vec![
                Box::new(JsonLogFormat),
                Box::new(CommonLogFormat),
                Box::new(CombinedLogFormat),
            ]),
        }
    }

    /// Parse a line. Never fails: unclassifiable lines come back with no
    /// timestamp and default highlighting. Lines longer than
    /// `MAX_PARSE_LINE_LEN` characters are truncated before parsing.
    pub fn parse(&self, line: &str) -> ParsedLine {
        let line = truncate_chars(line, MAX_PARSE_LINE_LEN);

        if !line.trim().is_empty() {
            let mut formats = self.formats.lock().expect("format table poisoned");
            for index in 0..formats.len() {
                if let Some(result) = formats[index].parse(line) {
                    if index > 0 {
                        formats.rotate_left(index);
                    }
                    return result;
                }
            }
        }

        DefaultLogFormat
            .parse(line)
            .expect("default format never fails")
    }
}

impl Default for FormatParser {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FormatParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatParser").finish()
    }
}

/// Truncate to at most `max` characters on a character boundary.
fn truncate_chars(line: &str, max: usize) -> &str {
    match line.char_indices().nth(max) {
        Some((offset, _)) => &line[..offset],
        None => line,
    }
}
