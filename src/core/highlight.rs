// taillight - core/highlight.rs
//
// Styled-text construction for rendered log lines.
//
// Styling is modelled with ratatui's `Line`/`Span` types used purely as
// data; no terminal backend is linked. The `Painter` guarantees that the
// plain text of every produced line equals the input string: styles are
// painted over a byte-indexed overlay and the text itself is never edited.

use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use regex::Regex;
use std::sync::OnceLock;

// =============================================================================
// Painter
// =============================================================================

/// Paints styles over an immutable text and emits a `Line` of styled spans.
///
/// Later paints patch earlier ones (colour and modifiers merge the way
/// `Style::patch` merges), so highlight layers compose: default highlighting
/// first, then format-specific emphasis, then find-match highlighting.
#[derive(Debug, Clone)]
pub struct Painter {
    text: String,
    /// One style per byte of `text`. Bytes inside a multi-byte character
    /// always share the style of the character's first byte.
    styles: Vec<Style>,
}

impl Painter {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let styles = vec![Style::default(); text.len()];
        Self { text, styles }
    }

    /// Rebuild a painter from an existing line so further styling can be
    /// layered on top (e.g. find highlighting over a cached render).
    pub fn from_line(line: &Line<'_>) -> Self {
        let mut text = String::new();
        let mut styles = Vec::new();
        for span in &line.spans {
            text.push_str(&span.content);
            styles.resize(text.len(), span.style);
        }
        Self { text, styles }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Patch `style` over the byte range `start..end` (clamped to the text).
    pub fn paint(&mut self, start: usize, end: usize, style: Style) {
        let end = end.min(self.styles.len());
        for slot in &mut self.styles[start.min(end)..end] {
            *slot = slot.patch(style);
        }
    }

    /// Patch `style` over the whole text.
    pub fn paint_all(&mut self, style: Style) {
        self.paint(0, self.text.len(), style);
    }

    /// Paint every occurrence of `word` (case-sensitive). Returns whether
    /// at least one occurrence was painted.
    pub fn paint_word(&mut self, word: &str, style: Style) -> bool {
        if word.is_empty() {
            return false;
        }
        let ranges: Vec<(usize, usize)> = self
            .text
            .match_indices(word)
            .map(|(start, _)| (start, start + word.len()))
            .collect();
        let found = !ranges.is_empty();
        for (start, end) in ranges {
            self.paint(start, end, style);
        }
        found
    }

    /// Collapse the overlay into a `Line` of maximal same-style spans.
    pub fn into_line(self) -> Line<'static> {
        let mut spans: Vec<Span<'static>> = Vec::new();
        let mut run = String::new();
        let mut run_style = Style::default();
        for (offset, ch) in self.text.char_indices() {
            let style = self.styles[offset];
            if run.is_empty() || style == run_style {
                if run.is_empty() {
                    run_style = style;
                }
                run.push(ch);
            } else {
                spans.push(Span::styled(std::mem::take(&mut run), run_style));
                run_style = style;
                run.push(ch);
            }
        }
        if !run.is_empty() {
            spans.push(Span::styled(run, run_style));
        }
        Line::from(spans)
    }
}

// =============================================================================
// Line helpers
// =============================================================================

/// The text layer of a styled line.
pub fn plain(line: &Line<'_>) -> String {
    line.spans.iter().map(|s| s.content.as_ref()).collect()
}

/// Dim an entire line (used for non-matching lines while a find is active).
pub fn dim(line: Line<'static>) -> Line<'static> {
    let mut painter = Painter::from_line(&line);
    painter.paint_all(Style::default().add_modifier(Modifier::DIM));
    painter.into_line()
}

/// Truncate a styled line to at most `max_cells` display cells, appending an
/// ellipsis marker. Lines already within the budget are returned unchanged.
pub fn truncate(line: Line<'static>, max_cells: usize) -> Line<'static> {
    if line.width() <= max_cells {
        return line;
    }
    let budget = max_cells.saturating_sub(1);
    let mut cells = 0usize;
    let mut spans: Vec<Span<'static>> = Vec::new();
    for span in line.spans {
        let width = span.width();
        if cells + width <= budget {
            cells += width;
            spans.push(span);
            continue;
        }
        // Cut inside this span. Wide characters make this approximate by a
        // cell or two, which the ellipsis absorbs.
        let take = budget - cells;
        let content: String = span.content.chars().take(take).collect();
        if !content.is_empty() {
            spans.push(Span::styled(content, span.style));
        }
        break;
    }
    spans.push(Span::raw("…"));
    Line::from(spans)
}

// =============================================================================
// Default log highlighter
// =============================================================================

/// Highlights the recognisable fragments of an arbitrary log line: quoted
/// strings, URLs, UUIDs, IP addresses, filesystem paths, word constants,
/// and numbers.
#[derive(Debug, Default)]
pub struct LogHighlighter;

impl LogHighlighter {
    pub fn highlight(&self, text: &str) -> Line<'static> {
        let mut painter = Painter::new(text);
        self.apply(&mut painter);
        painter.into_line()
    }

    /// Apply default highlighting to an existing painter.
    pub fn apply(&self, painter: &mut Painter) {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| {
            Regex::new(concat!(
                r#"(?P<quoted>"[^"]*"|'[^']*')"#,
                r"|(?P<url>https?://[^\s'\x22)\]]+)",
                r"|(?P<uuid>[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})",
                r"|(?P<ip>\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b)",
                r"|(?P<path>(?:/[\w.@~-]+){2,}/?)",
                r"|(?P<word>\b(?:true|false|True|False|None|none|null|NULL)\b)",
                r"|(?P<number>\b\d[\d_]*(?:\.\d+)?\b)",
            ))
            .expect("log highlighter: invalid regex")
        });

        let groups: &[(&str, Style)] = &[
            ("quoted", Style::default().fg(Color::Green)),
            (
                "url",
                Style::default()
                    .fg(Color::Blue)
                    .add_modifier(Modifier::UNDERLINED),
            ),
            ("uuid", Style::default().fg(Color::Magenta)),
            ("ip", Style::default().fg(Color::Cyan)),
            ("path", Style::default().fg(Color::Magenta)),
            (
                "word",
                Style::default()
                    .fg(Color::Magenta)
                    .add_modifier(Modifier::ITALIC),
            ),
            ("number", Style::default().fg(Color::Cyan)),
        ];

        let text = painter.text().to_owned();
        for captures in pattern.captures_iter(&text) {
            for (name, style) in groups {
                if let Some(m) = captures.name(name) {
                    painter.paint(m.start(), m.end(), *style);
                }
            }
        }
    }
}

// =============================================================================
// JSON highlighter
// =============================================================================

/// Highlights JSON log lines: object keys, strings, numbers, constants.
#[derive(Debug, Default)]
pub struct JsonHighlighter;

impl JsonHighlighter {
    pub fn highlight(&self, text: &str) -> Line<'static> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| {
            Regex::new(concat!(
                r#"(?P<key>"(?:[^"\\]|\\.)*"\s*:)"#,
                r#"|(?P<string>"(?:[^"\\]|\\.)*")"#,
                r"|(?P<constant>\b(?:true|false|null)\b)",
                r"|(?P<number>-?\b\d+(?:\.\d+)?(?:[eE][+-]?\d+)?\b)",
            ))
            .expect("json highlighter: invalid regex")
        });

        let mut painter = Painter::new(text);
        for captures in pattern.captures_iter(text) {
            if let Some(m) = captures.name("key") {
                // Paint only the quoted key, not the trailing colon.
                let quoted_end = m.as_str().rfind('"').map(|i| m.start() + i + 1);
                if let Some(end) = quoted_end {
                    painter.paint(
                        m.start(),
                        end,
                        Style::default().fg(Color::Blue).add_modifier(Modifier::BOLD),
                    );
                }
            } else if let Some(m) = captures.name("string") {
                painter.paint(m.start(), m.end(), Style::default().fg(Color::Green));
            } else if let Some(m) = captures.name("constant") {
                painter.paint(
                    m.start(),
                    m.end(),
                    Style::default()
                        .fg(Color::Magenta)
                        .add_modifier(Modifier::ITALIC),
                );
            } else if let Some(m) = captures.name("number") {
                painter.paint(m.start(), m.end(), Style::default().fg(Color::Cyan));
            }
        }
        painter.into_line()
    }
}
