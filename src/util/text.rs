use std::borrow::Cow;

use chrono::{DateTime, Utc};
use html_escape::decode_html_entities;
use unicode_width::UnicodeWidthChar;

const ELLIPSIS: &str = "...";
const ELLIPSIS_WIDTH: usize = 3;

/// Attribution line shown under an item title.
///
/// ```
/// use ocsync::util::by_line;
///
/// assert_eq!(by_line("testFeed", None), "From testFeed");
/// assert_eq!(by_line("testFeed", Some("testAuthor")), "By testAuthor from testFeed");
/// ```
pub fn by_line(feed_title: &str, author: Option<&str>) -> String {
    match author.map(str::trim).filter(|a| !a.is_empty()) {
        Some(author) => format!("By {} from {}", author, feed_title),
        None => format!("From {}", feed_title),
    }
}

/// Compact age of `from` as seen at `to`: "now", "5m", "3h" or "2d".
///
/// Timestamps in the future count as "now".
pub fn time_span(from: DateTime<Utc>, to: DateTime<Utc>) -> String {
    let elapsed = to.signed_duration_since(from);

    if elapsed.num_minutes() < 1 {
        "now".to_string()
    } else if elapsed.num_hours() < 1 {
        format!("{}m", elapsed.num_minutes())
    } else if elapsed.num_days() < 1 {
        format!("{}h", elapsed.num_hours())
    } else {
        format!("{}d", elapsed.num_days())
    }
}

/// Turn an HTML fragment (typically an item title) into plain text.
///
/// Tags are dropped and HTML entities decoded, named and numeric alike.
/// Unknown entities are left as written.
///
/// ```
/// use ocsync::util::clean_string;
///
/// assert_eq!(clean_string("<b>Caf&eacute;</b> &lt;3"), "Café <3");
/// ```
pub fn clean_string(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;

    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }

    decode_html_entities(&text).trim().to_string()
}

/// Truncate `s` to at most `max_width` terminal columns, appending "..."
/// when something was cut. Widths of 3 or less get no ellipsis.
///
/// ```
/// use ocsync::util::truncate_to_width;
///
/// assert_eq!(truncate_to_width("Short", 10), "Short");
/// assert_eq!(truncate_to_width("Hello World", 8), "Hello...");
/// assert_eq!(truncate_to_width("Test", 2), "Te");
/// ```
pub fn truncate_to_width(s: &str, max_width: usize) -> Cow<'_, str> {
    let budget = if max_width > ELLIPSIS_WIDTH {
        max_width - ELLIPSIS_WIDTH
    } else {
        max_width
    };

    let mut width = 0;
    let mut cut = None;
    for (idx, c) in s.char_indices() {
        let w = UnicodeWidthChar::width(c).unwrap_or(0);
        if cut.is_none() && width + w > budget {
            cut = Some(idx);
        }
        width += w;
        if width > max_width {
            let end = cut.unwrap_or(idx);
            return if max_width > ELLIPSIS_WIDTH {
                Cow::Owned(format!("{}{}", &s[..end], ELLIPSIS))
            } else {
                Cow::Owned(s[..end].to_string())
            };
        }
    }

    Cow::Borrowed(s)
}

/// Remove terminal control characters and ANSI escape sequences from
/// server-provided text before printing it. Tab and newline survive.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let is_control = |c: char| c == '\x1b' || (c.is_control() && c != '\t' && c != '\n');

    if !s.chars().any(is_control) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            match chars.peek() {
                // CSI: parameters until a final byte in '@'..='~'
                Some('[') => {
                    chars.next();
                    for c in chars.by_ref() {
                        if ('@'..='~').contains(&c) {
                            break;
                        }
                    }
                }
                // OSC: until BEL or ESC \
                Some(']') => {
                    chars.next();
                    while let Some(c) = chars.next() {
                        if c == '\x07' {
                            break;
                        }
                        if c == '\x1b' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            }
        } else if !is_control(c) {
            out.push(c);
        }
    }

    Cow::Owned(out)
}
