use std::borrow::Cow;

/// Ellipsis appended to truncated excerpts
const ELLIPSIS: &str = "...";

/// Strip ASCII control characters from feed-supplied text.
///
/// Preserves tab, newline and carriage return. Returns `Cow::Borrowed` when
/// there is nothing to strip, which is the common case.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let needs_strip = s
        .bytes()
        .any(|b| b == 0x7f || (b < 0x20 && b != b'\t' && b != b'\n' && b != b'\r'));

    if !needs_strip {
        return Cow::Borrowed(s);
    }

    Cow::Owned(
        s.chars()
            .filter(|&c| !c.is_ascii_control() || matches!(c, '\t' | '\n' | '\r'))
            .collect(),
    )
}

/// Line width handed to the renderer, wide enough that summaries never wrap
const RENDER_WIDTH: usize = 10_000;

/// Builds a plain-text excerpt of at most `max_chars` characters.
///
/// The HTML is rendered to text by `html2text` (which also decodes
/// entities), then runs of whitespace collapse to a single space. When
/// truncation is needed the cut happens on a word boundary if one exists and
/// "..." is appended.
///
/// # Examples
///
/// ```
/// use feedsync::util::excerpt;
///
/// assert_eq!(excerpt("<p>Hello <b>world</b></p>", 100), "Hello world");
/// assert_eq!(excerpt("one two three", 9), "one...");
/// ```
pub fn excerpt(html: &str, max_chars: usize) -> String {
    let rendered = match html2text::config::plain_no_decorate()
        .string_from_read(html.as_bytes(), RENDER_WIDTH)
    {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!(error = %e, "Could not render summary HTML, using raw text");
            html.to_string()
        }
    };

    let plain = rendered.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&plain, max_chars)
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    if max_chars <= ELLIPSIS.len() {
        return s.chars().take(max_chars).collect();
    }

    let budget = max_chars - ELLIPSIS.len();
    let byte_end = s
        .char_indices()
        .nth(budget)
        .map(|(idx, _)| idx)
        .unwrap_or(s.len());
    let head = &s[..byte_end];
    // Prefer a word boundary, unless that would throw away most of the text
    let cut = match head.rfind(' ') {
        Some(space) if space >= byte_end / 2 => &head[..space],
        _ => head,
    };
    format!("{}{}", cut.trim_end(), ELLIPSIS)
}
