use html2text::render::text_renderer::TrivialDecorator;
use std::borrow::Cow;

/// Ellipsis appended to truncated text
const ELLIPSIS: &str = "...";

/// Maximum length (in characters) of a normalized summary
pub const MAX_SUMMARY_CHARS: usize = 200;

/// Collapses every run of whitespace into a single space and trims both ends.
///
/// Returns `Cow::Borrowed` when the input is already normalized.
pub fn collapse_whitespace(s: &str) -> Cow<'_, str> {
    let trimmed = s.trim();
    let mut prev_space = false;
    let needs_work = trimmed.len() != s.len()
        || trimmed.chars().any(|c| {
            let bad = c.is_whitespace() && (prev_space || c != ' ');
            prev_space = c.is_whitespace();
            bad
        });

    if !needs_work {
        return Cow::Borrowed(s);
    }

    Cow::Owned(trimmed.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Truncates to at most `max_chars` characters, appending "..." when cut.
///
/// Counts `char`s rather than bytes so multi-byte text is never split
/// mid-codepoint.
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    match s.char_indices().nth(max_chars) {
        None => Cow::Borrowed(s),
        Some((byte_idx, _)) => Cow::Owned(format!("{}{}", &s[..byte_idx], ELLIPSIS)),
    }
}

/// Wrap width handed to html2text. Wide enough that only block elements
/// and `<br>` start a new line.
const RENDER_WIDTH: usize = 10_000;

/// Renders an HTML fragment as plain text, one line per block.
///
/// Entities are decoded and link, emphasis and image markup is dropped.
pub fn html_to_text(html: &str) -> String {
    html2text::from_read_with_decorator(html.as_bytes(), RENDER_WIDTH, TrivialDecorator::new())
}

/// Turns a raw feed description into a short plain-text teaser.
///
/// The HTML is rendered to text, the first two non-empty lines are joined, and the
/// result is capped at [`MAX_SUMMARY_CHARS`]. Returns `None` when nothing
/// useful remains (aggregators such as Hacker News put a bare "Comments"
/// link in every description).
pub fn summarize(raw: &str) -> Option<String> {
    let text = html_to_text(raw);
    let joined = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(2)
        .collect::<Vec<_>>()
        .join(" ");
    let collapsed = collapse_whitespace(&joined);

    if collapsed.is_empty() || collapsed == "Comments" {
        return None;
    }

    Some(truncate_chars(&collapsed, MAX_SUMMARY_CHARS).into_owned())
}
