//! Text helpers shared by feed normalization, post formatting and status reports.

pub const ELLIPSIS: &str = "...";

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Number of Unicode scalar values.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Length as Telegram counts it for messages and captions: UTF-16 code units.
pub fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

/// Keep at most `max_chars` characters, appending `...` when something was cut.
///
/// The ellipsis is *not* counted against `max_chars`.
pub fn bound_length(s: &str, max_chars: usize) -> String {
    if char_len(s) <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push_str(ELLIPSIS);
    out
}

/// Shorten `s` so that the result, ellipsis included, is at most `max_units`
/// UTF-16 code units long. Strings that already fit are returned unchanged.
///
/// The cut never splits a surrogate pair, so the result is one unit short of
/// `max_units` when a non-BMP character straddles the boundary.
pub fn truncate_to_fit(s: &str, max_units: usize) -> String {
    if utf16_len(s) <= max_units {
        return s.to_string();
    }
    let keep = max_units.saturating_sub(ELLIPSIS.len());
    let mut out = String::new();
    let mut used = 0usize;
    for c in s.chars() {
        if used + c.len_utf16() > keep {
            break;
        }
        used += c.len_utf16();
        out.push(c);
    }
    out.push_str(&ELLIPSIS[..max_units.min(ELLIPSIS.len())]);
    out
}
