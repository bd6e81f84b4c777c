//! Bounded previews of tool output.

/// Marker appended to any preview that was cut short.
pub const TRUNCATION_MARKER: &str = "\n…";

/// Cut `s` to at most `max_bytes` without splitting a codepoint.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }

    let mut cutoff = max_bytes;
    while cutoff > 0 && !s.is_char_boundary(cutoff) {
        cutoff -= 1;
    }
    &s[..cutoff]
}

/// Bounded preview of `s`, marked with `…` when anything was dropped.
pub fn preview(s: &str, max_bytes: usize) -> String {
    let cut = truncate_utf8(s, max_bytes);
    if cut.len() == s.len() {
        s.to_string()
    } else {
        format!("{cut}{TRUNCATION_MARKER}")
    }
}
