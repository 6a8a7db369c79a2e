//! Helpers for log output.

/// Single-line preview of at most `max_chars` characters.
///
/// Runs of whitespace, including newlines, collapse to one space. A cut
/// preview ends in "...".
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    let mut preview = String::new();
    let mut count = 0;

    for word in s.split_whitespace() {
        for ch in (!preview.is_empty()).then_some(' ').into_iter().chain(word.chars()) {
            if count == max_chars {
                return format!("{}...", preview.trim_end());
            }
            preview.push(ch);
            count += 1;
        }
    }

    preview
}

/// Human-readable byte size ("512 B", "1.50 KB").
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 3] = ["KB", "MB", "GB"];

    if bytes < 1024 {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}
