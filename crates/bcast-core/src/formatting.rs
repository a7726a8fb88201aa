//! Operator-facing text for Telegram HTML messages.

use crate::domain::BroadcastRecord;

const PREVIEW_CHARS: usize = 40;

/// Escape text for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// First line of `text`, cut to `max_chars` characters with an ellipsis.
pub fn preview(text: &str, max_chars: usize) -> String {
    let line = text.lines().next().unwrap_or("").trim();
    if line.chars().count() <= max_chars && !text.trim().contains('\n') {
        return line.to_string();
    }
    let cut: String = line.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}

/// One history line: `#id kind · date · sent/failed · preview`.
pub fn format_broadcast_line(record: &BroadcastRecord) -> String {
    let mut line = format!(
        "<b>#{}</b> {} · {} · ✅ {} ❌ {}",
        record.id,
        record.kind.as_str(),
        record.created_at.format("%Y-%m-%d %H:%M"),
        record.sent,
        record.failed
    );
    if let Some(text) = record.text.as_deref() {
        line.push_str(" · ");
        line.push_str(&escape_html(&preview(text, PREVIEW_CHARS)));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BroadcastId, PayloadKind};
    use chrono::{TimeZone, Utc};

    #[test]
    fn escapes_html() {
        let s = r#"<a href="x&y">"#;
        assert_eq!(escape_html(s), "&lt;a href=&quot;x&amp;y&quot;&gt;");
    }

    #[test]
    fn preview_cuts_long_and_multiline_text() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("abcdefghij klm", 10), "abcdefghij…");
        assert_eq!(preview("first\nsecond", 10), "first…");
    }

    #[test]
    fn history_line_shows_counters_and_escaped_preview() {
        let record = BroadcastRecord {
            id: BroadcastId(3),
            kind: PayloadKind::ImageText,
            text: Some("<b>Sale</b>".into()),
            media_handle: None,
            created_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            sent: 10,
            failed: 2,
        };
        assert_eq!(
            format_broadcast_line(&record),
            "<b>#3</b> image_text · 2026-01-02 03:04 · ✅ 10 ❌ 2 · &lt;b&gt;Sale&lt;/b&gt;"
        );
    }
}
