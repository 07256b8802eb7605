//! Text hygiene for the remote boundary
//!
//! User text is stripped of markup characters before it leaves the process,
//! and remote output is escaped before any markup-rendering sink sees it.

/// Remove `<` and `>` from user-supplied text before it is sent remotely.
///
/// Best-effort filter: nothing is rejected, only those two characters go.
pub fn sanitize_for_remote(text: &str) -> String {
    text.chars().filter(|c| !matches!(c, '<' | '>')).collect()
}

/// Replace `& < > " '` with their HTML entities.
pub fn escape_for_display(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Unwrap a response that arrived as a fenced markdown code block.
///
/// Returns the input trimmed when it isn't fenced on both ends.
pub fn strip_markdown_fences(content: &str) -> String {
    let trimmed = content.trim();
    if !(trimmed.starts_with("```") && trimmed.ends_with("```")) || trimmed.len() < 6 {
        return trimmed.to_string();
    }
    let without_open = &trimmed[3..];
    // Skip the info string (e.g. ```python)
    let body = match without_open.find('\n') {
        Some(idx) => &without_open[idx + 1..],
        None => without_open,
    };
    match body.rfind("```") {
        Some(end) => body[..end].trim_end_matches(['\n', '\r']).to_string(),
        None => trimmed.to_string(),
    }
}

/// Untrusted text received from the remote service.
///
/// Markup sinks must go through [`DisplayText::to_markup`]; plain-text sinks
/// (a terminal) may use [`DisplayText::as_plain`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayText(String);

impl DisplayText {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn to_markup(&self) -> String {
        escape_for_display(&self.0)
    }

    pub fn as_plain(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_for_display_all_entities() {
        assert_eq!(
            escape_for_display("<a>&\"'"),
            "&lt;a&gt;&amp;&quot;&#39;"
        );
    }

    #[test]
    fn test_escape_does_not_double_escape_plain_text() {
        assert_eq!(escape_for_display("def f(): return 1"), "def f(): return 1");
    }

    #[test]
    fn test_sanitize_for_remote_strips_angle_brackets() {
        assert_eq!(sanitize_for_remote("a<b>c"), "abc");
        assert_eq!(
            sanitize_for_remote("<script>alert('x')</script>"),
            "scriptalert('x')/script"
        );
    }

    #[test]
    fn test_sanitize_keeps_unicode() {
        assert_eq!(sanitize_for_remote("排序 <列表>"), "排序 列表");
    }

    #[test]
    fn test_strip_markdown_fences() {
        let fenced = "```python\ndef add(a, b):\n    return a + b\n```";
        assert_eq!(
            strip_markdown_fences(fenced),
            "def add(a, b):\n    return a + b"
        );
        assert_eq!(strip_markdown_fences("  x = 1  "), "x = 1");
        assert_eq!(strip_markdown_fences("```"), "```");
    }

    #[test]
    fn test_display_text_markup_is_escaped() {
        let text = DisplayText::new("if a < b:");
        assert_eq!(text.as_plain(), "if a < b:");
        assert_eq!(text.to_markup(), "if a &lt; b:");
    }
}
