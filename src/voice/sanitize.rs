//! Assistant-text sanitization for speech output
//!
//! Markdown reads badly aloud. Before synthesis the reply is stripped of
//! fenced code blocks and inline code spans, links are reduced to their
//! label text, and emphasis markers are removed.

use std::sync::LazyLock;

use regex::Regex;

static FENCED_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[\s\S]*?```").expect("valid regex"));
static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`[^`]+`").expect("valid regex"));
static MARKDOWN_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").expect("valid regex"));
static EMPHASIS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[*_~]+").expect("valid regex"));

/// Prepare assistant text for the synthesis endpoint.
///
/// Returns the cleaned text truncated to `max_chars` on a character boundary.
/// The result may be empty, in which case synthesis should be skipped.
#[must_use]
pub fn sanitize_for_speech(text: &str, max_chars: usize) -> String {
    let cleaned = FENCED_CODE.replace_all(text, "");
    let cleaned = INLINE_CODE.replace_all(&cleaned, "");
    let cleaned = MARKDOWN_LINK.replace_all(&cleaned, "$1");
    let cleaned = EMPHASIS.replace_all(&cleaned, "");
    let cleaned = cleaned.trim();

    cleaned.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 5000;

    #[test]
    fn strips_fenced_code_blocks() {
        let text = "Here you go:\n```rust\nfn main() {}\n```\nDone.";
        assert_eq!(sanitize_for_speech(text, MAX), "Here you go:\n\nDone.");
    }

    #[test]
    fn strips_inline_code() {
        assert_eq!(sanitize_for_speech("run `cargo test` now", MAX), "run  now");
    }

    #[test]
    fn rewrites_links_to_label() {
        assert_eq!(
            sanitize_for_speech("see [the docs](https://example.com/docs) here", MAX),
            "see the docs here"
        );
    }

    #[test]
    fn removes_emphasis_markers() {
        assert_eq!(
            sanitize_for_speech("this is **really** _important_, ~kind of~", MAX),
            "this is really important, kind of"
        );
    }

    #[test]
    fn pure_markdown_input_becomes_empty() {
        assert_eq!(sanitize_for_speech("```x```", MAX), "");
        assert_eq!(sanitize_for_speech("`code`", MAX), "");
        assert_eq!(sanitize_for_speech("   ", MAX), "");
    }

    #[test]
    fn truncates_on_char_boundary() {
        let text = "é".repeat(10);
        let out = sanitize_for_speech(&text, 4);
        assert_eq!(out.chars().count(), 4);
        assert!(out.chars().all(|c| c == 'é'));
    }
}
