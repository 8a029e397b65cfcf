//! Markdown-aware teaser truncation.
//!
//! Over-quota visitors get a plain-text teaser: markup stripped, whitespace
//! collapsed, hard-capped at a character budget, back-trimmed to the nearest
//! sentence terminator when one lands past half the budget.

use once_cell::sync::Lazy;
use regex::Regex;

static CODE_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```.*?```").unwrap());
static INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`[^`]+`").unwrap());
static IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").unwrap());
static LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]+)\]\([^)]*\)").unwrap());
static BOLD_STARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*([^*]+)\*\*").unwrap());
static BOLD_UNDERSCORES: Lazy<Regex> = Lazy::new(|| Regex::new(r"__([^_]+)__").unwrap());
static ITALIC_STAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*([^*]+)\*").unwrap());
static ITALIC_UNDERSCORE: Lazy<Regex> = Lazy::new(|| Regex::new(r"_([^_]+)_").unwrap());
static STRIKETHROUGH: Lazy<Regex> = Lazy::new(|| Regex::new(r"~~([^~]+)~~").unwrap());
static BLOCKQUOTE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^>\s+").unwrap());
static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#+\s+").unwrap());
static BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*[-*+]\s+").unwrap());
static ORDERED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*\d+\.\s+").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

const SENTENCE_ENDINGS: [char; 6] = ['。', '！', '？', '.', '!', '?'];
const ELLIPSIS: &str = "...";

/// Strip Markdown markup down to plain text and collapse whitespace.
pub fn plain_text(markdown: &str) -> String {
    if markdown.is_empty() {
        return String::new();
    }

    let text = CODE_BLOCK.replace_all(markdown, "");
    let text = INLINE_CODE.replace_all(&text, "");
    let text = IMAGE.replace_all(&text, "");
    let text = LINK.replace_all(&text, "$1");
    let text = BOLD_STARS.replace_all(&text, "$1");
    let text = BOLD_UNDERSCORES.replace_all(&text, "$1");
    let text = ITALIC_STAR.replace_all(&text, "$1");
    let text = ITALIC_UNDERSCORE.replace_all(&text, "$1");
    let text = STRIKETHROUGH.replace_all(&text, "$1");
    let text = BLOCKQUOTE.replace_all(&text, "");
    let text = HEADING.replace_all(&text, "");
    let text = BULLET.replace_all(&text, "");
    let text = ORDERED.replace_all(&text, "");
    let text = WHITESPACE.replace_all(&text, " ");

    text.trim().to_string()
}

/// Truncate Markdown to at most `max_chars` plain-text characters (plus the
/// trailing ellipsis). Character counts, not bytes: CJK text must not be cut
/// mid-codepoint or mid-budget.
pub fn truncate_markdown(markdown: &str, max_chars: usize) -> String {
    let text = plain_text(markdown);
    let chars: Vec<char> = text.chars().collect();

    if chars.len() <= max_chars {
        return text;
    }

    let truncated = &chars[..max_chars];

    // Back-trim to the last sentence terminator, but only when it lands past
    // half the budget; an early cut would make the teaser uselessly short.
    let cut_index = truncated
        .iter()
        .rposition(|c| SENTENCE_ENDINGS.contains(c));

    let kept: String = match cut_index {
        Some(idx) if idx + 1 > max_chars / 2 => truncated[..=idx].iter().collect(),
        _ => truncated.iter().collect(),
    };

    format!("{}{}", kept.trim(), ELLIPSIS)
}
