//! Search-crawler allow-list.
//!
//! Recognized crawlers get full content for indexing and never touch the
//! view ledger. The list is fixed: major engine signatures only.

use once_cell::sync::Lazy;
use regex::Regex;

static SEARCH_BOT_ALLOWLIST: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)Googlebot",
        r"(?i)bingbot",
        r"(?i)Baiduspider",
        r"(?i)YandexBot",
        r"(?i)Sogou",
        r"(?i)DuckDuckBot",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static bot pattern compiles"))
    .collect()
});

pub fn is_search_bot(user_agent: &str) -> bool {
    if user_agent.is_empty() {
        return false;
    }
    SEARCH_BOT_ALLOWLIST.iter().any(|re| re.is_match(user_agent))
}
