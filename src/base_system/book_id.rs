//! 书籍 ID 解析：支持纯数字 ID、网页链接以及带说明文字的分享链接。

use regex::Regex;
use std::sync::OnceLock;

fn patterns() -> &'static [Regex; 3] {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"(?i)[?&](?:book_id|bookId)=(\d+)").expect("compile book_id query"),
            Regex::new(r"/page/(\d+)").expect("compile page path"),
            Regex::new(r"/(?:book|detail)/(\d+)").expect("compile book path"),
        ]
    })
}

fn re_url() -> &'static Regex {
    static RE_URL: OnceLock<Regex> = OnceLock::new();
    RE_URL.get_or_init(|| Regex::new(r"https?://\S+").expect("compile url"))
}

/// 从用户输入中提取书籍 ID；无法识别时返回 `None`。
pub fn parse_book_id(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Some(trimmed.to_string());
    }

    let target = re_url()
        .find(trimmed)
        .map(|m| m.as_str())
        .unwrap_or(trimmed);

    patterns()
        .iter()
        .find_map(|re| re.captures(target))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
