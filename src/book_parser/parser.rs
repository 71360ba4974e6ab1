use regex::Regex;
use std::sync::OnceLock;

/// 段落缩进（两个全角空格）。
pub const INDENT: &str = "\u{3000}\u{3000}";

struct Patterns {
    blocks: Regex,
    para: Regex,
    tags: Regex,
    escaped_angle: Regex,
}

fn patterns() -> &'static Patterns {
    static P: OnceLock<Patterns> = OnceLock::new();
    P.get_or_init(|| Patterns {
        blocks: Regex::new(r"(?is)<(header|footer|script|style)[^>]*>.*?</(header|footer|script|style)>")
            .expect("compile blocks"),
        para: Regex::new(r#"(?is)<p\s+idx="\d+"[^>]*>(.*?)</p>"#).expect("compile para"),
        tags: Regex::new(r"<[^>]+>").expect("compile tags"),
        escaped_angle: Regex::new(r"\\u003[cCeE]").expect("compile escaped angle"),
    })
}

pub struct ContentParser;

impl ContentParser {
    /// 正文清洗：去掉页眉页脚与标签，按段落拆分并统一缩进。
    ///
    /// 接口返回带 `<p idx="n">` 的 HTML 时逐段提取，否则按行拆分。结果中段落之间以
    /// 单个换行分隔，不含空行。
    pub fn clean_content(raw: &str) -> String {
        let p = patterns();
        let without_blocks = p.blocks.replace_all(raw, "");

        let paragraphs: Vec<String> = if p.para.is_match(&without_blocks) {
            p.para
                .captures_iter(&without_blocks)
                .filter_map(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .collect()
        } else {
            let normalized = without_blocks
                .replace("\r\n", "\n")
                .replace('\r', "\n")
                .replace("<br>", "\n")
                .replace("<br/>", "\n")
                .replace("<br />", "\n");
            normalized.split('\n').map(str::to_string).collect()
        };

        paragraphs
            .iter()
            .map(|para| {
                let stripped = p.tags.replace_all(para, "");
                let stripped = p.escaped_angle.replace_all(&stripped, "");
                decode_entities(&stripped)
            })
            .map(|para| para.trim_matches(|c: char| c.is_whitespace()).to_string())
            .filter(|para| !para.is_empty())
            .map(|para| format!("{INDENT}{para}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 组合章节标题。
    ///
    /// 正文接口的标题若已带“第X章”则直接使用，否则拼在目录标题后面。
    pub fn display_title(directory_title: &str, api_title: Option<&str>) -> String {
        let base = directory_title.trim();
        let Some(api) = api_title.map(str::trim).filter(|t| !t.is_empty()) else {
            return base.to_string();
        };
        if api.starts_with('第') && api.chars().take(10).any(|c| c == '章') {
            return api.to_string();
        }
        if base.is_empty() || base == api || base.ends_with(api) {
            return if base.is_empty() { api.to_string() } else { base.to_string() };
        }
        format!("{base} {api}")
    }

    pub fn escape_html(s: &str) -> String {
        s.replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
            .replace('"', "&quot;")
            .replace('\'', "&#39;")
    }

    /// 纯文本正文 → XHTML 段落。
    pub fn to_xhtml_paragraphs(text: &str) -> String {
        text.lines()
            .map(|l| l.trim_start_matches(INDENT).trim())
            .filter(|l| !l.is_empty())
            .map(|l| format!("<p>{}</p>", Self::escape_html(l)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_indexed_paragraphs_and_drops_header() {
        let raw = r#"<header><h1>第1章</h1></header><article><p idx="1">第一段</p><p idx="2"> <span>第二段</span> </p><p idx="3"></p></article><footer>x</footer>"#;
        assert_eq!(
            ContentParser::clean_content(raw),
            format!("{INDENT}第一段\n{INDENT}第二段")
        );
    }

    #[test]
    fn plain_text_lines_are_indented_and_blank_lines_removed() {
        let raw = "  第一行\r\n\r\n\r\n第二行&amp;更多\n<br/>第三行\\u003c";
        assert_eq!(
            ContentParser::clean_content(raw),
            format!("{INDENT}第一行\n{INDENT}第二行&更多\n{INDENT}第三行")
        );
    }

    #[test]
    fn title_composition() {
        assert_eq!(ContentParser::display_title("第1章", Some("第1章 开端")), "第1章 开端");
        assert_eq!(ContentParser::display_title("第1章", Some("开端")), "第1章 开端");
        assert_eq!(ContentParser::display_title("第1章 开端", Some("开端")), "第1章 开端");
        assert_eq!(ContentParser::display_title("序章", None), "序章");
        assert_eq!(ContentParser::display_title("", Some("番外")), "番外");
    }

    #[test]
    fn xhtml_paragraphs_are_escaped() {
        let text = format!("{INDENT}a<b\n\n{INDENT}c");
        assert_eq!(ContentParser::to_xhtml_paragraphs(&text), "<p>a&lt;b</p>\n<p>c</p>");
    }
}
