//! TXT 输出：书籍信息头 + 按目录顺序的卷/章正文。

use crate::book_parser::parser::ContentParser;
use crate::download::models::{Book, Chapter, ChapterContent};

/// 缺失章节在输出中的占位文本。
pub const UNAVAILABLE_PLACEHOLDER: &str = "[chapter unavailable]";

/// 渲染整本书。`chapters` 必须已按 `sequence_index` 排好序。
pub fn render_txt(book: &Book, chapters: &[(&Chapter, Option<&ChapterContent>)]) -> String {
    let mut out = String::new();
    out.push_str(&format!("小说名: {}\n", book.title));
    if let Some(alias) = book.original_title.as_deref().filter(|a| !a.trim().is_empty()) {
        out.push_str(&format!("别名: {alias}\n"));
    }
    out.push_str(&format!("作者: {}\n", book.author));
    out.push_str(&format!("内容简介: {}\n", book.description.trim()));

    let mut current_volume: Option<&str> = None;
    for (chapter, content) in chapters {
        let volume = chapter.volume_name.trim();
        if !volume.is_empty() && current_volume != Some(volume) {
            out.push_str(&format!("\n\n{volume}\n"));
            current_volume = Some(volume);
        }

        let title = ContentParser::display_title(
            &chapter.title,
            content.and_then(|c| c.title.as_deref()),
        );
        out.push_str(&format!("\n\n{title}\n\n"));
        match content {
            Some(c) => out.push_str(c.text.trim_end()),
            None => out.push_str(UNAVAILABLE_PLACEHOLDER),
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::models::sample_chapters;

    fn book() -> Book {
        Book {
            id: "1".into(),
            title: "测试书".into(),
            author: "作者甲".into(),
            description: "简介内容".into(),
            original_title: Some("旧名".into()),
            cover_url: None,
        }
    }

    #[test]
    fn header_volumes_and_placeholders() {
        let chapters = sample_chapters(3);
        let c1 = ChapterContent {
            item_id: "c1".into(),
            text: "\u{3000}\u{3000}第一章正文".into(),
            title: Some("开端".into()),
        };
        let c3 = ChapterContent {
            item_id: "c3".into(),
            text: "\u{3000}\u{3000}第三章正文".into(),
            title: None,
        };
        let rows = vec![
            (&chapters[0], Some(&c1)),
            (&chapters[1], None),
            (&chapters[2], Some(&c3)),
        ];
        let text = render_txt(&book(), &rows);

        assert!(text.starts_with("小说名: 测试书\n别名: 旧名\n作者: 作者甲\n内容简介: 简介内容\n"));
        assert_eq!(text.matches("第一卷").count(), 1);
        assert_eq!(text.matches("第二卷").count(), 1);
        assert!(text.contains("第1章 开端\n\n\u{3000}\u{3000}第一章正文"));

        let p1 = text.find("第一章正文").unwrap();
        let p2 = text.find(UNAVAILABLE_PLACEHOLDER).unwrap();
        let p3 = text.find("第三章正文").unwrap();
        assert!(p1 < p2 && p2 < p3);
        // 占位章节位于第一卷末尾，第二卷标题之前
        assert!(p2 < text.find("第二卷").unwrap());
    }

    #[test]
    fn alias_line_is_omitted_when_absent() {
        let mut b = book();
        b.original_title = None;
        let text = render_txt(&b, &[]);
        assert!(!text.contains("别名"));
    }
}
