//! EPUB 生成器。

use std::io::Cursor;

use anyhow::{Result, anyhow};
use epub_builder::{EpubBuilder, EpubContent, EpubVersion, ReferenceType, ZipLibrary};

use super::image_utils::CoverImage;
use super::parser::ContentParser;
use crate::download::models::Book;

/// 用于从 book_id 确定性生成 UUID v5 的命名空间。
/// 同一本书的 dc:identifier 永远不变，阅读器可以据此识别同一本书。
const EPUB_UUID_NAMESPACE: uuid::Uuid = uuid::Uuid::from_bytes([
    0x6b, 0xa7, 0xb8, 0x10, 0x9d, 0xad, 0x11, 0xd1, 0x80, 0xb4, 0x00, 0xc0, 0x4f, 0xd4, 0x30, 0xc8,
]);

pub fn book_uuid(book_id: &str) -> uuid::Uuid {
    uuid::Uuid::new_v5(&EPUB_UUID_NAMESPACE, book_id.as_bytes())
}

struct Page {
    file_name: String,
    title: String,
    html: String,
    level: i32,
    reftype: ReferenceType,
}

pub struct EpubGenerator {
    book: EpubBuilder<ZipLibrary>,
    pages: Vec<Page>,
    style: String,
    chapter_counter: usize,
    volume_counter: usize,
}

impl EpubGenerator {
    pub fn new(meta: &Book, first_line_indent_em: f32) -> Result<Self> {
        let zip = ZipLibrary::new().map_err(|e| anyhow!(e.to_string()))?;
        let mut book = EpubBuilder::new(zip).map_err(|e| anyhow!(e.to_string()))?;

        book.epub_version(EpubVersion::V30);
        book.set_uuid(book_uuid(&meta.id));
        book.metadata("title", meta.title.as_str()).ok();
        book.metadata("lang", "zh-CN").ok();
        // 目录标题显示书名而不是默认的 "Table Of Contents"
        book.metadata("toc_name", meta.title.as_str()).ok();

        let author = meta.author.trim();
        if !author.is_empty() {
            book.metadata("author", author).ok();
        }
        let description = meta.description.trim();
        if !description.is_empty() {
            book.metadata("description", description).ok();
        }
        book.metadata("generator", "fanqie-novel-fetch").ok();

        let indent_em = first_line_indent_em.max(0.0);
        let indent_rule = if indent_em > 0.0 {
            format!("text-indent:{indent_em}em;")
        } else {
            "text-indent:0;".to_string()
        };
        let css = format!(
            "body {{ font-family: serif; color:#000 !important; line-height:1.5; }}
             p {{ color:#000 !important; {indent_rule} margin:0 0 .8em 0; line-height:1.5; }}
             p.no-indent {{ text-indent:0; }}
             p.unavailable {{ color:#999 !important; text-indent:0; text-align:center; }}
             h1.volume {{ text-align:center; margin-top:30%; }}
             .book-info p {{ text-indent:0; }}"
        );

        Ok(Self {
            book,
            pages: Vec::new(),
            style: css,
            chapter_counter: 0,
            volume_counter: 0,
        })
    }

    pub fn set_cover(&mut self, cover: &CoverImage) -> Result<()> {
        let path = format!("images/cover.{}", cover.ext);
        self.book
            .add_cover_image(path, Cursor::new(cover.bytes.clone()), cover.mime)
            .map_err(|e| anyhow!(e.to_string()))?;
        Ok(())
    }

    /// 书籍信息页：书名、别名、作者、简介。
    pub fn add_info_page(&mut self, meta: &Book) {
        let mut body = String::from("<div class=\"book-info\">\n");
        body.push_str(&format!(
            "<p>作者：{}</p>\n",
            ContentParser::escape_html(&meta.author)
        ));
        if let Some(alias) = meta.original_title.as_deref().filter(|a| !a.trim().is_empty()) {
            body.push_str(&format!("<p>别名：{}</p>\n", ContentParser::escape_html(alias)));
        }
        body.push_str("<h3>内容简介</h3>\n");
        body.push_str(&ContentParser::to_xhtml_paragraphs(&meta.description));
        body.push_str("\n</div>");

        self.pages.push(Page {
            file_name: "info.xhtml".to_string(),
            title: meta.title.clone(),
            html: wrap_xhtml(&meta.title, &body, None),
            level: 1,
            reftype: ReferenceType::TitlePage,
        });
    }

    /// 卷标题页，作为目录的一级节点。
    pub fn add_volume(&mut self, title: &str) {
        self.volume_counter += 1;
        self.pages.push(Page {
            file_name: format!("volume_{:03}.xhtml", self.volume_counter),
            title: title.to_string(),
            html: wrap_xhtml(title, "", Some("volume")),
            level: 1,
            reftype: ReferenceType::Text,
        });
    }

    /// `text` 为清洗后的纯文本正文；`None` 表示章节缺失，写入占位段落。
    pub fn add_chapter(&mut self, title: &str, text: Option<&str>, level: i32) {
        self.chapter_counter += 1;
        let body = match text {
            Some(t) if !t.trim().is_empty() => ContentParser::to_xhtml_paragraphs(t),
            _ => format!(
                "<p class=\"unavailable\">{}</p>",
                ContentParser::escape_html(super::txt_writer::UNAVAILABLE_PLACEHOLDER)
            ),
        };
        self.pages.push(Page {
            file_name: format!("chapter_{:05}.xhtml", self.chapter_counter),
            title: title.to_string(),
            html: wrap_xhtml(title, &body, None),
            level,
            reftype: ReferenceType::Text,
        });
    }

    /// 生成 EPUB 字节流。
    pub fn generate(mut self) -> Result<Vec<u8>> {
        // 用 stylesheet() 而不是 add_resource()，否则 epub-builder 会另建一个空的 stylesheet.css
        self.book
            .stylesheet(Cursor::new(self.style.clone()))
            .map_err(|e| anyhow!(e.to_string()))?;

        for page in self.pages.drain(..) {
            self.book
                .add_content(
                    EpubContent::new(page.file_name, Cursor::new(page.html))
                        .title(page.title)
                        .reftype(page.reftype)
                        .level(page.level),
                )
                .map_err(|e| anyhow!(e.to_string()))?;
        }

        let mut buffer = Vec::new();
        self.book
            .generate(&mut buffer)
            .map_err(|e| anyhow!(e.to_string()))?;
        Ok(buffer)
    }
}

fn wrap_xhtml(title: &str, body: &str, heading_class: Option<&str>) -> String {
    let escaped_title = ContentParser::escape_html(title);
    let heading = match heading_class {
        Some(class) => format!("<h1 class=\"{class}\">{escaped_title}</h1>"),
        None => format!("<h1>{escaped_title}</h1>"),
    };
    format!(
        "<?xml version='1.0' encoding='utf-8'?>\n<!DOCTYPE html>\n<html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\" lang=\"zh-CN\" xml:lang=\"zh-CN\">\n  <head>\n    <title>{escaped_title}</title>\n    <link href=\"stylesheet.css\" rel=\"stylesheet\" type=\"text/css\"/>\n  </head>\n  <body>{heading}\n{body}\n  </body>\n</html>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_is_stable_per_book() {
        assert_eq!(book_uuid("7143038691944959011"), book_uuid("7143038691944959011"));
        assert_ne!(book_uuid("1"), book_uuid("2"));
    }

    #[test]
    fn chapter_markup_is_escaped() {
        let html = wrap_xhtml("A & B", "<p>x</p>", None);
        assert!(html.contains("<title>A &amp; B</title>"));
        assert!(html.contains("<h1>A &amp; B</h1>"));
    }
}
