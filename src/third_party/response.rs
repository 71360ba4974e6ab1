//! 第三方 API 响应解析。
//!
//! 所有接口都包在 `{ "api_source": ..., "data": ... }` 信封里。这里把原始 JSON
//! 解析、校验为强类型结构，未知或畸形的响应一律转成 [`PayloadError`]，
//! 不把裸 `Value` 传出适配层。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("响应缺少 data 字段")]
    MissingData,
    #[error("data 字段格式不符：期望 {expected}")]
    WrongShape { expected: &'static str },
    #[error("data 为空")]
    Empty,
}

/// 搜索结果条目（`q`）。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookSummary {
    pub book_id: String,
    pub title: String,
    pub author: String,
    pub abstract_text: String,
    pub category: String,
    pub creation_status: String,
    pub word_number: String,
    pub cover_url: Option<String>,
}

/// 书籍详情（`xq`）。字段缺失时保持 `None`，由调用方决定兜底文案。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookDetail {
    pub book_name: Option<String>,
    pub original_book_name: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub cover_url: Option<String>,
}

/// 目录条目（`mulu`），保持接口返回顺序。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub item_id: String,
    pub title: String,
    pub volume_name: String,
}

/// 正文（`content`）。`content` 为未清洗的原始文本。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterPayload {
    pub content: String,
    pub title: Option<String>,
}

fn data_of(value: &Value) -> Result<&Value, PayloadError> {
    match value.get("data") {
        None | Some(Value::Null) => Err(PayloadError::MissingData),
        Some(v) => Ok(v),
    }
}

/// 读取字符串字段；数字也接受（部分接口把 ID / 字数返回成数字）。
fn pick_string(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match obj.get(*k) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

pub fn parse_search(value: &Value) -> Result<Vec<BookSummary>, PayloadError> {
    let data = data_of(value)?;
    let items = data.as_array().ok_or(PayloadError::WrongShape { expected: "array" })?;

    Ok(items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|obj| {
            let book_id = pick_string(obj, &["book_id", "bookId"])?;
            Some(BookSummary {
                book_id,
                title: pick_string(obj, &["title", "book_name"]).unwrap_or_default(),
                author: pick_string(obj, &["author"]).unwrap_or_default(),
                abstract_text: pick_string(obj, &["abstract", "intro"]).unwrap_or_default(),
                category: pick_string(obj, &["category"]).unwrap_or_default(),
                creation_status: pick_string(obj, &["creation_status"]).unwrap_or_default(),
                word_number: pick_string(obj, &["word_number", "word_count"]).unwrap_or_default(),
                cover_url: pick_string(obj, &["thumb_url", "cover"]),
            })
        })
        .collect())
}

pub fn parse_detail(value: &Value) -> Result<BookDetail, PayloadError> {
    let data = data_of(value)?;
    let obj = data
        .as_object()
        .ok_or(PayloadError::WrongShape { expected: "object" })?;
    if obj.is_empty() {
        return Err(PayloadError::Empty);
    }

    Ok(BookDetail {
        book_name: pick_string(obj, &["book_name", "title"]),
        original_book_name: pick_string(obj, &["original_book_name"]),
        author: pick_string(obj, &["author"]),
        description: pick_string(obj, &["book_abstract_v2", "abstract", "intro"]),
        cover_url: pick_string(obj, &["thumb_url", "cover", "detail_page_thumb_url"]),
    })
}

pub fn parse_directory(value: &Value) -> Result<Vec<DirectoryEntry>, PayloadError> {
    let data = data_of(value)?;
    let items = match data {
        Value::Array(items) => items,
        Value::Object(obj) => obj
            .get("chapters")
            .and_then(Value::as_array)
            .ok_or(PayloadError::WrongShape { expected: "array" })?,
        _ => return Err(PayloadError::WrongShape { expected: "array" }),
    };

    let entries: Vec<DirectoryEntry> = items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|obj| {
            let item_id = pick_string(obj, &["item_id", "chapter_id"])?;
            Some(DirectoryEntry {
                item_id,
                title: pick_string(obj, &["title", "chapter_name"]).unwrap_or_default(),
                volume_name: pick_string(obj, &["volume_name"]).unwrap_or_default(),
            })
        })
        .collect();

    if entries.is_empty() {
        return Err(PayloadError::Empty);
    }
    Ok(entries)
}

pub fn parse_content(value: &Value) -> Result<ChapterPayload, PayloadError> {
    let data = data_of(value)?;
    let obj = data
        .as_object()
        .ok_or(PayloadError::WrongShape { expected: "object" })?;
    let content = match obj.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(_) => return Err(PayloadError::WrongShape { expected: "string content" }),
        None => return Err(PayloadError::WrongShape { expected: "content field" }),
    };
    if content.trim().is_empty() {
        return Err(PayloadError::Empty);
    }
    Ok(ChapterPayload {
        content,
        title: pick_string(obj, &["chapter_name", "title"]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn directory_keeps_array_order_and_accepts_aliases() {
        let v = json!({
            "api_source": "x",
            "data": [
                {"item_id": "3", "title": "第一章", "volume_name": "第一卷"},
                {"chapter_id": 1, "chapter_name": "第二章"},
                {"title": "no id"},
                {"item_id": "2", "title": "第三章", "volume_name": "第二卷"}
            ]
        });
        let entries = parse_directory(&v).unwrap();
        let ids: Vec<_> = entries.iter().map(|e| e.item_id.as_str()).collect();
        assert_eq!(ids, ["3", "1", "2"]);
        assert_eq!(entries[1].title, "第二章");
        assert_eq!(entries[1].volume_name, "");
    }

    #[test]
    fn directory_accepts_nested_chapters_object() {
        let v = json!({"data": {"chapters": [{"item_id": "9", "title": "t"}]}});
        assert_eq!(parse_directory(&v).unwrap().len(), 1);
    }

    #[test]
    fn directory_errors() {
        assert_eq!(parse_directory(&json!({"api_source": "x"})), Err(PayloadError::MissingData));
        assert_eq!(parse_directory(&json!({"data": []})), Err(PayloadError::Empty));
        assert!(matches!(
            parse_directory(&json!({"data": "oops"})),
            Err(PayloadError::WrongShape { .. })
        ));
    }

    #[test]
    fn content_requires_text() {
        let ok = parse_content(&json!({"data": {"content": "<p>hi</p>", "chapter_name": "第1章 开始"}})).unwrap();
        assert_eq!(ok.title.as_deref(), Some("第1章 开始"));
        assert_eq!(parse_content(&json!({"data": {"content": "  "}})), Err(PayloadError::Empty));
        assert!(parse_content(&json!({"data": ["x"]})).is_err());
        assert!(parse_content(&json!({"data": {"content": 3}})).is_err());
    }

    #[test]
    fn detail_and_search_fields() {
        let detail = parse_detail(&json!({"data": {
            "book_name": "书", "original_book_name": "原名",
            "book_abstract_v2": "简介", "thumb_url": "http://img/c.jpg"
        }}))
        .unwrap();
        assert_eq!(detail.book_name.as_deref(), Some("书"));
        assert_eq!(detail.author, None);
        assert_eq!(detail.cover_url.as_deref(), Some("http://img/c.jpg"));

        let hits = parse_search(&json!({"data": [
            {"book_id": "1", "title": "A", "author": "B", "word_number": 12000}
        ]}))
        .unwrap();
        assert_eq!(hits[0].word_number, "12000");
        assert!(parse_search(&json!({"data": {}})).is_err());
    }
}
