//! 章节目录解析：拉取 `mulu` 接口并规范化为有序的章节清单。

use std::collections::HashSet;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::models::{Book, Chapter};
use crate::third_party::client::{ApiClient, ApiError, ApiQuery};
use crate::third_party::response::{self, BookDetail, PayloadError};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("获取章节目录失败: {0}")]
    Network(#[from] ApiError),
    #[error("章节目录格式错误: {0}")]
    Malformed(#[from] PayloadError),
}

pub struct DirectoryResolver<'a> {
    client: &'a ApiClient,
}

impl<'a> DirectoryResolver<'a> {
    pub fn new(client: &'a ApiClient) -> Self {
        Self { client }
    }

    /// 返回目录顺序的章节清单，`sequence_index` 即数组下标。
    ///
    /// 同一 item_id 重复出现时只保留第一次；没有标题的章节补为“第N章”。
    pub fn resolve(&self, book_id: &str) -> Result<Vec<Chapter>, ResolveError> {
        let value = self.client.fetch(ApiQuery::Directory(book_id))?;
        let entries = response::parse_directory(&value)?;

        let mut seen = HashSet::new();
        let mut chapters = Vec::with_capacity(entries.len());
        for entry in entries {
            if !seen.insert(entry.item_id.clone()) {
                debug!(target: "directory", item_id = %entry.item_id, "跳过重复章节");
                continue;
            }
            let sequence_index = chapters.len();
            let title = if entry.title.is_empty() {
                format!("第{}章", sequence_index + 1)
            } else {
                entry.title
            };
            chapters.push(Chapter {
                item_id: entry.item_id,
                title,
                volume_name: entry.volume_name,
                sequence_index,
            });
        }

        info!(target: "directory", book_id, chapters = chapters.len(), "章节目录获取完成");
        Ok(chapters)
    }

    /// 获取书籍信息；详情接口失败时退化为占位信息，不影响下载。
    pub fn book(&self, book_id: &str) -> Book {
        match self.client.book_detail(book_id) {
            Ok(detail) => book_from_detail(book_id, detail),
            Err(err) => {
                warn!(target: "directory", book_id, error = %err, "获取书籍详情失败，使用默认信息");
                book_from_detail(book_id, BookDetail::default())
            }
        }
    }
}

fn book_from_detail(book_id: &str, detail: BookDetail) -> Book {
    let title = detail
        .book_name
        .unwrap_or_else(|| format!("未知小说_{book_id}"));
    let original_title = detail.original_book_name.filter(|o| o != &title);
    Book {
        id: book_id.to_string(),
        title,
        author: detail.author.unwrap_or_else(|| "未知作者".to_string()),
        description: detail.description.unwrap_or_else(|| "无简介".to_string()),
        original_title,
        cover_url: detail.cover_url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::third_party::client::testing::{ScriptedTransport, fast_options, json};
    use serde_json::json as j;
    use std::sync::Arc;

    fn client_with(body: serde_json::Value) -> (ApiClient, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new(move |_, _| json(200, body.clone())));
        (
            ApiClient::with_transport(fast_options(), transport.clone()),
            transport,
        )
    }

    #[test]
    fn sequence_index_is_array_position() {
        let (client, _) = client_with(j!({
            "api_source": "x",
            "data": [
                {"item_id": "900", "title": "序章", "volume_name": "第二卷"},
                {"item_id": "100", "title": "", "volume_name": "第一卷"},
                {"item_id": "900", "title": "重复"},
                {"item_id": "500", "title": "尾声", "volume_name": "第一卷"}
            ]
        }));
        let chapters = DirectoryResolver::new(&client).resolve("1").unwrap();
        let got: Vec<_> = chapters
            .iter()
            .map(|c| (c.item_id.as_str(), c.title.as_str(), c.sequence_index))
            .collect();
        assert_eq!(got, [("900", "序章", 0), ("100", "第2章", 1), ("500", "尾声", 2)]);
    }

    #[test]
    fn missing_data_is_resolution_error() {
        let (client, transport) = client_with(j!({"api_source": "x", "message": "busy"}));
        let err = DirectoryResolver::new(&client).resolve("1").unwrap_err();
        assert!(matches!(err, ResolveError::Malformed(PayloadError::MissingData)));
        assert_eq!(transport.requested(), ["mulu=1"]);
    }

    #[test]
    fn empty_directory_is_resolution_error() {
        let (client, _) = client_with(j!({"data": []}));
        assert!(matches!(
            DirectoryResolver::new(&client).resolve("1"),
            Err(ResolveError::Malformed(PayloadError::Empty))
        ));
    }

    #[test]
    fn book_detail_falls_back_to_placeholders() {
        let (client, _) = client_with(j!({"data": null}));
        let book = DirectoryResolver::new(&client).book("77");
        assert_eq!(book.title, "未知小说_77");
        assert_eq!(book.author, "未知作者");
        assert_eq!(book.cover_url, None);

        let (client, _) = client_with(j!({"data": {
            "book_name": "书", "original_book_name": "书", "author": "某人", "thumb_url": "http://c"
        }}));
        let book = DirectoryResolver::new(&client).book("77");
        assert_eq!(book.title, "书");
        assert_eq!(book.original_title, None);
        assert_eq!(book.cover_url.as_deref(), Some("http://c"));
    }
}
