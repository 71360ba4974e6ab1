//! 下载相关的数据模型定义。
//!
//! `DownloadJob` 是聚合根：持有书籍信息、按目录顺序排列的章节清单，以及
//! `item_id -> ChapterState` 的状态表。状态表与正文由 `ProgressStore` 分开持久化。

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    pub title: String,
    pub author: String,
    pub description: String,
    pub original_title: Option<String>,
    pub cover_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub item_id: String,
    pub title: String,
    pub volume_name: String,
    /// 目录中的位置，输出排序键。
    pub sequence_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterContent {
    pub item_id: String,
    pub text: String,
    /// 正文接口返回的标题（可能带“第N章”前缀，也可能只有章节名）。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    #[default]
    Pending,
    InProgress,
    Done,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterState {
    pub status: FetchStatus,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ChapterContent>,
}

/// 从进度存储读回的状态表：item_id -> 状态，done 条目带正文。
pub type ProgressMap = BTreeMap<String, ChapterState>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedChapter {
    pub sequence_index: usize,
    pub item_id: String,
    pub title: String,
}

#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub book: Book,
    chapters: Vec<Chapter>,
    states: HashMap<String, ChapterState>,
}

impl DownloadJob {
    pub fn new(book: Book, chapters: Vec<Chapter>) -> Self {
        let states = chapters
            .iter()
            .map(|c| (c.item_id.clone(), ChapterState::default()))
            .collect();
        Self {
            book,
            chapters,
            states,
        }
    }

    /// 合并已保存的进度。
    ///
    /// 只采纳清单内、且状态为 done 并带正文的条目；其余章节一律回到 pending，
    /// 重试计数清零。返回采纳的章节数。
    pub fn merge_progress(&mut self, stored: ProgressMap) -> usize {
        let mut restored = 0;
        for (item_id, state) in stored {
            let Some(slot) = self.states.get_mut(&item_id) else {
                continue;
            };
            if state.status == FetchStatus::Done
                && let Some(content) = state.content
                && content.item_id == item_id
            {
                *slot = ChapterState {
                    status: FetchStatus::Done,
                    retry_count: 0,
                    content: Some(content),
                };
                restored += 1;
            }
        }
        restored
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    pub fn chapter(&self, item_id: &str) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.item_id == item_id)
    }

    pub fn state(&self, item_id: &str) -> Option<&ChapterState> {
        self.states.get(item_id)
    }

    pub fn status(&self, item_id: &str) -> Option<FetchStatus> {
        self.states.get(item_id).map(|s| s.status)
    }

    /// 尚未完成的章节，按目录顺序。
    pub fn pending_chapters(&self) -> Vec<Chapter> {
        self.ordered_chapters()
            .into_iter()
            .filter(|c| self.status(&c.item_id) != Some(FetchStatus::Done))
            .cloned()
            .collect()
    }

    pub fn mark_in_progress(&mut self, item_id: &str) {
        if let Some(s) = self.states.get_mut(item_id) {
            s.status = FetchStatus::InProgress;
        }
    }

    pub fn mark_done(&mut self, content: ChapterContent) {
        if let Some(s) = self.states.get_mut(&content.item_id) {
            s.status = FetchStatus::Done;
            s.content = Some(content);
        }
    }

    /// 记录一次失败并返回累计失败次数。
    pub fn record_failure(&mut self, item_id: &str) -> u32 {
        match self.states.get_mut(item_id) {
            Some(s) => {
                s.retry_count += 1;
                s.status = FetchStatus::Pending;
                s.retry_count
            }
            None => 0,
        }
    }

    /// 取消后把仍在进行中的章节退回 pending。返回退回的数量。
    pub fn reset_in_progress(&mut self) -> usize {
        let mut n = 0;
        for s in self.states.values_mut() {
            if s.status == FetchStatus::InProgress {
                s.status = FetchStatus::Pending;
                n += 1;
            }
        }
        n
    }

    pub fn mark_failed(&mut self, item_id: &str) {
        if let Some(s) = self.states.get_mut(item_id) {
            s.status = FetchStatus::Failed;
            s.content = None;
        }
    }

    pub fn done_count(&self) -> usize {
        self.states
            .values()
            .filter(|s| s.status == FetchStatus::Done)
            .count()
    }

    pub fn is_complete(&self) -> bool {
        self.done_count() == self.chapters.len()
    }

    pub fn failed_chapters(&self) -> Vec<FailedChapter> {
        self.ordered_chapters()
            .into_iter()
            .filter(|c| self.status(&c.item_id) == Some(FetchStatus::Failed))
            .map(|c| FailedChapter {
                sequence_index: c.sequence_index,
                item_id: c.item_id.clone(),
                title: c.title.clone(),
            })
            .collect()
    }

    /// 仍为 pending / in_progress 的章节数。
    pub fn unfinished_count(&self) -> usize {
        self.states
            .values()
            .filter(|s| matches!(s.status, FetchStatus::Pending | FetchStatus::InProgress))
            .count()
    }

    /// 按 `sequence_index` 排序的章节，与获取完成的先后无关。
    pub fn ordered_chapters(&self) -> Vec<&Chapter> {
        let mut ordered: Vec<&Chapter> = self.chapters.iter().collect();
        ordered.sort_by_key(|c| c.sequence_index);
        ordered
    }

    /// 输出用：按目录顺序给出章节及其正文（未完成的为 `None`）。
    pub fn ordered_contents(&self) -> Vec<(&Chapter, Option<&ChapterContent>)> {
        self.ordered_chapters()
            .into_iter()
            .map(|c| {
                let content = self
                    .states
                    .get(&c.item_id)
                    .filter(|s| s.status == FetchStatus::Done)
                    .and_then(|s| s.content.as_ref());
                (c, content)
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) fn sample_chapters(n: usize) -> Vec<Chapter> {
    (0..n)
        .map(|i| Chapter {
            item_id: format!("c{}", i + 1),
            title: format!("第{}章", i + 1),
            volume_name: if i < 2 { "第一卷".to_string() } else { "第二卷".to_string() },
            sequence_index: i,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(id: &str, text: &str) -> ChapterContent {
        ChapterContent {
            item_id: id.to_string(),
            text: text.to_string(),
            title: None,
        }
    }

    #[test]
    fn merge_keeps_only_done_entries_from_manifest() {
        let mut job = DownloadJob::new(Book::default(), sample_chapters(3));
        let mut stored = ProgressMap::new();
        stored.insert(
            "c1".into(),
            ChapterState {
                status: FetchStatus::Done,
                retry_count: 2,
                content: Some(content("c1", "one")),
            },
        );
        stored.insert(
            "c2".into(),
            ChapterState {
                status: FetchStatus::Failed,
                retry_count: 3,
                content: None,
            },
        );
        // done 却没有正文：不可信
        stored.insert(
            "c3".into(),
            ChapterState {
                status: FetchStatus::Done,
                retry_count: 0,
                content: None,
            },
        );
        stored.insert(
            "stale".into(),
            ChapterState {
                status: FetchStatus::Done,
                retry_count: 0,
                content: Some(content("stale", "x")),
            },
        );

        assert_eq!(job.merge_progress(stored), 1);
        assert_eq!(job.status("c1"), Some(FetchStatus::Done));
        assert_eq!(job.state("c1").unwrap().retry_count, 0);
        assert_eq!(job.status("c2"), Some(FetchStatus::Pending));
        assert_eq!(job.state("c2").unwrap().retry_count, 0);
        assert_eq!(job.status("c3"), Some(FetchStatus::Pending));
        assert!(job.state("stale").is_none());
        assert_eq!(job.unfinished_count(), 2);
    }

    #[test]
    fn ordered_contents_follow_sequence_not_completion() {
        let mut chapters = sample_chapters(3);
        chapters.reverse();
        let mut job = DownloadJob::new(Book::default(), chapters);
        job.mark_done(content("c3", "three"));
        job.mark_done(content("c1", "one"));

        let order: Vec<_> = job
            .ordered_contents()
            .into_iter()
            .map(|(c, body)| (c.item_id.clone(), body.map(|b| b.text.clone())))
            .collect();
        assert_eq!(
            order,
            vec![
                ("c1".to_string(), Some("one".to_string())),
                ("c2".to_string(), None),
                ("c3".to_string(), Some("three".to_string())),
            ]
        );
    }

    #[test]
    fn failure_bookkeeping() {
        let mut job = DownloadJob::new(Book::default(), sample_chapters(2));
        assert_eq!(job.record_failure("c2"), 1);
        assert_eq!(job.record_failure("c2"), 2);
        job.mark_failed("c2");
        job.mark_done(content("c1", "x"));
        assert!(!job.is_complete());
        assert_eq!(
            job.failed_chapters(),
            vec![FailedChapter {
                sequence_index: 1,
                item_id: "c2".into(),
                title: "第2章".into()
            }]
        );
        assert_eq!(job.pending_chapters().len(), 1);
    }

    #[test]
    fn state_serializes_with_snake_case_status() {
        let state = ChapterState {
            status: FetchStatus::InProgress,
            retry_count: 1,
            content: None,
        };
        let text = serde_json::to_string(&state).unwrap();
        assert_eq!(text, r#"{"status":"in_progress","retry_count":1}"#);
    }
}
