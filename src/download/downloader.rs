//! 下载主流程编排：目录 → 进度合并 → 并发下载 → 封面 → 成书 → 清理进度。

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use super::directory::DirectoryResolver;
use super::models::{Book, Chapter, DownloadJob};
use super::progress::{ProgressReporter, milestone_logger};
use super::progress_store::{ProgressStore, StoreError};
use super::scheduler::{RunOutcome, Scheduler};
use crate::base_system::context::{Config, OutputFormat, safe_fs_name};
use crate::book_parser::assembler::{self, AssembleOptions};
use crate::book_parser::image_utils::{self, CoverImage};
use crate::third_party::client::ApiClient;

/// 章节范围，1 起始、闭区间。`end` 缺省表示到最后一章。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChapterRange {
    pub start: usize,
    pub end: Option<usize>,
}

impl FromStr for ChapterRange {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let (start_part, end_part) = match trimmed.split_once('-') {
            Some((a, b)) => (a.trim(), Some(b.trim())),
            None => (trimmed, None),
        };
        let start = if start_part.is_empty() {
            1
        } else {
            start_part
                .parse::<usize>()
                .map_err(|_| "起始章节需为数字".to_string())?
        };
        let end = match end_part {
            None => Some(start),
            Some("") => None,
            Some(s) => Some(s.parse::<usize>().map_err(|_| "结束章节需为数字".to_string())?),
        };
        if start == 0 || end == Some(0) {
            return Err("章节编号需大于 0".to_string());
        }
        if let Some(end) = end
            && start > end
        {
            return Err("起始章节不能大于结束章节".to_string());
        }
        Ok(Self { start, end })
    }
}

/// 截取范围内的章节；结束位置超出目录时截到最后一章。
pub fn apply_range(chapters: Vec<Chapter>, range: Option<ChapterRange>) -> Vec<Chapter> {
    let Some(r) = range else {
        return chapters;
    };
    let total = chapters.len();
    let end = r.end.unwrap_or(total).min(total);
    if r.start == 0 || r.start > end {
        return Vec::new();
    }
    chapters
        .into_iter()
        .skip(r.start - 1)
        .take(end + 1 - r.start)
        .collect()
}

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub book_id: String,
    pub format: OutputFormat,
    pub range: Option<ChapterRange>,
    pub output: Option<PathBuf>,
    /// 忽略已保存的进度，全部重新下载。
    pub fresh: bool,
}

#[derive(Debug)]
pub struct DownloadSummary {
    pub book: Book,
    pub outcome: RunOutcome,
    /// 取消时为 `None`，不生成输出文件。
    pub output: Option<PathBuf>,
    pub restored: usize,
    pub resume_available: bool,
}

pub struct Downloader {
    config: Config,
    client: ApiClient,
    cancel: Arc<AtomicBool>,
    show_progress: bool,
}

impl Downloader {
    pub fn new(config: Config, cancel: Arc<AtomicBool>) -> Result<Self> {
        let client = ApiClient::new(config.http_options()).context("初始化 HTTP 客户端失败")?;
        Ok(Self::with_client(config, client, cancel))
    }

    pub fn with_client(config: Config, client: ApiClient, cancel: Arc<AtomicBool>) -> Self {
        Self {
            config,
            client,
            cancel,
            show_progress: false,
        }
    }

    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn download(&self, request: &DownloadRequest) -> Result<DownloadSummary> {
        let started = Instant::now();
        let resolver = DirectoryResolver::new(&self.client);
        let book = resolver.book(&request.book_id);
        let chapters = resolver
            .resolve(&request.book_id)
            .with_context(|| format!("无法获取《{}》的章节目录", book.title))?;
        let chapters = apply_range(chapters, request.range);
        if chapters.is_empty() {
            bail!("所选范围内没有章节");
        }

        info!(target: "download", book_id = %book.id, title = %book.title, chapters = chapters.len(), "开始下载：{}", book.title);
        let mut job = DownloadJob::new(book, chapters);

        let store = self.open_store(&request.book_id)?;
        let mut restored = 0;
        if let Some(store) = store.as_ref() {
            if request.fresh {
                info!(target: "download", "忽略已保存的进度，全部重新下载");
            } else {
                restored = job.merge_progress(store.load());
                if restored > 0 {
                    info!(target: "download", restored, "从进度文件恢复 {} 章", restored);
                }
            }
        }
        let mut resume_available = store.is_some();
        if let Some(s) = store.as_ref()
            && let Err(e) = s.save(&job)
        {
            warn!(target: "download", error = %e, "进度写入失败，本次下载将无法断点续传");
            resume_available = false;
        }
        let active_store = store.as_ref().filter(|_| resume_available);

        let total = job.chapters().len();
        let mut reporter = ProgressReporter::new(total, restored, self.show_progress)
            .with_callback(milestone_logger(total, restored));
        let report = Scheduler::new(&self.client, self.config.scheduler_options())
            .with_cancel(self.cancel.clone())
            .run(&mut job, active_store, &mut reporter);
        reporter.finish();
        if report.persistence_error.is_some() {
            resume_available = false;
        }

        if let RunOutcome::Canceled { remaining } = report.outcome {
            info!(target: "download", remaining, "下载已取消，剩余 {} 章，可稍后继续", remaining);
            return Ok(DownloadSummary {
                book: job.book.clone(),
                outcome: report.outcome,
                output: None,
                restored,
                resume_available,
            });
        }

        let cover = match request.format {
            OutputFormat::Epub => self
                .load_cover(&job.book)
                .or_else(|| self.config.default_cover.then(|| fallback_cover(&job.book)).flatten()),
            OutputFormat::Txt => None,
        };
        let output_path = request.output.clone().unwrap_or_else(|| {
            self.config.default_save_dir().join(format!(
                "{}.{}",
                safe_fs_name(&job.book.title, "_", 120),
                request.format.extension()
            ))
        });
        let options = AssembleOptions {
            first_line_indent_em: self.config.first_line_indent_em,
            allow_overwrite: self.config.allow_overwrite_files,
        };
        let output = assembler::assemble(&job, request.format, &output_path, cover.as_ref(), options)
            .context("生成输出文件失败")?;

        match &report.outcome {
            RunOutcome::Completed => {
                if let Some(store) = store
                    && let Err(e) = store.clear()
                {
                    warn!(target: "download", error = %e, "清理进度文件失败");
                }
            }
            RunOutcome::PartialFailure { failed_chapters } => {
                for ch in failed_chapters {
                    warn!(target: "download", index = ch.sequence_index + 1, item_id = %ch.item_id, "章节下载失败：第 {} 章 {}", ch.sequence_index + 1, ch.title);
                }
                warn!(
                    target: "download",
                    failed = failed_chapters.len(),
                    "{} 章下载失败，输出文件中以占位文本代替，重新运行可补全",
                    failed_chapters.len()
                );
            }
            RunOutcome::Canceled { .. } => {}
        }

        info!(
            target: "download",
            path = %output.display(),
            elapsed = %format!("{:.1}s", started.elapsed().as_secs_f32()),
            "下载完成：{}",
            job.book.title
        );
        Ok(DownloadSummary {
            book: job.book.clone(),
            outcome: report.outcome,
            output: Some(output),
            restored,
            resume_available,
        })
    }

    /// 进度存储打不开时继续下载但不能续传；同一本书已在下载时直接报错。
    fn open_store(&self, book_id: &str) -> Result<Option<ProgressStore>> {
        match ProgressStore::open(&self.config.progress_root(), book_id) {
            Ok(store) => Ok(Some(store)),
            Err(e @ StoreError::Locked(_)) => Err(e.into()),
            Err(e) => {
                warn!(target: "download", error = %e, "无法打开进度文件，本次下载将无法断点续传");
                Ok(None)
            }
        }
    }

    /// 封面获取或处理失败时返回 `None`，由调用方换成默认封面。
    fn load_cover(&self, book: &Book) -> Option<CoverImage> {
        let url = book.cover_url.as_deref()?;
        let bytes = match self.client.fetch_bytes(url) {
            Ok(b) => b,
            Err(e) => {
                warn!(target: "download", error = %e, "封面下载失败");
                return None;
            }
        };
        match image_utils::prepare_cover(&bytes) {
            Ok(cover) => Some(cover),
            Err(e) => {
                warn!(target: "download", error = %e, "封面不可用");
                None
            }
        }
    }
}

fn fallback_cover(book: &Book) -> Option<CoverImage> {
    match image_utils::default_cover(&book.id) {
        Ok(cover) => {
            info!(target: "download", "使用默认封面");
            Some(cover)
        }
        Err(e) => {
            warn!(target: "download", error = %e, "默认封面生成失败，EPUB 将不含封面");
            None
        }
    }
}
