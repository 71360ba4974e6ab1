//! 章节并发下载调度。
//!
//! 固定数量的 worker 线程从任务队列取章节、请求正文并清洗；结果以事件形式发回
//! 调度线程。只有调度线程修改 `DownloadJob` 和写进度文件，每次状态变化后立即落盘。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{self as channel, RecvTimeoutError};
use tracing::{debug, info, warn};

use super::models::{Chapter, ChapterContent, DownloadJob, FailedChapter};
use super::progress::ProgressReporter;
use super::progress_store::ProgressStore;
use crate::base_system::context::SchedulerOptions;
use crate::book_parser::parser::ContentParser;
use crate::third_party::client::{ApiClient, ApiQuery};
use crate::third_party::response;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    PartialFailure { failed_chapters: Vec<FailedChapter> },
    Canceled { remaining: usize },
}

#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// 进度写入失败时的错误信息；此后本次运行不再写进度，断点续传不可用。
    pub persistence_error: Option<String>,
    /// 本次运行写状态文件的次数。
    pub status_writes: usize,
}

enum Event {
    Started(String),
    Finished {
        item_id: String,
        result: Result<ChapterContent, String>,
    },
}

pub struct Scheduler<'a> {
    client: &'a ApiClient,
    options: SchedulerOptions,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> Scheduler<'a> {
    pub fn new(client: &'a ApiClient, options: SchedulerOptions) -> Self {
        Self {
            client,
            options,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_canceled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// 下载所有未完成章节。已是 done 的章节不会发出任何请求。
    pub(crate) fn run(
        &self,
        job: &mut DownloadJob,
        store: Option<&ProgressStore>,
        reporter: &mut ProgressReporter,
    ) -> RunReport {
        let mut writer = ProgressWriter::new(store);
        let pending = job.pending_chapters();
        let retries = self.options.chapter_retries.max(1);
        let mut canceled = false;

        if !pending.is_empty() {
            let workers = self.options.max_workers.clamp(1, pending.len());
            info!(target: "scheduler", pending = pending.len(), workers, "开始下载章节");

            let (task_tx, task_rx) = channel::unbounded::<Chapter>();
            let (evt_tx, evt_rx) = channel::unbounded::<Event>();
            for chapter in &pending {
                let _ = task_tx.send(chapter.clone());
            }
            let mut outstanding = pending.len();

            std::thread::scope(|s| {
                for _ in 0..workers {
                    let rx = task_rx.clone();
                    let tx = evt_tx.clone();
                    let cancel = self.cancel.clone();
                    let client = self.client;
                    s.spawn(move || worker_loop(client, rx, tx, cancel));
                }
                drop(task_rx);
                drop(evt_tx);

                let mut task_tx = Some(task_tx);
                loop {
                    if outstanding == 0 {
                        // 关闭队列，worker 取空后退出
                        task_tx.take();
                    }
                    if !canceled && self.is_canceled() {
                        info!(target: "scheduler", outstanding, "收到取消请求，等待进行中的章节结束");
                        canceled = true;
                        task_tx.take();
                    }

                    let event = match evt_rx.recv_timeout(POLL_INTERVAL) {
                        Ok(ev) => ev,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    };

                    match event {
                        // in_progress 续传时等同 pending，不单独落盘
                        Event::Started(item_id) => {
                            job.mark_in_progress(&item_id);
                            continue;
                        }
                        Event::Finished {
                            result: Ok(content),
                            ..
                        } => {
                            debug!(target: "scheduler", item_id = %content.item_id, "章节完成");
                            writer.save_chapter(&content);
                            job.mark_done(content);
                            outstanding = outstanding.saturating_sub(1);
                            reporter.inc_done();
                        }
                        Event::Finished {
                            item_id,
                            result: Err(msg),
                        } => {
                            let attempts = job.record_failure(&item_id);
                            if canceled {
                                // 留在 pending，下次运行再取
                            } else if attempts >= retries {
                                warn!(target: "scheduler", %item_id, attempts, error = %msg, "章节下载失败，放弃");
                                job.mark_failed(&item_id);
                                outstanding = outstanding.saturating_sub(1);
                                reporter.inc_failed();
                            } else {
                                debug!(target: "scheduler", %item_id, attempts, error = %msg, "章节下载失败，重新排队");
                                if let Some(tx) = task_tx.as_ref()
                                    && let Some(chapter) = job.chapter(&item_id)
                                {
                                    let _ = tx.send(chapter.clone());
                                }
                            }
                        }
                    }
                    writer.save(job);
                }
            });
        }

        // worker 可能先于调度线程看到取消标志并直接退出，这里以章节状态为准
        let outcome = settle(job);
        if let RunOutcome::Canceled { remaining } = outcome {
            if !canceled {
                info!(target: "scheduler", remaining, "下载在取消后结束");
            }
            job.reset_in_progress();
            writer.save(job);
        }
        debug!(target: "scheduler", status_writes = writer.status_writes, "进度写入次数");

        RunReport {
            outcome,
            persistence_error: writer.error,
            status_writes: writer.status_writes,
        }
    }
}

/// 根据章节状态得出结果：仍有未完成章节即视为被取消，不会报告成功。
fn settle(job: &DownloadJob) -> RunOutcome {
    let remaining = job.unfinished_count();
    if remaining > 0 {
        return RunOutcome::Canceled { remaining };
    }
    let failed_chapters = job.failed_chapters();
    if failed_chapters.is_empty() {
        RunOutcome::Completed
    } else {
        RunOutcome::PartialFailure { failed_chapters }
    }
}

fn worker_loop(
    client: &ApiClient,
    rx: channel::Receiver<Chapter>,
    tx: channel::Sender<Event>,
    cancel: Option<Arc<AtomicBool>>,
) {
    while let Ok(chapter) = rx.recv() {
        if cancel.as_ref().is_some_and(|c| c.load(Ordering::Relaxed)) {
            break;
        }
        if tx.send(Event::Started(chapter.item_id.clone())).is_err() {
            break;
        }
        let result = fetch_chapter(client, &chapter.item_id);
        let finished = Event::Finished {
            item_id: chapter.item_id,
            result,
        };
        if tx.send(finished).is_err() {
            break;
        }
    }
}

/// 单章下载：请求、解析、清洗。清洗后为空也算失败。
fn fetch_chapter(client: &ApiClient, item_id: &str) -> Result<ChapterContent, String> {
    let value = client
        .fetch(ApiQuery::Content(item_id))
        .map_err(|e| e.to_string())?;
    let payload = response::parse_content(&value).map_err(|e| e.to_string())?;
    let text = ContentParser::clean_content(&payload.content);
    if text.is_empty() {
        return Err("清洗后正文为空".to_string());
    }
    Ok(ChapterContent {
        item_id: item_id.to_string(),
        text,
        title: payload.title,
    })
}

/// 写穿式进度写入。第一次失败后只告警一次并停止写入，下载继续。
struct ProgressWriter<'s> {
    store: Option<&'s ProgressStore>,
    error: Option<String>,
    status_writes: usize,
}

impl<'s> ProgressWriter<'s> {
    fn new(store: Option<&'s ProgressStore>) -> Self {
        Self {
            store,
            error: None,
            status_writes: 0,
        }
    }

    fn save_chapter(&mut self, content: &ChapterContent) {
        if let Some(store) = self.store
            && let Err(e) = store.save_chapter(content)
        {
            self.disable(e.to_string());
        }
    }

    fn save(&mut self, job: &DownloadJob) {
        let Some(store) = self.store else {
            return;
        };
        match store.save(job) {
            Ok(()) => self.status_writes += 1,
            Err(e) => self.disable(e.to_string()),
        }
    }

    fn disable(&mut self, error: String) {
        warn!(target: "scheduler", error = %error, "进度写入失败，本次下载将无法断点续传");
        self.error = Some(error);
        self.store = None;
    }
}
