//! 进度上报与 CLI 进度条管理。

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub done: usize,
    pub failed: usize,
}

pub(crate) type ProgressCallback = Box<dyn FnMut(ProgressSnapshot) + Send>;

pub(crate) struct ProgressReporter {
    pub(crate) snapshot: ProgressSnapshot,
    cb: Option<ProgressCallback>,
    bar: Option<ProgressBar>,
}

impl ProgressReporter {
    /// `already_done` 为断点续传恢复的章节数，进度条从这里起步。
    pub(crate) fn new(total: usize, already_done: usize, show_bar: bool) -> Self {
        let bar = show_bar.then(|| {
            let bar = ProgressBar::with_draw_target(Some(total as u64), ProgressDrawTarget::stderr());
            let style = ProgressStyle::with_template(
                "{prefix} [{elapsed_precise}] {wide_bar} {pos}/{len} ({eta}) {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");
            bar.set_style(style);
            bar.set_prefix("下载章节");
            bar.set_position(already_done as u64);
            bar
        });
        Self {
            snapshot: ProgressSnapshot {
                total,
                done: already_done,
                failed: 0,
            },
            cb: None,
            bar,
        }
    }

    pub(crate) fn with_callback(mut self, cb: ProgressCallback) -> Self {
        self.cb = Some(cb);
        self
    }

    fn emit(&mut self) {
        if let Some(cb) = self.cb.as_mut() {
            cb(self.snapshot);
        }
    }

    pub(crate) fn inc_done(&mut self) {
        self.snapshot.done = (self.snapshot.done + 1).min(self.snapshot.total);
        if let Some(bar) = self.bar.as_ref() {
            bar.inc(1);
        }
        self.emit();
    }

    pub(crate) fn inc_failed(&mut self) {
        self.snapshot.failed += 1;
        if let Some(bar) = self.bar.as_ref() {
            bar.inc(1);
            bar.set_message(format!("失败 {}", self.snapshot.failed));
        }
        self.emit();
    }

    pub(crate) fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

/// 每完成 10% 记一条日志，进度条不可见时（重定向、写日志文件）也能看到进度。
pub(crate) fn milestone_logger(total: usize, already_done: usize) -> ProgressCallback {
    let decile = move |finished: usize| (finished * 10).checked_div(total).unwrap_or(10);
    let mut last = decile(already_done);
    Box::new(move |s: ProgressSnapshot| {
        let now = decile(s.done + s.failed);
        if now > last {
            last = now;
            debug!(target: "download", done = s.done, failed = s.failed, total = s.total, "下载进度 {}%", now * 10);
        }
    })
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.finish();
    }
}
