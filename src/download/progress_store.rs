//! 下载进度持久化。
//!
//! 每本书一个状态文件 `<book_id>.json`，只记录章节状态与重试次数；已下载的正文
//! 各自存成 `<book_id>.chapters/<item_id>.json`，每章只在完成时写一次。
//! 打开时对 `<book_id>.lock` 加独占锁，保证同一本书同时只有一个任务在写。
//! 两类文件都走“临时文件 + rename”，崩溃时旧文件保持完整。

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::models::{ChapterContent, ChapterState, DownloadJob, FetchStatus, ProgressMap};
use crate::base_system::context::safe_fs_name;

const FORMAT_VERSION: u32 = 2;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("进度文件读写失败 {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("book_id={0} 已有其他下载任务在进行")]
    Locked(String),
    #[error("进度序列化失败: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct StatusEntry {
    status: FetchStatus,
    #[serde(default)]
    retry_count: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProgressFile {
    version: u32,
    book_id: String,
    chapters: BTreeMap<String, StatusEntry>,
}

pub struct ProgressStore {
    book_id: String,
    path: PathBuf,
    dir: PathBuf,
    chapters_dir: PathBuf,
    lock_path: PathBuf,
    // 持有文件句柄即持有锁，drop 时释放
    _lock: File,
}

impl ProgressStore {
    /// 打开（并锁定）某本书的进度存储。
    pub fn open(root: &Path, book_id: &str) -> Result<Self, StoreError> {
        let stem = safe_fs_name(book_id, "_", 120);
        let chapters_dir = root.join(format!("{stem}.chapters"));
        fs::create_dir_all(&chapters_dir).map_err(|source| StoreError::Io {
            path: chapters_dir.clone(),
            source,
        })?;

        let lock_path = root.join(format!("{stem}.lock"));
        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|source| StoreError::Io {
                path: lock_path.clone(),
                source,
            })?;
        lock.try_lock_exclusive()
            .map_err(|_| StoreError::Locked(book_id.to_string()))?;

        Ok(Self {
            book_id: book_id.to_string(),
            path: root.join(format!("{stem}.json")),
            dir: root.to_path_buf(),
            chapters_dir,
            lock_path,
            _lock: lock,
        })
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn chapter_path(&self, item_id: &str) -> PathBuf {
        self.chapters_dir
            .join(format!("{}.json", safe_fs_name(item_id, "_", 120)))
    }

    /// 读取进度。文件不存在、损坏或不属于本书时返回空表，从不报错。
    ///
    /// done 条目会带上对应的正文；正文文件缺失或损坏时 `content` 为 `None`，
    /// 合并进度时这类条目会被当作未完成。
    pub fn load(&self) -> ProgressMap {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return ProgressMap::new(),
            Err(e) => {
                warn!(target: "progress", path = %self.path.display(), error = %e, "读取进度文件失败，将重新下载");
                return ProgressMap::new();
            }
        };

        let file = match serde_json::from_slice::<ProgressFile>(&raw) {
            Ok(file) if file.book_id == self.book_id => file,
            Ok(file) => {
                warn!(target: "progress", expected = %self.book_id, found = %file.book_id, "进度文件与书籍不匹配，忽略");
                return ProgressMap::new();
            }
            Err(e) => {
                warn!(target: "progress", path = %self.path.display(), error = %e, "进度文件损坏，忽略");
                return ProgressMap::new();
            }
        };

        let chapters: ProgressMap = file
            .chapters
            .into_iter()
            .map(|(item_id, entry)| {
                let content = (entry.status == FetchStatus::Done)
                    .then(|| self.load_chapter(&item_id))
                    .flatten();
                let state = ChapterState {
                    status: entry.status,
                    retry_count: entry.retry_count,
                    content,
                };
                (item_id, state)
            })
            .collect();
        debug!(target: "progress", chapters = chapters.len(), "已加载进度");
        chapters
    }

    fn load_chapter(&self, item_id: &str) -> Option<ChapterContent> {
        let path = self.chapter_path(item_id);
        let raw = fs::read(&path).ok()?;
        match serde_json::from_slice::<ChapterContent>(&raw) {
            Ok(content) => Some(content),
            Err(e) => {
                debug!(target: "progress", %item_id, error = %e, "章节正文文件损坏，忽略");
                None
            }
        }
    }

    /// 原子覆盖写入状态表。正文不在这里写，见 [`ProgressStore::save_chapter`]。
    pub fn save(&self, job: &DownloadJob) -> Result<(), StoreError> {
        let chapters = job
            .chapters()
            .iter()
            .filter_map(|c| {
                let state = job.state(&c.item_id)?;
                let entry = StatusEntry {
                    status: state.status,
                    retry_count: state.retry_count,
                };
                Some((c.item_id.clone(), entry))
            })
            .collect();
        let file = ProgressFile {
            version: FORMAT_VERSION,
            book_id: self.book_id.clone(),
            chapters,
        };
        let bytes = serde_json::to_vec(&file)?;
        write_atomic(&self.path, &self.dir, &bytes)
    }

    /// 写入单章正文。需在状态表把该章记为 done 之前调用。
    pub fn save_chapter(&self, content: &ChapterContent) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(content)?;
        write_atomic(&self.chapter_path(&content.item_id), &self.chapters_dir, &bytes)
    }

    /// 任务成功完成后删除状态文件、正文目录与锁文件。
    pub fn clear(self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        }
        match fs::remove_dir_all(&self.chapters_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.chapters_dir.clone(),
                    source,
                });
            }
        }
        let _ = fs::remove_file(&self.lock_path);
        info!(target: "progress", book_id = %self.book_id, "已清理进度文件");
        Ok(())
    }
}

fn write_atomic(path: &Path, dir: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let io_err = |source: io::Error| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".progress-")
        .suffix(".part")
        .tempfile_in(dir)
        .map_err(io_err)?;
    tmp.write_all(bytes).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}
