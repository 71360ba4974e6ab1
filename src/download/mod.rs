//! 下载流程模块入口。
//!
//! 子模块：
//! - `models`：数据模型（Book / Chapter / DownloadJob / 章节状态）
//! - `directory`：章节目录解析
//! - `progress_store`：进度文件读写与断点续传
//! - `scheduler`：章节并发下载调度
//! - `progress`：进度上报与 CLI 进度条
//! - `downloader`：下载主流程编排

pub mod directory;
pub mod downloader;
pub mod models;
pub mod progress;
pub mod progress_store;
pub mod scheduler;
