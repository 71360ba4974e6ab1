//! 配置结构（Config）与默认值。
//!
//! 该模块同时提供生成 `config.yml` 的字段元信息，以及各组件使用的派生选项
//! （`HttpOptions` / `SchedulerOptions`）。配置只在启动时构造一次，再以参数形式
//! 传入各组件构造函数。

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::{ConfigError, ConfigSpec, FieldMeta};

/// `min_request_interval` 上限（秒）。
const MAX_REQUEST_INTERVAL_SECS: f64 = 3600.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // 网络配置
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_min_request_interval")]
    pub min_request_interval: f64,
    #[serde(default = "default_min_wait_time")]
    pub min_wait_time: u64,
    #[serde(default = "default_max_wait_time")]
    pub max_wait_time: u64,
    #[serde(default = "default_chapter_retries")]
    pub chapter_retries: u32,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    // 保存配置
    #[serde(default = "default_novel_format")]
    pub novel_format: String,
    #[serde(default)]
    pub save_path: String,
    #[serde(default)]
    pub progress_dir: String,
    #[serde(default = "default_first_line_indent_em")]
    pub first_line_indent_em: f32,
    #[serde(default = "default_true")]
    pub allow_overwrite_files: bool,
    #[serde(default = "default_true")]
    pub default_cover: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            request_timeout: default_request_timeout(),
            max_retries: default_max_retries(),
            min_request_interval: default_min_request_interval(),
            min_wait_time: default_min_wait_time(),
            max_wait_time: default_max_wait_time(),
            chapter_retries: default_chapter_retries(),
            api_base_url: default_api_base_url(),
            novel_format: default_novel_format(),
            save_path: String::new(),
            progress_dir: String::new(),
            first_line_indent_em: default_first_line_indent_em(),
            allow_overwrite_files: default_true(),
            default_cover: default_true(),
        }
    }
}

impl ConfigSpec for Config {
    const FILE_NAME: &'static str = "config.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 14] = [
            FieldMeta {
                name: "max_workers",
                description: "最大并发线程数",
            },
            FieldMeta {
                name: "request_timeout",
                description: "请求超时时间（秒）",
            },
            FieldMeta {
                name: "max_retries",
                description: "单次请求失败后的最大重试次数",
            },
            FieldMeta {
                name: "min_request_interval",
                description: "两次请求之间的最小间隔（秒），用于避免触发接口限频",
            },
            FieldMeta {
                name: "min_wait_time",
                description: "请求失败后的最小退避时间, 单位ms",
            },
            FieldMeta {
                name: "max_wait_time",
                description: "请求失败后的最大退避时间, 单位ms",
            },
            FieldMeta {
                name: "chapter_retries",
                description: "单个章节的最大尝试次数（任务级重试，区别于单次请求重试）",
            },
            FieldMeta {
                name: "api_base_url",
                description: "第三方 API 地址（需支持 q / xq / mulu / content 查询参数）",
            },
            FieldMeta {
                name: "novel_format",
                description: "保存小说格式, 可选: [txt, epub]",
            },
            FieldMeta {
                name: "save_path",
                description: "保存路径，留空为当前目录",
            },
            FieldMeta {
                name: "progress_dir",
                description: "下载进度文件目录，留空为 <保存路径>/.progress",
            },
            FieldMeta {
                name: "first_line_indent_em",
                description: "EPUB 段落首行缩进（em）",
            },
            FieldMeta {
                name: "allow_overwrite_files",
                description: "是否允许覆盖已存在的输出文件",
            },
            FieldMeta {
                name: "default_cover",
                description: "EPUB 没有可用封面时是否生成默认封面（false 则输出无封面的 EPUB）",
            },
        ];
        &FIELDS
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base_url.trim().is_empty() {
            return Err(ConfigError::Validation("api_base_url 不能为空".to_string()));
        }
        if !self.min_request_interval.is_finite()
            || !(0.0..=MAX_REQUEST_INTERVAL_SECS).contains(&self.min_request_interval)
        {
            return Err(ConfigError::Validation(format!(
                "min_request_interval 必须在 0 到 {MAX_REQUEST_INTERVAL_SECS} 秒之间"
            )));
        }
        if OutputFormat::parse(&self.novel_format).is_none() {
            return Err(ConfigError::Validation(format!(
                "novel_format 仅支持 txt / epub，当前为 {}",
                self.novel_format
            )));
        }
        Ok(())
    }
}

/// 输出格式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Txt,
    Epub,
}

impl OutputFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "txt" => Some(Self::Txt),
            "epub" => Some(Self::Epub),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Txt => "txt",
            Self::Epub => "epub",
        }
    }
}

/// HTTP 适配层选项。
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub min_interval: Duration,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

/// 章节调度器选项。
#[derive(Debug, Clone, Copy)]
pub struct SchedulerOptions {
    pub max_workers: usize,
    pub chapter_retries: u32,
}

impl Config {
    pub fn http_options(&self) -> HttpOptions {
        let interval = if self.min_request_interval.is_finite() {
            self.min_request_interval.clamp(0.0, MAX_REQUEST_INTERVAL_SECS)
        } else {
            0.0
        };
        HttpOptions {
            base_url: self.api_base_url.trim().to_string(),
            timeout: Duration::from_secs(self.request_timeout.max(1)),
            max_retries: self.max_retries,
            min_interval: Duration::from_secs_f64(interval),
            min_backoff: Duration::from_millis(self.min_wait_time),
            max_backoff: Duration::from_millis(self.max_wait_time.max(self.min_wait_time)),
        }
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            max_workers: self.max_workers.max(1),
            chapter_retries: self.chapter_retries.max(1),
        }
    }

    pub fn output_format(&self) -> OutputFormat {
        OutputFormat::parse(&self.novel_format).unwrap_or(OutputFormat::Txt)
    }

    pub fn default_save_dir(&self) -> PathBuf {
        if self.save_path.trim().is_empty() {
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        } else {
            PathBuf::from(&self.save_path)
        }
    }

    pub fn progress_root(&self) -> PathBuf {
        if self.progress_dir.trim().is_empty() {
            self.default_save_dir().join(".progress")
        } else {
            PathBuf::from(&self.progress_dir)
        }
    }
}

pub fn safe_fs_name(name: &str, replacement: &str, max_len: usize) -> String {
    let mut cleaned: String = name
        .chars()
        .map(|ch| match ch {
            ':' => '：',
            '"' => '＂',
            '<' => '《',
            '>' => '》',
            '/' | '\\' => '、',
            '|' => '｜',
            '?' => '？',
            '*' => '＊',
            c if (c as u32) < 32 => replacement.chars().next().unwrap_or('_'),
            _ => ch,
        })
        .collect();

    let trim_tail = |s: &mut String| {
        while s.ends_with(' ') || s.ends_with('.') {
            s.pop();
        }
    };
    trim_tail(&mut cleaned);

    const RESERVED: [&str; 22] = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    if RESERVED.contains(&cleaned.to_uppercase().as_str()) {
        cleaned = format!("_{}", cleaned);
    }

    if cleaned.len() > max_len {
        // 多字节字符（中文）不能从中间截断
        let mut end = max_len;
        while end > 0 && !cleaned.is_char_boundary(end) {
            end -= 1;
        }
        cleaned.truncate(end);
        trim_tail(&mut cleaned);
    }

    if cleaned.is_empty() {
        cleaned.push_str("unnamed");
    }
    cleaned
}

fn default_true() -> bool {
    true
}

fn default_max_workers() -> usize {
    4
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_min_request_interval() -> f64 {
    0.5
}

fn default_min_wait_time() -> u64 {
    300
}

fn default_max_wait_time() -> u64 {
    3000
}

fn default_chapter_retries() -> u32 {
    3
}

fn default_api_base_url() -> String {
    "http://101.34.64.209:9999/api/content".to_string()
}

fn default_novel_format() -> String {
    "txt".to_string()
}

fn default_first_line_indent_em() -> f32 {
    2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_fs_name_maps_forbidden_characters() {
        assert_eq!(safe_fs_name("a/b:c?", "_", 120), "a、b：c？");
        assert_eq!(safe_fs_name("con", "_", 120), "_con");
        assert_eq!(safe_fs_name("...", "_", 120), "unnamed");
    }

    #[test]
    fn safe_fs_name_truncates_on_char_boundary() {
        let name = "番茄小说".repeat(20);
        let out = safe_fs_name(&name, "_", 10);
        assert!(out.len() <= 10);
        assert_eq!(out, "番茄小");
    }

    #[test]
    fn derived_options_follow_config() {
        let cfg = Config {
            max_workers: 0,
            min_request_interval: 0.4,
            ..Config::default()
        };
        assert_eq!(cfg.scheduler_options().max_workers, 1);
        assert_eq!(cfg.http_options().min_interval, Duration::from_millis(400));
        assert_eq!(cfg.output_format(), OutputFormat::Txt);
    }

    #[test]
    fn validate_rejects_unknown_format() {
        let cfg = Config {
            novel_format: "pdf".to_string(),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn oversized_request_interval_is_rejected_and_clamped() {
        let cfg = Config {
            min_request_interval: 1e30,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
        assert_eq!(cfg.http_options().min_interval, Duration::from_secs(3600));

        let nan = Config {
            min_request_interval: f64::NAN,
            ..Config::default()
        };
        assert!(nan.validate().is_err());
        assert_eq!(nan.http_options().min_interval, Duration::ZERO);
    }
}
