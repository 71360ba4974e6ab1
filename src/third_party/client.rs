//! 第三方 API 客户端（HTTP 适配层）。
//!
//! 所有出站请求都经过这里：统一的超时、失败重试与请求间隔节流。
//! 每一次实际发出的请求（包括重试）都会占用一个节流槽位，无论成功与否。

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONNECTION, HeaderMap, HeaderValue, REFERER, USER_AGENT};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::response::{self, BookDetail, BookSummary, PayloadError};
use crate::base_system::context::HttpOptions;

/// 四种互斥的查询方式，对应接口的 `q` / `xq` / `mulu` / `content` 参数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiQuery<'a> {
    Search(&'a str),
    Detail(&'a str),
    Directory(&'a str),
    Content(&'a str),
}

impl<'a> ApiQuery<'a> {
    pub fn param(&self) -> (&'static str, &'a str) {
        match *self {
            Self::Search(v) => ("q", v),
            Self::Detail(v) => ("xq", v),
            Self::Directory(v) => ("mulu", v),
            Self::Content(v) => ("content", v),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("网络请求失败（共尝试 {attempts} 次）: {message}")]
    Network { attempts: u32, message: String },
    #[error("无效请求: {0}")]
    Request(String),
    #[error("响应格式错误: {0}")]
    Payload(#[from] PayloadError),
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// 超时、连接失败等，可以重试。
    #[error("{0}")]
    Io(String),
    /// URL 不合法等，重试没有意义。
    #[error("{0}")]
    Invalid(String),
}

/// 单次 GET 的底层实现。默认为 reqwest，测试中替换为脚本化实现。
pub trait Transport: Send + Sync {
    fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<TransportResponse, TransportError>;
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/javascript, */*; q=0.01"),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7"),
        );
        headers.insert(REFERER, HeaderValue::from_static("https://fanqienovel.com/"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            ),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| ApiError::Request(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<TransportResponse, TransportError> {
        let classify = |e: reqwest::Error| {
            if e.is_builder() {
                TransportError::Invalid(e.to_string())
            } else {
                TransportError::Io(e.to_string())
            }
        };
        let resp = self.client.get(url).query(query).send().map_err(classify)?;
        let status = resp.status().as_u16();
        let body = resp.bytes().map_err(classify)?;
        Ok(TransportResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// 单次尝试的结果：重试策略是对这个值的显式循环，而不是异常展开。
enum Attempt<T> {
    Success(T),
    Retryable(String),
    Fatal(ApiError),
}

/// 上一次请求时间戳闸门：保证任意两次出站请求之间至少间隔 `min_interval`。
struct RateGate {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateGate {
    fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    fn wait(&self) {
        // 持锁等待，多个 worker 会在这里排队
        let mut last = match self.last.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                std::thread::sleep(self.min_interval - elapsed);
            }
        }
        *last = Some(Instant::now());
    }
}

pub struct ApiClient {
    transport: Arc<dyn Transport>,
    options: HttpOptions,
    gate: RateGate,
}

impl ApiClient {
    pub fn new(options: HttpOptions) -> Result<Self, ApiError> {
        let transport = ReqwestTransport::new(options.timeout)?;
        Ok(Self::with_transport(options, Arc::new(transport)))
    }

    pub fn with_transport(options: HttpOptions, transport: Arc<dyn Transport>) -> Self {
        let gate = RateGate::new(options.min_interval);
        Self {
            transport,
            options,
            gate,
        }
    }

    /// 发起一次 API 查询并返回 JSON 响应体。
    pub fn fetch(&self, query: ApiQuery<'_>) -> Result<Value, ApiError> {
        let (key, value) = query.param();
        let value = value.trim();
        if value.is_empty() {
            return Err(ApiError::Request(format!("查询参数 {key} 为空")));
        }
        let base = self.options.base_url.as_str();
        self.with_retries(key, || match self.transport.get(base, &[(key, value)]) {
            Ok(resp) if is_success(resp.status) => match serde_json::from_slice::<Value>(&resp.body) {
                Ok(v) => Attempt::Success(v),
                Err(e) => Attempt::Retryable(format!("JSON 解析失败: {e}")),
            },
            Ok(resp) => Attempt::Retryable(format!("HTTP {}", resp.status)),
            Err(TransportError::Io(msg)) => Attempt::Retryable(msg),
            Err(TransportError::Invalid(msg)) => Attempt::Fatal(ApiError::Request(msg)),
        })
    }

    /// 下载任意资源（封面图片等），与 API 请求共用节流与重试策略。
    pub fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ApiError::Request("url 为空".to_string()));
        }
        self.with_retries("bytes", || match self.transport.get(url, &[]) {
            Ok(resp) if is_success(resp.status) => Attempt::Success(resp.body),
            Ok(resp) => Attempt::Retryable(format!("HTTP {}", resp.status)),
            Err(TransportError::Io(msg)) => Attempt::Retryable(msg),
            Err(TransportError::Invalid(msg)) => Attempt::Fatal(ApiError::Request(msg)),
        })
    }

    pub fn search(&self, keyword: &str) -> Result<Vec<BookSummary>, ApiError> {
        let value = self.fetch(ApiQuery::Search(keyword))?;
        Ok(response::parse_search(&value)?)
    }

    pub fn book_detail(&self, book_id: &str) -> Result<BookDetail, ApiError> {
        let value = self.fetch(ApiQuery::Detail(book_id))?;
        Ok(response::parse_detail(&value)?)
    }

    fn with_retries<T>(&self, what: &str, mut attempt: impl FnMut() -> Attempt<T>) -> Result<T, ApiError> {
        let tries = self.options.max_retries.saturating_add(1);
        let mut last_error = String::new();

        for n in 0..tries {
            self.gate.wait();
            match attempt() {
                Attempt::Success(v) => return Ok(v),
                Attempt::Fatal(e) => return Err(e),
                Attempt::Retryable(msg) => {
                    debug!(target: "api", what, attempt = n + 1, error = %msg, "请求失败");
                    last_error = msg;
                    if n + 1 < tries {
                        self.sleep_backoff(n);
                    }
                }
            }
        }

        warn!(target: "api", what, attempts = tries, error = %last_error, "请求重试耗尽");
        Err(ApiError::Network {
            attempts: tries,
            message: last_error,
        })
    }

    fn sleep_backoff(&self, attempt: u32) {
        let min = self.options.min_backoff;
        if min.is_zero() {
            return;
        }
        let factor = 1u32.checked_shl(attempt.min(10)).unwrap_or(u32::MAX);
        let wait = min.saturating_mul(factor).min(self.options.max_backoff.max(min));
        std::thread::sleep(wait);
    }
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}
