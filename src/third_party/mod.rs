//! 第三方 API 接入：HTTP 客户端与响应解析。

pub mod client;
pub mod response;
