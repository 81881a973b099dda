//! HTTP 传输层：共享客户端构建与瞬时错误的退避重试。
//!
//! 重试只覆盖瞬时故障（连接错误、500/502/504）；403/404 与内容级错误
//! 立即按分类返回，由下载层决定如何收场。

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};

use crate::base_system::context::Config;

/// 单页获取与后处理的错误分类。
#[derive(Debug, Error)]
pub enum PageError {
    /// 瞬时网络错误，重试耗尽后仍按单页失败处理。
    #[error("transient transport error: {0}")]
    Transient(String),
    /// 源站明确不再提供该页（HTTP 403/404）。
    #[error("page not served (http {0})")]
    NotFound(u16),
    /// 响应拿到了但内容不可用（HTML 错误页、解密失败等）。
    #[error("page unavailable: {0}")]
    Unavailable(String),
}

pub fn build_client(config: &Config) -> anyhow::Result<Client> {
    let mut default_headers = HeaderMap::new();
    default_headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&config.user_agent)
            .unwrap_or(HeaderValue::from_static("Mozilla/5.0")),
    );

    let client = Client::builder()
        .default_headers(default_headers)
        .cookie_store(true)
        .timeout(config.request_timeout())
        .build()?;
    Ok(client)
}

/// 带退避重试的 GET，返回响应体字节与响应头。
///
/// 退避从 1s 起倍增，上限 8s。`max_retries` 只约束瞬时错误。
pub async fn get_response_with_retry(
    client: &Client,
    url: &str,
    headers: &HeaderMap,
    max_retries: u32,
) -> Result<(Vec<u8>, HeaderMap), PageError> {
    let attempts = max_retries.max(1) + 1;
    let mut delay = Duration::from_millis(1000);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        if attempt > 1 {
            debug!("重试第 {} 次: {}", attempt - 1, url);
            tokio::time::sleep(delay).await;
            delay = std::cmp::min(delay * 2, Duration::from_secs(8));
        }

        let response = match client.get(url).headers(headers.clone()).send().await {
            Ok(r) => r,
            Err(e) => {
                // 连接/超时类错误视为瞬时，进入下一轮
                last_error = e.to_string();
                continue;
            }
        };

        let status = response.status();
        match classify_status(status) {
            StatusClass::Ok => {
                let response_headers = response.headers().clone();
                return response
                    .bytes()
                    .await
                    .map(|b| (b.to_vec(), response_headers))
                    .map_err(|e| PageError::Transient(e.to_string()));
            }
            StatusClass::Transient => {
                last_error = format!("http {}", status.as_u16());
                warn!("服务端错误 {}（将重试）: {}", status.as_u16(), url);
                continue;
            }
            StatusClass::Gone => return Err(PageError::NotFound(status.as_u16())),
            StatusClass::Rejected => {
                return Err(PageError::Unavailable(format!("http {}", status.as_u16())));
            }
        }
    }

    Err(PageError::Transient(last_error))
}

/// 只关心响应体时的便捷封装。
pub async fn get_bytes_with_retry(
    client: &Client,
    url: &str,
    headers: &HeaderMap,
    max_retries: u32,
) -> Result<Vec<u8>, PageError> {
    get_response_with_retry(client, url, headers, max_retries)
        .await
        .map(|(bytes, _)| bytes)
}

enum StatusClass {
    Ok,
    Transient,
    Gone,
    Rejected,
}

fn classify_status(status: StatusCode) -> StatusClass {
    match status.as_u16() {
        200..=299 => StatusClass::Ok,
        500 | 502 | 504 => StatusClass::Transient,
        403 | 404 => StatusClass::Gone,
        _ => StatusClass::Rejected,
    }
}

/// 判断应为图片二进制的响应体是否其实是 HTML 错误页。
pub fn looks_like_html(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(512)];
    let trimmed: Vec<u8> = head
        .iter()
        .skip_while(|b| b.is_ascii_whitespace())
        .map(|b| b.to_ascii_lowercase())
        .collect();
    trimmed.starts_with(b"<!doctype") || trimmed.starts_with(b"<html") || trimmed.starts_with(b"<head")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_payload_detected() {
        assert!(looks_like_html(b"<!DOCTYPE html><html></html>"));
        assert!(looks_like_html(b"\n  <html lang=\"fr\">"));
        assert!(!looks_like_html(&[0xFF, 0xD8, 0xFF, 0xE0]));
        assert!(!looks_like_html(b""));
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            StatusClass::Transient
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY),
            StatusClass::Transient
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND),
            StatusClass::Gone
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN),
            StatusClass::Gone
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED),
            StatusClass::Rejected
        ));
        assert!(matches!(classify_status(StatusCode::OK), StatusClass::Ok));
    }
}
