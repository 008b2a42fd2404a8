//! 下载用 HTTP 客户端与远端能力探测

use super::item::DownloadLink;
use crate::error::{DownloadError, Result};
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{Client, RequestBuilder, StatusCode};
use std::time::Duration;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("cloud-mirror/", env!("CARGO_PKG_VERSION"));

/// 创建下载用的 HTTP 客户端
///
/// 单次请求的超时在发送时按分片大小单独设置
pub fn create_download_client() -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(64)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .tcp_nodelay(true)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
}

/// 根据分片大小计算合理的超时时间（秒）
///
/// 假设最低速度为 100KB/s，结果限制在 60 到 600 秒之间
pub fn calculate_timeout_secs(chunk_size: u64) -> u64 {
    const MIN_SPEED_KBPS: u64 = 100;
    const MIN_TIMEOUT: u64 = 60;
    const MAX_TIMEOUT: u64 = 600;

    let expected_secs = (chunk_size / (MIN_SPEED_KBPS * 1024)) * 3;
    expected_secs.clamp(MIN_TIMEOUT, MAX_TIMEOUT)
}

/// 附加鉴权头
pub fn authorize(builder: RequestBuilder, link: &DownloadLink) -> RequestBuilder {
    match &link.bearer_token {
        Some(token) => builder.bearer_auth(token),
        None => builder,
    }
}

/// 探测结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    /// 远端报告的文件大小
    pub size: u64,
    /// 是否支持 Range 请求
    pub supports_range: bool,
}

fn header_u64(headers: &reqwest::header::HeaderMap, name: reqwest::header::HeaderName) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// 解析 `Content-Range: bytes 0-1/1234567` 中的总长度
pub fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit('/').next()?.trim().parse().ok()
}

/// 探测远端文件大小与 Range 支持
///
/// 1. `HEAD` 读取 `Content-Length`
/// 2. `GET Range: bytes=0-1`：206 表示支持 Range，200 表示不支持（回退单流下载），416 视为远端文件已变化
///
/// `expected_size` 为目录遍历得到的大小，远端大小与之不符时返回协议不匹配
pub async fn probe(
    client: &Client,
    link: &DownloadLink,
    expected_size: u64,
    timeout: Duration,
) -> Result<ProbeResult> {
    let head = authorize(client.head(&link.url), link)
        .timeout(timeout)
        .send()
        .await
        .map_err(DownloadError::from_reqwest)?;

    let head_status = head.status();
    let head_length = if head_status.is_success() {
        header_u64(head.headers(), CONTENT_LENGTH)
    } else if matches!(
        head_status,
        StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED
    ) {
        debug!("远端不支持 HEAD ({}), 改用 Range 探测", head_status);
        None
    } else {
        return Err(DownloadError::from_status(head_status));
    };

    let response = authorize(client.get(&link.url), link)
        .header(RANGE, "bytes=0-1")
        .timeout(timeout)
        .send()
        .await
        .map_err(DownloadError::from_reqwest)?;

    let status = response.status();
    debug!("📡 探测响应状态: {}", status);

    let (supports_range, fallback_length) = match status {
        StatusCode::PARTIAL_CONTENT => {
            let total = response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range_total);
            (true, total)
        }
        StatusCode::OK => {
            warn!("⚠️ 远端不支持 Range 请求，回退为单流下载: {}", link.url);
            (false, header_u64(response.headers(), CONTENT_LENGTH))
        }
        other => return Err(DownloadError::from_status(other)),
    };
    // 不读取探测响应体
    drop(response);

    let size = head_length.or(fallback_length).ok_or_else(|| {
        DownloadError::ProtocolMismatch(format!("远端未返回文件大小: {}", link.url))
    })?;

    if size != expected_size {
        return Err(DownloadError::ProtocolMismatch(format!(
            "文件大小不匹配: 远端 {} bytes, 期望 {} bytes",
            size, expected_size
        )));
    }

    info!(
        "✅ 探测完成: {} bytes, Range 支持: {}",
        size, supports_range
    );
    Ok(ProbeResult {
        size,
        supports_range,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_timeout() {
        assert_eq!(calculate_timeout_secs(1024), 60);
        assert_eq!(calculate_timeout_secs(10 * 1024 * 1024), 306);
        assert_eq!(calculate_timeout_secs(1024 * 1024 * 1024), 600);
    }

    #[test]
    fn test_parse_content_range() {
        assert_eq!(parse_content_range_total("bytes 0-1/1234567"), Some(1234567));
        assert_eq!(parse_content_range_total("bytes 0-1/*"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }

    #[test]
    fn test_client_builds() {
        assert!(create_download_client().is_ok());
    }
}
