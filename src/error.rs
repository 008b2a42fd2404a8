//! 下载错误类型

use reqwest::StatusCode;
use thiserror::Error;

/// 错误分类
///
/// 调度层据此决定重试、重启或直接失败
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 网络瞬时错误（超时、连接重置、5xx）
    Transient,
    /// 协议不匹配（416、缺少 Content-Length、大小变化）
    Protocol,
    /// 本地 IO 错误
    LocalIo,
    /// 调用方违反约定（非法状态转换等），属于程序错误
    Contract,
    /// 性能监控判定停滞
    Stall,
    /// 远端 API 错误（链接解析、目录遍历）
    Remote,
    /// 主动取消
    Cancelled,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("网络错误: {0}")]
    Transient(String),

    #[error("下载链接已失效 (HTTP {status})")]
    LinkExpired { status: u16 },

    #[error("HTTP 请求失败: {status}")]
    Http { status: u16 },

    #[error("远端文件已变化 (HTTP 416 Range Not Satisfiable)")]
    RangeNotSatisfiable,

    #[error("协议不匹配: {0}")]
    ProtocolMismatch(String),

    #[error("文件读写失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("校验失败: 期望 {expected:08x}, 实际 {actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("下载停滞: {0}")]
    Stalled(String),

    #[error("远端服务错误: {0}")]
    Remote(String),

    #[error("非法状态转换: {0}")]
    InvalidTransition(String),

    #[error("下载已在进行中")]
    AlreadyRunning,

    #[error("下载已完成")]
    AlreadyCompleted,

    #[error("未找到: {0}")]
    NotFound(String),

    #[error("非法路径: {0}")]
    InvalidPath(String),

    #[error("重复的文件: {0}")]
    DuplicateItem(String),

    #[error("已取消")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, DownloadError>;

impl DownloadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DownloadError::Transient(_) | DownloadError::LinkExpired { .. } => ErrorKind::Transient,
            DownloadError::Http { .. }
            | DownloadError::RangeNotSatisfiable
            | DownloadError::ProtocolMismatch(_)
            | DownloadError::ChecksumMismatch { .. } => ErrorKind::Protocol,
            DownloadError::Io(_) => ErrorKind::LocalIo,
            DownloadError::InvalidTransition(_)
            | DownloadError::AlreadyRunning
            | DownloadError::AlreadyCompleted
            | DownloadError::NotFound(_)
            | DownloadError::InvalidPath(_)
            | DownloadError::DuplicateItem(_) => ErrorKind::Contract,
            DownloadError::Stalled(_) => ErrorKind::Stall,
            DownloadError::Remote(_) => ErrorKind::Remote,
            DownloadError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// 是否可由新的 Worker 重试同一分片
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// 非 2xx 响应码分类
    ///
    /// - 408/425/429/5xx: 瞬时错误
    /// - 401/403: 链接过期，需要重新解析
    /// - 416: 远端文件变化
    /// - 其他 4xx: 不可重试
    pub fn from_status(status: StatusCode) -> Self {
        let code = status.as_u16();
        match code {
            401 | 403 => DownloadError::LinkExpired { status: code },
            416 => DownloadError::RangeNotSatisfiable,
            408 | 425 | 429 => DownloadError::Transient(format!("HTTP {}", code)),
            _ if status.is_server_error() => DownloadError::Transient(format!("HTTP {}", code)),
            _ => DownloadError::Http { status: code },
        }
    }

    /// 发送请求或读取响应体时的 reqwest 错误
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status);
        }
        DownloadError::Transient(err.to_string())
    }
}
