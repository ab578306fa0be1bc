// DoodStream API 数据类型与传输层错误分类

use serde::{Deserialize, Serialize};

/// 请求类别
///
/// 发现调用（获取上传服务器）与文件上传调用使用不同的超时、
/// 退避表和错误消息表
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// 发现调用：获取本次运行的上传服务器地址
    Discovery,
    /// 文件上传调用
    Upload,
}

/// 传输层错误分类
///
/// 在传输层边界一次性确定，重试策略只检查分类标签，
/// 不对错误文本做子串匹配
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// 网络错误（连接失败 / DNS / 跨域拦截，可重试，触发代理兜底）
    Network,
    /// 请求超时（可重试）
    Timeout,
    /// 限流（HTTP 429，可重试，需要更长等待时间）
    RateLimited,
    /// 认证失败（HTTP 401，不可重试）
    Unauthorized,
    /// 权限不足（HTTP 403，不可重试）
    Forbidden,
    /// 参数错误（HTTP 400，不可重试）
    BadRequest,
    /// 服务端返回的其他 HTTP 状态码
    HttpStatus(u16),
    /// 响应体无法解析为预期的 JSON 结构（可能是 CORS 限制）
    MalformedResponse,
    /// 未知错误
    Unknown,
}

impl TransportErrorKind {
    /// 是否可重试
    ///
    /// 非 5xx 的 HttpStatus（如 413）重试不可能成功，直接终止
    pub fn is_retriable(&self) -> bool {
        match self {
            TransportErrorKind::Network
            | TransportErrorKind::Timeout
            | TransportErrorKind::RateLimited
            | TransportErrorKind::MalformedResponse
            | TransportErrorKind::Unknown => true,
            TransportErrorKind::HttpStatus(code) => (500..=599).contains(code),
            TransportErrorKind::Unauthorized
            | TransportErrorKind::Forbidden
            | TransportErrorKind::BadRequest => false,
        }
    }

    /// 从 HTTP 状态码转换
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => TransportErrorKind::BadRequest,
            401 => TransportErrorKind::Unauthorized,
            403 => TransportErrorKind::Forbidden,
            429 => TransportErrorKind::RateLimited,
            other => TransportErrorKind::HttpStatus(other),
        }
    }

    /// 分类名称（用于诊断报告）
    pub fn name(&self) -> String {
        match self {
            TransportErrorKind::Network => "Network".to_string(),
            TransportErrorKind::Timeout => "Timeout".to_string(),
            TransportErrorKind::RateLimited => "RateLimited".to_string(),
            TransportErrorKind::Unauthorized => "Unauthorized".to_string(),
            TransportErrorKind::Forbidden => "Forbidden".to_string(),
            TransportErrorKind::BadRequest => "BadRequest".to_string(),
            TransportErrorKind::HttpStatus(code) => format!("HttpStatus({})", code),
            TransportErrorKind::MalformedResponse => "MalformedResponse".to_string(),
            TransportErrorKind::Unknown => "Unknown".to_string(),
        }
    }
}

/// 传输层错误
///
/// 始终作为值返回，永不 panic，以便重试策略检查分类
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    /// 错误分类
    pub kind: TransportErrorKind,
    /// 人类可读的错误消息
    pub message: String,
    /// HTTP 状态码（如果有）
    pub http_status: Option<u16>,
}

impl TransportError {
    /// 创建网络错误（代理兜底的触发信号）
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Network,
            message: message.into(),
            http_status: None,
        }
    }

    /// 创建超时错误
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Timeout,
            message: message.into(),
            http_status: None,
        }
    }

    /// 创建响应解析错误
    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::MalformedResponse,
            message: message.into(),
            http_status: None,
        }
    }

    /// 从 HTTP/接口状态码创建错误，消息来自固定的状态码消息表
    pub fn from_status(status: u16, call: CallKind) -> Self {
        Self {
            kind: TransportErrorKind::from_status(status),
            message: status_message(status, call),
            http_status: Some(status),
        }
    }

    /// 是否可重试
    pub fn is_retriable(&self) -> bool {
        self.kind.is_retriable()
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TransportError {}

/// 固定的状态码 → 错误消息表
///
/// 消息与上游 DoodAPI 各状态码的语义一一对应，
/// 发现调用与上传调用使用不同的文案
fn status_message(status: u16, call: CallKind) -> String {
    match call {
        CallKind::Discovery => match status {
            401 => "Invalid API key - Please check your credentials".to_string(),
            403 => "API access forbidden - Check account status".to_string(),
            429 => "Rate limit exceeded - Please wait before retrying".to_string(),
            500 => "DoodAPI server error - Please try again later".to_string(),
            other => format!("Failed to get upload server ({})", other),
        },
        CallKind::Upload => match status {
            400 => "Bad request - Invalid file or API key".to_string(),
            401 => "Unauthorized - Invalid or expired API key".to_string(),
            403 => "Forbidden - Access denied or quota exceeded".to_string(),
            413 => "File too large for upload".to_string(),
            429 => "Rate limit exceeded - Please wait before retrying".to_string(),
            500 => "Server error - Please try again later".to_string(),
            503 => "Service unavailable - Server temporarily down".to_string(),
            other => format!("HTTP error! status: {}", other),
        },
    }
}

/// 发现调用响应
///
/// `GET {base}/upload/server?key={credential}` 的 JSON 包体
#[derive(Debug, Clone, Deserialize)]
pub struct UploadServerResponse {
    /// 接口状态码（200 表示成功）
    pub status: u16,

    /// 错误信息
    #[serde(default)]
    pub msg: String,

    /// 上传服务器地址
    #[serde(default)]
    pub result: String,
}

/// 上传调用响应
#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    /// 接口状态码（200 表示成功）
    pub status: u16,

    /// 错误信息
    #[serde(default)]
    pub msg: String,

    /// 上传结果列表（正常情况下恰好一个元素）
    #[serde(default)]
    pub result: Vec<UploadedFileInfo>,
}

/// 服务端返回的单个文件上传结果（原始字段）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFileInfo {
    /// 文件标题
    #[serde(default)]
    pub title: String,

    /// 文件代码（分享链接的主体）
    #[serde(default)]
    pub filecode: String,

    /// 文件大小（字节）
    #[serde(default)]
    pub size: u64,

    /// 时长（秒）
    #[serde(default)]
    pub length: f64,

    /// 上传时间（服务端格式化字符串）
    #[serde(default)]
    pub uploaded: String,

    /// 下载页链接
    #[serde(default)]
    pub download_url: String,

    /// 受保护的嵌入播放链接
    #[serde(default)]
    pub protected_embed: String,

    /// 受保护的下载链接
    #[serde(default)]
    pub protected_dl: String,

    /// 单帧缩略图
    #[serde(default)]
    pub single_img: String,

    /// 封面图
    #[serde(default)]
    pub splash_img: String,
}

/// 本次运行使用的上传端点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    /// 上传服务器地址（发现调用返回）
    pub url: String,
    /// 是否经由代理获得
    pub via_proxy: bool,
}
