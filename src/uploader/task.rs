// 上传任务定义与文件校验

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 单文件大小上限（500 MiB，DoodAPI 限制）
pub const MAX_FILE_SIZE: u64 = 500 * 1024 * 1024;

/// 允许的 MIME 类型前缀
pub const ALLOWED_MIME_PREFIXES: [&str; 5] = [
    "video/",
    "audio/",
    "image/",
    "application/zip",
    "application/rar",
];

/// 媒体类别（由 MIME 类型推断）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// 视频
    Video,
    /// 音频
    Audio,
    /// 图片
    Image,
    /// 压缩包（zip / rar）
    Archive,
    /// 其他
    Other,
}

impl MediaKind {
    /// 从 MIME 类型推断媒体类别
    pub fn from_mime(mime_type: &str) -> Self {
        if mime_type.starts_with("video/") {
            MediaKind::Video
        } else if mime_type.starts_with("audio/") {
            MediaKind::Audio
        } else if mime_type.starts_with("image/") {
            MediaKind::Image
        } else if mime_type.starts_with("application/zip")
            || mime_type.starts_with("application/rar")
        {
            MediaKind::Archive
        } else {
            MediaKind::Other
        }
    }
}

/// 上传任务
///
/// 只能通过 `validate` 创建；文件名是待上传集合内的唯一键
#[derive(Debug, Clone)]
pub struct UploadTask {
    /// 任务ID（日志追踪用）
    pub id: String,
    /// 文件名（唯一键）
    pub file_name: String,
    /// 文件内容
    pub payload: Vec<u8>,
    /// 文件大小（字节）
    pub size_bytes: u64,
    /// MIME 类型
    pub mime_type: String,
    /// 媒体类别
    pub media_kind: MediaKind,
}

impl UploadTask {
    /// 校验并创建上传任务
    ///
    /// 拒绝超过 500 MiB 的文件和不在允许前缀内的 MIME 类型，
    /// 拒绝理由与原因一起返回
    pub fn validate(
        file_name: impl Into<String>,
        payload: Vec<u8>,
        mime_type: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let file_name = file_name.into();
        let mime_type = mime_type.into();
        let size_bytes = payload.len() as u64;

        if file_name.is_empty() {
            return Err(ValidationError::EmptyFileName);
        }

        if size_bytes > MAX_FILE_SIZE {
            return Err(ValidationError::TooLarge {
                file_name,
                size_bytes,
            });
        }

        if !ALLOWED_MIME_PREFIXES
            .iter()
            .any(|prefix| mime_type.starts_with(prefix))
        {
            return Err(ValidationError::UnsupportedType {
                file_name,
                mime_type,
            });
        }

        let media_kind = MediaKind::from_mime(&mime_type);

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            file_name,
            payload,
            size_bytes,
            mime_type,
            media_kind,
        })
    }
}

/// 文件校验错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// 文件名为空
    EmptyFileName,
    /// 文件超过大小上限
    TooLarge { file_name: String, size_bytes: u64 },
    /// MIME 类型不在允许列表内
    UnsupportedType {
        file_name: String,
        mime_type: String,
    },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::EmptyFileName => write!(f, "File name is empty"),
            ValidationError::TooLarge {
                file_name,
                size_bytes,
            } => write!(
                f,
                "{}: File too large ({} bytes). Max: 500MB",
                file_name, size_bytes
            ),
            ValidationError::UnsupportedType {
                file_name,
                mime_type,
            } => write!(f, "{}: File type not supported: {}", file_name, mime_type),
        }
    }
}

impl std::error::Error for ValidationError {}

/// 终端失败记录
///
/// 重试耗尽或不可重试错误时生成，供手动重试流程消费
#[derive(Debug, Clone)]
pub struct FailureRecord {
    /// 失败的任务（保留内容，手动重试直接复用）
    pub task: UploadTask,
    /// 失败原因
    pub reason: String,
    /// 是否被判定为不可重试
    pub non_retryable: bool,
}
