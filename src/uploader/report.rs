// 结果构建与诊断报告

use crate::api::{TransportError, UploadedFileInfo};
use crate::uploader::{FailureRecord, UploadTask};
use serde::{Deserialize, Serialize};

/// 规范化的上传结果
///
/// 服务端原始字段的 1:1 重命名，除改名外不做任何转换
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResult {
    /// 文件标题
    pub title: String,
    /// 文件代码
    pub file_code: String,
    /// 下载页链接
    pub download_url: String,
    /// 嵌入播放链接
    pub embed_url: String,
    /// 受保护的下载链接
    pub protected_download_url: String,
    /// 缩略图链接
    pub thumbnail_url: String,
    /// 封面图链接
    pub splash_url: String,
    /// 文件大小（字节）
    pub size_bytes: u64,
    /// 时长（秒）
    pub duration_seconds: f64,
    /// 上传时间（服务端格式化字符串）
    pub uploaded_at: String,
}

/// 诊断上下文
///
/// 构建诊断报告需要的会话快照；在线状态由胶水层提供
/// （核心无法探测浏览器的联网状态），未知时为 None
#[derive(Debug, Clone)]
pub struct DiagnosticsContext {
    /// 网络在线状态（None 表示未知）
    pub online: Option<bool>,
    /// 凭证长度
    pub credential_len: usize,
    /// 凭证前缀（4 位掩码）
    pub credential_prefix: String,
    /// 代理路由是否启用
    pub proxy_enabled: bool,
}

/// 从服务端原始载荷构建规范化结果（纯字段重命名）
pub fn build_result(info: &UploadedFileInfo) -> UploadResult {
    UploadResult {
        title: info.title.clone(),
        file_code: info.filecode.clone(),
        download_url: info.download_url.clone(),
        embed_url: info.protected_embed.clone(),
        protected_download_url: info.protected_dl.clone(),
        thumbnail_url: info.single_img.clone(),
        splash_url: info.splash_img.clone(),
        size_bytes: info.size,
        duration_seconds: info.length,
        uploaded_at: info.uploaded.clone(),
    }
}

/// 构建终端失败记录
pub fn build_failure(task: UploadTask, reason: impl Into<String>, non_retryable: bool) -> FailureRecord {
    FailureRecord {
        task,
        reason: reason.into(),
        non_retryable,
    }
}

/// 构建运行级失败的诊断报告
///
/// 仅在整次运行无法恢复时使用（发现调用重试耗尽）。
/// 报告展示凭证长度和 4 位前缀，绝不包含完整凭证
pub fn build_diagnostics(error: &TransportError, ctx: &DiagnosticsContext) -> String {
    let online = match ctx.online {
        Some(true) => "Connected",
        Some(false) => "Offline",
        None => "Unknown",
    };

    [
        "\n🚫 UPLOAD FAILED - Detailed Error Report".to_string(),
        "\n📊 Error Analysis:".to_string(),
        format!("- Primary Issue: {}", error.message),
        format!("- Error Type: {}", error.kind.name()),
        "\n🔍 System Information:".to_string(),
        format!("- Online Status: {}", online),
        format!("- API Key Length: {} characters", ctx.credential_len),
        format!(
            "- CORS Proxy: {}",
            if ctx.proxy_enabled { "Enabled" } else { "Disabled" }
        ),
        format!("- Timestamp: {}", chrono::Utc::now().to_rfc3339()),
        "\n🛠️ Troubleshooting Steps:".to_string(),
        "1. 🌐 Enable the CORS proxy routing".to_string(),
        format!("2. 🔑 Verify API key is correct: {}...", ctx.credential_prefix),
        "3. 🛡️ Disable browser extensions (especially ad blockers)".to_string(),
        "4. 🔄 Try refreshing the page".to_string(),
        "5. 🌍 Try a different browser or incognito mode".to_string(),
    ]
    .join("\n")
}
