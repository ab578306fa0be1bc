// DoodStream API 客户端实现

use crate::api::{
    ApiCredential, CallKind, EndpointInfo, TransportError, UploadResponse, UploadServerResponse,
    UploadedFileInfo,
};
use crate::uploader::{RoutingState, UploadTask};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 默认 API 基地址
pub const DEFAULT_API_BASE: &str = "https://doodapi.co/api";

/// 默认 User-Agent
pub const DEFAULT_USER_AGENT: &str = "DoodStream-Uploader-01dev/1.0";

/// 发现调用超时（秒）
pub const DISCOVERY_TIMEOUT_SECS: u64 = 15;

/// 文件上传超时（秒，大文件需要充足时间）
pub const UPLOAD_TIMEOUT_SECS: u64 = 300;

/// 上传传输层接口
///
/// 调度器和重试策略只依赖该 trait，测试中以 mock 实现替换真实网络
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// 发现调用：获取本次运行的上传服务器地址
    async fn fetch_upload_server(
        &self,
        routing: &RoutingState,
    ) -> std::result::Result<String, TransportError>;

    /// 上传单个文件
    async fn upload_file(
        &self,
        endpoint: &EndpointInfo,
        task: &UploadTask,
        routing: &RoutingState,
    ) -> std::result::Result<UploadedFileInfo, TransportError>;
}

/// DoodStream API 客户端
///
/// 每个请求携带独立超时；代理路由在发起前重写目标 URL
#[derive(Debug, Clone)]
pub struct ApiClient {
    /// HTTP客户端
    client: Client,
    /// API 基地址
    base_url: String,
    /// API 凭证
    credential: ApiCredential,
    /// 发现调用超时
    discovery_timeout: Duration,
    /// 上传调用超时
    upload_timeout: Duration,
}

impl ApiClient {
    /// 创建新的 API 客户端（默认配置）
    pub fn new(credential: ApiCredential) -> Result<Self> {
        Self::with_config(
            credential,
            DEFAULT_API_BASE,
            DEFAULT_USER_AGENT,
            DISCOVERY_TIMEOUT_SECS,
            UPLOAD_TIMEOUT_SECS,
        )
    }

    /// 从应用配置创建 API 客户端
    pub fn from_config(credential: ApiCredential, config: &crate::config::ApiConfig) -> Result<Self> {
        Self::with_config(
            credential,
            &config.base_url,
            &config.user_agent,
            config.discovery_timeout_secs,
            config.upload_timeout_secs,
        )
    }

    /// 创建新的 API 客户端（完整配置）
    pub fn with_config(
        credential: ApiCredential,
        base_url: &str,
        user_agent: &str,
        discovery_timeout_secs: u64,
        upload_timeout_secs: u64,
    ) -> Result<Self> {
        info!("初始化 DoodStream 客户端: base={}, key={}", base_url, credential);

        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credential,
            discovery_timeout: Duration::from_secs(discovery_timeout_secs),
            upload_timeout: Duration::from_secs(upload_timeout_secs),
        })
    }

    /// 发现调用的目标 URL（未经代理重写）
    fn discovery_url(&self) -> String {
        format!(
            "{}/upload/server?key={}",
            self.base_url,
            self.credential.expose()
        )
    }

    /// 校验发现调用响应包体并取出上传服务器地址
    ///
    /// 包体 status != 200 走状态码消息表；status 为 200 但缺少
    /// result 时按结构不完整处理，保持可重试
    fn parse_discovery_body(
        body: UploadServerResponse,
    ) -> std::result::Result<String, TransportError> {
        if body.status != 200 {
            warn!(
                "发现调用返回异常状态: status={}, msg={}",
                body.status, body.msg
            );
            return Err(TransportError::from_status(body.status, CallKind::Discovery));
        }

        if body.result.is_empty() {
            warn!("发现调用响应缺少 result: msg={}", body.msg);
            let message = if body.msg.is_empty() {
                "Invalid response format from server".to_string()
            } else {
                body.msg
            };
            return Err(TransportError::malformed(message));
        }

        Ok(body.result)
    }

    /// 将 reqwest 错误映射为传输层错误分类
    fn map_reqwest_error(err: reqwest::Error, call: CallKind) -> TransportError {
        if err.is_timeout() {
            let message = match call {
                CallKind::Discovery => {
                    "Upload server request timeout - Please check your connection"
                }
                CallKind::Upload => {
                    "Upload timeout - File may be too large or connection too slow"
                }
            };
            return TransportError::timeout(message);
        }

        if err.is_decode() {
            return TransportError::malformed(
                "Unable to parse server response - Possible CORS restriction",
            );
        }

        // 连接失败 / DNS / 被拦截：统一归类为网络错误，
        // 该信号触发代理兜底
        TransportError::network("Failed to fetch")
    }
}

#[async_trait]
impl UploadTransport for ApiClient {
    async fn fetch_upload_server(
        &self,
        routing: &RoutingState,
    ) -> std::result::Result<String, TransportError> {
        let url = routing.rewrite(&self.discovery_url());

        if routing.use_proxy {
            info!("🔄 经由 CORS 代理请求上传服务器");
        } else {
            info!("🔍 请求上传服务器: {}/upload/server", self.base_url);
        }

        let response = self
            .client
            .get(&url)
            .timeout(self.discovery_timeout)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| Self::map_reqwest_error(e, CallKind::Discovery))?;

        let status = response.status();
        if !status.is_success() {
            warn!("发现调用失败: HTTP {}", status.as_u16());
            return Err(TransportError::from_status(
                status.as_u16(),
                CallKind::Discovery,
            ));
        }

        let body: UploadServerResponse = response.json().await.map_err(|_| {
            TransportError::malformed("Unable to parse server response - Possible CORS restriction")
        })?;

        let server = Self::parse_discovery_body(body)?;

        info!("✅ 已获取上传服务器: {}", server);
        Ok(server)
    }

    async fn upload_file(
        &self,
        endpoint: &EndpointInfo,
        task: &UploadTask,
        routing: &RoutingState,
    ) -> std::result::Result<UploadedFileInfo, TransportError> {
        let target = format!("{}?{}", endpoint.url, self.credential.expose());
        let url = routing.rewrite(&target);

        debug!(
            "上传文件: name={}, size={}, via_proxy={}",
            task.file_name, task.size_bytes, routing.use_proxy
        );

        // 构建 multipart form: api_key 文本字段 + file 文件字段
        let part = multipart::Part::bytes(task.payload.clone())
            .file_name(task.file_name.clone())
            .mime_str(&task.mime_type)
            .map_err(|_| {
                TransportError::malformed(format!("Invalid mime type: {}", task.mime_type))
            })?;

        let form = multipart::Form::new()
            .text("api_key", self.credential.expose().to_string())
            .part("file", part);

        let response = self
            .client
            .post(&url)
            .timeout(self.upload_timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Self::map_reqwest_error(e, CallKind::Upload))?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                "上传失败: name={}, HTTP {}",
                task.file_name,
                status.as_u16()
            );
            return Err(TransportError::from_status(status.as_u16(), CallKind::Upload));
        }

        let body: UploadResponse = response
            .json()
            .await
            .map_err(|_| TransportError::malformed("Invalid response format from server"))?;

        if body.status != 200 {
            return Err(TransportError::from_status(body.status, CallKind::Upload));
        }

        let info = body.result.into_iter().next().ok_or_else(|| {
            TransportError::malformed("Invalid response format from server")
        })?;

        debug!(
            "✓ 上传成功: name={}, filecode={}",
            task.file_name, info.filecode
        );
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TransportErrorKind;

    fn test_client() -> ApiClient {
        let cred = ApiCredential::new("abc123def456").unwrap();
        ApiClient::new(cred).unwrap()
    }

    #[test]
    fn test_discovery_url_contains_credential() {
        let client = test_client();
        assert_eq!(
            client.discovery_url(),
            "https://doodapi.co/api/upload/server?key=abc123def456"
        );
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let cred = ApiCredential::new("abc123def456").unwrap();
        let client =
            ApiClient::with_config(cred, "https://doodapi.co/api/", DEFAULT_USER_AGENT, 15, 300)
                .unwrap();
        assert_eq!(
            client.discovery_url(),
            "https://doodapi.co/api/upload/server?key=abc123def456"
        );
    }

    fn discovery_body(status: u16, msg: &str, result: &str) -> UploadServerResponse {
        UploadServerResponse {
            status,
            msg: msg.to_string(),
            result: result.to_string(),
        }
    }

    #[test]
    fn test_discovery_body_extracts_server_url() {
        let server =
            ApiClient::parse_discovery_body(discovery_body(200, "", "https://s1.example/upload"))
                .unwrap();
        assert_eq!(server, "https://s1.example/upload");
    }

    #[test]
    fn test_discovery_body_missing_result_is_retryable() {
        // 包体 status 为 200 但 result 为空：结构不完整，必须保持可重试
        let err = ApiClient::parse_discovery_body(discovery_body(200, "", "")).unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::MalformedResponse);
        assert!(err.is_retriable());
        assert_eq!(err.message, "Invalid response format from server");

        // 服务端给出 msg 时优先透传
        let err = ApiClient::parse_discovery_body(discovery_body(200, "no server available", ""))
            .unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::MalformedResponse);
        assert_eq!(err.message, "no server available");
    }

    #[test]
    fn test_discovery_body_error_status_maps_through_table() {
        let err = ApiClient::parse_discovery_body(discovery_body(401, "", "")).unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Unauthorized);
        assert!(!err.is_retriable());

        let err = ApiClient::parse_discovery_body(discovery_body(500, "", "")).unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::HttpStatus(500));
        assert!(err.is_retriable());
    }
}
