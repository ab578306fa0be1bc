// 配置管理模块

use crate::api::{
    DEFAULT_API_BASE, DEFAULT_USER_AGENT, DISCOVERY_TIMEOUT_SECS, UPLOAD_TIMEOUT_SECS,
};
use crate::uploader::routing::{FallbackScope, DEFAULT_PROXY_PREFIX};
use crate::uploader::retry::DEFAULT_MAX_ATTEMPTS;
use crate::uploader::scheduler::{DEFAULT_CONCURRENCY, DEFAULT_RATE_LIMIT_MS};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploaderConfig {
    /// API 配置
    #[serde(default)]
    pub api: ApiConfig,
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// API 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API 基地址
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// 请求 User-Agent
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// 发现调用超时（秒）
    #[serde(default = "default_discovery_timeout_secs")]
    pub discovery_timeout_secs: u64,
    /// 文件上传超时（秒）
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
    /// CORS 中继前缀
    #[serde(default = "default_proxy_prefix")]
    pub proxy_prefix: String,
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 并发上传数
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// 限速间隔（毫秒/任务），批间延迟 = 限速间隔 × 并发数
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,
    /// 每个文件的最大尝试次数
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// 代理兜底的触发范围
    #[serde(default)]
    pub fallback_scope: FallbackScope,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_base_url() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_discovery_timeout_secs() -> u64 {
    DISCOVERY_TIMEOUT_SECS
}

fn default_upload_timeout_secs() -> u64 {
    UPLOAD_TIMEOUT_SECS
}

fn default_proxy_prefix() -> String {
    DEFAULT_PROXY_PREFIX.to_string()
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_rate_limit_ms() -> u64 {
    DEFAULT_RATE_LIMIT_MS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_log_enabled() -> bool {
    false
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            discovery_timeout_secs: default_discovery_timeout_secs(),
            upload_timeout_secs: default_upload_timeout_secs(),
            proxy_prefix: default_proxy_prefix(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            rate_limit_ms: default_rate_limit_ms(),
            max_attempts: default_max_attempts(),
            fallback_scope: FallbackScope::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            level: default_log_level(),
        }
    }
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            upload: UploadConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl UploaderConfig {
    /// 校验配置取值
    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            anyhow::bail!("配置无效：api.base_url 不能为空");
        }
        if self.api.discovery_timeout_secs == 0 || self.api.upload_timeout_secs == 0 {
            anyhow::bail!("配置无效：超时时间必须大于 0");
        }
        if self.upload.concurrency == 0 {
            anyhow::bail!("配置无效：upload.concurrency 必须大于 0");
        }
        if self.upload.max_attempts == 0 {
            anyhow::bail!("配置无效：upload.max_attempts 必须大于 0");
        }
        Ok(())
    }

    /// 从文件加载配置
    pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .await
            .context("Failed to read config file")?;

        let config: UploaderConfig =
            toml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        self.validate()?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        fs::write(path.as_ref(), content)
            .await
            .context("Failed to write config file")?;

        Ok(())
    }

    /// 加载配置，文件不存在或非法时回落到默认值
    pub async fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load_from_file(path.as_ref()).await {
            Ok(config) => {
                info!("已加载配置文件: {:?}", path.as_ref());
                config
            }
            Err(e) => {
                warn!("加载配置失败（{}），使用默认配置", e);
                Self::default()
            }
        }
    }
}
