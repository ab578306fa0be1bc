// 重试策略
//
// 发现调用与文件上传使用不同的退避表：
// - 发现调用：线性退避 2s, 4s, 6s...，上限 8s
// - 文件上传：指数退避 2s, 4s, 8s...，上限 10s
//
// 错误是否重试只看传输层给出的分类标签；
// 发现调用遇到网络错误且代理未启用时，同一次尝试立即经代理补发，
// 不消耗重试名额

use crate::api::{CallKind, TransportError};
use crate::uploader::routing::{FallbackRouter, RoutingState};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// 默认最大尝试次数
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// 发现调用退避基数（毫秒）
const DISCOVERY_BACKOFF_STEP_MS: u64 = 2000;

/// 发现调用退避上限（毫秒）
const DISCOVERY_BACKOFF_CAP_MS: u64 = 8000;

/// 上传退避基数（毫秒）
const UPLOAD_BACKOFF_BASE_MS: u64 = 1000;

/// 上传退避上限（毫秒）
const UPLOAD_BACKOFF_CAP_MS: u64 = 10000;

/// 发现调用的退避延迟（线性，按已失败次数递增）
pub fn discovery_backoff_ms(failed_attempts: u32) -> u64 {
    (DISCOVERY_BACKOFF_STEP_MS * failed_attempts as u64).min(DISCOVERY_BACKOFF_CAP_MS)
}

/// 上传调用的退避延迟（指数，attempt 为即将进行的尝试序号，≥ 2）
pub fn upload_backoff_ms(attempt: u32) -> u64 {
    (UPLOAD_BACKOFF_BASE_MS * 2u64.pow(attempt - 1)).min(UPLOAD_BACKOFF_CAP_MS)
}

/// 单次尝试的分类结果
#[derive(Debug, Clone)]
pub enum AttemptOutcome<T> {
    /// 成功
    Success(T),
    /// 可重试失败
    RetryableFailure(TransportError),
    /// 终端失败（跳过剩余尝试）
    TerminalFailure(TransportError),
}

impl<T> AttemptOutcome<T> {
    /// 按传输层分类标签划分结果
    pub fn classify(result: Result<T, TransportError>) -> Self {
        match result {
            Ok(value) => AttemptOutcome::Success(value),
            Err(e) if e.is_retriable() => AttemptOutcome::RetryableFailure(e),
            Err(e) => AttemptOutcome::TerminalFailure(e),
        }
    }
}

/// 运行级最终错误
///
/// 发现调用重试耗尽（或遇到终端错误）时产生，携带最后一次观察到的
/// 传输错误；调度器补充完整诊断报告后向上抛出
#[derive(Debug, Clone)]
pub struct FinalError {
    /// 最后一次观察到的错误
    pub last_error: TransportError,
    /// 实际执行的尝试次数
    pub attempts: u32,
    /// 诊断报告（由调度器填充）
    pub diagnostics: Option<String>,
}

impl FinalError {
    pub fn new(last_error: TransportError, attempts: u32) -> Self {
        Self {
            last_error,
            attempts,
            diagnostics: None,
        }
    }

    /// 附加诊断报告
    pub fn with_diagnostics(mut self, diagnostics: String) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }
}

impl std::fmt::Display for FinalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Failed after {} attempt(s): {}",
            self.attempts, self.last_error
        )
    }
}

impl std::error::Error for FinalError {}

/// 单文件上传的终端结果
#[derive(Debug)]
pub enum UploadRun<T> {
    /// 成功
    Succeeded {
        value: T,
        /// 实际执行的尝试次数
        attempts: u32,
    },
    /// 失败（重试耗尽或终端错误）
    Failed {
        error: TransportError,
        attempts: u32,
        /// true 表示因不可重试分类而提前终止
        non_retryable: bool,
    },
}

/// 重试策略
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 最大尝试次数
    max_attempts: u32,
}

impl RetryPolicy {
    /// 创建策略（尝试次数至少为 1）
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 带重试执行发现调用
    ///
    /// 网络错误且代理未启用时同步触发兜底路由，同一次尝试立即经代理
    /// 补发一次，不消耗重试名额；不可重试错误立即终止
    pub async fn run_discovery<T, F, Fut>(
        &self,
        router: &FallbackRouter,
        mut op: F,
    ) -> Result<T, FinalError>
    where
        F: FnMut(RoutingState) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut last_error: Option<TransportError> = None;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                let delay = discovery_backoff_ms(attempt - 1);
                info!("⏳ 等待 {}ms 后重试发现调用 ({}/{})", delay, attempt, self.max_attempts);
                sleep(Duration::from_millis(delay)).await;
            }

            match op(router.current()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(
                        "发现调用第 {}/{} 次尝试失败: {}",
                        attempt, self.max_attempts, e
                    );

                    if router.decide_on_error(&e, CallKind::Discovery) {
                        // 路由刚刚切换：同一次尝试立即经代理补发
                        info!("🔄 立即经 CORS 代理补发发现调用");
                        match op(router.current()).await {
                            Ok(value) => return Ok(value),
                            Err(proxy_err) => {
                                warn!("代理补发同样失败: {}", proxy_err);
                                if !proxy_err.is_retriable() {
                                    return Err(FinalError::new(proxy_err, attempt));
                                }
                                last_error = Some(proxy_err);
                            }
                        }
                    } else if !e.is_retriable() {
                        return Err(FinalError::new(e, attempt));
                    } else {
                        last_error = Some(e);
                    }
                }
            }
        }

        let error = last_error
            .unwrap_or_else(|| TransportError::network("Failed to get upload server after retries"));
        Err(FinalError::new(error, self.max_attempts))
    }

    /// 带重试执行单文件上传
    ///
    /// 每次尝试前从路由器取当前路由，兜底切换在下一次尝试生效
    /// （触发范围由路由器配置决定）
    pub async fn run_upload<T, F, Fut>(&self, router: &FallbackRouter, mut op: F) -> UploadRun<T>
    where
        F: FnMut(u32, RoutingState) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut last_error: Option<TransportError> = None;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                let delay = upload_backoff_ms(attempt);
                info!("⏳ 等待 {}ms 后重试上传 ({}/{})", delay, attempt, self.max_attempts);
                sleep(Duration::from_millis(delay)).await;
            }

            match AttemptOutcome::classify(op(attempt, router.current()).await) {
                AttemptOutcome::Success(value) => {
                    return UploadRun::Succeeded { value, attempts: attempt };
                }
                AttemptOutcome::TerminalFailure(e) => {
                    warn!("上传失败（不可重试）: {}", e);
                    return UploadRun::Failed {
                        error: e,
                        attempts: attempt,
                        non_retryable: true,
                    };
                }
                AttemptOutcome::RetryableFailure(e) => {
                    warn!(
                        "上传第 {}/{} 次尝试失败: {}",
                        attempt, self.max_attempts, e
                    );
                    router.decide_on_error(&e, CallKind::Upload);
                    last_error = Some(e);
                }
            }
        }

        UploadRun::Failed {
            error: last_error
                .unwrap_or_else(|| TransportError::network("Upload failed")),
            attempts: self.max_attempts,
            non_retryable: false,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}
