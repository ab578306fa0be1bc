// 上传编排模块
//
// 以批次调度器为入口串起各个部件：
// - 重试策略（分类驱动的有界重试 + 差异化退避）
// - 代理兜底路由（网络层失败时切换 CORS 中继，会话内单调）
// - 会话状态（待上传集合、运行计数器、结果与失败列表）
// - 结果构建与诊断报告

pub mod report;
pub mod retry;
pub mod routing;
pub mod scheduler;
pub mod session;
pub mod task;
pub mod throttle;

pub use report::{build_diagnostics, build_failure, build_result, DiagnosticsContext, UploadResult};
pub use retry::{
    discovery_backoff_ms, upload_backoff_ms, AttemptOutcome, FinalError, RetryPolicy, UploadRun,
    DEFAULT_MAX_ATTEMPTS,
};
pub use routing::{
    FallbackRouter, FallbackScope, MemorySessionStore, RoutingState, SessionStore,
    DEFAULT_PROXY_PREFIX, PROXY_STATE_KEY,
};
pub use scheduler::{batch_count, BatchScheduler, DEFAULT_CONCURRENCY, DEFAULT_RATE_LIMIT_MS};
pub use session::{
    NoopObserver, RunAnalytics, StatusSeverity, UploadObserver, UploadProgress, UploadSession,
};
pub use task::{
    FailureRecord, MediaKind, UploadTask, ValidationError, ALLOWED_MIME_PREFIXES, MAX_FILE_SIZE,
};
pub use throttle::{ProgressThrottler, DEFAULT_THROTTLE_INTERVAL_MS};
