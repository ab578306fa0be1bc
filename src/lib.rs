// DoodStream Uploader Rust Library
// DoodStream 批量上传核心库

// 日志系统
pub mod logging;

// 配置管理模块
pub mod config;

// DoodStream API 模块
pub mod api;

// 上传编排模块
pub mod uploader;

// 导出常用类型
pub use api::{ApiClient, ApiCredential, CallKind, EndpointInfo, TransportError, TransportErrorKind, UploadTransport};
pub use config::{ApiConfig, LogConfig, UploadConfig, UploaderConfig};
pub use logging::{init_logging, LogGuard};
pub use uploader::{
    BatchScheduler, FailureRecord, FallbackRouter, FallbackScope, FinalError, MemorySessionStore,
    NoopObserver, RetryPolicy, RoutingState, RunAnalytics, SessionStore, StatusSeverity,
    UploadObserver, UploadProgress, UploadResult, UploadSession, UploadTask, ValidationError,
};
