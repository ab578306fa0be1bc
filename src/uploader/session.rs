// 上传会话状态
//
// 显式的会话上下文对象：凭证、待上传集合、运行标志、结果与失败列表、
// 运行计数器。不使用任何全局状态，多个会话/测试互相隔离。
// 计数器只由调度器和重试策略在单个逻辑流程内推进，观察者看到的
// 数值单调不减

use crate::api::ApiCredential;
use crate::uploader::report::{DiagnosticsContext, UploadResult};
use crate::uploader::task::{FailureRecord, UploadTask};
use anyhow::Result;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// 单次运行的统计快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunAnalytics {
    /// 本次运行的文件总数
    pub total_files: u64,
    /// 成功数
    pub success_count: u64,
    /// 失败数
    pub error_count: u64,
    /// 重试次数（首次之外的尝试）
    pub retry_count: u64,
    /// 运行开始时间 (Unix timestamp 毫秒)
    pub started_at: Option<i64>,
    /// 运行结束时间 (Unix timestamp 毫秒)
    pub finished_at: Option<i64>,
}

impl RunAnalytics {
    /// 运行时长（秒）
    pub fn duration_secs(&self) -> Option<f64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start) as f64 / 1000.0),
            _ => None,
        }
    }

    /// 成功率（0.0 - 100.0）
    pub fn success_rate(&self) -> f64 {
        if self.total_files == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.total_files as f64 * 100.0
    }
}

/// 共享的运行计数器（原子操作，无锁）
#[derive(Debug, Default)]
struct SharedAnalytics {
    total_files: AtomicU64,
    success_count: AtomicU64,
    error_count: AtomicU64,
    retry_count: AtomicU64,
    /// 0 表示未设置
    started_at_ms: AtomicI64,
    finished_at_ms: AtomicI64,
}

impl SharedAnalytics {
    fn reset(&self, total: u64) {
        self.total_files.store(total, Ordering::SeqCst);
        self.success_count.store(0, Ordering::SeqCst);
        self.error_count.store(0, Ordering::SeqCst);
        self.retry_count.store(0, Ordering::SeqCst);
        self.started_at_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::SeqCst);
        self.finished_at_ms.store(0, Ordering::SeqCst);
    }

    fn snapshot(&self) -> RunAnalytics {
        let started = self.started_at_ms.load(Ordering::SeqCst);
        let finished = self.finished_at_ms.load(Ordering::SeqCst);
        RunAnalytics {
            total_files: self.total_files.load(Ordering::SeqCst),
            success_count: self.success_count.load(Ordering::SeqCst),
            error_count: self.error_count.load(Ordering::SeqCst),
            retry_count: self.retry_count.load(Ordering::SeqCst),
            started_at: (started != 0).then_some(started),
            finished_at: (finished != 0).then_some(finished),
        }
    }
}

/// 状态消息级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSeverity {
    Info,
    Success,
    Warning,
    Error,
}

/// 进度通知载荷
#[derive(Debug, Clone)]
pub struct UploadProgress {
    /// 当前文件名
    pub file_name: String,
    /// 当前尝试序号（1 起）
    pub attempt: u32,
    /// 最大尝试次数
    pub max_attempts: u32,
    /// 计数器快照
    pub counters: RunAnalytics,
}

/// 胶水层回调接口
///
/// 核心通过该 trait 向展示层推送进度、状态和完成通知，
/// 自身不承担任何展示职责
pub trait UploadObserver: Send + Sync {
    /// 进度通知（经节流）
    fn on_progress(&self, _progress: &UploadProgress) {}

    /// 终端状态消息
    fn on_status(&self, _message: &str, _severity: StatusSeverity) {}

    /// 运行完成通知
    fn on_run_complete(&self, _analytics: &RunAnalytics) {}
}

/// 空实现（无胶水层场景 / 测试）
pub struct NoopObserver;

impl UploadObserver for NoopObserver {}

/// 上传会话
///
/// 内部字段全部经 Arc 共享，Clone 得到同一会话的另一个句柄
#[derive(Clone)]
pub struct UploadSession {
    /// API 凭证（已通过格式校验）
    credential: ApiCredential,
    /// 待上传任务（保持加入顺序，文件名唯一）
    pending: Arc<Mutex<Vec<UploadTask>>>,
    /// 本次/历次运行的成功结果
    results: Arc<Mutex<Vec<UploadResult>>>,
    /// 终端失败列表（供手动重试）
    failures: Arc<Mutex<Vec<FailureRecord>>>,
    /// 是否有运行在进行中
    is_uploading: Arc<AtomicBool>,
    /// 取消令牌（每次运行更换）
    cancel_token: Arc<Mutex<CancellationToken>>,
    /// 运行计数器
    analytics: Arc<SharedAnalytics>,
}

impl UploadSession {
    /// 创建新会话
    pub fn new(credential: ApiCredential) -> Self {
        Self {
            credential,
            pending: Arc::new(Mutex::new(Vec::new())),
            results: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(Vec::new())),
            is_uploading: Arc::new(AtomicBool::new(false)),
            cancel_token: Arc::new(Mutex::new(CancellationToken::new())),
            analytics: Arc::new(SharedAnalytics::default()),
        }
    }

    /// 会话凭证
    pub fn credential(&self) -> &ApiCredential {
        &self.credential
    }

    /// 添加文件（校验失败返回原因；同名文件替换已有任务）
    pub fn add_file(
        &self,
        file_name: impl Into<String>,
        payload: Vec<u8>,
        mime_type: impl Into<String>,
    ) -> Result<()> {
        let task = UploadTask::validate(file_name, payload, mime_type)?;

        let mut pending = self.pending.lock().unwrap();
        if let Some(existing) = pending.iter_mut().find(|t| t.file_name == task.file_name) {
            *existing = task;
        } else {
            pending.push(task);
        }
        Ok(())
    }

    /// 按文件名移除待上传任务
    pub fn remove_file(&self, file_name: &str) -> bool {
        let mut pending = self.pending.lock().unwrap();
        let before = pending.len();
        pending.retain(|t| t.file_name != file_name);
        pending.len() < before
    }

    /// 清空待上传集合
    pub fn clear_files(&self) {
        self.pending.lock().unwrap().clear();
    }

    /// 待上传任务数
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// 取出全部待上传任务（保持加入顺序）
    pub fn take_pending(&self) -> Vec<UploadTask> {
        std::mem::take(&mut *self.pending.lock().unwrap())
    }

    /// 把未开始的任务放回待上传集合头部（保持原有顺序）
    ///
    /// 运行级失败或取消时调用，文件不丢失，下一次运行直接复用
    pub(crate) fn restore_pending(&self, tasks: Vec<UploadTask>) {
        if tasks.is_empty() {
            return;
        }
        let mut pending = self.pending.lock().unwrap();
        let added_during_run = std::mem::replace(&mut *pending, tasks);
        pending.extend(added_during_run);
    }

    /// 是否有运行在进行中
    pub fn is_uploading(&self) -> bool {
        self.is_uploading.load(Ordering::SeqCst)
    }

    /// 当前运行的取消令牌
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.lock().unwrap().clone()
    }

    /// 取消当前运行
    ///
    /// 只阻止新批次的派发；已派发的批次连同其剩余重试照常
    /// 进行到终态，结果照常记录
    pub fn cancel(&self) {
        info!("❌ 用户取消上传");
        self.is_uploading.store(false, Ordering::SeqCst);
        self.cancel_token.lock().unwrap().cancel();
    }

    /// 开始一次运行：重置计数器和失败列表，换新取消令牌
    pub(crate) fn begin_run(&self, total_files: u64) {
        self.analytics.reset(total_files);
        self.failures.lock().unwrap().clear();
        *self.cancel_token.lock().unwrap() = CancellationToken::new();
        self.is_uploading.store(true, Ordering::SeqCst);
    }

    /// 结束一次运行
    pub(crate) fn finish_run(&self) {
        self.analytics
            .finished_at_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::SeqCst);
        self.is_uploading.store(false, Ordering::SeqCst);
    }

    /// 记录一次成功结果
    pub(crate) fn record_success(&self, result: UploadResult) {
        self.results.lock().unwrap().push(result);
        self.analytics.success_count.fetch_add(1, Ordering::SeqCst);
    }

    /// 记录一次终端失败
    pub(crate) fn record_failure(&self, record: FailureRecord) {
        self.failures.lock().unwrap().push(record);
        self.analytics.error_count.fetch_add(1, Ordering::SeqCst);
    }

    /// 累计重试次数
    pub(crate) fn add_retries(&self, count: u64) {
        if count > 0 {
            self.analytics.retry_count.fetch_add(count, Ordering::SeqCst);
        }
    }

    /// 当前统计快照
    pub fn analytics_snapshot(&self) -> RunAnalytics {
        self.analytics.snapshot()
    }

    /// 成功结果列表（副本）
    pub fn results(&self) -> Vec<UploadResult> {
        self.results.lock().unwrap().clone()
    }

    /// 失败记录列表（副本）
    pub fn failures(&self) -> Vec<FailureRecord> {
        self.failures.lock().unwrap().clone()
    }

    /// 取出全部失败记录（手动重试流程消费后列表清空）
    pub fn drain_failures(&self) -> Vec<FailureRecord> {
        std::mem::take(&mut *self.failures.lock().unwrap())
    }

    /// 构建诊断上下文（在线状态由胶水层传入）
    pub fn diagnostics_context(
        &self,
        online: Option<bool>,
        proxy_enabled: bool,
    ) -> DiagnosticsContext {
        DiagnosticsContext {
            online,
            credential_len: self.credential.len(),
            credential_prefix: self.credential.expose()[..4].to_string(),
            proxy_enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> UploadSession {
        UploadSession::new(ApiCredential::new("abc123def456").unwrap())
    }

    #[test]
    fn test_add_file_validates() {
        let s = session();
        assert!(s.add_file("a.mp4", vec![0u8; 8], "video/mp4").is_ok());
        assert!(s.add_file("b.txt", vec![0u8; 8], "text/plain").is_err());
        assert_eq!(s.pending_count(), 1);
    }

    #[test]
    fn test_duplicate_name_replaces() {
        let s = session();
        s.add_file("a.mp4", vec![0u8; 8], "video/mp4").unwrap();
        s.add_file("a.mp4", vec![0u8; 32], "video/mp4").unwrap();

        assert_eq!(s.pending_count(), 1);
        let tasks = s.take_pending();
        assert_eq!(tasks[0].size_bytes, 32);
    }

    #[test]
    fn test_pending_preserves_insertion_order() {
        let s = session();
        for name in ["c.mp4", "a.mp4", "b.mp4"] {
            s.add_file(name, vec![0u8; 8], "video/mp4").unwrap();
        }

        let names: Vec<String> = s.take_pending().into_iter().map(|t| t.file_name).collect();
        assert_eq!(names, ["c.mp4", "a.mp4", "b.mp4"]);
    }

    #[test]
    fn test_remove_file() {
        let s = session();
        s.add_file("a.mp4", vec![0u8; 8], "video/mp4").unwrap();
        assert!(s.remove_file("a.mp4"));
        assert!(!s.remove_file("a.mp4"));
        assert_eq!(s.pending_count(), 0);
    }

    #[test]
    fn test_run_lifecycle_counters() {
        let s = session();
        s.begin_run(3);
        assert!(s.is_uploading());

        let snap = s.analytics_snapshot();
        assert_eq!(snap.total_files, 3);
        assert_eq!(snap.success_count, 0);
        assert!(snap.started_at.is_some());
        assert!(snap.finished_at.is_none());

        s.add_retries(2);
        s.finish_run();
        assert!(!s.is_uploading());

        let snap = s.analytics_snapshot();
        assert_eq!(snap.retry_count, 2);
        assert!(snap.finished_at.is_some());
        assert!(snap.duration_secs().is_some());
    }

    #[test]
    fn test_begin_run_clears_previous_failures() {
        let s = session();
        let task = UploadTask::validate("a.mp4", vec![0u8; 8], "video/mp4").unwrap();
        s.record_failure(FailureRecord {
            task,
            reason: "boom".to_string(),
            non_retryable: false,
        });
        assert_eq!(s.failures().len(), 1);

        s.begin_run(1);
        assert!(s.failures().is_empty());
    }

    #[test]
    fn test_cancel_flips_flag_and_token() {
        let s = session();
        s.begin_run(1);
        let token = s.cancel_token();
        assert!(!token.is_cancelled());

        s.cancel();
        assert!(!s.is_uploading());
        assert!(token.is_cancelled());

        // 新一轮运行拿到未取消的新令牌
        s.begin_run(1);
        assert!(!s.cancel_token().is_cancelled());
    }

    #[test]
    fn test_success_rate() {
        let analytics = RunAnalytics {
            total_files: 4,
            success_count: 3,
            error_count: 1,
            retry_count: 0,
            started_at: Some(0),
            finished_at: Some(2_000),
        };
        assert_eq!(analytics.success_rate(), 75.0);
        assert_eq!(analytics.duration_secs(), Some(2.0));
    }

    #[test]
    fn test_diagnostics_context_masks_credential() {
        let s = session();
        let ctx = s.diagnostics_context(Some(true), false);
        assert_eq!(ctx.credential_len, 12);
        assert_eq!(ctx.credential_prefix, "abc1");
    }
}
