// 批次调度器
//
// 把待上传集合切成固定大小的并发批次顺序执行：
// 批内任务并发派发、整批等待终态，批间按限速间隔延迟
// （最后一批之后不延迟）。单个任务的失败不影响同批其余任务，
// 也不会中止整次运行

use crate::api::{EndpointInfo, UploadTransport};
use crate::uploader::report::{build_diagnostics, build_failure, build_result};
use crate::uploader::retry::{FinalError, RetryPolicy, UploadRun};
use crate::uploader::routing::FallbackRouter;
use crate::uploader::session::{
    RunAnalytics, StatusSeverity, UploadObserver, UploadProgress, UploadSession,
};
use crate::uploader::task::UploadTask;
use crate::uploader::throttle::ProgressThrottler;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// 默认并发上传数
pub const DEFAULT_CONCURRENCY: usize = 2;

/// 默认限速间隔（毫秒/任务）
pub const DEFAULT_RATE_LIMIT_MS: u64 = 100;

/// 总批次数
pub fn batch_count(total: usize, concurrency: usize) -> usize {
    total.div_ceil(concurrency.max(1))
}

/// 批次调度器
///
/// 传输层通过 trait 对象注入，测试以 mock 替换真实网络
pub struct BatchScheduler {
    /// 传输层
    transport: Arc<dyn UploadTransport>,
    /// 代理兜底路由器（会话内共享）
    router: Arc<FallbackRouter>,
    /// 重试策略
    policy: RetryPolicy,
    /// 并发上传数
    concurrency: usize,
    /// 限速间隔（毫秒/任务）
    rate_limit_ms: u64,
    /// 进度回调节流器
    throttler: Arc<ProgressThrottler>,
}

impl BatchScheduler {
    /// 创建调度器（默认并发 2、限速 100ms、重试 3 次）
    pub fn new(transport: Arc<dyn UploadTransport>, router: Arc<FallbackRouter>) -> Self {
        Self::with_config(
            transport,
            router,
            RetryPolicy::default(),
            DEFAULT_CONCURRENCY,
            DEFAULT_RATE_LIMIT_MS,
        )
    }

    /// 从应用配置创建调度器
    pub fn from_config(
        transport: Arc<dyn UploadTransport>,
        router: Arc<FallbackRouter>,
        config: &crate::config::UploadConfig,
    ) -> Self {
        Self::with_config(
            transport,
            router,
            RetryPolicy::new(config.max_attempts),
            config.concurrency,
            config.rate_limit_ms,
        )
    }

    /// 创建调度器（完整配置）
    pub fn with_config(
        transport: Arc<dyn UploadTransport>,
        router: Arc<FallbackRouter>,
        policy: RetryPolicy,
        concurrency: usize,
        rate_limit_ms: u64,
    ) -> Self {
        Self {
            transport,
            router,
            policy,
            concurrency: concurrency.max(1),
            rate_limit_ms,
            throttler: Arc::new(ProgressThrottler::default_interval()),
        }
    }

    /// 批间延迟 = 限速间隔 × 并发数
    fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms * self.concurrency as u64)
    }

    /// 执行一次上传运行：取出全部待上传任务并驱动到终态
    ///
    /// 运行中的会话直接拒绝二次启动；发现调用彻底失败时任务放回
    /// 待上传集合，错误附带完整诊断报告
    pub async fn run(
        &self,
        session: &UploadSession,
        observer: Arc<dyn UploadObserver>,
    ) -> Result<RunAnalytics, FinalError> {
        if session.is_uploading() {
            warn!("上传已在进行中，忽略本次启动");
            observer.on_status("Upload already in progress", StatusSeverity::Warning);
            return Ok(session.analytics_snapshot());
        }

        let tasks = session.take_pending();
        self.execute(session, tasks, observer).await
    }

    /// 手动重试：消费失败列表，把其中的任务重新走完整调度流程
    pub async fn retry_failed(
        &self,
        session: &UploadSession,
        observer: Arc<dyn UploadObserver>,
    ) -> Result<RunAnalytics, FinalError> {
        if session.is_uploading() {
            warn!("上传已在进行中，忽略本次重试");
            observer.on_status("Upload already in progress", StatusSeverity::Warning);
            return Ok(session.analytics_snapshot());
        }

        let tasks: Vec<UploadTask> = session
            .drain_failures()
            .into_iter()
            .map(|record| record.task)
            .collect();
        info!("🔄 手动重试 {} 个失败任务", tasks.len());
        self.execute(session, tasks, observer).await
    }

    async fn execute(
        &self,
        session: &UploadSession,
        tasks: Vec<UploadTask>,
        observer: Arc<dyn UploadObserver>,
    ) -> Result<RunAnalytics, FinalError> {
        if tasks.is_empty() {
            observer.on_status("No files selected", StatusSeverity::Warning);
            return Ok(session.analytics_snapshot());
        }

        let total = tasks.len();
        info!(
            "🚀 开始上传 {} 个文件：{} 批，并发 {}",
            total,
            batch_count(total, self.concurrency),
            self.concurrency
        );
        session.begin_run(total as u64);
        let cancel = session.cancel_token();

        // 发现调用（带重试 + 代理兜底），整次运行共用一个端点
        let discovery = self
            .policy
            .run_discovery(&self.router, |routing| {
                let transport = self.transport.clone();
                async move { transport.fetch_upload_server(&routing).await }
            })
            .await;

        let endpoint = match discovery {
            Ok(url) => {
                observer.on_status("Upload server acquired", StatusSeverity::Info);
                EndpointInfo {
                    url,
                    via_proxy: self.router.proxy_enabled(),
                }
            }
            Err(err) => {
                // 运行级失败：任务放回待上传集合，错误附诊断报告向上抛出
                session.restore_pending(tasks);
                session.finish_run();
                let ctx = session.diagnostics_context(None, self.router.proxy_enabled());
                let report = build_diagnostics(&err.last_error, &ctx);
                observer.on_status(&err.last_error.message, StatusSeverity::Error);
                return Err(err.with_diagnostics(report));
            }
        };

        let delay = self.inter_batch_delay();
        let mut queue: VecDeque<UploadTask> = tasks.into();
        let mut batch_index = 0usize;

        while !queue.is_empty() {
            if batch_index > 0 {
                // 批间限速；取消时不再进入下一批
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(delay) => {}
                }
            }
            if cancel.is_cancelled() {
                break;
            }

            let take = self.concurrency.min(queue.len());
            let batch: Vec<UploadTask> = queue.drain(..take).collect();
            debug!("📦 派发第 {} 批：{} 个任务", batch_index + 1, batch.len());

            let mut workers = JoinSet::new();
            for task in batch {
                workers.spawn(Self::upload_one(
                    self.transport.clone(),
                    self.router.clone(),
                    self.policy,
                    endpoint.clone(),
                    task,
                    session.clone(),
                    observer.clone(),
                    self.throttler.clone(),
                ));
            }

            // 整批等待终态；单个任务失败不取消同批其余任务
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    warn!("上传任务异常退出: {}", e);
                }
            }

            batch_index += 1;
        }

        if !queue.is_empty() {
            // 取消：未派发的任务放回待上传集合，已派发批次的结果照常保留
            info!("⚠️ 运行被取消，{} 个任务未派发", queue.len());
            session.restore_pending(queue.into());
        }

        session.finish_run();
        let analytics = session.analytics_snapshot();
        info!(
            "🏁 运行结束：成功 {} / 失败 {} / 重试 {}",
            analytics.success_count, analytics.error_count, analytics.retry_count
        );
        observer.on_run_complete(&analytics);
        Ok(analytics)
    }

    /// 单文件上传（带重试），终态直接写回会话
    #[allow(clippy::too_many_arguments)]
    async fn upload_one(
        transport: Arc<dyn UploadTransport>,
        router: Arc<FallbackRouter>,
        policy: RetryPolicy,
        endpoint: EndpointInfo,
        task: UploadTask,
        session: UploadSession,
        observer: Arc<dyn UploadObserver>,
        throttler: Arc<ProgressThrottler>,
    ) {
        let max_attempts = policy.max_attempts();
        let transport_ref = &*transport;
        let endpoint_ref = &endpoint;
        let task_ref = &task;
        let session_ref = &session;
        let observer_ref = &*observer;
        let throttler_ref = &*throttler;

        let run = policy
            .run_upload(&router, move |attempt, routing| async move {
                if throttler_ref.should_emit() {
                    observer_ref.on_progress(&UploadProgress {
                        file_name: task_ref.file_name.clone(),
                        attempt,
                        max_attempts,
                        counters: session_ref.analytics_snapshot(),
                    });
                }
                transport_ref
                    .upload_file(endpoint_ref, task_ref, &routing)
                    .await
            })
            .await;

        match run {
            UploadRun::Succeeded { value, attempts } => {
                session.add_retries((attempts - 1) as u64);
                let result = build_result(&value);
                info!("✅ 上传成功: {} -> {}", task.file_name, result.file_code);
                observer.on_status(
                    &format!("{} uploaded successfully", task.file_name),
                    StatusSeverity::Success,
                );
                session.record_success(result);
            }
            UploadRun::Failed {
                error,
                attempts,
                non_retryable,
            } => {
                session.add_retries(attempts.saturating_sub(1) as u64);
                warn!(
                    "❌ 上传失败: {}（{} 次尝试）: {}",
                    task.file_name, attempts, error
                );
                observer.on_status(
                    &format!("{}: {}", task.file_name, error.message),
                    StatusSeverity::Error,
                );
                session.record_failure(build_failure(task, error.message, non_retryable));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiCredential, CallKind, TransportError, UploadedFileInfo};
    use crate::uploader::routing::RoutingState;
    use crate::uploader::session::NoopObserver;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// 可编程的传输层 mock：按文件名预设失败次数和错误
    #[derive(Default)]
    struct MockTransport {
        discovery_fails_always: bool,
        /// 文件名 -> (返回的错误, 剩余失败次数)
        plans: Mutex<HashMap<String, (TransportError, u32)>>,
        /// 上传调用的派发顺序（调用开始时记录）
        dispatched: Mutex<Vec<String>>,
        discovery_calls: AtomicU32,
        /// 每次上传的耗时（虚拟时间，毫秒）
        upload_delay_ms: u64,
    }

    impl MockTransport {
        fn ok() -> Self {
            Self::default()
        }

        fn with_upload_delay(mut self, ms: u64) -> Self {
            self.upload_delay_ms = ms;
            self
        }

        fn failing_discovery() -> Self {
            Self {
                discovery_fails_always: true,
                ..Self::default()
            }
        }

        fn fail_file(self, name: &str, error: TransportError, times: u32) -> Self {
            self.plans
                .lock()
                .unwrap()
                .insert(name.to_string(), (error, times));
            self
        }

        fn dispatch_log(&self) -> Vec<String> {
            self.dispatched.lock().unwrap().clone()
        }

        fn success_info(task: &UploadTask) -> UploadedFileInfo {
            UploadedFileInfo {
                title: task.file_name.clone(),
                filecode: format!("code-{}", task.file_name),
                size: task.size_bytes,
                length: 0.0,
                uploaded: "2024-03-02 18:22:05".to_string(),
                download_url: format!("https://dood.watch/d/code-{}", task.file_name),
                protected_embed: String::new(),
                protected_dl: String::new(),
                single_img: String::new(),
                splash_img: String::new(),
            }
        }
    }

    #[async_trait]
    impl UploadTransport for MockTransport {
        async fn fetch_upload_server(
            &self,
            _routing: &RoutingState,
        ) -> Result<String, TransportError> {
            self.discovery_calls.fetch_add(1, Ordering::SeqCst);
            if self.discovery_fails_always {
                Err(TransportError::from_status(500, CallKind::Discovery))
            } else {
                Ok("https://s1.example/upload".to_string())
            }
        }

        async fn upload_file(
            &self,
            _endpoint: &EndpointInfo,
            task: &UploadTask,
            _routing: &RoutingState,
        ) -> Result<UploadedFileInfo, TransportError> {
            self.dispatched.lock().unwrap().push(task.file_name.clone());

            if self.upload_delay_ms > 0 {
                sleep(Duration::from_millis(self.upload_delay_ms)).await;
            }

            if let Some((error, left)) = self.plans.lock().unwrap().get_mut(&task.file_name) {
                if *left > 0 {
                    *left -= 1;
                    return Err(error.clone());
                }
            }
            Ok(Self::success_info(task))
        }
    }

    fn session_with_files(names: &[&str]) -> UploadSession {
        let s = UploadSession::new(ApiCredential::new("abc123def456").unwrap());
        for name in names {
            s.add_file(*name, vec![0u8; 8], "video/mp4").unwrap();
        }
        s
    }

    fn scheduler(transport: Arc<MockTransport>) -> BatchScheduler {
        BatchScheduler::with_config(
            transport,
            Arc::new(FallbackRouter::new()),
            RetryPolicy::new(3),
            2,
            100,
        )
    }

    fn observer() -> Arc<dyn UploadObserver> {
        Arc::new(NoopObserver)
    }

    #[test]
    fn test_batch_count() {
        assert_eq!(batch_count(5, 2), 3);
        assert_eq!(batch_count(4, 2), 2);
        assert_eq!(batch_count(1, 2), 1);
        assert_eq!(batch_count(0, 2), 0);
    }

    proptest! {
        #[test]
        fn prop_batch_count_matches_chunks(total in 0usize..200, concurrency in 1usize..10) {
            let items = vec![0u8; total];
            prop_assert_eq!(batch_count(total, concurrency), items.chunks(concurrency).count());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_five_files_concurrency_two_all_succeed() {
        let mock = Arc::new(MockTransport::ok().with_upload_delay(50));
        let sched = scheduler(mock.clone());
        let session = session_with_files(&["f1.mp4", "f2.mp4", "f3.mp4", "f4.mp4", "f5.mp4"]);
        let started = tokio::time::Instant::now();

        let analytics = sched.run(&session, observer()).await.unwrap();

        assert_eq!(analytics.total_files, 5);
        assert_eq!(analytics.success_count, 5);
        assert_eq!(analytics.error_count, 0);
        assert_eq!(analytics.retry_count, 0);
        assert_eq!(session.results().len(), 5);
        assert!(session.failures().is_empty());
        assert!(!session.is_uploading());
        assert_eq!(mock.discovery_calls.load(Ordering::SeqCst), 1);

        // 每批 50ms 上传 + 批间 2 次 200ms 延迟（最后一批后没有延迟）
        assert_eq!(started.elapsed(), Duration::from_millis(50 * 3 + 200 * 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_preserve_order_across_groups() {
        let mock = Arc::new(MockTransport::ok().with_upload_delay(50));
        let sched = scheduler(mock.clone());
        let session = session_with_files(&["f1.mp4", "f2.mp4", "f3.mp4", "f4.mp4", "f5.mp4"]);

        sched.run(&session, observer()).await.unwrap();

        // 批大小 2,2,1；批内派发顺序不保证，跨批顺序保证
        let log = mock.dispatch_log();
        assert_eq!(log.len(), 5);
        let group1: HashSet<&str> = log[0..2].iter().map(|s| s.as_str()).collect();
        let group2: HashSet<&str> = log[2..4].iter().map(|s| s.as_str()).collect();
        assert_eq!(group1, HashSet::from(["f1.mp4", "f2.mp4"]));
        assert_eq!(group2, HashSet::from(["f3.mp4", "f4.mp4"]));
        assert_eq!(log[4], "f5.mp4");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_file_single_attempt() {
        let mock = Arc::new(
            MockTransport::ok().fail_file(
                "a.mp4",
                TransportError::from_status(401, CallKind::Upload),
                u32::MAX,
            ),
        );
        let sched = scheduler(mock.clone());
        let session = session_with_files(&["a.mp4"]);

        let analytics = sched.run(&session, observer()).await.unwrap();

        assert_eq!(analytics.error_count, 1);
        assert_eq!(analytics.success_count, 0);
        assert_eq!(analytics.retry_count, 0);
        // 恰好 1 次尝试
        assert_eq!(mock.dispatch_log().len(), 1);

        let failures = session.failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].non_retryable);
        assert_eq!(failures[0].reason, "Unauthorized - Invalid or expired API key");
    }

    #[tokio::test(start_paused = true)]
    async fn test_mixed_outcomes_counters_add_up() {
        // b 总是 503（3 次尝试后进失败列表），c 超时 1 次后成功
        let mock = Arc::new(
            MockTransport::ok()
                .fail_file(
                    "b.mp4",
                    TransportError::from_status(503, CallKind::Upload),
                    u32::MAX,
                )
                .fail_file("c.mp4", TransportError::timeout("timed out"), 1),
        );
        let sched = scheduler(mock.clone());
        let session = session_with_files(&["a.mp4", "b.mp4", "c.mp4"]);

        let analytics = sched.run(&session, observer()).await.unwrap();

        assert_eq!(analytics.success_count + analytics.error_count, 3);
        assert_eq!(analytics.success_count, 2);
        assert_eq!(analytics.error_count, 1);
        // b 重试 2 次，c 重试 1 次
        assert_eq!(analytics.retry_count, 3);

        let failures = session.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].task.file_name, "b.mp4");
        assert!(!failures[0].non_retryable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_failure_restores_pending_with_diagnostics() {
        let mock = Arc::new(MockTransport::failing_discovery());
        let sched = scheduler(mock.clone());
        let session = session_with_files(&["a.mp4", "b.mp4"]);

        let err = sched.run(&session, observer()).await.unwrap_err();

        assert_eq!(err.attempts, 3);
        let report = err.diagnostics.unwrap();
        assert!(report.contains("DoodAPI server error"));
        assert!(report.contains("API Key Length: 12 characters"));

        // 文件不丢失，没有任何上传派发
        assert_eq!(session.pending_count(), 2);
        assert!(mock.dispatch_log().is_empty());
        assert!(!session.is_uploading());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_failed_consumes_failure_list() {
        // a 失败 3 次：第一次运行耗尽重试进失败列表，手动重试时成功
        let mock = Arc::new(MockTransport::ok().fail_file(
            "a.mp4",
            TransportError::from_status(503, CallKind::Upload),
            3,
        ));
        let sched = scheduler(mock.clone());
        let session = session_with_files(&["a.mp4"]);

        let first = sched.run(&session, observer()).await.unwrap();
        assert_eq!(first.error_count, 1);
        assert_eq!(session.failures().len(), 1);

        let second = sched.retry_failed(&session, observer()).await.unwrap();
        assert_eq!(second.total_files, 1);
        assert_eq!(second.success_count, 1);
        assert_eq!(second.error_count, 0);
        assert!(session.failures().is_empty());
        assert_eq!(session.results().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_between_batches_restores_undispatched() {
        let mock = Arc::new(MockTransport::ok().with_upload_delay(50));
        let sched = scheduler(mock.clone());
        let session = session_with_files(&["f1.mp4", "f2.mp4", "f3.mp4"]);

        // 第一批（50ms）结束后、批间延迟（200ms）期间取消
        let canceller = session.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(60)).await;
            canceller.cancel();
        });

        let analytics = sched.run(&session, observer()).await.unwrap();

        // 第一批的结果照常记录，第三个文件未派发、放回待上传集合
        assert_eq!(analytics.success_count, 2);
        assert_eq!(analytics.error_count, 0);
        assert_eq!(mock.dispatch_log().len(), 2);
        assert_eq!(session.pending_count(), 1);
        assert!(!session.is_uploading());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_lets_inflight_batch_finish_retries() {
        // a 第一次超时后进入退避；取消发生在退避期间，
        // 已派发批次仍进行到终态，结果照常记录
        let mock = Arc::new(
            MockTransport::ok()
                .with_upload_delay(50)
                .fail_file("a.mp4", TransportError::timeout("timed out"), 1),
        );
        let sched = scheduler(mock.clone());
        let session = session_with_files(&["a.mp4", "b.mp4", "c.mp4"]);

        let canceller = session.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let analytics = sched.run(&session, observer()).await.unwrap();

        // a 的第二次尝试在取消之后发出并成功
        assert_eq!(analytics.success_count, 2);
        assert_eq!(analytics.error_count, 0);
        assert_eq!(analytics.retry_count, 1);
        assert_eq!(mock.dispatch_log().len(), 3);
        // 第二批未派发，c 放回待上传集合
        assert_eq!(session.pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_while_uploading_is_rejected() {
        let mock = Arc::new(MockTransport::ok());
        let sched = scheduler(mock.clone());
        let session = session_with_files(&["a.mp4"]);

        session.begin_run(1);
        let analytics = sched.run(&session, observer()).await.unwrap();

        // 没有消费待上传集合，也没有发起任何请求
        assert_eq!(analytics.success_count, 0);
        assert_eq!(session.pending_count(), 1);
        assert_eq!(mock.discovery_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_worklist_is_noop() {
        let mock = Arc::new(MockTransport::ok());
        let sched = scheduler(mock.clone());
        let session = session_with_files(&[]);

        let analytics = sched.run(&session, observer()).await.unwrap();
        assert_eq!(analytics.total_files, 0);
        assert_eq!(mock.discovery_calls.load(Ordering::SeqCst), 0);
    }
}
