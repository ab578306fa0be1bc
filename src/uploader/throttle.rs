// 进度回调节流器
//
// 并发上传的每次尝试都会产生进度回调，节流器把回调频率压到
// 每个间隔最多一次，避免事件风暴

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 默认节流间隔（毫秒）
pub const DEFAULT_THROTTLE_INTERVAL_MS: u64 = 200;

/// 进度回调节流器
///
/// 用原子时间戳做 CAS，无锁，可被批次内的多个任务共享
#[derive(Debug)]
pub struct ProgressThrottler {
    /// 创建时刻（时间戳的锚点）
    origin: Instant,
    /// 上次放行的时间（相对 origin 的纳秒数，0 表示从未放行）
    last_emit_nanos: AtomicU64,
    /// 节流间隔（纳秒）
    interval_nanos: u64,
}

impl ProgressThrottler {
    /// 创建节流器
    pub fn new(interval: Duration) -> Self {
        Self {
            origin: Instant::now(),
            last_emit_nanos: AtomicU64::new(0),
            interval_nanos: interval.as_nanos() as u64,
        }
    }

    /// 使用默认间隔（200ms）创建
    pub fn default_interval() -> Self {
        Self::new(Duration::from_millis(DEFAULT_THROTTLE_INTERVAL_MS))
    }

    /// 检查是否应该放行本次回调
    ///
    /// 距上次放行超过间隔时返回 true 并推进时间戳；
    /// CAS 失败说明并发的另一次调用刚刚放行，本次抑制
    pub fn should_emit(&self) -> bool {
        let now_nanos = self.origin.elapsed().as_nanos() as u64;
        let last = self.last_emit_nanos.load(Ordering::Relaxed);

        if last != 0 && now_nanos.saturating_sub(last) < self.interval_nanos {
            return false;
        }

        self.last_emit_nanos
            .compare_exchange(last, now_nanos.max(1), Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }
}
