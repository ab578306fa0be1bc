// 代理兜底路由
//
// 浏览器跨域拦截表现为网络层失败；一旦在发现调用上观察到该信号，
// 本会话后续所有请求都改走公共 CORS 中继，不再自动回退直连

use crate::api::{CallKind, TransportError, TransportErrorKind};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

/// 默认 CORS 中继前缀
pub const DEFAULT_PROXY_PREFIX: &str = "https://api.allorigins.win/raw?url=";

/// 会话级持久化键：代理路由已启用
pub const PROXY_STATE_KEY: &str = "routing-proxy-enabled";

/// 路由状态（每次请求前由路由器解析出的值）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingState {
    /// 是否经由代理
    pub use_proxy: bool,
    /// 代理前缀
    pub proxy_prefix: String,
}

impl RoutingState {
    /// 按当前路由重写目标 URL
    ///
    /// 直连时原样返回；代理路由时在目标前拼接中继前缀
    pub fn rewrite(&self, target: &str) -> String {
        if self.use_proxy {
            format!("{}{}", self.proxy_prefix, target)
        } else {
            target.to_string()
        }
    }
}

/// 兜底触发范围
///
/// 原始实现只在发现调用上触发自动兜底；上传调用是否同样触发
/// 保留为显式配置项
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackScope {
    /// 仅发现调用触发自动兜底（原始行为）
    #[default]
    Discovery,
    /// 发现调用和上传调用都触发
    All,
}

/// 会话级键值存储接口
///
/// 核心向其写入路由决定，由胶水层决定实际存储介质
/// （浏览器场景为 sessionStorage，测试和默认实现为内存）
pub trait SessionStore: Send + Sync {
    /// 读取键值
    fn get(&self, key: &str) -> Option<String>;
    /// 写入键值
    fn set(&self, key: &str, value: &str);
}

/// 内存键值存储（默认实现）
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries.lock().unwrap().insert(key.to_string(), value.to_string());
    }
}

/// 兜底路由器
///
/// `use_proxy` 在会话内单调：只提供启用操作，没有关闭操作，
/// 即使之后直连可以成功也不回退
pub struct FallbackRouter {
    /// 代理路由是否已启用
    use_proxy: AtomicBool,
    /// 代理前缀
    proxy_prefix: String,
    /// 自动兜底的触发范围
    scope: FallbackScope,
    /// 会话级持久化存储
    store: Option<Arc<dyn SessionStore>>,
}

impl FallbackRouter {
    /// 创建路由器（默认中继前缀，仅发现调用触发）
    pub fn new() -> Self {
        Self::with_config(DEFAULT_PROXY_PREFIX, FallbackScope::Discovery, None)
    }

    /// 创建路由器（完整配置）
    ///
    /// 提供存储时会读回上一次的路由决定（同一会话的恢复钩子）
    pub fn with_config(
        proxy_prefix: &str,
        scope: FallbackScope,
        store: Option<Arc<dyn SessionStore>>,
    ) -> Self {
        let restored = store
            .as_ref()
            .and_then(|s| s.get(PROXY_STATE_KEY))
            .map(|v| v == "enabled")
            .unwrap_or(false);

        if restored {
            info!("💫 从会话存储恢复 CORS 代理路由");
        }

        Self {
            use_proxy: AtomicBool::new(restored),
            proxy_prefix: proxy_prefix.to_string(),
            scope,
            store,
        }
    }

    /// 当前路由状态
    pub fn current(&self) -> RoutingState {
        RoutingState {
            use_proxy: self.use_proxy.load(Ordering::SeqCst),
            proxy_prefix: self.proxy_prefix.clone(),
        }
    }

    /// 代理路由是否已启用
    pub fn proxy_enabled(&self) -> bool {
        self.use_proxy.load(Ordering::SeqCst)
    }

    /// 手动启用代理路由（幂等）
    ///
    /// 返回 true 表示本次调用使状态发生变化
    pub fn enable_proxy(&self) -> bool {
        let newly_enabled = !self.use_proxy.swap(true, Ordering::SeqCst);

        if newly_enabled {
            info!("🌐 CORS 代理已启用，本会话后续请求全部经由代理");
            if let Some(ref store) = self.store {
                store.set(PROXY_STATE_KEY, "enabled");
            }
        }

        newly_enabled
    }

    /// 根据观察到的传输错误决定是否启用代理路由
    ///
    /// 仅网络错误触发；触发范围由 `FallbackScope` 控制。
    /// 返回 true 表示路由因本次错误刚刚切换
    pub fn decide_on_error(&self, error: &TransportError, call: CallKind) -> bool {
        if error.kind != TransportErrorKind::Network {
            return false;
        }

        let in_scope = match self.scope {
            FallbackScope::Discovery => call == CallKind::Discovery,
            FallbackScope::All => true,
        };
        if !in_scope {
            return false;
        }

        if self.use_proxy.load(Ordering::SeqCst) {
            return false;
        }

        info!("⚠️ 检测到网络层失败，自动切换 CORS 代理路由");
        self.enable_proxy()
    }
}

impl Default for FallbackRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network_error() -> TransportError {
        TransportError::network("Failed to fetch")
    }

    #[test]
    fn test_rewrite_direct_and_proxied() {
        let direct = RoutingState {
            use_proxy: false,
            proxy_prefix: DEFAULT_PROXY_PREFIX.to_string(),
        };
        assert_eq!(direct.rewrite("https://doodapi.co/api/x"), "https://doodapi.co/api/x");

        let proxied = RoutingState {
            use_proxy: true,
            proxy_prefix: DEFAULT_PROXY_PREFIX.to_string(),
        };
        assert_eq!(
            proxied.rewrite("https://doodapi.co/api/x"),
            "https://api.allorigins.win/raw?url=https://doodapi.co/api/x"
        );
    }

    #[test]
    fn test_enable_proxy_idempotent() {
        let router = FallbackRouter::new();
        assert!(!router.proxy_enabled());

        // 第一次启用状态变化，第二次无副作用
        assert!(router.enable_proxy());
        assert!(router.proxy_enabled());
        assert!(!router.enable_proxy());
        assert!(router.proxy_enabled());
    }

    #[test]
    fn test_network_error_on_discovery_enables_proxy() {
        let router = FallbackRouter::new();
        assert!(router.decide_on_error(&network_error(), CallKind::Discovery));
        assert!(router.proxy_enabled());

        // 已启用后不再重复触发
        assert!(!router.decide_on_error(&network_error(), CallKind::Discovery));
    }

    #[test]
    fn test_upload_errors_ignored_under_discovery_scope() {
        let router = FallbackRouter::new();
        assert!(!router.decide_on_error(&network_error(), CallKind::Upload));
        assert!(!router.proxy_enabled());
    }

    #[test]
    fn test_upload_errors_trigger_under_all_scope() {
        let router = FallbackRouter::with_config(DEFAULT_PROXY_PREFIX, FallbackScope::All, None);
        assert!(router.decide_on_error(&network_error(), CallKind::Upload));
        assert!(router.proxy_enabled());
    }

    #[test]
    fn test_non_network_errors_never_trigger() {
        let router = FallbackRouter::new();
        let timeout = TransportError::timeout("timed out");
        let status = TransportError::from_status(500, CallKind::Discovery);

        assert!(!router.decide_on_error(&timeout, CallKind::Discovery));
        assert!(!router.decide_on_error(&status, CallKind::Discovery));
        assert!(!router.proxy_enabled());
    }

    #[test]
    fn test_store_persistence_roundtrip() {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());

        let router =
            FallbackRouter::with_config(DEFAULT_PROXY_PREFIX, FallbackScope::Discovery, Some(store.clone()));
        router.enable_proxy();
        assert_eq!(store.get(PROXY_STATE_KEY).as_deref(), Some("enabled"));

        // 同一会话内重建路由器可以恢复决定
        let restored =
            FallbackRouter::with_config(DEFAULT_PROXY_PREFIX, FallbackScope::Discovery, Some(store));
        assert!(restored.proxy_enabled());
    }
}
