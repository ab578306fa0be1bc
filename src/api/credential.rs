// API 凭证

use anyhow::Result;

/// DoodAPI 凭证
///
/// 构造时做格式校验（字母数字，长度 ≥ 12）。
/// Display / Debug 只输出掩码形式，完整凭证永不进入日志和诊断报告
#[derive(Clone, PartialEq, Eq)]
pub struct ApiCredential {
    key: String,
}

/// 凭证最小长度
pub const MIN_CREDENTIAL_LEN: usize = 12;

impl ApiCredential {
    /// 创建凭证（带格式校验）
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        let key = key.trim().to_string();

        if key.len() < MIN_CREDENTIAL_LEN {
            anyhow::bail!(
                "API key 格式无效: 长度 {} 小于最小长度 {}",
                key.len(),
                MIN_CREDENTIAL_LEN
            );
        }
        if !key.chars().all(|c| c.is_ascii_alphanumeric()) {
            anyhow::bail!("API key 格式无效: 只允许字母和数字");
        }

        Ok(Self { key })
    }

    /// 完整凭证值（仅供传输层拼接请求使用）
    pub fn expose(&self) -> &str {
        &self.key
    }

    /// 凭证长度
    pub fn len(&self) -> usize {
        self.key.len()
    }

    /// 是否为空（格式校验保证非空，保留以满足 len 的惯例配对）
    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }

    /// 掩码形式: 前 4 位 + 长度，用于日志和诊断报告
    pub fn masked(&self) -> String {
        format!("{}... ({} chars)", &self.key[..4], self.key.len())
    }
}

impl std::fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.masked())
    }
}

impl std::fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredential")
            .field("key", &self.masked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_credential() {
        let cred = ApiCredential::new("abc123def456").unwrap();
        assert_eq!(cred.expose(), "abc123def456");
        assert_eq!(cred.len(), 12);
    }

    #[test]
    fn test_trims_whitespace() {
        let cred = ApiCredential::new("  abc123def456  ").unwrap();
        assert_eq!(cred.expose(), "abc123def456");
    }

    #[test]
    fn test_too_short_rejected() {
        assert!(ApiCredential::new("abc123").is_err());
        assert!(ApiCredential::new("").is_err());
    }

    #[test]
    fn test_non_alphanumeric_rejected() {
        assert!(ApiCredential::new("abc123def45!").is_err());
        assert!(ApiCredential::new("abc123 def456").is_err());
    }

    #[test]
    fn test_display_never_leaks_full_key() {
        let cred = ApiCredential::new("supersecretkey9000").unwrap();
        let shown = format!("{}", cred);
        assert!(shown.starts_with("supe..."));
        assert!(!shown.contains("supersecretkey9000"));
        assert!(shown.contains("18 chars"));

        let debug = format!("{:?}", cred);
        assert!(!debug.contains("supersecretkey9000"));
    }
}
