//! 配置管理模块
//!
//! 配置加载顺序：默认值 → YAML 文件 → 环境变量。

mod types;

pub use types::{
    Config, LoggingConfig, PredictorConfig, QuotaRetryConfig, RateLimitConfig, ServerConfig,
    TokenConfig, UpstreamConfig, WarpConfig,
};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("读取配置文件失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("解析配置文件失败: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("环境变量 {key} 无效: {value}")]
    InvalidEnv { key: String, value: String },

    #[error("配置项无效: {0}")]
    Invalid(String),
}

/// 默认配置文件路径 (~/.config/warpcast/config.yaml)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("warpcast").join("config.yaml"))
}

/// 展开路径中的 `~`
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

impl Config {
    /// 加载配置
    ///
    /// 未指定路径时使用默认路径；文件不存在时返回默认配置。
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(Path::to_path_buf).or_else(default_config_path);

        let mut config = match path {
            Some(p) if p.exists() => {
                tracing::info!("[CONFIG] 加载配置文件: {}", p.display());
                Self::from_yaml(&std::fs::read_to_string(&p)?)?
            }
            _ => Config::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// 从 YAML 字符串解析
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Config::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// 应用环境变量覆盖
    ///
    /// `lookup` 抽象了环境变量读取，便于测试。
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("HOST") {
            self.server.host = v;
        }
        if let Some(v) = get("PORT") {
            self.server.port = parse_env("PORT", &v)?;
        }
        if let Some(v) = get("API_TOKEN") {
            self.server.api_key = Some(v);
        }

        if let Some(v) = get("WARP_BASE_URL") {
            self.warp.base_url = v;
        }
        if let Some(v) = get("WARP_BRIDGE_URL") {
            self.warp.bridge_url = v;
        }
        if let Some(v) = get("CLIENT_VERSION") {
            self.warp.client_version = v;
        }
        if let Some(v) = get("OS_CATEGORY") {
            self.warp.os_category = v;
        }
        if let Some(v) = get("OS_NAME") {
            self.warp.os_name = v;
        }
        if let Some(v) = get("OS_VERSION") {
            self.warp.os_version = v;
        }
        if let Some(v) = get("WARP_REFRESH_TOKEN") {
            self.warp.refresh_token = Some(v);
        }
        if let Some(v) = get("WARP_JWT") {
            self.warp.jwt = Some(v);
        }

        if let Some(v) = get("RATE_LIMIT_MAX_PER_HOUR") {
            self.rate_limit.max_per_hour = parse_env("RATE_LIMIT_MAX_PER_HOUR", &v)?;
        }
        if let Some(v) = get("RATE_LIMIT_MAX_PER_DAY") {
            self.rate_limit.max_per_day = parse_env("RATE_LIMIT_MAX_PER_DAY", &v)?;
        }
        if let Some(v) = get("RATE_LIMIT_MIN_INTERVAL") {
            self.rate_limit.min_interval_secs = parse_env("RATE_LIMIT_MIN_INTERVAL", &v)?;
        }

        if let Some(v) = get("QUOTA_PREDICTOR_ENABLED") {
            self.predictor.enabled = parse_env("QUOTA_PREDICTOR_ENABLED", &v)?;
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.logging.level = v.to_lowercase();
        }

        Ok(())
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("warp.base_url", &self.warp.base_url),
            ("warp.bridge_url", &self.warp.bridge_url),
        ] {
            url::Url::parse(value)
                .map_err(|e| ConfigError::Invalid(format!("{} 不是合法 URL ({}): {}", name, e, value)))?;
        }

        if self.rate_limit.max_per_hour == 0 || self.rate_limit.max_per_day == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.max_per_hour / max_per_day 必须大于 0".to_string(),
            ));
        }
        if self.rate_limit.max_per_hour > self.rate_limit.max_per_day {
            return Err(ConfigError::Invalid(
                "rate_limit.max_per_hour 不能大于 max_per_day".to_string(),
            ));
        }
        if self.retry.buffered_max_attempts == 0 || self.retry.streaming_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry 最大尝试次数必须大于 0".to_string(),
            ));
        }
        if self.token.cache_ttl_secs == 0 || self.token.dedup_window_secs == 0 {
            return Err(ConfigError::Invalid(
                "token.cache_ttl_secs / dedup_window_secs 必须大于 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 28889);
        assert_eq!(config.token.safety_margin_secs, 300);
        assert_eq!(config.rate_limit.max_per_hour, 10);
        assert_eq!(config.retry.buffered_max_attempts, 5);
        assert_eq!(config.retry.streaming_max_attempts, 2);
        assert!(!config.predictor.enabled);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
server:
  port: 9000
rate_limit:
  max_per_hour: 3
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.rate_limit.max_per_hour, 3);
        assert_eq!(config.rate_limit.max_per_day, 50);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "warp:\n  bridge_url: http://10.0.0.1:28888\nupstream:\n  model_aliases:\n    gpt-4o-mini: gpt-4o"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.warp.bridge_url, "http://10.0.0.1:28888");
        assert_eq!(
            config.upstream.model_aliases.get("gpt-4o-mini").map(String::as_str),
            Some("gpt-4o")
        );
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.warp.base_url, "https://api.warp.dev");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PORT", "30000"),
            ("WARP_REFRESH_TOKEN", "rt-123"),
            ("RATE_LIMIT_MAX_PER_HOUR", "4"),
            ("WARP_JWT", "   "),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.port, 30000);
        assert_eq!(config.warp.refresh_token.as_deref(), Some("rt-123"));
        assert_eq!(config.rate_limit.max_per_hour, 4);
        // 空白值视为未设置
        assert!(config.warp.jwt.is_none());
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = Config::default();
        let result = config.apply_env_overrides(|k| (k == "PORT").then(|| "abc".to_string()));
        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut config = Config::default();
        config.warp.bridge_url = "not a url".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = Config::default();
        config.rate_limit.max_per_hour = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/etc/warpcast"), PathBuf::from("/etc/warpcast"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/a.yaml"), home.join("a.yaml"));
        }
    }
}
