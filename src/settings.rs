//! Engine settings.
//!
//! Resolution order is constructor arguments > settings object >
//! defaults; the defaults here match the documented contract. All
//! validation problems are collected and reported together so the user
//! can fix everything in one pass.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default User-Agent sent with every request.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Top-level settings for an engine instance.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub throttle: AutoThrottleSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub cache: CacheSettings,
}

/// HTTP client and concurrency settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    /// Global maximum number of in-flight requests.
    pub concurrency: usize,
    /// Maximum in-flight requests per canonical host.
    pub per_host: usize,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Enforce robots.txt before fetching from a host.
    pub respect_robots: bool,
    /// Statuses accepted as success; anything else is an error.
    pub allowed_response_codes: Vec<u16>,
    /// Follow 3xx redirects.
    pub allow_redirects: bool,
    /// Default request headers. A User-Agent is always present.
    pub headers: HashMap<String, String>,
    /// Per-host proxy URL map.
    pub proxies: HashMap<String, String>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        let mut headers = HashMap::new();
        headers.insert("User-Agent".to_string(), DEFAULT_USER_AGENT.to_string());
        Self {
            concurrency: 16,
            per_host: 8,
            timeout_secs: 15,
            respect_robots: true,
            allowed_response_codes: vec![200],
            allow_redirects: true,
            headers,
            proxies: HashMap::new(),
        }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn user_agent(&self) -> &str {
        self.headers
            .get("User-Agent")
            .map(String::as_str)
            .unwrap_or(DEFAULT_USER_AGENT)
    }
}

/// Adaptive per-host throttling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoThrottleSettings {
    /// Desired concurrent requests per host. `None` derives a target
    /// from the global concurrency.
    pub target_concurrency: Option<f64>,
    /// Initial per-host delay in seconds.
    pub start_delay_secs: f64,
    /// Delay ceiling in seconds.
    pub max_delay_secs: f64,
}

impl Default for AutoThrottleSettings {
    fn default() -> Self {
        Self {
            target_concurrency: None,
            start_delay_secs: 0.25,
            max_delay_secs: 10.0,
        }
    }
}

/// Retry policy for transient fetch failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Attempts beyond the first.
    pub max_retries: u32,
    /// Response statuses that trigger a retry.
    pub statuses: Vec<u16>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            statuses: vec![500, 502, 503, 504],
        }
    }
}

/// Optional response cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    pub enabled: bool,
    /// `sqlite` is the only backend compiled in; `redis` is recognised
    /// but reported as unavailable.
    pub backend: String,
    /// Path of the sqlite database file.
    pub path: String,
    /// Entry TTL in seconds.
    pub expire_after_secs: u64,
    /// Methods eligible for caching.
    pub allowed_methods: Vec<String>,
    /// Query parameters excluded from cache keys. A trailing `*` makes
    /// the pattern a prefix match.
    pub ignored_params: Vec<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: "sqlite".to_string(),
            path: "cache.db".to_string(),
            expire_after_secs: 7 * 24 * 60 * 60,
            allowed_methods: vec!["GET".to_string(), "HEAD".to_string()],
            ignored_params: vec!["utm_*".to_string(), "fbclid".to_string()],
        }
    }
}

impl Settings {
    /// Load settings from a TOML file, then validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::InvalidSettings(vec![format!(
                "failed to read settings file '{}': {}",
                path.display(),
                e
            )])
        })?;
        let settings: Settings = toml::from_str(&content).map_err(|e| {
            ConfigError::InvalidSettings(vec![format!(
                "failed to parse settings file '{}': {}",
                path.display(),
                e
            )])
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate all fields, collecting every problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if self.http.concurrency == 0 {
            errors.push("http.concurrency must be positive".to_string());
        }
        if self.http.per_host == 0 {
            errors.push("http.per_host must be positive".to_string());
        }
        if self.http.timeout_secs == 0 {
            errors.push("http.timeout_secs must be positive".to_string());
        }
        if self.http.allowed_response_codes.is_empty() {
            errors.push("http.allowed_response_codes must not be empty".to_string());
        }
        for (host, proxy) in &self.http.proxies {
            if url::Url::parse(proxy).is_err() {
                errors.push(format!("invalid proxy URL '{}' for host '{}'", proxy, host));
            }
        }

        if self.throttle.start_delay_secs < 0.0 {
            errors.push("throttle.start_delay_secs must be non-negative".to_string());
        }
        if self.throttle.max_delay_secs < self.throttle.start_delay_secs {
            errors.push("throttle.max_delay_secs must be >= start_delay_secs".to_string());
        }
        if let Some(target) = self.throttle.target_concurrency {
            if target <= 0.0 {
                errors.push("throttle.target_concurrency must be positive".to_string());
            }
        }

        if self.cache.enabled && self.cache.backend != "sqlite" && self.cache.backend != "redis" {
            errors.push(format!("unknown cache backend '{}'", self.cache.backend));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::InvalidSettings(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let s = Settings::default();
        assert_eq!(s.http.concurrency, 16);
        assert_eq!(s.http.per_host, 8);
        assert_eq!(s.http.timeout_secs, 15);
        assert!(s.http.respect_robots);
        assert!(s.http.allow_redirects);
        assert_eq!(s.http.allowed_response_codes, vec![200]);
        assert_eq!(s.retry.max_retries, 3);
        assert_eq!(s.retry.statuses, vec![500, 502, 503, 504]);
        assert!(!s.cache.enabled);
        assert_eq!(s.cache.backend, "sqlite");
        assert_eq!(s.cache.expire_after_secs, 7 * 24 * 60 * 60);
        assert!((s.throttle.start_delay_secs - 0.25).abs() < f64::EPSILON);
        assert!((s.throttle.max_delay_secs - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn default_settings_pass_validation() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut s = Settings::default();
        s.http.concurrency = 0;
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("http.concurrency must be positive"));
    }

    #[test]
    fn validate_collects_multiple_errors() {
        let mut s = Settings::default();
        s.http.concurrency = 0;
        s.http.per_host = 0;
        s.throttle.max_delay_secs = 0.0;
        let msg = s.validate().unwrap_err().to_string();
        assert!(msg.contains("http.concurrency"));
        assert!(msg.contains("http.per_host"));
        assert!(msg.contains("max_delay_secs"));
    }

    #[test]
    fn validate_rejects_bad_proxy_url() {
        let mut s = Settings::default();
        s.http
            .proxies
            .insert("example.com".to_string(), "not a url".to_string());
        assert!(s.validate().is_err());
    }

    #[test]
    fn load_roundtrips_through_toml() {
        let s = Settings::default();
        let text = toml::to_string(&s).unwrap();
        let back: Settings = toml::from_str(&text).unwrap();
        assert_eq!(back.http.concurrency, s.http.concurrency);
        assert_eq!(back.cache.ignored_params, s.cache.ignored_params);
    }
}
