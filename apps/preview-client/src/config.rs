use std::env;
use std::time::Duration;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3030";
pub const DEFAULT_FAMILY_PREFIX: &str = "monoxide-preview";
pub const DEFAULT_LOG_FILTER: &str = "info,preview_client_core=debug";

/// Preview client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Origin of the preview page; the push channel and HTTP API hang off it.
    pub server_url: String,
    /// Registered font families are named `{family_prefix}-{version}`.
    pub family_prefix: String,
    pub http_timeout: Duration,
    pub log_filter: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let server_url = env::var("PREVIEW_SERVER_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.into());
        // Normalize localhost to IPv4 to avoid IPv6 (::1) preference on macOS
        let server_url = server_url.replacen("://localhost", "://127.0.0.1", 1);
        let family_prefix = env::var("PREVIEW_FONT_FAMILY_PREFIX")
            .ok()
            .filter(|prefix| !prefix.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FAMILY_PREFIX.into());
        let http_timeout = env::var("PREVIEW_HTTP_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(10));
        let log_filter = env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
        Self {
            server_url,
            family_prefix,
            http_timeout,
            log_filter,
        }
    }

    pub fn with_server_url(mut self, server_url: impl Into<String>) -> Self {
        self.server_url = server_url.into();
        self
    }

    pub fn with_family_prefix(mut self, family_prefix: impl Into<String>) -> Self {
        self.family_prefix = family_prefix.into();
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.into(),
            family_prefix: DEFAULT_FAMILY_PREFIX.into(),
            http_timeout: Duration::from_secs(10),
            log_filter: DEFAULT_LOG_FILTER.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    // Mutex to ensure environment variable tests don't run in parallel
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    const VARS: [&str; 3] = [
        "PREVIEW_SERVER_URL",
        "PREVIEW_FONT_FAMILY_PREFIX",
        "PREVIEW_HTTP_TIMEOUT_MS",
    ];

    fn with_env<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let saved: Vec<(&str, Option<String>)> =
            VARS.iter().map(|key| (*key, env::var(key).ok())).collect();
        unsafe {
            for key in VARS {
                env::remove_var(key);
            }
            for (key, value) in vars {
                env::set_var(key, value);
            }
        }
        f();
        unsafe {
            for (key, value) in saved {
                match value {
                    Some(value) => env::set_var(key, value),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server_url, "http://127.0.0.1:3030");
        assert_eq!(config.family_prefix, "monoxide-preview");
        assert_eq!(config.http_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_config_from_env_default() {
        with_env(&[], || {
            let config = Config::from_env();
            assert_eq!(config.server_url, DEFAULT_SERVER_URL);
            assert_eq!(config.family_prefix, DEFAULT_FAMILY_PREFIX);
        });
    }

    #[test]
    fn test_config_from_env_custom() {
        with_env(
            &[
                ("PREVIEW_SERVER_URL", "https://localhost:8443/playground"),
                ("PREVIEW_FONT_FAMILY_PREFIX", "mono"),
                ("PREVIEW_HTTP_TIMEOUT_MS", "250"),
            ],
            || {
                let config = Config::from_env();
                assert_eq!(config.server_url, "https://127.0.0.1:8443/playground");
                assert_eq!(config.family_prefix, "mono");
                assert_eq!(config.http_timeout, Duration::from_millis(250));
            },
        );
    }

    #[test]
    fn test_blank_prefix_and_bad_timeout_fall_back() {
        with_env(
            &[
                ("PREVIEW_FONT_FAMILY_PREFIX", "  "),
                ("PREVIEW_HTTP_TIMEOUT_MS", "soon"),
            ],
            || {
                let config = Config::from_env();
                assert_eq!(config.family_prefix, DEFAULT_FAMILY_PREFIX);
                assert_eq!(config.http_timeout, Duration::from_secs(10));
            },
        );
    }
}
