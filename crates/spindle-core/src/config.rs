//! Runtime configuration for the scheduler and the event channel.

use std::time::Duration;

use tracing::warn;
use url::Url;

use crate::error::ConfigError;
use crate::metrics::DEFAULT_CAPACITY;
use crate::queue::{Jitter, RetryPolicy};

/// Environment variable holding the API base url.
pub const API_BASE_URL_ENV: &str = "SPINDLE_API_BASE_URL";

/// Used when [`API_BASE_URL_ENV`] is unset or blank.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:5000/api";

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of tasks executing at once.
    pub concurrency: usize,

    /// Poll interval while every slot is busy.
    pub busy_poll: Duration,

    /// Poll interval while there is nothing to dispatch.
    pub idle_poll: Duration,

    /// `maxRetries` for requests that don't set one.
    pub default_max_retries: u32,

    /// Per-attempt deadline. `None` leaves timeouts to executors.
    pub task_timeout: Option<Duration>,

    pub metrics_capacity: usize,

    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            busy_poll: Duration::from_millis(100),
            idle_poll: Duration::from_secs(1),
            default_max_retries: 3,
            task_timeout: None,
            metrics_capacity: DEFAULT_CAPACITY,
            retry: RetryPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// HTTP base url of the API; the channel endpoint is derived from it.
    pub api_base_url: String,

    /// Backoff between connection attempts.
    pub reconnect: RetryPolicy,

    /// Frames buffered for the writer before publish starts dropping.
    pub outbound_capacity: usize,

    /// Capacity of the local broadcast ring.
    pub broadcast_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            reconnect: RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(30))
                .with_jitter(Jitter::Equal),
            outbound_capacity: 256,
            broadcast_capacity: 1024,
        }
    }
}

impl EventBusConfig {
    /// Read the base url from `SPINDLE_API_BASE_URL`, falling back to
    /// [`DEFAULT_API_BASE_URL`] with a warning.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(std::env::var(API_BASE_URL_ENV).ok())
    }

    pub(crate) fn resolve(value: Option<String>) -> Result<Self, ConfigError> {
        let api_base_url = match value {
            Some(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => {
                warn!(
                    env = API_BASE_URL_ENV,
                    fallback = DEFAULT_API_BASE_URL,
                    "api base url not configured; using fallback"
                );
                DEFAULT_API_BASE_URL.to_string()
            }
        };
        let config = Self {
            api_base_url,
            ..Self::default()
        };
        config.channel_endpoint()?;
        Ok(config)
    }

    /// `http(s)://host/api` becomes `ws(s)://host/api/ws`.
    pub fn channel_endpoint(&self) -> Result<Url, ConfigError> {
        let mut url = Url::parse(&self.api_base_url).map_err(|source| ConfigError::InvalidUrl {
            value: self.api_base_url.clone(),
            source,
        })?;
        if url.host_str().is_none() {
            return Err(ConfigError::MissingHost(self.api_base_url.clone()));
        }

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        };
        url.set_scheme(scheme)
            .map_err(|()| ConfigError::UnsupportedScheme(scheme.to_string()))?;

        let path = format!("{}/ws", url.path().trim_end_matches('/'));
        url.set_path(&path);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[rstest]
    #[case("http://localhost:5000/api", "ws://localhost:5000/api/ws")]
    #[case("https://example.com/api/", "wss://example.com/api/ws")]
    #[case("http://10.0.0.2:8080", "ws://10.0.0.2:8080/ws")]
    fn channel_endpoint_is_derived_from_base_url(#[case] base: &str, #[case] expected: &str) {
        let config = EventBusConfig {
            api_base_url: base.to_string(),
            ..EventBusConfig::default()
        };
        assert_eq!(config.channel_endpoint().unwrap().as_str(), expected);
    }

    #[rstest]
    #[case(None)]
    #[case(Some("   ".to_string()))]
    fn missing_base_url_falls_back(#[case] value: Option<String>) {
        let config = EventBusConfig::resolve(value).unwrap();
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn logs_of(f: impl FnOnce()) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = captured.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn fallback_is_logged() {
        let logs = logs_of(|| {
            EventBusConfig::resolve(None).unwrap();
        });
        assert!(logs.contains("WARN"), "{logs}");
        assert!(logs.contains("using fallback"), "{logs}");
        assert!(logs.contains(DEFAULT_API_BASE_URL), "{logs}");

        let logs = logs_of(|| {
            EventBusConfig::resolve(Some("https://api.example.com".into())).unwrap();
        });
        assert!(!logs.contains("using fallback"), "{logs}");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let result = EventBusConfig::resolve(Some("not a url".into()));
        assert!(matches!(result, Err(ConfigError::InvalidUrl { .. })));

        let result = EventBusConfig::resolve(Some("ftp://files.example.com".into()));
        assert!(matches!(result, Err(ConfigError::UnsupportedScheme(s)) if s == "ftp"));
    }

    #[test]
    fn zero_concurrency_is_invalid() {
        let config = SchedulerConfig {
            concurrency: 0,
            ..SchedulerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroConcurrency)));
        assert!(SchedulerConfig::default().validate().is_ok());
    }
}
