use std::env;
use std::time::Duration;

use crate::metrics::{MetricsOptions, DEFAULT_GRACE_WAIT, DEFAULT_PPROF_PATH};
use crate::middleware::{LogLevel, LoggerOptions};

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_METRICS_ADDR: &str = "127.0.0.1:9090";

/// Settings of the demo binaries, read from the environment.
#[derive(Clone, Debug)]
pub struct DemoConfig {
    pub auth_secret: String,
    pub listen_addr: String,
    pub metrics_addr: String,
    pub pprof_path: String,
    pub grace_wait: Duration,
    pub log_level: LogLevel,
    pub log_colored: bool,
}

impl DemoConfig {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let auth_secret = lookup("AUTH_SECRET")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "AUTH_SECRET must be set".to_string())?;

        let grace_wait = match lookup("METRICS_GRACE_WAIT_MS") {
            Some(ms) => Duration::from_millis(
                ms.parse()
                    .map_err(|_| format!("METRICS_GRACE_WAIT_MS should be milliseconds, got {ms}"))?,
            ),
            None => DEFAULT_GRACE_WAIT,
        };

        let log_level = match lookup("LOG_LEVEL") {
            Some(level) => level.parse().map_err(|e| format!("LOG_LEVEL: {e}"))?,
            None => LogLevel::default(),
        };

        let log_colored = match lookup("LOG_COLORED").as_deref() {
            None | Some("false") | Some("0") => false,
            Some("true") | Some("1") => true,
            Some(other) => return Err(format!("LOG_COLORED should be true or false, got {other}")),
        };

        Ok(Self {
            auth_secret,
            listen_addr: lookup("LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            metrics_addr: lookup("METRICS_ADDR").unwrap_or_else(|| DEFAULT_METRICS_ADDR.to_string()),
            pprof_path: lookup("PPROF_PATH").unwrap_or_else(|| DEFAULT_PPROF_PATH.to_string()),
            grace_wait,
            log_level,
            log_colored,
        })
    }

    pub fn metrics_options(&self) -> MetricsOptions {
        MetricsOptions::default()
            .with_addr(self.metrics_addr.clone())
            .with_pprof_path(self.pprof_path.clone())
            .with_grace_wait(self.grace_wait)
    }

    pub fn logger_options(&self) -> LoggerOptions {
        let opts = LoggerOptions::default().with_level(self.log_level);
        if self.log_colored {
            opts.colored()
        } else {
            opts
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = DemoConfig::from_lookup(lookup(&[("AUTH_SECRET", "s3cret")])).unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.metrics_addr, "127.0.0.1:9090");
        assert_eq!(config.pprof_path, "/pprof");
        assert_eq!(config.grace_wait, Duration::from_secs(1));
        assert_eq!(config.log_level, LogLevel::Debug);
        assert!(!config.log_colored);
    }

    #[test]
    fn test_overrides() {
        let config = DemoConfig::from_lookup(lookup(&[
            ("AUTH_SECRET", "s3cret"),
            ("METRICS_GRACE_WAIT_MS", "250"),
            ("LOG_LEVEL", "info"),
            ("LOG_COLORED", "true"),
            ("PPROF_PATH", "/debug/pprof"),
        ]))
        .unwrap();

        assert_eq!(config.grace_wait, Duration::from_millis(250));
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(config.logger_options().colored);
        assert_eq!(config.metrics_options().pprof_path, "/debug/pprof");
    }

    #[test]
    fn test_errors() {
        assert!(DemoConfig::from_lookup(lookup(&[])).is_err());
        assert!(DemoConfig::from_lookup(lookup(&[
            ("AUTH_SECRET", "s"),
            ("METRICS_GRACE_WAIT_MS", "soon"),
        ]))
        .is_err());
        assert!(DemoConfig::from_lookup(lookup(&[("AUTH_SECRET", "s"), ("LOG_LEVEL", "trace")])).is_err());
    }
}
