//! Grader configuration
//!
//! All knobs are read once from the environment (after dotenvy) and carried
//! in an explicit struct; nothing here is a global.

use std::time::Duration;

use tracing::warn;

/// Configuration for one grader worker
#[derive(Debug, Clone)]
pub struct GraderConfig {
    /// Per-case wall-clock budget
    pub time_limit: Duration,
    /// Max characters of captured/diagnostic text before truncation
    pub output_limit: usize,
    /// Interpreter used to run submissions
    pub python_bin: String,
    /// How long fetched statements stay cached
    pub statement_cache_ttl: Duration,
    /// Bind address for the report API
    pub report_api_addr: String,
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            time_limit: Duration::from_secs_f64(4.0),
            output_limit: 10_000,
            python_bin: "python3".into(),
            statement_cache_ttl: Duration::from_secs(600),
            report_api_addr: "127.0.0.1:8900".into(),
        }
    }
}

impl GraderConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults on anything missing or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let time_limit = match std::env::var("TIME_LIMIT_SEC") {
            Ok(v) => match v.parse::<f64>() {
                Ok(secs) if secs > 0.0 => Duration::from_secs_f64(secs),
                _ => {
                    warn!("Invalid TIME_LIMIT_SEC={}, using default", v);
                    defaults.time_limit
                }
            },
            Err(_) => defaults.time_limit,
        };

        let output_limit = match std::env::var("OUTPUT_LIMIT") {
            Ok(v) => match v.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    warn!("Invalid OUTPUT_LIMIT={}, using default", v);
                    defaults.output_limit
                }
            },
            Err(_) => defaults.output_limit,
        };

        let statement_cache_ttl = std::env::var("STATEMENT_CACHE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.statement_cache_ttl);

        Self {
            time_limit,
            output_limit,
            python_bin: std::env::var("PYTHON_BIN").unwrap_or(defaults.python_bin),
            statement_cache_ttl,
            report_api_addr: std::env::var("REPORT_API_ADDR").unwrap_or(defaults.report_api_addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GraderConfig::default();
        assert_eq!(config.time_limit, Duration::from_secs_f64(4.0));
        assert_eq!(config.output_limit, 10_000);
        assert_eq!(config.python_bin, "python3");
        assert_eq!(config.statement_cache_ttl, Duration::from_secs(600));
    }
}
