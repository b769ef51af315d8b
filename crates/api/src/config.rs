//! Process configuration read from the environment.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};

use stockroom_infra::{RetryPolicy, ServiceConfig};
use stockroom_ratelimit::{Limit, LockoutPolicy, RateLimitConfig};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Postgres when true, in-memory otherwise.
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub rate_limit: RateLimitConfig,
    pub lockout: LockoutPolicy,
    pub retry: RetryPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            use_persistent_stores: false,
            database_url: None,
            database_max_connections: 10,
            rate_limit: RateLimitConfig::default(),
            lockout: LockoutPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Unset variables take their defaults;
    /// set but unparsable ones are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let rl = &defaults.rate_limit;
        let lock = &defaults.lockout;
        let retry = &defaults.retry;

        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let use_persistent_stores = parse_or(&get, "USE_PERSISTENT_STORES", false)?;
        let database_url = get("DATABASE_URL");
        if use_persistent_stores && database_url.is_none() {
            bail!("DATABASE_URL must be set when USE_PERSISTENT_STORES=true");
        }

        let default_limit = Limit::new(
            parse_or(&get, "RATE_LIMIT_RPS", rl.default_limit.rps)?,
            parse_or(&get, "RATE_LIMIT_BURST", rl.default_limit.burst)?,
        );
        let login_limit = Limit::new(
            parse_or(&get, "LOGIN_RPS", rl.login_limit.rps)?,
            parse_or(&get, "LOGIN_BURST", rl.login_limit.burst)?,
        );
        for (name, limit) in [("RATE_LIMIT", default_limit), ("LOGIN", login_limit)] {
            if !(limit.rps.is_finite() && limit.rps > 0.0) || limit.burst == 0 {
                bail!("{name} limit needs a positive rate and burst");
            }
        }

        let rate_limit = RateLimitConfig::default()
            .with_default_limit(default_limit)
            .with_login_limit(login_limit)
            .with_max_keys(parse_or(&get, "RATE_LIMIT_MAX_KEYS", rl.max_keys)?)
            .with_cleanup_interval(secs(&get, "RATE_LIMIT_CLEANUP_SECS", rl.cleanup_interval)?)
            .with_idle_ttl(secs(&get, "RATE_LIMIT_IDLE_TTL_SECS", rl.idle_ttl)?);

        let lockout = LockoutPolicy::default()
            .with_threshold(parse_or(&get, "LOCKOUT_THRESHOLD", lock.threshold)?)
            .with_window(secs(&get, "LOCKOUT_WINDOW_SECS", lock.window)?)
            .with_duration(secs(&get, "LOCKOUT_DURATION_SECS", lock.duration)?)
            .with_max_identifiers(parse_or(&get, "LOCKOUT_MAX_IDENTIFIERS", lock.max_identifiers)?);

        let timeout_ms: u64 = parse_or(
            &get,
            "TX_TIMEOUT_MS",
            retry.timeout.map(|t| t.as_millis() as u64).unwrap_or(0),
        )?;
        let retry = RetryPolicy::default()
            .with_max_retries(parse_or(&get, "TX_MAX_RETRIES", retry.max_retries)?)
            .with_timeout((timeout_ms > 0).then(|| Duration::from_millis(timeout_ms)));

        Ok(Self {
            bind_addr: get("STOCKROOM_BIND_ADDR").unwrap_or(defaults.bind_addr),
            use_persistent_stores,
            database_url,
            database_max_connections: parse_or(
                &get,
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            rate_limit,
            lockout,
            retry,
        })
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig::default().with_retry(self.retry)
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(name) {
        Some(raw) => raw.trim().parse().with_context(|| format!("invalid {name}: {raw:?}")),
        None => Ok(default),
    }
}

fn secs(
    get: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: Duration,
) -> anyhow::Result<Duration> {
    parse_or(get, name, default.as_secs()).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_config(vars: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = test_config(&[]).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert!(!config.use_persistent_stores);
        assert_eq!(config.rate_limit.default_limit, Limit::new(20.0, 40));
        assert_eq!(config.rate_limit.login_limit, Limit::new(0.2, 5));
        assert_eq!(config.rate_limit.max_keys, 100_000);
        assert_eq!(config.lockout.threshold, 5);
        assert_eq!(config.lockout.window, Duration::from_secs(900));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.timeout, Some(Duration::from_millis(5000)));
    }

    #[test]
    fn variables_override_defaults() {
        let config = test_config(&[
            ("STOCKROOM_BIND_ADDR", "127.0.0.1:9000"),
            ("RATE_LIMIT_RPS", "2.5"),
            ("RATE_LIMIT_BURST", "3"),
            ("LOCKOUT_THRESHOLD", "2"),
            ("LOCKOUT_DURATION_SECS", "60"),
            ("TX_MAX_RETRIES", "0"),
            ("TX_TIMEOUT_MS", "0"),
        ])
        .unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.rate_limit.default_limit, Limit::new(2.5, 3));
        assert_eq!(config.lockout.threshold, 2);
        assert_eq!(config.lockout.duration, Duration::from_secs(60));
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(config.retry.timeout, None);
    }

    #[test]
    fn persistent_stores_need_a_database_url() {
        let err = test_config(&[("USE_PERSISTENT_STORES", "true")]).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));

        let config = test_config(&[
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/stockroom"),
        ])
        .unwrap();
        assert!(config.use_persistent_stores);
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(test_config(&[("RATE_LIMIT_BURST", "lots")]).is_err());
        assert!(test_config(&[("RATE_LIMIT_RPS", "0")]).is_err());
        assert!(test_config(&[("USE_PERSISTENT_STORES", "yes")]).is_err());
    }
}
