//! Environment-driven configuration.
//!
//! Values come from the process environment; `main` loads a `.env` file first
//! via dotenvy when one exists.

use std::env;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Job queue backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobBackend {
    /// In-process queue, jobs are lost on restart
    Memory,
    /// `job_queue` table reached through `broker_url`
    Postgres,
}

impl Default for JobBackend {
    fn default() -> Self {
        Self::Postgres
    }
}

impl FromStr for JobBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "in_memory" | "inmemory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            _ => Err(()),
        }
    }
}

/// Configuration for the background job system
#[derive(Debug, Clone)]
pub struct JobsConfig {
    pub backend: JobBackend,
    /// Queue connection string, falls back to the database URL
    pub broker_url: Option<String>,
    pub worker_count: usize,
    pub max_retries: u32,
    /// Base retry backoff in seconds (exponential: base * 2^attempt)
    pub retry_backoff_seconds: u64,
    pub poll_interval_ms: u64,
    /// How long a claimed job may run before another worker may reclaim it
    pub lease_seconds: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            backend: JobBackend::default(),
            broker_url: None,
            worker_count: 4,
            max_retries: 3,
            retry_backoff_seconds: 5,
            poll_interval_ms: 200,
            lease_seconds: 300,
        }
    }
}

/// Aggregate total cache backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    /// moka slot private to this process
    Memory,
    /// Redis slot shared by every process, reached through `url`
    Redis,
}

impl Default for CacheBackend {
    fn default() -> Self {
        Self::Memory
    }
}

impl FromStr for CacheBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "in_memory" | "moka" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            _ => Err(()),
        }
    }
}

/// Configuration for the aggregate total cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    /// Connection string, required for the Redis backend
    pub url: Option<String>,
    /// Name of the slot holding the total price
    pub total_key: String,
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            url: None,
            total_key: "price_cache".to_string(),
            ttl_seconds: 60 * 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    pub database_max_connections: u32,
    pub jobs: JobsConfig,
    pub cache: CacheConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let mut jobs = JobsConfig::default();
        if let Some(backend) = lookup("JOBS_BACKEND") {
            jobs.backend = backend.parse().map_err(|_| ConfigError::Invalid {
                name: "JOBS_BACKEND",
                value: backend,
            })?;
        }
        jobs.broker_url = lookup("BROKER_URL");
        jobs.worker_count = parse_or(&lookup, "JOBS_WORKER_COUNT", jobs.worker_count)?;
        jobs.max_retries = parse_or(&lookup, "JOBS_MAX_RETRIES", jobs.max_retries)?;
        jobs.retry_backoff_seconds = parse_or(
            &lookup,
            "JOBS_RETRY_BACKOFF_SECONDS",
            jobs.retry_backoff_seconds,
        )?;
        jobs.poll_interval_ms = parse_or(&lookup, "JOBS_POLL_INTERVAL_MS", jobs.poll_interval_ms)?;
        jobs.lease_seconds = parse_or(&lookup, "JOBS_LEASE_SECONDS", jobs.lease_seconds)?;

        let mut cache = CacheConfig::default();
        if let Some(backend) = lookup("CACHE_BACKEND") {
            cache.backend = backend.parse().map_err(|_| ConfigError::Invalid {
                name: "CACHE_BACKEND",
                value: backend,
            })?;
        }
        cache.url = lookup("CACHE_URL");
        if cache.backend == CacheBackend::Redis && cache.url.is_none() {
            return Err(ConfigError::Missing("CACHE_URL"));
        }
        if let Some(key) = lookup("PRICE_CACHE_NAME") {
            cache.total_key = key;
        }
        cache.ttl_seconds = parse_or(&lookup, "PRICE_CACHE_TTL_SECONDS", cache.ttl_seconds)?;

        Ok(Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8000".to_string()),
            database_url,
            database_max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            jobs,
            cache,
        })
    }

    /// Connection string for the job queue
    pub fn broker_url(&self) -> &str {
        self.jobs.broker_url.as_deref().unwrap_or(&self.database_url)
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://db/app")]))
            .unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8000");
        assert_eq!(config.jobs.backend, JobBackend::Postgres);
        assert_eq!(config.jobs.worker_count, 4);
        assert_eq!(config.cache.total_key, "price_cache");
        assert_eq!(config.cache.ttl_seconds, 3600);
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert_eq!(config.jobs.lease_seconds, 300);
        assert_eq!(config.broker_url(), "postgres://db/app");
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db/app"),
            ("BROKER_URL", "postgres://queue/jobs"),
            ("JOBS_BACKEND", "memory"),
            ("JOBS_WORKER_COUNT", "2"),
            ("PRICE_CACHE_NAME", "total_sum"),
            ("PRICE_CACHE_TTL_SECONDS", "120"),
        ]))
        .unwrap();
        assert_eq!(config.jobs.backend, JobBackend::Memory);
        assert_eq!(config.jobs.worker_count, 2);
        assert_eq!(config.cache.total_key, "total_sum");
        assert_eq!(config.cache.ttl_seconds, 120);
        assert_eq!(config.broker_url(), "postgres://queue/jobs");
    }

    #[test]
    fn test_redis_cache_backend() {
        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db/app"),
            ("CACHE_BACKEND", "redis"),
            ("CACHE_URL", "redis://cache:6379/0"),
        ]))
        .unwrap();
        assert_eq!(config.cache.backend, CacheBackend::Redis);
        assert_eq!(config.cache.url.as_deref(), Some("redis://cache:6379/0"));
    }

    #[test]
    fn test_redis_cache_requires_url() {
        let result = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db/app"),
            ("CACHE_BACKEND", "redis"),
        ]));
        assert!(matches!(result, Err(ConfigError::Missing("CACHE_URL"))));
    }

    #[test]
    fn test_missing_database_url() {
        let result = Config::from_lookup(lookup_from(&[]));
        assert!(matches!(result, Err(ConfigError::Missing("DATABASE_URL"))));
    }

    #[test]
    fn test_invalid_number() {
        let result = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db/app"),
            ("JOBS_MAX_RETRIES", "lots"),
        ]));
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { name: "JOBS_MAX_RETRIES", .. })
        ));
    }

    #[test]
    fn test_invalid_backend() {
        let result = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db/app"),
            ("JOBS_BACKEND", "rabbitmq"),
        ]));
        assert!(result.is_err());
    }
}
