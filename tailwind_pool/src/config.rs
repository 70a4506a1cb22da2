//! Pool/runtime configuration, layered the way the teacher's ambient option system does: built-in
//! defaults, overridden by environment variables, overridden by explicit builder calls.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Error;

/// Tunables for the pool and its Workers. Construct via [`PoolConfig::from_env`] or
/// [`PoolConfig::default`], then adjust fields directly before passing to
/// [`crate::pool::Pool::new`].
#[derive(Clone, Debug, PartialEq)]
pub struct PoolConfig {
    pub max_pool_size: usize,
    pub idle_timeout: Duration,
    pub cache_ttl: Duration,
    pub startup_timeout: Duration,
    pub port_ready_timeout: Duration,
    pub compile_timeout: Duration,
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_factor: f64,
    pub scratch_root: PathBuf,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_pool_size: 4,
            idle_timeout: Duration::from_secs(10 * 60),
            cache_ttl: Duration::from_secs(30 * 60),
            startup_timeout: Duration::from_secs(10),
            port_ready_timeout: Duration::from_secs(1),
            compile_timeout: Duration::from_secs(5),
            retry_max_attempts: 3,
            retry_base_delay: Duration::from_millis(100),
            retry_factor: 2.0,
            scratch_root: env::temp_dir(),
        }
    }
}

impl PoolConfig {
    /// Applies `TAILWIND_POOL_*` environment overrides on top of [`PoolConfig::default`].
    /// Unset or unparseable variables fall back to the default silently (an embedder that cares
    /// should call [`crate::validation::validate_config`] afterwards, which is not done here).
    pub fn from_env() -> PoolConfig {
        let mut config = PoolConfig::default();
        if let Some(v) = env_usize("TAILWIND_POOL_MAX_POOL_SIZE") {
            config.max_pool_size = v;
        }
        if let Some(v) = env_duration_secs("TAILWIND_POOL_IDLE_TIMEOUT_SECS") {
            config.idle_timeout = v;
        }
        if let Some(v) = env_duration_secs("TAILWIND_POOL_CACHE_TTL_SECS") {
            config.cache_ttl = v;
        }
        if let Some(v) = env_duration_secs("TAILWIND_POOL_STARTUP_TIMEOUT_SECS") {
            config.startup_timeout = v;
        }
        if let Some(v) = env_duration_secs("TAILWIND_POOL_READY_TIMEOUT_SECS") {
            config.port_ready_timeout = v;
        }
        if let Some(v) = env_duration_secs("TAILWIND_POOL_COMPILE_TIMEOUT_SECS") {
            config.compile_timeout = v;
        }
        if let Some(v) = env_usize("TAILWIND_POOL_RETRY_MAX_ATTEMPTS") {
            config.retry_max_attempts = v as u32;
        }
        if let Ok(v) = env::var("TAILWIND_POOL_SCRATCH_ROOT") {
            config.scratch_root = PathBuf::from(v);
        }
        config
    }

    /// Rejects configuration that can never produce a functioning pool.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_pool_size == 0 {
            return Err(Error::Validation(
                "max_pool_size must be at least 1".to_string(),
            ));
        }
        for (label, d) in [
            ("startup_timeout", self.startup_timeout),
            ("port_ready_timeout", self.port_ready_timeout),
            ("idle_timeout", self.idle_timeout),
            ("cache_ttl", self.cache_ttl),
        ] {
            if d.is_zero() {
                return Err(Error::Validation(format!("{label} must be positive")));
            }
        }
        if self.retry_factor <= 0.0 {
            return Err(Error::Validation(
                "retry_factor must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_usize(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_duration_secs(name: &str) -> Option<Duration> {
    env_usize(name).map(|secs| Duration::from_secs(secs as u64))
}
