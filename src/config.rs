//! `BuilderConfig`: the env-var-driven knobs from spec §6, replacing the
//! legacy `System.setProperty` globals (A2). Grounded in the teacher's
//! `AppConfig`/`Config` split: one constructor reads environment
//! variables, one is built directly from parsed CLI flags.

use crate::error::{PusherError, Result};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct BuilderConfig {
    /// Send credentials over plaintext HTTP instead of dropping the
    /// `Authorization` header.
    pub send_credentials_over_http: bool,
    /// Force single-threaded, sequential step execution (used by
    /// reproducibility tests that need deterministic ordering).
    pub serialize: bool,
    /// Allow TLS downgrade and cleartext fallback to registries whose
    /// certificate cannot be verified.
    pub allow_insecure_registries: bool,
    /// HTTP timeout in milliseconds; applies to connect and read phases.
    pub http_timeout_ms: u64,
    /// Root directory for the base-image layer cache.
    pub base_image_cache_dir: PathBuf,
    /// Root directory for the application-layer cache.
    pub application_cache_dir: PathBuf,
    /// Bound on concurrent pull/push/build steps; defaults to
    /// `min(16, 2 * cpu_count)` per §5.
    pub max_concurrency: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        let cpu = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        BuilderConfig {
            send_credentials_over_http: false,
            serialize: false,
            allow_insecure_registries: false,
            http_timeout_ms: 20_000,
            base_image_cache_dir: PathBuf::from(".cache/base-image-layers"),
            application_cache_dir: PathBuf::from(".cache/application-layers"),
            max_concurrency: (2 * cpu).min(16),
        }
    }
}

impl BuilderConfig {
    /// Reads the four environment variables spec §6 enumerates, layered
    /// over `BuilderConfig::default()`.
    pub fn from_env() -> Result<Self> {
        let mut config = BuilderConfig::default();

        if let Ok(v) = env::var("sendCredentialsOverHttp") {
            config.send_credentials_over_http = parse_bool(&v)?;
        }
        if let Ok(v) = env::var("serialize") {
            config.serialize = parse_bool(&v)?;
        }
        if let Ok(v) = env::var("allowInsecureRegistries") {
            config.allow_insecure_registries = parse_bool(&v)?;
        }
        if let Ok(v) = env::var("httpTimeout") {
            config.http_timeout_ms = parse_non_negative_integer(&v)?;
        }

        Ok(config)
    }

    pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        self.base_image_cache_dir = root.join("base-image-layers");
        self.application_cache_dir = root.join("application-layers");
        self
    }

    /// The concurrency bound the executor should actually use:
    /// `max_concurrency`, unless `serialize` forces single-threaded,
    /// sequential step execution.
    pub fn effective_concurrency(&self) -> usize {
        if self.serialize {
            1
        } else {
            self.max_concurrency.max(1)
        }
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(PusherError::InvalidBuildPlan(format!(
            "expected boolean env value, got '{other}'"
        ))),
    }
}

fn parse_non_negative_integer(value: &str) -> Result<u64> {
    value.parse::<u64>().map_err(|_| {
        PusherError::InvalidBuildPlan(format!(
            "httpTimeout must be a non-negative integer, got '{value}'"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_concurrency_is_bounded_by_sixteen() {
        let config = BuilderConfig::default();
        assert!(config.max_concurrency <= 16);
        assert!(config.max_concurrency >= 1);
    }

    #[test]
    fn http_timeout_rejects_negative_and_non_integer() {
        assert!(parse_non_negative_integer("-1").is_err());
        assert!(parse_non_negative_integer("abc").is_err());
        assert!(parse_non_negative_integer("5000").is_ok());
    }

    #[test]
    fn serialize_forces_effective_concurrency_to_one() {
        let mut config = BuilderConfig::default();
        config.max_concurrency = 8;
        config.serialize = true;
        assert_eq!(config.effective_concurrency(), 1);
    }

    #[test]
    fn with_cache_root_derives_both_tiers() {
        let config = BuilderConfig::default().with_cache_root("/tmp/containerize-cache");
        assert_eq!(
            config.base_image_cache_dir,
            PathBuf::from("/tmp/containerize-cache/base-image-layers")
        );
        assert_eq!(
            config.application_cache_dir,
            PathBuf::from("/tmp/containerize-cache/application-layers")
        );
    }
}
