//! Server settings read from the environment.

use std::path::PathBuf;
use std::time::Duration;

use quarry_core::CapabilitySet;
use quarry_executor::{ExecutionLimits, DEFAULT_MAX_WORKERS};

use crate::error::GatewayError;

/// Default listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:3456";

/// Default request body limit: 256 KiB of snippet is plenty.
pub const DEFAULT_BODY_LIMIT: usize = 256 * 1024;

/// Gateway settings.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct GatewayConfig {
    pub listen_addr: String,
    pub body_limit: usize,
    /// Snippets evaluated at once; further requests wait for a worker.
    pub max_workers: usize,
    pub limits: ExecutionLimits,
    pub capabilities: CapabilitySet,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_owned(),
            body_limit: DEFAULT_BODY_LIMIT,
            max_workers: DEFAULT_MAX_WORKERS,
            limits: ExecutionLimits::default(),
            capabilities: CapabilitySet::default(),
        }
    }
}

impl GatewayConfig {
    /// Read `QUARRY_LISTEN_ADDR`, `QUARRY_BODY_LIMIT`, `QUARRY_MAX_WORKERS`,
    /// `QUARRY_TIMEOUT_MS` and `QUARRY_DATA_ROOT`, falling back to defaults for
    /// unset variables.
    ///
    /// # Errors
    /// Returns [`GatewayError::InvalidConfig`] when a numeric variable does
    /// not parse.
    pub fn from_env() -> Result<Self, GatewayError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`GatewayConfig::from_env`] with an arbitrary variable source.
    ///
    /// # Errors
    /// Returns [`GatewayError::InvalidConfig`] when a numeric variable does
    /// not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, GatewayError> {
        let mut config = Self::default();
        if let Some(addr) = lookup("QUARRY_LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        if let Some(limit) = lookup("QUARRY_BODY_LIMIT") {
            config.body_limit = parse_number("QUARRY_BODY_LIMIT", &limit)?;
        }
        if let Some(workers) = lookup("QUARRY_MAX_WORKERS") {
            config.max_workers = parse_number("QUARRY_MAX_WORKERS", &workers)?;
            if config.max_workers == 0 {
                return Err(GatewayError::InvalidConfig(
                    "QUARRY_MAX_WORKERS must be at least 1".to_owned(),
                ));
            }
        }
        if let Some(ms) = lookup("QUARRY_TIMEOUT_MS") {
            let ms = parse_number("QUARRY_TIMEOUT_MS", &ms)?;
            config.limits = ExecutionLimits::with_timeout(Duration::from_millis(ms));
        }
        if let Some(root) = lookup("QUARRY_DATA_ROOT") {
            config.capabilities = config.capabilities.with_data_root(PathBuf::from(root));
        }
        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, GatewayError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| GatewayError::InvalidConfig(format!("{key}={raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn unset_variables_use_defaults() {
        let config = match GatewayConfig::from_lookup(lookup(&[])) {
            Ok(c) => c,
            Err(e) => panic!("config: {e}"),
        };
        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR);
        assert_eq!(config.body_limit, DEFAULT_BODY_LIMIT);
        assert_eq!(config.max_workers, DEFAULT_MAX_WORKERS);
        assert!(config.capabilities.data_root().is_none());
    }

    #[test]
    fn variables_override_defaults() {
        let vars = [
            ("QUARRY_LISTEN_ADDR", "0.0.0.0:8080"),
            ("QUARRY_BODY_LIMIT", "4096"),
            ("QUARRY_MAX_WORKERS", "2"),
            ("QUARRY_TIMEOUT_MS", "750"),
            ("QUARRY_DATA_ROOT", "/srv/data"),
        ];
        let config = match GatewayConfig::from_lookup(lookup(&vars)) {
            Ok(c) => c,
            Err(e) => panic!("config: {e}"),
        };
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.body_limit, 4096);
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.limits.timeout, Duration::from_millis(750));
        assert_eq!(config.capabilities.data_root(), Some(std::path::Path::new("/srv/data")));
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let result = GatewayConfig::from_lookup(lookup(&[("QUARRY_BODY_LIMIT", "lots")]));
        assert!(matches!(result, Err(GatewayError::InvalidConfig(msg)) if msg.contains("QUARRY_BODY_LIMIT")));
    }

    #[test]
    fn zero_workers_are_rejected() {
        let result = GatewayConfig::from_lookup(lookup(&[("QUARRY_MAX_WORKERS", "0")]));
        assert!(matches!(result, Err(GatewayError::InvalidConfig(msg)) if msg.contains("QUARRY_MAX_WORKERS")));
    }
}
