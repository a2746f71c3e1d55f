use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::{info, warn};

/// Process settings, read once from `CARPARK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// WAL appends since the last compaction that trigger a new one.
    pub compact_threshold: u64,
    /// `None` leaves expiry to the lazy sweep done on every reservation.
    pub reaper_interval: Option<Duration>,
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub key: &'static str,
    pub reason: String,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {}: {}", self.key, self.reason)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let reaper_secs: u64 = try_load(&lookup, "CARPARK_REAPER_INTERVAL_SECS", "0")?;
        Ok(Self {
            bind: try_load(&lookup, "CARPARK_BIND", "0.0.0.0")?,
            port: try_load(&lookup, "CARPARK_PORT", "8080")?,
            data_dir: try_load(&lookup, "CARPARK_DATA_DIR", "./data")?,
            compact_threshold: try_load(&lookup, "CARPARK_COMPACT_THRESHOLD", "1000")?,
            reaper_interval: (reaper_secs > 0).then(|| Duration::from_secs(reaper_secs)),
            metrics_port: optional(&lookup, "CARPARK_METRICS_PORT")?,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("carpark.wal")
    }
}

fn try_load<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: &str,
) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    lookup(key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e: T::Err| {
            warn!("Invalid {key} value: {e}");
            ConfigError {
                key,
                reason: e.to_string(),
            }
        })
}

fn optional<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T::Err: Display,
{
    lookup(key)
        .map(|raw| {
            raw.parse().map_err(|e: T::Err| ConfigError {
                key,
                reason: e.to_string(),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:8080");
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/carpark.wal"));
        assert_eq!(cfg.compact_threshold, 1000);
        assert_eq!(cfg.reaper_interval, None);
        assert_eq!(cfg.metrics_port, None);
    }

    #[test]
    fn reads_overrides() {
        let cfg = Config::from_lookup(lookup(&[
            ("CARPARK_PORT", "9000"),
            ("CARPARK_REAPER_INTERVAL_SECS", "15"),
            ("CARPARK_METRICS_PORT", "9100"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.reaper_interval, Some(Duration::from_secs(15)));
        assert_eq!(cfg.metrics_port, Some(9100));
    }

    #[test]
    fn rejects_garbage() {
        let err = Config::from_lookup(lookup(&[("CARPARK_PORT", "eighty")])).unwrap_err();
        assert_eq!(err.key, "CARPARK_PORT");
        let err = Config::from_lookup(lookup(&[("CARPARK_METRICS_PORT", "-1")])).unwrap_err();
        assert_eq!(err.key, "CARPARK_METRICS_PORT");
    }
}
