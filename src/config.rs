use std::path::PathBuf;
use std::str::FromStr;

use crate::engine::WeekStart;

#[derive(Debug, thiserror::Error)]
#[error("invalid value for {var}: {value:?}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

/// Server settings, read from `SLOTGUARD_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    /// JSON array of profiles to seed the directory with.
    pub directory_file: Option<PathBuf>,
    pub week_start: WeekStart,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "slotguard".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
            directory_file: None,
            week_start: WeekStart::Sunday,
        }
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError { var, value }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source; unset variables keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Self::default();
        let week_start = match lookup("SLOTGUARD_WEEK_START") {
            None => d.week_start,
            Some(value) => WeekStart::parse(value.trim()).ok_or(ConfigError {
                var: "SLOTGUARD_WEEK_START",
                value,
            })?,
        };
        Ok(Self {
            port: parsed(&lookup, "SLOTGUARD_PORT")?.unwrap_or(d.port),
            bind: lookup("SLOTGUARD_BIND").unwrap_or(d.bind),
            data_dir: lookup("SLOTGUARD_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            password: lookup("SLOTGUARD_PASSWORD").unwrap_or(d.password),
            max_connections: parsed(&lookup, "SLOTGUARD_MAX_CONNECTIONS")?.unwrap_or(d.max_connections),
            compact_threshold: parsed(&lookup, "SLOTGUARD_COMPACT_THRESHOLD")?
                .unwrap_or(d.compact_threshold),
            metrics_port: parsed(&lookup, "SLOTGUARD_METRICS_PORT")?,
            tls_cert: lookup("SLOTGUARD_TLS_CERT"),
            tls_key: lookup("SLOTGUARD_TLS_KEY"),
            directory_file: lookup("SLOTGUARD_DIRECTORY_FILE").map(PathBuf::from),
            week_start,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let c = from_pairs(&[]).unwrap();
        assert_eq!(c.listen_addr(), "0.0.0.0:5433");
        assert_eq!(c.max_connections, 256);
        assert_eq!(c.compact_threshold, 1000);
        assert_eq!(c.week_start, WeekStart::Sunday);
        assert!(c.metrics_port.is_none());
        assert!(c.directory_file.is_none());
    }

    #[test]
    fn overrides() {
        let c = from_pairs(&[
            ("SLOTGUARD_PORT", "6000"),
            ("SLOTGUARD_BIND", "127.0.0.1"),
            ("SLOTGUARD_METRICS_PORT", "9100"),
            ("SLOTGUARD_WEEK_START", "Monday"),
            ("SLOTGUARD_DIRECTORY_FILE", "/etc/slotguard/profiles.json"),
        ])
        .unwrap();
        assert_eq!(c.listen_addr(), "127.0.0.1:6000");
        assert_eq!(c.metrics_port, Some(9100));
        assert_eq!(c.week_start, WeekStart::Monday);
        assert_eq!(c.directory_file, Some(PathBuf::from("/etc/slotguard/profiles.json")));
    }

    #[test]
    fn bad_values_are_errors() {
        let err = from_pairs(&[("SLOTGUARD_PORT", "eighty")]).unwrap_err();
        assert_eq!(err.var, "SLOTGUARD_PORT");
        assert!(from_pairs(&[("SLOTGUARD_WEEK_START", "friday")]).is_err());
    }
}
