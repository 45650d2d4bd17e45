//! # Configuration Module
//!
//! YAML configuration for the collector: named sync-daemon sources, named
//! time-series sinks, and the measurement names used for the two point
//! kinds. The configuration is parsed once at startup into an immutable
//! snapshot; nothing in here is mutated at runtime.
//!
//! A configuration directory may be given instead of a single file, in which
//! case all `.yml` files are merged in name order (later files win on
//! duplicate source/sink names).

use crate::point::RESERVED_TAG_KEYS;
use eyre::{
    eyre,
    Result,
    WrapErr as _,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    collections::BTreeMap,
    path::{
        Path,
        PathBuf,
    },
    time::Duration,
};
use url::Url;

/// One sync daemon to poll. Immutable for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Filled from the map key during parsing.
    #[serde(default)]
    pub name: String,
    /// Base URL of the daemon's REST API, e.g. `http://localhost:8384`.
    pub url: Url,
    pub api_key: String,
    /// Per-query timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
    /// Additional root certificate, for daemons behind a private CA.
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,
    /// Trust the daemon's certificate without verification. Syncthing ships
    /// with a self-signed certificate, so HTTPS setups often need this.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    /// Static tags merged into every point from this source.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }
}

fn default_timeout_secs() -> f64 {
    10.0
}

/// One time-series database to deliver points to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Filled from the map key during parsing.
    #[serde(default)]
    pub name: String,
    /// Base URL of the write endpoint, e.g. `https://influx.example.com:8086`.
    pub url: Url,
    pub database: String,
    /// Token auth; takes precedence over basic credentials when both are set.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Measurement names for the two point kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementNames {
    pub devices: String,
    pub folders: String,
}

impl Default for MeasurementNames {
    fn default() -> Self {
        Self {
            devices: "syncthing_device".into(),
            folders: "syncthing_folder".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub syncthings: BTreeMap<String, SourceConfig>,
    pub influxes: BTreeMap<String, SinkConfig>,
    #[serde(default)]
    pub measurements: MeasurementNames,
}

impl AppConfig {
    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut cfg = serde_yml::from_str::<AppConfig>(content)?;
        for (name, source) in cfg.syncthings.iter_mut() {
            source.name = name.clone();
        }
        for (name, sink) in cfg.influxes.iter_mut() {
            sink.name = name.clone();
        }
        Ok(cfg)
    }

    /// Fold another parsed file into this one. Later files win on duplicate
    /// source/sink names; non-default measurement names also win.
    fn merge(&mut self, other: AppConfig) {
        self.syncthings.extend(other.syncthings);
        self.influxes.extend(other.influxes);
        if other.measurements != MeasurementNames::default() {
            self.measurements = other.measurements;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.syncthings.is_empty() {
            return Err(eyre!("config.syncthings must be non-empty"));
        }
        if self.influxes.is_empty() {
            return Err(eyre!("config.influxes must be non-empty"));
        }
        for source in self.syncthings.values() {
            if source.timeout_secs <= 0.0 {
                return Err(eyre!("source {}: timeout_secs must be positive", source.name));
            }
            for key in source.tags.keys() {
                if RESERVED_TAG_KEYS.contains(&key.as_str()) {
                    return Err(eyre!("source {}: tag key {key:?} is reserved", source.name));
                }
            }
        }
        for sink in self.influxes.values() {
            if sink.token.is_none() && sink.username.is_none() {
                return Err(eyre!("sink {}: either token or username/password is required", sink.name));
            }
        }
        Ok(())
    }
}

pub fn parse_config(path: &Path) -> Result<AppConfig> {
    let content =
        std::fs::read_to_string(path).wrap_err_with(|| format!("cannot read config file {}", path.display()))?;
    AppConfig::from_yaml(&content).wrap_err_with(|| format!("cannot parse config file {}", path.display()))
}

/// Parse and merge every `.yml` file in a directory, in file-name order.
pub fn parse_config_dir(dir: &Path) -> Result<AppConfig> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .wrap_err_with(|| format!("cannot read config directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("yml")))
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(eyre!("no .yml files found in {}", dir.display()));
    }

    let mut merged: Option<AppConfig> = None;
    for file in files {
        let cfg = parse_config(&file)?;
        match merged.as_mut() {
            Some(base) => base.merge(cfg),
            None => merged = Some(cfg),
        }
    }
    merged.ok_or_else(|| eyre!("no configuration loaded from {}", dir.display()))
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    const EXAMPLE: &str = r#"
syncthings:
  home:
    url: http://localhost:8384
    api_key: secret
    tags:
      site: garage
  office:
    url: https://sync.example.com:8384
    api_key: other-secret
    timeout_secs: 2.5
    accept_invalid_certs: true

influxes:
  main:
    url: https://influx.example.com:8086
    database: syncthing
    username: reporter
    password: hunter2

measurements:
  devices: st_device
  folders: st_folder
"#;

    #[test]
    fn parses_named_sources_and_sinks() {
        let cfg = AppConfig::from_yaml(EXAMPLE).unwrap();
        assert_eq!(cfg.syncthings.len(), 2);
        assert_eq!(cfg.syncthings["home"].name, "home");
        assert_eq!(cfg.syncthings["home"].timeout_secs, 10.0);
        assert_eq!(cfg.syncthings["office"].timeout_secs, 2.5);
        assert_eq!(cfg.influxes["main"].name, "main");
        assert_eq!(cfg.measurements.devices, "st_device");
        cfg.validate().unwrap();
    }

    #[test]
    fn measurement_names_default_when_omitted() {
        let cfg = AppConfig::from_yaml(
            r#"
syncthings:
  a:
    url: http://localhost:8384
    api_key: k
influxes:
  b:
    url: http://localhost:8086
    database: d
    token: t
"#,
        )
        .unwrap();
        assert_eq!(cfg.measurements, MeasurementNames::default());
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_reserved_tag_keys() {
        let cfg = AppConfig::from_yaml(
            r#"
syncthings:
  a:
    url: http://localhost:8384
    api_key: k
    tags:
      my_id: nope
influxes:
  b:
    url: http://localhost:8086
    database: d
    token: t
"#,
        )
        .unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn rejects_sink_without_credentials() {
        let cfg = AppConfig::from_yaml(
            r#"
syncthings:
  a:
    url: http://localhost:8384
    api_key: k
influxes:
  b:
    url: http://localhost:8086
    database: d
"#,
        )
        .unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_empty_sections() {
        let cfg = AppConfig::from_yaml("syncthings: {}\ninfluxes: {}\n").unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn merge_prefers_later_entries_and_explicit_measurements() {
        let mut base = AppConfig::from_yaml(EXAMPLE).unwrap();
        let overlay = AppConfig::from_yaml(
            r#"
syncthings:
  home:
    url: http://127.0.0.1:8384
    api_key: rotated
influxes:
  backup:
    url: http://influx-b:8086
    database: syncthing
    token: t
"#,
        )
        .unwrap();
        base.merge(overlay);
        assert_eq!(base.syncthings["home"].api_key, "rotated");
        assert_eq!(base.syncthings.len(), 2);
        assert_eq!(base.influxes.len(), 2);
        // overlay used defaults, so the explicit names from the base stay
        assert_eq!(base.measurements.devices, "st_device");
    }
}
