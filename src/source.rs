//! Querying a single sync daemon's status API and normalizing the result.
//!
//! `SyncthingSource` is the production implementation against the Syncthing
//! REST API. The `PointSource` trait is the seam the per-round collection
//! unit works against, so isolation and scheduling can be tested with
//! scripted sources.

use crate::{
    config::SourceConfig,
    error::SourceError,
};
use chrono::{
    DateTime,
    Utc,
};
use eyre::{
    Result,
    WrapErr as _,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    time::Instant,
};

/// The reporting daemon's own identity, attached to every point it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceIdentity {
    pub my_id: String,
    pub my_name: String,
}

/// One remote device known to the daemon.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub id: String,
    pub name: String,
    /// `None` when the daemon has never seen the device.
    pub last_seen_since_sec: Option<f64>,
}

/// One synced folder with its completion for the reporting device.
#[derive(Debug, Clone, PartialEq)]
pub struct FolderRecord {
    pub id: String,
    pub label: String,
    pub path: String,
    pub completion: f64,
}

/// Everything one successful fetch yields.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSnapshot {
    pub identity: SourceIdentity,
    pub devices: Vec<DeviceRecord>,
    pub folders: Vec<FolderRecord>,
    /// Seconds the whole fetch took, reported as a field on every point.
    pub q_elapsed: f64,
}

/// A queryable sync daemon.
pub trait PointSource: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch and normalize the daemon's current status. Either the whole
    /// snapshot is produced or the fetch fails; no partial results.
    fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<SourceSnapshot, SourceError>> + Send + '_>>;
}

// -=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-
// Syncthing REST implementation

#[derive(Debug, Deserialize)]
struct SystemStatus {
    #[serde(rename = "myID")]
    my_id: String,
}

#[derive(Debug, Deserialize)]
struct SystemConfig {
    devices: Vec<ConfigDevice>,
    folders: Vec<ConfigFolder>,
}

#[derive(Debug, Deserialize)]
struct ConfigDevice {
    #[serde(rename = "deviceID")]
    device_id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct ConfigFolder {
    id: String,
    #[serde(default)]
    label: String,
    #[serde(default)]
    path: String,
}

#[derive(Debug, Deserialize)]
struct DeviceStats {
    #[serde(rename = "lastSeen")]
    last_seen: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct FolderCompletion {
    completion: f64,
}

pub struct SyncthingSource {
    config: SourceConfig,
    client: reqwest::Client,
}

impl SyncthingSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut api_key = reqwest::header::HeaderValue::from_str(&config.api_key)
            .wrap_err_with(|| format!("source {}: api_key is not a valid header value", config.name))?;
        api_key.set_sensitive(true);
        headers.insert("X-API-Key", api_key);

        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .danger_accept_invalid_certs(config.accept_invalid_certs);
        if let Some(path) = &config.ca_cert {
            let pem = std::fs::read(path)
                .wrap_err_with(|| format!("source {}: cannot read ca_cert {}", config.name, path.display()))?;
            builder = builder.add_root_certificate(
                reqwest::Certificate::from_pem(&pem)
                    .wrap_err_with(|| format!("source {}: ca_cert is not valid PEM", config.name))?,
            );
        }
        let client = builder
            .build()
            .wrap_err_with(|| format!("source {}: cannot build HTTP client", config.name))?;

        Ok(Self { config, client })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, SourceError> {
        let url = self
            .config
            .url
            .join(path)
            .map_err(|err| SourceError::Protocol(format!("invalid request url for {path}: {err}")))?;
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(SourceError::from_transport)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::from_status(status, body));
        }
        response.json::<T>().await.map_err(|err| SourceError::Protocol(err.to_string()))
    }

    async fn fetch_snapshot(&self) -> Result<SourceSnapshot, SourceError> {
        let q_started = Instant::now();
        let now = Utc::now();

        let status: SystemStatus = self.get_json("/rest/system/status", &[]).await?;
        let system: SystemConfig = self.get_json("/rest/system/config", &[]).await?;
        let stats: HashMap<String, DeviceStats> = self.get_json("/rest/stats/device", &[]).await?;

        let (identity, devices) = normalize_devices(&status.my_id, &system.devices, &stats, now)?;

        let mut folders = Vec::with_capacity(system.folders.len());
        for folder in &system.folders {
            let completion: FolderCompletion = self
                .get_json(
                    "/rest/db/completion",
                    &[("device", identity.my_id.as_str()), ("folder", folder.id.as_str())],
                )
                .await?;
            folders.push(FolderRecord {
                id: folder.id.clone(),
                label: folder.label.clone(),
                path: folder.path.clone(),
                completion: completion.completion,
            });
        }

        Ok(SourceSnapshot {
            identity,
            devices,
            folders,
            q_elapsed: q_started.elapsed().as_secs_f64(),
        })
    }
}

impl PointSource for SyncthingSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<SourceSnapshot, SourceError>> + Send + '_>> {
        Box::pin(self.fetch_snapshot())
    }
}

/// Split the daemon's device list into its own identity and the remote
/// device records. The daemon's own entry must be present in the list; its
/// absence means the response shape is not what we expect.
fn normalize_devices(
    my_id: &str,
    devices: &[ConfigDevice],
    stats: &HashMap<String, DeviceStats>,
    now: DateTime<Utc>,
) -> Result<(SourceIdentity, Vec<DeviceRecord>), SourceError> {
    let mut my_name = None;
    let mut records = Vec::with_capacity(devices.len().saturating_sub(1));

    for device in devices {
        if device.device_id == my_id {
            my_name = Some(device.name.clone());
            continue;
        }
        records.push(DeviceRecord {
            id: device.device_id.clone(),
            name: device.name.clone(),
            last_seen_since_sec: last_seen_since(stats.get(&device.device_id), now),
        });
    }

    let my_name = my_name
        .filter(|name| !name.is_empty())
        .ok_or_else(|| SourceError::Protocol(format!("own device {my_id} missing from device list")))?;

    Ok((
        SourceIdentity {
            my_id: my_id.to_string(),
            my_name,
        },
        records,
    ))
}

/// Seconds since the device was last seen. Syncthing reports "never" as the
/// Unix epoch, which we treat the same as a missing stats entry.
fn last_seen_since(stats: Option<&DeviceStats>, now: DateTime<Utc>) -> Option<f64> {
    let last_seen = stats?.last_seen;
    if last_seen.timestamp() <= 0 {
        return None;
    }
    let elapsed = (now - last_seen).num_milliseconds() as f64 / 1000.0;
    Some(elapsed.max(0.0))
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse_stats(json: &str) -> HashMap<String, DeviceStats> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn parses_syncthing_response_shapes() {
        let status: SystemStatus = serde_json::from_str(r#"{"myID": "AAAA-1111", "uptime": 3600}"#).unwrap();
        assert_eq!(status.my_id, "AAAA-1111");

        let system: SystemConfig = serde_json::from_str(
            r#"{
                "devices": [
                    {"deviceID": "AAAA-1111", "name": "homelab", "addresses": ["dynamic"]},
                    {"deviceID": "BBBB-2222", "name": "laptop"}
                ],
                "folders": [
                    {"id": "docs", "label": "Documents", "path": "/data/docs", "type": "sendreceive"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(system.devices.len(), 2);
        assert_eq!(system.folders[0].label, "Documents");

        let completion: FolderCompletion =
            serde_json::from_str(r#"{"completion": 97.5, "globalBytes": 100, "needBytes": 3}"#).unwrap();
        assert_eq!(completion.completion, 97.5);
    }

    #[test]
    fn normalization_splits_identity_from_remotes() {
        let devices = vec![
            ConfigDevice {
                device_id: "AAAA-1111".into(),
                name: "homelab".into(),
            },
            ConfigDevice {
                device_id: "BBBB-2222".into(),
                name: "laptop".into(),
            },
        ];
        let now = Utc::now();
        let stats = parse_stats(&format!(
            r#"{{"BBBB-2222": {{"lastSeen": "{}"}}}}"#,
            (now - chrono::Duration::seconds(90)).to_rfc3339()
        ));

        let (identity, records) = normalize_devices("AAAA-1111", &devices, &stats, now).unwrap();
        assert_eq!(identity.my_id, "AAAA-1111");
        assert_eq!(identity.my_name, "homelab");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "BBBB-2222");
        let since = records[0].last_seen_since_sec.unwrap();
        assert!((since - 90.0).abs() < 1.0, "since = {since}");
    }

    #[test]
    fn epoch_last_seen_means_never_connected() {
        let stats = parse_stats(r#"{"BBBB-2222": {"lastSeen": "1970-01-01T00:00:00Z"}}"#);
        assert_eq!(last_seen_since(stats.get("BBBB-2222"), Utc::now()), None);
        // no stats entry at all behaves the same
        assert_eq!(last_seen_since(None, Utc::now()), None);
    }

    #[test]
    fn clock_skew_never_yields_negative_elapsed() {
        let now = Utc::now();
        let stats = parse_stats(&format!(
            r#"{{"BBBB-2222": {{"lastSeen": "{}"}}}}"#,
            (now + chrono::Duration::seconds(5)).to_rfc3339()
        ));
        assert_eq!(last_seen_since(stats.get("BBBB-2222"), now), Some(0.0));
    }

    #[test]
    fn missing_own_device_is_a_protocol_error() {
        let devices = vec![ConfigDevice {
            device_id: "BBBB-2222".into(),
            name: "laptop".into(),
        }];
        let err = normalize_devices("AAAA-1111", &devices, &HashMap::new(), Utc::now()).unwrap_err();
        assert!(matches!(err, SourceError::Protocol(_)));
    }
}
