//! # Measurement Points
//!
//! The uniform point model every source's records are converted into, plus
//! the conversion itself. Points render to InfluxDB line protocol:
//!
//! ```text
//! measurement,tag1=val1,tag2=val2 field1=1.5,field2=2 timestamp_ns
//! ```
//!
//! See: <https://docs.influxdata.com/influxdb/v2/reference/syntax/line-protocol/>

use crate::{
    config::MeasurementNames,
    source::SourceSnapshot,
};
use chrono::{
    DateTime,
    Utc,
};
use std::collections::BTreeMap;

/// Tag keys the point builder owns. User-supplied static tags must not
/// collide with these; configuration validation rejects them up front.
pub const RESERVED_TAG_KEYS: [&str; 7] = ["cfg_name", "my_id", "my_name", "id", "name", "label", "path"];

/// One tagged, timestamped observation destined for every configured sink.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementPoint {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, f64>,
    pub timestamp: DateTime<Utc>,
}

impl MeasurementPoint {
    /// Render this point as a single line-protocol line. Tags are emitted in
    /// key order (the map is sorted), which is the canonical form.
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape_measurement(&self.measurement);

        for (key, value) in &self.tags {
            line.push(',');
            line.push_str(&escape_tag(key));
            line.push('=');
            line.push_str(&escape_tag(value));
        }

        line.push(' ');
        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            line.push_str(&escape_tag(key));
            line.push('=');
            line.push_str(&format!("{value}"));
        }

        line.push(' ');
        line.push_str(&self.timestamp.timestamp_nanos_opt().unwrap_or_default().to_string());
        line
    }
}

/// Render a whole batch, one line per point.
pub fn to_line_protocol_batch(points: &[MeasurementPoint]) -> String {
    points.iter().map(MeasurementPoint::to_line_protocol).collect::<Vec<_>>().join("\n")
}

fn escape_measurement(value: &str) -> String {
    value.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_tag(value: &str) -> String {
    value.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

/// Convert one source's normalized snapshot into points.
///
/// Pure on well-formed input. Devices the daemon has never seen are skipped
/// entirely rather than emitted with a sentinel value, and folder completion
/// is clamped into `[0, 100]`. All points share the given round timestamp so
/// series from one round align.
pub fn build_points(
    snapshot: &SourceSnapshot,
    static_tags: &BTreeMap<String, String>,
    measurements: &MeasurementNames,
    timestamp: DateTime<Utc>,
) -> Vec<MeasurementPoint> {
    let mut proto_tags = static_tags.clone();
    proto_tags.insert("my_id".into(), snapshot.identity.my_id.clone());
    proto_tags.insert("my_name".into(), snapshot.identity.my_name.clone());

    let mut points = Vec::with_capacity(snapshot.devices.len() + snapshot.folders.len());

    for device in &snapshot.devices {
        // "never connected" is not a numeric reading
        let Some(last_seen_since_sec) = device.last_seen_since_sec else {
            continue;
        };
        let mut tags = proto_tags.clone();
        tags.insert("id".into(), device.id.clone());
        tags.insert("name".into(), device.name.clone());
        let mut fields = BTreeMap::new();
        fields.insert("last_seen_since_sec".into(), last_seen_since_sec);
        fields.insert("q_elapsed".into(), snapshot.q_elapsed);
        points.push(MeasurementPoint {
            measurement: measurements.devices.clone(),
            tags,
            fields,
            timestamp,
        });
    }

    for folder in &snapshot.folders {
        let mut tags = proto_tags.clone();
        tags.insert("id".into(), folder.id.clone());
        tags.insert("label".into(), folder.label.clone());
        tags.insert("path".into(), folder.path.clone());
        let mut fields = BTreeMap::new();
        fields.insert("completion".into(), folder.completion.clamp(0.0, 100.0));
        fields.insert("q_elapsed".into(), snapshot.q_elapsed);
        points.push(MeasurementPoint {
            measurement: measurements.folders.clone(),
            tags,
            fields,
            timestamp,
        });
    }

    points
}
