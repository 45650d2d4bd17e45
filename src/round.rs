//! The per-round unit of work for one source: fetch, build points, fan out
//! to every configured sink.
//!
//! This is the isolation boundary of the whole system. `CollectionUnit::run`
//! never returns an error; every failure is logged and captured in the
//! returned `RoundResult`, so one unreachable daemon or database can never
//! stop reporting for its siblings.

use crate::{
    config::MeasurementNames,
    error::{
        SinkError,
        SourceError,
    },
    point::build_points,
    sink::PointSink,
    source::PointSource,
};
use chrono::{
    DateTime,
    Utc,
};
use std::{
    collections::BTreeMap,
    sync::Arc,
};
use tracing::{
    debug,
    info,
    warn,
};

/// Outcome of delivering one source's batch to one sink.
#[derive(Debug)]
pub struct SinkDelivery {
    pub sink: String,
    pub points: usize,
    pub outcome: Result<(), SinkError>,
}

/// Everything that happened for one source during one round. Ephemeral;
/// only used for logging and halt-on-error accounting.
#[derive(Debug)]
pub struct RoundResult {
    pub source: String,
    pub fetch_error: Option<SourceError>,
    pub deliveries: Vec<SinkDelivery>,
}

impl RoundResult {
    pub fn delivery_failures(&self) -> usize {
        self.deliveries.iter().filter(|d| d.outcome.is_err()).count()
    }

    pub fn delivered_points(&self) -> usize {
        self.deliveries.iter().filter(|d| d.outcome.is_ok()).map(|d| d.points).sum()
    }
}

/// One (source, sinks) pairing, run once per round.
pub struct CollectionUnit {
    source: Arc<dyn PointSource>,
    sinks: Vec<Arc<dyn PointSink>>,
    static_tags: BTreeMap<String, String>,
    measurements: MeasurementNames,
}

impl CollectionUnit {
    pub fn new(
        source: Arc<dyn PointSource>,
        sinks: Vec<Arc<dyn PointSink>>,
        mut static_tags: BTreeMap<String, String>,
        measurements: MeasurementNames,
    ) -> Self {
        static_tags.insert("cfg_name".into(), source.name().to_string());
        Self {
            source,
            sinks,
            static_tags,
            measurements,
        }
    }

    /// Run the fetch → build → deliver pipeline once. All points share the
    /// given round timestamp. Never propagates an error.
    pub async fn run(&self, timestamp: DateTime<Utc>) -> RoundResult {
        let source = self.source.name().to_string();

        let snapshot = match self.source.fetch().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(
                    source = %source,
                    kind = err.kind(),
                    error = %err,
                    "source fetch failed, nothing to deliver this round"
                );
                return RoundResult {
                    source,
                    fetch_error: Some(err),
                    deliveries: Vec::new(),
                };
            }
        };

        let points = build_points(&snapshot, &self.static_tags, &self.measurements, timestamp);
        if points.is_empty() {
            debug!(source = %source, "no points produced this round");
            return RoundResult {
                source,
                fetch_error: None,
                deliveries: Vec::new(),
            };
        }

        // Deliveries are independent; a failure on one sink must not keep
        // the batch from the others.
        let mut deliveries = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            let outcome = sink.write(&points).await;
            match &outcome {
                Ok(()) => {
                    info!(source = %source, sink = sink.name(), points = points.len(), "delivered points");
                }
                Err(err) => {
                    warn!(
                        source = %source,
                        sink = sink.name(),
                        kind = err.kind(),
                        error = %err,
                        "delivery failed, batch dropped for this sink"
                    );
                }
            }
            deliveries.push(SinkDelivery {
                sink: sink.name().to_string(),
                points: points.len(),
                outcome,
            });
        }

        RoundResult {
            source,
            fetch_error: None,
            deliveries,
        }
    }
}

// -=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted sources and recording sinks shared by the isolation and
    //! scheduling tests.

    use super::*;
    use crate::{
        point::MeasurementPoint,
        source::{
            DeviceRecord,
            FolderRecord,
            SourceIdentity,
            SourceSnapshot,
        },
    };
    use std::{
        future::Future,
        pin::Pin,
        sync::{
            atomic::{
                AtomicU32,
                Ordering,
            },
            Mutex,
        },
    };

    pub fn sample_snapshot() -> SourceSnapshot {
        SourceSnapshot {
            identity: SourceIdentity {
                my_id: "AAAA-1111".into(),
                my_name: "homelab".into(),
            },
            devices: vec![DeviceRecord {
                id: "BBBB-2222".into(),
                name: "laptop".into(),
                last_seen_since_sec: Some(12.0),
            }],
            folders: vec![FolderRecord {
                id: "docs".into(),
                label: "Documents".into(),
                path: "/data/docs".into(),
                completion: 100.0,
            }],
            q_elapsed: 0.01,
        }
    }

    type FetchScript = Box<dyn Fn(u32) -> Result<SourceSnapshot, SourceError> + Send + Sync>;

    /// A source whose fetches follow a script keyed by fetch number (1-based).
    pub struct ScriptedSource {
        name: String,
        fetches: AtomicU32,
        script: FetchScript,
    }

    impl ScriptedSource {
        pub fn new(
            name: impl Into<String>,
            script: impl Fn(u32) -> Result<SourceSnapshot, SourceError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                name: name.into(),
                fetches: AtomicU32::new(0),
                script: Box::new(script),
            }
        }

        pub fn healthy(name: impl Into<String>) -> Self {
            Self::new(name, |_| Ok(sample_snapshot()))
        }

        pub fn fetch_count(&self) -> u32 {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    impl PointSource for ScriptedSource {
        fn name(&self) -> &str {
            &self.name
        }

        fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<SourceSnapshot, SourceError>> + Send + '_>> {
            let fetch = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
            let result = (self.script)(fetch);
            Box::pin(async move { result })
        }
    }

    #[derive(Clone, Copy, Debug)]
    pub enum SinkMode {
        Accept,
        Reject,
        Unreachable,
    }

    /// A sink that records every batch it is offered and answers per mode.
    pub struct RecordingSink {
        name: String,
        mode: SinkMode,
        pub batches: Mutex<Vec<Vec<MeasurementPoint>>>,
    }

    impl RecordingSink {
        pub fn new(name: impl Into<String>, mode: SinkMode) -> Self {
            Self {
                name: name.into(),
                mode,
                batches: Mutex::new(Vec::new()),
            }
        }

        pub fn batch_count(&self) -> usize {
            self.batches.lock().unwrap().len()
        }
    }

    impl PointSink for RecordingSink {
        fn name(&self) -> &str {
            &self.name
        }

        fn write<'a>(
            &'a self,
            points: &'a [MeasurementPoint],
        ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
            self.batches.lock().unwrap().push(points.to_vec());
            let result = match self.mode {
                SinkMode::Accept => Ok(()),
                SinkMode::Reject => Err(SinkError::Rejected("scripted rejection".into())),
                SinkMode::Unreachable => Err(SinkError::Unreachable("scripted outage".into())),
            };
            Box::pin(async move { result })
        }
    }
}
