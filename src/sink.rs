//! Delivering point batches to a time-series database.
//!
//! `InfluxSink` posts one line-protocol batch per round and source to the
//! InfluxDB v1 write endpoint. Transient unreachability gets a bounded
//! exponential-backoff retry; auth failures and batch rejections are
//! terminal for the batch and surfaced immediately.

use crate::{
    config::SinkConfig,
    error::SinkError,
    point::{
        to_line_protocol_batch,
        MeasurementPoint,
    },
};
use eyre::{
    Result,
    WrapErr as _,
};
use std::{
    future::Future,
    pin::Pin,
    time::Duration,
};

/// Fixed retry policy for unreachable sinks. Not per-call configuration.
pub const MAX_WRITE_ATTEMPTS: u32 = 3;
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// A destination for point batches.
pub trait PointSink: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver the whole batch in one write. Retry policy is internal to the
    /// implementation; a returned error is final for this batch.
    fn write<'a>(
        &'a self,
        points: &'a [MeasurementPoint],
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>>;
}

/// Run one write attempt repeatedly until it succeeds, fails terminally, or
/// the retry budget is exhausted. Only retryable errors get another attempt.
pub async fn write_with_retry<F, Fut>(sink_name: &str, mut attempt_fn: F) -> Result<(), SinkError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), SinkError>>,
{
    let mut delay = RETRY_BASE_DELAY;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match attempt_fn().await {
            Ok(()) => return Ok(()),
            Err(err) if err.is_retryable() && attempt < MAX_WRITE_ATTEMPTS => {
                tracing::warn!(
                    sink = sink_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "sink write failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(err) => return Err(err),
        }
    }
}

pub struct InfluxSink {
    config: SinkConfig,
    client: reqwest::Client,
}

impl InfluxSink {
    pub fn new(config: SinkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(WRITE_TIMEOUT)
            .build()
            .wrap_err_with(|| format!("sink {}: cannot build HTTP client", config.name))?;
        Ok(Self { config, client })
    }

    async fn write_once(&self, body: &str) -> Result<(), SinkError> {
        let url = self
            .config
            .url
            .join("/write")
            .map_err(|err| SinkError::Rejected(format!("invalid write url: {err}")))?;

        let mut request = self
            .client
            .post(url)
            .query(&[("db", self.config.database.as_str()), ("precision", "ns")])
            .body(body.to_string());

        if let Some(token) = &self.config.token {
            request = request.header(reqwest::header::AUTHORIZATION, format!("Token {token}"));
        } else if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_deref());
        }

        let response = request.send().await.map_err(SinkError::from_transport)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::from_status(status, body));
        }
        Ok(())
    }
}

impl PointSink for InfluxSink {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn write<'a>(
        &'a self,
        points: &'a [MeasurementPoint],
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
        Box::pin(async move {
            if points.is_empty() {
                return Ok(());
            }
            let body = to_line_protocol_batch(points);
            write_with_retry(self.name(), || self.write_once(&body)).await
        })
    }
}
