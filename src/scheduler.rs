//! Driving repeated collection rounds.
//!
//! Each round fans out one task per configured source, waits for all of
//! them, and then sleeps for the configured interval. The round count is
//! either finite or forever; cancellation takes effect at the next round
//! boundary, or immediately while waiting, and always lets an in-flight
//! round finish.

use crate::round::CollectionUnit;
use chrono::Utc;
use futures::future::join_all;
use std::{
    num::NonZeroU32,
    sync::Arc,
    time::{
        Duration,
        Instant,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{
    info,
    warn,
};

/// How many rounds to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundCount {
    Finite(NonZeroU32),
    Forever,
}

/// Final state of a scheduler run, for the caller to turn into an exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// All configured rounds were attempted.
    Completed { rounds: u32 },
    /// An external cancellation stopped the loop before all rounds ran. The
    /// reported count only includes fully finished rounds.
    Cancelled { rounds: u32 },
    /// The halt-on-send-error flag stopped the loop after a round with at
    /// least one failed delivery.
    Halted { rounds: u32 },
}

pub struct Scheduler {
    units: Vec<Arc<CollectionUnit>>,
    interval: Duration,
    rounds: RoundCount,
    halt_on_send_error: bool,
}

impl Scheduler {
    pub fn new(
        units: Vec<Arc<CollectionUnit>>,
        interval: Duration,
        rounds: RoundCount,
        halt_on_send_error: bool,
    ) -> Self {
        Self {
            units,
            interval,
            rounds,
            halt_on_send_error,
        }
    }

    /// Run rounds until the count is exhausted or the token is cancelled.
    ///
    /// Units run concurrently and own their point sets; the only state they
    /// share is the round timestamp. A unit failure never ends the round or
    /// the loop — only the halt-on-send-error flag can do that.
    pub async fn run(&self, cancel: CancellationToken) -> RunStatus {
        let mut rounds_run = 0u32;
        loop {
            if cancel.is_cancelled() {
                return RunStatus::Cancelled { rounds: rounds_run };
            }

            let round = rounds_run + 1;
            let round_started = Instant::now();
            let timestamp = Utc::now();
            info!(round, sources = self.units.len(), "round started");

            let tasks: Vec<_> = self
                .units
                .iter()
                .cloned()
                .map(|unit| tokio::spawn(async move { unit.run(timestamp).await }))
                .collect();
            let results = join_all(tasks).await;
            rounds_run = round;

            let mut fetch_failures = 0usize;
            let mut failed_deliveries = 0usize;
            let mut delivered_points = 0usize;
            for result in results {
                match result {
                    Ok(result) => {
                        if result.fetch_error.is_some() {
                            fetch_failures += 1;
                        }
                        failed_deliveries += result.delivery_failures();
                        delivered_points += result.delivered_points();
                    }
                    Err(err) => {
                        warn!(error = %err, "collection task did not complete");
                        failed_deliveries += 1;
                    }
                }
            }
            info!(
                round,
                delivered_points,
                fetch_failures,
                failed_deliveries,
                elapsed_ms = round_started.elapsed().as_millis() as u64,
                "round finished"
            );

            if self.halt_on_send_error && failed_deliveries > 0 {
                return RunStatus::Halted { rounds: rounds_run };
            }
            if let RoundCount::Finite(count) = self.rounds {
                if rounds_run >= count.get() {
                    return RunStatus::Completed { rounds: rounds_run };
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return RunStatus::Cancelled { rounds: rounds_run };
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
