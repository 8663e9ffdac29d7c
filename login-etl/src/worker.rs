use std::time::{Duration, Instant};

use health::HealthHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::metrics_consts::{
    CYCLE_TIME, EMPTY_PAYLOADS, INVALID_APP_VERSIONS, MESSAGES_ACKNOWLEDGED, MESSAGES_RECEIVED,
    PAYLOAD_PARSE_ERRORS, QUEUE_RECEIVE_ERRORS, RECORDS_WRITTEN, STALLED_RECLAIMED, STORAGE_ERRORS,
};
use crate::record::{self, LoginPayload, LoginRecord, RecordError};
use crate::sink::LoginSink;
use crate::source::{LoginQueue, RawMessage};

/// Outcome of one poll cycle, for logging and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleStats {
    pub received: usize,
    pub skipped_malformed: usize,
    pub skipped_empty: usize,
    pub skipped_invalid_version: usize,
    pub rows_written: u64,
    pub acknowledged: u64,
    pub reclaimed: u64,
}

/// A worker that drains the login queue in bounded batches: claim messages,
/// build anonymized records, commit them atomically, then acknowledge.
///
/// Acknowledgment happens strictly after the commit succeeds. On a storage
/// failure nothing is acknowledged and the claimed messages flow back through
/// `reclaim` after the visibility timeout, so a lost batch redelivers instead
/// of disappearing.
pub struct LoginWorker {
    queue: LoginQueue,
    sink: LoginSink,
    /// Upper bound on messages claimed per cycle.
    batch_max: i64,
    /// The idle interval between fetches.
    poll_interval: Duration,
    /// Claim age after which a message is considered abandoned.
    stalled_after: Duration,
    /// The liveness check handle, reported on every cycle.
    liveness: HealthHandle,
}

impl LoginWorker {
    pub fn new(
        queue: LoginQueue,
        sink: LoginSink,
        batch_max: i64,
        poll_interval: Duration,
        stalled_after: Duration,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            queue,
            sink,
            batch_max,
            poll_interval,
            stalled_after,
            liveness,
        }
    }

    /// Run cycles until the token is cancelled. Cancellation is only checked
    /// between cycles, so an in-flight commit and acknowledgment always
    /// finish before shutdown.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.poll_interval);
        info!(
            batch_max = self.batch_max,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "login worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("login worker shutting down");
                    return;
                }
                _ = interval.tick() => {}
            }

            self.liveness.report_healthy();

            let start = Instant::now();
            let stats = self.run_cycle().await;
            metrics::histogram!(CYCLE_TIME).record(start.elapsed().as_millis() as f64);

            if stats.received > 0 {
                info!(
                    received = stats.received,
                    written = stats.rows_written,
                    acknowledged = stats.acknowledged,
                    skipped_malformed = stats.skipped_malformed,
                    skipped_empty = stats.skipped_empty,
                    skipped_invalid_version = stats.skipped_invalid_version,
                    "completed ingest cycle"
                );
            }
        }
    }

    /// One fetch/process/persist/acknowledge pass. Queue and storage errors
    /// are logged and absorbed here: an unattended worker must keep looping,
    /// never crash on a bad cycle.
    pub async fn run_cycle(&self) -> CycleStats {
        let mut stats = CycleStats::default();

        match self.queue.reclaim(self.stalled_after).await {
            Ok(0) => {}
            Ok(reclaimed) => {
                warn!(reclaimed, "returned stalled claims to the queue");
                metrics::counter!(STALLED_RECLAIMED).increment(reclaimed);
                stats.reclaimed = reclaimed;
            }
            Err(e) => error!(error = %e, "failed to reclaim stalled claims"),
        }

        let messages = match self.queue.receive(self.batch_max).await {
            Ok(messages) => messages,
            Err(e) => {
                error!(error = %e, "queue receive failed, treating as an empty cycle");
                metrics::counter!(QUEUE_RECEIVE_ERRORS).increment(1);
                return stats;
            }
        };
        stats.received = messages.len();
        metrics::counter!(MESSAGES_RECEIVED).increment(messages.len() as u64);

        let batch = build_batch(&messages, &mut stats);

        match self.sink.commit(&batch).await {
            Ok(rows_written) => {
                stats.rows_written = rows_written;
                metrics::counter!(RECORDS_WRITTEN).increment(rows_written);
            }
            Err(e) => {
                error!(
                    error = %e,
                    batch_len = batch.len(),
                    "batch commit failed, leaving messages claimed for redelivery"
                );
                metrics::counter!(STORAGE_ERRORS).increment(1);
                return stats;
            }
        }

        // Everything received this cycle is acknowledged, including messages
        // that produced no record: a poison message must not loop forever.
        let delivery_tokens: Vec<i64> = messages
            .iter()
            .map(|message| message.delivery_token)
            .collect();
        match self.queue.acknowledge(&delivery_tokens).await {
            Ok(acknowledged) => {
                stats.acknowledged = acknowledged;
                metrics::counter!(MESSAGES_ACKNOWLEDGED).increment(acknowledged);
            }
            Err(e) => {
                // The rows are committed; a redelivery hits the natural key
                // and inserts nothing, so this is noisy but safe.
                error!(error = %e, "acknowledge failed after commit");
            }
        }

        stats
    }
}

fn build_batch(messages: &[RawMessage], stats: &mut CycleStats) -> Vec<LoginRecord> {
    let mut batch = Vec::with_capacity(messages.len());

    for message in messages {
        let payload = match LoginPayload::parse(&message.body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    delivery_token = message.delivery_token,
                    error = %e,
                    "skipping malformed message body"
                );
                metrics::counter!(PAYLOAD_PARSE_ERRORS).increment(1);
                stats.skipped_malformed += 1;
                continue;
            }
        };

        match record::build(payload) {
            Ok(Some(record)) => batch.push(record),
            Ok(None) => {
                metrics::counter!(EMPTY_PAYLOADS).increment(1);
                stats.skipped_empty += 1;
            }
            Err(RecordError::InvalidAppVersion { raw }) => {
                warn!(
                    delivery_token = message.delivery_token,
                    raw, "skipping message with unparseable app version"
                );
                metrics::counter!(INVALID_APP_VERSIONS).increment(1);
                stats.skipped_invalid_version += 1;
            }
        }
    }

    batch
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(delivery_token: i64, body: &str) -> RawMessage {
        RawMessage {
            delivery_token,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_build_batch_keeps_valid_and_skips_bad_messages() {
        let messages = vec![
            message(
                1,
                r#"{"user_id":"123","device_type":"android","ip":"1.1.1.1","device_id":"1234","locale":"en","app_version":"1.1"}"#,
            ),
            message(2, "{}"),
            message(3, "definitely not json"),
            message(4, r#"{"user_id":"456","app_version":"abc"}"#),
            message(5, r#"{"user_id":"789","app_version":"2.0.3"}"#),
        ];

        let mut stats = CycleStats::default();
        let batch = build_batch(&messages, &mut stats);

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].user_id, "123");
        assert_eq!(batch[0].app_version, 11);
        assert_eq!(batch[1].user_id, "789");
        assert_eq!(batch[1].app_version, 203);

        assert_eq!(stats.skipped_empty, 1);
        assert_eq!(stats.skipped_malformed, 1);
        assert_eq!(stats.skipped_invalid_version, 1);
    }

    #[test]
    fn test_build_batch_of_nothing_is_empty() {
        let mut stats = CycleStats::default();
        assert!(build_batch(&[], &mut stats).is_empty());
        assert_eq!(stats, CycleStats::default());
    }
}
