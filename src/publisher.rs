//! Alert publisher - versioned envelopes, at-most-once per analysis run
//!
//! Duplicate alerts cause duplicate downstream protective action, which is
//! worse than a delayed alert. The publisher therefore reserves the
//! idempotency key (token, chain, run) before the first write attempt and
//! keeps the reservation on failure: one analysis run publishes at most one
//! envelope, ever. Reservations age out after the configured TTL.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::models::config::PublisherConfig;
use crate::models::errors::{EngineError, EngineResult};
use crate::models::types::{AlertData, AlertEnvelope, AnalysisTask, ProbeResult, RiskVerdict};
use crate::stream::StreamTransport;

/// What became of one publish call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Envelope written; entry id assigned by the stream
    Published(String),
    /// This run already delivered; the prior entry id, nothing written
    Duplicate(String),
    /// Idempotency key reserved but not yet delivered; nothing written
    Suppressed,
}

#[derive(Debug, Clone)]
struct Receipt {
    reserved_at: Instant,
    /// Entry id of the delivered envelope, None while only reserved
    entry_id: Option<String>,
}

/// Stream-agnostic alert publisher with per-run idempotency
pub struct AlertPublisher {
    transport: Arc<dyn StreamTransport>,
    config: PublisherConfig,
    receipts: DashMap<String, Receipt>,
}

impl AlertPublisher {
    pub fn new(transport: Arc<dyn StreamTransport>, config: PublisherConfig) -> Self {
        Self {
            transport,
            config,
            receipts: DashMap::new(),
        }
    }

    /// Publish the alert for one completed analysis. A key that already
    /// delivered returns the prior entry id; a key still reserved returns
    /// Suppressed. Neither touches the stream again.
    pub async fn publish(
        &self,
        task: &AnalysisTask,
        probe: &ProbeResult,
        verdict: &RiskVerdict,
    ) -> EngineResult<PublishOutcome> {
        self.purge_expired();

        let key = idempotency_key(task);
        // Reserve-then-write: the reservation survives failure, so a retried
        // run can never produce a second envelope.
        match self.receipts.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                return Ok(match &entry.get().entry_id {
                    Some(entry_id) => {
                        warn!("🔁 Duplicate publish for {} already at {}", key, entry_id);
                        PublishOutcome::Duplicate(entry_id.clone())
                    }
                    None => {
                        warn!("🔁 Suppressed duplicate publish for {}", key);
                        PublishOutcome::Suppressed
                    }
                });
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Receipt {
                    reserved_at: Instant::now(),
                    entry_id: None,
                });
            }
        }

        let envelope = build_envelope(task, probe, verdict);
        let payload = serde_json::to_string(&envelope)?;
        let fields = vec![
            ("type".to_string(), envelope.alert_type.clone()),
            ("payload".to_string(), payload),
        ];

        let mut last_error: Option<EngineError> = None;
        for attempt in 1..=self.config.retry_attempts {
            // The dedupe key rides down to the transport, where it is
            // checked atomically with the append: a timed-out write that
            // actually landed hands its entry id back on the retry instead
            // of appending twice.
            let write = tokio::time::timeout(
                self.config.write_timeout,
                self.transport.append(
                    &self.config.stream_name,
                    self.config.stream_maxlen,
                    &key,
                    self.config.idempotency_ttl,
                    &fields,
                ),
            )
            .await;

            match write {
                Ok(Ok(entry_id)) => {
                    if let Some(mut receipt) = self.receipts.get_mut(&key) {
                        receipt.entry_id = Some(entry_id.clone());
                    }
                    info!(
                        "{} Published {} alert for {} on chain {} (score {:.0}, entry {})",
                        verdict.risk_level.emoji(),
                        verdict.risk_level.as_str(),
                        probe.token_address,
                        probe.chain_id,
                        verdict.risk_score,
                        entry_id
                    );
                    return Ok(PublishOutcome::Published(entry_id));
                }
                Ok(Err(e)) => {
                    warn!(
                        "⚠️ Stream write {}/{} failed for {}: {}",
                        attempt, self.config.retry_attempts, key, e
                    );
                    last_error = Some(e);
                }
                Err(_) => {
                    warn!(
                        "⏱️ Stream write {}/{} timed out for {}",
                        attempt, self.config.retry_attempts, key
                    );
                    last_error = Some(EngineError::stream_write_timeout(format!(
                        "write exceeded {:?}",
                        self.config.write_timeout
                    )));
                }
            }

            if attempt < self.config.retry_attempts {
                tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
            }
        }

        let detail = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempts made".to_string());
        error!("❌ Publish failed for {}: {}", key, detail);
        Err(EngineError::publish_failed(format!(
            "{} attempts exhausted for {}: {}",
            self.config.retry_attempts, key, detail
        )))
    }

    /// Receipts currently held (reserved or delivered)
    pub fn receipt_count(&self) -> usize {
        self.receipts.len()
    }

    fn purge_expired(&self) {
        let ttl = self.config.idempotency_ttl;
        self.receipts
            .retain(|_, receipt| receipt.reserved_at.elapsed() < ttl);
    }
}

/// Idempotency key: one alert per (token, chain, run)
fn idempotency_key(task: &AnalysisTask) -> String {
    format!(
        "0x{:x}:{}:{}",
        task.token_address, task.chain_id, task.run_id
    )
}

fn build_envelope(task: &AnalysisTask, probe: &ProbeResult, verdict: &RiskVerdict) -> AlertEnvelope {
    // Runtime-confirmed means the sell simulation itself demonstrated the
    // block, as opposed to a score assembled from softer signals.
    let runtime_confirmed = if !probe.can_sell && probe.simulation_error.is_some() {
        "1"
    } else {
        "0"
    };

    AlertEnvelope::honeypot_alert(AlertData {
        token_address: format!("0x{:x}", task.token_address),
        chain_id: task.chain_id,
        run_id: task.run_id.clone(),
        verdict: verdict.clone(),
        can_buy: probe.can_buy,
        can_sell: probe.can_sell,
        buy_tax_bps: probe.buy_tax_bps,
        sell_tax_bps: probe.sell_tax_bps,
        runtime_confirmed: runtime_confirmed.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::types::{RiskLevel, ScoreFactor, TaskTrigger};
    use crate::stream::InMemoryStream;
    use alloy_primitives::Address;
    use std::str::FromStr;

    fn task() -> AnalysisTask {
        AnalysisTask::new(
            Address::from_str("0xdAC17F958D2ee523a2206206994597C13D831ec7").unwrap(),
            1,
            TaskTrigger::NewToken,
        )
    }

    fn honeypot_probe() -> ProbeResult {
        ProbeResult {
            token_address: Address::ZERO,
            chain_id: 1,
            can_buy: true,
            can_sell: false,
            buy_tax_bps: 0,
            sell_tax_bps: 10_000,
            simulation_error: Some("execution reverted".to_string()),
        }
    }

    fn critical_verdict() -> RiskVerdict {
        RiskVerdict {
            risk_score: 100.0,
            risk_level: RiskLevel::Critical,
            is_honeypot: true,
            contributing_factors: vec![ScoreFactor {
                tag: "sell_blocked".to_string(),
                points: 100.0,
                detail: "execution reverted".to_string(),
            }],
        }
    }

    fn fast_config() -> PublisherConfig {
        PublisherConfig {
            retry_attempts: 3,
            write_timeout: Duration::from_secs(1),
            ..PublisherConfig::default()
        }
    }

    #[tokio::test]
    async fn test_publish_writes_versioned_envelope() {
        let stream = Arc::new(InMemoryStream::new());
        let publisher = AlertPublisher::new(stream.clone(), fast_config());

        let outcome = publisher
            .publish(&task(), &honeypot_probe(), &critical_verdict())
            .await
            .unwrap();
        assert!(matches!(outcome, PublishOutcome::Published(_)));

        let entries = stream.entries();
        assert_eq!(entries.len(), 1);
        let payload = &entries[0].fields.iter().find(|(k, _)| k == "payload").unwrap().1;
        let json: serde_json::Value = serde_json::from_str(payload).unwrap();
        assert_eq!(json["schema_v"], "1.0");
        assert_eq!(json["lane"], "protection");
        assert_eq!(json["data"]["risk_level"], "CRITICAL");
        assert_eq!(json["data"]["runtime_confirmed"], "1");
    }

    #[tokio::test]
    async fn test_same_run_publishes_at_most_once() {
        let stream = Arc::new(InMemoryStream::new());
        let publisher = AlertPublisher::new(stream.clone(), fast_config());
        let task = task();

        let first = publisher
            .publish(&task, &honeypot_probe(), &critical_verdict())
            .await
            .unwrap();
        let second = publisher
            .publish(&task, &honeypot_probe(), &critical_verdict())
            .await
            .unwrap();

        // The duplicate hands back where the first publish landed
        let first_id = match first {
            PublishOutcome::Published(id) => id,
            other => panic!("first publish must write: {:?}", other),
        };
        assert_eq!(second, PublishOutcome::Duplicate(first_id));
        assert_eq!(stream.len(), 1);
    }

    #[tokio::test]
    async fn test_lost_write_ack_is_not_republished() {
        // The first append lands in the stream but its acknowledgement is
        // lost, as with an XADD that beats its own timeout. The retry must
        // resolve to the landed entry, not append a second one.
        let stream = Arc::new(InMemoryStream::lose_ack_first(1));
        let publisher = AlertPublisher::new(stream.clone(), fast_config());

        let outcome = publisher
            .publish(&task(), &honeypot_probe(), &critical_verdict())
            .await
            .unwrap();

        assert_eq!(stream.len(), 1, "exactly one entry for the whole run");
        assert_eq!(
            outcome,
            PublishOutcome::Published(stream.entries()[0].entry_id.clone())
        );
    }

    #[tokio::test]
    async fn test_retries_recover_from_transient_failure() {
        let stream = Arc::new(InMemoryStream::fail_first(2));
        let publisher = AlertPublisher::new(stream.clone(), fast_config());

        let outcome = publisher
            .publish(&task(), &honeypot_probe(), &critical_verdict())
            .await
            .unwrap();
        assert!(matches!(outcome, PublishOutcome::Published(_)));
        assert_eq!(stream.len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_and_stay_suppressed() {
        let stream = Arc::new(InMemoryStream::fail_first(10));
        let publisher = AlertPublisher::new(stream.clone(), fast_config());
        let task = task();

        let err = publisher
            .publish(&task, &honeypot_probe(), &critical_verdict())
            .await
            .unwrap_err();
        assert_eq!(err.code, crate::models::errors::ErrorCode::PublishFailed);

        // The reservation outlives the failure: the same run never retries
        // into a duplicate.
        let retry = publisher
            .publish(&task, &honeypot_probe(), &critical_verdict())
            .await
            .unwrap();
        assert_eq!(retry, PublishOutcome::Suppressed);
        assert!(stream.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_runs_publish_independently() {
        let stream = Arc::new(InMemoryStream::new());
        let publisher = AlertPublisher::new(stream.clone(), fast_config());

        publisher
            .publish(&task(), &honeypot_probe(), &critical_verdict())
            .await
            .unwrap();
        publisher
            .publish(&task(), &honeypot_probe(), &critical_verdict())
            .await
            .unwrap();

        assert_eq!(stream.len(), 2);
        assert_eq!(publisher.receipt_count(), 2);
    }

    #[tokio::test]
    async fn test_receipts_expire_after_ttl() {
        let stream = Arc::new(InMemoryStream::new());
        let config = PublisherConfig {
            idempotency_ttl: Duration::from_millis(0),
            ..fast_config()
        };
        let publisher = AlertPublisher::new(stream.clone(), config);
        let task = task();

        publisher
            .publish(&task, &honeypot_probe(), &critical_verdict())
            .await
            .unwrap();
        // Zero TTL: the receipt is already stale, so the same key writes again
        let second = publisher
            .publish(&task, &honeypot_probe(), &critical_verdict())
            .await
            .unwrap();
        assert!(matches!(second, PublishOutcome::Published(_)));
        assert_eq!(stream.len(), 2);
    }
}
