// =============================================================================
// publisher.rs — THE DATABASE COURIER
// =============================================================================
//
// This module hands finished records to the persistence API, one POST at
// a time, and keeps the books on how it went. The API upserts on process
// number, which gives us the single most important contract in this
// file:
//
//   HTTP 409 IS A SUCCESS.
//
// A conflict means the record already exists, which means a previous run
// already delivered it, which means the system is working. We count it
// as delivered and move on. Treating 409 as an error would make every
// re-run of an overlapping date range look like a disaster, and the
// whole point of an idempotent pipeline is that re-runs are boring.
//
// Between records we pause briefly. The API is a small Node process that
// shares a box with the database; we are its biggest client and its
// worst enemy, and the pause keeps us merely the former.
// =============================================================================

use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::models::NoticeRecord;

/// What happened to one record at the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertResult {
    /// Freshly inserted (200/201).
    Created,
    /// Already there (409). Idempotence in action. A success.
    AlreadyExists,
    /// The API said no for real, or the wire ate the request.
    Failed,
}

/// Map an API status code onto the delivery outcome. Pulled out of the
/// request path so the contract is testable without a server.
pub fn classify_status(status: StatusCode) -> UpsertResult {
    match status {
        StatusCode::OK | StatusCode::CREATED => UpsertResult::Created,
        StatusCode::CONFLICT => UpsertResult::AlreadyExists,
        _ => UpsertResult::Failed,
    }
}

/// Delivery statistics for one run. Lock-free because the progress
/// endpoint reads them while the courier is mid-delivery.
#[derive(Debug, Default)]
pub struct PublisherStats {
    pub created: portable_atomic::AtomicU64,
    pub already_existed: portable_atomic::AtomicU64,
    pub failed: portable_atomic::AtomicU64,
}

/// A serializable snapshot of delivery stats.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PublisherSnapshot {
    pub created: u64,
    pub already_existed: u64,
    pub failed: u64,
    /// created + already_existed. What the run stats report as "sent".
    pub delivered: u64,
}

impl PublisherStats {
    pub fn snapshot(&self) -> PublisherSnapshot {
        use portable_atomic::Ordering;
        let created = self.created.load(Ordering::Relaxed);
        let already = self.already_existed.load(Ordering::Relaxed);
        PublisherSnapshot {
            created,
            already_existed: already,
            failed: self.failed.load(Ordering::Relaxed),
            delivered: created + already,
        }
    }
}

/// Pause between successive record deliveries.
const INTER_RECORD_PAUSE: Duration = Duration::from_millis(200);

/// The courier itself. One per run, pointed at one API base URL.
pub struct ApiPublisher {
    http: reqwest::Client,
    endpoint: String,
    stats: Arc<PublisherStats>,
}

impl ApiPublisher {
    pub fn new(http: reqwest::Client, api_url: &str) -> Self {
        Self {
            http,
            endpoint: format!("{}/api/publicacoes", api_url.trim_end_matches('/')),
            stats: Arc::new(PublisherStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<PublisherStats> {
        Arc::clone(&self.stats)
    }

    /// Deliver one record. Never returns an error — a failed delivery is
    /// counted, logged, and the run continues; one bad record must not
    /// strand the other forty-nine.
    pub async fn upsert(&self, record: &NoticeRecord) -> UpsertResult {
        use portable_atomic::Ordering;

        let outcome = match self.http.post(&self.endpoint).json(record).send().await {
            Ok(resp) => classify_status(resp.status()),
            Err(e) => {
                error!(
                    processo = %record.numero_processo,
                    error = %e,
                    "delivery request failed on the wire"
                );
                UpsertResult::Failed
            }
        };

        match outcome {
            UpsertResult::Created => {
                self.stats.created.fetch_add(1, Ordering::Relaxed);
                info!(
                    processo = %record.numero_processo,
                    fonte = %record.fonte,
                    "record delivered — a new row exists"
                );
            }
            UpsertResult::AlreadyExists => {
                self.stats.already_existed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    processo = %record.numero_processo,
                    "record already known to the API — idempotence, not failure"
                );
            }
            UpsertResult::Failed => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(processo = %record.numero_processo, "record delivery failed");
            }
        }

        outcome
    }

    /// Deliver a whole run's records sequentially, politely paced.
    /// Returns the final snapshot.
    pub async fn publish_all(&self, records: &[NoticeRecord]) -> PublisherSnapshot {
        for (i, record) in records.iter().enumerate() {
            self.upsert(record).await;
            if i + 1 < records.len() {
                tokio::time::sleep(INTER_RECORD_PAUSE).await;
            }
        }
        let snapshot = self.stats.snapshot();
        info!(
            delivered = snapshot.delivered,
            created = snapshot.created,
            already_existed = snapshot.already_existed,
            failed = snapshot.failed,
            "delivery batch complete"
        );
        snapshot
    }
}
