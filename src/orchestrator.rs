// =============================================================================
// orchestrator.rs — THE CAMPAIGN GENERAL
// =============================================================================
//
// One run, start to finish: march through the date range oldest-first,
// query each gazette date, extract, dedup, and keep a cool head when the
// site starts misbehaving. The decision table:
//
//   date succeeds            → collect records, reset the fault streak
//   transient fault          → reload, retry within the per-date budget
//   budget exhausted         → count the date against the streak
//   blocking signature       → stop querying IMMEDIATELY, synthetic
//                              records for every remaining date
//   streak hits threshold    → same surrender, different evidence
//
// The surrender is total and forward-looking: once we believe the site
// is blocking us, we do not probe the remaining dates "just to check".
// The remaining range (the failed date included) gets deterministic
// stand-ins, the progress bar jumps to 100, the outage reason lands in
// the stats, and the run COMPLETES. This engine degrades; it does not
// return empty-handed.
// =============================================================================

use async_trait::async_trait;
use chrono::NaiveDate;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::detector::{self, ConsecutiveFaultTracker, Outage, RetryPolicy};
use crate::extractor;
use crate::fallback;
use crate::models::{NoticeRecord, RecordSource, RunOutcome, RunStats};
use crate::patterns::TermMatcher;
use crate::progress::RunProgress;
use crate::session::{self, DateQueryPage, RetrievalSession, SessionFault};

/// Anything that can be asked for one gazette date's notice fragments.
/// The production impl is a [`RetrievalSession`] over a real browser;
/// tests script the misbehavior directly.
#[async_trait]
pub trait NoticeSource: Send {
    async fn fetch_date(&mut self, date: NaiveDate) -> Result<Vec<String>, SessionFault>;
    async fn reload(&mut self) -> Result<(), SessionFault>;
}

#[async_trait]
impl<P: DateQueryPage> NoticeSource for RetrievalSession<P> {
    async fn fetch_date(&mut self, date: NaiveDate) -> Result<Vec<String>, SessionFault> {
        RetrievalSession::fetch_date(self, date).await
    }
    async fn reload(&mut self) -> Result<(), SessionFault> {
        RetrievalSession::reload(self).await
    }
}

/// Per-date ceiling on extracted records. One gazette date yielding more
/// matching RPV notices than this means our term list is too loose, and
/// the database does not need to find that out the hard way.
pub const MAX_RECORDS_PER_DATE: usize = 5;

/// Run-scoped dedup capacity. A run covers at most 30 dates at 5 records
/// each; 512 keys is room to spare without keeping the cache honest.
const DEDUP_CAPACITY: usize = 512;

/// Drives one run over one date range.
pub struct Orchestrator {
    policy: RetryPolicy,
    progress: std::sync::Arc<RunProgress>,
}

impl Orchestrator {
    pub fn new(policy: RetryPolicy, progress: std::sync::Arc<RunProgress>) -> Self {
        Self { policy, progress }
    }

    /// The full campaign. Always returns an outcome; "failure" manifests
    /// as synthetic records plus an outage reason, never as an error.
    pub async fn run<S: NoticeSource>(
        &self,
        source: &mut S,
        dates: &[NaiveDate],
        terms: &TermMatcher,
    ) -> RunOutcome {
        let started = Instant::now();
        let mut records: Vec<NoticeRecord> = Vec::new();
        let mut dedup = LruCache::new(
            NonZeroUsize::new(DEDUP_CAPACITY).expect("nonzero dedup capacity"),
        );
        let mut tracker = ConsecutiveFaultTracker::new();
        let mut outage_reason: Option<String> = None;

        info!(
            dates = dates.len(),
            first = %dates.first().map(|d| d.to_string()).unwrap_or_default(),
            last = %dates.last().map(|d| d.to_string()).unwrap_or_default(),
            "run starting"
        );

        for (i, &date) in dates.iter().enumerate() {
            self.progress
                .set_current_date(&session::format_form_date(date));

            match self.process_date(source, date).await {
                Ok(fragments) => {
                    let extracted = extractor::extract_batch(&fragments, date, terms);
                    let mut kept = 0usize;
                    for record in extracted {
                        if kept >= MAX_RECORDS_PER_DATE {
                            warn!(date = %date, "per-date record ceiling reached");
                            break;
                        }
                        let key = record.dedup_key();
                        if dedup.put(key, ()).is_some() {
                            debug!(processo = %record.numero_processo, "duplicate within run");
                            continue;
                        }
                        kept += 1;
                        records.push(record);
                    }
                    self.progress.add_found(kept as u64);
                    self.progress.date_done();
                    tracker.record_success();
                }
                Err(DateFailure::Blocked(reason)) => {
                    outage_reason = Some(reason);
                    self.surrender(&mut records, &dates[i..], terms, &mut dedup);
                    break;
                }
                Err(DateFailure::Exhausted(reason)) => {
                    self.progress.date_done();
                    if tracker.record_failure(&self.policy) {
                        outage_reason = Some(format!(
                            "{} datas consecutivas falharam (última: {reason})",
                            tracker.streak(),
                        ));
                        // The streak includes this date, already marked
                        // processed; stand-ins start here regardless.
                        self.surrender(&mut records, &dates[i..], terms, &mut dedup);
                        break;
                    }
                }
            }

            if i + 1 < dates.len() {
                tokio::time::sleep(self.policy.per_date_throttle).await;
            }
        }

        if let Some(reason) = &outage_reason {
            self.progress.set_error(reason);
        }
        self.progress.finish();

        let fonte = dominant_source(&records, outage_reason.is_some());
        let stats = RunStats {
            success: true,
            total_encontradas: records.len() as u64,
            total_enviadas: 0,
            total_erros: 0,
            data_inicio: dates.first().map(|d| d.to_string()).unwrap_or_default(),
            data_fim: dates.last().map(|d| d.to_string()).unwrap_or_default(),
            execution_time_secs: started.elapsed().as_secs_f64(),
            fonte,
            outage_reason,
        };

        info!(
            records = stats.total_encontradas,
            fonte = %stats.fonte,
            secs = format!("{:.1}", stats.execution_time_secs),
            "run complete"
        );
        RunOutcome { records, stats }
    }

    /// One date, with the retry budget applied. A blocking signature
    /// aborts the budget immediately — retrying a bouncer is how you get
    /// your whole subnet banned.
    async fn process_date<S: NoticeSource>(
        &self,
        source: &mut S,
        date: NaiveDate,
    ) -> Result<Vec<String>, DateFailure> {
        let mut last_reason = String::new();
        for attempt in 1..=self.policy.max_attempts_per_date {
            match source.fetch_date(date).await {
                Ok(fragments) => return Ok(fragments),
                Err(fault) => {
                    match detector::classify(&fault) {
                        Outage::Blocked => {
                            warn!(date = %date, fault = %fault, "blocking signature detected");
                            return Err(DateFailure::Blocked(fault.to_string()));
                        }
                        Outage::Transient => {
                            warn!(
                                date = %date,
                                attempt,
                                max = self.policy.max_attempts_per_date,
                                fault = %fault,
                                "date attempt failed"
                            );
                            last_reason = fault.to_string();
                        }
                    }
                    if attempt < self.policy.max_attempts_per_date {
                        tokio::time::sleep(self.policy.reload_delay).await;
                        if let Err(e) = source.reload().await {
                            // A reload that fails is the transport dying;
                            // no point burning the remaining attempts.
                            return Err(DateFailure::Exhausted(e.to_string()));
                        }
                    }
                }
            }
        }
        Err(DateFailure::Exhausted(last_reason))
    }

    /// Stop querying; synthetic stand-ins for the remaining range.
    fn surrender(
        &self,
        records: &mut Vec<NoticeRecord>,
        remaining: &[NaiveDate],
        terms: &TermMatcher,
        dedup: &mut LruCache<String, ()>,
    ) {
        warn!(
            remaining = remaining.len(),
            "switching to synthetic output for the rest of the range"
        );
        let synthetic = fallback::generate(
            remaining,
            terms.terms(),
            RecordSource::SyntheticPlaceholder,
        );
        let mut added = 0u64;
        for record in synthetic {
            if dedup.put(record.dedup_key(), ()).is_none() {
                added += 1;
                records.push(record);
            }
        }
        self.progress.add_found(added);
        self.progress.finish_remaining_dates();
    }
}

enum DateFailure {
    /// The anti-automation signature. Immediate surrender.
    Blocked(String),
    /// Retry budget spent on ordinary faults. Counts toward the streak.
    Exhausted(String),
}

/// Run a full-fallback campaign without ever touching a browser. Used
/// when session setup itself fails: no transport, no queries, labeled
/// example records for the whole range.
pub fn full_fallback_run(
    dates: &[NaiveDate],
    terms: &TermMatcher,
    progress: &RunProgress,
    reason: &str,
) -> RunOutcome {
    let started = Instant::now();
    warn!(reason, "session setup failed — example records for the whole range");

    let records = fallback::generate(dates, terms.terms(), RecordSource::ExampleFallback);
    progress.add_found(records.len() as u64);
    progress.finish_remaining_dates();
    progress.set_error(reason);
    progress.finish();

    let stats = RunStats {
        success: true,
        total_encontradas: records.len() as u64,
        total_enviadas: 0,
        total_erros: 0,
        data_inicio: dates.first().map(|d| d.to_string()).unwrap_or_default(),
        data_fim: dates.last().map(|d| d.to_string()).unwrap_or_default(),
        execution_time_secs: started.elapsed().as_secs_f64(),
        fonte: RecordSource::ExampleFallback,
        outage_reason: Some(reason.to_string()),
    };
    RunOutcome { records, stats }
}

/// The run-level provenance tag: real when any real record exists and
/// nothing went wrong, synthetic as soon as an outage fired.
fn dominant_source(records: &[NoticeRecord], had_outage: bool) -> RecordSource {
    if had_outage {
        RecordSource::SyntheticPlaceholder
    } else if records.is_empty() {
        RecordSource::RealExtraction
    } else {
        records[0].fonte
    }
}
