// =============================================================================
// progress.rs — THE ANXIETY DASHBOARD FEED
// =============================================================================
//
// Somebody out there is refreshing a progress bar while this engine
// crawls through gazette dates. This module is their feed: lock-free
// counters for the hot path, a parking_lot RwLock for the cold strings,
// and a registry that keys every run by UUID so two runs can coexist
// without stomping each other's percentages.
//
// Counters are portable-atomic and written with Relaxed ordering — the
// consumer is a human polling an HTTP endpoint once a second, not a
// memory-model lawyer. The snapshot is internally consistent ENOUGH:
// if the percentage is one date behind the counter for a microsecond,
// nobody's requisition is harmed.
// =============================================================================

use parking_lot::RwLock;
use portable_atomic::{AtomicBool, AtomicU64, Ordering};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// The cold, rarely-written half of a run's progress.
#[derive(Debug, Default)]
struct ProgressText {
    data_atual: String,
    periodo: String,
    termos_buscados: Vec<String>,
    erro: Option<String>,
    inicio: String,
}

/// Live progress for one run. Cheap to share, cheap to update.
#[derive(Debug, Default)]
pub struct RunProgress {
    ativa: AtomicBool,
    total_dias: AtomicU64,
    dias_processados: AtomicU64,
    publicacoes_encontradas: AtomicU64,
    text: RwLock<ProgressText>,
}

/// What the polling endpoint serves. Field names match what the
/// dashboard on the other end already expects.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub ativa: bool,
    pub total_dias: u64,
    pub dias_processados: u64,
    pub publicacoes_encontradas: u64,
    pub porcentagem: f64,
    pub data_atual: String,
    pub periodo: String,
    pub termos_buscados: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub erro: Option<String>,
    pub inicio: String,
}

impl RunProgress {
    /// Arm the progress for a starting run.
    pub fn begin(&self, total_dias: u64, periodo: String, termos: Vec<String>) {
        self.total_dias.store(total_dias, Ordering::Relaxed);
        self.dias_processados.store(0, Ordering::Relaxed);
        self.publicacoes_encontradas.store(0, Ordering::Relaxed);
        self.ativa.store(true, Ordering::Relaxed);
        let mut text = self.text.write();
        text.periodo = periodo;
        text.termos_buscados = termos;
        text.erro = None;
        text.inicio = chrono::Utc::now().to_rfc3339();
    }

    /// The run moved on to a new gazette date.
    pub fn set_current_date(&self, formatted: &str) {
        self.text.write().data_atual = formatted.to_string();
    }

    /// One date finished (successfully or not — it was processed).
    pub fn date_done(&self) {
        self.dias_processados.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark ALL remaining dates processed in one jump. Used when the run
    /// switches to synthetic output: the bar goes to 100 rather than
    /// freezing where the bouncer stopped us.
    pub fn finish_remaining_dates(&self) {
        let total = self.total_dias.load(Ordering::Relaxed);
        self.dias_processados.store(total, Ordering::Relaxed);
    }

    pub fn add_found(&self, count: u64) {
        self.publicacoes_encontradas.fetch_add(count, Ordering::Relaxed);
    }

    /// Record the outage description shown to the dashboard.
    pub fn set_error(&self, message: &str) {
        self.text.write().erro = Some(message.to_string());
    }

    /// The run is over, whatever happened.
    pub fn finish(&self) {
        self.ativa.store(false, Ordering::Relaxed);
    }

    /// A point-in-time view, percentage included (one decimal, because a
    /// progress bar reading 42.857142857% helps nobody).
    pub fn snapshot(&self) -> ProgressSnapshot {
        let total = self.total_dias.load(Ordering::Relaxed);
        let done = self.dias_processados.load(Ordering::Relaxed);
        let porcentagem = if total == 0 {
            0.0
        } else {
            ((done as f64 / total as f64) * 1000.0).round() / 10.0
        };
        let text = self.text.read();
        ProgressSnapshot {
            ativa: self.ativa.load(Ordering::Relaxed),
            total_dias: total,
            dias_processados: done,
            publicacoes_encontradas: self.publicacoes_encontradas.load(Ordering::Relaxed),
            porcentagem,
            data_atual: text.data_atual.clone(),
            periodo: text.periodo.clone(),
            termos_buscados: text.termos_buscados.clone(),
            erro: text.erro.clone(),
            inicio: text.inicio.clone(),
        }
    }
}

/// All runs' progress, keyed by run id, with a pointer to the most
/// recent one for clients that don't track ids.
///
/// Also owns the run gate: an async mutex held for a run's whole
/// duration, carrying the previous run's completion instant. Holding it
/// serializes runs against the source; the instant inside is what the
/// cooldown is measured from.
#[derive(Default)]
pub struct ProgressRegistry {
    runs: RwLock<HashMap<Uuid, Arc<RunProgress>>>,
    latest: RwLock<Option<Uuid>>,
    gate: tokio::sync::Mutex<Option<std::time::Instant>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh run and hand back its id + progress handle.
    pub fn create_run(&self) -> (Uuid, Arc<RunProgress>) {
        let id = Uuid::new_v4();
        let progress = Arc::new(RunProgress::default());
        self.runs.write().insert(id, Arc::clone(&progress));
        *self.latest.write() = Some(id);
        (id, progress)
    }

    /// Look up a run by id, or fall back to the latest one.
    pub fn get(&self, id: Option<Uuid>) -> Option<Arc<RunProgress>> {
        let runs = self.runs.read();
        let key = id.or(*self.latest.read())?;
        runs.get(&key).cloned()
    }

    /// The run gate. Lock it before opening a session, keep it locked
    /// until the run finishes, and store `Instant::now()` on release.
    pub fn run_gate(&self) -> &tokio::sync::Mutex<Option<std::time::Instant>> {
        &self.gate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_rounds_to_one_decimal() {
        let progress = RunProgress::default();
        progress.begin(7, "17/03/2025 a 23/03/2025".to_string(), vec![]);
        progress.date_done();
        progress.date_done();
        progress.date_done();
        // 3/7 = 42.857...% → 42.9
        assert_eq!(progress.snapshot().porcentagem, 42.9);
    }

    #[test]
    fn test_zero_total_days_is_zero_percent_not_nan() {
        let progress = RunProgress::default();
        assert_eq!(progress.snapshot().porcentagem, 0.0);
    }

    #[test]
    fn test_finish_remaining_jumps_to_full() {
        let progress = RunProgress::default();
        progress.begin(5, String::new(), vec![]);
        progress.date_done();
        progress.finish_remaining_dates();
        let snap = progress.snapshot();
        assert_eq!(snap.dias_processados, 5);
        assert_eq!(snap.porcentagem, 100.0);
    }

    #[test]
    fn test_registry_latest_and_by_id() {
        let registry = ProgressRegistry::new();
        let (first_id, first) = registry.create_run();
        first.begin(1, String::new(), vec![]);
        let (second_id, _second) = registry.create_run();
        assert_ne!(first_id, second_id);

        // No id → latest run.
        let latest = registry.get(None).unwrap();
        assert_eq!(latest.snapshot().total_dias, 0);

        // Explicit id → that run.
        let by_id = registry.get(Some(first_id)).unwrap();
        assert_eq!(by_id.snapshot().total_dias, 1);

        // Unknown id → None.
        assert!(registry.get(Some(Uuid::new_v4())).is_none());
    }

    #[test]
    fn test_error_serialized_only_when_present() {
        let progress = RunProgress::default();
        progress.begin(1, String::new(), vec![]);
        let clean = serde_json::to_string(&progress.snapshot()).unwrap();
        assert!(!clean.contains("erro"));
        progress.set_error("site bloqueado");
        let errored = serde_json::to_string(&progress.snapshot()).unwrap();
        assert!(errored.contains("site bloqueado"));
    }
}
