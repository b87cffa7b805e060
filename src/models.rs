// =============================================================================
// models.rs — THE SACRED DATA STRUCTURES OF JUDICIAL BUREAUCRACY
// =============================================================================
//
// These structs represent the fundamental building blocks of our gazette
// harvesting system. Each field has been carefully chosen to capture every
// conceivable piece of information about an RPV publication's journey from
// a wall of uppercase legalese to a tidy database row.
//
// Is it overkill to track four separate monetary fields on a single court
// notice? Yes. Do we care? Absolutely not. The clerk tracks four, so we
// track four.
// =============================================================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::money::Money;

/// Where a notice record came from. The consumer needs to know whether it
/// is looking at a real extraction or at a clearly-labeled stand-in we
/// synthesized because the bulletin was refusing to cooperate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RecordSource {
    /// Extracted from an actual gazette page. The real deal.
    /// A judge signed something and we read it.
    #[serde(rename = "DJE-TJSP-REAL")]
    RealExtraction,

    /// Example records generated when the source was unreachable before
    /// the run even started. Plausible-looking, non-authoritative.
    #[serde(rename = "DJE-TJSP-EXEMPLO-FALLBACK")]
    ExampleFallback,

    /// Deterministic placeholders generated mid-run after blocking was
    /// detected. Same generator, different provenance: the run got
    /// partway through reality before the site slammed the door.
    #[serde(rename = "DJE-TJSP-SINTETICO")]
    SyntheticPlaceholder,
}

impl fmt::Display for RecordSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordSource::RealExtraction => write!(f, "DJE-TJSP-REAL"),
            RecordSource::ExampleFallback => write!(f, "DJE-TJSP-EXEMPLO-FALLBACK"),
            RecordSource::SyntheticPlaceholder => write!(f, "DJE-TJSP-SINTETICO"),
        }
    }
}

/// The defendant never changes. Every publication this engine cares about
/// is someone trying to get paid by the same federal institute.
pub const DEFAULT_DEFENDANT: &str = "Instituto Nacional do Seguro Social - INSS";

/// Notice text is bounded so a runaway gazette page can't turn one record
/// into a novella in the database.
pub const MAX_CONTENT_LEN: usize = 2000;

/// One publication notice, fully structured. This is what gets upserted
/// into the persistence API, keyed by process number.
///
/// The four monetary fields are independently optional: a notice may
/// mention all four categories, some of them, or none. Absent fields are
/// omitted from the JSON entirely — null is a lie we refuse to tell.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticeRecord {
    /// Canonical CNJ case number (25 digits with separators), a looser
    /// numeric form when the canonical one is absent, or a generated
    /// placeholder for synthetic records. Never empty — together with the
    /// date it is the natural dedup key.
    pub numero_processo: String,

    /// The gazette date this notice was published under, as an ISO
    /// date-time string (midnight, the way the backend expects it).
    pub data_disponibilizacao: String,

    /// Plaintiff description — whatever precedes the "x"/"vs"/"contra"
    /// separator, verbatim, or "Não identificado".
    pub autores: String,

    /// Counsel description: "Name (OAB: 12345/SP)" entries, newline
    /// joined, or a placeholder when no bar registration matched.
    pub advogados: String,

    /// The notice text itself, truncated to [`MAX_CONTENT_LEN`].
    pub conteudo: String,

    /// Gross principal amount.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valor_principal_bruto: Option<Money>,

    /// Net principal amount.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valor_principal_liquido: Option<Money>,

    /// Default interest (juros moratórios).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valor_juros_moratorios: Option<Money>,

    /// Attorney fees (honorários advocatícios).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub honorarios_advocaticios: Option<Money>,

    /// The defendant. See [`DEFAULT_DEFENDANT`].
    pub reu: String,

    /// Comma-joined list of the mandatory search terms that matched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termos_encontrados: Option<String>,

    /// Provenance tag. Downstream consumers filter on this.
    pub fonte: RecordSource,
}

impl NoticeRecord {
    /// Build a record with the invariable fields pre-filled and every
    /// optional field empty. Callers fill in what they extracted.
    pub fn new(numero_processo: String, date: NaiveDate, fonte: RecordSource) -> Self {
        Self {
            numero_processo,
            data_disponibilizacao: format!("{}T00:00:00.000Z", date.format("%Y-%m-%d")),
            autores: String::new(),
            advogados: String::new(),
            conteudo: String::new(),
            valor_principal_bruto: None,
            valor_principal_liquido: None,
            valor_juros_moratorios: None,
            honorarios_advocaticios: None,
            reu: DEFAULT_DEFENDANT.to_string(),
            termos_encontrados: None,
            fonte,
        }
    }

    /// Dedup key: process number + date. The persistence layer upserts on
    /// the process number alone, but within a run the same process can
    /// legitimately appear on consecutive gazette dates.
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.numero_processo, self.data_disponibilizacao)
    }

    /// Truncate the content field to the bounded length, respecting UTF-8
    /// boundaries because gazette text is full of ç and ã.
    pub fn set_bounded_content(&mut self, text: &str) {
        if text.len() <= MAX_CONTENT_LEN {
            self.conteudo = text.to_string();
        } else {
            let mut end = MAX_CONTENT_LEN;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            self.conteudo = text[..end].to_string();
        }
    }
}

impl fmt::Display for NoticeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} — {} via {}",
            self.numero_processo,
            self.autores,
            self.data_disponibilizacao,
            self.fonte,
        )
    }
}

/// The run-level statistics every caller gets back, success or not.
/// The engine degrades to labeled synthetic output rather than returning
/// nothing, so `success` is about the run completing — not about whether
/// the bulletin deigned to answer.
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub success: bool,
    pub total_encontradas: u64,
    pub total_enviadas: u64,
    pub total_erros: u64,
    pub data_inicio: String,
    pub data_fim: String,
    pub execution_time_secs: f64,
    pub fonte: RecordSource,
    /// Human-readable outage description when the run fell back to
    /// synthetic output. Absent on a clean run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outage_reason: Option<String>,
}

/// Everything a completed run produced: the records plus the stats.
/// Records are returned even when they are placeholders, clearly tagged.
#[derive(Debug)]
pub struct RunOutcome {
    pub records: Vec<NoticeRecord>,
    pub stats: RunStats,
}
