// =============================================================================
// extractor.rs — THE LEGALESE DISASSEMBLER
// =============================================================================
//
// This module is where a wall of uppercase gazette text becomes a typed
// record. The pipeline per notice:
//
// 1. Term filter — the notice must contain at least TWO of the mandatory
//    search terms (case-insensitive containment via the Aho-Corasick
//    automaton). One hit is coincidence; two is a pension requisition.
// 2. Process number — canonical CNJ format first, loose numeric fallback
//    second. No number, no record. The process number is the primary key
//    and we don't invent primary keys from real pages.
// 3. Monetary categorization — every "R$ ..." match gets a 100-character
//    context window on each side, and keyword families decide which of
//    the four slots it fills. First match per slot wins. An uncategorized
//    FIRST amount defaults into the gross-principal slot, and we flag
//    that the default fired rather than pretending we knew.
// 4. Counsel — for each OAB registration, look just before it for a run
//    of capitalized words and call that the lawyer's name. No name, the
//    registration still gets recorded under an anonymous label.
// 5. Plaintiff — everything before the first "x"/"vs"/"contra".
//
// Steps 3-5 are best-effort heuristics, clearly labeled as such. A
// sufficiently creative clerk can defeat them. The alternative is a
// natural-language-understanding system, and we are a pattern-matching
// engine with delusions of grandeur, not a law firm.
// =============================================================================

use chrono::NaiveDate;
use rayon::prelude::*;
use tracing::debug;

use crate::models::{NoticeRecord, RecordSource};
use crate::money::Money;
use crate::patterns::{
    self, MONEY_AMOUNT, OAB_REGISTRATION, PARTY_SEPARATOR, TRAILING_NAME, TermMatcher,
};

/// Qualification bar: a notice must match at least this many distinct
/// mandatory terms.
pub const MIN_MATCHED_TERMS: usize = 2;

/// Notices shorter than this are headings, page furniture, or column
/// labels — never an actual publication.
pub const MIN_CONTENT_LEN: usize = 50;

/// Context window (chars each side) inspected around a currency match to
/// decide which monetary slot it belongs to.
const AMOUNT_CONTEXT_WINDOW: usize = 100;

/// How far before an OAB registration we look for the lawyer's name.
const COUNSEL_LOOKBEHIND: usize = 100;

/// The four monetary slots plus the marker for the default-to-gross rule.
/// Kept separate from `NoticeRecord` so the marker can be surfaced and
/// logged without widening the record schema.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MonetaryBreakdown {
    pub bruto: Option<Money>,
    pub liquido: Option<Money>,
    pub juros: Option<Money>,
    pub honorarios: Option<Money>,
    /// True when the gross-principal slot was filled by the "first
    /// uncategorized amount" fallback rather than a keyword hit.
    /// Documented best-effort behavior, surfaced instead of silent.
    pub gross_was_default: bool,
}

// Keyword families for the context-window classification. Lowercase;
// the window is lowercased before matching. Accented and unaccented
// spellings both appear in real pages, so both are listed.
const GROSS_KEYWORDS: &[&str] = &["principal", "bruto", "total"];
const NET_KEYWORDS: &[&str] = &["líquido", "liquido"];
const INTEREST_KEYWORDS: &[&str] = &["juros", "mora"];
const FEE_KEYWORDS: &[&str] = &["honorários", "honorarios", "advocatícios", "advocaticios"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AmountSlot {
    Gross,
    Net,
    Interest,
    Fees,
}

const SLOT_FAMILIES: [(AmountSlot, &[&str]); 4] = [
    (AmountSlot::Gross, GROSS_KEYWORDS),
    (AmountSlot::Net, NET_KEYWORDS),
    (AmountSlot::Interest, INTEREST_KEYWORDS),
    (AmountSlot::Fees, FEE_KEYWORDS),
];

/// Pick the slot whose keyword sits NEAREST to the amount. Notices pack
/// several labeled figures into one sentence, so the context windows of
/// adjacent amounts overlap each other's labels; proximity is what
/// disambiguates. The label precedes its amount in the gazette's house
/// style ("valor líquido: R$ ..."), so a preceding keyword — however
/// far — beats any following one; following keywords only decide when
/// nothing precedes.
fn nearest_slot(before: &str, after: &str) -> Option<AmountSlot> {
    let mut preceding: Option<(usize, AmountSlot)> = None;
    let mut following: Option<(usize, AmountSlot)> = None;

    for (slot, family) in SLOT_FAMILIES {
        for kw in family {
            if let Some(pos) = before.rfind(kw) {
                let dist = before.len() - (pos + kw.len());
                if preceding.map_or(true, |(best, _)| dist < best) {
                    preceding = Some((dist, slot));
                }
            }
            if let Some(pos) = after.find(kw) {
                if following.map_or(true, |(best, _)| pos < best) {
                    following = Some((pos, slot));
                }
            }
        }
    }

    preceding.or(following).map(|(_, slot)| slot)
}

/// Categorize every currency amount in the text into the four slots.
///
/// Total function: unparseable amounts are skipped, no amounts means an
/// all-empty breakdown. Each amount is bucketed by the nearest keyword
/// in its 100-char context window; first amount per slot wins, matching
/// the source bulletin's convention of stating each figure once.
pub fn extract_monetary_values(text: &str) -> MonetaryBreakdown {
    let mut values = MonetaryBreakdown::default();
    if !patterns::quick_currency_check(text) {
        return values;
    }

    for caps in MONEY_AMOUNT.captures_iter(text) {
        let Some(amount) = Money::parse_brl(&caps[1]) else {
            continue;
        };
        let m = caps.get(0).expect("group 0 always present");

        let mut start = m.start().saturating_sub(AMOUNT_CONTEXT_WINDOW);
        let mut end = (m.end() + AMOUNT_CONTEXT_WINDOW).min(text.len());
        while !text.is_char_boundary(start) {
            start -= 1;
        }
        while !text.is_char_boundary(end) {
            end += 1;
        }
        let before = text[start..m.start()].to_lowercase();
        let after = text[m.end()..end].to_lowercase();

        match nearest_slot(&before, &after) {
            Some(AmountSlot::Gross) => {
                if values.bruto.is_none() {
                    values.bruto = Some(amount);
                    values.gross_was_default = false;
                }
            }
            Some(AmountSlot::Net) => {
                if values.liquido.is_none() {
                    values.liquido = Some(amount);
                }
            }
            Some(AmountSlot::Interest) => {
                if values.juros.is_none() {
                    values.juros = Some(amount);
                }
            }
            Some(AmountSlot::Fees) => {
                if values.honorarios.is_none() {
                    values.honorarios = Some(amount);
                }
            }
            None if values.bruto.is_none() => {
                // No category keyword anywhere in the window. The
                // bulletin's long-standing convention is that a bare
                // leading amount is the principal, so that's where it
                // goes — flagged.
                values.bruto = Some(amount);
                values.gross_was_default = true;
            }
            None => {}
        }
    }

    if values.gross_was_default {
        if let Some(amount) = values.bruto {
            debug!(
                amount = %amount,
                "uncategorized leading amount defaulted to gross principal"
            );
        }
    }

    values
}

/// Extract counsel entries: one per OAB registration, with a name guess
/// from the text immediately preceding the registration.
///
/// Returns the newline-joined entries, or the "not identified" label when
/// the text has no registration at all.
pub fn extract_counsel(text: &str) -> String {
    let mut entries: Vec<String> = Vec::new();

    for caps in OAB_REGISTRATION.captures_iter(text) {
        let registration = &caps[1];
        let m = caps.get(0).expect("group 0 always present");

        let mut start = m.start().saturating_sub(COUNSEL_LOOKBEHIND);
        while !text.is_char_boundary(start) {
            start -= 1;
        }
        let before = &text[start..m.start()];

        let entry = match TRAILING_NAME.captures(before) {
            Some(name_caps) => format!("{} (OAB: {})", &name_caps[1], registration),
            None => format!("Advogado (OAB: {})", registration),
        };
        if !entries.contains(&entry) {
            entries.push(entry);
        }
    }

    if entries.is_empty() {
        "Advogado não identificado".to_string()
    } else {
        entries.join("\n")
    }
}

/// Plaintiff description: text before the first party separator, or the
/// "not identified" label. Verbatim, trimmed — the gazette's own casing
/// and punctuation are part of the record.
pub fn extract_plaintiff(text: &str) -> String {
    match PARTY_SEPARATOR.captures(text) {
        Some(caps) => {
            let autores = caps[1].trim();
            if autores.is_empty() {
                "Não identificado".to_string()
            } else {
                autores.to_string()
            }
        }
        None => "Não identificado".to_string(),
    }
}

/// Turn one notice fragment into a structured record, or `None` when the
/// fragment fails a qualification precondition (no process number, fewer
/// than two matched terms, or too short to be a real notice).
///
/// Pure function of its inputs — no I/O, no shared state, which is what
/// lets `extract_batch` fan it out across cores.
pub fn extract_notice(
    text: &str,
    date: NaiveDate,
    terms: &TermMatcher,
) -> Option<NoticeRecord> {
    let trimmed = text.trim();
    if trimmed.len() < MIN_CONTENT_LEN {
        return None;
    }

    let matched = terms.matched_terms(trimmed);
    if matched.len() < MIN_MATCHED_TERMS {
        return None;
    }

    let numero_processo = patterns::find_process_number(trimmed)?.to_string();

    let values = extract_monetary_values(trimmed);

    let mut record = NoticeRecord::new(numero_processo, date, RecordSource::RealExtraction);
    record.autores = extract_plaintiff(trimmed);
    record.advogados = extract_counsel(trimmed);
    record.set_bounded_content(trimmed);
    record.valor_principal_bruto = values.bruto;
    record.valor_principal_liquido = values.liquido;
    record.valor_juros_moratorios = values.juros;
    record.honorarios_advocaticios = values.honorarios;
    record.termos_encontrados = Some(matched.join(", "));

    debug!(
        processo = %record.numero_processo,
        termos = %record.termos_encontrados.as_deref().unwrap_or(""),
        "notice extracted"
    );

    Some(record)
}

/// Batch-extract a page's fragments in parallel with Rayon.
///
/// One gazette page yields dozens to hundreds of candidate fragments and
/// extraction is pure CPU work, so we let the work-stealing scheduler
/// chew through them. Order of the surviving records follows fragment
/// order, which follows page order.
pub fn extract_batch(
    fragments: &[String],
    date: NaiveDate,
    terms: &TermMatcher,
) -> Vec<NoticeRecord> {
    fragments
        .par_iter()
        .filter_map(|fragment| extract_notice(fragment, date, terms))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> TermMatcher {
        TermMatcher::new(["RPV", "pagamento pelo INSS", "INSS"])
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 17).unwrap()
    }

    const QUALIFYING: &str = "PROCESSO Nº 0001234-56.2025.8.26.0100. Maria Silva x \
        Instituto Nacional do Seguro Social. Deferida a RPV para pagamento pelo INSS. \
        Valor principal bruto: R$ 500,00. Advogado: Roberto Silva OAB: 34567/SP.";

    #[test]
    fn test_missing_process_number_is_not_extractable() {
        let text = "Deferida a RPV para pagamento pelo INSS no valor de R$ 500,00, \
            sem qualquer numeração de autos neste trecho da publicação.";
        assert!(extract_notice(text, date(), &matcher()).is_none());
    }

    #[test]
    fn test_fewer_than_two_terms_is_not_extractable() {
        let text = "PROCESSO Nº 0001234-56.2025.8.26.0100. Expedido alvará em favor \
            da parte autora, com RPV deferida, valores depositados em conta judicial.";
        // Only "RPV" matches; everything else about the notice is valid.
        assert!(extract_notice(text, date(), &matcher()).is_none());
    }

    #[test]
    fn test_short_fragment_is_skipped() {
        assert!(extract_notice("RPV INSS 123", date(), &matcher()).is_none());
    }

    #[test]
    fn test_qualifying_notice_extracts_all_fields() {
        let record = extract_notice(QUALIFYING, date(), &matcher()).unwrap();
        assert_eq!(record.numero_processo, "0001234-56.2025.8.26.0100");
        assert_eq!(record.fonte, RecordSource::RealExtraction);
        assert!(record.autores.contains("Maria Silva"));
        assert_eq!(record.advogados, "Roberto Silva (OAB: 34567/SP)");
        assert_eq!(record.valor_principal_bruto, Some(Money::from_cents(50_000)));
        let termos = record.termos_encontrados.unwrap();
        assert!(termos.contains("RPV"));
        assert!(termos.contains("pagamento pelo INSS"));
    }

    #[test]
    fn test_gross_principal_categorization_leaves_others_unset() {
        let values = extract_monetary_values("valor principal bruto: R$ 500,00");
        assert_eq!(values.bruto, Some(Money::from_cents(50_000)));
        assert_eq!(values.liquido, None);
        assert_eq!(values.juros, None);
        assert_eq!(values.honorarios, None);
        assert!(!values.gross_was_default);
    }

    #[test]
    fn test_all_four_slots_categorized() {
        let text = "valor principal bruto: R$ 10.000,00; valor líquido: R$ 8.500,00; \
            juros moratórios: R$ 1.500,00; honorários advocatícios: R$ 1.000,00";
        let values = extract_monetary_values(text);
        assert_eq!(values.bruto, Some(Money::from_cents(1_000_000)));
        assert_eq!(values.liquido, Some(Money::from_cents(850_000)));
        assert_eq!(values.juros, Some(Money::from_cents(150_000)));
        assert_eq!(values.honorarios, Some(Money::from_cents(100_000)));
    }

    #[test]
    fn test_adjacent_labels_bucket_by_nearest_keyword() {
        // The net amount's back-window still contains "principal bruto"
        // from the neighboring figure; its own label is nearer and must
        // win the bucket.
        let values = extract_monetary_values(
            "valor principal bruto: R$ 500,00, valor líquido: R$ 400,00",
        );
        assert_eq!(values.bruto, Some(Money::from_cents(50_000)));
        assert_eq!(values.liquido, Some(Money::from_cents(40_000)));
    }

    #[test]
    fn test_preceding_label_beats_nearer_following_label() {
        // "honorários" sits two chars after the interest amount, but the
        // gazette labels before the figure: "moratórios" wins.
        let values = extract_monetary_values(
            "juros moratórios: R$ 1.500,00; honorários advocatícios: R$ 1.000,00",
        );
        assert_eq!(values.juros, Some(Money::from_cents(150_000)));
        assert_eq!(values.honorarios, Some(Money::from_cents(100_000)));
    }

    #[test]
    fn test_following_label_used_when_nothing_precedes() {
        let values = extract_monetary_values("R$ 200,00 a título de honorários");
        assert_eq!(values.honorarios, Some(Money::from_cents(20_000)));
        assert_eq!(values.bruto, None);
        assert!(!values.gross_was_default);
    }

    #[test]
    fn test_uncategorized_first_amount_defaults_to_gross_with_marker() {
        let values = extract_monetary_values("condenada ao pagamento de R$ 1.234,56 nos autos");
        assert_eq!(values.bruto, Some(Money::from_cents(123_456)));
        assert!(values.gross_was_default);
    }

    #[test]
    fn test_first_match_per_category_wins() {
        let text = "juros de mora: R$ 100,00 e ainda juros remanescentes de R$ 999,99";
        let values = extract_monetary_values(text);
        assert_eq!(values.juros, Some(Money::from_cents(10_000)));
    }

    #[test]
    fn test_counsel_without_name_gets_anonymous_label() {
        let counsel = extract_counsel("intimado o patrono inscrito na OAB: 98765/RJ");
        assert_eq!(counsel, "Advogado (OAB: 98765/RJ)");
    }

    #[test]
    fn test_multiple_counsel_newline_joined() {
        let text = "Ana Costa OAB: 11111/SP e Bruno Dias OAB: 22222/SP";
        let counsel = extract_counsel(text);
        assert_eq!(
            counsel,
            "Ana Costa (OAB: 11111/SP)\nBruno Dias (OAB: 22222/SP)"
        );
    }

    #[test]
    fn test_no_registration_yields_not_identified() {
        assert_eq!(extract_counsel("sem patrono nos autos"), "Advogado não identificado");
    }

    #[test]
    fn test_plaintiff_before_separator_variants() {
        assert_eq!(extract_plaintiff("Maria Silva x INSS segue"), "Maria Silva");
        assert_eq!(extract_plaintiff("João Souza vs INSS segue"), "João Souza");
        assert_eq!(extract_plaintiff("Ana Lima contra o instituto"), "Ana Lima");
        assert_eq!(extract_plaintiff("texto sem separador algum"), "Não identificado");
    }

    #[test]
    fn test_batch_extraction_preserves_fragment_order() {
        let fragments = vec![
            QUALIFYING.to_string(),
            "irrelevante demais para aproveitar".to_string(),
            QUALIFYING.replace("0001234-56", "0009999-99"),
        ];
        let records = extract_batch(&fragments, date(), &matcher());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].numero_processo, "0001234-56.2025.8.26.0100");
        assert_eq!(records[1].numero_processo, "0009999-99.2025.8.26.0100");
    }
}
