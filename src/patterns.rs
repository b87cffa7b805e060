// =============================================================================
// patterns.rs — THE COMPILED PATTERN ARSENAL
// =============================================================================
//
// This module is where we keep every text pattern the extractor needs,
// compiled exactly once and shared forever. We use:
//
// 1. regex — for the structured tokens: CNJ case numbers (25 digits with
//    separators, a format so rigid it has its own resolution from the
//    national justice council), currency amounts in Brazilian locale,
//    OAB bar registrations, and capitalized-name runs.
//
// 2. Aho-Corasick — multi-term matching that scans a notice for ALL
//    mandatory search terms simultaneously in a single pass. Built on a
//    finite automaton. This is how antivirus scanners work. We're using
//    antivirus-grade technology to find pension requisitions. Let that
//    sink in.
//
// 3. memchr — SIMD-accelerated substring search for the "does this text
//    even contain an R$?" preliminary check, so we don't run four regexes
//    over ten kilobytes of case-schedule boilerplate for nothing.
//
// Every matcher here is total: no match means an empty result, never a
// panic. Gazette text is adversarially weird and we treat it accordingly.
// =============================================================================

use aho_corasick::AhoCorasick;
use regex::Regex;
use std::sync::LazyLock;

/// Canonical CNJ case number: NNNNNNN-DD.AAAA.J.TR.OOOO.
/// Seven-digit sequential, two-digit check, four-digit year, one-digit
/// judiciary segment, two-digit tribunal, four-digit origin unit.
pub static PROCESS_CANONICAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{7}-\d{2}\.\d{4}\.\d\.\d{2}\.\d{4}").expect("canonical process regex")
});

/// Looser fallback for older or mangled numbering: a 4-7 digit run,
/// a separator, a 2-4 digit run. Catches pre-CNJ numbers the gazette
/// still prints and whatever OCR did to the real ones.
pub static PROCESS_LOOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4,7}[-/]\d{2,4}").expect("loose process regex"));

/// Currency amount with the R$ marker, Brazilian grouping: period as
/// thousands separator, comma before the centavos. The capture group is
/// the bare number, ready for `Money::parse_brl`.
pub static MONEY_AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)R\$\s*(\d{1,3}(?:\.\d{3})*(?:,\d{2})?)").expect("money regex")
});

/// OAB bar registration: number + two-letter state, optionally prefixed
/// by a label separator. Captures "12345/SP" from "OAB: 12345/SP".
pub static OAB_REGISTRATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)OAB[:/]?\s*(\d+/[A-Z]{2})").expect("oab regex"));

/// A run of capitalized words ending at the probe position. Used as a
/// name guess for the text immediately before a bar registration.
/// "Dr. Roberto Silva OAB/SP..." → "Roberto Silva".
pub static TRAILING_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-ZÀ-Ü][a-zà-ü]+(?: [A-ZÀ-Ü][a-zà-ü]+)*)\s*$").expect("name regex")
});

/// Party separator: the gazette writes "AUTORA x RÉU", "Fulano vs INSS",
/// or "Beltrano contra INSS". Everything before the separator is the
/// plaintiff description.
pub static PARTY_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(.*?)(?:\s+x\s+|\s+vs?\.?\s+|\s+contra\s+)").expect("party regex")
});

/// Find the first process number in the text: canonical format first,
/// loose fallback second, `None` when the text has neither — in which
/// case the notice is not extractable at all.
pub fn find_process_number(text: &str) -> Option<&str> {
    PROCESS_CANONICAL
        .find(text)
        .or_else(|| PROCESS_LOOSE.find(text))
        .map(|m| m.as_str())
}

/// SIMD prescan: is there even a currency marker in here?
/// If not, the monetary categorization pass can be skipped entirely.
pub fn quick_currency_check(text: &str) -> bool {
    memchr::memmem::find(text.as_bytes(), b"R$").is_some()
}

/// The multi-term automaton for one run's mandatory search terms.
///
/// Built once per run from the configured term list (the defaults or a
/// caller-supplied override), then run over every candidate notice.
/// Matching is case-insensitive containment; the automaton finds every
/// term in a single pass regardless of how many there are.
pub struct TermMatcher {
    terms: Vec<String>,
    automaton: AhoCorasick,
}

impl TermMatcher {
    /// Build the automaton. Empty terms are dropped; an entirely empty
    /// list still builds (and then matches nothing, disqualifying every
    /// notice, which is the correct degenerate behavior).
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let terms: Vec<String> = terms
            .into_iter()
            .map(Into::into)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        let automaton = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(&terms)
            .expect("term automaton — the configured terms are invalid somehow");
        Self { terms, automaton }
    }

    /// Parse a comma-separated override list, falling back to the given
    /// defaults when the override is empty or all-whitespace.
    pub fn from_csv_or_default(csv: &str, defaults: &[String]) -> Self {
        let custom: Vec<String> = csv
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();
        if custom.is_empty() {
            Self::new(defaults.iter().cloned())
        } else {
            Self::new(custom)
        }
    }

    /// The distinct configured terms found in `text`, in configuration
    /// order. ASCII case-insensitive; accented terms match exactly, which
    /// is how the gazette prints them anyway.
    pub fn matched_terms(&self, text: &str) -> Vec<&str> {
        let mut seen = vec![false; self.terms.len()];
        for m in self.automaton.find_overlapping_iter(text) {
            seen[m.pattern().as_usize()] = true;
        }
        self.terms
            .iter()
            .zip(&seen)
            .filter(|(_, &hit)| hit)
            .map(|(t, _)| t.as_str())
            .collect()
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }
}

// How much surrounding text belongs to one notice fragment. The process
// number usually opens the notice; the payable amounts, parties, and
// counsel trail it. Values tuned against real gazette pages.
const FRAGMENT_BEFORE: usize = 200;
const FRAGMENT_AFTER: usize = 1300;

/// Split a full gazette page into candidate notice fragments: one window
/// of text around each process number, canonical or loose. Duplicate
/// process numbers on the same page collapse to their first occurrence.
///
/// This is deliberately tolerant — the page markup shifts, but a case
/// number is a case number, so we anchor on those and take the text
/// around them rather than trusting any particular HTML structure.
/// Loose matches that sit inside a canonical number (the loose pattern
/// matches every canonical prefix) are not separate anchors.
pub fn split_into_fragments(page_text: &str) -> Vec<String> {
    let mut fragments = Vec::new();
    let mut seen_numbers: Vec<&str> = Vec::new();

    let canonical: Vec<regex::Match> = PROCESS_CANONICAL.find_iter(page_text).collect();
    let mut anchors = canonical.clone();
    for m in PROCESS_LOOSE.find_iter(page_text) {
        if canonical
            .iter()
            .any(|c| m.start() < c.end() && c.start() < m.end())
        {
            continue;
        }
        anchors.push(m);
    }
    anchors.sort_by_key(|m| m.start());

    for m in anchors {
        let number = m.as_str();
        if seen_numbers.contains(&number) {
            continue;
        }
        seen_numbers.push(number);

        let mut start = m.start().saturating_sub(FRAGMENT_BEFORE);
        let mut end = (m.end() + FRAGMENT_AFTER).min(page_text.len());
        while !page_text.is_char_boundary(start) {
            start -= 1;
        }
        while !page_text.is_char_boundary(end) {
            end += 1;
        }
        fragments.push(page_text[start..end].to_string());
    }

    fragments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_process_number_matches() {
        let text = "PROCESSO Nº 0001234-56.2025.8.26.0100 em curso";
        assert_eq!(find_process_number(text), Some("0001234-56.2025.8.26.0100"));
    }

    #[test]
    fn test_loose_process_number_fallback() {
        let text = "autos nº 12345/2024 da 3ª vara";
        assert_eq!(find_process_number(text), Some("12345/2024"));
    }

    #[test]
    fn test_no_process_number_is_none_not_panic() {
        assert_eq!(find_process_number(""), None);
        assert_eq!(find_process_number("nenhum número aqui"), None);
    }

    #[test]
    fn test_money_pattern_captures_bare_number() {
        let caps = MONEY_AMOUNT.captures("Valor: R$ 1.234,56 conforme").unwrap();
        assert_eq!(&caps[1], "1.234,56");
    }

    #[test]
    fn test_oab_pattern_variants() {
        for text in ["OAB 12345/SP", "OAB: 12345/SP", "OAB/12345/SP"] {
            let caps = OAB_REGISTRATION.captures(text).unwrap_or_else(|| {
                panic!("no OAB match in {text:?}");
            });
            assert_eq!(&caps[1], "12345/SP");
        }
    }

    #[test]
    fn test_trailing_name_before_probe() {
        let before = "Advogado: Roberto Silva ";
        let caps = TRAILING_NAME.captures(before).unwrap();
        assert_eq!(&caps[1], "Roberto Silva");
    }

    #[test]
    fn test_quick_currency_check() {
        assert!(quick_currency_check("devido o valor de R$ 500,00"));
        assert!(!quick_currency_check("nenhum valor mencionado"));
    }

    #[test]
    fn test_term_matcher_distinct_case_insensitive() {
        let matcher = TermMatcher::new(["RPV", "INSS", "pagamento pelo INSS"]);
        let found = matcher.matched_terms("deferida a rpv para pagamento pelo inss");
        assert_eq!(found, vec!["RPV", "INSS", "pagamento pelo INSS"]);
    }

    #[test]
    fn test_term_matcher_csv_override_and_default() {
        let defaults = vec!["RPV".to_string(), "INSS".to_string()];
        let custom = TermMatcher::from_csv_or_default("alvará, precatório", &defaults);
        assert_eq!(custom.terms(), ["alvará", "precatório"]);
        let fallback = TermMatcher::from_csv_or_default("  , ", &defaults);
        assert_eq!(fallback.terms(), ["RPV", "INSS"]);
    }

    #[test]
    fn test_fragment_split_anchors_on_loose_numbers_too() {
        // Older gazette sections still print pre-CNJ numbering; a page
        // whose only case number is the loose form must still yield a
        // fragment for the extractor.
        let page = "autos nº 12345/2024 da 3ª vara, despacho deferindo a expedição";
        let fragments = split_into_fragments(page);
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].contains("12345/2024"));
        assert_eq!(find_process_number(&fragments[0]), Some("12345/2024"));
    }

    #[test]
    fn test_loose_prefix_of_canonical_is_not_a_second_anchor() {
        // The loose pattern matches "0001234-56" inside every canonical
        // number; that must not double the fragment count.
        let page = "PROCESSO Nº 0001234-56.2025.8.26.0100 em curso na vara";
        assert_eq!(split_into_fragments(page).len(), 1);
    }

    #[test]
    fn test_fragment_split_mixes_canonical_and_loose_anchors() {
        let page = "0001234-56.2025.8.26.0100 despacho ... autos nº 98765/2023 sentença";
        let fragments = split_into_fragments(page);
        assert_eq!(fragments.len(), 2);
    }

    #[test]
    fn test_fragment_split_dedups_repeated_numbers() {
        let page = format!(
            "{} despacho inicial ... {} republicação do mesmo ... {}",
            "0001234-56.2025.8.26.0100",
            "0001234-56.2025.8.26.0100",
            "0009999-99.2025.8.26.0100",
        );
        let fragments = split_into_fragments(&page);
        assert_eq!(fragments.len(), 2);
        assert!(fragments[0].contains("0001234-56.2025.8.26.0100"));
        assert!(fragments[1].contains("0009999-99.2025.8.26.0100"));
    }
}
