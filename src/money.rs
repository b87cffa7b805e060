// =============================================================================
// money.rs — THE FIXED-POINT TREASURY
// =============================================================================
//
// Every amount in a judicial publication is money somebody is owed, and
// courts are not known for their sense of humor about rounding errors.
// So: no f64. Ever. An f64 will happily tell you that R$ 0,10 + R$ 0,20
// is R$ 0,30000000000000004, and then a clerk in São Paulo will reject
// your requisition.
//
// We store exact cents in an i64 and only ever render decimal strings.
// The gazette writes amounts the Brazilian way — period as thousands
// separator, comma as decimal separator ("R$ 1.234,56") — so parsing
// inverts the separators before touching any digits.
// =============================================================================

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// An exact monetary amount, stored as integer cents.
///
/// i64 cents tops out around 92 quadrillion reais, which comfortably
/// exceeds the GDP of every country that has ever existed. We're covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(i64);

impl Money {
    /// Construct from whole cents.
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Construct from whole reais (no centavos).
    pub const fn from_reais(reais: i64) -> Self {
        Money(reais * 100)
    }

    /// The raw cent count.
    pub const fn cents(self) -> i64 {
        self.0
    }

    /// An exact integer percentage of this amount, truncated toward zero.
    /// Used by the synthetic generator for its 85/15/10 splits.
    pub const fn percent(self, pct: i64) -> Self {
        Money(self.0 * pct / 100)
    }

    /// Parse a Brazilian-locale amount string: optional thousands periods,
    /// comma before the centavos. Accepts "1.234,56", "1234,56", "15000"
    /// (whole reais), but rejects anything with stray characters.
    ///
    /// The inversion dance: strip the periods, swap the comma for a point,
    /// then split on the point. Exactly what the gazette format demands.
    pub fn parse_brl(raw: &str) -> Option<Money> {
        let cleaned = raw.trim().replace('.', "").replace(',', ".");
        if cleaned.is_empty() {
            return None;
        }
        let mut parts = cleaned.splitn(2, '.');
        let whole = parts.next()?;
        let frac = parts.next().unwrap_or("");
        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        // Centavos are always two digits in the gazette; a single digit
        // means tenths ("R$ 1,5" is one real fifty), more than two is noise.
        let frac_cents = match frac.len() {
            0 => 0,
            1 if frac.bytes().all(|b| b.is_ascii_digit()) => {
                frac.parse::<i64>().ok()? * 10
            }
            2 if frac.bytes().all(|b| b.is_ascii_digit()) => frac.parse::<i64>().ok()?,
            _ => return None,
        };
        let whole: i64 = whole.parse().ok()?;
        whole
            .checked_mul(100)
            .and_then(|c| c.checked_add(frac_cents))
            .map(Money)
    }
}

/// Renders as a plain decimal string with exactly two fractional digits:
/// "1234.56". This is the wire format — see the serde impls below.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl FromStr for Money {
    type Err = ();

    /// Parses the wire format ("1234.56"), not the BRL display format.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().splitn(2, '.');
        let whole = parts.next().ok_or(())?;
        let frac = parts.next().unwrap_or("00");
        if frac.len() > 2 || frac.is_empty() {
            return Err(());
        }
        let negative = whole.starts_with('-');
        let whole: i64 = whole.parse().map_err(|_| ())?;
        let mut frac_cents: i64 = frac.parse().map_err(|_| ())?;
        if frac.len() == 1 {
            frac_cents *= 10;
        }
        if negative {
            frac_cents = -frac_cents;
        }
        Ok(Money(whole * 100 + frac_cents))
    }
}

// Amounts cross the wire as decimal strings, never as JSON numbers.
// JSON numbers are f64 in every mainstream parser, and we did not go to
// all this trouble just to lose cents at the serialization boundary.
impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid money literal: {s:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_brl_with_thousands_separator() {
        assert_eq!(Money::parse_brl("1.234,56"), Some(Money::from_cents(123_456)));
        assert_eq!(Money::parse_brl("10.000,00"), Some(Money::from_cents(1_000_000)));
    }

    #[test]
    fn test_parse_brl_plain_forms() {
        assert_eq!(Money::parse_brl("500,00"), Some(Money::from_cents(50_000)));
        assert_eq!(Money::parse_brl("15000"), Some(Money::from_reais(15_000)));
        assert_eq!(Money::parse_brl("1,5"), Some(Money::from_cents(150)));
    }

    #[test]
    fn test_parse_brl_rejects_garbage() {
        assert_eq!(Money::parse_brl(""), None);
        assert_eq!(Money::parse_brl("abc"), None);
        assert_eq!(Money::parse_brl("12,345"), None);
    }

    #[test]
    fn test_display_is_wire_format() {
        assert_eq!(Money::from_cents(123_456).to_string(), "1234.56");
        assert_eq!(Money::from_cents(1_000_000).to_string(), "10000.00");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
    }

    #[test]
    fn test_percent_splits_are_exact() {
        let principal = Money::from_reais(10_000);
        assert_eq!(principal.percent(85), Money::from_reais(8_500));
        assert_eq!(principal.percent(15), Money::from_reais(1_500));
        assert_eq!(principal.percent(10), Money::from_reais(1_000));
    }

    #[test]
    fn test_serde_round_trip_as_string() {
        let m = Money::from_cents(123_456);
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, "\"1234.56\"");
        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }
}
