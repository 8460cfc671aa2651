use bigdecimal::{BigDecimal, RoundingMode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// Monetary amounts are carried with two fractional digits after conversion.
pub const AMOUNT_SCALE: i64 = 2;

/// Errors produced by currency conversion.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The rate table has no entry for this currency.
    #[error("unsupported currency: {currency}")]
    UnsupportedCurrency { currency: Currency },

    /// A currency code outside the fixed enumeration.
    #[error("unknown currency code: {code}")]
    UnknownCode { code: String },

    /// A rate table was built with an invalid rate.
    #[error("invalid rate for {currency}: {rate}")]
    InvalidRate { currency: Currency, rate: String },
}

// ============================================================================
// Currency
// ============================================================================

/// The fixed set of currencies wallets and catalog prices are denominated in.
///
/// Unknown currency codes are rejected at parse time; nothing downstream
/// branches on raw strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[serde(alias = "ngn")]
    Ngn,
    #[serde(alias = "usd")]
    Usd,
    #[serde(alias = "cad")]
    Cad,
    #[serde(alias = "eur")]
    Eur,
}

impl Currency {
    /// Declaration order doubles as the bucket drain order for
    /// cross-currency wallet debits.
    pub const ALL: [Currency; 4] = [Currency::Ngn, Currency::Usd, Currency::Cad, Currency::Eur];

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Ngn => "NGN",
            Currency::Usd => "USD",
            Currency::Cad => "CAD",
            Currency::Eur => "EUR",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Currency {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NGN" => Ok(Currency::Ngn),
            "USD" => Ok(Currency::Usd),
            "CAD" => Ok(Currency::Cad),
            "EUR" => Ok(Currency::Eur),
            other => Err(ConversionError::UnknownCode {
                code: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// Rate table
// ============================================================================

/// Validated table of exchange rates, expressed as USD per one unit of each
/// currency. Constructed once at startup; conversions are pure reads.
#[derive(Debug, Clone)]
pub struct RateTable {
    usd_per_unit: HashMap<Currency, BigDecimal>,
}

impl RateTable {
    pub fn empty() -> Self {
        Self {
            usd_per_unit: HashMap::new(),
        }
    }

    /// Adds or replaces a rate. Rejects zero and negative rates.
    pub fn with_rate(mut self, currency: Currency, rate: BigDecimal) -> Result<Self, ConversionError> {
        if rate <= BigDecimal::from(0) {
            return Err(ConversionError::InvalidRate {
                currency,
                rate: rate.to_string(),
            });
        }
        self.usd_per_unit.insert(currency, rate);
        Ok(self)
    }

    pub fn rate(&self, currency: Currency) -> Option<&BigDecimal> {
        self.usd_per_unit.get(&currency)
    }

    pub fn supported(&self) -> Vec<Currency> {
        Currency::ALL
            .into_iter()
            .filter(|c| self.usd_per_unit.contains_key(c))
            .collect()
    }

    /// Built-in rates, overridable per currency via `RATE_<CODE>_USD`
    /// environment variables (USD per one unit, e.g. `RATE_NGN_USD=0.00065`).
    pub fn from_env() -> Self {
        let defaults = [
            (Currency::Ngn, "0.00065"),
            (Currency::Usd, "1"),
            (Currency::Cad, "0.73"),
            (Currency::Eur, "1.08"),
        ];

        let mut table = Self::empty();
        for (currency, default_rate) in defaults {
            let var = format!("RATE_{}_USD", currency.as_str());
            let raw = std::env::var(&var).unwrap_or_else(|_| default_rate.to_string());
            let rate = match BigDecimal::from_str(raw.trim()) {
                Ok(r) => r,
                Err(_) => {
                    warn!(var = %var, value = %raw, "Ignoring unparseable exchange rate override");
                    BigDecimal::from_str(default_rate).unwrap_or_else(|_| BigDecimal::from(1))
                }
            };
            table = match table.with_rate(currency, rate) {
                Ok(t) => t,
                Err(e) => {
                    warn!(var = %var, error = %e, "Ignoring invalid exchange rate override");
                    return Self::from_defaults();
                }
            };
        }
        table
    }

    fn from_defaults() -> Self {
        let mut table = Self::empty();
        for (currency, rate) in [
            (Currency::Ngn, "0.00065"),
            (Currency::Usd, "1"),
            (Currency::Cad, "0.73"),
            (Currency::Eur, "1.08"),
        ] {
            if let Ok(r) = BigDecimal::from_str(rate) {
                if let Ok(t) = table.clone().with_rate(currency, r) {
                    table = t;
                }
            }
        }
        table
    }
}

// ============================================================================
// Converter
// ============================================================================

/// Pure currency conversion over a [`RateTable`].
///
/// No I/O, no interior state; the same inputs always produce the same output.
/// Rounding to [`AMOUNT_SCALE`] happens once, after the cross-rate multiply,
/// so repeated conversions cannot drift a debit by fractional units.
#[derive(Debug, Clone)]
pub struct CurrencyConverter {
    table: RateTable,
}

impl CurrencyConverter {
    pub fn new(table: RateTable) -> Self {
        Self { table }
    }

    /// Converter over the built-in rates, ignoring environment overrides.
    pub fn from_defaults() -> Self {
        Self::new(RateTable::from_defaults())
    }

    pub fn table(&self) -> &RateTable {
        &self.table
    }

    /// Converts `amount` denominated in `from` into `to`.
    pub fn convert(
        &self,
        amount: &BigDecimal,
        from: Currency,
        to: Currency,
    ) -> Result<BigDecimal, ConversionError> {
        if from == to {
            return Ok(amount.with_scale_round(AMOUNT_SCALE, RoundingMode::HalfUp));
        }
        let from_rate = self
            .table
            .rate(from)
            .ok_or(ConversionError::UnsupportedCurrency { currency: from })?;
        let to_rate = self
            .table
            .rate(to)
            .ok_or(ConversionError::UnsupportedCurrency { currency: to })?;

        let in_usd = amount * from_rate;
        let converted = in_usd / to_rate;
        Ok(converted.with_scale_round(AMOUNT_SCALE, RoundingMode::HalfUp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converter() -> CurrencyConverter {
        let table = RateTable::empty()
            .with_rate(Currency::Ngn, BigDecimal::from_str("0.00065").unwrap())
            .unwrap()
            .with_rate(Currency::Usd, BigDecimal::from(1))
            .unwrap()
            .with_rate(Currency::Eur, BigDecimal::from_str("1.08").unwrap())
            .unwrap();
        CurrencyConverter::new(table)
    }

    #[test]
    fn identity_conversion_keeps_amount() {
        let c = converter();
        let amount = BigDecimal::from_str("1500.50").unwrap();
        let out = c.convert(&amount, Currency::Usd, Currency::Usd).unwrap();
        assert_eq!(out, amount);
    }

    #[test]
    fn converts_through_usd_cross_rate() {
        let c = converter();
        let amount = BigDecimal::from(100_000);
        let out = c.convert(&amount, Currency::Ngn, Currency::Usd).unwrap();
        assert_eq!(out, BigDecimal::from_str("65.00").unwrap());
    }

    #[test]
    fn rounds_half_up_to_two_places() {
        let c = converter();
        let amount = BigDecimal::from(1);
        let out = c.convert(&amount, Currency::Usd, Currency::Eur).unwrap();
        // 1 / 1.08 = 0.9259...
        assert_eq!(out, BigDecimal::from_str("0.93").unwrap());
    }

    #[test]
    fn unsupported_currency_is_rejected() {
        let c = converter();
        let amount = BigDecimal::from(10);
        let err = c.convert(&amount, Currency::Cad, Currency::Usd).unwrap_err();
        assert!(matches!(
            err,
            ConversionError::UnsupportedCurrency {
                currency: Currency::Cad
            }
        ));
    }

    #[test]
    fn deterministic_for_equal_inputs() {
        let c = converter();
        let amount = BigDecimal::from_str("123.45").unwrap();
        let a = c.convert(&amount, Currency::Eur, Currency::Ngn).unwrap();
        let b = c.convert(&amount, Currency::Eur, Currency::Ngn).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn currency_parses_case_insensitively() {
        assert_eq!("ngn".parse::<Currency>().unwrap(), Currency::Ngn);
        assert_eq!("USD".parse::<Currency>().unwrap(), Currency::Usd);
        assert!("xyz".parse::<Currency>().is_err());
    }

    #[test]
    fn rate_table_rejects_non_positive_rates() {
        let err = RateTable::empty().with_rate(Currency::Usd, BigDecimal::from(0));
        assert!(err.is_err());
    }
}
