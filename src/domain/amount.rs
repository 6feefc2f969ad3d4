//! Amount type
//!
//! The value a ledger transaction moves. Zero and negative movements are
//! unrepresentable, so nothing downstream re-checks the sign.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Per-movement ceiling
const MAX_AMOUNT: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

/// Matches the NUMERIC(28, 8) columns
const MAX_SCALE: u32 = 8;

/// Positive amount of one credit or debit, at most 8 decimal places and
/// at most 1 billion.
///
/// Serialized as a string so JSON clients never see a float.
///
/// ```
/// use rust_decimal::Decimal;
/// use ledger_engine::domain::Amount;
///
/// let amount: Amount = "25.50".parse().unwrap();
/// assert_eq!(amount.credit(Decimal::new(100, 0)), Decimal::new(12550, 2));
/// assert_eq!(amount.debit(Decimal::new(10, 0)), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(Decimal);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("Amount must be positive (got {0})")]
    NotPositive(Decimal),

    #[error("Amount has too many decimal places (max {MAX_SCALE}, got {0})")]
    TooManyDecimals(u32),

    #[error("Amount exceeds the per-movement limit of {MAX_AMOUNT}")]
    Overflow,

    #[error("Invalid amount format: {0}")]
    ParseError(String),
}

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        match value {
            v if v <= Decimal::ZERO => Err(AmountError::NotPositive(v)),
            v if v.scale() > MAX_SCALE => Err(AmountError::TooManyDecimals(v.scale())),
            v if v > MAX_AMOUNT => Err(AmountError::Overflow),
            v => Ok(Self(v)),
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Balance after crediting this amount
    pub fn credit(&self, balance: Decimal) -> Decimal {
        balance + self.0
    }

    /// Balance after debiting this amount, `None` if it would go negative
    pub fn debit(&self, balance: Decimal) -> Option<Decimal> {
        (balance >= self.0).then(|| balance - self.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<Decimal>()
            .map_err(|e| AmountError::ParseError(e.to_string()))
            .and_then(Amount::new)
    }
}

impl TryFrom<String> for Amount {
    type Error = AmountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Amount> for String {
    fn from(amount: Amount) -> Self {
        amount.0.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_rejects_non_positive() {
        assert_eq!(Amount::new(Decimal::ZERO), Err(AmountError::NotPositive(Decimal::ZERO)));
        assert!(matches!(Amount::new(dec!(-5)), Err(AmountError::NotPositive(_))));
    }

    #[test]
    fn test_scale_and_ceiling() {
        assert!(matches!(
            Amount::new(Decimal::new(123456789, 9)),
            Err(AmountError::TooManyDecimals(9))
        ));
        assert!(Amount::new(dec!(1000000000)).is_ok());
        assert_eq!(Amount::new(dec!(1000000000.01)), Err(AmountError::Overflow));
    }

    #[test]
    fn test_credit_and_debit() {
        let amount = Amount::new(dec!(30)).unwrap();
        assert_eq!(amount.credit(dec!(100)), dec!(130));
        assert_eq!(amount.debit(dec!(100)), Some(dec!(70)));
        assert_eq!(amount.debit(dec!(30)), Some(dec!(0)));
        assert_eq!(amount.debit(dec!(29.99)), None);
    }

    #[test]
    fn test_parse() {
        let amount: Amount = " 123.456 ".parse().unwrap();
        assert_eq!(amount.value(), dec!(123.456));
        assert!(matches!("abc".parse::<Amount>(), Err(AmountError::ParseError(_))));
    }

    #[test]
    fn test_json_is_a_string() {
        let amount = Amount::new(dec!(42.10)).unwrap();
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"42.10\"");
        assert_eq!(serde_json::from_str::<Amount>(&json).unwrap(), amount);
        assert!(serde_json::from_str::<Amount>("\"-1\"").is_err());
    }
}
