use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Largest magnitude accepted for a transaction amount.
pub const MAX_ABS_AMOUNT: i64 = 1_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("Empty amount")]
    Empty,
    #[error("Unparsable amount: '{0}'")]
    Unparsable(String),
    #[error("Amount out of range: {0}")]
    OutOfRange(Decimal),
}

/// A signed transaction amount. Negative values are outflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Amount(Decimal);

impl Amount {
    pub fn from_decimal(value: Decimal) -> Result<Self, AmountError> {
        if value.abs() > Decimal::from(MAX_ABS_AMOUNT) {
            return Err(AmountError::OutOfRange(value));
        }
        Ok(Amount(value))
    }

    pub fn from_f64(value: f64) -> Result<Self, AmountError> {
        if !value.is_finite() {
            return Err(AmountError::Unparsable(value.to_string()));
        }
        let decimal =
            Decimal::from_f64(value).ok_or_else(|| AmountError::Unparsable(value.to_string()))?;
        Self::from_decimal(decimal)
    }

    /// Lenient parse of user or bank supplied text: currency symbols, thousands
    /// separators and scientific notation are accepted.
    pub fn parse(text: &str) -> Result<Self, AmountError> {
        let cleaned: String = text
            .trim()
            .chars()
            .filter(|c| !matches!(c, '$' | ',' | ' '))
            .collect();
        if cleaned.is_empty() {
            return Err(AmountError::Empty);
        }
        let value = Decimal::from_str(&cleaned)
            .or_else(|_| Decimal::from_scientific(&cleaned))
            .map_err(|_| AmountError::Unparsable(text.trim().to_string()))?;
        Self::from_decimal(value)
    }

    pub fn zero() -> Self {
        Amount(Decimal::ZERO)
    }

    pub fn value(self) -> Decimal {
        self.0
    }

    pub fn abs(self) -> Self {
        Amount(self.0.abs())
    }

    pub fn is_negative(self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    pub fn is_positive(self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    pub fn to_f64(self) -> f64 {
        self.0.to_f64().unwrap_or(0.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Amount::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_currency_text() {
        assert_eq!(Amount::parse("$1,234.50").unwrap().value(), Decimal::new(123450, 2));
        assert_eq!(Amount::parse(" -4.50 ").unwrap().value(), Decimal::new(-450, 2));
    }

    #[test]
    fn parses_scientific_notation() {
        assert_eq!(Amount::parse("1e3").unwrap().value(), Decimal::from(1000));
    }

    #[test]
    fn rejects_garbage_and_empty() {
        assert_eq!(Amount::parse(""), Err(AmountError::Empty));
        assert!(matches!(Amount::parse("abc"), Err(AmountError::Unparsable(_))));
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(matches!(Amount::parse("2e9"), Err(AmountError::OutOfRange(_))));
        assert!(Amount::parse("1000000000").is_ok());
        assert!(Amount::from_f64(f64::NAN).is_err());
        assert!(Amount::from_f64(f64::INFINITY).is_err());
    }

    #[test]
    fn sign_helpers() {
        let a = Amount::from_f64(-4.5).unwrap();
        assert!(a.is_negative());
        assert!(!a.is_positive());
        assert!(a.abs().is_positive());
        assert!(!Amount::zero().is_negative());
        assert!(!Amount::zero().is_positive());
    }

    #[test]
    fn display_two_places() {
        assert_eq!(Amount::parse("75.5").unwrap().to_string(), "75.50");
    }
}
