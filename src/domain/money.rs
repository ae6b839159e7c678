use rust_decimal::{Decimal, RoundingStrategy};
use std::fmt;
use std::str::FromStr;

/// All monetary amounts are fixed-precision decimals, never floats.
/// Amounts are rounded to 2 decimal places at every calculation step
/// (half away from zero) so totals stay reproducible.
pub fn round2(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Format an amount with exactly two decimal places.
/// Example: 5650 -> "5650.00", 12.5 -> "12.50"
pub fn format_amount(amount: Decimal) -> String {
    format!("{:.2}", amount)
}

/// Parse a decimal string into an amount.
/// Example: "56.50" -> 56.50, "100" -> 100
pub fn parse_amount(input: &str) -> Result<Decimal, ParseAmountError> {
    Decimal::from_str(input.trim()).map_err(|_| ParseAmountError::InvalidFormat)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseAmountError {
    InvalidFormat,
}

impl fmt::Display for ParseAmountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseAmountError::InvalidFormat => write!(f, "invalid money format"),
        }
    }
}

impl std::error::Error for ParseAmountError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round2_half_away_from_zero() {
        assert_eq!(round2(Decimal::new(125, 3)), Decimal::new(13, 2)); // 0.125 -> 0.13
        assert_eq!(round2(Decimal::new(-125, 3)), Decimal::new(-13, 2)); // -0.125 -> -0.13
        assert_eq!(round2(Decimal::new(1234, 3)), Decimal::new(123, 2)); // 1.234 -> 1.23
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(Decimal::new(5650, 0)), "5650.00");
        assert_eq!(format_amount(Decimal::new(125, 1)), "12.50");
        assert_eq!(format_amount(Decimal::ZERO), "0.00");
        assert_eq!(format_amount(Decimal::new(-1, 2)), "-0.01");
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("56.50"), Ok(Decimal::new(5650, 2)));
        assert_eq!(parse_amount("100"), Ok(Decimal::new(100, 0)));
        assert_eq!(parse_amount(" 12.345 "), Ok(Decimal::new(12345, 3)));
        assert!(parse_amount("abc").is_err());
    }
}
