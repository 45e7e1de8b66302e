use crate::error::SimulationError;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// An ISO-4217 style currency code (3 to 5 uppercase alphanumerics, so stablecoin
/// tickers such as `USDC` fit as well).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    pub fn new(code: impl Into<String>) -> Result<Self, SimulationError> {
        let code = code.into();
        let valid = (3..=5).contains(&code.len())
            && code
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
        if valid {
            Ok(Self(code))
        } else {
            Err(SimulationError::validation(
                "currency",
                format!("'{code}' is not a currency code"),
            ))
        }
    }

    pub fn code(&self) -> &str {
        &self.0
    }

    pub fn is_valid(&self) -> bool {
        Self::new(self.0.clone()).is_ok()
    }

    /// Display precision of the currency's minor unit.
    pub fn minor_units(&self) -> u32 {
        match self.0.as_str() {
            "JPY" | "KRW" | "CLP" | "VND" | "ISK" | "UGX" => 0,
            "BHD" | "KWD" | "OMR" | "JOD" | "TND" | "LYD" | "IQD" => 3,
            "USDC" | "USDT" => 6,
            _ => 2,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Largest amount or per-second rate a request may carry.
pub const MAX_AMOUNT: Decimal = dec!(1000000000000000);

/// Rounds `value` to `dp` fractional digits, ties to even.
pub fn round_half_even(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::MidpointNearestEven)
}

/// `a * b`, reporting overflow against `field`.
pub fn checked_product(field: &str, a: Decimal, b: Decimal) -> Result<Decimal, SimulationError> {
    a.checked_mul(b).ok_or_else(|| out_of_range(field))
}

/// `a / b`, reporting overflow or a zero divisor against `field`.
pub fn checked_quotient(field: &str, a: Decimal, b: Decimal) -> Result<Decimal, SimulationError> {
    a.checked_div(b).ok_or_else(|| out_of_range(field))
}

fn out_of_range(field: &str) -> SimulationError {
    SimulationError::validation(field, "value is out of range for decimal arithmetic")
}

/// A signed monetary value. Projected balances may go negative.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Balance(pub Decimal);

impl Balance {
    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn covers(&self, amount: Decimal) -> bool {
        self.0 >= amount
    }
}

impl Add for Balance {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Balance {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for Balance {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Balance {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

/// A strictly positive monetary amount.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, SimulationError> {
        if value <= Decimal::ZERO {
            Err(SimulationError::validation(
                "amount",
                "amount must be positive",
            ))
        } else if value > MAX_AMOUNT {
            Err(SimulationError::validation(
                "amount",
                format!("amount must not exceed {MAX_AMOUNT}"),
            ))
        } else {
            Ok(Self(value))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = SimulationError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_balance_arithmetic() {
        let b1 = Balance::new(dec!(10.0));
        let b2 = Balance::new(dec!(15.0));
        assert_eq!(b1 + b2, Balance::new(dec!(25.0)));
        assert_eq!(b1 - b2, Balance::new(dec!(-5.0)));
        assert!(b2.covers(dec!(15.0)));
        assert!(!b1.covers(dec!(10.01)));
    }

    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(dec!(0.00000001)).is_ok());
        assert!(matches!(
            Amount::new(dec!(0)),
            Err(SimulationError::Validation(_))
        ));
        assert!(matches!(
            Amount::new(dec!(-3)),
            Err(SimulationError::Validation(_))
        ));
        assert!(Amount::new(MAX_AMOUNT).is_ok());
        assert!(Amount::new(MAX_AMOUNT + dec!(0.01)).is_err());
    }

    #[test]
    fn test_checked_arithmetic_reports_overflow() {
        assert_eq!(checked_product("rate", dec!(1.5), dec!(2)).unwrap(), dec!(3.0));
        let err = checked_product("rate", Decimal::MAX, dec!(2)).unwrap_err();
        assert!(matches!(err, SimulationError::Validation(ref f) if f[0].field == "rate"));
        assert!(checked_quotient("rate", dec!(5000), dec!(0.0000000000000000000000000001)).is_err());
        assert!(checked_quotient("rate", dec!(1), dec!(0)).is_err());
    }

    #[test]
    fn test_round_half_even_ties() {
        assert_eq!(round_half_even(dec!(2.345), 2), dec!(2.34));
        assert_eq!(round_half_even(dec!(2.355), 2), dec!(2.36));
        assert_eq!(round_half_even(dec!(24502.5), 0), dec!(24502));
        assert_eq!(round_half_even(dec!(1.00000001), 8), dec!(1.00000001));
    }

    #[test]
    fn test_currency_codes() {
        assert!(Currency::new("USD").is_ok());
        assert!(Currency::new("USDC").is_ok());
        assert!(Currency::new("usd").is_err());
        assert!(Currency::new("US").is_err());
        assert_eq!(Currency::new("JPY").unwrap().minor_units(), 0);
        assert_eq!(Currency::new("BRL").unwrap().minor_units(), 2);
        assert_eq!(Currency::new("KWD").unwrap().minor_units(), 3);
    }
}
