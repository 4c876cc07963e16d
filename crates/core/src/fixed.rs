//! Exact decimal arithmetic for prices, amounts and fees
//!
//! `Fixed` wraps `rust_decimal::Decimal`. Exchange payloads send numbers both
//! as JSON strings and as JSON numbers; `from_json` accepts either without
//! passing through `f64`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use std::str::FromStr;

/// Exact decimal value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fixed {
    value: Decimal,
}

impl Fixed {
    pub const ZERO: Fixed = Fixed { value: Decimal::ZERO };

    pub const ONE: Fixed = Fixed { value: Decimal::ONE };

    fn from_decimal(value: Decimal) -> Self {
        Fixed { value }
    }

    pub fn from_i64(value: i64) -> Self {
        Fixed {
            value: Decimal::from(value),
        }
    }

    /// Parse a decimal string exactly, accepting scientific notation
    pub fn from_str_exact(s: &str) -> Result<Self, FixedError> {
        let trimmed = s.trim();
        Decimal::from_str(trimmed)
            .or_else(|_| Decimal::from_scientific(trimmed))
            .map(Self::from_decimal)
            .map_err(|_| FixedError::InvalidValue(s.to_string()))
    }

    /// Read a JSON string or number
    pub fn from_json(value: &serde_json::Value) -> Result<Self, FixedError> {
        match value {
            serde_json::Value::String(s) => Self::from_str_exact(s),
            serde_json::Value::Number(n) => Self::from_str_exact(&n.to_string()),
            other => Err(FixedError::InvalidValue(other.to_string())),
        }
    }

    /// Render with trailing zeros removed, as exchanges expect in query strings
    pub fn to_plain_string(&self) -> String {
        self.value.normalize().to_string()
    }

    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    /// Strictly greater than zero
    pub fn is_positive(&self) -> bool {
        self.value > Decimal::ZERO
    }

    /// Strictly less than zero
    pub fn is_negative(&self) -> bool {
        self.value < Decimal::ZERO
    }

    pub fn round_dp(&self, dp: u32) -> Self {
        Fixed {
            value: self.value.round_dp(dp),
        }
    }

    pub fn checked_add(self, rhs: Fixed) -> Result<Fixed, FixedError> {
        self.value
            .checked_add(rhs.value)
            .map(Self::from_decimal)
            .ok_or(FixedError::Overflow)
    }

    pub fn checked_sub(self, rhs: Fixed) -> Result<Fixed, FixedError> {
        self.value
            .checked_sub(rhs.value)
            .map(Self::from_decimal)
            .ok_or(FixedError::Overflow)
    }

    pub fn checked_mul(self, rhs: Fixed) -> Result<Fixed, FixedError> {
        self.value
            .checked_mul(rhs.value)
            .map(Self::from_decimal)
            .ok_or(FixedError::Overflow)
    }

    pub fn checked_div(self, rhs: Fixed) -> Result<Fixed, FixedError> {
        if rhs.is_zero() {
            return Err(FixedError::DivisionByZero);
        }
        self.value
            .checked_div(rhs.value)
            .map(Self::from_decimal)
            .ok_or(FixedError::Overflow)
    }
}

/// Decimal arithmetic errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FixedError {
    #[error("Invalid decimal value: {0}")]
    InvalidValue(String),
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Overflow in decimal arithmetic")]
    Overflow,
}

// Infallible operators for values already known to be in range (prices, amounts)
impl Add for Fixed {
    type Output = Fixed;

    fn add(self, rhs: Self) -> Self::Output {
        Fixed {
            value: self.value + rhs.value,
        }
    }
}

impl Sub for Fixed {
    type Output = Fixed;

    fn sub(self, rhs: Self) -> Self::Output {
        Fixed {
            value: self.value - rhs.value,
        }
    }
}

impl Mul for Fixed {
    type Output = Fixed;

    fn mul(self, rhs: Self) -> Self::Output {
        Fixed {
            value: self.value * rhs.value,
        }
    }
}

impl Neg for Fixed {
    type Output = Fixed;

    fn neg(self) -> Self::Output {
        Fixed { value: -self.value }
    }
}

impl AddAssign for Fixed {
    fn add_assign(&mut self, rhs: Self) {
        self.value += rhs.value;
    }
}

impl SubAssign for Fixed {
    fn sub_assign(&mut self, rhs: Self) {
        self.value -= rhs.value;
    }
}

impl std::iter::Sum for Fixed {
    fn sum<I: Iterator<Item = Fixed>>(iter: I) -> Self {
        iter.fold(Fixed::ZERO, |acc, x| acc + x)
    }
}

impl Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl FromStr for Fixed {
    type Err = FixedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_exact(s)
    }
}

impl From<i64> for Fixed {
    fn from(value: i64) -> Self {
        Fixed::from_i64(value)
    }
}

/// Build a Fixed from a literal; panics on malformed input, so literals only
#[macro_export]
macro_rules! fixed {
    ($value:expr) => {
        $crate::fixed::Fixed::from_str_exact(stringify!($value))
            .unwrap_or_else(|e| panic!("bad fixed literal: {e}"))
    };
}
