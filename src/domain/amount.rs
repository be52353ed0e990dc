use crate::error::EngineError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::ops::{Sub, SubAssign};

/// A channel balance or on-chain holding.
///
/// Wraps `rust_decimal::Decimal` so allocations, holdings and guarantees share
/// one arithmetic type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Balance(pub Decimal);

/// A strictly positive amount moved by a deposit, payment or guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, EngineError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(EngineError::Validation("Amount must be positive".to_string()))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = EngineError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<Amount> for Balance {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}

impl Balance {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// `None` when the sum is not representable.
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    /// Adds `rhs`, failing with a validation error on overflow.
    pub fn try_add(self, rhs: Self) -> Result<Self, EngineError> {
        self.checked_add(rhs)
            .ok_or_else(|| EngineError::Validation(format!("balance overflow adding {} to {}", rhs.0, self.0)))
    }

    /// Sums balances, failing with a validation error on overflow.
    pub fn try_sum<I: IntoIterator<Item = Self>>(iter: I) -> Result<Self, EngineError> {
        iter.into_iter().try_fold(Self::ZERO, Self::try_add)
    }

    /// Subtracts `rhs` unless that would go negative.
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        if self.0 >= rhs.0 {
            Some(Self(self.0 - rhs.0))
        } else {
            None
        }
    }

    /// The positive part of `self - rhs`, as an `Amount` if non-zero.
    pub fn shortfall_to(self, target: Self) -> Option<Amount> {
        Amount::new(target.0 - self.0).ok()
    }
}

impl Sub for Balance {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for Balance {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}
