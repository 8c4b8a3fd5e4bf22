use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};
use std::str::FromStr;

/// currency metadata carried by every accrual row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrencyData {
    pub code: String,
    pub decimal_places: u32,
}

impl CurrencyData {
    pub fn new(code: impl Into<String>, decimal_places: u32) -> Self {
        Self {
            code: code.into(),
            decimal_places,
        }
    }
}

/// rounding applied when an amount is finalized for persistence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MoneyRounding {
    /// banker's rounding
    #[default]
    HalfEven,
    HalfUp,
    HalfDown,
    Down,
    Up,
}

impl MoneyRounding {
    fn strategy(self) -> RoundingStrategy {
        match self {
            MoneyRounding::HalfEven => RoundingStrategy::MidpointNearestEven,
            MoneyRounding::HalfUp => RoundingStrategy::MidpointAwayFromZero,
            MoneyRounding::HalfDown => RoundingStrategy::MidpointTowardZero,
            MoneyRounding::Down => RoundingStrategy::ToZero,
            MoneyRounding::Up => RoundingStrategy::AwayFromZero,
        }
    }
}

/// Monetary amount with full decimal precision.
///
/// Arithmetic never rounds. Scale is applied once, through [`Money::round`],
/// when an amount is finalized for a ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// create from decimal
    pub fn from_decimal(d: Decimal) -> Self {
        Money(d)
    }

    /// create from string with exact parsing
    pub fn from_str_exact(s: &str) -> Result<Self, rust_decimal::Error> {
        Ok(Money(Decimal::from_str(s)?))
    }

    /// create from integer amount (dollars, euros, etc)
    pub fn from_major(amount: i64) -> Self {
        Money(Decimal::from(amount))
    }

    /// create from minor amount (cents etc)
    pub fn from_minor(amount: i64, scale: u32) -> Self {
        Money(Decimal::new(amount, scale))
    }

    /// get underlying decimal
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// round to the currency's decimal places
    pub fn round(&self, currency: &CurrencyData, rounding: MoneyRounding) -> Self {
        Money(self.0.round_dp_with_strategy(currency.decimal_places, rounding.strategy()))
    }

    /// check if zero
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// strictly greater than zero
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// strictly less than zero
    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn is_less_than_or_equal_zero(&self) -> bool {
        self.0 <= Decimal::ZERO
    }

    /// minimum of two values
    pub fn min(self, other: Self) -> Self {
        Money(self.0.min(other.0))
    }

    /// maximum of two values
    pub fn max(self, other: Self) -> Self {
        Money(self.0.max(other.0))
    }

    /// subtraction clamped at zero
    pub fn saturating_sub(self, other: Self) -> Self {
        Money((self.0 - other.0).max(Decimal::ZERO))
    }

    /// negative values become zero
    pub fn clamp_non_negative(self) -> Self {
        Money(self.0.max(Decimal::ZERO))
    }

    /// `None` when the amount is exactly zero
    pub fn non_zero(self) -> Option<Self> {
        if self.is_zero() {
            None
        } else {
            Some(self)
        }
    }

    /// `self * numerator / denominator` without intermediate rounding.
    /// A zero denominator yields the full amount.
    pub fn prorate(self, numerator: i64, denominator: i64) -> Self {
        if denominator <= 0 || numerator >= denominator {
            return self;
        }
        if numerator <= 0 {
            return Money::ZERO;
        }
        let per_unit = self.0 / Decimal::from(denominator);
        Money(per_unit * Decimal::from(numerator))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Money {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Money::from_str_exact(s)
    }
}

impl From<Decimal> for Money {
    fn from(d: Decimal) -> Self {
        Money::from_decimal(d)
    }
}

impl From<i32> for Money {
    fn from(i: i32) -> Self {
        Money::from_major(i as i64)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, other: Money) -> Money {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, other: Money) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, other: Money) -> Money {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, other: Money) {
        self.0 -= other.0;
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl Mul<Decimal> for Money {
    type Output = Money;

    fn mul(self, other: Decimal) -> Money {
        Money(self.0 * other)
    }
}

impl Div<Decimal> for Money {
    type Output = Money;

    fn div(self, other: Decimal) -> Money {
        Money(self.0 / other)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, x| acc + x)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, x| acc + *x)
    }
}
