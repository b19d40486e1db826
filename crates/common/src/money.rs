//! Fixed-point monetary arithmetic. No floats anywhere in this crate tree.
//!
//! `Money` wraps `rust_decimal::Decimal`, which carries up to 28-29
//! significant digits of base-10 fixed point — comfortably more than the
//! 18 fractional digits needed for internal precision. Currency
//! rounding (2 decimals, half-even) only happens at explicit boundaries:
//! the 70/30 spend/invest split and balance reporting.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Money(value)
    }

    pub fn from_str_exact(s: &str) -> Result<Self, rust_decimal::Error> {
        Ok(Money(Decimal::from_str(s)?))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn is_zero(&self) -> bool {
        self.0 == Decimal::ZERO
    }

    /// Round to 2 decimal places using banker's rounding (round-half-to-even),
    /// the mode used for currency reporting.
    pub fn round_currency(&self) -> Money {
        Money(
            self.0
                .round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven),
        )
    }

    /// Splits `self` 70/30 with the 70% ("spend") side absorbing the rounding
    /// residue: `spend + invest == self` exactly, and `invest` is within one
    /// rounding ulp of `self * 0.30`.
    pub fn split_70_30(&self) -> (Money, Money) {
        let invest = (self.0 * Decimal::new(30, 2))
            .round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven);
        let total = self.round_currency().0;
        let spend = total - invest;
        (Money(spend), Money(invest))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Self) -> Self::Output {
        Money(self.0 - rhs.0)
    }
}

impl FromStr for Money {
    type Err = rust_decimal::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Money::from_str_exact(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn split_conserves_total() {
        let amount = Money::new(dec!(100.00));
        let (spend, invest) = amount.split_70_30();
        assert_eq!(spend + invest, amount.round_currency());
        assert_eq!(spend, Money::new(dec!(70.00)));
        assert_eq!(invest, Money::new(dec!(30.00)));
    }

    #[test]
    fn split_absorbs_residue_on_spend_side() {
        // 0.01 * 0.30 = 0.003 -> rounds to 0.00; spend must pick up the cent.
        let amount = Money::new(dec!(0.01));
        let (spend, invest) = amount.split_70_30();
        assert_eq!(invest, Money::ZERO);
        assert_eq!(spend, Money::new(dec!(0.01)));
    }

    #[test]
    fn split_of_odd_cent_amount() {
        let amount = Money::new(dec!(10.01));
        let (spend, invest) = amount.split_70_30();
        assert_eq!(spend + invest, amount);
        // invest should be within one cent of exactly 30%
        let ideal = Money::new(dec!(3.003)).round_currency();
        let diff = (invest.as_decimal() - ideal.as_decimal()).abs();
        assert!(diff <= dec!(0.01));
    }

    proptest! {
        #[test]
        fn split_always_conserves_total(cents in 0i64..1_000_000_000i64) {
            let amount = Money::new(Decimal::new(cents, 2));
            let (spend, invest) = amount.split_70_30();
            prop_assert_eq!(spend + invest, amount.round_currency());
            prop_assert!(!spend.as_decimal().is_sign_negative() || spend.is_zero());
            prop_assert!(!invest.as_decimal().is_sign_negative() || invest.is_zero());
        }

        #[test]
        fn split_invest_within_one_cent_of_exact_30_percent(cents in 0i64..1_000_000_000i64) {
            let amount = Money::new(Decimal::new(cents, 2));
            let (_, invest) = amount.split_70_30();
            let exact = amount.as_decimal() * Decimal::new(30, 2);
            let diff = (invest.as_decimal() - exact).abs();
            prop_assert!(diff <= dec!(0.01));
        }
    }
}
