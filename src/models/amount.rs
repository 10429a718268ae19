use std::fmt::Display;
use std::iter::Sum;
use std::ops::Add;
use std::ops::AddAssign;
use std::str::FromStr;

use regex::Regex;
use serde::Deserialize;
use serde::Serialize;

/// Records an amount of platform currency. Amounts are internally represented
/// by an atomic unit called micro-units, held in a 128 bit unsigned integer.
///
/// 1 whole unit = 10^6 micro-units.
///
/// Six decimal digits match the precision of the stablecoin deposits the
/// gateway credits; amounts with finer precision are not representable and are
/// rejected at parse time. Amounts are never negative. Use [`Self::checked_add`]
/// and [`Self::checked_sub`] wherever a balance is mutated.
#[derive(
    Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct Amount(u128);

impl Amount {
    const DECIMALS: usize = 6;

    /// The conversion factor is 10^6 micro-units per whole unit.
    const fn conversion_factor() -> u128 {
        let mut product = 1u128;
        let mut i = 0;
        while i < Self::DECIMALS {
            product *= 10;
            i += 1;
        }
        product
    }

    pub const fn zero() -> Amount {
        Amount(0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Create an `Amount` of the given number of whole units.
    pub const fn whole(num_whole_units: u64) -> Amount {
        Amount(Self::conversion_factor() * num_whole_units as u128)
    }

    pub const fn from_micro_units(micro_units: u128) -> Amount {
        Amount(micro_units)
    }

    pub const fn to_micro_units(self) -> u128 {
        self.0
    }

    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    /// Return `Some(self - rhs)`, or `None` if the result would be negative.
    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_sub(rhs.0).map(Amount)
    }

    /// Integer percentage of the amount, truncating toward zero in micro-units.
    ///
    /// `Amount::whole(1000).percentage(3)` is exactly 30 whole units.
    pub fn percentage(self, percent: u64) -> Option<Amount> {
        self.0
            .checked_mul(u128::from(percent))
            .map(|scaled| Amount(scaled / 100))
    }

    /// Display with `n` decimal digits after the point, truncating.
    pub fn display_n_decimals(&self, n: usize) -> String {
        let factor = Self::conversion_factor();
        let integer_part = self.0 / factor;
        let fractional_part = self.0 % factor;
        if n == 0 {
            return format!("{integer_part}");
        }
        let full = format!("{fractional_part:0width$}", width = Self::DECIMALS);
        let shown: String = full.chars().take(n).collect();
        format!("{integer_part}.{shown}")
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Self) -> Self::Output {
        Amount(self.0 + rhs.0)
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        Amount(iter.map(|a| a.0).sum())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum AmountParseError {
    #[error("invalid amount: not a decimal number")]
    NotDecimal,

    #[error("invalid amount: more than {} decimal digits", Amount::DECIMALS)]
    TooPrecise,

    #[error("invalid amount: too large")]
    TooLarge,
}

impl FromStr for Amount {
    type Err = AmountParseError;

    /// Convert a decimal string representation of a not necessarily integral
    /// amount into an `Amount`. Negative values, exponents and thousands
    /// separators are rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let re = Regex::new(r#"^([0-9]*)\.?([0-9]*)$"#).unwrap();
        let Some((_full, [integer_digits, fractional_digits])) =
            re.captures(s.trim()).map(|c| c.extract::<2>())
        else {
            return Err(AmountParseError::NotDecimal);
        };
        if integer_digits.is_empty() && fractional_digits.is_empty() {
            return Err(AmountParseError::NotDecimal);
        }
        if fractional_digits.len() > Self::DECIMALS {
            return Err(AmountParseError::TooPrecise);
        }

        let integer_part = if integer_digits.is_empty() {
            0u128
        } else {
            integer_digits
                .parse::<u128>()
                .map_err(|_| AmountParseError::TooLarge)?
        };
        let mut fractional_part = if fractional_digits.is_empty() {
            0u128
        } else {
            // at most six digits, cannot overflow
            fractional_digits.parse::<u128>().unwrap()
        };
        for _ in fractional_digits.len()..Self::DECIMALS {
            fractional_part *= 10;
        }

        integer_part
            .checked_mul(Self::conversion_factor())
            .and_then(|scaled| scaled.checked_add(fractional_part))
            .map(Amount)
            .ok_or(AmountParseError::TooLarge)
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let factor = Self::conversion_factor();
        let integer_part = self.0 / factor;
        let fractional_part = self.0 % factor;
        if fractional_part == 0 {
            return write!(f, "{integer_part}");
        }
        let digits = format!("{fractional_part:0width$}", width = Self::DECIMALS);
        write!(f, "{integer_part}.{}", digits.trim_end_matches('0'))
    }
}
