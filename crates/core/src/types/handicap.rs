//! Golf handicap index using decimal arithmetic.

use core::fmt;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Errors that can occur when constructing a [`Handicap`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HandicapError {
    /// The value is not a finite number.
    #[error("handicap must be a finite number")]
    NotFinite,
    /// The value is outside the allowed index range.
    #[error("handicap must be between {min} and {max}")]
    OutOfRange {
        /// Lowest allowed index (a "plus" handicap).
        min: Decimal,
        /// Highest allowed index.
        max: Decimal,
    },
}

/// A handicap index, stored with one decimal place.
///
/// Plus handicaps are represented as negative values, so `-2.3` reads as
/// "+2.3". The allowed range is `-10.0..=54.0`.
///
/// Serialized as a plain JSON number, which is how the hosted backend stores
/// the `handicap` profile column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Handicap(Decimal);

impl Handicap {
    /// Lowest accepted index.
    pub const MIN: Decimal = Decimal::from_parts(100, 0, 0, true, 1);
    /// Highest accepted index.
    pub const MAX: Decimal = Decimal::from_parts(540, 0, 0, false, 1);

    /// Create a handicap from a decimal, rounding to one place.
    ///
    /// # Errors
    ///
    /// Returns `HandicapError::OutOfRange` if the value is outside `-10.0..=54.0`.
    pub fn new(value: Decimal) -> Result<Self, HandicapError> {
        let value = value.round_dp(1);
        if value < Self::MIN || value > Self::MAX {
            return Err(HandicapError::OutOfRange {
                min: Self::MIN,
                max: Self::MAX,
            });
        }
        Ok(Self(value))
    }

    /// The handicap as a decimal.
    #[must_use]
    pub const fn value(&self) -> Decimal {
        self.0
    }

    /// Whether this is a "plus" handicap (better than scratch).
    #[must_use]
    pub const fn is_plus(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }
}

impl TryFrom<f64> for Handicap {
    type Error = HandicapError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        let decimal = Decimal::try_from(value).map_err(|_| HandicapError::NotFinite)?;
        Self::new(decimal)
    }
}

impl From<Handicap> for f64 {
    fn from(handicap: Handicap) -> Self {
        handicap.0.to_f64().unwrap_or_default()
    }
}

impl fmt::Display for Handicap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_plus() {
            write!(f, "+{:.1}", self.0.abs())
        } else {
            write!(f, "{:.1}", self.0)
        }
    }
}
