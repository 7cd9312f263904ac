//! # Fact Bits
//!
//! A fact is a named, independently testable boolean condition. Each
//! capability defines its own facts, packs the ones observed for a call site
//! into a single integer mask, and ships a table that decodes the mask back
//! into short tags and detail text for presentation.
//!
//! Masks must survive a round trip through a double-precision number on the
//! observer side, so a fact value is capped at 2^53 and a mask never holds
//! more than 53 independent bits.
//!
//! ```text
//! mask = 0b0110
//!          ││││
//!          │││└─ NOT_A_FUNCTION   (unset)
//!          ││└── BAD_DELAY        (set)
//!          │└─── BAD_HANDLER      (set)
//!          └──── NOT_FOUND        (unset)
//! ```

pub mod tables;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::FactError;

/// Largest value a fact may be defined with (2^53).
pub const MAX_FACT_VALUE: u64 = 1 << 53;

/// Number of distinct single-bit facts a mask can carry.
pub const MAX_FACTS: u32 = 53;

/// A single fact bit owned by one capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fact(u64);

impl Fact {
    /// Define a fact from its integer value.
    ///
    /// # Errors
    /// Returns [`FactError::OutOfRange`] unless `0 < value <= 2^53`.
    pub fn define(value: u64) -> Result<Self, FactError> {
        if value == 0 || value > MAX_FACT_VALUE {
            return Err(FactError::OutOfRange(value));
        }
        Ok(Self(value))
    }

    /// Define the fact occupying bit `index`, checked at compile time when
    /// used in a `const`.
    ///
    /// # Panics
    /// Panics if `index >= MAX_FACTS`.
    #[must_use]
    pub const fn bit(index: u32) -> Self {
        assert!(index < MAX_FACTS, "fact bit index out of range");
        Self(1 << index)
    }

    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

/// The union of facts observed for one record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactMask(u64);

impl FactMask {
    pub const EMPTY: FactMask = FactMask(0);

    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Union `fact` into this mask.
    pub fn assign(&mut self, fact: Fact) {
        self.0 |= fact.value();
    }

    /// Builder form of [`FactMask::assign`].
    #[must_use]
    pub const fn with(self, fact: Fact) -> Self {
        Self(self.0 | fact.value())
    }

    /// True if any bit of `fact` is present in the mask.
    #[must_use]
    pub const fn check(self, fact: Fact) -> bool {
        self.0 & fact.value() != 0
    }
}

impl From<Fact> for FactMask {
    fn from(fact: Fact) -> Self {
        Self(fact.value())
    }
}

impl fmt::Display for FactMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#b}", self.0)
    }
}

/// Presentation data for one fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FactInfo {
    pub fact: Fact,
    /// Short tag shown in compact views (e.g. `"BAD_DELAY"`)
    pub tag: &'static str,
    /// Human-readable explanation
    pub detail: &'static str,
}

/// Ordered decoding table for one capability's facts.
pub type FactTable = &'static [FactInfo];

/// Detail strings for every fact in `table` that is set in `mask`, in table order.
#[must_use]
pub fn get_details(mask: FactMask, table: FactTable) -> Vec<&'static str> {
    table.iter().filter(|info| mask.check(info.fact)).map(|info| info.detail).collect()
}

/// Short tags for every fact in `table` that is set in `mask`, in table order.
#[must_use]
pub fn get_tags(mask: FactMask, table: FactTable) -> Vec<&'static str> {
    table.iter().filter(|info| mask.check(info.fact)).map(|info| info.tag).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: Fact = Fact::bit(0);
    const B: Fact = Fact::bit(1);
    const C: Fact = Fact::bit(5);

    static TABLE: &[FactInfo] = &[
        FactInfo { fact: A, tag: "A", detail: "first" },
        FactInfo { fact: B, tag: "B", detail: "second" },
        FactInfo { fact: C, tag: "C", detail: "sixth" },
    ];

    #[test]
    fn test_define_accepts_range_bounds() {
        assert_eq!(Fact::define(1).unwrap().value(), 1);
        assert_eq!(Fact::define(MAX_FACT_VALUE).unwrap().value(), MAX_FACT_VALUE);
    }

    #[test]
    fn test_define_rejects_zero_and_overflow() {
        assert!(matches!(Fact::define(0), Err(FactError::OutOfRange(0))));
        assert!(Fact::define(MAX_FACT_VALUE + 1).is_err());
        assert!(Fact::define(u64::MAX).is_err());
    }

    #[test]
    fn test_assign_and_check() {
        let mut mask = FactMask::default();
        assert!(mask.is_empty());
        assert!(!mask.check(A));

        mask.assign(A);
        mask.assign(C);
        assert!(mask.check(A));
        assert!(!mask.check(B));
        assert!(mask.check(C));
        assert_eq!(mask.bits(), 0b10_0001);

        // assigning twice is idempotent
        mask.assign(A);
        assert_eq!(mask.bits(), 0b10_0001);
    }

    #[test]
    fn test_get_details_in_table_order() {
        let mask = FactMask::EMPTY.with(C).with(A);
        assert_eq!(get_details(mask, TABLE), vec!["first", "sixth"]);
        assert_eq!(get_tags(mask, TABLE), vec!["A", "C"]);
    }

    #[test]
    fn test_get_details_ignores_bits_outside_table() {
        let mask = FactMask::from_bits(1 << 40).with(B);
        assert_eq!(get_details(mask, TABLE), vec!["second"]);
    }

    #[test]
    fn test_mask_serializes_as_integer() {
        let mask = FactMask::EMPTY.with(A).with(B);
        assert_eq!(serde_json::to_string(&mask).unwrap(), "3");
    }
}
