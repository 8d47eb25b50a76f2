use crate::errors::CurveError;
use crate::fixed::{self, MICRO_PER_UNIT};
use crate::types::{Micro, SegmentIndex};
use rust_decimal::prelude::MathematicalOps;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Segments advanced per call unless configured otherwise.
pub const DEFAULT_MAX_SEGMENTS_PER_CALL: u32 = 25;

/// Genesis mint: 100 000 whole tokens.
pub const DEFAULT_GENESIS_SUPPLY: Micro = 100_000 * MICRO_PER_UNIT;

/// Which tokens a completed segment's deferred allocation is sized on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferredAllocationBasis {
    /// Tokens minted within the completed segment (purchases plus the
    /// allocation injected at its start).
    #[default]
    SegmentMinted,
    /// Total supply outstanding when the segment completes.
    TotalSupply,
}

/// Immutable bonding-curve configuration.
///
/// Stored by the caller (normally governance-controlled) and passed by
/// reference into every resolution; validated once on load.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurveParameters {
    /// Price of segment 0 in whole reserve units per whole token.
    pub base_price: Decimal,
    /// Multiplicative price step applied per completed segment.
    pub price_increment: Decimal,
    /// Fraction of `supply × price` held in reserve at segment boundaries.
    pub reserve_ratio: Decimal,
    /// Fraction of a completed segment's basis set aside for deferred allocation.
    pub deferred_allocation_rate: Decimal,
    pub max_segments_per_call: u32,
    /// Tokens issued by the genesis segment (micro-units).
    #[serde(with = "fixed::serde_micro")]
    pub genesis_supply: Micro,
    pub deferred_allocation_basis: DeferredAllocationBasis,
}

impl Default for CurveParameters {
    fn default() -> Self {
        Self {
            base_price: Decimal::new(1, 4),               // 0.0001
            price_increment: Decimal::new(1, 3),          // 0.1%
            reserve_ratio: Decimal::new(1, 1),            // 1:10
            deferred_allocation_rate: Decimal::new(1, 4), // 0.01%
            max_segments_per_call: DEFAULT_MAX_SEGMENTS_PER_CALL,
            genesis_supply: DEFAULT_GENESIS_SUPPLY,
            deferred_allocation_basis: DeferredAllocationBasis::SegmentMinted,
        }
    }
}

impl CurveParameters {
    pub fn validate(&self) -> Result<(), CurveError> {
        if self.base_price <= Decimal::ZERO {
            return Err(invalid("base_price", self.base_price, "must be greater than 0"));
        }
        if self.price_increment.is_sign_negative() {
            return Err(invalid(
                "price_increment",
                self.price_increment,
                "must be non-negative",
            ));
        }
        if self.reserve_ratio <= Decimal::ZERO || self.reserve_ratio >= Decimal::ONE {
            return Err(invalid(
                "reserve_ratio",
                self.reserve_ratio,
                "must be strictly between 0 and 1",
            ));
        }
        if self.deferred_allocation_rate.is_sign_negative()
            || self.deferred_allocation_rate >= Decimal::ONE
        {
            return Err(invalid(
                "deferred_allocation_rate",
                self.deferred_allocation_rate,
                "must be in [0, 1)",
            ));
        }
        if self.max_segments_per_call == 0 {
            return Err(invalid(
                "max_segments_per_call",
                self.max_segments_per_call,
                "must be greater than 0",
            ));
        }
        if self.genesis_supply == 0 {
            return Err(invalid("genesis_supply", self.genesis_supply, "must be greater than 0"));
        }
        Ok(())
    }

    /// `1 + price_increment`
    pub fn growth_factor(&self) -> Result<Decimal, CurveError> {
        fixed::add(Decimal::ONE, self.price_increment, "growth factor")
    }

    /// `base_price × (1 + price_increment)^segment`
    pub fn price_at(&self, segment: SegmentIndex) -> Result<Decimal, CurveError> {
        let step = self
            .growth_factor()?
            .checked_powu(segment)
            .ok_or(CurveError::ArithmeticOverflow("price growth"))?;
        fixed::mul(self.base_price, step, "price at segment")
    }

    /// Reserve currency paid per genesis token at `price`.
    pub fn seeding_price(&self, price: Decimal) -> Result<Decimal, CurveError> {
        fixed::mul(self.reserve_ratio, price, "seeding price")
    }

    /// Allocation accrued when a segment completes.
    ///
    /// `segment_minted` counts every token minted into the segment, purchases
    /// and injected allocation alike; `total_supply` is the supply after
    /// completion.
    pub fn deferred_allocation(
        &self,
        segment_minted: Micro,
        total_supply: Micro,
    ) -> Result<Micro, CurveError> {
        let basis = match self.deferred_allocation_basis {
            DeferredAllocationBasis::SegmentMinted => segment_minted,
            DeferredAllocationBasis::TotalSupply => total_supply,
        };
        fixed::mul_price(basis, self.deferred_allocation_rate)
    }
}

fn invalid(param: &'static str, value: impl ToString, reason: &'static str) -> CurveError {
    CurveError::InvalidParameter {
        param,
        value: value.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let p = CurveParameters::default();
        p.validate().unwrap();
        assert_eq!(p.base_price, Decimal::new(1, 4));
        assert_eq!(p.genesis_supply, 100_000_000_000);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let cases = [
            CurveParameters {
                base_price: Decimal::ZERO,
                ..Default::default()
            },
            CurveParameters {
                price_increment: Decimal::new(-1, 3),
                ..Default::default()
            },
            CurveParameters {
                reserve_ratio: Decimal::ONE,
                ..Default::default()
            },
            CurveParameters {
                deferred_allocation_rate: Decimal::ONE,
                ..Default::default()
            },
            CurveParameters {
                max_segments_per_call: 0,
                ..Default::default()
            },
            CurveParameters {
                genesis_supply: 0,
                ..Default::default()
            },
        ];
        for params in cases {
            assert!(matches!(
                params.validate(),
                Err(CurveError::InvalidParameter { .. })
            ));
        }
    }

    #[test]
    fn price_schedule() {
        let p = CurveParameters::default();
        assert_eq!(p.price_at(0).unwrap(), Decimal::new(1, 4));
        assert_eq!(p.price_at(1).unwrap(), Decimal::new(1001, 7));
        assert_eq!(p.price_at(2).unwrap(), Decimal::new(1002001, 10));
        assert_eq!(p.seeding_price(p.base_price).unwrap(), Decimal::new(1, 5));
    }

    #[test]
    fn deferred_allocation_follows_basis() {
        let mut p = CurveParameters::default();
        assert_eq!(p.deferred_allocation(20_990_009, 100_020_990_009).unwrap(), 2_099);
        p.deferred_allocation_basis = DeferredAllocationBasis::TotalSupply;
        assert_eq!(
            p.deferred_allocation(20_990_009, 100_020_990_009).unwrap(),
            10_002_099
        );
    }

    #[test]
    fn serde_accepts_partial_documents() {
        let json = r#"{"price_increment":"0.00001","deferred_allocation_basis":"total_supply"}"#;
        let p: CurveParameters = serde_json::from_str(json).unwrap();
        assert_eq!(p.price_increment, Decimal::new(1, 5));
        assert_eq!(p.deferred_allocation_basis, DeferredAllocationBasis::TotalSupply);
        assert_eq!(p.max_segments_per_call, DEFAULT_MAX_SEGMENTS_PER_CALL);
    }
}
