//! Segment inspection
//!
//! Read-only view of the segment a snapshot is positioned in, evaluated the
//! same way the resolver evaluates it before buying: the pending deferred
//! allocation is counted as injected.

use crate::errors::CurveError;
use crate::fixed;
use crate::params::CurveParameters;
use crate::resolver::evaluate_requirement;
use crate::types::{CurveState, Micro, SegmentIndex};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub segment: SegmentIndex,
    pub price: Decimal,
    pub total_supply: Micro,
    pub reserve_balance: Micro,
    pub pending_deferred_allocation: Micro,
    /// Reserve required once the segment completes
    pub required_reserve: Micro,
    pub reserve_deficit: Micro,
    /// User tokens still needed to complete the segment
    pub tokens_needed: Micro,
    /// Reserve currency needed to complete the segment
    pub cost_to_complete: Micro,
    /// `reserve_balance / (total_supply × price)`
    pub reserve_ratio_actual: Decimal,
    /// Segment 0 with the genesis mint outstanding
    pub genesis: bool,
}

impl SegmentInfo {
    /// A zero-cost segment; the next resolution advances it without funds.
    pub fn is_balanced(&self) -> bool {
        self.tokens_needed == 0
    }
}

pub fn segment_info(state: &CurveState, params: &CurveParameters) -> Result<SegmentInfo, CurveError> {
    state.validate()?;
    let genesis = state.is_genesis_open(params);

    let mut evaluated = state.clone();
    if !genesis {
        evaluated.total_supply = fixed::checked_add_micro(
            evaluated.total_supply,
            evaluated.pending_deferred_allocation,
            "deferred injection",
        )?;
        evaluated.pending_deferred_allocation = 0;
    }
    let requirement = evaluate_requirement(&evaluated, params)?;

    let info = SegmentInfo {
        segment: state.segment,
        price: state.price,
        total_supply: state.total_supply,
        reserve_balance: state.reserve_balance,
        pending_deferred_allocation: state.pending_deferred_allocation,
        required_reserve: fixed::truncate_micro(requirement.required)?,
        reserve_deficit: fixed::truncate_micro(requirement.deficit)?,
        tokens_needed: requirement.tokens_needed,
        cost_to_complete: requirement.cost,
        reserve_ratio_actual: state.actual_reserve_ratio()?,
        genesis,
    };
    debug!(
        "Segment {} info: {} tokens for {} to complete",
        info.segment, info.tokens_needed, info.cost_to_complete
    );
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_info() {
        let params = CurveParameters::default();
        let info = segment_info(&CurveState::genesis(&params), &params).unwrap();
        assert!(info.genesis);
        assert_eq!(info.tokens_needed, params.genesis_supply);
        assert_eq!(info.cost_to_complete, 1_000_000);
        assert_eq!(info.required_reserve, 1_000_000);
        assert_eq!(info.reserve_ratio_actual, Decimal::ZERO);
    }

    #[test]
    fn counts_pending_allocation() {
        let params = CurveParameters::default();
        let state = CurveState {
            segment: 1,
            price: params.price_at(1).unwrap(),
            total_supply: 100_000_000_000,
            reserve_balance: 1_000_000,
            pending_deferred_allocation: 10_000_000,
            segment_minted: 0,
        };
        let info = segment_info(&state, &params).unwrap();
        assert!(!info.genesis);
        assert_eq!(info.total_supply, 100_000_000_000);
        assert_eq!(info.required_reserve, 1_001_100);
        assert_eq!(info.reserve_deficit, 1_100);
        assert_eq!(info.tokens_needed, 10_990_009);
        assert_eq!(info.cost_to_complete, 1_100);
        assert!(!info.is_balanced());
    }

    #[test]
    fn over_reserved_segment_is_balanced() {
        let params = CurveParameters::default();
        let state = CurveState {
            segment: 1,
            price: params.price_at(1).unwrap(),
            total_supply: 100_000_000_000,
            reserve_balance: 3_000_000,
            pending_deferred_allocation: 0,
            segment_minted: 0,
        };
        let info = segment_info(&state, &params).unwrap();
        assert!(info.is_balanced());
        assert_eq!(info.reserve_deficit, 0);
        assert_eq!(info.cost_to_complete, 0);
    }
}
