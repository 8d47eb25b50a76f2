//! Core types for the segmented bonding-curve engine
//!
//! Defines monetary units, the persisted curve snapshot, and the per-call
//! purchase result with its segment ledger.

use crate::errors::CurveError;
use crate::fixed;
use crate::params::CurveParameters;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Amount in micro-units (tokens or reserve currency).
/// 1 whole unit = 1 000 000 micro-units
pub type Micro = u128;

/// Segment index, monotonically increasing from genesis
pub type SegmentIndex = u64;

/// Canonical curve snapshot.
///
/// Owned and persisted by the caller; the engine never mutates it in place
/// and returns a replacement in [`PurchaseResult::final_state`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurveState {
    pub segment: SegmentIndex,
    /// Price per whole token, `base_price × (1 + price_increment)^segment`
    pub price: Decimal,
    /// Tokens issued so far, user purchases plus distributed allocation
    pub total_supply: Micro,
    /// Reserve currency retained from deposits
    pub reserve_balance: Micro,
    /// Allocation accrued by the last completed segment, minted at the start
    /// of the next segment processed
    pub pending_deferred_allocation: Micro,
    /// Tokens bought in the current segment by earlier partial fills
    #[serde(default)]
    pub segment_minted: Micro,
}

impl CurveState {
    /// Pre-genesis snapshot: segment 0 at the base price, nothing issued.
    pub fn genesis(params: &CurveParameters) -> Self {
        Self {
            segment: 0,
            price: params.base_price,
            total_supply: 0,
            reserve_balance: 0,
            pending_deferred_allocation: 0,
            segment_minted: 0,
        }
    }

    /// Segment 0 while the genesis mint is still being issued.
    pub fn is_genesis_open(&self, params: &CurveParameters) -> bool {
        self.segment == 0 && self.total_supply < params.genesis_supply
    }

    pub fn validate(&self) -> Result<(), CurveError> {
        if self.price <= Decimal::ZERO {
            return Err(CurveError::InvalidState(format!(
                "segment {} has non-positive price {}",
                self.segment, self.price
            )));
        }
        if self.segment_minted > self.total_supply {
            return Err(CurveError::InvalidState(format!(
                "segment minted {} exceeds total supply {}",
                self.segment_minted, self.total_supply
            )));
        }
        Ok(())
    }

    /// `total_supply × price`, in micro reserve units
    pub fn valuation(&self) -> Result<Decimal, CurveError> {
        fixed::mul(fixed::to_decimal(self.total_supply)?, self.price, "valuation")
    }

    /// Held reserve as a fraction of valuation; zero before anything is issued.
    pub fn actual_reserve_ratio(&self) -> Result<Decimal, CurveError> {
        let valuation = self.valuation()?;
        if valuation.is_zero() {
            return Ok(Decimal::ZERO);
        }
        fixed::div(
            fixed::to_decimal(self.reserve_balance)?,
            valuation,
            "reserve ratio",
        )
    }
}

/// One segment touched during a resolution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub segment_number: SegmentIndex,
    /// Tokens purchased in this segment by this call
    pub tokens_bought: Micro,
    /// Reserve currency consumed
    pub cost: Micro,
    pub price_at_segment: Decimal,
    /// Pending allocation minted at the start of the segment
    pub deferred_allocation_distributed: Micro,
    /// Tokens delivered to the buyer
    pub user_tokens: Micro,
    pub is_complete: bool,
    /// 0 when complete
    pub tokens_still_needed_to_complete: Micro,
    /// Reserve requirement evaluated for the segment
    pub required_reserve: Micro,
    pub reserve_after: Micro,
    /// Allocation produced by completing the segment (pending for the next)
    pub deferred_allocation_accrued: Micro,
}

/// Why a resolution stopped. Both are successful outcomes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// Funds consumed, down to dust or to less than one purchasable micro-unit
    FundsExhausted,
    /// `max_segments_per_call` segments completed; leftovers are refunded
    SegmentLimitReached,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionMethod {
    /// Segment-by-segment resolution
    Exact,
    /// Closed-form jump across middle segments, reconciled exactly at both ends
    ClosedForm,
}

/// Outcome of one purchase resolution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseResult {
    /// User tokens plus distributed deferred allocation (total to mint)
    pub total_tokens_bought: Micro,
    pub total_cost: Micro,
    pub total_user_tokens: Micro,
    pub total_deferred_allocation: Micro,
    /// Deposit not consumed, refunded by the caller
    pub remaining_funds: Micro,
    /// Completed segments
    pub segments_processed: u32,
    pub final_state: CurveState,
    pub segment_details: Vec<SegmentRecord>,
    pub termination: Termination,
    pub method: ResolutionMethod,
}

impl PurchaseResult {
    /// Assemble a result whose totals are derived from its segment ledger, so
    /// `total_cost + remaining_funds == deposit` holds by construction.
    pub fn from_records(
        deposit: Micro,
        segment_details: Vec<SegmentRecord>,
        final_state: CurveState,
        termination: Termination,
        method: ResolutionMethod,
    ) -> Result<Self, CurveError> {
        let mut total_cost: Micro = 0;
        let mut total_user_tokens: Micro = 0;
        let mut total_deferred_allocation: Micro = 0;
        let mut segments_processed: u32 = 0;
        for record in &segment_details {
            total_cost = fixed::checked_add_micro(total_cost, record.cost, "total cost")?;
            total_user_tokens =
                fixed::checked_add_micro(total_user_tokens, record.user_tokens, "user tokens")?;
            total_deferred_allocation = fixed::checked_add_micro(
                total_deferred_allocation,
                record.deferred_allocation_distributed,
                "deferred allocation",
            )?;
            if record.is_complete {
                segments_processed = segments_processed.saturating_add(1);
            }
        }
        let remaining_funds = deposit.checked_sub(total_cost).ok_or_else(|| {
            CurveError::InvalidState(format!(
                "segment costs {total_cost} exceed deposit {deposit}"
            ))
        })?;

        Ok(Self {
            total_tokens_bought: fixed::checked_add_micro(
                total_user_tokens,
                total_deferred_allocation,
                "tokens bought",
            )?,
            total_cost,
            total_user_tokens,
            total_deferred_allocation,
            remaining_funds,
            segments_processed,
            final_state,
            segment_details,
            termination,
            method,
        })
    }

    pub fn completed_segments(&self) -> impl Iterator<Item = &SegmentRecord> {
        self.segment_details.iter().filter(|r| r.is_complete)
    }

    /// True when the call ended exactly on a segment boundary.
    pub fn ends_on_boundary(&self) -> bool {
        self.segment_details
            .last()
            .map_or(false, |record| record.is_complete)
    }
}
