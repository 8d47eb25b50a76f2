//! Strategy selection between exact and closed-form resolution
//!
//! Small purchases always go through [`SegmentResolver`]. Purchases expected
//! to cross many segments resolve the first segment exactly, jump across the
//! middle using closed-form segment terms, and reconcile the last segments
//! exactly again, so the final state is always settled by the exact rules.

use crate::errors::CurveError;
use crate::estimator::ClosedFormEstimator;
use crate::fixed;
use crate::params::CurveParameters;
use crate::resolver::{SegmentResolver, DUST_EPSILON};
use crate::types::{CurveState, Micro, PurchaseResult, ResolutionMethod, SegmentRecord};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

/// Estimated segment crossings below which resolution stays exact.
pub const DEFAULT_HYBRID_THRESHOLD: u64 = 10;

/// Segments left to the exact resolver after a closed-form jump.
pub const RECONCILE_SEGMENTS: u64 = 2;

#[derive(Clone, Copy, Debug)]
pub struct HybridSelector<'a> {
    params: &'a CurveParameters,
    threshold: u64,
}

impl<'a> HybridSelector<'a> {
    pub fn new(params: &'a CurveParameters) -> Result<Self, CurveError> {
        params.validate()?;
        Ok(Self {
            params,
            threshold: DEFAULT_HYBRID_THRESHOLD,
        })
    }

    pub fn with_threshold(mut self, threshold: u64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Cheap estimate of segments `deposit` crosses: `deposit / (h × supply × price)`.
    ///
    /// Zero while genesis is open or on a flat curve, which keeps those
    /// purchases on the exact path.
    pub fn estimate_segments(&self, state: &CurveState, deposit: Micro) -> Result<u64, CurveError> {
        if state.is_genesis_open(self.params) || self.params.price_increment <= Decimal::ZERO {
            return Ok(0);
        }
        let estimator = ClosedFormEstimator::new(self.params)?;
        let supply = fixed::to_decimal(
            state
                .total_supply
                .saturating_add(state.pending_deferred_allocation),
        )?;
        let typical_cost = fixed::mul(
            fixed::mul(supply, estimator.supply_growth(), "typical tokens")?,
            state.price,
            "typical cost",
        )?;
        if typical_cost <= Decimal::ZERO {
            return Ok(0);
        }
        let segments = fixed::div(fixed::to_decimal(deposit)?, typical_cost, "segment estimate")?;
        Ok(segments.floor().to_u64().unwrap_or(u64::MAX))
    }

    /// Resolve `deposit` with the cheapest strategy that keeps settlement exact
    /// at both ends of the purchase.
    pub fn resolve_optimal(
        &self,
        state: &CurveState,
        deposit: Micro,
    ) -> Result<PurchaseResult, CurveError> {
        let resolver = SegmentResolver::new(self.params)?;
        if deposit == 0 {
            return resolver.resolve(state, deposit);
        }

        let estimate = self.estimate_segments(state, deposit)?;
        if estimate < self.threshold {
            debug!("Estimated {} segments, resolving exactly", estimate);
            return resolver.resolve(state, deposit);
        }

        match self.resolve_closed_form(&resolver, state, deposit) {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!("Closed-form resolution failed ({}), falling back to exact", e);
                resolver.resolve(state, deposit)
            }
        }
    }

    fn resolve_closed_form(
        &self,
        resolver: &SegmentResolver<'_>,
        state: &CurveState,
        deposit: Micro,
    ) -> Result<PurchaseResult, CurveError> {
        let limit = self.params.max_segments_per_call;
        let head = resolver.resolve_bounded(state, deposit, 1)?;
        if head.segments_processed == 0 || head.remaining_funds <= DUST_EPSILON || limit <= 1 {
            return resolver.resolve(state, deposit);
        }

        let estimator = ClosedFormEstimator::new(self.params)?;
        let mut records = head.segment_details;
        let mut current = head.final_state;
        let mut remaining = head.remaining_funds;
        let mut segments = head.segments_processed;

        let budget = u64::from(limit - segments);
        let approx = estimator.estimate_from_state(&current, remaining)?;
        let jump = approx
            .segments_completed
            .saturating_sub(RECONCILE_SEGMENTS)
            .min(budget.saturating_sub(RECONCILE_SEGMENTS));

        if jump > 0 {
            let anchor = estimator.anchor_from_state(&current)?;
            for term in estimator.terms(&anchor, jump)? {
                let tokens = fixed::truncate_micro(term.tokens)?;
                let cost = fixed::mul_price(tokens, current.price)?;
                if cost > remaining {
                    break;
                }
                let injected = current.pending_deferred_allocation;
                let supply_in =
                    fixed::checked_add_micro(current.total_supply, injected, "deferred injection")?;
                let required = fixed::mul(
                    self.params.reserve_ratio,
                    fixed::mul(fixed::to_decimal(supply_in)?, current.price, "valuation")?,
                    "required reserve",
                )?;

                remaining -= cost;
                current.total_supply = fixed::checked_add_micro(supply_in, tokens, "total supply")?;
                current.reserve_balance =
                    fixed::checked_add_micro(current.reserve_balance, cost, "reserve")?;
                let accrued = self.params.deferred_allocation(
                    fixed::checked_add_micro(tokens, injected, "segment minted")?,
                    current.total_supply,
                )?;

                records.push(SegmentRecord {
                    segment_number: current.segment,
                    tokens_bought: fixed::checked_add_micro(tokens, injected, "segment tokens")?,
                    cost,
                    price_at_segment: current.price,
                    deferred_allocation_distributed: injected,
                    user_tokens: tokens,
                    is_complete: true,
                    tokens_still_needed_to_complete: 0,
                    required_reserve: fixed::truncate_micro(required)?,
                    reserve_after: current.reserve_balance,
                    deferred_allocation_accrued: accrued,
                });

                current.pending_deferred_allocation = accrued;
                current.segment += 1;
                current.price = self.params.price_at(current.segment)?;
                segments += 1;
            }
            debug!(
                "Jumped to segment {} in closed form, {} funds left",
                current.segment, remaining
            );
        }

        let tail = resolver.resolve_bounded(&current, remaining, limit - segments)?;
        records.extend(tail.segment_details);
        let result = PurchaseResult::from_records(
            deposit,
            records,
            tail.final_state,
            tail.termination,
            ResolutionMethod::ClosedForm,
        )?;
        info!(
            "Resolved purchase of {} in closed form: {} tokens over {} segments, refund {}",
            deposit, result.total_tokens_bought, result.segments_processed, result.remaining_funds
        );
        Ok(result)
    }
}
