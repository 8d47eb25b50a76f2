//! Exact segment-by-segment purchase resolution
//!
//! The resolver is the single source of truth for purchase outcomes. It walks
//! the curve one segment at a time from an immutable [`CurveState`] snapshot:
//! injects the pending deferred allocation, evaluates the reserve deficit,
//! then either auto-advances, completes the segment, or partially fills it.

use crate::errors::CurveError;
use crate::fixed;
use crate::params::CurveParameters;
use crate::types::{
    CurveState, Micro, PurchaseResult, ResolutionMethod, SegmentRecord, Termination,
};
use rust_decimal::Decimal;
use tracing::{debug, info};

/// Residual funds at or below this many micro-units are treated as consumed.
pub const DUST_EPSILON: Micro = 1;

/// What the current segment needs before the curve may advance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Requirement {
    /// Reserve the segment must hold once complete
    pub required: Decimal,
    /// `required - reserve`, clamped to zero
    pub deficit: Decimal,
    pub tokens_needed: Micro,
    /// Reserve currency needed to buy `tokens_needed`
    pub cost: Micro,
    /// Reserve currency paid per micro-token in this segment
    pub unit_cost: Decimal,
}

/// Evaluate the segment `state` is positioned in.
///
/// Any pending allocation the segment would receive must already be part of
/// `state.total_supply`.
pub(crate) fn evaluate_requirement(
    state: &CurveState,
    params: &CurveParameters,
) -> Result<Requirement, CurveError> {
    let reserve = fixed::to_decimal(state.reserve_balance)?;

    if state.is_genesis_open(params) {
        let unit_cost = params.seeding_price(state.price)?;
        let tokens_needed = params.genesis_supply.saturating_sub(state.total_supply);
        let required = fixed::mul(
            fixed::to_decimal(params.genesis_supply)?,
            unit_cost,
            "genesis reserve",
        )?;
        return Ok(Requirement {
            required,
            deficit: fixed::sub_clamped(required, reserve),
            tokens_needed,
            cost: fixed::mul_price(tokens_needed, unit_cost)?,
            unit_cost,
        });
    }

    let valuation = state.valuation()?;
    let required = fixed::mul(params.reserve_ratio, valuation, "required reserve")?;
    let deficit = fixed::sub_clamped(required, reserve);
    // Every purchased token pays its full price into the reserve, so the
    // deficit converts at `price`, not `reserve_ratio × price`.
    let tokens_needed = fixed::truncate_micro(fixed::div(deficit, state.price, "deficit / price")?)?;
    Ok(Requirement {
        required,
        deficit,
        tokens_needed,
        cost: fixed::mul_price(tokens_needed, state.price)?,
        unit_cost: state.price,
    })
}

/// Working copy of the curve while a call is being resolved.
struct Cursor {
    state: CurveState,
    remaining: Micro,
    segments_processed: u32,
    records: Vec<SegmentRecord>,
}

enum Step {
    Continue,
    /// Funds can no longer advance the curve
    Exhausted,
}

/// Deterministic exact resolver.
#[derive(Clone, Copy, Debug)]
pub struct SegmentResolver<'a> {
    params: &'a CurveParameters,
}

impl<'a> SegmentResolver<'a> {
    pub fn new(params: &'a CurveParameters) -> Result<Self, CurveError> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &'a CurveParameters {
        self.params
    }

    /// Resolve `deposit` micro-units of reserve currency against `state`.
    ///
    /// Advances at most `max_segments_per_call` segments; funds left over are
    /// reported in `remaining_funds` for refund.
    pub fn resolve(&self, state: &CurveState, deposit: Micro) -> Result<PurchaseResult, CurveError> {
        if deposit == 0 {
            return Err(CurveError::InvalidDeposit(
                "deposit must be greater than 0".into(),
            ));
        }
        let result = self.resolve_bounded(state, deposit, self.params.max_segments_per_call)?;
        info!(
            "Resolved purchase of {} at segment {}: {} tokens over {} segments, refund {} ({:?})",
            deposit,
            state.segment,
            result.total_tokens_bought,
            result.segments_processed,
            result.remaining_funds,
            result.termination
        );
        Ok(result)
    }

    /// Resolve with an explicit segment budget. A zero deposit yields an
    /// empty ledger.
    pub(crate) fn resolve_bounded(
        &self,
        state: &CurveState,
        deposit: Micro,
        segment_limit: u32,
    ) -> Result<PurchaseResult, CurveError> {
        state.validate()?;

        let mut cursor = Cursor {
            state: state.clone(),
            remaining: deposit,
            segments_processed: 0,
            records: Vec::new(),
        };

        let termination = loop {
            if cursor.remaining <= DUST_EPSILON {
                break Termination::FundsExhausted;
            }
            if cursor.segments_processed >= segment_limit {
                break Termination::SegmentLimitReached;
            }
            let step = if cursor.state.is_genesis_open(self.params) {
                self.genesis_step(&mut cursor)?
            } else {
                self.segment_step(&mut cursor)?
            };
            if let Step::Exhausted = step {
                break Termination::FundsExhausted;
            }
        };

        PurchaseResult::from_records(
            deposit,
            cursor.records,
            cursor.state,
            termination,
            ResolutionMethod::Exact,
        )
    }

    /// Segment 0 while the genesis mint is outstanding: tokens are issued at
    /// the seeding price and no deferred allocation is distributed.
    fn genesis_step(&self, cursor: &mut Cursor) -> Result<Step, CurveError> {
        let requirement = evaluate_requirement(&cursor.state, self.params)?;
        debug!(
            "Genesis segment: {} tokens outstanding, cost {}, funds {}",
            requirement.tokens_needed, requirement.cost, cursor.remaining
        );
        if cursor.remaining >= requirement.cost {
            self.complete_segment(cursor, requirement.tokens_needed, requirement.cost, 0, &requirement)?;
            Ok(Step::Continue)
        } else {
            self.partial_fill(cursor, &requirement)
        }
    }

    fn segment_step(&self, cursor: &mut Cursor) -> Result<Step, CurveError> {
        let injected = cursor.state.pending_deferred_allocation;
        cursor.state.total_supply =
            fixed::checked_add_micro(cursor.state.total_supply, injected, "deferred injection")?;
        cursor.state.pending_deferred_allocation = 0;

        let requirement = evaluate_requirement(&cursor.state, self.params)?;
        debug!(
            "Segment {} at price {}: injected {}, deficit {}, tokens needed {}, cost {}",
            cursor.state.segment,
            cursor.state.price,
            injected,
            requirement.deficit,
            requirement.tokens_needed,
            requirement.cost
        );

        if requirement.tokens_needed == 0 {
            debug!("Segment {} already balanced, advancing", cursor.state.segment);
            self.complete_segment(cursor, 0, 0, injected, &requirement)?;
            return Ok(Step::Continue);
        }

        if cursor.remaining >= requirement.cost {
            self.complete_segment(
                cursor,
                requirement.tokens_needed,
                requirement.cost,
                injected,
                &requirement,
            )?;
            return Ok(Step::Continue);
        }

        // Incomplete segments never distribute: the injection stays pending.
        cursor.state.total_supply = cursor.state.total_supply.saturating_sub(injected);
        cursor.state.pending_deferred_allocation = injected;
        self.partial_fill(cursor, &requirement)
    }

    fn complete_segment(
        &self,
        cursor: &mut Cursor,
        tokens: Micro,
        cost: Micro,
        injected: Micro,
        requirement: &Requirement,
    ) -> Result<(), CurveError> {
        cursor.remaining = cursor.remaining.checked_sub(cost).ok_or_else(|| {
            CurveError::InvalidState(format!(
                "segment cost {cost} exceeds remaining funds {}",
                cursor.remaining
            ))
        })?;

        let state = &mut cursor.state;
        state.total_supply = fixed::checked_add_micro(state.total_supply, tokens, "total supply")?;
        state.reserve_balance = fixed::checked_add_micro(state.reserve_balance, cost, "reserve")?;

        let minted = fixed::checked_add_micro(state.segment_minted, tokens, "segment minted")?;
        let minted = fixed::checked_add_micro(minted, injected, "segment minted")?;
        let accrued = self.params.deferred_allocation(minted, state.total_supply)?;

        cursor.records.push(SegmentRecord {
            segment_number: state.segment,
            tokens_bought: fixed::checked_add_micro(tokens, injected, "segment tokens")?,
            cost,
            price_at_segment: state.price,
            deferred_allocation_distributed: injected,
            user_tokens: tokens,
            is_complete: true,
            tokens_still_needed_to_complete: 0,
            required_reserve: fixed::truncate_micro(requirement.required)?,
            reserve_after: state.reserve_balance,
            deferred_allocation_accrued: accrued,
        });

        state.pending_deferred_allocation = accrued;
        state.segment_minted = 0;
        state.segment += 1;
        state.price = self.params.price_at(state.segment)?;
        cursor.segments_processed += 1;

        debug!(
            "Completed segment {}: {} tokens for {}, {} allocation pending",
            state.segment - 1,
            tokens,
            cost,
            accrued
        );
        Ok(())
    }

    /// Spend everything left on the current segment without completing it.
    fn partial_fill(&self, cursor: &mut Cursor, requirement: &Requirement) -> Result<Step, CurveError> {
        let mut affordable = fixed::div_price(cursor.remaining, requirement.unit_cost)?;
        if affordable == 0 && fixed::to_decimal(cursor.remaining)? >= requirement.unit_cost {
            affordable = 1;
        }
        let affordable = affordable.min(requirement.tokens_needed);
        if affordable == 0 {
            debug!(
                "Funds {} cannot buy a micro-unit at {}, refunding",
                cursor.remaining, requirement.unit_cost
            );
            return Ok(Step::Exhausted);
        }

        let cost = cursor.remaining;
        cursor.remaining = 0;

        let state = &mut cursor.state;
        state.total_supply = fixed::checked_add_micro(state.total_supply, affordable, "total supply")?;
        state.reserve_balance = fixed::checked_add_micro(state.reserve_balance, cost, "reserve")?;
        state.segment_minted = fixed::checked_add_micro(state.segment_minted, affordable, "segment minted")?;

        cursor.records.push(SegmentRecord {
            segment_number: state.segment,
            tokens_bought: affordable,
            cost,
            price_at_segment: state.price,
            deferred_allocation_distributed: 0,
            user_tokens: affordable,
            is_complete: false,
            tokens_still_needed_to_complete: requirement.tokens_needed - affordable,
            required_reserve: fixed::truncate_micro(requirement.required)?,
            reserve_after: state.reserve_balance,
            deferred_allocation_accrued: 0,
        });

        debug!(
            "Partial fill in segment {}: {} tokens for {}, {} still needed",
            state.segment,
            affordable,
            cost,
            requirement.tokens_needed - affordable
        );
        Ok(Step::Exhausted)
    }
}
