//! Closed-form purchase estimation
//!
//! Once the curve settles, each segment needs a fixed fraction `h` of the
//! outstanding supply to restore the reserve ratio:
//!
//! ```text
//! h = R·g / ((1 + g)(1 − R))      tokens_{n+1} = tokens_n · (1 + h)
//! ρ = (1 + g)(1 + h)              cost_{n+1}   = cost_n · ρ
//! ```
//!
//! Spend across many segments is then a geometric series and the number of
//! segments a budget completes has a logarithmic closed form. Deferred
//! allocation is not tracked, so results are approximate: within 1% of the
//! exact resolver for typical increments, degrading as `price_increment`
//! grows.

use crate::errors::CurveError;
use crate::fixed;
use crate::params::CurveParameters;
use crate::resolver::evaluate_requirement;
use crate::types::{CurveState, Micro, SegmentIndex};
use rust_decimal::prelude::{MathematicalOps, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Upper bound on segments a single estimate may span.
pub const MAX_ESTIMATED_SEGMENTS: u64 = 50_000;

/// Approximate purchase outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproxResult {
    /// User tokens, deferred allocation excluded
    pub tokens_bought: Micro,
    pub total_cost: Micro,
    pub segments_completed: u64,
    /// Segment the spend ends in
    pub final_segment: SegmentIndex,
    /// Fraction of `final_segment` filled, in `[0, 1)`
    pub remaining_progress: Decimal,
}

/// Predicted cost and token count of one full segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SegmentTerm {
    pub cost: Decimal,
    pub tokens: Decimal,
}

/// Where a closed-form walk starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Anchor {
    pub segment: SegmentIndex,
    /// Fraction of `current` already filled
    pub progress: Decimal,
    pub current: SegmentTerm,
    /// First term of the geometric tail
    pub next: SegmentTerm,
}

#[derive(Clone, Debug)]
pub struct ClosedFormEstimator<'a> {
    params: &'a CurveParameters,
    /// h
    supply_growth: Decimal,
    /// ρ
    cost_growth: Decimal,
}

impl<'a> ClosedFormEstimator<'a> {
    pub fn new(params: &'a CurveParameters) -> Result<Self, CurveError> {
        params.validate()?;
        if params.price_increment <= Decimal::ZERO {
            return Err(CurveError::EstimationFailed(
                "closed form needs a positive price increment".into(),
            ));
        }
        let growth = params.growth_factor()?;
        let numerator = fixed::mul(params.reserve_ratio, params.price_increment, "h numerator")?;
        let denominator = fixed::mul(growth, Decimal::ONE - params.reserve_ratio, "h denominator")?;
        let supply_growth = fixed::div(numerator, denominator, "supply growth")?;
        let cost_growth = fixed::mul(growth, Decimal::ONE + supply_growth, "cost growth")?;
        Ok(Self {
            params,
            supply_growth,
            cost_growth,
        })
    }

    /// Per-segment supply growth of the settled curve.
    pub fn supply_growth(&self) -> Decimal {
        self.supply_growth
    }

    /// Per-segment cost growth of the settled curve.
    pub fn cost_growth(&self) -> Decimal {
        self.cost_growth
    }

    /// Estimate `spend` micro-units starting `progress` of the way through
    /// `segment_start` of the model curve (genesis supply growing by `1 + h`
    /// per segment).
    pub fn estimate(
        &self,
        segment_start: SegmentIndex,
        progress: Decimal,
        spend: Micro,
    ) -> Result<ApproxResult, CurveError> {
        if progress.is_sign_negative() || progress > Decimal::ONE {
            return Err(CurveError::EstimationFailed(format!(
                "progress {progress} outside [0, 1]"
            )));
        }
        let anchor = self.model_anchor(segment_start, progress)?;
        self.walk(&anchor, spend)
    }

    /// Estimate `spend` against an actual curve snapshot. The current and
    /// next segments are evaluated exactly; the geometric tail starts after
    /// them.
    pub fn estimate_from_state(
        &self,
        state: &CurveState,
        spend: Micro,
    ) -> Result<ApproxResult, CurveError> {
        let anchor = self.anchor_from_state(state)?;
        self.walk(&anchor, spend)
    }

    fn model_anchor(&self, segment: SegmentIndex, progress: Decimal) -> Result<Anchor, CurveError> {
        let genesis = fixed::to_decimal(self.params.genesis_supply)?;
        let price = self.params.price_at(segment)?;
        let current = if segment == 0 {
            SegmentTerm {
                cost: fixed::mul(genesis, self.params.seeding_price(price)?, "genesis cost")?,
                tokens: genesis,
            }
        } else {
            let growth = self.pow(Decimal::ONE + self.supply_growth, segment - 1)?;
            let supply = fixed::mul(genesis, growth, "model supply")?;
            let tokens = fixed::mul(supply, self.supply_growth, "model tokens")?;
            SegmentTerm {
                cost: fixed::mul(tokens, price, "model cost")?,
                tokens,
            }
        };
        let next = if segment == 0 {
            let tokens = fixed::mul(genesis, self.supply_growth, "model tokens")?;
            SegmentTerm {
                cost: fixed::mul(tokens, self.params.price_at(1)?, "model cost")?,
                tokens,
            }
        } else {
            self.step(current)?
        };
        Ok(Anchor {
            segment,
            progress,
            current,
            next,
        })
    }

    /// Anchor on `state`: the current segment as the resolver would see it,
    /// and the following one projected from its completion.
    pub(crate) fn anchor_from_state(&self, state: &CurveState) -> Result<Anchor, CurveError> {
        state.validate()?;
        let mut current_state = state.clone();
        let injected = if state.is_genesis_open(self.params) {
            0
        } else {
            current_state.pending_deferred_allocation
        };
        current_state.total_supply =
            fixed::checked_add_micro(current_state.total_supply, injected, "deferred injection")?;
        current_state.pending_deferred_allocation -= injected;

        let requirement = evaluate_requirement(&current_state, self.params)?;
        if requirement.cost == 0 {
            return Err(CurveError::EstimationFailed(format!(
                "segment {} needs no funds",
                state.segment
            )));
        }

        let filled = fixed::to_decimal(state.segment_minted)?;
        let remaining_tokens = fixed::to_decimal(requirement.tokens_needed)?;
        let segment_tokens = filled + remaining_tokens;
        let current = SegmentTerm {
            cost: fixed::add(
                fixed::to_decimal(requirement.cost)?,
                fixed::mul(filled, requirement.unit_cost, "filled cost")?,
                "segment cost",
            )?,
            tokens: segment_tokens,
        };
        let progress = fixed::div(filled, segment_tokens, "progress")?;

        let mut next_state = current_state;
        next_state.total_supply = fixed::checked_add_micro(
            next_state.total_supply,
            requirement.tokens_needed,
            "projected supply",
        )?;
        next_state.reserve_balance = fixed::checked_add_micro(
            next_state.reserve_balance,
            requirement.cost,
            "projected reserve",
        )?;
        let minted = state
            .segment_minted
            .saturating_add(requirement.tokens_needed)
            .saturating_add(injected);
        let accrued = self
            .params
            .deferred_allocation(minted, next_state.total_supply)?;
        next_state.total_supply =
            fixed::checked_add_micro(next_state.total_supply, accrued, "projected injection")?;
        next_state.segment += 1;
        next_state.price = fixed::mul(next_state.price, self.params.growth_factor()?, "price step")?;
        next_state.segment_minted = 0;

        let next_requirement = evaluate_requirement(&next_state, self.params)?;
        if next_requirement.cost == 0 {
            return Err(CurveError::EstimationFailed(format!(
                "segment {} needs no funds",
                next_state.segment
            )));
        }

        Ok(Anchor {
            segment: state.segment,
            progress,
            current,
            next: SegmentTerm {
                cost: fixed::to_decimal(next_requirement.cost)?,
                tokens: fixed::to_decimal(next_requirement.tokens_needed)?,
            },
        })
    }

    /// The `count` segment terms starting with the anchor's current segment.
    pub(crate) fn terms(&self, anchor: &Anchor, count: u64) -> Result<Vec<SegmentTerm>, CurveError> {
        let capacity = usize::try_from(count.min(MAX_ESTIMATED_SEGMENTS)).unwrap_or(0);
        let mut terms = Vec::with_capacity(capacity);
        let mut term = anchor.current;
        for index in 0..count {
            terms.push(term);
            term = if index == 0 { anchor.next } else { self.step(term)? };
        }
        Ok(terms)
    }

    fn step(&self, term: SegmentTerm) -> Result<SegmentTerm, CurveError> {
        Ok(SegmentTerm {
            cost: fixed::mul(term.cost, self.cost_growth, "cost step")?,
            tokens: fixed::mul(term.tokens, Decimal::ONE + self.supply_growth, "token step")?,
        })
    }

    fn pow(&self, base: Decimal, exp: u64) -> Result<Decimal, CurveError> {
        base.checked_powu(exp)
            .ok_or(CurveError::ArithmeticOverflow("geometric power"))
    }

    /// Cost and tokens of the first `m` tail segments.
    fn series(&self, first: SegmentTerm, m: u64) -> Result<SegmentTerm, CurveError> {
        let rho = self.pow(self.cost_growth, m)?;
        let cost = fixed::div(
            fixed::mul(first.cost, rho - Decimal::ONE, "series cost")?,
            self.cost_growth - Decimal::ONE,
            "series cost",
        )?;
        let growth = self.pow(Decimal::ONE + self.supply_growth, m)?;
        let tokens = fixed::div(
            fixed::mul(first.tokens, growth - Decimal::ONE, "series tokens")?,
            self.supply_growth,
            "series tokens",
        )?;
        Ok(SegmentTerm { cost, tokens })
    }

    /// Whole tail segments `budget` completes: the largest `m` with
    /// `first.cost · (ρ^m − 1)/(ρ − 1) ≤ budget`.
    fn segments_within(&self, first: SegmentTerm, budget: Decimal) -> Result<u64, CurveError> {
        let rho = self.cost_growth;
        let ratio = fixed::add(
            Decimal::ONE,
            fixed::div(
                fixed::mul(budget, rho - Decimal::ONE, "segment count")?,
                first.cost,
                "segment count",
            )?,
            "segment count",
        )?;
        let numerator = ratio
            .checked_ln()
            .ok_or_else(|| CurveError::EstimationFailed(format!("ln({ratio}) undefined")))?;
        let denominator = rho
            .checked_ln()
            .ok_or_else(|| CurveError::EstimationFailed(format!("ln({rho}) undefined")))?;
        let estimate = fixed::div(numerator, denominator, "segment count")?
            .floor()
            .to_u64()
            .ok_or_else(|| CurveError::EstimationFailed("segment count out of range".into()))?;
        if estimate > MAX_ESTIMATED_SEGMENTS {
            return Err(CurveError::EstimationFailed(format!(
                "spend spans more than {MAX_ESTIMATED_SEGMENTS} segments"
            )));
        }

        // ln is approximate; settle on the exact boundary.
        let mut m = estimate;
        while m > 0 && self.series(first, m)?.cost > budget {
            m -= 1;
        }
        while m < MAX_ESTIMATED_SEGMENTS && self.series(first, m + 1)?.cost <= budget {
            m += 1;
        }
        Ok(m)
    }

    fn walk(&self, anchor: &Anchor, spend: Micro) -> Result<ApproxResult, CurveError> {
        let budget = fixed::to_decimal(spend)?;
        let open = Decimal::ONE - anchor.progress;
        let open_cost = fixed::mul(anchor.current.cost, open, "open cost")?;

        if budget < open_cost || anchor.current.cost.is_zero() {
            let share = if anchor.current.cost.is_zero() {
                Decimal::ZERO
            } else {
                fixed::div(budget, anchor.current.cost, "segment share")?
            };
            return Ok(ApproxResult {
                tokens_bought: fixed::truncate_micro(fixed::mul(
                    anchor.current.tokens,
                    share,
                    "partial tokens",
                )?)?,
                total_cost: spend,
                segments_completed: 0,
                final_segment: anchor.segment,
                remaining_progress: anchor.progress + share,
            });
        }

        let mut tokens = fixed::mul(anchor.current.tokens, open, "open tokens")?;
        let budget = budget - open_cost;
        let m = self.segments_within(anchor.next, budget)?;
        let tail = self.series(anchor.next, m)?;
        tokens = fixed::add(tokens, tail.tokens, "tail tokens")?;

        let leftover = fixed::sub_clamped(budget, tail.cost);
        let last = SegmentTerm {
            cost: fixed::mul(anchor.next.cost, self.pow(self.cost_growth, m)?, "last cost")?,
            tokens: fixed::mul(
                anchor.next.tokens,
                self.pow(Decimal::ONE + self.supply_growth, m)?,
                "last tokens",
            )?,
        };
        let progress = fixed::div(leftover, last.cost, "final progress")?;
        tokens = fixed::add(
            tokens,
            fixed::mul(last.tokens, progress, "final tokens")?,
            "final tokens",
        )?;

        let result = ApproxResult {
            tokens_bought: fixed::truncate_micro(tokens)?,
            total_cost: spend,
            segments_completed: m + 1,
            final_segment: anchor.segment + m + 1,
            remaining_progress: progress,
        };
        debug!(
            "Closed-form estimate from segment {}: {} segments, {} tokens for {}",
            anchor.segment, result.segments_completed, result.tokens_bought, spend
        );
        Ok(result)
    }
}
