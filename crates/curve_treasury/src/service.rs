//! Purchase service
//!
//! Applies bonding-curve purchases and sales: takes the deposit (or the
//! tokens being sold), resolves it against the current curve snapshot,
//! commits the new snapshot with compare-and-swap (re-resolving on conflict),
//! then settles on the ledger. A settlement that fails before anything has
//! left the module is reverted: ledger effects are undone and the committed
//! snapshot is swapped back.

use crate::config::TreasuryConfig;
use crate::errors::TreasuryError;
use crate::history::{
    BuyerHistory, InMemorySegmentHistory, SegmentHistory, SegmentHistoryStore,
    SegmentPurchaseRecord,
};
use crate::ledger::{AccountId, CurveLedger};
use crate::store::{CurveStateStore, ParameterStore, VersionedState};
use segcurve_economics::{
    audit_result, resolve_sale, segment_info, ApproxResult, ClosedFormEstimator, CurveError,
    CurveParameters, CurveState, HybridSelector, Micro, PurchaseResult, SaleResult, SegmentIndex,
    SegmentInfo,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Outcomes that carry the snapshot they commit.
trait Resolution {
    fn final_state(&self) -> &CurveState;
}

impl Resolution for PurchaseResult {
    fn final_state(&self) -> &CurveState {
        &self.final_state
    }
}

impl Resolution for SaleResult {
    fn final_state(&self) -> &CurveState {
        &self.final_state
    }
}

/// An outcome written at `version` over `prior`.
struct Committed<T> {
    outcome: T,
    version: u64,
    prior: CurveState,
}

pub struct PurchaseService {
    ledger: Arc<dyn CurveLedger>,
    states: Arc<dyn CurveStateStore>,
    parameters: Arc<dyn ParameterStore>,
    history: Arc<dyn SegmentHistoryStore>,
    hybrid_threshold: u64,
    max_commit_attempts: u32,
    deferred_account: AccountId,
    max_supply: Option<Micro>,
}

impl PurchaseService {
    pub fn new(
        config: &TreasuryConfig,
        ledger: Arc<dyn CurveLedger>,
        states: Arc<dyn CurveStateStore>,
        parameters: Arc<dyn ParameterStore>,
    ) -> Result<Self, TreasuryError> {
        config.validate()?;
        Ok(Self {
            ledger,
            states,
            parameters,
            history: Arc::new(InMemorySegmentHistory::new()),
            hybrid_threshold: config.hybrid_threshold,
            max_commit_attempts: config.max_commit_attempts,
            deferred_account: AccountId::new(config.deferred_account.clone()),
            max_supply: config.max_supply,
        })
    }

    /// Record purchase history in `history` instead of the built-in
    /// in-memory store.
    pub fn with_history(mut self, history: Arc<dyn SegmentHistoryStore>) -> Self {
        self.history = history;
        self
    }

    pub fn deferred_account(&self) -> &AccountId {
        &self.deferred_account
    }

    // ---- purchases -----------------------------------------------------------

    /// Buy tokens for `buyer` with `deposit` micro-units of reserve currency.
    pub fn purchase(&self, buyer: &AccountId, deposit: Micro) -> Result<PurchaseResult, TreasuryError> {
        if deposit == 0 {
            return Err(CurveError::InvalidDeposit("deposit must be greater than 0".into()).into());
        }
        let params = self.load_parameters()?;
        let selector = self.selector(&params)?;

        self.ledger.transfer_reserve_in(buyer, deposit)?;
        let committed = match self.commit(|snapshot| self.resolve_purchase(&selector, snapshot, deposit)) {
            Ok(committed) => committed,
            Err(e) => {
                warn!(
                    target: "treasury",
                    "Purchase by {} rejected ({}), refunding {}",
                    buyer,
                    e,
                    deposit
                );
                self.ledger.transfer_reserve_out(buyer, deposit)?;
                return Err(e);
            }
        };

        self.settle_purchase(buyer, deposit, &committed)?;
        let result = committed.outcome;
        if let Err(e) = self.history.record_purchase(buyer, &result.segment_details) {
            warn!(
                target: "treasury",
                "Failed to record segment history for {}: {}",
                buyer,
                e
            );
        }
        info!(
            target: "treasury",
            "Purchase by {}: {} tokens for {}, {} to {}, refund {}",
            buyer,
            result.total_user_tokens,
            result.total_cost,
            result.total_deferred_allocation,
            self.deferred_account,
            result.remaining_funds
        );
        Ok(result)
    }

    /// The result `purchase` would produce right now, without committing
    /// state or touching the ledger.
    pub fn preview_purchase(&self, deposit: Micro) -> Result<PurchaseResult, TreasuryError> {
        let params = self.load_parameters()?;
        let snapshot = self.states.load_curve_state()?;
        Ok(self.selector(&params)?.resolve_optimal(&snapshot.state, deposit)?)
    }

    /// Closed-form quote for UI previews.
    pub fn preview_fast(&self, deposit: Micro) -> Result<ApproxResult, TreasuryError> {
        if deposit == 0 {
            return Err(CurveError::InvalidDeposit("deposit must be greater than 0".into()).into());
        }
        let params = self.load_parameters()?;
        let snapshot = self.states.load_curve_state()?;
        let estimator = ClosedFormEstimator::new(&params)?;
        Ok(estimator.estimate_from_state(&snapshot.state, deposit)?)
    }

    // ---- sales ---------------------------------------------------------------

    /// Sell `tokens` held by `seller` back to the reserve at the current price.
    pub fn sell(&self, seller: &AccountId, tokens: Micro) -> Result<SaleResult, TreasuryError> {
        if tokens == 0 {
            return Err(CurveError::InvalidSale("amount must be greater than 0".into()).into());
        }
        let params = self.load_parameters()?;

        self.ledger.transfer_tokens_in(seller, tokens)?;
        let committed = match self.commit(|snapshot| Ok(resolve_sale(&snapshot.state, &params, tokens)?)) {
            Ok(committed) => committed,
            Err(e) => {
                warn!(
                    target: "treasury",
                    "Sale by {} rejected ({}), returning {} tokens",
                    seller,
                    e,
                    tokens
                );
                self.ledger.transfer_tokens_out(seller, tokens)?;
                return Err(e);
            }
        };

        self.settle_sale(seller, &committed)?;
        let sale = committed.outcome;
        info!(
            target: "treasury",
            "Sale by {}: {} tokens for {} at {}",
            seller,
            sale.tokens_sold,
            sale.proceeds,
            sale.price
        );
        Ok(sale)
    }

    pub fn preview_sale(&self, tokens: Micro) -> Result<SaleResult, TreasuryError> {
        let params = self.load_parameters()?;
        let snapshot = self.states.load_curve_state()?;
        Ok(resolve_sale(&snapshot.state, &params, tokens)?)
    }

    // ---- queries -------------------------------------------------------------

    pub fn segment_info(&self) -> Result<SegmentInfo, TreasuryError> {
        let params = self.load_parameters()?;
        let snapshot = self.states.load_curve_state()?;
        Ok(segment_info(&snapshot.state, &params)?)
    }

    pub fn current_state(&self) -> Result<VersionedState, TreasuryError> {
        Ok(self.states.load_curve_state()?)
    }

    pub fn segment_history(&self, segment: SegmentIndex) -> Result<Option<SegmentHistory>, TreasuryError> {
        Ok(self.history.segment_history(segment)?)
    }

    pub fn buyer_history(&self, buyer: &AccountId) -> Result<BuyerHistory, TreasuryError> {
        Ok(self.history.buyer_history(buyer)?)
    }

    pub fn recent_purchases(&self, limit: usize) -> Result<Vec<SegmentPurchaseRecord>, TreasuryError> {
        Ok(self.history.recent_purchases(limit)?)
    }

    /// Deferred allocation distributed across all recorded purchases.
    pub fn deferred_allocation_total(&self) -> Result<Micro, TreasuryError> {
        Ok(self.history.deferred_allocation_total()?)
    }

    // ---- internals -----------------------------------------------------------

    fn load_parameters(&self) -> Result<CurveParameters, TreasuryError> {
        let params = self.parameters.load_curve_parameters()?;
        params.validate()?;
        Ok(params)
    }

    fn selector<'p>(&self, params: &'p CurveParameters) -> Result<HybridSelector<'p>, TreasuryError> {
        Ok(HybridSelector::new(params)?.with_threshold(self.hybrid_threshold))
    }

    fn resolve_purchase(
        &self,
        selector: &HybridSelector<'_>,
        snapshot: &VersionedState,
        deposit: Micro,
    ) -> Result<PurchaseResult, TreasuryError> {
        let result = selector.resolve_optimal(&snapshot.state, deposit)?;
        self.check_supply_cap(&result)?;

        let report = audit_result(&result, deposit);
        if !report.is_clean() {
            warn!(
                target: "treasury",
                "Purchase result at version {} failed audit: {:?}",
                snapshot.version,
                report.violations
            );
        }
        Ok(result)
    }

    fn commit<T, F>(&self, mut resolve: F) -> Result<Committed<T>, TreasuryError>
    where
        T: Resolution,
        F: FnMut(&VersionedState) -> Result<T, TreasuryError>,
    {
        for attempt in 1..=self.max_commit_attempts {
            let snapshot = self.states.load_curve_state()?;
            let outcome = resolve(&snapshot)?;
            if self
                .states
                .save_curve_state(snapshot.version, outcome.final_state())?
            {
                debug!(
                    target: "treasury",
                    "Committed curve state version {} at segment {}",
                    snapshot.version + 1,
                    outcome.final_state().segment
                );
                return Ok(Committed {
                    outcome,
                    version: snapshot.version + 1,
                    prior: snapshot.state,
                });
            }
            warn!(
                target: "treasury",
                "Curve state moved past version {} (attempt {}/{}), re-resolving",
                snapshot.version,
                attempt,
                self.max_commit_attempts
            );
        }
        Err(TreasuryError::CommitConflict {
            attempts: self.max_commit_attempts,
        })
    }

    fn check_supply_cap(&self, result: &PurchaseResult) -> Result<(), TreasuryError> {
        let Some(cap) = self.max_supply else {
            return Ok(());
        };
        let state = &result.final_state;
        let requested = state
            .total_supply
            .saturating_add(state.pending_deferred_allocation);
        if requested > cap {
            return Err(TreasuryError::MaxSupplyReached { cap, requested });
        }
        Ok(())
    }

    fn settle_purchase(
        &self,
        buyer: &AccountId,
        deposit: Micro,
        committed: &Committed<PurchaseResult>,
    ) -> Result<(), TreasuryError> {
        let result = &committed.outcome;
        let minted = result.total_tokens_bought;
        if minted > 0 {
            if let Err(e) = self.ledger.mint(minted) {
                return Err(self.revert_purchase(buyer, deposit, 0, committed, "mint", e));
            }
        }
        if result.total_user_tokens > 0 {
            if let Err(e) = self.ledger.transfer_tokens_out(buyer, result.total_user_tokens) {
                return Err(self.revert_purchase(buyer, deposit, minted, committed, "buyer payout", e));
            }
        }

        // The buyer holds the tokens from here on.
        if result.total_deferred_allocation > 0 {
            self.ledger
                .transfer_tokens_out(&self.deferred_account, result.total_deferred_allocation)
                .map_err(|e| self.unreverted("deferred payout", e))?;
        }
        if result.remaining_funds > 0 {
            self.ledger
                .transfer_reserve_out(buyer, result.remaining_funds)
                .map_err(|e| self.unreverted("refund", e))?;
        }
        Ok(())
    }

    fn revert_purchase(
        &self,
        buyer: &AccountId,
        deposit: Micro,
        minted: Micro,
        committed: &Committed<PurchaseResult>,
        stage: &'static str,
        source: anyhow::Error,
    ) -> TreasuryError {
        let mut reverted = true;
        if minted > 0 {
            if let Err(e) = self.ledger.burn(minted) {
                error!(target: "treasury", "Failed to burn {} unsettled tokens: {}", minted, e);
                reverted = false;
            }
        }
        if let Err(e) = self.ledger.transfer_reserve_out(buyer, deposit) {
            error!(target: "treasury", "Failed to refund {} to {}: {}", deposit, buyer, e);
            reverted = false;
        }
        reverted &= self.restore(committed);
        warn!(
            target: "treasury",
            "Purchase by {} failed at {} ({}), reverted: {}",
            buyer,
            stage,
            source,
            reverted
        );
        TreasuryError::Settlement {
            stage,
            reverted,
            source,
        }
    }

    fn settle_sale(&self, seller: &AccountId, committed: &Committed<SaleResult>) -> Result<(), TreasuryError> {
        let sale = &committed.outcome;
        if let Err(e) = self.ledger.burn(sale.tokens_sold) {
            return Err(self.revert_sale(seller, false, committed, "burn", e));
        }
        if let Err(e) = self.ledger.transfer_reserve_out(seller, sale.proceeds) {
            return Err(self.revert_sale(seller, true, committed, "proceeds", e));
        }
        Ok(())
    }

    fn revert_sale(
        &self,
        seller: &AccountId,
        burned: bool,
        committed: &Committed<SaleResult>,
        stage: &'static str,
        source: anyhow::Error,
    ) -> TreasuryError {
        let tokens = committed.outcome.tokens_sold;
        let mut reverted = true;
        if burned {
            if let Err(e) = self.ledger.mint(tokens) {
                error!(target: "treasury", "Failed to re-mint {} burned tokens: {}", tokens, e);
                reverted = false;
            }
        }
        if reverted {
            if let Err(e) = self.ledger.transfer_tokens_out(seller, tokens) {
                error!(target: "treasury", "Failed to return {} tokens to {}: {}", tokens, seller, e);
                reverted = false;
            }
        }
        reverted &= self.restore(committed);
        warn!(
            target: "treasury",
            "Sale by {} failed at {} ({}), reverted: {}",
            seller,
            stage,
            source,
            reverted
        );
        TreasuryError::Settlement {
            stage,
            reverted,
            source,
        }
    }

    /// Swap the committed snapshot back for the one it replaced.
    fn restore<T>(&self, committed: &Committed<T>) -> bool {
        match self
            .states
            .save_curve_state(committed.version, &committed.prior)
        {
            Ok(true) => true,
            Ok(false) => {
                error!(
                    target: "treasury",
                    "Curve state moved past version {} before rollback",
                    committed.version
                );
                false
            }
            Err(e) => {
                error!(target: "treasury", "Failed to roll back curve state: {}", e);
                false
            }
        }
    }

    fn unreverted(&self, stage: &'static str, source: anyhow::Error) -> TreasuryError {
        error!(
            target: "treasury",
            "Settlement failed at {} after tokens were delivered: {}",
            stage,
            source
        );
        TreasuryError::Settlement {
            stage,
            reverted: false,
            source,
        }
    }
}
