//! Segment purchase history
//!
//! Every committed purchase is recorded segment by segment, indexed both by
//! segment and by buyer, with running totals and a running total of the
//! deferred allocation distributed so far.

use crate::ledger::AccountId;
use anyhow::Result;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use segcurve_economics::{Micro, SegmentIndex, SegmentRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// One buyer's share of one segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentPurchaseRecord {
    /// Commit-order id, shared by every record of the same purchase
    pub purchase_id: u64,
    pub segment_number: SegmentIndex,
    pub buyer: AccountId,
    /// User tokens plus distributed allocation
    pub tokens_bought: Micro,
    pub user_tokens: Micro,
    pub deferred_allocation: Micro,
    pub price: Decimal,
    pub cost: Micro,
    pub is_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentHistory {
    pub segment_number: SegmentIndex,
    pub purchases: Vec<SegmentPurchaseRecord>,
    pub total_tokens_sold: Micro,
    pub total_deferred_allocation: Micro,
    pub total_revenue: Micro,
    pub is_complete: bool,
    /// Purchase that completed the segment
    pub completed_by: Option<u64>,
}

impl SegmentHistory {
    fn new(segment_number: SegmentIndex) -> Self {
        Self {
            segment_number,
            purchases: Vec::new(),
            total_tokens_sold: 0,
            total_deferred_allocation: 0,
            total_revenue: 0,
            is_complete: false,
            completed_by: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyerHistory {
    pub buyer: AccountId,
    pub purchases: Vec<SegmentPurchaseRecord>,
    pub total_tokens_bought: Micro,
    pub total_spent: Micro,
}

impl BuyerHistory {
    fn new(buyer: AccountId) -> Self {
        Self {
            buyer,
            purchases: Vec::new(),
            total_tokens_bought: 0,
            total_spent: 0,
        }
    }
}

pub trait SegmentHistoryStore: Send + Sync {
    /// Record one committed purchase; returns its purchase id.
    fn record_purchase(&self, buyer: &AccountId, records: &[SegmentRecord]) -> Result<u64>;

    fn segment_history(&self, segment: SegmentIndex) -> Result<Option<SegmentHistory>>;

    /// Empty history for buyers that never purchased.
    fn buyer_history(&self, buyer: &AccountId) -> Result<BuyerHistory>;

    /// Most recent records first.
    fn recent_purchases(&self, limit: usize) -> Result<Vec<SegmentPurchaseRecord>>;

    fn deferred_allocation_total(&self) -> Result<Micro>;
}

#[derive(Debug, Default)]
struct HistoryInner {
    next_purchase_id: u64,
    segments: BTreeMap<SegmentIndex, SegmentHistory>,
    buyers: HashMap<AccountId, BuyerHistory>,
    log: Vec<SegmentPurchaseRecord>,
    deferred_allocation_total: Micro,
}

#[derive(Debug, Default)]
pub struct InMemorySegmentHistory {
    inner: RwLock<HistoryInner>,
}

impl InMemorySegmentHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SegmentHistoryStore for InMemorySegmentHistory {
    fn record_purchase(&self, buyer: &AccountId, records: &[SegmentRecord]) -> Result<u64> {
        let mut inner = self.inner.write();
        let purchase_id = inner.next_purchase_id;
        inner.next_purchase_id += 1;

        for detail in records {
            let record = SegmentPurchaseRecord {
                purchase_id,
                segment_number: detail.segment_number,
                buyer: buyer.clone(),
                tokens_bought: detail.tokens_bought,
                user_tokens: detail.user_tokens,
                deferred_allocation: detail.deferred_allocation_distributed,
                price: detail.price_at_segment,
                cost: detail.cost,
                is_complete: detail.is_complete,
            };

            let segment = inner
                .segments
                .entry(record.segment_number)
                .or_insert_with(|| SegmentHistory::new(record.segment_number));
            segment.total_tokens_sold = segment.total_tokens_sold.saturating_add(record.tokens_bought);
            segment.total_deferred_allocation = segment
                .total_deferred_allocation
                .saturating_add(record.deferred_allocation);
            segment.total_revenue = segment.total_revenue.saturating_add(record.cost);
            if record.is_complete && !segment.is_complete {
                segment.is_complete = true;
                segment.completed_by = Some(purchase_id);
            }
            segment.purchases.push(record.clone());

            let history = inner
                .buyers
                .entry(buyer.clone())
                .or_insert_with(|| BuyerHistory::new(buyer.clone()));
            history.total_tokens_bought = history.total_tokens_bought.saturating_add(record.user_tokens);
            history.total_spent = history.total_spent.saturating_add(record.cost);
            history.purchases.push(record.clone());

            inner.deferred_allocation_total = inner
                .deferred_allocation_total
                .saturating_add(record.deferred_allocation);
            inner.log.push(record);
        }
        Ok(purchase_id)
    }

    fn segment_history(&self, segment: SegmentIndex) -> Result<Option<SegmentHistory>> {
        Ok(self.inner.read().segments.get(&segment).cloned())
    }

    fn buyer_history(&self, buyer: &AccountId) -> Result<BuyerHistory> {
        Ok(self
            .inner
            .read()
            .buyers
            .get(buyer)
            .cloned()
            .unwrap_or_else(|| BuyerHistory::new(buyer.clone())))
    }

    fn recent_purchases(&self, limit: usize) -> Result<Vec<SegmentPurchaseRecord>> {
        Ok(self
            .inner
            .read()
            .log
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    fn deferred_allocation_total(&self) -> Result<Micro> {
        Ok(self.inner.read().deferred_allocation_total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use segcurve_economics::{CurveParameters, CurveState, SegmentResolver};

    #[test]
    fn test_records_by_segment_and_buyer() {
        let params = CurveParameters::default();
        let resolver = SegmentResolver::new(&params).unwrap();
        let history = InMemorySegmentHistory::new();
        let alice = AccountId::new("@alice.seg");
        let bob = AccountId::new("@bob.seg");

        let genesis = resolver
            .resolve(&CurveState::genesis(&params), 1_000_500)
            .unwrap();
        assert_eq!(history.record_purchase(&alice, &genesis.segment_details).unwrap(), 0);
        let second = resolver.resolve(&genesis.final_state, 700).unwrap();
        assert_eq!(history.record_purchase(&bob, &second.segment_details).unwrap(), 1);

        let segment = history.segment_history(1).unwrap().unwrap();
        assert_eq!(segment.purchases.len(), 2);
        assert_eq!(segment.total_revenue, 500 + second.segment_details[0].cost);
        assert!(segment.is_complete);
        assert_eq!(segment.completed_by, Some(1));
        assert_eq!(history.segment_history(0).unwrap().unwrap().completed_by, Some(0));
        assert!(history.segment_history(9).unwrap().is_none());

        let alice_history = history.buyer_history(&alice).unwrap();
        assert_eq!(alice_history.total_spent, 1_000_500);
        assert_eq!(alice_history.total_tokens_bought, genesis.total_user_tokens);
        assert!(history
            .buyer_history(&AccountId::new("@nobody.seg"))
            .unwrap()
            .purchases
            .is_empty());

        let recent = history.recent_purchases(1).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].buyer, bob);
        assert_eq!(
            history.deferred_allocation_total().unwrap(),
            second.total_deferred_allocation
        );
    }
}
