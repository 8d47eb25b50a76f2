//! Bonding-Curve Treasury
//!
//! Connects the segmented bonding-curve engine to its collaborators: the
//! ledger that moves reserve currency and tokens, the store that holds the
//! canonical curve snapshot, the source of curve parameters, and the segment
//! purchase history.

pub mod config;
pub mod errors;
pub mod history;
pub mod ledger;
pub mod service;
pub mod store;

pub use config::TreasuryConfig;
pub use errors::TreasuryError;
pub use history::{
    BuyerHistory, InMemorySegmentHistory, SegmentHistory, SegmentHistoryStore,
    SegmentPurchaseRecord,
};
pub use ledger::{AccountId, CurveLedger, InMemoryCurveLedger, LedgerCall, MockCurveLedger};
pub use service::PurchaseService;
pub use store::{
    CurveStateStore, InMemoryStateStore, ParameterStore, StaticParameterStore, VersionedState,
};
