//! Segmented bonding-curve purchase engine
//!
//! Prices and fills purchases of a continuously issued token against a
//! reserve currency. The curve advances in segments: price is constant within
//! a segment and steps up by `price_increment` between segments, and the
//! reserve holds `reserve_ratio × supply × price` at every segment boundary.
//! A small deferred allocation accrues on each completed segment and is
//! minted at the start of the next one.
//!
//! Tokens can also be sold back against the reserve at the current price
//! (see [`resolve_sale`]).
//!
//! The engine is pure: callers pass a [`CurveState`] snapshot and receive a
//! [`PurchaseResult`] whose `final_state` replaces it.
//!
//! Monetary unit: micro-units. 1 whole unit = 1_000_000 micro-units.

pub mod errors;
pub mod estimator;
pub mod fixed;
pub mod hybrid;
pub mod params;
pub mod resolver;
pub mod sale;
pub mod supply;
pub mod types;
pub mod verify;

pub use errors::*;
pub use estimator::{ApproxResult, ClosedFormEstimator, MAX_ESTIMATED_SEGMENTS};
pub use hybrid::{HybridSelector, DEFAULT_HYBRID_THRESHOLD, RECONCILE_SEGMENTS};
pub use params::*;
pub use resolver::{SegmentResolver, DUST_EPSILON};
pub use sale::{resolve_sale, SaleResult};
pub use supply::{segment_info, SegmentInfo};
pub use types::*;
pub use verify::*;

