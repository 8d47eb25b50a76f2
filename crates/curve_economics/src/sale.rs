//! Sell-back against the reserve
//!
//! Tokens are redeemed at the current segment price and burned. The curve
//! does not move: segment and price stay where purchases left them, and only
//! supply and reserve shrink.

use crate::errors::CurveError;
use crate::fixed;
use crate::params::CurveParameters;
use crate::types::{CurveState, Micro};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Outcome of one sale; `final_state` replaces the caller's snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleResult {
    pub tokens_sold: Micro,
    /// Reserve currency paid out, `tokens × price` truncated
    pub proceeds: Micro,
    pub price: Decimal,
    pub final_state: CurveState,
}

/// Redeem `tokens` micro-tokens against `state`.
pub fn resolve_sale(
    state: &CurveState,
    params: &CurveParameters,
    tokens: Micro,
) -> Result<SaleResult, CurveError> {
    params.validate()?;
    state.validate()?;
    if tokens == 0 {
        return Err(CurveError::InvalidSale("amount must be greater than 0".into()));
    }
    if tokens > state.total_supply {
        return Err(CurveError::InsufficientSupply {
            available: state.total_supply,
            requested: tokens,
        });
    }

    let proceeds = fixed::mul_price(tokens, state.price)?;
    if proceeds == 0 {
        return Err(CurveError::InvalidSale(format!(
            "{tokens} micro-tokens redeem for less than one micro-unit at {}",
            state.price
        )));
    }
    if proceeds > state.reserve_balance {
        return Err(CurveError::InsufficientReserve {
            available: state.reserve_balance,
            requested: proceeds,
        });
    }

    let mut final_state = state.clone();
    final_state.total_supply -= tokens;
    final_state.reserve_balance -= proceeds;
    final_state.segment_minted = final_state.segment_minted.min(final_state.total_supply);

    info!(
        "Sold {} tokens at {} in segment {}: {} paid from reserve",
        tokens, state.price, state.segment, proceeds
    );
    Ok(SaleResult {
        tokens_sold: tokens,
        proceeds,
        price: state.price,
        final_state,
    })
}
