use crate::types::Micro;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CurveError {
    #[error("invalid deposit: {0}")]
    InvalidDeposit(String),
    #[error("invalid curve parameter {param}={value}: {reason}")]
    InvalidParameter {
        param: &'static str,
        value: String,
        reason: &'static str,
    },
    #[error("invalid curve state: {0}")]
    InvalidState(String),
    #[error("arithmetic overflow: {0}")]
    ArithmeticOverflow(&'static str),
    #[error("closed-form estimation failed: {0}")]
    EstimationFailed(String),
    #[error("invalid sale: {0}")]
    InvalidSale(String),
    #[error("cannot redeem {requested} tokens, supply is {available}")]
    InsufficientSupply { available: Micro, requested: Micro },
    #[error("reserve holds {available}, sale needs {requested}")]
    InsufficientReserve { available: Micro, requested: Micro },
}
