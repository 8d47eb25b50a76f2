use segcurve_economics::{CurveError, Micro};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TreasuryError {
    #[error(transparent)]
    Curve(#[from] CurveError),
    #[error("collaborator failure: {0}")]
    Collaborator(#[from] anyhow::Error),
    #[error("curve state changed underneath {attempts} commit attempts")]
    CommitConflict { attempts: u32 },
    #[error("supply cap {cap} exceeded: purchase would bring supply to {requested}")]
    MaxSupplyReached { cap: Micro, requested: Micro },
    #[error("settlement failed at {stage} (reverted: {reverted}): {source}")]
    Settlement {
        stage: &'static str,
        reverted: bool,
        source: anyhow::Error,
    },
    #[error("configuration error: {0}")]
    Config(String),
}

impl TreasuryError {
    /// Whether retrying the same purchase later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TreasuryError::CommitConflict { .. })
    }
}
