//! Curve state and parameter stores
//!
//! The canonical [`CurveState`] is versioned; a resolution may only be
//! committed over the exact snapshot it was computed from.

use anyhow::Result;
use parking_lot::RwLock;
use segcurve_economics::{CurveParameters, CurveState};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A curve snapshot and the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedState {
    pub version: u64,
    pub state: CurveState,
}

pub trait CurveStateStore: Send + Sync {
    fn load_curve_state(&self) -> Result<VersionedState>;

    /// Replace the stored state if it is still at `expected_version`.
    ///
    /// Returns `Ok(false)` without writing when another writer got there first.
    fn save_curve_state(&self, expected_version: u64, state: &CurveState) -> Result<bool>;
}

/// Source of the (rarely changing) curve configuration.
pub trait ParameterStore: Send + Sync {
    fn load_curve_parameters(&self) -> Result<CurveParameters>;
}

#[derive(Debug)]
pub struct InMemoryStateStore {
    inner: RwLock<VersionedState>,
}

impl InMemoryStateStore {
    pub fn new(state: CurveState) -> Self {
        Self {
            inner: RwLock::new(VersionedState { version: 0, state }),
        }
    }

    /// Store seeded with the pre-genesis snapshot.
    pub fn genesis(params: &CurveParameters) -> Self {
        Self::new(CurveState::genesis(params))
    }

    pub fn version(&self) -> u64 {
        self.inner.read().version
    }
}

impl CurveStateStore for InMemoryStateStore {
    fn load_curve_state(&self) -> Result<VersionedState> {
        Ok(self.inner.read().clone())
    }

    fn save_curve_state(&self, expected_version: u64, state: &CurveState) -> Result<bool> {
        let mut inner = self.inner.write();
        if inner.version != expected_version {
            debug!(
                target: "treasury",
                "Rejected curve state write at version {} (current {})",
                expected_version,
                inner.version
            );
            return Ok(false);
        }
        inner.version += 1;
        inner.state = state.clone();
        Ok(true)
    }
}

/// Parameters fixed for the lifetime of the store.
#[derive(Debug, Clone)]
pub struct StaticParameterStore {
    params: CurveParameters,
}

impl StaticParameterStore {
    pub fn new(params: CurveParameters) -> Self {
        Self { params }
    }
}

impl ParameterStore for StaticParameterStore {
    fn load_curve_parameters(&self) -> Result<CurveParameters> {
        Ok(self.params.clone())
    }
}
