//! Ledger interface for applying purchase and sale results
//!
//! The curve module owns a reserve account (currency paid in by buyers) and
//! an issuance account (tokens minted but not yet handed out). A purchase
//! moves the deposit in, mints the tokens it bought, hands them out and
//! refunds whatever the resolution did not consume. A sale pulls tokens into
//! the issuance account, burns them and pays reserve currency out.

use anyhow::{anyhow, Result};
use parking_lot::{Mutex, RwLock};
use segcurve_economics::Micro;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Ledger account identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Ledger primitives purchases and sales need.
pub trait CurveLedger: Send + Sync {
    /// Mint `amount` tokens into the module's issuance account.
    fn mint(&self, amount: Micro) -> Result<()>;

    /// Destroy `amount` tokens held by the issuance account.
    fn burn(&self, amount: Micro) -> Result<()>;

    /// Move reserve currency from `payer` into the module's reserve.
    fn transfer_reserve_in(&self, payer: &AccountId, amount: Micro) -> Result<()>;

    /// Hand minted tokens from the issuance account to `recipient`.
    fn transfer_tokens_out(&self, recipient: &AccountId, amount: Micro) -> Result<()>;

    /// Move tokens from `holder` into the issuance account.
    fn transfer_tokens_in(&self, holder: &AccountId, amount: Micro) -> Result<()>;

    /// Return reserve currency from the module's reserve to `recipient`.
    fn transfer_reserve_out(&self, recipient: &AccountId, amount: Micro) -> Result<()>;
}

// -----------------------------------------------------------------------------
// In-memory implementation (for embedding and testing)
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub reserve_balances: HashMap<AccountId, Micro>,
    pub token_balances: HashMap<AccountId, Micro>,
    /// Reserve currency held by the curve module
    pub module_reserve: Micro,
    /// Minted tokens not yet handed out
    pub unallocated_tokens: Micro,
    /// Tokens minted net of burns
    pub total_minted: Micro,
}

#[derive(Debug, Default)]
pub struct InMemoryCurveLedger {
    inner: RwLock<LedgerSnapshot>,
}

impl InMemoryCurveLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give `account` reserve currency to spend.
    pub fn fund_reserve(&self, account: &AccountId, amount: Micro) {
        let mut inner = self.inner.write();
        let balance = inner.reserve_balances.entry(account.clone()).or_default();
        *balance = balance.saturating_add(amount);
    }

    pub fn reserve_balance(&self, account: &AccountId) -> Micro {
        self.inner
            .read()
            .reserve_balances
            .get(account)
            .copied()
            .unwrap_or(0)
    }

    pub fn token_balance(&self, account: &AccountId) -> Micro {
        self.inner
            .read()
            .token_balances
            .get(account)
            .copied()
            .unwrap_or(0)
    }

    pub fn module_reserve(&self) -> Micro {
        self.inner.read().module_reserve
    }

    pub fn unallocated_tokens(&self) -> Micro {
        self.inner.read().unallocated_tokens
    }

    pub fn total_minted(&self) -> Micro {
        self.inner.read().total_minted
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.inner.read().clone()
    }
}

impl CurveLedger for InMemoryCurveLedger {
    fn mint(&self, amount: Micro) -> Result<()> {
        let mut inner = self.inner.write();
        inner.unallocated_tokens = inner
            .unallocated_tokens
            .checked_add(amount)
            .ok_or_else(|| anyhow!("Issuance account overflow"))?;
        inner.total_minted = inner.total_minted.saturating_add(amount);
        Ok(())
    }

    fn burn(&self, amount: Micro) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.unallocated_tokens < amount {
            return Err(anyhow!(
                "Issuance account holds {} tokens, cannot burn {amount}",
                inner.unallocated_tokens
            ));
        }
        inner.unallocated_tokens -= amount;
        inner.total_minted = inner.total_minted.saturating_sub(amount);
        Ok(())
    }

    fn transfer_reserve_in(&self, payer: &AccountId, amount: Micro) -> Result<()> {
        let mut inner = self.inner.write();
        let balance = inner.reserve_balances.get(payer).copied().unwrap_or(0);
        if balance < amount {
            return Err(anyhow!(
                "Insufficient reserve balance for {payer}: {balance} < {amount}"
            ));
        }
        inner.reserve_balances.insert(payer.clone(), balance - amount);
        inner.module_reserve = inner.module_reserve.saturating_add(amount);
        Ok(())
    }

    fn transfer_tokens_out(&self, recipient: &AccountId, amount: Micro) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.unallocated_tokens < amount {
            return Err(anyhow!(
                "Issuance account holds {} tokens, cannot send {amount}",
                inner.unallocated_tokens
            ));
        }
        inner.unallocated_tokens -= amount;
        let balance = inner.token_balances.entry(recipient.clone()).or_default();
        *balance = balance.saturating_add(amount);
        Ok(())
    }

    fn transfer_tokens_in(&self, holder: &AccountId, amount: Micro) -> Result<()> {
        let mut inner = self.inner.write();
        let balance = inner.token_balances.get(holder).copied().unwrap_or(0);
        if balance < amount {
            return Err(anyhow!(
                "Insufficient token balance for {holder}: {balance} < {amount}"
            ));
        }
        inner.token_balances.insert(holder.clone(), balance - amount);
        inner.unallocated_tokens = inner.unallocated_tokens.saturating_add(amount);
        Ok(())
    }

    fn transfer_reserve_out(&self, recipient: &AccountId, amount: Micro) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.module_reserve < amount {
            return Err(anyhow!(
                "Module reserve holds {}, cannot return {amount}",
                inner.module_reserve
            ));
        }
        inner.module_reserve -= amount;
        let balance = inner.reserve_balances.entry(recipient.clone()).or_default();
        *balance = balance.saturating_add(amount);
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Mock ledger (records calls, optional failure injection)
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCall {
    Mint(Micro),
    Burn(Micro),
    ReserveIn(AccountId, Micro),
    TokensOut(AccountId, Micro),
    TokensIn(AccountId, Micro),
    ReserveOut(AccountId, Micro),
}

#[derive(Debug, Default)]
pub struct MockCurveLedger {
    calls: Mutex<Vec<LedgerCall>>,
    reject_reserve_in: bool,
}

impl MockCurveLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A ledger whose payers never have enough reserve currency.
    pub fn rejecting_deposits() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            reject_reserve_in: true,
        }
    }

    pub fn calls(&self) -> Vec<LedgerCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }
}

impl CurveLedger for MockCurveLedger {
    fn mint(&self, amount: Micro) -> Result<()> {
        self.calls.lock().push(LedgerCall::Mint(amount));
        Ok(())
    }

    fn burn(&self, amount: Micro) -> Result<()> {
        self.calls.lock().push(LedgerCall::Burn(amount));
        Ok(())
    }

    fn transfer_reserve_in(&self, payer: &AccountId, amount: Micro) -> Result<()> {
        if self.reject_reserve_in {
            return Err(anyhow!("Insufficient reserve balance for {payer}"));
        }
        self.calls
            .lock()
            .push(LedgerCall::ReserveIn(payer.clone(), amount));
        Ok(())
    }

    fn transfer_tokens_out(&self, recipient: &AccountId, amount: Micro) -> Result<()> {
        self.calls
            .lock()
            .push(LedgerCall::TokensOut(recipient.clone(), amount));
        Ok(())
    }

    fn transfer_tokens_in(&self, holder: &AccountId, amount: Micro) -> Result<()> {
        self.calls
            .lock()
            .push(LedgerCall::TokensIn(holder.clone(), amount));
        Ok(())
    }

    fn transfer_reserve_out(&self, recipient: &AccountId, amount: Micro) -> Result<()> {
        self.calls
            .lock()
            .push(LedgerCall::ReserveOut(recipient.clone(), amount));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_ledger_flow() {
        let ledger = InMemoryCurveLedger::new();
        let buyer = AccountId::new("@buyer.seg");
        ledger.fund_reserve(&buyer, 5_000);

        ledger.transfer_reserve_in(&buyer, 2_000).unwrap();
        ledger.mint(700).unwrap();
        ledger.transfer_tokens_out(&buyer, 700).unwrap();
        ledger.transfer_reserve_out(&buyer, 500).unwrap();

        assert_eq!(ledger.reserve_balance(&buyer), 3_500);
        assert_eq!(ledger.token_balance(&buyer), 700);
        assert_eq!(ledger.module_reserve(), 1_500);
        assert_eq!(ledger.unallocated_tokens(), 0);
        assert_eq!(ledger.total_minted(), 700);
    }

    #[test]
    fn test_tokens_in_and_burn() {
        let ledger = InMemoryCurveLedger::new();
        let seller = AccountId::new("@seller.seg");
        ledger.mint(1_000).unwrap();
        ledger.transfer_tokens_out(&seller, 1_000).unwrap();

        ledger.transfer_tokens_in(&seller, 400).unwrap();
        ledger.burn(400).unwrap();

        assert_eq!(ledger.token_balance(&seller), 600);
        assert_eq!(ledger.unallocated_tokens(), 0);
        assert_eq!(ledger.total_minted(), 600);
        assert!(ledger.transfer_tokens_in(&seller, 601).is_err());
        assert!(ledger.burn(1).is_err());
    }

    #[test]
    fn test_insufficient_balances() {
        let ledger = InMemoryCurveLedger::new();
        let buyer = AccountId::new("@buyer.seg");
        ledger.fund_reserve(&buyer, 1_000);

        assert!(ledger.transfer_reserve_in(&buyer, 1_500).is_err());
        assert_eq!(ledger.reserve_balance(&buyer), 1_000);
        assert!(ledger.transfer_tokens_out(&buyer, 1).is_err());
        assert!(ledger.transfer_reserve_out(&buyer, 1).is_err());
    }

    #[test]
    fn test_mock_ledger_calls() {
        let mock = MockCurveLedger::new();
        let buyer = AccountId::from("@mock.seg");

        mock.transfer_reserve_in(&buyer, 1_000).unwrap();
        mock.mint(300).unwrap();

        assert_eq!(
            mock.calls(),
            vec![
                LedgerCall::ReserveIn(buyer.clone(), 1_000),
                LedgerCall::Mint(300)
            ]
        );
        mock.clear_calls();
        assert!(mock.calls().is_empty());

        let rejecting = MockCurveLedger::rejecting_deposits();
        assert!(rejecting.transfer_reserve_in(&buyer, 1).is_err());
    }
}
