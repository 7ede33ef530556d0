// 2.0 ledger.rs: the host asset model. in-memory token balances and allowances,
// the way an ERC20 ledger looks from inside one atomic unit. every fund movement
// in the engine goes through here, so snapshotting the ledger snapshots all money.

use std::collections::HashMap;

use crate::types::{Address, TokenAmount};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("{holder} holds {available} of token {token}, needed {requested}")]
    InsufficientBalance {
        holder: Address,
        token: Address,
        available: TokenAmount,
        requested: TokenAmount,
    },

    #[error("allowance {owner} -> {spender} for token {token} is {available}, needed {requested}")]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        token: Address,
        available: TokenAmount,
        requested: TokenAmount,
    },
}

/// Token balances and allowances for every holder the engine knows about.
#[derive(Debug, Clone, Default)]
pub struct TokenLedger {
    balances: HashMap<(Address, Address), TokenAmount>,
    allowances: HashMap<(Address, Address, Address), TokenAmount>,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, holder: Address, token: Address) -> TokenAmount {
        self.balances.get(&(holder, token)).copied().unwrap_or(0)
    }

    pub fn allowance(&self, owner: Address, spender: Address, token: Address) -> TokenAmount {
        self.allowances
            .get(&(owner, spender, token))
            .copied()
            .unwrap_or(0)
    }

    // setup only: tests and the sim seed balances with this
    pub fn mint(&mut self, holder: Address, token: Address, amount: TokenAmount) {
        *self.balances.entry((holder, token)).or_insert(0) += amount;
    }

    pub fn approve(&mut self, owner: Address, spender: Address, token: Address, amount: TokenAmount) {
        self.allowances.insert((owner, spender, token), amount);
    }

    pub fn transfer(
        &mut self,
        from: Address,
        to: Address,
        token: Address,
        amount: TokenAmount,
    ) -> Result<(), LedgerError> {
        if amount == 0 {
            return Ok(());
        }
        let available = self.balance_of(from, token);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                holder: from,
                token,
                available,
                requested: amount,
            });
        }
        *self.balances.entry((from, token)).or_insert(0) -= amount;
        *self.balances.entry((to, token)).or_insert(0) += amount;
        Ok(())
    }

    /// Spend `spender`'s allowance to move `owner`'s tokens. Allowance is
    /// consumed even when spender == owner would make it redundant, keeping the
    /// accounting uniform.
    pub fn transfer_from(
        &mut self,
        spender: Address,
        owner: Address,
        to: Address,
        token: Address,
        amount: TokenAmount,
    ) -> Result<(), LedgerError> {
        if amount == 0 {
            return Ok(());
        }
        let allowed = self.allowance(owner, spender, token);
        if allowed < amount {
            return Err(LedgerError::InsufficientAllowance {
                owner,
                spender,
                token,
                available: allowed,
                requested: amount,
            });
        }
        self.transfer(owner, to, token, amount)?;
        self.allowances
            .insert((owner, spender, token), allowed - amount);
        Ok(())
    }
}
