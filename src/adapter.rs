// 6.0 adapter.rs: the protocol adapter seam. the core never assumes more of a
// lending backend than this trait surface: deposit, withdraw, borrow, repay,
// swap, and the balance/position views. one implementation per backend, looked
// up by name in the registry at dispatch time.
//
// mutating operations take the ledger so adapters move real funds; operations
// that must price a position also take the oracle. funds always flow between
// the caller (the router's holding area) and the adapter's pool address, with
// deposits and repayments pulled via allowance (the Approve instruction).

use std::collections::HashMap;
use std::fmt;

use crate::ledger::{LedgerError, TokenLedger};
use crate::oracle::{OracleError, PriceOracle};
use crate::types::{Address, TokenAmount, UsdValue};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    #[error("collateral balance {available} below requested {requested}")]
    InsufficientCollateral {
        available: TokenAmount,
        requested: TokenAmount,
    },

    #[error("pool {pool} holds {available}, requested {requested}")]
    InsufficientLiquidity {
        pool: Address,
        available: TokenAmount,
        requested: TokenAmount,
    },

    #[error("token {0} is not listed on this backend")]
    UnsupportedToken(Address),

    #[error("operation would move position to {ltv_bps}bps LTV, backend cap is {max_ltv_bps}bps")]
    LtvBreach { ltv_bps: u32, max_ltv_bps: u32 },

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Capability surface of one lending backend.
pub trait LendingAdapter: fmt::Debug {
    fn name(&self) -> &str;

    /// Address funds flow through; `Approve` targets this.
    fn pool_address(&self) -> Address;

    /// Supply `token`. The mock treats plain deposits and collateral deposits
    /// identically; real backends distinguish them, so both entry points exist.
    fn deposit(
        &mut self,
        ledger: &mut TokenLedger,
        caller: Address,
        token: Address,
        amount: TokenAmount,
        on_behalf_of: Address,
    ) -> Result<(), AdapterError>;

    fn deposit_collateral(
        &mut self,
        ledger: &mut TokenLedger,
        caller: Address,
        token: Address,
        amount: TokenAmount,
        on_behalf_of: Address,
    ) -> Result<(), AdapterError>;

    /// Returns the amount actually withdrawn.
    fn withdraw_collateral(
        &mut self,
        ledger: &mut TokenLedger,
        oracle: &dyn PriceOracle,
        caller: Address,
        token: Address,
        amount: TokenAmount,
        on_behalf_of: Address,
    ) -> Result<TokenAmount, AdapterError>;

    /// Returns the amount borrowed.
    fn borrow(
        &mut self,
        ledger: &mut TokenLedger,
        oracle: &dyn PriceOracle,
        caller: Address,
        token: Address,
        amount: TokenAmount,
        on_behalf_of: Address,
    ) -> Result<TokenAmount, AdapterError>;

    /// Returns the amount actually used; caps at the outstanding debt.
    fn repay(
        &mut self,
        ledger: &mut TokenLedger,
        caller: Address,
        token: Address,
        amount: TokenAmount,
        on_behalf_of: Address,
    ) -> Result<TokenAmount, AdapterError>;

    /// Sell `amount_in` of `token_in` for `token_out`; returns the amount out.
    fn swap(
        &mut self,
        ledger: &mut TokenLedger,
        oracle: &dyn PriceOracle,
        caller: Address,
        token_in: Address,
        token_out: Address,
        amount_in: TokenAmount,
        context: &[u8],
    ) -> Result<TokenAmount, AdapterError>;

    /// Buy exactly `amount_out` of `token_out`; returns the `token_in` used.
    fn swap_exact_out(
        &mut self,
        ledger: &mut TokenLedger,
        oracle: &dyn PriceOracle,
        caller: Address,
        token_in: Address,
        token_out: Address,
        amount_out: TokenAmount,
        context: &[u8],
    ) -> Result<TokenAmount, AdapterError>;

    // views
    fn balance_of(&self, token: Address, account: Address) -> TokenAmount;

    fn borrow_balance_of(&self, token: Address, account: Address) -> TokenAmount;

    /// `(collateral_usd, debt_usd)` at 8 decimals for the account's position.
    fn position_value(
        &self,
        oracle: &dyn PriceOracle,
        account: Address,
        context: &[u8],
    ) -> Result<(UsdValue, UsdValue), AdapterError>;

    fn clone_box(&self) -> Box<dyn LendingAdapter>;
}

impl Clone for Box<dyn LendingAdapter> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Maps a protocol name to its adapter. Populated at configuration time; the
/// router only ever dispatches through `get`/`get_mut`.
#[derive(Debug, Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Box<dyn LendingAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Box<dyn LendingAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, protocol: &str) -> Option<&dyn LendingAdapter> {
        self.adapters.get(protocol).map(|a| a.as_ref())
    }

    pub fn get_mut(&mut self, protocol: &str) -> Option<&mut Box<dyn LendingAdapter>> {
        self.adapters.get_mut(protocol)
    }

    pub fn contains(&self, protocol: &str) -> bool {
        self.adapters.contains_key(protocol)
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
