// 9.0 flash.rs: flash lenders (mocked). a flash loan is atomic by construction
// here: the borrowed amount lands on the tape at the start of the wrapped range
// and the router verifies principal + fee is back in the holding area before
// the range ends. this module supplies the lender seam and quotes the fee; the
// borrow/verify/repay sequencing lives in the router where the scope is.

use std::collections::HashMap;
use std::fmt;

use crate::types::{Address, Bps, TokenAmount};

/// One flash-loan capital source.
pub trait FlashLender: fmt::Debug {
    /// Pool the principal is drawn from and repaid to.
    fn pool_address(&self) -> Address;

    /// Fee owed on top of the principal, truncating.
    fn fee_for(&self, amount: TokenAmount) -> TokenAmount;

    fn clone_box(&self) -> Box<dyn FlashLender>;
}

impl Clone for Box<dyn FlashLender> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Fee-in-bps lender over a funded pool address.
#[derive(Debug, Clone)]
pub struct MockFlashLender {
    pool: Address,
    fee: Bps,
}

impl MockFlashLender {
    pub fn new(pool: Address, fee: Bps) -> Self {
        Self { pool, fee }
    }
}

impl FlashLender for MockFlashLender {
    fn pool_address(&self) -> Address {
        self.pool
    }

    fn fee_for(&self, amount: TokenAmount) -> TokenAmount {
        self.fee.apply(amount)
    }

    fn clone_box(&self) -> Box<dyn FlashLender> {
        Box::new(self.clone())
    }
}

/// Lenders known to the engine, keyed by the id instructions name them with.
#[derive(Debug, Clone, Default)]
pub struct LenderRegistry {
    lenders: HashMap<Address, Box<dyn FlashLender>>,
}

impl LenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: Address, lender: Box<dyn FlashLender>) {
        self.lenders.insert(id, lender);
    }

    pub fn get(&self, id: Address) -> Option<&dyn FlashLender> {
        self.lenders.get(&id).map(|l| l.as_ref())
    }
}
