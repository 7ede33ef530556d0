// 1.0: all the primitives live here. nothing in the engine works without these types.
// addresses, token amounts, fixed-point USD values, basis points, order hashes.
// each is a newtype so the compiler catches type mixups.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw token amount in the token's own smallest unit. The router, ledger and
/// adapters all speak this type; interpretation depends on the token's decimals.
pub type TokenAmount = u128;

/// USD values carry a fixed 8-decimal scale throughout the core.
pub const USD_DECIMALS: u32 = 8;
pub const USD_SCALE: u128 = 100_000_000;

pub const BPS_DENOMINATOR: u128 = 10_000;

// 1.1: account / token / pool identifier. in the simulated host an address is
// just an id, the same way on-chain addresses are opaque handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub u64);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

// 1.2: USD value at 8 decimals. all trigger math runs on these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UsdValue(pub u128);

impl UsdValue {
    pub const ZERO: UsdValue = UsdValue(0);

    pub fn from_dollars(dollars: u64) -> Self {
        Self(dollars as u128 * USD_SCALE)
    }

    pub fn raw(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn saturating_sub(&self, other: UsdValue) -> UsdValue {
        UsdValue(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for UsdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:08}", self.0 / USD_SCALE, self.0 % USD_SCALE)
    }
}

// 1.3: basis points. 100 bps = 1%. division truncates toward zero, which biases
// every derived amount conservative (under-sell / under-borrow, never over).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Bps(pub u32);

impl Bps {
    pub fn value(&self) -> u32 {
        self.0
    }

    /// `amount * bps / 10_000`, truncating.
    pub fn apply(&self, amount: u128) -> u128 {
        mul_div(amount, self.0 as u128, BPS_DENOMINATOR)
    }

    /// `amount * (10_000 - bps) / 10_000`, truncating. used for slippage haircuts.
    pub fn apply_complement(&self, amount: u128) -> u128 {
        let complement = BPS_DENOMINATOR.saturating_sub(self.0 as u128);
        mul_div(amount, complement, BPS_DENOMINATOR)
    }
}

impl fmt::Display for Bps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}bps", self.0)
    }
}

// 1.4: millisecond timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }

    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    pub fn plus_secs(&self, secs: i64) -> Self {
        Self(self.0 + secs * 1000)
    }
}

// 1.5: salt chosen by the order creator. (user, salt) uniquely identifies an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Salt(pub u64);

// 1.6: content hash identifying an order: blake3 over (user, salt, params).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderHash(pub [u8; 32]);

impl OrderHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for OrderHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// Opaque app-data commitment carried through to the settlement layer unmodified.
pub type AppDataHash = [u8; 32];

/// `a * b / denom`, truncating toward zero. Split form so intermediate products
/// stay in range for realistic magnitudes. Returns 0 for a zero denominator;
/// callers that care (LTV) handle the zero case explicitly first.
pub fn mul_div(a: u128, b: u128, denom: u128) -> u128 {
    if denom == 0 {
        return 0;
    }
    (a / denom) * b + (a % denom) * b / denom
}

/// `10^decimals` for token-unit conversions.
pub fn pow10(decimals: u32) -> u128 {
    10u128.pow(decimals)
}
