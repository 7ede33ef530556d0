// 4.0 oracle.rs: price view. the core is agnostic to where prices come from;
// it only ever asks "what is one whole token worth in 8-decimal USD". human
// quotes enter as Decimal and are fixed-pointed at this boundary; everything
// past it is integer math.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt;

use crate::types::{mul_div, pow10, Address, TokenAmount, UsdValue, USD_SCALE};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error("no price for token {0}")]
    PriceUnavailable(Address),
}

/// Price source the engine queries. One whole token -> USD at 8 decimals.
pub trait PriceOracle: fmt::Debug {
    fn usd_price(&self, token: Address) -> Result<UsdValue, OracleError>;

    fn clone_box(&self) -> Box<dyn PriceOracle>;
}

impl Clone for Box<dyn PriceOracle> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Convert a USD value into token units at the given price, truncating.
pub fn usd_to_token_amount(usd: UsdValue, price: UsdValue, decimals: u32) -> TokenAmount {
    if price.is_zero() {
        return 0;
    }
    mul_div(usd.raw(), pow10(decimals), price.raw())
}

/// Convert a token amount into 8-decimal USD at the given price, truncating.
pub fn token_amount_to_usd(amount: TokenAmount, price: UsdValue, decimals: u32) -> UsdValue {
    UsdValue(mul_div(amount, price.raw(), pow10(decimals)))
}

/// In-memory oracle for tests and the sim. Prices are set directly, either as
/// raw 8-decimal values or as Decimal dollar quotes.
#[derive(Debug, Clone, Default)]
pub struct MockPriceOracle {
    prices: HashMap<Address, UsdValue>,
}

impl MockPriceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&mut self, token: Address, price: UsdValue) {
        self.prices.insert(token, price);
    }

    /// Set a price from a human Decimal quote, e.g. `dec!(2000.50)` per token.
    /// Truncates below the 8th decimal.
    pub fn set_quote(&mut self, token: Address, dollars: Decimal) {
        let scaled = (dollars * Decimal::from(USD_SCALE)).trunc();
        let raw = scaled.to_u128().unwrap_or(0);
        self.prices.insert(token, UsdValue(raw));
    }
}

impl PriceOracle for MockPriceOracle {
    fn usd_price(&self, token: Address) -> Result<UsdValue, OracleError> {
        self.prices
            .get(&token)
            .copied()
            .ok_or(OracleError::PriceUnavailable(token))
    }

    fn clone_box(&self) -> Box<dyn PriceOracle> {
        Box::new(self.clone())
    }
}
