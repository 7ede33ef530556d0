// 5.0 backend.rs: MOCKED lending backend. per-account collateral and debt books
// plus an oracle-priced swap venue, all behind the LendingAdapter trait. real
// backend accounting (interest accrual, reserve factors) is out of scope; the
// mock only honors the declared operation contract.

use std::collections::HashMap;

use crate::adapter::{AdapterError, LendingAdapter};
use crate::ledger::TokenLedger;
use crate::oracle::{token_amount_to_usd, usd_to_token_amount, PriceOracle};
use crate::types::{mul_div, Address, Bps, TokenAmount, UsdValue, BPS_DENOMINATOR};

#[derive(Debug, Clone)]
pub struct MockLendingBackend {
    name: String,
    pool: Address,
    max_ltv: Bps,
    swap_spread: Bps,
    // listed tokens and their decimals; anything else is UnsupportedToken
    decimals: HashMap<Address, u32>,
    collateral: HashMap<(Address, Address), TokenAmount>,
    debt: HashMap<(Address, Address), TokenAmount>,
}

impl MockLendingBackend {
    pub fn new(name: impl Into<String>, pool: Address) -> Self {
        Self {
            name: name.into(),
            pool,
            max_ltv: Bps(8_000),
            swap_spread: Bps(0),
            decimals: HashMap::new(),
            collateral: HashMap::new(),
            debt: HashMap::new(),
        }
    }

    pub fn with_max_ltv(mut self, max_ltv: Bps) -> Self {
        self.max_ltv = max_ltv;
        self
    }

    pub fn with_swap_spread(mut self, spread: Bps) -> Self {
        self.swap_spread = spread;
        self
    }

    pub fn list_token(mut self, token: Address, decimals: u32) -> Self {
        self.decimals.insert(token, decimals);
        self
    }

    /// Install a pre-existing position directly in the books, bypassing the
    /// pool ledger. Scenario setup only.
    pub fn seed_position(
        &mut self,
        account: Address,
        collateral_token: Address,
        collateral: TokenAmount,
        debt_token: Address,
        debt: TokenAmount,
    ) {
        *self
            .collateral
            .entry((account, collateral_token))
            .or_default() += collateral;
        *self.debt.entry((account, debt_token)).or_default() += debt;
    }

    /// Shrink a position directly in the books, saturating at zero.
    pub fn reduce_position(
        &mut self,
        account: Address,
        collateral_token: Address,
        collateral: TokenAmount,
        debt_token: Address,
        debt: TokenAmount,
    ) {
        let c = self
            .collateral
            .entry((account, collateral_token))
            .or_default();
        *c = c.saturating_sub(collateral);
        let d = self.debt.entry((account, debt_token)).or_default();
        *d = d.saturating_sub(debt);
    }

    fn token_decimals(&self, token: Address) -> Result<u32, AdapterError> {
        self.decimals
            .get(&token)
            .copied()
            .ok_or(AdapterError::UnsupportedToken(token))
    }

    fn valued(
        &self,
        oracle: &dyn PriceOracle,
        book: &HashMap<(Address, Address), TokenAmount>,
        account: Address,
    ) -> Result<UsdValue, AdapterError> {
        let mut total = 0u128;
        for (&(holder, token), &amount) in book {
            if holder != account || amount == 0 {
                continue;
            }
            let price = oracle.usd_price(token)?;
            let decimals = self.token_decimals(token)?;
            total += token_amount_to_usd(amount, price, decimals).raw();
        }
        Ok(UsdValue(total))
    }

    /// Reject a borrow/withdraw whose post-state LTV would exceed the cap.
    /// Checked against prospective values so a rejected call mutates nothing.
    fn ensure_healthy(
        &self,
        collateral_usd: UsdValue,
        debt_usd: UsdValue,
    ) -> Result<(), AdapterError> {
        if debt_usd.is_zero() {
            return Ok(());
        }
        if collateral_usd.is_zero() {
            return Err(AdapterError::LtvBreach {
                ltv_bps: u32::MAX,
                max_ltv_bps: self.max_ltv.value(),
            });
        }
        let ltv_bps =
            mul_div(debt_usd.raw(), BPS_DENOMINATOR, collateral_usd.raw()).min(u32::MAX as u128) as u32;
        if ltv_bps > self.max_ltv.value() {
            return Err(AdapterError::LtvBreach {
                ltv_bps,
                max_ltv_bps: self.max_ltv.value(),
            });
        }
        Ok(())
    }

    fn pool_liquidity_check(
        &self,
        ledger: &TokenLedger,
        token: Address,
        amount: TokenAmount,
    ) -> Result<(), AdapterError> {
        let available = ledger.balance_of(self.pool, token);
        if available < amount {
            return Err(AdapterError::InsufficientLiquidity {
                pool: self.pool,
                available,
                requested: amount,
            });
        }
        Ok(())
    }
}

impl LendingAdapter for MockLendingBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn pool_address(&self) -> Address {
        self.pool
    }

    fn deposit(
        &mut self,
        ledger: &mut TokenLedger,
        caller: Address,
        token: Address,
        amount: TokenAmount,
        on_behalf_of: Address,
    ) -> Result<(), AdapterError> {
        // the mock treats every deposit as collateral
        self.deposit_collateral(ledger, caller, token, amount, on_behalf_of)
    }

    fn deposit_collateral(
        &mut self,
        ledger: &mut TokenLedger,
        caller: Address,
        token: Address,
        amount: TokenAmount,
        on_behalf_of: Address,
    ) -> Result<(), AdapterError> {
        self.token_decimals(token)?;
        ledger.transfer_from(self.pool, caller, self.pool, token, amount)?;
        *self.collateral.entry((on_behalf_of, token)).or_insert(0) += amount;
        Ok(())
    }

    fn withdraw_collateral(
        &mut self,
        ledger: &mut TokenLedger,
        oracle: &dyn PriceOracle,
        caller: Address,
        token: Address,
        amount: TokenAmount,
        on_behalf_of: Address,
    ) -> Result<TokenAmount, AdapterError> {
        let decimals = self.token_decimals(token)?;
        let held = self.balance_of(token, on_behalf_of);
        if held < amount {
            return Err(AdapterError::InsufficientCollateral {
                available: held,
                requested: amount,
            });
        }

        let collateral_usd = self.valued(oracle, &self.collateral, on_behalf_of)?;
        let debt_usd = self.valued(oracle, &self.debt, on_behalf_of)?;
        let removed_usd = token_amount_to_usd(amount, oracle.usd_price(token)?, decimals);
        self.ensure_healthy(collateral_usd.saturating_sub(removed_usd), debt_usd)?;

        ledger.transfer(self.pool, caller, token, amount)?;
        *self.collateral.entry((on_behalf_of, token)).or_insert(0) -= amount;
        Ok(amount)
    }

    fn borrow(
        &mut self,
        ledger: &mut TokenLedger,
        oracle: &dyn PriceOracle,
        caller: Address,
        token: Address,
        amount: TokenAmount,
        on_behalf_of: Address,
    ) -> Result<TokenAmount, AdapterError> {
        let decimals = self.token_decimals(token)?;
        self.pool_liquidity_check(ledger, token, amount)?;

        let collateral_usd = self.valued(oracle, &self.collateral, on_behalf_of)?;
        let debt_usd = self.valued(oracle, &self.debt, on_behalf_of)?;
        let added_usd = token_amount_to_usd(amount, oracle.usd_price(token)?, decimals);
        self.ensure_healthy(collateral_usd, UsdValue(debt_usd.raw() + added_usd.raw()))?;

        ledger.transfer(self.pool, caller, token, amount)?;
        *self.debt.entry((on_behalf_of, token)).or_insert(0) += amount;
        Ok(amount)
    }

    fn repay(
        &mut self,
        ledger: &mut TokenLedger,
        caller: Address,
        token: Address,
        amount: TokenAmount,
        on_behalf_of: Address,
    ) -> Result<TokenAmount, AdapterError> {
        self.token_decimals(token)?;
        let outstanding = self.borrow_balance_of(token, on_behalf_of);
        let used = amount.min(outstanding);
        ledger.transfer_from(self.pool, caller, self.pool, token, used)?;
        *self.debt.entry((on_behalf_of, token)).or_insert(0) -= used;
        Ok(used)
    }

    fn swap(
        &mut self,
        ledger: &mut TokenLedger,
        oracle: &dyn PriceOracle,
        caller: Address,
        token_in: Address,
        token_out: Address,
        amount_in: TokenAmount,
        _context: &[u8],
    ) -> Result<TokenAmount, AdapterError> {
        let dec_in = self.token_decimals(token_in)?;
        let dec_out = self.token_decimals(token_out)?;
        let price_in = oracle.usd_price(token_in)?;
        let price_out = oracle.usd_price(token_out)?;

        let in_usd = token_amount_to_usd(amount_in, price_in, dec_in);
        let gross_out = usd_to_token_amount(in_usd, price_out, dec_out);
        let amount_out = self.swap_spread.apply_complement(gross_out);

        self.pool_liquidity_check(ledger, token_out, amount_out)?;
        ledger.transfer_from(self.pool, caller, self.pool, token_in, amount_in)?;
        ledger.transfer(self.pool, caller, token_out, amount_out)?;
        Ok(amount_out)
    }

    fn swap_exact_out(
        &mut self,
        ledger: &mut TokenLedger,
        oracle: &dyn PriceOracle,
        caller: Address,
        token_in: Address,
        token_out: Address,
        amount_out: TokenAmount,
        _context: &[u8],
    ) -> Result<TokenAmount, AdapterError> {
        let dec_in = self.token_decimals(token_in)?;
        let dec_out = self.token_decimals(token_out)?;
        let price_in = oracle.usd_price(token_in)?;
        let price_out = oracle.usd_price(token_out)?;

        let out_usd = token_amount_to_usd(amount_out, price_out, dec_out);
        let base_in = usd_to_token_amount(out_usd, price_in, dec_in);
        // gross up for the spread so the pool is made whole
        let spread = self.swap_spread.value() as u128;
        let amount_in = mul_div(base_in, BPS_DENOMINATOR, BPS_DENOMINATOR - spread);

        self.pool_liquidity_check(ledger, token_out, amount_out)?;
        ledger.transfer_from(self.pool, caller, self.pool, token_in, amount_in)?;
        ledger.transfer(self.pool, caller, token_out, amount_out)?;
        Ok(amount_in)
    }

    fn balance_of(&self, token: Address, account: Address) -> TokenAmount {
        self.collateral.get(&(account, token)).copied().unwrap_or(0)
    }

    fn borrow_balance_of(&self, token: Address, account: Address) -> TokenAmount {
        self.debt.get(&(account, token)).copied().unwrap_or(0)
    }

    fn position_value(
        &self,
        oracle: &dyn PriceOracle,
        account: Address,
        _context: &[u8],
    ) -> Result<(UsdValue, UsdValue), AdapterError> {
        let collateral_usd = self.valued(oracle, &self.collateral, account)?;
        let debt_usd = self.valued(oracle, &self.debt, account)?;
        Ok((collateral_usd, debt_usd))
    }

    fn clone_box(&self) -> Box<dyn LendingAdapter> {
        Box::new(self.clone())
    }
}
