// 10.0 trigger.rs: LTV trigger math. pure functions over the position view and
// price oracle: decide whether an order should fire, size one chunk of the
// restructuring, and recognize completion. all USD math is 8-decimal integer
// with truncating division, so every computed amount errs slightly conservative.

use serde::{Deserialize, Serialize};

use crate::adapter::AdapterError;
use crate::oracle::{usd_to_token_amount, OracleError};
use crate::router::World;
use crate::types::{mul_div, Address, Bps, TokenAmount, UsdValue, BPS_DENOMINATOR};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TriggerError {
    #[error("no adapter registered for protocol {0:?}")]
    UnknownProtocol(String),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Oracle(#[from] OracleError),
}

/// Which way the trigger watches the position drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Fire when the position drifted too risky (LTV at or above the trigger);
    /// sell collateral to repay debt down to the target.
    Deleverage,
    /// Fire when the position is under-levered (LTV at or below the trigger);
    /// borrow and buy collateral up to the target.
    Leverage,
}

/// Static data fixed at order creation. Immutable for the order's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerParams {
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub protocol_context: Vec<u8>,
    pub kind: TriggerKind,
    pub trigger_ltv: Bps,
    pub target_ltv: Bps,
    pub collateral_token: Address,
    pub debt_token: Address,
    pub collateral_decimals: u32,
    pub debt_decimals: u32,
    pub max_slippage: Bps,
    /// Total required movement is split across this many executions, the
    /// remainder landing in the last chunk.
    pub num_chunks: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerReason {
    Triggered,
    LtvBelowTrigger,
    LtvAboveTrigger,
    AlreadyAtTarget,
    EmptyPosition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerDecision {
    pub should_fire: bool,
    pub current_ltv_bps: u32,
    pub reason: TriggerReason,
}

/// One chunk's worth of settlement amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutionAmounts {
    pub sell_amount: TokenAmount,
    pub min_buy_amount: TokenAmount,
}

impl ExecutionAmounts {
    pub fn is_zero(&self) -> bool {
        self.sell_amount == 0
    }
}

/// `debt * 10_000 / collateral`, truncating; 0 for zero collateral (never
/// divides by zero). Saturates at `u32::MAX` so dust collateral under a
/// mountain of debt cannot wrap around to a healthy-looking ratio.
pub fn current_ltv_bps(collateral_usd: UsdValue, debt_usd: UsdValue) -> u32 {
    if collateral_usd.is_zero() {
        return 0;
    }
    mul_div(debt_usd.raw(), BPS_DENOMINATOR, collateral_usd.raw()).min(u32::MAX as u128) as u32
}

/// The position view behind the trigger: `(collateral_usd, debt_usd)`.
pub fn position_value(
    world: &World,
    params: &TriggerParams,
    account: Address,
) -> Result<(UsdValue, UsdValue), TriggerError> {
    let adapter = world
        .adapters
        .get(&params.protocol)
        .ok_or_else(|| TriggerError::UnknownProtocol(params.protocol.clone()))?;
    Ok(adapter.position_value(world.oracle.as_ref(), account, &params.protocol_context)?)
}

pub fn should_execute(
    world: &World,
    params: &TriggerParams,
    account: Address,
) -> Result<TriggerDecision, TriggerError> {
    let (collateral_usd, debt_usd) = position_value(world, params, account)?;
    let ltv = current_ltv_bps(collateral_usd, debt_usd);

    let decide = |fire: bool, reason: TriggerReason| TriggerDecision {
        should_fire: fire,
        current_ltv_bps: ltv,
        reason: if fire { TriggerReason::Triggered } else { reason },
    };

    let decision = match params.kind {
        TriggerKind::Deleverage => {
            if ltv < params.trigger_ltv.value() {
                decide(false, TriggerReason::LtvBelowTrigger)
            } else if ltv <= params.target_ltv.value() {
                decide(false, TriggerReason::AlreadyAtTarget)
            } else {
                decide(true, TriggerReason::Triggered)
            }
        }
        TriggerKind::Leverage => {
            if collateral_usd.is_zero() {
                decide(false, TriggerReason::EmptyPosition)
            } else if ltv > params.trigger_ltv.value() {
                decide(false, TriggerReason::LtvAboveTrigger)
            } else if ltv >= params.target_ltv.value() {
                decide(false, TriggerReason::AlreadyAtTarget)
            } else {
                decide(true, TriggerReason::Triggered)
            }
        }
    };
    Ok(decision)
}

/// Size one chunk from live position state. Self-correcting: the total delta is
/// recomputed each iteration and spread over the chunks still remaining, so
/// slippage absorbed in earlier chunks shifts the plan instead of compounding.
pub fn calculate_execution(
    world: &World,
    params: &TriggerParams,
    account: Address,
    iteration_index: u32,
) -> Result<ExecutionAmounts, TriggerError> {
    let (collateral_usd, debt_usd) = position_value(world, params, account)?;
    if collateral_usd.is_zero() {
        return Ok(ExecutionAmounts::default());
    }

    let target_debt_usd = params.target_ltv.apply(collateral_usd.raw());
    let delta_usd = match params.kind {
        TriggerKind::Deleverage => debt_usd.raw().saturating_sub(target_debt_usd),
        TriggerKind::Leverage => target_debt_usd.saturating_sub(debt_usd.raw()),
    };
    if delta_usd == 0 {
        return Ok(ExecutionAmounts::default());
    }

    let remaining_chunks = params.num_chunks.saturating_sub(iteration_index).max(1);
    let chunk_usd = UsdValue(delta_usd / remaining_chunks as u128);

    let collateral_price = world.oracle.usd_price(params.collateral_token)?;
    let debt_price = world.oracle.usd_price(params.debt_token)?;

    let amounts = match params.kind {
        TriggerKind::Deleverage => {
            // sell collateral, expect debt-token proceeds to repay with
            let sell =
                usd_to_token_amount(chunk_usd, collateral_price, params.collateral_decimals);
            let proceeds = usd_to_token_amount(chunk_usd, debt_price, params.debt_decimals);
            ExecutionAmounts {
                sell_amount: sell,
                min_buy_amount: params.max_slippage.apply_complement(proceeds),
            }
        }
        TriggerKind::Leverage => {
            // borrow debt token, sell it, expect new collateral back
            let sell = usd_to_token_amount(chunk_usd, debt_price, params.debt_decimals);
            let expected =
                usd_to_token_amount(chunk_usd, collateral_price, params.collateral_decimals);
            ExecutionAmounts {
                sell_amount: sell,
                min_buy_amount: params.max_slippage.apply_complement(expected),
            }
        }
    };
    Ok(amounts)
}

/// True once the LTV has crossed past the target in the trigger's direction,
/// or all chunks have executed.
pub fn is_complete(
    world: &World,
    params: &TriggerParams,
    account: Address,
    iteration_index: u32,
) -> Result<bool, TriggerError> {
    if iteration_index >= params.num_chunks {
        return Ok(true);
    }
    let (collateral_usd, debt_usd) = position_value(world, params, account)?;
    let ltv = current_ltv_bps(collateral_usd, debt_usd);
    let crossed = match params.kind {
        TriggerKind::Deleverage => ltv <= params.target_ltv.value(),
        TriggerKind::Leverage => ltv >= params.target_ltv.value(),
    };
    Ok(crossed)
}
