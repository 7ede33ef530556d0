// 11.0 conditional.rs: conditional orders. standing restructurings that execute
// only when their LTV trigger fires, settled by an external matching layer
// rather than by the position holder's own transaction.
//
// the settlement handshake is two-phase. the counterparty polls
// get_tradeable_order, then calls the pre-hook (is the order still executable?
// procure the sell funds), moves funds, and calls the post-hook (here is what
// actually moved). the per-iteration phase flag makes the ordering invariant
// checkable independent of caller discipline.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::EngineConfig;
use crate::instruction::Instruction;
use crate::ledger::LedgerError;
use crate::router::{self, RouterError, World};
use crate::tape::OutputSlot;
use crate::trigger::{self, TriggerError, TriggerParams, TriggerReason};
use crate::types::{mul_div, Address, AppDataHash, OrderHash, Salt, Timestamp, TokenAmount};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("order for ({user}, salt {salt:?}) already exists")]
    DuplicateOrder { user: Address, salt: Salt },

    #[error("max_iterations must be at least 1")]
    ZeroMaxIterations,

    #[error("order {0} not found")]
    OrderNotFound(OrderHash),

    #[error("order {0} is not active")]
    OrderNotActive(OrderHash),

    #[error("caller {0} is not the order owner")]
    NotOrderOwner(Address),

    #[error("caller {0} is not the settlement counterparty or a delegate")]
    NotSettlementCounterparty(Address),

    #[error("trigger not met: {0:?}")]
    TriggerNotMet(TriggerReason),

    #[error("pre-hook already executed for this iteration")]
    PreHookAlreadyExecuted,

    #[error("post-hook called with no pre-committed iteration")]
    PreHookNotExecuted,

    #[error("settlement delivered {actual}, pre-committed minimum was {min}")]
    InsufficientBuyAmount { min: TokenAmount, actual: TokenAmount },

    #[error(transparent)]
    Trigger(#[from] TriggerError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Active,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

/// Per-iteration handshake state. `PreCommitted` carries the amounts the
/// pre-hook fixed for this iteration; the post-hook validates against them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum IterationPhase {
    NotStarted,
    PreCommitted {
        sell_amount: TokenAmount,
        min_buy_amount: TokenAmount,
    },
}

/// What a user submits to create an order. Immutable once created; the
/// instruction lists are committed by `app_data_hash` rather than re-hashed
/// into the order id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub trigger: TriggerParams,
    pub pre_instructions: Vec<Instruction>,
    pub post_instructions: Vec<Instruction>,
    pub sell_token: Address,
    pub buy_token: Address,
    pub app_data_hash: AppDataHash,
    pub max_iterations: u32,
    /// Residual sell-token balance is swept here after each post-hook,
    /// commonly the flash-loan borrower, which is how repayment gets funded.
    pub sell_token_refund_address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub user: Address,
    pub salt: Salt,
    pub trigger: TriggerParams,
    pub pre_instructions: Vec<Instruction>,
    pub post_instructions: Vec<Instruction>,
    pub sell_token: Address,
    pub buy_token: Address,
    pub app_data_hash: AppDataHash,
    pub max_iterations: u32,
    pub sell_token_refund_address: Address,
    pub status: OrderStatus,
    pub iteration_count: u32,
    pub phase: IterationPhase,
    pub created_at: Timestamp,
}

/// What the settlement counterparty sees when it polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeableOrder {
    pub sell_token: Address,
    pub buy_token: Address,
    pub sell_amount: TokenAmount,
    pub buy_amount: TokenAmount,
    pub receiver: Address,
    pub valid_to: Timestamp,
    pub app_data_hash: AppDataHash,
}

#[derive(Debug, Clone, Copy)]
pub struct PreHookReport {
    pub iteration: u32,
    pub sell_amount: TokenAmount,
    pub min_buy_amount: TokenAmount,
}

#[derive(Debug, Clone, Copy)]
pub struct PostHookReport {
    pub iteration: u32,
    pub refunded: TokenAmount,
    pub completed: bool,
}

/// `blake3(user ‖ salt ‖ params)`. Deterministic, so resubmitting identical
/// parameters under the same salt collides with `DuplicateOrder` by lookup
/// before hashing even matters.
pub fn compute_order_hash(user: Address, salt: Salt, request: &CreateOrderRequest) -> OrderHash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&user.0.to_le_bytes());
    hasher.update(&salt.0.to_le_bytes());

    let t = &request.trigger;
    hasher.update(t.protocol.as_bytes());
    hasher.update(&t.protocol_context);
    hasher.update(&[matches!(t.kind, trigger::TriggerKind::Leverage) as u8]);
    hasher.update(&t.trigger_ltv.value().to_le_bytes());
    hasher.update(&t.target_ltv.value().to_le_bytes());
    hasher.update(&t.collateral_token.0.to_le_bytes());
    hasher.update(&t.debt_token.0.to_le_bytes());
    hasher.update(&t.collateral_decimals.to_le_bytes());
    hasher.update(&t.debt_decimals.to_le_bytes());
    hasher.update(&t.max_slippage.value().to_le_bytes());
    hasher.update(&t.num_chunks.to_le_bytes());

    hasher.update(&request.sell_token.0.to_le_bytes());
    hasher.update(&request.buy_token.0.to_le_bytes());
    hasher.update(&request.app_data_hash);
    hasher.update(&request.max_iterations.to_le_bytes());
    hasher.update(&request.sell_token_refund_address.0.to_le_bytes());

    OrderHash(*hasher.finalize().as_bytes())
}

/// Owns the order store. The lifecycle methods here are the only mutators;
/// nothing else reaches into the map.
#[derive(Debug, Clone, Default)]
pub struct OrderLifecycle {
    orders: HashMap<OrderHash, Order>,
    by_user_salt: HashMap<(Address, Salt), OrderHash>,
}

impl OrderLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, hash: OrderHash) -> Option<&Order> {
        self.orders.get(&hash)
    }

    pub fn lookup(&self, user: Address, salt: Salt) -> Option<OrderHash> {
        self.by_user_salt.get(&(user, salt)).copied()
    }

    pub fn active_orders(&self) -> impl Iterator<Item = (&OrderHash, &Order)> {
        self.orders
            .iter()
            .filter(|(_, o)| o.status == OrderStatus::Active)
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn create_order(
        &mut self,
        user: Address,
        salt: Salt,
        request: CreateOrderRequest,
        now: Timestamp,
    ) -> Result<OrderHash, OrderError> {
        if request.max_iterations == 0 {
            return Err(OrderError::ZeroMaxIterations);
        }
        if self.by_user_salt.contains_key(&(user, salt)) {
            return Err(OrderError::DuplicateOrder { user, salt });
        }

        let hash = compute_order_hash(user, salt, &request);
        let order = Order {
            user,
            salt,
            trigger: request.trigger,
            pre_instructions: request.pre_instructions,
            post_instructions: request.post_instructions,
            sell_token: request.sell_token,
            buy_token: request.buy_token,
            app_data_hash: request.app_data_hash,
            max_iterations: request.max_iterations,
            sell_token_refund_address: request.sell_token_refund_address,
            status: OrderStatus::Active,
            iteration_count: 0,
            phase: IterationPhase::NotStarted,
            created_at: now,
        };
        self.orders.insert(hash, order);
        self.by_user_salt.insert((user, salt), hash);
        Ok(hash)
    }

    /// Owner-only, Active-only. A pre-committed-but-not-post-hooked iteration
    /// goes permanently stale: hooks on a cancelled order fail `OrderNotActive`.
    pub fn cancel_order(&mut self, caller: Address, hash: OrderHash) -> Result<(), OrderError> {
        let order = self
            .orders
            .get_mut(&hash)
            .ok_or(OrderError::OrderNotFound(hash))?;
        if order.user != caller {
            return Err(OrderError::NotOrderOwner(caller));
        }
        if order.status != OrderStatus::Active {
            return Err(OrderError::OrderNotActive(hash));
        }
        order.status = OrderStatus::Cancelled;
        Ok(())
    }

    /// Read-only poll surface for the settlement counterparty. Reports the
    /// pre-committed amounts when an iteration is mid-handshake, the trigger's
    /// fresh estimate otherwise.
    pub fn get_tradeable_order(
        &self,
        world: &World,
        config: &EngineConfig,
        hash: OrderHash,
        now: Timestamp,
    ) -> Result<TradeableOrder, OrderError> {
        let order = self.orders.get(&hash).ok_or(OrderError::OrderNotFound(hash))?;
        if order.status != OrderStatus::Active {
            return Err(OrderError::OrderNotActive(hash));
        }

        let (sell_amount, buy_amount) = match order.phase {
            IterationPhase::PreCommitted {
                sell_amount,
                min_buy_amount,
            } => (sell_amount, min_buy_amount),
            IterationPhase::NotStarted => {
                let decision = trigger::should_execute(world, &order.trigger, order.user)?;
                if !decision.should_fire {
                    return Err(OrderError::TriggerNotMet(decision.reason));
                }
                let est = trigger::calculate_execution(
                    world,
                    &order.trigger,
                    order.user,
                    order.iteration_count,
                )?;
                (est.sell_amount, est.min_buy_amount)
            }
        };

        Ok(TradeableOrder {
            sell_token: order.sell_token,
            buy_token: order.buy_token,
            sell_amount,
            buy_amount,
            receiver: config.holding_address,
            valid_to: now.plus_secs(config.order_validity_secs),
            app_data_hash: order.app_data_hash,
        })
    }

    /// First half of the handshake: re-validate the trigger, run the pre
    /// instructions to procure sell funds, and commit this iteration's amounts.
    pub fn execute_pre_hook(
        &mut self,
        world: &mut World,
        config: &EngineConfig,
        caller: Address,
        hash: OrderHash,
    ) -> Result<PreHookReport, OrderError> {
        if !config.is_settler(caller) {
            return Err(OrderError::NotSettlementCounterparty(caller));
        }
        let order = self
            .orders
            .get_mut(&hash)
            .ok_or(OrderError::OrderNotFound(hash))?;
        if order.status != OrderStatus::Active {
            return Err(OrderError::OrderNotActive(hash));
        }
        if !matches!(order.phase, IterationPhase::NotStarted) {
            return Err(OrderError::PreHookAlreadyExecuted);
        }

        let decision = trigger::should_execute(world, &order.trigger, order.user)?;
        if !decision.should_fire {
            return Err(OrderError::TriggerNotMet(decision.reason));
        }
        let est = trigger::calculate_execution(
            world,
            &order.trigger,
            order.user,
            order.iteration_count,
        )?;

        // seed slot 0 with the sized sell amount so pre instructions can
        // reference it ("withdraw this much collateral")
        let seed = [OutputSlot {
            token: order.sell_token,
            amount: est.sell_amount,
        }];
        let outs = router::execute_seeded(
            world,
            config.holding_address,
            &seed,
            &order.pre_instructions,
        )?;

        // the funds the pre instructions actually procured can fall short of
        // the estimate (cap-don't-fail pulls); commit what is really there and
        // scale the buy floor with it
        let sell_amount = outs
            .iter()
            .rev()
            .find(|s| s.token == order.sell_token)
            .map(|s| s.amount)
            .unwrap_or(est.sell_amount);
        let min_buy_amount = if est.sell_amount > 0 {
            mul_div(est.min_buy_amount, sell_amount, est.sell_amount)
        } else {
            0
        };

        order.phase = IterationPhase::PreCommitted {
            sell_amount,
            min_buy_amount,
        };
        Ok(PreHookReport {
            iteration: order.iteration_count,
            sell_amount,
            min_buy_amount,
        })
    }

    /// Second half: the counterparty reports what actually moved. Validates
    /// against the pre-committed minimum, runs the post instructions with the
    /// two synthetic slots on the tape, sweeps residual sell-token to the
    /// refund address, and advances the iteration.
    pub fn execute_post_hook(
        &mut self,
        world: &mut World,
        config: &EngineConfig,
        caller: Address,
        hash: OrderHash,
        actual_sell: TokenAmount,
        actual_buy: TokenAmount,
    ) -> Result<PostHookReport, OrderError> {
        if !config.is_settler(caller) {
            return Err(OrderError::NotSettlementCounterparty(caller));
        }
        let order = self
            .orders
            .get_mut(&hash)
            .ok_or(OrderError::OrderNotFound(hash))?;
        if order.status != OrderStatus::Active {
            return Err(OrderError::OrderNotActive(hash));
        }
        let IterationPhase::PreCommitted {
            sell_amount,
            min_buy_amount,
        } = order.phase
        else {
            return Err(OrderError::PreHookNotExecuted);
        };
        if actual_buy < min_buy_amount {
            return Err(OrderError::InsufficientBuyAmount {
                min: min_buy_amount,
                actual: actual_buy,
            });
        }

        // the holding area is shared by every order. this order's share of the
        // sell-token balance is its own unsettled escrow; anything beyond that
        // belongs to other orders mid-handshake and must survive the sweep.
        let own_escrow = sell_amount.saturating_sub(actual_sell);
        let foreign_balance = world
            .ledger
            .balance_of(config.holding_address, order.sell_token)
            .saturating_sub(own_escrow);

        let seed = [
            OutputSlot {
                token: order.sell_token,
                amount: actual_sell,
            },
            OutputSlot {
                token: order.buy_token,
                amount: actual_buy,
            },
        ];
        router::execute_seeded(
            world,
            config.holding_address,
            &seed,
            &order.post_instructions,
        )?;

        // residual sell token funds the refund address (e.g. flash repayment)
        let refunded = world
            .ledger
            .balance_of(config.holding_address, order.sell_token)
            .saturating_sub(foreign_balance);
        if refunded > 0 {
            world.ledger.transfer(
                config.holding_address,
                order.sell_token_refund_address,
                order.sell_token,
                refunded,
            )?;
        }

        order.iteration_count += 1;
        order.phase = IterationPhase::NotStarted;

        let completed = order.iteration_count >= order.max_iterations
            || trigger::is_complete(world, &order.trigger, order.user, order.iteration_count)?;
        if completed {
            order.status = OrderStatus::Completed;
        }
        Ok(PostHookReport {
            iteration: order.iteration_count,
            refunded,
            completed,
        })
    }
}
