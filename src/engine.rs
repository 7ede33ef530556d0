// 14.0: top-level engine. owns the world (ledger, adapters, lenders, oracle),
// the order book, the event log, and the clock. every entry point is atomic:
// state is snapshotted before execution and restored on any error.
// deterministic and event-driven with no external I/O.

use crate::adapter::LendingAdapter;
use crate::conditional::{
    CreateOrderRequest, Order, OrderError, OrderLifecycle, PostHookReport, PreHookReport,
    TradeableOrder,
};
use crate::config::EngineConfig;
use crate::events::{
    Event, EventCollector, EventEmitter, EventPayload, ExecutionCompletedEvent,
    OrderCancelledEvent, OrderCompletedEvent, OrderCreatedEvent, PostHookExecutedEvent,
    PreHookExecutedEvent,
};
use crate::flash::FlashLender;
use crate::instruction::Instruction;
use crate::oracle::PriceOracle;
use crate::router::{self, RouterError, World};
use crate::tape::OutputSlot;
use crate::types::{Address, OrderHash, Salt, Timestamp, TokenAmount};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Order(#[from] OrderError),
}

/// Main engine struct. All mutable state lives here; `World` is `Clone`, which
/// is what makes snapshot/restore atomicity possible without an undo log.
#[derive(Debug)]
pub struct RestructureEngine {
    config: EngineConfig,
    world: World,
    orders: OrderLifecycle,
    events: EventCollector,
    current_time: Timestamp,
}

impl RestructureEngine {
    pub fn new(config: EngineConfig, oracle: Box<dyn PriceOracle>) -> Self {
        Self {
            config,
            world: World::new(oracle),
            orders: OrderLifecycle::new(),
            events: EventCollector::new(),
            current_time: Timestamp::from_millis(0),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn events(&self) -> &[Event] {
        self.events.events()
    }

    pub fn order(&self, hash: OrderHash) -> Option<&Order> {
        self.orders.get(hash)
    }

    pub fn set_time(&mut self, timestamp: Timestamp) {
        self.current_time = timestamp;
    }

    pub fn time(&self) -> Timestamp {
        self.current_time
    }

    pub fn advance_time(&mut self, millis: i64) {
        self.current_time = Timestamp::from_millis(self.current_time.as_millis() + millis);
    }

    // ----- setup -----

    pub fn register_adapter(&mut self, adapter: Box<dyn LendingAdapter>) {
        self.world.adapters.register(adapter);
    }

    pub fn register_lender(&mut self, id: Address, lender: Box<dyn FlashLender>) {
        self.world.lenders.register(id, lender);
    }

    pub fn mint(&mut self, account: Address, token: Address, amount: TokenAmount) {
        self.world.ledger.mint(account, token, amount);
    }

    /// Replace the world's price source. Scenario drivers keep their own
    /// mutable oracle and push an updated copy in when prices move.
    pub fn set_oracle(&mut self, oracle: Box<dyn PriceOracle>) {
        self.world.oracle = oracle;
    }

    // ----- direct execution -----

    /// Run an instruction list against the caller's holding context.
    /// Atomic: on any instruction failure the ledger and all adapter books
    /// revert to their pre-call state.
    pub fn execute(
        &mut self,
        caller: Address,
        instructions: &[Instruction],
    ) -> Result<Vec<OutputSlot>, EngineError> {
        let snapshot = self.world.clone();
        match router::execute(&mut self.world, caller, instructions) {
            Ok(outputs) => {
                self.emit(EventPayload::ExecutionCompleted(ExecutionCompletedEvent {
                    caller,
                    instruction_count: instructions.len(),
                    outputs: outputs.clone(),
                }));
                Ok(outputs)
            }
            Err(e) => {
                self.world = snapshot;
                Err(e.into())
            }
        }
    }

    // ----- order lifecycle -----

    pub fn create_order(
        &mut self,
        user: Address,
        salt: Salt,
        request: CreateOrderRequest,
    ) -> Result<OrderHash, EngineError> {
        let kind = request.trigger.kind;
        let sell_token = request.sell_token;
        let buy_token = request.buy_token;
        let max_iterations = request.max_iterations;

        let hash = self
            .orders
            .create_order(user, salt, request, self.current_time)?;
        self.emit(EventPayload::OrderCreated(OrderCreatedEvent {
            order_hash: hash,
            user,
            salt,
            kind,
            sell_token,
            buy_token,
            max_iterations,
        }));
        Ok(hash)
    }

    pub fn cancel_order(&mut self, caller: Address, hash: OrderHash) -> Result<(), EngineError> {
        self.orders.cancel_order(caller, hash)?;
        self.emit(EventPayload::OrderCancelled(OrderCancelledEvent {
            order_hash: hash,
            user: caller,
        }));
        Ok(())
    }

    pub fn get_tradeable_order(&self, hash: OrderHash) -> Result<TradeableOrder, EngineError> {
        Ok(self
            .orders
            .get_tradeable_order(&self.world, &self.config, hash, self.current_time)?)
    }

    /// First half of the settlement handshake. Atomic over both the world and
    /// the order's phase flag.
    pub fn execute_pre_hook(
        &mut self,
        caller: Address,
        hash: OrderHash,
    ) -> Result<PreHookReport, EngineError> {
        let world_snapshot = self.world.clone();
        let orders_snapshot = self.orders.clone();
        match self
            .orders
            .execute_pre_hook(&mut self.world, &self.config, caller, hash)
        {
            Ok(report) => {
                self.emit(EventPayload::PreHookExecuted(PreHookExecutedEvent {
                    order_hash: hash,
                    iteration: report.iteration,
                    sell_amount: report.sell_amount,
                    min_buy_amount: report.min_buy_amount,
                }));
                Ok(report)
            }
            Err(e) => {
                self.world = world_snapshot;
                self.orders = orders_snapshot;
                Err(e.into())
            }
        }
    }

    /// Second half of the handshake. Advances the iteration counter and may
    /// complete the order.
    pub fn execute_post_hook(
        &mut self,
        caller: Address,
        hash: OrderHash,
        actual_sell: TokenAmount,
        actual_buy: TokenAmount,
    ) -> Result<PostHookReport, EngineError> {
        let world_snapshot = self.world.clone();
        let orders_snapshot = self.orders.clone();
        match self.orders.execute_post_hook(
            &mut self.world,
            &self.config,
            caller,
            hash,
            actual_sell,
            actual_buy,
        ) {
            Ok(report) => {
                self.emit(EventPayload::PostHookExecuted(PostHookExecutedEvent {
                    order_hash: hash,
                    iteration: report.iteration,
                    actual_sell,
                    actual_buy,
                    refunded: report.refunded,
                }));
                if report.completed {
                    self.emit(EventPayload::OrderCompleted(OrderCompletedEvent {
                        order_hash: hash,
                        iterations: report.iteration,
                    }));
                }
                Ok(report)
            }
            Err(e) => {
                self.world = world_snapshot;
                self.orders = orders_snapshot;
                Err(e.into())
            }
        }
    }

    fn emit(&mut self, payload: EventPayload) {
        let id = self.events.next_id();
        self.events.emit(Event::new(id, self.current_time, payload));
        self.events.truncate_to(self.config.max_events);
    }
}
