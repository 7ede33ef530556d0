// 13.0: every state change produces an event. used for audit trails, state
// reconstruction, and notifying external systems. the EventPayload enum lists
// all event types.

use crate::tape::OutputSlot;
use crate::trigger::TriggerKind;
use crate::types::{Address, OrderHash, Salt, Timestamp, TokenAmount};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    // Direct execution
    ExecutionCompleted(ExecutionCompletedEvent),

    // Order lifecycle
    OrderCreated(OrderCreatedEvent),
    OrderCancelled(OrderCancelledEvent),
    OrderCompleted(OrderCompletedEvent),

    // Settlement handshake
    PreHookExecuted(PreHookExecutedEvent),
    PostHookExecuted(PostHookExecutedEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionCompletedEvent {
    pub caller: Address,
    pub instruction_count: usize,
    pub outputs: Vec<OutputSlot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedEvent {
    pub order_hash: OrderHash,
    pub user: Address,
    pub salt: Salt,
    pub kind: TriggerKind,
    pub sell_token: Address,
    pub buy_token: Address,
    pub max_iterations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelledEvent {
    pub order_hash: OrderHash,
    pub user: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCompletedEvent {
    pub order_hash: OrderHash,
    pub iterations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreHookExecutedEvent {
    pub order_hash: OrderHash,
    pub iteration: u32,
    pub sell_amount: TokenAmount,
    pub min_buy_amount: TokenAmount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostHookExecutedEvent {
    pub order_hash: OrderHash,
    pub iteration: u32,
    pub actual_sell: TokenAmount,
    pub actual_buy: TokenAmount,
    pub refunded: TokenAmount,
}

pub trait EventEmitter {
    fn emit(&mut self, event: Event);
}

#[derive(Debug, Clone, Default)]
pub struct EventCollector {
    events: Vec<Event>,
    next_id: u64,
}

impl EventCollector {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            next_id: 1,
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn next_id(&mut self) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Drop the oldest events when the log exceeds `max_events`.
    pub fn truncate_to(&mut self, max_events: usize) {
        if self.events.len() > max_events {
            let excess = self.events.len() - max_events;
            self.events.drain(..excess);
        }
    }
}

impl EventEmitter for EventCollector {
    fn emit(&mut self, event: Event) {
        self.events.push(event);
    }
}
