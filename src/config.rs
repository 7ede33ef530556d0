// 12.0 config.rs: engine configuration. holding address, settlement
// authorization, order validity horizon, event retention.

use serde::{Deserialize, Serialize};

use crate::types::Address;

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// The holding area: the address instruction executions run as.
    pub holding_address: Address,
    /// The external settlement counterparty allowed to drive the hooks.
    pub settlement_counterparty: Address,
    /// Additional addresses the counterparty has delegated hook calls to.
    pub settlement_delegates: Vec<Address>,
    /// How long a polled tradeable order stays valid, in seconds.
    pub order_validity_secs: i64,
    /// Maximum number of events to retain in memory.
    pub max_events: usize,
}

impl EngineConfig {
    pub fn is_settler(&self, caller: Address) -> bool {
        caller == self.settlement_counterparty || self.settlement_delegates.contains(&caller)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            holding_address: Address(0xA0),
            settlement_counterparty: Address(0xFF),
            settlement_delegates: Vec::new(),
            order_validity_secs: 300,
            max_events: 100_000,
        }
    }
}
