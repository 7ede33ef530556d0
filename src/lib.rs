// restructure-core: lending position restructuring engine.
// atomicity-first architecture: every entry point snapshots state and
// restores it on failure. all computation is deterministic with no
// external I/O.
//
// file map:
//   1.x  types.rs: primitives: Address, TokenAmount, UsdValue, Bps, OrderHash
//   2.x  ledger.rs: in-memory token balances and allowances
//   3.x  instruction.rs: the instruction set the router interprets
//   4.x  oracle.rs: 8-decimal USD price view (mocked)
//   5.x  backend.rs: lending backend with collateral/debt books (mocked)
//   6.x  adapter.rs: protocol adapter trait + registry
//   7.x  tape.rs: append-only output tape threading state between steps
//   8.x  router.rs: instruction interpreter, flash-loan scoping
//   9.x  flash.rs: flash lender trait + registry (mocked)
//   10.x trigger.rs: LTV trigger math, chunk sizing, completion
//   11.x conditional.rs: order lifecycle + two-phase settlement hooks
//   12.x config.rs: holding address, settlement auth, validity horizon
//   13.x events.rs: state transition events for audit
//   14.x engine.rs: top-level engine: execution, orders, events, clock

// execution core
pub mod instruction;
pub mod ledger;
pub mod router;
pub mod tape;
pub mod types;

// protocol integrations
pub mod adapter;
pub mod backend;
pub mod flash;
pub mod oracle;

// conditional order layer
pub mod conditional;
pub mod trigger;

// engine surface
pub mod config;
pub mod engine;
pub mod events;

// re exports for convenience
pub use adapter::*;
pub use backend::*;
pub use conditional::*;
pub use config::*;
pub use engine::*;
pub use events::*;
pub use flash::*;
pub use instruction::*;
pub use ledger::*;
pub use oracle::*;
pub use router::*;
pub use tape::*;
pub use trigger::*;
pub use types::*;
