// 3.0 instruction.rs: the instruction set the router interprets. a restructuring
// is an ordered list of these, executed inside one atomic unit. router primitives
// move funds and combine tape slots; ProtocolOp dispatches into a lending adapter.

use serde::{Deserialize, Serialize};

use crate::tape::SlotRef;
use crate::types::{Address, TokenAmount};

/// Operation a `ProtocolOp` asks of a lending adapter. Swap variants carry the
/// counter-token so one instruction names both legs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ProtocolAction {
    /// Supply `token` into the protocol (non-collateral deposit).
    Deposit,
    /// Supply `token` as collateral for `account`.
    DepositCollateral,
    /// Withdraw collateral; appends the amount actually withdrawn.
    WithdrawCollateral,
    /// Borrow against collateral; appends the amount borrowed.
    Borrow,
    /// Repay debt; appends the amount actually used (caps at outstanding debt).
    Repay,
    /// Sell `token` for `token_out` at the venue's rate; appends the amount out.
    Swap { token_out: Address },
    /// Buy exactly `amount` of `token`, paying in `token_in`; appends the
    /// amount of `token_in` used.
    SwapExactOut { token_in: Address },
    /// View: current debt balance; appends it.
    GetBorrowBalance,
    /// View: current supply/collateral balance; appends it.
    GetSupplyBalance,
}

/// Dispatch into one protocol adapter. `amount == 0` with a present
/// `input_slot` means "use the referenced slot's amount instead of a literal";
/// `SlotRef::BALANCE` resolves against live state at call time instead of the
/// tape ("withdraw/repay everything").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolOp {
    pub protocol: String,
    pub action: ProtocolAction,
    pub token: Address,
    pub account: Address,
    pub amount: TokenAmount,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<u8>,
    pub input_slot: Option<SlotRef>,
}

/// The instruction union. Each variant documents what it appends to the tape;
/// `Split` is the single variant that appends two slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Instruction {
    /// Pull up to `amount` of `token` from `from` into the holding area, capped
    /// at what `from`'s balance and allowance actually permit. Appends the
    /// amount actually moved: "cap, don't fail".
    PullToken {
        token: Address,
        amount: TokenAmount,
        from: Address,
    },

    /// Transfer the referenced slot's amount out of the holding area to `to`.
    /// Appends nothing.
    PushToken { input: SlotRef, to: Address },

    /// Append a literal slot with no external effect. Seeds values later
    /// instructions reference (e.g. the principal a flash loan must match).
    ToOutput { token: Address, amount: TokenAmount },

    /// Grant the named protocol's adapter the right to pull the referenced
    /// slot's amount of its token. Appends nothing.
    Approve { input: SlotRef, protocol: String },

    /// Wrap `body` in a flash loan: `amount` of `token` from `lender` appears
    /// as the nested scope's slot 0, and the holding area must end the body
    /// holding principal + fee or the whole unit fails.
    FlashLoan {
        lender: Address,
        token: Address,
        amount: TokenAmount,
        body: Vec<Instruction>,
    },

    /// Same-token sum of two prior slots; appends the result.
    Add { a: SlotRef, b: SlotRef },

    /// Same-token difference (`a - b`) of two prior slots; appends the result.
    Subtract { a: SlotRef, b: SlotRef },

    /// Split a prior slot into `(amount, remainder)`; appends both, in that
    /// order.
    Split { input: SlotRef, amount: TokenAmount },

    /// Dispatch to one lending-protocol adapter.
    Protocol(ProtocolOp),
}
