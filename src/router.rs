// 8.0 router.rs: the instruction interpreter. runs an ordered instruction list
// inside one atomic unit, reading and writing the output tape. router primitives
// move funds and combine slots; protocol instructions dispatch through the
// adapter registry; a flash-loan wrap nests a scope whose solvency is verified
// before the scope closes.
//
// failure policy: the first error aborts the entire execution. the router never
// retries; resubmitting a fresh instruction list is the caller's business, and
// the host (engine snapshot) undoes partial effects.

use crate::adapter::{AdapterError, AdapterRegistry};
use crate::flash::LenderRegistry;
use crate::instruction::{Instruction, ProtocolAction, ProtocolOp};
use crate::ledger::{LedgerError, TokenLedger};
use crate::oracle::PriceOracle;
use crate::tape::{OutputSlot, SlotRef, Tape, TapeError};
use crate::types::{Address, TokenAmount};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    #[error(transparent)]
    Tape(#[from] TapeError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("adapter failure: {0}")]
    Adapter(#[from] AdapterError),

    #[error("no adapter registered for protocol {0:?}")]
    UnknownProtocol(String),

    #[error("no flash lender registered as {0}")]
    UnknownLender(Address),

    #[error("slot {a} holds token {token_a}, slot {b} holds token {token_b}")]
    TokenMismatch {
        a: SlotRef,
        token_a: Address,
        b: SlotRef,
        token_b: Address,
    },

    #[error("cannot take {requested} from slot holding {available}")]
    AmountUnderflow {
        available: TokenAmount,
        requested: TokenAmount,
    },

    #[error("the reserved balance index is only valid on protocol instructions")]
    ReservedIndexNotAllowed,

    #[error("flash loan of {required} (principal + fee) of token {token} not covered, holding {held}")]
    FlashLoanRepaymentShortfall {
        token: Address,
        required: TokenAmount,
        held: TokenAmount,
    },
}

/// Everything an execution can touch: the asset ledger, the lending backends,
/// the flash lenders and the price view. `Clone` is what makes the engine's
/// snapshot/rollback host model work.
#[derive(Debug, Clone)]
pub struct World {
    pub ledger: TokenLedger,
    pub adapters: AdapterRegistry,
    pub lenders: LenderRegistry,
    pub oracle: Box<dyn PriceOracle>,
}

impl World {
    pub fn new(oracle: Box<dyn PriceOracle>) -> Self {
        Self {
            ledger: TokenLedger::new(),
            adapters: AdapterRegistry::new(),
            lenders: LenderRegistry::new(),
            oracle,
        }
    }
}

/// Run `instructions` with `holding` as the executing context. Returns the
/// full tape on success.
pub fn execute(
    world: &mut World,
    holding: Address,
    instructions: &[Instruction],
) -> Result<Vec<OutputSlot>, RouterError> {
    execute_seeded(world, holding, &[], instructions)
}

/// Same as `execute`, with slots pre-appended to the tape before the first
/// instruction runs. The order lifecycle uses this to seed trigger amounts
/// (pre-hook) and actually-settled amounts (post-hook).
pub fn execute_seeded(
    world: &mut World,
    holding: Address,
    seed: &[OutputSlot],
    instructions: &[Instruction],
) -> Result<Vec<OutputSlot>, RouterError> {
    let mut tape = Tape::new();
    for slot in seed {
        tape.append(slot.token, slot.amount);
    }
    run(world, holding, instructions, &mut tape)?;
    Ok(tape.into_slots())
}

fn read_slot(tape: &Tape, slot: SlotRef) -> Result<OutputSlot, RouterError> {
    if slot.is_reserved() {
        return Err(RouterError::ReservedIndexNotAllowed);
    }
    Ok(tape.read(slot)?)
}

fn run(
    world: &mut World,
    holding: Address,
    instructions: &[Instruction],
    tape: &mut Tape,
) -> Result<(), RouterError> {
    for instruction in instructions {
        step(world, holding, instruction, tape)?;
    }
    Ok(())
}

fn step(
    world: &mut World,
    holding: Address,
    instruction: &Instruction,
    tape: &mut Tape,
) -> Result<(), RouterError> {
    match instruction {
        Instruction::PullToken { token, amount, from } => {
            // cap, don't fail: move what balance and allowance actually permit
            // and record the moved amount, so callers can ask for "as much as
            // available" without knowing the figure up front.
            let balance = world.ledger.balance_of(*from, *token);
            let moved = if *from == holding {
                (*amount).min(balance)
            } else {
                let allowed = world.ledger.allowance(*from, holding, *token);
                let capped = (*amount).min(balance).min(allowed);
                world
                    .ledger
                    .transfer_from(holding, *from, holding, *token, capped)?;
                capped
            };
            tape.append(*token, moved);
        }

        Instruction::PushToken { input, to } => {
            let slot = read_slot(tape, *input)?;
            world.ledger.transfer(holding, *to, slot.token, slot.amount)?;
        }

        Instruction::ToOutput { token, amount } => {
            tape.append(*token, *amount);
        }

        Instruction::Approve { input, protocol } => {
            let slot = read_slot(tape, *input)?;
            let adapter = world
                .adapters
                .get(protocol)
                .ok_or_else(|| RouterError::UnknownProtocol(protocol.clone()))?;
            world
                .ledger
                .approve(holding, adapter.pool_address(), slot.token, slot.amount);
        }

        Instruction::Add { a, b } => {
            let (sa, sb) = (read_slot(tape, *a)?, read_slot(tape, *b)?);
            if sa.token != sb.token {
                return Err(RouterError::TokenMismatch {
                    a: *a,
                    token_a: sa.token,
                    b: *b,
                    token_b: sb.token,
                });
            }
            tape.append(sa.token, sa.amount + sb.amount);
        }

        Instruction::Subtract { a, b } => {
            let (sa, sb) = (read_slot(tape, *a)?, read_slot(tape, *b)?);
            if sa.token != sb.token {
                return Err(RouterError::TokenMismatch {
                    a: *a,
                    token_a: sa.token,
                    b: *b,
                    token_b: sb.token,
                });
            }
            if sb.amount > sa.amount {
                return Err(RouterError::AmountUnderflow {
                    available: sa.amount,
                    requested: sb.amount,
                });
            }
            tape.append(sa.token, sa.amount - sb.amount);
        }

        Instruction::Split { input, amount } => {
            let slot = read_slot(tape, *input)?;
            if *amount > slot.amount {
                return Err(RouterError::AmountUnderflow {
                    available: slot.amount,
                    requested: *amount,
                });
            }
            tape.append(slot.token, *amount);
            tape.append(slot.token, slot.amount - *amount);
        }

        Instruction::FlashLoan {
            lender,
            token,
            amount,
            body,
        } => {
            let (pool, fee) = {
                let l = world
                    .lenders
                    .get(*lender)
                    .ok_or(RouterError::UnknownLender(*lender))?;
                (l.pool_address(), l.fee_for(*amount))
            };

            world.ledger.transfer(pool, holding, *token, *amount)?;
            let base = tape.enter_scope();
            tape.append(*token, *amount); // scope-relative slot 0: the borrowed funds

            run(world, holding, body, tape)?;

            let required = amount + fee;
            let held = world.ledger.balance_of(holding, *token);
            if held < required {
                return Err(RouterError::FlashLoanRepaymentShortfall {
                    token: *token,
                    required,
                    held,
                });
            }
            world.ledger.transfer(holding, pool, *token, required)?;
            tape.exit_scope(base);
        }

        Instruction::Protocol(op) => {
            let amount = resolve_amount(world, holding, op, tape)?;
            dispatch(world, holding, op, amount, tape)?;
        }
    }
    Ok(())
}

/// Literal amount, referenced slot, or reserved-balance resolution. The
/// reserved index reads live state at call time: the supply book for
/// withdraw-everything, the holding area's ledger balance otherwise.
fn resolve_amount(
    world: &World,
    holding: Address,
    op: &ProtocolOp,
    tape: &Tape,
) -> Result<TokenAmount, RouterError> {
    let Some(slot) = op.input_slot else {
        return Ok(op.amount);
    };
    if !slot.is_reserved() {
        return Ok(tape.read(slot)?.amount);
    }
    if op.action == ProtocolAction::WithdrawCollateral {
        let adapter = world
            .adapters
            .get(&op.protocol)
            .ok_or_else(|| RouterError::UnknownProtocol(op.protocol.clone()))?;
        return Ok(adapter.balance_of(op.token, op.account));
    }
    Ok(world.ledger.balance_of(holding, op.token))
}

fn dispatch(
    world: &mut World,
    holding: Address,
    op: &ProtocolOp,
    amount: TokenAmount,
    tape: &mut Tape,
) -> Result<(), RouterError> {
    let World {
        ledger,
        adapters,
        oracle,
        ..
    } = world;
    let adapter = adapters
        .get_mut(&op.protocol)
        .ok_or_else(|| RouterError::UnknownProtocol(op.protocol.clone()))?;

    match op.action {
        ProtocolAction::Deposit => {
            adapter.deposit(ledger, holding, op.token, amount, op.account)?;
        }
        ProtocolAction::DepositCollateral => {
            adapter.deposit_collateral(ledger, holding, op.token, amount, op.account)?;
        }
        ProtocolAction::WithdrawCollateral => {
            let out = adapter.withdraw_collateral(
                ledger,
                oracle.as_ref(),
                holding,
                op.token,
                amount,
                op.account,
            )?;
            tape.append(op.token, out);
        }
        ProtocolAction::Borrow => {
            let out = adapter.borrow(
                ledger,
                oracle.as_ref(),
                holding,
                op.token,
                amount,
                op.account,
            )?;
            tape.append(op.token, out);
        }
        ProtocolAction::Repay => {
            let used = adapter.repay(ledger, holding, op.token, amount, op.account)?;
            tape.append(op.token, used);
        }
        ProtocolAction::Swap { token_out } => {
            let out = adapter.swap(
                ledger,
                oracle.as_ref(),
                holding,
                op.token,
                token_out,
                amount,
                &op.context,
            )?;
            tape.append(token_out, out);
        }
        ProtocolAction::SwapExactOut { token_in } => {
            let used = adapter.swap_exact_out(
                ledger,
                oracle.as_ref(),
                holding,
                token_in,
                op.token,
                amount,
                &op.context,
            )?;
            tape.append(token_in, used);
        }
        ProtocolAction::GetBorrowBalance => {
            tape.append(op.token, adapter.borrow_balance_of(op.token, op.account));
        }
        ProtocolAction::GetSupplyBalance => {
            tape.append(op.token, adapter.balance_of(op.token, op.account));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockLendingBackend;
    use crate::flash::MockFlashLender;
    use crate::oracle::MockPriceOracle;
    use crate::types::Bps;
    use rust_decimal_macros::dec;

    const USER: Address = Address(1);
    const HOLDING: Address = Address(2);
    const POOL: Address = Address(3);
    const FLASH_POOL: Address = Address(4);
    const LENDER: Address = Address(5);
    const WETH: Address = Address(10);
    const USDC: Address = Address(11);

    fn world() -> World {
        let mut oracle = MockPriceOracle::new();
        oracle.set_quote(WETH, dec!(2000));
        oracle.set_quote(USDC, dec!(1));

        let mut world = World::new(Box::new(oracle));
        world.adapters.register(Box::new(
            MockLendingBackend::new("mocklend", POOL)
                .with_max_ltv(Bps(8_000))
                .list_token(WETH, 18)
                .list_token(USDC, 6),
        ));
        world
            .lenders
            .register(LENDER, Box::new(MockFlashLender::new(FLASH_POOL, Bps(9))));
        world.ledger.mint(POOL, USDC, 10_000_000_000_000);
        world.ledger.mint(FLASH_POOL, USDC, 10_000_000_000_000);
        world
    }

    #[test]
    fn pull_caps_at_available_balance() {
        let mut w = world();
        w.ledger.mint(USER, USDC, 500);
        w.ledger.approve(USER, HOLDING, USDC, 10_000);

        let outs = execute(
            &mut w,
            HOLDING,
            &[Instruction::PullToken {
                token: USDC,
                amount: 1000,
                from: USER,
            }],
        )
        .unwrap();

        // requested 1000, only 500 existed: slot records 500
        assert_eq!(outs, vec![OutputSlot { token: USDC, amount: 500 }]);
        assert_eq!(w.ledger.balance_of(HOLDING, USDC), 500);
    }

    #[test]
    fn pull_caps_at_allowance() {
        let mut w = world();
        w.ledger.mint(USER, USDC, 1000);
        w.ledger.approve(USER, HOLDING, USDC, 300);

        let outs = execute(
            &mut w,
            HOLDING,
            &[Instruction::PullToken {
                token: USDC,
                amount: 1000,
                from: USER,
            }],
        )
        .unwrap();
        assert_eq!(outs[0].amount, 300);
    }

    #[test]
    fn arithmetic_combines_slots() {
        let mut w = world();
        let outs = execute(
            &mut w,
            HOLDING,
            &[
                Instruction::ToOutput { token: USDC, amount: 70 },
                Instruction::ToOutput { token: USDC, amount: 30 },
                Instruction::Add { a: SlotRef(0), b: SlotRef(1) },
                Instruction::Subtract { a: SlotRef(2), b: SlotRef(1) },
            ],
        )
        .unwrap();
        assert_eq!(outs[2].amount, 100);
        assert_eq!(outs[3].amount, 70);
    }

    #[test]
    fn add_with_mixed_tokens_fails() {
        let mut w = world();
        let err = execute(
            &mut w,
            HOLDING,
            &[
                Instruction::ToOutput { token: USDC, amount: 1 },
                Instruction::ToOutput { token: WETH, amount: 1 },
                Instruction::Add { a: SlotRef(0), b: SlotRef(1) },
            ],
        )
        .unwrap_err();
        assert!(matches!(err, RouterError::TokenMismatch { .. }));
    }

    #[test]
    fn forward_reference_aborts() {
        let mut w = world();
        let err = execute(
            &mut w,
            HOLDING,
            &[Instruction::PushToken { input: SlotRef(0), to: USER }],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RouterError::Tape(TapeError::ForwardReference { index: 0, len: 0 })
        ));
    }

    #[test]
    fn split_appends_both_parts() {
        let mut w = world();
        let outs = execute(
            &mut w,
            HOLDING,
            &[
                Instruction::ToOutput { token: USDC, amount: 100 },
                Instruction::Split { input: SlotRef(0), amount: 30 },
            ],
        )
        .unwrap();
        assert_eq!(outs[1].amount, 30);
        assert_eq!(outs[2].amount, 70);
    }

    #[test]
    fn deposit_borrow_chain() {
        let mut w = world();
        w.ledger.mint(USER, WETH, 5_000_000_000_000_000_000);
        w.ledger.approve(USER, HOLDING, WETH, u128::MAX);

        let outs = execute(
            &mut w,
            HOLDING,
            &[
                Instruction::PullToken {
                    token: WETH,
                    amount: 5_000_000_000_000_000_000,
                    from: USER,
                },
                Instruction::Approve {
                    input: SlotRef(0),
                    protocol: "mocklend".to_string(),
                },
                Instruction::Protocol(ProtocolOp {
                    protocol: "mocklend".to_string(),
                    action: ProtocolAction::DepositCollateral,
                    token: WETH,
                    account: USER,
                    amount: 0,
                    context: vec![],
                    input_slot: Some(SlotRef(0)),
                }),
                Instruction::Protocol(ProtocolOp {
                    protocol: "mocklend".to_string(),
                    action: ProtocolAction::Borrow,
                    token: USDC,
                    account: USER,
                    amount: 3_300_000_000,
                    context: vec![],
                    input_slot: None,
                }),
                Instruction::PushToken { input: SlotRef(1), to: USER },
            ],
        )
        .unwrap();

        assert_eq!(outs.len(), 2); // pulled WETH, borrowed USDC
        assert_eq!(outs[1], OutputSlot { token: USDC, amount: 3_300_000_000 });
        assert_eq!(w.ledger.balance_of(USER, USDC), 3_300_000_000);
    }

    #[test]
    fn repay_everything_via_reserved_index() {
        let mut w = world();
        w.ledger.mint(USER, WETH, 5_000_000_000_000_000_000);
        w.ledger.approve(USER, HOLDING, WETH, u128::MAX);

        // open a position with $1000 debt
        execute(
            &mut w,
            HOLDING,
            &[
                Instruction::PullToken {
                    token: WETH,
                    amount: 5_000_000_000_000_000_000,
                    from: USER,
                },
                Instruction::Approve {
                    input: SlotRef(0),
                    protocol: "mocklend".to_string(),
                },
                Instruction::Protocol(ProtocolOp {
                    protocol: "mocklend".to_string(),
                    action: ProtocolAction::DepositCollateral,
                    token: WETH,
                    account: USER,
                    amount: 0,
                    context: vec![],
                    input_slot: Some(SlotRef(0)),
                }),
                Instruction::Protocol(ProtocolOp {
                    protocol: "mocklend".to_string(),
                    action: ProtocolAction::Borrow,
                    token: USDC,
                    account: USER,
                    amount: 1_000_000_000,
                    context: vec![],
                    input_slot: None,
                }),
            ],
        )
        .unwrap();

        // now repay with the full holding balance: reserved index resolution
        let outs = execute(
            &mut w,
            HOLDING,
            &[
                Instruction::ToOutput { token: USDC, amount: 1_000_000_000 },
                Instruction::Approve {
                    input: SlotRef(0),
                    protocol: "mocklend".to_string(),
                },
                Instruction::Protocol(ProtocolOp {
                    protocol: "mocklend".to_string(),
                    action: ProtocolAction::Repay,
                    token: USDC,
                    account: USER,
                    amount: 0,
                    context: vec![],
                    input_slot: Some(SlotRef::BALANCE),
                }),
            ],
        )
        .unwrap();

        assert_eq!(outs[1].amount, 1_000_000_000); // full debt repaid
        let adapter = w.adapters.get("mocklend").unwrap();
        assert_eq!(adapter.borrow_balance_of(USDC, USER), 0);
    }

    #[test]
    fn flash_loan_repays_with_fee() {
        let mut w = world();
        // seed the holding area with enough to cover the 9bps fee
        w.ledger.mint(HOLDING, USDC, 10_000_000);

        let before_pool = w.ledger.balance_of(FLASH_POOL, USDC);
        let outs = execute(
            &mut w,
            HOLDING,
            &[Instruction::FlashLoan {
                lender: LENDER,
                token: USDC,
                amount: 1_000_000_000,
                body: vec![], // borrow and immediately repay
            }],
        )
        .unwrap();

        // nested appends were local: nothing on the outer tape
        assert!(outs.is_empty());
        let fee = 900_000; // 9bps of 1000 USDC
        assert_eq!(w.ledger.balance_of(FLASH_POOL, USDC), before_pool + fee);
        assert_eq!(w.ledger.balance_of(HOLDING, USDC), 10_000_000 - fee);
    }

    #[test]
    fn flash_loan_shortfall_fails() {
        let mut w = world();
        // holding area ends the body one unit short of principal + fee
        let err = execute(
            &mut w,
            HOLDING,
            &[Instruction::FlashLoan {
                lender: LENDER,
                token: USDC,
                amount: 100,
                body: vec![Instruction::PushToken { input: SlotRef(0), to: USER }],
            }],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RouterError::FlashLoanRepaymentShortfall { required: 100, held: 0, .. }
        ));
    }

    #[test]
    fn flash_body_reads_outer_slots() {
        let mut w = world();
        w.ledger.mint(HOLDING, USDC, 1_000);

        let outs = execute(
            &mut w,
            HOLDING,
            &[
                Instruction::ToOutput { token: USDC, amount: 42 },
                Instruction::FlashLoan {
                    lender: LENDER,
                    token: USDC,
                    amount: 500,
                    body: vec![
                        // cross-reference: outer slot 0 plus the borrowed slot
                        Instruction::Add { a: SlotRef(0), b: SlotRef(1) },
                    ],
                },
            ],
        )
        .unwrap();

        // only the outer literal survives the scope exit
        assert_eq!(outs, vec![OutputSlot { token: USDC, amount: 42 }]);
    }

    #[test]
    fn seeded_execution_prepends_slots() {
        let mut w = world();
        let outs = execute_seeded(
            &mut w,
            HOLDING,
            &[
                OutputSlot { token: WETH, amount: 7 },
                OutputSlot { token: USDC, amount: 9 },
            ],
            &[Instruction::ToOutput { token: USDC, amount: 1 }],
        )
        .unwrap();
        assert_eq!(outs.len(), 3);
        assert_eq!(outs[0].token, WETH);
        assert_eq!(outs[2].amount, 1);
    }

    #[test]
    fn unknown_protocol_aborts() {
        let mut w = world();
        let err = execute(
            &mut w,
            HOLDING,
            &[Instruction::Protocol(ProtocolOp {
                protocol: "nosuch".to_string(),
                action: ProtocolAction::GetBorrowBalance,
                token: USDC,
                account: USER,
                amount: 0,
                context: vec![],
                input_slot: None,
            })],
        )
        .unwrap_err();
        assert_eq!(err, RouterError::UnknownProtocol("nosuch".to_string()));
    }
}
