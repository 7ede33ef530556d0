//! End-to-end restructuring flows through the full engine: atomic instruction
//! execution, flash-loan migrations, and leverage-up conditional orders.

use restructure_core::*;
use rust_decimal_macros::dec;

const ALICE: Address = Address(0x01);
const WETH: Address = Address(0x10);
const USDC: Address = Address(0x11);
const ALEND_POOL: Address = Address(0xB0);
const BLEND_POOL: Address = Address(0xB1);
const FLASH: Address = Address(0xC0);
const FLASH_POOL: Address = Address(0xC1);

const ONE_WETH: u128 = 1_000_000_000_000_000_000;
const ONE_USDC: u128 = 1_000_000;

fn build_engine() -> RestructureEngine {
    let mut oracle = MockPriceOracle::new();
    oracle.set_quote(WETH, dec!(2000));
    oracle.set_quote(USDC, dec!(1));

    let mut engine = RestructureEngine::new(EngineConfig::default(), Box::new(oracle));
    engine.register_adapter(Box::new(
        MockLendingBackend::new("alend", ALEND_POOL)
            .list_token(WETH, 18)
            .list_token(USDC, 6),
    ));
    engine.register_adapter(Box::new(
        MockLendingBackend::new("blend", BLEND_POOL)
            .list_token(WETH, 18)
            .list_token(USDC, 6),
    ));
    engine.register_lender(FLASH, Box::new(MockFlashLender::new(FLASH_POOL, Bps(5))));

    for pool in [ALEND_POOL, BLEND_POOL, FLASH_POOL] {
        engine.mint(pool, USDC, 10_000_000 * ONE_USDC);
        engine.mint(pool, WETH, 10_000 * ONE_WETH);
    }
    engine
}

fn op(
    protocol: &str,
    action: ProtocolAction,
    token: Address,
    amount: u128,
    input_slot: Option<SlotRef>,
) -> Instruction {
    Instruction::Protocol(ProtocolOp {
        protocol: protocol.to_string(),
        action,
        token,
        account: ALICE,
        amount,
        context: vec![],
        input_slot,
    })
}

/// 5 WETH collateral, 4,000 USDC debt on alend, opened through instructions.
fn open_position(engine: &mut RestructureEngine) {
    let holding = engine.config().holding_address;
    engine.mint(ALICE, WETH, 5 * ONE_WETH);
    engine
        .world_mut()
        .ledger
        .approve(ALICE, holding, WETH, u128::MAX);
    engine
        .execute(
            holding,
            &[
                Instruction::PullToken {
                    token: WETH,
                    amount: 5 * ONE_WETH,
                    from: ALICE,
                },
                Instruction::Approve {
                    input: SlotRef(0),
                    protocol: "alend".to_string(),
                },
                op("alend", ProtocolAction::DepositCollateral, WETH, 0, Some(SlotRef(0))),
                op("alend", ProtocolAction::Borrow, USDC, 4_000 * ONE_USDC, None),
                Instruction::PushToken {
                    input: SlotRef(1),
                    to: ALICE,
                },
            ],
        )
        .unwrap();
}

fn books(engine: &RestructureEngine, protocol: &str) -> (u128, u128) {
    let adapter = engine.world().adapters.get(protocol).unwrap();
    (
        adapter.balance_of(WETH, ALICE),
        adapter.borrow_balance_of(USDC, ALICE),
    )
}

#[test]
fn flash_loan_migrates_position_between_protocols() {
    let mut engine = build_engine();
    let holding = engine.config().holding_address;
    open_position(&mut engine);

    assert_eq!(books(&engine, "alend"), (5 * ONE_WETH, 4_000 * ONE_USDC));
    assert_eq!(books(&engine, "blend"), (0, 0));

    let fee = 2 * ONE_USDC; // 5 bps of 4,000
    let migration = vec![Instruction::FlashLoan {
        lender: FLASH,
        token: USDC,
        amount: 4_000 * ONE_USDC,
        body: vec![
            Instruction::Approve {
                input: SlotRef(0),
                protocol: "alend".to_string(),
            },
            op("alend", ProtocolAction::Repay, USDC, 0, Some(SlotRef(0))),
            op(
                "alend",
                ProtocolAction::WithdrawCollateral,
                WETH,
                0,
                Some(SlotRef::BALANCE),
            ),
            Instruction::Approve {
                input: SlotRef(2),
                protocol: "blend".to_string(),
            },
            op("blend", ProtocolAction::DepositCollateral, WETH, 0, Some(SlotRef(2))),
            op(
                "blend",
                ProtocolAction::Borrow,
                USDC,
                4_000 * ONE_USDC + fee,
                None,
            ),
        ],
    }];
    engine.execute(holding, &migration).unwrap();

    assert_eq!(books(&engine, "alend"), (0, 0));
    assert_eq!(
        books(&engine, "blend"),
        (5 * ONE_WETH, 4_000 * ONE_USDC + fee)
    );
    // nothing stranded in the holding area, and the flash pool earned its fee
    assert_eq!(engine.world().ledger.balance_of(holding, USDC), 0);
    assert_eq!(
        engine.world().ledger.balance_of(FLASH_POOL, USDC),
        10_000_000 * ONE_USDC + fee
    );
}

#[test]
fn flash_loan_shortfall_aborts_and_rolls_back() {
    let mut engine = build_engine();
    let holding = engine.config().holding_address;
    open_position(&mut engine);
    let (coll_before, debt_before) = books(&engine, "alend");

    // repay the debt with the borrowed funds but never procure the repayment
    let doomed = vec![Instruction::FlashLoan {
        lender: FLASH,
        token: USDC,
        amount: 4_000 * ONE_USDC,
        body: vec![
            Instruction::Approve {
                input: SlotRef(0),
                protocol: "alend".to_string(),
            },
            op("alend", ProtocolAction::Repay, USDC, 0, Some(SlotRef(0))),
        ],
    }];
    let err = engine.execute(holding, &doomed).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Router(RouterError::FlashLoanRepaymentShortfall { token: USDC, .. })
    ));

    // the repay inside the body was undone along with the borrow
    assert_eq!(books(&engine, "alend"), (coll_before, debt_before));
    assert_eq!(
        engine.world().ledger.balance_of(FLASH_POOL, USDC),
        10_000_000 * ONE_USDC
    );
}

#[test]
fn pull_token_caps_at_held_balance() {
    let mut engine = build_engine();
    let holding = engine.config().holding_address;
    engine.mint(ALICE, USDC, 500);
    engine.world_mut().ledger.approve(ALICE, holding, USDC, 10_000);

    let outs = engine
        .execute(
            holding,
            &[Instruction::PullToken {
                token: USDC,
                amount: 1_000,
                from: ALICE,
            }],
        )
        .unwrap();
    assert_eq!(outs[0], OutputSlot { token: USDC, amount: 500 });
    assert_eq!(engine.world().ledger.balance_of(ALICE, USDC), 0);
}

#[test]
fn forward_slot_reference_fails_whole_execution() {
    let mut engine = build_engine();
    let holding = engine.config().holding_address;
    engine.mint(ALICE, USDC, 1_000);
    engine.world_mut().ledger.approve(ALICE, holding, USDC, 1_000);

    let err = engine
        .execute(
            holding,
            &[
                Instruction::PullToken {
                    token: USDC,
                    amount: 1_000,
                    from: ALICE,
                },
                Instruction::Add {
                    a: SlotRef(0),
                    b: SlotRef(5),
                },
            ],
        )
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Router(RouterError::Tape(TapeError::ForwardReference { index: 5, .. }))
    ));
    // the pull was rolled back
    assert_eq!(engine.world().ledger.balance_of(ALICE, USDC), 1_000);
}

#[test]
fn reserved_index_is_rejected_outside_protocol_ops() {
    let mut engine = build_engine();
    let holding = engine.config().holding_address;

    let err = engine
        .execute(
            holding,
            &[Instruction::PushToken {
                input: SlotRef::BALANCE,
                to: ALICE,
            }],
        )
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Router(RouterError::ReservedIndexNotAllowed)
    ));
}

#[test]
fn nested_flash_loan_scopes_do_not_leak_slots() {
    let mut engine = build_engine();
    let holding = engine.config().holding_address;
    // pre-fund the holding area with enough of each token to cover the fees
    engine.mint(holding, USDC, 100 * ONE_USDC);
    engine.mint(holding, WETH, ONE_WETH / 100);

    let outs = engine
        .execute(
            holding,
            &[
                Instruction::FlashLoan {
                    lender: FLASH,
                    token: USDC,
                    amount: 1_000 * ONE_USDC,
                    body: vec![Instruction::FlashLoan {
                        lender: FLASH,
                        token: WETH,
                        amount: ONE_WETH,
                        // the inner body reads the outer borrow by absolute index
                        body: vec![Instruction::Split {
                            input: SlotRef(0),
                            amount: 400 * ONE_USDC,
                        }],
                    }],
                },
                Instruction::ToOutput {
                    token: USDC,
                    amount: 1,
                },
            ],
        )
        .unwrap();

    // inner repayment needs the borrowed WETH back untouched, outer repayment
    // the USDC plus fee from the pre-funded holding; neither scope's slots
    // survive into the final tape
    assert_eq!(outs.len(), 1);
    assert_eq!(outs[0], OutputSlot { token: USDC, amount: 1 });
}

#[test]
fn leverage_order_settles_through_hooks() {
    let mut engine = build_engine();
    let solver = engine.config().settlement_counterparty;
    let holding = engine.config().holding_address;

    // under-levered position: 5 WETH collateral, 500 USDC debt, LTV 5%
    open_position(&mut engine);
    engine
        .world_mut()
        .ledger
        .approve(ALICE, holding, USDC, u128::MAX);
    engine
        .execute(
            holding,
            &[
                Instruction::PullToken {
                    token: USDC,
                    amount: 3_500 * ONE_USDC,
                    from: ALICE,
                },
                Instruction::Approve {
                    input: SlotRef(0),
                    protocol: "alend".to_string(),
                },
                op("alend", ProtocolAction::Repay, USDC, 0, Some(SlotRef(0))),
            ],
        )
        .unwrap();
    assert_eq!(books(&engine, "alend"), (5 * ONE_WETH, 500 * ONE_USDC));

    let request = CreateOrderRequest {
        trigger: TriggerParams {
            protocol: "alend".to_string(),
            protocol_context: vec![],
            kind: TriggerKind::Leverage,
            trigger_ltv: Bps(1_000),
            target_ltv: Bps(2_500),
            collateral_token: WETH,
            debt_token: USDC,
            collateral_decimals: 18,
            debt_decimals: 6,
            max_slippage: Bps(100),
            num_chunks: 1,
        },
        // procure the sell funds by borrowing against the position
        pre_instructions: vec![op(
            "alend",
            ProtocolAction::Borrow,
            USDC,
            0,
            Some(SlotRef(0)),
        )],
        // fold the bought collateral back in
        post_instructions: vec![
            Instruction::Approve {
                input: SlotRef(1),
                protocol: "alend".to_string(),
            },
            op(
                "alend",
                ProtocolAction::DepositCollateral,
                WETH,
                0,
                Some(SlotRef(1)),
            ),
        ],
        sell_token: USDC,
        buy_token: WETH,
        app_data_hash: [0u8; 32],
        max_iterations: 1,
        sell_token_refund_address: ALICE,
    };
    let hash = engine.create_order(ALICE, Salt(7), request).unwrap();

    // $500 debt against a $2,500 target on $10,000 collateral: borrow and
    // sell $2,000, buying at least 0.99 WETH after slippage
    let pre = engine.execute_pre_hook(solver, hash).unwrap();
    assert_eq!(pre.sell_amount, 2_000 * ONE_USDC);
    assert_eq!(pre.min_buy_amount, 99 * ONE_WETH / 100);

    let ledger = &mut engine.world_mut().ledger;
    ledger.mint(solver, WETH, ONE_WETH);
    ledger.transfer(holding, solver, USDC, pre.sell_amount).unwrap();
    ledger.transfer(solver, holding, WETH, ONE_WETH).unwrap();
    let post = engine
        .execute_post_hook(solver, hash, pre.sell_amount, ONE_WETH)
        .unwrap();

    assert!(post.completed);
    assert_eq!(books(&engine, "alend"), (6 * ONE_WETH, 2_500 * ONE_USDC));
    assert_eq!(engine.order(hash).unwrap().status, OrderStatus::Completed);
}

#[test]
fn instruction_lists_round_trip_through_json() {
    let list = vec![
        Instruction::PullToken {
            token: WETH,
            amount: ONE_WETH,
            from: ALICE,
        },
        Instruction::FlashLoan {
            lender: FLASH,
            token: USDC,
            amount: 4_000 * ONE_USDC,
            body: vec![
                Instruction::Split {
                    input: SlotRef(0),
                    amount: ONE_USDC,
                },
                op("alend", ProtocolAction::Swap { token_out: WETH }, USDC, 0, Some(SlotRef(1))),
            ],
        },
        Instruction::PushToken {
            input: SlotRef(2),
            to: ALICE,
        },
    ];

    let json = serde_json::to_string_pretty(&list).unwrap();
    let back: Vec<Instruction> = serde_json::from_str(&json).unwrap();
    assert_eq!(list, back);
}
