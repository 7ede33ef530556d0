//! Lending Position Restructuring Simulation.
//!
//! Demonstrates the full engine lifecycle: direct instruction execution,
//! flash-loan collateral migration, and conditional orders settled through
//! the two-phase hook handshake by a simulated solver.

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

fn main() {
    println!("Lending Position Restructuring Engine Simulation");
    println!("Dataflow Instructions, Flash Loans, Conditional Orders\n");

    scenario_1_leverage_loop();
    scenario_2_flash_migration();
    scenario_3_conditional_deleverage();
    scenario_4_settlement_rejection();

    println!("\nAll simulations completed successfully.");
}

fn build_engine(eth_price: rust_decimal::Decimal) -> (RestructureEngine, MockPriceOracle) {
    let mut oracle = MockPriceOracle::new();
    oracle.set_quote(WETH, eth_price);
    oracle.set_quote(USDC, dec!(1));

    let mut engine = RestructureEngine::new(EngineConfig::default(), Box::new(oracle.clone()));
    engine.register_adapter(Box::new(
        MockLendingBackend::new("alend", ALEND_POOL)
            .with_max_ltv(Bps(8_000))
            .list_token(WETH, 18)
            .list_token(USDC, 6),
    ));
    engine.register_adapter(Box::new(
        MockLendingBackend::new("blend", BLEND_POOL)
            .with_max_ltv(Bps(8_000))
            .list_token(WETH, 18)
            .list_token(USDC, 6),
    ));
    engine.register_lender(FLASH, Box::new(MockFlashLender::new(FLASH_POOL, Bps(5))));

    // pool liquidity
    for pool in [ALEND_POOL, BLEND_POOL, FLASH_POOL] {
        engine.mint(pool, USDC, 10_000_000 * ONE_USDC);
        engine.mint(pool, WETH, 10_000 * ONE_WETH);
    }
    (engine, oracle)
}

fn print_position(engine: &RestructureEngine, protocol: &str, account: Address) {
    let adapter = engine.world().adapters.get(protocol).unwrap();
    let (coll, debt) = adapter
        .position_value(engine.world().oracle.as_ref(), account, &[])
        .unwrap();
    let ltv = current_ltv_bps(coll, debt);
    println!(
        "  {protocol}: collateral {coll}, debt {debt}, LTV {}.{:02}%",
        ltv / 100,
        ltv % 100
    );
}

fn protocol_op(
    protocol: &str,
    action: ProtocolAction,
    token: Address,
    account: Address,
    amount: u128,
    input_slot: Option<SlotRef>,
) -> Instruction {
    Instruction::Protocol(ProtocolOp {
        protocol: protocol.to_string(),
        action,
        token,
        account,
        amount,
        context: vec![],
        input_slot,
    })
}

/// Deposit, borrow, swap, redeposit: one leverage turn as a single atomic
/// instruction list.
fn scenario_1_leverage_loop() {
    println!("Scenario 1: Leverage Loop\n");

    let (mut engine, _) = build_engine(dec!(2000));
    let holding = engine.config().holding_address;
    engine.mint(ALICE, WETH, 2 * ONE_WETH);
    engine
        .world_mut()
        .ledger
        .approve(ALICE, holding, WETH, u128::MAX);

    println!("  Alice starts with 2 WETH, ETH at $2,000");

    let instructions = vec![
        Instruction::PullToken {
            token: WETH,
            amount: 2 * ONE_WETH,
            from: ALICE,
        },
        Instruction::Approve {
            input: SlotRef(0),
            protocol: "alend".to_string(),
        },
        protocol_op(
            "alend",
            ProtocolAction::DepositCollateral,
            WETH,
            ALICE,
            0,
            Some(SlotRef(0)),
        ),
        // borrow half the collateral value and spin it back into WETH
        protocol_op(
            "alend",
            ProtocolAction::Borrow,
            USDC,
            ALICE,
            2_000 * ONE_USDC,
            None,
        ),
        Instruction::Approve {
            input: SlotRef(1),
            protocol: "alend".to_string(),
        },
        protocol_op(
            "alend",
            ProtocolAction::Swap { token_out: WETH },
            USDC,
            ALICE,
            0,
            Some(SlotRef(1)),
        ),
        Instruction::Approve {
            input: SlotRef(2),
            protocol: "alend".to_string(),
        },
        protocol_op(
            "alend",
            ProtocolAction::DepositCollateral,
            WETH,
            ALICE,
            0,
            Some(SlotRef(2)),
        ),
    ];

    let outputs = engine.execute(holding, &instructions).unwrap();
    println!("  Executed {} instructions, {} tape slots", instructions.len(), outputs.len());
    print_position(&engine, "alend", ALICE);
    println!();
}

/// Move a whole position between protocols inside one flash loan.
fn scenario_2_flash_migration() {
    println!("Scenario 2: Flash-Loan Collateral Migration\n");

    let (mut engine, _) = build_engine(dec!(2000));
    let holding = engine.config().holding_address;
    engine.mint(ALICE, WETH, 5 * ONE_WETH);
    engine
        .world_mut()
        .ledger
        .approve(ALICE, holding, WETH, u128::MAX);

    // open the starting position: 5 WETH collateral, 4,000 USDC debt on alend
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
                protocol_op(
                    "alend",
                    ProtocolAction::DepositCollateral,
                    WETH,
                    ALICE,
                    0,
                    Some(SlotRef(0)),
                ),
                protocol_op(
                    "alend",
                    ProtocolAction::Borrow,
                    USDC,
                    ALICE,
                    4_000 * ONE_USDC,
                    None,
                ),
                Instruction::PushToken {
                    input: SlotRef(1),
                    to: ALICE,
                },
            ],
        )
        .unwrap();

    println!("  Before migration:");
    print_position(&engine, "alend", ALICE);
    print_position(&engine, "blend", ALICE);

    // flash-borrow the debt, clear alend, rebuild on blend, borrow the
    // repayment. fee is 5 bps, so blend's debt ends 2 USDC higher.
    let fee = 4_000 * ONE_USDC * 5 / 10_000;
    let migration = vec![Instruction::FlashLoan {
        lender: FLASH,
        token: USDC,
        amount: 4_000 * ONE_USDC,
        body: vec![
            Instruction::Approve {
                input: SlotRef(0),
                protocol: "alend".to_string(),
            },
            protocol_op(
                "alend",
                ProtocolAction::Repay,
                USDC,
                ALICE,
                0,
                Some(SlotRef(0)),
            ),
            protocol_op(
                "alend",
                ProtocolAction::WithdrawCollateral,
                WETH,
                ALICE,
                0,
                Some(SlotRef::BALANCE),
            ),
            Instruction::Approve {
                input: SlotRef(2),
                protocol: "blend".to_string(),
            },
            protocol_op(
                "blend",
                ProtocolAction::DepositCollateral,
                WETH,
                ALICE,
                0,
                Some(SlotRef(2)),
            ),
            protocol_op(
                "blend",
                ProtocolAction::Borrow,
                USDC,
                ALICE,
                4_000 * ONE_USDC + fee,
                None,
            ),
        ],
    }];

    engine.execute(holding, &migration).unwrap();

    println!("\n  After migration (flash fee {} USDC rolled into blend debt):", fee / ONE_USDC);
    print_position(&engine, "alend", ALICE);
    print_position(&engine, "blend", ALICE);
    println!();
}

fn deleverage_order() -> CreateOrderRequest {
    CreateOrderRequest {
        trigger: TriggerParams {
            protocol: "alend".to_string(),
            protocol_context: vec![],
            kind: TriggerKind::Deleverage,
            trigger_ltv: Bps(4_000),
            target_ltv: Bps(2_500),
            collateral_token: WETH,
            debt_token: USDC,
            collateral_decimals: 18,
            debt_decimals: 6,
            max_slippage: Bps(100),
            num_chunks: 2,
        },
        pre_instructions: vec![protocol_op(
            "alend",
            ProtocolAction::WithdrawCollateral,
            WETH,
            ALICE,
            0,
            Some(SlotRef(0)),
        )],
        post_instructions: vec![
            Instruction::Approve {
                input: SlotRef(1),
                protocol: "alend".to_string(),
            },
            protocol_op(
                "alend",
                ProtocolAction::Repay,
                USDC,
                ALICE,
                0,
                Some(SlotRef(1)),
            ),
        ],
        sell_token: WETH,
        buy_token: USDC,
        app_data_hash: [0u8; 32],
        max_iterations: 4,
        sell_token_refund_address: ALICE,
    }
}

/// Open a position, arm a deleverage order, crash the price, and let a
/// simulated solver settle it chunk by chunk through the hook handshake.
fn scenario_3_conditional_deleverage() {
    println!("Scenario 3: Conditional Deleverage In Chunks\n");

    let (mut engine, mut oracle) = build_engine(dec!(2000));
    let holding = engine.config().holding_address;
    let solver = engine.config().settlement_counterparty;
    engine.mint(ALICE, WETH, 5 * ONE_WETH);
    engine.mint(solver, USDC, 100_000 * ONE_USDC);
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
                protocol_op(
                    "alend",
                    ProtocolAction::DepositCollateral,
                    WETH,
                    ALICE,
                    0,
                    Some(SlotRef(0)),
                ),
                protocol_op(
                    "alend",
                    ProtocolAction::Borrow,
                    USDC,
                    ALICE,
                    3_000 * ONE_USDC,
                    None,
                ),
                Instruction::PushToken {
                    input: SlotRef(1),
                    to: ALICE,
                },
            ],
        )
        .unwrap();

    let hash = engine.create_order(ALICE, Salt(1), deleverage_order()).unwrap();
    println!("  Order {hash} armed: trigger LTV 40%, target 25%, 2 chunks");
    print_position(&engine, "alend", ALICE);

    match engine.get_tradeable_order(hash) {
        Err(e) => println!("  Poll at $2,000: {e}"),
        Ok(_) => unreachable!("trigger cannot fire at this price"),
    }

    println!("\n  ETH crashes to $1,200...");
    oracle.set_quote(WETH, dec!(1200));
    engine.set_oracle(Box::new(oracle.clone()));
    print_position(&engine, "alend", ALICE);

    let mut round = 1;
    loop {
        let tradeable = match engine.get_tradeable_order(hash) {
            Ok(t) => t,
            Err(e) => {
                println!("  Poll: {e}");
                break;
            }
        };
        println!(
            "\n  Chunk {round}: solver sees sell {:.4} WETH, min buy {:.2} USDC",
            tradeable.sell_amount as f64 / ONE_WETH as f64,
            tradeable.buy_amount as f64 / ONE_USDC as f64,
        );

        let pre = engine.execute_pre_hook(solver, hash).unwrap();

        // off-engine settlement: the solver takes the sell funds and delivers
        // the buy funds at the oracle price
        let buy = pre.sell_amount * 1_200 / ONE_WETH * ONE_USDC;
        let ledger = &mut engine.world_mut().ledger;
        ledger.transfer(holding, solver, WETH, pre.sell_amount).unwrap();
        ledger.transfer(solver, holding, USDC, buy).unwrap();

        let post = engine
            .execute_post_hook(solver, hash, pre.sell_amount, buy)
            .unwrap();
        println!(
            "  Settled {:.4} WETH for {:.2} USDC",
            pre.sell_amount as f64 / ONE_WETH as f64,
            buy as f64 / ONE_USDC as f64,
        );
        print_position(&engine, "alend", ALICE);

        if post.completed {
            println!("  Order completed after {} iterations", post.iteration);
            break;
        }
        round += 1;
    }

    println!("  Events recorded: {}\n", engine.events().len());
}

/// A settlement that under-delivers is rejected atomically; the solver makes
/// the order whole on the retry.
fn scenario_4_settlement_rejection() {
    println!("Scenario 4: Settlement Rejection and Retry\n");

    let (mut engine, mut oracle) = build_engine(dec!(2000));
    let holding = engine.config().holding_address;
    let solver = engine.config().settlement_counterparty;
    engine.mint(ALICE, WETH, 5 * ONE_WETH);
    engine.mint(solver, USDC, 100_000 * ONE_USDC);
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
                protocol_op(
                    "alend",
                    ProtocolAction::DepositCollateral,
                    WETH,
                    ALICE,
                    0,
                    Some(SlotRef(0)),
                ),
                protocol_op(
                    "alend",
                    ProtocolAction::Borrow,
                    USDC,
                    ALICE,
                    3_000 * ONE_USDC,
                    None,
                ),
                Instruction::PushToken {
                    input: SlotRef(1),
                    to: ALICE,
                },
            ],
        )
        .unwrap();

    let hash = engine.create_order(ALICE, Salt(1), deleverage_order()).unwrap();
    oracle.set_quote(WETH, dec!(1200));
    engine.set_oracle(Box::new(oracle.clone()));

    let pre = engine.execute_pre_hook(solver, hash).unwrap();
    println!(
        "  Pre-hook committed: sell {:.4} WETH, min buy {:.2} USDC",
        pre.sell_amount as f64 / ONE_WETH as f64,
        pre.min_buy_amount as f64 / ONE_USDC as f64,
    );

    // the solver shorts the fill by 10 USDC
    let short_buy = pre.min_buy_amount - 10 * ONE_USDC;
    let err = engine
        .execute_post_hook(solver, hash, pre.sell_amount, short_buy)
        .unwrap_err();
    println!("  Short settlement rejected: {err}");
    print_position(&engine, "alend", ALICE);

    // retry, whole this time
    let buy = pre.sell_amount * 1_200 / ONE_WETH * ONE_USDC;
    let ledger = &mut engine.world_mut().ledger;
    ledger.transfer(holding, solver, WETH, pre.sell_amount).unwrap();
    ledger.transfer(solver, holding, USDC, buy).unwrap();

    engine
        .execute_post_hook(solver, hash, pre.sell_amount, buy)
        .unwrap();
    println!("  Retry settled {:.2} USDC against the debt", buy as f64 / ONE_USDC as f64);
    print_position(&engine, "alend", ALICE);
}
