#![allow(non_snake_case)]

use alloy::primitives::{
    B256,
    U256,
};
use lottery_client::{
    DrawStage,
    DrawWorkflow,
    NetworkConfig,
    Session,
    SpendingApprovalMode,
    chain::RoundData,
    test_helpers::{
        FAKE_CHAIN_ID,
        FakeChain,
        Method,
        RecordingNotifier,
        SentTransaction,
        wait_until,
    },
    workflow::TriggerOptions,
};
use num_bigint::BigUint;
use num_traits::Zero;
use std::sync::Arc;

fn config(chain: &FakeChain) -> NetworkConfig {
    NetworkConfig {
        chain_id: FAKE_CHAIN_ID,
        rpc_url: "ws://127.0.0.1:8545".to_string(),
        lottery: chain.lottery_address(),
        block_explorer: Some("sepolia.etherscan.io".to_string()),
        vrf_subscription_id: Some(U256::from(7)),
        vrf_key_hash: Some(B256::repeat_byte(0x11)),
        spending_approval_mode: SpendingApprovalMode::Manual,
        token_sale: Some(chain.sale_address()),
    }
}

async fn session(chain: &FakeChain) -> Arc<Session<FakeChain>> {
    Session::connect(
        chain.clone(),
        Some(FakeChain::player_address()),
        config(chain),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn watch__follows_a_full_draw_cycle() {
    // given
    let chain = FakeChain::new();
    let notifier = RecordingNotifier::default();
    let workflow = Arc::new(DrawWorkflow::new(session(&chain).await, notifier.clone()));
    let (stage, _subscription) = workflow.watch().await.unwrap();
    assert_eq!(*stage.borrow(), Some(DrawStage::Round));

    // when the drawing window opens
    chain.set_stage(true, true, false);
    chain.mine_block();
    wait_until(|| *stage.borrow() == Some(DrawStage::Trigger)).await;

    // and randomness is requested
    workflow.trigger(TriggerOptions::default()).await.unwrap();
    chain.mine_block();
    wait_until(|| *stage.borrow() == Some(DrawStage::WaitForVrf)).await;

    // and the oracle answers
    chain.set_stage(true, false, true);
    chain.mine_block();
    wait_until(|| *stage.borrow() == Some(DrawStage::CloseRound)).await;

    // and the round is closed
    workflow.close_round().await.unwrap();
    chain.mine_block();
    wait_until(|| *stage.borrow() == Some(DrawStage::Round)).await;

    // then
    assert_eq!(workflow.session().current_round().await.unwrap(), 2);
    assert_eq!(chain.calls(Method::Draw), 1);
    assert_eq!(chain.calls(Method::CloseRound), 1);
    assert!(notifier.messages().is_empty());
}

#[tokio::test]
async fn purchase__winning_ticket__can_be_withdrawn_once() {
    // given
    let chain = FakeChain::new();
    let session = session(&chain).await;
    let player = FakeChain::player_address();

    // when
    session
        .purchase_ticket(&[6, 5, 4, 3, 2, 1], None)
        .await
        .unwrap();
    chain.add_round(
        1,
        RoundData {
            prizes: [10u8, 20, 30, 40, 50].map(BigUint::from),
            stash: BigUint::zero(),
            total_combinations: BigUint::from(1u8),
            draw_block_number: 110,
            closure_block_number: 111,
            numbers: vec![1, 2, 3, 40, 50, 60],
            winners: [0, 1, 0, 0, 0],
        },
    );
    chain.with_state(|state| {
        if let Some(prize) = state.prizes.get_mut(&0) {
            prize.prize = BigUint::from(20u8);
        }
    });
    let tickets = session.tickets(player).await.unwrap();

    // then
    assert_eq!(tickets.len(), 1);
    let ticket = tickets[0].clone();
    assert_eq!(ticket.numbers, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(ticket.matches(), Some(3));
    let extended = session.extended_ticket(ticket.clone()).await.unwrap();
    assert!(extended.can_withdraw());

    session.withdraw_prize(ticket.id).await.unwrap();
    let extended = session.extended_ticket(ticket.clone()).await.unwrap();
    assert!(extended.is_withdrawn());
    assert!(session.withdraw_prize(ticket.id).await.is_err());

    let sent = chain.sent();
    assert!(matches!(sent[0], SentTransaction::Approve { .. }));
    assert!(matches!(sent[1], SentTransaction::CreateTicket { .. }));
    assert_eq!(sent[2], SentTransaction::WithdrawPrize { ticket_id: 0 });
}
