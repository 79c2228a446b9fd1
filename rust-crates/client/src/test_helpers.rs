//! In-memory chain used by unit and integration tests.

use crate::{
    Error,
    Result,
    chain::{
        BlockNotification,
        BlockStream,
        DaiPermit,
        DrawRequest,
        EventQuery,
        LotteryChain,
        LotteryWriter,
        PermitSignature,
        RoundData,
        SignedPermit,
        TicketPrize,
        TicketRecord,
    },
    lock,
    numeric::currency_for_tokens,
    odds::covered_combinations,
    workflow::{
        Notifier,
        UserMessage,
    },
};
use alloy::{
    primitives::{
        Address,
        B256,
        TxHash,
        U256,
    },
    signers::{
        SignerSync,
        local::PrivateKeySigner,
    },
};
use futures::StreamExt;
use num_bigint::BigUint;
use num_traits::Zero;
use std::{
    collections::{
        BTreeMap,
        HashMap,
    },
    sync::{
        Arc,
        Mutex,
    },
};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

pub const FAKE_CHAIN_ID: u64 = 31337;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    ChainId,
    Owner,
    Paused,
    IsOpen,
    CurrencyToken,
    Jackpot,
    BaseTicketPrice,
    TicketPrice,
    CurrentRound,
    NextDrawTime,
    TicketIds,
    Ticket,
    TicketPrize,
    RoundData,
    GovernanceToken,
    CanDraw,
    WaitingForClosure,
    UnclaimedRevenue,
    BalanceOf,
    Allowance,
    TokenName,
    PermitNonce,
    DaiPermitNonce,
    BlockTimestamp,
    SaleCurrencyToken,
    SalePrice,
    SaleIsOpen,
    SaleBalance,
    FindTransaction,
    SubscribeBlocks,
    SignHash,
    Approve,
    CreateTicket,
    CreateTicketWithPermit,
    PurchaseSaleTokens,
    WithdrawSaleTokens,
    WithdrawPrize,
    Draw,
    CloseRound,
    WithdrawRevenue,
}

impl Method {
    fn is_write(self) -> bool {
        matches!(
            self,
            Method::Approve
                | Method::CreateTicket
                | Method::CreateTicketWithPermit
                | Method::PurchaseSaleTokens
                | Method::WithdrawSaleTokens
                | Method::WithdrawPrize
                | Method::Draw
                | Method::CloseRound
                | Method::WithdrawRevenue
        )
    }
}

/// A transaction the fake has mined, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentTransaction {
    Approve {
        token: Address,
        spender: Address,
        amount: BigUint,
    },
    CreateTicket {
        referral_code: B256,
        numbers: Vec<u8>,
    },
    CreateTicketWithPermit {
        referral_code: B256,
        numbers: Vec<u8>,
        permit: SignedPermit,
    },
    PurchaseSaleTokens {
        amount: BigUint,
        permit: DaiPermit,
    },
    WithdrawSaleTokens,
    WithdrawPrize {
        ticket_id: u64,
    },
    Draw(DrawRequest),
    CloseRound,
    WithdrawRevenue {
        account: Address,
    },
}

pub struct FakeState {
    pub chain_id: u64,
    pub signer: Option<Address>,
    pub block_number: u64,
    pub paused: bool,
    pub open: bool,
    pub can_draw: bool,
    pub waiting_for_closure: bool,
    pub jackpot: BigUint,
    pub base_ticket_price: BigUint,
    pub current_round: u64,
    pub next_draw_time: u64,
    pub tickets: BTreeMap<u64, TicketRecord>,
    pub prizes: HashMap<u64, TicketPrize>,
    pub rounds: HashMap<u64, RoundData>,
    pub balances: HashMap<(Address, Address), BigUint>,
    pub allowances: HashMap<(Address, Address, Address), BigUint>,
    pub unclaimed_revenue: HashMap<Address, BigUint>,
    pub token_name: String,
    /// Permit nonces keyed by (token, owner); both permit flavours share them.
    pub permit_nonces: HashMap<(Address, Address), u64>,
    pub block_timestamp: u64,
    pub sale_price: BigUint,
    pub sale_open: bool,
    pub sale_balances: HashMap<Address, BigUint>,
    pub events: HashMap<EventQuery, TxHash>,
    pub sent: Vec<SentTransaction>,
    calls: HashMap<Method, usize>,
    failures: HashMap<Method, usize>,
    fail_subscription: bool,
    next_transaction: u64,
}

impl FakeState {
    fn ticket_price(&self, numbers: &[u8]) -> BigUint {
        &self.base_ticket_price * covered_combinations(numbers.len())
    }

    fn issue_ticket(&mut self, player: Address, numbers: Vec<u8>) {
        let id = self.tickets.keys().next_back().map_or(0, |id| id + 1);
        self.tickets.insert(
            id,
            TicketRecord {
                id,
                player,
                round: self.current_round,
                block_number: self.block_number + 1,
                numbers,
            },
        );
        self.prizes.insert(
            id,
            TicketPrize {
                prize: BigUint::zero(),
                withdraw_block_number: 0,
            },
        );
    }

    fn nonce(&self, token: Address, owner: Address) -> BigUint {
        BigUint::from(
            self.permit_nonces
                .get(&(token, owner))
                .copied()
                .unwrap_or_default(),
        )
    }

    /// Validates a permit the way the token would, then burns its nonce.
    /// EIP-2612 permits carry no nonce of their own; the current one is used.
    fn consume_permit(
        &mut self,
        token: Address,
        owner: Address,
        nonce: Option<&BigUint>,
        deadline: u64,
    ) -> Result<()> {
        if deadline < self.block_timestamp {
            return Err(revert("permit expired"));
        }
        if nonce.is_some_and(|nonce| *nonce != self.nonce(token, owner)) {
            return Err(revert("invalid permit nonce"));
        }
        *self.permit_nonces.entry((token, owner)).or_default() += 1;
        Ok(())
    }
}

#[derive(Clone)]
pub struct FakeChain {
    state: Arc<Mutex<FakeState>>,
    blocks: broadcast::Sender<BlockNotification>,
}

impl Default for FakeChain {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeChain {
    /// An open round 1 with a 1 token base price and a funded, signing player.
    pub fn new() -> Self {
        let (blocks, _) = broadcast::channel(64);
        let chain = Self {
            state: Arc::new(Mutex::new(FakeState {
                chain_id: FAKE_CHAIN_ID,
                signer: Some(Self::player_address()),
                block_number: 100,
                paused: false,
                open: true,
                can_draw: false,
                waiting_for_closure: false,
                jackpot: BigUint::from(1_000u32) * token(),
                base_ticket_price: token(),
                current_round: 1,
                next_draw_time: 1_700_000_000,
                tickets: BTreeMap::new(),
                prizes: HashMap::new(),
                rounds: HashMap::new(),
                balances: HashMap::new(),
                allowances: HashMap::new(),
                unclaimed_revenue: HashMap::new(),
                token_name: "Dai Stablecoin".to_string(),
                permit_nonces: HashMap::new(),
                block_timestamp: 1_699_990_000,
                // 0.05 per token
                sale_price: token() / 20u8,
                sale_open: true,
                sale_balances: HashMap::new(),
                events: HashMap::new(),
                sent: Vec::new(),
                calls: HashMap::new(),
                failures: HashMap::new(),
                fail_subscription: false,
                next_transaction: 1,
            })),
            blocks,
        };
        chain.with_state(|state| {
            state.balances.insert(
                (chain.currency_token_address(), Self::player_address()),
                BigUint::from(10_000u32) * token(),
            );
        });
        chain
    }

    pub fn without_signer(self) -> Self {
        self.with_state(|state| state.signer = None);
        self
    }

    pub fn lottery_address(&self) -> Address {
        Address::repeat_byte(0x10)
    }

    pub fn currency_token_address(&self) -> Address {
        Address::repeat_byte(0x20)
    }

    pub fn controller_address(&self) -> Address {
        Address::repeat_byte(0x30)
    }

    pub fn governance_token_address(&self) -> Address {
        Address::repeat_byte(0x40)
    }

    pub fn sale_address(&self) -> Address {
        Address::repeat_byte(0x50)
    }

    /// Key behind [`FakeChain::player_address`]; signatures made by the fake
    /// recover to the player.
    pub fn player_wallet() -> PrivateKeySigner {
        PrivateKeySigner::from_bytes(&B256::repeat_byte(0xaa)).expect("valid secp256k1 key")
    }

    pub fn player_address() -> Address {
        Self::player_wallet().address()
    }

    pub fn with_state<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        f(&mut lock(&self.state))
    }

    pub fn set_stage(&self, open: bool, can_draw: bool, waiting_for_closure: bool) {
        self.with_state(|state| {
            state.open = open;
            state.can_draw = can_draw;
            state.waiting_for_closure = waiting_for_closure;
        });
    }

    pub fn calls(&self, method: Method) -> usize {
        self.with_state(|state| state.calls.get(&method).copied().unwrap_or(0))
    }

    pub fn sent(&self) -> Vec<SentTransaction> {
        self.with_state(|state| state.sent.clone())
    }

    /// Makes the next `times` calls of `method` fail.
    pub fn fail_next(&self, method: Method, times: usize) {
        self.with_state(|state| {
            state.failures.insert(method, times);
        });
    }

    /// Behave like an HTTP-only provider that cannot push new heads.
    pub fn fail_subscription(&self) {
        self.with_state(|state| state.fail_subscription = true);
    }

    pub fn subscribers(&self) -> usize {
        self.blocks.receiver_count()
    }

    pub fn mine_block(&self) -> u64 {
        let number = self.with_state(|state| {
            state.block_number += 1;
            state.block_number
        });
        let _ = self.blocks.send(BlockNotification { number });
        number
    }

    pub fn add_round(&self, round: u64, data: RoundData) {
        self.with_state(|state| {
            state.rounds.insert(round, data);
        });
    }

    pub fn add_ticket(&self, record: TicketRecord, prize: TicketPrize) {
        self.with_state(|state| {
            state.prizes.insert(record.id, prize);
            state.tickets.insert(record.id, record);
        });
    }

    pub fn add_event(&self, query: EventQuery, hash: TxHash) {
        self.with_state(|state| {
            state.events.insert(query, hash);
        });
    }

    async fn call<T>(
        &self,
        method: Method,
        f: impl FnOnce(&mut FakeState) -> Result<T>,
    ) -> Result<T> {
        tokio::task::yield_now().await;
        let mut state = lock(&self.state);
        *state.calls.entry(method).or_default() += 1;
        if let Some(remaining) = state.failures.get_mut(&method) {
            if *remaining > 0 {
                *remaining -= 1;
                let cause = anyhow::anyhow!("injected {method:?} failure");
                return Err(if method.is_write() {
                    Error::transaction(cause)
                } else {
                    Error::call(cause)
                });
            }
        }
        f(&mut state)
    }

    async fn send(
        &self,
        method: Method,
        f: impl FnOnce(&mut FakeState) -> Result<SentTransaction>,
    ) -> Result<TxHash> {
        self.call(method, |state| {
            if state.signer.is_none() {
                return Err(Error::connectivity("no wallet attached"));
            }
            let sent = f(state)?;
            state.sent.push(sent);
            state.block_number += 1;
            let hash = TxHash::from(U256::from(state.next_transaction));
            state.next_transaction += 1;
            Ok(hash)
        })
        .await
    }
}

/// Keeps every message instead of showing it.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    messages: Arc<Mutex<Vec<UserMessage>>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<UserMessage> {
        lock(&self.messages).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: UserMessage) {
        lock(&self.messages).push(message);
    }
}

/// Yields to spawned tasks until `condition` holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

fn token() -> BigUint {
    BigUint::from(10u8).pow(18)
}

fn revert(reason: &str) -> Error {
    Error::transaction(anyhow::anyhow!("execution reverted: {reason}"))
}

fn missing(what: &str) -> Error {
    Error::call(anyhow::anyhow!("execution reverted: unknown {what}"))
}

impl LotteryChain for FakeChain {
    async fn chain_id(&self) -> Result<u64> {
        self.call(Method::ChainId, |state| Ok(state.chain_id)).await
    }

    async fn owner(&self, _contract: Address) -> Result<Address> {
        let controller = self.controller_address();
        self.call(Method::Owner, move |_| Ok(controller)).await
    }

    async fn paused(&self, _lottery: Address) -> Result<bool> {
        self.call(Method::Paused, |state| Ok(state.paused)).await
    }

    async fn is_open(&self, _lottery: Address) -> Result<bool> {
        self.call(Method::IsOpen, |state| Ok(state.open)).await
    }

    async fn currency_token(&self, _lottery: Address) -> Result<Address> {
        let token = self.currency_token_address();
        self.call(Method::CurrencyToken, move |_| Ok(token)).await
    }

    async fn jackpot(&self, _lottery: Address) -> Result<BigUint> {
        self.call(Method::Jackpot, |state| Ok(state.jackpot.clone()))
            .await
    }

    async fn base_ticket_price(&self, _lottery: Address) -> Result<BigUint> {
        self.call(Method::BaseTicketPrice, |state| {
            Ok(state.base_ticket_price.clone())
        })
        .await
    }

    async fn ticket_price(&self, _lottery: Address, numbers: Vec<u8>) -> Result<BigUint> {
        self.call(Method::TicketPrice, move |state| {
            Ok(&state.base_ticket_price * covered_combinations(numbers.len()))
        })
        .await
    }

    async fn current_round(&self, _lottery: Address) -> Result<u64> {
        self.call(Method::CurrentRound, |state| Ok(state.current_round))
            .await
    }

    async fn next_draw_time(&self, _lottery: Address) -> Result<u64> {
        self.call(Method::NextDrawTime, |state| Ok(state.next_draw_time))
            .await
    }

    async fn ticket_ids(&self, _lottery: Address, account: Address) -> Result<Vec<u64>> {
        self.call(Method::TicketIds, move |state| {
            Ok(state
                .tickets
                .values()
                .filter(|ticket| ticket.player == account)
                .map(|ticket| ticket.id)
                .collect())
        })
        .await
    }

    async fn ticket(&self, _lottery: Address, id: u64) -> Result<TicketRecord> {
        self.call(Method::Ticket, move |state| {
            state.tickets.get(&id).cloned().ok_or_else(|| missing("ticket"))
        })
        .await
    }

    async fn ticket_prize(&self, _lottery: Address, id: u64) -> Result<TicketPrize> {
        self.call(Method::TicketPrize, move |state| {
            state.prizes.get(&id).cloned().ok_or_else(|| missing("ticket"))
        })
        .await
    }

    async fn round_data(&self, _lottery: Address, round: u64) -> Result<RoundData> {
        self.call(Method::RoundData, move |state| {
            state.rounds.get(&round).cloned().ok_or_else(|| missing("round"))
        })
        .await
    }

    async fn governance_token(&self, _controller: Address) -> Result<Address> {
        let token = self.governance_token_address();
        self.call(Method::GovernanceToken, move |_| Ok(token)).await
    }

    async fn can_draw(&self, _controller: Address) -> Result<bool> {
        self.call(Method::CanDraw, |state| Ok(state.can_draw)).await
    }

    async fn waiting_for_closure(&self, _controller: Address) -> Result<bool> {
        self.call(Method::WaitingForClosure, |state| {
            Ok(state.waiting_for_closure)
        })
        .await
    }

    async fn unclaimed_revenue(
        &self,
        _controller: Address,
        account: Address,
    ) -> Result<BigUint> {
        self.call(Method::UnclaimedRevenue, move |state| {
            Ok(state
                .unclaimed_revenue
                .get(&account)
                .cloned()
                .unwrap_or_default())
        })
        .await
    }

    async fn balance_of(&self, token: Address, account: Address) -> Result<BigUint> {
        self.call(Method::BalanceOf, move |state| {
            Ok(state
                .balances
                .get(&(token, account))
                .cloned()
                .unwrap_or_default())
        })
        .await
    }

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<BigUint> {
        self.call(Method::Allowance, move |state| {
            Ok(state
                .allowances
                .get(&(token, owner, spender))
                .cloned()
                .unwrap_or_default())
        })
        .await
    }

    async fn token_name(&self, _token: Address) -> Result<String> {
        self.call(Method::TokenName, |state| Ok(state.token_name.clone()))
            .await
    }

    async fn permit_nonce(&self, token: Address, owner: Address) -> Result<BigUint> {
        self.call(Method::PermitNonce, move |state| Ok(state.nonce(token, owner)))
            .await
    }

    async fn dai_permit_nonce(&self, token: Address, holder: Address) -> Result<BigUint> {
        self.call(Method::DaiPermitNonce, move |state| {
            Ok(state.nonce(token, holder))
        })
        .await
    }

    async fn latest_block_timestamp(&self) -> Result<u64> {
        self.call(Method::BlockTimestamp, |state| Ok(state.block_timestamp))
            .await
    }

    async fn sale_currency_token(&self, _sale: Address) -> Result<Address> {
        let token = self.currency_token_address();
        self.call(Method::SaleCurrencyToken, move |_| Ok(token)).await
    }

    async fn sale_price(&self, _sale: Address) -> Result<BigUint> {
        self.call(Method::SalePrice, |state| Ok(state.sale_price.clone()))
            .await
    }

    async fn sale_is_open(&self, _sale: Address) -> Result<bool> {
        self.call(Method::SaleIsOpen, |state| Ok(state.sale_open)).await
    }

    async fn sale_balance(&self, _sale: Address, account: Address) -> Result<BigUint> {
        self.call(Method::SaleBalance, move |state| {
            Ok(state.sale_balances.get(&account).cloned().unwrap_or_default())
        })
        .await
    }

    async fn find_transaction(
        &self,
        _lottery: Address,
        query: EventQuery,
    ) -> Result<Option<TxHash>> {
        self.call(Method::FindTransaction, move |state| {
            Ok(state.events.get(&query).copied())
        })
        .await
    }

    async fn subscribe_blocks(&self) -> Result<BlockStream> {
        let blocks = self.blocks.clone();
        self.call(Method::SubscribeBlocks, move |state| {
            if state.fail_subscription {
                return Err(Error::call(anyhow::anyhow!(
                    "subscriptions are not supported by this transport"
                )));
            }
            let stream = BroadcastStream::new(blocks.subscribe())
                .filter_map(|block| futures::future::ready(block.ok()));
            Ok(stream.boxed())
        })
        .await
    }
}

impl LotteryWriter for FakeChain {
    fn signer(&self) -> Option<Address> {
        self.with_state(|state| state.signer)
    }

    async fn approve(
        &self,
        token: Address,
        spender: Address,
        amount: BigUint,
    ) -> Result<TxHash> {
        self.send(Method::Approve, move |state| {
            let owner = state.signer.unwrap_or_default();
            state
                .allowances
                .insert((token, owner, spender), amount.clone());
            Ok(SentTransaction::Approve {
                token,
                spender,
                amount,
            })
        })
        .await
    }

    async fn sign_hash(&self, hash: B256) -> Result<PermitSignature> {
        self.call(Method::SignHash, move |state| {
            if state.signer.is_none() {
                return Err(Error::connectivity("no wallet attached"));
            }
            let signature = Self::player_wallet()
                .sign_hash_sync(&hash)
                .map_err(Error::transaction)?;
            Ok(signature.into())
        })
        .await
    }

    async fn create_ticket(
        &self,
        _lottery: Address,
        referral_code: B256,
        numbers: Vec<u8>,
    ) -> Result<TxHash> {
        let token = self.currency_token_address();
        let lottery = self.lottery_address();
        self.send(Method::CreateTicket, move |state| {
            let player = state.signer.unwrap_or_default();
            let price = state.ticket_price(&numbers);
            let allowance = state
                .allowances
                .entry((token, player, lottery))
                .or_default();
            if *allowance < price {
                return Err(revert("insufficient allowance"));
            }
            *allowance -= &price;
            state.issue_ticket(player, numbers.clone());
            Ok(SentTransaction::CreateTicket {
                referral_code,
                numbers,
            })
        })
        .await
    }

    async fn create_ticket_with_permit(
        &self,
        _lottery: Address,
        referral_code: B256,
        numbers: Vec<u8>,
        permit: SignedPermit,
    ) -> Result<TxHash> {
        let token = self.currency_token_address();
        self.send(Method::CreateTicketWithPermit, move |state| {
            let player = state.signer.unwrap_or_default();
            match &permit {
                SignedPermit::Eip2612(permit) => {
                    if permit.value < state.ticket_price(&numbers) {
                        return Err(revert("permit value below ticket price"));
                    }
                    state.consume_permit(token, player, None, permit.deadline)?;
                }
                SignedPermit::Dai(permit) => {
                    state.consume_permit(token, player, Some(&permit.nonce), permit.expiry)?;
                }
            }
            state.issue_ticket(player, numbers.clone());
            Ok(SentTransaction::CreateTicketWithPermit {
                referral_code,
                numbers,
                permit,
            })
        })
        .await
    }

    async fn purchase_sale_tokens(
        &self,
        _sale: Address,
        amount: BigUint,
        permit: DaiPermit,
    ) -> Result<TxHash> {
        let currency = self.currency_token_address();
        self.send(Method::PurchaseSaleTokens, move |state| {
            let holder = state.signer.unwrap_or_default();
            if !state.sale_open {
                return Err(revert("sale closed"));
            }
            let cost = currency_for_tokens(&amount, &state.sale_price);
            let balance = state
                .balances
                .get(&(currency, holder))
                .cloned()
                .unwrap_or_default();
            if balance < cost {
                return Err(revert("insufficient balance"));
            }
            state.consume_permit(currency, holder, Some(&permit.nonce), permit.expiry)?;
            state.balances.insert((currency, holder), balance - cost);
            *state.sale_balances.entry(holder).or_default() += &amount;
            Ok(SentTransaction::PurchaseSaleTokens { amount, permit })
        })
        .await
    }

    async fn withdraw_sale_tokens(&self, _sale: Address) -> Result<TxHash> {
        let governance = self.governance_token_address();
        self.send(Method::WithdrawSaleTokens, move |state| {
            let holder = state.signer.unwrap_or_default();
            if state.sale_open {
                return Err(revert("sale still open"));
            }
            let bought = state
                .sale_balances
                .remove(&holder)
                .filter(|bought| !bought.is_zero())
                .ok_or_else(|| revert("nothing to withdraw"))?;
            *state.balances.entry((governance, holder)).or_default() += bought;
            Ok(SentTransaction::WithdrawSaleTokens)
        })
        .await
    }

    async fn withdraw_prize(&self, _lottery: Address, ticket_id: u64) -> Result<TxHash> {
        self.send(Method::WithdrawPrize, move |state| {
            let block = state.block_number + 1;
            let prize = state
                .prizes
                .get_mut(&ticket_id)
                .ok_or_else(|| missing("ticket"))?;
            if prize.prize.is_zero() || prize.withdraw_block_number != 0 {
                return Err(revert("nothing to withdraw"));
            }
            prize.withdraw_block_number = block;
            Ok(SentTransaction::WithdrawPrize { ticket_id })
        })
        .await
    }

    async fn draw(&self, _controller: Address, request: DrawRequest) -> Result<TxHash> {
        self.send(Method::Draw, move |state| {
            if !state.can_draw {
                return Err(revert("cannot draw yet"));
            }
            state.can_draw = false;
            state.open = false;
            Ok(SentTransaction::Draw(request))
        })
        .await
    }

    async fn close_round(&self, _controller: Address) -> Result<TxHash> {
        self.send(Method::CloseRound, |state| {
            if !state.waiting_for_closure {
                return Err(revert("nothing to close"));
            }
            state.waiting_for_closure = false;
            state.open = true;
            state.current_round += 1;
            Ok(SentTransaction::CloseRound)
        })
        .await
    }

    async fn withdraw_revenue(&self, _controller: Address, account: Address) -> Result<TxHash> {
        self.send(Method::WithdrawRevenue, move |state| {
            state.unclaimed_revenue.remove(&account);
            Ok(SentTransaction::WithdrawRevenue { account })
        })
        .await
    }
}
