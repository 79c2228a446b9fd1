use crate::Result;
use alloy::primitives::{
    Address,
    B256,
    Signature,
    TxHash,
    U256,
};
use futures::stream::BoxStream;
use num_bigint::BigUint;
use serde::Serialize;
use std::future::Future;

/// A new block header arrived. Nothing but the occurrence matters to
/// subscribers; the number is kept for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockNotification {
    pub number: u64,
}

pub type BlockStream = BoxStream<'static, BlockNotification>;

/// `getTicket(id)` as stored on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TicketRecord {
    pub id: u64,
    pub player: Address,
    pub round: u64,
    pub block_number: u64,
    pub numbers: Vec<u8>,
}

/// `getTicketPrize(id)`. A zero withdraw block means the prize is unclaimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketPrize {
    pub prize: BigUint,
    pub withdraw_block_number: u64,
}

/// `getRoundData(round)`. Prize and winner tiers run from two matches to six.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundData {
    pub prizes: [BigUint; 5],
    pub stash: BigUint,
    pub total_combinations: BigUint,
    pub draw_block_number: u64,
    pub closure_block_number: u64,
    pub numbers: Vec<u8>,
    pub winners: [u64; 5],
}

/// Log lookups used to recover the transaction behind a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventQuery {
    /// `Ticket` or `Ticket6` for a ticket id, mined in `block`.
    Ticket { id: u64, block: u64 },
    /// `VRFRequest` for a round, emitted by the draw transaction in `block`.
    VrfRequest { round: u64, block: u64 },
    /// `Draw` for a round, emitted by the closing transaction in `block`.
    Draw { round: u64, block: u64 },
}

/// Parameters of the controller's `draw` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawRequest {
    pub vrf_subscription_id: U256,
    pub vrf_key_hash: B256,
    pub native_payment: bool,
}

/// `(v, r, s)` of a typed-data signature, the way permit entry points take it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermitSignature {
    pub v: u8,
    pub r: B256,
    pub s: B256,
}

impl From<Signature> for PermitSignature {
    fn from(signature: Signature) -> Self {
        Self {
            v: 27 + u8::from(signature.v()),
            r: B256::from(signature.r()),
            s: B256::from(signature.s()),
        }
    }
}

/// EIP-2612 approval of exactly `value` until `deadline`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eip2612Permit {
    pub value: BigUint,
    pub deadline: u64,
    pub signature: PermitSignature,
}

/// DAI-style approval of an unlimited amount until `expiry`, consuming the
/// holder's `nonce`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaiPermit {
    pub nonce: BigUint,
    pub expiry: u64,
    pub signature: PermitSignature,
}

/// Signed approval sent along with a purchase instead of an `approve`
/// transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignedPermit {
    Eip2612(Eip2612Permit),
    Dai(DaiPermit),
}

/// Read access to the lottery contract family and the chain head.
///
/// Every call is an independent RPC round trip; nothing is cached or batched
/// at this level.
pub trait LotteryChain: Clone + Send + Sync + 'static {
    fn chain_id(&self) -> impl Future<Output = Result<u64>> + Send;

    fn owner(&self, contract: Address) -> impl Future<Output = Result<Address>> + Send;

    fn paused(&self, lottery: Address) -> impl Future<Output = Result<bool>> + Send;

    fn is_open(&self, lottery: Address) -> impl Future<Output = Result<bool>> + Send;

    fn currency_token(
        &self,
        lottery: Address,
    ) -> impl Future<Output = Result<Address>> + Send;

    fn jackpot(&self, lottery: Address) -> impl Future<Output = Result<BigUint>> + Send;

    fn base_ticket_price(
        &self,
        lottery: Address,
    ) -> impl Future<Output = Result<BigUint>> + Send;

    fn ticket_price(
        &self,
        lottery: Address,
        numbers: Vec<u8>,
    ) -> impl Future<Output = Result<BigUint>> + Send;

    fn current_round(&self, lottery: Address) -> impl Future<Output = Result<u64>> + Send;

    /// Unix seconds at which the next drawing window opens.
    fn next_draw_time(&self, lottery: Address)
    -> impl Future<Output = Result<u64>> + Send;

    fn ticket_ids(
        &self,
        lottery: Address,
        account: Address,
    ) -> impl Future<Output = Result<Vec<u64>>> + Send;

    fn ticket(
        &self,
        lottery: Address,
        id: u64,
    ) -> impl Future<Output = Result<TicketRecord>> + Send;

    fn ticket_prize(
        &self,
        lottery: Address,
        id: u64,
    ) -> impl Future<Output = Result<TicketPrize>> + Send;

    fn round_data(
        &self,
        lottery: Address,
        round: u64,
    ) -> impl Future<Output = Result<RoundData>> + Send;

    fn governance_token(
        &self,
        controller: Address,
    ) -> impl Future<Output = Result<Address>> + Send;

    fn can_draw(&self, controller: Address) -> impl Future<Output = Result<bool>> + Send;

    fn waiting_for_closure(
        &self,
        controller: Address,
    ) -> impl Future<Output = Result<bool>> + Send;

    fn unclaimed_revenue(
        &self,
        controller: Address,
        account: Address,
    ) -> impl Future<Output = Result<BigUint>> + Send;

    fn balance_of(
        &self,
        token: Address,
        account: Address,
    ) -> impl Future<Output = Result<BigUint>> + Send;

    fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> impl Future<Output = Result<BigUint>> + Send;

    /// ERC-20 `name()`, part of every permit domain.
    fn token_name(&self, token: Address) -> impl Future<Output = Result<String>> + Send;

    /// EIP-2612 `nonces(owner)`.
    fn permit_nonce(
        &self,
        token: Address,
        owner: Address,
    ) -> impl Future<Output = Result<BigUint>> + Send;

    /// DAI `getNonce(holder)`.
    fn dai_permit_nonce(
        &self,
        token: Address,
        holder: Address,
    ) -> impl Future<Output = Result<BigUint>> + Send;

    /// Unix seconds of the latest block.
    fn latest_block_timestamp(&self) -> impl Future<Output = Result<u64>> + Send;

    fn sale_currency_token(
        &self,
        sale: Address,
    ) -> impl Future<Output = Result<Address>> + Send;

    /// Currency units per whole sold token.
    fn sale_price(&self, sale: Address) -> impl Future<Output = Result<BigUint>> + Send;

    fn sale_is_open(&self, sale: Address) -> impl Future<Output = Result<bool>> + Send;

    /// Tokens bought by `account` and not yet withdrawn.
    fn sale_balance(
        &self,
        sale: Address,
        account: Address,
    ) -> impl Future<Output = Result<BigUint>> + Send;

    /// Hash of the transaction that emitted the queried event, if found.
    fn find_transaction(
        &self,
        lottery: Address,
        query: EventQuery,
    ) -> impl Future<Output = Result<Option<TxHash>>> + Send;

    /// Opens a stream of new block headers. Fails when the transport cannot
    /// push notifications.
    fn subscribe_blocks(&self) -> impl Future<Output = Result<BlockStream>> + Send;
}

/// Transactions signed by the connected account. Each call resolves once the
/// transaction is mined; a revert is an [`Error::Transaction`](crate::Error).
pub trait LotteryWriter: LotteryChain {
    /// Account that signs transactions, if a wallet is attached.
    fn signer(&self) -> Option<Address>;

    fn approve(
        &self,
        token: Address,
        spender: Address,
        amount: BigUint,
    ) -> impl Future<Output = Result<TxHash>> + Send;

    /// Signs an EIP-712 digest with the connected account's key.
    fn sign_hash(&self, hash: B256) -> impl Future<Output = Result<PermitSignature>> + Send;

    fn create_ticket(
        &self,
        lottery: Address,
        referral_code: B256,
        numbers: Vec<u8>,
    ) -> impl Future<Output = Result<TxHash>> + Send;

    /// Buys a ticket in one transaction, the lottery pulling the price
    /// through `permit`.
    fn create_ticket_with_permit(
        &self,
        lottery: Address,
        referral_code: B256,
        numbers: Vec<u8>,
        permit: SignedPermit,
    ) -> impl Future<Output = Result<TxHash>> + Send;

    /// Buys `amount` sale tokens (18 decimals), paying in DAI through `permit`.
    fn purchase_sale_tokens(
        &self,
        sale: Address,
        amount: BigUint,
        permit: DaiPermit,
    ) -> impl Future<Output = Result<TxHash>> + Send;

    /// Withdraws every bought token once the sale is over.
    fn withdraw_sale_tokens(&self, sale: Address)
    -> impl Future<Output = Result<TxHash>> + Send;

    fn withdraw_prize(
        &self,
        lottery: Address,
        ticket_id: u64,
    ) -> impl Future<Output = Result<TxHash>> + Send;

    fn draw(
        &self,
        controller: Address,
        request: DrawRequest,
    ) -> impl Future<Output = Result<TxHash>> + Send;

    fn close_round(&self, controller: Address)
    -> impl Future<Output = Result<TxHash>> + Send;

    fn withdraw_revenue(
        &self,
        controller: Address,
        account: Address,
    ) -> impl Future<Output = Result<TxHash>> + Send;
}
