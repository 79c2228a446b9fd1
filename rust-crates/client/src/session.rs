use crate::{
    Error,
    Result,
    chain::{
        DrawRequest,
        EventQuery,
        LotteryChain,
        LotteryWriter,
        SignedPermit,
    },
    contracts::ContractResolver,
    lock,
    model::{
        Draw,
        DrawExtended,
        PartnerStatus,
        Ticket,
        TicketExtended,
        validate_numbers,
    },
    permit::{
        sign_dai_permit,
        sign_eip2612_permit,
    },
    subscription::{
        Subscription,
        subscribe,
    },
};
use alloy::primitives::{
    Address,
    B256,
    TxHash,
    U256,
};
use chrono::{
    DateTime,
    Utc,
};
pub use deployments::SpendingApprovalMode;
use deployments::DeploymentRecord;
use futures::future::{
    try_join,
    try_join_all,
};
use lottery_abi::NULL_REFERRAL_CODE;
use num_bigint::BigUint;
use std::{
    collections::HashMap,
    str::FromStr,
    sync::{
        Arc,
        Mutex,
    },
};
use tokio::sync::watch;

/// Typed view of a deployment record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    pub lottery: Address,
    /// Explorer hostname, e.g. `sepolia.etherscan.io`.
    pub block_explorer: Option<String>,
    pub vrf_subscription_id: Option<U256>,
    pub vrf_key_hash: Option<B256>,
    pub spending_approval_mode: SpendingApprovalMode,
    /// Governance token sale, if one is deployed on this network.
    pub token_sale: Option<Address>,
}

impl NetworkConfig {
    pub fn from_record(record: &DeploymentRecord) -> Result<Self> {
        let lottery = parse_field("lottery address", &record.lottery_address)?;
        let vrf_subscription_id = record
            .vrf_subscription_id
            .as_deref()
            .map(|id| parse_field::<U256>("VRF subscription id", id))
            .transpose()?;
        let vrf_key_hash = record
            .vrf_key_hash
            .as_deref()
            .map(|hash| parse_field::<B256>("VRF key hash", hash))
            .transpose()?;
        let token_sale = record
            .token_sale_address
            .as_deref()
            .map(|address| parse_field::<Address>("token sale address", address))
            .transpose()?;
        Ok(Self {
            chain_id: record.chain_id,
            rpc_url: record.rpc_url.clone(),
            lottery,
            block_explorer: record.block_explorer.clone(),
            vrf_subscription_id,
            vrf_key_hash,
            spending_approval_mode: record.spending_approval_mode(),
            token_sale,
        })
    }

    pub fn transaction_url(&self, hash: TxHash) -> Option<String> {
        self.block_explorer
            .as_ref()
            .map(|host| format!("https://{host}/tx/{hash}"))
    }

    pub fn address_url(&self, address: Address) -> Option<String> {
        self.block_explorer
            .as_ref()
            .map(|host| format!("https://{host}/address/{address}"))
    }
}

fn parse_field<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::connectivity(format!("{name} is not configured")));
    }
    value
        .parse()
        .map_err(|e| Error::connectivity(format!("invalid {name} `{value}`: {e}")))
}

/// Everything bound to one provider, network and account.
///
/// A session never changes after construction. When the wallet, account or
/// network changes a new session replaces it in the [`SessionHub`]; callers
/// still holding the old one keep talking to the old network.
pub struct Session<C> {
    chain: C,
    account: Option<Address>,
    config: NetworkConfig,
    contracts: ContractResolver,
    closed_draws: Mutex<HashMap<u64, Draw>>,
}

impl<C: LotteryChain> Session<C> {
    pub fn new(chain: C, account: Option<Address>, config: NetworkConfig) -> Self {
        let contracts = ContractResolver::new(chain.clone(), config.lottery);
        Self {
            chain,
            account,
            config,
            contracts,
            closed_draws: Mutex::new(HashMap::new()),
        }
    }

    /// Builds a session after checking that the backend is on the configured
    /// chain.
    pub async fn connect(
        chain: C,
        account: Option<Address>,
        config: NetworkConfig,
    ) -> Result<Arc<Self>> {
        let actual = chain.chain_id().await?;
        if actual != config.chain_id {
            return Err(Error::WrongNetwork {
                expected: config.chain_id,
                actual,
            });
        }
        tracing::info!(
            "connected to chain {actual}, lottery at {}{}",
            config.lottery,
            account
                .map(|account| format!(", account {account}"))
                .unwrap_or_default()
        );
        Ok(Arc::new(Self::new(chain, account, config)))
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    pub fn account(&self) -> Option<Address> {
        self.account
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn contracts(&self) -> &ContractResolver {
        &self.contracts
    }

    fn lottery(&self) -> Address {
        self.config.lottery
    }

    async fn controller(&self) -> Result<Address> {
        Ok(self.contracts.controller().await?.address)
    }

    pub async fn is_paused(&self) -> Result<bool> {
        self.chain.paused(self.lottery()).await
    }

    pub async fn is_open(&self) -> Result<bool> {
        self.chain.is_open(self.lottery()).await
    }

    pub async fn jackpot(&self) -> Result<BigUint> {
        self.chain.jackpot(self.lottery()).await
    }

    pub async fn base_ticket_price(&self) -> Result<BigUint> {
        self.chain.base_ticket_price(self.lottery()).await
    }

    pub async fn ticket_price(&self, numbers: &[u8]) -> Result<BigUint> {
        let numbers = validate_numbers(numbers)?;
        self.chain.ticket_price(self.lottery(), numbers).await
    }

    pub async fn current_round(&self) -> Result<u64> {
        self.chain.current_round(self.lottery()).await
    }

    pub async fn time_of_next_draw(&self) -> Result<DateTime<Utc>> {
        let seconds = self.chain.next_draw_time(self.lottery()).await?;
        i64::try_from(seconds)
            .ok()
            .and_then(|seconds| DateTime::from_timestamp(seconds, 0))
            .ok_or_else(|| {
                Error::call(anyhow::anyhow!("next draw time {seconds} is out of range"))
            })
    }

    pub async fn can_draw(&self) -> Result<bool> {
        let controller = self.controller().await?;
        self.chain.can_draw(controller).await
    }

    pub async fn is_waiting_for_closure(&self) -> Result<bool> {
        let controller = self.controller().await?;
        self.chain.waiting_for_closure(controller).await
    }

    pub async fn ticket_ids(&self, account: Address) -> Result<Vec<u64>> {
        self.chain.ticket_ids(self.lottery(), account).await
    }

    /// Round data for `round`. Closed rounds never change and are kept for
    /// the lifetime of the session.
    pub async fn draw(&self, round: u64) -> Result<Draw> {
        let cached = lock(&self.closed_draws).get(&round).cloned();
        if let Some(draw) = cached {
            return Ok(draw);
        }
        let data = self.chain.round_data(self.lottery(), round).await?;
        let draw = Draw::from_round_data(round, data);
        if draw.is_closed() {
            lock(&self.closed_draws).insert(round, draw.clone());
        }
        Ok(draw)
    }

    pub async fn current_draw(&self) -> Result<Draw> {
        let round = self.current_round().await?;
        self.draw(round).await
    }

    /// Up to `count` rounds preceding the current one, most recent first.
    pub async fn past_draws(&self, count: u64) -> Result<Vec<Draw>> {
        let current = self.current_round().await?;
        let rounds = (1..=count).filter_map(|back| current.checked_sub(back));
        try_join_all(rounds.map(|round| self.draw(round))).await
    }

    pub async fn extended_draw(&self, draw: Draw) -> Result<DrawExtended> {
        let lottery = self.lottery();
        let request = (draw.draw_block != 0).then_some(EventQuery::VrfRequest {
            round: draw.round,
            block: draw.draw_block,
        });
        let closure = draw.is_closed().then_some(EventQuery::Draw {
            round: draw.round,
            block: draw.closure_block,
        });
        let find = |query: Option<EventQuery>| async move {
            match query {
                Some(query) => self.chain.find_transaction(lottery, query).await,
                None => Ok(None),
            }
        };
        let (draw_transaction, closure_transaction) =
            try_join(find(request), find(closure)).await?;
        Ok(DrawExtended {
            draw,
            draw_transaction,
            closure_transaction,
        })
    }

    /// A ticket with its round's draw attached once the round is closed.
    pub async fn ticket(&self, id: u64) -> Result<Ticket> {
        let record = self.chain.ticket(self.lottery(), id).await?;
        let draw = self.draw(record.round).await?;
        Ok(Ticket::new(record, Some(draw)))
    }

    /// Every ticket of `account`, newest first.
    pub async fn tickets(&self, account: Address) -> Result<Vec<Ticket>> {
        let mut ids = self.ticket_ids(account).await?;
        ids.sort_unstable_by(|a, b| b.cmp(a));
        try_join_all(ids.into_iter().map(|id| self.ticket(id))).await
    }

    pub async fn extended_ticket(&self, ticket: Ticket) -> Result<TicketExtended> {
        let prize = self.chain.ticket_prize(self.lottery(), ticket.id).await?;
        Ok(TicketExtended::new(ticket, prize))
    }

    /// Purchase transaction of a ticket, from its `Ticket`/`Ticket6` log.
    pub async fn ticket_transaction(&self, ticket: &Ticket) -> Result<Option<TxHash>> {
        self.chain
            .find_transaction(
                self.lottery(),
                EventQuery::Ticket {
                    id: ticket.id,
                    block: ticket.block_number,
                },
            )
            .await
    }

    pub async fn partner_status(&self, account: Address) -> Result<PartnerStatus> {
        let (token, controller) =
            try_join(self.contracts.governance_token(), self.contracts.controller())
                .await?;
        let (balance, unclaimed_revenue) = try_join(
            self.chain.balance_of(token.address, account),
            self.chain.unclaimed_revenue(controller.address, account),
        )
        .await?;
        Ok(PartnerStatus {
            account,
            balance,
            unclaimed_revenue,
        })
    }

    /// Reports the jackpot now and after every new block.
    pub async fn subscribe_to_jackpot(
        &self,
        on_value: impl FnMut(BigUint) + Send + 'static,
    ) -> Result<Subscription> {
        let chain = self.chain.clone();
        let lottery = self.lottery();
        subscribe(
            &self.chain,
            move || {
                let chain = chain.clone();
                async move { chain.jackpot(lottery).await }
            },
            on_value,
        )
        .await
    }
}

impl<C: LotteryWriter> Session<C> {
    pub(crate) fn signer(&self) -> Result<Address> {
        self.chain
            .signer()
            .ok_or_else(|| Error::connectivity("connect a wallet to send transactions"))
    }

    /// Buys a ticket. In `manual` mode the currency token is approved first
    /// if the lottery may not spend enough of it yet; the permit modes sign
    /// an off-chain approval and buy in a single transaction instead.
    pub async fn purchase_ticket(
        &self,
        numbers: &[u8],
        referral_code: Option<B256>,
    ) -> Result<TxHash> {
        let numbers = validate_numbers(numbers)?;
        let player = self.signer()?;
        let lottery = self.lottery();
        let (price, token) = try_join(
            self.chain.ticket_price(lottery, numbers.clone()),
            self.contracts.currency_token(),
        )
        .await?;
        let balance = self.chain.balance_of(token.address, player).await?;
        if balance < price {
            return Err(Error::transaction(anyhow::anyhow!(
                "balance {balance} is below the ticket price {price}"
            )));
        }
        let referral_code = referral_code.unwrap_or(NULL_REFERRAL_CODE);
        let chain_id = self.config.chain_id;
        let mode = self.config.spending_approval_mode;
        let purchase = match mode {
            SpendingApprovalMode::Manual => {
                let allowance = self.chain.allowance(token.address, player, lottery).await?;
                if allowance < price {
                    tracing::info!("approving {price} for the lottery");
                    self.chain
                        .approve(token.address, lottery, price)
                        .await
                        .inspect_err(|e| tracing::error!("approval failed: {e}"))?;
                }
                self.chain
                    .create_ticket(lottery, referral_code, numbers)
                    .await
            }
            SpendingApprovalMode::Eip2612 => {
                let permit =
                    sign_eip2612_permit(&self.chain, chain_id, token.address, player, lottery, price)
                        .await?;
                self.chain
                    .create_ticket_with_permit(
                        lottery,
                        referral_code,
                        numbers,
                        SignedPermit::Eip2612(permit),
                    )
                    .await
            }
            SpendingApprovalMode::Dai => {
                let permit =
                    sign_dai_permit(&self.chain, chain_id, token.address, player, lottery).await?;
                self.chain
                    .create_ticket_with_permit(
                        lottery,
                        referral_code,
                        numbers,
                        SignedPermit::Dai(permit),
                    )
                    .await
            }
        };
        let hash = purchase.inspect_err(|e| tracing::error!("ticket purchase failed: {e}"))?;
        tracing::info!("ticket purchased in {hash} ({mode} approval)");
        Ok(hash)
    }

    pub async fn withdraw_prize(&self, ticket_id: u64) -> Result<TxHash> {
        self.signer()?;
        let hash = self
            .chain
            .withdraw_prize(self.lottery(), ticket_id)
            .await
            .inspect_err(|e| tracing::error!("prize withdrawal failed: {e}"))?;
        tracing::info!("prize of ticket {ticket_id} withdrawn in {hash}");
        Ok(hash)
    }

    pub async fn trigger_draw(&self, request: DrawRequest) -> Result<TxHash> {
        self.signer()?;
        let controller = self.controller().await?;
        let hash = self.chain.draw(controller, request).await?;
        tracing::info!("draw requested in {hash}");
        Ok(hash)
    }

    pub async fn close_round(&self) -> Result<TxHash> {
        self.signer()?;
        let controller = self.controller().await?;
        let hash = self.chain.close_round(controller).await?;
        tracing::info!("round closed in {hash}");
        Ok(hash)
    }

    /// Withdraws the signer's unclaimed controller revenue.
    pub async fn withdraw_revenue(&self) -> Result<TxHash> {
        let account = self.signer()?;
        let controller = self.controller().await?;
        let hash = self
            .chain
            .withdraw_revenue(controller, account)
            .await
            .inspect_err(|e| tracing::error!("revenue withdrawal failed: {e}"))?;
        tracing::info!("revenue withdrawn in {hash}");
        Ok(hash)
    }
}

/// The current session, if any. Consumers subscribe and pick up replacements
/// instead of holding on to one session forever.
pub struct SessionHub<C> {
    current: watch::Sender<Option<Arc<Session<C>>>>,
}

impl<C> Default for SessionHub<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> SessionHub<C> {
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self { current }
    }

    pub fn current(&self) -> Option<Arc<Session<C>>> {
        self.current.borrow().clone()
    }

    /// Swaps in a new session. The previous one is left untouched.
    pub fn replace(&self, session: Arc<Session<C>>) {
        self.current.send_replace(Some(session));
    }

    pub fn clear(&self) {
        self.current.send_replace(None);
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Session<C>>>> {
        self.current.subscribe()
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use crate::{
        chain::{
            RoundData,
            TicketPrize,
            TicketRecord,
        },
        test_helpers::{
            FAKE_CHAIN_ID,
            FakeChain,
            Method,
            SentTransaction,
        },
    };
    use num_traits::Zero;

    fn config(chain: &FakeChain) -> NetworkConfig {
        NetworkConfig {
            chain_id: FAKE_CHAIN_ID,
            rpc_url: "ws://localhost:8545".to_string(),
            lottery: chain.lottery_address(),
            block_explorer: Some("explorer.test".to_string()),
            vrf_subscription_id: Some(U256::from(7)),
            vrf_key_hash: Some(B256::repeat_byte(9)),
            spending_approval_mode: SpendingApprovalMode::Manual,
            token_sale: Some(chain.sale_address()),
        }
    }

    fn session(chain: &FakeChain) -> Session<FakeChain> {
        Session::new(
            chain.clone(),
            Some(FakeChain::player_address()),
            config(chain),
        )
    }

    fn closed_round(numbers: Vec<u8>) -> RoundData {
        RoundData {
            prizes: [1u8, 2, 3, 4, 5].map(BigUint::from),
            stash: BigUint::zero(),
            total_combinations: BigUint::from(42u8),
            draw_block_number: 50,
            closure_block_number: 60,
            numbers,
            winners: [0; 5],
        }
    }

    #[tokio::test]
    async fn connect__wrong_chain__is_rejected() {
        // given
        let chain = FakeChain::new();
        let mut config = config(&chain);
        config.chain_id = 1;

        // when
        let result = Session::connect(chain, None, config).await;

        // then
        assert!(matches!(
            result,
            Err(Error::WrongNetwork {
                expected: 1,
                actual: FAKE_CHAIN_ID
            })
        ));
    }

    #[test]
    fn from_record__parses_typed_fields() {
        // given
        let mut record = DeploymentRecord::new(
            11155111,
            "wss://rpc.test",
            "0x1010101010101010101010101010101010101010",
        );
        record.vrf_subscription_id = Some("123".to_string());
        record.vrf_key_hash = Some(format!("0x{}", "ab".repeat(32)));
        record.spending_approval_mode = Some("whatever".to_string());
        record.token_sale_address = Some(format!("0x{}", "50".repeat(20)));

        // when
        let config = NetworkConfig::from_record(&record).unwrap();

        // then
        assert_eq!(config.lottery, Address::repeat_byte(0x10));
        assert_eq!(config.vrf_subscription_id, Some(U256::from(123)));
        assert_eq!(config.vrf_key_hash, Some(B256::repeat_byte(0xab)));
        assert_eq!(config.spending_approval_mode, SpendingApprovalMode::Manual);
        assert_eq!(config.token_sale, Some(Address::repeat_byte(0x50)));
        assert_eq!(config.transaction_url(TxHash::ZERO), None);
    }

    #[test]
    fn from_record__bad_token_sale_address__is_a_configuration_error() {
        let mut record = DeploymentRecord::new(
            1,
            "wss://rpc.test",
            "0x1010101010101010101010101010101010101010",
        );
        record.token_sale_address = Some("0xnot-an-address".to_string());
        assert!(matches!(
            NetworkConfig::from_record(&record),
            Err(Error::Connectivity(_))
        ));
    }

    #[test]
    fn from_record__missing_lottery__is_a_configuration_error() {
        let record = DeploymentRecord::new(1, "wss://rpc.test", "");
        assert!(matches!(
            NetworkConfig::from_record(&record),
            Err(Error::Connectivity(_))
        ));
    }

    #[tokio::test]
    async fn tickets__newest_first_with_closed_draw_attached() {
        // given
        let chain = FakeChain::new();
        let player = FakeChain::player_address();
        for (id, round) in [(0, 1), (1, 2), (2, 2)] {
            chain.add_ticket(
                TicketRecord {
                    id,
                    player,
                    round,
                    block_number: 10 + id,
                    numbers: vec![1, 2, 3, 4, 5, 6],
                },
                TicketPrize {
                    prize: BigUint::zero(),
                    withdraw_block_number: 0,
                },
            );
        }
        chain.add_round(1, closed_round(vec![1, 2, 3, 70, 80, 90]));
        let mut open = closed_round(vec![]);
        open.closure_block_number = 0;
        chain.add_round(2, open);
        let session = session(&chain);

        // when
        let tickets = session.tickets(player).await.unwrap();

        // then
        let ids: Vec<u64> = tickets.iter().map(|ticket| ticket.id).collect();
        assert_eq!(ids, vec![2, 1, 0]);
        assert_eq!(tickets[0].draw, None);
        assert_eq!(tickets[2].matches(), Some(3));
    }

    #[tokio::test]
    async fn draw__closed_round__read_once_per_session() {
        // given
        let chain = FakeChain::new();
        chain.add_round(4, closed_round(vec![1, 2, 3, 4, 5, 6]));
        let session = session(&chain);

        // when
        let first = session.draw(4).await.unwrap();
        let second = session.draw(4).await.unwrap();

        // then
        assert_eq!(first, second);
        assert_eq!(chain.calls(Method::RoundData), 1);
    }

    #[tokio::test]
    async fn past_draws__stops_at_first_round() {
        // given
        let chain = FakeChain::new();
        chain.with_state(|state| state.current_round = 2);
        chain.add_round(0, closed_round(vec![1, 2, 3, 4, 5, 6]));
        chain.add_round(1, closed_round(vec![7, 8, 9, 10, 11, 12]));

        // when
        let draws = session(&chain).past_draws(3).await.unwrap();

        // then
        let rounds: Vec<u64> = draws.iter().map(|draw| draw.round).collect();
        assert_eq!(rounds, vec![1, 0]);
    }

    #[tokio::test]
    async fn extended_draw__recovers_transactions_from_logs() {
        // given
        let chain = FakeChain::new();
        chain.add_round(1, closed_round(vec![1, 2, 3, 4, 5, 6]));
        let request = TxHash::repeat_byte(1);
        chain.add_event(EventQuery::VrfRequest { round: 1, block: 50 }, request);
        let session = session(&chain);
        let draw = session.draw(1).await.unwrap();

        // when
        let extended = session.extended_draw(draw).await.unwrap();

        // then
        assert_eq!(extended.draw_transaction, Some(request));
        assert_eq!(extended.closure_transaction, None);
        assert_eq!(chain.calls(Method::FindTransaction), 2);
    }

    #[tokio::test]
    async fn purchase_ticket__short_allowance__approves_then_buys() {
        // given
        let chain = FakeChain::new();
        let session = session(&chain);

        // when
        let hash = session
            .purchase_ticket(&[7, 1, 2, 3, 4, 5, 6], None)
            .await
            .unwrap();

        // then
        let price = BigUint::from(7u8) * BigUint::from(10u8).pow(18);
        assert_eq!(
            chain.sent(),
            vec![
                SentTransaction::Approve {
                    token: chain.currency_token_address(),
                    spender: chain.lottery_address(),
                    amount: price,
                },
                SentTransaction::CreateTicket {
                    referral_code: NULL_REFERRAL_CODE,
                    numbers: vec![1, 2, 3, 4, 5, 6, 7],
                },
            ]
        );
        assert_ne!(hash, TxHash::ZERO);
        assert_eq!(session.ticket_ids(FakeChain::player_address()).await.unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn purchase_ticket__enough_allowance__skips_approval() {
        // given
        let chain = FakeChain::new();
        let session = session(&chain);
        session.purchase_ticket(&[1, 2, 3, 4, 5, 6], None).await.unwrap();
        chain.with_state(|state| {
            let key = (
                chain.currency_token_address(),
                FakeChain::player_address(),
                chain.lottery_address(),
            );
            state.allowances.insert(key, BigUint::from(10u8).pow(20));
        });

        // when
        session
            .purchase_ticket(&[1, 2, 3, 4, 5, 6], Some(B256::repeat_byte(3)))
            .await
            .unwrap();

        // then
        assert_eq!(chain.calls(Method::Approve), 1);
        assert_eq!(chain.calls(Method::CreateTicket), 2);
    }

    #[tokio::test]
    async fn purchase_ticket__invalid_numbers__sends_nothing() {
        let chain = FakeChain::new();
        let result = session(&chain).purchase_ticket(&[1, 1, 2, 3, 4, 5], None).await;
        assert!(matches!(result, Err(Error::InvalidTicket(_))));
        assert!(chain.sent().is_empty());
    }

    fn session_with_mode(chain: &FakeChain, mode: SpendingApprovalMode) -> Session<FakeChain> {
        let mut config = config(chain);
        config.spending_approval_mode = mode;
        Session::new(chain.clone(), Some(FakeChain::player_address()), config)
    }

    #[tokio::test]
    async fn purchase_ticket__eip2612_mode__buys_with_permit_and_no_approval() {
        // given
        let chain = FakeChain::new();
        let session = session_with_mode(&chain, SpendingApprovalMode::Eip2612);
        let now = chain.with_state(|state| state.block_timestamp);

        // when
        session
            .purchase_ticket(&[7, 1, 2, 3, 4, 5, 6], None)
            .await
            .unwrap();

        // then
        let sent = chain.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            SentTransaction::CreateTicketWithPermit {
                numbers,
                permit: SignedPermit::Eip2612(permit),
                ..
            } => {
                assert_eq!(numbers, &vec![1, 2, 3, 4, 5, 6, 7]);
                assert_eq!(permit.value, BigUint::from(7u8) * BigUint::from(10u8).pow(18));
                assert_eq!(permit.deadline, now + crate::permit::PERMIT_VALIDITY_SECS);
            }
            other => panic!("unexpected transaction {other:?}"),
        }
        assert_eq!(chain.calls(Method::Approve), 0);
        assert_eq!(chain.calls(Method::Allowance), 0);
        assert_eq!(chain.calls(Method::PermitNonce), 1);
        assert_eq!(session.ticket_ids(FakeChain::player_address()).await.unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn purchase_ticket__dai_mode__consumes_holder_nonce_without_approval() {
        // given
        let chain = FakeChain::new();
        let session = session_with_mode(&chain, SpendingApprovalMode::Dai);
        let key = (chain.currency_token_address(), FakeChain::player_address());
        chain.with_state(|state| {
            state.permit_nonces.insert(key, 4);
        });

        // when
        session
            .purchase_ticket(&[1, 2, 3, 4, 5, 6], Some(B256::repeat_byte(3)))
            .await
            .unwrap();

        // then
        let sent = chain.sent();
        assert!(!sent.iter().any(|tx| matches!(tx, SentTransaction::Approve { .. })));
        match sent.as_slice() {
            [SentTransaction::CreateTicketWithPermit {
                referral_code,
                permit: SignedPermit::Dai(permit),
                ..
            }] => {
                assert_eq!(*referral_code, B256::repeat_byte(3));
                assert_eq!(permit.nonce, BigUint::from(4u8));
            }
            other => panic!("unexpected transactions {other:?}"),
        }
        assert_eq!(chain.with_state(|state| state.permit_nonces[&key]), 5);
        assert_eq!(chain.calls(Method::DaiPermitNonce), 1);
    }

    #[tokio::test]
    async fn purchase_ticket__permit_mode_short_balance__signs_nothing() {
        // given
        let chain = FakeChain::new();
        chain.with_state(|state| state.balances.clear());
        let session = session_with_mode(&chain, SpendingApprovalMode::Dai);

        // when
        let result = session.purchase_ticket(&[1, 2, 3, 4, 5, 6], None).await;

        // then
        assert!(matches!(result, Err(Error::Transaction(_))));
        assert_eq!(chain.calls(Method::SignHash), 0);
        assert!(chain.sent().is_empty());
    }

    #[tokio::test]
    async fn writes__without_wallet__are_connectivity_errors() {
        // given
        let chain = FakeChain::new().without_signer();
        let session = session(&chain);

        // when
        let purchase = session.purchase_ticket(&[1, 2, 3, 4, 5, 6], None).await;
        let close = session.close_round().await;

        // then
        assert!(matches!(purchase, Err(Error::Connectivity(_))));
        assert!(matches!(close, Err(Error::Connectivity(_))));
        assert!(chain.sent().is_empty());
    }

    #[tokio::test]
    async fn partner_status__reads_governance_balance_and_revenue() {
        // given
        let chain = FakeChain::new();
        let partner = Address::repeat_byte(0x77);
        chain.with_state(|state| {
            state.balances.insert(
                (Address::repeat_byte(0x40), partner),
                BigUint::from(500u32),
            );
            state.unclaimed_revenue.insert(partner, BigUint::from(12u8));
        });

        // when
        let status = session(&chain).partner_status(partner).await.unwrap();

        // then
        assert!(status.is_partner());
        assert!(status.can_withdraw());
        assert_eq!(status.unclaimed_revenue, BigUint::from(12u8));
    }

    #[tokio::test]
    async fn withdraw_revenue__pays_the_signer() {
        let chain = FakeChain::new();
        session(&chain).withdraw_revenue().await.unwrap();
        assert_eq!(
            chain.sent(),
            vec![SentTransaction::WithdrawRevenue {
                account: FakeChain::player_address()
            }]
        );
    }

    #[tokio::test]
    async fn hub__replace_notifies_and_leaves_old_session_untouched() {
        // given
        let hub = SessionHub::new();
        let mut receiver = hub.subscribe();
        let first_chain = FakeChain::new();
        let first = Arc::new(session(&first_chain));
        hub.replace(first.clone());
        receiver.borrow_and_update();

        // when
        let second = Arc::new(Session::new(FakeChain::new(), None, config(&first_chain)));
        hub.replace(second.clone());

        // then
        assert!(receiver.has_changed().unwrap());
        let current = receiver.borrow_and_update().clone().unwrap();
        assert!(Arc::ptr_eq(&current, &second));
        assert_eq!(first.account(), Some(FakeChain::player_address()));
        hub.clear();
        assert!(hub.current().is_none());
    }
}
