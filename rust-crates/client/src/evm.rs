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
    numeric::{
        big_to_u256,
        u256_to_big,
    },
};
use alloy::{
    eips::BlockNumberOrTag,
    network::{
        Ethereum,
        EthereumWallet,
    },
    primitives::{
        Address,
        B256,
        TxHash,
        U256,
    },
    providers::{
        DynProvider,
        PendingTransactionBuilder,
        Provider,
        ProviderBuilder,
    },
    rpc::types::Filter,
    signers::{
        SignerSync,
        local::PrivateKeySigner,
    },
    sol_types::SolEvent,
};
use anyhow::anyhow;
use futures::StreamExt;
use lottery_abi::{
    controller_instance,
    dai_permit_instance,
    lottery_instance,
    lottery_types::ILottery,
    permit_token_instance,
    sale_instance,
    token_instance,
};
use num_bigint::BigUint;

/// [`LotteryChain`] over a JSON-RPC provider.
///
/// Block subscriptions need a pubsub transport (`ws://` or `ipc`); over HTTP
/// [`LotteryChain::subscribe_blocks`] fails and callers fall back to one-shot
/// reads.
#[derive(Clone)]
pub struct EvmChain {
    provider: DynProvider,
    // kept next to the provider's wallet for typed-data signatures
    signer: Option<PrivateKeySigner>,
}

impl EvmChain {
    pub async fn connect(rpc_url: &str, signer: Option<PrivateKeySigner>) -> Result<Self> {
        let address = signer.as_ref().map(PrivateKeySigner::address);
        let provider = match signer.clone() {
            Some(signer) => ProviderBuilder::new()
                .wallet(EthereumWallet::from(signer))
                .connect(rpc_url)
                .await
                .map_err(|e| Error::connectivity(format!("{rpc_url}: {e}")))?
                .erased(),
            None => ProviderBuilder::new()
                .connect(rpc_url)
                .await
                .map_err(|e| Error::connectivity(format!("{rpc_url}: {e}")))?
                .erased(),
        };
        tracing::debug!(rpc_url, signer = ?address, "provider connected");
        Ok(Self { provider, signer })
    }

    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }

    async fn first_log_transaction(&self, filter: Filter) -> Result<Option<TxHash>> {
        let logs = self.provider.get_logs(&filter).await.map_err(Error::call)?;
        Ok(logs.into_iter().find_map(|log| log.transaction_hash))
    }
}

fn to_u64(value: U256) -> Result<u64> {
    u64::try_from(value).map_err(|_| Error::call(anyhow!("{value} does not fit in 64 bits")))
}

fn to_u256(value: &BigUint, what: &str) -> Result<U256> {
    big_to_u256(value).ok_or_else(|| Error::transaction(anyhow!("{what} exceeds 256 bits")))
}

fn indexed(value: u64) -> B256 {
    B256::from(U256::from(value))
}

fn event_filter(lottery: Address, signature: B256, block: u64) -> Filter {
    Filter::new()
        .address(lottery)
        .event_signature(signature)
        .from_block(block)
        .to_block(block)
}

async fn mined(pending: PendingTransactionBuilder<Ethereum>) -> Result<TxHash> {
    let hash = *pending.tx_hash();
    tracing::debug!(%hash, "transaction sent");
    let receipt = pending.get_receipt().await.map_err(Error::transaction)?;
    if !receipt.status() {
        return Err(Error::transaction(anyhow!(
            "transaction {} reverted",
            receipt.transaction_hash
        )));
    }
    Ok(receipt.transaction_hash)
}

impl LotteryChain for EvmChain {
    async fn chain_id(&self) -> Result<u64> {
        self.provider.get_chain_id().await.map_err(Error::call)
    }

    async fn owner(&self, contract: Address) -> Result<Address> {
        lottery_instance(contract, &self.provider)
            .owner()
            .call()
            .await
            .map_err(Error::call)
    }

    async fn paused(&self, lottery: Address) -> Result<bool> {
        lottery_instance(lottery, &self.provider)
            .paused()
            .call()
            .await
            .map_err(Error::call)
    }

    async fn is_open(&self, lottery: Address) -> Result<bool> {
        lottery_instance(lottery, &self.provider)
            .isOpen()
            .call()
            .await
            .map_err(Error::call)
    }

    async fn currency_token(&self, lottery: Address) -> Result<Address> {
        lottery_instance(lottery, &self.provider)
            .currencyToken()
            .call()
            .await
            .map_err(Error::call)
    }

    async fn jackpot(&self, lottery: Address) -> Result<BigUint> {
        let jackpot = lottery_instance(lottery, &self.provider)
            .getJackpot()
            .call()
            .await
            .map_err(Error::call)?;
        Ok(u256_to_big(jackpot))
    }

    async fn base_ticket_price(&self, lottery: Address) -> Result<BigUint> {
        let price = lottery_instance(lottery, &self.provider)
            .getBaseTicketPrice()
            .call()
            .await
            .map_err(Error::call)?;
        Ok(u256_to_big(price))
    }

    async fn ticket_price(&self, lottery: Address, numbers: Vec<u8>) -> Result<BigUint> {
        let price = lottery_instance(lottery, &self.provider)
            .getTicketPrice(numbers)
            .call()
            .await
            .map_err(Error::call)?;
        Ok(u256_to_big(price))
    }

    async fn current_round(&self, lottery: Address) -> Result<u64> {
        let round = lottery_instance(lottery, &self.provider)
            .getCurrentRound()
            .call()
            .await
            .map_err(Error::call)?;
        to_u64(round)
    }

    async fn next_draw_time(&self, lottery: Address) -> Result<u64> {
        let time = lottery_instance(lottery, &self.provider)
            .getNextDrawTime()
            .call()
            .await
            .map_err(Error::call)?;
        to_u64(time)
    }

    async fn ticket_ids(&self, lottery: Address, account: Address) -> Result<Vec<u64>> {
        let ids = lottery_instance(lottery, &self.provider)
            .getTicketIds(account)
            .call()
            .await
            .map_err(Error::call)?;
        ids.into_iter().map(to_u64).collect()
    }

    async fn ticket(&self, lottery: Address, id: u64) -> Result<TicketRecord> {
        let ticket = lottery_instance(lottery, &self.provider)
            .getTicket(U256::from(id))
            .call()
            .await
            .map_err(Error::call)?;
        Ok(TicketRecord {
            id,
            player: ticket.player,
            round: to_u64(ticket.round)?,
            block_number: to_u64(ticket.blockNumber)?,
            numbers: ticket.numbers,
        })
    }

    async fn ticket_prize(&self, lottery: Address, id: u64) -> Result<TicketPrize> {
        let prize = lottery_instance(lottery, &self.provider)
            .getTicketPrize(U256::from(id))
            .call()
            .await
            .map_err(Error::call)?;
        Ok(TicketPrize {
            prize: u256_to_big(prize.prize),
            withdraw_block_number: to_u64(prize.withdrawBlockNumber)?,
        })
    }

    async fn round_data(&self, lottery: Address, round: u64) -> Result<RoundData> {
        let data = lottery_instance(lottery, &self.provider)
            .getRoundData(U256::from(round))
            .call()
            .await
            .map_err(Error::call)?;
        let mut winners = [0u64; 5];
        for (slot, count) in winners.iter_mut().zip(data.winners) {
            *slot = to_u64(count)?;
        }
        Ok(RoundData {
            prizes: data.prizes.map(u256_to_big),
            stash: u256_to_big(data.stash),
            total_combinations: u256_to_big(data.totalCombinations),
            draw_block_number: to_u64(data.drawBlockNumber)?,
            closure_block_number: to_u64(data.closureBlockNumber)?,
            numbers: data.numbers.to_vec(),
            winners,
        })
    }

    async fn governance_token(&self, controller: Address) -> Result<Address> {
        controller_instance(controller, &self.provider)
            .token()
            .call()
            .await
            .map_err(Error::call)
    }

    async fn can_draw(&self, controller: Address) -> Result<bool> {
        controller_instance(controller, &self.provider)
            .canDraw()
            .call()
            .await
            .map_err(Error::call)
    }

    async fn waiting_for_closure(&self, controller: Address) -> Result<bool> {
        controller_instance(controller, &self.provider)
            .waitingForClosure()
            .call()
            .await
            .map_err(Error::call)
    }

    async fn unclaimed_revenue(&self, controller: Address, account: Address) -> Result<BigUint> {
        let revenue = controller_instance(controller, &self.provider)
            .getUnclaimedRevenue(account)
            .call()
            .await
            .map_err(Error::call)?;
        Ok(u256_to_big(revenue))
    }

    async fn balance_of(&self, token: Address, account: Address) -> Result<BigUint> {
        let balance = token_instance(token, &self.provider)
            .balanceOf(account)
            .call()
            .await
            .map_err(Error::call)?;
        Ok(u256_to_big(balance))
    }

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<BigUint> {
        let allowance = token_instance(token, &self.provider)
            .allowance(owner, spender)
            .call()
            .await
            .map_err(Error::call)?;
        Ok(u256_to_big(allowance))
    }

    async fn token_name(&self, token: Address) -> Result<String> {
        token_instance(token, &self.provider)
            .name()
            .call()
            .await
            .map_err(Error::call)
    }

    async fn permit_nonce(&self, token: Address, owner: Address) -> Result<BigUint> {
        let nonce = permit_token_instance(token, &self.provider)
            .nonces(owner)
            .call()
            .await
            .map_err(Error::call)?;
        Ok(u256_to_big(nonce))
    }

    async fn dai_permit_nonce(&self, token: Address, holder: Address) -> Result<BigUint> {
        let nonce = dai_permit_instance(token, &self.provider)
            .getNonce(holder)
            .call()
            .await
            .map_err(Error::call)?;
        Ok(u256_to_big(nonce))
    }

    async fn latest_block_timestamp(&self) -> Result<u64> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await
            .map_err(Error::call)?
            .ok_or_else(|| Error::call(anyhow!("latest block not available")))?;
        Ok(block.header.timestamp)
    }

    async fn sale_currency_token(&self, sale: Address) -> Result<Address> {
        sale_instance(sale, &self.provider)
            .currencyToken()
            .call()
            .await
            .map_err(Error::call)
    }

    async fn sale_price(&self, sale: Address) -> Result<BigUint> {
        let price = sale_instance(sale, &self.provider)
            .price()
            .call()
            .await
            .map_err(Error::call)?;
        Ok(u256_to_big(price))
    }

    async fn sale_is_open(&self, sale: Address) -> Result<bool> {
        sale_instance(sale, &self.provider)
            .isOpen()
            .call()
            .await
            .map_err(Error::call)
    }

    async fn sale_balance(&self, sale: Address, account: Address) -> Result<BigUint> {
        let balance = sale_instance(sale, &self.provider)
            .balanceOf(account)
            .call()
            .await
            .map_err(Error::call)?;
        Ok(u256_to_big(balance))
    }

    async fn find_transaction(
        &self,
        lottery: Address,
        query: EventQuery,
    ) -> Result<Option<TxHash>> {
        match query {
            EventQuery::Ticket { id, block } => {
                // six-number tickets are logged as `Ticket6`
                for signature in [ILottery::Ticket::SIGNATURE_HASH, ILottery::Ticket6::SIGNATURE_HASH]
                {
                    let filter = event_filter(lottery, signature, block).topic3(indexed(id));
                    if let Some(hash) = self.first_log_transaction(filter).await? {
                        return Ok(Some(hash));
                    }
                }
                Ok(None)
            }
            EventQuery::VrfRequest { round, block } => {
                let filter =
                    event_filter(lottery, ILottery::VRFRequest::SIGNATURE_HASH, block)
                        .topic1(indexed(round));
                self.first_log_transaction(filter).await
            }
            EventQuery::Draw { round, block } => {
                let filter = event_filter(lottery, ILottery::Draw::SIGNATURE_HASH, block)
                    .topic1(indexed(round));
                self.first_log_transaction(filter).await
            }
        }
    }

    async fn subscribe_blocks(&self) -> Result<BlockStream> {
        let subscription = self
            .provider
            .subscribe_blocks()
            .await
            .map_err(|e| Error::connectivity(format!("block subscription: {e}")))?;
        Ok(subscription
            .into_stream()
            .map(|header| BlockNotification {
                number: header.number,
            })
            .boxed())
    }
}

impl LotteryWriter for EvmChain {
    fn signer(&self) -> Option<Address> {
        self.signer.as_ref().map(PrivateKeySigner::address)
    }

    async fn sign_hash(&self, hash: B256) -> Result<PermitSignature> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| Error::connectivity("connect a wallet to sign permits"))?;
        let signature = signer.sign_hash_sync(&hash).map_err(Error::transaction)?;
        Ok(signature.into())
    }

    async fn approve(&self, token: Address, spender: Address, amount: BigUint) -> Result<TxHash> {
        let amount = to_u256(&amount, "approval amount")?;
        let pending = token_instance(token, &self.provider)
            .approve(spender, amount)
            .send()
            .await
            .map_err(Error::transaction)?;
        mined(pending).await
    }

    async fn create_ticket(
        &self,
        lottery: Address,
        referral_code: B256,
        numbers: Vec<u8>,
    ) -> Result<TxHash> {
        let contract = lottery_instance(lottery, &self.provider);
        let pending = match <[u8; 6]>::try_from(numbers.as_slice()) {
            Ok(six) => contract.createTicket6(referral_code, six).send().await,
            Err(_) => contract.createTicket(referral_code, numbers).send().await,
        }
        .map_err(Error::transaction)?;
        mined(pending).await
    }

    async fn create_ticket_with_permit(
        &self,
        lottery: Address,
        referral_code: B256,
        numbers: Vec<u8>,
        permit: SignedPermit,
    ) -> Result<TxHash> {
        let contract = lottery_instance(lottery, &self.provider);
        let six = <[u8; 6]>::try_from(numbers.as_slice()).ok();
        let pending = match permit {
            SignedPermit::Eip2612(permit) => {
                let value = to_u256(&permit.value, "permit value")?;
                let deadline = U256::from(permit.deadline);
                let PermitSignature { v, r, s } = permit.signature;
                match six {
                    Some(six) => {
                        contract
                            .createTicket6WithPermit(referral_code, six, value, deadline, v, r, s)
                            .send()
                            .await
                    }
                    None => {
                        contract
                            .createTicketWithPermit(referral_code, numbers, value, deadline, v, r, s)
                            .send()
                            .await
                    }
                }
            }
            SignedPermit::Dai(permit) => {
                let nonce = to_u256(&permit.nonce, "permit nonce")?;
                let expiry = U256::from(permit.expiry);
                let PermitSignature { v, r, s } = permit.signature;
                match six {
                    Some(six) => {
                        contract
                            .createTicket6WithDaiPermit(referral_code, six, nonce, expiry, v, r, s)
                            .send()
                            .await
                    }
                    None => {
                        contract
                            .createTicketWithDaiPermit(referral_code, numbers, nonce, expiry, v, r, s)
                            .send()
                            .await
                    }
                }
            }
        }
        .map_err(Error::transaction)?;
        mined(pending).await
    }

    async fn purchase_sale_tokens(
        &self,
        sale: Address,
        amount: BigUint,
        permit: DaiPermit,
    ) -> Result<TxHash> {
        let amount = to_u256(&amount, "purchase amount")?;
        let nonce = to_u256(&permit.nonce, "permit nonce")?;
        let PermitSignature { v, r, s } = permit.signature;
        let pending = sale_instance(sale, &self.provider)
            .purchaseWithDai(amount, nonce, U256::from(permit.expiry), v, r, s)
            .send()
            .await
            .map_err(Error::transaction)?;
        mined(pending).await
    }

    async fn withdraw_sale_tokens(&self, sale: Address) -> Result<TxHash> {
        let pending = sale_instance(sale, &self.provider)
            .withdrawAll()
            .send()
            .await
            .map_err(Error::transaction)?;
        mined(pending).await
    }

    async fn withdraw_prize(&self, lottery: Address, ticket_id: u64) -> Result<TxHash> {
        let pending = lottery_instance(lottery, &self.provider)
            .withdrawPrize(U256::from(ticket_id))
            .send()
            .await
            .map_err(Error::transaction)?;
        mined(pending).await
    }

    async fn draw(&self, controller: Address, request: DrawRequest) -> Result<TxHash> {
        let pending = controller_instance(controller, &self.provider)
            .draw(
                request.vrf_subscription_id,
                request.vrf_key_hash,
                request.native_payment,
            )
            .send()
            .await
            .map_err(Error::transaction)?;
        mined(pending).await
    }

    async fn close_round(&self, controller: Address) -> Result<TxHash> {
        let pending = controller_instance(controller, &self.provider)
            .closeRound()
            .send()
            .await
            .map_err(Error::transaction)?;
        mined(pending).await
    }

    async fn withdraw_revenue(&self, controller: Address, account: Address) -> Result<TxHash> {
        let pending = controller_instance(controller, &self.provider)
            .withdraw(account)
            .send()
            .await
            .map_err(Error::transaction)?;
        mined(pending).await
    }
}
