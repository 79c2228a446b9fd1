//! Governance token sale: status, quotes and purchases paid in DAI through a
//! signed permit, and redemption of the bought tokens once the sale closes.

use crate::{
    Error,
    Result,
    chain::{
        LotteryChain,
        LotteryWriter,
    },
    numeric::{
        currency_for_tokens,
        serialize_decimal,
        serialize_optional_decimal,
        supply_share,
        tokens_for_currency,
        tokens_for_share,
    },
    permit::sign_dai_permit,
    session::Session,
};
use alloy::primitives::{
    Address,
    TxHash,
};
use futures::future::{
    try_join,
    try_join3,
};
use num_bigint::BigUint;
use num_traits::Zero;
use serde::Serialize;

/// The figure the buyer entered; the other two are derived from it.
#[derive(Debug, Clone, PartialEq)]
pub enum SaleAmount {
    /// Currency to spend, 18 decimals.
    Currency(BigUint),
    /// Tokens to buy, 18 decimals.
    Tokens(BigUint),
    /// Fraction of the total token supply.
    Share(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaleQuote {
    #[serde(serialize_with = "serialize_decimal")]
    pub currency: BigUint,
    #[serde(serialize_with = "serialize_decimal")]
    pub tokens: BigUint,
    /// Fraction of the total supply the tokens represent.
    pub share: f64,
}

impl SaleQuote {
    /// Derives all three figures at `price` currency units per whole token.
    pub fn at_price(amount: SaleAmount, price: &BigUint) -> Result<Self> {
        let tokens = match amount {
            SaleAmount::Currency(currency) => {
                let tokens = tokens_for_currency(&currency, price)
                    .ok_or_else(|| Error::InvalidAmount("the sale has no price".to_string()))?;
                return Ok(Self {
                    share: supply_share(&tokens),
                    tokens,
                    currency,
                });
            }
            SaleAmount::Tokens(tokens) => tokens,
            SaleAmount::Share(share) => tokens_for_share(share).ok_or_else(|| {
                Error::InvalidAmount(format!("share {share} is not between 0 and 1"))
            })?,
        };
        Ok(Self {
            currency: currency_for_tokens(&tokens, price),
            share: supply_share(&tokens),
            tokens,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaleStatus {
    pub sale: Address,
    #[serde(serialize_with = "serialize_decimal")]
    pub price: BigUint,
    pub is_open: bool,
    /// Bought and not yet redeemed, when an account is known.
    #[serde(serialize_with = "serialize_optional_decimal")]
    pub balance: Option<BigUint>,
}

impl SaleStatus {
    /// Bought tokens can be taken out once the sale has closed.
    pub fn can_redeem(&self) -> bool {
        !self.is_open && self.balance.as_ref().is_some_and(|balance| !balance.is_zero())
    }
}

impl<C: LotteryChain> Session<C> {
    pub fn token_sale(&self) -> Result<Address> {
        self.config()
            .token_sale
            .ok_or_else(|| Error::connectivity("no token sale is configured for this network"))
    }

    pub async fn sale_status(&self, account: Option<Address>) -> Result<SaleStatus> {
        let sale = self.token_sale()?;
        let balance = async {
            match account {
                Some(account) => self.chain().sale_balance(sale, account).await.map(Some),
                None => Ok(None),
            }
        };
        let (price, is_open, balance) = try_join3(
            self.chain().sale_price(sale),
            self.chain().sale_is_open(sale),
            balance,
        )
        .await?;
        Ok(SaleStatus {
            sale,
            price,
            is_open,
            balance,
        })
    }

    pub async fn quote_sale(&self, amount: SaleAmount) -> Result<SaleQuote> {
        let price = self.chain().sale_price(self.token_sale()?).await?;
        SaleQuote::at_price(amount, &price)
    }
}

impl<C: LotteryWriter> Session<C> {
    /// Buys `tokens` (18 decimals), approving the currency with a DAI permit
    /// signed for the sale contract.
    pub async fn buy_sale_tokens(&self, tokens: BigUint) -> Result<TxHash> {
        let buyer = self.signer()?;
        let sale = self.token_sale()?;
        if tokens.is_zero() {
            return Err(Error::InvalidAmount("nothing to buy".to_string()));
        }
        let (price, is_open, currency) = try_join3(
            self.chain().sale_price(sale),
            self.chain().sale_is_open(sale),
            self.chain().sale_currency_token(sale),
        )
        .await?;
        if !is_open {
            return Err(Error::transaction(anyhow::anyhow!("the token sale is closed")));
        }
        let cost = currency_for_tokens(&tokens, &price);
        let balance = self.chain().balance_of(currency, buyer).await?;
        if balance < cost {
            return Err(Error::transaction(anyhow::anyhow!(
                "balance {balance} is below the cost {cost}"
            )));
        }
        let permit =
            sign_dai_permit(self.chain(), self.config().chain_id, currency, buyer, sale).await?;
        let hash = self
            .chain()
            .purchase_sale_tokens(sale, tokens, permit)
            .await
            .inspect_err(|e| tracing::error!("token purchase failed: {e}"))?;
        tracing::info!("bought sale tokens for {cost} in {hash}");
        Ok(hash)
    }

    /// Withdraws every bought token after the sale has closed.
    pub async fn redeem_sale_tokens(&self) -> Result<TxHash> {
        let buyer = self.signer()?;
        let sale = self.token_sale()?;
        let (is_open, balance) = try_join(
            self.chain().sale_is_open(sale),
            self.chain().sale_balance(sale, buyer),
        )
        .await?;
        if is_open {
            return Err(Error::transaction(anyhow::anyhow!(
                "the token sale is still open"
            )));
        }
        if balance.is_zero() {
            return Err(Error::transaction(anyhow::anyhow!("no tokens to redeem")));
        }
        let hash = self
            .chain()
            .withdraw_sale_tokens(sale)
            .await
            .inspect_err(|e| tracing::error!("token redemption failed: {e}"))?;
        tracing::info!("redeemed {balance} sale tokens in {hash}");
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use crate::{
        session::{
            NetworkConfig,
            SpendingApprovalMode,
        },
        test_helpers::{
            FAKE_CHAIN_ID,
            FakeChain,
            Method,
            SentTransaction,
        },
    };

    fn whole(tokens: u64) -> BigUint {
        BigUint::from(tokens) * BigUint::from(10u8).pow(18)
    }

    fn session(chain: &FakeChain, token_sale: Option<Address>) -> Session<FakeChain> {
        let config = NetworkConfig {
            chain_id: FAKE_CHAIN_ID,
            rpc_url: "ws://localhost:8545".to_string(),
            lottery: chain.lottery_address(),
            block_explorer: None,
            vrf_subscription_id: None,
            vrf_key_hash: None,
            spending_approval_mode: SpendingApprovalMode::Manual,
            token_sale,
        };
        Session::new(chain.clone(), Some(FakeChain::player_address()), config)
    }

    #[test]
    fn quote__each_entry_derives_the_other_figures() {
        // given 0.05 per token
        let price = whole(1) / 20u8;

        // when
        let by_currency = SaleQuote::at_price(SaleAmount::Currency(whole(1_000)), &price).unwrap();
        let by_tokens = SaleQuote::at_price(SaleAmount::Tokens(whole(20_000)), &price).unwrap();
        let by_share = SaleQuote::at_price(SaleAmount::Share(0.00002), &price).unwrap();

        // then
        assert_eq!(by_currency, by_tokens);
        assert_eq!(by_share.tokens, whole(20_000));
        assert_eq!(by_share.currency, whole(1_000));
        assert!((by_currency.share - 0.00002).abs() < 1e-18);
    }

    #[test]
    fn quote__bad_inputs__are_invalid_amounts() {
        let price = whole(1);
        assert!(matches!(
            SaleQuote::at_price(SaleAmount::Share(1.01), &price),
            Err(Error::InvalidAmount(_))
        ));
        assert!(matches!(
            SaleQuote::at_price(SaleAmount::Currency(whole(1)), &BigUint::zero()),
            Err(Error::InvalidAmount(_))
        ));
    }

    #[tokio::test]
    async fn sale_status__without_account__skips_balance() {
        let chain = FakeChain::new();
        let status = session(&chain, Some(chain.sale_address()))
            .sale_status(None)
            .await
            .unwrap();
        assert!(status.is_open);
        assert_eq!(status.balance, None);
        assert!(!status.can_redeem());
        assert_eq!(chain.calls(Method::SaleBalance), 0);
    }

    #[tokio::test]
    async fn token_sale__not_configured__is_a_configuration_error() {
        let chain = FakeChain::new();
        let result = session(&chain, None).sale_status(None).await;
        assert!(matches!(result, Err(Error::Connectivity(_))));
    }

    #[tokio::test]
    async fn buy_sale_tokens__pays_through_dai_permit_without_approval() {
        // given
        let chain = FakeChain::new();
        let session = session(&chain, Some(chain.sale_address()));
        let buyer = FakeChain::player_address();
        let currency = chain.currency_token_address();
        let before = chain.with_state(|state| state.balances[&(currency, buyer)].clone());

        // when
        session.buy_sale_tokens(whole(20_000)).await.unwrap();

        // then
        match chain.sent().as_slice() {
            [SentTransaction::PurchaseSaleTokens { amount, permit }] => {
                assert_eq!(*amount, whole(20_000));
                assert_eq!(permit.nonce, BigUint::zero());
            }
            other => panic!("unexpected transactions {other:?}"),
        }
        assert_eq!(chain.calls(Method::Approve), 0);
        let (balance, bought) = chain.with_state(|state| {
            (
                state.balances[&(currency, buyer)].clone(),
                state.sale_balances[&buyer].clone(),
            )
        });
        assert_eq!(before - balance, whole(1_000));
        assert_eq!(bought, whole(20_000));
        assert_eq!(chain.calls(Method::DaiPermitNonce), 1);
    }

    #[tokio::test]
    async fn buy_sale_tokens__closed_sale__signs_and_sends_nothing() {
        // given
        let chain = FakeChain::new();
        chain.with_state(|state| state.sale_open = false);
        let session = session(&chain, Some(chain.sale_address()));

        // when
        let result = session.buy_sale_tokens(whole(1)).await;

        // then
        assert!(matches!(result, Err(Error::Transaction(_))));
        assert_eq!(chain.calls(Method::SignHash), 0);
        assert!(chain.sent().is_empty());
    }

    #[tokio::test]
    async fn buy_sale_tokens__cost_above_balance__is_rejected() {
        let chain = FakeChain::new();
        let session = session(&chain, Some(chain.sale_address()));

        // 10_000 currency buys 200_000 tokens at 0.05
        let result = session.buy_sale_tokens(whole(200_001)).await;

        assert!(matches!(result, Err(Error::Transaction(_))));
        assert_eq!(chain.calls(Method::SignHash), 0);
    }

    #[tokio::test]
    async fn redeem_sale_tokens__after_close__moves_tokens_to_the_buyer() {
        // given
        let chain = FakeChain::new();
        let session = session(&chain, Some(chain.sale_address()));
        let buyer = FakeChain::player_address();
        session.buy_sale_tokens(whole(500)).await.unwrap();
        let still_open = session.redeem_sale_tokens().await;
        chain.with_state(|state| state.sale_open = false);

        // when
        let status = session.sale_status(Some(buyer)).await.unwrap();
        session.redeem_sale_tokens().await.unwrap();

        // then
        assert!(matches!(still_open, Err(Error::Transaction(_))));
        assert!(status.can_redeem());
        assert_eq!(chain.calls(Method::WithdrawSaleTokens), 1);
        let governance = chain.governance_token_address();
        assert_eq!(
            chain.with_state(|state| state.balances[&(governance, buyer)].clone()),
            whole(500)
        );
        assert!(matches!(
            session.redeem_sale_tokens().await,
            Err(Error::Transaction(_))
        ));
    }
}
