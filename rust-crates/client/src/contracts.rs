use crate::{
    Error,
    async_value::AsyncValue,
    chain::LotteryChain,
};
use alloy::primitives::Address;
use serde::Serialize;
use std::{
    fmt,
    sync::Arc,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ContractKind {
    Lottery,
    CurrencyToken,
    Controller,
    GovernanceToken,
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContractKind::Lottery => "lottery",
            ContractKind::CurrencyToken => "currency token",
            ContractKind::Controller => "controller",
            ContractKind::GovernanceToken => "governance token",
        };
        write!(f, "{name}")
    }
}

/// Reference to a deployed contract of a known kind. Handles are plain values;
/// the chain backend that reaches them belongs to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ContractHandle {
    pub kind: ContractKind,
    pub address: Address,
}

impl ContractHandle {
    pub fn new(kind: ContractKind, address: Address) -> Self {
        Self { kind, address }
    }

    pub fn lottery(address: Address) -> Self {
        Self::new(ContractKind::Lottery, address)
    }
}

impl fmt::Display for ContractHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.kind, self.address)
    }
}

/// Lazily walks the contract graph hanging off the lottery:
///
/// ```text
/// lottery ──currencyToken()──▶ currency token
///    └──────owner()──────────▶ controller ──token()──▶ governance token
/// ```
///
/// Each edge is resolved by one contract read the first time it is needed and
/// remembered for the lifetime of the resolver. Concurrent requests for the
/// same edge share a single read; a failed read is retried on the next
/// request.
pub struct ContractResolver {
    lottery: ContractHandle,
    currency_token: AsyncValue<ContractHandle>,
    controller: Arc<AsyncValue<ContractHandle>>,
    governance_token: AsyncValue<ContractHandle>,
}

impl ContractResolver {
    pub fn new<C: LotteryChain>(chain: C, lottery: Address) -> Self {
        let currency_token = {
            let chain = chain.clone();
            AsyncValue::new(move || {
                let chain = chain.clone();
                async move {
                    let address = chain.currency_token(lottery).await?;
                    tracing::debug!("resolved currency token {address}");
                    Ok::<_, Error>(ContractHandle::new(ContractKind::CurrencyToken, address))
                }
            })
        };
        let controller = {
            let chain = chain.clone();
            Arc::new(AsyncValue::new(move || {
                let chain = chain.clone();
                async move {
                    let address = chain.owner(lottery).await?;
                    tracing::debug!("resolved controller {address}");
                    Ok::<_, Error>(ContractHandle::new(ContractKind::Controller, address))
                }
            }))
        };
        let governance_token = {
            let controller = controller.clone();
            AsyncValue::new(move || {
                let chain = chain.clone();
                let controller = controller.clone();
                async move {
                    let controller = controller.get().await?;
                    let address = chain.governance_token(controller.address).await?;
                    tracing::debug!("resolved governance token {address}");
                    Ok::<_, Error>(ContractHandle::new(
                        ContractKind::GovernanceToken,
                        address,
                    ))
                }
            })
        };
        Self {
            lottery: ContractHandle::lottery(lottery),
            currency_token,
            controller,
            governance_token,
        }
    }

    pub fn lottery(&self) -> ContractHandle {
        self.lottery
    }

    pub async fn currency_token(&self) -> crate::Result<ContractHandle> {
        self.currency_token.get().await
    }

    pub async fn controller(&self) -> crate::Result<ContractHandle> {
        self.controller.get().await
    }

    pub async fn governance_token(&self) -> crate::Result<ContractHandle> {
        self.governance_token.get().await
    }

    pub async fn resolve(&self, kind: ContractKind) -> crate::Result<ContractHandle> {
        match kind {
            ContractKind::Lottery => Ok(self.lottery),
            ContractKind::CurrencyToken => self.currency_token().await,
            ContractKind::Controller => self.controller().await,
            ContractKind::GovernanceToken => self.governance_token().await,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use crate::test_helpers::{
        FakeChain,
        Method,
    };

    #[tokio::test]
    async fn governance_token__resolves_through_controller() {
        // given
        let chain = FakeChain::new();
        let resolver = ContractResolver::new(chain.clone(), chain.lottery_address());

        // when
        let token = resolver.governance_token().await.unwrap();

        // then
        assert_eq!(token.kind, ContractKind::GovernanceToken);
        assert_eq!(token.address, chain.governance_token_address());
        assert_eq!(chain.calls(Method::Owner), 1);
        assert_eq!(chain.calls(Method::GovernanceToken), 1);
    }

    #[tokio::test]
    async fn controller__shared_between_edges_and_concurrent_callers() {
        // given
        let chain = FakeChain::new();
        let resolver = ContractResolver::new(chain.clone(), chain.lottery_address());

        // when
        let (controller, token, again) = tokio::join!(
            resolver.controller(),
            resolver.governance_token(),
            resolver.controller()
        );

        // then
        assert_eq!(controller.unwrap().address, chain.controller_address());
        assert_eq!(again.unwrap().address, chain.controller_address());
        assert_eq!(token.unwrap().address, chain.governance_token_address());
        assert_eq!(chain.calls(Method::Owner), 1);
    }

    #[tokio::test]
    async fn currency_token__read_failure__retried_on_next_request() {
        // given
        let chain = FakeChain::new();
        chain.fail_next(Method::CurrencyToken, 1);
        let resolver = ContractResolver::new(chain.clone(), chain.lottery_address());

        // when
        let first = resolver.currency_token().await;
        let second = resolver.currency_token().await;
        let third = resolver.resolve(ContractKind::CurrencyToken).await;

        // then
        assert!(matches!(first, Err(Error::Call(_))));
        assert_eq!(second.unwrap().address, chain.currency_token_address());
        assert_eq!(third.unwrap().kind, ContractKind::CurrencyToken);
        assert_eq!(chain.calls(Method::CurrencyToken), 2);
    }

    #[tokio::test]
    async fn governance_token__controller_failure__propagates_and_recovers() {
        // given
        let chain = FakeChain::new();
        chain.fail_next(Method::Owner, 1);
        let resolver = ContractResolver::new(chain.clone(), chain.lottery_address());

        // when
        let failed = resolver.governance_token().await;
        let recovered = resolver.governance_token().await;

        // then
        assert!(failed.is_err());
        assert_eq!(recovered.unwrap().address, chain.governance_token_address());
        assert_eq!(chain.calls(Method::Owner), 2);
        assert_eq!(chain.calls(Method::GovernanceToken), 1);
    }
}
