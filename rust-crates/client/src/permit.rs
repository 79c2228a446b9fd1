//! Off-chain spending approvals.
//!
//! Both flavours are EIP-712 messages named `Permit`, signed with the
//! connected account and handed to the contract that spends the tokens:
//!
//! * EIP-2612 tokens approve an exact `value`; the domain carries `chainId`.
//! * DAI-style tokens approve everything (`allowed = true`) and bind the
//!   chain through the domain `salt` instead.
//!
//! Deadlines count from the latest block's timestamp, not the local clock.

use crate::{
    Error,
    Result,
    chain::{
        DaiPermit,
        Eip2612Permit,
        LotteryWriter,
    },
    numeric::big_to_u256,
};
use alloy::{
    primitives::{
        Address,
        B256,
        U256,
    },
    sol_types::{
        Eip712Domain,
        SolStruct,
    },
};
use anyhow::anyhow;
use futures::future::try_join3;
use lottery_abi::permit_types::{
    dai,
    eip2612,
};
use num_bigint::BigUint;

/// How long a signed permit stays usable.
pub const PERMIT_VALIDITY_SECS: u64 = 24 * 60 * 60;

const PERMIT_VERSION: &str = "1";

pub fn eip2612_domain(name: String, chain_id: u64, token: Address) -> Eip712Domain {
    Eip712Domain::new(
        Some(name.into()),
        Some(PERMIT_VERSION.into()),
        Some(U256::from(chain_id)),
        Some(token),
        None,
    )
}

pub fn dai_domain(name: String, chain_id: u64, token: Address) -> Eip712Domain {
    Eip712Domain::new(
        Some(name.into()),
        Some(PERMIT_VERSION.into()),
        None,
        Some(token),
        Some(B256::from(U256::from(chain_id))),
    )
}

fn to_u256(value: &BigUint, what: &str) -> Result<U256> {
    big_to_u256(value).ok_or_else(|| Error::transaction(anyhow!("{what} exceeds 256 bits")))
}

/// Lets `spender` pull exactly `value` of `token` from `owner`.
pub async fn sign_eip2612_permit<C: LotteryWriter>(
    chain: &C,
    chain_id: u64,
    token: Address,
    owner: Address,
    spender: Address,
    value: BigUint,
) -> Result<Eip2612Permit> {
    let (name, nonce, now) = try_join3(
        chain.token_name(token),
        chain.permit_nonce(token, owner),
        chain.latest_block_timestamp(),
    )
    .await?;
    let deadline = now.saturating_add(PERMIT_VALIDITY_SECS);
    let message = eip2612::Permit {
        owner,
        spender,
        value: to_u256(&value, "permit value")?,
        nonce: to_u256(&nonce, "permit nonce")?,
        deadline: U256::from(deadline),
    };
    let hash = message.eip712_signing_hash(&eip2612_domain(name, chain_id, token));
    let signature = chain.sign_hash(hash).await?;
    tracing::debug!(%token, %spender, nonce = %nonce, deadline, "signed EIP-2612 permit");
    Ok(Eip2612Permit {
        value,
        deadline,
        signature,
    })
}

/// Lets `spender` pull any amount of the DAI-style `token` from `holder`.
pub async fn sign_dai_permit<C: LotteryWriter>(
    chain: &C,
    chain_id: u64,
    token: Address,
    holder: Address,
    spender: Address,
) -> Result<DaiPermit> {
    let (name, nonce, now) = try_join3(
        chain.token_name(token),
        chain.dai_permit_nonce(token, holder),
        chain.latest_block_timestamp(),
    )
    .await?;
    let expiry = now.saturating_add(PERMIT_VALIDITY_SECS);
    let message = dai::Permit {
        holder,
        spender,
        nonce: to_u256(&nonce, "permit nonce")?,
        expiry: U256::from(expiry),
        allowed: true,
    };
    let hash = message.eip712_signing_hash(&dai_domain(name, chain_id, token));
    let signature = chain.sign_hash(hash).await?;
    tracing::debug!(%token, %spender, nonce = %nonce, expiry, "signed DAI permit");
    Ok(DaiPermit {
        nonce,
        expiry,
        signature,
    })
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use crate::{
        chain::PermitSignature,
        test_helpers::{
            FAKE_CHAIN_ID,
            FakeChain,
            Method,
        },
    };
    use alloy::primitives::Signature;

    fn recover(signature: PermitSignature, hash: B256) -> Address {
        Signature::new(
            U256::from_be_bytes(signature.r.0),
            U256::from_be_bytes(signature.s.0),
            signature.v == 28,
        )
        .recover_address_from_prehash(&hash)
        .unwrap()
    }

    #[test]
    fn domains__dai_binds_chain_through_salt() {
        let token = Address::repeat_byte(0x20);

        let standard = eip2612_domain("Token".to_string(), 137, token);
        let dai = dai_domain("Token".to_string(), 137, token);

        assert_eq!(standard.chain_id, Some(U256::from(137)));
        assert_eq!(standard.salt, None);
        assert_eq!(dai.chain_id, None);
        assert_eq!(dai.salt, Some(B256::from(U256::from(137))));
        assert_ne!(standard.separator(), dai.separator());
    }

    #[tokio::test]
    async fn sign_eip2612_permit__recovers_to_the_owner() {
        // given
        let chain = FakeChain::new();
        let owner = FakeChain::player_address();
        let token = chain.currency_token_address();
        let spender = chain.lottery_address();
        chain.with_state(|state| {
            state.permit_nonces.insert((token, owner), 3);
        });
        let now = chain.with_state(|state| state.block_timestamp);

        // when
        let permit =
            sign_eip2612_permit(&chain, FAKE_CHAIN_ID, token, owner, spender, BigUint::from(5u8))
                .await
                .unwrap();

        // then
        assert_eq!(permit.deadline, now + PERMIT_VALIDITY_SECS);
        let message = eip2612::Permit {
            owner,
            spender,
            value: U256::from(5),
            nonce: U256::from(3),
            deadline: U256::from(permit.deadline),
        };
        let name = chain.with_state(|state| state.token_name.clone());
        let hash = message.eip712_signing_hash(&eip2612_domain(name, FAKE_CHAIN_ID, token));
        assert_eq!(recover(permit.signature, hash), owner);
    }

    #[tokio::test]
    async fn sign_dai_permit__uses_the_holder_nonce() {
        // given
        let chain = FakeChain::new();
        let holder = FakeChain::player_address();
        let token = chain.currency_token_address();
        let spender = chain.sale_address();
        chain.with_state(|state| {
            state.permit_nonces.insert((token, holder), 7);
        });

        // when
        let permit = sign_dai_permit(&chain, FAKE_CHAIN_ID, token, holder, spender)
            .await
            .unwrap();

        // then
        assert_eq!(permit.nonce, BigUint::from(7u8));
        assert_eq!(chain.calls(Method::DaiPermitNonce), 1);
        assert_eq!(chain.calls(Method::PermitNonce), 0);
        let message = dai::Permit {
            holder,
            spender,
            nonce: U256::from(7),
            expiry: U256::from(permit.expiry),
            allowed: true,
        };
        let name = chain.with_state(|state| state.token_name.clone());
        let hash = message.eip712_signing_hash(&dai_domain(name, FAKE_CHAIN_ID, token));
        assert_eq!(recover(permit.signature, hash), holder);
    }

    #[tokio::test]
    async fn sign_dai_permit__without_wallet__is_a_connectivity_error() {
        let chain = FakeChain::new().without_signer();
        let result = sign_dai_permit(
            &chain,
            FAKE_CHAIN_ID,
            chain.currency_token_address(),
            FakeChain::player_address(),
            chain.sale_address(),
        )
        .await;
        assert!(matches!(result, Err(Error::Connectivity(_))));
    }

    #[test]
    fn permit_signature__v_is_27_or_28() {
        let signature = Signature::new(U256::from(1), U256::from(2), true);
        let permit = PermitSignature::from(signature);
        assert_eq!(permit.v, 28);
        assert_eq!(permit.r, B256::from(U256::from(1)));
        assert_eq!(permit.s, B256::from(U256::from(2)));
    }
}
