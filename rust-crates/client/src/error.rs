use std::{
    fmt,
    sync::Arc,
};

/// Errors produced by the client library.
///
/// Every variant is cheap to clone so that one outcome can be handed to all
/// callers waiting on the same in-flight request.
#[derive(Debug, Clone)]
pub enum Error {
    /// A contract read or RPC call failed. Nothing is cached, retrying is safe.
    Call(Arc<anyhow::Error>),
    /// The user dismissed a prompt; no action was taken.
    Cancelled,
    /// The provider is connected to a different chain than configured.
    WrongNetwork { expected: u64, actual: u64 },
    /// Wallet or provider unavailable, or the configuration is unusable.
    Connectivity(String),
    /// A write was rejected by the wallet or reverted on chain.
    Transaction(Arc<anyhow::Error>),
    /// Ticket numbers failed client-side validation.
    InvalidTicket(String),
    /// An amount or share entered by the user cannot be used.
    InvalidAmount(String),
}

impl Error {
    pub fn call(error: impl Into<anyhow::Error>) -> Self {
        Error::Call(Arc::new(error.into()))
    }

    pub fn transaction(error: impl Into<anyhow::Error>) -> Self {
        Error::Transaction(Arc::new(error.into()))
    }

    pub fn connectivity(message: impl Into<String>) -> Self {
        Error::Connectivity(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Whether the same operation may succeed if simply attempted again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Call(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Call(e) => write!(f, "contract call failed: {e:#}"),
            Error::Cancelled => write!(f, "cancelled by user"),
            Error::WrongNetwork { expected, actual } => write!(
                f,
                "wrong network: connected to chain {actual}, expected chain {expected}"
            ),
            Error::Connectivity(msg) => write!(f, "connection problem: {msg}"),
            Error::Transaction(e) => write!(f, "transaction failed: {e:#}"),
            Error::InvalidTicket(msg) => write!(f, "invalid ticket: {msg}"),
            Error::InvalidAmount(msg) => write!(f, "invalid amount: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<anyhow::Error> for Error {
    fn from(error: anyhow::Error) -> Self {
        Error::Call(Arc::new(error))
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    #[test]
    fn clone__shares_the_underlying_cause() {
        // given
        let original = Error::call(anyhow::anyhow!("node unreachable"));

        // when
        let copy = original.clone();

        // then
        match (&original, &copy) {
            (Error::Call(a), Error::Call(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("expected call errors"),
        }
        assert!(copy.is_transient());
    }

    #[test]
    fn display__wrong_network__names_both_chains() {
        let error = Error::WrongNetwork {
            expected: 1,
            actual: 137,
        };
        assert_eq!(
            error.to_string(),
            "wrong network: connected to chain 137, expected chain 1"
        );
    }
}
