//! Client-side access layer for the on-chain lottery: contract resolution,
//! single-flight reads, block-driven subscriptions, the draw workflow and
//! the governance token sale.

use std::sync::{
    Mutex,
    MutexGuard,
    PoisonError,
};

pub mod async_value;
pub mod chain;
pub mod checker;
pub mod contracts;
pub mod error;
pub mod evm;
pub mod model;
pub mod numeric;
pub mod odds;
pub mod permit;
pub mod sale;
pub mod session;
pub mod subscription;
pub mod workflow;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use async_value::AsyncValue;
pub use chain::{
    LotteryChain,
    LotteryWriter,
};
pub use checker::AsyncChecker;
pub use contracts::{
    ContractHandle,
    ContractKind,
    ContractResolver,
};
pub use error::Error;
pub use evm::EvmChain;
pub use sale::{
    SaleAmount,
    SaleQuote,
    SaleStatus,
};
pub use session::{
    NetworkConfig,
    Session,
    SessionHub,
    SpendingApprovalMode,
};
pub use subscription::Subscription;
pub use workflow::{
    DrawStage,
    DrawWorkflow,
    Notifier,
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Locks a mutex, ignoring poisoning. None of the guarded states can be left
/// half-updated by a panic.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
