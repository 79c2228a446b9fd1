//! The trigger / wait-for-VRF / close-round cycle that ends every round.
//!
//! The stage is never stored. It is derived from three contract predicates
//! each time it is asked for, so a stale reading is corrected by the next
//! block.

use crate::{
    Error,
    Result,
    chain::{
        DrawRequest,
        LotteryChain,
        LotteryWriter,
    },
    checker::AsyncChecker,
    session::Session,
    subscription::{
        Subscription,
        subscribe,
    },
};
use alloy::primitives::{
    B256,
    TxHash,
    U256,
};
use chrono::{
    DateTime,
    TimeDelta,
    Utc,
};
use serde::Serialize;
use std::{
    fmt,
    future::Future,
    sync::Arc,
};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DrawStage {
    /// Tickets are on sale.
    Round,
    /// The draw window is open; anyone may request randomness.
    Trigger,
    /// Randomness was requested and the oracle has not answered yet.
    WaitForVrf,
    /// Randomness arrived; anyone may close the round.
    CloseRound,
}

impl DrawStage {
    /// Priority order of the predicates, which may overlap while the contract
    /// moves between stages:
    ///
    /// 1. a closed round means the draw was requested
    /// 2. `canDraw`
    /// 3. `waitingForClosure`
    pub fn select(is_open: bool, can_draw: bool, waiting_for_closure: bool) -> Self {
        if !is_open {
            DrawStage::WaitForVrf
        } else if can_draw {
            DrawStage::Trigger
        } else if waiting_for_closure {
            DrawStage::CloseRound
        } else {
            DrawStage::Round
        }
    }

    /// Same as [`DrawStage::select`], awaiting each predicate only if the
    /// ones before it did not decide. Reads are not atomic with respect to
    /// each other.
    pub async fn evaluate(
        is_open: impl Future<Output = Result<bool>>,
        can_draw: impl Future<Output = Result<bool>>,
        waiting_for_closure: impl Future<Output = Result<bool>>,
    ) -> Result<Self> {
        if !is_open.await? {
            return Ok(DrawStage::WaitForVrf);
        }
        if can_draw.await? {
            return Ok(DrawStage::Trigger);
        }
        Ok(Self::select(true, false, waiting_for_closure.await?))
    }
}

impl fmt::Display for DrawStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DrawStage::Round => "round in progress",
            DrawStage::Trigger => "1. trigger",
            DrawStage::WaitForVrf => "2. wait for VRF",
            DrawStage::CloseRound => "3. close round",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Countdown {
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl fmt::Display for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} days, {} hours, {} minutes, {} seconds",
            self.days, self.hours, self.minutes, self.seconds
        )
    }
}

/// What the `Round` stage shows while tickets are on sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RoundPhase {
    Countdown(Countdown),
    /// The draw window opened but the controller does not allow drawing yet.
    AwaitingContract,
}

impl RoundPhase {
    pub fn at(next_draw: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let remaining = next_draw - now;
        if remaining <= TimeDelta::zero() {
            return RoundPhase::AwaitingContract;
        }
        let total = remaining.num_seconds();
        RoundPhase::Countdown(Countdown {
            days: total / 86_400,
            hours: total % 86_400 / 3_600,
            minutes: total % 3_600 / 60,
            seconds: total % 60,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMessage {
    pub title: String,
    pub body: String,
}

impl UserMessage {
    pub fn error(error: &Error) -> Self {
        Self {
            title: "Error".to_string(),
            body: error.to_string(),
        }
    }
}

/// Surfaces action failures to the user, e.g. as a message dialog.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, message: UserMessage);
}

/// Overrides for the draw request. Unset fields fall back to the network
/// configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerOptions {
    pub vrf_subscription_id: Option<U256>,
    pub vrf_key_hash: Option<B256>,
    pub native_payment: bool,
}

pub struct DrawWorkflow<C, N> {
    session: Arc<Session<C>>,
    notifier: N,
    can_draw: AsyncChecker,
    waiting_for_closure: AsyncChecker,
}

impl<C: LotteryChain, N: Notifier> DrawWorkflow<C, N> {
    pub fn new(session: Arc<Session<C>>, notifier: N) -> Self {
        let can_draw = {
            let session = session.clone();
            AsyncChecker::new(move || {
                let session = session.clone();
                async move { session.can_draw().await }
            })
        };
        let waiting_for_closure = {
            let session = session.clone();
            AsyncChecker::new(move || {
                let session = session.clone();
                async move { session.is_waiting_for_closure().await }
            })
        };
        Self {
            session,
            notifier,
            can_draw,
            waiting_for_closure,
        }
    }

    pub fn session(&self) -> &Arc<Session<C>> {
        &self.session
    }

    pub async fn evaluate(&self) -> Result<DrawStage> {
        DrawStage::evaluate(
            self.session.is_open(),
            self.can_draw.check(),
            self.waiting_for_closure.check(),
        )
        .await
    }

    /// Evaluates the stage now and again on every block. The receiver holds
    /// the latest stage; the first one is in place when this returns.
    pub async fn watch(
        self: &Arc<Self>,
    ) -> Result<(watch::Receiver<Option<DrawStage>>, Subscription)> {
        let (sender, receiver) = watch::channel(None);
        let workflow = self.clone();
        let subscription = subscribe(
            self.session.chain(),
            move || {
                let workflow = workflow.clone();
                async move { workflow.evaluate().await }
            },
            move |stage| {
                let previous = sender.send_replace(Some(stage));
                if previous != Some(stage) {
                    tracing::info!("draw stage: {stage}");
                }
            },
        )
        .await?;
        Ok((receiver, subscription))
    }

    /// Detaches callers waiting on a predicate check, e.g. when the view
    /// that asked goes away.
    pub fn cancel_pending_checks(&self) {
        self.can_draw.cancel();
        self.waiting_for_closure.cancel();
    }

    pub async fn round_phase(&self, now: DateTime<Utc>) -> Result<RoundPhase> {
        let next_draw = self.session.time_of_next_draw().await?;
        Ok(RoundPhase::at(next_draw, now))
    }

    /// Transaction that requested randomness for the current round, while
    /// waiting for the oracle.
    pub async fn pending_request(&self) -> Result<Option<TxHash>> {
        let draw = self.session.current_draw().await?;
        if draw.draw_block == 0 {
            return Ok(None);
        }
        Ok(self.session.extended_draw(draw).await?.draw_transaction)
    }

    fn report<T>(&self, action: &str, outcome: Result<T>) -> Result<T> {
        if let Err(error) = &outcome {
            if error.is_cancelled() {
                tracing::info!("{action}: no action taken");
            } else {
                tracing::error!("{action} failed: {error}");
                self.notifier.notify(UserMessage::error(error));
            }
        }
        outcome
    }
}

impl<C: LotteryWriter, N: Notifier> DrawWorkflow<C, N> {
    pub fn draw_request(&self, options: TriggerOptions) -> Result<DrawRequest> {
        let config = self.session.config();
        let vrf_subscription_id = options
            .vrf_subscription_id
            .or(config.vrf_subscription_id)
            .ok_or_else(|| Error::connectivity("no VRF subscription id configured"))?;
        let vrf_key_hash = options
            .vrf_key_hash
            .or(config.vrf_key_hash)
            .ok_or_else(|| Error::connectivity("no VRF key hash configured"))?;
        Ok(DrawRequest {
            vrf_subscription_id,
            vrf_key_hash,
            native_payment: options.native_payment,
        })
    }

    /// Requests randomness for the current round. Failures are reported to
    /// the notifier and returned; nothing is retried.
    pub async fn trigger(&self, options: TriggerOptions) -> Result<TxHash> {
        let outcome = match self.draw_request(options) {
            Ok(request) => self.session.trigger_draw(request).await,
            Err(e) => Err(e),
        };
        self.report("draw", outcome)
    }

    pub async fn close_round(&self) -> Result<TxHash> {
        let outcome = self.session.close_round().await;
        self.report("close round", outcome)
    }

    /// Runs a confirmed action: `confirm` resolves to `Err(Error::Cancelled)`
    /// when the user backs out, which is passed through without a report.
    pub async fn confirmed<T, F, Fut>(
        &self,
        action: &str,
        confirm: impl Future<Output = Result<()>>,
        run: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match confirm.await {
            Ok(()) => run().await,
            Err(e) => self.report(action, Err(e)),
        }
    }
}
