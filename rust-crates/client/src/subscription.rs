use crate::{
    Result,
    chain::LotteryChain,
    lock,
};
use futures::StreamExt;
use std::{
    future::Future,
    sync::{
        Arc,
        Mutex,
    },
};
use tokio::task::AbortHandle;

/// Live feed of a value refreshed on every new block.
///
/// Dropping the handle cancels the feed.
#[derive(Debug)]
pub struct Subscription {
    task: AbortHandle,
    // abort only lands at the task's next await; notifications are delivered
    // under this lock so `cancel` can wait out one already in progress
    cancelled: Arc<Mutex<bool>>,
}

impl Subscription {
    /// Detaches from the block stream. No notification fires after this
    /// returns. Safe to call repeatedly and while the stream is still being
    /// opened, but not from inside the notification callback.
    pub fn cancel(&self) {
        *lock(&self.cancelled) = true;
        self.task.abort();
    }

    /// `true` once the feed stopped, either cancelled or because live updates
    /// were never available.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Fetches a value once, hands it to `on_value`, then repeats the fetch for
/// every new block header until the returned [`Subscription`] is cancelled.
///
/// An error from the first fetch is returned to the caller. Once live, fetch
/// errors are logged and the block is skipped. If the chain cannot open a
/// block stream the subscription stays at the first value.
pub async fn subscribe<C, T, F, Fut, N>(
    chain: &C,
    fetch: F,
    mut on_value: N,
) -> Result<Subscription>
where
    C: LotteryChain,
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
    N: FnMut(T) + Send + 'static,
{
    on_value(fetch().await?);

    let chain = chain.clone();
    let cancelled = Arc::new(Mutex::new(false));
    let stop = cancelled.clone();
    let task = tokio::spawn(async move {
        let mut blocks = match chain.subscribe_blocks().await {
            Ok(blocks) => blocks,
            Err(e) => {
                tracing::warn!("live updates unavailable, keeping the first value: {e}");
                return;
            }
        };
        while let Some(block) = blocks.next().await {
            let fetched = fetch().await;
            let stopped = lock(&stop);
            if *stopped {
                break;
            }
            match fetched {
                Ok(value) => on_value(value),
                Err(e) => {
                    tracing::warn!("refresh at block {} failed: {e}", block.number)
                }
            }
        }
        tracing::debug!("block stream closed");
    });
    Ok(Subscription {
        task: task.abort_handle(),
        cancelled,
    })
}
