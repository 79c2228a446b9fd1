use crate::{
    Error,
    lock,
};
use futures::{
    FutureExt,
    channel::oneshot,
    future::BoxFuture,
};
use std::{
    future::{
        Future,
        pending,
    },
    mem,
    sync::Mutex,
};

type Predicate<E> = Box<dyn Fn() -> BoxFuture<'static, Result<bool, E>> + Send + Sync>;

struct Waiter<E> {
    sender: oneshot::Sender<Result<bool, E>>,
}

struct PollState<E> {
    executing: bool,
    waiters: Vec<Waiter<E>>,
    /// Bumped by `cancel` so abandoned waiters can tell they were dropped on
    /// purpose.
    generation: u64,
}

/// Single-flight wrapper around an expensive boolean check, e.g. "can a draw
/// be triggered now".
///
/// Concurrent `check` calls share one evaluation of the predicate. Results are
/// never cached: once an evaluation settles, the next `check` evaluates again.
pub struct AsyncChecker<E = Error> {
    predicate: Predicate<E>,
    state: Mutex<PollState<E>>,
}

impl<E> AsyncChecker<E>
where
    E: Clone + Send + 'static,
{
    pub fn new<F, Fut>(predicate: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, E>> + Send + 'static,
    {
        Self {
            predicate: Box::new(move || predicate().boxed()),
            state: Mutex::new(PollState {
                executing: false,
                waiters: Vec::new(),
                generation: 0,
            }),
        }
    }

    pub fn is_executing(&self) -> bool {
        lock(&self.state).executing
    }

    pub async fn check(&self) -> Result<bool, E> {
        loop {
            let waiter = {
                let mut state = lock(&self.state);
                if state.executing {
                    let (sender, receiver) = oneshot::channel();
                    state.waiters.push(Waiter { sender });
                    Some((receiver, state.generation))
                } else {
                    state.executing = true;
                    None
                }
            };
            let Some((receiver, generation)) = waiter else {
                return self.evaluate().await;
            };
            match receiver.await {
                Ok(outcome) => return outcome,
                Err(oneshot::Canceled) => {
                    if lock(&self.state).generation != generation {
                        // abandoned by `cancel`: stay unsettled
                        return pending().await;
                    }
                    // the evaluating caller went away; evaluate ourselves
                    continue;
                }
            }
        }
    }

    /// Detaches every queued caller. Their futures never complete. An
    /// evaluation already running keeps going and still settles the caller
    /// that started it, as well as anyone who queues after this call.
    pub fn cancel(&self) {
        let abandoned = {
            let mut state = lock(&self.state);
            state.generation = state.generation.wrapping_add(1);
            mem::take(&mut state.waiters)
        };
        tracing::trace!("abandoning {} queued checks", abandoned.len());
        drop(abandoned);
    }

    async fn evaluate(&self) -> Result<bool, E> {
        let mut evaluation = Evaluation {
            state: &self.state,
            finished: false,
        };
        let outcome = (self.predicate)().await;
        evaluation.finished = true;

        let waiters = {
            let mut state = lock(&self.state);
            state.executing = false;
            mem::take(&mut state.waiters)
        };
        for waiter in waiters {
            let _ = waiter.sender.send(outcome.clone());
        }
        outcome
    }
}

struct Evaluation<'a, E> {
    state: &'a Mutex<PollState<E>>,
    finished: bool,
}

impl<E> Drop for Evaluation<'_, E> {
    fn drop(&mut self) {
        if !self.finished {
            let mut state = lock(self.state);
            state.executing = false;
            state.waiters.clear();
        }
    }
}
