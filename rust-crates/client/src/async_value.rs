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
    future::Future,
    mem,
    sync::Mutex,
};

type Factory<V, E> = Box<dyn Fn() -> BoxFuture<'static, Result<V, E>> + Send + Sync>;
type Waiter<V, E> = oneshot::Sender<Result<V, E>>;

enum State<V, E> {
    Empty,
    Pending(Vec<Waiter<V, E>>),
    Resolved(V),
}

/// Lazily computed value that is fetched at most once at a time and cached
/// forever after the first success.
///
/// The first caller to find the value missing runs the factory; everyone who
/// asks while that attempt is in flight waits for its outcome. A failure is
/// handed to every waiter and leaves the value empty, so the next `get` starts
/// a fresh attempt.
pub struct AsyncValue<V, E = Error> {
    factory: Factory<V, E>,
    state: Mutex<State<V, E>>,
}

impl<V, E> AsyncValue<V, E>
where
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub fn new<F, Fut>(factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        Self {
            factory: Box::new(move || factory().boxed()),
            state: Mutex::new(State::Empty),
        }
    }

    /// Already resolved value. Never starts a fetch.
    pub fn cached(&self) -> Option<V> {
        match &*lock(&self.state) {
            State::Resolved(value) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(&*lock(&self.state), State::Pending(_))
    }

    pub async fn get(&self) -> Result<V, E> {
        loop {
            let waiter = {
                let mut state = lock(&self.state);
                match &mut *state {
                    State::Resolved(value) => return Ok(value.clone()),
                    State::Pending(waiters) => {
                        let (sender, receiver) = oneshot::channel();
                        waiters.push(sender);
                        Some(receiver)
                    }
                    State::Empty => {
                        *state = State::Pending(Vec::new());
                        None
                    }
                }
            };
            match waiter {
                None => return self.fetch().await,
                Some(receiver) => match receiver.await {
                    Ok(outcome) => return outcome,
                    // the caller driving the attempt was dropped before it
                    // finished; start over
                    Err(oneshot::Canceled) => continue,
                },
            }
        }
    }

    async fn fetch(&self) -> Result<V, E> {
        let mut attempt = Attempt {
            state: &self.state,
            finished: false,
        };
        let outcome = (self.factory)().await;
        attempt.finished = true;

        let waiters = {
            let mut state = lock(&self.state);
            let previous = match &outcome {
                Ok(value) => mem::replace(&mut *state, State::Resolved(value.clone())),
                Err(_) => mem::replace(&mut *state, State::Empty),
            };
            match previous {
                State::Pending(waiters) => waiters,
                _ => Vec::new(),
            }
        };
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
        outcome
    }
}

/// Resets a pending value when the future driving the factory is dropped
/// mid-flight, which releases its waiters so one of them can take over.
struct Attempt<'a, V, E> {
    state: &'a Mutex<State<V, E>>,
    finished: bool,
}

impl<V, E> Drop for Attempt<'_, V, E> {
    fn drop(&mut self) {
        if !self.finished {
            let mut state = lock(self.state);
            if matches!(&*state, State::Pending(_)) {
                *state = State::Empty;
            }
        }
    }
}
