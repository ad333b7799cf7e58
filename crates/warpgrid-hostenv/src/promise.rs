//! Settle-once host promises.
//!
//! Reactions attached with [`Promise::then`] are never run inline: settling
//! a promise posts one job per reaction onto the host loop, in the order the
//! reactions were attached.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::debug;

use crate::error::HostError;
use crate::event_loop::HostHandle;
use crate::func::Func;

type NativeReaction<T> = Box<dyn FnOnce(Result<T, HostError>) + Send>;

enum Reaction<T> {
    Funcs {
        on_fulfilled: Option<Func<T>>,
        on_rejected: Option<Func<HostError>>,
    },
    Native(NativeReaction<T>),
}

enum State<T> {
    Pending(Vec<Reaction<T>>),
    Fulfilled(T),
    Rejected(HostError),
}

struct Shared<T> {
    state: Mutex<State<T>>,
    host: HostHandle,
}

/// A host promise that settles exactly once with `T` or a [`HostError`].
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

/// The settling half of a [`Promise`]. Only the first settlement counts.
pub struct Resolver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Promise<T>
where
    T: Clone + Send + 'static,
{
    pub fn new(host: &HostHandle) -> (Self, Resolver<T>) {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::Pending(Vec::new())),
            host: host.clone(),
        });
        (
            Self {
                shared: shared.clone(),
            },
            Resolver { shared },
        )
    }

    pub fn resolved(host: &HostHandle, value: T) -> Self {
        let (promise, resolver) = Self::new(host);
        resolver.resolve(value);
        promise
    }

    pub fn rejected(host: &HostHandle, error: HostError) -> Self {
        let (promise, resolver) = Self::new(host);
        resolver.reject(error);
        promise
    }

    /// Attach host functions as reactions.
    ///
    /// The promise does not take ownership of the registrations: releasing
    /// them remains the caller's job.
    pub fn then(&self, on_fulfilled: Option<&Func<T>>, on_rejected: Option<&Func<HostError>>) {
        self.react(Reaction::Funcs {
            on_fulfilled: on_fulfilled.cloned(),
            on_rejected: on_rejected.cloned(),
        });
    }

    /// Attach a host-internal reaction that is not exposed through the
    /// function table.
    pub fn on_settle(&self, f: impl FnOnce(Result<T, HostError>) + Send + 'static) {
        self.react(Reaction::Native(Box::new(f)));
    }

    /// Await settlement from host-side async code.
    pub fn settled(&self) -> impl Future<Output = Result<T, HostError>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        self.on_settle(move |result| {
            let _ = tx.send(result);
        });
        async move {
            rx.await
                .unwrap_or_else(|_| Err(HostError::invalid_state("host loop stopped")))
        }
    }

    pub fn is_settled(&self) -> bool {
        !matches!(*self.shared.state.lock().unwrap(), State::Pending(_))
    }

    fn react(&self, reaction: Reaction<T>) {
        let mut state = self.shared.state.lock().unwrap();
        let outcome = match &mut *state {
            State::Pending(reactions) => {
                reactions.push(reaction);
                return;
            }
            State::Fulfilled(value) => Ok(value.clone()),
            State::Rejected(error) => Err(error.clone()),
        };
        drop(state);
        schedule(&self.shared.host, reaction, outcome);
    }
}

impl<T> Resolver<T>
where
    T: Clone + Send + 'static,
{
    pub fn resolve(&self, value: T) {
        self.settle(Ok(value));
    }

    pub fn reject(&self, error: HostError) {
        self.settle(Err(error));
    }

    fn settle(&self, outcome: Result<T, HostError>) {
        let reactions = {
            let mut state = self.shared.state.lock().unwrap();
            if !matches!(*state, State::Pending(_)) {
                debug!("ignoring settlement of an already settled promise");
                return;
            }
            let next = match &outcome {
                Ok(value) => State::Fulfilled(value.clone()),
                Err(error) => State::Rejected(error.clone()),
            };
            match std::mem::replace(&mut *state, next) {
                State::Pending(reactions) => reactions,
                _ => Vec::new(),
            }
        };
        for reaction in reactions {
            schedule(&self.shared.host, reaction, outcome.clone());
        }
    }
}

fn schedule<T>(host: &HostHandle, reaction: Reaction<T>, outcome: Result<T, HostError>)
where
    T: Send + 'static,
{
    let posted = host.post(move || match (reaction, outcome) {
        (Reaction::Native(f), outcome) => f(outcome),
        (
            Reaction::Funcs {
                on_fulfilled: Some(f),
                ..
            },
            Ok(value),
        ) => {
            f.call(value);
        }
        (
            Reaction::Funcs {
                on_rejected: Some(f),
                ..
            },
            Err(error),
        ) => {
            f.call(error);
        }
        (Reaction::Funcs { .. }, _) => {}
    });
    if posted.is_err() {
        debug!("promise reaction dropped: host loop is not running");
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match *self.shared.state.lock().unwrap() {
            State::Pending(_) => "pending",
            State::Fulfilled(_) => "fulfilled",
            State::Rejected(_) => "rejected",
        };
        f.debug_struct("Promise").field("state", &state).finish()
    }
}
