//! Response callbacks and their delivery policy.
//!
//! # Design
//! A request holds at most one `Listener`: a callback plus the `Delivery`
//! choice. Delivery is an explicit enum rather than a property of the callback
//! type. The listener sits in a `ListenerSlot` that is emptied by the first
//! notification, so a request reports at most one outcome, at most once. The
//! slot moves into the single worker that completes the call, so no lock is
//! needed.

use tracing::trace;

use crate::error::RequestError;
use crate::looper::MainHandle;

/// Receives the outcome of a request.
pub trait Callback<T>: Send + 'static {
    fn on_response(&mut self, response: T);
    fn on_failure(&mut self, error: RequestError);
}

/// Which thread a callback runs on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Delivery {
    /// Posted to the main looper.
    #[default]
    MainThread,
    /// Run directly on the thread that completed the network call.
    CallingThread,
}

/// Closure-backed `Callback`.
pub struct FnCallback<R, F> {
    on_response: R,
    on_failure: F,
}

/// Build a `Callback` from two closures.
pub fn callback<T, R, F>(on_response: R, on_failure: F) -> FnCallback<R, F>
where
    R: FnMut(T) + Send + 'static,
    F: FnMut(RequestError) + Send + 'static,
{
    FnCallback {
        on_response,
        on_failure,
    }
}

impl<T, R, F> Callback<T> for FnCallback<R, F>
where
    R: FnMut(T) + Send + 'static,
    F: FnMut(RequestError) + Send + 'static,
{
    fn on_response(&mut self, response: T) {
        (self.on_response)(response)
    }

    fn on_failure(&mut self, error: RequestError) {
        (self.on_failure)(error)
    }
}

pub(crate) struct Listener<T> {
    pub(crate) callback: Box<dyn Callback<T>>,
    pub(crate) delivery: Delivery,
}

/// Holds at most one listener and hands it out once.
pub(crate) struct ListenerSlot<T> {
    inner: Option<Listener<T>>,
}

impl<T: Send + 'static> ListenerSlot<T> {
    pub(crate) fn empty() -> Self {
        Self { inner: None }
    }

    pub(crate) fn replace(&mut self, listener: Option<Listener<T>>) {
        self.inner = listener;
    }

    pub(crate) fn is_set(&self) -> bool {
        self.inner.is_some()
    }

    pub(crate) fn notify(&mut self, outcome: Result<T, RequestError>, main: &MainHandle) {
        let Some(mut listener) = self.inner.take() else {
            trace!("no listener attached, dropping outcome");
            return;
        };
        match listener.delivery {
            Delivery::CallingThread => deliver(listener.callback.as_mut(), outcome),
            Delivery::MainThread => {
                main.post(move || deliver(listener.callback.as_mut(), outcome));
            }
        }
    }
}

fn deliver<T: 'static>(callback: &mut dyn Callback<T>, outcome: Result<T, RequestError>) {
    match outcome {
        Ok(response) => callback.on_response(response),
        Err(error) => callback.on_failure(error),
    }
}
