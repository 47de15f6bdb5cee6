//! Queued units of work.

use std::any::Any;

/// Pure transform from the current state to the next one.
pub(crate) type Reducer<S> = Box<dyn FnOnce(&S) -> S + Send + 'static>;

/// Side-effecting observer of the current state.
pub(crate) type Reader<S> = Box<dyn FnOnce(&S) + Send + 'static>;

/// One entry of the store's combined FIFO.
///
/// Mutations and reads share a single queue so that arrival order across both
/// kinds is the service order.
pub(crate) enum Job<S> {
    Mutate(Reducer<S>),
    Read(Reader<S>),
}

impl<S> Job<S> {
    pub(crate) const fn kind(&self) -> &'static str {
        match self {
            Self::Mutate(_) => "mutate",
            Self::Read(_) => "read",
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
