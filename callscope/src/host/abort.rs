//! Cancellation signals for posted tasks.
//!
//! Listeners run synchronously inside [`AbortController::abort`], in the
//! order they were added, and each runs at most once.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

type AbortListener = Box<dyn FnOnce()>;

#[derive(Default)]
struct SignalState {
    aborted: Cell<bool>,
    listeners: RefCell<Vec<AbortListener>>,
}

/// Read side of an abort controller; cheap to clone.
#[derive(Clone, Default)]
pub struct AbortSignal(Rc<SignalState>);

impl AbortSignal {
    #[must_use]
    pub fn aborted(&self) -> bool {
        self.0.aborted.get()
    }

    /// Register a listener. Listeners added after the abort never run.
    pub fn on_abort(&self, listener: impl FnOnce() + 'static) {
        if !self.aborted() {
            self.0.listeners.borrow_mut().push(Box::new(listener));
        }
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal").field("aborted", &self.aborted()).finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Abort the signal and dispatch listeners. A second call is a no-op.
    pub fn abort(&self) {
        let state = &self.signal.0;
        if state.aborted.replace(true) {
            return;
        }
        let listeners = std::mem::take(&mut *state.listeners.borrow_mut());
        for listener in listeners {
            listener();
        }
    }
}
