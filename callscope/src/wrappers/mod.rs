//! Capability wrappers.
//!
//! Each wrapper owns the interception lifecycle of one family of entry
//! points: it captures the call site, validates arguments, delegates to the
//! host and keeps per-call-site history.
//!
//! Callbacks handed to the host hold only immutable identity (the scheduling
//! call site and the user's code) plus a weak reference to the wrapper state;
//! registrations are looked up by handle when the host fires them, since a
//! reset may have replaced every record in between.

pub mod animation;
pub mod eval;
pub mod history;
pub mod idle;
pub mod probe;
pub mod scheduler;
pub mod timer;
pub mod worker;

use callscope_common::Snapshot;

use crate::domain::Capability;

pub use animation::AnimationWrapper;
pub use eval::EvalWrapper;
pub use idle::IdleWrapper;
pub use probe::{Probe, Timed};
pub use scheduler::SchedulerWrapper;
pub use timer::{TimerCode, TimerKind, TimerWrapper};
pub use worker::WorkerWrapper;

/// Shared surface the aggregator drives.
pub trait CapabilityWrapper {
    fn capability(&self) -> Capability;

    /// Write this capability's collections and counters into `snapshot`.
    /// Hidden capabilities still report counters but leave collections `None`.
    fn collect(&self, snapshot: &mut Snapshot, visible: bool);

    /// Drop all history and registrations and zero the counters.
    fn reset(&self);
}
