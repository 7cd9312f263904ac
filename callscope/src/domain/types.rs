//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers prevent mixing up the different integer handles a
//! host hands out: a timer handle, a task id and a worker id all look like
//! small integers but are never interchangeable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Handle issued by the host for a pending timer, animation frame or idle
/// callback. Always a positive integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub u32);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Host-side identifier of a posted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task#{}", self.0)
    }
}

/// Host-side identifier of a background worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u32);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Worker#{}", self.0)
    }
}

/// A family of host entry points that is instrumented as a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// `set_timeout`, `set_interval` and their cancellations
    Timers,
    /// Indirect code evaluation
    Eval,
    /// `request_animation_frame` / `cancel_animation_frame`
    Animation,
    /// `request_idle_callback` / `cancel_idle_callback`
    Idle,
    /// `yield_now` / `post_task`
    Scheduler,
    /// Background worker construction and messaging
    Worker,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Capability::Timers,
        Capability::Eval,
        Capability::Animation,
        Capability::Idle,
        Capability::Scheduler,
        Capability::Worker,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Capability::Timers => "timers",
            Capability::Eval => "eval",
            Capability::Animation => "animation",
            Capability::Idle => "idle",
            Capability::Scheduler => "scheduler",
            Capability::Worker => "worker",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .into_iter()
            .find(|capability| capability.name() == s)
            .ok_or_else(|| format!("unknown capability '{s}'"))
    }
}

/// Kinds of handle-based pending operations that can be force-canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingKind {
    Timeout,
    Interval,
    AnimationFrame,
    IdleCallback,
}

impl PendingKind {
    /// Key used in the snapshot's `online` counters.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            PendingKind::Timeout => "timeout",
            PendingKind::Interval => "interval",
            PendingKind::AnimationFrame => "animation_frame",
            PendingKind::IdleCallback => "idle_callback",
        }
    }
}

/// How much of a captured stack feeds the call-site identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fidelity {
    /// Hash the whole filtered stack; cache parsed traces
    #[default]
    Full,
    /// Only the innermost usable frame
    Reduced,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_round_trips_through_name() {
        for capability in Capability::ALL {
            assert_eq!(capability.name().parse::<Capability>(), Ok(capability));
        }
        assert!("timer".parse::<Capability>().is_err());
    }

    #[test]
    fn test_capability_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Capability::Scheduler).unwrap(), "\"scheduler\"");
        let fidelity: Fidelity = serde_json::from_str("\"reduced\"").unwrap();
        assert_eq!(fidelity, Fidelity::Reduced);
    }

    #[test]
    fn test_display() {
        assert_eq!(Handle(7).to_string(), "#7");
        assert_eq!(WorkerId(2).to_string(), "Worker#2");
        assert_eq!(PendingKind::AnimationFrame.name(), "animation_frame");
    }
}
