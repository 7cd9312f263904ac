//! Point-in-time aggregate of every capability's history.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::record::{
    AnimationRecord, ClearRecord, EvalRecord, IdleRecord, PostTaskRecord, TimerSetRecord,
    WorkerRecord, YieldRecord,
};

/// One collection per history family.
///
/// A collection is `None` when its capability is not instrumented or is
/// hidden by the visibility configuration. Collections are ordered by
/// `calls` descending, ties broken by identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub set_timeout: Option<Vec<TimerSetRecord>>,
    pub clear_timeout: Option<Vec<ClearRecord>>,
    pub set_interval: Option<Vec<TimerSetRecord>>,
    pub clear_interval: Option<Vec<ClearRecord>>,
    pub eval: Option<Vec<EvalRecord>>,
    pub request_animation_frame: Option<Vec<AnimationRecord>>,
    pub cancel_animation_frame: Option<Vec<ClearRecord>>,
    pub request_idle_callback: Option<Vec<IdleRecord>>,
    pub cancel_idle_callback: Option<Vec<ClearRecord>>,
    pub scheduler_yield: Option<Vec<YieldRecord>>,
    pub scheduler_post_task: Option<Vec<PostTaskRecord>>,
    pub worker: Option<Vec<WorkerRecord>>,
    /// Total calls per entry point, including hidden capabilities
    pub calls: BTreeMap<String, u64>,
    /// Currently pending operations per pending kind
    pub online: BTreeMap<String, u64>,
}

impl Snapshot {
    /// Total number of call-site records across all visible collections.
    #[must_use]
    pub fn record_count(&self) -> usize {
        fn len<T>(list: Option<&Vec<T>>) -> usize {
            list.map_or(0, Vec::len)
        }

        len(self.set_timeout.as_ref())
            + len(self.clear_timeout.as_ref())
            + len(self.set_interval.as_ref())
            + len(self.clear_interval.as_ref())
            + len(self.eval.as_ref())
            + len(self.request_animation_frame.as_ref())
            + len(self.cancel_animation_frame.as_ref())
            + len(self.request_idle_callback.as_ref())
            + len(self.cancel_idle_callback.as_ref())
            + len(self.scheduler_yield.as_ref())
            + len(self.scheduler_post_task.as_ref())
            + len(self.worker.as_ref())
    }

    /// Sum of all entry-point call counters.
    #[must_use]
    pub fn total_calls(&self) -> u64 {
        self.calls.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot_serializes_nulls() {
        let json = serde_json::to_value(Snapshot::default()).unwrap();
        assert!(json["setTimeout"].is_null());
        assert!(json["requestAnimationFrame"].is_null());
        assert_eq!(json["calls"], serde_json::json!({}));
    }

    #[test]
    fn test_counts() {
        let mut snapshot = Snapshot::default();
        snapshot.scheduler_yield = Some(Vec::new());
        snapshot.calls.insert("set_timeout".to_owned(), 4);
        snapshot.calls.insert("eval".to_owned(), 1);

        assert_eq!(snapshot.record_count(), 0);
        assert_eq!(snapshot.total_calls(), 5);
    }
}
