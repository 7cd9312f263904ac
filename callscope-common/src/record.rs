//! History record types.
//!
//! One record exists per call site per capability direction ("set" records
//! and "clear" records are separate families). All records start with the
//! same flattened header so an observer can render any of them generically:
//!
//! ```json
//! { "traceId": "9f2c…", "trace": [{"name": "main", "link": "https://…"}],
//!   "domain": "same-origin", "calls": 3, "facts": 2, ... }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::facts::FactMask;

/// Prefix marking a display value that failed validation.
pub const INVALID_TAG: &str = "⚠ ";

/// Display text for a cancellation whose handle had no pending registration.
pub const NOT_FOUND_TEXT: &str = "not found";

/// Stable digest identifying a call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(String);

impl TraceId {
    #[must_use]
    pub fn new(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TraceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// One retained frame of a captured stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackFrame {
    /// Function name, absent when the frame only had a location
    pub name: Option<String>,
    /// Source location (`url:line:col`) or a fixed tag for synthetic frames
    pub link: String,
}

/// Origin of a call site's innermost frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallSiteDomain {
    /// Same origin as the observed program
    SameOrigin,
    /// Any other URL scheme
    External,
    /// The instrumentation's own package
    HostPackage,
    #[default]
    Unknown,
}

/// Identity, frames and origin of a call site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSite {
    pub trace_id: TraceId,
    /// Outermost relevant frame first, innermost last
    pub trace: Arc<Vec<StackFrame>>,
    pub domain: CallSiteDomain,
}

/// Fields present on every history record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordHeader {
    #[serde(flatten)]
    pub site: CallSite,
    pub calls: u64,
    pub facts: FactMask,
}

impl RecordHeader {
    #[must_use]
    pub fn new(site: CallSite) -> Self {
        Self { site, calls: 0, facts: FactMask::EMPTY }
    }

    #[must_use]
    pub fn trace_id(&self) -> &TraceId {
        &self.site.trace_id
    }
}

/// A delay or handle as shown to the observer.
///
/// Valid numbers stay numbers; rejected inputs keep their textual form behind
/// [`INVALID_TAG`] so the observer sees exactly what the program passed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DisplayValue {
    Number(f64),
    Text(String),
    /// The argument was omitted
    #[default]
    Unset,
}

impl DisplayValue {
    #[must_use]
    pub fn tagged(raw: impl fmt::Display) -> Self {
        Self::Text(format!("{INVALID_TAG}{raw}"))
    }

    #[must_use]
    pub fn not_found() -> Self {
        Self::Text(NOT_FOUND_TEXT.to_owned())
    }

    #[must_use]
    pub fn is_tagged(&self) -> bool {
        matches!(self, Self::Text(text) if text.starts_with(INVALID_TAG))
    }

    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// Lifecycle counters shared by every "set" record whose operations can be
/// pending and canceled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingStats {
    /// Operations from this call site that are currently pending
    pub online: u64,
    pub canceled_counter: u64,
    /// Distinct call sites that canceled an operation from this one
    pub canceled_by_trace_ids: Vec<TraceId>,
}

impl PendingStats {
    pub fn went_online(&mut self) {
        self.online += 1;
    }

    pub fn went_offline(&mut self) {
        self.online = self.online.saturating_sub(1);
    }

    /// Count a cancellation and remember who issued it (deduplicated).
    pub fn record_cancel(&mut self, canceler: &TraceId) {
        self.canceled_counter += 1;
        if !self.canceled_by_trace_ids.contains(canceler) {
            self.canceled_by_trace_ids.push(canceler.clone());
        }
    }
}

/// Common access to the header of every record type.
pub trait Record {
    fn header(&self) -> &RecordHeader;
    fn header_mut(&mut self) -> &mut RecordHeader;
}

macro_rules! impl_record {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Record for $ty {
                fn header(&self) -> &RecordHeader {
                    &self.header
                }

                fn header_mut(&mut self) -> &mut RecordHeader {
                    &mut self.header
                }
            }
        )*
    };
}

impl_record!(
    TimerSetRecord,
    ClearRecord,
    EvalRecord,
    AnimationRecord,
    IdleRecord,
    YieldRecord,
    PostTaskRecord,
    WorkerRecord,
);

/// `set_timeout` / `set_interval` call site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSetRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    /// Most recent handle issued to this call site
    pub handler: u64,
    /// Callback name, or the code string when one was passed
    pub callback: String,
    pub delay: DisplayValue,
    #[serde(flatten)]
    pub pending: PendingStats,
    pub self_time: Option<f64>,
}

/// Any cancellation call site (`clear_timeout`, `clear_interval`,
/// `cancel_animation_frame`, `cancel_idle_callback`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub handler: DisplayValue,
    /// Delay of the matched registration; absent for animation frames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<DisplayValue>,
}

/// Indirect evaluation call site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub code: Value,
    pub returned_value: Value,
    pub self_time: Option<f64>,
}

/// `request_animation_frame` call site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub handler: u64,
    pub callback: String,
    #[serde(flatten)]
    pub pending: PendingStats,
    pub self_time: Option<f64>,
    /// Calls per second over the last sampling window
    pub cps: Option<f64>,
}

/// `request_idle_callback` call site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdleRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub handler: u64,
    pub callback: String,
    /// Requested timeout option
    pub delay: DisplayValue,
    /// Whether the most recent run was forced by the timeout
    pub did_timeout: Option<bool>,
    #[serde(flatten)]
    pub pending: PendingStats,
    pub self_time: Option<f64>,
}

/// Cooperative `yield` call site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YieldRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
}

/// Prioritized `post_task` call site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostTaskRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub priority: Option<String>,
    pub delay: DisplayValue,
    pub online: u64,
    pub aborts: u64,
    pub self_time: Option<f64>,
}

/// Aggregate for every worker built from one script specifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRecord {
    /// Header call site is the most recent constructor call
    #[serde(flatten)]
    pub header: RecordHeader,
    pub specifier: String,
    pub online: u64,
    pub peak_online: u64,
    pub post_messages: u64,
    pub messages: u64,
    pub errors: u64,
    pub listeners: u64,
    pub terminations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::Fact;

    fn site(id: &str) -> CallSite {
        CallSite {
            trace_id: TraceId::from(id),
            trace: Arc::new(vec![StackFrame {
                name: Some("main".to_owned()),
                link: "https://example.com/app.js:1:1".to_owned(),
            }]),
            domain: CallSiteDomain::SameOrigin,
        }
    }

    #[test]
    fn test_record_cancel_deduplicates() {
        let mut stats = PendingStats::default();
        stats.record_cancel(&TraceId::from("a"));
        stats.record_cancel(&TraceId::from("a"));
        stats.record_cancel(&TraceId::from("b"));

        assert_eq!(stats.canceled_counter, 3);
        assert_eq!(stats.canceled_by_trace_ids, vec![TraceId::from("a"), TraceId::from("b")]);
    }

    #[test]
    fn test_online_never_underflows() {
        let mut stats = PendingStats::default();
        stats.went_offline();
        assert_eq!(stats.online, 0);
        stats.went_online();
        stats.went_offline();
        stats.went_offline();
        assert_eq!(stats.online, 0);
    }

    #[test]
    fn test_display_value_serialization() {
        assert_eq!(serde_json::to_value(DisplayValue::Number(12.5)).unwrap(), 12.5);
        assert_eq!(serde_json::to_value(DisplayValue::Unset).unwrap(), Value::Null);
        assert_eq!(serde_json::to_value(DisplayValue::tagged(-1)).unwrap(), "⚠ -1");
        assert!(DisplayValue::tagged("NaN").is_tagged());
        assert!(!DisplayValue::not_found().is_tagged());
    }

    #[test]
    fn test_header_is_flattened() {
        let mut header = RecordHeader::new(site("abc"));
        header.calls = 2;
        header.facts.assign(Fact::bit(1));
        let record = YieldRecord { header };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["traceId"], "abc");
        assert_eq!(json["domain"], "same-origin");
        assert_eq!(json["calls"], 2);
        assert_eq!(json["facts"], 2);
        assert_eq!(json["trace"][0]["name"], "main");

        let back: YieldRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_clear_record_round_trips_without_delay() {
        let record = ClearRecord {
            header: RecordHeader::new(site("x")),
            handler: DisplayValue::tagged(0),
            delay: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("delay").is_none());
        let back: ClearRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
