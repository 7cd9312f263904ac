//! # callscope-common - Snapshot Shape Shared With Observers
//!
//! Everything an external observer needs to decode what the call-site
//! engine reports, with no dependency on hosts or wrappers:
//!
//! ```text
//!   producer (callscope)                      observer
//!   ────────────────────                      ────────
//!   wrappers ─▶ history ─▶ Snapshot
//!                             │
//!                        DeltaEncoder ──delta──▶ DeltaDecoder ─▶ Snapshot
//!                                                     │
//!                                        facts::get_details(mask, table)
//! ```
//!
//! - [`facts`]: bit-flag conditions attached to records and their decoding tables
//! - [`record`]: per-call-site history records and shared identity types
//! - [`snapshot`]: the aggregate of every capability's history
//! - [`delta`]: structural diff/apply keyed by record identity

pub mod delta;
pub mod error;
pub mod facts;
pub mod record;
pub mod snapshot;

pub use delta::{Delta, DeltaCodec, DeltaDecoder, DeltaEncoder};
pub use error::{CodecError, FactError};
pub use facts::{Fact, FactInfo, FactMask, FactTable};
pub use record::{
    AnimationRecord, CallSite, CallSiteDomain, ClearRecord, DisplayValue, EvalRecord, IdleRecord,
    PendingStats, PostTaskRecord, Record, RecordHeader, StackFrame, TimerSetRecord, TraceId,
    WorkerRecord, YieldRecord,
};
pub use snapshot::Snapshot;
