//! Call-site attribution.
//!
//! Every intercepted call captures the current stack; the tracer turns it
//! into a [`CallSite`](callscope_common::CallSite): a stable `traceId`, the
//! retained frames (outermost first) and the origin domain of the innermost
//! frame.
//!
//! ```text
//! Error                                            ← marker line, dropped
//!     at capture (callscope-instrumentation/...)   ← self frames, dropped
//!     at tick (https://app.example.com/app.js:9:3) ┐
//!     at main (https://app.example.com/app.js:2:1) ┘ retained, hashed
//! ```
//!
//! In full fidelity the digest covers every retained line, line and column
//! included, and parsed traces are cached by digest. Reduced fidelity keeps
//! only the innermost usable frame and hashes its link.

mod call_site_tracer;
mod frame_parser;

pub use call_site_tracer::{digest, CallSiteTracer, TraceDiagnostics, TracerConfig, UniqueTrait};
pub use frame_parser::parse_line;

/// Marker every frame of the monitor's own code carries in its location.
pub const DEFAULT_SELF_SIGNATURE: &str = "callscope-instrumentation";

/// Link of the synthetic frame used when a stack has no usable frame.
pub const INVALID_TRACE_LINK: &str = "unavailable";
