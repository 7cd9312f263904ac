use callscope_common::{CallSite, CallSiteDomain, StackFrame, TraceId};
use log::{debug, warn};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::frame_parser::StackLine;
use super::{DEFAULT_SELF_SIGNATURE, INVALID_TRACE_LINK};
use crate::classification::OriginRules;
use crate::domain::Fidelity;
use crate::host::CapturedStack;

/// Bytes of the SHA-256 digest kept in a trace id.
const DIGEST_BYTES: usize = 16;

/// Hex digest identifying `text`.
#[must_use]
pub fn digest(text: &str) -> TraceId {
    let hash = Sha256::digest(text.as_bytes());
    TraceId::new(hex::encode(&hash[..DIGEST_BYTES]))
}

/// Runtime-replaceable tracer settings.
#[derive(Debug, Clone)]
pub struct TracerConfig {
    pub fidelity: Fidelity,
    pub rules: OriginRules,
    /// Frames whose location contains this are the monitor's own
    pub self_signature: String,
    /// Call sites whose supplied code is not executed
    pub bypass: HashSet<TraceId>,
    /// Call sites that trigger a breakpoint before executing
    pub debug: HashSet<TraceId>,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            fidelity: Fidelity::Full,
            rules: OriginRules::default(),
            self_signature: DEFAULT_SELF_SIGNATURE.to_owned(),
            bypass: HashSet::new(),
            debug: HashSet::new(),
        }
    }
}

/// Identity of the value that triggered the interception, used when the
/// stack itself is unusable.
#[derive(Debug, Clone, Copy)]
pub struct UniqueTrait<'a> {
    /// Function name, if the value is a named function
    pub name: Option<&'a str>,
    /// String form of the value
    pub repr: &'a str,
}

/// Cache and fallback counters, with a warn-once set for invalid traces.
#[derive(Debug, Default)]
pub struct TraceDiagnostics {
    cache_hits: Cell<u64>,
    cache_misses: Cell<u64>,
    invalid_traces: Cell<u64>,
    /// Trace ids that have already been warned about (to avoid log spam)
    warned: RefCell<HashSet<TraceId>>,
}

impl TraceDiagnostics {
    fn record_lookup(&self, hit: bool) {
        let counter = if hit { &self.cache_hits } else { &self.cache_misses };
        counter.set(counter.get() + 1);
    }

    fn record_invalid(&self, trace_id: &TraceId, name: Option<&str>) {
        self.invalid_traces.set(self.invalid_traces.get() + 1);
        if self.warned.borrow_mut().insert(trace_id.clone()) {
            warn!(
                "No usable stack frame for call site {trace_id} ({}) - using synthetic trace",
                name.unwrap_or("anonymous")
            );
        }
    }

    #[must_use]
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.get()
    }

    #[must_use]
    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.get()
    }

    #[must_use]
    pub fn invalid_traces(&self) -> u64 {
        self.invalid_traces.get()
    }

    fn reset(&self) {
        self.cache_hits.set(0);
        self.cache_misses.set(0);
        self.invalid_traces.set(0);
        self.warned.borrow_mut().clear();
    }
}

/// Turns captured stacks into call sites.
///
/// Parsed full-fidelity traces are cached by trace id. The cache is
/// unbounded and cleared only by [`CallSiteTracer::clear_cache`].
#[derive(Debug, Default)]
pub struct CallSiteTracer {
    config: RefCell<TracerConfig>,
    cache: RefCell<HashMap<TraceId, Arc<Vec<StackFrame>>>>,
    diagnostics: TraceDiagnostics,
}

impl CallSiteTracer {
    #[must_use]
    pub fn new(config: TracerConfig) -> Self {
        Self { config: RefCell::new(config), ..Self::default() }
    }

    /// Attribute a captured stack to a call site.
    pub fn trace(&self, stack: &CapturedStack, unique: Option<UniqueTrait<'_>>) -> CallSite {
        let config = self.config.borrow();
        let lines: Vec<StackLine<'_>> = match stack {
            CapturedStack::Text(text) => text.lines().map(StackLine::Text).collect(),
            CapturedStack::Frames(frames) => frames.iter().map(StackLine::Raw).collect(),
        };
        let retained: Vec<StackLine<'_>> = lines
            .into_iter()
            .filter(|line| line.looks_like_frame() && !line.is_self(&config.self_signature))
            .collect();

        let traced = match config.fidelity {
            Fidelity::Full => self.trace_full(&retained),
            Fidelity::Reduced => Self::trace_reduced(&retained),
        };
        let (trace_id, trace) = traced.unwrap_or_else(|| self.invalid_trace(stack, unique));
        let domain =
            trace.last().map_or(CallSiteDomain::Unknown, |frame| config.rules.classify(&frame.link));

        CallSite { trace_id, trace, domain }
    }

    fn trace_full(&self, retained: &[StackLine<'_>]) -> Option<(TraceId, Arc<Vec<StackFrame>>)> {
        if retained.is_empty() {
            return None;
        }
        let text = retained.iter().map(StackLine::key).collect::<Vec<_>>().join("\n");
        let trace_id = digest(&text);

        if let Some(cached) = self.cache.borrow().get(&trace_id) {
            self.diagnostics.record_lookup(true);
            return Some((trace_id, Arc::clone(cached)));
        }
        self.diagnostics.record_lookup(false);

        let mut frames: Vec<StackFrame> = retained.iter().filter_map(|line| line.to_frame()).collect();
        if frames.is_empty() {
            return None;
        }
        frames.reverse();
        let frames = Arc::new(frames);
        debug!("Cached trace {trace_id} ({} frames)", frames.len());
        self.cache.borrow_mut().insert(trace_id.clone(), Arc::clone(&frames));
        Some((trace_id, frames))
    }

    fn trace_reduced(retained: &[StackLine<'_>]) -> Option<(TraceId, Arc<Vec<StackFrame>>)> {
        let frame = retained.iter().find_map(|line| line.to_frame())?;
        Some((digest(&frame.link), Arc::new(vec![frame])))
    }

    fn invalid_trace(
        &self,
        stack: &CapturedStack,
        unique: Option<UniqueTrait<'_>>,
    ) -> (TraceId, Arc<Vec<StackFrame>>) {
        let raw: Cow<'_, str> = match stack {
            CapturedStack::Text(text) => Cow::Borrowed(text),
            CapturedStack::Frames(frames) => Cow::Owned(
                frames.iter().map(|f| StackLine::Raw(f).key()).collect::<Vec<_>>().join("\n"),
            ),
        };
        let trace_id = digest(unique.map_or(raw.as_ref(), |u| u.repr));
        let name = unique.and_then(|u| u.name);
        self.diagnostics.record_invalid(&trace_id, name);

        let frame = StackFrame { name: name.map(str::to_owned), link: INVALID_TRACE_LINK.to_owned() };
        (trace_id, Arc::new(vec![frame]))
    }

    /// False if the call site's supplied code must not run.
    #[must_use]
    pub fn should_pass(&self, trace_id: &TraceId) -> bool {
        !self.config.borrow().bypass.contains(trace_id)
    }

    /// True if a breakpoint must fire before the call site's code runs.
    #[must_use]
    pub fn should_pause(&self, trace_id: &TraceId) -> bool {
        self.config.borrow().debug.contains(trace_id)
    }

    pub fn set_bypass(&self, bypass: HashSet<TraceId>) {
        self.config.borrow_mut().bypass = bypass;
    }

    pub fn set_debug(&self, debug: HashSet<TraceId>) {
        self.config.borrow_mut().debug = debug;
    }

    /// Replace every setting. Switching fidelity also clears the cache.
    pub fn reconfigure(&self, config: TracerConfig) {
        let fidelity_changed = self.config.borrow().fidelity != config.fidelity;
        *self.config.borrow_mut() = config;
        if fidelity_changed {
            self.clear_cache();
        }
    }

    #[must_use]
    pub fn fidelity(&self) -> Fidelity {
        self.config.borrow().fidelity
    }

    pub fn clear_cache(&self) {
        self.cache.borrow_mut().clear();
        self.diagnostics.reset();
    }

    #[must_use]
    pub fn cached_traces(&self) -> usize {
        self.cache.borrow().len()
    }

    #[must_use]
    pub fn diagnostics(&self) -> &TraceDiagnostics {
        &self.diagnostics
    }
}
