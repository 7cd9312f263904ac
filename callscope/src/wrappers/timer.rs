//! Deferred and repeating timers.
//!
//! ```text
//! set_timeout(code, delay)
//!   ├─ call site + delay check ─▶ set_timeout history   (calls, online++)
//!   ├─ string code ─────────────▶ eval history          (sentinel result)
//!   └─ host.set_timeout ────────▶ handle ─▶ online registry
//!
//! fire(handle)            run code unless bypassed, timeout goes offline
//! clear_timeout(handle)   validate, take registration, cross-reference
//! ```
//!
//! Timeouts and intervals share one registry and one handle space, so
//! `clear_timeout` can cancel an interval; the scheduling record is found
//! through the registration's kind.

use callscope_common::facts::tables::timer as facts;
use callscope_common::{
    ClearRecord, DisplayValue, PendingStats, Snapshot, TimerSetRecord, TraceId,
};
use log::debug;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::eval::EvalWrapper;
use super::history::{
    handle_display, record_clear, CallCounters, CallSiteHistory, CancelLookup, OnlineRegistry,
};
use super::probe::Probe;
use super::CapabilityWrapper;
use crate::domain::{Capability, Handle, PendingKind};
use crate::host::{Callback, EvalHost, HostValue, TimerCallback, TimerHost};
use crate::registry::InterceptionRegistry;
use crate::validation::validate_delay;

const ENTRY_POINTS: &[&str] = &["set_timeout", "clear_timeout", "set_interval", "clear_interval"];

/// What a timer runs when it fires.
#[derive(Debug, Clone)]
pub enum TimerCode {
    Callback(Callback<()>),
    /// Source text evaluated in global scope on fire
    Source(String),
}

impl TimerCode {
    fn describe(&self) -> String {
        match self {
            TimerCode::Callback(callback) => callback.display_name().to_owned(),
            TimerCode::Source(source) => source.clone(),
        }
    }

    /// Run the code directly against the host.
    pub(crate) fn run(&self, eval: &dyn EvalHost) {
        match self {
            TimerCode::Callback(callback) => callback.call(&()),
            TimerCode::Source(source) => {
                if let Err(err) = eval.eval(source) {
                    debug!("timer code raised {err}");
                }
            }
        }
    }
}

impl From<Callback<()>> for TimerCode {
    fn from(callback: Callback<()>) -> Self {
        TimerCode::Callback(callback)
    }
}

impl From<&str> for TimerCode {
    fn from(source: &str) -> Self {
        TimerCode::Source(source.to_owned())
    }
}

impl From<String> for TimerCode {
    fn from(source: String) -> Self {
        TimerCode::Source(source)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Timeout,
    Interval,
}

impl TimerKind {
    fn set_name(self) -> &'static str {
        match self {
            TimerKind::Timeout => "set_timeout",
            TimerKind::Interval => "set_interval",
        }
    }

    fn clear_name(self) -> &'static str {
        match self {
            TimerKind::Timeout => "clear_timeout",
            TimerKind::Interval => "clear_interval",
        }
    }

    /// Returned value recorded in eval history for string code.
    #[must_use]
    pub fn eval_sentinel(self) -> &'static str {
        match self {
            TimerKind::Timeout => "[returned via set_timeout]",
            TimerKind::Interval => "[returned via set_interval]",
        }
    }

    fn pending_kind(self) -> PendingKind {
        match self {
            TimerKind::Timeout => PendingKind::Timeout,
            TimerKind::Interval => PendingKind::Interval,
        }
    }
}

#[derive(Debug, Clone)]
struct TimerRegistration {
    trace_id: TraceId,
    kind: TimerKind,
    delay: DisplayValue,
}

#[derive(Debug)]
struct TimerState {
    set_timeout: CallSiteHistory<TimerSetRecord>,
    set_interval: CallSiteHistory<TimerSetRecord>,
    clear_timeout: CallSiteHistory<ClearRecord>,
    clear_interval: CallSiteHistory<ClearRecord>,
    online: OnlineRegistry<Handle, TimerRegistration>,
    calls: CallCounters,
}

impl Default for TimerState {
    fn default() -> Self {
        Self {
            set_timeout: CallSiteHistory::default(),
            set_interval: CallSiteHistory::default(),
            clear_timeout: CallSiteHistory::default(),
            clear_interval: CallSiteHistory::default(),
            online: OnlineRegistry::default(),
            calls: CallCounters::new(ENTRY_POINTS),
        }
    }
}

impl TimerState {
    fn set_history(&mut self, kind: TimerKind) -> &mut CallSiteHistory<TimerSetRecord> {
        match kind {
            TimerKind::Timeout => &mut self.set_timeout,
            TimerKind::Interval => &mut self.set_interval,
        }
    }

    fn clear_history(&mut self, kind: TimerKind) -> &mut CallSiteHistory<ClearRecord> {
        match kind {
            TimerKind::Timeout => &mut self.clear_timeout,
            TimerKind::Interval => &mut self.clear_interval,
        }
    }

    /// Bookkeeping after the host fired `handle`. The records are looked up
    /// again because a reset may have happened since scheduling.
    fn finish_fire(
        &mut self,
        kind: TimerKind,
        handle: Handle,
        trace_id: &TraceId,
        self_time: Option<f64>,
    ) {
        if kind == TimerKind::Timeout {
            if let Some(registration) = self.online.take(&handle) {
                if let Some(record) = self.set_history(registration.kind).get_mut(&registration.trace_id) {
                    record.pending.went_offline();
                }
            }
        }
        if let Some(self_time) = self_time {
            if let Some(record) = self.set_history(kind).get_mut(trace_id) {
                record.self_time = Some(self_time);
            }
        }
    }
}

pub struct TimerWrapper {
    probe: Rc<Probe>,
    host: Rc<dyn TimerHost>,
    eval_host: Rc<dyn EvalHost>,
    eval: Rc<EvalWrapper>,
    /// String code reaches eval history only while eval is routed
    registry: Rc<InterceptionRegistry>,
    state: Rc<RefCell<TimerState>>,
}

impl TimerWrapper {
    pub fn new(
        probe: Rc<Probe>,
        host: Rc<dyn TimerHost>,
        eval_host: Rc<dyn EvalHost>,
        eval: Rc<EvalWrapper>,
        registry: Rc<InterceptionRegistry>,
    ) -> Self {
        Self {
            probe,
            host,
            eval_host,
            eval,
            registry,
            state: Rc::new(RefCell::new(TimerState::default())),
        }
    }

    pub fn set_timeout(&self, code: impl Into<TimerCode>, delay: Option<f64>) -> Handle {
        self.schedule(TimerKind::Timeout, code.into(), delay)
    }

    pub fn set_interval(&self, code: impl Into<TimerCode>, delay: Option<f64>) -> Handle {
        self.schedule(TimerKind::Interval, code.into(), delay)
    }

    pub fn clear_timeout(&self, handle: &HostValue) {
        self.cancel(TimerKind::Timeout, handle);
    }

    pub fn clear_interval(&self, handle: &HostValue) {
        self.cancel(TimerKind::Interval, handle);
    }

    /// Cancel through the wrapper's own path on behalf of an operator.
    pub fn force_cancel(&self, kind: PendingKind, handle: Handle) {
        match kind {
            PendingKind::Interval => self.clear_interval(&handle.into()),
            _ => self.clear_timeout(&handle.into()),
        }
    }

    fn schedule(&self, kind: TimerKind, code: TimerCode, delay: Option<f64>) -> Handle {
        let site = match &code {
            TimerCode::Callback(callback) => self.probe.call_site_for(callback),
            TimerCode::Source(source) => self.probe.call_site_for_code(source),
        };
        let checked = validate_delay(delay);
        let is_source = matches!(code, TimerCode::Source(_));
        if let TimerCode::Source(source) = &code {
            if self.registry.is_installed(Capability::Eval) {
                self.eval.record_timer_code(&site, source, kind.eval_sentinel());
            }
        }
        let description = code.describe();

        let callback = self.fire_callback(kind, site.trace_id.clone(), code);
        let handle = match kind {
            TimerKind::Timeout => self.host.set_timeout(callback, delay),
            TimerKind::Interval => self.host.set_interval(callback, delay),
        };

        let mut state = self.state.borrow_mut();
        state.calls.bump(kind.set_name());
        state.online.register(
            handle,
            TimerRegistration { trace_id: site.trace_id.clone(), kind, delay: checked.display.clone() },
        );
        let record = state.set_history(kind).record_call(site.trace_id.clone(), &site, |header| {
            TimerSetRecord {
                header,
                handler: 0,
                callback: String::new(),
                delay: DisplayValue::Unset,
                pending: PendingStats::default(),
                self_time: None,
            }
        });
        record.handler = u64::from(handle.0);
        record.callback = description;
        record.delay = checked.display;
        record.pending.went_online();
        if is_source {
            record.header.facts.assign(facts::NOT_A_FUNCTION);
        }
        if checked.is_bad {
            record.header.facts.assign(facts::BAD_DELAY);
        }
        handle
    }

    fn fire_callback(&self, kind: TimerKind, trace_id: TraceId, code: TimerCode) -> TimerCallback {
        let state: Weak<RefCell<TimerState>> = Rc::downgrade(&self.state);
        let probe = Rc::clone(&self.probe);
        let eval_host = Rc::clone(&self.eval_host);
        Box::new(move |handle| {
            let ran = probe.run(&trace_id, || code.run(eval_host.as_ref()));
            if let Some(state) = state.upgrade() {
                state.borrow_mut().finish_fire(kind, handle, &trace_id, ran.map(|t| t.self_time));
            }
        })
    }

    fn cancel(&self, kind: TimerKind, value: &HostValue) {
        let site = self.probe.call_site(None);
        match kind {
            TimerKind::Timeout => self.host.clear_timeout(value),
            TimerKind::Interval => self.host.clear_interval(value),
        }

        let mut state = self.state.borrow_mut();
        state.calls.bump(kind.clear_name());
        let (handler, delay, fact) = match state.online.lookup_cancel(value) {
            CancelLookup::BadHandler(tagged) => (tagged, DisplayValue::Unset, Some(facts::BAD_HANDLER)),
            CancelLookup::NotFound(handle) => {
                (handle_display(handle), DisplayValue::not_found(), Some(facts::NOT_FOUND))
            }
            CancelLookup::Found(handle, registration) => {
                let history = state.set_history(registration.kind);
                if let Some(record) = history.get_mut(&registration.trace_id) {
                    record.pending.went_offline();
                    record.pending.record_cancel(&site.trace_id);
                }
                (handle_display(handle), registration.delay, None)
            }
        };
        record_clear(state.clear_history(kind), &site, handler, Some(delay), fact);
    }
}

impl CapabilityWrapper for TimerWrapper {
    fn capability(&self) -> Capability {
        Capability::Timers
    }

    fn collect(&self, snapshot: &mut Snapshot, visible: bool) {
        let state = self.state.borrow();
        state.calls.write_into(&mut snapshot.calls);
        for kind in [TimerKind::Timeout, TimerKind::Interval] {
            let pending = state.online.count(|registration| registration.kind == kind);
            snapshot.online.insert(kind.pending_kind().name().to_owned(), pending);
        }
        if visible {
            snapshot.set_timeout = Some(state.set_timeout.collect());
            snapshot.set_interval = Some(state.set_interval.collect());
            snapshot.clear_timeout = Some(state.clear_timeout.collect());
            snapshot.clear_interval = Some(state.clear_interval.collect());
        }
    }

    fn reset(&self) {
        *self.state.borrow_mut() = TimerState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::VirtualHost;
    use crate::wrappers::testing;
    use callscope_common::facts::tables::eval as eval_facts;
    use std::cell::Cell;

    fn setup() -> (Rc<VirtualHost>, Rc<EvalWrapper>, TimerWrapper) {
        let registry = Rc::new(InterceptionRegistry::new());
        registry.install(Capability::Eval);
        setup_with(registry)
    }

    fn setup_with(registry: Rc<InterceptionRegistry>) -> (Rc<VirtualHost>, Rc<EvalWrapper>, TimerWrapper) {
        let host = testing::host();
        let probe = testing::probe(&host);
        let eval = Rc::new(EvalWrapper::new(probe.clone(), host.clone()));
        let timers = TimerWrapper::new(probe, host.clone(), host.clone(), eval.clone(), registry);
        (host, eval, timers)
    }

    fn snapshot(timers: &TimerWrapper) -> Snapshot {
        let mut snapshot = Snapshot::default();
        timers.collect(&mut snapshot, true);
        snapshot
    }

    fn noop() -> Callback<()> {
        Callback::named("tick", |_| {})
    }

    #[test]
    fn test_schedule_then_cancel() {
        let (_host, _eval, timers) = setup();
        let handle = timers.set_timeout(noop(), Some(123.0));

        let before = snapshot(&timers);
        let set = &before.set_timeout.unwrap()[0];
        assert_eq!(set.delay, DisplayValue::Number(123.0));
        assert_eq!(set.pending.online, 1);
        assert_eq!(set.callback, "tick");
        assert_eq!(before.online.get("timeout"), Some(&1));

        timers.clear_timeout(&handle.into());

        let after = snapshot(&timers);
        let set = &after.set_timeout.unwrap()[0];
        assert_eq!(set.pending.online, 0);
        assert_eq!(set.pending.canceled_counter, 1);
        assert_eq!(set.pending.canceled_by_trace_ids.len(), 1);
        let clear = &after.clear_timeout.unwrap()[0];
        assert_eq!(clear.delay, Some(DisplayValue::Number(123.0)));
        assert_eq!(clear.handler, DisplayValue::Number(f64::from(handle.0)));
        assert!(clear.header.facts.is_empty());
    }

    #[test]
    fn test_bad_delay_is_tagged_but_delegated() {
        let (host, _eval, timers) = setup();
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        timers.set_timeout(Callback::new(move |_: &()| flag.set(true)), Some(-1.0));

        let set = &snapshot(&timers).set_timeout.unwrap()[0];
        assert_eq!(set.delay, DisplayValue::tagged("-1"));
        assert!(set.header.facts.check(facts::BAD_DELAY));

        host.advance(0.0);
        assert!(ran.get());
    }

    #[test]
    fn test_same_site_accumulates() {
        let (_host, _eval, timers) = setup();
        let callback = noop();
        timers.set_timeout(callback.clone(), None);
        timers.set_timeout(callback, None);

        let records = snapshot(&timers).set_timeout.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].header.calls, 2);
        assert_eq!(records[0].delay, DisplayValue::Unset);
    }

    #[test]
    fn test_string_code_goes_to_eval_history() {
        let (host, eval, timers) = setup();
        timers.set_interval("(1+2)", Some(123.0));

        let set = &snapshot(&timers).set_interval.unwrap()[0];
        assert!(set.header.facts.check(facts::NOT_A_FUNCTION));

        let mut evals = Snapshot::default();
        eval.collect(&mut evals, true);
        let record = &evals.eval.unwrap()[0];
        assert_eq!(record.code, serde_json::Value::from("(1+2)"));
        assert_eq!(record.returned_value, serde_json::Value::from("[returned via set_interval]"));
        assert!(!record.header.facts.check(eval_facts::USES_GLOBAL_SCOPE));
        assert!(host.pending_timers() > 0);
    }

    #[test]
    fn test_string_code_skips_eval_history_when_eval_not_routed() {
        let (host, eval, timers) = setup_with(Rc::new(InterceptionRegistry::new()));
        timers.set_timeout("1 + 1", Some(5.0));
        host.advance(5.0);

        let mut evals = Snapshot::default();
        eval.collect(&mut evals, true);
        assert!(evals.eval.unwrap().is_empty());
        let set = &snapshot(&timers).set_timeout.unwrap()[0];
        assert!(set.header.facts.check(facts::NOT_A_FUNCTION));
    }

    #[test]
    fn test_self_containing_array_handle_is_tagged() {
        let (_host, _eval, timers) = setup();
        timers.set_timeout(noop(), Some(5.0));
        let list = HostValue::array(vec![1.into()]);
        if let HostValue::Array(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        timers.clear_timeout(&list);

        let snap = snapshot(&timers);
        let clear = &snap.clear_timeout.unwrap()[0];
        assert!(clear.header.facts.check(facts::BAD_HANDLER));
        assert_eq!(clear.handler, DisplayValue::tagged("1,"));
        assert_eq!(snap.online.get("timeout"), Some(&1));
    }

    #[test]
    fn test_invalid_handler_is_not_looked_up() {
        let (_host, _eval, timers) = setup();
        timers.set_timeout(noop(), Some(5.0));
        timers.clear_timeout(&HostValue::Number(0.0));

        let snap = snapshot(&timers);
        let clear = &snap.clear_timeout.unwrap()[0];
        assert!(clear.header.facts.check(facts::BAD_HANDLER));
        assert_eq!(clear.handler, DisplayValue::tagged("0"));
        assert_eq!(clear.delay, Some(DisplayValue::Unset));
        assert_eq!(snap.online.get("timeout"), Some(&1));
    }

    #[test]
    fn test_unknown_handle_is_not_found() {
        let (_host, _eval, timers) = setup();
        timers.clear_interval(&HostValue::Number(99.0));

        let clear = &snapshot(&timers).clear_interval.unwrap()[0];
        assert!(clear.header.facts.check(facts::NOT_FOUND));
        assert_eq!(clear.delay, Some(DisplayValue::not_found()));
    }

    #[test]
    fn test_timeout_goes_offline_on_fire() {
        let (host, _eval, timers) = setup();
        timers.set_timeout(Callback::new(move |_: &()| {}), Some(10.0));
        host.advance(10.0);

        let snap = snapshot(&timers);
        let set = &snap.set_timeout.unwrap()[0];
        assert_eq!(set.pending.online, 0);
        assert_eq!(set.self_time, Some(0.0));
        assert_eq!(snap.online.get("timeout"), Some(&0));
    }

    #[test]
    fn test_interval_stays_online_across_fires() {
        let (host, _eval, timers) = setup();
        let fired = Rc::new(Cell::new(0));
        let counter = fired.clone();
        let busy = host.clone();
        timers.set_interval(
            Callback::new(move |_: &()| {
                counter.set(counter.get() + 1);
                busy.tick(1.5);
            }),
            Some(10.0),
        );
        host.advance(25.0);

        assert_eq!(fired.get(), 2);
        let snap = snapshot(&timers);
        let set = &snap.set_interval.unwrap()[0];
        assert_eq!(set.pending.online, 1);
        assert_eq!(set.self_time, Some(1.5));
        assert_eq!(snap.online.get("interval"), Some(&1));
    }

    #[test]
    fn test_bypassed_callback_does_not_run() {
        let (host, _eval, timers) = setup();
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        let callback = Callback::new(move |_: &()| flag.set(true));
        let site = timers.probe.call_site_for(&callback);
        timers.probe.tracer().set_bypass([site.trace_id].into());

        timers.set_timeout(callback, None);
        host.advance(1.0);

        assert!(!ran.get());
        let set = &snapshot(&timers).set_timeout.unwrap()[0];
        assert_eq!(set.header.calls, 1);
        assert_eq!(set.pending.online, 0);
        assert_eq!(set.self_time, None);
    }

    #[test]
    fn test_fire_after_reset_is_harmless() {
        let (host, _eval, timers) = setup();
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        timers.set_timeout(Callback::new(move |_: &()| flag.set(true)), Some(5.0));
        timers.reset();
        host.advance(5.0);

        assert!(ran.get());
        let snap = snapshot(&timers);
        assert_eq!(snap.set_timeout.map(|r| r.len()), Some(0));
        assert_eq!(snap.calls.get("set_timeout"), Some(&0));
    }
}
