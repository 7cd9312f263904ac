//! Cooperative yielding and prioritized tasks.
//!
//! A posted task ends exactly once, either by completing or by its signal
//! aborting first. Its entry in the online registry is the "still pending"
//! flag: whichever of the completion handler and the abort listener takes it
//! first decrements `online`; the other finds it gone and leaves the counters
//! alone.
//!
//! ```text
//! abort before run     abort listener takes ─▶ aborts++   body never runs
//! abort during run     abort listener takes ─▶ aborts++   self_time recorded
//! abort after run      completion took it   ─▶ no-op
//! ```

use callscope_common::facts::tables::scheduler as facts;
use callscope_common::{DisplayValue, PostTaskRecord, Snapshot, TraceId, YieldRecord};
use log::trace;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use super::history::{CallCounters, CallSiteHistory, OnlineRegistry};
use super::probe::Probe;
use super::CapabilityWrapper;
use crate::domain::{Capability, TaskId};
use crate::host::{Callback, SchedulerHost, TaskBody, TaskOptions};
use crate::validation::validate_delay;

const ENTRY_POINTS: &[&str] = &["scheduler_yield", "scheduler_post_task"];

/// Snapshot `online` key for pending tasks.
pub const PENDING_TASKS: &str = "task";

/// Wrapper-issued key, known before the host is asked to queue the task so
/// an already-aborted signal can be handled first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TaskKey(u64);

#[derive(Debug)]
struct SchedulerState {
    yields: CallSiteHistory<YieldRecord>,
    tasks: CallSiteHistory<PostTaskRecord>,
    online: OnlineRegistry<TaskKey, TraceId>,
    calls: CallCounters,
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self {
            yields: CallSiteHistory::default(),
            tasks: CallSiteHistory::default(),
            online: OnlineRegistry::default(),
            calls: CallCounters::new(ENTRY_POINTS),
        }
    }
}

impl SchedulerState {
    /// Take the pending entry, if still there, and bring the owner offline.
    fn settle(&mut self, key: TaskKey) -> Option<&mut PostTaskRecord> {
        let owner = self.online.take(&key)?;
        let record = self.tasks.get_mut(&owner)?;
        record.online = record.online.saturating_sub(1);
        Some(record)
    }

    fn complete(&mut self, key: TaskKey, trace_id: &TraceId, self_time: Option<f64>) {
        self.settle(key);
        if let (Some(self_time), Some(record)) = (self_time, self.tasks.get_mut(trace_id)) {
            record.self_time = Some(self_time);
        }
    }

    fn abort(&mut self, key: TaskKey) {
        match self.settle(key) {
            Some(record) => record.aborts += 1,
            None => trace!("abort after task {key:?} settled"),
        }
    }
}

fn on_abort(state: &Weak<RefCell<SchedulerState>>, key: TaskKey) {
    if let Some(state) = state.upgrade() {
        state.borrow_mut().abort(key);
    }
}

pub struct SchedulerWrapper {
    probe: Rc<Probe>,
    host: Rc<dyn SchedulerHost>,
    state: Rc<RefCell<SchedulerState>>,
    next_key: Cell<u64>,
}

impl SchedulerWrapper {
    pub fn new(probe: Rc<Probe>, host: Rc<dyn SchedulerHost>) -> Self {
        Self {
            probe,
            host,
            state: Rc::new(RefCell::new(SchedulerState::default())),
            next_key: Cell::new(1),
        }
    }

    /// Yield to the event loop, resuming with `continuation`.
    pub fn yield_now(&self, continuation: TaskBody) {
        let site = self.probe.call_site(None);
        {
            let mut state = self.state.borrow_mut();
            state.calls.bump("scheduler_yield");
            state.yields.record_call(site.trace_id.clone(), &site, |header| YieldRecord { header });
        }
        let probe = Rc::clone(&self.probe);
        let trace_id = site.trace_id;
        self.host.yield_now(Box::new(move || {
            probe.run(&trace_id, continuation);
        }));
    }

    pub fn post_task(&self, callback: Callback<()>, options: TaskOptions) -> TaskId {
        let site = self.probe.call_site_for(&callback);
        let checked = validate_delay(options.delay);
        let key = TaskKey(self.next_key.get());
        self.next_key.set(key.0 + 1);

        {
            let mut state = self.state.borrow_mut();
            state.calls.bump("scheduler_post_task");
            state.online.register(key, site.trace_id.clone());
            let record = state.tasks.record_call(site.trace_id.clone(), &site, |header| PostTaskRecord {
                header,
                priority: None,
                delay: DisplayValue::Unset,
                online: 0,
                aborts: 0,
                self_time: None,
            });
            record.priority = options.priority.map(|p| p.as_str().to_owned());
            record.delay = checked.display;
            record.online += 1;
            if checked.is_bad {
                record.header.facts.assign(facts::BAD_DELAY);
            }
        }

        if let Some(signal) = &options.signal {
            let weak = Rc::downgrade(&self.state);
            if signal.aborted() {
                on_abort(&weak, key);
            } else {
                signal.on_abort(move || on_abort(&weak, key));
            }
        }

        let weak = Rc::downgrade(&self.state);
        let probe = Rc::clone(&self.probe);
        let trace_id = site.trace_id;
        let body: TaskBody = Box::new(move || {
            let ran = probe.run(&trace_id, || callback.call(&()));
            if let Some(state) = weak.upgrade() {
                state.borrow_mut().complete(key, &trace_id, ran.map(|t| t.self_time));
            }
        });
        self.host.post_task(body, options)
    }
}

impl CapabilityWrapper for SchedulerWrapper {
    fn capability(&self) -> Capability {
        Capability::Scheduler
    }

    fn collect(&self, snapshot: &mut Snapshot, visible: bool) {
        let state = self.state.borrow();
        state.calls.write_into(&mut snapshot.calls);
        snapshot.online.insert(PENDING_TASKS.to_owned(), state.online.len() as u64);
        if visible {
            snapshot.scheduler_yield = Some(state.yields.collect());
            snapshot.scheduler_post_task = Some(state.tasks.collect());
        }
    }

    fn reset(&self) {
        *self.state.borrow_mut() = SchedulerState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{AbortController, TaskPriority, VirtualHost};
    use crate::wrappers::testing;

    fn setup() -> (Rc<VirtualHost>, SchedulerWrapper) {
        let host = testing::host();
        let wrapper = SchedulerWrapper::new(testing::probe(&host), host.clone());
        (host, wrapper)
    }

    fn task_record(wrapper: &SchedulerWrapper) -> PostTaskRecord {
        let mut snapshot = Snapshot::default();
        wrapper.collect(&mut snapshot, true);
        snapshot.scheduler_post_task.unwrap_or_default()[0].clone()
    }

    fn with_signal(controller: &AbortController) -> TaskOptions {
        TaskOptions {
            priority: Some(TaskPriority::Background),
            delay: Some(5.0),
            signal: Some(controller.signal()),
        }
    }

    #[test]
    fn test_abort_before_run() {
        let (host, wrapper) = setup();
        let controller = AbortController::new();
        wrapper.post_task(Callback::new(|_| panic!("aborted body ran")), with_signal(&controller));
        controller.abort();
        host.advance(10.0);

        let record = task_record(&wrapper);
        assert_eq!(record.header.calls, 1);
        assert_eq!(record.aborts, 1);
        assert_eq!(record.online, 0);
        assert_eq!(record.self_time, None);
        assert_eq!(record.priority.as_deref(), Some("background"));
        assert_eq!(record.delay, DisplayValue::Number(5.0));
    }

    #[test]
    fn test_abort_from_inside_body() {
        let (host, wrapper) = setup();
        let controller = Rc::new(AbortController::new());
        let inner = controller.clone();
        let clock = host.clone();
        wrapper.post_task(
            Callback::new(move |_| {
                clock.tick(3.0);
                inner.abort();
            }),
            with_signal(&controller),
        );
        host.advance(10.0);

        let record = task_record(&wrapper);
        assert_eq!(record.aborts, 1);
        assert_eq!(record.online, 0);
        assert_eq!(record.self_time, Some(3.0));
    }

    #[test]
    fn test_abort_after_completion_is_ignored() {
        let (host, wrapper) = setup();
        let controller = AbortController::new();
        wrapper.post_task(Callback::new(|_| {}), with_signal(&controller));
        host.advance(10.0);
        controller.abort();

        let record = task_record(&wrapper);
        assert_eq!(record.header.calls, 1);
        assert_eq!(record.aborts, 0);
        assert_eq!(record.online, 0);
        assert!(record.self_time.is_some());
    }

    #[test]
    fn test_already_aborted_signal() {
        let (host, wrapper) = setup();
        let controller = AbortController::new();
        controller.abort();
        wrapper.post_task(Callback::new(|_| panic!("aborted body ran")), with_signal(&controller));
        host.advance(10.0);

        let record = task_record(&wrapper);
        assert_eq!(record.aborts, 1);
        assert_eq!(record.online, 0);
    }

    #[test]
    fn test_bad_delay() {
        let (_host, wrapper) = setup();
        wrapper.post_task(
            Callback::new(|_| {}),
            TaskOptions { delay: Some(f64::INFINITY), ..TaskOptions::default() },
        );
        let record = task_record(&wrapper);
        assert!(record.header.facts.check(facts::BAD_DELAY));
        assert_eq!(record.delay, DisplayValue::tagged("Infinity"));
        assert_eq!(record.priority, None);
        assert_eq!(record.online, 1);
    }

    #[test]
    fn test_yield_counts_per_site() {
        let (host, wrapper) = setup();
        let resumed = Rc::new(Cell::new(0));
        for _ in 0..3 {
            let counter = resumed.clone();
            wrapper.yield_now(Box::new(move || counter.set(counter.get() + 1)));
        }
        host.advance(0.0);
        assert_eq!(resumed.get(), 3);

        let mut snapshot = Snapshot::default();
        wrapper.collect(&mut snapshot, true);
        let yields = snapshot.scheduler_yield.unwrap();
        assert_eq!(yields.len(), 1);
        assert_eq!(yields[0].header.calls, 3);
        assert_eq!(snapshot.calls.get("scheduler_yield"), Some(&3));
    }
}
