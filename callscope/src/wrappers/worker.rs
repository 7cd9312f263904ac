//! Background workers, aggregated per script specifier.
//!
//! The wrapper keeps its own listener table per instance so the
//! add-listener contract holds even where the host would install the same
//! function twice: re-adding is skipped and flagged, removing an unknown
//! listener is flagged and not delegated. Listeners and handlers reach the
//! host wrapped, so deliveries can be counted.

use callscope_common::facts::tables::worker as facts;
use callscope_common::{Fact, Snapshot, WorkerRecord};
use log::debug;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use super::history::{CallCounters, History};
use super::probe::Probe;
use super::CapabilityWrapper;
use crate::domain::{Capability, HostError, WorkerId};
use crate::host::{Callback, EventListener, HandlerSlot, HostValue, WorkerEvent, WorkerHost};

const ENTRY_POINTS: &[&str] = &[
    "worker",
    "worker_post_message",
    "worker_add_event_listener",
    "worker_remove_event_listener",
    "worker_terminate",
];

/// Snapshot `online` key for live workers.
pub const LIVE_WORKERS: &str = "worker";

#[derive(Debug)]
struct InstalledListener {
    event_type: String,
    original: EventListener,
    installed: EventListener,
}

#[derive(Debug)]
struct WorkerInstance {
    specifier: String,
    /// Reset count at construction
    epoch: u64,
    listeners: Vec<InstalledListener>,
}

#[derive(Debug)]
struct WorkerState {
    aggregates: History<String, WorkerRecord>,
    calls: CallCounters,
}

impl Default for WorkerState {
    fn default() -> Self {
        Self { aggregates: History::default(), calls: CallCounters::new(ENTRY_POINTS) }
    }
}

impl WorkerState {
    fn aggregate(&mut self, specifier: &str) -> Option<&mut WorkerRecord> {
        self.aggregates.get_mut(&specifier.to_owned())
    }

    fn flag(&mut self, specifier: &str, fact: Fact) {
        if let Some(record) = self.aggregate(specifier) {
            record.header.facts.assign(fact);
        }
    }

    fn delivered(&mut self, specifier: &str, event_type: &str) {
        if let Some(record) = self.aggregate(specifier) {
            if event_type == HandlerSlot::Error.event_type() {
                record.errors += 1;
            } else {
                record.messages += 1;
            }
        }
    }
}

pub struct WorkerWrapper {
    probe: Rc<Probe>,
    host: Rc<dyn WorkerHost>,
    state: Rc<RefCell<WorkerState>>,
    /// Workers constructed through the wrapper and not yet terminated.
    /// Survives a history reset so listeners installed earlier can still be
    /// removed; `LIVE_WORKERS` is read from here.
    instances: RefCell<HashMap<WorkerId, WorkerInstance>>,
    epoch: Cell<u64>,
    concurrency_override: Cell<Option<u32>>,
}

impl WorkerWrapper {
    pub fn new(probe: Rc<Probe>, host: Rc<dyn WorkerHost>) -> Self {
        Self {
            probe,
            host,
            state: Rc::new(RefCell::new(WorkerState::default())),
            instances: RefCell::new(HashMap::new()),
            epoch: Cell::new(0),
            concurrency_override: Cell::new(None),
        }
    }

    /// Replace the host's hardware-concurrency hint.
    pub fn set_concurrency_override(&self, limit: Option<u32>) {
        self.concurrency_override.set(limit);
    }

    fn concurrency(&self) -> u32 {
        self.concurrency_override.get().unwrap_or_else(|| self.host.hardware_concurrency())
    }

    fn specifier_of(&self, worker: WorkerId) -> Option<String> {
        self.instances.borrow().get(&worker).map(|instance| instance.specifier.clone())
    }

    /// Construct a worker running `specifier`.
    ///
    /// # Errors
    /// Returns the host's construction error; nothing is recorded then.
    pub fn spawn(&self, specifier: &str) -> Result<WorkerId, HostError> {
        let site = self.probe.call_site_for_code(specifier);
        let worker = self.host.spawn_worker(specifier).inspect_err(|err| {
            debug!("worker construction for {specifier:?} failed: {err}");
        })?;
        self.instances.borrow_mut().insert(
            worker,
            WorkerInstance {
                specifier: specifier.to_owned(),
                epoch: self.epoch.get(),
                listeners: Vec::new(),
            },
        );

        let limit = u64::from(self.concurrency());
        let mut state = self.state.borrow_mut();
        state.calls.bump("worker");
        let record = state.aggregates.record_call(specifier.to_owned(), &site, |header| {
            WorkerRecord {
                header,
                specifier: specifier.to_owned(),
                online: 0,
                peak_online: 0,
                post_messages: 0,
                messages: 0,
                errors: 0,
                listeners: 0,
                terminations: 0,
            }
        });
        record.header.site = site;
        record.online += 1;
        record.peak_online = record.peak_online.max(record.online);
        if record.online > limit {
            record.header.facts.assign(facts::MAX_ONLINE);
        }
        Ok(worker)
    }

    pub fn post_message(&self, worker: WorkerId, message: HostValue) {
        if let Some(specifier) = self.specifier_of(worker) {
            let mut state = self.state.borrow_mut();
            state.calls.bump("worker_post_message");
            if let Some(record) = state.aggregate(&specifier) {
                record.post_messages += 1;
            }
        }
        self.host.post_message(worker, message);
    }

    /// Assign or clear the `message` / `error` handler property.
    pub fn set_handler(&self, worker: WorkerId, slot: HandlerSlot, handler: Option<EventListener>) {
        let handler = match (self.specifier_of(worker), handler) {
            (Some(specifier), Some(handler)) => Some(self.counting(specifier, handler)),
            (_, handler) => handler,
        };
        self.host.set_handler(worker, slot, handler);
    }

    pub fn add_event_listener(&self, worker: WorkerId, event_type: &str, listener: EventListener) {
        let Some(specifier) = self.specifier_of(worker) else {
            self.host.add_event_listener(worker, event_type, listener);
            return;
        };
        self.state.borrow_mut().calls.bump("worker_add_event_listener");

        let duplicate = self.instances.borrow().get(&worker).is_some_and(|instance| {
            instance.listeners.iter().any(|l| l.event_type == event_type && l.original.same(&listener))
        });
        if duplicate {
            debug!("listener {} already added to {worker} for {event_type:?}", listener.display_name());
            self.state.borrow_mut().flag(&specifier, facts::DUPLICATE_ADDITION);
            return;
        }

        let installed = self.counting(specifier.clone(), listener.clone());
        if let Some(instance) = self.instances.borrow_mut().get_mut(&worker) {
            instance.listeners.push(InstalledListener {
                event_type: event_type.to_owned(),
                original: listener,
                installed: installed.clone(),
            });
        }
        if let Some(record) = self.state.borrow_mut().aggregate(&specifier) {
            record.listeners += 1;
        }
        self.host.add_event_listener(worker, event_type, installed);
    }

    pub fn remove_event_listener(&self, worker: WorkerId, event_type: &str, listener: &EventListener) {
        let Some(specifier) = self.specifier_of(worker) else {
            self.host.remove_event_listener(worker, event_type, listener);
            return;
        };
        self.state.borrow_mut().calls.bump("worker_remove_event_listener");

        let removed = self.instances.borrow_mut().get_mut(&worker).and_then(|instance| {
            let index = instance
                .listeners
                .iter()
                .position(|l| l.event_type == event_type && l.original.same(listener))?;
            Some(instance.listeners.remove(index))
        });
        let Some(removed) = removed else {
            self.state.borrow_mut().flag(&specifier, facts::NOT_FOUND);
            return;
        };
        if let Some(record) = self.state.borrow_mut().aggregate(&specifier) {
            record.listeners = record.listeners.saturating_sub(1);
        }
        self.host.remove_event_listener(worker, event_type, &removed.installed);
    }

    /// Terminate `worker` and drop its bookkeeping. Later calls on the same
    /// id go straight to the host.
    pub fn terminate(&self, worker: WorkerId) {
        let ended = self.instances.borrow_mut().remove(&worker);
        if let Some(WorkerInstance { specifier, epoch, .. }) = ended {
            let counted_online = epoch == self.epoch.get();
            let mut state = self.state.borrow_mut();
            state.calls.bump("worker_terminate");
            if let Some(record) = state.aggregate(&specifier) {
                if counted_online {
                    record.online = record.online.saturating_sub(1);
                }
                record.terminations += 1;
            }
        }
        self.host.terminate(worker);
    }

    /// Wrap `listener` so each delivery is counted on the specifier's
    /// aggregate before the listener runs.
    fn counting(&self, specifier: String, listener: EventListener) -> EventListener {
        let state: Weak<RefCell<WorkerState>> = Rc::downgrade(&self.state);
        let name = listener.name().map(str::to_owned);
        let deliver = move |event: &WorkerEvent| {
            if let Some(state) = state.upgrade() {
                state.borrow_mut().delivered(&specifier, &event.event_type);
            }
            listener.call(event);
        };
        match name {
            Some(name) => Callback::named(&name, deliver),
            None => Callback::new(deliver),
        }
    }
}

impl CapabilityWrapper for WorkerWrapper {
    fn capability(&self) -> Capability {
        Capability::Worker
    }

    fn collect(&self, snapshot: &mut Snapshot, visible: bool) {
        let live = self.instances.borrow().len();
        let state = self.state.borrow();
        state.calls.write_into(&mut snapshot.calls);
        snapshot.online.insert(LIVE_WORKERS.to_owned(), live as u64);
        if visible {
            snapshot.worker = Some(state.aggregates.collect());
        }
    }

    /// Clears the aggregates only. Workers still running keep counting
    /// under `LIVE_WORKERS`, while per-specifier `online` restarts from the
    /// constructions seen after the reset; terminating an older worker no
    /// longer lowers it.
    fn reset(&self) {
        self.epoch.set(self.epoch.get() + 1);
        *self.state.borrow_mut() = WorkerState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::VirtualHost;
    use crate::wrappers::testing;

    fn setup() -> (Rc<VirtualHost>, WorkerWrapper) {
        let host = testing::host();
        let wrapper = WorkerWrapper::new(testing::probe(&host), host.clone());
        (host, wrapper)
    }

    fn aggregates(wrapper: &WorkerWrapper) -> Vec<WorkerRecord> {
        let mut snapshot = Snapshot::default();
        wrapper.collect(&mut snapshot, true);
        snapshot.worker.unwrap_or_default()
    }

    #[test]
    fn test_duplicate_listener_runs_once() {
        let (host, wrapper) = setup();
        let worker = wrapper.spawn("/js/crunch.js").unwrap();
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        let listener = Callback::named("onResult", move |_: &WorkerEvent| counter.set(counter.get() + 1));

        wrapper.add_event_listener(worker, "message", listener.clone());
        wrapper.add_event_listener(worker, "message", listener);
        assert_eq!(host.emit(worker, "message", HostValue::from(1)), 1);
        assert_eq!(hits.get(), 1);

        let record = &aggregates(&wrapper)[0];
        assert!(record.header.facts.check(facts::DUPLICATE_ADDITION));
        assert_eq!(record.listeners, 1);
        assert_eq!(record.messages, 1);
    }

    #[test]
    fn test_remove_unknown_listener() {
        let (host, wrapper) = setup();
        let worker = wrapper.spawn("/js/crunch.js").unwrap();
        let added = Callback::new(|_: &WorkerEvent| {});
        wrapper.add_event_listener(worker, "message", added.clone());

        wrapper.remove_event_listener(worker, "message", &Callback::new(|_: &WorkerEvent| {}));
        assert!(aggregates(&wrapper)[0].header.facts.check(facts::NOT_FOUND));
        assert_eq!(host.emit(worker, "message", HostValue::Null), 1);

        wrapper.remove_event_listener(worker, "message", &added);
        assert_eq!(host.emit(worker, "message", HostValue::Null), 0);
        assert_eq!(aggregates(&wrapper)[0].listeners, 0);
    }

    #[test]
    fn test_max_online_against_hint() {
        let (host, wrapper) = setup();
        host.set_hardware_concurrency(2);
        let first = wrapper.spawn("/js/pool.js").unwrap();
        wrapper.spawn("/js/pool.js").unwrap();
        assert!(!aggregates(&wrapper)[0].header.facts.check(facts::MAX_ONLINE));

        wrapper.spawn("/js/pool.js").unwrap();
        wrapper.terminate(first);
        wrapper.terminate(first);

        let mut snapshot = Snapshot::default();
        wrapper.collect(&mut snapshot, true);
        let record = &snapshot.worker.unwrap()[0];
        assert!(record.header.facts.check(facts::MAX_ONLINE));
        assert_eq!(record.header.calls, 3);
        assert_eq!(record.online, 2);
        assert_eq!(record.peak_online, 3);
        assert_eq!(record.terminations, 1);
        assert_eq!(snapshot.online.get(LIVE_WORKERS), Some(&2));
        assert!(host.is_terminated(first));
    }

    #[test]
    fn test_override_replaces_hint() {
        let (_host, wrapper) = setup();
        wrapper.set_concurrency_override(Some(1));
        wrapper.spawn("/js/a.js").unwrap();
        wrapper.spawn("/js/a.js").unwrap();
        assert!(aggregates(&wrapper)[0].header.facts.check(facts::MAX_ONLINE));
    }

    #[test]
    fn test_messages_errors_and_posts() {
        let (host, wrapper) = setup();
        let worker = wrapper.spawn("/js/crunch.js").unwrap();
        wrapper.set_handler(worker, HandlerSlot::Message, Some(Callback::new(|_: &WorkerEvent| {})));
        wrapper.set_handler(worker, HandlerSlot::Error, Some(Callback::new(|_: &WorkerEvent| {})));
        wrapper.post_message(worker, HostValue::from("start"));
        wrapper.post_message(worker, HostValue::from("more"));
        host.emit(worker, "message", HostValue::from(1));
        host.emit(worker, "error", HostValue::from("bad input"));

        let record = &aggregates(&wrapper)[0];
        assert_eq!(record.post_messages, 2);
        assert_eq!(record.messages, 1);
        assert_eq!(record.errors, 1);
        assert_eq!(host.posted_messages(worker).len(), 2);
    }

    #[test]
    fn test_failed_construction_is_not_recorded() {
        let (_host, wrapper) = setup();
        assert!(wrapper.spawn("").is_err());
        assert!(aggregates(&wrapper).is_empty());
    }

    #[test]
    fn test_aggregate_tracks_latest_constructor() {
        let (host, wrapper) = setup();
        wrapper.spawn("/js/a.js").unwrap();
        host.set_stack(&["later (https://app.test/late.js:2:2)"]);
        wrapper.spawn("/js/a.js").unwrap();

        let records = aggregates(&wrapper);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].header.calls, 2);
        let innermost = records[0].header.site.trace.last().map(|f| f.link.clone());
        assert_eq!(innermost.as_deref(), Some("https://app.test/late.js:2:2"));
    }

    #[test]
    fn test_terminate_drops_instance() {
        let (host, wrapper) = setup();
        let worker = wrapper.spawn("/js/crunch.js").unwrap();
        wrapper.add_event_listener(worker, "message", Callback::new(|_: &WorkerEvent| {}));
        wrapper.terminate(worker);

        let late = Callback::new(|_: &WorkerEvent| {});
        wrapper.add_event_listener(worker, "message", late.clone());
        wrapper.remove_event_listener(worker, "message", &late);
        wrapper.post_message(worker, HostValue::from("ignored"));

        let mut snapshot = Snapshot::default();
        wrapper.collect(&mut snapshot, true);
        assert_eq!(snapshot.online.get(LIVE_WORKERS), Some(&0));
        assert_eq!(snapshot.calls.get("worker_add_event_listener"), Some(&1));
        assert_eq!(snapshot.calls.get("worker_remove_event_listener"), Some(&0));
        assert_eq!(snapshot.calls.get("worker_post_message"), Some(&0));
        let record = &snapshot.worker.unwrap()[0];
        assert_eq!(record.online, 0);
        assert!(!record.header.facts.check(facts::NOT_FOUND));
        assert!(wrapper.instances.borrow().is_empty());
        assert!(host.is_terminated(worker));
    }

    #[test]
    fn test_reset_keeps_running_workers_live() {
        let (_host, wrapper) = setup();
        let before = wrapper.spawn("/js/a.js").unwrap();
        let listener = Callback::new(|_: &WorkerEvent| {});
        wrapper.add_event_listener(before, "message", listener.clone());
        wrapper.reset();
        wrapper.spawn("/js/a.js").unwrap();

        let mut snapshot = Snapshot::default();
        wrapper.collect(&mut snapshot, true);
        assert_eq!(snapshot.online.get(LIVE_WORKERS), Some(&2));
        assert_eq!(snapshot.worker.unwrap()[0].online, 1);

        // listener added before the reset is still found
        wrapper.remove_event_listener(before, "message", &listener);
        assert!(!aggregates(&wrapper)[0].header.facts.check(facts::NOT_FOUND));

        wrapper.terminate(before);
        let mut snapshot = Snapshot::default();
        wrapper.collect(&mut snapshot, true);
        assert_eq!(snapshot.online.get(LIVE_WORKERS), Some(&1));
        let record = &snapshot.worker.unwrap()[0];
        assert_eq!(record.online, 1);
        assert_eq!(record.terminations, 1);
    }
}
