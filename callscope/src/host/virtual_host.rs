//! Deterministic in-memory host.
//!
//! Time only moves when told to. [`VirtualHost::advance`] runs every timer,
//! timed-out idle callback and posted task that falls due, in due-time
//! order; animation frames and idle periods are driven explicitly with
//! [`VirtualHost::run_animation_frame`] and [`VirtualHost::run_idle`].
//!
//! The stack reported to the tracer is whatever the test last set with
//! [`VirtualHost::set_stack`], prefixed with frames carrying the monitor's
//! self signature the way a real engine would show the instrumentation's own
//! frames on top of the caller's.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use callscope_common::TraceId;
use log::trace;

use super::script::{self, Globals};
use super::{
    AbortSignal, AnimationHost, CapturedStack, Clock, Debugger, EvalHost, EventListener,
    FrameCallback, HandlerSlot, HostValue, IdleCallback, IdleDeadline, IdleHost, IdleOptions,
    RawFrame, SchedulerHost, StackSource, TaskBody, TaskOptions, TaskPriority, TimerCallback,
    TimerHost, WorkerEvent, WorkerHost,
};
use crate::domain::{Handle, HostError, HostErrorKind, TaskId, WorkerId};
use crate::tracer::DEFAULT_SELF_SIGNATURE;

/// Default logical processor count reported to workers.
pub const DEFAULT_HARDWARE_CONCURRENCY: u32 = 4;

/// Minimum interval period in milliseconds.
const MIN_INTERVAL_MS: f64 = 1.0;

struct TimerEntry {
    due: f64,
    seq: u64,
    period: Option<f64>,
    /// Taken out while the callback runs
    callback: Option<TimerCallback>,
}

struct IdleEntry {
    /// Absolute time at which the callback is forced, if a timeout was given
    forced_at: Option<f64>,
    seq: u64,
    callback: IdleCallback,
}

struct TaskEntry {
    id: TaskId,
    due: f64,
    priority: TaskPriority,
    seq: u64,
    body: TaskBody,
    signal: Option<AbortSignal>,
}

#[derive(Default)]
struct VirtualWorker {
    specifier: String,
    terminated: bool,
    outbox: Vec<HostValue>,
    handlers: HashMap<HandlerSlot, EventListener>,
    listeners: Vec<(String, EventListener)>,
}

#[derive(Debug, Clone, Copy)]
enum DueEvent {
    Timer(Handle),
    Idle(Handle),
    Task(TaskId),
}

/// Ordering key for due events: time, then task priority, then insertion.
#[derive(Debug, Clone, Copy)]
struct DueKey {
    due: f64,
    rank: TaskPriority,
    seq: u64,
}

impl DueKey {
    fn order(&self, other: &Self) -> Ordering {
        self.due
            .total_cmp(&other.due)
            .then(self.rank.cmp(&other.rank))
            .then(self.seq.cmp(&other.seq))
    }
}

pub struct VirtualHost {
    now: Cell<f64>,
    seq: Cell<u64>,
    next_timer: Cell<u32>,
    next_frame: Cell<u32>,
    next_idle: Cell<u32>,
    next_task: Cell<u64>,
    next_worker: Cell<u32>,
    timers: RefCell<BTreeMap<Handle, TimerEntry>>,
    frames: RefCell<BTreeMap<Handle, FrameCallback>>,
    idle: RefCell<BTreeMap<Handle, IdleEntry>>,
    tasks: RefCell<Vec<TaskEntry>>,
    globals: Globals,
    workers: RefCell<BTreeMap<WorkerId, VirtualWorker>>,
    hardware_concurrency: Cell<u32>,
    self_signature: RefCell<String>,
    stack: RefCell<CapturedStack>,
    breakpoints: RefCell<Vec<TraceId>>,
}

impl Default for VirtualHost {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualHost {
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: Cell::new(0.0),
            seq: Cell::new(0),
            next_timer: Cell::new(1),
            next_frame: Cell::new(1),
            next_idle: Cell::new(1),
            next_task: Cell::new(1),
            next_worker: Cell::new(1),
            timers: RefCell::new(BTreeMap::new()),
            frames: RefCell::new(BTreeMap::new()),
            idle: RefCell::new(BTreeMap::new()),
            tasks: RefCell::new(Vec::new()),
            globals: RefCell::new(HashMap::new()),
            workers: RefCell::new(BTreeMap::new()),
            hardware_concurrency: Cell::new(DEFAULT_HARDWARE_CONCURRENCY),
            self_signature: RefCell::new(DEFAULT_SELF_SIGNATURE.to_owned()),
            stack: RefCell::new(CapturedStack::Text("Error".to_owned())),
            breakpoints: RefCell::new(Vec::new()),
        }
    }

    fn bump(counter: &Cell<u32>) -> u32 {
        let value = counter.get();
        counter.set(value + 1);
        value
    }

    fn next_seq(&self) -> u64 {
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        seq
    }

    fn normalize_delay(delay: Option<f64>) -> f64 {
        match delay {
            Some(d) if d.is_finite() && d > 0.0 => d,
            _ => 0.0,
        }
    }

    // ------------------------------------------------------------------
    // Test controls
    // ------------------------------------------------------------------

    /// Move the clock without running anything, as if a callback were busy.
    pub fn tick(&self, ms: f64) {
        self.now.set(self.now.get() + ms.max(0.0));
    }

    /// Advance the clock by `ms`, running everything that falls due.
    pub fn advance(&self, ms: f64) {
        let target = self.now.get() + ms.max(0.0);
        while let Some((key, event)) = self.next_due(target) {
            if key.due > self.now.get() {
                self.now.set(key.due);
            }
            self.dispatch(event);
        }
        if target > self.now.get() {
            self.now.set(target);
        }
    }

    /// Run every pending animation frame callback once with the current time.
    /// Frames requested from inside a callback wait for the next call.
    pub fn run_animation_frame(&self) -> usize {
        let frames = std::mem::take(&mut *self.frames.borrow_mut());
        let timestamp = self.now.get();
        let count = frames.len();
        for (handle, callback) in frames {
            callback(handle, timestamp);
        }
        count
    }

    /// Run every pending idle callback inside an idle period of `budget_ms`.
    pub fn run_idle(&self, budget_ms: f64) -> usize {
        let entries = std::mem::take(&mut *self.idle.borrow_mut());
        let count = entries.len();
        for (handle, entry) in entries {
            let deadline = IdleDeadline { did_timeout: false, time_remaining: budget_ms };
            (entry.callback)(handle, deadline);
        }
        count
    }

    /// Replace the caller part of the next captured stacks. Frames are given
    /// innermost first in `name (url:line:col)` or bare `url:line:col` form.
    pub fn set_stack(&self, frames: &[&str]) {
        let signature = self.self_signature.borrow();
        let mut text = String::from("Error");
        text.push_str(&format!("\n    at capture ({signature}/tracer.js:1:1)"));
        text.push_str(&format!("\n    at wrapped ({signature}/wrappers.js:1:1)"));
        for frame in frames {
            text.push_str("\n    at ");
            text.push_str(frame);
        }
        *self.stack.borrow_mut() = CapturedStack::Text(text);
    }

    /// Report a structured stack, innermost first, below the self frames.
    pub fn set_frames(&self, frames: Vec<RawFrame>) {
        let signature = self.self_signature.borrow().clone();
        let mut all = vec![RawFrame {
            function: Some("capture".to_owned()),
            location: Some(format!("{signature}/tracer.js:1:1")),
        }];
        all.extend(frames);
        *self.stack.borrow_mut() = CapturedStack::Frames(all);
    }

    /// Report exactly `stack`, without self frames.
    pub fn set_captured(&self, stack: CapturedStack) {
        *self.stack.borrow_mut() = stack;
    }

    pub fn set_self_signature(&self, signature: &str) {
        signature.clone_into(&mut self.self_signature.borrow_mut());
    }

    pub fn set_hardware_concurrency(&self, count: u32) {
        self.hardware_concurrency.set(count);
    }

    pub fn set_global(&self, name: &str, value: HostValue) {
        self.globals.borrow_mut().insert(name.to_owned(), value);
    }

    #[must_use]
    pub fn global(&self, name: &str) -> Option<HostValue> {
        self.globals.borrow().get(name).cloned()
    }

    /// Deliver an event from a worker to its handler and listeners.
    /// Returns how many functions ran.
    pub fn emit(&self, worker: WorkerId, event_type: &str, data: HostValue) -> usize {
        let targets: Vec<EventListener> = {
            let workers = self.workers.borrow();
            let Some(instance) = workers.get(&worker).filter(|w| !w.terminated) else {
                return 0;
            };
            let slot = match event_type {
                "message" => Some(HandlerSlot::Message),
                "error" => Some(HandlerSlot::Error),
                _ => None,
            };
            slot.and_then(|slot| instance.handlers.get(&slot).cloned())
                .into_iter()
                .chain(
                    instance
                        .listeners
                        .iter()
                        .filter(|(kind, _)| kind == event_type)
                        .map(|(_, listener)| listener.clone()),
                )
                .collect()
        };

        let event = WorkerEvent { event_type: event_type.to_owned(), data };
        for target in &targets {
            target.call(&event);
        }
        targets.len()
    }

    /// Messages posted to `worker` so far.
    #[must_use]
    pub fn posted_messages(&self, worker: WorkerId) -> Vec<HostValue> {
        self.workers.borrow().get(&worker).map(|w| w.outbox.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn is_terminated(&self, worker: WorkerId) -> bool {
        self.workers.borrow().get(&worker).is_some_and(|w| w.terminated)
    }

    #[must_use]
    pub fn worker_specifier(&self, worker: WorkerId) -> Option<String> {
        self.workers.borrow().get(&worker).map(|w| w.specifier.clone())
    }

    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }

    #[must_use]
    pub fn pending_frames(&self) -> usize {
        self.frames.borrow().len()
    }

    #[must_use]
    pub fn pending_idle(&self) -> usize {
        self.idle.borrow().len()
    }

    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Trace ids the debugger paused on, in order.
    #[must_use]
    pub fn breakpoints(&self) -> Vec<TraceId> {
        self.breakpoints.borrow().clone()
    }

    // ------------------------------------------------------------------
    // Event loop internals
    // ------------------------------------------------------------------

    fn next_due(&self, target: f64) -> Option<(DueKey, DueEvent)> {
        let timers = self.timers.borrow();
        let idle = self.idle.borrow();
        let tasks = self.tasks.borrow();

        let timer_events = timers.iter().filter(|(_, e)| e.callback.is_some()).map(|(h, e)| {
            (DueKey { due: e.due, rank: TaskPriority::UserVisible, seq: e.seq }, DueEvent::Timer(*h))
        });
        let idle_events = idle.iter().filter_map(|(h, e)| {
            e.forced_at.map(|due| {
                (DueKey { due, rank: TaskPriority::Background, seq: e.seq }, DueEvent::Idle(*h))
            })
        });
        let task_events = tasks.iter().map(|t| {
            (DueKey { due: t.due, rank: t.priority, seq: t.seq }, DueEvent::Task(t.id))
        });

        timer_events
            .chain(idle_events)
            .chain(task_events)
            .filter(|(key, _)| key.due <= target)
            .min_by(|(a, _), (b, _)| a.order(b))
    }

    fn dispatch(&self, event: DueEvent) {
        match event {
            DueEvent::Timer(handle) => self.fire_timer(handle),
            DueEvent::Idle(handle) => {
                let entry = self.idle.borrow_mut().remove(&handle);
                if let Some(entry) = entry {
                    let deadline = IdleDeadline { did_timeout: true, time_remaining: 0.0 };
                    (entry.callback)(handle, deadline);
                }
            }
            DueEvent::Task(id) => {
                let task = {
                    let mut tasks = self.tasks.borrow_mut();
                    tasks.iter().position(|t| t.id == id).map(|index| tasks.remove(index))
                };
                if let Some(task) = task {
                    if task.signal.as_ref().is_some_and(AbortSignal::aborted) {
                        trace!("skipping aborted {}", task.id);
                    } else {
                        (task.body)();
                    }
                }
            }
        }
    }

    fn fire_timer(&self, handle: Handle) {
        let taken = {
            let mut timers = self.timers.borrow_mut();
            let Some(entry) = timers.get_mut(&handle) else {
                return;
            };
            match entry.period {
                Some(period) => {
                    entry.due += period;
                    entry.seq = self.next_seq();
                    entry.callback.take().map(|callback| (callback, true))
                }
                None => timers.remove(&handle).and_then(|e| e.callback).map(|cb| (cb, false)),
            }
        };

        let Some((mut callback, repeating)) = taken else {
            return;
        };
        callback(handle);
        if repeating {
            if let Some(entry) = self.timers.borrow_mut().get_mut(&handle) {
                entry.callback = Some(callback);
            }
        }
    }

    fn schedule_timer(&self, callback: TimerCallback, delay: Option<f64>, repeat: bool) -> Handle {
        let handle = Handle(Self::bump(&self.next_timer));
        let delay = Self::normalize_delay(delay);
        let period = repeat.then_some(delay.max(MIN_INTERVAL_MS));
        let entry = TimerEntry {
            due: self.now.get() + period.unwrap_or(delay),
            seq: self.next_seq(),
            period,
            callback: Some(callback),
        };
        self.timers.borrow_mut().insert(handle, entry);
        handle
    }

    fn clear_timer(&self, handle: &HostValue) {
        if let Some(handle) = handle.as_handle() {
            self.timers.borrow_mut().remove(&handle);
        }
    }
}

impl TimerHost for VirtualHost {
    fn set_timeout(&self, callback: TimerCallback, delay: Option<f64>) -> Handle {
        self.schedule_timer(callback, delay, false)
    }

    fn set_interval(&self, callback: TimerCallback, delay: Option<f64>) -> Handle {
        self.schedule_timer(callback, delay, true)
    }

    // Timeouts and intervals share one handle space, either call clears both
    fn clear_timeout(&self, handle: &HostValue) {
        self.clear_timer(handle);
    }

    fn clear_interval(&self, handle: &HostValue) {
        self.clear_timer(handle);
    }
}

impl AnimationHost for VirtualHost {
    fn request_animation_frame(&self, callback: FrameCallback) -> Handle {
        let handle = Handle(Self::bump(&self.next_frame));
        self.frames.borrow_mut().insert(handle, callback);
        handle
    }

    fn cancel_animation_frame(&self, handle: &HostValue) {
        if let Some(handle) = handle.as_handle() {
            self.frames.borrow_mut().remove(&handle);
        }
    }
}

impl IdleHost for VirtualHost {
    fn request_idle_callback(
        &self,
        callback: IdleCallback,
        options: Option<IdleOptions>,
    ) -> Handle {
        let handle = Handle(Self::bump(&self.next_idle));
        let forced_at = options
            .and_then(|o| o.timeout)
            .filter(|t| t.is_finite() && *t > 0.0)
            .map(|timeout| self.now.get() + timeout);
        let entry = IdleEntry { forced_at, seq: self.next_seq(), callback };
        self.idle.borrow_mut().insert(handle, entry);
        handle
    }

    fn cancel_idle_callback(&self, handle: &HostValue) {
        if let Some(handle) = handle.as_handle() {
            self.idle.borrow_mut().remove(&handle);
        }
    }
}

impl EvalHost for VirtualHost {
    fn eval(&self, code: &str) -> Result<HostValue, HostError> {
        script::evaluate(code, &self.globals)
    }
}

impl SchedulerHost for VirtualHost {
    fn yield_now(&self, continuation: TaskBody) {
        self.post_task(
            continuation,
            TaskOptions { priority: Some(TaskPriority::UserVisible), ..TaskOptions::default() },
        );
    }

    fn post_task(&self, body: TaskBody, options: TaskOptions) -> TaskId {
        let id = TaskId(self.next_task.get());
        self.next_task.set(id.0 + 1);
        let entry = TaskEntry {
            id,
            due: self.now.get() + Self::normalize_delay(options.delay),
            priority: options.priority.unwrap_or(TaskPriority::UserVisible),
            seq: self.next_seq(),
            body,
            signal: options.signal,
        };
        self.tasks.borrow_mut().push(entry);
        id
    }
}

impl WorkerHost for VirtualHost {
    fn spawn_worker(&self, specifier: &str) -> Result<WorkerId, HostError> {
        if specifier.trim().is_empty() {
            return Err(HostError::new(
                HostErrorKind::SyntaxError,
                "Failed to construct 'Worker': the script URL is empty",
            ));
        }
        let id = WorkerId(Self::bump(&self.next_worker));
        let worker = VirtualWorker { specifier: specifier.to_owned(), ..VirtualWorker::default() };
        self.workers.borrow_mut().insert(id, worker);
        Ok(id)
    }

    fn post_message(&self, worker: WorkerId, message: HostValue) {
        if let Some(instance) = self.workers.borrow_mut().get_mut(&worker) {
            if !instance.terminated {
                instance.outbox.push(message);
            }
        }
    }

    fn set_handler(&self, worker: WorkerId, slot: HandlerSlot, handler: Option<EventListener>) {
        if let Some(instance) = self.workers.borrow_mut().get_mut(&worker) {
            match handler {
                Some(handler) => instance.handlers.insert(slot, handler),
                None => instance.handlers.remove(&slot),
            };
        }
    }

    fn add_event_listener(&self, worker: WorkerId, event_type: &str, listener: EventListener) {
        if let Some(instance) = self.workers.borrow_mut().get_mut(&worker) {
            instance.listeners.push((event_type.to_owned(), listener));
        }
    }

    fn remove_event_listener(&self, worker: WorkerId, event_type: &str, listener: &EventListener) {
        if let Some(instance) = self.workers.borrow_mut().get_mut(&worker) {
            let found = instance
                .listeners
                .iter()
                .position(|(kind, l)| kind == event_type && l.same(listener));
            if let Some(index) = found {
                instance.listeners.remove(index);
            }
        }
    }

    fn terminate(&self, worker: WorkerId) {
        if let Some(instance) = self.workers.borrow_mut().get_mut(&worker) {
            instance.terminated = true;
        }
    }

    fn hardware_concurrency(&self) -> u32 {
        self.hardware_concurrency.get()
    }
}

impl StackSource for VirtualHost {
    fn capture(&self) -> CapturedStack {
        self.stack.borrow().clone()
    }
}

impl Clock for VirtualHost {
    fn now(&self) -> f64 {
        self.now.get()
    }
}

impl Debugger for VirtualHost {
    fn breakpoint(&self, trace_id: &TraceId) {
        self.breakpoints.borrow_mut().push(trace_id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::AbortController;
    use std::rc::Rc;

    fn recorder() -> (Rc<RefCell<Vec<String>>>, impl Fn(&str) -> Box<dyn FnMut(Handle)>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let make = move |label: &str| -> Box<dyn FnMut(Handle)> {
            let sink = Rc::clone(&sink);
            let label = label.to_owned();
            Box::new(move |_| sink.borrow_mut().push(label.clone()))
        };
        (log, make)
    }

    #[test]
    fn test_timers_fire_in_due_order() {
        let host = VirtualHost::new();
        let (log, make) = recorder();
        host.set_timeout(make("late"), Some(20.0));
        host.set_timeout(make("early"), Some(5.0));
        host.set_timeout(make("negative"), Some(-1.0));

        host.advance(10.0);
        assert_eq!(*log.borrow(), vec!["negative", "early"]);
        assert_eq!(host.now(), 10.0);

        host.advance(10.0);
        assert_eq!(log.borrow().len(), 3);
        assert_eq!(host.pending_timers(), 0);
    }

    #[test]
    fn test_interval_repeats_until_cleared() {
        let host = VirtualHost::new();
        let (log, make) = recorder();
        let handle = host.set_interval(make("tick"), Some(10.0));

        host.advance(35.0);
        assert_eq!(log.borrow().len(), 3);

        host.clear_timeout(&HostValue::from(handle));
        host.advance(100.0);
        assert_eq!(log.borrow().len(), 3);
    }

    #[test]
    fn test_clear_ignores_non_handles() {
        let host = VirtualHost::new();
        let (_, make) = recorder();
        host.set_timeout(make("x"), None);
        host.clear_timeout(&HostValue::from("1"));
        host.clear_timeout(&HostValue::Number(0.0));
        assert_eq!(host.pending_timers(), 1);
    }

    #[test]
    fn test_aborted_task_is_skipped() {
        let host = VirtualHost::new();
        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        let controller = AbortController::new();
        host.post_task(
            Box::new(move || flag.set(true)),
            TaskOptions { signal: Some(controller.signal()), ..TaskOptions::default() },
        );

        controller.abort();
        host.advance(0.0);
        assert!(!ran.get());
        assert_eq!(host.pending_tasks(), 0);
    }

    #[test]
    fn test_idle_timeout_forces_callback() {
        let host = VirtualHost::new();
        let seen = Rc::new(Cell::new(None));
        let sink = Rc::clone(&seen);
        host.request_idle_callback(
            Box::new(move |_, deadline| sink.set(Some(deadline.did_timeout))),
            Some(IdleOptions { timeout: Some(50.0) }),
        );

        host.advance(49.0);
        assert_eq!(seen.get(), None);
        host.advance(1.0);
        assert_eq!(seen.get(), Some(true));
    }

    #[test]
    fn test_host_does_not_deduplicate_listeners() {
        let host = VirtualHost::new();
        let worker = host.spawn_worker("worker.js").unwrap();
        let count = Rc::new(Cell::new(0));
        let sink = Rc::clone(&count);
        let listener = EventListener::new(move |_| sink.set(sink.get() + 1));

        host.add_event_listener(worker, "message", listener.clone());
        host.add_event_listener(worker, "message", listener.clone());
        assert_eq!(host.emit(worker, "message", HostValue::Null), 2);

        host.remove_event_listener(worker, "message", &listener);
        assert_eq!(host.emit(worker, "message", HostValue::Null), 1);
        assert_eq!(count.get(), 3);
    }

    #[test]
    fn test_stack_includes_self_frames() {
        let host = VirtualHost::new();
        host.set_stack(&["main (https://example.com/app.js:3:7)"]);
        let CapturedStack::Text(text) = host.capture() else {
            panic!("expected text stack");
        };
        assert!(text.starts_with("Error\n"));
        assert!(text.contains(DEFAULT_SELF_SIGNATURE));
        assert!(text.ends_with("at main (https://example.com/app.js:3:7)"));
    }
}
