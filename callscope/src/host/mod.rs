//! # Host Interface
//!
//! The instrumented program never talks to the runtime directly: every
//! capability is an injected trait, and the monitor's wrappers sit between
//! the program and these traits.
//!
//! ```text
//!   program ──▶ Globals ──┬──▶ wrapper ──▶ host trait   (installed)
//!                         └──────────────▶ host trait   (not installed)
//! ```
//!
//! Callbacks handed to a host are boxed closures; the host passes the issued
//! handle back when it fires them so a wrapper can look its registration up
//! by handle instead of capturing it.
//!
//! [`VirtualHost`] is a deterministic implementation of every trait used by
//! tests and the `demo` command.

pub mod abort;
pub mod callback;
pub mod script;
pub mod value;
pub mod virtual_host;

use std::rc::Rc;

use callscope_common::TraceId;

use crate::domain::{Handle, HostError, TaskId, WorkerId};

pub use abort::{AbortController, AbortSignal};
pub use callback::Callback;
pub use value::{format_number, HostValue, OpaqueObject};
pub use virtual_host::VirtualHost;

pub type TimerCallback = Box<dyn FnMut(Handle)>;
pub type FrameCallback = Box<dyn FnOnce(Handle, f64)>;
pub type IdleCallback = Box<dyn FnOnce(Handle, IdleDeadline)>;
pub type TaskBody = Box<dyn FnOnce()>;

/// Listener for worker events, compared by identity.
pub type EventListener = Callback<WorkerEvent>;

pub trait TimerHost {
    /// Schedule a one-shot callback. `delay` is passed through unvalidated.
    fn set_timeout(&self, callback: TimerCallback, delay: Option<f64>) -> Handle;
    fn set_interval(&self, callback: TimerCallback, delay: Option<f64>) -> Handle;
    /// Cancel by handle; values that are not a live handle are ignored.
    fn clear_timeout(&self, handle: &HostValue);
    fn clear_interval(&self, handle: &HostValue);
}

pub trait AnimationHost {
    /// Run `callback` with the frame timestamp before the next repaint.
    fn request_animation_frame(&self, callback: FrameCallback) -> Handle;
    fn cancel_animation_frame(&self, handle: &HostValue);
}

/// Passed to idle callbacks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdleDeadline {
    /// True when the callback runs because its timeout elapsed
    pub did_timeout: bool,
    /// Milliseconds left in the idle period
    pub time_remaining: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IdleOptions {
    pub timeout: Option<f64>,
}

pub trait IdleHost {
    fn request_idle_callback(&self, callback: IdleCallback, options: Option<IdleOptions>)
        -> Handle;
    fn cancel_idle_callback(&self, handle: &HostValue);
}

pub trait EvalHost {
    /// Evaluate `code` in global scope.
    ///
    /// # Errors
    /// Returns whatever the evaluated code raised.
    fn eval(&self, code: &str) -> Result<HostValue, HostError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskPriority {
    UserBlocking,
    UserVisible,
    Background,
}

impl TaskPriority {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TaskPriority::UserBlocking => "user-blocking",
            TaskPriority::UserVisible => "user-visible",
            TaskPriority::Background => "background",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    pub priority: Option<TaskPriority>,
    pub delay: Option<f64>,
    /// The host skips the body if this is aborted before it starts
    pub signal: Option<AbortSignal>,
}

pub trait SchedulerHost {
    /// Resume `continuation` after yielding to the event loop.
    fn yield_now(&self, continuation: TaskBody);
    fn post_task(&self, body: TaskBody, options: TaskOptions) -> TaskId;
}

/// A message or error delivered by a worker.
#[derive(Debug, Clone)]
pub struct WorkerEvent {
    /// `"message"` or `"error"`
    pub event_type: String,
    pub data: HostValue,
}

/// The two assignable handler properties of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerSlot {
    Message,
    Error,
}

impl HandlerSlot {
    #[must_use]
    pub fn event_type(self) -> &'static str {
        match self {
            HandlerSlot::Message => "message",
            HandlerSlot::Error => "error",
        }
    }
}

pub trait WorkerHost {
    /// Start a worker running the script at `specifier`.
    ///
    /// # Errors
    /// Returns the host's construction error (e.g. an empty specifier).
    fn spawn_worker(&self, specifier: &str) -> Result<WorkerId, HostError>;
    fn post_message(&self, worker: WorkerId, message: HostValue);
    fn set_handler(&self, worker: WorkerId, slot: HandlerSlot, handler: Option<EventListener>);
    /// Hosts do not deduplicate: adding the same listener twice runs it twice.
    fn add_event_listener(&self, worker: WorkerId, event_type: &str, listener: EventListener);
    fn remove_event_listener(&self, worker: WorkerId, event_type: &str, listener: &EventListener);
    fn terminate(&self, worker: WorkerId);
    /// Logical processor count hint
    fn hardware_concurrency(&self) -> u32;
}

/// One frame of a structured stack capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub function: Option<String>,
    pub location: Option<String>,
}

/// Stack of the current call as the host reports it, innermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapturedStack {
    /// Engine-formatted text, first line is the error marker
    Text(String),
    Frames(Vec<RawFrame>),
}

pub trait StackSource {
    fn capture(&self) -> CapturedStack;
}

pub trait Clock {
    /// Monotonic milliseconds.
    fn now(&self) -> f64;
}

/// Pauses execution in an attached debugger.
pub trait Debugger {
    fn breakpoint(&self, trace_id: &TraceId);
}

/// Everything a complete host provides.
pub trait Host:
    TimerHost
    + AnimationHost
    + IdleHost
    + EvalHost
    + SchedulerHost
    + WorkerHost
    + StackSource
    + Clock
    + Debugger
{
}

impl<T> Host for T where
    T: TimerHost
        + AnimationHost
        + IdleHost
        + EvalHost
        + SchedulerHost
        + WorkerHost
        + StackSource
        + Clock
        + Debugger
{
}

/// One host split into per-capability trait objects.
#[derive(Clone)]
pub struct HostBindings {
    pub timers: Rc<dyn TimerHost>,
    pub animation: Rc<dyn AnimationHost>,
    pub idle: Rc<dyn IdleHost>,
    pub eval: Rc<dyn EvalHost>,
    pub scheduler: Rc<dyn SchedulerHost>,
    pub workers: Rc<dyn WorkerHost>,
    pub stacks: Rc<dyn StackSource>,
    pub clock: Rc<dyn Clock>,
    pub debugger: Rc<dyn Debugger>,
}

impl HostBindings {
    pub fn from_host<H: Host + 'static>(host: &Rc<H>) -> Self {
        Self {
            timers: host.clone(),
            animation: host.clone(),
            idle: host.clone(),
            eval: host.clone(),
            scheduler: host.clone(),
            workers: host.clone(),
            stacks: host.clone(),
            clock: host.clone(),
            debugger: host.clone(),
        }
    }
}
