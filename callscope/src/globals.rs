//! # Entry-point facade
//!
//! What the observed program calls instead of the host's globals. Each call
//! goes to the capability's wrapper while it is installed and straight to
//! the host otherwise, so uninstalling restores the original behaviour
//! without touching pending operations.

use std::rc::Rc;

use crate::aggregator::WrapperSet;
use crate::domain::{Capability, Handle, HostError, TaskId, WorkerId};
use crate::host::{
    Callback, EventListener, HandlerSlot, HostBindings, HostValue, IdleDeadline, IdleOptions,
    TaskBody, TaskOptions,
};
use crate::registry::InterceptionRegistry;
use crate::wrappers::TimerCode;

#[derive(Clone)]
pub struct Globals {
    host: HostBindings,
    wrappers: Rc<WrapperSet>,
    registry: Rc<InterceptionRegistry>,
}

impl Globals {
    pub(crate) fn new(
        host: HostBindings,
        wrappers: Rc<WrapperSet>,
        registry: Rc<InterceptionRegistry>,
    ) -> Self {
        Self { host, wrappers, registry }
    }

    fn routed(&self, capability: Capability) -> bool {
        self.registry.is_installed(capability)
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    pub fn set_timeout(&self, code: impl Into<TimerCode>, delay: Option<f64>) -> Handle {
        if self.routed(Capability::Timers) {
            return self.wrappers.timers.set_timeout(code, delay);
        }
        let code = code.into();
        let eval = Rc::clone(&self.host.eval);
        self.host.timers.set_timeout(Box::new(move |_| code.run(eval.as_ref())), delay)
    }

    pub fn set_interval(&self, code: impl Into<TimerCode>, delay: Option<f64>) -> Handle {
        if self.routed(Capability::Timers) {
            return self.wrappers.timers.set_interval(code, delay);
        }
        let code = code.into();
        let eval = Rc::clone(&self.host.eval);
        self.host.timers.set_interval(Box::new(move |_| code.run(eval.as_ref())), delay)
    }

    pub fn clear_timeout(&self, handle: &HostValue) {
        if self.routed(Capability::Timers) {
            self.wrappers.timers.clear_timeout(handle);
        } else {
            self.host.timers.clear_timeout(handle);
        }
    }

    pub fn clear_interval(&self, handle: &HostValue) {
        if self.routed(Capability::Timers) {
            self.wrappers.timers.clear_interval(handle);
        } else {
            self.host.timers.clear_interval(handle);
        }
    }

    // ------------------------------------------------------------------
    // Eval
    // ------------------------------------------------------------------

    /// # Errors
    /// Whatever the evaluated code raised.
    pub fn eval(&self, code: &str) -> Result<HostValue, HostError> {
        if self.routed(Capability::Eval) {
            self.wrappers.eval.eval(code)
        } else {
            self.host.eval.eval(code)
        }
    }

    // ------------------------------------------------------------------
    // Animation / idle
    // ------------------------------------------------------------------

    pub fn request_animation_frame(&self, callback: Callback<f64>) -> Handle {
        if self.routed(Capability::Animation) {
            return self.wrappers.animation.request_animation_frame(callback);
        }
        self.host.animation.request_animation_frame(Box::new(move |_, ts| callback.call(&ts)))
    }

    pub fn cancel_animation_frame(&self, handle: &HostValue) {
        if self.routed(Capability::Animation) {
            self.wrappers.animation.cancel_animation_frame(handle);
        } else {
            self.host.animation.cancel_animation_frame(handle);
        }
    }

    pub fn request_idle_callback(
        &self,
        callback: Callback<IdleDeadline>,
        options: Option<IdleOptions>,
    ) -> Handle {
        if self.routed(Capability::Idle) {
            return self.wrappers.idle.request_idle_callback(callback, options);
        }
        self.host
            .idle
            .request_idle_callback(Box::new(move |_, deadline| callback.call(&deadline)), options)
    }

    pub fn cancel_idle_callback(&self, handle: &HostValue) {
        if self.routed(Capability::Idle) {
            self.wrappers.idle.cancel_idle_callback(handle);
        } else {
            self.host.idle.cancel_idle_callback(handle);
        }
    }

    // ------------------------------------------------------------------
    // Scheduler
    // ------------------------------------------------------------------

    pub fn yield_now(&self, continuation: TaskBody) {
        if self.routed(Capability::Scheduler) {
            self.wrappers.scheduler.yield_now(continuation);
        } else {
            self.host.scheduler.yield_now(continuation);
        }
    }

    pub fn post_task(&self, callback: Callback<()>, options: TaskOptions) -> TaskId {
        if self.routed(Capability::Scheduler) {
            return self.wrappers.scheduler.post_task(callback, options);
        }
        self.host.scheduler.post_task(Box::new(move || callback.call(&())), options)
    }

    // ------------------------------------------------------------------
    // Workers
    // ------------------------------------------------------------------

    /// Construct a worker. Its methods keep the routing chosen here.
    ///
    /// # Errors
    /// The host's construction error.
    pub fn spawn_worker(&self, specifier: &str) -> Result<Worker, HostError> {
        let instrumented = self.routed(Capability::Worker);
        let id = if instrumented {
            self.wrappers.worker.spawn(specifier)?
        } else {
            self.host.workers.spawn_worker(specifier)?
        };
        Ok(Worker { id, instrumented, globals: self.clone() })
    }

    #[must_use]
    pub fn hardware_concurrency(&self) -> u32 {
        self.host.workers.hardware_concurrency()
    }
}

/// A worker instance as the program sees it.
#[derive(Clone)]
pub struct Worker {
    id: WorkerId,
    instrumented: bool,
    globals: Globals,
}

impl Worker {
    #[must_use]
    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn post_message(&self, message: HostValue) {
        if self.instrumented {
            self.globals.wrappers.worker.post_message(self.id, message);
        } else {
            self.globals.host.workers.post_message(self.id, message);
        }
    }

    pub fn set_onmessage(&self, handler: Option<EventListener>) {
        self.set_handler(HandlerSlot::Message, handler);
    }

    pub fn set_onerror(&self, handler: Option<EventListener>) {
        self.set_handler(HandlerSlot::Error, handler);
    }

    fn set_handler(&self, slot: HandlerSlot, handler: Option<EventListener>) {
        if self.instrumented {
            self.globals.wrappers.worker.set_handler(self.id, slot, handler);
        } else {
            self.globals.host.workers.set_handler(self.id, slot, handler);
        }
    }

    pub fn add_event_listener(&self, event_type: &str, listener: EventListener) {
        if self.instrumented {
            self.globals.wrappers.worker.add_event_listener(self.id, event_type, listener);
        } else {
            self.globals.host.workers.add_event_listener(self.id, event_type, listener);
        }
    }

    pub fn remove_event_listener(&self, event_type: &str, listener: &EventListener) {
        if self.instrumented {
            self.globals.wrappers.worker.remove_event_listener(self.id, event_type, listener);
        } else {
            self.globals.host.workers.remove_event_listener(self.id, event_type, listener);
        }
    }

    pub fn terminate(&self) {
        if self.instrumented {
            self.globals.wrappers.worker.terminate(self.id);
        } else {
            self.globals.host.workers.terminate(self.id);
        }
    }
}
