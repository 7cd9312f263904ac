//! # Aggregator
//!
//! Owns one wrapper per capability, the interception registry and the
//! configuration, and turns wrapper state into snapshots.
//!
//! ```text
//!   MonitorConfig ─▶ install()        enabled capabilities ─▶ registry
//!                    globals()        facade routed by the registry
//!                    snapshot()       wrapper.collect(visible) for installed ones
//!                    reset()          wrapper.reset() + tracer cache
//!                    force_cancel()   wrapper's own cancel path
//! ```

use callscope_common::Snapshot;
use log::{debug, info};
use std::cell::RefCell;
use std::rc::Rc;

use crate::config::MonitorConfig;
use crate::domain::{Capability, Handle, PendingKind, RegistryError};
use crate::globals::Globals;
use crate::host::{Host, HostBindings};
use crate::registry::InterceptionRegistry;
use crate::tracer::CallSiteTracer;
use crate::wrappers::{
    AnimationWrapper, CapabilityWrapper, EvalWrapper, IdleWrapper, Probe, SchedulerWrapper,
    TimerWrapper, WorkerWrapper,
};

/// One wrapper per capability, sharing a probe.
pub(crate) struct WrapperSet {
    pub timers: TimerWrapper,
    pub eval: Rc<EvalWrapper>,
    pub animation: AnimationWrapper,
    pub idle: IdleWrapper,
    pub scheduler: SchedulerWrapper,
    pub worker: WorkerWrapper,
}

impl WrapperSet {
    fn new(host: &HostBindings, probe: &Rc<Probe>, registry: &Rc<InterceptionRegistry>) -> Self {
        let eval = Rc::new(EvalWrapper::new(Rc::clone(probe), Rc::clone(&host.eval)));
        Self {
            timers: TimerWrapper::new(
                Rc::clone(probe),
                Rc::clone(&host.timers),
                Rc::clone(&host.eval),
                Rc::clone(&eval),
                Rc::clone(registry),
            ),
            eval,
            animation: AnimationWrapper::new(Rc::clone(probe), Rc::clone(&host.animation)),
            idle: IdleWrapper::new(Rc::clone(probe), Rc::clone(&host.idle)),
            scheduler: SchedulerWrapper::new(Rc::clone(probe), Rc::clone(&host.scheduler)),
            worker: WorkerWrapper::new(Rc::clone(probe), Rc::clone(&host.workers)),
        }
    }

    fn get(&self, capability: Capability) -> &dyn CapabilityWrapper {
        match capability {
            Capability::Timers => &self.timers,
            Capability::Eval => self.eval.as_ref(),
            Capability::Animation => &self.animation,
            Capability::Idle => &self.idle,
            Capability::Scheduler => &self.scheduler,
            Capability::Worker => &self.worker,
        }
    }
}

pub struct Aggregator {
    host: HostBindings,
    probe: Rc<Probe>,
    wrappers: Rc<WrapperSet>,
    registry: Rc<InterceptionRegistry>,
    config: RefCell<MonitorConfig>,
}

impl Aggregator {
    pub fn new<H: Host + 'static>(host: Rc<H>, config: MonitorConfig) -> Self {
        let host = HostBindings::from_host(&host);
        let probe = Rc::new(Probe::new(
            CallSiteTracer::new(config.tracer_config()),
            Rc::clone(&host.stacks),
            Rc::clone(&host.clock),
            Rc::clone(&host.debugger),
        ));
        let registry = Rc::new(InterceptionRegistry::new());
        let wrappers = Rc::new(WrapperSet::new(&host, &probe, &registry));
        wrappers.worker.set_concurrency_override(config.hardware_concurrency);
        Self {
            host,
            probe,
            wrappers,
            registry,
            config: RefCell::new(config),
        }
    }

    /// Install every capability the configuration enables.
    pub fn install(&self) {
        let enabled: Vec<Capability> = {
            let config = self.config.borrow();
            Capability::ALL.into_iter().filter(|c| config.is_enabled(*c)).collect()
        };
        for capability in enabled {
            self.install_capability(capability);
        }
        info!("instrumenting {:?}", self.registry.installed());
    }

    /// Install one capability regardless of configuration. Idempotent.
    pub fn install_capability(&self, capability: Capability) -> bool {
        self.registry.install(capability)
    }

    /// Restore direct host routing for `capability`.
    ///
    /// # Errors
    /// `eval` cannot be uninstalled.
    pub fn uninstall(&self, capability: Capability) -> Result<bool, RegistryError> {
        self.registry.uninstall(capability)
    }

    #[must_use]
    pub fn is_installed(&self, capability: Capability) -> bool {
        self.registry.is_installed(capability)
    }

    /// Entry points for the observed program.
    #[must_use]
    pub fn globals(&self) -> Globals {
        Globals::new(self.host.clone(), Rc::clone(&self.wrappers), Rc::clone(&self.registry))
    }

    /// Collect every installed capability. Hidden capabilities report counters
    /// only.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let config = self.config.borrow();
        let mut snapshot = Snapshot::default();
        for capability in self.registry.installed() {
            self.wrappers.get(capability).collect(&mut snapshot, config.is_visible(capability));
        }
        snapshot
    }

    /// Forget all history, registrations, counters and cached traces.
    pub fn reset(&self) {
        for capability in Capability::ALL {
            self.wrappers.get(capability).reset();
        }
        self.probe.tracer().clear_cache();
        debug!("history reset");
    }

    /// Cancel a pending operation through its wrapper's cancel path, as if
    /// the program had called it. Returns `false` when the capability is not
    /// installed.
    pub fn force_cancel(&self, kind: PendingKind, handle: Handle) -> bool {
        let capability = match kind {
            PendingKind::Timeout | PendingKind::Interval => Capability::Timers,
            PendingKind::AnimationFrame => Capability::Animation,
            PendingKind::IdleCallback => Capability::Idle,
        };
        if !self.registry.is_installed(capability) {
            debug!("force cancel of {} {handle} ignored: {capability} not installed", kind.name());
            return false;
        }
        match kind {
            PendingKind::Timeout | PendingKind::Interval => self.wrappers.timers.force_cancel(kind, handle),
            PendingKind::AnimationFrame => self.wrappers.animation.cancel_animation_frame(&handle.into()),
            PendingKind::IdleCallback => self.wrappers.idle.cancel_idle_callback(&handle.into()),
        }
        true
    }

    /// Replace the configuration at runtime: tracer settings, visibility and
    /// the concurrency override apply immediately, newly enabled capabilities
    /// are installed. Disabling does not uninstall.
    pub fn apply_config(&self, config: MonitorConfig) {
        self.probe.tracer().reconfigure(config.tracer_config());
        self.wrappers.worker.set_concurrency_override(config.hardware_concurrency);
        *self.config.borrow_mut() = config;
        self.install();
    }

    #[must_use]
    pub fn config(&self) -> MonitorConfig {
        self.config.borrow().clone()
    }

    #[must_use]
    pub fn tracer(&self) -> &CallSiteTracer {
        self.probe.tracer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CapabilitySettings;
    use crate::host::{Callback, VirtualHost};

    fn host() -> Rc<VirtualHost> {
        let host = Rc::new(VirtualHost::new());
        host.set_stack(&["main (https://app.test/main.js:1:1)"]);
        host
    }

    #[test]
    fn test_disabled_capability_is_null() {
        let mut config = MonitorConfig::default();
        config.set(Capability::Idle, CapabilitySettings { enabled: false, visible: true });
        let aggregator = Aggregator::new(host(), config);
        aggregator.install();

        let snapshot = aggregator.snapshot();
        assert!(snapshot.request_idle_callback.is_none());
        assert!(!snapshot.calls.contains_key("request_idle_callback"));
        assert_eq!(snapshot.set_timeout, Some(Vec::new()));
    }

    #[test]
    fn test_hidden_capability_still_counts() {
        let mut config = MonitorConfig::default();
        config.set(Capability::Timers, CapabilitySettings { enabled: true, visible: false });
        let aggregator = Aggregator::new(host(), config);
        aggregator.install();
        aggregator.globals().set_timeout(Callback::new(|_: &()| {}), Some(1.0));

        let snapshot = aggregator.snapshot();
        assert!(snapshot.set_timeout.is_none());
        assert_eq!(snapshot.calls.get("set_timeout"), Some(&1));
    }

    #[test]
    fn test_uninstalled_calls_go_direct() {
        let host = host();
        let aggregator = Aggregator::new(host.clone(), MonitorConfig::default());
        let globals = aggregator.globals();
        globals.set_timeout("hits = 1", Some(1.0));
        host.advance(1.0);

        assert_eq!(host.global("hits").and_then(|v| v.as_number()), Some(1.0));
        assert_eq!(aggregator.snapshot(), Snapshot::default());
    }

    #[test]
    fn test_reset_clears_everything() {
        let aggregator = Aggregator::new(host(), MonitorConfig::default());
        aggregator.install();
        aggregator.globals().set_interval(Callback::new(|_: &()| {}), Some(10.0));
        assert!(aggregator.tracer().cached_traces() > 0);

        aggregator.reset();
        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.record_count(), 0);
        assert_eq!(snapshot.total_calls(), 0);
        assert_eq!(snapshot.online.get("interval"), Some(&0));
        assert_eq!(aggregator.tracer().cached_traces(), 0);
    }

    #[test]
    fn test_force_cancel_uses_wrapper_path() {
        let host = host();
        let aggregator = Aggregator::new(host.clone(), MonitorConfig::default());
        aggregator.install();
        let handle = aggregator.globals().request_animation_frame(Callback::new(|_| {}));

        assert!(aggregator.force_cancel(PendingKind::AnimationFrame, handle));
        assert_eq!(host.pending_frames(), 0);
        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.cancel_animation_frame.map(|r| r.len()), Some(1));
        assert_eq!(snapshot.request_animation_frame.unwrap()[0].pending.canceled_counter, 1);
    }

    #[test]
    fn test_apply_config_installs_and_hides() {
        let mut config = MonitorConfig::default();
        config.set(Capability::Eval, CapabilitySettings { enabled: false, visible: true });
        let aggregator = Aggregator::new(host(), config);
        aggregator.install();
        assert!(!aggregator.is_installed(Capability::Eval));

        let mut next = aggregator.config();
        next.set(Capability::Eval, CapabilitySettings { enabled: true, visible: false });
        aggregator.apply_config(next);
        assert!(aggregator.is_installed(Capability::Eval));

        aggregator.globals().eval("1").unwrap();
        let snapshot = aggregator.snapshot();
        assert!(snapshot.eval.is_none());
        assert_eq!(snapshot.calls.get("eval"), Some(&1));
        assert!(aggregator.uninstall(Capability::Eval).is_err());
    }
}
