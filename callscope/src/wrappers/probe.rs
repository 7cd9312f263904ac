//! Per-call instrumentation shared by every wrapper: call-site capture,
//! bypass/pause policy and self-time measurement.

use callscope_common::{CallSite, TraceId};
use std::rc::Rc;

use crate::host::{Callback, Clock, Debugger, StackSource};
use crate::tracer::{CallSiteTracer, UniqueTrait};
use crate::validation::round_fixed;

/// Result of running supplied code under the probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timed<R> {
    pub value: R,
    /// Wall-clock milliseconds spent in the code, rounded
    pub self_time: f64,
}

pub struct Probe {
    tracer: CallSiteTracer,
    stacks: Rc<dyn StackSource>,
    clock: Rc<dyn Clock>,
    debugger: Rc<dyn Debugger>,
}

impl Probe {
    pub fn new(
        tracer: CallSiteTracer,
        stacks: Rc<dyn StackSource>,
        clock: Rc<dyn Clock>,
        debugger: Rc<dyn Debugger>,
    ) -> Self {
        Self { tracer, stacks, clock, debugger }
    }

    #[must_use]
    pub fn tracer(&self) -> &CallSiteTracer {
        &self.tracer
    }

    /// Current host time in milliseconds.
    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// Capture the current stack and attribute it.
    pub fn call_site(&self, unique: Option<UniqueTrait<'_>>) -> CallSite {
        self.tracer.trace(&self.stacks.capture(), unique)
    }

    /// Call site of an invocation that was handed `callback`.
    pub fn call_site_for<A>(&self, callback: &Callback<A>) -> CallSite {
        let repr = callback.repr();
        self.call_site(Some(UniqueTrait { name: callback.name(), repr: &repr }))
    }

    /// Call site of an invocation that was handed a code string.
    pub fn call_site_for_code(&self, code: &str) -> CallSite {
        self.call_site(Some(UniqueTrait { name: None, repr: code }))
    }

    /// Run code supplied by the call site `trace_id`.
    ///
    /// Returns `None` without running anything when the call site is
    /// bypassed; triggers the debugger first when it is marked for pausing.
    pub fn run<R>(&self, trace_id: &TraceId, code: impl FnOnce() -> R) -> Option<Timed<R>> {
        if !self.tracer.should_pass(trace_id) {
            return None;
        }
        if self.tracer.should_pause(trace_id) {
            self.debugger.breakpoint(trace_id);
        }
        let start = self.clock.now();
        let value = code();
        let self_time = round_fixed(self.clock.now() - start);
        Some(Timed { value, self_time })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::VirtualHost;
    use crate::tracer::TracerConfig;
    use std::collections::HashSet;

    fn probe(host: &Rc<VirtualHost>) -> Probe {
        Probe::new(CallSiteTracer::new(TracerConfig::default()), host.clone(), host.clone(), host.clone())
    }

    #[test]
    fn test_run_measures_self_time() {
        let host = Rc::new(VirtualHost::new());
        let probe = probe(&host);
        let timed = probe.run(&TraceId::from("t"), || {
            host.tick(2.5);
            7
        });
        assert_eq!(timed, Some(Timed { value: 7, self_time: 2.5 }));
    }

    #[test]
    fn test_bypassed_code_does_not_run() {
        let host = Rc::new(VirtualHost::new());
        let probe = probe(&host);
        let id = TraceId::from("t");
        probe.tracer().set_bypass(HashSet::from([id.clone()]));
        assert_eq!(probe.run(&id, || panic!("bypassed code ran")), None::<Timed<()>>);
    }

    #[test]
    fn test_paused_code_hits_breakpoint_then_runs() {
        let host = Rc::new(VirtualHost::new());
        let probe = probe(&host);
        let id = TraceId::from("t");
        probe.tracer().set_debug(HashSet::from([id.clone()]));
        assert!(probe.run(&id, || ()).is_some());
        assert_eq!(host.breakpoints(), vec![id]);
    }
}
