//! Indirect evaluation.
//!
//! Evaluation always happens in global scope. A "name not defined" failure
//! therefore means the code expected the caller's locals: it is recorded as
//! `USES_LOCAL_SCOPE` and answered with `undefined`. Any other failure is
//! recorded as `THROWS` and handed back to the caller unchanged.

use callscope_common::facts::tables::eval as facts;
use callscope_common::{CallSite, EvalRecord, Snapshot};
use log::debug;
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;

use super::history::{CallCounters, CallSiteHistory};
use super::probe::{Probe, Timed};
use super::CapabilityWrapper;
use crate::domain::{Capability, HostError, HostErrorKind};
use crate::host::{EvalHost, HostValue};
use crate::safe_clone::{safe_clone, UNDEFINED_PLACEHOLDER};

const ENTRY_POINTS: &[&str] = &["eval"];

#[derive(Debug)]
struct EvalState {
    history: CallSiteHistory<EvalRecord>,
    calls: CallCounters,
}

impl Default for EvalState {
    fn default() -> Self {
        Self { history: CallSiteHistory::default(), calls: CallCounters::new(ENTRY_POINTS) }
    }
}

impl EvalState {
    fn record(&mut self, site: &CallSite, code: &str) -> &mut EvalRecord {
        let record = self.history.record_call(site.trace_id.clone(), site, |header| EvalRecord {
            header,
            code: Value::Null,
            returned_value: Value::Null,
            self_time: None,
        });
        record.code = Value::String(code.to_owned());
        record
    }
}

pub struct EvalWrapper {
    probe: Rc<Probe>,
    host: Rc<dyn EvalHost>,
    state: RefCell<EvalState>,
}

impl EvalWrapper {
    pub fn new(probe: Rc<Probe>, host: Rc<dyn EvalHost>) -> Self {
        Self { probe, host, state: RefCell::new(EvalState::default()) }
    }

    /// Evaluate `code` in global scope.
    ///
    /// # Errors
    /// Re-raises any host error other than an unresolved name.
    pub fn eval(&self, code: &str) -> Result<HostValue, HostError> {
        let site = self.probe.call_site_for_code(code);
        let outcome = self.probe.run(&site.trace_id, || self.host.eval(code));

        let undefined = || Value::String(UNDEFINED_PLACEHOLDER.to_owned());
        let (result, fact, returned, self_time) = match outcome {
            None => (Ok(HostValue::Undefined), None, undefined(), None),
            Some(Timed { value: Ok(value), self_time }) => {
                let returned = safe_clone(&value);
                (Ok(value), Some(facts::USES_GLOBAL_SCOPE), returned, Some(self_time))
            }
            Some(Timed { value: Err(err), self_time }) if err.kind == HostErrorKind::ReferenceError => {
                debug!("eval at {} reads local scope: {err}", site.trace_id);
                (Ok(HostValue::Undefined), Some(facts::USES_LOCAL_SCOPE), undefined(), Some(self_time))
            }
            Some(Timed { value: Err(err), self_time }) => {
                let returned = Value::String(format!("[Exception: {err}]"));
                (Err(err), Some(facts::THROWS), returned, Some(self_time))
            }
        };

        let mut state = self.state.borrow_mut();
        state.calls.bump("eval");
        let record = state.record(&site, code);
        record.returned_value = returned;
        if let Some(fact) = fact {
            record.header.facts.assign(fact);
        }
        if self_time.is_some() {
            record.self_time = self_time;
        }
        result
    }

    /// Record code handed to a timer as a string. It is evaluated by the host
    /// when the timer fires, so the returned value is a fixed sentinel.
    pub fn record_timer_code(&self, site: &CallSite, code: &str, sentinel: &str) {
        let mut state = self.state.borrow_mut();
        let record = state.record(site, code);
        record.returned_value = Value::String(sentinel.to_owned());
    }
}

impl CapabilityWrapper for EvalWrapper {
    fn capability(&self) -> Capability {
        Capability::Eval
    }

    fn collect(&self, snapshot: &mut Snapshot, visible: bool) {
        let state = self.state.borrow();
        state.calls.write_into(&mut snapshot.calls);
        if visible {
            snapshot.eval = Some(state.history.collect());
        }
    }

    fn reset(&self) {
        *self.state.borrow_mut() = EvalState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wrappers::testing;

    fn only_record(wrapper: &EvalWrapper) -> EvalRecord {
        let mut snapshot = Snapshot::default();
        wrapper.collect(&mut snapshot, true);
        let records = snapshot.eval.unwrap_or_default();
        assert_eq!(records.len(), 1);
        records[0].clone()
    }

    #[test]
    fn test_global_scope_success() {
        let host = testing::host();
        let wrapper = EvalWrapper::new(testing::probe(&host), host.clone());

        let value = wrapper.eval("1 + 2").unwrap();
        assert_eq!(value.as_number(), Some(3.0));

        let record = only_record(&wrapper);
        assert!(record.header.facts.check(facts::USES_GLOBAL_SCOPE));
        assert_eq!(record.code, Value::from("1 + 2"));
        assert_eq!(record.returned_value.as_f64(), Some(3.0));
        assert!(record.self_time.is_some());
    }

    #[test]
    fn test_unknown_name_means_local_scope() {
        let host = testing::host();
        let wrapper = EvalWrapper::new(testing::probe(&host), host.clone());

        let value = wrapper.eval("localCounter + 1").unwrap();
        assert!(value.is_undefined());

        let record = only_record(&wrapper);
        assert!(record.header.facts.check(facts::USES_LOCAL_SCOPE));
        assert!(!record.header.facts.check(facts::THROWS));
        assert_eq!(record.returned_value, Value::from(UNDEFINED_PLACEHOLDER));
    }

    #[test]
    fn test_other_errors_are_rethrown() {
        let host = testing::host();
        let wrapper = EvalWrapper::new(testing::probe(&host), host.clone());

        let err = wrapper.eval("throw 'boom'").unwrap_err();
        assert_eq!(err.kind, HostErrorKind::Other);

        let record = only_record(&wrapper);
        assert!(record.header.facts.check(facts::THROWS));
        let shown = record.returned_value.as_str().unwrap_or_default().to_owned();
        assert!(shown.starts_with("[Exception:") && shown.contains("boom"), "{shown}");
    }

    #[test]
    fn test_bypass_skips_evaluation() {
        let host = testing::host();
        let probe = testing::probe(&host);
        let wrapper = EvalWrapper::new(probe.clone(), host.clone());
        let site = probe.call_site_for_code("answer = 42");
        probe.tracer().set_bypass([site.trace_id].into());

        assert!(wrapper.eval("answer = 42").unwrap().is_undefined());
        assert!(host.global("answer").is_none());
        assert_eq!(only_record(&wrapper).self_time, None);
    }

    #[test]
    fn test_hidden_still_counts() {
        let host = testing::host();
        let wrapper = EvalWrapper::new(testing::probe(&host), host.clone());
        wrapper.eval("1").unwrap();
        wrapper.eval("1").unwrap();

        let mut snapshot = Snapshot::default();
        wrapper.collect(&mut snapshot, false);
        assert!(snapshot.eval.is_none());
        assert_eq!(snapshot.calls.get("eval"), Some(&2));

        wrapper.reset();
        let mut snapshot = Snapshot::default();
        wrapper.collect(&mut snapshot, true);
        assert_eq!(snapshot.eval.map(|r| r.len()), Some(0));
        assert_eq!(snapshot.calls.get("eval"), Some(&0));
    }
}
