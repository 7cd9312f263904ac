//! Idle-period callbacks.

use callscope_common::facts::tables::idle as facts;
use callscope_common::{ClearRecord, DisplayValue, IdleRecord, PendingStats, Snapshot, TraceId};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::history::{
    handle_display, record_clear, CallCounters, CallSiteHistory, CancelLookup, OnlineRegistry,
};
use super::probe::Probe;
use super::CapabilityWrapper;
use crate::domain::{Capability, Handle, PendingKind};
use crate::host::{Callback, HostValue, IdleCallback, IdleDeadline, IdleHost, IdleOptions};
use crate::validation::validate_delay;

const ENTRY_POINTS: &[&str] = &["request_idle_callback", "cancel_idle_callback"];

#[derive(Debug, Clone)]
struct IdleRegistration {
    trace_id: TraceId,
    timeout: DisplayValue,
}

#[derive(Debug)]
struct IdleState {
    requests: CallSiteHistory<IdleRecord>,
    cancels: CallSiteHistory<ClearRecord>,
    online: OnlineRegistry<Handle, IdleRegistration>,
    calls: CallCounters,
}

impl Default for IdleState {
    fn default() -> Self {
        Self {
            requests: CallSiteHistory::default(),
            cancels: CallSiteHistory::default(),
            online: OnlineRegistry::default(),
            calls: CallCounters::new(ENTRY_POINTS),
        }
    }
}

impl IdleState {
    fn finish_fire(
        &mut self,
        handle: Handle,
        trace_id: &TraceId,
        deadline: IdleDeadline,
        self_time: Option<f64>,
    ) {
        if let Some(registration) = self.online.take(&handle) {
            if let Some(record) = self.requests.get_mut(&registration.trace_id) {
                record.pending.went_offline();
            }
        }
        if let Some(record) = self.requests.get_mut(trace_id) {
            record.did_timeout = Some(deadline.did_timeout);
            if self_time.is_some() {
                record.self_time = self_time;
            }
        }
    }
}

pub struct IdleWrapper {
    probe: Rc<Probe>,
    host: Rc<dyn IdleHost>,
    state: Rc<RefCell<IdleState>>,
}

impl IdleWrapper {
    pub fn new(probe: Rc<Probe>, host: Rc<dyn IdleHost>) -> Self {
        Self { probe, host, state: Rc::new(RefCell::new(IdleState::default())) }
    }

    pub fn request_idle_callback(
        &self,
        callback: Callback<IdleDeadline>,
        options: Option<IdleOptions>,
    ) -> Handle {
        let site = self.probe.call_site_for(&callback);
        let checked = validate_delay(options.and_then(|o| o.timeout));
        let description = callback.display_name().to_owned();

        let state = Rc::downgrade(&self.state);
        let probe = Rc::clone(&self.probe);
        let trace_id = site.trace_id.clone();
        let fire: IdleCallback = Box::new(move |handle, deadline| {
            let ran = probe.run(&trace_id, || callback.call(&deadline));
            if let Some(state) = Weak::upgrade(&state) {
                state.borrow_mut().finish_fire(handle, &trace_id, deadline, ran.map(|t| t.self_time));
            }
        });
        let handle = self.host.request_idle_callback(fire, options);

        let mut state = self.state.borrow_mut();
        state.calls.bump("request_idle_callback");
        state.online.register(
            handle,
            IdleRegistration { trace_id: site.trace_id.clone(), timeout: checked.display.clone() },
        );
        let record = state.requests.record_call(site.trace_id.clone(), &site, |header| IdleRecord {
            header,
            handler: 0,
            callback: String::new(),
            delay: DisplayValue::Unset,
            did_timeout: None,
            pending: PendingStats::default(),
            self_time: None,
        });
        record.handler = u64::from(handle.0);
        record.callback = description;
        record.delay = checked.display;
        record.pending.went_online();
        if checked.is_bad {
            record.header.facts.assign(facts::BAD_DELAY);
        }
        handle
    }

    pub fn cancel_idle_callback(&self, value: &HostValue) {
        let site = self.probe.call_site(None);
        self.host.cancel_idle_callback(value);

        let mut state = self.state.borrow_mut();
        state.calls.bump("cancel_idle_callback");
        let (handler, delay, fact) = match state.online.lookup_cancel(value) {
            CancelLookup::BadHandler(tagged) => (tagged, DisplayValue::Unset, Some(facts::BAD_HANDLER)),
            CancelLookup::NotFound(handle) => {
                (handle_display(handle), DisplayValue::not_found(), Some(facts::NOT_FOUND))
            }
            CancelLookup::Found(handle, registration) => {
                if let Some(record) = state.requests.get_mut(&registration.trace_id) {
                    record.pending.went_offline();
                    record.pending.record_cancel(&site.trace_id);
                }
                (handle_display(handle), registration.timeout, None)
            }
        };
        record_clear(&mut state.cancels, &site, handler, Some(delay), fact);
    }
}

impl CapabilityWrapper for IdleWrapper {
    fn capability(&self) -> Capability {
        Capability::Idle
    }

    fn collect(&self, snapshot: &mut Snapshot, visible: bool) {
        let state = self.state.borrow();
        state.calls.write_into(&mut snapshot.calls);
        snapshot.online.insert(PendingKind::IdleCallback.name().to_owned(), state.online.len() as u64);
        if visible {
            snapshot.request_idle_callback = Some(state.requests.collect());
            snapshot.cancel_idle_callback = Some(state.cancels.collect());
        }
    }

    fn reset(&self) {
        *self.state.borrow_mut() = IdleState::default();
    }
}
