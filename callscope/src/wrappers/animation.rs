//! Animation-frame requests.
//!
//! Same request/cancel pairing as timers, one-shot only. Besides lifetime
//! counters each request record carries a calls-per-second figure, sampled
//! on the request path once a full window has passed since the last sample.

use callscope_common::facts::tables::animation as facts;
use callscope_common::{AnimationRecord, ClearRecord, PendingStats, Snapshot, TraceId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use super::history::{
    handle_display, record_clear, CallCounters, CallSiteHistory, CancelLookup, OnlineRegistry,
};
use super::probe::Probe;
use super::CapabilityWrapper;
use crate::domain::{Capability, Handle, PendingKind};
use crate::host::{AnimationHost, Callback, FrameCallback, HostValue};
use crate::validation::round_fixed;

const ENTRY_POINTS: &[&str] = &["request_animation_frame", "cancel_animation_frame"];

/// Minimum time between two calls-per-second samples.
pub const CPS_WINDOW_MS: f64 = 1000.0;

#[derive(Debug)]
struct AnimationState {
    requests: CallSiteHistory<AnimationRecord>,
    cancels: CallSiteHistory<ClearRecord>,
    online: OnlineRegistry<Handle, TraceId>,
    calls: CallCounters,
    last_sample: Option<f64>,
    /// `calls` of each request record at the previous sample
    sampled_calls: HashMap<TraceId, u64>,
}

impl Default for AnimationState {
    fn default() -> Self {
        Self {
            requests: CallSiteHistory::default(),
            cancels: CallSiteHistory::default(),
            online: OnlineRegistry::default(),
            calls: CallCounters::new(ENTRY_POINTS),
            last_sample: None,
            sampled_calls: HashMap::new(),
        }
    }
}

impl AnimationState {
    fn finish_fire(&mut self, handle: Handle, trace_id: &TraceId, self_time: Option<f64>) {
        if let Some(owner) = self.online.take(&handle) {
            if let Some(record) = self.requests.get_mut(&owner) {
                record.pending.went_offline();
            }
        }
        if let (Some(self_time), Some(record)) = (self_time, self.requests.get_mut(trace_id)) {
            record.self_time = Some(self_time);
        }
    }

    /// Refresh `cps` once a full window has passed. The first call only sets
    /// the baseline.
    fn sample(&mut self, now: f64) {
        let Some(last) = self.last_sample else {
            self.last_sample = Some(now);
            self.rebase();
            return;
        };
        let elapsed = now - last;
        if elapsed < CPS_WINDOW_MS {
            return;
        }
        let seconds = elapsed / 1000.0;
        for record in self.requests.values_mut() {
            let previous = self.sampled_calls.get(record.header.trace_id()).copied().unwrap_or(0);
            let delta = record.header.calls.saturating_sub(previous);
            #[allow(clippy::cast_precision_loss)]
            let cps = delta as f64 / seconds;
            record.cps = Some(round_fixed(cps));
        }
        self.rebase();
        self.last_sample = Some(now);
    }

    fn rebase(&mut self) {
        self.sampled_calls = self
            .requests
            .values_mut()
            .map(|record| (record.header.trace_id().clone(), record.header.calls))
            .collect();
    }
}

pub struct AnimationWrapper {
    probe: Rc<Probe>,
    host: Rc<dyn AnimationHost>,
    state: Rc<RefCell<AnimationState>>,
}

impl AnimationWrapper {
    pub fn new(probe: Rc<Probe>, host: Rc<dyn AnimationHost>) -> Self {
        Self { probe, host, state: Rc::new(RefCell::new(AnimationState::default())) }
    }

    pub fn request_animation_frame(&self, callback: Callback<f64>) -> Handle {
        let site = self.probe.call_site_for(&callback);
        let description = callback.display_name().to_owned();

        let state = Rc::downgrade(&self.state);
        let probe = Rc::clone(&self.probe);
        let trace_id = site.trace_id.clone();
        let fire: FrameCallback = Box::new(move |handle, timestamp| {
            let ran = probe.run(&trace_id, || callback.call(&timestamp));
            if let Some(state) = Weak::upgrade(&state) {
                state.borrow_mut().finish_fire(handle, &trace_id, ran.map(|t| t.self_time));
            }
        });
        let handle = self.host.request_animation_frame(fire);

        let mut state = self.state.borrow_mut();
        state.sample(self.probe.now());
        state.calls.bump("request_animation_frame");
        state.online.register(handle, site.trace_id.clone());
        let record = state.requests.record_call(site.trace_id.clone(), &site, |header| {
            AnimationRecord {
                header,
                handler: 0,
                callback: String::new(),
                pending: PendingStats::default(),
                self_time: None,
                cps: None,
            }
        });
        record.handler = u64::from(handle.0);
        record.callback = description;
        record.pending.went_online();
        handle
    }

    pub fn cancel_animation_frame(&self, value: &HostValue) {
        let site = self.probe.call_site(None);
        self.host.cancel_animation_frame(value);

        let mut state = self.state.borrow_mut();
        state.calls.bump("cancel_animation_frame");
        let (handler, fact) = match state.online.lookup_cancel(value) {
            CancelLookup::BadHandler(tagged) => (tagged, Some(facts::BAD_HANDLER)),
            CancelLookup::NotFound(handle) => (handle_display(handle), Some(facts::NOT_FOUND)),
            CancelLookup::Found(handle, owner) => {
                if let Some(record) = state.requests.get_mut(&owner) {
                    record.pending.went_offline();
                    record.pending.record_cancel(&site.trace_id);
                }
                (handle_display(handle), None)
            }
        };
        record_clear(&mut state.cancels, &site, handler, None, fact);
    }
}

impl CapabilityWrapper for AnimationWrapper {
    fn capability(&self) -> Capability {
        Capability::Animation
    }

    fn collect(&self, snapshot: &mut Snapshot, visible: bool) {
        let state = self.state.borrow();
        state.calls.write_into(&mut snapshot.calls);
        snapshot.online.insert(PendingKind::AnimationFrame.name().to_owned(), state.online.len() as u64);
        if visible {
            snapshot.request_animation_frame = Some(state.requests.collect());
            snapshot.cancel_animation_frame = Some(state.cancels.collect());
        }
    }

    fn reset(&self) {
        *self.state.borrow_mut() = AnimationState::default();
    }
}
