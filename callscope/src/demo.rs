//! Scripted workload for the `demo` command.
//!
//! Plays a small single-page application on the [`VirtualHost`]: a render
//! loop, polling, a legacy string-code interval, a third-party tag with bad
//! arguments, eval with and without local names, prioritized tasks, idle
//! work, a background worker and an extension content script. Each source
//! is given its own stack so it shows up as a separate call site.

use log::debug;
use std::rc::Rc;

use crate::domain::{Handle, HostError};
use crate::globals::{Globals, Worker};
use crate::host::script::render;
use crate::host::{
    AbortController, Callback, HostValue, IdleOptions, TaskOptions, TaskPriority, VirtualHost,
    WorkerEvent,
};

/// Origin the workload's first-party scripts are served from.
pub const APP_ORIGIN: &str = "https://app.test";

const WORKER_SCRIPT: &str = "/js/crunch.worker.js";

/// Milliseconds of virtual time per round.
const ROUND_MS: f64 = 250.0;

pub struct DemoWorkload {
    host: Rc<VirtualHost>,
    globals: Globals,
    ticker: Option<Handle>,
    worker: Option<Worker>,
    on_result: Callback<WorkerEvent>,
}

impl DemoWorkload {
    pub fn new(host: Rc<VirtualHost>, globals: Globals) -> Self {
        Self {
            host,
            globals,
            ticker: None,
            worker: None,
            on_result: Callback::named("onResult", |event: &WorkerEvent| {
                debug!("worker result: {}", render(&event.data));
            }),
        }
    }

    /// Run one round and let `ROUND_MS` of virtual time pass.
    ///
    /// # Errors
    /// Fails if the worker cannot be constructed.
    pub fn run_round(&mut self, round: u32) -> Result<(), HostError> {
        self.render_loop();
        self.polling(round);
        self.legacy_ticker(round);
        self.third_party();
        self.evaluation(round);
        self.tasks(round);
        self.idle_work();
        self.background(round)?;
        self.extension();

        self.host.advance(ROUND_MS);
        self.host.run_idle(5.0);
        Ok(())
    }

    fn at(&self, frames: &[&str]) {
        self.host.set_stack(frames);
    }

    fn render_loop(&self) {
        self.at(&["render (https://app.test/js/ui.js:42:7)", "main (https://app.test/js/main.js:3:1)"]);
        let draw = Callback::named("draw", |_: &f64| {});
        for _ in 0..3 {
            self.globals.request_animation_frame(draw.clone());
            self.host.run_animation_frame();
        }
    }

    fn polling(&self, round: u32) {
        self.at(&["schedulePoll (https://app.test/js/poll.js:12:5)", "main (https://app.test/js/main.js:9:1)"]);
        let handle = self.globals.set_timeout(Callback::named("poll", |_: &()| {}), Some(200.0));
        if round % 2 == 1 {
            self.at(&["cancelPoll (https://app.test/js/poll.js:30:5)"]);
            self.globals.clear_timeout(&handle.into());
        }
    }

    fn legacy_ticker(&mut self, round: u32) {
        self.at(&["startTicker (https://app.test/js/legacy.js:77:3)"]);
        match (round, self.ticker) {
            (0, None) => self.ticker = Some(self.globals.set_interval("ticks = 1 + 1", Some(100.0))),
            (2.., Some(handle)) => {
                self.at(&["stopTicker (https://app.test/js/legacy.js:90:3)"]);
                self.globals.clear_interval(&handle.into());
                self.ticker = None;
            }
            _ => {}
        }
    }

    fn third_party(&self) {
        self.at(&["https://cdn.tracker.example/t.js:1:900"]);
        self.globals.set_timeout(Callback::new(|_: &()| {}), Some(-5.0));
        self.globals.clear_timeout(&HostValue::Number(0.0));
    }

    fn evaluation(&self, round: u32) {
        self.at(&["loadConfig (https://app.test/js/config.js:8:3)"]);
        self.host.set_global("round", HostValue::from(f64::from(round)));
        for code in ["round * 2 + 1", "userId * 2"] {
            match self.globals.eval(code) {
                Ok(value) => debug!("eval {code:?} = {}", render(&value)),
                Err(err) => debug!("eval {code:?} raised {err}"),
            }
        }
    }

    fn tasks(&self, round: u32) {
        self.at(&["prefetch (https://app.test/js/net.js:20:9)"]);
        let controller = AbortController::new();
        self.globals.post_task(
            Callback::named("prefetch", |_: &()| {}),
            TaskOptions {
                priority: Some(TaskPriority::Background),
                delay: Some(10.0),
                signal: Some(controller.signal()),
            },
        );
        if round % 2 == 1 {
            controller.abort();
        }

        self.at(&["chunkedWork (https://app.test/js/net.js:55:3)"]);
        self.globals.yield_now(Box::new(|| {}));
    }

    fn idle_work(&self) {
        self.at(&["queueMetrics (https://app.test/js/metrics.js:4:1)"]);
        self.globals.request_idle_callback(
            Callback::named("flushMetrics", |_| {}),
            Some(IdleOptions { timeout: Some(500.0) }),
        );
    }

    fn background(&mut self, round: u32) -> Result<(), HostError> {
        self.at(&["startWorker (https://app.test/js/main.js:30:14)"]);
        if self.worker.is_none() {
            let worker = self.globals.spawn_worker(WORKER_SCRIPT)?;
            worker.set_onmessage(Some(Callback::named("onmessage", |_: &WorkerEvent| {})));
            worker.add_event_listener("message", self.on_result.clone());
            worker.add_event_listener("message", self.on_result.clone());
            self.worker = Some(worker);
        }
        if let Some(worker) = &self.worker {
            worker.post_message(HostValue::from(f64::from(round)));
            self.host.emit(worker.id(), "message", HostValue::from(f64::from(round * round)));
        }
        Ok(())
    }

    fn extension(&self) {
        self.at(&["inject (extension://abcdef/content.js:4:2)"]);
        self.globals.set_timeout(Callback::named("inject", |_: &()| {}), None);
    }
}
