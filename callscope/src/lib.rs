//! # callscope - Call-Site Telemetry for Scheduling and Eval Primitives
//!
//! callscope sits between a program and its host's asynchronous scheduling
//! and evaluation primitives, attributes every call to the source location
//! that made it, and keeps running per-call-site statistics that an external
//! observer reads as snapshots or as deltas between snapshots.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Observed Program                         │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ set_timeout, eval, post_task, Worker ...
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Globals ── InterceptionRegistry: installed? ──┐                │
//! │     │ yes                                      │ no             │
//! │     ▼                                          │                │
//! │  ┌──────────────┐   ┌──────────────┐           │                │
//! │  │   Wrappers   │──▶│ CallSite     │           │                │
//! │  │ (6 families) │   │ Tracer       │           │                │
//! │  └──────┬───────┘   └──────────────┘           │                │
//! │         │ history per traceId                  │                │
//! │         ▼                                      │                │
//! │  ┌──────────────┐   ┌──────────────┐           │                │
//! │  │  Aggregator  │──▶│   Snapshot   │──▶ DeltaEncoder ──▶ observer│
//! │  └──────────────┘   └──────────────┘           │                │
//! └────────────────────────────────────────────────┼────────────────┘
//!                         │                        │
//!                         ▼                        ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │          Host traits (TimerHost, EvalHost, WorkerHost ...)      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! ### Core Pipeline Modules
//!
//! - [`host`]: host interface traits, dynamic values and a deterministic
//!   [`VirtualHost`](host::VirtualHost)
//! - [`tracer`]: turns a captured stack into a call site (`traceId`, frames,
//!   domain), with bypass and pause policy
//!   - Full fidelity hashes the whole filtered stack and caches parsed traces
//!   - Reduced fidelity keys on the innermost usable frame only
//! - [`wrappers`]: one wrapper per capability (timers, eval, animation, idle,
//!   scheduler, worker) keeping history and pending registrations
//! - [`aggregator`]: installs wrappers, builds snapshots, resets and
//!   force-cancels
//!
//! ### Supporting Modules
//!
//! - [`classification`]: same-origin / external / host-package / unknown
//! - [`safe_clone`]: never-failing JSON rendering of host values
//! - [`validation`]: delay and handle checks shared by the wrappers
//! - [`globals`] / [`registry`]: the program-facing entry points and their
//!   routing
//! - [`config`], [`export`], [`cli`], [`demo`]: configuration, session export
//!   and the command-line tool
//! - [`domain`]: identifiers and error types
//!
//! ## Key Concepts
//!
//! - **Call site**: where an intercepted call came from, identified by `traceId`
//! - **History record**: cumulative statistics for one call site and entry point
//! - **Online registration**: a pending operation, keyed by host handle
//! - **Facts**: bit flags for validation findings (`BAD_DELAY`, `NOT_FOUND` ...),
//!   decoded with `callscope_common::facts`

pub mod aggregator;
pub mod classification;
pub mod cli;
pub mod config;
pub mod demo;
pub mod domain;
pub mod export;
pub mod globals;
pub mod host;
pub mod registry;
pub mod safe_clone;
pub mod tracer;
pub mod validation;
pub mod wrappers;
