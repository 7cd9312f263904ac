//! Snapshot export
//!
//! Writes the latest snapshot together with the delta stream that produced
//! it, so an observer can replay the session offline.

pub mod snapshot_export;

pub use snapshot_export::SnapshotExporter;
