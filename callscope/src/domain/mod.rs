//! Domain model for callscope
//!
//! This module contains core domain types and errors that provide:
//! - Compile-time safety via newtype pattern
//! - Self-documenting function signatures
//! - Structured error handling

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use types::{Capability, Fidelity, Handle, PendingKind, TaskId, WorkerId};

pub use errors::{ConfigError, ExportError, HostError, HostErrorKind, RegistryError};
