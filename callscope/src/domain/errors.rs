//! Structured error types for callscope
//!
//! Using thiserror for automatic Display implementation and error chaining.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use super::types::Capability;

/// Category of a failure raised by host-evaluated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostErrorKind {
    /// An identifier could not be resolved in global scope
    ReferenceError,
    SyntaxError,
    /// Anything thrown explicitly by the evaluated code
    Other,
}

impl fmt::Display for HostErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HostErrorKind::ReferenceError => "ReferenceError",
            HostErrorKind::SyntaxError => "SyntaxError",
            HostErrorKind::Other => "Error",
        })
    }
}

/// An exception surfaced by the host.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct HostError {
    pub kind: HostErrorKind,
    pub message: String,
}

impl HostError {
    pub fn new(kind: HostErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Capability '{0}' cannot be uninstalled once installed")]
    Irreversible(Capability),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to write export file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Codec(#[from] callscope_common::CodecError),
}
