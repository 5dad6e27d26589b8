//! Bridge error taxonomy
//!
//! Every failure the bridge can detect is raised at the call that discovered
//! it. There are no retries. A caller-declared signature that disagrees with
//! the real foreign function is not detectable and is not represented here.

use crate::ffi::MarshalError;
use std::fmt;
use thiserror::Error;

/// Diagnostic used when the platform reports no error text
pub const UNKNOWN_ERROR: &str = "<unknown error>";

/// Failure of a dynamic-linking operation (open, resolve, close)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkError {
    /// Operation that failed, e.g. `dlopen`
    pub operation: &'static str,
    /// Argument the operation was called with (path or symbol name)
    pub argument: String,
    /// Text read from the platform last-error slot right after the failure
    pub diagnostic: Option<String>,
}

impl LinkError {
    pub fn new(
        operation: &'static str,
        argument: impl Into<String>,
        diagnostic: Option<String>,
    ) -> Self {
        Self {
            operation,
            argument: argument.into(),
            diagnostic,
        }
    }

    /// Diagnostic text, or the unknown-error sentinel
    pub fn diagnostic(&self) -> &str {
        self.diagnostic.as_deref().unwrap_or(UNKNOWN_ERROR)
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to {}", self.operation)?;
        if !self.argument.is_empty() {
            write!(f, " {}", self.argument)?;
        }
        write!(f, ": {}", self.diagnostic())
    }
}

impl std::error::Error for LinkError {}

/// Kind of named entity a lookup was looking for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    Class,
    Protocol,
    Superclass,
    InstanceVariable,
}

impl fmt::Display for LookupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LookupKind::Class => "class",
            LookupKind::Protocol => "protocol",
            LookupKind::Superclass => "superclass",
            LookupKind::InstanceVariable => "instance variable",
        };
        f.write_str(name)
    }
}

/// Errors raised by the bridge
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Object or class-pair construction returned nil
    #[error("Allocation failed: {0}")]
    Allocation(String),

    #[error("{kind} not found: {name}")]
    Lookup { kind: LookupKind, name: String },

    /// The runtime rejected a mutation, or a signature was unusable
    #[error("Configuration rejected: {0}")]
    Configuration(String),

    #[error(transparent)]
    Marshal(#[from] MarshalError),

    /// A release action panicked during unwinding
    #[error("Cleanup failed: {0}")]
    Cleanup(String),
}

impl BridgeError {
    pub fn lookup(kind: LookupKind, name: impl Into<String>) -> Self {
        BridgeError::Lookup {
            kind,
            name: name.into(),
        }
    }
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
