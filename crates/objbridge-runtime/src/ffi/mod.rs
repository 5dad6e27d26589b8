//! Foreign Function Interface (FFI) infrastructure
//!
//! The layer below the object runtime:
//! - Type descriptors and values for the C boundary
//! - Type marshaling (ForeignValue ↔ C memory)
//! - Dynamic library loading and symbol resolution
//! - Typed calls through resolved symbols
//! - Native callbacks wrapping Rust closures
//!
//! # Safety
//!
//! FFI operations involve `unsafe` code and careful memory management.
//! All unsafe code is isolated in this module and `objc` behind typed wrappers.

pub mod callbacks;
pub mod caller;
pub mod loader;
pub mod marshal;
pub mod types;

pub use callbacks::{create_callback, NativeCallback};
pub use caller::TypedCallable;
pub use loader::{LibraryHandle, Symbol};
pub use marshal::{MarshalContext, MarshalError};
pub use objbridge_config::OpenMode;
pub use types::{ForeignType, ForeignValue, Signature};
