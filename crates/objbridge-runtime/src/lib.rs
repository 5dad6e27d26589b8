//! objbridge runtime - a native bridge into a message-passing object runtime
//!
//! This library drives a dynamically-typed object runtime (the Objective-C
//! runtime ABI) from first principles:
//! - Opening shared libraries and resolving raw symbols
//! - Calling through the universal message-dispatch entry points with
//!   caller-declared signatures
//! - Creating and registering new runtime classes
//! - Building closures laid out like the runtime's native blocks
//! - Releasing every acquired resource in reverse order on every exit path
//!
//! Nothing here is compiled against the runtime's headers. Every entry point
//! is resolved by name and every call signature is declared by the caller.

/// objbridge runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod error;
pub mod ffi;
pub mod lifetime;
pub mod objc;
pub mod session;

// Re-export commonly used types
pub use error::{BridgeError, BridgeResult, LinkError, LookupKind};
pub use ffi::{
    create_callback, ForeignType, ForeignValue, LibraryHandle, MarshalError, NativeCallback, OpenMode,
    Signature, Symbol, TypedCallable,
};
pub use lifetime::{scope, CleanupStack};
pub use objc::{
    ClassDescriptor, Closure, ClosureBuilder, Dispatch, EntryAddresses, EntryPoints,
    MessageDispatcher, ObjectRef, Registered, RegisteredClass, Selector, Unregistered,
};
pub use objbridge_config::BridgeConfig;
pub use session::Session;
