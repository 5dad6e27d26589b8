//! Object runtime bridge
//!
//! Built on the `ffi` layer:
//! - `runtime`: the raw runtime entry points, resolved by name
//! - `dispatch`: message sends, selectors, object construction, lookups
//! - `encoding`: type-encoding parsing and verification
//! - `class_builder`: classes created and registered at run time
//! - `block`: closures with the runtime's block layout

pub mod block;
pub mod class_builder;
pub mod dispatch;
pub mod encoding;
pub mod runtime;

pub use block::{BlockDescriptor, BlockLayout, Closure, ClosureBuilder, BLOCK_HAS_SIGNATURE};
pub use class_builder::{ClassDescriptor, Registered, RegisteredClass, Unregistered};
pub use dispatch::{Dispatch, MessageDispatcher, ObjectRef, Selector};
pub use runtime::{EntryAddresses, EntryPoints};
