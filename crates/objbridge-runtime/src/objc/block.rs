//! Closures laid out as runtime blocks
//!
//! A block is a fixed binary structure the runtime reads directly:
//!
//! ```text
//! BlockLayout                      BlockDescriptor
//! +--------------------+           +--------------------+
//! | isa (marker)       |    +----> | reserved           |
//! | flags   | reserved |    |      | size               |
//! | invoke             |    |      | signature (opt.)   |
//! | descriptor --------+----+      +--------------------+
//! +--------------------+
//! ```
//!
//! `invoke` receives the block's own address first, then the declared
//! arguments. The layout, descriptor, signature string and invoke entry point
//! are all owned by the [`Closure`] and live exactly as long as it does.
//! The "needs free" flag is never set, so the runtime never frees Rust-owned
//! memory. It may still copy the block: a runtime copy lives on the foreign
//! heap but points at this closure's descriptor and invoke entry point, so
//! it must not outlive the [`Closure`].

use crate::error::{BridgeError, BridgeResult};
use crate::ffi::callbacks::{create_callback, NativeCallback};
use crate::ffi::caller::TypedCallable;
use crate::ffi::marshal::MarshalError;
use crate::ffi::types::{ForeignType, ForeignValue, Signature};
use crate::objc::encoding;
use std::ffi::{c_void, CStr, CString};
use std::fmt;
use std::mem::size_of;
use std::os::raw::{c_char, c_ulong};
use std::ptr;

/// Descriptor carries a type signature
pub const BLOCK_HAS_SIGNATURE: i32 = 1 << 30;

/// Block header consumed by the runtime
#[repr(C)]
#[derive(Debug)]
pub struct BlockLayout {
    pub isa: *const c_void,
    pub flags: i32,
    pub reserved: i32,
    pub invoke: *const c_void,
    pub descriptor: *const BlockDescriptor,
}

#[repr(C)]
#[derive(Debug)]
pub struct BlockDescriptor {
    pub reserved: c_ulong,
    pub size: c_ulong,
    /// Read by the runtime only when `BLOCK_HAS_SIGNATURE` is set
    pub signature: *const c_char,
}

/// An owned block wrapping a Rust callable
pub struct Closure {
    layout: Box<BlockLayout>,
    descriptor: Box<BlockDescriptor>,
    signature: Option<CString>,
    callback: NativeCallback,
    declared: Signature,
}

impl Closure {
    /// Address to hand to the runtime as a block argument
    pub fn as_ptr(&self) -> *mut c_void {
        &*self.layout as *const BlockLayout as *mut c_void
    }

    pub fn flags(&self) -> i32 {
        self.layout.flags
    }

    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    pub fn descriptor(&self) -> &BlockDescriptor {
        &self.descriptor
    }

    pub fn signature(&self) -> Option<&CStr> {
        self.signature.as_deref()
    }

    /// Invoke signature, with the block itself as first argument
    pub fn declared(&self) -> &Signature {
        &self.declared
    }

    /// Call the block the way the runtime would
    ///
    /// # Safety
    ///
    /// Pointer arguments must be valid for the wrapped callable.
    pub unsafe fn invoke(&self, args: &[ForeignValue]) -> BridgeResult<ForeignValue> {
        let callable = TypedCallable::bind(self.callback.symbol()?, self.declared.clone());
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(ForeignValue::Pointer(self.as_ptr()));
        full.extend_from_slice(args);
        callable.call(&full)
    }
}

impl From<&Closure> for ForeignValue {
    fn from(closure: &Closure) -> Self {
        ForeignValue::Pointer(closure.as_ptr())
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("address", &self.as_ptr())
            .field("flags", &format_args!("{:#x}", self.layout.flags))
            .field("signature", &self.signature)
            .field("declared", &self.declared.to_string())
            .finish()
    }
}

/// Builds closures tagged with the runtime's block marker
#[derive(Debug, Clone, Copy)]
pub struct ClosureBuilder {
    marker: *const c_void,
}

impl ClosureBuilder {
    pub(crate) fn new(marker: *const c_void) -> Self {
        Self { marker }
    }

    pub fn marker(&self) -> *const c_void {
        self.marker
    }

    /// Wrap `callable` as a block taking `args` and returning `ret`
    ///
    /// `callable` receives the declared arguments only (not the block
    /// pointer). When `signature` is given it is stored in the descriptor and
    /// must describe the invoke function, block argument included: `"v@?"`
    /// is the minimum. An empty signature is rejected.
    pub fn build<F>(
        &self,
        callable: F,
        ret: ForeignType,
        args: Vec<ForeignType>,
        signature: Option<&str>,
    ) -> BridgeResult<Closure>
    where
        F: Fn(&[ForeignValue]) -> ForeignValue + 'static,
    {
        let declared = Signature::new(ret, args).with_leading(&[ForeignType::Block]);

        let signature = match signature {
            Some("") => {
                return Err(BridgeError::Configuration(
                    "closure signature must not be empty (the minimum is \"v@?\")".to_string(),
                ))
            }
            Some(text) => {
                encoding::verify(text, &declared)?;
                Some(CString::new(text).map_err(|e| MarshalError::InvalidString(e.to_string()))?)
            }
            None => None,
        };

        let callback = create_callback(move |values| callable(&values[1..]), declared.clone())?;

        let descriptor = Box::new(BlockDescriptor {
            reserved: 0,
            size: size_of::<BlockLayout>() as c_ulong,
            signature: signature.as_ref().map_or(ptr::null(), |s| s.as_ptr()),
        });
        let layout = Box::new(BlockLayout {
            isa: self.marker,
            flags: if signature.is_some() { BLOCK_HAS_SIGNATURE } else { 0 },
            reserved: 0,
            invoke: callback.fn_ptr(),
            descriptor: &*descriptor,
        });

        Ok(Closure {
            layout,
            descriptor,
            signature,
            callback,
            declared,
        })
    }
}
