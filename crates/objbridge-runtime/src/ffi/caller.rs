//! Typed calls through resolved symbols
//!
//! A `TypedCallable` fixes a symbol's signature once, at bind time. The call
//! interface is prepared with libffi from that signature, so any combination
//! of argument and return types can be called without a per-signature
//! function-pointer cast.
//!
//! The declared signature is trusted. If it disagrees with the real native
//! function the call is undefined behavior; nothing here can detect that.

use crate::error::{BridgeResult, LinkError};
use crate::ffi::loader::Symbol;
use crate::ffi::marshal::{read_return, ArgSlot, MarshalContext, MarshalError};
use crate::ffi::types::{ForeignValue, Signature};
use libffi::middle::{Cif, CodePtr};
use libffi::raw;
use std::ffi::c_void;

/// A symbol bound to an explicit signature
#[derive(Clone)]
pub struct TypedCallable {
    symbol: Symbol,
    signature: Signature,
    cif: Cif,
}

impl TypedCallable {
    /// Bind `symbol` to `signature`
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    /// - `symbol` is a function, not a data object
    /// - The function's actual signature matches `signature`
    pub unsafe fn bind(symbol: Symbol, signature: Signature) -> Self {
        let cif = signature.cif();
        Self {
            symbol,
            signature,
            cif,
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Call the function with `args`
    ///
    /// Values are checked against the declared types before anything is
    /// called; a closed library is reported instead of jumping to unmapped
    /// code.
    ///
    /// # Safety
    ///
    /// Calls foreign code; see [`bind`](Self::bind). Pointer arguments must
    /// be valid for whatever the callee does with them.
    pub unsafe fn call(&self, args: &[ForeignValue]) -> BridgeResult<ForeignValue> {
        if !self.symbol.is_live() {
            return Err(LinkError::new(
                "call",
                self.symbol.name(),
                Some("library closed".to_string()),
            )
            .into());
        }

        let params = self.signature.args();
        if args.len() != params.len() {
            return Err(MarshalError::ArityMismatch {
                expected: params.len(),
                got: args.len(),
            }
            .into());
        }

        // Marshal arguments; `ctx` keeps C strings alive until we return.
        let mut ctx = MarshalContext::new();
        let mut slots = args
            .iter()
            .zip(params)
            .map(|(arg, ty)| ctx.encode_arg(arg, ty))
            .collect::<Result<Vec<ArgSlot>, _>>()?;
        let mut arg_ptrs: Vec<*mut c_void> = slots.iter_mut().map(|s| s.as_mut_ptr()).collect();

        let mut ret = ArgSlot::for_type(self.signature.ret());
        let code = CodePtr(self.symbol.address());
        raw::ffi_call(
            self.cif.as_raw_ptr(),
            Some(*code.as_safe_fun()),
            ret.as_mut_ptr(),
            arg_ptrs.as_mut_ptr(),
        );

        Ok(read_return(self.signature.ret(), ret.as_ptr()))
    }
}

impl std::fmt::Debug for TypedCallable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} {}", self.symbol, self.signature)
    }
}
