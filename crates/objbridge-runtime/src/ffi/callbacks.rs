//! Native callbacks - Rust closures callable as C function pointers
//!
//! Provides trampoline generation for Rust→C function pointer conversion.
//! A libffi closure is synthesized for the declared signature; when foreign
//! code calls it, the trampoline:
//! 1. Reads each C argument into a `ForeignValue` (C strings stay raw
//!    pointers)
//! 2. Calls the Rust closure
//! 3. Writes the result back in C layout
//!
//! Panics never cross back into foreign frames. A panicking closure, or one
//! returning a value of the wrong type, is logged and the foreign caller
//! receives a zeroed return value.

use crate::error::{BridgeError, BridgeResult, LinkError};
use crate::ffi::loader::Symbol;
use crate::ffi::marshal::{read_argument, write_return, write_zeroed};
use crate::ffi::types::{ForeignType, ForeignValue, Signature};
use libffi::low;
use libffi::middle::Closure;
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use tracing::error;

type CallbackFn = Box<dyn Fn(&[ForeignValue]) -> ForeignValue>;

struct CallbackState {
    signature: Signature,
    func: CallbackFn,
}

/// A Rust closure wrapped as a native entry point
///
/// The entry point is valid for as long as this value lives.
pub struct NativeCallback {
    // Declared before `state`: the closure borrows it and must drop first.
    closure: Closure<'static>,
    state: Box<CallbackState>,
}

impl NativeCallback {
    /// Native entry point foreign code can call
    pub fn fn_ptr(&self) -> *const c_void {
        *self.closure.code_ptr() as *const c_void
    }

    pub fn signature(&self) -> &Signature {
        &self.state.signature
    }

    /// The entry point as a callable symbol
    pub fn symbol(&self) -> Result<Symbol, LinkError> {
        // SAFETY: the code pointer stays valid while `self` is alive.
        unsafe { Symbol::from_raw("<callback>", self.fn_ptr()) }
    }
}

impl std::fmt::Debug for NativeCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NativeCallback {} @ {:p}", self.state.signature, self.fn_ptr())
    }
}

/// Create a C-callable entry point for `func`
///
/// `func` receives the arguments in declaration order and must return a
/// value matching the declared return type (`ForeignValue::Void` for void).
pub fn create_callback<F>(func: F, signature: Signature) -> BridgeResult<NativeCallback>
where
    F: Fn(&[ForeignValue]) -> ForeignValue + 'static,
{
    if signature.args().iter().any(|t| matches!(t, ForeignType::Void)) {
        return Err(BridgeError::Configuration(format!(
            "void is not a valid argument type in callback signature {}",
            signature
        )));
    }

    let state = Box::new(CallbackState {
        signature,
        func: Box::new(func),
    });
    // SAFETY: `state` is heap-allocated and owned by the NativeCallback next
    // to the closure, which is dropped first.
    let userdata: &'static CallbackState = unsafe { &*(state.as_ref() as *const CallbackState) };
    let closure = Closure::new(userdata.signature.cif(), trampoline, userdata);

    Ok(NativeCallback { closure, state })
}

unsafe extern "C" fn trampoline(
    _cif: &low::ffi_cif,
    result: &mut c_void,
    args: *const *const c_void,
    state: &CallbackState,
) {
    let ret_ty = state.signature.ret();
    let ret_ptr = result as *mut c_void as *mut u8;

    let values: Vec<ForeignValue> = state
        .signature
        .args()
        .iter()
        .enumerate()
        .map(|(i, ty)| read_argument(ty, *args.add(i) as *const u8))
        .collect();

    match panic::catch_unwind(AssertUnwindSafe(|| (state.func)(&values))) {
        Ok(value) => {
            if let Err(err) = write_return(ret_ty, &value, ret_ptr) {
                error!(signature = %state.signature, error = %err, "callback returned an unusable value");
                write_zeroed(ret_ty, ret_ptr);
            }
        }
        Err(_) => {
            error!(signature = %state.signature, "callback panicked; returning zero");
            write_zeroed(ret_ty, ret_ptr);
        }
    }
}
