//! Type marshaling - ForeignValue ↔ C memory
//!
//! Provides the two directions every synthesized call needs:
//! - `MarshalContext::encode_arg()`: lay a value out in C argument storage
//! - `read_value()` / `read_return()`: read C storage back into a value
//!
//! # Memory Safety
//!
//! - C strings created for arguments are tracked in `MarshalContext`
//!   and stay alive until the context is dropped (after the call returns)
//! - Integral return values narrower than a machine word are widened to a
//!   full word, as libffi requires for both calls and closures

use crate::ffi::types::{struct_layout, ForeignType, ForeignValue};
use std::ffi::{c_void, CStr, CString};
use std::mem::size_of;
use std::os::raw::{c_char, c_int, c_long, c_uint, c_ulong};
use std::ptr;
use thiserror::Error;

/// Marshal error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarshalError {
    /// Value does not match the declared type
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    /// Wrong number of arguments for the declared signature
    #[error("Expected {expected} arguments, got {got}")]
    ArityMismatch { expected: usize, got: usize },

    /// String contains an interior NUL or cannot be produced
    #[error("Invalid string: {0}")]
    InvalidString(String),
}

/// Word-aligned storage for one argument or return value
pub struct ArgSlot {
    words: Vec<u64>,
}

impl ArgSlot {
    /// Zeroed storage for a value of `ty`
    pub fn for_type(ty: &ForeignType) -> Self {
        let bytes = ty.size().max(size_of::<usize>());
        Self {
            words: vec![0; (bytes + 7) / 8],
        }
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.words.as_ptr() as *const u8
    }

    pub fn as_mut_ptr(&mut self) -> *mut c_void {
        self.words.as_mut_ptr() as *mut c_void
    }
}

/// Marshal context for ForeignValue → C conversions
///
/// Tracks allocated C strings for proper cleanup.
///
/// # Example
///
/// ```
/// # use objbridge_runtime::ffi::{ForeignType, ForeignValue, MarshalContext};
/// let mut ctx = MarshalContext::new();
/// let slot = ctx.encode_arg(&ForeignValue::Str("hello".into()), &ForeignType::CString).unwrap();
/// assert_eq!(ctx.allocated_count(), 1);
/// // the C string lives until ctx is dropped
/// # drop(slot);
/// ```
pub struct MarshalContext {
    allocated_strings: Vec<CString>,
}

impl MarshalContext {
    pub fn new() -> Self {
        Self {
            allocated_strings: Vec::new(),
        }
    }

    /// Lay `value` out as `ty` in fresh argument storage
    pub fn encode_arg(
        &mut self,
        value: &ForeignValue,
        ty: &ForeignType,
    ) -> Result<ArgSlot, MarshalError> {
        let mut slot = ArgSlot::for_type(ty);
        // SAFETY: the slot holds at least `ty.size()` bytes, 8-byte aligned.
        unsafe { self.write(value, ty, slot.as_mut_ptr() as *mut u8)? };
        Ok(slot)
    }

    /// Number of C strings kept alive by this context
    pub fn allocated_count(&self) -> usize {
        self.allocated_strings.len()
    }

    unsafe fn write(
        &mut self,
        value: &ForeignValue,
        ty: &ForeignType,
        dst: *mut u8,
    ) -> Result<(), MarshalError> {
        match (value, ty) {
            (ForeignValue::Str(s), ForeignType::CString) => {
                let c_string =
                    CString::new(s.as_str()).map_err(|e| MarshalError::InvalidString(e.to_string()))?;
                let p = c_string.as_ptr();
                self.allocated_strings.push(c_string);
                ptr::write_unaligned(dst as *mut *const c_char, p);
                Ok(())
            }
            (ForeignValue::Struct(values), ForeignType::Struct(fields)) => {
                if values.len() != fields.len() {
                    return Err(MarshalError::ArityMismatch {
                        expected: fields.len(),
                        got: values.len(),
                    });
                }
                let (_, offsets) = struct_layout(fields);
                for ((v, f), off) in values.iter().zip(fields).zip(offsets) {
                    self.write(v, f, dst.add(off))?;
                }
                Ok(())
            }
            _ => write_scalar(value, ty, dst),
        }
    }
}

impl Default for MarshalContext {
    fn default() -> Self {
        Self::new()
    }
}

fn mismatch(value: &ForeignValue, ty: &ForeignType) -> MarshalError {
    MarshalError::TypeMismatch {
        expected: ty.display_name().to_string(),
        got: value.kind_name().to_string(),
    }
}

unsafe fn write_scalar(
    value: &ForeignValue,
    ty: &ForeignType,
    dst: *mut u8,
) -> Result<(), MarshalError> {
    match (value, ty) {
        (ForeignValue::Bool(v), ForeignType::Bool) => ptr::write_unaligned(dst, *v as u8),
        (ForeignValue::I8(v), ForeignType::Char) => ptr::write_unaligned(dst as *mut i8, *v),
        (ForeignValue::U8(v), ForeignType::UChar) => ptr::write_unaligned(dst, *v),
        (ForeignValue::I16(v), ForeignType::Short) => ptr::write_unaligned(dst as *mut i16, *v),
        (ForeignValue::U16(v), ForeignType::UShort) => ptr::write_unaligned(dst as *mut u16, *v),
        (ForeignValue::I32(v), ForeignType::Int) => ptr::write_unaligned(dst as *mut c_int, *v),
        (ForeignValue::U32(v), ForeignType::UInt) => ptr::write_unaligned(dst as *mut c_uint, *v),
        (ForeignValue::I64(v), ForeignType::Long) => {
            ptr::write_unaligned(dst as *mut c_long, *v as c_long)
        }
        (ForeignValue::U64(v), ForeignType::ULong) => {
            ptr::write_unaligned(dst as *mut c_ulong, *v as c_ulong)
        }
        (ForeignValue::I64(v), ForeignType::LongLong) => ptr::write_unaligned(dst as *mut i64, *v),
        (ForeignValue::U64(v), ForeignType::ULongLong) => ptr::write_unaligned(dst as *mut u64, *v),
        (ForeignValue::F32(v), ForeignType::Float) => ptr::write_unaligned(dst as *mut f32, *v),
        (ForeignValue::F64(v), ForeignType::Double) => ptr::write_unaligned(dst as *mut f64, *v),
        (ForeignValue::Pointer(p), t) if t.is_pointer_like() => {
            ptr::write_unaligned(dst as *mut *mut c_void, *p)
        }
        _ => return Err(mismatch(value, ty)),
    }
    Ok(())
}

/// Read a value of `ty` from C memory
///
/// # Safety
///
/// `src` must point to at least `ty.size()` readable bytes laid out as `ty`.
/// A non-null `CString` must point to a NUL-terminated string.
pub unsafe fn read_value(ty: &ForeignType, src: *const u8) -> ForeignValue {
    match ty {
        ForeignType::Void => ForeignValue::Void,
        ForeignType::Bool => ForeignValue::Bool(ptr::read_unaligned(src) != 0),
        ForeignType::Char => ForeignValue::I8(ptr::read_unaligned(src as *const i8)),
        ForeignType::UChar => ForeignValue::U8(ptr::read_unaligned(src)),
        ForeignType::Short => ForeignValue::I16(ptr::read_unaligned(src as *const i16)),
        ForeignType::UShort => ForeignValue::U16(ptr::read_unaligned(src as *const u16)),
        ForeignType::Int => ForeignValue::I32(ptr::read_unaligned(src as *const c_int)),
        ForeignType::UInt => ForeignValue::U32(ptr::read_unaligned(src as *const c_uint)),
        ForeignType::Long => ForeignValue::I64(ptr::read_unaligned(src as *const c_long) as i64),
        ForeignType::ULong => ForeignValue::U64(ptr::read_unaligned(src as *const c_ulong) as u64),
        ForeignType::LongLong => ForeignValue::I64(ptr::read_unaligned(src as *const i64)),
        ForeignType::ULongLong => ForeignValue::U64(ptr::read_unaligned(src as *const u64)),
        ForeignType::Float => ForeignValue::F32(ptr::read_unaligned(src as *const f32)),
        ForeignType::Double => ForeignValue::F64(ptr::read_unaligned(src as *const f64)),
        ForeignType::CString => {
            let p = ptr::read_unaligned(src as *const *const c_char);
            if p.is_null() {
                ForeignValue::null()
            } else {
                ForeignValue::Str(CStr::from_ptr(p).to_string_lossy().into_owned())
            }
        }
        ForeignType::Struct(fields) => {
            let (_, offsets) = struct_layout(fields);
            ForeignValue::Struct(
                fields
                    .iter()
                    .zip(offsets)
                    .map(|(f, off)| read_value(f, src.add(off)))
                    .collect(),
            )
        }
        _ => ForeignValue::Pointer(ptr::read_unaligned(src as *const *mut c_void)),
    }
}

/// Read an argument handed to a callback
///
/// C strings stay raw `Pointer`s, including inside structs: the bytes are
/// owned by the caller and need not be UTF-8, so decoding is left to the
/// callback.
///
/// # Safety
///
/// As for [`read_value`].
pub unsafe fn read_argument(ty: &ForeignType, src: *const u8) -> ForeignValue {
    match ty {
        ForeignType::CString => ForeignValue::Pointer(ptr::read_unaligned(src as *const *mut c_void)),
        ForeignType::Struct(fields) => {
            let (_, offsets) = struct_layout(fields);
            ForeignValue::Struct(
                fields
                    .iter()
                    .zip(offsets)
                    .map(|(f, off)| read_argument(f, src.add(off)))
                    .collect(),
            )
        }
        _ => read_value(ty, src),
    }
}

/// Integral types libffi widens to a full word in return position
fn is_widened(ty: &ForeignType) -> bool {
    ty.is_integral() && ty.size() < size_of::<usize>()
}

/// Read a return value written by libffi
///
/// # Safety
///
/// `src` must be a return slot from [`ArgSlot::for_type`] filled by a call
/// whose declared return type is `ty`.
pub unsafe fn read_return(ty: &ForeignType, src: *const u8) -> ForeignValue {
    if !is_widened(ty) {
        return read_value(ty, src);
    }
    let word = ptr::read_unaligned(src as *const usize);
    match ty {
        ForeignType::Bool => ForeignValue::Bool(word as u8 != 0),
        ForeignType::Char => ForeignValue::I8(word as i8),
        ForeignType::UChar => ForeignValue::U8(word as u8),
        ForeignType::Short => ForeignValue::I16(word as i16),
        ForeignType::UShort => ForeignValue::U16(word as u16),
        ForeignType::Int => ForeignValue::I32(word as i32),
        ForeignType::UInt => ForeignValue::U32(word as u32),
        ForeignType::Long => ForeignValue::I64(word as c_long as i64),
        ForeignType::ULong => ForeignValue::U64(word as c_ulong as u64),
        _ => read_value(ty, src),
    }
}

/// Write a callback's return value into libffi's result storage
///
/// Strings cannot be returned this way: nothing would own the C buffer
/// once the callback returns.
///
/// # Safety
///
/// `dst` must point to the result storage libffi handed to a closure whose
/// declared return type is `ty`.
pub unsafe fn write_return(
    ty: &ForeignType,
    value: &ForeignValue,
    dst: *mut u8,
) -> Result<(), MarshalError> {
    if matches!(ty, ForeignType::Void) {
        return Ok(());
    }
    if let ForeignValue::Str(_) = value {
        return Err(MarshalError::InvalidString(
            "native callbacks cannot return owned strings; return a pointer".to_string(),
        ));
    }
    if !value.matches(ty) {
        return Err(mismatch(value, ty));
    }
    if is_widened(ty) {
        let word = match value.as_i64() {
            Some(v) if ty.is_signed() => v as isize as usize,
            Some(v) => v as u64 as usize,
            None => return Err(mismatch(value, ty)),
        };
        // Unsigned narrow values must not carry sign bits into the word.
        let word = if ty.is_signed() {
            word
        } else {
            word & ((1usize << (ty.size() * 8)) - 1)
        };
        ptr::write_unaligned(dst as *mut usize, word);
        return Ok(());
    }
    let mut ctx = MarshalContext::new();
    ctx.write(value, ty, dst)
}

/// Zero the result storage for `ty`
///
/// # Safety
///
/// Same contract as [`write_return`].
pub unsafe fn write_zeroed(ty: &ForeignType, dst: *mut u8) {
    let len = ty.size().max(if ty.is_integral() { size_of::<usize>() } else { 0 });
    ptr::write_bytes(dst, 0, len);
}
