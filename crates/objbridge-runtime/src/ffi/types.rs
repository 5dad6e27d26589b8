//! FFI type system - C-compatible types for the foreign boundary
//!
//! Defines:
//! - `ForeignType`: caller-declared C type of an argument or return value
//! - `ForeignValue`: runtime representation of a C value
//! - `Signature`: return type plus ordered argument types, fixed at bind time
//!
//! Type mapping:
//! - ForeignType::Bool → ForeignValue::Bool(bool)
//! - ForeignType::Char / UChar → I8 / U8
//! - ForeignType::Short / UShort → I16 / U16
//! - ForeignType::Int / UInt → I32 / U32
//! - ForeignType::Long / LongLong → I64, ULong / ULongLong → U64
//! - ForeignType::Float / Double → F32 / F64
//! - Pointer-like types (Pointer, Object, Class, Selector, Block) → Pointer
//! - ForeignType::CString → Str (or Pointer, for pass-through and NULL)
//! - ForeignType::Struct → Struct(fields)

use libffi::middle::{Cif, Type};
use serde::{Deserialize, Serialize};
use std::ffi::c_void;
use std::fmt;
use std::mem::{align_of, size_of};
use std::os::raw::{c_int, c_long};

/// C types that can cross the foreign boundary
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ForeignType {
    Void,
    /// C99 `_Bool`
    Bool,
    /// signed char
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    /// C long (platform width)
    Long,
    ULong,
    LongLong,
    ULongLong,
    Float,
    Double,
    /// void*
    Pointer,
    /// Object reference (`id`)
    Object,
    /// Class reference
    Class,
    /// Interned selector
    Selector,
    /// Null-terminated string pointer
    CString,
    /// Pointer to a block closure
    Block,
    /// C struct passed by value
    Struct(Vec<ForeignType>),
}

impl ForeignType {
    /// True for every type passed as a single machine pointer
    pub fn is_pointer_like(&self) -> bool {
        matches!(
            self,
            ForeignType::Pointer
                | ForeignType::Object
                | ForeignType::Class
                | ForeignType::Selector
                | ForeignType::CString
                | ForeignType::Block
        )
    }

    /// True for integer types (including `Bool`)
    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            ForeignType::Bool
                | ForeignType::Char
                | ForeignType::UChar
                | ForeignType::Short
                | ForeignType::UShort
                | ForeignType::Int
                | ForeignType::UInt
                | ForeignType::Long
                | ForeignType::ULong
                | ForeignType::LongLong
                | ForeignType::ULongLong
        )
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            ForeignType::Char
                | ForeignType::Short
                | ForeignType::Int
                | ForeignType::Long
                | ForeignType::LongLong
        )
    }

    /// Size in bytes under the platform C layout rules
    pub fn size(&self) -> usize {
        match self {
            ForeignType::Void => 0,
            ForeignType::Bool | ForeignType::Char | ForeignType::UChar => 1,
            ForeignType::Short | ForeignType::UShort => 2,
            ForeignType::Int | ForeignType::UInt => size_of::<c_int>(),
            ForeignType::Long | ForeignType::ULong => size_of::<c_long>(),
            ForeignType::LongLong | ForeignType::ULongLong => 8,
            ForeignType::Float => 4,
            ForeignType::Double => 8,
            ForeignType::Struct(fields) => struct_layout(fields).0,
            _ => size_of::<*const c_void>(),
        }
    }

    /// Alignment in bytes under the platform C layout rules
    pub fn align(&self) -> usize {
        match self {
            ForeignType::Void => 1,
            ForeignType::Bool | ForeignType::Char | ForeignType::UChar => 1,
            ForeignType::Short | ForeignType::UShort => align_of::<i16>(),
            ForeignType::Int | ForeignType::UInt => align_of::<c_int>(),
            ForeignType::Long | ForeignType::ULong => align_of::<c_long>(),
            ForeignType::LongLong | ForeignType::ULongLong => align_of::<i64>(),
            ForeignType::Float => align_of::<f32>(),
            ForeignType::Double => align_of::<f64>(),
            ForeignType::Struct(fields) => fields.iter().map(|f| f.align()).max().unwrap_or(1),
            _ => align_of::<*const c_void>(),
        }
    }

    /// libffi type descriptor
    pub fn ffi_type(&self) -> Type {
        match self {
            ForeignType::Void => Type::void(),
            ForeignType::Bool | ForeignType::UChar => Type::u8(),
            ForeignType::Char => Type::i8(),
            ForeignType::Short => Type::i16(),
            ForeignType::UShort => Type::u16(),
            ForeignType::Int => Type::i32(),
            ForeignType::UInt => Type::u32(),
            ForeignType::Long if size_of::<c_long>() == 8 => Type::i64(),
            ForeignType::Long => Type::i32(),
            ForeignType::ULong if size_of::<c_long>() == 8 => Type::u64(),
            ForeignType::ULong => Type::u32(),
            ForeignType::LongLong => Type::i64(),
            ForeignType::ULongLong => Type::u64(),
            ForeignType::Float => Type::f32(),
            ForeignType::Double => Type::f64(),
            ForeignType::Struct(fields) => Type::structure(fields.iter().map(|f| f.ffi_type())),
            _ => Type::pointer(),
        }
    }

    /// Runtime type-encoding string for this type
    ///
    /// # Examples
    ///
    /// ```
    /// # use objbridge_runtime::ffi::ForeignType;
    /// assert_eq!(ForeignType::Object.encoding(), "@");
    /// assert_eq!(ForeignType::Block.encoding(), "@?");
    /// let point = ForeignType::Struct(vec![ForeignType::Double, ForeignType::Double]);
    /// assert_eq!(point.encoding(), "{?=dd}");
    /// ```
    pub fn encoding(&self) -> String {
        let code = match self {
            ForeignType::Void => "v",
            ForeignType::Bool => "B",
            ForeignType::Char => "c",
            ForeignType::UChar => "C",
            ForeignType::Short => "s",
            ForeignType::UShort => "S",
            ForeignType::Int => "i",
            ForeignType::UInt => "I",
            // The runtime encodes a 64-bit long as long long.
            ForeignType::Long if size_of::<c_long>() == 8 => "q",
            ForeignType::Long => "l",
            ForeignType::ULong if size_of::<c_long>() == 8 => "Q",
            ForeignType::ULong => "L",
            ForeignType::LongLong => "q",
            ForeignType::ULongLong => "Q",
            ForeignType::Float => "f",
            ForeignType::Double => "d",
            ForeignType::Pointer => "^v",
            ForeignType::Object => "@",
            ForeignType::Class => "#",
            ForeignType::Selector => ":",
            ForeignType::CString => "*",
            ForeignType::Block => "@?",
            ForeignType::Struct(fields) => {
                let inner: String = fields.iter().map(|f| f.encoding()).collect();
                return format!("{{?={}}}", inner);
            }
        };
        code.to_string()
    }

    /// Get a display name for this type
    pub fn display_name(&self) -> &'static str {
        match self {
            ForeignType::Void => "void",
            ForeignType::Bool => "bool",
            ForeignType::Char => "char",
            ForeignType::UChar => "unsigned char",
            ForeignType::Short => "short",
            ForeignType::UShort => "unsigned short",
            ForeignType::Int => "int",
            ForeignType::UInt => "unsigned int",
            ForeignType::Long => "long",
            ForeignType::ULong => "unsigned long",
            ForeignType::LongLong => "long long",
            ForeignType::ULongLong => "unsigned long long",
            ForeignType::Float => "float",
            ForeignType::Double => "double",
            ForeignType::Pointer => "void*",
            ForeignType::Object => "id",
            ForeignType::Class => "Class",
            ForeignType::Selector => "SEL",
            ForeignType::CString => "char*",
            ForeignType::Block => "block",
            ForeignType::Struct(_) => "struct",
        }
    }
}

/// Size and field offsets of a C struct with the given fields
pub fn struct_layout(fields: &[ForeignType]) -> (usize, Vec<usize>) {
    let mut offsets = Vec::with_capacity(fields.len());
    let mut offset = 0usize;
    let mut max_align = 1usize;
    for field in fields {
        let align = field.align();
        max_align = max_align.max(align);
        offset = round_up(offset, align);
        offsets.push(offset);
        offset += field.size();
    }
    (round_up(offset, max_align), offsets)
}

fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

/// C value representation for the foreign boundary
#[derive(Debug, Clone, PartialEq)]
pub enum ForeignValue {
    /// No value (void return)
    Void,
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    /// Any pointer-sized handle (object, class, selector, block, raw pointer)
    Pointer(*mut c_void),
    /// Rust-owned text passed as a C string; valid for one call
    Str(String),
    /// Struct fields in declaration order
    Struct(Vec<ForeignValue>),
}

impl ForeignValue {
    /// A NULL pointer value
    pub fn null() -> Self {
        ForeignValue::Pointer(std::ptr::null_mut())
    }

    /// Check whether this value can be written as `ty`
    pub fn matches(&self, ty: &ForeignType) -> bool {
        match (self, ty) {
            (ForeignValue::Void, ForeignType::Void) => true,
            (ForeignValue::Bool(_), ForeignType::Bool) => true,
            (ForeignValue::I8(_), ForeignType::Char) => true,
            (ForeignValue::U8(_), ForeignType::UChar) => true,
            (ForeignValue::I16(_), ForeignType::Short) => true,
            (ForeignValue::U16(_), ForeignType::UShort) => true,
            (ForeignValue::I32(_), ForeignType::Int) => true,
            (ForeignValue::U32(_), ForeignType::UInt) => true,
            (ForeignValue::I64(_), ForeignType::Long | ForeignType::LongLong) => true,
            (ForeignValue::U64(_), ForeignType::ULong | ForeignType::ULongLong) => true,
            (ForeignValue::F32(_), ForeignType::Float) => true,
            (ForeignValue::F64(_), ForeignType::Double) => true,
            (ForeignValue::Pointer(_), t) => t.is_pointer_like(),
            (ForeignValue::Str(_), ForeignType::CString) => true,
            (ForeignValue::Struct(values), ForeignType::Struct(fields)) => {
                values.len() == fields.len()
                    && values.iter().zip(fields).all(|(v, f)| v.matches(f))
            }
            _ => false,
        }
    }

    /// Name of the variant, for diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            ForeignValue::Void => "void",
            ForeignValue::Bool(_) => "bool",
            ForeignValue::I8(_) => "i8",
            ForeignValue::U8(_) => "u8",
            ForeignValue::I16(_) => "i16",
            ForeignValue::U16(_) => "u16",
            ForeignValue::I32(_) => "i32",
            ForeignValue::U32(_) => "u32",
            ForeignValue::I64(_) => "i64",
            ForeignValue::U64(_) => "u64",
            ForeignValue::F32(_) => "f32",
            ForeignValue::F64(_) => "f64",
            ForeignValue::Pointer(_) => "pointer",
            ForeignValue::Str(_) => "string",
            ForeignValue::Struct(_) => "struct",
        }
    }

    pub fn as_pointer(&self) -> Option<*mut c_void> {
        match self {
            ForeignValue::Pointer(p) => Some(*p),
            _ => None,
        }
    }

    /// Integer value widened to i64 (bools map to 0/1)
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            ForeignValue::Bool(b) => Some(b as i64),
            ForeignValue::I8(v) => Some(v as i64),
            ForeignValue::U8(v) => Some(v as i64),
            ForeignValue::I16(v) => Some(v as i64),
            ForeignValue::U16(v) => Some(v as i64),
            ForeignValue::I32(v) => Some(v as i64),
            ForeignValue::U32(v) => Some(v as i64),
            ForeignValue::I64(v) => Some(v),
            ForeignValue::U64(v) => Some(v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            ForeignValue::F32(v) => Some(v as f64),
            ForeignValue::F64(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for ForeignValue {
    fn from(v: bool) -> Self {
        ForeignValue::Bool(v)
    }
}

impl From<i32> for ForeignValue {
    fn from(v: i32) -> Self {
        ForeignValue::I32(v)
    }
}

impl From<i64> for ForeignValue {
    fn from(v: i64) -> Self {
        ForeignValue::I64(v)
    }
}

impl From<f64> for ForeignValue {
    fn from(v: f64) -> Self {
        ForeignValue::F64(v)
    }
}

impl From<*mut c_void> for ForeignValue {
    fn from(p: *mut c_void) -> Self {
        ForeignValue::Pointer(p)
    }
}

impl From<&str> for ForeignValue {
    fn from(s: &str) -> Self {
        ForeignValue::Str(s.to_string())
    }
}

/// Return type plus ordered argument types of a native entry point
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    ret: ForeignType,
    args: Vec<ForeignType>,
}

impl Signature {
    pub fn new(ret: ForeignType, args: Vec<ForeignType>) -> Self {
        Self { ret, args }
    }

    /// Signature with no arguments
    pub fn returning(ret: ForeignType) -> Self {
        Self::new(ret, Vec::new())
    }

    pub fn ret(&self) -> &ForeignType {
        &self.ret
    }

    pub fn args(&self) -> &[ForeignType] {
        &self.args
    }

    /// Same signature with `leading` argument types inserted first
    pub fn with_leading(&self, leading: &[ForeignType]) -> Self {
        let mut args = leading.to_vec();
        args.extend(self.args.iter().cloned());
        Self::new(self.ret.clone(), args)
    }

    /// Runtime type encoding: return type followed by argument types
    pub fn encoding(&self) -> String {
        std::iter::once(&self.ret)
            .chain(self.args.iter())
            .map(|t| t.encoding())
            .collect()
    }

    /// Prepared libffi call interface for this signature
    pub fn cif(&self) -> Cif {
        Cif::new(self.args.iter().map(|t| t.ffi_type()), self.ret.ffi_type())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.args.iter().map(|t| format!("{:?}", t)).collect();
        write!(f, "({})->{:?}", params.join(","), self.ret)
    }
}
