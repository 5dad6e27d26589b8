//! Runtime type encodings
//!
//! Parses the compact type-encoding strings the runtime attaches to methods,
//! instance variables and closures, and checks them against a declared
//! [`Signature`].
//!
//! # Encoding Format
//!
//! - `v` void, `B` bool
//! - `c`/`C` char, `s`/`S` short, `i`/`I` int, `l`/`L` 32-bit long,
//!   `q`/`Q` long long
//! - `f` float, `d` double
//! - `@` object, `#` class, `:` selector, `*` C string, `@?` block,
//!   `^T` pointer to T, `?` unknown (function pointer)
//! - `[nT]` array, `{name=T...}` struct, `(name=T...)` union, `bN` bitfield
//!
//! Method encodings may carry qualifiers (`r n N o O R V A`) and frame
//! offsets (`v24@0:8`); both are skipped.
//!
//! Example encodings:
//! - `"v@:"` - void return, self, _cmd
//! - `"i@?ii"` - int return, the block itself, two ints

use crate::error::{BridgeError, BridgeResult};
use crate::ffi::types::{ForeignType, Signature};

/// What a pointer-sized encoding refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerKind {
    Object,
    Class,
    Selector,
    CString,
    Block,
    Raw,
}

/// One parsed element of a type encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedType {
    Void,
    Bool,
    Int { size: usize, signed: bool },
    Float,
    Double,
    Pointer(PointerKind),
    /// Struct fields; `None` for an opaque `{name}` reference
    Struct(Option<Vec<EncodedType>>),
    Array(usize, Box<EncodedType>),
    Union,
    Bitfield(usize),
    /// `?`: function pointers and other untyped words
    Unknown,
}

fn invalid(encoding: &str, reason: impl std::fmt::Display) -> BridgeError {
    BridgeError::Configuration(format!("invalid type encoding '{}': {}", encoding, reason))
}

struct Parser<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            bytes: text.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn number(&mut self) -> Option<usize> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        self.text[start..self.pos].parse().ok()
    }

    fn skip_qualifiers(&mut self) {
        while matches!(self.peek(), Some(b'r' | b'n' | b'N' | b'o' | b'O' | b'R' | b'V' | b'A')) {
            self.pos += 1;
        }
    }

    fn skip_offset(&mut self) {
        while matches!(self.peek(), Some(b'0'..=b'9' | b'-')) {
            self.pos += 1;
        }
    }

    fn skip_quoted(&mut self) -> BridgeResult<()> {
        if self.peek() != Some(b'"') {
            return Ok(());
        }
        self.pos += 1;
        while let Some(b) = self.bump() {
            if b == b'"' {
                return Ok(());
            }
        }
        Err(invalid(self.text, "unterminated quoted name"))
    }

    fn expect(&mut self, want: u8) -> BridgeResult<()> {
        match self.bump() {
            Some(b) if b == want => Ok(()),
            Some(b) => Err(invalid(
                self.text,
                format!("expected '{}' at {}, found '{}'", want as char, self.pos - 1, b as char),
            )),
            None => Err(invalid(self.text, format!("expected '{}' at end", want as char))),
        }
    }

    /// Fields up to `close`, each optionally preceded by a quoted name
    fn fields(&mut self, close: u8) -> BridgeResult<Vec<EncodedType>> {
        let mut fields = Vec::new();
        loop {
            self.skip_quoted()?;
            match self.peek() {
                Some(b) if b == close => {
                    self.pos += 1;
                    return Ok(fields);
                }
                Some(_) => fields.push(self.parse_type()?),
                None => return Err(invalid(self.text, format!("missing '{}'", close as char))),
            }
        }
    }

    /// Aggregate name, up to `=` (fields follow) or `close` (opaque)
    fn aggregate_name(&mut self, close: u8) -> BridgeResult<bool> {
        while let Some(b) = self.bump() {
            if b == b'=' {
                return Ok(true);
            }
            if b == close {
                return Ok(false);
            }
        }
        Err(invalid(self.text, format!("missing '{}'", close as char)))
    }

    fn parse_type(&mut self) -> BridgeResult<EncodedType> {
        self.skip_qualifiers();
        let at = self.pos;
        let code = self
            .bump()
            .ok_or_else(|| invalid(self.text, "unexpected end"))?;
        let ty = match code {
            b'v' => EncodedType::Void,
            b'B' => EncodedType::Bool,
            b'c' => EncodedType::Int { size: 1, signed: true },
            b'C' => EncodedType::Int { size: 1, signed: false },
            b's' => EncodedType::Int { size: 2, signed: true },
            b'S' => EncodedType::Int { size: 2, signed: false },
            b'i' => EncodedType::Int { size: 4, signed: true },
            b'I' => EncodedType::Int { size: 4, signed: false },
            b'l' => EncodedType::Int { size: 4, signed: true },
            b'L' => EncodedType::Int { size: 4, signed: false },
            b'q' => EncodedType::Int { size: 8, signed: true },
            b'Q' => EncodedType::Int { size: 8, signed: false },
            b'f' => EncodedType::Float,
            b'd' => EncodedType::Double,
            b'@' => match self.peek() {
                Some(b'?') => {
                    self.pos += 1;
                    EncodedType::Pointer(PointerKind::Block)
                }
                Some(b'"') => {
                    self.skip_quoted()?;
                    EncodedType::Pointer(PointerKind::Object)
                }
                _ => EncodedType::Pointer(PointerKind::Object),
            },
            b'#' => EncodedType::Pointer(PointerKind::Class),
            b':' => EncodedType::Pointer(PointerKind::Selector),
            b'*' => EncodedType::Pointer(PointerKind::CString),
            b'^' => {
                self.parse_type()?;
                EncodedType::Pointer(PointerKind::Raw)
            }
            b'?' => EncodedType::Unknown,
            b'[' => {
                let len = self
                    .number()
                    .ok_or_else(|| invalid(self.text, format!("array without length at {}", at)))?;
                let element = self.parse_type()?;
                self.expect(b']')?;
                EncodedType::Array(len, Box::new(element))
            }
            b'{' => {
                if self.aggregate_name(b'}')? {
                    EncodedType::Struct(Some(self.fields(b'}')?))
                } else {
                    EncodedType::Struct(None)
                }
            }
            b'(' => {
                if self.aggregate_name(b')')? {
                    self.fields(b')')?;
                }
                EncodedType::Union
            }
            b'b' => EncodedType::Bitfield(
                self.number()
                    .ok_or_else(|| invalid(self.text, format!("bitfield without width at {}", at)))?,
            ),
            other => {
                return Err(invalid(
                    self.text,
                    format!("unsupported type code '{}' at {}", other as char, at),
                ))
            }
        };
        self.skip_offset();
        Ok(ty)
    }
}

/// Parse a full encoding (return type first) into its elements
///
/// # Example
///
/// ```
/// # use objbridge_runtime::objc::encoding::{parse_signature, EncodedType, PointerKind};
/// let parsed = parse_signature("v24@0:8@?16").unwrap();
/// assert_eq!(parsed, vec![
///     EncodedType::Void,
///     EncodedType::Pointer(PointerKind::Object),
///     EncodedType::Pointer(PointerKind::Selector),
///     EncodedType::Pointer(PointerKind::Block),
/// ]);
/// ```
pub fn parse_signature(encoding: &str) -> BridgeResult<Vec<EncodedType>> {
    if encoding.is_empty() {
        return Err(BridgeError::Configuration(
            "type encoding must not be empty".to_string(),
        ));
    }
    let mut parser = Parser::new(encoding);
    parser.skip_offset();
    let mut elements = Vec::new();
    while !parser.at_end() {
        elements.push(parser.parse_type()?);
    }
    Ok(elements)
}

/// Whether an encoded element can describe a value declared as `ty`
pub fn is_compatible(encoded: &EncodedType, ty: &ForeignType) -> bool {
    match (encoded, ty) {
        (EncodedType::Void, ForeignType::Void) => true,
        (EncodedType::Bool, t) => t.is_integral() && t.size() == 1,
        (EncodedType::Int { size, .. }, t) => t.is_integral() && t.size() == *size,
        (EncodedType::Float, ForeignType::Float) => true,
        (EncodedType::Double, ForeignType::Double) => true,
        (EncodedType::Pointer(_) | EncodedType::Unknown | EncodedType::Array(..), t) => {
            t.is_pointer_like()
        }
        (EncodedType::Struct(None), ForeignType::Struct(_)) => true,
        (EncodedType::Struct(Some(fields)), ForeignType::Struct(types)) => {
            fields.len() == types.len()
                && fields.iter().zip(types).all(|(f, t)| is_compatible(f, t))
        }
        _ => false,
    }
}

/// Check that `encoding` describes exactly `signature` (return type, then
/// every argument in order)
pub fn verify(encoding: &str, signature: &Signature) -> BridgeResult<()> {
    let parsed = parse_signature(encoding)?;
    let declared: Vec<&ForeignType> = std::iter::once(signature.ret())
        .chain(signature.args())
        .collect();

    if parsed.len() != declared.len() {
        return Err(BridgeError::Configuration(format!(
            "type encoding '{}' has {} elements but {} declares {}",
            encoding,
            parsed.len(),
            signature,
            declared.len()
        )));
    }

    for (index, (encoded, ty)) in parsed.iter().zip(declared).enumerate() {
        if !is_compatible(encoded, ty) {
            return Err(BridgeError::Configuration(format!(
                "type encoding '{}' element {} is {:?}, declared {}",
                encoding,
                index,
                encoded,
                ty.display_name()
            )));
        }
    }
    Ok(())
}
