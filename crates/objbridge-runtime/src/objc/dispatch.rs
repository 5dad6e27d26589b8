//! Message dispatch through the runtime's universal entry points
//!
//! Every message goes through `objc_msgSend` (or `objc_msgSendSuper` for
//! super dispatch) with a signature the caller declares per call:
//!
//! 1. Intern the selector (cached per dispatcher)
//! 2. Prepend the receiver and selector to the declared argument types
//! 3. Call the entry point through a prepared call interface (cached per
//!    dispatch kind and signature)
//! 4. Read the return value as the declared type
//!
//! The declared signature is trusted completely. A mismatch with the real
//! method is an ABI contract violation and is not detected.

use crate::error::{BridgeError, BridgeResult, LookupKind};
use crate::ffi::caller::TypedCallable;
use crate::ffi::marshal::MarshalError;
use crate::ffi::types::{ForeignType, ForeignValue, Signature};
use crate::objc::block::ClosureBuilder;
use crate::objc::runtime::EntryPoints;
use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{c_void, CString};
use std::fmt;
use std::ptr::NonNull;
use tracing::{trace, warn};

/// A non-nil reference to a runtime object or class
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef(NonNull<c_void>);

impl ObjectRef {
    /// `None` for nil
    pub fn new(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(ObjectRef)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({:p})", self.0)
    }
}

impl From<ObjectRef> for ForeignValue {
    fn from(obj: ObjectRef) -> Self {
        ForeignValue::Pointer(obj.as_ptr())
    }
}

/// An interned message name
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Selector(NonNull<c_void>);

impl Selector {
    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }
}

impl From<Selector> for ForeignValue {
    fn from(sel: Selector) -> Self {
        ForeignValue::Pointer(sel.as_ptr())
    }
}

impl ForeignValue {
    /// Non-nil object pointer, if this is one
    pub fn as_object(&self) -> Option<ObjectRef> {
        self.as_pointer().and_then(ObjectRef::new)
    }
}

/// Which entry point a message goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dispatch {
    /// Start method lookup at the receiver's class
    Ordinary,
    /// Start method lookup at the superclass of the receiver's class
    Super,
}

/// Effective receiver passed to the super-dispatch entry point
#[repr(C)]
struct SuperReceiver {
    receiver: *mut c_void,
    super_class: *mut c_void,
}

fn c_name(name: &str) -> BridgeResult<CString> {
    CString::new(name).map_err(|e| MarshalError::InvalidString(e.to_string()).into())
}

/// Sends messages and wraps the runtime's lookup functions
pub struct MessageDispatcher {
    entry: EntryPoints,
    selectors: RefCell<HashMap<String, Selector>>,
    callables: RefCell<HashMap<(Dispatch, Signature), TypedCallable>>,
}

impl MessageDispatcher {
    pub fn new(entry: EntryPoints) -> Self {
        Self {
            entry,
            selectors: RefCell::new(HashMap::new()),
            callables: RefCell::new(HashMap::new()),
        }
    }

    pub fn entry_points(&self) -> &EntryPoints {
        &self.entry
    }

    /// Intern `name` as a selector
    ///
    /// # Panics
    ///
    /// If `name` contains a NUL byte, the runtime returns NULL, or the
    /// runtime library has been closed. Use
    /// [`try_register_selector`](Self::try_register_selector) to get these
    /// as errors.
    pub fn register_selector(&self, name: &str) -> Selector {
        self.try_register_selector(name)
            .unwrap_or_else(|err| panic!("cannot intern selector {:?}: {}", name, err))
    }

    /// Intern `name` as a selector, reporting failures
    ///
    /// Selectors are cached per dispatcher, so the runtime is asked once per
    /// name.
    pub fn try_register_selector(&self, name: &str) -> BridgeResult<Selector> {
        if let Some(sel) = self.selectors.borrow().get(name).copied() {
            return Ok(sel);
        }
        let c_string = c_name(name)?;
        // SAFETY: sel_registerName only reads the string.
        let raw = unsafe { self.entry.sel_register_name(&c_string)? };
        let sel = NonNull::new(raw).map(Selector).ok_or_else(|| {
            BridgeError::Allocation(format!("sel_registerName returned NULL for {:?}", name))
        })?;
        self.selectors.borrow_mut().insert(name.to_string(), sel);
        Ok(sel)
    }

    fn callable(&self, dispatch: Dispatch, signature: &Signature) -> TypedCallable {
        let key = (dispatch, signature.clone());
        if let Some(callable) = self.callables.borrow().get(&key) {
            return callable.clone();
        }
        let (symbol, leading) = match dispatch {
            Dispatch::Ordinary => (
                self.entry.msg_send(),
                [ForeignType::Object, ForeignType::Selector],
            ),
            Dispatch::Super => (
                self.entry.msg_send_super(),
                [ForeignType::Pointer, ForeignType::Selector],
            ),
        };
        // SAFETY: the message-send entry points accept (receiver, selector,
        // ...) with whatever signature the method being called has.
        let callable =
            unsafe { TypedCallable::bind(symbol.clone(), signature.with_leading(&leading)) };
        self.callables.borrow_mut().insert(key, callable.clone());
        callable
    }

    /// Send `selector` to `receiver` with a caller-declared signature
    ///
    /// `signature` describes the method's own arguments; the receiver and
    /// selector are added here. With [`Dispatch::Super`] the receiver's
    /// superclass is looked up first and the super-dispatch entry point is
    /// called with a (receiver, superclass) pair.
    ///
    /// # Safety
    ///
    /// `signature` must match the method that will actually run, and every
    /// pointer argument must be valid for it.
    pub unsafe fn send_message(
        &self,
        receiver: ObjectRef,
        selector: &str,
        args: &[ForeignValue],
        signature: &Signature,
        dispatch: Dispatch,
    ) -> BridgeResult<ForeignValue> {
        let sel = self.try_register_selector(selector)?;
        trace!(selector, dispatch = ?dispatch, signature = %signature, receiver = ?receiver, "send message");

        let mut packed;
        let effective = match dispatch {
            Dispatch::Ordinary => receiver.as_ptr(),
            Dispatch::Super => {
                let class = self.class_of(receiver)?;
                let super_class = self.superclass_of(class)?;
                packed = SuperReceiver {
                    receiver: receiver.as_ptr(),
                    super_class: super_class.as_ptr(),
                };
                &mut packed as *mut SuperReceiver as *mut c_void
            }
        };

        let mut full = Vec::with_capacity(args.len() + 2);
        full.push(ForeignValue::Pointer(effective));
        full.push(sel.into());
        full.extend_from_slice(args);
        self.callable(dispatch, signature).call(&full)
    }

    /// Ordinary message send
    ///
    /// # Safety
    ///
    /// See [`send_message`](Self::send_message).
    pub unsafe fn send(
        &self,
        receiver: ObjectRef,
        selector: &str,
        args: &[ForeignValue],
        signature: &Signature,
    ) -> BridgeResult<ForeignValue> {
        self.send_message(receiver, selector, args, signature, Dispatch::Ordinary)
    }

    /// Message send starting at the receiver's superclass
    ///
    /// # Safety
    ///
    /// See [`send_message`](Self::send_message).
    pub unsafe fn send_super(
        &self,
        receiver: ObjectRef,
        selector: &str,
        args: &[ForeignValue],
        signature: &Signature,
    ) -> BridgeResult<ForeignValue> {
        self.send_message(receiver, selector, args, signature, Dispatch::Super)
    }

    /// `[[class alloc] init...]`
    ///
    /// `init` is the initializer selector and `arg_types` its argument types;
    /// it must return an object. If `alloc` succeeds and the initializer
    /// fails, the allocated object is released before the error is returned.
    ///
    /// # Safety
    ///
    /// `arg_types` must match the initializer.
    pub unsafe fn new_instance(
        &self,
        class: ObjectRef,
        init: &str,
        args: &[ForeignValue],
        arg_types: &[ForeignType],
    ) -> BridgeResult<ObjectRef> {
        let allocated = self
            .send(class, "alloc", &[], &Signature::returning(ForeignType::Object))?
            .as_object()
            .ok_or_else(|| BridgeError::Allocation(format!("alloc returned nil for {:?}", class)))?;

        let init_signature = Signature::new(ForeignType::Object, arg_types.to_vec());
        let failure = match self.send(allocated, init, args, &init_signature) {
            Ok(value) => match value.as_object() {
                Some(obj) => return Ok(obj),
                None => BridgeError::Allocation(format!("{} returned nil for {:?}", init, class)),
            },
            Err(err) => err,
        };

        if let Err(release_err) = self.release(allocated) {
            warn!(object = ?allocated, error = %release_err, "release after failed init failed");
        }
        Err(failure)
    }

    /// Look up a registered class by name
    pub fn get_class(&self, name: &str) -> BridgeResult<ObjectRef> {
        let c_string = c_name(name)?;
        // SAFETY: objc_getClass only reads the name.
        ObjectRef::new(unsafe { self.entry.objc_get_class(&c_string)? })
            .ok_or_else(|| BridgeError::lookup(LookupKind::Class, name))
    }

    /// `[obj isKindOfClass:class]`
    ///
    /// # Safety
    ///
    /// `obj` must be a live object.
    pub unsafe fn is_instance_of(&self, obj: ObjectRef, class: ObjectRef) -> BridgeResult<bool> {
        let result = self.send(
            obj,
            "isKindOfClass:",
            &[class.into()],
            &Signature::new(ForeignType::Char, vec![ForeignType::Class]),
        )?;
        Ok(result.as_i64().map_or(false, |v| v != 0))
    }

    /// Dynamic class of `obj`
    ///
    /// # Safety
    ///
    /// `obj` must be a live object.
    pub unsafe fn class_of(&self, obj: ObjectRef) -> BridgeResult<ObjectRef> {
        ObjectRef::new(self.entry.object_get_class(obj.as_ptr())?)
            .ok_or_else(|| BridgeError::lookup(LookupKind::Class, format!("{:?}", obj)))
    }

    /// Superclass of `class`; a root class has none
    ///
    /// # Safety
    ///
    /// `class` must be a class.
    pub unsafe fn superclass_of(&self, class: ObjectRef) -> BridgeResult<ObjectRef> {
        self.send(class, "superclass", &[], &Signature::returning(ForeignType::Class))?
            .as_object()
            .ok_or_else(|| BridgeError::lookup(LookupKind::Superclass, format!("{:?}", class)))
    }

    pub fn get_protocol(&self, name: &str) -> BridgeResult<ObjectRef> {
        let c_string = c_name(name)?;
        // SAFETY: objc_getProtocol only reads the name.
        ObjectRef::new(unsafe { self.entry.objc_get_protocol(&c_string)? })
            .ok_or_else(|| BridgeError::lookup(LookupKind::Protocol, name))
    }

    /// # Safety
    ///
    /// `class` must be a class and `protocol` a protocol.
    pub unsafe fn conforms_to_protocol(
        &self,
        class: ObjectRef,
        protocol: ObjectRef,
    ) -> BridgeResult<bool> {
        Ok(self
            .entry
            .class_conforms_to_protocol(class.as_ptr(), protocol.as_ptr())?)
    }

    /// Pointer-sized value of the instance variable `name`
    ///
    /// # Safety
    ///
    /// `obj` must be a live object and the ivar pointer-sized.
    pub unsafe fn instance_variable(&self, obj: ObjectRef, name: &str) -> BridgeResult<*mut c_void> {
        let c_string = c_name(name)?;
        let (ivar, value) = self.entry.object_get_instance_variable(obj.as_ptr(), &c_string)?;
        if ivar.is_null() {
            return Err(BridgeError::lookup(LookupKind::InstanceVariable, name));
        }
        Ok(value)
    }

    /// # Safety
    ///
    /// `obj` must be a live object and the ivar pointer-sized.
    pub unsafe fn set_instance_variable(
        &self,
        obj: ObjectRef,
        name: &str,
        value: *mut c_void,
    ) -> BridgeResult<()> {
        let c_string = c_name(name)?;
        if self
            .entry
            .object_set_instance_variable(obj.as_ptr(), &c_string, value)?
            .is_null()
        {
            return Err(BridgeError::lookup(LookupKind::InstanceVariable, name));
        }
        Ok(())
    }

    /// # Safety
    ///
    /// `obj` must be owned by the caller; it may be deallocated.
    pub unsafe fn release(&self, obj: ObjectRef) -> BridgeResult<()> {
        self.send(obj, "release", &[], &Signature::returning(ForeignType::Void))?;
        Ok(())
    }

    /// # Safety
    ///
    /// `obj` must be a live object.
    pub unsafe fn retain(&self, obj: ObjectRef) -> BridgeResult<ObjectRef> {
        self.send(obj, "retain", &[], &Signature::returning(ForeignType::Object))?
            .as_object()
            .ok_or_else(|| BridgeError::Allocation(format!("retain returned nil for {:?}", obj)))
    }

    /// # Safety
    ///
    /// `obj` must be a live object supporting `copy`.
    pub unsafe fn copy(&self, obj: ObjectRef) -> BridgeResult<ObjectRef> {
        self.send(obj, "copy", &[], &Signature::returning(ForeignType::Object))?
            .as_object()
            .ok_or_else(|| BridgeError::Allocation(format!("copy returned nil for {:?}", obj)))
    }

    /// Text of a string object via `UTF8String`; `None` when it returns NULL
    ///
    /// # Safety
    ///
    /// `obj` must be a live string object.
    pub unsafe fn string_value(&self, obj: ObjectRef) -> BridgeResult<Option<String>> {
        match self.send(obj, "UTF8String", &[], &Signature::returning(ForeignType::CString))? {
            ForeignValue::Str(text) => Ok(Some(text)),
            _ => Ok(None),
        }
    }

    /// Builder for closures tagged with this runtime's block marker
    pub fn closure_builder(&self) -> ClosureBuilder {
        ClosureBuilder::new(self.entry.block_marker())
    }
}

impl fmt::Debug for MessageDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageDispatcher")
            .field("entry", &self.entry)
            .field("selectors", &self.selectors.borrow().len())
            .finish()
    }
}
