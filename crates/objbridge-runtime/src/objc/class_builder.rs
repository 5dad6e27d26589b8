//! Runtime class construction
//!
//! A class is allocated as an unregistered class pair, mutated (methods,
//! instance variables, protocol conformance), then registered. Registration
//! is one-way: [`ClassDescriptor::register`] consumes the unregistered
//! descriptor and returns a [`RegisteredClass`], which has no mutating
//! methods.
//!
//! The runtime never forgets a registered class, so registering also pins
//! the native callbacks behind its methods for the rest of the process. A
//! descriptor dropped before registration disposes its class pair, and the
//! name can be allocated again.
//!
//! # Example
//!
//! ```no_run
//! # use objbridge_runtime::{ClassDescriptor, ForeignType, ForeignValue, MessageDispatcher};
//! # fn demo(dispatcher: &MessageDispatcher) -> objbridge_runtime::BridgeResult<()> {
//! let superclass = dispatcher.get_class("NSObject")?;
//! let mut class = ClassDescriptor::allocate(dispatcher, superclass, "Counter", 0)?;
//! class.add_ivar("count", &ForeignType::Long)?;
//! class.add_native_method(
//!     "answer",
//!     |_args| ForeignValue::I32(42),
//!     ForeignType::Int,
//!     vec![],
//! )?;
//! let class = class.register()?;
//! assert_eq!(class.name(), "Counter");
//! # Ok(())
//! # }
//! ```
//!
//! A registered class cannot be mutated:
//!
//! ```compile_fail
//! # use objbridge_runtime::{ClassDescriptor, ForeignType, MessageDispatcher};
//! # fn demo(dispatcher: &MessageDispatcher) -> objbridge_runtime::BridgeResult<()> {
//! # let superclass = dispatcher.get_class("NSObject")?;
//! let mut class = ClassDescriptor::allocate(dispatcher, superclass, "Sealed", 0)?.register()?;
//! class.add_ivar("late", &ForeignType::Int)?;
//! # Ok(())
//! # }
//! ```
//!
//! ```compile_fail
//! # use objbridge_runtime::{ClassDescriptor, ForeignType, ForeignValue, MessageDispatcher};
//! # fn demo(dispatcher: &MessageDispatcher) -> objbridge_runtime::BridgeResult<()> {
//! # let superclass = dispatcher.get_class("NSObject")?;
//! let mut class = ClassDescriptor::allocate(dispatcher, superclass, "Sealed", 0)?.register()?;
//! class.add_native_method("late", |_| ForeignValue::Void, ForeignType::Void, vec![])?;
//! # Ok(())
//! # }
//! ```

use crate::error::{BridgeError, BridgeResult};
use crate::ffi::callbacks::{create_callback, NativeCallback};
use crate::ffi::marshal::MarshalError;
use crate::ffi::types::{ForeignType, ForeignValue, Signature};
use crate::objc::dispatch::{MessageDispatcher, ObjectRef};
use crate::objc::encoding;
use std::ffi::{c_void, CString};
use std::marker::PhantomData;
use std::mem;
use tracing::{debug, warn};

/// Typestate: the class may still be mutated
#[derive(Debug)]
pub enum Unregistered {}

/// Typestate: the class is registered and immutable
#[derive(Debug)]
pub enum Registered {}

fn c_string(text: &str) -> BridgeResult<CString> {
    CString::new(text).map_err(|e| MarshalError::InvalidString(e.to_string()).into())
}

#[derive(Debug)]
struct MethodRecord {
    selector: String,
    imp: *const c_void,
    encoding: CString,
}

#[derive(Debug)]
struct IvarRecord {
    name: String,
    size: usize,
    encoding: String,
}

/// A class created at run time
///
/// Until registration the descriptor owns the class pair and the native
/// callbacks installed as method implementations.
pub struct ClassDescriptor<'d, S> {
    dispatcher: &'d MessageDispatcher,
    class: ObjectRef,
    name: String,
    superclass: ObjectRef,
    methods: Vec<MethodRecord>,
    ivars: Vec<IvarRecord>,
    protocols: Vec<String>,
    callbacks: Vec<NativeCallback>,
    /// Allocated but not registered; disposed on drop
    pending: bool,
    _state: PhantomData<S>,
}

/// A class that has been registered with the runtime
pub type RegisteredClass<'d> = ClassDescriptor<'d, Registered>;

impl<'d> ClassDescriptor<'d, Unregistered> {
    /// Allocate a new class pair named `name` under `superclass`
    ///
    /// Fails with an allocation error when the runtime refuses, most often
    /// because a class with that name already exists.
    pub fn allocate(
        dispatcher: &'d MessageDispatcher,
        superclass: ObjectRef,
        name: &str,
        extra_bytes: usize,
    ) -> BridgeResult<Self> {
        let c_name = c_string(name)?;
        // SAFETY: superclass is a non-nil class reference and the name is
        // NUL-terminated.
        let raw = unsafe {
            dispatcher
                .entry_points()
                .allocate_class_pair(superclass.as_ptr(), &c_name, extra_bytes)?
        };
        let class = ObjectRef::new(raw).ok_or_else(|| {
            BridgeError::Allocation(format!(
                "objc_allocateClassPair returned nil for '{}' (did you register it twice?)",
                name
            ))
        })?;
        debug!(class = name, superclass = ?superclass, "allocated class pair");

        Ok(Self {
            dispatcher,
            class,
            name: name.to_string(),
            superclass,
            methods: Vec::new(),
            ivars: Vec::new(),
            protocols: Vec::new(),
            callbacks: Vec::new(),
            pending: true,
            _state: PhantomData,
        })
    }

    fn install(&mut self, selector: &str, imp: *const c_void, encoding: &str) -> BridgeResult<()> {
        let sel = self.dispatcher.try_register_selector(selector)?;
        let types = c_string(encoding)?;
        // SAFETY: the class is unregistered and `imp` is callable.
        let added = unsafe {
            self.dispatcher
                .entry_points()
                .class_add_method(self.class.as_ptr(), sel.as_ptr(), imp, &types)?
        };
        if !added {
            return Err(BridgeError::Configuration(format!(
                "class_addMethod rejected -{} on {} (selector already defined?)",
                selector, self.name
            )));
        }
        debug!(class = %self.name, selector, encoding, "added method");
        self.methods.push(MethodRecord {
            selector: selector.to_string(),
            imp,
            encoding: types,
        });
        Ok(())
    }

    /// Add a method whose implementation is a raw entry point
    ///
    /// The encoding is parsed but cannot be checked against `imp`.
    ///
    /// # Safety
    ///
    /// `imp` must be a function taking (self, _cmd, ...) exactly as
    /// `encoding` describes, valid for the life of the class.
    pub unsafe fn add_method_raw(
        &mut self,
        selector: &str,
        imp: *const c_void,
        encoding: &str,
    ) -> BridgeResult<()> {
        encoding::parse_signature(encoding)?;
        self.install(selector, imp, encoding)
    }

    /// Add a method implemented by `callback`
    ///
    /// The callback's signature must include the leading self and _cmd
    /// arguments, and `encoding` must agree with it element by element.
    pub fn add_method(
        &mut self,
        selector: &str,
        callback: NativeCallback,
        encoding: &str,
    ) -> BridgeResult<()> {
        encoding::verify(encoding, callback.signature())?;
        self.install(selector, callback.fn_ptr(), encoding)?;
        self.callbacks.push(callback);
        Ok(())
    }

    /// Add a method implemented by a Rust closure
    ///
    /// `args` are the method's own arguments; `func` receives self and _cmd
    /// first. The encoding is derived from the declared types.
    pub fn add_native_method<F>(
        &mut self,
        selector: &str,
        func: F,
        ret: ForeignType,
        args: Vec<ForeignType>,
    ) -> BridgeResult<()>
    where
        F: Fn(&[ForeignValue]) -> ForeignValue + 'static,
    {
        let signature = Signature::new(ret, args)
            .with_leading(&[ForeignType::Object, ForeignType::Selector]);
        let encoding = signature.encoding();
        let callback = create_callback(func, signature)?;
        self.add_method(selector, callback, &encoding)
    }

    /// Add an instance variable laid out as `ty`
    pub fn add_ivar(&mut self, name: &str, ty: &ForeignType) -> BridgeResult<()> {
        let log2_align = ty.align().trailing_zeros() as u8;
        self.add_ivar_raw(name, ty.size(), log2_align, &ty.encoding())
    }

    /// Add an instance variable with explicit size, log2 alignment and
    /// encoding
    pub fn add_ivar_raw(
        &mut self,
        name: &str,
        size: usize,
        log2_align: u8,
        encoding: &str,
    ) -> BridgeResult<()> {
        encoding::parse_signature(encoding)?;
        let c_name = c_string(name)?;
        let types = c_string(encoding)?;
        // SAFETY: the class is unregistered.
        let added = unsafe {
            self.dispatcher.entry_points().class_add_ivar(
                self.class.as_ptr(),
                &c_name,
                size,
                log2_align,
                &types,
            )?
        };
        if !added {
            return Err(BridgeError::Configuration(format!(
                "class_addIvar rejected '{}' on {}",
                name, self.name
            )));
        }
        self.ivars.push(IvarRecord {
            name: name.to_string(),
            size,
            encoding: encoding.to_string(),
        });
        Ok(())
    }

    /// Declare conformance to the protocol named `protocol`
    ///
    /// Required methods are not checked.
    pub fn add_protocol(&mut self, protocol: &str) -> BridgeResult<()> {
        let handle = self.dispatcher.get_protocol(protocol)?;
        // SAFETY: both references are non-nil and the class is unregistered.
        let added = unsafe {
            self.dispatcher
                .entry_points()
                .class_add_protocol(self.class.as_ptr(), handle.as_ptr())?
        };
        if !added {
            return Err(BridgeError::Configuration(format!(
                "class_addProtocol rejected {} on {}",
                protocol, self.name
            )));
        }
        self.protocols.push(protocol.to_string());
        Ok(())
    }

    /// Register the class; no further mutation is possible
    ///
    /// The method callbacks are pinned for the rest of the process, since the
    /// runtime may call them at any later point.
    pub fn register(mut self) -> BridgeResult<RegisteredClass<'d>> {
        // SAFETY: the class pair is allocated and not yet registered.
        unsafe {
            self.dispatcher
                .entry_points()
                .register_class_pair(self.class.as_ptr())?
        };
        self.pending = false;

        let callbacks = mem::take(&mut self.callbacks);
        debug!(
            class = %self.name,
            methods = self.methods.len(),
            ivars = self.ivars.len(),
            pinned = callbacks.len(),
            "registered class"
        );
        mem::forget(callbacks);

        Ok(ClassDescriptor {
            dispatcher: self.dispatcher,
            class: self.class,
            name: mem::take(&mut self.name),
            superclass: self.superclass,
            methods: mem::take(&mut self.methods),
            ivars: mem::take(&mut self.ivars),
            protocols: mem::take(&mut self.protocols),
            callbacks: Vec::new(),
            pending: false,
            _state: PhantomData,
        })
    }
}

impl<'d, S> ClassDescriptor<'d, S> {
    pub fn class(&self) -> ObjectRef {
        self.class
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn superclass(&self) -> ObjectRef {
        self.superclass
    }

    /// Selectors added so far, in order
    pub fn selectors(&self) -> impl Iterator<Item = &str> {
        self.methods.iter().map(|m| m.selector.as_str())
    }

    /// Encoding the method for `selector` was added with
    pub fn method_encoding(&self, selector: &str) -> Option<&str> {
        self.methods
            .iter()
            .find(|m| m.selector == selector)
            .and_then(|m| m.encoding.to_str().ok())
    }

    /// Entry point installed for `selector`
    pub fn method_imp(&self, selector: &str) -> Option<*const c_void> {
        self.methods
            .iter()
            .find(|m| m.selector == selector)
            .map(|m| m.imp)
    }

    /// Instance variables as (name, size, encoding)
    pub fn ivars(&self) -> impl Iterator<Item = (&str, usize, &str)> {
        self.ivars
            .iter()
            .map(|i| (i.name.as_str(), i.size, i.encoding.as_str()))
    }

    pub fn protocols(&self) -> &[String] {
        &self.protocols
    }
}

impl<'d, S> Drop for ClassDescriptor<'d, S> {
    fn drop(&mut self) {
        if !self.pending {
            return;
        }
        // SAFETY: the pair was allocated by this descriptor, never registered,
        // and an unregistered class has no instances.
        match unsafe {
            self.dispatcher
                .entry_points()
                .dispose_class_pair(self.class.as_ptr())
        } {
            Ok(()) => debug!(class = %self.name, "disposed unregistered class pair"),
            Err(err) => warn!(class = %self.name, error = %err, "class pair left allocated"),
        }
    }
}

impl<'d, S> std::fmt::Debug for ClassDescriptor<'d, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("name", &self.name)
            .field("class", &self.class)
            .field("superclass", &self.superclass)
            .field("methods", &self.methods)
            .field("ivars", &self.ivars)
            .field("protocols", &self.protocols)
            .finish()
    }
}
