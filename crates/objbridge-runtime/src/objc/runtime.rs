//! Raw entry points of the object runtime
//!
//! Nothing is linked at build time. Each runtime function is resolved by name
//! from the runtime library and stored as a typed function pointer. The two
//! message-send entry points stay untyped `Symbol`s: their signature is
//! different for every call and is supplied by the caller.
//!
//! Every typed entry point lives in the same image as `objc_msgSend`, so the
//! liveness of that symbol guards all of them: once the runtime library is
//! closed, each call fails with a `library closed` link error.

use crate::error::{BridgeResult, LinkError};
use crate::ffi::loader::{LibraryHandle, Symbol};
use std::ffi::{c_void, CStr};
use std::mem;
use std::os::raw::c_char;

type Id = *mut c_void;
/// The runtime's `BOOL` is one byte on every supported ABI
type Bool = i8;

type SelRegisterNameFn = unsafe extern "C" fn(*const c_char) -> Id;
type GetByNameFn = unsafe extern "C" fn(*const c_char) -> Id;
type ObjectGetClassFn = unsafe extern "C" fn(Id) -> Id;
type AllocateClassPairFn = unsafe extern "C" fn(Id, *const c_char, usize) -> Id;
type ClassPairFn = unsafe extern "C" fn(Id);
type ClassAddMethodFn = unsafe extern "C" fn(Id, Id, *const c_void, *const c_char) -> Bool;
type ClassAddIvarFn = unsafe extern "C" fn(Id, *const c_char, usize, u8, *const c_char) -> Bool;
type ClassProtocolFn = unsafe extern "C" fn(Id, Id) -> Bool;
type GetIvarFn = unsafe extern "C" fn(Id, *const c_char, *mut Id) -> Id;
type SetIvarFn = unsafe extern "C" fn(Id, *const c_char, Id) -> Id;

/// Message-send entry points, resolved as live symbols
pub const MSG_SEND: &str = "objc_msgSend";
pub const MSG_SEND_SUPER: &str = "objc_msgSendSuper";

/// Raw addresses of every runtime entry point the bridge uses
///
/// Used to build an [`EntryPoints`] table from addresses that did not come
/// from the dynamic linker, such as an alternative runtime linked in-process.
#[derive(Debug, Clone, Copy)]
pub struct EntryAddresses {
    pub msg_send: *const c_void,
    pub msg_send_super: *const c_void,
    pub sel_register_name: *const c_void,
    pub objc_get_class: *const c_void,
    pub object_get_class: *const c_void,
    pub objc_get_protocol: *const c_void,
    pub allocate_class_pair: *const c_void,
    pub register_class_pair: *const c_void,
    pub dispose_class_pair: *const c_void,
    pub class_add_method: *const c_void,
    pub class_add_ivar: *const c_void,
    pub class_add_protocol: *const c_void,
    pub class_conforms_to_protocol: *const c_void,
    pub object_get_instance_variable: *const c_void,
    pub object_set_instance_variable: *const c_void,
    /// Identity tag written into every closure built by the bridge
    pub block_marker: *const c_void,
}

/// Typed table of runtime entry points
#[derive(Clone)]
pub struct EntryPoints {
    msg_send: Symbol,
    msg_send_super: Symbol,
    sel_register_name: SelRegisterNameFn,
    objc_get_class: GetByNameFn,
    object_get_class: ObjectGetClassFn,
    objc_get_protocol: GetByNameFn,
    allocate_class_pair: AllocateClassPairFn,
    register_class_pair: ClassPairFn,
    dispose_class_pair: ClassPairFn,
    class_add_method: ClassAddMethodFn,
    class_add_ivar: ClassAddIvarFn,
    class_add_protocol: ClassProtocolFn,
    class_conforms_to_protocol: ClassProtocolFn,
    object_get_instance_variable: GetIvarFn,
    object_set_instance_variable: SetIvarFn,
    block_marker: *const c_void,
}

unsafe fn typed<F: Copy>(name: &'static str, address: *const c_void) -> Result<F, LinkError> {
    if address.is_null() {
        return Err(LinkError::new("dlsym", name, None));
    }
    debug_assert_eq!(mem::size_of::<F>(), mem::size_of::<*const c_void>());
    Ok(mem::transmute_copy::<*const c_void, F>(&address))
}

impl EntryPoints {
    /// Resolve every entry point from the runtime library, and the closure
    /// marker `marker_symbol` from the system library
    pub fn resolve(
        objc: &LibraryHandle,
        system: &LibraryHandle,
        marker_symbol: &str,
    ) -> BridgeResult<Self> {
        let addr = |name: &str| objc.resolve(name).map(|s| s.address() as *const c_void);

        let addresses = EntryAddresses {
            msg_send: addr(MSG_SEND)?,
            msg_send_super: addr(MSG_SEND_SUPER)?,
            sel_register_name: addr("sel_registerName")?,
            objc_get_class: addr("objc_getClass")?,
            object_get_class: addr("object_getClass")?,
            objc_get_protocol: addr("objc_getProtocol")?,
            allocate_class_pair: addr("objc_allocateClassPair")?,
            register_class_pair: addr("objc_registerClassPair")?,
            dispose_class_pair: addr("objc_disposeClassPair")?,
            class_add_method: addr("class_addMethod")?,
            class_add_ivar: addr("class_addIvar")?,
            class_add_protocol: addr("class_addProtocol")?,
            class_conforms_to_protocol: addr("class_conformsToProtocol")?,
            object_get_instance_variable: addr("object_getInstanceVariable")?,
            object_set_instance_variable: addr("object_setInstanceVariable")?,
            block_marker: system.resolve(marker_symbol)?.address(),
        };
        // SAFETY: every address was resolved from `objc` under its runtime
        // name.
        unsafe { Self::from_library_addresses(objc, addresses) }
    }

    /// Build the table from raw addresses that are always valid
    ///
    /// # Safety
    ///
    /// Each address must be a function with the runtime's signature for that
    /// entry point (or, for `block_marker`, a valid closure identity tag), and
    /// must stay valid for as long as the table is used.
    pub unsafe fn from_addresses(addresses: EntryAddresses) -> BridgeResult<Self> {
        let msg_send = Symbol::from_raw(MSG_SEND, addresses.msg_send)?;
        let msg_send_super = Symbol::from_raw(MSG_SEND_SUPER, addresses.msg_send_super)?;
        Self::assemble(msg_send, msg_send_super, addresses)
    }

    /// Build the table from addresses inside `owner`
    ///
    /// The table stops working when `owner` is closed.
    ///
    /// # Safety
    ///
    /// As for [`from_addresses`](Self::from_addresses), and every function
    /// address must lie inside `owner`.
    pub unsafe fn from_library_addresses(
        owner: &LibraryHandle,
        addresses: EntryAddresses,
    ) -> BridgeResult<Self> {
        let msg_send = owner.adopt(MSG_SEND, addresses.msg_send)?;
        let msg_send_super = owner.adopt(MSG_SEND_SUPER, addresses.msg_send_super)?;
        Self::assemble(msg_send, msg_send_super, addresses)
    }

    unsafe fn assemble(
        msg_send: Symbol,
        msg_send_super: Symbol,
        addresses: EntryAddresses,
    ) -> BridgeResult<Self> {
        Ok(Self {
            msg_send,
            msg_send_super,
            sel_register_name: typed("sel_registerName", addresses.sel_register_name)?,
            objc_get_class: typed("objc_getClass", addresses.objc_get_class)?,
            object_get_class: typed("object_getClass", addresses.object_get_class)?,
            objc_get_protocol: typed("objc_getProtocol", addresses.objc_get_protocol)?,
            allocate_class_pair: typed("objc_allocateClassPair", addresses.allocate_class_pair)?,
            register_class_pair: typed("objc_registerClassPair", addresses.register_class_pair)?,
            dispose_class_pair: typed("objc_disposeClassPair", addresses.dispose_class_pair)?,
            class_add_method: typed("class_addMethod", addresses.class_add_method)?,
            class_add_ivar: typed("class_addIvar", addresses.class_add_ivar)?,
            class_add_protocol: typed("class_addProtocol", addresses.class_add_protocol)?,
            class_conforms_to_protocol: typed(
                "class_conformsToProtocol",
                addresses.class_conforms_to_protocol,
            )?,
            object_get_instance_variable: typed(
                "object_getInstanceVariable",
                addresses.object_get_instance_variable,
            )?,
            object_set_instance_variable: typed(
                "object_setInstanceVariable",
                addresses.object_set_instance_variable,
            )?,
            block_marker: if addresses.block_marker.is_null() {
                return Err(LinkError::new("dlsym", "block marker", None).into());
            } else {
                addresses.block_marker
            },
        })
    }

    pub fn msg_send(&self) -> &Symbol {
        &self.msg_send
    }

    pub fn msg_send_super(&self) -> &Symbol {
        &self.msg_send_super
    }

    pub fn block_marker(&self) -> *const c_void {
        self.block_marker
    }

    /// False once the runtime library has been closed
    pub fn is_live(&self) -> bool {
        self.msg_send.is_live()
    }

    fn live(&self, entry: &'static str) -> Result<(), LinkError> {
        if self.is_live() {
            Ok(())
        } else {
            Err(LinkError::new("call", entry, Some("library closed".to_string())))
        }
    }

    pub(crate) unsafe fn sel_register_name(&self, name: &CStr) -> Result<Id, LinkError> {
        self.live("sel_registerName")?;
        Ok((self.sel_register_name)(name.as_ptr()))
    }

    pub(crate) unsafe fn objc_get_class(&self, name: &CStr) -> Result<Id, LinkError> {
        self.live("objc_getClass")?;
        Ok((self.objc_get_class)(name.as_ptr()))
    }

    pub(crate) unsafe fn object_get_class(&self, obj: Id) -> Result<Id, LinkError> {
        self.live("object_getClass")?;
        Ok((self.object_get_class)(obj))
    }

    pub(crate) unsafe fn objc_get_protocol(&self, name: &CStr) -> Result<Id, LinkError> {
        self.live("objc_getProtocol")?;
        Ok((self.objc_get_protocol)(name.as_ptr()))
    }

    pub(crate) unsafe fn allocate_class_pair(
        &self,
        superclass: Id,
        name: &CStr,
        extra: usize,
    ) -> Result<Id, LinkError> {
        self.live("objc_allocateClassPair")?;
        Ok((self.allocate_class_pair)(superclass, name.as_ptr(), extra))
    }

    pub(crate) unsafe fn register_class_pair(&self, class: Id) -> Result<(), LinkError> {
        self.live("objc_registerClassPair")?;
        (self.register_class_pair)(class);
        Ok(())
    }

    pub(crate) unsafe fn dispose_class_pair(&self, class: Id) -> Result<(), LinkError> {
        self.live("objc_disposeClassPair")?;
        (self.dispose_class_pair)(class);
        Ok(())
    }

    pub(crate) unsafe fn class_add_method(
        &self,
        class: Id,
        selector: Id,
        imp: *const c_void,
        types: &CStr,
    ) -> Result<bool, LinkError> {
        self.live("class_addMethod")?;
        Ok((self.class_add_method)(class, selector, imp, types.as_ptr()) != 0)
    }

    pub(crate) unsafe fn class_add_ivar(
        &self,
        class: Id,
        name: &CStr,
        size: usize,
        log2_align: u8,
        types: &CStr,
    ) -> Result<bool, LinkError> {
        self.live("class_addIvar")?;
        Ok((self.class_add_ivar)(class, name.as_ptr(), size, log2_align, types.as_ptr()) != 0)
    }

    pub(crate) unsafe fn class_add_protocol(&self, class: Id, protocol: Id) -> Result<bool, LinkError> {
        self.live("class_addProtocol")?;
        Ok((self.class_add_protocol)(class, protocol) != 0)
    }

    pub(crate) unsafe fn class_conforms_to_protocol(
        &self,
        class: Id,
        protocol: Id,
    ) -> Result<bool, LinkError> {
        self.live("class_conformsToProtocol")?;
        Ok((self.class_conforms_to_protocol)(class, protocol) != 0)
    }

    /// Returns the ivar handle (NULL when absent) and the stored value
    pub(crate) unsafe fn object_get_instance_variable(
        &self,
        obj: Id,
        name: &CStr,
    ) -> Result<(Id, Id), LinkError> {
        self.live("object_getInstanceVariable")?;
        let mut value: Id = std::ptr::null_mut();
        let ivar = (self.object_get_instance_variable)(obj, name.as_ptr(), &mut value);
        Ok((ivar, value))
    }

    pub(crate) unsafe fn object_set_instance_variable(
        &self,
        obj: Id,
        name: &CStr,
        value: Id,
    ) -> Result<Id, LinkError> {
        self.live("object_setInstanceVariable")?;
        Ok((self.object_set_instance_variable)(obj, name.as_ptr(), value))
    }
}

impl std::fmt::Debug for EntryPoints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryPoints")
            .field("msg_send", &self.msg_send)
            .field("msg_send_super", &self.msg_send_super)
            .field("block_marker", &self.block_marker)
            .finish_non_exhaustive()
    }
}
