//! Shared test utilities: an in-process fake of the object runtime
//!
//! The fake entry points are plain `extern "C"` functions installed through
//! `EntryPoints::from_addresses`. They record what they were asked to do in a
//! thread-local log so tests can assert call order. All state is
//! thread-local, so tests running in parallel do not see each other.
//!
//! Selectors are interned C strings, as in the real runtime. The fake
//! message-send functions take two trailing word-sized arguments and forward
//! them to installed method implementations, so only integer and pointer
//! arguments are supported.

#![allow(dead_code)]

use objbridge_runtime::{EntryAddresses, EntryPoints, MessageDispatcher, ObjectRef};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::ptr;

pub struct FakeClass {
    pub name: String,
    pub superclass: *mut FakeClass,
    pub methods: RefCell<Vec<(String, *const c_void, String)>>,
    pub ivars: RefCell<Vec<String>>,
    pub protocols: RefCell<Vec<usize>>,
    pub registered: Cell<bool>,
    pub fail_alloc: Cell<bool>,
    pub fail_init: Cell<bool>,
}

#[repr(C)]
pub struct FakeObject {
    pub isa: *mut FakeClass,
    pub released: Cell<u32>,
    pub text: *const c_char,
}

#[repr(C)]
struct FakeSuper {
    receiver: *mut c_void,
    super_class: *mut c_void,
}

thread_local! {
    static LOG: RefCell<Vec<String>> = RefCell::new(Vec::new());
    static SELECTORS: RefCell<Vec<CString>> = RefCell::new(Vec::new());
    static SELECTOR_LOOKUPS: Cell<usize> = Cell::new(0);
    static CLASSES: RefCell<Vec<*mut FakeClass>> = RefCell::new(Vec::new());
    static OBJECTS: RefCell<Vec<*mut FakeObject>> = RefCell::new(Vec::new());
    static IVAR_VALUES: RefCell<HashMap<(usize, String), usize>> = RefCell::new(HashMap::new());
    static LAST_SUPER: Cell<usize> = Cell::new(0);
}

pub static FAKE_BLOCK_CLASS: usize = 0;
pub static FAKE_PROTOCOL: usize = 0;
static IVAR_HANDLE: usize = 0;

fn record(entry: impl Into<String>) {
    LOG.with(|log| log.borrow_mut().push(entry.into()));
}

/// Drain the call log
pub fn take_log() -> Vec<String> {
    LOG.with(|log| std::mem::take(&mut *log.borrow_mut()))
}

/// How many times the fake `sel_registerName` ran on this thread
pub fn selector_lookups() -> usize {
    SELECTOR_LOOKUPS.with(|c| c.get())
}

/// Superclass passed in the last super-dispatch call
pub fn last_super_class() -> *mut c_void {
    LAST_SUPER.with(|c| c.get()) as *mut c_void
}

fn is_class(ptr: *mut c_void) -> bool {
    CLASSES.with(|classes| classes.borrow().iter().any(|&c| c as *mut c_void == ptr))
}

fn find_class(name: &str) -> Option<*mut FakeClass> {
    CLASSES.with(|classes| {
        classes
            .borrow()
            .iter()
            .copied()
            .find(|&c| unsafe { (*c).name == name })
    })
}

fn new_fake_class(name: &str, superclass: *mut FakeClass) -> *mut FakeClass {
    let class = Box::into_raw(Box::new(FakeClass {
        name: name.to_string(),
        superclass,
        methods: RefCell::new(Vec::new()),
        ivars: RefCell::new(Vec::new()),
        protocols: RefCell::new(Vec::new()),
        registered: Cell::new(false),
        fail_alloc: Cell::new(false),
        fail_init: Cell::new(false),
    }));
    CLASSES.with(|classes| classes.borrow_mut().push(class));
    class
}

/// Define and register a class
pub fn define_class(name: &str, superclass: Option<*mut FakeClass>) -> *mut FakeClass {
    let class = new_fake_class(name, superclass.unwrap_or(ptr::null_mut()));
    unsafe { (*class).registered.set(true) };
    class
}

fn new_fake_object(class: *mut FakeClass, text: *const c_char) -> *mut FakeObject {
    let obj = Box::into_raw(Box::new(FakeObject {
        isa: class,
        released: Cell::new(0),
        text,
    }));
    OBJECTS.with(|objects| objects.borrow_mut().push(obj));
    obj
}

pub fn class_ref(class: *mut FakeClass) -> ObjectRef {
    ObjectRef::new(class as *mut c_void).unwrap()
}

pub fn new_object(class: *mut FakeClass) -> ObjectRef {
    ObjectRef::new(new_fake_object(class, ptr::null()) as *mut c_void).unwrap()
}

/// A string object whose `UTF8String` is `text`
pub fn fake_string(class: *mut FakeClass, text: &str) -> ObjectRef {
    let text = CString::new(text).unwrap().into_raw();
    ObjectRef::new(new_fake_object(class, text) as *mut c_void).unwrap()
}

/// Objects created by `alloc` and `copy`, oldest first
pub fn allocated_objects() -> Vec<*mut FakeObject> {
    OBJECTS.with(|objects| objects.borrow().clone())
}

pub fn released_count(obj: ObjectRef) -> u32 {
    unsafe { (*(obj.as_ptr() as *mut FakeObject)).released.get() }
}

unsafe fn sel_name(sel: *mut c_void) -> String {
    if sel.is_null() {
        return String::new();
    }
    CStr::from_ptr(sel as *const c_char)
        .to_string_lossy()
        .into_owned()
}

unsafe fn c_text(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

unsafe fn lookup_imp(mut class: *mut FakeClass, selector: &str) -> Option<*const c_void> {
    while !class.is_null() {
        if let Some((_, imp, _)) = (*class).methods.borrow().iter().find(|(s, _, _)| s == selector) {
            return Some(*imp);
        }
        class = (*class).superclass;
    }
    None
}

unsafe fn has_ivar(mut class: *mut FakeClass, name: &str) -> bool {
    while !class.is_null() {
        if (*class).ivars.borrow().iter().any(|i| i == name) {
            return true;
        }
        class = (*class).superclass;
    }
    false
}

// ============================================================================
// Fake runtime entry points
// ============================================================================

type ForwardedImp = unsafe extern "C" fn(*mut c_void, *mut c_void, usize, usize) -> usize;

unsafe extern "C" fn fake_msg_send(recv: *mut c_void, sel: *mut c_void, a: usize, b: usize) -> usize {
    let name = sel_name(sel);
    record(name.as_str());
    if recv.is_null() {
        return 0;
    }

    if is_class(recv) {
        let class = recv as *mut FakeClass;
        return match name.as_str() {
            "alloc" if (*class).fail_alloc.get() => 0,
            "alloc" => new_fake_object(class, ptr::null()) as usize,
            "superclass" => (*class).superclass as usize,
            _ => 0,
        };
    }

    let obj = recv as *mut FakeObject;
    match name.as_str() {
        n if n.starts_with("init") => {
            if (*(*obj).isa).fail_init.get() {
                0
            } else {
                recv as usize
            }
        }
        "release" => {
            (*obj).released.set((*obj).released.get() + 1);
            0
        }
        "retain" => recv as usize,
        "copy" => new_fake_object((*obj).isa, (*obj).text) as usize,
        "UTF8String" => (*obj).text as usize,
        "isKindOfClass:" => {
            let mut class = (*obj).isa;
            while !class.is_null() {
                if class as usize == a {
                    return 1;
                }
                class = (*class).superclass;
            }
            0
        }
        _ => match lookup_imp((*obj).isa, &name) {
            Some(imp) => {
                let imp: ForwardedImp = std::mem::transmute(imp);
                imp(recv, sel, a, b)
            }
            None => 0,
        },
    }
}

unsafe extern "C" fn fake_msg_send_super(sup: *mut FakeSuper, sel: *mut c_void, _a: usize, _b: usize) -> usize {
    record("objc_msgSendSuper");
    let _ = sel_name(sel);
    if sup.is_null() || (*sup).receiver.is_null() {
        return 0;
    }
    LAST_SUPER.with(|c| c.set((*sup).super_class as usize));
    42
}

unsafe extern "C" fn fake_sel_register_name(name: *const c_char) -> *mut c_void {
    if name.is_null() {
        return ptr::null_mut();
    }
    SELECTOR_LOOKUPS.with(|c| c.set(c.get() + 1));
    let wanted = CStr::from_ptr(name);
    SELECTORS.with(|selectors| {
        let mut selectors = selectors.borrow_mut();
        if let Some(existing) = selectors.iter().find(|s| s.as_c_str() == wanted) {
            return existing.as_ptr() as *mut c_void;
        }
        let interned = wanted.to_owned();
        let p = interned.as_ptr() as *mut c_void;
        selectors.push(interned);
        p
    })
}

unsafe extern "C" fn fake_objc_get_class(name: *const c_char) -> *mut c_void {
    let name = c_text(name);
    match find_class(&name) {
        Some(class) if (*class).registered.get() => class as *mut c_void,
        _ => ptr::null_mut(),
    }
}

unsafe extern "C" fn fake_object_get_class(obj: *mut c_void) -> *mut c_void {
    record("object_getClass");
    if obj.is_null() || is_class(obj) {
        return ptr::null_mut();
    }
    (*(obj as *mut FakeObject)).isa as *mut c_void
}

unsafe extern "C" fn fake_objc_get_protocol(name: *const c_char) -> *mut c_void {
    if c_text(name) == "FakeProtocol" {
        &FAKE_PROTOCOL as *const usize as *mut c_void
    } else {
        ptr::null_mut()
    }
}

unsafe extern "C" fn fake_allocate_class_pair(
    superclass: *mut c_void,
    name: *const c_char,
    _extra: usize,
) -> *mut c_void {
    let name = c_text(name);
    if find_class(&name).is_some() {
        return ptr::null_mut();
    }
    record(format!("objc_allocateClassPair:{}", name));
    new_fake_class(&name, superclass as *mut FakeClass) as *mut c_void
}

unsafe extern "C" fn fake_register_class_pair(class: *mut c_void) {
    record("objc_registerClassPair");
    if is_class(class) {
        (*(class as *mut FakeClass)).registered.set(true);
    }
}

unsafe extern "C" fn fake_dispose_class_pair(class: *mut c_void) {
    if !is_class(class) {
        return;
    }
    let class = class as *mut FakeClass;
    record(format!("objc_disposeClassPair:{}", (*class).name));
    CLASSES.with(|classes| classes.borrow_mut().retain(|&c| c != class));
    drop(Box::from_raw(class));
}

unsafe extern "C" fn fake_class_add_method(
    class: *mut c_void,
    sel: *mut c_void,
    imp: *const c_void,
    types: *const c_char,
) -> i8 {
    if !is_class(class) {
        return 0;
    }
    let class = class as *mut FakeClass;
    let selector = sel_name(sel);
    if selector.contains("rejected") || lookup_imp(class, &selector).is_some() {
        return 0;
    }
    (*class)
        .methods
        .borrow_mut()
        .push((selector, imp, c_text(types)));
    1
}

unsafe extern "C" fn fake_class_add_ivar(
    class: *mut c_void,
    name: *const c_char,
    _size: usize,
    _log2_align: u8,
    _types: *const c_char,
) -> i8 {
    if !is_class(class) {
        return 0;
    }
    let class = class as *mut FakeClass;
    let name = c_text(name);
    if (*class).registered.get() || has_ivar(class, &name) {
        return 0;
    }
    (*class).ivars.borrow_mut().push(name);
    1
}

unsafe extern "C" fn fake_class_add_protocol(class: *mut c_void, protocol: *mut c_void) -> i8 {
    if !is_class(class) {
        return 0;
    }
    let class = class as *mut FakeClass;
    let mut protocols = (*class).protocols.borrow_mut();
    if protocols.contains(&(protocol as usize)) {
        return 0;
    }
    protocols.push(protocol as usize);
    1
}

unsafe extern "C" fn fake_class_conforms_to_protocol(class: *mut c_void, protocol: *mut c_void) -> i8 {
    if !is_class(class) {
        return 0;
    }
    (*(class as *mut FakeClass))
        .protocols
        .borrow()
        .contains(&(protocol as usize)) as i8
}

unsafe extern "C" fn fake_object_get_instance_variable(
    obj: *mut c_void,
    name: *const c_char,
    out: *mut *mut c_void,
) -> *mut c_void {
    let name = c_text(name);
    if obj.is_null() || is_class(obj) || !has_ivar((*(obj as *mut FakeObject)).isa, &name) {
        return ptr::null_mut();
    }
    let value = IVAR_VALUES.with(|v| v.borrow().get(&(obj as usize, name)).copied().unwrap_or(0));
    if !out.is_null() {
        *out = value as *mut c_void;
    }
    &IVAR_HANDLE as *const usize as *mut c_void
}

unsafe extern "C" fn fake_object_set_instance_variable(
    obj: *mut c_void,
    name: *const c_char,
    value: *mut c_void,
) -> *mut c_void {
    let name = c_text(name);
    if obj.is_null() || is_class(obj) || !has_ivar((*(obj as *mut FakeObject)).isa, &name) {
        return ptr::null_mut();
    }
    IVAR_VALUES.with(|v| v.borrow_mut().insert((obj as usize, name), value as usize));
    &IVAR_HANDLE as *const usize as *mut c_void
}

/// Addresses of every fake entry point
pub fn fake_addresses() -> EntryAddresses {
    EntryAddresses {
        msg_send: fake_msg_send as *const c_void,
        msg_send_super: fake_msg_send_super as *const c_void,
        sel_register_name: fake_sel_register_name as *const c_void,
        objc_get_class: fake_objc_get_class as *const c_void,
        object_get_class: fake_object_get_class as *const c_void,
        objc_get_protocol: fake_objc_get_protocol as *const c_void,
        allocate_class_pair: fake_allocate_class_pair as *const c_void,
        register_class_pair: fake_register_class_pair as *const c_void,
        dispose_class_pair: fake_dispose_class_pair as *const c_void,
        class_add_method: fake_class_add_method as *const c_void,
        class_add_ivar: fake_class_add_ivar as *const c_void,
        class_add_protocol: fake_class_add_protocol as *const c_void,
        class_conforms_to_protocol: fake_class_conforms_to_protocol as *const c_void,
        object_get_instance_variable: fake_object_get_instance_variable as *const c_void,
        object_set_instance_variable: fake_object_set_instance_variable as *const c_void,
        block_marker: &FAKE_BLOCK_CLASS as *const usize as *const c_void,
    }
}

/// A dispatcher wired to the fake runtime, with a fresh log
pub fn fake_dispatcher() -> MessageDispatcher {
    let entry = unsafe { EntryPoints::from_addresses(fake_addresses()) }.unwrap();
    take_log();
    MessageDispatcher::new(entry)
}
