//! Dynamic loading and typed calls against the host C library

use objbridge_runtime::{
    scope, BridgeError, ForeignType, ForeignValue, LibraryHandle, OpenMode, Signature,
    TypedCallable,
};
use pretty_assertions::assert_eq;
use rstest::rstest;

#[cfg(target_os = "macos")]
const LIBC: &str = "/usr/lib/libSystem.B.dylib";
#[cfg(not(target_os = "macos"))]
const LIBC: &str = "libc.so.6";

fn open_libc(mode: OpenMode) -> LibraryHandle {
    unsafe { LibraryHandle::open(LIBC, mode) }.expect("host C library should open")
}

#[test]
fn test_open_missing_library_reports_dlopen() {
    let err = unsafe { LibraryHandle::open("/nonexistent/libnothing.so", OpenMode::Now) }
        .unwrap_err();

    assert_eq!(err.operation, "dlopen");
    assert_eq!(err.argument, "/nonexistent/libnothing.so");
    assert!(err.diagnostic.is_some());
    assert!(err.to_string().starts_with("Failed to dlopen /nonexistent/libnothing.so: "));
}

#[rstest]
#[case(OpenMode::Lazy)]
#[case(OpenMode::Now)]
fn test_open_modes(#[case] mode: OpenMode) {
    let libc = open_libc(mode);
    assert!(libc.is_open());
    assert_eq!(libc.mode(), mode);
}

#[test]
fn test_resolve_is_stable() {
    let libc = open_libc(OpenMode::Lazy);

    let first = libc.resolve("getpid").unwrap();
    let second = libc.resolve("getpid").unwrap();

    assert_eq!(first.address(), second.address());
    assert!(first.is_live());
}

#[test]
fn test_resolve_missing_symbol() {
    let libc = open_libc(OpenMode::Lazy);

    let err = libc.resolve("definitely_not_a_symbol_4711").unwrap_err();

    assert_eq!(err.operation, "dlsym");
    assert_eq!(err.argument, "definitely_not_a_symbol_4711");
}

#[test]
fn test_call_getpid() {
    let libc = open_libc(OpenMode::Lazy);
    let getpid = unsafe {
        TypedCallable::bind(
            libc.resolve("getpid").unwrap(),
            Signature::returning(ForeignType::Int),
        )
    };

    let result = unsafe { getpid.call(&[]) }.unwrap();

    assert_eq!(result, ForeignValue::I32(std::process::id() as i32));
}

#[test]
fn test_call_abs_with_argument() {
    let libc = open_libc(OpenMode::Lazy);
    let abs = unsafe {
        TypedCallable::bind(
            libc.resolve("abs").unwrap(),
            Signature::new(ForeignType::Int, vec![ForeignType::Int]),
        )
    };

    assert_eq!(unsafe { abs.call(&[ForeignValue::I32(-17)]) }, Ok(ForeignValue::I32(17)));
}

#[test]
fn test_scoped_call_leaves_nothing_open() {
    let mut observer = None;

    let (pid, getpid) = scope(|stack| {
        let libc = stack.acquire(unsafe { LibraryHandle::open(LIBC, OpenMode::Now)? }, |lib| {
            Ok(lib.close()?)
        });
        observer = Some(libc.clone());
        let getpid = unsafe {
            TypedCallable::bind(libc.resolve("getpid")?, Signature::returning(ForeignType::Int))
        };
        let pid = unsafe { getpid.call(&[])? };
        Ok((pid, getpid))
    })
    .unwrap();

    assert_eq!(pid, ForeignValue::I32(std::process::id() as i32));
    let handle = observer.unwrap();
    assert!(!handle.is_open());
    assert!(!getpid.symbol().is_live());
    assert!(matches!(unsafe { getpid.call(&[]) }, Err(BridgeError::Link(_))));
}

#[test]
fn test_close_invalidates_symbols_and_callables() {
    let libc = open_libc(OpenMode::Lazy);
    let symbol = libc.resolve("getpid").unwrap();
    let getpid =
        unsafe { TypedCallable::bind(symbol.clone(), Signature::returning(ForeignType::Int)) };
    let other = libc.clone();

    libc.close().unwrap();

    assert!(!symbol.is_live());
    assert!(!other.is_open());
    match unsafe { getpid.call(&[]) } {
        Err(BridgeError::Link(err)) => {
            assert_eq!(err.operation, "call");
            assert_eq!(err.argument, "getpid");
        }
        other => panic!("expected link error, got {:?}", other),
    }

    let again = other.close().unwrap_err();
    assert_eq!(again.operation, "dlclose");
    assert_eq!(again.diagnostic(), "library already closed");
}

#[test]
fn test_resolve_after_close() {
    let libc = open_libc(OpenMode::Lazy);
    let keep = libc.clone();
    libc.close().unwrap();

    let err = keep.resolve("getpid").unwrap_err();
    assert_eq!(err.diagnostic(), "library closed");
}
