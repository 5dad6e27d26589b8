//! Closure (block) construction tests

mod common;

use common::*;
use objbridge_runtime::objc::BLOCK_HAS_SIGNATURE;
use objbridge_runtime::{BridgeError, ForeignType, ForeignValue};
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::cell::RefCell;
use std::ffi::c_void;
use std::rc::Rc;

#[test]
fn test_empty_signature_rejected() {
    let builder = fake_dispatcher().closure_builder();

    let result = builder.build(|_| ForeignValue::Void, ForeignType::Void, vec![], Some(""));

    match result {
        Err(BridgeError::Configuration(msg)) => assert!(msg.contains("v@?"), "{}", msg),
        other => panic!("expected configuration error, got {:?}", other),
    }
}

#[rstest]
#[case(Some("v@?"), BLOCK_HAS_SIGNATURE)]
#[case(Some("v8@?0"), BLOCK_HAS_SIGNATURE)]
#[case(None, 0)]
fn test_signature_flag(#[case] signature: Option<&str>, #[case] flags: i32) {
    let builder = fake_dispatcher().closure_builder();

    let closure = builder
        .build(|_| ForeignValue::Void, ForeignType::Void, vec![], signature)
        .unwrap();

    assert_eq!(closure.flags(), flags);
    assert_eq!(
        closure.signature().map(|s| s.to_str().unwrap()),
        signature
    );
}

#[test]
fn test_signature_must_match_declared_types() {
    let builder = fake_dispatcher().closure_builder();

    let result = builder.build(
        |_| ForeignValue::I32(0),
        ForeignType::Int,
        vec![ForeignType::Int],
        Some("v@?"),
    );

    assert!(matches!(result, Err(BridgeError::Configuration(_))));
}

#[test]
fn test_layout_is_tagged_with_block_marker() {
    let builder = fake_dispatcher().closure_builder();
    let closure = builder
        .build(|_| ForeignValue::Void, ForeignType::Void, vec![], Some("v@?"))
        .unwrap();

    let layout = closure.layout();
    assert_eq!(layout.isa, &FAKE_BLOCK_CLASS as *const usize as *const c_void);
    assert_eq!(layout.reserved, 0);
    assert!(!layout.invoke.is_null());
    assert_eq!(closure.as_ptr(), layout as *const _ as *mut c_void);
    if cfg!(target_pointer_width = "64") {
        assert_eq!(std::mem::size_of_val(layout), 32);
    }
}

#[test]
fn test_invoke_reaches_callable() {
    let builder = fake_dispatcher().closure_builder();
    let closure = builder
        .build(
            |args| match (&args[0], &args[1]) {
                (ForeignValue::I32(a), ForeignValue::I32(b)) => ForeignValue::I32(a + b),
                _ => ForeignValue::I32(-1),
            },
            ForeignType::Int,
            vec![ForeignType::Int, ForeignType::Int],
            Some("i@?ii"),
        )
        .unwrap();

    let result = unsafe { closure.invoke(&[ForeignValue::I32(40), ForeignValue::I32(2)]) };

    assert_eq!(result, Ok(ForeignValue::I32(42)));
}

#[test]
fn test_completion_style_closure_captures_state() {
    let builder = fake_dispatcher().closure_builder();
    let received = Rc::new(RefCell::new(Vec::new()));
    let sink = received.clone();
    let closure = builder
        .build(
            move |args| {
                sink.borrow_mut().push(args[0].clone());
                ForeignValue::Void
            },
            ForeignType::Void,
            vec![ForeignType::Pointer],
            Some("v@?@"),
        )
        .unwrap();

    unsafe {
        closure.invoke(&[ForeignValue::null()]).unwrap();
        closure.invoke(&[ForeignValue::Pointer(0x10 as *mut c_void)]).unwrap();
    }

    assert_eq!(
        *received.borrow(),
        vec![ForeignValue::null(), ForeignValue::Pointer(0x10 as *mut c_void)]
    );
}

#[test]
fn test_panicking_closure_returns_zero() {
    let builder = fake_dispatcher().closure_builder();
    let closure = builder
        .build(
            |_| panic!("callable failed"),
            ForeignType::LongLong,
            vec![],
            Some("q@?"),
        )
        .unwrap();

    let result = unsafe { closure.invoke(&[]) };

    assert_eq!(result, Ok(ForeignValue::I64(0)));
}
