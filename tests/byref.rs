//! By-reference round-trips: scalar pointees of every fundamental type,
//! struct-pointer mutation, fault containment, re-registration

use callbridge::{
    Arch, BaseType, CallValue, Error, Executor, InProcessLibrary, LibraryKind, Scalar, Session,
    SessionConfig, StructInstance, TypeDescriptor,
};

macro_rules! bump_fixture {
    ($name:ident, $ty:ty) => {
        extern "C" fn $name(p: *mut $ty) {
            unsafe { *p = (*p).wrapping_add(1) };
        }
    };
}

bump_fixture!(bump_i8, i8);
bump_fixture!(bump_i16, i16);
bump_fixture!(bump_i32, i32);
bump_fixture!(bump_i64, i64);
bump_fixture!(bump_u8, u8);
bump_fixture!(bump_u16, u16);
bump_fixture!(bump_u32, u32);
bump_fixture!(bump_u64, u64);

extern "C" fn bump_f32(p: *mut f32) {
    unsafe { *p += 1.0 };
}

extern "C" fn bump_f64(p: *mut f64) {
    unsafe { *p += 1.0 };
}

extern "C" fn toggle_bool(p: *mut u8) {
    unsafe { *p = if *p == 0 { 1 } else { 0 } };
}

#[repr(C)]
struct CPoint {
    x: i32,
    y: i32,
}

extern "C" fn swap_point(p: *mut CPoint) {
    unsafe {
        let point = &mut *p;
        std::mem::swap(&mut point.x, &mut point.y);
    }
}

#[repr(C)]
struct CHolder {
    n: i32,
    data: *mut u8,
}

extern "C" fn fill_holder(h: *mut CHolder) {
    unsafe {
        let holder = &*h;
        for i in 0..holder.n {
            *holder.data.add(i as usize) = i as u8;
        }
    }
}

extern "C" fn ok_hresult() -> i32 {
    0
}

extern "C" fn failing_hresult() -> i32 {
    0x80004005u32 as i32
}

extern "C" fn square_i32(v: i32) -> i32 {
    v * v
}

fn demo_library() -> InProcessLibrary {
    InProcessLibrary::new()
        .routine("bump_i8", bump_i8 as *const (), 1)
        .routine("bump_i16", bump_i16 as *const (), 1)
        .routine("bump_i32", bump_i32 as *const (), 1)
        .routine("bump_i64", bump_i64 as *const (), 1)
        .routine("bump_u8", bump_u8 as *const (), 1)
        .routine("bump_u16", bump_u16 as *const (), 1)
        .routine("bump_u32", bump_u32 as *const (), 1)
        .routine("bump_u64", bump_u64 as *const (), 1)
        .routine("bump_f32", bump_f32 as *const (), 1)
        .routine("bump_f64", bump_f64 as *const (), 1)
        .routine("toggle_bool", toggle_bool as *const (), 1)
        .routine("swap_point", swap_point as *const (), 1)
        .routine("fill_holder", fill_holder as *const (), 1)
        .routine("ok_hresult", ok_hresult as *const (), 0)
        .routine("failing_hresult", failing_hresult as *const (), 0)
        .routine("square_i32", square_i32 as *const (), 1)
        .routine("broken", core::ptr::null(), 0)
}

fn session() -> Session {
    let executor =
        Executor::new("byref-test", Arch::Win64).with_virtual_library("demo.dll", demo_library());
    Session::with_executor(SessionConfig::default(), executor).unwrap()
}

#[test]
fn every_fundamental_mutates_through_its_pointer() {
    let cases: Vec<(&str, BaseType, Scalar, Scalar)> = vec![
        ("bump_i8", BaseType::I8, Scalar::I8(-5), Scalar::I8(-4)),
        ("bump_i16", BaseType::I16, Scalar::I16(1000), Scalar::I16(1001)),
        ("bump_i32", BaseType::I32, Scalar::I32(-70000), Scalar::I32(-69999)),
        (
            "bump_i64",
            BaseType::I64,
            Scalar::I64(1 << 40),
            Scalar::I64((1 << 40) + 1),
        ),
        ("bump_u8", BaseType::U8, Scalar::U8(255), Scalar::U8(0)),
        ("bump_u16", BaseType::U16, Scalar::U16(9), Scalar::U16(10)),
        ("bump_u32", BaseType::U32, Scalar::U32(7), Scalar::U32(8)),
        (
            "bump_u64",
            BaseType::U64,
            Scalar::U64(u64::MAX),
            Scalar::U64(0),
        ),
        ("bump_f32", BaseType::F32, Scalar::F32(2.5), Scalar::F32(3.5)),
        ("bump_f64", BaseType::F64, Scalar::F64(-0.5), Scalar::F64(0.5)),
        (
            "toggle_bool",
            BaseType::Bool,
            Scalar::Bool(false),
            Scalar::Bool(true),
        ),
        (
            "bump_u8",
            BaseType::Char,
            Scalar::Char(b'a'),
            Scalar::Char(b'b'),
        ),
        (
            "bump_u32",
            BaseType::WChar,
            Scalar::WChar('A' as u32),
            Scalar::WChar('B' as u32),
        ),
        (
            "bump_u64",
            BaseType::UsizePtr,
            Scalar::Usize(4096),
            Scalar::Usize(4097),
        ),
    ];

    let session = session();
    let dll = session.load_library("demo.dll", LibraryKind::Cdll).unwrap();
    for (name, base, before, after) in cases {
        let routine = dll.routine(name).unwrap();
        routine
            .register(
                vec![TypeDescriptor::fundamental(base).pointer()],
                TypeDescriptor::void(),
                vec![],
            )
            .unwrap();

        let arg = CallValue::by_ref(before);
        let alias = arg.clone();
        let result = routine.invoke(std::slice::from_ref(&arg)).unwrap();
        assert!(!result.faulted(), "{}", name);
        assert_eq!(alias.scalar(), Some(after), "{}", name);
    }
    session.terminate();
}

#[test]
fn struct_by_pointer_mutation_reaches_the_callers_instance() {
    let session = session();
    let dll = session.load_library("demo.dll", LibraryKind::Cdll).unwrap();
    let routine = dll.routine("swap_point").unwrap();
    routine
        .register(
            vec![TypeDescriptor::structure(
                "point",
                vec![
                    TypeDescriptor::fundamental(BaseType::I32).named("x"),
                    TypeDescriptor::fundamental(BaseType::I32).named("y"),
                ],
            )
            .pointer()],
            TypeDescriptor::void(),
            vec![],
        )
        .unwrap();

    let instance = StructInstance::new(
        "point",
        vec![
            ("x".into(), CallValue::Scalar(Scalar::I32(11))),
            ("y".into(), CallValue::Scalar(Scalar::I32(-22))),
        ],
    );
    let arg = CallValue::struct_value(instance);
    let alias = arg.clone();
    let result = routine.invoke(std::slice::from_ref(&arg)).unwrap();
    assert!(!result.faulted());

    let snapshot = alias.struct_snapshot().unwrap();
    assert_eq!(snapshot.field("x").unwrap().scalar(), Some(Scalar::I32(-22)));
    assert_eq!(snapshot.field("y").unwrap().scalar(), Some(Scalar::I32(11)));
    session.terminate();
}

#[test]
fn buffer_behind_a_struct_field_synchronizes() {
    use callbridge::{LengthSource, SyncDirective};

    let session = session();
    let dll = session.load_library("demo.dll", LibraryKind::Cdll).unwrap();
    let routine = dll.routine("fill_holder").unwrap();
    routine
        .register(
            vec![TypeDescriptor::structure(
                "holder",
                vec![
                    TypeDescriptor::fundamental(BaseType::I32).named("n"),
                    TypeDescriptor::fundamental(BaseType::U8).pointer().named("data"),
                ],
            )
            .pointer()],
            TypeDescriptor::void(),
            // The buffer lives behind a struct field; its length lives in a
            // sibling field of the same struct.
            vec![SyncDirective::new(vec![0, 1], LengthSource::Argument(vec![0, 0]))],
        )
        .unwrap();

    let buffer = CallValue::buffer(vec![0xFFu8; 5]);
    let buffer_alias = buffer.clone();
    let instance = StructInstance::new(
        "holder",
        vec![
            ("n".into(), CallValue::Scalar(Scalar::I32(5))),
            ("data".into(), buffer),
        ],
    );
    let result = routine
        .invoke(&[CallValue::struct_value(instance)])
        .unwrap();
    assert!(!result.faulted());

    assert_eq!(buffer_alias.buffer_bytes().unwrap(), vec![0, 1, 2, 3, 4]);
    session.terminate();
}

#[test]
fn native_fault_degrades_the_result_and_spares_the_session() {
    let session = session();
    let dll = session.load_library("demo.dll", LibraryKind::Cdll).unwrap();

    let broken = dll.routine("broken").unwrap();
    let result = broken.invoke(&[]).unwrap();
    assert!(result.faulted());
    assert_eq!(result.value, None);

    // The session keeps serving
    let square = dll.routine("square_i32").unwrap();
    square
        .register(
            vec![TypeDescriptor::fundamental(BaseType::I32)],
            TypeDescriptor::fundamental(BaseType::I32),
            vec![],
        )
        .unwrap();
    let result = square
        .invoke(&[CallValue::Scalar(Scalar::I32(12))])
        .unwrap();
    assert_eq!(result.value, Some(Scalar::I32(144)));
    session.terminate();
}

#[test]
fn second_registration_governs_entirely() {
    let session = session();
    let dll = session.load_library("demo.dll", LibraryKind::Cdll).unwrap();
    let routine = dll.routine("square_i32").unwrap();

    routine
        .register(
            vec![TypeDescriptor::fundamental(BaseType::I16)],
            TypeDescriptor::fundamental(BaseType::I16),
            vec![],
        )
        .unwrap();
    routine
        .register(
            vec![TypeDescriptor::fundamental(BaseType::I32)],
            TypeDescriptor::fundamental(BaseType::I32),
            vec![],
        )
        .unwrap();

    let result = routine
        .invoke(&[CallValue::Scalar(Scalar::I32(300))])
        .unwrap();
    // 300^2 overflows the first registration's i16; only the second governs
    assert_eq!(result.value, Some(Scalar::I32(90000)));
    session.terminate();
}

#[test]
fn failed_registration_leaves_the_previous_signature_in_force() {
    let session = session();
    let dll = session.load_library("demo.dll", LibraryKind::Cdll).unwrap();
    let routine = dll.routine("square_i32").unwrap();

    routine
        .register(
            vec![TypeDescriptor::fundamental(BaseType::I32)],
            TypeDescriptor::fundamental(BaseType::I32),
            vec![],
        )
        .unwrap();
    let err = routine
        .register(
            vec![TypeDescriptor::fundamental(BaseType::F80)],
            TypeDescriptor::void(),
            vec![],
        )
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedType { .. }));

    let result = routine
        .invoke(&[CallValue::Scalar(Scalar::I32(9))])
        .unwrap();
    assert_eq!(result.value, Some(Scalar::I32(81)));
    session.terminate();
}

#[test]
fn ole_libraries_check_hresults() {
    let session = session();
    let dll = session.load_library("demo.dll", LibraryKind::Oledll).unwrap();

    let ok = dll.routine("ok_hresult").unwrap();
    ok.register(vec![], TypeDescriptor::fundamental(BaseType::I32), vec![])
        .unwrap();
    assert_eq!(ok.invoke(&[]).unwrap().value, Some(Scalar::I32(0)));

    let failing = dll.routine("failing_hresult").unwrap();
    failing
        .register(vec![], TypeDescriptor::fundamental(BaseType::I32), vec![])
        .unwrap();
    let err = failing.invoke(&[]).unwrap_err();
    assert!(matches!(err, Error::NativeFault { .. }));
    assert!(err.to_string().contains("80004005"));
    session.terminate();
}
