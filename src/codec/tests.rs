//! Codec test suite

use super::*;
use crate::desc::{BaseType, StructLayout, TypeDescriptor};

fn no_layouts(_: &str) -> Option<StructLayout> {
    None
}

fn point_desc() -> TypeDescriptor {
    TypeDescriptor::structure(
        "point",
        vec![
            TypeDescriptor::fundamental(BaseType::I32).named("x"),
            TypeDescriptor::fundamental(BaseType::I32).named("y"),
        ],
    )
}

fn point(x: i32, y: i32) -> StructInstance {
    StructInstance::new(
        "point",
        vec![
            ("x".into(), CallValue::Scalar(Scalar::I32(x))),
            ("y".into(), CallValue::Scalar(Scalar::I32(y))),
        ],
    )
}

#[test]
fn pack_scalars_by_value() {
    let codec = ArgCodec::new();
    let argtypes = vec![
        TypeDescriptor::fundamental(BaseType::I16).named("a"),
        TypeDescriptor::fundamental(BaseType::F64).named("b"),
    ];
    let args = vec![
        CallValue::Scalar(Scalar::I16(-3)),
        CallValue::Scalar(Scalar::F64(2.5)),
    ];
    let wire = codec.pack_args(&argtypes, &args).unwrap();
    assert_eq!(wire[0].name.as_deref(), Some("a"));
    assert_eq!(wire[0].value, WireValue::Scalar(Scalar::I16(-3)));
    assert_eq!(wire[1].value, WireValue::Scalar(Scalar::F64(2.5)));
}

#[test]
fn pack_coerces_to_declared_base() {
    let codec = ArgCodec::new();
    let argtypes = vec![TypeDescriptor::fundamental(BaseType::I16)];
    let wire = codec
        .pack_args(&argtypes, &[CallValue::Scalar(Scalar::I64(40))])
        .unwrap();
    assert_eq!(wire[0].value, WireValue::Scalar(Scalar::I16(40)));
}

#[test]
fn pack_rejects_float_for_integer_slot() {
    let codec = ArgCodec::new();
    let argtypes = vec![TypeDescriptor::fundamental(BaseType::I32)];
    assert!(codec
        .pack_args(&argtypes, &[CallValue::Scalar(Scalar::F64(1.5))])
        .is_err());
}

#[test]
fn pack_arg_count_mismatch() {
    let codec = ArgCodec::new();
    let argtypes = vec![TypeDescriptor::fundamental(BaseType::I32)];
    let err = codec.pack_args(&argtypes, &[]).unwrap_err();
    assert!(matches!(err, crate::errors::Error::Marshal { .. }));
}

#[test]
fn byref_packs_pointee_value() {
    let codec = ArgCodec::new();
    let argtypes = vec![TypeDescriptor::fundamental(BaseType::I32).pointer()];
    let arg = CallValue::by_ref(Scalar::I32(99));
    let wire = codec.pack_args(&argtypes, std::slice::from_ref(&arg)).unwrap();
    assert_eq!(wire[0].value, WireValue::Scalar(Scalar::I32(99)));
}

#[test]
fn null_pointer_packs_as_none_pair() {
    let codec = ArgCodec::new();
    let argtypes = vec![TypeDescriptor::fundamental(BaseType::F32).pointer()];
    let wire = codec.pack_args(&argtypes, &[CallValue::Null]).unwrap();
    assert_eq!(wire[0], WireEntry::none());
}

#[test]
fn buffer_under_scalar_pointer_packs_first_element() {
    let codec = ArgCodec::new();
    let argtypes = vec![TypeDescriptor::fundamental(BaseType::F32).pointer()];
    let bytes: Vec<u8> = [5.74f32, 3.72]
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect();
    let wire = codec
        .pack_args(&argtypes, &[CallValue::buffer(bytes)])
        .unwrap();
    assert_eq!(wire[0].value, WireValue::Scalar(Scalar::F32(5.74)));
}

#[test]
fn untyped_pointer_packs_as_none_pair() {
    let codec = ArgCodec::new();
    let argtypes = vec![TypeDescriptor::untyped_pointer()];
    let wire = codec
        .pack_args(&argtypes, &[CallValue::buffer(vec![1, 2, 3])])
        .unwrap();
    assert_eq!(wire[0], WireEntry::none());
}

#[test]
fn struct_packs_nested_field_list() {
    let codec = ArgCodec::new();
    let argtypes = vec![point_desc()];
    let arg = CallValue::struct_value(point(3, -7));
    let wire = codec.pack_args(&argtypes, &[arg]).unwrap();
    let WireValue::List(fields) = &wire[0].value else {
        panic!("expected a field list");
    };
    assert_eq!(fields[0].name.as_deref(), Some("x"));
    assert_eq!(fields[0].value, WireValue::Scalar(Scalar::I32(3)));
    assert_eq!(fields[1].value, WireValue::Scalar(Scalar::I32(-7)));
}

#[test]
fn unpack_scalar_by_value() {
    let codec = ArgCodec::new();
    let argtypes = vec![TypeDescriptor::fundamental(BaseType::I32)];
    let wire = vec![WireEntry::scalar(None, Scalar::I32(11))];
    let slots = codec.unpack_args(&argtypes, &wire, &no_layouts).unwrap();
    assert_eq!(
        slots[0],
        NativeSlot::Int {
            bits: 11,
            base: BaseType::I32
        }
    );
}

#[test]
fn unpack_pointer_allocates_pointee() {
    let codec = ArgCodec::new();
    let argtypes = vec![TypeDescriptor::fundamental(BaseType::I16).pointer()];
    let wire = vec![WireEntry::scalar(None, Scalar::I16(-2))];
    let slots = codec.unpack_args(&argtypes, &wire, &no_layouts).unwrap();
    match &slots[0] {
        NativeSlot::Mem { bytes, elem } => {
            assert_eq!(bytes, &(-2i16).to_le_bytes().to_vec());
            assert_eq!(elem.base, BaseType::I16);
        }
        other => panic!("unexpected slot: {:?}", other),
    }
}

#[test]
fn unpack_double_pointer_nests_allocations() {
    let codec = ArgCodec::new();
    let argtypes = vec![TypeDescriptor::fundamental(BaseType::U8).pointer().pointer()];
    let wire = vec![WireEntry::scalar(None, Scalar::U8(7))];
    let slots = codec.unpack_args(&argtypes, &wire, &no_layouts).unwrap();
    match &slots[0] {
        NativeSlot::PtrTo(inner) => assert_eq!(inner.mem_bytes(), Some(&[7u8][..])),
        other => panic!("unexpected slot: {:?}", other),
    }
}

#[test]
fn unpack_wire_shape_mismatch_is_marshal_error() {
    let codec = ArgCodec::new();
    let argtypes = vec![point_desc()];
    // Scalar where a field list is required
    let wire = vec![WireEntry::scalar(None, Scalar::I32(1))];
    let err = codec.unpack_args(&argtypes, &wire, &no_layouts).unwrap_err();
    assert!(matches!(err, crate::errors::Error::Marshal { .. }));
}

#[test]
fn struct_pack_unpack_symmetry() {
    // pack to wire, flatten to the layout image, decode back into a fresh
    // instance: every field must round-trip
    let codec = ArgCodec::new();
    let desc = TypeDescriptor::structure(
        "sample",
        vec![
            TypeDescriptor::fundamental(BaseType::I8).named("a"),
            TypeDescriptor::fundamental(BaseType::F64).named("b"),
            TypeDescriptor::fundamental(BaseType::U32).named("c"),
        ],
    );
    let inst = StructInstance::new(
        "sample",
        vec![
            ("a".into(), CallValue::Scalar(Scalar::I8(-5))),
            ("b".into(), CallValue::Scalar(Scalar::F64(6.28))),
            ("c".into(), CallValue::Scalar(Scalar::U32(123456))),
        ],
    );
    let wire = codec
        .pack_args(
            std::slice::from_ref(&desc),
            &[CallValue::struct_value(inst.clone())],
        )
        .unwrap();
    let WireValue::List(entries) = &wire[0].value else {
        panic!("expected a field list");
    };

    let layout = StructLayout::compute(&desc).unwrap();
    let mut image = vec![0u8; layout.size];
    encode_wire_struct(entries, &layout, &mut image).unwrap();

    let mut rebuilt = StructInstance::new(
        "sample",
        vec![
            ("a".into(), CallValue::Scalar(Scalar::I8(0))),
            ("b".into(), CallValue::Scalar(Scalar::F64(0.0))),
            ("c".into(), CallValue::Scalar(Scalar::U32(0))),
        ],
    );
    decode_struct_into(&image, &layout, &mut rebuilt).unwrap();
    assert_eq!(rebuilt.field("a").unwrap().scalar(), Some(Scalar::I8(-5)));
    assert_eq!(rebuilt.field("b").unwrap().scalar(), Some(Scalar::F64(6.28)));
    assert_eq!(
        rebuilt.field("c").unwrap().scalar(),
        Some(Scalar::U32(123456))
    );
}

#[test]
fn return_slots_extract_mutated_pointees() {
    let codec = ArgCodec::new();
    let argtypes = vec![
        TypeDescriptor::fundamental(BaseType::I32).pointer(),
        TypeDescriptor::fundamental(BaseType::I32),
    ];
    let slots = vec![
        NativeSlot::Mem {
            bytes: 42i32.to_le_bytes().to_vec(),
            elem: TypeDescriptor::fundamental(BaseType::I32),
        },
        NativeSlot::Int {
            bits: 9,
            base: BaseType::I32,
        },
    ];
    let packed = codec.pack_return_slots(&argtypes, &slots);
    assert_eq!(packed[0], Some(Scalar::I32(42)));
    assert_eq!(packed[1], Some(Scalar::I32(9)));
}

#[test]
fn apply_return_slots_mutates_caller_cell_in_place() {
    let codec = ArgCodec::new();
    let argtypes = vec![TypeDescriptor::fundamental(BaseType::I32).pointer()];
    let arg = CallValue::by_ref(Scalar::I32(1));
    let alias = arg.clone();
    codec
        .apply_return_slots(
            &argtypes,
            std::slice::from_ref(&arg),
            &[Some(Scalar::I32(77))],
        )
        .unwrap();
    // The alias sees the mutation: same cell identity
    assert_eq!(alias.scalar(), Some(Scalar::I32(77)));
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    fn scalar_field() -> impl Strategy<Value = (BaseType, Scalar)> {
        prop_oneof![
            any::<i8>().prop_map(|v| (BaseType::I8, Scalar::I8(v))),
            any::<i16>().prop_map(|v| (BaseType::I16, Scalar::I16(v))),
            any::<i32>().prop_map(|v| (BaseType::I32, Scalar::I32(v))),
            any::<i64>().prop_map(|v| (BaseType::I64, Scalar::I64(v))),
            any::<u8>().prop_map(|v| (BaseType::U8, Scalar::U8(v))),
            any::<u32>().prop_map(|v| (BaseType::U32, Scalar::U32(v))),
            any::<f32>().prop_map(|v| (BaseType::F32, Scalar::F32(v))),
            any::<f64>().prop_map(|v| (BaseType::F64, Scalar::F64(v))),
        ]
    }

    proptest! {
        #[test]
        fn any_scalar_struct_roundtrips(fields in prop::collection::vec(scalar_field(), 1..8)) {
            let desc = TypeDescriptor::structure(
                "gen",
                fields
                    .iter()
                    .enumerate()
                    .map(|(i, (base, _))| {
                        TypeDescriptor::fundamental(*base).named(format!("f{}", i))
                    })
                    .collect(),
            );
            let inst = StructInstance::new(
                "gen",
                fields
                    .iter()
                    .enumerate()
                    .map(|(i, (_, s))| (format!("f{}", i), CallValue::Scalar(*s)))
                    .collect(),
            );
            let layout = StructLayout::compute(&desc).unwrap();
            let mut image = vec![0u8; layout.size];
            encode_struct(&inst, &layout, &mut image).unwrap();

            let mut rebuilt = StructInstance::new(
                "gen",
                fields
                    .iter()
                    .enumerate()
                    .map(|(i, (base, _))| {
                        (format!("f{}", i), CallValue::Scalar(Scalar::zero(*base).unwrap()))
                    })
                    .collect(),
            );
            decode_struct_into(&image, &layout, &mut rebuilt).unwrap();
            for (i, (_, expect)) in fields.iter().enumerate() {
                let got = rebuilt.fields[i].1.scalar().unwrap();
                // NaN-safe comparison over the byte image
                prop_assert_eq!(
                    got.to_float_bits().or(got.to_int_bits()),
                    expect.to_float_bits().or(expect.to_int_bits())
                );
            }
        }
    }
}
