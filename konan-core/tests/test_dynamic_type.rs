mod common;

use common::{CountingReader, Heap};
use konan_core::{
    AbiLayout, DynamicTypeResolver, ExecutionContext, FormatterRegistry, IntrospectionError,
    KotlinLanguageRuntime, MemorySnapshot, Preference, PrimitiveKind, TypeDescriptor, TypeKind,
    ValueHandle, ValueKind, ValueLocation,
};
use konan_dwarf::{ClassLayout, FieldLayout, ImageTable};

#[test]
fn test_primitive_and_final_types_do_not_read_memory() {
    let empty = MemorySnapshot::new();
    let reader = CountingReader::new(&empty);
    let images = ImageTable::new();
    let ctx = ExecutionContext::new(&reader, &images, AbiLayout::lp64(), 1);
    let resolver = DynamicTypeResolver::new(&ctx);

    let values = [
        ValueHandle::scalar_at(PrimitiveKind::Int, 0xdead_0000, 1),
        ValueHandle::reference_at(TypeDescriptor::class("app.Point", true), 0xdead_0000, 1),
        ValueHandle::reference_at(TypeDescriptor::from_name("kotlin.String"), 0xdead_0000, 1),
        ValueHandle::reference_at(TypeDescriptor::from_name("kotlin.IntArray"), 0xdead_0000, 1),
    ];
    for value in &values {
        for preference in [Preference::PreferStatic, Preference::PreferDynamic] {
            let resolved = resolver.resolve_dynamic_type(value, preference).unwrap();
            assert_eq!(resolved.descriptor, value.static_type);
            assert_eq!(resolved.location, value.location);
        }
    }
    assert_eq!(reader.reads(), 0);
}

#[test]
fn test_unmapped_address_is_inaccessible() {
    let heap = Heap::new();
    let images = heap.images();
    let ctx = ExecutionContext::new(&heap.memory, &images, AbiLayout::lp64(), 1);
    let resolver = DynamicTypeResolver::new(&ctx);

    let value = ValueHandle::reference_at(TypeDescriptor::from_name("kotlin.Any"), 0x7777_0000, 1);
    let err = resolver
        .resolve_dynamic_type(&value, Preference::PreferDynamic)
        .unwrap_err();
    assert!(matches!(err, IntrospectionError::InaccessibleMemory { address: 0x7777_0000, .. }));

    // 読めない値も静的型のまま表示できる
    let degraded = resolver.resolve_or_static(&value, Preference::PreferDynamic);
    assert_eq!(degraded.descriptor.name, "kotlin.Any");
    let registry = FormatterRegistry::default();
    assert_eq!(
        registry.summarize(&ctx, &value, &degraded.descriptor),
        "kotlin.Any @ 0x77770000"
    );
}

#[test]
fn test_dangling_header_is_malformed() {
    let mut heap = Heap::new();
    let object = heap.alloc(0x10);
    // ヘッダが自分自身を指すTypeInfoでもメタオブジェクトでもない
    let bogus = heap.alloc(0x10);
    heap.memory.write_u64(object, bogus | 0b01).unwrap();
    heap.memory.write_u64(bogus, object).unwrap();
    let slot = heap.slot(object);

    let images = heap.images();
    let ctx = ExecutionContext::new(&heap.memory, &images, AbiLayout::lp64(), 1);
    let value = ValueHandle::reference_at(TypeDescriptor::from_name("kotlin.Any"), slot, 1);
    let err = DynamicTypeResolver::new(&ctx)
        .resolve_dynamic_type(&value, Preference::PreferDynamic)
        .unwrap_err();
    assert!(matches!(err, IntrospectionError::MalformedValue(_)));
}

#[test]
fn test_boxed_primitives_parse_back() {
    let mut heap = Heap::new();
    let cases: Vec<(PrimitiveKind, Vec<u8>)> = vec![
        (PrimitiveKind::Byte, i8::MIN.to_le_bytes().to_vec()),
        (PrimitiveKind::Short, (-12_345i16).to_le_bytes().to_vec()),
        (PrimitiveKind::Int, 2_000_000_000i32.to_le_bytes().to_vec()),
        (PrimitiveKind::Long, i64::MAX.to_le_bytes().to_vec()),
        (PrimitiveKind::Float, 1.5f32.to_le_bytes().to_vec()),
        (PrimitiveKind::Double, (-2.25f64).to_le_bytes().to_vec()),
        (PrimitiveKind::Boolean, vec![1]),
    ];
    let slots: Vec<u64> = cases
        .iter()
        .map(|(kind, bytes)| {
            let object = heap.boxed(*kind, bytes);
            heap.slot(object)
        })
        .collect();

    let images = heap.images();
    let ctx = ExecutionContext::new(&heap.memory, &images, AbiLayout::lp64(), 1);
    let resolver = DynamicTypeResolver::new(&ctx);
    let registry = FormatterRegistry::default();

    let mut summaries = Vec::new();
    for ((kind, _), slot) in cases.iter().zip(&slots) {
        let value = ValueHandle::reference_at(TypeDescriptor::from_name("kotlin.Any"), *slot, 1);
        let resolved = resolver
            .resolve_dynamic_type(&value, Preference::PreferDynamic)
            .unwrap();
        assert_eq!(resolved.descriptor.kind, TypeKind::Boxed(*kind));
        assert_eq!(resolved.kind, ValueKind::Scalar(*kind));

        let descriptor = resolved.descriptor.clone();
        let handle = resolved.into_handle(1);
        summaries.push(registry.summarize(&ctx, &handle, &descriptor));
    }

    assert_eq!(summaries[0].parse::<i8>().unwrap(), i8::MIN);
    assert_eq!(summaries[1].parse::<i16>().unwrap(), -12_345);
    assert_eq!(summaries[2].parse::<i32>().unwrap(), 2_000_000_000);
    assert_eq!(summaries[3].parse::<i64>().unwrap(), i64::MAX);
    assert_eq!(summaries[4].parse::<f32>().unwrap(), 1.5);
    assert_eq!(summaries[5].parse::<f64>().unwrap(), -2.25);
    assert!(summaries[6].parse::<bool>().unwrap());
}

#[test]
fn test_prefer_static_keeps_location() {
    let mut heap = Heap::new();
    let text = heap.string("abc");
    let slot = heap.slot(text);

    let images = heap.images();
    let ctx = ExecutionContext::new(&heap.memory, &images, AbiLayout::lp64(), 1);
    let value = ValueHandle::reference_at(TypeDescriptor::from_name("kotlin.CharSequence"), slot, 1);
    let resolved = DynamicTypeResolver::new(&ctx)
        .resolve_dynamic_type(&value, Preference::PreferStatic)
        .unwrap();

    assert_eq!(resolved.descriptor.kind, TypeKind::String);
    assert_eq!(resolved.location, ValueLocation::Memory(slot));
    assert_eq!(resolved.kind, ValueKind::Reference);
}

#[test]
fn test_subclass_fields_from_layout() {
    let mut heap = Heap::new();
    heap.layout(ClassLayout {
        name: "app.Circle".to_string(),
        size: 0x18,
        fields: vec![
            FieldLayout {
                name: "radius".to_string(),
                offset: 8,
                type_name: Some("int".to_string()),
            },
            FieldLayout {
                name: "label".to_string(),
                offset: 16,
                type_name: Some("ObjHeader*".to_string()),
            },
        ],
    });
    let label = heap.string("unit");
    let circle = heap.object("app.Circle", 0x18);
    heap.memory.write_u32(circle + 8, 3).unwrap();
    heap.memory.write_u64(circle + 16, label).unwrap();
    let slot = heap.slot(circle);

    let images = heap.images();
    let ctx = ExecutionContext::new(&heap.memory, &images, AbiLayout::lp64(), 1);
    let runtime = KotlinLanguageRuntime;
    let value = ValueHandle::reference_at(TypeDescriptor::from_name("app.Shape?"), slot, 1);
    assert!(runtime.could_have_dynamic_value(&value));

    let resolved = runtime
        .get_dynamic_type_and_address(&ctx, &value, Preference::PreferDynamic)
        .unwrap();
    assert_eq!(resolved.descriptor.name, "app.Circle");
    assert!(resolved.descriptor.is_final());

    let fixed = runtime.fix_up_dynamic_type(resolved.descriptor.clone(), &value);
    assert_eq!(fixed.name, "app.Circle?");

    let registry = FormatterRegistry::default();
    let descriptor = resolved.descriptor.clone();
    let handle = resolved.into_handle(1);
    let children: Vec<_> = registry
        .synthetic_children(&ctx, &handle, &descriptor)
        .iter()
        .map(|child| child.unwrap())
        .collect();
    assert_eq!(children.len(), 2);
    assert_eq!(children[0].name, "radius");
    assert_eq!(
        registry.summarize(&ctx, &children[0].value, &children[0].value.static_type),
        "3"
    );

    let label_child = &children[1].value;
    let label_resolved = DynamicTypeResolver::new(&ctx).resolve_or_static(label_child, Preference::PreferDynamic);
    let label_descriptor = label_resolved.descriptor.clone();
    assert_eq!(
        registry.summarize(&ctx, &label_resolved.into_handle(1), &label_descriptor),
        "\"unit\""
    );

    assert_eq!(
        runtime.get_object_description(&ctx, &value).unwrap(),
        format!("app.Circle@0x{:x}", circle)
    );
}

#[test]
fn test_stale_handle_is_rejected() {
    let mut heap = Heap::new();
    let text = heap.string("old");
    let slot = heap.slot(text);

    let images = heap.images();
    let ctx = ExecutionContext::new(&heap.memory, &images, AbiLayout::lp64(), 2);
    let value = ValueHandle::reference_at(TypeDescriptor::from_name("kotlin.Any"), slot, 1);
    let err = DynamicTypeResolver::new(&ctx)
        .resolve_dynamic_type(&value, Preference::PreferDynamic)
        .unwrap_err();
    assert!(matches!(err, IntrospectionError::InaccessibleMemory { .. }));
}
