//! 動的型解決
//!
//! 静的型が多相的な値について、オブジェクトヘッダの実行時タグを読み、
//! 具体的な実行時型と、その型として読み直すための位置・読み方を求めます。
//!
//! オブジェクトヘッダの先頭ワードは下位2ビットがタグビットで、マスクした値は
//! TypeInfo（先頭ワードが自分自身を指す）か、メタオブジェクト（先頭ワードがTypeInfoを指す）を指します。

use crate::errors::{IntrospectionError, IntrospectionResult};
use crate::types::{TypeDescriptor, TypeKind};
use crate::value::{ExecutionContext, ValueHandle, ValueKind, ValueLocation};
use tracing::{debug, warn};

/// ヘッダワードのタグビット
pub const OBJECT_TAG_MASK: u64 = 0b11;

/// 静的型と動的型のどちらの表現を優先するか
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Preference {
    /// 具体型は報告するが、位置と読み方は元のまま
    PreferStatic,
    /// 具体型の表現に合わせて位置と読み方を調整する
    #[default]
    PreferDynamic,
}

/// 解決結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicValue {
    pub descriptor: TypeDescriptor,
    pub location: ValueLocation,
    pub kind: ValueKind,
}

impl DynamicValue {
    /// 静的型のままの結果
    pub fn unchanged(value: &ValueHandle) -> Self {
        Self {
            descriptor: value.static_type.clone(),
            location: value.location,
            kind: value.kind,
        }
    }

    /// 解決結果を同じ停止状態の値ハンドルにする
    pub fn into_handle(self, stop_id: u64) -> ValueHandle {
        ValueHandle::new(self.descriptor, self.location, self.kind, stop_id)
    }
}

/// 動的型解決器
pub struct DynamicTypeResolver<'a> {
    ctx: &'a ExecutionContext<'a>,
}

impl<'a> DynamicTypeResolver<'a> {
    /// 新しい動的型解決器を作成する
    pub fn new(ctx: &'a ExecutionContext<'a>) -> Self {
        Self { ctx }
    }

    /// より具体的な動的型を持ちうるか（参照型のみ）
    pub fn could_have_dynamic_value(static_type: &TypeDescriptor) -> bool {
        static_type.is_reference()
    }

    /// 値の実行時型を解決する
    pub fn resolve_dynamic_type(
        &self,
        value: &ValueHandle,
        preference: Preference,
    ) -> IntrospectionResult<DynamicValue> {
        self.ctx.validate(value)?;

        let static_type = &value.static_type;
        if !Self::could_have_dynamic_value(static_type) || static_type.is_final() {
            return Ok(DynamicValue::unchanged(value));
        }

        let object = self.ctx.object_address(value)?;
        if object == 0 {
            debug!("{} at {} is null", static_type, value.location);
            return Ok(DynamicValue::unchanged(value));
        }

        let descriptor = self.runtime_type(object)?;
        debug!(
            "{} at {} resolved to {} (object 0x{:x})",
            static_type, value.location, descriptor, object
        );

        let resolved = match preference {
            Preference::PreferStatic => DynamicValue {
                descriptor,
                location: value.location,
                kind: value.kind,
            },
            Preference::PreferDynamic => match descriptor.kind {
                TypeKind::Boxed(primitive) => {
                    let offset = self.ctx.abi().boxed_value_offset(primitive.size());
                    DynamicValue {
                        descriptor,
                        location: ValueLocation::Memory(object + offset),
                        kind: ValueKind::Scalar(primitive),
                    }
                }
                _ => DynamicValue {
                    descriptor,
                    location: ValueLocation::Memory(object),
                    kind: ValueKind::Object,
                },
            },
        };

        Ok(resolved)
    }

    /// 解決に失敗したら静的型に劣化させる
    pub fn resolve_or_static(&self, value: &ValueHandle, preference: Preference) -> DynamicValue {
        match self.resolve_dynamic_type(value, preference) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(
                    "keeping static type {} for value at {}: {}",
                    value.static_type, value.location, e
                );
                DynamicValue::unchanged(value)
            }
        }
    }

    /// 解決済みの型に静的型のnullabilityを付け直す
    pub fn fix_up_dynamic_type(
        resolved: TypeDescriptor,
        static_type: &TypeDescriptor,
    ) -> TypeDescriptor {
        if static_type.is_nullable() {
            TypeDescriptor::nullable(resolved)
        } else {
            resolved
        }
    }

    /// オブジェクトの1行説明（`型名@0xアドレス` または `null`）
    pub fn get_object_description(&self, value: &ValueHandle) -> IntrospectionResult<String> {
        self.ctx.validate(value)?;

        let object = self.ctx.object_address(value)?;
        if object == 0 {
            return Ok("null".to_string());
        }
        let descriptor = self.runtime_type(object)?;
        Ok(format!("{}@0x{:x}", descriptor.name, object))
    }

    /// オブジェクトアドレスから実行時型を求める
    pub fn runtime_type(&self, object: u64) -> IntrospectionResult<TypeDescriptor> {
        let tag = self.read_type_info(object)?;
        let record = self
            .ctx
            .metadata()
            .type_by_tag(tag)
            .ok_or(IntrospectionError::UnknownType { tag })?;
        Ok(TypeDescriptor::from_record(&record))
    }

    /// オブジェクトヘッダからTypeInfoのアドレスを取り出す
    fn read_type_info(&self, object: u64) -> IntrospectionResult<u64> {
        let header = self.ctx.read_pointer(object)?;
        let pointer = header & !OBJECT_TAG_MASK;
        if pointer == 0 {
            return Err(IntrospectionError::malformed(format!(
                "object at 0x{:x} has an empty header",
                object
            )));
        }

        let first = self.ctx.read_pointer(pointer)?;
        if first == pointer {
            return Ok(pointer);
        }

        // メタオブジェクト経由
        match self.ctx.read_pointer(first) {
            Ok(type_info) if first != 0 && type_info == first => Ok(first),
            _ => Err(IntrospectionError::malformed(format!(
                "header of object at 0x{:x} points to neither a type info nor a meta object (0x{:x})",
                object, pointer
            ))),
        }
    }
}
