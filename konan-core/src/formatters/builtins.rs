//! 組み込みフォーマッタ
//!
//! ボックス化プリミティブ、文字列、nullableラッパー、配列、標準コレクション、
//! レイアウトの分かっているクラスを扱います。型の種類ごとの分岐は `TypeKind` の網羅的な `match` です。

use super::collections;
use super::{FormatterRegistry, SyntheticChild, SyntheticChildren};
use crate::dynamic_type::{DynamicTypeResolver, Preference};
use crate::errors::{IntrospectionError, IntrospectionResult};
use crate::types::{ArrayElement, PrimitiveKind, TypeDescriptor, TypeKind};
use crate::value::{ExecutionContext, ValueHandle, ValueKind, ValueLocation};

impl FormatterRegistry {
    /// 組み込みのサマリ（該当なしは `None`）
    pub(crate) fn builtin_summary(
        &self,
        ctx: &ExecutionContext,
        value: &ValueHandle,
        resolved: &TypeDescriptor,
        depth: usize,
    ) -> IntrospectionResult<Option<String>> {
        let summary = match &resolved.kind {
            TypeKind::Primitive(kind) => Some(self.scalar_summary(ctx, value, *kind)?),
            TypeKind::Boxed(kind) => Some(self.boxed_summary(ctx, value, *kind)?),
            TypeKind::String => Some(self.string_summary(ctx, value)?),
            TypeKind::Class { .. } | TypeKind::Interface => None,
            TypeKind::Array(element) => Some(self.array_summary(ctx, value, *element, depth)?),
            TypeKind::Collection(kind) => {
                let object = ctx.object_address(value)?;
                if object == 0 {
                    Some("null".to_string())
                } else {
                    let layout = self.layout_of(ctx, resolved);
                    let size = collections::collection_size(ctx, object, *kind, layout.as_ref())?;
                    Some(format!("size={}", size))
                }
            }
            TypeKind::Nullable(inner) => Some(self.nullable_summary(ctx, value, inner, depth)?),
        };
        Ok(summary)
    }

    /// 組み込みの子要素
    pub(crate) fn builtin_children<'c>(
        &self,
        ctx: &ExecutionContext<'c>,
        value: &ValueHandle,
        resolved: &TypeDescriptor,
    ) -> IntrospectionResult<SyntheticChildren<'c>> {
        match &resolved.kind {
            TypeKind::Primitive(_) | TypeKind::Boxed(_) | TypeKind::String => {
                Ok(SyntheticChildren::empty())
            }
            TypeKind::Class { .. } | TypeKind::Interface => self.field_children(ctx, value, resolved),
            TypeKind::Array(element) => self.array_children(ctx, value, *element),
            TypeKind::Collection(kind) => {
                let object = ctx.object_address(value)?;
                if object == 0 {
                    return Ok(SyntheticChildren::empty());
                }
                let layout = self.layout_of(ctx, resolved);
                collections::collection_children(ctx, object, *kind, layout.as_ref())
            }
            TypeKind::Nullable(inner) => match self.unwrap_nullable(ctx, value, inner)? {
                Some((handle, descriptor)) => Ok(self.synthetic_children(ctx, &handle, &descriptor)),
                None => Ok(SyntheticChildren::empty()),
            },
        }
    }

    /// 汎用のサマリ（`型名 @ 0xアドレス`）
    pub(crate) fn generic_summary(
        &self,
        ctx: &ExecutionContext,
        value: &ValueHandle,
        resolved: &TypeDescriptor,
    ) -> String {
        let location = match value.kind {
            ValueKind::Reference if ctx.validate(value).is_ok() => ctx
                .object_address(value)
                .map(ValueLocation::Memory)
                .unwrap_or(value.location),
            _ => value.location,
        };
        format!("{} @ {}", resolved.name, location)
    }

    fn layout_of(
        &self,
        ctx: &ExecutionContext,
        resolved: &TypeDescriptor,
    ) -> Option<konan_dwarf::ClassLayout> {
        resolved.layout.clone().or_else(|| {
            ctx.metadata()
                .type_by_name(&resolved.name)
                .and_then(|record| record.layout)
        })
    }

    fn scalar_summary(
        &self,
        ctx: &ExecutionContext,
        value: &ValueHandle,
        kind: PrimitiveKind,
    ) -> IntrospectionResult<String> {
        match value.kind {
            ValueKind::Scalar(stored) => Ok(ctx.read_scalar(value.location, stored)?.to_string()),
            _ => Err(IntrospectionError::malformed(format!(
                "{} value at {} is not stored as a scalar",
                kind.simple_name(),
                value.location
            ))),
        }
    }

    fn boxed_summary(
        &self,
        ctx: &ExecutionContext,
        value: &ValueHandle,
        kind: PrimitiveKind,
    ) -> IntrospectionResult<String> {
        // 動的型解決で既に中身の位置に読み替えられている
        if let ValueKind::Scalar(stored) = value.kind {
            return Ok(ctx.read_scalar(value.location, stored)?.to_string());
        }

        let object = ctx.object_address(value)?;
        if object == 0 {
            return Ok("null".to_string());
        }
        let offset = ctx.abi().boxed_value_offset(kind.size());
        Ok(ctx
            .read_scalar(ValueLocation::Memory(object + offset), kind)?
            .to_string())
    }

    fn string_summary(
        &self,
        ctx: &ExecutionContext,
        value: &ValueHandle,
    ) -> IntrospectionResult<String> {
        let object = ctx.object_address(value)?;
        if object == 0 {
            return Ok("null".to_string());
        }

        let count = ctx.array_count(object)? as usize;
        let units = count.min(self.config.max_string_units);
        let text = if units == 0 {
            String::new()
        } else {
            let bytes = ctx.read(object + ctx.abi().array_data_offset(), units * 2)?;
            let code_units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&code_units)
        };

        let marker = if count > units { "..." } else { "" };
        Ok(format!("{:?}{}", text, marker))
    }

    fn array_summary(
        &self,
        ctx: &ExecutionContext,
        value: &ValueHandle,
        element: ArrayElement,
        depth: usize,
    ) -> IntrospectionResult<String> {
        let object = ctx.object_address(value)?;
        if object == 0 {
            return Ok("null".to_string());
        }

        let count = ctx.array_count(object)? as usize;
        let preview = count.min(self.config.max_array_preview);
        let data = object + ctx.abi().array_data_offset();

        let mut items = Vec::with_capacity(preview + 1);
        for index in 0..preview {
            items.push(self.element_summary(ctx, data, index as u64, element, depth)?);
        }
        if count > preview {
            items.push("...".to_string());
        }

        Ok(format!("size={} [{}]", count, items.join(", ")))
    }

    fn element_summary(
        &self,
        ctx: &ExecutionContext,
        data: u64,
        index: u64,
        element: ArrayElement,
        depth: usize,
    ) -> IntrospectionResult<String> {
        match element {
            ArrayElement::Primitive(kind) => {
                let location = ValueLocation::Memory(data + index * kind.size());
                Ok(ctx.read_scalar(location, kind)?.to_string())
            }
            ArrayElement::Reference => {
                let slot = data + index * ctx.abi().pointer_size();
                let handle = ValueHandle::reference_at(
                    TypeDescriptor::from_name("kotlin.Any?"),
                    slot,
                    ctx.stop_id(),
                );
                let resolver = DynamicTypeResolver::new(ctx);
                if depth + 1 >= self.config.max_depth {
                    return Ok(resolver
                        .get_object_description(&handle)
                        .unwrap_or_else(|_| self.generic_summary(ctx, &handle, &handle.static_type)));
                }
                let resolved = resolver.resolve_or_static(&handle, Preference::PreferDynamic);
                let descriptor = resolved.descriptor.clone();
                let element = resolved.into_handle(ctx.stop_id());
                Ok(self.summarize_at_depth(ctx, &element, &descriptor, depth + 1))
            }
        }
    }

    fn nullable_summary(
        &self,
        ctx: &ExecutionContext,
        value: &ValueHandle,
        inner: &TypeDescriptor,
        depth: usize,
    ) -> IntrospectionResult<String> {
        match self.unwrap_nullable(ctx, value, inner)? {
            Some((handle, descriptor)) => Ok(self.summarize_at_depth(ctx, &handle, &descriptor, depth)),
            None => Ok("null".to_string()),
        }
    }

    /// nullableラッパーを外し、中身を動的型で読み直す（nullなら `None`）
    fn unwrap_nullable(
        &self,
        ctx: &ExecutionContext,
        value: &ValueHandle,
        inner: &TypeDescriptor,
    ) -> IntrospectionResult<Option<(ValueHandle, TypeDescriptor)>> {
        if let ValueKind::Scalar(_) = value.kind {
            let handle = ValueHandle::new(inner.clone(), value.location, value.kind, value.stop_id);
            return Ok(Some((handle, inner.clone())));
        }

        let object = ctx.object_address(value)?;
        if object == 0 {
            return Ok(None);
        }

        // `kotlin.Int?` の中身はボックス化された値
        let static_type = match inner.kind {
            TypeKind::Primitive(kind) => TypeDescriptor::boxed(kind),
            _ => inner.clone(),
        };
        let handle = ValueHandle::object_at(static_type, object, value.stop_id);
        let resolved = DynamicTypeResolver::new(ctx).resolve_or_static(&handle, Preference::PreferDynamic);
        let descriptor = resolved.descriptor.clone();
        Ok(Some((resolved.into_handle(value.stop_id), descriptor)))
    }

    fn array_children<'c>(
        &self,
        ctx: &ExecutionContext<'c>,
        value: &ValueHandle,
        element: ArrayElement,
    ) -> IntrospectionResult<SyntheticChildren<'c>> {
        let object = ctx.object_address(value)?;
        if object == 0 {
            return Ok(SyntheticChildren::empty());
        }

        let count = ctx.array_count(object)? as usize;
        let data = object + ctx.abi().array_data_offset();
        let stop_id = ctx.stop_id();
        let pointer_size = ctx.abi().pointer_size();

        Ok(SyntheticChildren::indexed(count, move |index| {
            let name = format!("[{}]", index);
            let handle = match element {
                ArrayElement::Primitive(kind) => {
                    ValueHandle::scalar_at(kind, data + index as u64 * kind.size(), stop_id)
                }
                ArrayElement::Reference => ValueHandle::reference_at(
                    TypeDescriptor::from_name("kotlin.Any?"),
                    data + index as u64 * pointer_size,
                    stop_id,
                ),
            };
            Ok(SyntheticChild::new(name, handle))
        }))
    }

    /// レイアウトの分かっているクラスのフィールド
    fn field_children<'c>(
        &self,
        ctx: &ExecutionContext<'c>,
        value: &ValueHandle,
        resolved: &TypeDescriptor,
    ) -> IntrospectionResult<SyntheticChildren<'c>> {
        let Some(layout) = self.layout_of(ctx, resolved) else {
            return Ok(SyntheticChildren::empty());
        };

        let object = ctx.object_address(value)?;
        if object == 0 {
            return Ok(SyntheticChildren::empty());
        }

        let header_size = ctx.abi().header_size();
        let children = layout
            .fields
            .iter()
            .filter(|field| field.offset >= header_size)
            .map(|field| {
                let static_type = field
                    .type_name
                    .as_deref()
                    .map(TypeDescriptor::from_field_type)
                    .unwrap_or_else(|| TypeDescriptor::from_name("kotlin.Any?"));
                let handle = ValueHandle::for_type(
                    static_type,
                    ValueLocation::Memory(object + field.offset),
                    ctx.stop_id(),
                );
                SyntheticChild::new(field.name.clone(), handle)
            })
            .collect();

        Ok(SyntheticChildren::from_vec(children))
    }
}
