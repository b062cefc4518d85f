//! 言語の識別と言語プラグイン
//!
//! ホストは言語タグ（DWARFの言語コード）でプラグインを引きます。
//! Kotlinのタグにだけインスタンスを返し、それ以外は何も返しません。

use crate::dynamic_type::{DynamicTypeResolver, DynamicValue, Preference};
use crate::errors::{IntrospectionError, IntrospectionResult};
use crate::exception::{create_exception_resolver, ExceptionResolver, THROW_ENTRY};
use crate::formatters::{FormatterConfig, FormatterRegistry, SyntheticChildren};
use crate::types::{PrimitiveKind, TypeDescriptor, TypeKind};
use crate::value::{ExecutionContext, ValueHandle, ValueKind};
use konan_dwarf::RuntimeSymbols;
use std::fmt;

/// ホストの言語タグ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LanguageType {
    C,
    CPlusPlus,
    ObjC,
    Rust,
    Swift,
    Kotlin,
    Other(u16),
}

impl LanguageType {
    pub fn from_tag(tag: u16) -> Self {
        match tag {
            0x02 => LanguageType::C,
            0x04 => LanguageType::CPlusPlus,
            0x10 => LanguageType::ObjC,
            0x1c => LanguageType::Rust,
            0x1e => LanguageType::Swift,
            0x26 => LanguageType::Kotlin,
            other => LanguageType::Other(other),
        }
    }

    pub fn tag(&self) -> u16 {
        match self {
            LanguageType::C => 0x02,
            LanguageType::CPlusPlus => 0x04,
            LanguageType::ObjC => 0x10,
            LanguageType::Rust => 0x1c,
            LanguageType::Swift => 0x1e,
            LanguageType::Kotlin => 0x26,
            LanguageType::Other(tag) => *tag,
        }
    }
}

impl fmt::Display for LanguageType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LanguageType::Other(tag) => write!(f, "language 0x{:x}", tag),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Kotlin言語プラグイン
///
/// フォーマッタレジストリを所有します。
#[derive(Debug, Default)]
pub struct KotlinLanguage {
    formatters: FormatterRegistry,
}

impl KotlinLanguage {
    pub const PLUGIN_NAME: &'static str = "Kotlin";
    pub const DESCRIPTION: &'static str = "Kotlin Language";

    /// このプラグインが扱う言語か
    pub fn identifies(language: LanguageType) -> bool {
        language == LanguageType::Kotlin
    }

    /// Kotlinのタグにだけインスタンスを返す
    pub fn create_instance(language: LanguageType) -> Option<Self> {
        Self::identifies(language).then(Self::default)
    }

    pub fn with_config(config: FormatterConfig) -> Self {
        Self {
            formatters: FormatterRegistry::new(config),
        }
    }

    pub fn language(&self) -> LanguageType {
        LanguageType::Kotlin
    }

    pub fn formatters(&self) -> &FormatterRegistry {
        &self.formatters
    }

    pub fn formatters_mut(&mut self) -> &mut FormatterRegistry {
        &mut self.formatters
    }

    pub fn summarize(
        &self,
        ctx: &ExecutionContext,
        value: &ValueHandle,
        resolved: &TypeDescriptor,
    ) -> String {
        self.formatters.summarize(ctx, value, resolved)
    }

    pub fn synthetic_children<'c>(
        &self,
        ctx: &ExecutionContext<'c>,
        value: &ValueHandle,
        resolved: &TypeDescriptor,
    ) -> SyntheticChildren<'c> {
        self.formatters.synthetic_children(ctx, value, resolved)
    }

    /// `kotlin.Boolean` の値を真偽値として読む
    pub fn is_logical_true(
        &self,
        ctx: &ExecutionContext,
        value: &ValueHandle,
    ) -> IntrospectionResult<bool> {
        let resolved = DynamicTypeResolver::new(ctx).resolve_dynamic_type(value, Preference::PreferDynamic)?;
        let boolean = match (&resolved.descriptor.wrapped().kind, resolved.kind) {
            (TypeKind::Primitive(PrimitiveKind::Boolean), ValueKind::Scalar(kind))
            | (TypeKind::Boxed(PrimitiveKind::Boolean), ValueKind::Scalar(kind)) => {
                ctx.read_scalar(resolved.location, kind)?.as_bool()
            }
            _ => None,
        };
        boolean.ok_or_else(|| {
            IntrospectionError::malformed(format!("{} is not a Boolean", resolved.descriptor.name))
        })
    }
}

/// Kotlin/Nativeランタイムプラグイン（`konan`）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KotlinLanguageRuntime;

impl KotlinLanguageRuntime {
    pub const PLUGIN_NAME: &'static str = "konan";
    pub const DESCRIPTION: &'static str = "Kotlin Language Runtime";
    pub const VERSION: u32 = 1;

    pub fn create_instance(language: LanguageType) -> Option<Self> {
        KotlinLanguage::identifies(language).then_some(Self)
    }

    pub fn language(&self) -> LanguageType {
        LanguageType::Kotlin
    }

    /// ランタイムのイメージがロード済みか
    pub fn is_runtime_loaded(&self, symbols: &dyn RuntimeSymbols) -> bool {
        symbols.find_symbol(THROW_ENTRY).is_some()
    }

    pub fn could_have_dynamic_value(&self, value: &ValueHandle) -> bool {
        DynamicTypeResolver::could_have_dynamic_value(&value.static_type)
    }

    pub fn get_dynamic_type_and_address(
        &self,
        ctx: &ExecutionContext,
        value: &ValueHandle,
        preference: Preference,
    ) -> IntrospectionResult<DynamicValue> {
        DynamicTypeResolver::new(ctx).resolve_dynamic_type(value, preference)
    }

    pub fn fix_up_dynamic_type(
        &self,
        resolved: TypeDescriptor,
        value: &ValueHandle,
    ) -> TypeDescriptor {
        DynamicTypeResolver::fix_up_dynamic_type(resolved, &value.static_type)
    }

    pub fn get_object_description(
        &self,
        ctx: &ExecutionContext,
        value: &ValueHandle,
    ) -> IntrospectionResult<String> {
        DynamicTypeResolver::new(ctx).get_object_description(value)
    }

    pub fn create_exception_resolver(
        &self,
        catch_enabled: bool,
        throw_enabled: bool,
    ) -> ExceptionResolver {
        create_exception_resolver(catch_enabled, throw_enabled)
    }
}
