//! Kotlinの型記述子
//!
//! 型の種類は閉じた列挙型 `TypeKind` で表し、フォーマッタなどは網羅的な `match` で分岐します。
//! 修飾名からの分類はKotlin/Nativeランタイムの型名に従います。

use crate::errors::{IntrospectionError, IntrospectionResult};
use konan_dwarf::{ClassLayout, TypeRecord};
use std::fmt;

/// プリミティブ型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Boolean,
    Char,
    UByte,
    UShort,
    UInt,
    ULong,
}

impl PrimitiveKind {
    pub const ALL: [PrimitiveKind; 12] = [
        PrimitiveKind::Byte,
        PrimitiveKind::Short,
        PrimitiveKind::Int,
        PrimitiveKind::Long,
        PrimitiveKind::Float,
        PrimitiveKind::Double,
        PrimitiveKind::Boolean,
        PrimitiveKind::Char,
        PrimitiveKind::UByte,
        PrimitiveKind::UShort,
        PrimitiveKind::UInt,
        PrimitiveKind::ULong,
    ];

    /// 値の格納サイズ（バイト）
    pub fn size(&self) -> u64 {
        match self {
            PrimitiveKind::Byte | PrimitiveKind::UByte | PrimitiveKind::Boolean => 1,
            PrimitiveKind::Short | PrimitiveKind::UShort | PrimitiveKind::Char => 2,
            PrimitiveKind::Int | PrimitiveKind::UInt | PrimitiveKind::Float => 4,
            PrimitiveKind::Long | PrimitiveKind::ULong | PrimitiveKind::Double => 8,
        }
    }

    /// Kotlinの単純名（`Int` など）
    pub fn simple_name(&self) -> &'static str {
        match self {
            PrimitiveKind::Byte => "Byte",
            PrimitiveKind::Short => "Short",
            PrimitiveKind::Int => "Int",
            PrimitiveKind::Long => "Long",
            PrimitiveKind::Float => "Float",
            PrimitiveKind::Double => "Double",
            PrimitiveKind::Boolean => "Boolean",
            PrimitiveKind::Char => "Char",
            PrimitiveKind::UByte => "UByte",
            PrimitiveKind::UShort => "UShort",
            PrimitiveKind::UInt => "UInt",
            PrimitiveKind::ULong => "ULong",
        }
    }

    /// 修飾名（`kotlin.Int` など）
    pub fn qualified_name(&self) -> String {
        format!("kotlin.{}", self.simple_name())
    }

    fn from_simple_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.simple_name() == name)
    }

    /// DWARF上のCの基本型名から引く
    fn from_c_name(name: &str) -> Option<Self> {
        let kind = match name {
            "int8_t" | "signed char" | "char" => PrimitiveKind::Byte,
            "int16_t" | "short" => PrimitiveKind::Short,
            "int32_t" | "int" => PrimitiveKind::Int,
            "int64_t" | "long" | "long long" => PrimitiveKind::Long,
            "float" => PrimitiveKind::Float,
            "double" => PrimitiveKind::Double,
            "bool" | "_Bool" => PrimitiveKind::Boolean,
            "uint16_t" | "char16_t" => PrimitiveKind::Char,
            "uint8_t" | "unsigned char" => PrimitiveKind::UByte,
            "unsigned short" => PrimitiveKind::UShort,
            "uint32_t" | "unsigned int" => PrimitiveKind::UInt,
            "uint64_t" | "unsigned long" | "unsigned long long" => PrimitiveKind::ULong,
            _ => return None,
        };
        Some(kind)
    }

    /// リトルエンディアンのバイト列から値を復元する
    pub fn decode(&self, bytes: &[u8]) -> IntrospectionResult<PrimitiveValue> {
        let size = self.size() as usize;
        if bytes.len() < size {
            return Err(IntrospectionError::malformed(format!(
                "{} needs {} bytes, got {}",
                self.simple_name(),
                size,
                bytes.len()
            )));
        }

        let mut buf = [0u8; 8];
        buf[..size].copy_from_slice(&bytes[..size]);
        let raw = u64::from_le_bytes(buf);

        let value = match self {
            PrimitiveKind::Byte => PrimitiveValue::Byte(raw as u8 as i8),
            PrimitiveKind::Short => PrimitiveValue::Short(raw as u16 as i16),
            PrimitiveKind::Int => PrimitiveValue::Int(raw as u32 as i32),
            PrimitiveKind::Long => PrimitiveValue::Long(raw as i64),
            PrimitiveKind::Float => PrimitiveValue::Float(f32::from_bits(raw as u32)),
            PrimitiveKind::Double => PrimitiveValue::Double(f64::from_bits(raw)),
            PrimitiveKind::Boolean => PrimitiveValue::Boolean(raw as u8 != 0),
            PrimitiveKind::Char => PrimitiveValue::Char(raw as u16),
            PrimitiveKind::UByte => PrimitiveValue::UByte(raw as u8),
            PrimitiveKind::UShort => PrimitiveValue::UShort(raw as u16),
            PrimitiveKind::UInt => PrimitiveValue::UInt(raw as u32),
            PrimitiveKind::ULong => PrimitiveValue::ULong(raw),
        };
        Ok(value)
    }
}

/// 読み取ったプリミティブ値
///
/// `Display` の出力は同じ型として解釈し直すと元の値に戻ります。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PrimitiveValue {
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Boolean(bool),
    /// UTF-16コードユニット
    Char(u16),
    UByte(u8),
    UShort(u16),
    UInt(u32),
    ULong(u64),
}

impl PrimitiveValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PrimitiveValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for PrimitiveValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PrimitiveValue::Byte(v) => write!(f, "{}", v),
            PrimitiveValue::Short(v) => write!(f, "{}", v),
            PrimitiveValue::Int(v) => write!(f, "{}", v),
            PrimitiveValue::Long(v) => write!(f, "{}", v),
            PrimitiveValue::Float(v) => write!(f, "{}", v),
            PrimitiveValue::Double(v) => write!(f, "{}", v),
            PrimitiveValue::Boolean(v) => write!(f, "{}", v),
            PrimitiveValue::Char(unit) => match char::from_u32(u32::from(*unit)) {
                Some(c) if !c.is_control() => write!(f, "'{}'", c),
                _ => write!(f, "'\\u{:04x}'", unit),
            },
            PrimitiveValue::UByte(v) => write!(f, "{}", v),
            PrimitiveValue::UShort(v) => write!(f, "{}", v),
            PrimitiveValue::UInt(v) => write!(f, "{}", v),
            PrimitiveValue::ULong(v) => write!(f, "{}", v),
        }
    }
}

/// 配列の要素型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayElement {
    /// `IntArray` などの特殊化配列
    Primitive(PrimitiveKind),
    /// `kotlin.Array<T>`（要素はオブジェクト参照）
    Reference,
}

/// 内部構造を展開できるコレクション型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    ArrayList,
    HashMap,
    HashSet,
}

impl CollectionKind {
    pub fn qualified_name(&self) -> &'static str {
        match self {
            CollectionKind::ArrayList => "kotlin.collections.ArrayList",
            CollectionKind::HashMap => "kotlin.collections.HashMap",
            CollectionKind::HashSet => "kotlin.collections.HashSet",
        }
    }
}

/// 型の種類
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    /// スタックやフィールドに直接格納されたプリミティブ
    Primitive(PrimitiveKind),
    /// ヒープ上にボックス化されたプリミティブ
    Boxed(PrimitiveKind),
    String,
    Class { is_final: bool },
    Interface,
    Array(ArrayElement),
    Collection(CollectionKind),
    Nullable(Box<TypeDescriptor>),
}

/// フォーマッタのカテゴリ指定に使う、`TypeKind` の判別子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCategory {
    Primitive,
    Boxed,
    String,
    Class,
    Interface,
    Array,
    Collection,
    Nullable,
}

/// 名前だけで判別できる主なインターフェース
const KNOWN_INTERFACES: &[&str] = &[
    "kotlin.Comparable",
    "kotlin.CharSequence",
    "kotlin.collections.Iterable",
    "kotlin.collections.MutableIterable",
    "kotlin.collections.Collection",
    "kotlin.collections.MutableCollection",
    "kotlin.collections.List",
    "kotlin.collections.MutableList",
    "kotlin.collections.Set",
    "kotlin.collections.MutableSet",
    "kotlin.collections.Map",
    "kotlin.collections.MutableMap",
];

/// 型記述子
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    /// 修飾名（nullable型は末尾に `?`）
    pub name: String,
    pub kind: TypeKind,
    /// フィールド配置（DWARFから取得できた場合）
    pub layout: Option<ClassLayout>,
    /// 実行時タグ（TypeInfoアドレス）
    pub tag: Option<u64>,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            layout: None,
            tag: None,
        }
    }

    /// 宣言上の修飾名から分類する
    ///
    /// `kotlin.Int` のようなプリミティブ名は直接格納されたプリミティブ、
    /// 末尾の `?` はnullableラッパーとして扱います。
    pub fn from_name(name: &str) -> Self {
        let name = name.trim();
        if let Some(inner) = name.strip_suffix('?') {
            return Self::nullable(Self::from_name(inner));
        }

        let kind = match classify_runtime_name(name) {
            Some(kind) => kind,
            None => match name.strip_prefix("kotlin.").and_then(PrimitiveKind::from_simple_name) {
                Some(primitive) => TypeKind::Primitive(primitive),
                None if KNOWN_INTERFACES.contains(&name) => TypeKind::Interface,
                None => TypeKind::Class { is_final: false },
            },
        };
        Self::new(name, kind)
    }

    /// 実行時タグから引いた型レコードを記述子にする
    ///
    /// ヒープ上のオブジェクトなので、プリミティブ名はボックス化された値を表します。
    pub fn from_record(record: &TypeRecord) -> Self {
        let kind = match classify_runtime_name(&record.name) {
            Some(kind) => kind,
            None => match record
                .name
                .strip_prefix("kotlin.")
                .and_then(PrimitiveKind::from_simple_name)
            {
                Some(primitive) => TypeKind::Boxed(primitive),
                // 実体を持つオブジェクトのクラスはそれ以上具体化しない
                None => TypeKind::Class { is_final: true },
            },
        };

        Self {
            name: record.name.clone(),
            kind,
            layout: record.layout.clone(),
            tag: Some(record.tag),
        }
    }

    /// フィールドのDWARF型名から記述子を作る
    ///
    /// ポインタ型（`T*`）はオブジェクト参照として `kotlin.Any?` を静的型にします。
    pub fn from_field_type(type_name: &str) -> Self {
        if type_name.ends_with('*') {
            return Self::from_name("kotlin.Any?");
        }
        match PrimitiveKind::from_c_name(type_name) {
            Some(primitive) => Self::primitive(primitive),
            None => Self::from_name(type_name),
        }
    }

    pub fn primitive(kind: PrimitiveKind) -> Self {
        Self::new(kind.qualified_name(), TypeKind::Primitive(kind))
    }

    pub fn boxed(kind: PrimitiveKind) -> Self {
        Self::new(kind.qualified_name(), TypeKind::Boxed(kind))
    }

    pub fn class(name: impl Into<String>, is_final: bool) -> Self {
        Self::new(name, TypeKind::Class { is_final })
    }

    /// nullableラッパーを作る（既にnullableならそのまま）
    pub fn nullable(inner: TypeDescriptor) -> Self {
        if matches!(inner.kind, TypeKind::Nullable(_)) {
            return inner;
        }
        Self::new(format!("{}?", inner.name), TypeKind::Nullable(Box::new(inner)))
    }

    pub fn with_layout(mut self, layout: ClassLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn with_tag(mut self, tag: u64) -> Self {
        self.tag = Some(tag);
        self
    }

    /// nullableラッパーを外した型
    pub fn wrapped(&self) -> &TypeDescriptor {
        match &self.kind {
            TypeKind::Nullable(inner) => inner.wrapped(),
            _ => self,
        }
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self.kind, TypeKind::Nullable(_))
    }

    /// 値がオブジェクト参照として格納される型かどうか
    pub fn is_reference(&self) -> bool {
        match &self.kind {
            TypeKind::Primitive(_) => false,
            TypeKind::Boxed(_)
            | TypeKind::String
            | TypeKind::Class { .. }
            | TypeKind::Interface
            | TypeKind::Array(_)
            | TypeKind::Collection(_)
            | TypeKind::Nullable(_) => true,
        }
    }

    /// これ以上具体的な実行時型を持ちえない型かどうか
    ///
    /// nullable型はnullかどうかを読むまで分からないため、常に非finalです。
    pub fn is_final(&self) -> bool {
        match &self.kind {
            TypeKind::Primitive(_)
            | TypeKind::Boxed(_)
            | TypeKind::String
            | TypeKind::Array(_)
            | TypeKind::Collection(_) => true,
            TypeKind::Class { is_final } => *is_final,
            TypeKind::Interface | TypeKind::Nullable(_) => false,
        }
    }

    pub fn category(&self) -> TypeCategory {
        match &self.kind {
            TypeKind::Primitive(_) => TypeCategory::Primitive,
            TypeKind::Boxed(_) => TypeCategory::Boxed,
            TypeKind::String => TypeCategory::String,
            TypeKind::Class { .. } => TypeCategory::Class,
            TypeKind::Interface => TypeCategory::Interface,
            TypeKind::Array(_) => TypeCategory::Array,
            TypeKind::Collection(_) => TypeCategory::Collection,
            TypeKind::Nullable(_) => TypeCategory::Nullable,
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// ランタイムが特別な表現を持つ型名を分類する
fn classify_runtime_name(name: &str) -> Option<TypeKind> {
    let kind = match name {
        "kotlin.String" => TypeKind::String,
        "kotlin.Array" => TypeKind::Array(ArrayElement::Reference),
        "kotlin.ByteArray" => TypeKind::Array(ArrayElement::Primitive(PrimitiveKind::Byte)),
        "kotlin.ShortArray" => TypeKind::Array(ArrayElement::Primitive(PrimitiveKind::Short)),
        "kotlin.IntArray" => TypeKind::Array(ArrayElement::Primitive(PrimitiveKind::Int)),
        "kotlin.LongArray" => TypeKind::Array(ArrayElement::Primitive(PrimitiveKind::Long)),
        "kotlin.FloatArray" => TypeKind::Array(ArrayElement::Primitive(PrimitiveKind::Float)),
        "kotlin.DoubleArray" => TypeKind::Array(ArrayElement::Primitive(PrimitiveKind::Double)),
        "kotlin.BooleanArray" => TypeKind::Array(ArrayElement::Primitive(PrimitiveKind::Boolean)),
        "kotlin.CharArray" => TypeKind::Array(ArrayElement::Primitive(PrimitiveKind::Char)),
        "kotlin.collections.ArrayList" => TypeKind::Collection(CollectionKind::ArrayList),
        "kotlin.collections.HashMap" => TypeKind::Collection(CollectionKind::HashMap),
        "kotlin.collections.HashSet" => TypeKind::Collection(CollectionKind::HashSet),
        _ => return None,
    };
    Some(kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_names() {
        assert_eq!(
            TypeDescriptor::from_name("kotlin.Int").kind,
            TypeKind::Primitive(PrimitiveKind::Int)
        );
        assert_eq!(TypeDescriptor::from_name("kotlin.String").kind, TypeKind::String);
        assert_eq!(
            TypeDescriptor::from_name("kotlin.CharArray").kind,
            TypeKind::Array(ArrayElement::Primitive(PrimitiveKind::Char))
        );
        assert_eq!(
            TypeDescriptor::from_name("kotlin.collections.HashSet").kind,
            TypeKind::Collection(CollectionKind::HashSet)
        );
        assert_eq!(
            TypeDescriptor::from_name("kotlin.collections.List").kind,
            TypeKind::Interface
        );
        assert_eq!(
            TypeDescriptor::from_name("kotlin.Any").kind,
            TypeKind::Class { is_final: false }
        );
    }

    #[test]
    fn test_nullable_wrapper() {
        let ty = TypeDescriptor::from_name("kotlin.Int?");
        assert_eq!(ty.name, "kotlin.Int?");
        assert!(ty.is_nullable());
        assert!(!ty.is_final());
        assert_eq!(ty.wrapped().kind, TypeKind::Primitive(PrimitiveKind::Int));
        // 二重に包まない
        assert_eq!(TypeDescriptor::nullable(ty.clone()), ty);
    }

    #[test]
    fn test_runtime_record_is_boxed() {
        let record = TypeRecord {
            name: "kotlin.Long".to_string(),
            tag: 0x4000,
            layout: None,
        };
        let ty = TypeDescriptor::from_record(&record);
        assert_eq!(ty.kind, TypeKind::Boxed(PrimitiveKind::Long));
        assert_eq!(ty.tag, Some(0x4000));

        let record = TypeRecord {
            name: "app.Circle".to_string(),
            tag: 0x5000,
            layout: None,
        };
        assert!(TypeDescriptor::from_record(&record).is_final());
    }

    #[test]
    fn test_reference_and_final() {
        let int = TypeDescriptor::primitive(PrimitiveKind::Int);
        assert!(!int.is_reference());
        assert!(int.is_final());

        let shape = TypeDescriptor::from_name("app.Shape");
        assert!(shape.is_reference());
        assert!(!shape.is_final());
        assert!(TypeDescriptor::class("app.Point", true).is_final());
    }

    #[test]
    fn test_field_types() {
        assert_eq!(
            TypeDescriptor::from_field_type("int").kind,
            TypeKind::Primitive(PrimitiveKind::Int)
        );
        assert_eq!(TypeDescriptor::from_field_type("ObjHeader*").name, "kotlin.Any?");
    }

    #[test]
    fn test_decode_primitives() {
        assert_eq!(
            PrimitiveKind::Int.decode(&(-5i32).to_le_bytes()).unwrap(),
            PrimitiveValue::Int(-5)
        );
        assert_eq!(
            PrimitiveKind::Boolean.decode(&[1]).unwrap(),
            PrimitiveValue::Boolean(true)
        );
        assert_eq!(PrimitiveValue::Char(0x41).to_string(), "'A'");
        assert_eq!(PrimitiveValue::Char(0x0a).to_string(), "'\\u000a'");
        assert!(PrimitiveKind::Long.decode(&[0; 4]).is_err());
    }
}
