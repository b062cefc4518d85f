//! Konan デバッグ情報解析
//!
//! このクレートは、Kotlin/Nativeイメージのシンボルテーブルとデバッグ情報の解析機能を提供します。
//! `ktype:` シンボルから型メタデータ（TypeInfo）を引き、DWARFからクラスのフィールド配置を取り出し、
//! ロード済みイメージをまとめて検索できるようにします。

pub mod layout;
pub mod loader;
pub mod metadata;
pub mod symbols;

pub use layout::{ClassLayout, FieldLayout, LayoutExtractor};
pub use loader::DwarfLoader;
pub use metadata::{Image, ImageTable, RuntimeSymbols, SymbolLocation, TypeMetadata, TypeRecord};
pub use symbols::{KotlinSymbolKind, Symbol, SymbolResolver};

/// デバッグ情報解析の結果型
pub type Result<T> = anyhow::Result<T>;
