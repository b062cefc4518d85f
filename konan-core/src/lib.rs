//! Konan 言語イントロスペクションのコア機能
//!
//! このクレートは、デバッガがKotlin/Nativeプロセスの値・型・例外を表示するための中核ロジックを提供します。
//! 言語の識別、動的型解決、フォーマッタレジストリ、例外ブレークポイントの解決を統合します。
//! 失敗は常に劣化表示（静的型、汎用サマリ、保留中のブレークポイント）として扱います。

pub mod command;
pub mod dynamic_type;
pub mod errors;
pub mod exception;
pub mod formatters;
pub mod language;
pub mod parse;
pub mod plugin;
pub mod session;
pub mod target;
pub mod types;
pub mod value;

pub use command::{CatchMode, Command};
pub use dynamic_type::{DynamicTypeResolver, DynamicValue, Preference};
pub use errors::{IntrospectionError, IntrospectionResult, RegistrationError};
pub use exception::{
    create_exception_resolver, BreakpointLocation, BreakpointSpec, ExceptionEvent,
    ExceptionResolver,
};
pub use formatters::{
    FormatterConfig, FormatterEntry, FormatterId, FormatterRegistry, SyntheticChild,
    SyntheticChildren, TypePattern,
};
pub use language::{KotlinLanguage, KotlinLanguageRuntime, LanguageType};
pub use plugin::{PluginEntry, PluginKind, PluginRegistry};
pub use session::{ImageChanges, Inspection, Session};
pub use target::{AbiLayout, KonanTarget};
pub use types::{
    ArrayElement, CollectionKind, PrimitiveKind, PrimitiveValue, TypeCategory, TypeDescriptor,
    TypeKind,
};
pub use value::{ExecutionContext, ValueHandle, ValueKind, ValueLocation};

// 他のクレートから使用するために再エクスポート
pub use konan_dwarf::{Image, ImageTable, Symbol, TypeMetadata, TypeRecord};
pub use konan_target::{LoadedImage, MemoryReader, MemorySnapshot, Register, StopReason};

/// コア機能の結果型
pub type Result<T> = anyhow::Result<T>;
