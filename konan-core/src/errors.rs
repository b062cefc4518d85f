//! イントロスペクションのエラー分類
//!
//! どのエラーも呼び出し側で劣化表示（静的型、汎用サマリ、保留ブレークポイント）に
//! 置き換えられる前提で、値として保持・比較できるようにしています。

use std::fmt;
use thiserror::Error;

/// 値・型・例外の解決で起こりうるエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntrospectionError {
    /// プロセスが停止していない、またはアドレスが読めない
    #[error("Cannot access memory at 0x{address:x}: {reason}")]
    InaccessibleMemory { address: u64, reason: String },

    /// 実行時タグが型メタデータに無い
    #[error("Unknown runtime type tag 0x{tag:x}")]
    UnknownType { tag: u64 },

    /// ヘッダや内部フィールドが既知のレイアウトと矛盾する
    #[error("Malformed value: {0}")]
    MalformedValue(String),

    /// Kotlin/Nativeランタイムのイメージがまだロードされていない
    #[error("Kotlin/Native runtime is not loaded")]
    NoRuntimeLoaded,
}

impl IntrospectionError {
    pub fn inaccessible(address: u64, reason: impl fmt::Display) -> Self {
        Self::InaccessibleMemory {
            address,
            reason: reason.to_string(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedValue(message.into())
    }
}

/// 登録時のエラー（登録した呼び出し側へ同期的に返す）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// プラグイン名が別の言語タグで登録済み
    #[error("Plugin '{name}' is already registered for another language")]
    DuplicatePlugin { name: String },

    /// 型パターンの構文が不正
    #[error("Invalid type pattern '{pattern}': {reason}")]
    BadPattern { pattern: String, reason: String },
}

/// イントロスペクション操作の結果型
pub type IntrospectionResult<T> = std::result::Result<T, IntrospectionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = IntrospectionError::inaccessible(0x1000, "unmapped");
        assert_eq!(err.to_string(), "Cannot access memory at 0x1000: unmapped");

        let err = IntrospectionError::UnknownType { tag: 0xbeef };
        assert_eq!(err.to_string(), "Unknown runtime type tag 0xbeef");

        let err = RegistrationError::DuplicatePlugin {
            name: "konan".to_string(),
        };
        assert!(err.to_string().contains("konan"));
    }
}
