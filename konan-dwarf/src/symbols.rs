//! シンボル解決機能

use crate::{DwarfLoader, Result};
use object::{Object, ObjectSymbol};
use std::collections::HashMap;

/// TypeInfoシンボルの接頭辞
pub const TYPE_INFO_PREFIX: &str = "ktype:";
/// 関数シンボルの接頭辞
pub const FUNCTION_PREFIX: &str = "kfun:";

/// Kotlin/Nativeシンボルの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KotlinSymbolKind {
    /// `kfun:` 関数
    Function,
    /// `ktype:` 型情報（TypeInfo）
    TypeInfo,
    /// `kclass:` クラス参照
    Class,
    /// `kvar:` グローバル変数
    Variable,
    /// Kotlin以外（ランタイムのC++関数など）
    Native,
}

/// シンボル情報
#[derive(Debug, Clone)]
pub struct Symbol {
    /// リンカ上のシンボル名
    pub name: String,
    /// 表示用の名前（接頭辞を除いたKotlinの修飾名）
    pub demangled_name: String,
    pub kind: KotlinSymbolKind,
    pub address: u64,
    pub size: u64,
}

impl Symbol {
    /// シンボルを作成し、表示用の名前を設定する
    pub fn new(name: String, address: u64, size: u64) -> Self {
        let (kind, demangled_name) = demangle_symbol(&name);
        Self {
            name,
            demangled_name,
            kind,
            address,
            size,
        }
    }

    /// 表示用の名前を取得
    pub fn display_name(&self) -> &str {
        &self.demangled_name
    }
}

/// Kotlin/Nativeのシンボル名を分解する
///
/// 例: "kfun:kotlin.Throwable#<init>(){}" -> "kotlin.Throwable.<init>(){}"
///     "ktype:kotlin.String" -> "kotlin.String"
/// Mach-Oの先頭アンダースコアも取り除く。
fn demangle_symbol(name: &str) -> (KotlinSymbolKind, String) {
    const PREFIXES: [(&str, KotlinSymbolKind); 4] = [
        (FUNCTION_PREFIX, KotlinSymbolKind::Function),
        (TYPE_INFO_PREFIX, KotlinSymbolKind::TypeInfo),
        ("kclass:", KotlinSymbolKind::Class),
        ("kvar:", KotlinSymbolKind::Variable),
    ];

    let unprefixed = name.strip_prefix('_').unwrap_or(name);
    for (prefix, kind) in PREFIXES {
        if let Some(rest) = unprefixed.strip_prefix(prefix) {
            return (kind, rest.replace('#', "."));
        }
    }

    (KotlinSymbolKind::Native, unprefixed.to_string())
}

/// シンボル解決
pub struct SymbolResolver {
    /// シンボル名 -> シンボル情報のマップ
    symbols_by_name: HashMap<String, Symbol>,
    /// アドレス順にソートしたシンボル
    symbols_by_address: Vec<Symbol>,
    /// PIE（Position Independent Executable）かどうか
    is_pie: bool,
}

impl SymbolResolver {
    /// DWARFローダーからシンボル解決を作成する
    pub fn new(loader: &DwarfLoader) -> Result<Self> {
        let symbols = loader
            .object_file()
            .symbols()
            .filter_map(|symbol| {
                let name = symbol.name().ok()?;
                if name.is_empty() || symbol.is_undefined() {
                    return None;
                }
                Some(Symbol::new(name.to_string(), symbol.address(), symbol.size()))
            })
            .collect();

        Ok(Self::from_symbols(symbols, loader.is_pie()))
    }

    /// シンボル一覧から作成する
    pub fn from_symbols(symbols: Vec<Symbol>, is_pie: bool) -> Self {
        let mut symbols_by_name = HashMap::new();
        for sym in &symbols {
            symbols_by_name.insert(sym.name.clone(), sym.clone());
            // Mach-Oでは先頭に '_' が付くため、外した名前でも引けるようにする
            if let Some(stripped) = sym.name.strip_prefix('_') {
                symbols_by_name
                    .entry(stripped.to_string())
                    .or_insert_with(|| sym.clone());
            }
        }

        let mut symbols_by_address = symbols;
        symbols_by_address.sort_by_key(|s| s.address);

        Self {
            symbols_by_name,
            symbols_by_address,
            is_pie,
        }
    }

    /// PIE（Position Independent Executable）かどうかを取得する
    pub fn is_pie(&self) -> bool {
        self.is_pie
    }

    /// シンボル名からアドレスを解決する
    pub fn resolve(&self, symbol: &str) -> Option<u64> {
        self.symbols_by_name.get(symbol).map(|s| s.address)
    }

    /// アドレスからシンボルを解決する（最も近いシンボルを返す）
    pub fn reverse_resolve(&self, addr: u64) -> Option<Symbol> {
        match self.symbols_by_address.binary_search_by_key(&addr, |s| s.address) {
            Ok(idx) => Some(self.symbols_by_address[idx].clone()),
            Err(0) => None,
            Err(idx) => {
                let sym = &self.symbols_by_address[idx - 1];
                // サイズ情報がある場合は範囲内かチェック
                if sym.size == 0 || addr < sym.address + sym.size {
                    Some(sym.clone())
                } else {
                    None
                }
            }
        }
    }

    /// すべてのシンボルを取得する
    pub fn all_symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols_by_address.iter()
    }

    /// TypeInfoシンボルを列挙する
    pub fn type_info_symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols_by_address
            .iter()
            .filter(|s| s.kind == KotlinSymbolKind::TypeInfo)
    }

    /// パターンにマッチするシンボルを検索する
    /// リンカ名と表示名の両方で検索する
    pub fn find_symbols(&self, pattern: &str) -> Vec<Symbol> {
        let mut found: Vec<Symbol> = self
            .symbols_by_address
            .iter()
            .filter(|s| s.name.contains(pattern) || s.demangled_name.contains(pattern))
            .cloned()
            .collect();
        found.dedup_by(|a, b| a.name == b.name);
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> SymbolResolver {
        SymbolResolver::from_symbols(
            vec![
                Symbol::new("ktype:kotlin.String".to_string(), 0x2000, 0x60),
                Symbol::new("kfun:kotlin.Throwable#<init>(){}".to_string(), 0x1000, 0x40),
                Symbol::new("_ThrowException".to_string(), 0x1100, 0),
            ],
            false,
        )
    }

    #[test]
    fn test_demangle_kotlin_symbols() {
        let sym = Symbol::new("kfun:kotlin.Throwable#<init>(){}".to_string(), 0, 0);
        assert_eq!(sym.kind, KotlinSymbolKind::Function);
        assert_eq!(sym.display_name(), "kotlin.Throwable.<init>(){}");

        let sym = Symbol::new("_ktype:kotlin.collections.ArrayList".to_string(), 0, 0);
        assert_eq!(sym.kind, KotlinSymbolKind::TypeInfo);
        assert_eq!(sym.display_name(), "kotlin.collections.ArrayList");

        let sym = Symbol::new("__cxa_begin_catch".to_string(), 0, 0);
        assert_eq!(sym.kind, KotlinSymbolKind::Native);
    }

    #[test]
    fn test_resolve_and_reverse_resolve() {
        let resolver = resolver();
        assert_eq!(resolver.resolve("ktype:kotlin.String"), Some(0x2000));
        // 先頭アンダースコアなしでも引ける
        assert_eq!(resolver.resolve("ThrowException"), Some(0x1100));

        let sym = resolver.reverse_resolve(0x1020).unwrap();
        assert_eq!(sym.address, 0x1000);
        assert!(resolver.reverse_resolve(0x0fff).is_none());
        // サイズ範囲外
        assert!(resolver.reverse_resolve(0x2070).is_none());
    }

    #[test]
    fn test_type_info_symbols() {
        let resolver = resolver();
        let names: Vec<_> = resolver
            .type_info_symbols()
            .map(|s| s.display_name().to_string())
            .collect();
        assert_eq!(names, vec!["kotlin.String".to_string()]);
        assert_eq!(resolver.find_symbols("Throwable").len(), 1);
    }
}
