//! 型メタデータとランタイムシンボルの検索
//!
//! プロセスにロードされたイメージごとに `ktype:` シンボル（TypeInfo）を索引化し、
//! 実行時タグ（TypeInfoのアドレス）や型名から型レコードを引けるようにします。
//! イメージは実行中に追加・削除されうるため、検索は毎回現在のイメージ集合に対して行い、
//! 見つからない型は「まだ未知」として扱えるようにしています。

use crate::layout::{ClassLayout, LayoutExtractor};
use crate::symbols::{SymbolResolver, TYPE_INFO_PREFIX};
use crate::{DwarfLoader, Result};
use std::collections::HashMap;
use tracing::debug;

/// 型レコード
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRecord {
    /// 修飾名（例: "kotlin.String"）
    pub name: String,
    /// 実行時タグ（ロード後のTypeInfoアドレス）
    pub tag: u64,
    /// DWARFから得たクラスレイアウト
    pub layout: Option<ClassLayout>,
}

/// シンボルの実行時位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolLocation {
    /// シンボルを含むイメージ名
    pub image: String,
    /// ロード後のアドレス
    pub address: u64,
}

/// 型メタデータ検索トレイト
pub trait TypeMetadata {
    /// 実行時タグから型を引く
    fn type_by_tag(&self, tag: u64) -> Option<TypeRecord>;
    /// 修飾名から型を引く
    fn type_by_name(&self, name: &str) -> Option<TypeRecord>;
}

/// ランタイムシンボル検索トレイト
pub trait RuntimeSymbols {
    fn find_symbol(&self, name: &str) -> Option<SymbolLocation>;
}

/// ロード済みイメージ
pub struct Image {
    name: String,
    symbols: SymbolResolver,
    layouts: HashMap<String, ClassLayout>,
    /// ロードバイアス（PIEのベースアドレス）
    bias: u64,
    /// タグ -> 型名
    types_by_tag: HashMap<u64, String>,
    /// 型名 -> タグ
    tags_by_name: HashMap<String, u64>,
}

impl Image {
    /// ローダーからイメージを構築する
    ///
    /// `base` は実行時のロードベース。非PIEイメージではシンボルアドレスが絶対値のため無視します。
    pub fn from_loader(loader: &DwarfLoader, base: u64) -> Result<Self> {
        let symbols = SymbolResolver::new(loader)?;
        let layouts = LayoutExtractor::new(loader.dwarf()).extract_all()?;
        let bias = if symbols.is_pie() { base } else { 0 };

        Ok(Self::new(loader.name(), symbols, layouts, bias))
    }

    /// 構成要素からイメージを作成する
    pub fn new(
        name: impl Into<String>,
        symbols: SymbolResolver,
        layouts: HashMap<String, ClassLayout>,
        bias: u64,
    ) -> Self {
        let mut types_by_tag = HashMap::new();
        let mut tags_by_name = HashMap::new();
        for sym in symbols.type_info_symbols() {
            let tag = sym.address.wrapping_add(bias);
            types_by_tag.insert(tag, sym.demangled_name.clone());
            tags_by_name.insert(sym.demangled_name.clone(), tag);
        }

        let name = name.into();
        debug!(
            "image '{}': {} type infos, {} class layouts, bias 0x{:x}",
            name,
            types_by_tag.len(),
            layouts.len(),
            bias
        );

        Self {
            name,
            symbols,
            layouts,
            bias,
            types_by_tag,
            tags_by_name,
        }
    }

    /// イメージ名
    pub fn name(&self) -> &str {
        &self.name
    }

    /// シンボル解決器
    pub fn symbols(&self) -> &SymbolResolver {
        &self.symbols
    }

    /// ロードバイアス
    pub fn bias(&self) -> u64 {
        self.bias
    }

    fn record(&self, name: &str, tag: u64) -> TypeRecord {
        TypeRecord {
            name: name.to_string(),
            tag,
            layout: self.layouts.get(name).cloned(),
        }
    }
}

/// イメージテーブル
///
/// プロセスにロードされているイメージの集合。ロード順に検索します。
#[derive(Default)]
pub struct ImageTable {
    images: Vec<Image>,
}

impl ImageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// イメージを追加する（同名のイメージは置き換える）
    pub fn add_image(&mut self, image: Image) {
        self.remove_image(image.name());
        debug!("image loaded: {}", image.name());
        self.images.push(image);
    }

    /// イメージを取り除く
    pub fn remove_image(&mut self, name: &str) -> bool {
        let before = self.images.len();
        self.images.retain(|image| image.name() != name);
        before != self.images.len()
    }

    /// ロード済みイメージ
    pub fn images(&self) -> impl Iterator<Item = &Image> {
        self.images.iter()
    }

    /// ロード済みイメージの数
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl TypeMetadata for ImageTable {
    fn type_by_tag(&self, tag: u64) -> Option<TypeRecord> {
        self.images.iter().find_map(|image| {
            image
                .types_by_tag
                .get(&tag)
                .map(|name| image.record(name, tag))
        })
    }

    fn type_by_name(&self, name: &str) -> Option<TypeRecord> {
        self.images.iter().find_map(|image| {
            image
                .tags_by_name
                .get(name)
                .map(|tag| image.record(name, *tag))
        })
    }
}

impl RuntimeSymbols for ImageTable {
    fn find_symbol(&self, name: &str) -> Option<SymbolLocation> {
        self.images.iter().find_map(|image| {
            image.symbols.resolve(name).map(|address| SymbolLocation {
                image: image.name().to_string(),
                address: address.wrapping_add(image.bias),
            })
        })
    }
}

/// `ktype:` シンボル名を組み立てる
pub fn type_info_symbol_name(type_name: &str) -> String {
    format!("{}{}", TYPE_INFO_PREFIX, type_name)
}
