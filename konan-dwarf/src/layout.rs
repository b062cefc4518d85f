//! DWARFクラスレイアウトの抽出
//!
//! DWARFの構造体/クラスDIEから、Kotlinクラスのフィールド名とオフセットを取り出します。
//! 取り出したレイアウトは型メタデータに添付され、フィールドの子要素表示や
//! コレクション内部フィールドの位置決めに使われます。

use crate::Result;
use gimli::Reader;
use std::collections::HashMap;

/// クラスレイアウト
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLayout {
    /// クラスの修飾名
    pub name: String,
    /// インスタンスサイズ（バイト、ヘッダ込み）
    pub size: u64,
    /// フィールド（オフセット順）
    pub fields: Vec<FieldLayout>,
}

impl ClassLayout {
    /// フィールド名からオフセットを引く
    pub fn field_offset(&self, name: &str) -> Option<u64> {
        self.fields.iter().find(|f| f.name == name).map(|f| f.offset)
    }
}

/// フィールド情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    /// フィールド名
    pub name: String,
    /// オブジェクト先頭からのオフセット（バイト）
    pub offset: u64,
    /// フィールドの型名（ポインタは `T*`）
    pub type_name: Option<String>,
}

/// レイアウト抽出器
pub struct LayoutExtractor<'a, R: Reader> {
    dwarf: &'a gimli::Dwarf<R>,
}

impl<'a, R: Reader<Offset = usize>> LayoutExtractor<'a, R> {
    /// 新しいレイアウト抽出器を作成する
    pub fn new(dwarf: &'a gimli::Dwarf<R>) -> Self {
        Self { dwarf }
    }

    /// すべてのコンパイルユニットから名前付きクラスのレイアウトを集める
    ///
    /// 同名のクラスが複数ある場合は最初に見つかった定義を使います。
    pub fn extract_all(&self) -> Result<HashMap<String, ClassLayout>> {
        let mut layouts = HashMap::new();

        let mut iter = self.dwarf.units();
        while let Some(header) = iter.next()? {
            let unit = self.dwarf.unit(header)?;
            self.extract_unit(&unit, &mut layouts)?;
        }

        Ok(layouts)
    }

    /// 1つのユニット内のクラスを走査する
    fn extract_unit(
        &self,
        unit: &gimli::Unit<R>,
        layouts: &mut HashMap<String, ClassLayout>,
    ) -> Result<()> {
        let mut entries = unit.entries();

        while let Some((_, entry)) = entries.next_dfs()? {
            let tag = entry.tag();
            if tag != gimli::DW_TAG_structure_type && tag != gimli::DW_TAG_class_type {
                continue;
            }

            // 宣言のみのDIEは読み飛ばす
            if let Ok(Some(gimli::AttributeValue::Flag(true))) =
                entry.attr_value(gimli::DW_AT_declaration)
            {
                continue;
            }

            let Some(name) = self.get_name(unit, entry) else {
                continue;
            };
            if layouts.contains_key(&name) {
                continue;
            }

            let size = self.get_udata(entry, gimli::DW_AT_byte_size).unwrap_or(0);
            let fields = self.extract_fields(unit, entry.offset())?;

            layouts.insert(name.clone(), ClassLayout { name, size, fields });
        }

        Ok(())
    }

    /// メンバDIEからフィールドを抽出する
    fn extract_fields(
        &self,
        unit: &gimli::Unit<R>,
        offset: gimli::UnitOffset<R::Offset>,
    ) -> Result<Vec<FieldLayout>> {
        let mut fields = Vec::new();
        let mut tree = unit.entries_tree(Some(offset))?;
        let root = tree.root()?;

        let mut children = root.children();
        while let Some(child) = children.next()? {
            let entry = child.entry();
            if entry.tag() != gimli::DW_TAG_member {
                continue;
            }

            let name = self
                .get_name(unit, entry)
                .unwrap_or_else(|| "<unnamed>".to_string());
            let offset = self
                .get_udata(entry, gimli::DW_AT_data_member_location)
                .unwrap_or(0);
            let type_name = self
                .get_type_ref(entry)
                .and_then(|type_offset| self.type_name(unit, type_offset));

            fields.push(FieldLayout {
                name,
                offset,
                type_name,
            });
        }

        fields.sort_by_key(|f| f.offset);
        Ok(fields)
    }

    /// 型DIEの名前を取得する（ポインタは1段だけ辿る）
    fn type_name(
        &self,
        unit: &gimli::Unit<R>,
        offset: gimli::UnitOffset<R::Offset>,
    ) -> Option<String> {
        let entry = unit.entry(offset).ok()?;
        if let Some(name) = self.get_name(unit, &entry) {
            return Some(name);
        }

        if entry.tag() == gimli::DW_TAG_pointer_type {
            let pointee = self.get_type_ref(&entry)?;
            let pointee_entry = unit.entry(pointee).ok()?;
            return self.get_name(unit, &pointee_entry).map(|n| format!("{}*", n));
        }

        None
    }

    /// 名前を取得する（.debug_str 参照も解決する）
    fn get_name(
        &self,
        unit: &gimli::Unit<R>,
        entry: &gimli::DebuggingInformationEntry<R>,
    ) -> Option<String> {
        let attr = entry.attr_value(gimli::DW_AT_name).ok()??;
        let name = self.dwarf.attr_string(unit, attr).ok()?;
        let name = name.to_string_lossy().ok()?;
        Some(name.into_owned())
    }

    /// 符号なし定数属性を取得する
    fn get_udata(
        &self,
        entry: &gimli::DebuggingInformationEntry<R>,
        name: gimli::DwAt,
    ) -> Option<u64> {
        entry.attr_value(name).ok()??.udata_value()
    }

    /// 型参照を取得する
    fn get_type_ref(
        &self,
        entry: &gimli::DebuggingInformationEntry<R>,
    ) -> Option<gimli::UnitOffset<R::Offset>> {
        match entry.attr_value(gimli::DW_AT_type).ok()?? {
            gimli::AttributeValue::UnitRef(offset) => Some(offset),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_offset_lookup() {
        let layout = ClassLayout {
            name: "kotlin.collections.ArrayList".to_string(),
            size: 32,
            fields: vec![
                FieldLayout {
                    name: "backingArray".to_string(),
                    offset: 8,
                    type_name: Some("ObjHeader*".to_string()),
                },
                FieldLayout {
                    name: "length".to_string(),
                    offset: 20,
                    type_name: Some("int".to_string()),
                },
            ],
        };

        assert_eq!(layout.field_offset("length"), Some(20));
        assert_eq!(layout.field_offset("missing"), None);
    }
}
