//! ELFとDWARFの読み込み機能

use crate::Result;
use object::{Object, ObjectSection};
use std::fs;
use std::path::Path;
use std::rc::Rc;

/// DWARFローダー
pub struct DwarfLoader {
    /// イメージ名（ファイルパス）
    name: String,
    /// オブジェクトファイル
    object_file: Rc<object::File<'static>>,
    /// DWARFコンテキスト
    dwarf: gimli::Dwarf<gimli::EndianSlice<'static, gimli::RunTimeEndian>>,
}

impl DwarfLoader {
    /// ファイルからシンボルとDWARF情報を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file_data = fs::read(path)
            .map_err(|e| anyhow::anyhow!("Failed to read file {:?}: {}", path, e))?;

        Self::parse(path.display().to_string(), file_data)
    }

    /// メモリ上のイメージを解析する
    pub fn parse(name: impl Into<String>, file_data: Vec<u8>) -> Result<Self> {
        let name = name.into();

        // デバッグセッション中はイメージを保持し続けるため、'staticライフタイムを得る
        let file_data: &'static [u8] = Box::leak(file_data.into_boxed_slice());

        let object_file = object::File::parse(file_data)
            .map_err(|e| anyhow::anyhow!("Failed to parse object file {}: {}", name, e))?;

        let endian = if object_file.is_little_endian() {
            gimli::RunTimeEndian::Little
        } else {
            gimli::RunTimeEndian::Big
        };

        // DWARFセクションを読み込む（無いセクションは空として扱う）
        let load_section = |id: gimli::SectionId| -> Result<gimli::EndianSlice<'static, gimli::RunTimeEndian>> {
            let data = object_file
                .section_by_name(id.name())
                .and_then(|section| section.data().ok())
                .unwrap_or(&[]);
            Ok(gimli::EndianSlice::new(data, endian))
        };

        let dwarf = gimli::Dwarf::load(load_section)
            .map_err(|e| anyhow::anyhow!("Failed to load DWARF sections: {}", e))?;

        Ok(Self {
            name,
            object_file: Rc::new(object_file),
            dwarf,
        })
    }

    /// イメージ名を取得
    pub fn name(&self) -> &str {
        &self.name
    }

    /// DWARFコンテキストへの参照を取得
    pub fn dwarf(&self) -> &gimli::Dwarf<gimli::EndianSlice<'static, gimli::RunTimeEndian>> {
        &self.dwarf
    }

    /// オブジェクトファイルへの参照を取得
    pub fn object_file(&self) -> &object::File<'static> {
        &self.object_file
    }

    /// PIE（Position Independent Executable）かどうかを判定する
    ///
    /// PIE実行ファイルや共有ライブラリの場合、シンボルアドレスはオフセットであり、
    /// 実行時ベースアドレスを加算する必要があります。
    pub fn is_pie(&self) -> bool {
        matches!(self.object_file.kind(), object::ObjectKind::Dynamic)
    }

    /// ポインタ幅（バイト）
    pub fn pointer_size(&self) -> usize {
        if self.object_file.is_64() {
            8
        } else {
            4
        }
    }
}
