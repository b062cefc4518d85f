//! 統合テスト用のヒープ組み立て
//!
//! `MemorySnapshot` 上にKotlin/Nativeのオブジェクト配置（LP64）でオブジェクトを並べ、
//! 同じ型名の `ktype:` シンボルを持つイメージを作ります。

#![allow(dead_code)]

use konan_core::{AbiLayout, PrimitiveKind};
use konan_dwarf::{ClassLayout, Image, ImageTable, Symbol, SymbolResolver};
use konan_target::{MemoryReader, MemorySnapshot};
use std::cell::Cell;
use std::collections::HashMap;

pub const IMAGE_NAME: &str = "app.kexe";
pub const THROW_ADDRESS: u64 = 0x40_1000;
pub const CATCH_ADDRESS: u64 = 0x40_2000;

const TYPE_BASE: u64 = 0x20_0000;
const TYPE_AREA: usize = 0x2000;
const TYPE_STRIDE: u64 = 0x40;
const HEAP_BASE: u64 = 0x10_0000;
const HEAP_SIZE: usize = 0x2_0000;

/// テスト用ヒープ
pub struct Heap {
    pub memory: MemorySnapshot,
    abi: AbiLayout,
    types: Vec<(String, u64)>,
    layouts: HashMap<String, ClassLayout>,
    next: u64,
}

impl Heap {
    pub fn new() -> Self {
        let mut memory = MemorySnapshot::new();
        memory.map_zeroed(TYPE_BASE, TYPE_AREA);
        memory.map_zeroed(HEAP_BASE, HEAP_SIZE);
        Self {
            memory,
            abi: AbiLayout::lp64(),
            types: Vec::new(),
            layouts: HashMap::new(),
            next: HEAP_BASE,
        }
    }

    /// 型名に対応するTypeInfoのアドレス（無ければ作る）
    pub fn type_info(&mut self, name: &str) -> u64 {
        if let Some((_, tag)) = self.types.iter().find(|(n, _)| n == name) {
            return *tag;
        }
        let tag = TYPE_BASE + self.types.len() as u64 * TYPE_STRIDE;
        self.memory.write_u64(tag, tag).unwrap();
        self.types.push((name.to_string(), tag));
        tag
    }

    /// クラスのDWARFレイアウトを登録する
    pub fn layout(&mut self, layout: ClassLayout) {
        self.type_info(&layout.name);
        self.layouts.insert(layout.name.clone(), layout);
    }

    pub fn alloc(&mut self, size: u64) -> u64 {
        let address = self.next;
        self.next += size.max(8).div_ceil(8) * 8;
        address
    }

    /// ヘッダ付きのオブジェクトを確保する
    pub fn object(&mut self, type_name: &str, size: u64) -> u64 {
        let tag = self.type_info(type_name);
        let object = self.alloc(size);
        self.memory.write_u64(object, tag).unwrap();
        object
    }

    /// オブジェクト参照を入れたスロット
    pub fn slot(&mut self, object: u64) -> u64 {
        let slot = self.alloc(8);
        self.memory.write_u64(slot, object).unwrap();
        slot
    }

    /// ボックス化されたプリミティブ
    pub fn boxed(&mut self, kind: PrimitiveKind, bytes: &[u8]) -> u64 {
        let offset = self.abi.boxed_value_offset(kind.size());
        let object = self.object(&kind.qualified_name(), offset + kind.size());
        self.memory.write(object + offset, bytes).unwrap();
        object
    }

    fn array(&mut self, type_name: &str, count: usize, element_size: u64) -> u64 {
        let data = self.abi.array_data_offset();
        let object = self.object(type_name, data + count as u64 * element_size);
        self.memory
            .write_u32(object + self.abi.array_count_offset(), count as u32)
            .unwrap();
        object
    }

    pub fn string(&mut self, text: &str) -> u64 {
        let units: Vec<u16> = text.encode_utf16().collect();
        let object = self.array("kotlin.String", units.len(), 2);
        let bytes: Vec<u8> = units.iter().flat_map(|u| u.to_le_bytes()).collect();
        if !bytes.is_empty() {
            self.memory
                .write(object + self.abi.array_data_offset(), &bytes)
                .unwrap();
        }
        object
    }

    pub fn int_array(&mut self, values: &[i32]) -> u64 {
        let object = self.array("kotlin.IntArray", values.len(), 4);
        let data = object + self.abi.array_data_offset();
        for (i, value) in values.iter().enumerate() {
            self.memory.write_u32(data + i as u64 * 4, *value as u32).unwrap();
        }
        object
    }

    pub fn ref_array(&mut self, elements: &[u64]) -> u64 {
        let object = self.array("kotlin.Array", elements.len(), 8);
        let data = object + self.abi.array_data_offset();
        for (i, element) in elements.iter().enumerate() {
            self.memory.write_u64(data + i as u64 * 8, *element).unwrap();
        }
        object
    }

    /// `ArrayList`（背後の配列の `start` 番目から `elements`）
    pub fn array_list(&mut self, elements: &[u64], start: usize) -> u64 {
        let mut backing = vec![0u64; start];
        backing.extend_from_slice(elements);
        let array = self.ref_array(&backing);

        let list = self.object("kotlin.collections.ArrayList", 0x20);
        self.memory.write_u64(list + 8, array).unwrap();
        self.memory.write_u32(list + 16, start as u32).unwrap();
        self.memory.write_u32(list + 20, elements.len() as u32).unwrap();
        list
    }

    /// `HashMap`（`None` は削除済みスロット）
    pub fn hash_map(&mut self, slots: &[Option<(u64, u64)>]) -> u64 {
        let keys: Vec<u64> = slots.iter().map(|s| s.map(|(k, _)| k).unwrap_or(0)).collect();
        let values: Vec<u64> = slots.iter().map(|s| s.map(|(_, v)| v).unwrap_or(0)).collect();
        let presence: Vec<i32> = slots
            .iter()
            .enumerate()
            .map(|(i, s)| if s.is_some() { i as i32 } else { -1 })
            .collect();
        let live = slots.iter().filter(|s| s.is_some()).count();

        let keys = self.ref_array(&keys);
        let values = self.ref_array(&values);
        let presence = self.int_array(&presence);

        let map = self.object("kotlin.collections.HashMap", 0x40);
        self.memory.write_u64(map + 8, keys).unwrap();
        self.memory.write_u64(map + 16, values).unwrap();
        self.memory.write_u64(map + 24, presence).unwrap();
        self.memory.write_u32(map + 44, slots.len() as u32).unwrap();
        self.memory.write_u32(map + 52, live as u32).unwrap();
        map
    }

    /// `HashSet`（内部マップのキーが要素）
    pub fn hash_set(&mut self, elements: &[u64]) -> u64 {
        let slots: Vec<Option<(u64, u64)>> = elements.iter().map(|e| Some((*e, 0))).collect();
        let map = self.hash_map(&slots);
        let set = self.object("kotlin.collections.HashSet", 0x10);
        self.memory.write_u64(set + 8, map).unwrap();
        set
    }

    /// ランタイムのシンボルと型情報を持つイメージテーブル
    pub fn images(&self) -> ImageTable {
        let mut table = ImageTable::new();
        table.add_image(self.image(true));
        table
    }

    /// ランタイムを含まないイメージテーブル
    pub fn images_without_runtime(&self) -> ImageTable {
        let mut table = ImageTable::new();
        table.add_image(self.image(false));
        table
    }

    fn image(&self, with_runtime: bool) -> Image {
        let mut symbols: Vec<Symbol> = self
            .types
            .iter()
            .map(|(name, tag)| Symbol::new(format!("ktype:{}", name), *tag, TYPE_STRIDE))
            .collect();
        if with_runtime {
            symbols.push(Symbol::new("ThrowException".to_string(), THROW_ADDRESS, 0x80));
            symbols.push(Symbol::new("__cxa_begin_catch".to_string(), CATCH_ADDRESS, 0x40));
        }
        Image::new(
            IMAGE_NAME,
            SymbolResolver::from_symbols(symbols, false),
            self.layouts.clone(),
            0,
        )
    }
}

/// 読み取り回数を数えるメモリ
pub struct CountingReader<'a> {
    inner: &'a dyn MemoryReader,
    reads: Cell<usize>,
}

impl<'a> CountingReader<'a> {
    pub fn new(inner: &'a dyn MemoryReader) -> Self {
        Self {
            inner,
            reads: Cell::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.get()
    }
}

impl MemoryReader for CountingReader<'_> {
    fn read(&self, addr: u64, size: usize) -> konan_target::Result<Vec<u8>> {
        self.reads.set(self.reads.get() + 1);
        self.inner.read(addr, size)
    }
}
