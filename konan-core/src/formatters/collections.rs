//! 標準コレクションの内部構造
//!
//! `ArrayList` は背後の配列と開始位置・長さ、`HashMap` はキー配列・値配列・在否配列を持ちます。
//! `HashSet` は内部の `HashMap` のキーが要素です。
//! フィールド位置はDWARFのレイアウトに同名フィールドがあればそれを使い、無ければ
//! ポインタ幅から求めた既定位置を使います。

use crate::errors::{IntrospectionError, IntrospectionResult};
use crate::formatters::children::{SyntheticChild, SyntheticChildren};
use crate::types::{CollectionKind, TypeDescriptor};
use crate::value::{ExecutionContext, ValueHandle};
use konan_dwarf::ClassLayout;

fn field_offset(layout: Option<&ClassLayout>, names: &[&str], default: u64) -> u64 {
    layout
        .and_then(|layout| names.iter().find_map(|name| layout.field_offset(name)))
        .unwrap_or(default)
}

fn has_fields(layout: Option<&ClassLayout>) -> bool {
    layout.map(|l| !l.fields.is_empty()).unwrap_or(false)
}

/// 要素スロット（オブジェクト参照）のハンドル
fn element_handle(ctx: &ExecutionContext, slot: u64) -> ValueHandle {
    ValueHandle::reference_at(TypeDescriptor::from_name("kotlin.Any?"), slot, ctx.stop_id())
}

fn read_length(ctx: &ExecutionContext, address: u64, what: &str) -> IntrospectionResult<u64> {
    let value = ctx.read_i32(address)?;
    u64::try_from(value)
        .map_err(|_| IntrospectionError::malformed(format!("negative {} ({})", what, value)))
}

/// `ArrayList` の読み取り結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ListView {
    /// 背後の配列オブジェクト
    pub array: u64,
    pub start: u64,
    pub len: u64,
}

pub(crate) fn read_array_list(
    ctx: &ExecutionContext,
    object: u64,
    layout: Option<&ClassLayout>,
) -> IntrospectionResult<ListView> {
    let p = ctx.abi().pointer_size();
    // `backing` は部分リストの親リストなので配列としては読まない
    let backing_offset = field_offset(layout, &["array", "backingArray"], p);
    let length_offset = field_offset(layout, &["length"], 2 * p + 4);
    // レイアウトがあるのに offset フィールドが無ければ先頭から
    let start_offset = if has_fields(layout) {
        layout.and_then(|l| l.field_offset("offset"))
    } else {
        Some(2 * p)
    };

    let array = ctx.read_pointer(object + backing_offset)?;
    let start = match start_offset {
        Some(offset) => read_length(ctx, object + offset, "list offset")?,
        None => 0,
    };
    let len = read_length(ctx, object + length_offset, "list length")?;

    if len > 0 {
        if array == 0 {
            return Err(IntrospectionError::malformed(format!(
                "list at 0x{:x} has {} elements but no backing array",
                object, len
            )));
        }
        let capacity = u64::from(ctx.array_count(array)?);
        if start + len > capacity {
            return Err(IntrospectionError::malformed(format!(
                "list at 0x{:x} spans {}..{} of a {}-element array",
                object,
                start,
                start + len,
                capacity
            )));
        }
    }

    Ok(ListView { array, start, len })
}

/// `HashMap` の読み取り結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MapView {
    pub keys: u64,
    /// 値配列（`HashSet` の内部マップでは0）
    pub values: u64,
    pub presence: u64,
    /// 使用済みスロット数（削除済みを含む）
    pub length: u64,
    pub size: u64,
}

impl MapView {
    /// 生きているスロットの添字を先頭から列挙する
    fn live_slots<'c>(
        self,
        ctx: ExecutionContext<'c>,
    ) -> impl Iterator<Item = IntrospectionResult<u64>> + 'c {
        let presence = self.presence + ctx.abi().array_data_offset();
        (0..self.length).filter_map(move |i| match ctx.read_i32(presence + i * 4) {
            Ok(hash) if hash >= 0 => Some(Ok(i)),
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        })
    }

    fn slot(&self, ctx: &ExecutionContext, array: u64, index: u64) -> u64 {
        array + ctx.abi().array_data_offset() + index * ctx.abi().pointer_size()
    }
}

pub(crate) fn read_hash_map(
    ctx: &ExecutionContext,
    object: u64,
    layout: Option<&ClassLayout>,
) -> IntrospectionResult<MapView> {
    let p = ctx.abi().pointer_size();
    let keys = ctx.read_pointer(object + field_offset(layout, &["keysArray"], p))?;
    let values = ctx.read_pointer(object + field_offset(layout, &["valuesArray"], 2 * p))?;
    let presence = ctx.read_pointer(object + field_offset(layout, &["presenceArray"], 3 * p))?;
    let length = read_length(ctx, object + field_offset(layout, &["length"], 5 * p + 4), "map length")?;
    let size = read_length(ctx, object + field_offset(layout, &["_size", "size"], 5 * p + 12), "map size")?;

    if size > length {
        return Err(IntrospectionError::malformed(format!(
            "map at 0x{:x} has size {} beyond its {} used slots",
            object, size, length
        )));
    }
    if length > 0 {
        if keys == 0 || presence == 0 {
            return Err(IntrospectionError::malformed(format!(
                "map at 0x{:x} has used slots but no key or presence array",
                object
            )));
        }
        let capacity = u64::from(ctx.array_count(keys)?).min(u64::from(ctx.array_count(presence)?));
        if length > capacity {
            return Err(IntrospectionError::malformed(format!(
                "map at 0x{:x} uses {} slots of a {}-slot table",
                object, length, capacity
            )));
        }
    }

    Ok(MapView {
        keys,
        values,
        presence,
        length,
        size,
    })
}

pub(crate) fn read_hash_set(
    ctx: &ExecutionContext,
    object: u64,
    layout: Option<&ClassLayout>,
) -> IntrospectionResult<MapView> {
    let backing_offset = field_offset(layout, &["backing", "backingMap"], ctx.abi().pointer_size());
    let map = ctx.read_pointer(object + backing_offset)?;
    if map == 0 {
        return Err(IntrospectionError::malformed(format!(
            "set at 0x{:x} has no backing map",
            object
        )));
    }

    let map_layout = ctx
        .metadata()
        .type_by_name(CollectionKind::HashMap.qualified_name())
        .and_then(|record| record.layout);
    read_hash_map(ctx, map, map_layout.as_ref())
}

/// コレクションの要素数
pub(crate) fn collection_size(
    ctx: &ExecutionContext,
    object: u64,
    kind: CollectionKind,
    layout: Option<&ClassLayout>,
) -> IntrospectionResult<u64> {
    let size = match kind {
        CollectionKind::ArrayList => read_array_list(ctx, object, layout)?.len,
        CollectionKind::HashMap => read_hash_map(ctx, object, layout)?.size,
        CollectionKind::HashSet => read_hash_set(ctx, object, layout)?.size,
    };
    Ok(size)
}

/// コレクションの子要素（要素ごとに遅延して読む）
pub(crate) fn collection_children<'c>(
    ctx: &ExecutionContext<'c>,
    object: u64,
    kind: CollectionKind,
    layout: Option<&ClassLayout>,
) -> IntrospectionResult<SyntheticChildren<'c>> {
    let ctx = *ctx;
    let children = match kind {
        CollectionKind::ArrayList => {
            let view = read_array_list(&ctx, object, layout)?;
            let data = view.array + ctx.abi().array_data_offset();
            let p = ctx.abi().pointer_size();
            SyntheticChildren::indexed(view.len as usize, move |i| {
                let slot = data + (view.start + i as u64) * p;
                Ok(SyntheticChild::new(format!("[{}]", i), element_handle(&ctx, slot)))
            })
        }
        CollectionKind::HashMap => {
            let view = read_hash_map(&ctx, object, layout)?;
            map_children(ctx, view)
        }
        CollectionKind::HashSet => {
            let view = read_hash_set(&ctx, object, layout)?;
            map_children(ctx, MapView { values: 0, ..view })
        }
    };
    Ok(children)
}

/// 値配列が無いマップ（集合）はキーだけを子要素にする
fn map_children(ctx: ExecutionContext<'_>, view: MapView) -> SyntheticChildren<'_> {
    SyntheticChildren::from_fn(view.size as usize, move || {
        view.live_slots(ctx)
            .enumerate()
            .map(move |(n, slot)| -> IntrospectionResult<SyntheticChild> {
                let slot = slot?;
                let key = element_handle(&ctx, view.slot(&ctx, view.keys, slot));
                if view.values == 0 {
                    return Ok(SyntheticChild::new(format!("[{}]", n), key));
                }
                let value = element_handle(&ctx, view.slot(&ctx, view.values, slot));
                Ok(SyntheticChild::entry(format!("[{}]", n), key, value))
            })
    })
}
