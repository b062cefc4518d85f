//! キャプチャ済みメモリ
//!
//! コアダンプや停止中プロセスから切り出したメモリ領域を保持し、
//! 実行中プロセスと同じ `MemoryReader` として読み取れるようにします。

use crate::memory::MemoryReader;
use crate::Result;
use std::collections::BTreeMap;

/// メモリスナップショット
///
/// 領域は開始アドレスでソートされ、読み取りは1つの領域内に収まる必要があります。
/// 領域外や領域をまたぐ読み取りは未マッピングとしてエラーになります。
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshot {
    regions: BTreeMap<u64, Vec<u8>>,
}

impl MemorySnapshot {
    /// 空のスナップショットを作成する
    pub fn new() -> Self {
        Self::default()
    }

    /// 領域を追加する（同じ開始アドレスの領域は置き換える）
    pub fn add_region(&mut self, start: u64, bytes: Vec<u8>) {
        self.regions.insert(start, bytes);
    }

    /// ゼロ埋めされた領域を確保する
    pub fn map_zeroed(&mut self, start: u64, size: usize) {
        self.add_region(start, vec![0u8; size]);
    }

    /// 既存の領域内にバイト列を書き込む
    pub fn write(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        let (start, region) = self
            .regions
            .range_mut(..=addr)
            .next_back()
            .ok_or_else(|| anyhow::anyhow!("Address 0x{:x} is not mapped", addr))?;

        let offset = (addr - *start) as usize;
        let end = offset
            .checked_add(data.len())
            .filter(|end| *end <= region.len())
            .ok_or_else(|| {
                anyhow::anyhow!("Write of {} bytes at 0x{:x} leaves the region", data.len(), addr)
            })?;

        region[offset..end].copy_from_slice(data);
        Ok(())
    }

    pub fn write_u32(&mut self, addr: u64, value: u32) -> Result<()> {
        self.write(addr, &value.to_le_bytes())
    }

    pub fn write_u64(&mut self, addr: u64, value: u64) -> Result<()> {
        self.write(addr, &value.to_le_bytes())
    }

    /// 領域の数
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }
}

impl MemoryReader for MemorySnapshot {
    fn read(&self, addr: u64, size: usize) -> Result<Vec<u8>> {
        let (start, region) = self
            .regions
            .range(..=addr)
            .next_back()
            .ok_or_else(|| anyhow::anyhow!("Address 0x{:x} is not mapped", addr))?;

        let offset = (addr - *start) as usize;
        match offset.checked_add(size) {
            Some(end) if offset < region.len() && end <= region.len() => {
                Ok(region[offset..end].to_vec())
            }
            _ => Err(anyhow::anyhow!(
                "Read of {} bytes at 0x{:x} is outside mapped memory",
                size,
                addr
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_within_region() {
        let mut snapshot = MemorySnapshot::new();
        snapshot.map_zeroed(0x1000, 0x100);
        snapshot.write_u64(0x1008, 0xdead_beef).unwrap();

        assert_eq!(snapshot.read_u64(0x1008).unwrap(), 0xdead_beef);
        assert_eq!(snapshot.read_pointer(0x1008, 4).unwrap(), 0xdead_beef);
        assert_eq!(snapshot.read_u8(0x1000).unwrap(), 0);
    }

    #[test]
    fn test_unmapped_reads_fail() {
        let mut snapshot = MemorySnapshot::new();
        snapshot.map_zeroed(0x1000, 0x10);

        assert!(snapshot.read(0x0fff, 1).is_err());
        assert!(snapshot.read(0x1010, 1).is_err());
        // 領域をまたぐ読み取り
        assert!(snapshot.read(0x100c, 8).is_err());
        assert!(snapshot.write(0x100c, &[0; 8]).is_err());
    }
}
