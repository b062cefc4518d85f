//! メモリアクセス機能

use crate::Result;
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read as _, Seek, SeekFrom};

/// メモリ読み取りトレイト
///
/// デバッグ対象のメモリを抽象化します。すべての読み取りは失敗しうるものとして扱い、
/// 呼び出し側は待機せずに即座に結果を受け取ります。
/// Kotlin/Nativeのターゲットはすべてリトルエンディアンです。
pub trait MemoryReader {
    /// 指定アドレスから `size` バイト読み取る
    fn read(&self, addr: u64, size: usize) -> Result<Vec<u8>>;

    fn read_u8(&self, addr: u64) -> Result<u8> {
        let bytes = self.read(addr, 1)?;
        bytes
            .first()
            .copied()
            .ok_or_else(|| anyhow::anyhow!("Cannot read u8 from empty bytes at 0x{:x}", addr))
    }

    fn read_u16(&self, addr: u64) -> Result<u16> {
        Ok(u16::from_le_bytes(read_exact_array::<2, _>(self, addr)?))
    }

    fn read_u32(&self, addr: u64) -> Result<u32> {
        Ok(u32::from_le_bytes(read_exact_array::<4, _>(self, addr)?))
    }

    fn read_u64(&self, addr: u64) -> Result<u64> {
        Ok(u64::from_le_bytes(read_exact_array::<8, _>(self, addr)?))
    }

    /// ポインタ幅（4または8バイト）の値を読み取る
    fn read_pointer(&self, addr: u64, width: usize) -> Result<u64> {
        match width {
            4 => self.read_u32(addr).map(u64::from),
            8 => self.read_u64(addr),
            _ => Err(anyhow::anyhow!("Unsupported pointer width: {}", width)),
        }
    }
}

/// `dyn MemoryReader` からも使える固定長読み取り
pub fn read_exact_array<const N: usize, M: MemoryReader + ?Sized>(
    memory: &M,
    addr: u64,
) -> Result<[u8; N]> {
    let bytes = memory.read(addr, N)?;
    bytes.as_slice().try_into().map_err(|_| {
        anyhow::anyhow!(
            "Failed to convert {} bytes at 0x{:x} (expected {} bytes)",
            bytes.len(),
            addr,
            N
        )
    })
}

/// メモリマッピング情報
#[derive(Debug, Clone)]
pub struct MemoryMapping {
    pub start: u64,
    pub end: u64,
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
    /// ファイル内オフセット
    pub offset: u64,
    /// マップされたファイルのパス（匿名マッピングはNone）
    pub path: Option<String>,
}

/// ロード済みイメージ（実行ファイルまたは共有ライブラリ）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedImage {
    /// イメージのパス
    pub path: String,
    /// ロードベースアドレス（最初のマッピング開始 - ファイルオフセット）
    pub base: u64,
}

/// 実行中プロセスのメモリアクセス
pub struct Memory {
    pid: Pid,
}

impl Memory {
    /// メモリアクセスを作成する
    pub fn new(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    /// /proc/pid/mem のパスを取得する
    fn mem_path(&self) -> String {
        format!("/proc/{}/mem", self.pid)
    }

    /// /proc/pid/mem経由でメモリを読み取る（内部実装）
    fn read_via_proc_mem(&self, addr: u64, size: usize) -> Result<Vec<u8>> {
        let mem_path = self.mem_path();
        let mut file = File::open(&mem_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", mem_path, e))?;

        file.seek(SeekFrom::Start(addr))?;

        let mut buffer = vec![0u8; size];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    /// PTRACE_PEEKDATAを使用してメモリからデータを読み取る
    ///
    /// /proc/pid/memが使用できない場合のフォールバック。
    /// 小さなデータ読み取り（ヘッダやポインタ）に適しています。
    pub fn read_via_ptrace(&self, addr: u64, size: usize) -> Result<Vec<u8>> {
        use nix::sys::ptrace;

        let mut data = Vec::with_capacity(size);
        let word_size = std::mem::size_of::<usize>();

        for offset in (0..size).step_by(word_size) {
            let word_addr = (addr as usize + offset) as *mut std::ffi::c_void;
            let word = ptrace::read(self.pid, word_addr).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to read via ptrace at 0x{:x}: {}",
                    addr as usize + offset,
                    e
                )
            })?;

            let bytes = word.to_ne_bytes();
            let remaining = size - offset;
            data.extend_from_slice(&bytes[..remaining.min(word_size)]);
        }

        data.truncate(size);
        Ok(data)
    }

    /// /proc/pid/maps を解析してメモリマッピング情報を取得する
    pub fn get_mappings(&self) -> Result<Vec<MemoryMapping>> {
        let maps_path = format!("/proc/{}/maps", self.pid);
        let file = File::open(&maps_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", maps_path, e))?;
        let reader = BufReader::new(file);

        let mut mappings = Vec::new();
        for line in reader.lines() {
            if let Some(mapping) = parse_maps_line(&line?)? {
                mappings.push(mapping);
            }
        }

        Ok(mappings)
    }

    /// ロード済みイメージの一覧を取得する
    ///
    /// 同じファイルの複数セグメントは1つにまとめ、最初のセグメントからベースアドレスを求めます。
    pub fn loaded_images(&self) -> Result<Vec<LoadedImage>> {
        Ok(images_from_mappings(&self.get_mappings()?))
    }
}

impl MemoryReader for Memory {
    /// /proc/pid/memを使用してターゲットプロセスのメモリを読み取ります。
    /// /proc/pid/memが使用できない場合（EIOエラー）、PTRACE_PEEKDATAにフォールバックします。
    fn read(&self, addr: u64, size: usize) -> Result<Vec<u8>> {
        match self.read_via_proc_mem(addr, size) {
            Ok(data) => Ok(data),
            Err(e) => {
                if let Some(io_err) = e.downcast_ref::<std::io::Error>() {
                    // EIO (errno 5): ptraceにフォールバック
                    if io_err.raw_os_error() == Some(5) {
                        return self.read_via_ptrace(addr, size);
                    }
                }
                Err(e)
            }
        }
    }
}

/// /proc/pid/maps の1行を解析する
///
/// フォーマット: "address perms offset dev inode pathname"
/// 例: "7f1234567000-7f1234568000 r-xp 00000000 08:01 123456 /lib/libc.so"
pub fn parse_maps_line(line: &str) -> Result<Option<MemoryMapping>> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 3 {
        return Ok(None);
    }

    let Some((start, end)) = parts[0].split_once('-') else {
        return Ok(None);
    };

    let start = u64::from_str_radix(start, 16)
        .map_err(|e| anyhow::anyhow!("Failed to parse start address: {}", e))?;
    let end = u64::from_str_radix(end, 16)
        .map_err(|e| anyhow::anyhow!("Failed to parse end address: {}", e))?;
    let offset = u64::from_str_radix(parts[2], 16)
        .map_err(|e| anyhow::anyhow!("Failed to parse segment offset: {}", e))?;

    let perms = parts[1].as_bytes();
    let path = parts
        .get(5)
        .filter(|p| p.starts_with('/'))
        .map(|p| p.to_string());

    Ok(Some(MemoryMapping {
        start,
        end,
        readable: perms.first() == Some(&b'r'),
        writable: perms.get(1) == Some(&b'w'),
        executable: perms.get(2) == Some(&b'x'),
        offset,
        path,
    }))
}

/// マッピング一覧からロード済みイメージを組み立てる
pub fn images_from_mappings(mappings: &[MemoryMapping]) -> Vec<LoadedImage> {
    let mut images: BTreeMap<String, u64> = BTreeMap::new();
    for mapping in mappings {
        if let Some(path) = &mapping.path {
            images
                .entry(path.clone())
                .or_insert(mapping.start.saturating_sub(mapping.offset));
        }
    }

    images
        .into_iter()
        .map(|(path, base)| LoadedImage { path, base })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_maps_line() {
        let line = "7f1234567000-7f1234568000 r-xp 00001000 08:01 123456 /usr/lib/libkonan.so";
        let mapping = parse_maps_line(line).unwrap().unwrap();
        assert_eq!(mapping.start, 0x7f1234567000);
        assert_eq!(mapping.end, 0x7f1234568000);
        assert_eq!(mapping.offset, 0x1000);
        assert!(mapping.readable && mapping.executable && !mapping.writable);
        assert_eq!(mapping.path.as_deref(), Some("/usr/lib/libkonan.so"));

        let anon = parse_maps_line("7ffd0000-7ffe0000 rw-p 00000000 00:00 0 [stack]")
            .unwrap()
            .unwrap();
        assert!(anon.path.is_none());

        assert!(parse_maps_line("garbage").unwrap().is_none());
    }

    #[test]
    fn test_images_from_mappings() {
        let lines = [
            "400000-401000 r--p 00000000 08:01 1 /opt/app.kexe",
            "401000-402000 r-xp 00001000 08:01 1 /opt/app.kexe",
            "7f0000000000-7f0000001000 r-xp 00000000 08:01 2 /lib/libc.so.6",
        ];
        let mappings: Vec<_> = lines
            .iter()
            .map(|l| parse_maps_line(l).unwrap().unwrap())
            .collect();

        let images = images_from_mappings(&mappings);
        assert_eq!(images.len(), 2);
        assert!(images.contains(&LoadedImage {
            path: "/opt/app.kexe".to_string(),
            base: 0x400000,
        }));
    }
}
