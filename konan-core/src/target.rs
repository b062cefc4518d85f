//! Kotlin/Nativeのターゲットとオブジェクト配置
//!
//! ターゲットごとにポインタ幅が異なり、オブジェクトヘッダや配列ヘッダの
//! オフセットはポインタ幅から導かれます。

use std::fmt;
use std::str::FromStr;

/// Kotlin/Nativeのコンパイルターゲット
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KonanTarget {
    AndroidArm32,
    AndroidArm64,
    IphoneArm64,
    IphoneSimX8664,
    LinuxX8664,
    LinuxArm32,
    MingwX8664,
    OsxX8664,
}

impl KonanTarget {
    pub const ALL: [KonanTarget; 8] = [
        KonanTarget::AndroidArm32,
        KonanTarget::AndroidArm64,
        KonanTarget::IphoneArm64,
        KonanTarget::IphoneSimX8664,
        KonanTarget::LinuxX8664,
        KonanTarget::LinuxArm32,
        KonanTarget::MingwX8664,
        KonanTarget::OsxX8664,
    ];

    /// ターゲット接尾辞（`linux`, `raspberrypi` など）
    pub fn suffix(&self) -> &'static str {
        match self {
            KonanTarget::AndroidArm32 => "android_arm32",
            KonanTarget::AndroidArm64 => "android_arm64",
            KonanTarget::IphoneArm64 => "ios",
            KonanTarget::IphoneSimX8664 => "ios_sim",
            KonanTarget::LinuxX8664 => "linux",
            KonanTarget::LinuxArm32 => "raspberrypi",
            KonanTarget::MingwX8664 => "mingw",
            KonanTarget::OsxX8664 => "osx",
        }
    }

    /// 列挙名を小文字にしたもの（`linux_x8664` など）
    pub fn enum_name(&self) -> &'static str {
        match self {
            KonanTarget::AndroidArm32 => "android_arm32",
            KonanTarget::AndroidArm64 => "android_arm64",
            KonanTarget::IphoneArm64 => "iphone_arm64",
            KonanTarget::IphoneSimX8664 => "iphonesim_x8664",
            KonanTarget::LinuxX8664 => "linux_x8664",
            KonanTarget::LinuxArm32 => "linux_arm32",
            KonanTarget::MingwX8664 => "mingw_x8664",
            KonanTarget::OsxX8664 => "osx_x8664",
        }
    }

    /// 実行ファイルの拡張子
    pub fn program_suffix(&self) -> &'static str {
        match self {
            KonanTarget::AndroidArm32 | KonanTarget::AndroidArm64 => "so",
            KonanTarget::MingwX8664 => "exe",
            _ => "kexe",
        }
    }

    /// このデバッガを実行しているホストに対応するターゲット
    pub fn host() -> Self {
        if cfg!(target_os = "macos") {
            KonanTarget::OsxX8664
        } else if cfg!(target_os = "windows") {
            KonanTarget::MingwX8664
        } else {
            KonanTarget::LinuxX8664
        }
    }

    /// ターゲット名を解釈する
    ///
    /// 接尾辞、列挙名、別名（`macbook`, `iphone`, `host`）を受け付けます。
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        match name.as_str() {
            "macbook" => return Some(KonanTarget::OsxX8664),
            "iphone" => return Some(KonanTarget::IphoneArm64),
            "host" => return Some(Self::host()),
            _ => {}
        }

        Self::ALL
            .into_iter()
            .find(|t| t.suffix() == name || t.enum_name() == name)
    }

    /// ポインタ幅（バイト）
    pub fn pointer_size(&self) -> u64 {
        match self {
            KonanTarget::AndroidArm32 | KonanTarget::LinuxArm32 => 4,
            _ => 8,
        }
    }

    pub fn abi(&self) -> AbiLayout {
        AbiLayout::new(self.pointer_size())
    }
}

impl fmt::Display for KonanTarget {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.suffix())
    }
}

impl FromStr for KonanTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("Unknown Kotlin/Native target '{}'", s))
    }
}

/// オブジェクト配置
///
/// - オブジェクトヘッダは先頭1ワード（TypeInfoまたはメタオブジェクトへのポインタ）
/// - 配列の要素数はヘッダ直後の32ビット値
/// - 配列の要素はヘッダ+要素数の後、8バイト境界から始まる
/// - ボックス化された値はヘッダ直後を値のサイズに揃えた位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbiLayout {
    pointer_size: u64,
}

impl AbiLayout {
    pub fn new(pointer_size: u64) -> Self {
        Self { pointer_size }
    }

    /// 64ビットターゲットの配置
    pub fn lp64() -> Self {
        Self::new(8)
    }

    pub fn pointer_size(&self) -> u64 {
        self.pointer_size
    }

    pub fn header_size(&self) -> u64 {
        self.pointer_size
    }

    /// 配列の要素数のオフセット
    pub fn array_count_offset(&self) -> u64 {
        self.pointer_size
    }

    /// 配列の先頭要素のオフセット
    pub fn array_data_offset(&self) -> u64 {
        align_up(self.array_count_offset() + 4, 8)
    }

    /// ボックス化された値のオフセット
    pub fn boxed_value_offset(&self, value_size: u64) -> u64 {
        align_up(self.header_size(), value_size)
    }
}

impl Default for AbiLayout {
    fn default() -> Self {
        Self::lp64()
    }
}

/// `value` を `align` の倍数に切り上げる
pub fn align_up(value: u64, align: u64) -> u64 {
    if align <= 1 {
        return value;
    }
    value.div_ceil(align) * align
}
