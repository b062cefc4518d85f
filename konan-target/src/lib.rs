//! Konan ターゲットプロセスアクセス
//!
//! このクレートは、Kotlin/Nativeプロセスの内容を読み取るための低レベル機能を提供します。
//! 実行中プロセス（/proc, ptrace）と、キャプチャ済みのメモリスナップショットの両方を
//! 同じトレイト越しに扱えるようにします。

pub mod memory;
pub mod process;
pub mod registers;
pub mod snapshot;

pub use memory::{LoadedImage, Memory, MemoryMapping, MemoryReader};
pub use process::{Process, StopReason};
pub use registers::{Register, RegisterReader, RegisterSnapshot, Registers};
pub use snapshot::MemorySnapshot;

/// ターゲットアクセスの結果型
pub type Result<T> = anyhow::Result<T>;
