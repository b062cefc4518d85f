//! 値ハンドルと実行コンテキスト
//!
//! 値ハンドルは「どの停止状態で、どこに、どう格納された値か」を表すだけの所有値です。
//! 読み取りはすべて `ExecutionContext` 越しに行い、停止IDが一致しないハンドルは
//! 古いものとして `InaccessibleMemory` で拒否します。

use crate::errors::{IntrospectionError, IntrospectionResult};
use crate::target::AbiLayout;
use crate::types::{PrimitiveKind, PrimitiveValue, TypeDescriptor, TypeKind};
use konan_dwarf::TypeMetadata;
use konan_target::{MemoryReader, Register, RegisterReader};
use std::fmt;

/// 値の格納場所
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueLocation {
    Memory(u64),
    Register(Register),
}

impl ValueLocation {
    pub fn address(&self) -> Option<u64> {
        match self {
            ValueLocation::Memory(addr) => Some(*addr),
            ValueLocation::Register(_) => None,
        }
    }
}

impl fmt::Display for ValueLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ValueLocation::Memory(addr) => write!(f, "0x{:x}", addr),
            ValueLocation::Register(reg) => write!(f, "{}", reg),
        }
    }
}

/// 格納場所のバイト列の読み方
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// 格納場所にオブジェクトへのポインタがある
    Reference,
    /// 格納場所がオブジェクトヘッダそのもの
    Object,
    /// 格納場所にプリミティブ値がある
    Scalar(PrimitiveKind),
}

/// 値ハンドル
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueHandle {
    /// 宣言上の型
    pub static_type: TypeDescriptor,
    pub location: ValueLocation,
    pub kind: ValueKind,
    /// ハンドルを作成した停止状態
    pub stop_id: u64,
}

impl ValueHandle {
    pub fn new(
        static_type: TypeDescriptor,
        location: ValueLocation,
        kind: ValueKind,
        stop_id: u64,
    ) -> Self {
        Self {
            static_type,
            location,
            kind,
            stop_id,
        }
    }

    /// 宣言型から読み方を決めてハンドルを作る
    ///
    /// プリミティブ型はスカラー、それ以外はオブジェクト参照として扱います。
    pub fn for_type(static_type: TypeDescriptor, location: ValueLocation, stop_id: u64) -> Self {
        let kind = match static_type.kind {
            TypeKind::Primitive(primitive) => ValueKind::Scalar(primitive),
            _ => ValueKind::Reference,
        };
        Self::new(static_type, location, kind, stop_id)
    }

    /// ポインタを格納したメモリ位置
    pub fn reference_at(static_type: TypeDescriptor, address: u64, stop_id: u64) -> Self {
        Self::new(static_type, ValueLocation::Memory(address), ValueKind::Reference, stop_id)
    }

    /// オブジェクトの先頭アドレス
    pub fn object_at(static_type: TypeDescriptor, address: u64, stop_id: u64) -> Self {
        Self::new(static_type, ValueLocation::Memory(address), ValueKind::Object, stop_id)
    }

    pub fn scalar_at(kind: PrimitiveKind, address: u64, stop_id: u64) -> Self {
        Self::new(
            TypeDescriptor::primitive(kind),
            ValueLocation::Memory(address),
            ValueKind::Scalar(kind),
            stop_id,
        )
    }
}

/// 1回のイントロスペクション要求で使う実行コンテキスト
#[derive(Clone, Copy)]
pub struct ExecutionContext<'a> {
    memory: &'a dyn MemoryReader,
    registers: Option<&'a dyn RegisterReader>,
    metadata: &'a dyn TypeMetadata,
    abi: AbiLayout,
    stop_id: u64,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(
        memory: &'a dyn MemoryReader,
        metadata: &'a dyn TypeMetadata,
        abi: AbiLayout,
        stop_id: u64,
    ) -> Self {
        Self {
            memory,
            registers: None,
            metadata,
            abi,
            stop_id,
        }
    }

    pub fn with_registers(mut self, registers: &'a dyn RegisterReader) -> Self {
        self.registers = Some(registers);
        self
    }

    pub fn metadata(&self) -> &'a dyn TypeMetadata {
        self.metadata
    }

    pub fn abi(&self) -> AbiLayout {
        self.abi
    }

    pub fn stop_id(&self) -> u64 {
        self.stop_id
    }

    /// ハンドルが現在の停止状態で作られたものか確認する
    pub fn validate(&self, value: &ValueHandle) -> IntrospectionResult<()> {
        if value.stop_id == self.stop_id {
            return Ok(());
        }
        Err(IntrospectionError::inaccessible(
            value.location.address().unwrap_or(0),
            format!(
                "stale value handle (stop {}, current stop {})",
                value.stop_id, self.stop_id
            ),
        ))
    }

    pub fn read(&self, address: u64, len: usize) -> IntrospectionResult<Vec<u8>> {
        let bytes = self
            .memory
            .read(address, len)
            .map_err(|e| IntrospectionError::inaccessible(address, e))?;
        if bytes.len() != len {
            return Err(IntrospectionError::inaccessible(
                address,
                format!("short read ({} of {} bytes)", bytes.len(), len),
            ));
        }
        Ok(bytes)
    }

    /// ポインタ幅の値を読み取る（ポインタ境界に揃っていないアドレスは拒否する）
    pub fn read_pointer(&self, address: u64) -> IntrospectionResult<u64> {
        let width = self.abi.pointer_size();
        if address % width != 0 {
            return Err(IntrospectionError::inaccessible(address, "misaligned pointer"));
        }
        self.memory
            .read_pointer(address, width as usize)
            .map_err(|e| IntrospectionError::inaccessible(address, e))
    }

    pub fn read_u32(&self, address: u64) -> IntrospectionResult<u32> {
        self.memory
            .read_u32(address)
            .map_err(|e| IntrospectionError::inaccessible(address, e))
    }

    pub fn read_i32(&self, address: u64) -> IntrospectionResult<i32> {
        self.read_u32(address).map(|v| v as i32)
    }

    pub fn read_register(&self, register: Register) -> IntrospectionResult<u64> {
        let registers = self.registers.ok_or_else(|| {
            IntrospectionError::inaccessible(0, format!("register {} is not available", register))
        })?;
        registers
            .read_register(register)
            .map_err(|e| IntrospectionError::inaccessible(0, e))
    }

    /// 値が指すオブジェクトのアドレスを求める（nullは0）
    pub fn object_address(&self, value: &ValueHandle) -> IntrospectionResult<u64> {
        match (value.kind, value.location) {
            (ValueKind::Reference, ValueLocation::Memory(slot)) => self.read_pointer(slot),
            (ValueKind::Reference, ValueLocation::Register(reg)) => self.read_register(reg),
            (ValueKind::Object, ValueLocation::Memory(addr)) => Ok(addr),
            (ValueKind::Object, ValueLocation::Register(reg)) => Err(IntrospectionError::malformed(
                format!("object cannot live in register {}", reg),
            )),
            (ValueKind::Scalar(kind), _) => Err(IntrospectionError::malformed(format!(
                "{} value is not an object reference",
                kind.simple_name()
            ))),
        }
    }

    /// 格納場所からプリミティブ値を読み取る
    pub fn read_scalar(
        &self,
        location: ValueLocation,
        kind: PrimitiveKind,
    ) -> IntrospectionResult<PrimitiveValue> {
        match location {
            ValueLocation::Memory(addr) => {
                let bytes = self.read(addr, kind.size() as usize)?;
                kind.decode(&bytes)
            }
            ValueLocation::Register(reg) => {
                let raw = self.read_register(reg)?;
                kind.decode(&raw.to_le_bytes())
            }
        }
    }

    /// 配列（および文字列）の要素数を読み取る
    pub fn array_count(&self, object: u64) -> IntrospectionResult<u32> {
        self.read_u32(object + self.abi.array_count_offset())
    }
}

impl fmt::Debug for ExecutionContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("abi", &self.abi)
            .field("stop_id", &self.stop_id)
            .field("has_registers", &self.registers.is_some())
            .finish()
    }
}
