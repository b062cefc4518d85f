//! レジスタアクセス機能

use crate::Result;
use nix::unistd::Pid;
use std::collections::HashMap;
use std::fmt;

/// 汎用レジスタ（x86_64）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    Rbp,
    Rsp,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
    Rip,
}

impl Register {
    /// レジスタ名からパースする（`$rdi`, `rdi` のどちらも可）
    pub fn parse(name: &str) -> Option<Self> {
        let reg = match name.trim_start_matches('$').to_ascii_lowercase().as_str() {
            "rax" => Register::Rax,
            "rbx" => Register::Rbx,
            "rcx" => Register::Rcx,
            "rdx" => Register::Rdx,
            "rsi" => Register::Rsi,
            "rdi" => Register::Rdi,
            "rbp" => Register::Rbp,
            "rsp" => Register::Rsp,
            "r8" => Register::R8,
            "r9" => Register::R9,
            "r10" => Register::R10,
            "r11" => Register::R11,
            "r12" => Register::R12,
            "r13" => Register::R13,
            "r14" => Register::R14,
            "r15" => Register::R15,
            "rip" | "pc" => Register::Rip,
            _ => return None,
        };
        Some(reg)
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = format!("{:?}", self).to_ascii_lowercase();
        write!(f, "${}", name)
    }
}

/// レジスタ読み取りトレイト
pub trait RegisterReader {
    fn read_register(&self, reg: Register) -> Result<u64>;
}

/// 実行中スレッドのレジスタ
pub struct Registers {
    pid: Pid,
}

impl Registers {
    /// レジスタアクセスを作成する
    pub fn new(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    /// レジスタを読み取る
    pub fn read(&self) -> Result<nix::libc::user_regs_struct> {
        let regs = nix::sys::ptrace::getregs(self.pid)?;
        Ok(regs)
    }

    /// プログラムカウンタ（RIP）を取得する
    pub fn get_pc(&self) -> Result<u64> {
        self.read_register(Register::Rip)
    }
}

impl RegisterReader for Registers {
    fn read_register(&self, reg: Register) -> Result<u64> {
        let regs = self.read()?;
        let value = match reg {
            Register::Rax => regs.rax,
            Register::Rbx => regs.rbx,
            Register::Rcx => regs.rcx,
            Register::Rdx => regs.rdx,
            Register::Rsi => regs.rsi,
            Register::Rdi => regs.rdi,
            Register::Rbp => regs.rbp,
            Register::Rsp => regs.rsp,
            Register::R8 => regs.r8,
            Register::R9 => regs.r9,
            Register::R10 => regs.r10,
            Register::R11 => regs.r11,
            Register::R12 => regs.r12,
            Register::R13 => regs.r13,
            Register::R14 => regs.r14,
            Register::R15 => regs.r15,
            Register::Rip => regs.rip,
        };
        Ok(value)
    }
}

/// キャプチャ済みレジスタ値
#[derive(Debug, Clone, Default)]
pub struct RegisterSnapshot {
    values: HashMap<Register, u64>,
}

impl RegisterSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, reg: Register, value: u64) {
        self.values.insert(reg, value);
    }
}

impl RegisterReader for RegisterSnapshot {
    fn read_register(&self, reg: Register) -> Result<u64> {
        self.values
            .get(&reg)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("Register {} is not available", reg))
    }
}
