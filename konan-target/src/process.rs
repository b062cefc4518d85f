//! プロセス制御機能
//!
//! イントロスペクションは停止中のプロセスに対してのみ行います。
//! 停止するたびに停止IDを進め、古い停止状態で作られた値ハンドルを検出できるようにします。

use crate::Result;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use std::cell::Cell;
use tracing::debug;

/// 停止イベントの種類
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// ブレークポイントヒット（SIGTRAP）
    Breakpoint,
    /// シグナル受信
    Signal(Signal),
    /// プロセス終了
    Exited(i32),
    /// その他の停止
    Other,
}

/// デバッグ対象のプロセス
pub struct Process {
    pid: nix::unistd::Pid,
    stop_id: Cell<u64>,
}

impl Process {
    /// 既存のプロセスにアタッチし、停止するまで待機する
    pub fn attach(pid: i32) -> Result<Self> {
        let pid = nix::unistd::Pid::from_raw(pid);
        nix::sys::ptrace::attach(pid)?;

        match waitpid(pid, None)? {
            WaitStatus::Stopped(_, _) => {
                debug!("attached to process {}", pid);
                Ok(Self {
                    pid,
                    stop_id: Cell::new(1),
                })
            }
            status => Err(anyhow::anyhow!(
                "Unexpected wait status after attach: {:?}",
                status
            )),
        }
    }

    /// プロセスIDを取得する
    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    /// 現在の停止ID
    ///
    /// 実行継続と停止のたびに増加します。
    pub fn stop_id(&self) -> u64 {
        self.stop_id.get()
    }

    /// プロセスを実行継続して停止イベントを待機する
    pub fn continue_and_wait(&self) -> Result<StopReason> {
        nix::sys::ptrace::cont(self.pid, None)?;
        let status = waitpid(self.pid, None)?;
        self.stop_id.set(self.stop_id.get() + 1);

        let reason = match status {
            WaitStatus::Stopped(_, Signal::SIGTRAP) => StopReason::Breakpoint,
            WaitStatus::Stopped(_, signal) => StopReason::Signal(signal),
            WaitStatus::Exited(_, code) => StopReason::Exited(code),
            WaitStatus::Signaled(_, signal, _) => StopReason::Signal(signal),
            _ => StopReason::Other,
        };
        debug!("process {} stopped: {:?} (stop id {})", self.pid, reason, self.stop_id());
        Ok(reason)
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        let _ = nix::sys::ptrace::detach(self.pid, None);
    }
}
