//! イントロスペクションセッション
//!
//! ホスト側の状態（ロード済みイメージ、アタッチ中のプロセス、プラグイン）をまとめ、
//! 要求ごとに `ExecutionContext` を組み立てて各コンポーネントを呼び出します。

use crate::dynamic_type::{DynamicTypeResolver, Preference};
use crate::errors::IntrospectionResult;
use crate::exception::{BreakpointSpec, ExceptionResolver};
use crate::formatters::{FormatterConfig, FormatterRegistry};
use crate::language::{KotlinLanguage, KotlinLanguageRuntime, LanguageType};
use crate::plugin::PluginRegistry;
use crate::target::KonanTarget;
use crate::types::TypeDescriptor;
use crate::value::{ExecutionContext, ValueHandle, ValueLocation};
use crate::Result;
use konan_dwarf::{DwarfLoader, Image, ImageTable, Symbol};
use konan_target::{
    LoadedImage, Memory, MemoryReader, MemorySnapshot, Process, Registers, StopReason,
};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// 停止していないセッション（スナップショットのみ）の停止ID
const SNAPSHOT_STOP_ID: u64 = 1;

/// 値を調べた結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    /// 子要素名（トップレベルの値は空）
    pub name: String,
    pub static_type: TypeDescriptor,
    pub dynamic_type: TypeDescriptor,
    pub summary: String,
}

/// マッピングとの突き合わせで変わったイメージの数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageChanges {
    pub loaded: usize,
    pub unloaded: usize,
}

/// セッション
pub struct Session {
    target: KonanTarget,
    images: ImageTable,
    /// マッピングから登録したイメージのパス -> ベースアドレス
    mapped_bases: HashMap<String, u64>,
    process: Option<Process>,
    memory: Option<Memory>,
    registers: Option<Registers>,
    /// アタッチしていないときの読み取り元
    snapshot: MemorySnapshot,
    plugins: PluginRegistry,
    language: KotlinLanguage,
    runtime: KotlinLanguageRuntime,
    exception: Option<ExceptionResolver>,
    exception_spec: BreakpointSpec,
}

impl Session {
    /// プラグインを登録してセッションを作成する
    pub fn new(target: KonanTarget, config: FormatterConfig) -> Result<Self> {
        let mut plugins = PluginRegistry::new();
        plugins.initialize()?;

        let mut language = plugins
            .create_language(LanguageType::Kotlin)
            .ok_or_else(|| anyhow::anyhow!("Kotlin language plugin is not registered"))?;
        language.formatters_mut().set_config(config);
        let runtime = plugins
            .create_runtime(LanguageType::Kotlin)
            .ok_or_else(|| anyhow::anyhow!("Kotlin runtime plugin is not registered"))?;

        Ok(Self {
            target,
            images: ImageTable::new(),
            mapped_bases: HashMap::new(),
            process: None,
            memory: None,
            registers: None,
            snapshot: MemorySnapshot::new(),
            plugins,
            language,
            runtime,
            exception: None,
            exception_spec: BreakpointSpec::empty(),
        })
    }

    pub fn target(&self) -> KonanTarget {
        self.target
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    pub fn formatters(&self) -> &FormatterRegistry {
        self.language.formatters()
    }

    /// ユーザーフォーマッタの登録用
    pub fn formatters_mut(&mut self) -> &mut FormatterRegistry {
        self.language.formatters_mut()
    }

    pub fn images(&self) -> &ImageTable {
        &self.images
    }

    pub fn is_attached(&self) -> bool {
        self.process.is_some()
    }

    /// ELFバイナリを読み込み、イメージとして登録する
    ///
    /// イメージ名は `/proc/<pid>/maps` と同じ正規化済みの絶対パスです。
    /// アタッチ後はマッピングのベースアドレスで読み直されます。
    pub fn load_binary<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let path = std::fs::canonicalize(path)
            .map_err(|e| anyhow::anyhow!("Failed to resolve {}: {}", path.display(), e))?;
        let loader = DwarfLoader::load(&path)?;
        self.check_pointer_size(&loader);
        let image = Image::from_loader(&loader, 0)?;
        self.add_image(image);
        Ok(())
    }

    /// イメージを追加し、保留中の例外ブレークポイントを解決し直す
    pub fn add_image(&mut self, image: Image) {
        self.images.add_image(image);
        self.refresh_exception_breakpoint();
    }

    /// イメージを取り除く
    pub fn remove_image(&mut self, name: &str) -> bool {
        let removed = self.images.remove_image(name);
        if removed {
            self.refresh_exception_breakpoint();
        }
        removed
    }

    /// アタッチせずに読むメモリを差し替える
    pub fn load_snapshot(&mut self, snapshot: MemorySnapshot) {
        self.snapshot = snapshot;
    }

    /// 既存のプロセスにアタッチする
    pub fn attach(&mut self, pid: i32) -> Result<()> {
        let process = Process::attach(pid)?;
        self.memory = Some(Memory::new(pid));
        self.registers = Some(Registers::new(pid));
        self.process = Some(process);
        self.refresh_images()?;
        Ok(())
    }

    /// プロセスのマッピングからロード済みイメージを読み直す
    ///
    /// ELFとして読めないマッピング（vdsoなど）は読み飛ばします。
    pub fn refresh_images(&mut self) -> Result<ImageChanges> {
        let memory = self
            .memory
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Not attached to a process"))?;
        let mapped = memory.loaded_images()?;

        Ok(self.sync_images(&mapped, |image| {
            let loader = DwarfLoader::load(&image.path)?;
            Image::from_loader(&loader, image.base)
        }))
    }

    /// 現在のマッピングに合わせてイメージテーブルを更新する
    ///
    /// 消えたイメージとベースアドレスが変わったイメージを取り除き、新しいマッピングを
    /// `load` で読み込みます。`load_binary` で登録済みの同名イメージは、マッピングの
    /// ベースアドレスで読み直したものに置き換わります。
    pub fn sync_images<F>(&mut self, mapped: &[LoadedImage], mut load: F) -> ImageChanges
    where
        F: FnMut(&LoadedImage) -> Result<Image>,
    {
        let mut changes = ImageChanges::default();

        let current: HashMap<&str, u64> = mapped
            .iter()
            .map(|image| (image.path.as_str(), image.base))
            .collect();
        let stale: Vec<String> = self
            .mapped_bases
            .iter()
            .filter(|(path, base)| current.get(path.as_str()) != Some(*base))
            .map(|(path, _)| path.clone())
            .collect();
        for path in stale {
            self.mapped_bases.remove(&path);
            if self.images.remove_image(&path) {
                debug!("image unloaded: {}", path);
                changes.unloaded += 1;
            }
        }

        for image in mapped {
            if self.mapped_bases.contains_key(&image.path) {
                continue;
            }
            // 読めなかったマッピングも記録し、移動するまで読み直さない
            self.mapped_bases.insert(image.path.clone(), image.base);
            match load(image) {
                Ok(loaded) => {
                    self.images.add_image(loaded);
                    changes.loaded += 1;
                }
                Err(e) => debug!("skipping image {}: {}", image.path, e),
            }
        }

        if changes != ImageChanges::default() {
            self.refresh_exception_breakpoint();
        }
        changes
    }

    /// プロセスを実行継続し、停止後にイメージを読み直す
    pub fn continue_execution(&mut self) -> Result<StopReason> {
        let process = self
            .process
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Not attached to a process"))?;
        let reason = process.continue_and_wait()?;
        if !matches!(reason, StopReason::Exited(_)) {
            self.refresh_images()?;
        }
        Ok(reason)
    }

    /// 現在の停止ID
    pub fn stop_id(&self) -> u64 {
        self.process
            .as_ref()
            .map(Process::stop_id)
            .unwrap_or(SNAPSHOT_STOP_ID)
    }

    /// 現在の停止状態に対する実行コンテキスト
    pub fn context(&self) -> ExecutionContext<'_> {
        let memory: &dyn MemoryReader = match &self.memory {
            Some(memory) => memory,
            None => &self.snapshot,
        };
        let ctx = ExecutionContext::new(memory, &self.images, self.target.abi(), self.stop_id());
        match &self.registers {
            Some(registers) => ctx.with_registers(registers),
            None => ctx,
        }
    }

    /// 型名と格納場所から値ハンドルを作る
    pub fn value_at(&self, location: ValueLocation, type_name: &str) -> ValueHandle {
        ValueHandle::for_type(TypeDescriptor::from_name(type_name), location, self.stop_id())
    }

    /// 値の動的型を解決し、サマリを作る
    pub fn inspect(&self, value: &ValueHandle) -> Inspection {
        let ctx = self.context();
        self.inspect_in(&ctx, String::new(), value)
    }

    fn inspect_in(&self, ctx: &ExecutionContext, name: String, value: &ValueHandle) -> Inspection {
        let resolved = DynamicTypeResolver::new(ctx).resolve_or_static(value, Preference::PreferDynamic);
        let dynamic_type = self
            .runtime
            .fix_up_dynamic_type(resolved.descriptor.clone(), value);
        let descriptor = resolved.descriptor.clone();
        let handle = resolved.into_handle(ctx.stop_id());

        Inspection {
            name,
            static_type: value.static_type.clone(),
            dynamic_type,
            summary: self.language.summarize(ctx, &handle, &descriptor),
        }
    }

    /// 値の子要素を最大 `limit` 個調べる
    pub fn children(&self, value: &ValueHandle, limit: usize) -> (usize, Vec<Inspection>) {
        let ctx = self.context();
        let resolved = DynamicTypeResolver::new(&ctx).resolve_or_static(value, Preference::PreferDynamic);
        let descriptor = resolved.descriptor.clone();
        let handle = resolved.into_handle(ctx.stop_id());

        let children = self.language.synthetic_children(&ctx, &handle, &descriptor);
        let mut inspected = Vec::new();
        for child in children.iter().take(limit) {
            match child {
                Ok(child) => {
                    let mut inspection = self.inspect_in(&ctx, child.name.clone(), &child.value);
                    if let Some(key) = &child.key {
                        let key = self.inspect_in(&ctx, String::new(), key);
                        inspection.summary = format!("{} -> {}", key.summary, inspection.summary);
                    }
                    inspected.push(inspection);
                }
                Err(e) => {
                    warn!("stopping child expansion of {}: {}", descriptor.name, e);
                    break;
                }
            }
        }
        (children.len(), inspected)
    }

    /// オブジェクトの1行説明
    pub fn describe(&self, value: &ValueHandle) -> IntrospectionResult<String> {
        let ctx = self.context();
        self.runtime.get_object_description(&ctx, value)
    }

    /// 例外ブレークポイントを設定する
    pub fn set_exception_breakpoint(&mut self, catch_enabled: bool, throw_enabled: bool) -> &BreakpointSpec {
        self.exception = Some(
            self.runtime
                .create_exception_resolver(catch_enabled, throw_enabled),
        );
        self.refresh_exception_breakpoint();
        &self.exception_spec
    }

    /// 例外ブレークポイントを解除する
    pub fn clear_exception_breakpoint(&mut self) {
        self.exception = None;
        self.exception_spec = BreakpointSpec::empty();
    }

    pub fn exception_breakpoint(&self) -> &BreakpointSpec {
        &self.exception_spec
    }

    /// Kotlin/Nativeランタイムを含むイメージがロード済みか
    pub fn is_runtime_loaded(&self) -> bool {
        self.runtime.is_runtime_loaded(&self.images)
    }

    fn refresh_exception_breakpoint(&mut self) {
        if let Some(resolver) = &self.exception {
            self.exception_spec = resolver.resolve(&self.images);
        }
    }

    /// パターンにマッチするシンボルをすべてのイメージから検索する
    pub fn find_symbols(&self, pattern: &str) -> Vec<(String, Symbol)> {
        self.images
            .images()
            .flat_map(|image| {
                image
                    .symbols()
                    .find_symbols(pattern)
                    .into_iter()
                    .map(move |mut symbol| {
                        symbol.address = symbol.address.wrapping_add(image.bias());
                        (image.name().to_string(), symbol)
                    })
            })
            .collect()
    }

    fn check_pointer_size(&self, loader: &DwarfLoader) {
        let expected = self.target.pointer_size() as usize;
        if loader.pointer_size() != expected {
            warn!(
                "{} has {}-byte pointers but target {} uses {}",
                loader.name(),
                loader.pointer_size(),
                self.target,
                expected
            );
        }
    }
}
