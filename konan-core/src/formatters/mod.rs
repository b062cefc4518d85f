//! フォーマッタレジストリ
//!
//! 型パターンからサマリ（1行の文字列表現）と合成子要素を引きます。
//! 検索順は次の通りです。
//!
//! 1. ユーザー登録の完全一致エントリ
//! 2. ユーザー登録の正規表現・カテゴリエントリ
//! 3. `TypeKind` ごとの組み込みフォーマッタ
//! 4. 汎用フォールバック（`型名 @ 0xアドレス`）
//!
//! 同じ段の中では優先度の高いものが先、同じ優先度なら登録順です。
//! フォーマッタがエラーを返したりパニックしたりしても呼び出し側には伝えず、
//! 汎用フォールバックに置き換えてログに残します。

mod builtins;
mod children;
mod collections;

pub use children::{ChildIter, SyntheticChild, SyntheticChildren};

use crate::errors::{IntrospectionError, IntrospectionResult, RegistrationError};
use crate::types::{TypeCategory, TypeDescriptor};
use crate::value::{ExecutionContext, ValueHandle};
use regex::Regex;
use std::cmp::Reverse;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, warn};

/// サマリ関数
pub type SummaryFn = Box<
    dyn Fn(&ExecutionContext<'_>, &ValueHandle, &TypeDescriptor) -> IntrospectionResult<String>
        + Send
        + Sync,
>;

/// 合成子要素関数
pub type ChildrenFn = Box<
    dyn for<'c> Fn(
            &ExecutionContext<'c>,
            &ValueHandle,
            &TypeDescriptor,
        ) -> IntrospectionResult<SyntheticChildren<'c>>
        + Send
        + Sync,
>;

/// フォーマッタ設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatterConfig {
    /// 文字列プレビューの最大UTF-16コードユニット数
    pub max_string_units: usize,
    /// 配列サマリに並べる最大要素数
    pub max_array_preview: usize,
    /// 要素サマリを入れ子で展開する最大の深さ
    pub max_depth: usize,
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            max_string_units: 1024,
            max_array_preview: 16,
            max_depth: 3,
        }
    }
}

/// 型パターン
#[derive(Debug, Clone)]
pub enum TypePattern {
    /// 修飾名の完全一致
    Exact(String),
    /// 修飾名全体に対する正規表現
    Regex(Regex),
    /// 型の種類
    Category(TypeCategory),
}

impl TypePattern {
    pub fn exact(name: impl Into<String>) -> Self {
        TypePattern::Exact(name.into())
    }

    /// 正規表現パターンを作る（名前全体に一致する必要がある）
    pub fn regex(pattern: &str) -> Result<Self, RegistrationError> {
        Regex::new(&format!("^(?:{})$", pattern))
            .map(TypePattern::Regex)
            .map_err(|e| RegistrationError::BadPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn matches(&self, ty: &TypeDescriptor) -> bool {
        match self {
            TypePattern::Exact(name) => *name == ty.name,
            TypePattern::Regex(regex) => regex.is_match(&ty.name),
            TypePattern::Category(category) => *category == ty.category(),
        }
    }

    fn is_exact(&self) -> bool {
        matches!(self, TypePattern::Exact(_))
    }
}

/// フォーマッタエントリ
pub struct FormatterEntry {
    pub pattern: TypePattern,
    pub summary: Option<SummaryFn>,
    pub children: Option<ChildrenFn>,
    /// 次に一致するエントリのサマリも連結するか
    pub cascade: bool,
    /// 大きいほど先に検索する
    pub priority: i32,
}

impl FormatterEntry {
    pub fn new(pattern: TypePattern) -> Self {
        Self {
            pattern,
            summary: None,
            children: None,
            cascade: false,
            priority: 0,
        }
    }

    pub fn with_summary<F>(mut self, summary: F) -> Self
    where
        F: Fn(&ExecutionContext<'_>, &ValueHandle, &TypeDescriptor) -> IntrospectionResult<String>
            + Send
            + Sync
            + 'static,
    {
        self.summary = Some(Box::new(summary));
        self
    }

    pub fn with_children<F>(mut self, children: F) -> Self
    where
        F: for<'c> Fn(
                &ExecutionContext<'c>,
                &ValueHandle,
                &TypeDescriptor,
            ) -> IntrospectionResult<SyntheticChildren<'c>>
            + Send
            + Sync
            + 'static,
    {
        self.children = Some(Box::new(children));
        self
    }

    pub fn cascading(mut self, cascade: bool) -> Self {
        self.cascade = cascade;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl fmt::Debug for FormatterEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FormatterEntry")
            .field("pattern", &self.pattern)
            .field("has_summary", &self.summary.is_some())
            .field("has_children", &self.children.is_some())
            .field("cascade", &self.cascade)
            .field("priority", &self.priority)
            .finish()
    }
}

/// 登録ID（登録順に増加する）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FormatterId(u64);

impl fmt::Display for FormatterId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// フォーマッタレジストリ
///
/// 登録・削除は `&mut self` で行います。複数スレッドから使うホストは
/// `std::sync::RwLock` で包んでください。
pub struct FormatterRegistry {
    config: FormatterConfig,
    entries: Vec<(FormatterId, FormatterEntry)>,
    next_id: u64,
}

impl FormatterRegistry {
    pub fn new(config: FormatterConfig) -> Self {
        Self {
            config,
            entries: Vec::new(),
            next_id: 1,
        }
    }

    pub fn config(&self) -> &FormatterConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: FormatterConfig) {
        self.config = config;
    }

    /// エントリを登録する
    pub fn register(&mut self, entry: FormatterEntry) -> Result<FormatterId, RegistrationError> {
        if let TypePattern::Exact(name) = &entry.pattern {
            if name.trim().is_empty() {
                return Err(RegistrationError::BadPattern {
                    pattern: name.clone(),
                    reason: "empty type name".to_string(),
                });
            }
        }

        let id = FormatterId(self.next_id);
        self.next_id += 1;
        debug!("formatter {} registered for {:?}", id, entry.pattern);
        self.entries.push((id, entry));
        Ok(id)
    }

    /// 正規表現パターンでサマリを登録する
    pub fn register_regex<F>(
        &mut self,
        pattern: &str,
        priority: i32,
        summary: F,
    ) -> Result<FormatterId, RegistrationError>
    where
        F: Fn(&ExecutionContext<'_>, &ValueHandle, &TypeDescriptor) -> IntrospectionResult<String>
            + Send
            + Sync
            + 'static,
    {
        let entry = FormatterEntry::new(TypePattern::regex(pattern)?)
            .with_summary(summary)
            .with_priority(priority);
        self.register(entry)
    }

    /// エントリを削除する
    pub fn unregister(&mut self, id: FormatterId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        before != self.entries.len()
    }

    /// 登録済みエントリの数
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 型に一致するユーザーエントリを検索順に並べる
    fn matching<'r>(
        &'r self,
        ty: &TypeDescriptor,
        wanted: impl Fn(&FormatterEntry) -> bool,
    ) -> Vec<&'r FormatterEntry> {
        let mut exact = Vec::new();
        let mut others = Vec::new();
        for (id, entry) in &self.entries {
            if !wanted(entry) || !entry.pattern.matches(ty) {
                continue;
            }
            if entry.pattern.is_exact() {
                exact.push((*id, entry));
            } else {
                others.push((*id, entry));
            }
        }

        exact.sort_by_key(|(id, entry)| (Reverse(entry.priority), *id));
        others.sort_by_key(|(id, entry)| (Reverse(entry.priority), *id));
        exact.into_iter().chain(others).map(|(_, entry)| entry).collect()
    }

    /// 値のサマリ
    pub fn summarize(
        &self,
        ctx: &ExecutionContext,
        value: &ValueHandle,
        resolved: &TypeDescriptor,
    ) -> String {
        self.summarize_at_depth(ctx, value, resolved, 0)
    }

    pub(crate) fn summarize_at_depth(
        &self,
        ctx: &ExecutionContext,
        value: &ValueHandle,
        resolved: &TypeDescriptor,
        depth: usize,
    ) -> String {
        if let Err(e) = ctx.validate(value) {
            warn!("cannot summarize {}: {}", resolved.name, e);
            return self.generic_summary(ctx, value, resolved);
        }

        let mut parts = Vec::new();
        let mut finished = false;
        for entry in self.matching(resolved, |entry| entry.summary.is_some()) {
            let Some(summary) = &entry.summary else {
                continue;
            };
            match guarded(|| summary(ctx, value, resolved)) {
                Ok(text) => parts.push(text),
                Err(e) => {
                    warn!("summary formatter for {} failed: {}", resolved.name, e);
                    return self.generic_summary(ctx, value, resolved);
                }
            }
            if !entry.cascade {
                finished = true;
                break;
            }
        }

        if !finished {
            match guarded(|| self.builtin_summary(ctx, value, resolved, depth)) {
                Ok(Some(text)) => parts.push(text),
                Ok(None) if parts.is_empty() => parts.push(self.generic_summary(ctx, value, resolved)),
                Ok(None) => {}
                Err(e) => {
                    warn!("built-in summary for {} failed: {}", resolved.name, e);
                    return self.generic_summary(ctx, value, resolved);
                }
            }
        }

        parts.join(" ")
    }

    /// 値の合成子要素
    ///
    /// 失敗した場合は子要素なしとして扱います。
    pub fn synthetic_children<'c>(
        &self,
        ctx: &ExecutionContext<'c>,
        value: &ValueHandle,
        resolved: &TypeDescriptor,
    ) -> SyntheticChildren<'c> {
        if let Err(e) = ctx.validate(value) {
            warn!("cannot expand {}: {}", resolved.name, e);
            return SyntheticChildren::empty();
        }

        let user = self
            .matching(resolved, |entry| entry.children.is_some())
            .into_iter()
            .find_map(|entry| entry.children.as_ref());

        let result = match user {
            Some(children) => guarded(|| children(ctx, value, resolved)),
            None => guarded(|| self.builtin_children(ctx, value, resolved)),
        };

        result.unwrap_or_else(|e| {
            warn!("synthetic children for {} failed: {}", resolved.name, e);
            SyntheticChildren::empty()
        })
    }

    /// ユーザー登録を無視した組み込みサマリ
    pub fn hardcoded_summary(
        &self,
        ctx: &ExecutionContext,
        value: &ValueHandle,
        resolved: &TypeDescriptor,
    ) -> IntrospectionResult<Option<String>> {
        ctx.validate(value)?;
        guarded(|| self.builtin_summary(ctx, value, resolved, 0))
    }

    /// ユーザー登録を無視した組み込み子要素
    pub fn hardcoded_synthetics<'c>(
        &self,
        ctx: &ExecutionContext<'c>,
        value: &ValueHandle,
        resolved: &TypeDescriptor,
    ) -> IntrospectionResult<SyntheticChildren<'c>> {
        ctx.validate(value)?;
        guarded(|| self.builtin_children(ctx, value, resolved))
    }
}

impl Default for FormatterRegistry {
    fn default() -> Self {
        Self::new(FormatterConfig::default())
    }
}

impl fmt::Debug for FormatterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FormatterRegistry")
            .field("config", &self.config)
            .field("entries", &self.entries)
            .finish()
    }
}

/// フォーマッタを呼び出し、パニックをエラーに変換する
fn guarded<T>(f: impl FnOnce() -> IntrospectionResult<T>) -> IntrospectionResult<T> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(IntrospectionError::malformed(format!(
            "formatter panicked: {}",
            message
        )))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::AbiLayout;
    use crate::types::PrimitiveKind;
    use konan_dwarf::{TypeMetadata, TypeRecord};
    use konan_target::MemorySnapshot;

    struct NoTypes;

    impl TypeMetadata for NoTypes {
        fn type_by_tag(&self, _tag: u64) -> Option<TypeRecord> {
            None
        }
        fn type_by_name(&self, _name: &str) -> Option<TypeRecord> {
            None
        }
    }

    fn memory() -> MemorySnapshot {
        let mut memory = MemorySnapshot::new();
        memory.map_zeroed(0x1000, 0x100);
        memory.write_u32(0x1000, 7).unwrap();
        memory
    }

    fn point() -> TypeDescriptor {
        TypeDescriptor::class("app.Point", true)
    }

    fn constant(
        text: &'static str,
    ) -> impl Fn(&ExecutionContext<'_>, &ValueHandle, &TypeDescriptor) -> IntrospectionResult<String>
           + Send
           + Sync
           + 'static {
        move |_, _, _| Ok(text.to_string())
    }

    #[test]
    fn test_generic_fallback() {
        let memory = memory();
        let ctx = ExecutionContext::new(&memory, &NoTypes, AbiLayout::lp64(), 1);
        let registry = FormatterRegistry::default();

        let value = ValueHandle::object_at(point(), 0x1040, 1);
        assert_eq!(registry.summarize(&ctx, &value, &point()), "app.Point @ 0x1040");
        assert!(registry.synthetic_children(&ctx, &value, &point()).is_empty());
    }

    #[test]
    fn test_primitive_summary() {
        let memory = memory();
        let ctx = ExecutionContext::new(&memory, &NoTypes, AbiLayout::lp64(), 1);
        let registry = FormatterRegistry::default();

        let value = ValueHandle::scalar_at(PrimitiveKind::Int, 0x1000, 1);
        assert_eq!(registry.summarize(&ctx, &value, &value.static_type), "7");
    }

    #[test]
    fn test_exact_before_regex_and_priority_order() {
        let memory = memory();
        let ctx = ExecutionContext::new(&memory, &NoTypes, AbiLayout::lp64(), 1);
        let mut registry = FormatterRegistry::default();

        registry.register_regex("app\\..*", 10, constant("regex-high")).unwrap();
        registry.register_regex("app\\.Point", 10, constant("regex-later")).unwrap();
        let value = ValueHandle::object_at(point(), 0x1040, 1);
        assert_eq!(registry.summarize(&ctx, &value, &point()), "regex-high");

        let exact = registry
            .register(FormatterEntry::new(TypePattern::exact("app.Point")).with_summary(constant("exact")))
            .unwrap();
        assert_eq!(registry.summarize(&ctx, &value, &point()), "exact");

        assert!(registry.unregister(exact));
        assert!(!registry.unregister(exact));
        assert_eq!(registry.summarize(&ctx, &value, &point()), "regex-high");
    }

    #[test]
    fn test_cascade_joins_summaries() {
        let memory = memory();
        let ctx = ExecutionContext::new(&memory, &NoTypes, AbiLayout::lp64(), 1);
        let mut registry = FormatterRegistry::default();

        registry
            .register(
                FormatterEntry::new(TypePattern::exact("app.Point"))
                    .with_summary(constant("first"))
                    .cascading(true),
            )
            .unwrap();
        registry
            .register(FormatterEntry::new(TypePattern::Category(TypeCategory::Class)).with_summary(constant("second")))
            .unwrap();
        registry
            .register(FormatterEntry::new(TypePattern::Category(TypeCategory::Class)).with_summary(constant("third")))
            .unwrap();

        let value = ValueHandle::object_at(point(), 0x1040, 1);
        assert_eq!(registry.summarize(&ctx, &value, &point()), "first second");
    }

    #[test]
    fn test_failing_formatters_fall_back() {
        let memory = memory();
        let ctx = ExecutionContext::new(&memory, &NoTypes, AbiLayout::lp64(), 1);
        let mut registry = FormatterRegistry::default();

        let failing = registry
            .register(
                FormatterEntry::new(TypePattern::exact("app.Point"))
                    .with_summary(|_, _, _| Err(IntrospectionError::malformed("broken"))),
            )
            .unwrap();
        let value = ValueHandle::object_at(point(), 0x1040, 1);
        assert_eq!(registry.summarize(&ctx, &value, &point()), "app.Point @ 0x1040");

        registry.unregister(failing);
        registry
            .register(
                FormatterEntry::new(TypePattern::exact("app.Point"))
                    .with_summary(|_, _, _| panic!("formatter bug")),
            )
            .unwrap();
        assert_eq!(registry.summarize(&ctx, &value, &point()), "app.Point @ 0x1040");
    }

    #[test]
    fn test_bad_patterns_are_rejected() {
        let mut registry = FormatterRegistry::default();
        let err = registry.register_regex("app.(", 0, constant("x")).unwrap_err();
        assert!(matches!(err, RegistrationError::BadPattern { .. }));

        let err = registry
            .register(FormatterEntry::new(TypePattern::exact("  ")))
            .unwrap_err();
        assert!(matches!(err, RegistrationError::BadPattern { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_user_children_take_precedence() {
        let memory = memory();
        let ctx = ExecutionContext::new(&memory, &NoTypes, AbiLayout::lp64(), 1);
        let mut registry = FormatterRegistry::default();

        registry
            .register(FormatterEntry::new(TypePattern::exact("app.Point")).with_children(
                |ctx, _, _| {
                    let x = ValueHandle::scalar_at(PrimitiveKind::Int, 0x1000, ctx.stop_id());
                    Ok(SyntheticChildren::from_vec(vec![SyntheticChild::new("x", x)]))
                },
            ))
            .unwrap();

        let value = ValueHandle::object_at(point(), 0x1040, 1);
        let children = registry.synthetic_children(&ctx, &value, &point());
        assert_eq!(children.len(), 1);
        assert_eq!(children.get(0).unwrap().unwrap().name, "x");
    }

    #[test]
    fn test_stale_value_degrades() {
        let memory = memory();
        let ctx = ExecutionContext::new(&memory, &NoTypes, AbiLayout::lp64(), 2);
        let registry = FormatterRegistry::default();

        let value = ValueHandle::scalar_at(PrimitiveKind::Int, 0x1000, 1);
        assert_eq!(registry.summarize(&ctx, &value, &value.static_type), "kotlin.Int @ 0x1000");
        assert!(registry.hardcoded_summary(&ctx, &value, &value.static_type).is_err());
    }
}
