//! 例外ブレークポイントの解決
//!
//! Kotlin/Nativeのランタイムは、Kotlinの例外を `ThrowException` からC++例外として送出します。
//! 送出時は `ThrowException`、捕捉時は `__cxa_begin_catch` にブレークポイントを置き、
//! どちらもランタイムを含むイメージに限定します。

use crate::errors::IntrospectionError;
use konan_dwarf::RuntimeSymbols;
use std::fmt;
use tracing::{debug, warn};

/// 例外送出のエントリポイント（ランタイムがロード済みかどうかの目印も兼ねる）
pub const THROW_ENTRY: &str = "ThrowException";
/// 例外捕捉のエントリポイント
pub const CATCH_ENTRY: &str = "__cxa_begin_catch";

/// 例外イベントの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionEvent {
    Throw,
    Catch,
}

impl ExceptionEvent {
    pub fn entry_point(&self) -> &'static str {
        match self {
            ExceptionEvent::Throw => THROW_ENTRY,
            ExceptionEvent::Catch => CATCH_ENTRY,
        }
    }
}

impl fmt::Display for ExceptionEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExceptionEvent::Throw => write!(f, "throw"),
            ExceptionEvent::Catch => write!(f, "catch"),
        }
    }
}

/// ブレークポイント位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointLocation {
    /// シンボル名
    pub symbol: String,
    pub event: ExceptionEvent,
    /// 対象イメージ（ランタイムを含むイメージ）
    pub image: String,
    /// 解決済みのアドレス（シンボルが対象イメージに無ければ `None`）
    pub address: Option<u64>,
}

impl fmt::Display for BreakpointLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} [{}] in {}", self.symbol, self.event, self.image)?;
        if let Some(address) = self.address {
            write!(f, " @ 0x{:x}", address)?;
        }
        Ok(())
    }
}

/// ホストにインストールしてもらうブレークポイント仕様
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreakpointSpec {
    pub locations: Vec<BreakpointLocation>,
    /// 空の仕様になった理由
    pub diagnostic: Option<IntrospectionError>,
}

impl BreakpointSpec {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// ランタイムのロード待ちで保留中か
    pub fn is_pending(&self) -> bool {
        self.locations.is_empty() && self.diagnostic.is_some()
    }

    pub fn has_event(&self, event: ExceptionEvent) -> bool {
        self.locations.iter().any(|l| l.event == event)
    }
}

/// 例外ブレークポイント解決器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionResolver {
    catch_enabled: bool,
    throw_enabled: bool,
}

/// 例外ブレークポイント解決器を作成する
pub fn create_exception_resolver(catch_enabled: bool, throw_enabled: bool) -> ExceptionResolver {
    ExceptionResolver::new(catch_enabled, throw_enabled)
}

impl ExceptionResolver {
    pub fn new(catch_enabled: bool, throw_enabled: bool) -> Self {
        Self {
            catch_enabled,
            throw_enabled,
        }
    }

    pub fn catch_enabled(&self) -> bool {
        self.catch_enabled
    }

    pub fn throw_enabled(&self) -> bool {
        self.throw_enabled
    }

    fn events(&self) -> Vec<ExceptionEvent> {
        let mut events = Vec::new();
        if self.throw_enabled {
            events.push(ExceptionEvent::Throw);
        }
        if self.catch_enabled {
            events.push(ExceptionEvent::Catch);
        }
        events
    }

    /// 現在ロードされているイメージに対してブレークポイント位置を求める
    ///
    /// ランタイムがまだ無ければ診断付きの空の仕様を返します。
    /// ホストはイメージのロード後に再度呼び出してください。
    pub fn resolve(&self, symbols: &dyn RuntimeSymbols) -> BreakpointSpec {
        let events = self.events();
        if events.is_empty() {
            return BreakpointSpec::empty();
        }

        let Some(runtime) = symbols.find_symbol(THROW_ENTRY) else {
            warn!("Kotlin/Native runtime not loaded; exception breakpoint is pending");
            return BreakpointSpec {
                locations: Vec::new(),
                diagnostic: Some(IntrospectionError::NoRuntimeLoaded),
            };
        };

        let locations = events
            .into_iter()
            .map(|event| {
                let symbol = event.entry_point();
                let address = match event {
                    ExceptionEvent::Throw => Some(runtime.address),
                    ExceptionEvent::Catch => symbols
                        .find_symbol(symbol)
                        .filter(|location| location.image == runtime.image)
                        .map(|location| location.address),
                };
                BreakpointLocation {
                    symbol: symbol.to_string(),
                    event,
                    image: runtime.image.clone(),
                    address,
                }
            })
            .collect::<Vec<_>>();

        debug!(
            "exception breakpoint resolved to {} location(s) in {}",
            locations.len(),
            runtime.image
        );
        BreakpointSpec {
            locations,
            diagnostic: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use konan_dwarf::SymbolLocation;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Symbols(HashMap<&'static str, SymbolLocation>);

    impl Symbols {
        fn with(mut self, name: &'static str, image: &str, address: u64) -> Self {
            self.0.insert(
                name,
                SymbolLocation {
                    image: image.to_string(),
                    address,
                },
            );
            self
        }
    }

    impl RuntimeSymbols for Symbols {
        fn find_symbol(&self, name: &str) -> Option<SymbolLocation> {
            self.0.get(name).cloned()
        }
    }

    fn runtime() -> Symbols {
        Symbols::default()
            .with(THROW_ENTRY, "app.kexe", 0x40_1000)
            .with(CATCH_ENTRY, "app.kexe", 0x40_2000)
    }

    #[test]
    fn test_throw_only() {
        let spec = create_exception_resolver(false, true).resolve(&runtime());
        assert_eq!(spec.locations.len(), 1);
        assert_eq!(spec.locations[0].symbol, THROW_ENTRY);
        assert_eq!(spec.locations[0].address, Some(0x40_1000));
        assert!(!spec.has_event(ExceptionEvent::Catch));
        assert!(spec.diagnostic.is_none());
    }

    #[test]
    fn test_throw_and_catch() {
        let spec = create_exception_resolver(true, true).resolve(&runtime());
        assert!(spec.has_event(ExceptionEvent::Throw));
        assert!(spec.has_event(ExceptionEvent::Catch));
        assert!(spec.locations.iter().all(|l| l.image == "app.kexe"));
    }

    #[test]
    fn test_no_flags_is_empty_without_diagnostic() {
        let spec = create_exception_resolver(false, false).resolve(&runtime());
        assert!(spec.is_empty());
        assert!(!spec.is_pending());
    }

    #[test]
    fn test_pending_until_runtime_loads() {
        let resolver = create_exception_resolver(true, true);
        let spec = resolver.resolve(&Symbols::default());
        assert!(spec.is_pending());
        assert_eq!(spec.diagnostic, Some(IntrospectionError::NoRuntimeLoaded));

        let spec = resolver.resolve(&runtime());
        assert_eq!(spec.locations.len(), 2);
    }

    #[test]
    fn test_catch_outside_runtime_image_stays_symbolic() {
        let symbols = Symbols::default()
            .with(THROW_ENTRY, "app.kexe", 0x40_1000)
            .with(CATCH_ENTRY, "libc++abi.so", 0x7f00_0000);
        let spec = create_exception_resolver(true, false).resolve(&symbols);
        assert_eq!(spec.locations.len(), 1);
        assert_eq!(spec.locations[0].image, "app.kexe");
        assert_eq!(spec.locations[0].address, None);
    }
}
