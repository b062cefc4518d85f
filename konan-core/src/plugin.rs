//! プラグインレジストリ
//!
//! ホストが所有し、起動時に `initialize`、終了時に `terminate` を呼びます。
//! 言語タグと種類の組ごとに1エントリだけを持ち、同じ組の再登録は置き換えになります。

use crate::errors::RegistrationError;
use crate::language::{KotlinLanguage, KotlinLanguageRuntime, LanguageType};
use tracing::debug;

/// プラグインの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    Language,
    LanguageRuntime,
}

/// 登録エントリ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginEntry {
    pub name: String,
    pub description: String,
    pub version: u32,
    pub kind: PluginKind,
    pub language: LanguageType,
}

impl PluginEntry {
    /// Kotlin言語プラグインのエントリ
    pub fn kotlin_language() -> Self {
        Self {
            name: KotlinLanguage::PLUGIN_NAME.to_string(),
            description: KotlinLanguage::DESCRIPTION.to_string(),
            version: KotlinLanguageRuntime::VERSION,
            kind: PluginKind::Language,
            language: LanguageType::Kotlin,
        }
    }

    /// Kotlin/Nativeランタイムプラグインのエントリ
    pub fn kotlin_runtime() -> Self {
        Self {
            name: KotlinLanguageRuntime::PLUGIN_NAME.to_string(),
            description: KotlinLanguageRuntime::DESCRIPTION.to_string(),
            version: KotlinLanguageRuntime::VERSION,
            kind: PluginKind::LanguageRuntime,
            language: LanguageType::Kotlin,
        }
    }
}

/// プラグインレジストリ
#[derive(Debug, Default)]
pub struct PluginRegistry {
    entries: Vec<PluginEntry>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kotlinの言語プラグインとランタイムプラグインを登録する
    pub fn initialize(&mut self) -> Result<(), RegistrationError> {
        self.register(PluginEntry::kotlin_language())?;
        self.register(PluginEntry::kotlin_runtime())?;
        Ok(())
    }

    /// Kotlinのプラグインを取り除く
    pub fn terminate(&mut self) {
        self.unregister(PluginKind::Language, LanguageType::Kotlin);
        self.unregister(PluginKind::LanguageRuntime, LanguageType::Kotlin);
    }

    /// エントリを登録する
    ///
    /// 同じ種類・言語タグのエントリがあれば置き換えて、以前のエントリを返します。
    pub fn register(&mut self, entry: PluginEntry) -> Result<Option<PluginEntry>, RegistrationError> {
        let taken = self.entries.iter().any(|existing| {
            existing.name == entry.name
                && (existing.kind != entry.kind || existing.language != entry.language)
        });
        if taken {
            return Err(RegistrationError::DuplicatePlugin { name: entry.name });
        }

        let previous = self.unregister(entry.kind, entry.language);
        debug!(
            "plugin '{}' registered for {} ({:?})",
            entry.name, entry.language, entry.kind
        );
        self.entries.push(entry);
        Ok(previous)
    }

    /// エントリを取り除く
    pub fn unregister(&mut self, kind: PluginKind, language: LanguageType) -> Option<PluginEntry> {
        let index = self
            .entries
            .iter()
            .position(|e| e.kind == kind && e.language == language)?;
        Some(self.entries.remove(index))
    }

    pub fn find(&self, kind: PluginKind, language: LanguageType) -> Option<&PluginEntry> {
        self.entries
            .iter()
            .find(|e| e.kind == kind && e.language == language)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&PluginEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// 言語プラグインのインスタンスを作る
    pub fn create_language(&self, language: LanguageType) -> Option<KotlinLanguage> {
        self.find(PluginKind::Language, language)?;
        KotlinLanguage::create_instance(language)
    }

    /// ランタイムプラグインのインスタンスを作る
    pub fn create_runtime(&self, language: LanguageType) -> Option<KotlinLanguageRuntime> {
        self.find(PluginKind::LanguageRuntime, language)?;
        KotlinLanguageRuntime::create_instance(language)
    }

    pub fn entries(&self) -> impl Iterator<Item = &PluginEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_and_terminate() {
        let mut registry = PluginRegistry::new();
        registry.initialize().unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.find_by_name("konan").unwrap().version, 1);

        assert!(registry.create_language(LanguageType::Kotlin).is_some());
        assert!(registry.create_runtime(LanguageType::Kotlin).is_some());
        assert!(registry.create_language(LanguageType::Swift).is_none());

        registry.terminate();
        assert!(registry.is_empty());
        assert!(registry.create_language(LanguageType::Kotlin).is_none());
    }

    #[test]
    fn test_reregistration_replaces() {
        let mut registry = PluginRegistry::new();
        registry.initialize().unwrap();

        let mut updated = PluginEntry::kotlin_runtime();
        updated.version = 2;
        let previous = registry.register(updated).unwrap().unwrap();
        assert_eq!(previous.version, 1);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.find_by_name("konan").unwrap().version, 2);

        // initialize を繰り返しても重複しない
        registry.initialize().unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_name_taken_by_another_language() {
        let mut registry = PluginRegistry::new();
        registry.initialize().unwrap();

        let mut impostor = PluginEntry::kotlin_runtime();
        impostor.language = LanguageType::Swift;
        assert_eq!(
            registry.register(impostor),
            Err(RegistrationError::DuplicatePlugin {
                name: "konan".to_string()
            })
        );
    }
}
