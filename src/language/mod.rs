//! Language registry for code chunking
//!
//! Each supported language contributes a [`LanguageDef`]: the tree-sitter
//! grammar hook plus the query patterns the chunker compiles lazily
//! (top-level declarations, import specifiers, export names, type
//! references). Languages are looked up by name or file extension.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

mod javascript;
mod python;
mod rust;
mod typescript;

/// Supported source languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    TypeScript,
    JavaScript,
    Python,
    Rust,
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Language::TypeScript => write!(f, "typescript"),
            Language::JavaScript => write!(f, "javascript"),
            Language::Python => write!(f, "python"),
            Language::Rust => write!(f, "rust"),
        }
    }
}

impl std::str::FromStr for Language {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "typescript" => Ok(Language::TypeScript),
            "javascript" => Ok(Language::JavaScript),
            "python" => Ok(Language::Python),
            "rust" => Ok(Language::Rust),
            other => Err(format!("Unknown language: '{other}'")),
        }
    }
}

/// Structural classification of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Function,
    Class,
    Interface,
    /// Type aliases and enums (type-level declarations without a body of members)
    #[serde(rename = "type")]
    TypeAlias,
    Other,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeType::Function => write!(f, "function"),
            NodeType::Class => write!(f, "class"),
            NodeType::Interface => write!(f, "interface"),
            NodeType::TypeAlias => write!(f, "type"),
            NodeType::Other => write!(f, "other"),
        }
    }
}

impl NodeType {
    /// Classification specificity: lower wins when the same span matches twice
    /// (e.g. a named declaration also caught by a catch-all pattern).
    pub(crate) fn specificity(self) -> u8 {
        match self {
            NodeType::Function => 0,
            NodeType::Class => 1,
            NodeType::Interface => 2,
            NodeType::TypeAlias => 3,
            NodeType::Other => 4,
        }
    }
}

/// How a language decides which chunks are exported
#[derive(Debug, Clone, Copy)]
pub enum ExportRule {
    /// Export statements captured by `export_query` (TypeScript, JavaScript)
    Query,
    /// Top-level names not starting with `_` are importable (Python)
    NoUnderscore,
    /// Declarations whose text starts with a `pub` modifier (Rust)
    PublicPrefix,
}

/// A language definition with all chunking configuration
pub struct LanguageDef {
    /// Language tag stored on every chunk
    pub language: Language,
    /// Function to get the tree-sitter grammar
    pub grammar: fn() -> tree_sitter::Language,
    /// File extensions for this language
    pub extensions: &'static [&'static str],
    /// Tree-sitter query for top-level declarations
    pub chunk_query: &'static str,
    /// Tree-sitter query for module-level import specifiers
    pub import_query: &'static str,
    /// Tree-sitter query for exported symbol names (ExportRule::Query only)
    pub export_query: Option<&'static str>,
    /// Tree-sitter query for referenced type names (None: untyped language)
    pub type_query: Option<&'static str>,
    /// How exports are determined
    pub export_rule: ExportRule,
    /// Wrapper node kinds that do not make a declaration nested
    /// (e.g. `export_statement`, `decorated_definition`)
    pub transparent_nodes: &'static [&'static str],
    /// Line-comment prefixes, used by the comment-only chunk filter
    pub comment_prefixes: &'static [&'static str],
    /// Mapping from capture names to node types
    pub type_map: &'static [(&'static str, NodeType)],
}

/// Global language registry
pub static REGISTRY: LazyLock<LanguageRegistry> = LazyLock::new(LanguageRegistry::new);

/// Registry of all supported languages
pub struct LanguageRegistry {
    by_language: HashMap<Language, &'static LanguageDef>,
    by_extension: HashMap<&'static str, &'static LanguageDef>,
}

impl LanguageRegistry {
    fn new() -> Self {
        let mut reg = Self {
            by_language: HashMap::new(),
            by_extension: HashMap::new(),
        };
        reg.register(typescript::definition());
        reg.register(javascript::definition());
        reg.register(python::definition());
        reg.register(rust::definition());
        reg
    }

    fn register(&mut self, def: &'static LanguageDef) {
        self.by_language.insert(def.language, def);
        for ext in def.extensions {
            self.by_extension.insert(*ext, def);
        }
    }

    /// Get a language definition by language tag
    pub fn get(&self, language: Language) -> Option<&'static LanguageDef> {
        self.by_language.get(&language).copied()
    }

    /// Get a language definition by file extension
    pub fn from_extension(&self, ext: &str) -> Option<&'static LanguageDef> {
        self.by_extension.get(ext).copied()
    }

    /// Iterate over all registered languages
    pub fn all(&self) -> impl Iterator<Item = &'static LanguageDef> + '_ {
        self.by_language.values().copied()
    }

    /// All file extensions with a registered language
    pub fn supported_extensions(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.by_extension.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_lookup() {
        assert_eq!(
            REGISTRY.from_extension("ts").unwrap().language,
            Language::TypeScript
        );
        assert_eq!(
            REGISTRY.from_extension("tsx").unwrap().language,
            Language::TypeScript
        );
        assert_eq!(
            REGISTRY.from_extension("py").unwrap().language,
            Language::Python
        );
        assert!(REGISTRY.from_extension("csv").is_none());
    }

    #[test]
    fn language_round_trip() {
        for lang in [
            Language::TypeScript,
            Language::JavaScript,
            Language::Python,
            Language::Rust,
        ] {
            let parsed: Language = lang.to_string().parse().unwrap();
            assert_eq!(lang, parsed);
        }
    }

    #[test]
    fn node_type_serde_tag() {
        let json = serde_json::to_string(&NodeType::TypeAlias).unwrap();
        assert_eq!(json, "\"type\"");
        let back: NodeType = serde_json::from_str("\"function\"").unwrap();
        assert_eq!(back, NodeType::Function);
    }
}
