//! Rust language definition

use super::{ExportRule, Language, LanguageDef, NodeType};

/// Tree-sitter query for extracting top-level Rust items. Structs map to
/// `class`, traits to `interface`, enums and aliases to `type`; impl
/// blocks are kept whole as `other` (their methods are subsumed).
const CHUNK_QUERY: &str = r#"
(function_item
  name: (identifier) @name) @function

(struct_item
  name: (type_identifier) @name) @class

(enum_item
  name: (type_identifier) @name) @type

(type_item
  name: (type_identifier) @name) @type

(trait_item
  name: (type_identifier) @name) @interface

(impl_item
  type: (type_identifier) @name) @other

(const_item
  name: (identifier) @name) @other

(static_item
  name: (identifier) @name) @other
"#;

/// `use` paths and `mod` declarations both act as file-level imports
const IMPORT_QUERY: &str = r#"
(use_declaration
  argument: (_) @specifier)

(mod_item
  name: (identifier) @specifier)
"#;

const TYPE_QUERY: &str = r#"
(type_identifier) @type
"#;

const TYPE_MAP: &[(&str, NodeType)] = &[
    ("function", NodeType::Function),
    ("class", NodeType::Class),
    ("interface", NodeType::Interface),
    ("type", NodeType::TypeAlias),
    ("other", NodeType::Other),
];

static DEFINITION: LanguageDef = LanguageDef {
    language: Language::Rust,
    grammar: || tree_sitter_rust::LANGUAGE.into(),
    extensions: &["rs"],
    chunk_query: CHUNK_QUERY,
    import_query: IMPORT_QUERY,
    export_query: None,
    type_query: Some(TYPE_QUERY),
    export_rule: ExportRule::PublicPrefix,
    transparent_nodes: &[],
    comment_prefixes: &["//", "/*", "*"],
    type_map: TYPE_MAP,
};

pub fn definition() -> &'static LanguageDef {
    &DEFINITION
}
