//! TypeScript language definition

use super::{ExportRule, Language, LanguageDef, NodeType};

/// Tree-sitter query for extracting top-level TypeScript declarations.
/// Nested matches (class methods, inner functions) are filtered out by the
/// chunker's top-level check, not by the query.
const CHUNK_QUERY: &str = r#"
(function_declaration
  name: (identifier) @name) @function

(generator_function_declaration
  name: (identifier) @name) @function

(class_declaration
  name: (type_identifier) @name) @class

(abstract_class_declaration
  name: (type_identifier) @name) @class

(interface_declaration
  name: (type_identifier) @name) @interface

(type_alias_declaration
  name: (type_identifier) @name) @type

(enum_declaration
  name: (identifier) @name) @type

;; Arrow function bound to a name: const foo = () => {}
(lexical_declaration
  (variable_declarator
    name: (identifier) @name
    value: (arrow_function))) @function

(variable_declaration
  (variable_declarator
    name: (identifier) @name
    value: (arrow_function))) @function

;; Function expression bound to a name: const foo = function () {}
(lexical_declaration
  (variable_declarator
    name: (identifier) @name
    value: (function_expression))) @function

;; Other named top-level bindings: const CONFIG = {...}
(lexical_declaration
  (variable_declarator
    name: (identifier) @name)) @other

(variable_declaration
  (variable_declarator
    name: (identifier) @name)) @other

;; Anonymous default export: export default () => {} / export default {...}
(export_statement
  value: (_)) @default
"#;

/// Module specifiers from import statements and re-exports
const IMPORT_QUERY: &str = r#"
(import_statement
  source: (string (string_fragment) @specifier))

(export_statement
  source: (string (string_fragment) @specifier))
"#;

/// Exported symbol names
const EXPORT_QUERY: &str = r#"
(export_statement
  declaration: (function_declaration
    name: (identifier) @export))

(export_statement
  declaration: (class_declaration
    name: (type_identifier) @export))

(export_statement
  declaration: (abstract_class_declaration
    name: (type_identifier) @export))

(export_statement
  declaration: (interface_declaration
    name: (type_identifier) @export))

(export_statement
  declaration: (type_alias_declaration
    name: (type_identifier) @export))

(export_statement
  declaration: (enum_declaration
    name: (identifier) @export))

(export_statement
  declaration: (lexical_declaration
    (variable_declarator
      name: (identifier) @export)))

;; export { a, b as c }
(export_specifier
  name: (identifier) @export)
"#;

/// Referenced type names. `type_identifier` covers annotations, generic
/// arguments, and heritage clauses; the chunker drops a chunk's own name.
const TYPE_QUERY: &str = r#"
(type_identifier) @type

(extends_clause
  (identifier) @type)
"#;

const TYPE_MAP: &[(&str, NodeType)] = &[
    ("function", NodeType::Function),
    ("class", NodeType::Class),
    ("interface", NodeType::Interface),
    ("type", NodeType::TypeAlias),
    ("other", NodeType::Other),
    ("default", NodeType::Other),
];

static DEFINITION: LanguageDef = LanguageDef {
    language: Language::TypeScript,
    grammar: || tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
    extensions: &["ts", "tsx"],
    chunk_query: CHUNK_QUERY,
    import_query: IMPORT_QUERY,
    export_query: Some(EXPORT_QUERY),
    type_query: Some(TYPE_QUERY),
    export_rule: ExportRule::Query,
    transparent_nodes: &["export_statement"],
    comment_prefixes: &["//", "/*", "*"],
    type_map: TYPE_MAP,
};

pub fn definition() -> &'static LanguageDef {
    &DEFINITION
}
