//! JavaScript language definition

use super::{ExportRule, Language, LanguageDef, NodeType};

/// Tree-sitter query for extracting top-level JavaScript declarations
const CHUNK_QUERY: &str = r#"
(function_declaration
  name: (identifier) @name) @function

(generator_function_declaration
  name: (identifier) @name) @function

(class_declaration
  name: (identifier) @name) @class

;; Arrow function bound to a name: const foo = () => {}
(lexical_declaration
  (variable_declarator
    name: (identifier) @name
    value: (arrow_function))) @function

(variable_declaration
  (variable_declarator
    name: (identifier) @name
    value: (arrow_function))) @function

(lexical_declaration
  (variable_declarator
    name: (identifier) @name
    value: (function_expression))) @function

;; Other named top-level bindings
(lexical_declaration
  (variable_declarator
    name: (identifier) @name)) @other

(variable_declaration
  (variable_declarator
    name: (identifier) @name)) @other

(export_statement
  value: (_)) @default
"#;

const IMPORT_QUERY: &str = r#"
(import_statement
  source: (string (string_fragment) @specifier))

(export_statement
  source: (string (string_fragment) @specifier))
"#;

const EXPORT_QUERY: &str = r#"
(export_statement
  declaration: (function_declaration
    name: (identifier) @export))

(export_statement
  declaration: (class_declaration
    name: (identifier) @export))

(export_statement
  declaration: (lexical_declaration
    (variable_declarator
      name: (identifier) @export)))

(export_specifier
  name: (identifier) @export)
"#;

/// JavaScript has no annotation positions; `extends` is the one
/// type-reference signal available.
const TYPE_QUERY: &str = r#"
(class_heritage
  (identifier) @type)
"#;

const TYPE_MAP: &[(&str, NodeType)] = &[
    ("function", NodeType::Function),
    ("class", NodeType::Class),
    ("other", NodeType::Other),
    ("default", NodeType::Other),
];

static DEFINITION: LanguageDef = LanguageDef {
    language: Language::JavaScript,
    grammar: || tree_sitter_javascript::LANGUAGE.into(),
    extensions: &["js", "jsx", "mjs"],
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
