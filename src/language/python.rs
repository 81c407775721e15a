//! Python language definition

use super::{ExportRule, Language, LanguageDef, NodeType};

/// Tree-sitter query for extracting top-level Python declarations.
/// Module-level assignments are anchored to `module` so that locals and
/// attribute writes inside functions are never captured.
const CHUNK_QUERY: &str = r#"
(function_definition
  name: (identifier) @name) @function

(class_definition
  name: (identifier) @name) @class

(module
  (expression_statement
    (assignment
      left: (identifier) @name)) @other)
"#;

const IMPORT_QUERY: &str = r#"
(import_statement
  name: (dotted_name) @specifier)

(import_statement
  name: (aliased_import
    name: (dotted_name) @specifier))

(import_from_statement
  module_name: (dotted_name) @specifier)

(import_from_statement
  module_name: (relative_import) @specifier)
"#;

/// Annotation positions and base classes
const TYPE_QUERY: &str = r#"
(type
  (identifier) @type)

(class_definition
  superclasses: (argument_list
    (identifier) @type))
"#;

const TYPE_MAP: &[(&str, NodeType)] = &[
    ("function", NodeType::Function),
    ("class", NodeType::Class),
    ("other", NodeType::Other),
];

static DEFINITION: LanguageDef = LanguageDef {
    language: Language::Python,
    grammar: || tree_sitter_python::LANGUAGE.into(),
    extensions: &["py"],
    chunk_query: CHUNK_QUERY,
    import_query: IMPORT_QUERY,
    export_query: None,
    type_query: Some(TYPE_QUERY),
    export_rule: ExportRule::NoUnderscore,
    transparent_nodes: &["decorated_definition"],
    comment_prefixes: &["#"],
    type_map: TYPE_MAP,
};

pub fn definition() -> &'static LanguageDef {
    &DEFINITION
}
