//! Data types for the chunker

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::language::{Language, NodeType};

/// Errors that can occur during chunking
#[derive(Error, Debug)]
pub enum ChunkerError {
    /// The syntax tree for the file contains errors
    #[error("Failed to parse {file}")]
    Parse {
        /// Repo-relative path of the offending file
        file: String,
    },
    /// Tree-sitter query compilation failed (indicates a bug in a query string)
    #[error("Failed to compile {which} query for {language}: {message}")]
    Query {
        language: Language,
        which: &'static str,
        message: String,
    },
    /// Grammar could not be loaded into the parser
    #[error("Grammar load failed: {0}")]
    Grammar(String),
}

/// A parsed code chunk, the unit of retrieval and citation.
///
/// Identified by `"<filepath>:<startLine>-<endLine>"` with 1-based
/// inclusive line numbers. `content` is exactly the source substring
/// spanning those lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique identifier: `{file}:{line_start}-{line_end}`
    pub id: String,
    /// Repo-relative source path, forward slashes
    pub file: String,
    /// Programming language
    pub language: Language,
    /// Structural classification
    pub node_type: NodeType,
    /// Declared name, if the declaration has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Exact source text of the spanned lines
    pub content: String,
    /// Starting line (1-based, inclusive)
    pub line_start: u32,
    /// Ending line (1-based, inclusive)
    pub line_end: u32,
    /// Module specifiers imported by the enclosing file
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<String>,
    /// Symbol names this chunk makes public
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exports: Vec<String>,
    /// Type names referenced within the chunk
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,
}

impl Chunk {
    /// Canonical chunk id for a file and 1-based inclusive line span
    pub fn make_id(file: &str, line_start: u32, line_end: u32) -> String {
        format!("{file}:{line_start}-{line_end}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_format() {
        assert_eq!(Chunk::make_id("src/auth.ts", 4, 19), "src/auth.ts:4-19");
    }

    #[test]
    fn chunk_serde_round_trip() {
        let chunk = Chunk {
            id: Chunk::make_id("src/a.ts", 1, 3),
            file: "src/a.ts".into(),
            language: Language::TypeScript,
            node_type: NodeType::Function,
            name: Some("login".into()),
            content: "export function login() {\n  return true;\n}".into(),
            line_start: 1,
            line_end: 3,
            imports: vec!["./b".into()],
            exports: vec!["login".into()],
            types: vec![],
        };
        let json = serde_json::to_string(&chunk).unwrap();
        let back: Chunk = serde_json::from_str(&json).unwrap();
        assert_eq!(chunk, back);
    }
}
