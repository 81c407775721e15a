//! Source-file chunking with tree-sitter
//!
//! Split into submodules:
//! - `types` — chunk data structures and error types
//! - `extract` — chunk/import/export/type extraction from parse trees
//!
//! The chunker is pure: it takes a path and file contents, performs no
//! I/O, and yields the same chunks for the same inputs.

mod extract;
pub mod types;

pub use types::{Chunk, ChunkerError, Language, NodeType};

use std::collections::HashMap;

use once_cell::sync::OnceCell;

use crate::language::{LanguageDef, REGISTRY};

/// Per-language compiled queries (compiled lazily on first use)
struct LangQueries {
    chunk: OnceCell<tree_sitter::Query>,
    import: OnceCell<tree_sitter::Query>,
    export: OnceCell<tree_sitter::Query>,
    types: OnceCell<tree_sitter::Query>,
}

/// Code chunker over the registered languages
///
/// Extracts top-level declarations from source files as [`Chunk`]s with
/// import, export, and type-reference tables.
///
/// # Example
///
/// ```no_run
/// use quarry::Chunker;
///
/// let chunker = Chunker::new()?;
/// let chunks = chunker.parse_file("src/auth.ts", "export function login() { return 1; }")?;
/// for chunk in chunks {
///     println!("{} ({})", chunk.id, chunk.node_type);
/// }
/// # Ok::<(), quarry::ChunkerError>(())
/// ```
pub struct Chunker {
    queries: HashMap<Language, LangQueries>,
}

// Default intentionally omitted: Chunker::new() returns Result.

impl Chunker {
    /// Create a new chunker (queries are compiled lazily on first use)
    pub fn new() -> Result<Self, ChunkerError> {
        let mut queries = HashMap::new();
        for def in REGISTRY.all() {
            queries.insert(
                def.language,
                LangQueries {
                    chunk: OnceCell::new(),
                    import: OnceCell::new(),
                    export: OnceCell::new(),
                    types: OnceCell::new(),
                },
            );
        }
        Ok(Self { queries })
    }

    fn compile<'a>(
        &self,
        def: &'static LanguageDef,
        which: &'static str,
        pattern: &str,
        cell: &'a OnceCell<tree_sitter::Query>,
    ) -> Result<&'a tree_sitter::Query, ChunkerError> {
        cell.get_or_try_init(|| {
            let grammar = (def.grammar)();
            tree_sitter::Query::new(&grammar, pattern).map_err(|e| ChunkerError::Query {
                language: def.language,
                which,
                message: format!("{e:?}"),
            })
        })
    }

    fn cells(&self, def: &'static LanguageDef) -> Result<&LangQueries, ChunkerError> {
        self.queries.get(&def.language).ok_or(ChunkerError::Query {
            language: def.language,
            which: "chunk",
            message: "language not registered".into(),
        })
    }

    pub(crate) fn chunk_query(
        &self,
        def: &'static LanguageDef,
    ) -> Result<&tree_sitter::Query, ChunkerError> {
        let cells = self.cells(def)?;
        self.compile(def, "chunk", def.chunk_query, &cells.chunk)
    }

    pub(crate) fn import_query(
        &self,
        def: &'static LanguageDef,
    ) -> Result<&tree_sitter::Query, ChunkerError> {
        let cells = self.cells(def)?;
        self.compile(def, "import", def.import_query, &cells.import)
    }

    pub(crate) fn export_query(
        &self,
        def: &'static LanguageDef,
    ) -> Result<Option<&tree_sitter::Query>, ChunkerError> {
        let Some(pattern) = def.export_query else {
            return Ok(None);
        };
        let cells = self.cells(def)?;
        self.compile(def, "export", pattern, &cells.export).map(Some)
    }

    pub(crate) fn type_query(
        &self,
        def: &'static LanguageDef,
    ) -> Result<Option<&tree_sitter::Query>, ChunkerError> {
        let Some(pattern) = def.type_query else {
            return Ok(None);
        };
        let cells = self.cells(def)?;
        self.compile(def, "type", pattern, &cells.types).map(Some)
    }

    /// Parse file contents and extract top-level code chunks.
    ///
    /// Unsupported extensions yield an empty Vec without error. Files whose
    /// syntax tree contains errors fail with [`ChunkerError::Parse`]; the
    /// ingest layer decides between skipping and whole-file fallback.
    pub fn parse_file(&self, file: &str, content: &str) -> Result<Vec<Chunk>, ChunkerError> {
        let _span = tracing::debug_span!("parse_file", file).entered();

        let ext = std::path::Path::new(file)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        let Some(def) = REGISTRY.from_extension(ext) else {
            return Ok(vec![]);
        };

        if content.trim().is_empty() {
            return Ok(vec![]);
        }

        let grammar = (def.grammar)();
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&grammar)
            .map_err(|e| ChunkerError::Grammar(format!("{e:?}")))?;

        let tree = parser.parse(content, None).ok_or_else(|| ChunkerError::Parse {
            file: file.to_string(),
        })?;

        if tree.root_node().has_error() {
            return Err(ChunkerError::Parse {
                file: file.to_string(),
            });
        }

        extract::extract_chunks(self, def, file, content, &tree)
    }

    /// Build the single-chunk fallback for a file that failed to parse.
    ///
    /// Returns `None` when the content fails the same drop filters applied
    /// to parsed chunks (empty, under 10 chars trimmed, comment-only).
    pub fn whole_file_chunk(&self, file: &str, content: &str) -> Option<Chunk> {
        let ext = std::path::Path::new(file)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        let def = REGISTRY.from_extension(ext)?;
        extract::whole_file_chunk(def, file, content)
    }

    /// File extensions the chunker can handle
    pub fn supported_extensions(&self) -> Vec<&'static str> {
        REGISTRY.supported_extensions().collect()
    }
}
