//! Chunk extraction from tree-sitter parse trees

use std::collections::{BTreeMap, HashSet};

use tree_sitter::StreamingIterator;

use super::types::{Chunk, ChunkerError, NodeType};
use super::Chunker;
use crate::language::{ExportRule, LanguageDef};

/// Minimum trimmed content length for a chunk to be kept
const MIN_CHUNK_CHARS: usize = 10;

struct Candidate {
    node_type: NodeType,
    name: Option<String>,
    start_byte: usize,
    end_byte: usize,
}

pub(crate) fn extract_chunks(
    chunker: &Chunker,
    def: &'static LanguageDef,
    file: &str,
    content: &str,
    tree: &tree_sitter::Tree,
) -> Result<Vec<Chunk>, ChunkerError> {
    let root = tree.root_node();
    let bytes = content.as_bytes();
    let lines: Vec<&str> = content.lines().collect();

    // Candidates keyed by line span; when two patterns match the same span
    // (arrow-function vs catch-all binding) the more specific wins.
    let chunk_query = chunker.chunk_query(def)?;
    let mut candidates: BTreeMap<(u32, u32), Candidate> = BTreeMap::new();
    let mut cursor = tree_sitter::QueryCursor::new();
    let mut matches = cursor.matches(chunk_query, root, bytes);
    while let Some(m) = matches.next() {
        let Some((node, node_type, is_default)) = classify(m, chunk_query, def) else {
            continue;
        };
        if !is_top_level(node, def) {
            continue;
        }
        let name = if is_default {
            Some("default".to_string())
        } else {
            capture_text(m, chunk_query, "name", content)
        };
        let line_start = node.start_position().row as u32 + 1;
        let line_end = node.end_position().row as u32 + 1;
        let cand = Candidate {
            node_type,
            name,
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
        };
        use std::collections::btree_map::Entry;
        match candidates.entry((line_start, line_end)) {
            Entry::Vacant(v) => {
                v.insert(cand);
            }
            Entry::Occupied(mut o) => {
                if cand.node_type.specificity() < o.get().node_type.specificity() {
                    o.insert(cand);
                }
            }
        }
    }

    // File-level tables shared by every chunk of the file
    let imports = collect_specifiers(chunker.import_query(def)?, root, content);
    let exported = collect_exported(chunker.export_query(def)?, root, content);
    let type_refs = collect_type_refs(chunker.type_query(def)?, root, content);

    let mut chunks = Vec::new();
    for ((line_start, line_end), cand) in candidates {
        let start = (line_start - 1) as usize;
        let end = (line_end as usize).min(lines.len());
        if start >= end {
            continue;
        }
        let text = lines[start..end].join("\n");
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.chars().count() < MIN_CHUNK_CHARS {
            continue;
        }
        if comment_only(trimmed, def) {
            continue;
        }

        let mut types = Vec::new();
        let mut seen_types = HashSet::new();
        for (pos, type_name) in &type_refs {
            if *pos < cand.start_byte || *pos >= cand.end_byte {
                continue;
            }
            if Some(type_name) == cand.name.as_ref() {
                continue;
            }
            if seen_types.insert(type_name.clone()) {
                types.push(type_name.clone());
            }
        }

        let exports = match def.export_rule {
            ExportRule::Query => cand
                .name
                .iter()
                .filter(|n| exported.contains(*n))
                .cloned()
                .collect(),
            ExportRule::NoUnderscore => cand
                .name
                .iter()
                .filter(|n| !n.starts_with('_'))
                .cloned()
                .collect(),
            ExportRule::PublicPrefix => {
                if trimmed.starts_with("pub ") || trimmed.starts_with("pub(") {
                    cand.name.iter().cloned().collect()
                } else {
                    Vec::new()
                }
            }
        };

        chunks.push(Chunk {
            id: Chunk::make_id(file, line_start, line_end),
            file: file.to_string(),
            language: def.language,
            node_type: cand.node_type,
            name: cand.name,
            content: text,
            line_start,
            line_end,
            imports: imports.clone(),
            exports,
            types,
        });
    }

    tracing::debug!(file, count = chunks.len(), "Extracted chunks");
    Ok(chunks)
}

/// Single-chunk fallback for a file that failed to parse
pub(crate) fn whole_file_chunk(
    def: &'static LanguageDef,
    file: &str,
    content: &str,
) -> Option<Chunk> {
    let trimmed = content.trim();
    if trimmed.is_empty() || trimmed.chars().count() < MIN_CHUNK_CHARS || comment_only(trimmed, def)
    {
        return None;
    }
    let lines: Vec<&str> = content.lines().collect();
    let line_end = lines.len().max(1) as u32;
    Some(Chunk {
        id: Chunk::make_id(file, 1, line_end),
        file: file.to_string(),
        language: def.language,
        node_type: NodeType::Other,
        name: None,
        content: lines.join("\n"),
        line_start: 1,
        line_end,
        imports: Vec::new(),
        exports: Vec::new(),
        types: Vec::new(),
    })
}

/// Map a query match to its definition node and classification via the
/// language's capture table. The `default` capture marks an anonymous
/// default export.
fn classify<'tree>(
    m: &tree_sitter::QueryMatch<'_, 'tree>,
    query: &tree_sitter::Query,
    def: &'static LanguageDef,
) -> Option<(tree_sitter::Node<'tree>, NodeType, bool)> {
    for (capture_name, node_type) in def.type_map {
        let Some(idx) = query.capture_index_for_name(capture_name) else {
            continue;
        };
        if let Some(c) = m.captures.iter().find(|c| c.index == idx) {
            return Some((c.node, *node_type, *capture_name == "default"));
        }
    }
    None
}

fn capture_text(
    m: &tree_sitter::QueryMatch<'_, '_>,
    query: &tree_sitter::Query,
    name: &str,
    content: &str,
) -> Option<String> {
    let idx = query.capture_index_for_name(name)?;
    m.captures
        .iter()
        .find(|c| c.index == idx)
        .map(|c| content[c.node.byte_range()].to_string())
}

/// A declaration is top-level when every ancestor below the root is one of
/// the language's transparent wrappers (export statements, decorators).
fn is_top_level(node: tree_sitter::Node<'_>, def: &LanguageDef) -> bool {
    let mut current = node.parent();
    while let Some(parent) = current {
        if parent.parent().is_none() {
            return true;
        }
        if !def.transparent_nodes.contains(&parent.kind()) {
            return false;
        }
        current = parent.parent();
    }
    true
}

fn collect_specifiers(
    query: &tree_sitter::Query,
    root: tree_sitter::Node<'_>,
    content: &str,
) -> Vec<String> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor = tree_sitter::QueryCursor::new();
    let mut matches = cursor.matches(query, root, content.as_bytes());
    while let Some(m) = matches.next() {
        for c in m.captures.iter() {
            let text = content[c.node.byte_range()].to_string();
            if seen.insert(text.clone()) {
                out.push(text);
            }
        }
    }
    out
}

fn collect_exported(
    query: Option<&tree_sitter::Query>,
    root: tree_sitter::Node<'_>,
    content: &str,
) -> HashSet<String> {
    let Some(query) = query else {
        return HashSet::new();
    };
    let mut out = HashSet::new();
    let mut cursor = tree_sitter::QueryCursor::new();
    let mut matches = cursor.matches(query, root, content.as_bytes());
    while let Some(m) = matches.next() {
        for c in m.captures.iter() {
            out.insert(content[c.node.byte_range()].to_string());
        }
    }
    out
}

fn collect_type_refs(
    query: Option<&tree_sitter::Query>,
    root: tree_sitter::Node<'_>,
    content: &str,
) -> Vec<(usize, String)> {
    let Some(query) = query else {
        return Vec::new();
    };
    let mut out = Vec::new();
    let mut cursor = tree_sitter::QueryCursor::new();
    let mut matches = cursor.matches(query, root, content.as_bytes());
    while let Some(m) = matches.next() {
        for c in m.captures.iter() {
            out.push((
                c.node.start_byte(),
                content[c.node.byte_range()].to_string(),
            ));
        }
    }
    out
}

/// True when every non-empty line is a comment
fn comment_only(trimmed: &str, def: &LanguageDef) -> bool {
    trimmed
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .all(|l| def.comment_prefixes.iter().any(|p| l.starts_with(p)))
}
