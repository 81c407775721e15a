//! Dependency graph over chunks
//!
//! Built from each chunk's import/export/type tables:
//! 1. Import specifiers resolve to filepaths; an importing chunk gets an
//!    `Imports` edge to every chunk of the imported file (broad,
//!    file-level form).
//! 2. Referenced type names resolve to defining chunks anywhere in the
//!    set (`UsesType`), with the reverse `DefinesType` edge materialized.
//! 3. `Calls` edges point at exported functions of imported files whose
//!    name occurs as a call in the importing chunk.
//!
//! Unresolved references are dropped, not errored. Edges reference chunks
//! by id; the arena owns the nodes and nothing is serialized. The graph
//! is rebuilt from persisted chunks at startup.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::chunker::{Chunk, Language, NodeType};

/// Edge classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Imports,
    DefinesType,
    UsesType,
    Calls,
}

impl EdgeKind {
    /// Tie-break priority within a BFS layer (lower expands first).
    /// DefinesType slots directly after UsesType, its reverse.
    fn priority(self) -> u8 {
        match self {
            EdgeKind::Imports => 0,
            EdgeKind::UsesType => 1,
            EdgeKind::DefinesType => 2,
            EdgeKind::Calls => 3,
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeKind::Imports => write!(f, "imports"),
            EdgeKind::DefinesType => write!(f, "defines-type"),
            EdgeKind::UsesType => write!(f, "uses-type"),
            EdgeKind::Calls => write!(f, "calls"),
        }
    }
}

/// Options for graph expansion
#[derive(Debug, Clone)]
pub struct ExpandOptions {
    /// BFS hop budget; 0 returns the seeds unchanged
    pub max_hops: usize,
    /// Budget of chunks added beyond the seeds
    pub max_expanded: usize,
    /// Permitted edge kinds; `None` means all
    pub kinds: Option<Vec<EdgeKind>>,
}

impl Default for ExpandOptions {
    fn default() -> Self {
        Self {
            max_hops: 2,
            max_expanded: 15,
            kinds: None,
        }
    }
}

/// Immutable chunk adjacency built at startup and swapped atomically on
/// re-ingest (see [`crate::runtime`]).
#[derive(Debug, Default)]
pub struct DependencyGraph {
    chunks: HashMap<String, Chunk>,
    out: HashMap<String, Vec<(EdgeKind, String)>>,
    in_edges: HashMap<String, Vec<(EdgeKind, String)>>,
}

impl DependencyGraph {
    /// Build the graph from the full chunk set
    pub fn build(all: &[Chunk]) -> Self {
        let _span = tracing::debug_span!("graph_build", chunks = all.len()).entered();

        let mut file_chunks: BTreeMap<&str, Vec<&Chunk>> = BTreeMap::new();
        for c in all {
            file_chunks.entry(c.file.as_str()).or_default().push(c);
        }
        let files: HashSet<&str> = file_chunks.keys().copied().collect();

        // Type name -> defining chunks (interface/type/class)
        let mut definers: HashMap<&str, Vec<&Chunk>> = HashMap::new();
        for c in all {
            if matches!(
                c.node_type,
                NodeType::Interface | NodeType::TypeAlias | NodeType::Class
            ) {
                if let Some(name) = &c.name {
                    definers.entry(name.as_str()).or_default().push(c);
                }
            }
        }

        let mut edges: HashSet<(String, EdgeKind, String)> = HashSet::new();
        for c in all {
            let mut imported_files: Vec<&str> = Vec::new();
            for spec in &c.imports {
                let Some(target) = resolve_import(&c.file, spec, c.language, &files) else {
                    continue;
                };
                if target == c.file {
                    continue;
                }
                if let Some(targets) = file_chunks.get(target.as_str()) {
                    imported_files.push(targets[0].file.as_str());
                    for t in targets {
                        if t.id != c.id {
                            edges.insert((c.id.clone(), EdgeKind::Imports, t.id.clone()));
                        }
                    }
                }
            }

            for file in imported_files {
                for t in &file_chunks[file] {
                    if t.node_type != NodeType::Function {
                        continue;
                    }
                    let Some(name) = &t.name else { continue };
                    if !t.exports.contains(name) {
                        continue;
                    }
                    if c.content.contains(&format!("{name}(")) {
                        edges.insert((c.id.clone(), EdgeKind::Calls, t.id.clone()));
                    }
                }
            }

            for ty in &c.types {
                let Some(defs) = definers.get(ty.as_str()) else {
                    continue;
                };
                for d in defs {
                    if d.id == c.id {
                        continue;
                    }
                    edges.insert((c.id.clone(), EdgeKind::UsesType, d.id.clone()));
                    edges.insert((d.id.clone(), EdgeKind::DefinesType, c.id.clone()));
                }
            }
        }

        let mut out: HashMap<String, Vec<(EdgeKind, String)>> = HashMap::new();
        let mut in_edges: HashMap<String, Vec<(EdgeKind, String)>> = HashMap::new();
        for (from, kind, to) in edges {
            out.entry(from.clone()).or_default().push((kind, to.clone()));
            in_edges.entry(to).or_default().push((kind, from));
        }
        // Deterministic adjacency order: kind priority, then target id
        for adj in out.values_mut().chain(in_edges.values_mut()) {
            adj.sort_by(|a, b| (a.0.priority(), &a.1).cmp(&(b.0.priority(), &b.1)));
        }

        let chunks: HashMap<String, Chunk> =
            all.iter().map(|c| (c.id.clone(), c.clone())).collect();

        let graph = Self {
            chunks,
            out,
            in_edges,
        };
        tracing::debug!(
            chunks = graph.chunks.len(),
            edges = graph.edge_count(),
            "Graph built"
        );
        graph
    }

    /// Breadth-first expansion from a seed set.
    ///
    /// Seeds are always in the result. Discovered chunks append in BFS
    /// order; ties within a layer break by edge-kind priority then chunk
    /// id. Output contains no duplicates and at most
    /// `|seeds| + max_expanded` chunks.
    pub fn expand(&self, seeds: &[Chunk], opts: &ExpandOptions) -> Vec<Chunk> {
        let mut result: Vec<Chunk> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for s in seeds {
            if seen.insert(s.id.clone()) {
                result.push(s.clone());
            }
        }

        let allowed = |kind: EdgeKind| {
            opts.kinds
                .as_ref()
                .map_or(true, |kinds| kinds.contains(&kind))
        };

        let mut frontier: Vec<String> = result.iter().map(|c| c.id.clone()).collect();
        let mut added = 0usize;

        for _ in 0..opts.max_hops {
            if frontier.is_empty() || added >= opts.max_expanded {
                break;
            }
            // Best (lowest) priority per candidate across the whole layer
            let mut layer: HashMap<String, u8> = HashMap::new();
            for id in &frontier {
                let Some(adj) = self.out.get(id) else { continue };
                for (kind, to) in adj {
                    if !allowed(*kind) || seen.contains(to) {
                        continue;
                    }
                    let p = kind.priority();
                    layer
                        .entry(to.clone())
                        .and_modify(|best| *best = (*best).min(p))
                        .or_insert(p);
                }
            }
            let mut ordered: Vec<(u8, String)> =
                layer.into_iter().map(|(id, p)| (p, id)).collect();
            ordered.sort();

            let mut next = Vec::new();
            for (_, id) in ordered {
                if added >= opts.max_expanded {
                    break;
                }
                let Some(chunk) = self.chunks.get(&id) else {
                    continue;
                };
                seen.insert(id.clone());
                result.push(chunk.clone());
                added += 1;
                next.push(id);
            }
            frontier = next;
        }

        result
    }

    /// Chunks reachable in one step from `id` over permitted kinds,
    /// including reverse (`in`) neighbors. Exposed for diagnostics.
    pub fn neighbors(&self, id: &str) -> Vec<(EdgeKind, &str)> {
        let mut out: Vec<(EdgeKind, &str)> = self
            .out
            .get(id)
            .into_iter()
            .flatten()
            .map(|(k, to)| (*k, to.as_str()))
            .collect();
        out.extend(
            self.in_edges
                .get(id)
                .into_iter()
                .flatten()
                .map(|(k, from)| (*k, from.as_str())),
        );
        out
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn edge_count(&self) -> usize {
        self.out.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Resolve a module specifier to a filepath present in the chunk set.
/// Bare external specifiers ("react", "node:fs") resolve to nothing.
fn resolve_import(
    from_file: &str,
    spec: &str,
    language: Language,
    files: &HashSet<&str>,
) -> Option<String> {
    let dir = parent_dir(from_file);
    match language {
        Language::TypeScript | Language::JavaScript => {
            if !spec.starts_with("./") && !spec.starts_with("../") {
                return None;
            }
            let base = join_normalize(dir, spec);
            let mut candidates = vec![base.clone()];
            // TS ESM convention: "./b.js" may refer to b.ts on disk
            if let Some(stripped) = base.strip_suffix(".js") {
                candidates.push(format!("{stripped}.ts"));
                candidates.push(format!("{stripped}.tsx"));
            }
            for ext in ["ts", "tsx", "js", "jsx", "mjs"] {
                candidates.push(format!("{base}.{ext}"));
                candidates.push(format!("{base}/index.{ext}"));
            }
            pick(candidates, files)
        }
        Language::Python => {
            let (dots, rest) = split_leading_dots(spec);
            let rel = rest.replace('.', "/");
            let mut candidates = Vec::new();
            if dots > 0 {
                // Relative import: one dot is the current package
                let mut up = String::new();
                for _ in 1..dots {
                    up.push_str("../");
                }
                let base = join_normalize(dir, &format!("{up}{rel}"));
                candidates.push(format!("{base}.py"));
                candidates.push(format!("{base}/__init__.py"));
            } else {
                candidates.push(format!("{rel}.py"));
                candidates.push(format!("{rel}/__init__.py"));
                let sibling = join_normalize(dir, &rel);
                candidates.push(format!("{sibling}.py"));
                candidates.push(format!("{sibling}/__init__.py"));
            }
            pick(candidates, files)
        }
        Language::Rust => {
            let path = spec.trim();
            let mut segments: Vec<&str> = path
                .split("::")
                .map(str::trim)
                .filter(|s| !s.is_empty() && *s != "crate" && *s != "self")
                .collect();
            // Drop item-looking tails (type names, globs, brace lists)
            while let Some(last) = segments.last() {
                let is_module = last
                    .chars()
                    .next()
                    .map(|ch| ch.is_lowercase() || ch == '_')
                    .unwrap_or(false)
                    && !last.contains(['{', '*', ' ']);
                if is_module {
                    break;
                }
                segments.pop();
            }
            if segments.is_empty() || segments.iter().any(|s| *s == "super") {
                return None;
            }
            let mut candidates = Vec::new();
            for take in (1..=segments.len()).rev() {
                let joined = segments[..take].join("/");
                candidates.push(format!("src/{joined}.rs"));
                candidates.push(format!("src/{joined}/mod.rs"));
                let sibling = join_normalize(dir, &joined);
                candidates.push(format!("{sibling}.rs"));
                candidates.push(format!("{sibling}/mod.rs"));
            }
            pick(candidates, files)
        }
    }
}

fn pick(candidates: Vec<String>, files: &HashSet<&str>) -> Option<String> {
    candidates
        .into_iter()
        .find(|c| files.contains(c.as_str()))
}

fn parent_dir(file: &str) -> &str {
    file.rsplit_once('/').map(|(d, _)| d).unwrap_or("")
}

fn join_normalize(dir: &str, rel: &str) -> String {
    let mut parts: Vec<&str> = if dir.is_empty() {
        Vec::new()
    } else {
        dir.split('/').collect()
    };
    for seg in rel.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

fn split_leading_dots(spec: &str) -> (usize, &str) {
    let dots = spec.chars().take_while(|c| *c == '.').count();
    (dots, &spec[dots..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunk;
    use crate::language::{Language, NodeType};

    fn chunk(file: &str, line: u32, name: &str, node_type: NodeType) -> Chunk {
        let id = Chunk::make_id(file, line, line + 4);
        Chunk {
            id: id.clone(),
            file: file.to_string(),
            language: Language::TypeScript,
            node_type,
            name: Some(name.to_string()),
            content: format!("export function {name}() {{ return 1; }}"),
            line_start: line,
            line_end: line + 4,
            imports: vec![],
            exports: vec![name.to_string()],
            types: vec![],
        }
    }

    fn importing_pair() -> Vec<Chunk> {
        let mut caller = chunk("src/a.ts", 1, "run", NodeType::Function);
        caller.imports = vec!["./b".to_string()];
        caller.content = "export function run() { return helper(); }".to_string();
        let helper = chunk("src/b.ts", 1, "helper", NodeType::Function);
        vec![caller, helper]
    }

    #[test]
    fn import_edges_fan_out_to_imported_file() {
        let chunks = importing_pair();
        let graph = DependencyGraph::build(&chunks);

        let expanded = graph.expand(
            &chunks[..1],
            &ExpandOptions {
                max_hops: 1,
                max_expanded: 5,
                kinds: None,
            },
        );
        assert_eq!(expanded.len(), 2);
        assert_eq!(expanded[1].file, "src/b.ts");
    }

    #[test]
    fn calls_edge_to_exported_function() {
        let chunks = importing_pair();
        let graph = DependencyGraph::build(&chunks);
        let kinds = graph.neighbors(&chunks[0].id);
        assert!(kinds.iter().any(|(k, _)| *k == EdgeKind::Imports));
        assert!(kinds.iter().any(|(k, _)| *k == EdgeKind::Calls));
    }

    #[test]
    fn unresolvable_imports_dropped() {
        let mut caller = chunk("src/a.ts", 1, "run", NodeType::Function);
        caller.imports = vec!["react".to_string(), "./missing".to_string()];
        let graph = DependencyGraph::build(std::slice::from_ref(&caller));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn type_edges_both_directions() {
        let mut user = chunk("src/a.ts", 1, "save", NodeType::Function);
        user.types = vec!["Session".to_string()];
        let def = chunk("src/types.ts", 1, "Session", NodeType::Interface);
        let graph = DependencyGraph::build(&[user.clone(), def.clone()]);

        // Forward: user reaches the definition
        let fwd = graph.expand(
            std::slice::from_ref(&user),
            &ExpandOptions {
                max_hops: 1,
                max_expanded: 5,
                kinds: Some(vec![EdgeKind::UsesType]),
            },
        );
        assert_eq!(fwd.len(), 2);
        assert_eq!(fwd[1].id, def.id);

        // Reverse: the definition reaches its user
        let rev = graph.expand(
            std::slice::from_ref(&def),
            &ExpandOptions {
                max_hops: 1,
                max_expanded: 5,
                kinds: Some(vec![EdgeKind::DefinesType]),
            },
        );
        assert_eq!(rev.len(), 2);
        assert_eq!(rev[1].id, user.id);
    }

    #[test]
    fn expansion_respects_budget() {
        // One hub importing a file with many chunks
        let mut hub = chunk("src/hub.ts", 1, "hub", NodeType::Function);
        hub.imports = vec!["./lib".to_string()];
        let mut all = vec![hub.clone()];
        for i in 0..10 {
            all.push(chunk("src/lib.ts", i * 10 + 1, &format!("f{i}"), NodeType::Function));
        }
        let graph = DependencyGraph::build(&all);

        let expanded = graph.expand(
            std::slice::from_ref(&hub),
            &ExpandOptions {
                max_hops: 2,
                max_expanded: 3,
                kinds: None,
            },
        );
        assert_eq!(expanded.len(), 1 + 3, "size <= |seeds| + max_expanded");
    }

    #[test]
    fn zero_hops_returns_seeds_only() {
        let chunks = importing_pair();
        let graph = DependencyGraph::build(&chunks);
        let expanded = graph.expand(
            &chunks[..1],
            &ExpandOptions {
                max_hops: 0,
                max_expanded: 10,
                kinds: None,
            },
        );
        assert_eq!(expanded.len(), 1);
        assert_eq!(expanded[0].id, chunks[0].id);
    }

    #[test]
    fn no_duplicates_with_overlapping_seeds() {
        let chunks = importing_pair();
        let graph = DependencyGraph::build(&chunks);
        let seeds = vec![chunks[0].clone(), chunks[0].clone(), chunks[1].clone()];
        let expanded = graph.expand(&seeds, &ExpandOptions::default());
        let ids: HashSet<&str> = expanded.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids.len(), expanded.len());
    }

    #[test]
    fn layer_ties_break_by_kind_then_id() {
        // Seed imports two files; all discovered in one layer, ordered by id
        let mut seed = chunk("src/seed.ts", 1, "seed", NodeType::Function);
        seed.imports = vec!["./x".to_string(), "./w".to_string()];
        seed.content = "export function seed() { return 1; }".to_string();
        let x = chunk("src/x.ts", 1, "xfn", NodeType::Function);
        let w = chunk("src/w.ts", 1, "wfn", NodeType::Function);
        let graph = DependencyGraph::build(&[seed.clone(), x, w]);

        let expanded = graph.expand(
            std::slice::from_ref(&seed),
            &ExpandOptions {
                max_hops: 1,
                max_expanded: 10,
                kinds: None,
            },
        );
        // Both edges are Imports; id order decides
        assert_eq!(expanded[1].file, "src/w.ts");
        assert_eq!(expanded[2].file, "src/x.ts");
    }

    #[test]
    fn two_hop_chain() {
        let mut a = chunk("src/a.ts", 1, "a", NodeType::Function);
        a.imports = vec!["./b".to_string()];
        let mut b = chunk("src/b.ts", 1, "b", NodeType::Function);
        b.imports = vec!["./c".to_string()];
        let c = chunk("src/c.ts", 1, "c", NodeType::Function);
        let graph = DependencyGraph::build(&[a.clone(), b, c]);

        let one_hop = graph.expand(
            std::slice::from_ref(&a),
            &ExpandOptions {
                max_hops: 1,
                max_expanded: 10,
                kinds: None,
            },
        );
        assert_eq!(one_hop.len(), 2, "c.ts is two hops away");

        let two_hops = graph.expand(
            std::slice::from_ref(&a),
            &ExpandOptions {
                max_hops: 2,
                max_expanded: 10,
                kinds: None,
            },
        );
        assert_eq!(two_hops.len(), 3);
        assert_eq!(two_hops[2].file, "src/c.ts");
    }

    #[test]
    fn python_relative_import_resolution() {
        let files: HashSet<&str> = ["pkg/util.py", "pkg/sub/helpers.py"].into_iter().collect();
        assert_eq!(
            resolve_import("pkg/main.py", ".util", Language::Python, &files),
            Some("pkg/util.py".to_string())
        );
        assert_eq!(
            resolve_import("pkg/sub/job.py", "pkg.util", Language::Python, &files),
            Some("pkg/util.py".to_string())
        );
        assert_eq!(
            resolve_import("pkg/main.py", "numpy", Language::Python, &files),
            None
        );
    }

    #[test]
    fn rust_module_resolution() {
        let files: HashSet<&str> = ["src/config.rs", "src/store/mod.rs"].into_iter().collect();
        assert_eq!(
            resolve_import("src/lib.rs", "crate::config::Config", Language::Rust, &files),
            Some("src/config.rs".to_string())
        );
        assert_eq!(
            resolve_import("src/lib.rs", "store", Language::Rust, &files),
            Some("src/store/mod.rs".to_string())
        );
        assert_eq!(
            resolve_import("src/lib.rs", "serde::Serialize", Language::Rust, &files),
            None
        );
    }

    #[test]
    fn typescript_index_and_js_suffix_resolution() {
        let files: HashSet<&str> = ["src/lib/index.ts", "src/b.ts"].into_iter().collect();
        assert_eq!(
            resolve_import("src/a.ts", "./lib", Language::TypeScript, &files),
            Some("src/lib/index.ts".to_string())
        );
        assert_eq!(
            resolve_import("src/a.ts", "./b.js", Language::TypeScript, &files),
            Some("src/b.ts".to_string())
        );
    }
}
