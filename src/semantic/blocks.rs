//! # Semantic Block Parser
//!
//! Extracts inline `::<type>{key="value", ...}\n...content...\n::` markdown
//! blocks (spec.md §4.9). A small hand-rolled line scanner rather than a
//! full markdown parser — the grammar is narrow enough that a scanner
//! reads clearer than a parser-combinator stack would.

use regex::Regex;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub struct SemanticBlock {
    pub block_type: String,
    /// Explicit `id` attribute if present, else `<type>-<parentId>-<seq>`.
    pub id: String,
    pub importance: Option<String>,
    pub attributes: HashMap<String, String>,
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    pub parent_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockParseError {
    #[error("unknown block type {0:?} at line {1}")]
    UnknownType(String, usize),
    #[error("nested block start at line {0}; blocks may not nest")]
    NestedBlock(usize),
    #[error("unclosed block starting at line {0}")]
    Unclosed(usize),
    #[error("block close at line {0} has no matching start")]
    CloseWithoutStart(usize),
    #[error("block starting at line {0} has empty content")]
    EmptyContent(usize),
}

/// Non-fatal issues surfaced only when `debug` is true (spec.md §4.9:
/// "when debug=false, informational warnings are suppressed but errors
/// remain").
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockParseWarning {
    #[error("block id {0:?} (starting at line {1}) duplicates an earlier block's id")]
    DuplicateId(String, usize),
}

fn open_re() -> Regex {
    Regex::new(r"^::([A-Za-z_][A-Za-z0-9_-]*)\{(.*)\}\s*$").expect("static regex")
}

fn close_re() -> Regex {
    Regex::new(r"^::\s*$").expect("static regex")
}

fn attr_re() -> Regex {
    Regex::new(r#"([A-Za-z_][A-Za-z0-9_]*)\s*=\s*"([^"]*)""#).expect("static regex")
}

fn parse_attributes(raw: &str) -> HashMap<String, String> {
    attr_re().captures_iter(raw).map(|c| (c[1].to_string(), c[2].to_string())).collect()
}

struct OpenBlock {
    block_type: String,
    attributes: HashMap<String, String>,
    start_line: usize,
    content_lines: Vec<String>,
}

/// Scan `markdown` for semantic blocks against the closed `known_types`
/// set (the same closed-set discipline a `TryFrom<&str> for Direction`
/// applies to traversal direction strings). `parent_id` seeds
/// auto-generated ids (`<type>-<parentId>-<seq>`) for blocks with no
/// explicit `id` attribute. Unlike a single-error parser this collects
/// every recoverable error and keeps scanning, returning both the
/// successfully parsed blocks and the full error list; `debug` gates
/// whether non-fatal warnings (e.g. duplicate ids) are also returned.
pub fn parse_blocks(
    markdown: &str,
    parent_id: &str,
    known_types: &[&str],
    debug: bool,
) -> (Vec<SemanticBlock>, Vec<BlockParseError>, Vec<BlockParseWarning>) {
    let open = open_re();
    let close = close_re();

    let mut blocks = Vec::new();
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut current: Option<OpenBlock> = None;
    let mut seq_by_type: HashMap<String, u32> = HashMap::new();
    let mut seen_ids: HashSet<String> = HashSet::new();

    for (idx, line) in markdown.lines().enumerate() {
        let line_no = idx + 1;

        if let Some(caps) = open.captures(line) {
            let block_type = caps[1].to_string();
            if current.is_some() {
                errors.push(BlockParseError::NestedBlock(line_no));
                // Recovery: treat the stray open marker as ordinary content
                // of the block already in progress rather than aborting.
                if let Some(open_block) = current.as_mut() {
                    open_block.content_lines.push(line.to_string());
                }
                continue;
            }
            if !known_types.contains(&block_type.as_str()) {
                errors.push(BlockParseError::UnknownType(block_type, line_no));
                continue;
            }
            let attributes = parse_attributes(&caps[2]);
            current = Some(OpenBlock { block_type, attributes, start_line: line_no, content_lines: Vec::new() });
            continue;
        }

        if close.is_match(line) {
            match current.take() {
                None => errors.push(BlockParseError::CloseWithoutStart(line_no)),
                Some(open_block) => {
                    let content = open_block.content_lines.join("\n");
                    if content.trim().is_empty() {
                        errors.push(BlockParseError::EmptyContent(open_block.start_line));
                        continue;
                    }
                    let mut attributes = open_block.attributes;
                    let importance = attributes.get("importance").cloned();
                    let id = attributes.remove("id").unwrap_or_else(|| {
                        let seq = seq_by_type.entry(open_block.block_type.clone()).or_insert(0);
                        *seq += 1;
                        format!("{}-{}-{}", open_block.block_type, parent_id, seq)
                    });
                    if !seen_ids.insert(id.clone()) {
                        warnings.push(BlockParseWarning::DuplicateId(id.clone(), open_block.start_line));
                    }
                    blocks.push(SemanticBlock {
                        block_type: open_block.block_type,
                        id,
                        importance,
                        attributes,
                        content,
                        start_line: open_block.start_line,
                        end_line: line_no,
                        parent_id: parent_id.to_string(),
                    });
                }
            }
            continue;
        }

        if let Some(open_block) = current.as_mut() {
            open_block.content_lines.push(line.to_string());
        }
    }

    if let Some(open_block) = current {
        errors.push(BlockParseError::Unclosed(open_block.start_line));
    }

    if !debug {
        warnings.clear();
    }

    (blocks, errors, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TYPES: &[&str] = &["decision", "outcome", "quote", "theme", "principle", "example", "anti-pattern"];

    #[test]
    fn parses_a_single_block_with_attributes() {
        let text = "before\n::decision{id=\"a1\", priority=\"high\"}\nsome content\nmore content\n::\nafter";
        let (blocks, errors, _) = parse_blocks(text, "doc1", TYPES, true);
        assert!(errors.is_empty());
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].block_type, "decision");
        assert_eq!(blocks[0].id, "a1");
        assert_eq!(blocks[0].attributes.get("priority"), Some(&"high".to_string()));
        assert_eq!(blocks[0].content, "some content\nmore content");
        assert_eq!(blocks[0].parent_id, "doc1");
    }

    #[test]
    fn auto_generates_id_when_absent() {
        let text = "::outcome{}\nfirst\n::\n::outcome{}\nsecond\n::";
        let (blocks, errors, _) = parse_blocks(text, "doc1", TYPES, true);
        assert!(errors.is_empty());
        assert_eq!(blocks[0].id, "outcome-doc1-1");
        assert_eq!(blocks[1].id, "outcome-doc1-2");
    }

    #[test]
    fn rejects_unknown_block_type_but_keeps_scanning() {
        let text = "::mystery{}\ncontent\n::\n::decision{}\nreal content\n::";
        let (blocks, errors, _) = parse_blocks(text, "doc1", TYPES, true);
        assert_eq!(blocks.len(), 1, "the valid block after the bad one is still recovered");
        assert!(errors.iter().any(|e| matches!(e, BlockParseError::UnknownType(t, _) if t == "mystery")));
    }

    #[test]
    fn rejects_nested_blocks_and_recovers() {
        let text = "::decision{}\n::outcome{}\ncontent\n::";
        let (blocks, errors, _) = parse_blocks(text, "doc1", TYPES, true);
        assert!(errors.iter().any(|e| matches!(e, BlockParseError::NestedBlock(_))));
        assert_eq!(blocks.len(), 1, "the outer block still closes successfully");
    }

    #[test]
    fn rejects_unclosed_block() {
        let text = "::decision{}\ncontent";
        let (_, errors, _) = parse_blocks(text, "doc1", TYPES, true);
        assert!(matches!(errors[0], BlockParseError::Unclosed(1)));
    }

    #[test]
    fn rejects_close_without_start() {
        let text = "content\n::";
        let (_, errors, _) = parse_blocks(text, "doc1", TYPES, true);
        assert!(matches!(errors[0], BlockParseError::CloseWithoutStart(2)));
    }

    #[test]
    fn rejects_empty_content() {
        let text = "::decision{}\n\n::";
        let (_, errors, _) = parse_blocks(text, "doc1", TYPES, true);
        assert!(matches!(errors[0], BlockParseError::EmptyContent(1)));
    }

    #[test]
    fn parses_multiple_sibling_blocks() {
        let text = "::decision{}\nfirst\n::\ngap\n::outcome{}\nsecond\n::";
        let (blocks, errors, _) = parse_blocks(text, "doc1", TYPES, true);
        assert!(errors.is_empty());
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].content, "first");
        assert_eq!(blocks[1].block_type, "outcome");
    }

    #[test]
    fn duplicate_explicit_ids_warn_only_when_debug() {
        let text = "::decision{id=\"dup\"}\nfirst\n::\n::decision{id=\"dup\"}\nsecond\n::";
        let (_, _, warnings_on) = parse_blocks(text, "doc1", TYPES, true);
        assert_eq!(warnings_on.len(), 1);
        let (_, _, warnings_off) = parse_blocks(text, "doc1", TYPES, false);
        assert!(warnings_off.is_empty());
    }

    #[test]
    fn importance_is_surfaced_as_its_own_field() {
        let text = "::decision{importance=\"high\"}\ncontent\n::";
        let (blocks, _, _) = parse_blocks(text, "doc1", TYPES, true);
        assert_eq!(blocks[0].importance, Some("high".to_string()));
    }
}
