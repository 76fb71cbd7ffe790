//! Candidate extraction
//!
//! Walks a tree-sitter parse of a JS/TS/JSX/TSX file and produces the
//! ordered list of spans that may need escaping: string literals and JSX
//! text whose trimmed value contains a managed character. Literals that
//! sit in a JSX attribute or in a tag-style object property are skipped
//! outright; those are identifiers and config values, not rendered text.
//!
//! Can also build candidates from ESLint `react/no-unescaped-entities`
//! findings instead of a parse tree.

use crate::escape::MANAGED_CHARS;
use anyhow::Context as _;
use serde::Deserialize;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use tree_sitter::Parser;

// Tree-sitter parsers are expensive to create but reusable across files
// of the same dialect, so each one lives in thread-local storage.

thread_local! {
    static JS_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        // Ignore error here - will be caught at parse time if language fails
        let _ = p.set_language(&tree_sitter_javascript::LANGUAGE.into());
        p
    });

    static TS_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into());
        p
    });

    static TSX_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_typescript::LANGUAGE_TSX.into());
        p
    });
}

/// Source dialects we can parse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    JavaScript,
    TypeScript,
    Unknown,
}

impl Dialect {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        match ext.as_str() {
            "js" | "jsx" | "mjs" | "cjs" => Dialect::JavaScript,
            "ts" | "tsx" => Dialect::TypeScript,
            _ => Dialect::Unknown,
        }
    }
}

/// What kind of node the candidate text came from. Decided once during
/// extraction; the patcher branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// A quoted string literal
    Literal,
    /// Text embedded directly in markup (JSX text)
    MarkupText,
}

impl ContextKind {
    pub fn label(&self) -> &'static str {
        match self {
            ContextKind::Literal => "literal",
            ContextKind::MarkupText => "jsx text",
        }
    }
}

/// A detected span of source text that may need escaping.
///
/// Lines are 1-indexed, columns 0-indexed byte offsets, both pre-edit.
/// Immutable once produced; candidates are created fresh every run and
/// never persisted.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: PathBuf,
    pub start_line: usize,
    pub start_column: usize,
    pub end_line: usize,
    pub end_column: usize,
    pub context: ContextKind,
    /// The raw text of the span. For literals this excludes the quotes.
    pub original: String,
    /// The enclosing raw line(s) at extraction time
    pub raw_lines: Vec<String>,
}

impl Candidate {
    pub fn key(&self) -> String {
        crate::history::fix_key(&self.path, self.start_line, self.start_column, &self.original)
    }
}

/// Object property keys whose string values name tags, selectors, or
/// config identifiers rather than rendered text.
const TAG_SLOT_KEYS: [&str; 14] = [
    "tag", "as", "component", "classname", "id", "key", "type", "name", "variant", "size",
    "color", "href", "src", "target",
];

fn parse_with_pooled_parser(
    content: &str,
    dialect: Dialect,
    path: &Path,
) -> anyhow::Result<tree_sitter::Tree> {
    let parse_result = match dialect {
        Dialect::JavaScript => JS_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Dialect::TypeScript => {
            let use_tsx = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("tsx"))
                .unwrap_or(false);
            if use_tsx {
                TSX_PARSER.with(|p| p.borrow_mut().parse(content, None))
            } else {
                TS_PARSER.with(|p| p.borrow_mut().parse(content, None))
            }
        }
        Dialect::Unknown => return Err(anyhow::anyhow!("Unknown dialect")),
    };

    parse_result.ok_or_else(|| anyhow::anyhow!("Failed to parse file"))
}

/// Extract candidates from a file's content, in document order.
pub fn extract(path: &Path, content: &str) -> anyhow::Result<Vec<Candidate>> {
    let dialect = Dialect::from_path(path);
    let tree = parse_with_pooled_parser(content, dialect, path)
        .with_context(|| format!("cannot parse {}", path.display()))?;

    let lines: Vec<String> = content.split('\n').map(String::from).collect();
    let mut candidates = Vec::new();
    let mut cursor = tree.root_node().walk();

    loop {
        let node = cursor.node();

        match node.kind() {
            "string" => {
                if !in_tag_slot(&node, content) {
                    if let Some(candidate) = literal_candidate(&node, path, content, &lines) {
                        candidates.push(candidate);
                    }
                }
            }
            "template_string" => {
                if !in_tag_slot(&node, content) {
                    if let Some(candidate) = template_candidate(&node, path, content, &lines) {
                        candidates.push(candidate);
                    }
                }
            }
            "jsx_text" => {
                if let Some(candidate) = markup_candidate(&node, path, content, &lines) {
                    candidates.push(candidate);
                }
            }
            _ => {}
        }

        if cursor.goto_first_child() {
            continue;
        }
        while !cursor.goto_next_sibling() {
            if !cursor.goto_parent() {
                return Ok(candidates);
            }
        }
    }
}

/// True if the literal's value names a tag/identifier slot: it is a JSX
/// attribute value, or the value of an object property whose key is one
/// of the known tag-style keys. Hard skip, not user-configurable.
fn in_tag_slot(node: &tree_sitter::Node, content: &str) -> bool {
    let Some(parent) = node.parent() else {
        return false;
    };

    if parent.kind() == "jsx_attribute" {
        return true;
    }

    if parent.kind() == "pair" {
        if let Some(key) = parent.child_by_field_name("key") {
            let key_text = node_text(&key, content)
                .trim_matches(|c| c == '"' || c == '\'')
                .to_lowercase();
            return TAG_SLOT_KEYS.contains(&key_text.as_str());
        }
    }

    false
}

fn literal_candidate(
    node: &tree_sitter::Node,
    path: &Path,
    content: &str,
    lines: &[String],
) -> Option<Candidate> {
    let raw = node_text(node, content);
    // Strip the surrounding quotes; the recorded column points at the
    // opening quote so the patcher can re-locate it.
    if raw.len() < 2 {
        return None;
    }
    let inner = &raw[1..raw.len() - 1];
    if !contains_managed(inner.trim()) {
        return None;
    }

    Some(build_candidate(
        node,
        path,
        lines,
        ContextKind::Literal,
        inner.to_string(),
    ))
}

/// Template literals are treated like plain literals, but only when they
/// stay on one line and carry no `${}` substitutions; anything else has
/// structure a single-line splice cannot preserve.
fn template_candidate(
    node: &tree_sitter::Node,
    path: &Path,
    content: &str,
    lines: &[String],
) -> Option<Candidate> {
    if node.start_position().row != node.end_position().row {
        return None;
    }
    let mut walker = node.walk();
    if node
        .children(&mut walker)
        .any(|child| child.kind() == "template_substitution")
    {
        return None;
    }

    let raw = node_text(node, content);
    if raw.len() < 2 {
        return None;
    }
    let inner = &raw[1..raw.len() - 1];
    if !contains_managed(inner.trim()) {
        return None;
    }

    Some(build_candidate(
        node,
        path,
        lines,
        ContextKind::Literal,
        inner.to_string(),
    ))
}

fn markup_candidate(
    node: &tree_sitter::Node,
    path: &Path,
    content: &str,
    lines: &[String],
) -> Option<Candidate> {
    let raw = node_text(node, content);
    if !contains_managed(raw.trim()) {
        return None;
    }

    Some(build_candidate(node, path, lines, ContextKind::MarkupText, raw))
}

fn build_candidate(
    node: &tree_sitter::Node,
    path: &Path,
    lines: &[String],
    context: ContextKind,
    original: String,
) -> Candidate {
    let start = node.start_position();
    let end = node.end_position();
    let raw_lines = lines
        .iter()
        .skip(start.row)
        .take(end.row - start.row + 1)
        .cloned()
        .collect();

    Candidate {
        path: path.to_path_buf(),
        start_line: start.row + 1,
        start_column: start.column,
        end_line: end.row + 1,
        end_column: end.column,
        context,
        original,
        raw_lines,
    }
}

fn node_text(node: &tree_sitter::Node, content: &str) -> String {
    content[node.start_byte()..node.end_byte()].to_string()
}

fn contains_managed(text: &str) -> bool {
    text.chars().any(|c| MANAGED_CHARS.contains(&c))
}

// ─── ESLint findings ────────────────────────────────────────────────────

/// One `react/no-unescaped-entities` finding reported by ESLint.
#[derive(Debug, Clone)]
pub struct LintFinding {
    pub file: PathBuf,
    pub line: usize,
    pub column: usize,
    pub entity: String,
    pub message: String,
}

#[derive(Deserialize)]
struct EslintFileReport {
    #[serde(rename = "filePath")]
    file_path: PathBuf,
    messages: Vec<EslintMessage>,
}

#[derive(Deserialize)]
struct EslintMessage {
    #[serde(rename = "ruleId")]
    rule_id: Option<String>,
    line: usize,
    column: usize,
    message: String,
}

const UNESCAPED_ENTITIES_RULE: &str = "react/no-unescaped-entities";

/// Parse `eslint --format json` output into findings for the
/// unescaped-entities rule, ignoring everything else in the report.
pub fn findings_from_eslint_json(report: &str) -> anyhow::Result<Vec<LintFinding>> {
    let files: Vec<EslintFileReport> =
        serde_json::from_str(report).context("invalid ESLint JSON report")?;

    let mut findings = Vec::new();
    for file in files {
        for msg in file.messages {
            if msg.rule_id.as_deref() != Some(UNESCAPED_ENTITIES_RULE) {
                continue;
            }
            // Messages look like: `'` can be escaped with `&apos;`, ...
            let entity = msg
                .message
                .split('`')
                .nth(1)
                .unwrap_or("'")
                .to_string();
            findings.push(LintFinding {
                file: file.file_path.clone(),
                line: msg.line,
                column: msg.column,
                entity,
                message: msg.message,
            });
        }
    }
    Ok(findings)
}

/// Map a finding back to the smallest enclosing raw-text span of the
/// reported character: the stretch of the line between the surrounding
/// tag brackets. ESLint columns are 1-indexed character counts, not byte
/// offsets, so they are converted before any slicing.
pub fn candidate_from_finding(finding: &LintFinding, lines: &[String]) -> Option<Candidate> {
    let line_idx = finding.line.checked_sub(1)?;
    let line = lines.get(line_idx)?;
    let char_col = finding.column.checked_sub(1)?;
    let col = byte_offset_of_char(line, char_col)?;

    // Walk out from the reported character to the nearest tag brackets.
    let span_start = line[..col].rfind('>').map(|i| i + 1).unwrap_or(0);
    let span_end = line[col..].find('<').map(|i| col + i).unwrap_or(line.len());
    let original = line[span_start..span_end].to_string();
    if original.trim().is_empty() {
        return None;
    }

    Some(Candidate {
        path: finding.file.clone(),
        start_line: finding.line,
        start_column: span_start,
        end_line: finding.line,
        end_column: span_end,
        context: ContextKind::MarkupText,
        original,
        raw_lines: vec![line.clone()],
    })
}

fn byte_offset_of_char(line: &str, char_col: usize) -> Option<usize> {
    line.char_indices().map(|(offset, _)| offset).nth(char_col)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract_tsx(content: &str) -> Vec<Candidate> {
        extract(Path::new("test.tsx"), content).unwrap()
    }

    #[test]
    fn test_jsx_text_with_apostrophe_is_a_candidate() {
        let content = "export function C() {\n  return <p>Don't stop</p>;\n}\n";
        let candidates = extract_tsx(content);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].context, ContextKind::MarkupText);
        assert_eq!(candidates[0].original, "Don't stop");
        assert_eq!(candidates[0].start_line, 2);
    }

    #[test]
    fn test_string_literal_with_quote_is_a_candidate() {
        let content = "const msg = 'It\\'s \"fine\"';\n";
        let candidates = extract(Path::new("test.js"), content).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].context, ContextKind::Literal);
        // Column points at the opening quote
        assert_eq!(candidates[0].start_column, 12);
    }

    #[test]
    fn test_single_line_template_string_is_a_candidate() {
        let content = "const msg = `It's \"fine\"`;\n";
        let candidates = extract(Path::new("test.ts"), content).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].context, ContextKind::Literal);
        assert_eq!(candidates[0].original, "It's \"fine\"");
        // Column points at the opening backtick
        assert_eq!(candidates[0].start_column, 12);
    }

    #[test]
    fn test_template_string_with_substitution_is_skipped() {
        let content = "const msg = `it's ${name}`;\n";
        assert!(extract(Path::new("test.js"), content).unwrap().is_empty());
    }

    #[test]
    fn test_multi_line_template_string_is_skipped() {
        let content = "const msg = `don't\nstop`;\n";
        assert!(extract(Path::new("test.js"), content).unwrap().is_empty());
    }

    #[test]
    fn test_clean_text_yields_no_candidates() {
        let content = "export function C() {\n  return <p>All good here</p>;\n}\n";
        assert!(extract_tsx(content).is_empty());
    }

    #[test]
    fn test_jsx_attribute_value_is_skipped() {
        let content = "export function C() {\n  return <a href=\"?a=1&b=2\">link</a>;\n}\n";
        assert!(extract_tsx(content).is_empty());
    }

    #[test]
    fn test_tag_property_value_is_skipped() {
        let content = "const config = { tag: 'a&b', label: 'x & y' };\n";
        let candidates = extract(Path::new("test.ts"), content).unwrap();
        // Only the label survives; the tag slot is a hard skip
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].original, "x & y");
    }

    #[test]
    fn test_candidates_come_out_in_document_order() {
        let content = "export function C() {\n  return (\n    <div>\n      <p>first's</p>\n      <p>second's</p>\n    </div>\n  );\n}\n";
        let candidates = extract_tsx(content);
        assert_eq!(candidates.len(), 2);
        assert!(candidates[0].start_line < candidates[1].start_line);
    }

    #[test]
    fn test_eslint_report_conversion() {
        let report = r#"[
            {
                "filePath": "/repo/src/App.tsx",
                "messages": [
                    {
                        "ruleId": "react/no-unescaped-entities",
                        "severity": 2,
                        "message": "`'` can be escaped with `&apos;`, `&lsquo;`, `&#39;`, `&rsquo;`.",
                        "line": 2,
                        "column": 9
                    },
                    {
                        "ruleId": "no-unused-vars",
                        "severity": 1,
                        "message": "x is unused",
                        "line": 1,
                        "column": 1
                    }
                ]
            }
        ]"#;
        let findings = findings_from_eslint_json(report).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].entity, "'");
        assert_eq!(findings[0].line, 2);
    }

    #[test]
    fn test_candidate_from_finding_takes_enclosing_text_span() {
        let lines: Vec<String> = vec![
            "export function C() {".into(),
            "  return <p>Don't stop</p>;".into(),
        ];
        let finding = LintFinding {
            file: PathBuf::from("App.tsx"),
            line: 2,
            column: 16, // the apostrophe, 1-indexed
            entity: "'".into(),
            message: String::new(),
        };
        let candidate = candidate_from_finding(&finding, &lines).unwrap();
        assert_eq!(candidate.original, "Don't stop");
        assert_eq!(candidate.context, ContextKind::MarkupText);
        assert_eq!(candidate.start_column, 12);
    }

    #[test]
    fn test_finding_column_counts_characters_not_bytes() {
        // The é before the apostrophe is two bytes but one character;
        // the reported column must not split it.
        let lines: Vec<String> = vec!["  return <p>café's ok</p>;".into()];
        let finding = LintFinding {
            file: PathBuf::from("App.tsx"),
            line: 1,
            column: 17, // the apostrophe, 1-indexed in characters
            entity: "'".into(),
            message: String::new(),
        };
        let candidate = candidate_from_finding(&finding, &lines).unwrap();
        assert_eq!(candidate.original, "café's ok");
        assert_eq!(candidate.start_column, 12);
    }

    #[test]
    fn test_finding_column_past_end_of_line_is_dropped() {
        let lines: Vec<String> = vec!["<p>ok</p>".into()];
        let finding = LintFinding {
            file: PathBuf::from("App.tsx"),
            line: 1,
            column: 99,
            entity: "'".into(),
            message: String::new(),
        };
        assert!(candidate_from_finding(&finding, &lines).is_none());
    }
}
