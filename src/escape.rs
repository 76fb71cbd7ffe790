//! Escape policy engine
//!
//! Decides whether a candidate text span genuinely needs escaping or is a
//! false positive (CSS-in-JS selectors, URL query fragments, font lists,
//! text that is already escaped). Pure with respect to its inputs; the
//! strict flag is threaded in via [`PolicyContext`], never read from
//! process-wide state.

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// The five characters this tool manages.
pub const MANAGED_CHARS: [char; 5] = ['\'', '"', '&', '<', '>'];

/// Entity form for a managed character.
pub fn entity_for(ch: char) -> Option<&'static str> {
    match ch {
        '\'' => Some("&apos;"),
        '"' => Some("&quot;"),
        '&' => Some("&amp;"),
        '<' => Some("&lt;"),
        '>' => Some("&gt;"),
        _ => None,
    }
}

/// Inputs the policy needs beyond the candidate text itself.
#[derive(Debug, Clone, Copy)]
pub struct PolicyContext<'a> {
    /// Path of the file the text came from
    pub path: &'a Path,
    /// The raw line enclosing the candidate, if available
    pub enclosing_line: Option<&'a str>,
    /// Strict mode disables all exclusion heuristics
    pub strict: bool,
}

/// Result of a policy decision. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscapeOutcome {
    /// The text is safe as-is (false positive or already escaped)
    NotNeeded,
    /// The text should be replaced with `text`; `changed` lists the
    /// distinct managed characters that were converted, in order of
    /// first appearance.
    Escaped { text: String, changed: Vec<char> },
}

impl EscapeOutcome {
    pub fn escaped_text(&self) -> Option<&str> {
        match self {
            EscapeOutcome::NotNeeded => None,
            EscapeOutcome::Escaped { text, .. } => Some(text),
        }
    }
}

fn entity_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"&(?:amp;)?(?:apos|quot|amp|lt|gt|#\d+|#[xX][0-9a-fA-F]+);")
            .expect("entity pattern")
    })
}

fn selector_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^&[.#\[:>]").expect("selector pattern"))
}

const STYLESHEET_EXTENSIONS: [&str; 5] = ["css", "scss", "sass", "less", "styl"];

const GENERIC_FONT_FAMILIES: [&str; 8] = [
    "serif",
    "sans-serif",
    "monospace",
    "system-ui",
    "cursive",
    "arial",
    "helvetica",
    "georgia",
];

/// Decide what to do with a candidate's text.
///
/// Heuristics run in a fixed order, first match wins. In strict mode the
/// exclusion heuristics are skipped entirely so every candidate reaches
/// the user; the already-escaped check and the markup-protection rule
/// still apply because they guard correctness, not noise.
pub fn decide(original: &str, ctx: &PolicyContext) -> EscapeOutcome {
    if !ctx.strict && is_excluded(original, ctx) {
        return EscapeOutcome::NotNeeded;
    }

    // Anything already carrying an entity is left alone. This is what
    // makes re-running the tool on a partially fixed file safe.
    if entity_pattern().is_match(original) {
        return EscapeOutcome::NotNeeded;
    }

    // Text with angle brackets likely carries nested markup. Only the
    // quote characters are safe to touch there.
    if original.contains('<') || original.contains('>') {
        return escape_subset(original, &['\'', '"']);
    }

    escape_subset(original, &MANAGED_CHARS)
}

/// Exclusion heuristics, checked in order. Each one marks a candidate as
/// a false positive that needs no escaping.
fn is_excluded(text: &str, ctx: &PolicyContext) -> bool {
    let trimmed = text.trim();
    let no_spaces = !trimmed.contains(' ');

    // URL query fragments: ?foo=1&bar=2 or &page=2
    if (trimmed.contains('?') && trimmed.contains('&') && no_spaces)
        || (trimmed.starts_with('&') && trimmed.contains('=') && no_spaces)
    {
        return true;
    }

    // CSS-in-JS parent selector: &:hover, &:focus-within
    if trimmed.starts_with('&') && trimmed.contains(':') {
        return true;
    }

    // Operators typed out as text
    if trimmed == "&" || trimmed == "&&" || trimmed == ">>" {
        return true;
    }

    // Nested selector bodies: "& .child", "&[disabled]"
    if trimmed.starts_with('&')
        && (trimmed.contains(' ') || trimmed.contains('[') || trimmed.contains(':'))
    {
        return true;
    }

    // Whole file is a stylesheet
    if let Some(ext) = ctx.path.extension().and_then(|e| e.to_str()) {
        if STYLESHEET_EXTENSIONS.contains(&ext.to_lowercase().as_str()) {
            return true;
        }
    }

    // Style-object or class-name assignment with CSS-ish punctuation
    if looks_like_style_context(trimmed, ctx.enclosing_line) {
        return true;
    }

    if looks_like_font_list(trimmed) {
        return true;
    }

    // GraphQL / query-parameter text: "filter=a&b", "query: a & b"
    if trimmed.contains('&') {
        let lower = trimmed.to_lowercase();
        if lower.contains("query") || lower.contains("filter") || lower.contains("param") {
            return true;
        }
    }

    // Enhanced selector shapes: &.cls, &#id, &[attr], &:state, &>, "a & b"
    if selector_pattern().is_match(trimmed) || trimmed.contains(" & ") {
        return true;
    }

    false
}

fn looks_like_style_context(text: &str, enclosing_line: Option<&str>) -> bool {
    let css_punctuation = text.contains(':') && (text.contains(';') || text.contains("px"))
        || text.contains('{')
        || text.contains('}');
    if !css_punctuation {
        return false;
    }

    let line = enclosing_line.unwrap_or("").to_lowercase();
    let lower = text.to_lowercase();
    line.contains("style")
        || line.contains("classname")
        || line.contains("css")
        || lower.contains("style")
}

/// Comma-separated list of font names, e.g. `'Helvetica Neue', Arial, sans-serif`
fn looks_like_font_list(text: &str) -> bool {
    if !text.contains(',') {
        return false;
    }
    if !text
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, ',' | ' ' | '\'' | '"' | '-'))
    {
        return false;
    }
    let lower = text.to_lowercase();
    GENERIC_FONT_FAMILIES.iter().any(|f| lower.contains(f))
}

/// Escape every occurrence of the characters in `subset`, single pass.
fn escape_subset(original: &str, subset: &[char]) -> EscapeOutcome {
    let mut out = String::with_capacity(original.len());
    let mut changed: Vec<char> = Vec::new();

    for ch in original.chars() {
        match entity_for(ch) {
            Some(entity) if subset.contains(&ch) => {
                out.push_str(entity);
                if !changed.contains(&ch) {
                    changed.push(ch);
                }
            }
            _ => out.push(ch),
        }
    }

    if changed.is_empty() {
        EscapeOutcome::NotNeeded
    } else {
        EscapeOutcome::Escaped { text: out, changed }
    }
}
