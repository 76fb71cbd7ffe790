//! Safe text patching
//!
//! Applies approved escapes to the in-memory line array and writes the
//! result back. Every edit is local to one line, so no global offsets
//! are recomputed; the review loop's descending (line, column) ordering
//! is what keeps earlier offsets valid across multiple edits.
//!
//! Each path re-verifies the text it is about to replace. Stale
//! positions downgrade to a warning and an unpatched candidate, never a
//! corrupted file.

use crate::scan::{Candidate, ContextKind};
use anyhow::Context as _;
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// What happened to a single candidate's patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchResult {
    Applied,
    /// Recorded position no longer matches the raw text; candidate left
    /// unpatched.
    SkippedMismatch,
    /// The line failed the sibling-tag guard; the whole file's remaining
    /// patches must be abandoned.
    AbortFile,
}

fn doubled_entity_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"&amp;(?:apos|quot|lt|gt|amp|#\d+);").expect("doubled pattern"))
}

/// Apply one approved escape to the line array.
pub fn apply(lines: &mut [String], candidate: &Candidate, escaped: &str) -> PatchResult {
    match candidate.context {
        ContextKind::Literal => patch_literal(lines, candidate, escaped),
        ContextKind::MarkupText if candidate.start_line == candidate.end_line => {
            patch_markup_single_line(lines, candidate)
        }
        ContextKind::MarkupText => patch_markup_multi_line(lines, candidate),
    }
}

/// Literal path: find the quote at the recorded column, match it to its
/// closing quote on the same line, verify the enclosed text, splice.
fn patch_literal(lines: &mut [String], candidate: &Candidate, escaped: &str) -> PatchResult {
    let Some(line) = lines.get_mut(candidate.start_line - 1) else {
        warn!(
            "{}:{}: line out of range, skipping",
            candidate.path.display(),
            candidate.start_line
        );
        return PatchResult::SkippedMismatch;
    };

    let col = candidate.start_column;
    let quote = match line.as_bytes().get(col) {
        Some(&b) if b == b'\'' || b == b'"' || b == b'`' => b as char,
        _ => {
            warn!(
                "{}:{}:{}: no quote at recorded column, skipping",
                candidate.path.display(),
                candidate.start_line,
                col
            );
            return PatchResult::SkippedMismatch;
        }
    };

    let Some(close) = find_closing_quote(line, col, quote) else {
        warn!(
            "{}:{}: unmatched {} quote, skipping",
            candidate.path.display(),
            candidate.start_line,
            quote
        );
        return PatchResult::SkippedMismatch;
    };

    // Defense against stale positions: the enclosed text must still be
    // exactly what we scanned.
    if &line[col + 1..close] != candidate.original {
        warn!(
            "{}:{}: literal content changed since scan, skipping",
            candidate.path.display(),
            candidate.start_line
        );
        return PatchResult::SkippedMismatch;
    }

    line.replace_range(col + 1..close, escaped);
    debug!(
        "{}:{}: patched literal",
        candidate.path.display(),
        candidate.start_line
    );
    PatchResult::Applied
}

/// Find the closing quote for the literal opened at `open`, honoring
/// backslash escapes.
fn find_closing_quote(line: &str, open: usize, quote: char) -> Option<usize> {
    let bytes = line.as_bytes();
    let mut i = open + 1;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i] as char == quote {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Markup text confined to one line. Substitution is local and
/// position-independent: only quote and apostrophe are replaced, never
/// angle brackets or ampersands.
fn patch_markup_single_line(lines: &mut [String], candidate: &Candidate) -> PatchResult {
    let Some(line) = lines.get_mut(candidate.start_line - 1) else {
        return PatchResult::SkippedMismatch;
    };

    let original = candidate.original.as_str();
    let Some(at) = line.find(original) else {
        warn!(
            "{}:{}: markup text not found on line, skipping",
            candidate.path.display(),
            candidate.start_line
        );
        return PatchResult::SkippedMismatch;
    };

    // Sibling-tag guard: if the rest of the line still carries a full
    // tag pair, a substitution here risks damaging it. Abort the whole
    // file's remaining patches rather than guess.
    let mut remainder = String::with_capacity(line.len() - original.len());
    remainder.push_str(&line[..at]);
    remainder.push_str(&line[at + original.len()..]);
    if remainder.contains('<') && remainder.contains('>') {
        warn!(
            "{}:{}: line still contains sibling tags, aborting file",
            candidate.path.display(),
            candidate.start_line
        );
        return PatchResult::AbortFile;
    }

    let replacement = escape_quotes_only(original);
    line.replace_range(at..at + original.len(), &replacement);
    PatchResult::Applied
}

/// Markup text spanning multiple lines: patch the first line of the span
/// that contains the trimmed original, leave the rest of the span alone.
fn patch_markup_multi_line(lines: &mut [String], candidate: &Candidate) -> PatchResult {
    let trimmed = candidate.original.trim();
    if trimmed.is_empty() {
        return PatchResult::SkippedMismatch;
    }

    let first = candidate.start_line - 1;
    let last = (candidate.end_line - 1).min(lines.len().saturating_sub(1));

    for idx in first..=last {
        let line = &lines[idx];
        if let Some(at) = line.find(trimmed) {
            let replacement = escape_quotes_only(trimmed);
            lines[idx].replace_range(at..at + trimmed.len(), &replacement);
            return PatchResult::Applied;
        }
    }

    warn!(
        "{}:{}: multi-line markup text not found in span, skipping",
        candidate.path.display(),
        candidate.start_line
    );
    PatchResult::SkippedMismatch
}

/// Quote/apostrophe-only substitution used on markup paths.
fn escape_quotes_only(text: &str) -> String {
    text.replace('\'', "&apos;").replace('"', "&quot;")
}

/// Pre-write corruption gate: a doubled entity marker means this run (or
/// a previous one) escaped an ampersand that was already part of an
/// entity. Refuse to write.
pub fn has_corruption_signature(text: &str) -> bool {
    doubled_entity_pattern().is_match(text)
}

/// Write the patched content and read it back to confirm the bytes on
/// disk are exactly what we intended.
pub fn write_verified(path: &Path, content: &str) -> anyhow::Result<()> {
    fs::write(path, content).with_context(|| format!("cannot write {}", path.display()))?;
    let on_disk =
        fs::read_to_string(path).with_context(|| format!("cannot re-read {}", path.display()))?;
    if on_disk != content {
        anyhow::bail!(
            "write verification failed for {}: on-disk content differs",
            path.display()
        );
    }
    Ok(())
}
