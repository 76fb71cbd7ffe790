//! Already-escaped detection
//!
//! A re-scan of a partially fixed file still reports candidates whose fix
//! is already on disk: the parser normalizes entities back to raw
//! characters, a previous run may have fixed only some lines, or the
//! reported text drifted from the raw text. Before prompting, we look at
//! the raw lines around the reported location and decide whether the
//! escaped form is already there.
//!
//! The Medium-confidence checks are approximate by design. They can both
//! over-skip and under-skip; the thresholds below are tunable, not
//! guaranteed-correct detection.

/// How many lines on each side of the reported line to inspect.
const WINDOW_LINES: usize = 10;

/// Characters of context taken around each apostrophe for the
/// per-character check.
const CHAR_CONTEXT: usize = 10;

/// Prefix/suffix length used by the content-similarity check.
const SIMILARITY_LEN: usize = 12;

/// Confidence that the candidate's fix is already reflected on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// Exact escaped text found in the window. Always skip.
    High,
    /// Heuristic match. Skip silently in normal mode, surface as an
    /// informational prompt in strict mode.
    Medium,
    /// No evidence the fix was applied.
    NotMatched,
}

/// Check whether `escaped` (the fully escaped form of `original`) already
/// appears in the raw file around `reported_line` (1-indexed).
pub fn already_escaped(
    lines: &[String],
    reported_line: usize,
    original: &str,
    escaped: &str,
) -> Confidence {
    if lines.is_empty() || original.is_empty() {
        return Confidence::NotMatched;
    }

    let center = reported_line.saturating_sub(1).min(lines.len() - 1);
    let start = center.saturating_sub(WINDOW_LINES);
    let end = (center + WINDOW_LINES + 1).min(lines.len());
    let window = &lines[start..end];
    let window_text = window.join("\n");

    // Exact match of the escaped text anywhere in the window.
    let escaped_trimmed = escaped.trim();
    if !escaped_trimmed.is_empty() && window_text.contains(escaped_trimmed) {
        return Confidence::High;
    }

    // Multi-line originals: compare apostrophe counts against escaped
    // apostrophe counts in the window, then require rough content overlap.
    if original.contains('\n') {
        let apos_in_original = original.matches('\'').count();
        let escaped_apos_in_window = window_text.matches("&apos;").count();
        if apos_in_original > 0
            && escaped_apos_in_window >= apos_in_original
            && content_overlaps(original, &window_text)
        {
            return Confidence::Medium;
        }
    }

    // Per-apostrophe context: every apostrophe's neighborhood must appear
    // in escaped form somewhere in the window.
    if all_apostrophe_contexts_escaped(original, &window_text) {
        return Confidence::Medium;
    }

    Confidence::NotMatched
}

/// Strip entity markers back to raw characters so trimmed prefixes and
/// suffixes can be compared across the escape boundary.
fn strip_entities(text: &str) -> String {
    text.replace("&apos;", "'")
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Prefix/suffix similarity after stripping markers: the first and last
/// `SIMILARITY_LEN` characters of the trimmed original must both appear
/// in the de-escaped window.
fn content_overlaps(original: &str, window_text: &str) -> bool {
    let stripped_window = strip_entities(window_text);
    let trimmed = original.trim();
    if trimmed.is_empty() {
        return false;
    }

    let chars: Vec<char> = trimmed.chars().collect();
    let take = SIMILARITY_LEN.min(chars.len());
    let prefix: String = chars[..take].iter().collect();
    let suffix: String = chars[chars.len() - take..].iter().collect();

    stripped_window.contains(prefix.trim()) && stripped_window.contains(suffix.trim())
}

/// True if the original has at least one apostrophe and every one of them
/// has its escaped neighborhood present in the window.
fn all_apostrophe_contexts_escaped(original: &str, window_text: &str) -> bool {
    let chars: Vec<char> = original.chars().collect();
    let mut found_any = false;

    for (i, &ch) in chars.iter().enumerate() {
        if ch != '\'' {
            continue;
        }
        found_any = true;

        let lo = i.saturating_sub(CHAR_CONTEXT);
        let hi = (i + CHAR_CONTEXT + 1).min(chars.len());
        let neighborhood: String = chars[lo..hi]
            .iter()
            .map(|&c| {
                if c == '\'' {
                    "&apos;".to_string()
                } else {
                    c.to_string()
                }
            })
            .collect();

        if !window_text.contains(neighborhood.trim()) {
            return false;
        }
    }

    found_any
}
