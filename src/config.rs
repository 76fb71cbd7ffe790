//! Run configuration
//!
//! One explicit value threaded into every component call, instead of
//! process-wide mutable flags.

/// 1 MiB. Files past this are skipped before parsing.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct RunMode {
    /// Disable all exclusion heuristics; surface every candidate. Also
    /// downgrades medium-confidence idempotency matches from silent
    /// skips to informational prompts.
    pub strict: bool,
    /// Detailed logging
    pub verbose: bool,
    /// Byte ceiling for files we are willing to parse
    pub max_file_bytes: u64,
}

impl Default for RunMode {
    fn default() -> Self {
        Self {
            strict: false,
            verbose: false,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }
}
