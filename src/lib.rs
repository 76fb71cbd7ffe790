//! entfix — interactive fixer for unescaped HTML entities in JS/TS/JSX
//! source trees.
//!
//! The pipeline per file: [`scan`] extracts candidate spans from a
//! tree-sitter parse (or an ESLint report), [`escape`] decides which of
//! them genuinely need escaping, [`idempotency`] drops fixes already on
//! disk, [`review`] walks the survivors past the user, and [`patch`]
//! rewrites the file without disturbing anything else. [`history`]
//! remembers declined fixes across runs.

pub mod config;
pub mod discover;
pub mod escape;
pub mod history;
pub mod idempotency;
pub mod patch;
pub mod review;
pub mod scan;
