//! Interactive review loop
//!
//! Per-file state machine: filter candidates through rejection memory,
//! the escape policy, and the idempotency detector, then present each
//! survivor and collect a decision. Decisions come from a
//! [`DecisionSource`] so the machine runs against a script in tests and
//! against a raw-mode keystroke reader in the binary.
//!
//! Candidates are presented in descending (line, column) order. This is
//! not cosmetic: the patcher edits lines by direct substring operations,
//! and applying edits from the end of the file backward guarantees an
//! edit can never shift the offsets of one not yet processed.

use crate::config::RunMode;
use crate::escape::{self, EscapeOutcome, PolicyContext};
use crate::history::RejectionMemory;
use crate::idempotency::{self, Confidence};
use crate::patch::{self, PatchResult};
use crate::scan::Candidate;
use anyhow::Context as _;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;
use tracing::{debug, info, warn};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Install a SIGINT handler that requests a clean quit. Inside the
/// raw-mode prompt Ctrl+C arrives as a key event; this covers the gaps
/// between prompts, where the default action would kill the process with
/// patched lines still unflushed.
pub fn install_interrupt_handler() -> anyhow::Result<()> {
    ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst))
        .context("cannot install interrupt handler")?;
    Ok(())
}

/// True once SIGINT has been received.
pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// What the user chose for the presented candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Apply the escape (default on bare Enter)
    Apply,
    /// Skip and remember, never offer again
    Decline,
    /// Reprint a wider excerpt, then ask again
    ShowContext,
    /// Stop the whole run
    Quit,
}

/// Blocking source of one decision per prompt.
pub trait DecisionSource {
    fn read_decision(&mut self) -> anyhow::Result<Decision>;
}

/// Reads a single keystroke in raw mode.
pub struct TerminalDecisions;

impl DecisionSource for TerminalDecisions {
    fn read_decision(&mut self) -> anyhow::Result<Decision> {
        enable_raw_mode()?;
        let result = read_key_decision();
        disable_raw_mode()?;
        println!();
        result
    }
}

fn read_key_decision() -> anyhow::Result<Decision> {
    loop {
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return Ok(Decision::Quit);
        }
        match key.code {
            KeyCode::Enter | KeyCode::Char('y') | KeyCode::Char('Y') => {
                return Ok(Decision::Apply)
            }
            KeyCode::Char('n') | KeyCode::Char('N') => return Ok(Decision::Decline),
            KeyCode::Char('c') | KeyCode::Char('C') => return Ok(Decision::ShowContext),
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => return Ok(Decision::Quit),
            _ => continue,
        }
    }
}

/// Counters for one file's pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReviewStats {
    pub prompted: usize,
    pub applied: usize,
    pub declined: usize,
    pub auto_skipped: usize,
}

/// Terminal state of a file's review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// All candidates handled; `true` if the file was written
    Completed(ReviewStats, bool),
    /// The file changed on disk under us; pending edits were discarded
    AbortedExternalChange(ReviewStats),
    /// User quit; memory persisted, pending content flushed
    Quit(ReviewStats, bool),
}

pub struct Reviewer<'a, D: DecisionSource> {
    pub mode: RunMode,
    pub memory: &'a mut RejectionMemory,
    pub decisions: &'a mut D,
    interrupt: &'a AtomicBool,
}

struct PendingFix {
    candidate: Candidate,
    escaped: String,
    changed: Vec<char>,
}

impl<'a, D: DecisionSource> Reviewer<'a, D> {
    pub fn new(mode: RunMode, memory: &'a mut RejectionMemory, decisions: &'a mut D) -> Self {
        Self {
            mode,
            memory,
            decisions,
            interrupt: &INTERRUPTED,
        }
    }

    /// Like [`Reviewer::new`] but with a caller-owned interrupt flag,
    /// so tests do not touch the process-wide one.
    pub fn with_interrupt(
        mode: RunMode,
        memory: &'a mut RejectionMemory,
        decisions: &'a mut D,
        interrupt: &'a AtomicBool,
    ) -> Self {
        Self {
            mode,
            memory,
            decisions,
            interrupt,
        }
    }

    /// Review one file. `opened_mtime` is the on-disk modification time
    /// captured when `content` was read; every apply re-checks it.
    pub fn review_file(
        &mut self,
        path: &Path,
        content: &str,
        opened_mtime: SystemTime,
        candidates: Vec<Candidate>,
    ) -> anyhow::Result<FileOutcome> {
        let mut lines: Vec<String> = content.split('\n').map(String::from).collect();
        let mut stats = ReviewStats::default();

        let mut pending = self.filter_candidates(path, &lines, candidates, &mut stats);

        // Mandatory ordering: end of file first, so earlier offsets stay
        // valid across length-changing edits.
        pending.sort_by(|a, b| {
            b.candidate
                .start_line
                .cmp(&a.candidate.start_line)
                .then(b.candidate.start_column.cmp(&a.candidate.start_column))
        });

        let mut file_changed = false;

        for fix in pending {
            if self.interrupt.load(Ordering::SeqCst) {
                info!("interrupt received, stopping");
                let written = if file_changed { flush(path, &lines) } else { false };
                self.memory.save_quiet();
                return Ok(FileOutcome::Quit(stats, written));
            }

            present(&fix, &lines);
            stats.prompted += 1;

            let decision = loop {
                match self.decisions.read_decision()? {
                    Decision::ShowContext => {
                        show_context(&fix.candidate, &lines);
                        present(&fix, &lines);
                    }
                    other => break other,
                }
            };

            match decision {
                Decision::Apply => {
                    if !mtime_still_matches(path, opened_mtime) {
                        warn!(
                            "{} was modified externally, discarding pending edits",
                            path.display()
                        );
                        return Ok(FileOutcome::AbortedExternalChange(stats));
                    }
                    match patch::apply(&mut lines, &fix.candidate, &fix.escaped) {
                        PatchResult::Applied => {
                            stats.applied += 1;
                            file_changed = true;
                        }
                        PatchResult::SkippedMismatch => {
                            // Already warned by the patcher
                        }
                        PatchResult::AbortFile => {
                            warn!(
                                "{}: abandoning remaining patches for this file",
                                path.display()
                            );
                            break;
                        }
                    }
                }
                Decision::Decline => {
                    self.memory.reject(
                        path,
                        fix.candidate.start_line,
                        fix.candidate.start_column,
                        &fix.candidate.original,
                        None,
                        false,
                    );
                    stats.declined += 1;
                }
                Decision::Quit => {
                    let written = if file_changed {
                        flush(path, &lines)
                    } else {
                        false
                    };
                    self.memory.save_quiet();
                    return Ok(FileOutcome::Quit(stats, written));
                }
                Decision::ShowContext => unreachable!("consumed above"),
            }
        }

        let written = if file_changed { flush(path, &lines) } else { false };
        Ok(FileOutcome::Completed(stats, written))
    }

    /// Drop candidates that are remembered rejections, policy false
    /// positives, or already escaped on disk. Idempotency auto-skips are
    /// recorded so they are never re-examined.
    fn filter_candidates(
        &mut self,
        path: &Path,
        lines: &[String],
        candidates: Vec<Candidate>,
        stats: &mut ReviewStats,
    ) -> Vec<PendingFix> {
        let mut pending = Vec::new();

        for candidate in candidates {
            if self.memory.is_rejected(&candidate.key()) {
                debug!(
                    "{}:{}: previously declined, skipping",
                    path.display(),
                    candidate.start_line
                );
                continue;
            }

            let ctx = PolicyContext {
                path,
                enclosing_line: candidate.raw_lines.first().map(String::as_str),
                strict: self.mode.strict,
            };
            let (escaped, changed) = match escape::decide(&candidate.original, &ctx) {
                EscapeOutcome::NotNeeded => continue,
                EscapeOutcome::Escaped { text, changed } => (text, changed),
            };

            match idempotency::already_escaped(
                lines,
                candidate.start_line,
                &candidate.original,
                &escaped,
            ) {
                Confidence::High => {
                    debug!(
                        "{}:{}: escaped form already on disk",
                        path.display(),
                        candidate.start_line
                    );
                    self.memory.reject(
                        path,
                        candidate.start_line,
                        candidate.start_column,
                        &candidate.original,
                        Some("escaped form already present".to_string()),
                        true,
                    );
                    stats.auto_skipped += 1;
                    continue;
                }
                Confidence::Medium => {
                    if self.mode.strict {
                        println!(
                            "note: {}:{} looks already escaped nearby, skipping",
                            path.display(),
                            candidate.start_line
                        );
                    }
                    self.memory.reject(
                        path,
                        candidate.start_line,
                        candidate.start_column,
                        &candidate.original,
                        Some("escaped form found near reported location".to_string()),
                        true,
                    );
                    stats.auto_skipped += 1;
                    continue;
                }
                Confidence::NotMatched => {}
            }

            pending.push(PendingFix {
                candidate,
                escaped,
                changed,
            });
        }

        pending
    }
}

fn mtime_still_matches(path: &Path, opened: SystemTime) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|mtime| mtime == opened)
        .unwrap_or(false)
}

/// Join and write the patched lines, guarding against the doubled-entity
/// corruption signature. Returns whether the file was actually written.
fn flush(path: &Path, lines: &[String]) -> bool {
    let content = lines.join("\n");
    if patch::has_corruption_signature(&content) {
        warn!(
            "{}: doubled entity markers detected, refusing to write",
            path.display()
        );
        return false;
    }
    match patch::write_verified(path, &content) {
        Ok(()) => {
            info!("wrote {}", path.display());
            true
        }
        Err(err) => {
            tracing::error!("{}", err);
            false
        }
    }
}

fn present(fix: &PendingFix, lines: &[String]) {
    let cand = &fix.candidate;
    let changed: Vec<String> = fix.changed.iter().map(|c| c.to_string()).collect();

    println!();
    println!(
        "{}:{}:{} [{}]",
        cand.path.display(),
        cand.start_line,
        cand.start_column,
        cand.context.label()
    );
    if let Some(line) = lines.get(cand.start_line - 1) {
        println!("  | {}", line.trim_end());
    }
    println!("  - {}", cand.original.trim());
    println!("  + {}", fix.escaped.trim());
    println!("  characters: {}", changed.join(" "));
    print!("apply? [Y/n/c/q] ");
    let _ = io::stdout().flush();
}

/// Reprint a wider excerpt around the candidate. Does not consume it.
fn show_context(candidate: &Candidate, lines: &[String]) {
    let center = candidate.start_line.saturating_sub(1);
    let start = center.saturating_sub(5);
    let end = (candidate.end_line + 5).min(lines.len());

    println!();
    for (idx, line) in lines.iter().enumerate().take(end).skip(start) {
        let lineno = idx + 1;
        let marker = if lineno >= candidate.start_line && lineno <= candidate.end_line {
            ">"
        } else {
            " "
        };
        println!("{} {:>4} | {}", marker, lineno, line.trim_end());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan;
    use std::collections::VecDeque;
    use std::fs;
    use tempfile::TempDir;

    struct Scripted {
        queue: VecDeque<Decision>,
    }

    impl Scripted {
        fn new(decisions: &[Decision]) -> Self {
            Self {
                queue: decisions.iter().copied().collect(),
            }
        }
    }

    impl DecisionSource for Scripted {
        fn read_decision(&mut self) -> anyhow::Result<Decision> {
            self.queue
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("script exhausted"))
        }
    }

    fn write_file(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn review(
        root: &TempDir,
        path: &std::path::Path,
        mode: RunMode,
        script: &[Decision],
    ) -> (FileOutcome, RejectionMemory) {
        let content = fs::read_to_string(path).unwrap();
        let mtime = fs::metadata(path).unwrap().modified().unwrap();
        let candidates = scan::extract(path, &content).unwrap();

        let mut memory = RejectionMemory::load(root.path());
        let mut decisions = Scripted::new(script);
        let outcome = {
            let mut reviewer = Reviewer::new(mode, &mut memory, &mut decisions);
            reviewer
                .review_file(path, &content, mtime, candidates)
                .unwrap()
        };
        (outcome, memory)
    }

    #[test]
    fn test_apply_all_escapes_the_file() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(
            &tmp,
            "App.tsx",
            "export function C() {\n  return (\n    <div>\n      Don't stop\n    </div>\n  );\n}\n",
        );

        let (outcome, _) = review(&tmp, &path, RunMode::default(), &[Decision::Apply]);
        match outcome {
            FileOutcome::Completed(stats, written) => {
                assert_eq!(stats.prompted, 1);
                assert_eq!(stats.applied, 1);
                assert!(written);
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let patched = fs::read_to_string(&path).unwrap();
        assert!(patched.contains("Don&apos;t stop"));
        assert!(!patched.contains("Don't"));
    }

    #[test]
    fn test_decline_is_remembered_across_runs() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(
            &tmp,
            "App.tsx",
            "export function C() {\n  return (\n    <div>\n      we can't\n    </div>\n  );\n}\n",
        );

        let (outcome, memory) = review(&tmp, &path, RunMode::default(), &[Decision::Decline]);
        match outcome {
            FileOutcome::Completed(stats, written) => {
                assert_eq!(stats.declined, 1);
                assert!(!written);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        memory.save().unwrap();

        // Second run on the unmodified file: zero prompts for that key
        let (outcome, _) = review(&tmp, &path, RunMode::default(), &[]);
        match outcome {
            FileOutcome::Completed(stats, _) => assert_eq!(stats.prompted, 0),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_quit_terminates_without_consuming_rest() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(
            &tmp,
            "App.tsx",
            "export function C() {\n  return (\n    <div>\n      first's\n      second's\n    </div>\n  );\n}\n",
        );

        let (outcome, _) = review(&tmp, &path, RunMode::default(), &[Decision::Quit]);
        match outcome {
            FileOutcome::Quit(stats, written) => {
                assert_eq!(stats.prompted, 1);
                assert_eq!(stats.applied, 0);
                assert!(!written);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        // File untouched
        assert!(fs::read_to_string(&path).unwrap().contains("first's"));
    }

    #[test]
    fn test_show_context_represents_same_candidate() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(
            &tmp,
            "App.tsx",
            "export function C() {\n  return (\n    <div>\n      Don't stop\n    </div>\n  );\n}\n",
        );

        let (outcome, _) = review(
            &tmp,
            &path,
            RunMode::default(),
            &[Decision::ShowContext, Decision::Apply],
        );
        match outcome {
            FileOutcome::Completed(stats, written) => {
                // Context does not consume the candidate
                assert_eq!(stats.prompted, 1);
                assert_eq!(stats.applied, 1);
                assert!(written);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_already_escaped_on_disk_is_not_prompted() {
        // Simulates parser/raw drift: the candidate reports the raw
        // text while the file already carries the escaped form.
        let tmp = TempDir::new().unwrap();
        let path = write_file(
            &tmp,
            "App.tsx",
            "export function C() {\n  return <p>It&apos;s fine</p>;\n}\n",
        );
        let content = fs::read_to_string(&path).unwrap();
        let mtime = fs::metadata(&path).unwrap().modified().unwrap();

        let candidate = Candidate {
            path: path.clone(),
            start_line: 2,
            start_column: 13,
            end_line: 2,
            end_column: 22,
            context: scan::ContextKind::MarkupText,
            original: "It's fine".to_string(),
            raw_lines: vec!["  return <p>It&apos;s fine</p>;".to_string()],
        };

        let key = candidate.key();
        let mut memory = RejectionMemory::load(tmp.path());
        let mut decisions = Scripted::new(&[]);
        let mut reviewer = Reviewer::new(RunMode::default(), &mut memory, &mut decisions);
        let outcome = reviewer
            .review_file(&path, &content, mtime, vec![candidate])
            .unwrap();

        match outcome {
            FileOutcome::Completed(stats, written) => {
                assert_eq!(stats.prompted, 0);
                assert_eq!(stats.auto_skipped, 1);
                assert!(!written);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        // The auto-skip leaves a record like any decline
        assert!(memory.is_rejected(&key));
    }

    #[test]
    fn test_interrupt_quits_cleanly_before_prompting() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(
            &tmp,
            "App.tsx",
            "export function C() {\n  return (\n    <div>\n      Don't stop\n    </div>\n  );\n}\n",
        );
        let content = fs::read_to_string(&path).unwrap();
        let mtime = fs::metadata(&path).unwrap().modified().unwrap();
        let candidates = scan::extract(&path, &content).unwrap();

        let flag = AtomicBool::new(true);
        let mut memory = RejectionMemory::load(tmp.path());
        let mut decisions = Scripted::new(&[]);
        let mut reviewer =
            Reviewer::with_interrupt(RunMode::default(), &mut memory, &mut decisions, &flag);
        let outcome = reviewer
            .review_file(&path, &content, mtime, candidates)
            .unwrap();

        match outcome {
            FileOutcome::Quit(stats, written) => {
                assert_eq!(stats.prompted, 0);
                assert!(!written);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        // File untouched, no decision ever consumed
        assert!(fs::read_to_string(&path).unwrap().contains("Don't"));
    }

    #[test]
    fn test_external_modification_aborts_file() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(
            &tmp,
            "App.tsx",
            "export function C() {\n  return (\n    <div>\n      Don't stop\n    </div>\n  );\n}\n",
        );
        let content = fs::read_to_string(&path).unwrap();
        let candidates = scan::extract(&path, &content).unwrap();

        // An mtime that cannot match the file on disk
        let stale = SystemTime::UNIX_EPOCH;

        let mut memory = RejectionMemory::load(tmp.path());
        let mut decisions = Scripted::new(&[Decision::Apply]);
        let mut reviewer = Reviewer::new(RunMode::default(), &mut memory, &mut decisions);
        let outcome = reviewer
            .review_file(&path, &content, stale, candidates)
            .unwrap();

        assert!(matches!(outcome, FileOutcome::AbortedExternalChange(_)));
        // Nothing written
        assert!(fs::read_to_string(&path).unwrap().contains("Don't"));
    }

    #[test]
    fn test_multiple_candidates_apply_end_to_start() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(
            &tmp,
            "App.tsx",
            "export function C() {\n  return (\n    <div>\n      <p>\n        first's line\n      </p>\n      <p>\n        second's line\n      </p>\n    </div>\n  );\n}\n",
        );

        let (outcome, _) = review(
            &tmp,
            &path,
            RunMode::default(),
            &[Decision::Apply, Decision::Apply],
        );
        match outcome {
            FileOutcome::Completed(stats, written) => {
                assert_eq!(stats.applied, 2);
                assert!(written);
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let patched = fs::read_to_string(&path).unwrap();
        assert!(patched.contains("first&apos;s line"));
        assert!(patched.contains("second&apos;s line"));
    }
}
