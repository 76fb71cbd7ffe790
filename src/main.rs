use anyhow::{Context, Result};
use clap::Parser;
use entfix::config::RunMode;
use entfix::discover;
use entfix::history::RejectionMemory;
use entfix::review::{self, FileOutcome, Reviewer, TerminalDecisions};
use entfix::scan;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "entfix",
    about = "Interactively escape unsafe characters in JSX text and string literals",
    version,
    disable_version_flag = true
)]
struct Args {
    /// Path to the source tree (defaults to current directory)
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Print version
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    _version: Option<bool>,

    /// Enable detailed logging
    #[arg(long)]
    verbose: bool,

    /// Disable all exclusion heuristics so every candidate is surfaced
    #[arg(long)]
    strict: bool,

    /// Delete the persisted rejection store before the run
    #[arg(long)]
    clear_history: bool,

    /// Use an `eslint --format json` report as the candidate source
    /// instead of parsing the tree
    #[arg(long, value_name = "REPORT")]
    from_eslint: Option<PathBuf>,
}

const KNOWN_FLAGS: &[&str] = &[
    "-h",
    "--help",
    "-v",
    "--version",
    "--verbose",
    "--strict",
    "--clear-history",
    "--from-eslint",
];

/// Split argv into arguments clap should see and flags nobody recognizes.
/// Unrecognized flags are dropped with a notice instead of failing the
/// parse, so a stray flag never kills a run.
fn sanitize_args(mut args: impl Iterator<Item = String>) -> (Vec<String>, Vec<String>) {
    let mut kept = Vec::new();
    let mut ignored = Vec::new();
    if let Some(bin) = args.next() {
        kept.push(bin);
    }

    let mut passthrough = false;
    while let Some(arg) = args.next() {
        if passthrough || !arg.starts_with('-') {
            kept.push(arg);
            continue;
        }
        if arg == "--" {
            passthrough = true;
            kept.push(arg);
            continue;
        }
        let name = arg.split('=').next().unwrap_or_default();
        if !KNOWN_FLAGS.contains(&name) {
            ignored.push(arg);
            continue;
        }
        let needs_value = name == "--from-eslint" && !arg.contains('=');
        kept.push(arg);
        if needs_value {
            if let Some(value) = args.next() {
                kept.push(value);
            }
        }
    }

    (kept, ignored)
}

fn main() -> Result<()> {
    let (argv, ignored) = sanitize_args(std::env::args());
    for flag in &ignored {
        eprintln!("ignoring unrecognized flag {flag}");
    }
    let args = Args::parse_from(argv);

    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    review::install_interrupt_handler()?;

    let root = args
        .path
        .canonicalize()
        .with_context(|| format!("cannot resolve {}", args.path.display()))?;

    if args.clear_history {
        RejectionMemory::clear(&root)?;
        info!("cleared rejection history");
    }

    let mode = RunMode {
        strict: args.strict,
        verbose: args.verbose,
        ..RunMode::default()
    };

    let mut memory = RejectionMemory::load(&root);
    let mut decisions = TerminalDecisions;

    let mut files_changed = 0usize;
    let mut total_applied = 0usize;
    let mut quit = false;

    for path in plan_files(&root, &mode, args.from_eslint.as_deref())? {
        let content = match fs::read_to_string(&path.file) {
            Ok(content) => content,
            Err(err) => {
                warn!("cannot read {}: {}, skipping", path.file.display(), err);
                continue;
            }
        };
        let opened_mtime = match fs::metadata(&path.file).and_then(|m| m.modified()) {
            Ok(mtime) => mtime,
            Err(err) => {
                warn!("cannot stat {}: {}, skipping", path.file.display(), err);
                continue;
            }
        };

        let candidates = match path.pre_extracted {
            Some(candidates) => candidates,
            None => match scan::extract(&path.file, &content) {
                Ok(candidates) => candidates,
                Err(err) => {
                    warn!("{}, skipping", err);
                    continue;
                }
            },
        };
        if candidates.is_empty() {
            continue;
        }

        let outcome = {
            let mut reviewer = Reviewer::new(mode, &mut memory, &mut decisions);
            reviewer.review_file(&path.file, &content, opened_mtime, candidates)?
        };

        match outcome {
            FileOutcome::Completed(stats, written) => {
                total_applied += stats.applied;
                if written {
                    files_changed += 1;
                }
            }
            FileOutcome::AbortedExternalChange(stats) => {
                total_applied += stats.applied;
            }
            FileOutcome::Quit(stats, written) => {
                total_applied += stats.applied;
                if written {
                    files_changed += 1;
                }
                quit = true;
            }
        }

        // Bound what an interrupt can lose to the file in flight
        memory.save_quiet();

        if quit || review::interrupted() {
            break;
        }
    }

    memory.save_quiet();
    println!();
    println!(
        "{} fix(es) applied across {} file(s){}",
        total_applied,
        files_changed,
        if quit { " (quit early)" } else { "" }
    );

    Ok(())
}

/// One file's worth of work: discovered on disk, or carried over from an
/// ESLint report with candidates already located.
struct PlannedFile {
    file: PathBuf,
    pre_extracted: Option<Vec<scan::Candidate>>,
}

fn plan_files(
    root: &std::path::Path,
    mode: &RunMode,
    eslint_report: Option<&std::path::Path>,
) -> Result<Vec<PlannedFile>> {
    let Some(report_path) = eslint_report else {
        return Ok(discover::source_files(root, mode)
            .into_iter()
            .map(|file| PlannedFile {
                file,
                pre_extracted: None,
            })
            .collect());
    };

    let report = fs::read_to_string(report_path)
        .with_context(|| format!("cannot read ESLint report {}", report_path.display()))?;
    let findings = scan::findings_from_eslint_json(&report)?;

    let mut by_file: HashMap<PathBuf, Vec<scan::Candidate>> = HashMap::new();
    for finding in findings {
        let Ok(content) = fs::read_to_string(&finding.file) else {
            warn!("cannot read {}, dropping finding", finding.file.display());
            continue;
        };
        let lines: Vec<String> = content.split('\n').map(String::from).collect();
        if let Some(candidate) = scan::candidate_from_finding(&finding, &lines) {
            by_file.entry(finding.file.clone()).or_default().push(candidate);
        }
    }

    let mut planned: Vec<PlannedFile> = by_file
        .into_iter()
        .map(|(file, candidates)| PlannedFile {
            file,
            pre_extracted: Some(candidates),
        })
        .collect();
    planned.sort_by(|a, b| a.file.cmp(&b.file));
    Ok(planned)
}
