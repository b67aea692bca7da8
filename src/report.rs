//! Reporting of recipe executions and artefact completions, for the purpose
//! of display to the user.

use crate::graph::ArtefactId;
use crate::task::Outcome;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Trait for build notifications.  Called concurrently from the scheduler.
pub trait Report: Send + Sync {
    /// Called each time a recipe has been executed.
    fn task_finished(&self, action: &str, targets: &[ArtefactId], paths: &[String], outcome: &Outcome);

    /// Called when an artefact is done, whether or not anything ran for it.
    fn artefact_done(&self, _id: ArtefactId, _success: bool, _blocker: Option<ArtefactId>) {}

    /// Log a line of output for the user.
    fn log(&self, msg: &str);
}

/// Report implementation that prints nothing.
pub struct NoReport;

impl Report for NoReport {
    fn task_finished(&self, _: &str, _: &[ArtefactId], _: &[String], _: &Outcome) {}

    fn log(&self, _msg: &str) {}
}

/// Report implementation for a plain console.
pub struct ConsoleReport {
    /// Whether to print command lines of successful recipes too.
    verbose: bool,
    /// Show how long each recipe took.
    profile: bool,
    /// Interleaving of one recipe's lines with another's is prevented by
    /// writing under this lock.
    out: Mutex<()>,
}

impl ConsoleReport {
    pub fn new(verbose: bool, profile: bool) -> Self {
        ConsoleReport {
            verbose,
            profile,
            out: Mutex::new(()),
        }
    }

    fn write(&self, text: &str) {
        let _lock = self.out.lock().unwrap();
        let mut stdout = std::io::stdout().lock();
        // Ignore errors writing to a closed stdout; nothing sensible to do.
        let _ = writeln!(stdout, "{}", text);
    }
}

/// Render the lines a console shows for one executed recipe.
pub fn task_message(action: &str, paths: &[String], outcome: &Outcome, verbose: bool, profile: bool) -> String {
    let mut lines = Vec::new();
    let mut header = format!("{} {}", action, paths.join(" "));
    if profile {
        if let Some(elapsed) = outcome.elapsed {
            header.push_str(&format!(" ({:.2}s)", elapsed.as_secs_f64()));
        }
    }
    if !outcome.success {
        lines.push(format!("failed: {}", header));
        lines.push(outcome.command.clone());
    } else {
        lines.push(header);
        if verbose {
            lines.push(outcome.command.clone());
        }
    }
    if !outcome.stdout.is_empty() {
        lines.push(outcome.stdout.clone());
    }
    if !outcome.success && !outcome.stderr.is_empty() {
        lines.push(outcome.stderr.clone());
    }
    lines.join("\n")
}

impl Report for ConsoleReport {
    fn task_finished(&self, action: &str, _targets: &[ArtefactId], paths: &[String], outcome: &Outcome) {
        self.write(&task_message(action, paths, outcome, self.verbose, self.profile));
    }

    fn log(&self, msg: &str) {
        self.write(msg);
    }
}

/// Tallies of artefact updates over one build phase.
#[derive(Default)]
pub struct Counts {
    updated: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

/// A snapshot of `Counts`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub updated: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Counts {
    pub fn updated(&self, success: bool) {
        let counter = if success { &self.updated } else { &self.failed };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.updated.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.skipped.store(0, Ordering::Relaxed);
    }

    pub fn summary(&self) -> Summary {
        Summary {
            updated: self.updated.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

impl Summary {
    /// The end-of-build lines; zero counts are left out.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let mut count = |n: usize, msg: &str| {
            if n > 0 {
                let plural = if n > 1 { "s" } else { "" };
                lines.push(msg.replace("{}", &n.to_string()).replace("{s}", plural));
            }
        };
        count(self.failed, "...failed updating {} artefact{s}...");
        count(self.skipped, "...skipped {} artefact{s}...");
        count(self.updated, "...updated {} artefact{s}...");
        lines
    }
}
