//! Command-line entry point: inspecting and cleaning what builds produced.

use crate::db::Ledger;
use crate::report::ConsoleReport;
use crate::work::{Options, Scheduler};
use anyhow::anyhow;
use argh::FromArgs;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Inspect and clean the files recorded by builds.
#[derive(FromArgs)]
struct Args {
    /// chdir before running
    #[argh(option, short = 'C')]
    chdir: Option<String>,

    /// print debug logging (RUST_LOG takes precedence)
    #[argh(switch, short = 'v')]
    verbose: bool,

    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Files(Files),
    Clean(Clean),
}

/// List the files recorded for a build variant.
#[derive(FromArgs)]
#[argh(subcommand, name = "files")]
struct Files {
    /// build directory [default=.]
    #[argh(option, default = "String::from(\".\")")]
    builddir: String,

    /// build parameters identifying the variant
    #[argh(option, default = "String::new()")]
    params: String,
}

/// Remove the files recorded for a build variant.
#[derive(FromArgs)]
#[argh(subcommand, name = "clean")]
struct Clean {
    /// build directory [default=.]
    #[argh(option, default = "String::from(\".\")")]
    builddir: String,

    /// build parameters identifying the variant
    #[argh(option, default = "String::new()")]
    params: String,

    /// clean level, 0 removes nothing [default=1]
    #[argh(option, default = "1")]
    level: u32,
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

fn run_impl(args: Args) -> anyhow::Result<i32> {
    if let Some(dir) = &args.chdir {
        std::env::set_current_dir(dir).map_err(|err| anyhow!("chdir {:?}: {}", dir, err))?;
    }

    match args.command {
        Command::Files(files) => {
            let ledger = Ledger::open(&files.builddir, &files.params)?;
            for path in ledger.paths()? {
                println!("{}", path);
            }
        }
        Command::Clean(clean) => {
            let ledger = Ledger::open(&clean.builddir, &clean.params)?;
            let scheduler = Scheduler::with_report(
                Options::default(),
                Arc::new(ConsoleReport::new(args.verbose, false)),
            );
            scheduler.init(Some(ledger), false, false);
            let count = scheduler.clean(clean.level)?;
            scheduler.finish();
            if count == 0 {
                println!("kiln: nothing to clean");
            } else {
                println!("kiln: removed {} file{}", count, plural(count));
            }
        }
    }
    Ok(0)
}

pub fn run() -> anyhow::Result<i32> {
    let args: Args = argh::from_env();
    init_logging(args.verbose);
    run_impl(args)
}
