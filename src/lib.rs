pub mod db;
mod densemap;
pub mod error;
pub mod eval;
pub mod fs;
pub mod graph;
mod process;
pub mod report;
pub mod run;
pub mod smallmap;
pub mod task;
pub mod walk;
pub mod work;

pub use db::Ledger;
pub use error::{DependencyError, Error, Result};
pub use graph::{ArtefactId, Binding, Fate, Flags, Frontend, Plain, Progress};
pub use report::{ConsoleReport, NoReport, Report, Summary};
pub use task::{Action, Call, CallError, Outcome, Recipe};
pub use work::{Options, Scheduler};

#[cfg(not(any(windows, target_arch = "wasm32")))]
use jemallocator::Jemalloc;

#[cfg(not(any(windows, target_arch = "wasm32")))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;
