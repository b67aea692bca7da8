//! Error types shared across the scheduler.
//!
//! Only structural problems are errors.  A recipe that fails is not an error,
//! it is an [`crate::task::Outcome`] with `success == false`.

use std::path::PathBuf;
use thiserror::Error;

/// A change to the dependency graph that can't be honored.
/// These are fatal: an update that runs into one is aborted.
#[derive(Debug, Error)]
pub enum DependencyError {
    /// The artefact is already bound, so its prerequisite set is frozen.
    #[error("can not add {prerequisite}: {artefact} already bound")]
    Frozen {
        artefact: String,
        prerequisite: String,
    },
    /// The edge would make the artefact reachable from itself.
    #[error("dependency cycle detected while adding {artefact} -> {prerequisite}")]
    Cycle {
        artefact: String,
        prerequisite: String,
    },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Dependency(#[from] DependencyError),

    /// Resolving an artefact's file failed for a reason other than absence.
    #[error("bind {name}: {source}")]
    Bind {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// A frontend hook reported a problem.
    #[error(transparent)]
    Frontend(#[from] anyhow::Error),

    #[error("starting runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("ledger {}: {source}", path.display())]
    Ledger {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn is_dependency(&self) -> bool {
        matches!(self, Error::Dependency(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
