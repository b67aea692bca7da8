//! The artefact graph: nodes for buildable entities, linked to their
//! prerequisites and to the recipe that regenerates them.

use crate::densemap;
use crate::fs::MTime;
use crate::smallmap::SmallMap;
use crate::task::Recipe;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Handle of an artefact, valid for the lifetime of one build phase.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ArtefactId(u32);
impl densemap::Index for ArtefactId {
    fn index(&self) -> usize {
        self.0 as usize
    }
}
impl From<usize> for ArtefactId {
    fn from(u: usize) -> ArtefactId {
        ArtefactId(u as u32)
    }
}

bitflags::bitflags! {
    /// Attributes of an artefact, fixed when it is defined.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct Flags: u32 {
        /// Intermediate artefact, removed after the build unless kept.
        const TEMP = 1 << 0;
        /// Failing to produce it doesn't block dependents.
        const NOCARE = 1 << 1;
        /// Not backed by a file.
        const NOTFILE = 1 << 2;
        /// Always rebuild.
        const TOUCHED = 1 << 3;
        /// Never rebuild, whatever its prerequisites say.
        const NOUPDATE = 1 << 4;
        /// Its fate and timestamp don't make dependents stale.
        const NOPROPAGATE = 1 << 5;
    }
}

/// Outcome of resolving an artefact's backing file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Binding {
    Unbound,
    Missing,
    /// A missing TEMP whose dependent exists; the temp counts as usable.
    Parents,
    Exists,
}

/// Staleness verdict, ordered by severity.  Dependents take the worst fate of
/// their prerequisites, so the order matters more than the individual values;
/// several are never assigned and exist only as thresholds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Fate {
    Init,
    Making,
    Stable,
    Newer,
    Spoil,
    IsTmp,
    Build,
    Touched,
    Rebuild,
    Missing,
    NeedTmp,
    Outdated,
    Update,
    Broken,
    CantFind,
    CantMake,
}

/// How far an artefact has gotten through processing.  Only moves forward
/// (until an explicit reset).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Progress {
    Init,
    Launched,
    Bound,
    Running,
    Done,
}

/// The narrow view the scheduler needs of whatever object describes an
/// artefact in the layer that constructs the graph.
pub trait Frontend: Send + Sync {
    fn name(&self) -> &str;

    /// The path backing this artefact.  Only consulted after
    /// `eval_features(false)`.
    fn boundname(&self) -> String {
        self.name().to_owned()
    }

    /// Evaluate any conditional settings before variables or the boundname
    /// are used.  Must not block indefinitely.
    fn eval_features(&self, _update: bool) -> anyhow::Result<()> {
        Ok(())
    }

    /// Extra variables for command templates of recipes targeting this.
    fn variables(&self) -> SmallMap<String, Vec<String>> {
        SmallMap::new()
    }

    /// Called once processing finishes, with the name of the prerequisite
    /// that blocked it, if any.
    fn report_status(&self, _status: bool, _blocker: Option<&str>) {}
}

/// A frontend that is nothing but a name and a path.
#[derive(Debug, Clone)]
pub struct Plain {
    name: String,
    path: String,
}

impl Plain {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        Arc::new(Plain {
            path: name.clone(),
            name,
        })
    }

    pub fn at(name: impl Into<String>, path: impl Into<String>) -> Arc<Self> {
        Arc::new(Plain {
            name: name.into(),
            path: path.into(),
        })
    }
}

impl Frontend for Plain {
    fn name(&self) -> &str {
        &self.name
    }

    fn boundname(&self) -> String {
        self.path.clone()
    }
}

/// Mutable part of a node.  Guarded by a plain mutex which is only ever held
/// for short, non-suspending sections; the async `Artefact::lock` serializes
/// the processing phases.
pub(crate) struct NodeState {
    pub prerequisites: Vec<ArtefactId>,
    pub recipe: Option<Arc<Recipe>>,
    pub boundname: Option<String>,
    pub binding: Binding,
    pub mtime: MTime,
    pub fate: Fate,
    pub progress: Progress,
    pub status: Option<bool>,
    /// Set from the start of `launch` until the node is bound, so edges
    /// added in the meantime get processed too.
    pub pqueue: Option<mpsc::UnboundedSender<ArtefactId>>,
    /// The receiving end of `pqueue` once `launch` is through; `bind`
    /// drains it before freezing the node.
    pub backlog: Option<mpsc::UnboundedReceiver<ArtefactId>>,
}

impl NodeState {
    fn new() -> Self {
        NodeState {
            prerequisites: Vec::new(),
            recipe: None,
            boundname: None,
            binding: Binding::Unbound,
            mtime: MTime::Missing,
            fate: Fate::Init,
            progress: Progress::Init,
            status: None,
            pqueue: None,
            backlog: None,
        }
    }

    /// Forget everything learned while processing, keeping the edges.
    pub fn reset(&mut self) {
        self.boundname = None;
        self.binding = Binding::Unbound;
        self.mtime = MTime::Missing;
        self.fate = Fate::Init;
        self.progress = Progress::Init;
        self.status = None;
        self.pqueue = None;
        self.backlog = None;
    }
}

pub struct Artefact {
    pub id: ArtefactId,
    pub flags: Flags,
    pub frontend: Arc<dyn Frontend>,
    /// Held across each processing phase (launch, bind, fate, update).
    pub(crate) lock: tokio::sync::Mutex<()>,
    state: Mutex<NodeState>,
}

impl Artefact {
    pub(crate) fn new(id: ArtefactId, frontend: Arc<dyn Frontend>, flags: Flags) -> Self {
        Artefact {
            id,
            flags,
            frontend,
            lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(NodeState::new()),
        }
    }

    pub fn name(&self) -> &str {
        self.frontend.name()
    }

    pub fn is_file(&self) -> bool {
        !self.flags.contains(Flags::NOTFILE)
    }

    pub fn is_temp(&self) -> bool {
        self.flags.contains(Flags::TEMP)
    }

    pub(crate) fn state(&self) -> MutexGuard<NodeState> {
        self.state.lock().unwrap()
    }

    pub fn prerequisites(&self) -> Vec<ArtefactId> {
        self.state().prerequisites.clone()
    }

    /// The bound path, or the frontend's idea of it before binding.
    pub fn path(&self) -> String {
        let bound = self.state().boundname.clone();
        bound.unwrap_or_else(|| self.frontend.boundname())
    }
}

impl std::fmt::Debug for Artefact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artefact")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fate_severity() {
        assert!(Fate::Init < Fate::Stable);
        assert!(Fate::Stable < Fate::Spoil);
        assert!(Fate::Touched < Fate::Missing);
        assert!(Fate::Missing < Fate::Outdated);
        assert!(Fate::Update < Fate::Broken);
        assert!(Fate::CantFind < Fate::CantMake);
        assert_eq!(
            [Fate::Outdated, Fate::Stable, Fate::Missing].into_iter().max(),
            Some(Fate::Outdated)
        );
    }

    #[test]
    fn progress_is_ordered() {
        assert!(Progress::Launched < Progress::Bound);
        assert!(Progress::Bound < Progress::Running);
        assert!(Progress::Running < Progress::Done);
    }

    #[test]
    fn plain_frontend() {
        let a = Plain::new("out/a.o");
        assert_eq!(a.name(), "out/a.o");
        assert_eq!(a.boundname(), "out/a.o");
        let b = Plain::at("lib", "out/libfoo.a");
        assert_eq!(b.boundname(), "out/libfoo.a");
        assert!(b.variables().is_empty());
    }
}
