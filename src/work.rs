//! The scheduler: owns the artefact registry and drives artefacts through
//! launch, bind, fate computation and update.
//!
//! Every artefact is processed as its own future.  Fan-out over prerequisites
//! happens in `launch`, so independent subgraphs proceed concurrently, while
//! each artefact's async lock keeps two dependents reaching the same shared
//! prerequisite from doing its work twice.  Locks are only ever taken in
//! dependency direction (a node, then its prerequisites), which keeps the walk
//! free of lock cycles as long as the graph itself is acyclic.

use crate::db::Ledger;
use crate::densemap::DenseMap;
use crate::error::{DependencyError, Error, Result};
use crate::fs::{self, MTime};
use crate::graph::{Artefact, ArtefactId, Binding, Fate, Flags, Frontend, Progress};
use crate::report::{Counts, NoReport, Report, Summary};
use crate::task::{Action, Executor, Recipe, Vars};
use crate::walk::{self, Edges};
use dashmap::{DashMap, DashSet};
use futures::future::{self as fut, BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

/// Settings fixed for the lifetime of a scheduler.
#[derive(Debug, Clone)]
pub struct Options {
    /// Maximum number of recipes running at once.
    pub jobs: usize,
    /// Per-recipe limit; None waits forever.
    pub timeout: Option<Duration>,
    /// Dry run: report recipes as successful without running them.
    pub noexec: bool,
    pub keep_temps: bool,
    /// Rebuild everything, whatever the timestamps say.
    pub force: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            jobs: 1,
            timeout: None,
            noexec: false,
            keep_temps: false,
            force: false,
        }
    }
}

/// Recipes are identified by the action object and the targets it is bound to.
type RecipeKey = (usize, Vec<ArtefactId>);

pub struct Scheduler {
    nodes: RwLock<DenseMap<ArtefactId, Arc<Artefact>>>,
    names: DashMap<String, ArtefactId>,
    recipes: DashMap<RecipeKey, Arc<Recipe>>,
    executor: Executor,
    report: Arc<dyn Report>,
    counts: Counts,
    /// Boundnames of intermediates produced during this phase.
    temp_files: DashSet<String>,
    ledger: Mutex<Option<Ledger>>,
    keep_temps: AtomicBool,
    force: AtomicBool,
}

impl Scheduler {
    pub fn new(options: Options) -> Self {
        Self::with_report(options, Arc::new(NoReport))
    }

    pub fn with_report(options: Options, report: Arc<dyn Report>) -> Self {
        Scheduler {
            nodes: RwLock::new(DenseMap::default()),
            names: DashMap::new(),
            recipes: DashMap::new(),
            executor: Executor::new(options.jobs, options.timeout, options.noexec),
            report,
            counts: Counts::default(),
            temp_files: DashSet::new(),
            ledger: Mutex::new(None),
            keep_temps: AtomicBool::new(options.keep_temps),
            force: AtomicBool::new(options.force),
        }
    }

    /// Start a build phase.  Counters and the set of temp files start over;
    /// produced files get recorded in `ledger`, if given.
    pub fn init(&self, ledger: Option<Ledger>, keep_temps: bool, force: bool) {
        self.counts.reset();
        self.temp_files.clear();
        *self.ledger.lock().unwrap() = ledger;
        self.keep_temps.store(keep_temps, Ordering::Relaxed);
        self.force.store(force, Ordering::Relaxed);
        self.executor.rearm();
    }

    /// End a build phase: remove intermediates unless they are to be kept,
    /// report the summary and forget all artefacts.
    pub fn finish(&self) -> Summary {
        if !self.keep_temps.load(Ordering::Relaxed) {
            for path in self.temp_files.iter() {
                let path = Path::new(path.key());
                // symlink_metadata, so dangling links get removed too.
                if std::fs::symlink_metadata(path).is_ok() {
                    if let Err(err) = std::fs::remove_file(path) {
                        warn!("remove {}: {}", path.display(), err);
                    }
                }
            }
        }
        self.temp_files.clear();

        let summary = self.counts.summary();
        for line in summary.lines() {
            self.report.log(&line);
        }

        self.names.clear();
        self.recipes.clear();
        self.nodes.write().unwrap().clear();
        *self.ledger.lock().unwrap() = None;
        summary
    }

    /// Return all artefacts to their initial state, keeping the graph, so it
    /// can be updated again.
    pub fn reset(&self) {
        for node in self.nodes.read().unwrap().values() {
            node.state().reset();
        }
        for recipe in self.recipes.iter() {
            recipe.reset();
        }
    }

    /// Remove every file recorded for the current variant, along with
    /// directories left empty.  Returns how many files were removed.
    pub fn clean(&self, level: u32) -> Result<usize> {
        if level == 0 {
            return Ok(0);
        }
        match self.ledger.lock().unwrap().as_mut() {
            Some(ledger) => ledger.clean(),
            None => Ok(0),
        }
    }

    /// Register an artefact.  Defining a name twice yields the first id.
    pub fn define(&self, frontend: Arc<dyn Frontend>, flags: Flags) -> ArtefactId {
        let name = frontend.name().to_owned();
        *self.names.entry(name).or_insert_with(|| {
            let mut nodes = self.nodes.write().unwrap();
            let id = ArtefactId::from(nodes.len());
            nodes.push(Arc::new(Artefact::new(id, frontend, flags)))
        })
    }

    pub fn lookup(&self, name: &str) -> Option<ArtefactId> {
        self.names.get(name).map(|id| *id)
    }

    pub fn artefact(&self, id: ArtefactId) -> Arc<Artefact> {
        self.nodes.read().unwrap()[id].clone()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add_dependency(
        &self,
        id: ArtefactId,
        prereqs: &[ArtefactId],
    ) -> std::result::Result<(), DependencyError> {
        for &p in prereqs {
            self.add_prerequisite(id, p)?;
        }
        Ok(())
    }

    /// Add the edge `id -> prereq`.  Fails if `id` is already bound or if the
    /// edge would close a cycle; either way the graph stays as it was.
    /// Between the start of `id`'s launch and its binding, the new
    /// prerequisite is queued and processed before `id` is bound.
    pub fn add_prerequisite(
        &self,
        id: ArtefactId,
        prereq: ArtefactId,
    ) -> std::result::Result<(), DependencyError> {
        let node = self.artefact(id);
        let frozen = || DependencyError::Frozen {
            artefact: node.path(),
            prerequisite: self.artefact(prereq).name().to_owned(),
        };
        {
            let state = node.state();
            if state.progress >= Progress::Bound {
                drop(state);
                return Err(frozen());
            }
            if state.prerequisites.contains(&prereq) {
                return Ok(());
            }
        }
        if walk::closes_cycle(self, id, prereq) {
            return Err(DependencyError::Cycle {
                artefact: node.name().to_owned(),
                prerequisite: self.artefact(prereq).name().to_owned(),
            });
        }
        let mut state = node.state();
        if state.progress >= Progress::Bound {
            drop(state);
            return Err(frozen());
        }
        if state.prerequisites.contains(&prereq) {
            return Ok(());
        }
        // A closed queue means processing of this node was abandoned, so
        // nothing would pick the edge up.
        let queued = match &state.pqueue {
            Some(queue) => queue.send(prereq).is_ok(),
            None => true,
        };
        if !queued {
            drop(state);
            return Err(frozen());
        }
        state.prerequisites.push(prereq);
        Ok(())
    }

    /// Bind `action` to `targets` and `sources`.  Declaring the same action
    /// for the same targets again returns the recipe made the first time.
    pub fn define_recipe(
        &self,
        action: &Arc<Action>,
        targets: &[ArtefactId],
        sources: &[ArtefactId],
    ) -> Arc<Recipe> {
        let key = (Arc::as_ptr(action) as usize, targets.to_vec());
        let recipe = self
            .recipes
            .entry(key)
            .or_insert_with(|| {
                Arc::new(Recipe::new(
                    action.clone(),
                    targets.to_vec(),
                    sources.to_vec(),
                ))
            })
            .clone();
        for &target in targets {
            self.artefact(target).state().recipe = Some(recipe.clone());
        }
        recipe
    }

    /// Make every target depend on every source, and bind the recipe.
    pub fn rule(
        &self,
        action: &Arc<Action>,
        targets: &[ArtefactId],
        sources: &[ArtefactId],
    ) -> std::result::Result<Arc<Recipe>, DependencyError> {
        for &target in targets {
            self.add_dependency(target, sources)?;
        }
        Ok(self.define_recipe(action, targets, sources))
    }

    /// Bring `goals` up to date, running on the current runtime.  Returns
    /// whether all of them succeeded.  A dependency error aborts everything
    /// still in flight.
    pub async fn build(&self, goals: &[ArtefactId]) -> Result<bool> {
        let result = fut::try_join_all(goals.iter().map(|&goal| self.process(goal, None))).await;
        if let Err(err) = result {
            error!("update aborted: {}", err);
            self.executor.abort();
            return Err(err);
        }
        Ok(goals.iter().all(|&goal| self.status(goal) == Some(true)))
    }

    /// Like `build`, on a runtime of its own.
    pub fn update(&self, goals: &[ArtefactId]) -> Result<bool> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(Error::Runtime)?;
        runtime.block_on(self.build(goals))
    }

    fn process(&self, id: ArtefactId, parent: Option<ArtefactId>) -> BoxFuture<'_, Result<()>> {
        async move {
            let node = self.artefact(id);
            self.launch(&node).await?;
            // All prerequisites are bound now; non-temps are even updated.
            self.bind(&node, parent).await?;
            // A temp's fate depends on its parent, which computes it once
            // bound itself.
            if !node.is_temp() || parent.is_none() {
                self.compute_fate(&node, parent).await?;
                self.update_node(&node).await?;
            }
            Ok(())
        }
        .boxed()
    }

    /// Process all prerequisites concurrently, including any added while
    /// this is running.
    async fn launch(&self, node: &Artefact) -> Result<()> {
        let _lock = node.lock.lock().await;
        let mut queue = {
            let mut state = node.state();
            if state.progress >= Progress::Launched {
                return Ok(());
            }
            let (tx, rx) = mpsc::unbounded_channel();
            for &p in &state.prerequisites {
                let _ = tx.send(p);
            }
            state.pqueue = Some(tx);
            rx
        };
        debug!(artefact = node.name(), "launching");

        let mut pending = FuturesUnordered::new();
        loop {
            while let Ok(p) = queue.try_recv() {
                pending.push(self.process(p, Some(node.id)));
            }
            match pending.next().await {
                Some(result) => result?,
                None => break,
            }
        }
        // The queue stays open: whatever arrives from here on is bind's.
        {
            let mut state = node.state();
            state.backlog = Some(queue);
            state.progress = Progress::Launched;
        }
        debug!(artefact = node.name(), "launched");
        Ok(())
    }

    /// Take the prerequisites added since `launch` finished.  If there are
    /// none, close the queue and freeze the node with `resolved`, all under one
    /// state lock so no edge can slip in between.
    fn freeze_or_take_late(
        &self,
        node: &Artefact,
        resolved: &mut Option<(String, Binding, MTime)>,
    ) -> Vec<ArtefactId> {
        let mut state = node.state();
        let mut late = Vec::new();
        if let Some(queue) = state.backlog.as_mut() {
            while let Ok(p) = queue.try_recv() {
                late.push(p);
            }
        }
        if late.is_empty() {
            if let Some((boundname, binding, mtime)) = resolved.take() {
                state.pqueue = None;
                state.backlog = None;
                state.boundname = Some(boundname);
                state.binding = binding;
                state.mtime = mtime;
                state.progress = Progress::Bound;
            }
        }
        late
    }

    /// Resolve the node's file and timestamp.
    async fn bind(&self, node: &Artefact, parent: Option<ArtefactId>) -> Result<()> {
        let _lock = node.lock.lock().await;
        let bound = node.state().progress >= Progress::Bound;
        if bound {
            return Ok(());
        }
        if let Err(err) = node.frontend.eval_features(false) {
            error!(artefact = node.name(), "binding failed: {:#}", err);
            return Err(err.context(format!("binding {}", node.name())).into());
        }
        let boundname = node.frontend.boundname();
        let (mut binding, mtime) = if node.is_file() {
            let path = Path::new(&boundname);
            let bind_err = |source| Error::Bind {
                name: node.name().to_owned(),
                source,
            };
            fs::ensure_parent_dir(path).await.map_err(bind_err)?;
            let mtime = fs::stat(path).await.map_err(bind_err)?;
            let binding = if mtime.exists() {
                Binding::Exists
            } else {
                Binding::Missing
            };
            (binding, mtime)
        } else {
            (Binding::Unbound, MTime::Missing)
        };

        // A missing temp whose parent is there needn't be rebuilt just
        // because it's missing.
        if let Some(parent) = parent {
            if node.is_temp() && binding == Binding::Missing && self.binding(parent) != Binding::Missing {
                binding = Binding::Parents;
            }
        }

        debug!(artefact = node.name(), path = %boundname, ?binding, ?mtime, "bound");
        let mut resolved = Some((boundname, binding, mtime));
        loop {
            let late = self.freeze_or_take_late(node, &mut resolved);
            if late.is_empty() {
                break;
            }
            debug!(artefact = node.name(), count = late.len(), "late prerequisites");
            fut::try_join_all(late.into_iter().map(|p| self.process(p, Some(node.id)))).await?;
        }
        Ok(())
    }

    fn compute_fate<'a>(
        &'a self,
        node: &'a Artefact,
        parent: Option<ArtefactId>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let _lock = node.lock.lock().await;
            let prereqs = {
                let mut state = node.state();
                if state.fate != Fate::Init {
                    return Ok(());
                }
                state.fate = Fate::Making;
                state.prerequisites.clone()
            };
            for &p in &prereqs {
                let prereq = self.artefact(p);
                self.compute_fate(&prereq, Some(node.id)).await?;
            }

            let mut fate = Fate::Stable;
            let mut last = MTime::Missing;
            for &p in &prereqs {
                let prereq = self.artefact(p);
                if prereq.flags.contains(Flags::NOPROPAGATE) {
                    continue;
                }
                last = last.max(self.effective_timestamp(&prereq));
                let pfate = self.effective_fate(&prereq);
                if fate < pfate {
                    trace!(artefact = node.name(), from = ?fate, to = ?pfate, "fate raised by {}", prereq.name());
                    fate = pfate;
                }
            }

            let (binding, mtime, has_recipe) = {
                let state = node.state();
                (state.binding, state.mtime, state.recipe.is_some())
            };
            if node.is_temp() && prereqs.is_empty() && binding != Binding::Exists {
                fate = Fate::Missing;
            }
            let newer_than_parent = |last: MTime| match parent {
                Some(parent) => last > self.timestamp(parent),
                None => false,
            };
            fate = if node.flags.contains(Flags::NOUPDATE) {
                Fate::Stable
            } else if fate >= Fate::Broken {
                // Can't find or make a prerequisite, so can't make this.
                Fate::CantMake
            } else if fate >= Fate::Spoil {
                Fate::Update
            } else if binding == Binding::Missing {
                Fate::Missing
            } else if binding == Binding::Exists && last > mtime {
                Fate::Outdated
            } else if binding == Binding::Parents && newer_than_parent(last) {
                Fate::NeedTmp
            } else if node.flags.contains(Flags::TOUCHED) || self.force.load(Ordering::Relaxed) {
                Fate::Touched
            } else {
                fate
            };
            if fate == Fate::Missing && !has_recipe && prereqs.is_empty() {
                fate = if node.flags.contains(Flags::NOCARE) {
                    Fate::Stable
                } else {
                    Fate::CantFind
                };
            }

            node.state().fate = fate;
            debug!(artefact = node.name(), ?fate, "fate");
            Ok(())
        }
        .boxed()
    }

    fn update_node<'a>(&'a self, node: &'a Artefact) -> BoxFuture<'a, Result<()>> {
        async move {
            let _lock = node.lock.lock().await;
            let (fate, prereqs, recipe) = {
                let state = node.state();
                if state.progress == Progress::Done {
                    return Ok(());
                }
                (state.fate, state.prerequisites.clone(), state.recipe.clone())
            };
            let prereqs: Vec<Arc<Artefact>> = prereqs.iter().map(|&p| self.artefact(p)).collect();

            let mut failed = None;
            if fate != Fate::Stable {
                // Intermediates only get here through their dependents.
                let temps: Vec<&Arc<Artefact>> = prereqs
                    .iter()
                    .filter(|p| p.is_temp() && p.state().fate != Fate::Stable)
                    .collect();
                fut::try_join_all(temps.into_iter().map(|p| self.update_node(p))).await?;
                failed = prereqs
                    .iter()
                    .find(|p| {
                        self.effective_fate(p) != Fate::Stable
                            && p.state().status != Some(true)
                            && !p.flags.contains(Flags::NOCARE)
                    })
                    .cloned();
            }

            let name = node.path();
            let status = if let Some(blocker) = &failed {
                self.report
                    .log(&format!("...skipped {} for lack of {}...", name, blocker.path()));
                self.counts.skipped();
                Some(false)
            } else if fate == Fate::Stable || fate == Fate::Newer {
                Some(true)
            } else if fate >= Fate::CantFind {
                if fate == Fate::CantFind {
                    self.report.log(&format!("don't know how to make {}", name));
                }
                Some(false)
            } else if fate == Fate::IsTmp {
                self.report.log(&format!("...using {}...", name));
                Some(true)
            } else if fate >= Fate::Touched {
                match recipe {
                    Some(recipe) => {
                        node.state().progress = Progress::Running;
                        debug!(artefact = node.name(), "running");
                        let status = self.run_recipe(&recipe).await?;
                        if node.is_temp() {
                            self.temp_files.insert(name.clone());
                        } else if node.is_file() {
                            self.record(&name);
                        }
                        self.counts.updated(status);
                        Some(status)
                    }
                    // An alias.
                    None => Some(true),
                }
            } else {
                None
            };

            {
                let mut state = node.state();
                state.status = status;
                state.progress = Progress::Done;
            }
            debug!(artefact = node.name(), ?status, "done");
            let success = status == Some(true);
            node.frontend
                .report_status(success, failed.as_ref().map(|b| b.name()));
            self.report
                .artefact_done(node.id, success, failed.as_ref().map(|b| b.id));
            Ok(())
        }
        .boxed()
    }

    /// Run a recipe, or return its status if another of its targets already
    /// ran it.
    async fn run_recipe(&self, recipe: &Recipe) -> Result<bool> {
        let _lock = recipe.run_lock.lock().await;
        if let Some(status) = recipe.status() {
            return Ok(status);
        }
        if let Some(&first) = recipe.targets.first() {
            let target = self.artefact(first);
            if let Err(err) = target.frontend.eval_features(true) {
                return Err(err.context(format!("updating {}", target.name())).into());
            }
        }
        let vars = self.recipe_variables(recipe);
        let outcome = self.executor.execute(self, recipe, &vars).await?;
        let paths: Vec<String> = recipe.targets.iter().map(|&t| self.path(t)).collect();
        self.report
            .task_finished(&recipe.action.name, &recipe.targets, &paths, &outcome);
        let success = outcome.success;
        recipe.set_outcome(outcome);
        Ok(success)
    }

    fn recipe_variables(&self, recipe: &Recipe) -> Vars {
        let mut vars = recipe.action.vars.clone();
        if let Some(&first) = recipe.targets.first() {
            vars.extend(self.artefact(first).frontend.variables());
        }
        vars
    }

    fn record(&self, path: &str) {
        if let Some(ledger) = self.ledger.lock().unwrap().as_mut() {
            if let Err(err) = ledger.record(path) {
                warn!("not recording {}: {}", path, err);
            }
        }
    }

    /// A temp reports the worst fate among its prerequisites.
    fn effective_fate(&self, node: &Artefact) -> Fate {
        let (fate, binding, prereqs) = {
            let state = node.state();
            (state.fate, state.binding, state.prerequisites.clone())
        };
        if !node.is_temp() {
            return fate;
        }
        if prereqs.is_empty() {
            return if binding == Binding::Exists {
                fate
            } else {
                Fate::Missing
            };
        }
        prereqs
            .iter()
            .map(|&p| self.effective_fate(&self.artefact(p)))
            .max()
            .unwrap_or(Fate::Init)
    }

    /// The file's own time if it exists; for an absent temp, the most recent
    /// time among its prerequisites.
    fn effective_timestamp(&self, node: &Artefact) -> MTime {
        let (binding, mtime, prereqs) = {
            let state = node.state();
            (state.binding, state.mtime, state.prerequisites.clone())
        };
        if binding == Binding::Exists {
            mtime
        } else if node.is_temp() {
            prereqs
                .iter()
                .map(|&p| self.effective_timestamp(&self.artefact(p)))
                .max()
                .unwrap_or(MTime::Missing)
        } else {
            MTime::Missing
        }
    }

    /// The variables a command for `id` is expanded with.
    pub fn variables(&self, id: ArtefactId) -> Vars {
        let recipe = self.artefact(id).state().recipe.clone();
        match recipe {
            Some(recipe) => self.recipe_variables(&recipe),
            None => Vars::new(),
        }
    }

    pub fn prerequisites(&self, id: ArtefactId) -> Vec<ArtefactId> {
        self.artefact(id).prerequisites()
    }

    pub fn path(&self, id: ArtefactId) -> String {
        self.artefact(id).path()
    }

    pub fn boundname(&self, id: ArtefactId) -> Option<String> {
        self.artefact(id).state().boundname.clone()
    }

    pub fn binding(&self, id: ArtefactId) -> Binding {
        self.artefact(id).state().binding
    }

    /// The fate as dependents see it.
    pub fn fate(&self, id: ArtefactId) -> Fate {
        self.effective_fate(&self.artefact(id))
    }

    pub fn timestamp(&self, id: ArtefactId) -> MTime {
        self.effective_timestamp(&self.artefact(id))
    }

    pub fn progress(&self, id: ArtefactId) -> Progress {
        self.artefact(id).state().progress
    }

    pub fn status(&self, id: ArtefactId) -> Option<bool> {
        self.artefact(id).state().status
    }

    /// Status of the recipe bound to `id`; None if there is none or it
    /// didn't run.
    pub fn recipe_status(&self, id: ArtefactId) -> Option<bool> {
        let recipe = self.artefact(id).state().recipe.clone();
        recipe.and_then(|r| r.status())
    }

    pub fn summary(&self) -> Summary {
        self.counts.summary()
    }
}

impl Edges for Scheduler {
    fn prerequisites(&self, id: ArtefactId) -> Vec<ArtefactId> {
        Scheduler::prerequisites(self, id)
    }

    fn label(&self, id: ArtefactId) -> String {
        self.artefact(id).name().to_owned()
    }

    fn is_file(&self, id: ArtefactId) -> bool {
        self.artefact(id).is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Plain;

    fn notfile(sched: &Scheduler, name: &str) -> ArtefactId {
        sched.define(Plain::new(name), Flags::NOTFILE)
    }

    #[test]
    fn define_is_idempotent() {
        let sched = Scheduler::new(Options::default());
        let a = notfile(&sched, "a");
        assert_eq!(notfile(&sched, "a"), a);
        assert_eq!(sched.lookup("a"), Some(a));
        assert_eq!(sched.lookup("b"), None);
        assert_eq!(sched.len(), 1);
    }

    #[test]
    fn cycle_leaves_graph_unchanged() {
        let sched = Scheduler::new(Options::default());
        let a = notfile(&sched, "a");
        let b = notfile(&sched, "b");
        let c = notfile(&sched, "c");
        sched.add_dependency(c, &[b]).unwrap();
        sched.add_dependency(b, &[a]).unwrap();
        let err = sched.add_prerequisite(a, c).unwrap_err();
        assert!(matches!(err, DependencyError::Cycle { .. }));
        assert!(sched.prerequisites(a).is_empty());
        assert!(matches!(
            sched.add_prerequisite(a, a),
            Err(DependencyError::Cycle { .. })
        ));
        // Adding an existing edge again is fine.
        sched.add_prerequisite(c, b).unwrap();
        assert_eq!(sched.prerequisites(c), [b]);
    }

    #[test]
    fn recipes_are_shared() {
        let sched = Scheduler::new(Options::default());
        let a = notfile(&sched, "a");
        let b = notfile(&sched, "b");
        let action = Action::shell("echo", "echo $(<)");
        let first = sched.define_recipe(&action, &[a, b], &[]);
        let second = sched.define_recipe(&action, &[a, b], &[]);
        assert!(Arc::ptr_eq(&first, &second));
        let other = sched.define_recipe(&Action::shell("echo", "echo $(<)"), &[a, b], &[]);
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[test]
    fn variables_merge_action_and_frontend() {
        struct WithVars;
        impl Frontend for WithVars {
            fn name(&self) -> &str {
                "lib"
            }
            fn variables(&self) -> Vars {
                [("cflags".to_string(), vec!["-O2".to_string()])]
                    .into_iter()
                    .collect()
            }
        }
        let sched = Scheduler::new(Options::default());
        let lib = sched.define(Arc::new(WithVars), Flags::NOTFILE);
        assert!(sched.variables(lib).is_empty());
        let action = Action::with_vars(
            "cc",
            "cc $(cflags) $(ldflags)",
            [
                ("cflags".to_string(), vec!["-O0".to_string()]),
                ("ldflags".to_string(), vec!["-lm".to_string()]),
            ],
        );
        sched.define_recipe(&action, &[lib], &[]);
        let vars = sched.variables(lib);
        assert_eq!(vars.get("cflags"), Some(&vec!["-O2".to_string()]));
        assert_eq!(vars.get("ldflags"), Some(&vec!["-lm".to_string()]));
    }

    #[tokio::test]
    async fn frozen_after_bind() -> anyhow::Result<()> {
        let sched = Scheduler::new(Options::default());
        let a = notfile(&sched, "a");
        let b = notfile(&sched, "b");
        assert!(sched.build(&[a]).await?);
        assert_eq!(sched.progress(a), Progress::Done);
        assert!(matches!(
            sched.add_prerequisite(a, b),
            Err(DependencyError::Frozen { .. })
        ));
        assert!(sched.prerequisites(a).is_empty());
        Ok(())
    }
}
