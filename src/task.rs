//! Runs recipes: either a shell command or an in-process callback, under a
//! global job limit and a per-invocation timeout.
//! Unaware of fates and progress; just execution and its outcome.

use crate::error::{DependencyError, Error};
use crate::eval::{self, EvalString};
use crate::graph::ArtefactId;
use crate::process::{self, Termination};
use crate::smallmap::SmallMap;
use crate::work::Scheduler;
use std::borrow::Cow;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::runtime::RuntimeFlavor;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error};

/// Variables available to command templates, by name.
pub type Vars = SmallMap<String, Vec<String>>;

/// Ways a callback can fail other than returning `Ok(false)`.
#[derive(Debug, Error)]
pub enum CallError {
    /// The callback ran a command that failed; `cmd` is what gets reported.
    #[error("call failed: {cmd}")]
    Failed { cmd: String },
    /// Structural problem in the graph.  Not a recipe failure: aborts the
    /// whole update.
    #[error(transparent)]
    Dependency(#[from] DependencyError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// What a callback gets to work with.
pub struct Call<'a> {
    pub scheduler: &'a Scheduler,
    pub targets: &'a [ArtefactId],
    pub sources: &'a [ArtefactId],
    pub vars: &'a Vars,
    /// Captured as the recipe's output.
    pub stdout: String,
    pub stderr: String,
}

impl<'a> Call<'a> {
    pub fn target_paths(&self) -> Vec<String> {
        self.targets.iter().map(|&id| self.scheduler.path(id)).collect()
    }

    pub fn source_paths(&self) -> Vec<String> {
        self.sources.iter().map(|&id| self.scheduler.path(id)).collect()
    }
}

pub type Callback = Arc<dyn Fn(&mut Call) -> Result<bool, CallError> + Send + Sync>;

pub enum Command {
    /// A command line template, see `eval`.
    Shell(String),
    Callback(Callback),
}

/// A named unit of work that recipes bind to targets and sources.
pub struct Action {
    pub name: String,
    pub command: Command,
    pub vars: Vars,
    /// Run even in noexec (dry-run) mode.
    pub run_in_noexec: bool,
}

impl Action {
    pub fn shell(name: impl Into<String>, cmdline: impl Into<String>) -> Arc<Action> {
        Arc::new(Action {
            name: name.into(),
            command: Command::Shell(cmdline.into()),
            vars: Vars::new(),
            run_in_noexec: false,
        })
    }

    /// An action running `f` in-process.  `f` runs synchronously, holding a
    /// job slot, and isn't subject to the timeout; it should be short.
    pub fn callback<F>(name: impl Into<String>, f: F) -> Arc<Action>
    where
        F: Fn(&mut Call) -> Result<bool, CallError> + Send + Sync + 'static,
    {
        Arc::new(Action {
            name: name.into(),
            command: Command::Callback(Arc::new(f)),
            vars: Vars::new(),
            run_in_noexec: false,
        })
    }

    /// Like `shell`, with extra template variables.
    pub fn with_vars(
        name: impl Into<String>,
        cmdline: impl Into<String>,
        vars: impl IntoIterator<Item = (String, Vec<String>)>,
    ) -> Arc<Action> {
        Arc::new(Action {
            name: name.into(),
            command: Command::Shell(cmdline.into()),
            vars: vars.into_iter().collect(),
            run_in_noexec: false,
        })
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let command = match &self.command {
            Command::Shell(cmdline) => cmdline.as_str(),
            Command::Callback(_) => "<callback>",
        };
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("command", &command)
            .finish()
    }
}

/// The result of executing a recipe.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub success: bool,
    /// The command line as run, or a rendering of the callback invocation.
    pub command: String,
    /// None if the action didn't actually run.
    pub elapsed: Option<Duration>,
    pub stdout: String,
    pub stderr: String,
}

/// One action bound to its targets and sources.  Runs at most once per build
/// phase, however many of its targets ask for it.
#[derive(Debug)]
pub struct Recipe {
    pub action: Arc<Action>,
    pub targets: Vec<ArtefactId>,
    pub sources: Vec<ArtefactId>,
    /// Serializes the targets racing to run this recipe.
    pub(crate) run_lock: tokio::sync::Mutex<()>,
    outcome: Mutex<Option<Outcome>>,
}

impl Recipe {
    pub(crate) fn new(
        action: Arc<Action>,
        targets: Vec<ArtefactId>,
        sources: Vec<ArtefactId>,
    ) -> Self {
        Recipe {
            action,
            targets,
            sources,
            run_lock: tokio::sync::Mutex::new(()),
            outcome: Mutex::new(None),
        }
    }

    /// None until the recipe ran.
    pub fn status(&self) -> Option<bool> {
        self.outcome.lock().unwrap().as_ref().map(|o| o.success)
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome.lock().unwrap().clone()
    }

    pub(crate) fn set_outcome(&self, outcome: Outcome) {
        *self.outcome.lock().unwrap() = Some(outcome);
    }

    pub(crate) fn reset(&self) {
        *self.outcome.lock().unwrap() = None;
    }
}

/// Lookup environment for the magic target/source variables.
struct RecipeEnv<'a> {
    targets: &'a [String],
    sources: &'a [String],
    vars: &'a Vars,
}

impl<'a> RecipeEnv<'a> {
    fn list(&self, name: &str) -> Option<&'a [String]> {
        match name {
            "<" => Some(self.targets),
            ">" => Some(self.sources),
            _ => None,
        }
    }

    /// Describe the first indexed reference that points past its list.
    fn check(&self, template: &EvalString<&str>) -> Option<String> {
        template.var_refs().find_map(|var| {
            let (list, index) = eval::parse_indexed(var)?;
            let items = self.list(list)?;
            if index < items.len() {
                None
            } else {
                Some(format!("$({}) out of range, only {} given", var, items.len()))
            }
        })
    }
}

impl<'a> eval::Env for RecipeEnv<'a> {
    fn get_var(&self, var: &str) -> Option<Cow<str>> {
        if let Some(items) = self.list(var) {
            return Some(Cow::Owned(items.join(" ")));
        }
        if let Some((list, index)) = eval::parse_indexed(var) {
            return self
                .list(list)?
                .get(index)
                .map(|item| Cow::Borrowed(item.as_str()));
        }
        self.vars.get(var).map(|vals| Cow::Owned(vals.join(" ")))
    }
}

/// Render a callback invocation for reporting, e.g. `touch('a', 'b.c')`.
fn callback_string(name: &str, targets: &[String], sources: &[String], vars: &Vars) -> String {
    let mut args = Vec::new();
    match targets {
        [] => {}
        [one] => args.push(format!("{:?}", one)),
        many => args.push(format!("{:?}", many)),
    }
    match sources {
        [] => {}
        [one] => args.push(format!("{:?}", one)),
        many => args.push(format!("{:?}", many)),
    }
    if !vars.is_empty() {
        let kwds: Vec<String> = vars.iter().map(|(k, v)| format!("{}={:?}", k, v)).collect();
        args.push(kwds.join(", "));
    }
    format!("{}({})", name, args.join(", ")).replace('"', "'")
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "callback panicked".to_owned()
    }
}

/// Executes recipes, holding one job slot per invocation.
pub struct Executor {
    jobs: Semaphore,
    timeout: Option<Duration>,
    noexec: bool,
    abort: watch::Sender<bool>,
}

impl Executor {
    pub fn new(jobs: usize, timeout: Option<Duration>, noexec: bool) -> Self {
        Executor {
            jobs: Semaphore::new(jobs.max(1)),
            timeout,
            noexec,
            abort: watch::channel(false).0,
        }
    }

    /// Stop starting work, and kill what's running.
    pub fn abort(&self) {
        self.abort.send_replace(true);
    }

    pub fn rearm(&self) {
        self.abort.send_replace(false);
    }

    pub fn is_aborted(&self) -> bool {
        *self.abort.borrow()
    }

    /// Run `recipe`.  Only fatal graph problems are errors; everything else
    /// ends up in the returned outcome.
    pub async fn execute(
        &self,
        scheduler: &Scheduler,
        recipe: &Recipe,
        vars: &Vars,
    ) -> Result<Outcome, Error> {
        let targets: Vec<String> = recipe.targets.iter().map(|&t| scheduler.path(t)).collect();
        let sources: Vec<String> = recipe.sources.iter().map(|&s| scheduler.path(s)).collect();
        match &recipe.action.command {
            Command::Shell(template) => Ok(self.run_shell(template, &targets, &sources, vars).await),
            Command::Callback(f) => {
                self.run_callback(scheduler, recipe, f, &targets, &sources, vars)
                    .await
            }
        }
    }

    async fn run_shell(
        &self,
        template: &str,
        targets: &[String],
        sources: &[String],
        vars: &Vars,
    ) -> Outcome {
        let env = RecipeEnv {
            targets,
            sources,
            vars,
        };
        let raw = template;
        let template = EvalString::new(template);
        if let Some(problem) = env.check(&template) {
            return Outcome {
                success: false,
                command: raw.to_owned(),
                elapsed: None,
                stdout: String::new(),
                stderr: problem,
            };
        }
        let cmdline = template.evaluate(&[&env]);

        let _slot = match self.jobs.acquire().await {
            Ok(slot) => slot,
            Err(_) => return aborted(cmdline),
        };
        if self.noexec {
            return Outcome {
                success: true,
                command: cmdline,
                elapsed: None,
                stdout: String::new(),
                stderr: String::new(),
            };
        }

        if self.is_aborted() {
            return aborted(cmdline);
        }
        debug!(command = %cmdline, "spawning");
        let start = Instant::now();
        let result = tokio::select! {
            result = process::run_command(&cmdline, self.timeout) => result,
            _ = wait_abort(self.abort.subscribe()) => return aborted(cmdline),
        };
        let elapsed = Some(start.elapsed());
        match result {
            Ok(out) => Outcome {
                success: out.termination == Termination::Success,
                command: cmdline,
                elapsed,
                stdout: out.stdout,
                stderr: out.stderr,
            },
            Err(err) => Outcome {
                success: false,
                command: cmdline,
                elapsed,
                stdout: String::new(),
                stderr: err.to_string(),
            },
        }
    }

    async fn run_callback(
        &self,
        scheduler: &Scheduler,
        recipe: &Recipe,
        f: &Callback,
        targets: &[String],
        sources: &[String],
        vars: &Vars,
    ) -> Result<Outcome, Error> {
        let mut command = callback_string(&recipe.action.name, targets, sources, vars);
        let _slot = match self.jobs.acquire().await {
            Ok(slot) => slot,
            Err(_) => return Ok(aborted(command)),
        };
        if self.is_aborted() {
            return Ok(aborted(command));
        }
        if self.noexec && !recipe.action.run_in_noexec {
            return Ok(Outcome {
                success: true,
                command,
                elapsed: None,
                stdout: String::new(),
                stderr: String::new(),
            });
        }

        let mut call = Call {
            scheduler,
            targets: &recipe.targets,
            sources: &recipe.sources,
            vars,
            stdout: String::new(),
            stderr: String::new(),
        };
        let start = Instant::now();
        let result = run_blocking(|| catch_unwind(AssertUnwindSafe(|| f(&mut call))));
        let elapsed = Some(start.elapsed());
        let Call {
            stdout, mut stderr, ..
        } = call;
        let success = match result {
            Ok(Ok(status)) => status,
            Ok(Err(CallError::Failed { cmd })) => {
                command = cmd;
                false
            }
            Ok(Err(CallError::Dependency(err))) => return Err(err.into()),
            Ok(Err(CallError::Other(err))) => {
                error!(action = %recipe.action.name, "callback failed: {:#}", err);
                push_line(&mut stderr, &format!("{:#}", err));
                false
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                error!(action = %recipe.action.name, "callback panicked: {}", msg);
                push_line(&mut stderr, &msg);
                false
            }
        };
        Ok(Outcome {
            success,
            command,
            elapsed,
            stdout: stdout.trim().to_owned(),
            stderr: stderr.trim().to_owned(),
        })
    }
}

/// Run synchronous user code.  On a multi-thread runtime the worker hands
/// its other tasks off first, so they keep going meanwhile.
fn run_blocking<R>(f: impl FnOnce() -> R) -> R {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

async fn wait_abort(mut abort: watch::Receiver<bool>) {
    // An error means the sender is gone, which only happens on teardown.
    if abort.wait_for(|&aborted| aborted).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn push_line(buf: &mut String, line: &str) {
    if !buf.is_empty() && !buf.ends_with('\n') {
        buf.push('\n');
    }
    buf.push_str(line);
}

fn aborted(command: String) -> Outcome {
    Outcome {
        success: false,
        command,
        elapsed: None,
        stdout: String::new(),
        stderr: "aborted".to_owned(),
    }
}
