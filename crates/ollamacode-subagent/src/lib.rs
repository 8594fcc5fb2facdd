use chrono::{DateTime, Utc};
use ollamacode_core::{CancelCause, CancellationToken, TaskClass};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use uuid::Uuid;

mod executor;

pub use executor::{BackendExecutor, post_process, render_prompt};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubagentError {
    #[error("maximum concurrent subagents reached ({max})")]
    MaxConcurrentReached { max: usize },
    #[error("subagent {0} not found")]
    NotFound(Uuid),
    #[error("subagent {0} has already finished")]
    AlreadyTerminal(Uuid),
    #[error("invalid subagent configuration: {0}")]
    InvalidConfig(String),
    #[error("subagent timed out")]
    TaskTimeout,
    #[error("subagent was killed")]
    TaskKilled,
    #[error("subagent failed: {0}")]
    TaskFailed(String),
    #[error("timed out waiting for subagent {0}")]
    WaitTimeout(Uuid),
}

// ── Types ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubagentType {
    Explore,
    Plan,
    Execute,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelHint {
    Small,
    Large,
}

impl ModelHint {
    /// Search is served by the small model and Analysis by the large one.
    pub fn task_class(self) -> TaskClass {
        match self {
            Self::Small => TaskClass::Search,
            Self::Large => TaskClass::Analysis,
        }
    }
}

impl SubagentType {
    pub const ALL: [SubagentType; 4] = [Self::Explore, Self::Plan, Self::Execute, Self::General];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Explore => "explore",
            Self::Plan => "plan",
            Self::Execute => "execute",
            Self::General => "general",
        }
    }

    pub fn model_hint(self) -> ModelHint {
        match self {
            Self::Explore => ModelHint::Small,
            Self::Plan | Self::Execute | Self::General => ModelHint::Large,
        }
    }

    /// Router class used when the task names no model; follows the hint.
    pub fn task_class(self) -> TaskClass {
        self.model_hint().task_class()
    }

    pub fn default_limits(self) -> SubagentLimits {
        let (max_tokens, temperature, timeout_secs, max_memory_mb) = match self {
            Self::Explore => (2048, 0.3, 2 * 60, 512),
            Self::Plan => (8192, 0.3, 10 * 60, 512),
            Self::Execute => (4096, 0.2, 15 * 60, 1024),
            Self::General => (4096, 0.7, 5 * 60, 512),
        };
        SubagentLimits {
            max_tokens,
            temperature,
            timeout_secs,
            max_memory_mb,
            max_cpu_cores: 1,
        }
    }
}

impl std::fmt::Display for SubagentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubagentType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == needle)
            .ok_or_else(|| {
                anyhow::anyhow!("unknown subagent type '{s}' (expected explore, plan, execute or general)")
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubagentStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
    Killed,
}

impl SubagentStatus {
    pub const ALL: [SubagentStatus; 6] = [
        Self::Pending,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Timeout,
        Self::Killed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Timeout | Self::Killed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Killed => "killed",
        }
    }
}

impl std::fmt::Display for SubagentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubagentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == needle)
            .ok_or_else(|| anyhow::anyhow!("unknown subagent status '{s}'"))
    }
}

/// Memory and CPU ceilings are carried for executors that can honour them;
/// the supervisor itself only enforces the timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubagentLimits {
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub max_memory_mb: u64,
    pub max_cpu_cores: u32,
}

impl SubagentLimits {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self) -> Result<(), SubagentError> {
        if self.max_tokens == 0 {
            return Err(SubagentError::InvalidConfig(
                "max_tokens must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(SubagentError::InvalidConfig(format!(
                "temperature must be within [0, 1], got {}",
                self.temperature
            )));
        }
        if self.timeout_secs == 0 {
            return Err(SubagentError::InvalidConfig(
                "timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubagentConfig {
    pub kind: SubagentType,
    pub prompt: String,
    /// Explicit model; otherwise the router picks by [`SubagentType::task_class`].
    pub model: Option<String>,
    pub work_dir: PathBuf,
    /// Overrides the per-type defaults.
    pub limits: Option<SubagentLimits>,
}

impl SubagentConfig {
    pub fn new(kind: SubagentType, prompt: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            prompt: prompt.into(),
            model: None,
            work_dir: work_dir.into(),
            limits: None,
        }
    }

    pub fn with_limits(mut self, limits: SubagentLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Point-in-time copy of a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubagentSnapshot {
    pub id: Uuid,
    pub kind: SubagentType,
    pub class: TaskClass,
    pub prompt: String,
    pub model: Option<String>,
    pub status: SubagentStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub work_dir: PathBuf,
    pub limits: SubagentLimits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SupervisorStats {
    pub active: usize,
    pub total_spawned: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub max_concurrent: usize,
}

/// Runs one task. Implementations must return promptly once `cancel` fires.
pub trait SubagentExecutor: Send + Sync {
    fn execute(&self, task: &SubagentSnapshot, cancel: &CancellationToken)
    -> anyhow::Result<String>;
}

impl<F> SubagentExecutor for F
where
    F: Fn(&SubagentSnapshot, &CancellationToken) -> anyhow::Result<String> + Send + Sync,
{
    fn execute(
        &self,
        task: &SubagentSnapshot,
        cancel: &CancellationToken,
    ) -> anyhow::Result<String> {
        self(task, cancel)
    }
}

// ── Supervisor ────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct DoneSignal {
    done: Mutex<bool>,
    signal: Condvar,
}

impl DoneSignal {
    fn fire(&self) {
        *self.done.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.signal.notify_all();
    }

    /// True once fired; false if `timeout` elapsed first.
    fn wait(&self, timeout: Option<Duration>) -> bool {
        let done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        match timeout {
            None => {
                let done = self
                    .signal
                    .wait_while(done, |done| !*done)
                    .unwrap_or_else(PoisonError::into_inner);
                *done
            }
            Some(timeout) => {
                let (done, _) = self
                    .signal
                    .wait_timeout_while(done, timeout, |done| !*done)
                    .unwrap_or_else(PoisonError::into_inner);
                *done
            }
        }
    }
}

struct TaskEntry {
    snapshot: SubagentSnapshot,
    cancel: CancellationToken,
    done: Arc<DoneSignal>,
}

struct Inner {
    tasks: HashMap<Uuid, TaskEntry>,
    stats: SupervisorStats,
}

/// Bounded pool of background backend tasks. Spawn never queues: at the
/// limit it fails with [`SubagentError::MaxConcurrentReached`].
#[derive(Clone)]
pub struct SubagentSupervisor {
    inner: Arc<Mutex<Inner>>,
    executor: Arc<dyn SubagentExecutor>,
}

impl SubagentSupervisor {
    pub fn new(executor: Arc<dyn SubagentExecutor>, max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                tasks: HashMap::new(),
                stats: SupervisorStats {
                    max_concurrent: max_concurrent.max(1),
                    ..SupervisorStats::default()
                },
            })),
            executor,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn spawn(&self, config: SubagentConfig) -> Result<SubagentSnapshot, SubagentError> {
        if config.prompt.trim().is_empty() {
            return Err(SubagentError::InvalidConfig(
                "prompt must not be empty".to_string(),
            ));
        }
        let limits = config
            .limits
            .clone()
            .unwrap_or_else(|| config.kind.default_limits());
        limits.validate()?;

        let id = Uuid::now_v7();
        let cancel = CancellationToken::with_timeout(limits.timeout());
        let done = Arc::new(DoneSignal::default());
        let snapshot = SubagentSnapshot {
            id,
            kind: config.kind,
            class: config.kind.task_class(),
            prompt: config.prompt,
            model: config.model.filter(|m| !m.trim().is_empty()),
            status: SubagentStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            work_dir: config.work_dir,
            limits,
        };
        {
            let mut inner = self.lock();
            if inner.stats.active >= inner.stats.max_concurrent {
                return Err(SubagentError::MaxConcurrentReached {
                    max: inner.stats.max_concurrent,
                });
            }
            inner.stats.active += 1;
            inner.stats.total_spawned += 1;
            inner.tasks.insert(
                id,
                TaskEntry {
                    snapshot: snapshot.clone(),
                    cancel: cancel.clone(),
                    done: Arc::clone(&done),
                },
            );
        }

        let inner = Arc::clone(&self.inner);
        let executor = Arc::clone(&self.executor);
        let worker_done = Arc::clone(&done);
        let spawned = thread::Builder::new()
            .name(format!("subagent-{id}"))
            .spawn(move || run_worker(&inner, executor.as_ref(), id, &cancel, &worker_done));
        if let Err(err) = spawned {
            let message = format!("failed to start worker thread: {err}");
            finish(
                &self.inner,
                id,
                SubagentStatus::Failed,
                None,
                Some(message.clone()),
            );
            done.fire();
            return Err(SubagentError::TaskFailed(message));
        }
        Ok(snapshot)
    }

    /// Block until the task is terminal and return its result or error.
    pub fn wait(&self, id: Uuid) -> Result<String, SubagentError> {
        let done = self.done_signal(id)?;
        done.wait(None);
        self.outcome(id)
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`. Giving up does
    /// not cancel the task.
    pub fn wait_with_timeout(&self, id: Uuid, timeout: Duration) -> Result<String, SubagentError> {
        let done = self.done_signal(id)?;
        if !done.wait(Some(timeout)) {
            return Err(SubagentError::WaitTimeout(id));
        }
        self.outcome(id)
    }

    /// Cancel a running or pending task and block until its worker finishes.
    pub fn kill(&self, id: Uuid) -> Result<(), SubagentError> {
        let done = {
            let inner = self.lock();
            let entry = inner.tasks.get(&id).ok_or(SubagentError::NotFound(id))?;
            if entry.snapshot.status.is_terminal() {
                return Err(SubagentError::AlreadyTerminal(id));
            }
            entry.cancel.cancel();
            Arc::clone(&entry.done)
        };
        done.wait(None);
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<SubagentSnapshot, SubagentError> {
        self.lock()
            .tasks
            .get(&id)
            .map(|entry| entry.snapshot.clone())
            .ok_or(SubagentError::NotFound(id))
    }

    /// All tasks, oldest first.
    pub fn list(&self) -> Vec<SubagentSnapshot> {
        let mut tasks = self
            .lock()
            .tasks
            .values()
            .map(|entry| entry.snapshot.clone())
            .collect::<Vec<_>>();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        tasks
    }

    pub fn list_by_status(&self, status: SubagentStatus) -> Vec<SubagentSnapshot> {
        self.list()
            .into_iter()
            .filter(|task| task.status == status)
            .collect()
    }

    pub fn list_by_type(&self, kind: SubagentType) -> Vec<SubagentSnapshot> {
        self.list()
            .into_iter()
            .filter(|task| task.kind == kind)
            .collect()
    }

    /// Drop terminal tasks that finished more than `older_than` ago. Returns
    /// how many were removed.
    pub fn cleanup(&self, older_than: Duration) -> usize {
        let cutoff = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));
        let Some(cutoff) = cutoff else {
            return 0;
        };
        let mut inner = self.lock();
        let before = inner.tasks.len();
        inner.tasks.retain(|_, entry| {
            let snapshot = &entry.snapshot;
            !(snapshot.status.is_terminal()
                && snapshot.completed_at.is_some_and(|at| at < cutoff))
        });
        before - inner.tasks.len()
    }

    /// Cancel everything still running and forget every task. Counters are
    /// kept; running workers still settle `active` when they return.
    pub fn clear_all(&self) {
        let mut inner = self.lock();
        for entry in inner.tasks.values() {
            if !entry.snapshot.status.is_terminal() {
                entry.cancel.cancel();
            }
        }
        inner.tasks.clear();
    }

    pub fn stats(&self) -> SupervisorStats {
        self.lock().stats
    }

    /// Affects future spawns only. Values below 1 are clamped to 1.
    pub fn set_max_concurrent(&self, max: usize) {
        self.lock().stats.max_concurrent = max.max(1);
    }

    fn done_signal(&self, id: Uuid) -> Result<Arc<DoneSignal>, SubagentError> {
        self.lock()
            .tasks
            .get(&id)
            .map(|entry| Arc::clone(&entry.done))
            .ok_or(SubagentError::NotFound(id))
    }

    fn outcome(&self, id: Uuid) -> Result<String, SubagentError> {
        let snapshot = self.get(id)?;
        match snapshot.status {
            SubagentStatus::Completed => Ok(snapshot.result.unwrap_or_default()),
            SubagentStatus::Timeout => Err(SubagentError::TaskTimeout),
            SubagentStatus::Killed => Err(SubagentError::TaskKilled),
            SubagentStatus::Failed => Err(SubagentError::TaskFailed(
                snapshot.error.unwrap_or_else(|| "unknown error".to_string()),
            )),
            SubagentStatus::Pending | SubagentStatus::Running => Err(SubagentError::TaskFailed(
                format!("subagent {id} signalled completion while {}", snapshot.status),
            )),
        }
    }
}

fn run_worker(
    inner: &Mutex<Inner>,
    executor: &dyn SubagentExecutor,
    id: Uuid,
    cancel: &CancellationToken,
    done: &DoneSignal,
) {
    let started = {
        let mut guard = inner.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.tasks.get_mut(&id) {
            Some(entry) if !cancel.is_cancelled() => {
                entry.snapshot.status = SubagentStatus::Running;
                entry.snapshot.started_at = Some(Utc::now());
                Some(entry.snapshot.clone())
            }
            _ => None,
        }
    };

    let outcome = started.map(|task| {
        catch_unwind(AssertUnwindSafe(|| executor.execute(&task, cancel)))
            .unwrap_or_else(|_| Err(anyhow::anyhow!("subagent worker panicked")))
    });

    let (status, result, error) = match (cancel.cause(), outcome) {
        (Some(CancelCause::DeadlineExceeded), _) => (
            SubagentStatus::Timeout,
            None,
            Some("deadline exceeded".to_string()),
        ),
        (Some(CancelCause::Killed), _) | (None, None) => {
            (SubagentStatus::Killed, None, Some("killed".to_string()))
        }
        (None, Some(Ok(text))) => (SubagentStatus::Completed, Some(text), None),
        (None, Some(Err(err))) => (SubagentStatus::Failed, None, Some(format!("{err:#}"))),
    };
    finish(inner, id, status, result, error);
    done.fire();
}

/// Terminal transition plus accounting, in one critical section. The task may
/// already be gone after `clear_all`; the counters are settled regardless.
fn finish(
    inner: &Mutex<Inner>,
    id: Uuid,
    status: SubagentStatus,
    result: Option<String>,
    error: Option<String>,
) {
    let mut guard = inner.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(entry) = guard.tasks.get_mut(&id) {
        entry.snapshot.status = status;
        entry.snapshot.result = result;
        entry.snapshot.error = error;
        entry.snapshot.completed_at = Some(Utc::now());
    }
    guard.stats.active = guard.stats.active.saturating_sub(1);
    if status == SubagentStatus::Completed {
        guard.stats.total_completed += 1;
    } else {
        guard.stats.total_failed += 1;
    }
}
