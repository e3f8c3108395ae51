use std::{
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    path::Path,
    rc::Rc,
    sync::{
        atomic::{AtomicU64, AtomicU8, Ordering},
        mpsc, Arc, Mutex, MutexGuard, OnceLock,
    },
    thread,
    time::Duration,
};

use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tracing::{debug, error, info, warn};

use crate::{
    capture::{CaptureBuffers, CaptureGuard},
    classifier::{classify, ClassifiedCode},
    config::{DisplayPolicy, ShellConfig},
    diagnostics::{LotusError, Result, SourceText},
    export,
    history::History,
    namespace::Namespace,
    normalizer::{normalize, Failure},
    result::{truncate, ShellResult},
    runtime::{Interpreter, SUBMITTED_FILE},
    value::Value,
};

const CODE_PREVIEW_CHARS: usize = 100;

type Job = Box<dyn FnOnce(&mut Worker) + Send>;

/// A long-lived execution context. Every session owns a worker thread that
/// holds its namespace; calls are serialized and run there one at a time.
pub struct Session {
    name: String,
    config: ShellConfig,
    history: Arc<History>,
    generation: Arc<AtomicU64>,
    guard: Arc<AsyncMutex<()>>,
    jobs: mpsc::Sender<Job>,
}

impl Session {
    pub fn new(config: ShellConfig) -> Result<Self> {
        Self::named("default", config)
    }

    pub fn named(name: impl Into<String>, config: ShellConfig) -> Result<Self> {
        let name = name.into();
        let history = Arc::new(History::new());
        let generation = Arc::new(AtomicU64::new(0));
        let (jobs, queue) = mpsc::channel::<Job>();

        let worker_config = config.clone();
        let worker_history = Arc::clone(&history);
        let worker_generation = Arc::clone(&generation);
        let worker_name = name.clone();
        thread::Builder::new()
            .name(format!("lotus-session-{name}"))
            .stack_size(config.worker_stack_size)
            .spawn(move || {
                let mut worker = Worker {
                    namespace: Namespace::new(),
                    config: worker_config,
                    history: worker_history,
                    generation: worker_generation,
                };
                for job in queue {
                    if panic::catch_unwind(AssertUnwindSafe(|| job(&mut worker))).is_err() {
                        error!(session = %worker_name, "job panicked on session worker");
                    }
                }
                debug!(session = %worker_name, "session worker stopped");
            })?;

        info!(session = %name, "session created");
        Ok(Self {
            name,
            config,
            history,
            generation,
            guard: Arc::new(AsyncMutex::new(())),
            jobs,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    /// Number of resets so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Runs `code` after the filtered `imports` preamble. Script faults and
    /// timeouts come back as error results; `Err` means the session itself
    /// could not run the job.
    pub async fn execute(
        &self,
        code: &str,
        imports: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ShellResult> {
        let timeout = timeout.or_else(|| self.config.default_timeout());
        info!(
            session = %self.name,
            code = %truncate(code, CODE_PREVIEW_CHARS),
            timeout_ms = timeout.map(|limit| limit.as_millis() as u64),
            "executing code"
        );

        let permit = Arc::clone(&self.guard).lock_owned().await;
        let buffers = CaptureBuffers::new();
        let state = Arc::new(JobState::default());
        let (reply, mut outcome) = oneshot::channel();

        let job_buffers = buffers.clone();
        let job_state = Arc::clone(&state);
        let job_code = code.to_string();
        let job_imports = imports.map(str::to_string);
        self.submit(Box::new(move |worker: &mut Worker| {
            let result = worker.guarded(&job_code, &job_buffers, &job_state, |worker| {
                worker.run(&job_code, job_imports.as_deref(), job_buffers.clone(), &job_state)
            });
            if job_state.finish() {
                worker.history.append(result.clone());
                let _ = reply.send(result);
            } else {
                warn!(kind = result.kind(), "discarding late result of timed out execution");
            }
            drop(permit);
        }))?;

        let Some(limit) = timeout else {
            return outcome.await.map_err(|_| LotusError::WorkerUnavailable);
        };
        match tokio::time::timeout(limit, &mut outcome).await {
            Ok(reply) => reply.map_err(|_| LotusError::WorkerUnavailable),
            Err(_) if state.abandon() => {
                warn!(
                    session = %self.name,
                    timeout_ms = limit.as_millis() as u64,
                    "execution timed out"
                );
                let code = state.code.get().cloned().unwrap_or_else(|| code.to_string());
                let result = ShellResult::failure(
                    code,
                    buffers.stdout(),
                    buffers.stderr(),
                    normalize(Failure::TimedOut(limit)),
                );
                self.history.append(result.clone());
                Ok(result)
            }
            // The worker finished between the deadline and the hand-off.
            Err(_) => outcome.await.map_err(|_| LotusError::WorkerUnavailable),
        }
    }

    /// Replaces the namespace with an empty one and clears the history.
    /// Waits for any in-flight execution to finish first.
    pub async fn reset(&self) -> Result<()> {
        let permit = Arc::clone(&self.guard).lock_owned().await;
        let (done, finished) = oneshot::channel();
        self.submit(Box::new(move |worker: &mut Worker| {
            worker.reset();
            drop(permit);
            let _ = done.send(());
        }))?;
        finished.await.map_err(|_| LotusError::WorkerUnavailable)
    }

    pub fn history(&self) -> Vec<ShellResult> {
        self.history.snapshot()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn last_result(&self) -> Option<ShellResult> {
        self.history.last()
    }

    /// Forgets past results without touching the namespace.
    pub fn clear_history(&self) {
        let dropped = self.history.clear();
        info!(session = %self.name, entries = dropped, "cleared history");
    }

    pub fn export_history(&self, include_errors: bool) -> String {
        let history = self.history.snapshot();
        info!(session = %self.name, entries = history.len(), include_errors, "exporting history");
        export::render_script(&history, include_errors)
    }

    pub fn export_history_to(
        &self,
        dir: impl AsRef<Path>,
        filename: &str,
        include_errors: bool,
    ) -> Result<String> {
        let history = self.history.snapshot();
        info!(
            session = %self.name,
            entries = history.len(),
            filename,
            "exporting history to file"
        );
        export::write_script(dir.as_ref(), filename, &history, include_errors)
    }

    fn submit(&self, job: Job) -> Result<()> {
        self.jobs.send(job).map_err(|_| {
            error!(session = %self.name, "session worker is gone");
            LotusError::WorkerUnavailable
        })
    }
}

const RUNNING: u8 = 0;
const COMPLETED: u8 = 1;
const ABANDONED: u8 = 2;

/// Decides which side records a job: the worker when it finishes, or the
/// caller when its deadline passes first. Exactly one transition wins.
#[derive(Default)]
struct JobState {
    phase: AtomicU8,
    code: OnceLock<String>,
}

impl JobState {
    fn finish(&self) -> bool {
        self.transition(COMPLETED)
    }

    fn abandon(&self) -> bool {
        self.transition(ABANDONED)
    }

    fn transition(&self, to: u8) -> bool {
        self.phase
            .compare_exchange(RUNNING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

struct Worker {
    namespace: Namespace,
    config: ShellConfig,
    history: Arc<History>,
    generation: Arc<AtomicU64>,
}

impl Worker {
    fn run(
        &mut self,
        code: &str,
        imports: Option<&str>,
        buffers: CaptureBuffers,
        state: &JobState,
    ) -> ShellResult {
        let combined = match imports.map(|text| self.namespace.filter_preamble(text)) {
            Some(preamble) if !preamble.trim().is_empty() => format!("{preamble}\n{code}"),
            _ => code.to_string(),
        };
        let _ = state.code.set(combined.clone());
        let source = Rc::new(SourceText::new(SUBMITTED_FILE, combined.as_str()));

        let classified = match classify(&combined) {
            Ok(classified) => classified,
            Err(diag) => {
                let line = diag.span.map(|span| span.line).unwrap_or(1);
                let err = LotusError::from(diag.push_frame(source.frame(line, "<module>")));
                warn!(error = %err, "code failed to parse");
                return ShellResult::failure(
                    combined,
                    String::new(),
                    String::new(),
                    normalize(Failure::Fault(&err)),
                );
            }
        };
        debug!(
            kind = ?classified.kind,
            imports = classified.preamble.len(),
            units = classified.body.len(),
            "classified code"
        );

        let mut interpreter = Interpreter::with_globals(
            self.namespace.globals(),
            source,
            self.config.max_call_depth,
        );
        let outcome = {
            let _capture = CaptureGuard::install(buffers.clone());
            run_classified(&mut interpreter, &classified)
        };
        let stdout = buffers.stdout();
        let stderr = buffers.stderr();

        match outcome {
            Ok(Some(value)) => {
                let value_repr = match self.config.display {
                    DisplayPolicy::PreferOutput if !stdout.is_empty() => String::new(),
                    _ => value.repr(),
                };
                info!(value_type = value.type_name(), "expression evaluated");
                ShellResult::expression(combined, stdout, stderr, value.type_name(), value_repr)
            }
            Ok(None) => {
                info!("statement executed");
                ShellResult::statement(combined, stdout, stderr)
            }
            Err(err) => {
                let info = normalize(Failure::Fault(&err));
                warn!(
                    kind = %info.error_kind,
                    message = %info.error_message,
                    "execution failed"
                );
                ShellResult::failure(combined, stdout, stderr, info)
            }
        }
    }

    /// Runs `job`, turning a panic into an error result so the caller still
    /// gets a reply and the call is recorded.
    fn guarded(
        &mut self,
        code: &str,
        buffers: &CaptureBuffers,
        state: &JobState,
        job: impl FnOnce(&mut Worker) -> ShellResult,
    ) -> ShellResult {
        match panic::catch_unwind(AssertUnwindSafe(|| job(self))) {
            Ok(result) => result,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .copied()
                    .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                    .unwrap_or("engine panicked");
                error!(panic = %message, "execution panicked on session worker");
                let code = state.code.get().cloned().unwrap_or_else(|| code.to_string());
                ShellResult::failure(
                    code,
                    buffers.stdout(),
                    buffers.stderr(),
                    normalize(Failure::Panicked(message)),
                )
            }
        }
    }

    fn reset(&mut self) {
        self.namespace.reset();
        let dropped = self.history.clear();
        self.generation
            .store(self.namespace.generation(), Ordering::Release);
        info!(
            generation = self.namespace.generation(),
            dropped_entries = dropped,
            "session reset"
        );
    }
}

fn run_classified(
    interpreter: &mut Interpreter,
    classified: &ClassifiedCode,
) -> Result<Option<Value>> {
    interpreter.run_units(&classified.preamble)?;
    interpreter.run_units(&classified.body)?;
    classified
        .trailing
        .as_ref()
        .map(|expr| interpreter.evaluate_unit(expr))
        .transpose()
}

/// One session per client, created on first use.
pub struct SessionPool {
    config: ShellConfig,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionPool {
    pub fn new(config: ShellConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn session(&self, client: &str) -> Result<Arc<Session>> {
        let mut sessions = self.sessions();
        if let Some(session) = sessions.get(client) {
            return Ok(Arc::clone(session));
        }
        let session = Arc::new(Session::named(client, self.config.clone())?);
        sessions.insert(client.to_string(), Arc::clone(&session));
        Ok(session)
    }

    /// Resets the client's session if it exists.
    pub async fn reset(&self, client: &str) -> Result<()> {
        let session = self.sessions().get(client).cloned();
        match session {
            Some(session) => session.reset().await,
            None => Ok(()),
        }
    }

    pub fn remove(&self, client: &str) -> bool {
        let removed = self.sessions().remove(client).is_some();
        if removed {
            info!(client, "session removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture;

    fn worker() -> Worker {
        Worker {
            namespace: Namespace::new(),
            config: ShellConfig::default(),
            history: Arc::new(History::new()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    #[test]
    fn panics_become_error_results_with_partial_output() {
        let mut worker = worker();
        let buffers = CaptureBuffers::new();
        let state = JobState::default();
        let job_buffers = buffers.clone();
        let result = worker.guarded("boom()", &buffers, &state, move |_| {
            let _capture = CaptureGuard::install(job_buffers);
            capture::write_stdout("before\n");
            panic!("engine bug");
        });

        let info = result.error().expect("error result");
        assert_eq!(info.error_kind, "RuntimeError");
        assert_eq!(info.error_message, "internal error: engine bug");
        assert_eq!(result.code, "boom()");
        assert_eq!(result.stdout, "before\n");
    }

    #[test]
    fn worker_keeps_running_after_a_panic() {
        let mut worker = worker();
        let buffers = CaptureBuffers::new();
        let state = JobState::default();
        worker.guarded("x = 1", &buffers, &state, |_| panic!("engine bug"));

        let state = JobState::default();
        let result = worker.guarded("1 + 1", &buffers, &state, |worker| {
            worker.run("1 + 1", None, CaptureBuffers::new(), &state)
        });
        assert_eq!(result.value_repr(), Some("2"));
    }
}
