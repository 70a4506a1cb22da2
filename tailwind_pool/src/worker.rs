//! The standalone Tailwind subprocess supervisor (§4.C).
//!
//! One [`Worker`] wraps one long-lived `tailwindcss --watch` child: it merges the child's
//! stdout/stderr into a single stream, scans it for readiness, and tracks the health counters the
//! pool reports through [`crate::telemetry`]. Grounded on the teacher's
//! `process_execution::pe_nailgun::NailgunProcess`, which owns a `tokio::process::Child` the same
//! way and is torn down the same way, but generalized here to detect readiness from output text
//! rather than a parsed port number, and to support multiple concurrent `await_ready` waiters.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex as AsyncMutex, Notify};
use tokio::time::timeout;

use fingerprint::Fingerprint;

use crate::error::{Error, ReadinessOutcome};

/// Output substrings that the reference Tailwind builds (v3 and v4) print once a watch build has
/// completed and the compiler is ready to serve further rebuilds.
const READY_MARKERS: &[&str] = &["Rebuilding", "Done in", "Built successfully", "Watching", "Ready"];

/// Output substrings counted toward `css_builds`.
const CSS_BUILD_MARKERS: &[&str] = &["{", "}", "Done", "Rebuilding", "Built", "CSS", "Watching"];

/// If no marker line has matched within this long, any further non-empty line is treated as
/// evidence of life and promotes the Worker to ready rather than waiting out the full startup
/// timeout.
const READY_GRACE_PERIOD: Duration = Duration::from_millis(50);

/// A lifecycle stage a [`Worker`] passes through exactly once, in order, except for the
/// `Idle`/`Busy` pair which alternate for as long as the Worker is reused.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkerStatus {
    Starting,
    Idle,
    Busy,
    Terminating,
    Dead,
}

/// A point-in-time read of a Worker's counters, exposed through [`crate::pool::Pool::stats`].
#[derive(Clone, Debug)]
pub struct Health {
    pub status: WorkerStatus,
    pub ready: bool,
    pub total_outputs: u64,
    pub css_builds: u64,
    pub errors: u64,
    pub last_activity_at: Instant,
}

struct Counters {
    total_outputs: AtomicU64,
    css_builds: AtomicU64,
    errors: AtomicU64,
    last_activity_at: AsyncMutex<Instant>,
}

/// Shared state visible to both the `Worker` handle and its background reader task.
struct Inner {
    status: AsyncMutex<WorkerStatus>,
    ready: AtomicBool,
    ready_notify: Notify,
    waiters: AsyncMutex<Vec<oneshot::Sender<WaiterSignal>>>,
    counters: Counters,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum WaiterSignal {
    Ready,
    StartupTimeout,
    Down,
}

/// One supervised `tailwindcss --watch` (or equivalent) subprocess.
pub struct Worker {
    pub fingerprint: Fingerprint,
    pub created_at: Instant,
    child: Arc<AsyncMutex<Child>>,
    stdin: AsyncMutex<Option<tokio::process::ChildStdin>>,
    inner: Arc<Inner>,
    reader_task: tokio::task::JoinHandle<()>,
    startup_timer_task: tokio::task::JoinHandle<()>,
}

impl Worker {
    /// Spawns `argv[0]` with the remaining elements as arguments, merging stdout and stderr into a
    /// single stream read by a background task. `cwd` becomes the child's working directory.
    ///
    /// The merge is done the way a shell does it (`2>&1`) rather than by duplicating file
    /// descriptors by hand: `tokio::process::Command` has no portable "redirect stderr to
    /// stdout's pipe" primitive, so the child is launched through `/bin/sh -c`.
    pub async fn start(
        fingerprint: Fingerprint,
        argv: &[String],
        cwd: &std::path::Path,
        startup_timeout: Duration,
    ) -> Result<Worker, Error> {
        if argv.is_empty() {
            return Err(Error::WorkerCreationFailed(
                "argv must contain at least a program name".to_string(),
            ));
        }
        let shell_cmd = format!("exec {} 2>&1", shell_join(argv));
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg(shell_cmd)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::WorkerCreationFailed(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::WorkerCreationFailed("child has no stdout pipe".to_string()))?;
        let stdin = child.stdin.take();

        let inner = Arc::new(Inner {
            status: AsyncMutex::new(WorkerStatus::Starting),
            ready: AtomicBool::new(false),
            ready_notify: Notify::new(),
            waiters: AsyncMutex::new(Vec::new()),
            counters: Counters {
                total_outputs: AtomicU64::new(0),
                css_builds: AtomicU64::new(0),
                errors: AtomicU64::new(0),
                last_activity_at: AsyncMutex::new(Instant::now()),
            },
        });

        let child = Arc::new(AsyncMutex::new(child));

        let reader_task = tokio::spawn(read_output(inner.clone(), child.clone(), stdout, Instant::now()));
        let startup_timer_task = tokio::spawn(arm_startup_timer(inner.clone(), startup_timeout));

        Ok(Worker {
            fingerprint,
            created_at: Instant::now(),
            child,
            stdin: AsyncMutex::new(stdin),
            inner,
            reader_task,
            startup_timer_task,
        })
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> WorkerStatus {
        *self.inner.status.lock().await
    }

    pub async fn mark_busy(&self) {
        let mut status = self.inner.status.lock().await;
        if matches!(*status, WorkerStatus::Idle) {
            *status = WorkerStatus::Busy;
        }
    }

    pub async fn mark_idle(&self) {
        let mut status = self.inner.status.lock().await;
        if matches!(*status, WorkerStatus::Busy | WorkerStatus::Starting) {
            *status = WorkerStatus::Idle;
        }
    }

    /// Blocks until readiness or `deadline`, whichever comes first.
    ///
    /// Returns `Ok(Ready)` once the reader task has matched a readiness marker, or `Ok(Timeout)`
    /// if either this call's own deadline elapses or the Worker's internal startup timer (armed
    /// once, at [`Worker::start`]) fires first — both cases leave the Worker usable in degraded
    /// mode, which is all a caller of this method ever needs to know. `Err(WorkerDown)` if the
    /// child has already exited or exits while this call is waiting.
    pub async fn await_ready(&self, deadline: Duration) -> Result<ReadinessOutcome, Error> {
        if self.is_ready() {
            return Ok(ReadinessOutcome::Ready);
        }
        if matches!(*self.inner.status.lock().await, WorkerStatus::Dead) {
            return Err(Error::WorkerDown(self.fingerprint));
        }

        let (tx, rx) = oneshot::channel();
        self.inner.waiters.lock().await.push(tx);

        // Re-check readiness after registering: the reader task may have flipped `ready` and
        // drained the waiters list between our first check and the push above.
        if self.is_ready() {
            return Ok(ReadinessOutcome::Ready);
        }

        match timeout(deadline, rx).await {
            Ok(Ok(WaiterSignal::Ready)) => Ok(ReadinessOutcome::Ready),
            Ok(Ok(WaiterSignal::StartupTimeout)) => Ok(ReadinessOutcome::Timeout),
            Ok(Ok(WaiterSignal::Down)) => Err(Error::WorkerDown(self.fingerprint)),
            Ok(Err(_)) => Ok(ReadinessOutcome::Timeout),
            Err(_) => Ok(ReadinessOutcome::Timeout),
        }
    }

    pub async fn health(&self) -> Health {
        Health {
            status: *self.inner.status.lock().await,
            ready: self.is_ready(),
            total_outputs: self.inner.counters.total_outputs.load(Ordering::SeqCst),
            css_builds: self.inner.counters.css_builds.load(Ordering::SeqCst),
            errors: self.inner.counters.errors.load(Ordering::SeqCst),
            last_activity_at: *self.inner.counters.last_activity_at.lock().await,
        }
    }

    /// Returns `true` if the OS process has exited, without blocking. Mirrors the teacher's
    /// `NailgunProcess` liveness check via `try_wait` rather than trusting a cached status.
    pub async fn is_alive(&self) -> bool {
        let mut child = self.child.lock().await;
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) | Err(_) => {
                *self.inner.status.lock().await = WorkerStatus::Dead;
                false
            }
        }
    }

    /// Terminates the child: drops stdin (the watch-mode graceful shutdown signal per the
    /// subprocess contract), gives it a short grace period, then falls back to `SIGTERM` if it is
    /// still alive, and finally reaps it.
    pub async fn stop(&self, reason: &str) {
        {
            let mut status = self.inner.status.lock().await;
            if matches!(*status, WorkerStatus::Dead) {
                return;
            }
            *status = WorkerStatus::Terminating;
        }
        log::info!("stopping worker {} ({reason})", self.fingerprint);
        self.stdin.lock().await.take();

        let mut child = self.child.lock().await;
        let exited = timeout(Duration::from_millis(200), child.wait()).await.is_ok();
        if !exited {
            if let Some(pid) = child.id() {
                // SAFETY: `pid` is a live PID owned by this `Child`; `kill()` with `SIGTERM` is a
                // standard, side-effect-free (to the caller) signal send.
                let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
                log::info!("sent SIGTERM to worker pid {pid} (rc={rc})");
            }
            let _ = child.wait().await;
        }

        self.reader_task.abort();
        self.startup_timer_task.abort();
        *self.inner.status.lock().await = WorkerStatus::Dead;
        drain_waiters(&self.inner, WaiterSignal::Down).await;
    }
}

/// Joins `argv` into a POSIX shell command line, single-quoting each argument.
fn shell_join(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| format!("'{}'", arg.replace('\'', r"'\''")))
        .collect::<Vec<_>>()
        .join(" ")
}

async fn read_output(
    inner: Arc<Inner>,
    child: Arc<AsyncMutex<Child>>,
    stdout: tokio::process::ChildStdout,
    started_at: Instant,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => break,
        };
        observe_line(&inner, &line, started_at).await;
    }

    // The child's stdout closing doesn't by itself mean the process has exited, but it's the
    // reader's only cue to reap it and learn whether it exited non-zero.
    if let Ok(status) = child.lock().await.wait().await {
        if !status.success() {
            inner.counters.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    *inner.status.lock().await = WorkerStatus::Dead;
    drain_waiters(&inner, WaiterSignal::Down).await;
}

async fn observe_line(inner: &Arc<Inner>, line: &str, started_at: Instant) {
    inner.counters.total_outputs.fetch_add(1, Ordering::SeqCst);
    *inner.counters.last_activity_at.lock().await = Instant::now();

    if CSS_BUILD_MARKERS.iter().any(|m| line.contains(m)) {
        inner.counters.css_builds.fetch_add(1, Ordering::SeqCst);
    }

    if inner.ready.load(Ordering::SeqCst) {
        return;
    }
    let matched_marker = READY_MARKERS.iter().any(|m| line.contains(m));
    let past_grace = started_at.elapsed() >= READY_GRACE_PERIOD;
    if matched_marker || (past_grace && !line.is_empty()) {
        inner.ready.store(true, Ordering::SeqCst);
        inner.ready_notify.notify_waiters();
        let mut status = inner.status.lock().await;
        if matches!(*status, WorkerStatus::Starting) {
            *status = WorkerStatus::Idle;
        }
        drop(status);
        drain_waiters(inner, WaiterSignal::Ready).await;
    }
}

async fn arm_startup_timer(inner: Arc<Inner>, startup_timeout: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(startup_timeout) => {
            if !inner.ready.load(Ordering::SeqCst) {
                drain_waiters(&inner, WaiterSignal::StartupTimeout).await;
            }
        }
        _ = inner.ready_notify.notified() => {}
    }
}

async fn drain_waiters(inner: &Arc<Inner>, signal: WaiterSignal) {
    let mut waiters = inner.waiters.lock().await;
    for tx in waiters.drain(..) {
        let _ = tx.send(signal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn echo_ready_argv() -> Vec<String> {
        vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            "echo 'Rebuilding...'; sleep 30".to_string(),
        ]
    }

    fn fp() -> Fingerprint {
        fingerprint::fingerprint(&fingerprint::OptionMap::new())
    }

    #[tokio::test]
    async fn reaches_ready_on_marker_line() {
        let worker = Worker::start(fp(), &echo_ready_argv(), &env::temp_dir(), Duration::from_secs(10))
            .await
            .unwrap();
        let outcome = worker.await_ready(Duration::from_secs(2)).await.unwrap();
        assert_eq!(outcome, ReadinessOutcome::Ready);
        assert!(worker.is_ready());
        worker.stop("test done").await;
    }

    #[tokio::test]
    async fn becomes_ready_via_grace_period_without_a_marker() {
        let argv = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            "sleep 0.2; echo hello; sleep 30".to_string(),
        ];
        let worker = Worker::start(fp(), &argv, &env::temp_dir(), Duration::from_secs(10))
            .await
            .unwrap();
        let outcome = worker.await_ready(Duration::from_secs(2)).await.unwrap();
        assert_eq!(outcome, ReadinessOutcome::Ready);
        worker.stop("test done").await;
    }

    #[tokio::test]
    async fn startup_timeout_without_any_output_leaves_worker_not_ready() {
        let argv = vec!["/bin/sh".to_string(), "-c".to_string(), "sleep 30".to_string()];
        let worker = Worker::start(fp(), &argv, &env::temp_dir(), Duration::from_millis(100))
            .await
            .unwrap();
        let outcome = worker.await_ready(Duration::from_secs(2)).await.unwrap();
        assert_eq!(outcome, ReadinessOutcome::Timeout);
        assert!(!worker.is_ready());
        worker.stop("test done").await;
    }

    #[tokio::test]
    async fn await_ready_deadline_elapses_independent_of_startup_timer() {
        let argv = vec!["/bin/sh".to_string(), "-c".to_string(), "sleep 30".to_string()];
        let worker = Worker::start(fp(), &argv, &env::temp_dir(), Duration::from_secs(10))
            .await
            .unwrap();
        let outcome = worker.await_ready(Duration::from_millis(50)).await.unwrap();
        assert_eq!(outcome, ReadinessOutcome::Timeout);
        worker.stop("test done").await;
    }

    #[tokio::test]
    async fn multiple_concurrent_waiters_are_all_notified() {
        let worker = Arc::new(
            Worker::start(fp(), &echo_ready_argv(), &env::temp_dir(), Duration::from_secs(10))
                .await
                .unwrap(),
        );
        let mut handles = Vec::new();
        for _ in 0..5 {
            let w = worker.clone();
            handles.push(tokio::spawn(async move {
                w.await_ready(Duration::from_secs(2)).await.unwrap()
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap(), ReadinessOutcome::Ready);
        }
        worker.stop("test done").await;
    }

    #[tokio::test]
    async fn stop_kills_the_child_process() {
        let argv = vec!["/bin/sh".to_string(), "-c".to_string(), "sleep 30".to_string()];
        let worker = Worker::start(fp(), &argv, &env::temp_dir(), Duration::from_secs(10))
            .await
            .unwrap();
        worker.stop("test done").await;
        assert!(!worker.is_alive().await);
    }

    #[tokio::test]
    async fn dead_child_fails_await_ready_with_worker_down() {
        let argv = vec!["/bin/sh".to_string(), "-c".to_string(), "exit 1".to_string()];
        let worker = Worker::start(fp(), &argv, &env::temp_dir(), Duration::from_secs(10))
            .await
            .unwrap();
        let outcome = worker.await_ready(Duration::from_secs(2)).await;
        assert!(matches!(outcome, Err(Error::WorkerDown(_))));
    }

    #[tokio::test]
    async fn css_build_markers_count_lines_that_lack_the_words_css_or_build() {
        let argv = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            "echo 'Rebuilding...'; echo 'Built successfully'; echo 'Done in 12ms'; sleep 30".to_string(),
        ];
        let worker = Worker::start(fp(), &argv, &env::temp_dir(), Duration::from_secs(10))
            .await
            .unwrap();
        worker.await_ready(Duration::from_secs(2)).await.unwrap();
        // Give the reader task a moment to observe the later lines past the ready marker.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let health = worker.health().await;
        assert_eq!(health.css_builds, 3);
        worker.stop("test done").await;
    }

    #[tokio::test]
    async fn errors_counts_non_zero_subprocess_exit_not_error_lines() {
        let argv = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            "echo 'this is not an error line'; exit 1".to_string(),
        ];
        let worker = Worker::start(fp(), &argv, &env::temp_dir(), Duration::from_secs(10))
            .await
            .unwrap();
        worker.await_ready(Duration::from_secs(2)).await.ok();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(worker.health().await.errors, 1);
    }

    #[tokio::test]
    async fn errors_stays_zero_on_clean_exit() {
        let argv = vec!["/bin/sh".to_string(), "-c".to_string(), "echo hi; exit 0".to_string()];
        let worker = Worker::start(fp(), &argv, &env::temp_dir(), Duration::from_secs(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(worker.health().await.errors, 0);
    }
}
