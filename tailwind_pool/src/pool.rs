//! Fingerprint-keyed Worker scheduler (§4.F).
//!
//! Grounded on the teacher's `NailgunPool`: a small `Vec` of entries protected by one mutex, each
//! entry itself wrapping its Worker in a second mutex so a caller can hold "this Worker is mine"
//! across an `.await` without holding the whole pool's lock. A bounded `Semaphore` caps the number
//! of concurrently-checked-out Workers at `max_pool_size`, exactly as the teacher bounds
//! concurrently-running nailgun servers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};

use fingerprint::{Fingerprint, OptionMap, OptionValue};

use crate::capture::{self, CaptureOutcome};
use crate::config::PoolConfig;
use crate::error::{DegradedReason, Error, ReadinessOutcome};
use crate::paths::WorkPaths;
use crate::retry;
use crate::telemetry::{self, Event, TelemetrySink};
use crate::traits::{BinaryProvider, CliRenderer, TailwindVersion};
use crate::validation;
use crate::worker::Worker;

const FINGERPRINT_VERSION_KEY: &str = "__tailwind_version";

/// One compile request: a rendered option map plus the file content to be compiled.
#[derive(Clone, Debug)]
pub struct CompileRequest {
    pub version: TailwindVersion,
    pub options: OptionMap,
    pub content: String,
}

/// The result of a compile, successful or degraded.
#[derive(Clone, Debug)]
pub struct CompileResult {
    pub fingerprint: Fingerprint,
    pub css: String,
    pub degraded: Option<DegradedReason>,
}

struct PoolEntry {
    fingerprint: Fingerprint,
    last_used: Mutex<Instant>,
    worker: Arc<Mutex<Option<Worker>>>,
}

#[derive(Default)]
struct Stats {
    port_creations: AtomicU64,
    port_reuses: AtomicU64,
    pool_exhaustions: AtomicU64,
    degraded_compilations: AtomicU64,
    compiles: AtomicU64,
    terminations: AtomicU64,
    total_lifetime_ms: AtomicU64,
}

/// A snapshot of the pool's KPIs (§4.F / §8), suitable for logging or exporting as a metric.
#[derive(Clone, Debug)]
pub struct PoolStats {
    pub pool_size: usize,
    pub port_creations: u64,
    pub port_reuses: u64,
    pub pool_exhaustions: u64,
    pub degraded_compilations: u64,
    pub compiles: u64,
    pub reuse_rate: f64,
    pub avg_port_lifetime_ms: f64,
}

/// The scheduler: one per embedding process. Cheap to clone — all state is behind `Arc`.
#[derive(Clone)]
pub struct Pool {
    config: PoolConfig,
    binary_provider: Arc<dyn BinaryProvider>,
    cli_renderer: Arc<dyn CliRenderer>,
    telemetry: Arc<dyn TelemetrySink>,
    sema: Arc<Semaphore>,
    entries: Arc<Mutex<Vec<PoolEntry>>>,
    stats: Arc<Stats>,
}

impl Pool {
    pub fn new(
        config: PoolConfig,
        binary_provider: Arc<dyn BinaryProvider>,
        cli_renderer: Arc<dyn CliRenderer>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Pool, Error> {
        config.validate()?;
        let max_pool_size = config.max_pool_size;
        Ok(Pool {
            config,
            binary_provider,
            cli_renderer,
            telemetry,
            sema: Arc::new(Semaphore::new(max_pool_size)),
            entries: Arc::default(),
            stats: Arc::default(),
        })
    }

    /// Validates the request, finds or creates a Worker for its fingerprint, writes its content,
    /// and waits for compiled output. Returns a degraded [`CompileResult`] (never an `Err`) when
    /// the Worker doesn't become ready or its output doesn't land in time — only malformed input,
    /// pool exhaustion, or a hard I/O failure are errors.
    pub async fn compile(&self, request: CompileRequest) -> Result<CompileResult, Error> {
        validation::validate_options(&request.options)?;
        let fp = fingerprint_for(request.version, &request.options);

        self.telemetry.emit(Event::new(telemetry::COMPILE_START).with_metadata(
            "fingerprint",
            fp.to_hex(),
        ));
        self.stats.compiles.fetch_add(1, Ordering::SeqCst);

        let result = self.compile_inner(fp, &request).await;
        self.emit_compile_result(fp, &result);
        result
    }

    async fn compile_inner(&self, fp: Fingerprint, request: &CompileRequest) -> Result<CompileResult, Error> {
        let (permit, worker_guard, paths) = self.acquire_worker(fp, request).await?;
        let worker = worker_guard.as_ref().expect("guard always holds a live worker");
        worker.mark_busy().await;

        let outcome = self.run_capture(fp, request, worker, &paths).await?;

        worker.mark_idle().await;
        drop(permit);
        Ok(outcome)
    }

    /// Acquires the permit and Worker for `fp`, deriving and ensuring its [`WorkPaths`] along the
    /// way. Shared by [`Pool::compile_inner`] and [`Pool::batch_compile`], which differ only in
    /// how long they keep the returned Worker checked out.
    async fn acquire_worker(
        &self,
        fp: Fingerprint,
        request: &CompileRequest,
    ) -> Result<(OwnedSemaphorePermit, OwnedMutexGuard<Option<Worker>>, WorkPaths), Error> {
        let permit = self.sema.clone().try_acquire_owned().map_err(|_| {
            self.stats.pool_exhaustions.fetch_add(1, Ordering::SeqCst);
            self.telemetry.emit(
                Event::new(telemetry::POOL_EXHAUSTED).with_metadata("fingerprint", fp.to_hex()),
            );
            Error::PoolExhausted {
                fingerprint: fp,
                pool_size: self.config.max_pool_size,
                max_pool_size: self.config.max_pool_size,
            }
        })?;

        let paths = WorkPaths::derive(&self.config.scratch_root, &fp);
        paths.ensure().await?;

        let argv = self.render_argv(request.version, &request.options, &paths).await?;
        let worker_guard = self.find_or_create(fp, &argv).await?;
        Ok((permit, worker_guard, paths))
    }

    /// Waits for readiness, then runs OutputCapture against an already-acquired, already-busy
    /// Worker. Does not touch the Worker's busy/idle status or the pool's semaphore permit — the
    /// caller owns both, since a batch partition holds them across several calls to this method.
    async fn run_capture(
        &self,
        fp: Fingerprint,
        request: &CompileRequest,
        worker: &Worker,
        paths: &WorkPaths,
    ) -> Result<CompileResult, Error> {
        let readiness = worker.await_ready(self.config.port_ready_timeout).await;
        match readiness {
            Ok(ReadinessOutcome::Ready) | Ok(ReadinessOutcome::Timeout) => {
                let baseline = capture::current_mtime(&paths.output).await;
                match capture::capture(
                    &paths.content,
                    &request.content,
                    &paths.output,
                    baseline,
                    self.config.compile_timeout,
                )
                .await?
                {
                    CaptureOutcome::Ready(css) => Ok(CompileResult {
                        fingerprint: fp,
                        css,
                        degraded: None,
                    }),
                    CaptureOutcome::Degraded(reason) => Ok(CompileResult {
                        fingerprint: fp,
                        css: tokio::fs::read_to_string(&paths.output).await.unwrap_or_default(),
                        degraded: Some(reason),
                    }),
                }
            }
            Err(Error::WorkerDown(_)) => {
                worker.stop("worker died before readiness").await;
                Err(Error::WorkerDown(fp))
            }
            Err(e) => Err(e),
        }
    }

    /// Emits `compile.stop` (bumping `degraded_compilations` if applicable) or `compile.error` for
    /// one completed compile. Shared by [`Pool::compile`] and [`Pool::batch_compile`].
    fn emit_compile_result(&self, fp: Fingerprint, result: &Result<CompileResult, Error>) {
        match result {
            Ok(outcome) => {
                let mut event =
                    Event::new(telemetry::COMPILE_STOP).with_metadata("fingerprint", fp.to_hex());
                if let Some(reason) = outcome.degraded {
                    self.stats.degraded_compilations.fetch_add(1, Ordering::SeqCst);
                    event = event.with_metadata("degraded", reason.as_str());
                }
                self.telemetry.emit(event);
            }
            Err(e) => {
                self.telemetry.emit(
                    Event::new(telemetry::COMPILE_ERROR)
                        .with_metadata("fingerprint", fp.to_hex())
                        .with_metadata("error", e.to_string()),
                );
            }
        }
    }

    /// Partitions `requests` by fingerprint, then for each partition acquires one Worker and
    /// processes its requests strictly in their input sub-order, keeping that Worker `busy` for
    /// the whole partition rather than releasing it between requests. One partition's failure
    /// (e.g. pool exhaustion) never aborts the rest of the batch — every other partition still
    /// produces its own results.
    pub async fn batch_compile(&self, requests: Vec<CompileRequest>) -> Vec<Result<CompileResult, Error>> {
        let mut results: Vec<Option<Result<CompileResult, Error>>> = requests.iter().map(|_| None).collect();
        let mut order: Vec<Fingerprint> = Vec::new();
        let mut groups: HashMap<Fingerprint, Vec<usize>> = HashMap::new();

        for (idx, request) in requests.iter().enumerate() {
            if let Err(e) = validation::validate_options(&request.options) {
                results[idx] = Some(Err(e));
                continue;
            }
            let fp = fingerprint_for(request.version, &request.options);
            if !groups.contains_key(&fp) {
                order.push(fp);
            }
            groups.entry(fp).or_default().push(idx);
        }

        for fp in order {
            let indices = groups
                .remove(&fp)
                .expect("every fingerprint in `order` was just inserted into `groups`");

            match self.acquire_worker(fp, &requests[indices[0]]).await {
                Ok((permit, worker_guard, paths)) => {
                    let worker = worker_guard.as_ref().expect("guard always holds a live worker");
                    worker.mark_busy().await;
                    for idx in &indices {
                        let request = &requests[*idx];
                        self.telemetry.emit(
                            Event::new(telemetry::COMPILE_START).with_metadata("fingerprint", fp.to_hex()),
                        );
                        self.stats.compiles.fetch_add(1, Ordering::SeqCst);
                        let outcome = self.run_capture(fp, request, worker, &paths).await;
                        self.emit_compile_result(fp, &outcome);
                        results[*idx] = Some(outcome);
                    }
                    worker.mark_idle().await;
                    drop(permit);
                }
                Err(e) => {
                    for idx in indices {
                        self.telemetry.emit(
                            Event::new(telemetry::COMPILE_START).with_metadata("fingerprint", fp.to_hex()),
                        );
                        self.stats.compiles.fetch_add(1, Ordering::SeqCst);
                        let outcome: Result<CompileResult, Error> = Err(e.clone());
                        self.emit_compile_result(fp, &outcome);
                        results[idx] = Some(outcome);
                    }
                }
            }
        }

        results
            .into_iter()
            .map(|r| r.expect("every index is filled by validation or partition processing above"))
            .collect()
    }

    /// Spawns (or confirms the liveness of) a Worker for `version`/`options` without compiling
    /// anything, so the first real request doesn't pay startup latency.
    pub async fn warm_up(&self, version: TailwindVersion, options: &OptionMap) -> Result<(), Error> {
        validation::validate_options(options)?;
        let fp = fingerprint_for(version, options);
        let paths = WorkPaths::derive(&self.config.scratch_root, &fp);
        paths.ensure().await?;
        let argv = self.render_argv(version, options, &paths).await?;
        let guard = self.find_or_create(fp, &argv).await?;
        guard.as_ref().expect("guard always holds a live worker").mark_idle().await;
        Ok(())
    }

    pub async fn stats(&self) -> PoolStats {
        let pool_size = self.entries.lock().await.len();
        let port_creations = self.stats.port_creations.load(Ordering::SeqCst);
        let port_reuses = self.stats.port_reuses.load(Ordering::SeqCst);
        let total_acquisitions = port_creations + port_reuses;
        let reuse_rate = if total_acquisitions == 0 {
            0.0
        } else {
            port_reuses as f64 / total_acquisitions as f64
        };
        let terminations = self.stats.terminations.load(Ordering::SeqCst);
        let avg_port_lifetime_ms = if terminations == 0 {
            0.0
        } else {
            self.stats.total_lifetime_ms.load(Ordering::SeqCst) as f64 / terminations as f64
        };
        let stats = PoolStats {
            pool_size,
            port_creations,
            port_reuses,
            pool_exhaustions: self.stats.pool_exhaustions.load(Ordering::SeqCst),
            degraded_compilations: self.stats.degraded_compilations.load(Ordering::SeqCst),
            compiles: self.stats.compiles.load(Ordering::SeqCst),
            reuse_rate,
            avg_port_lifetime_ms,
        };
        self.telemetry.emit(
            Event::new(telemetry::METRICS_SNAPSHOT)
                .with_measurement("pool_size", stats.pool_size as u64)
                .with_measurement("reuse_rate", stats.reuse_rate)
                .with_measurement("avg_port_lifetime_ms", stats.avg_port_lifetime_ms),
        );
        stats
    }

    /// Stops and drops every idle Worker whose `last_used` exceeds `idle_timeout`. Intended to be
    /// driven by an embedder's own periodic task (e.g. a `tokio::time::interval` loop) — this
    /// crate does not spawn its own background maintenance task, so an embedder controls the
    /// cadence and can observe each sweep's outcome.
    pub async fn run_maintenance(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let mut evicted = 0_usize;
        let mut keep = Vec::with_capacity(entries.len());
        for entry in entries.drain(..) {
            let idle_for = entry.last_used.lock().await.elapsed();
            let guard = entry.worker.clone().try_lock_owned();
            match guard {
                Ok(mut guard) if idle_for >= self.config.idle_timeout => {
                    if let Some(worker) = guard.take() {
                        self.terminate(worker, "idle timeout").await;
                    }
                    evicted += 1;
                }
                _ => keep.push(entry),
            }
        }
        *entries = keep;
        let count = entries.len();
        drop(entries);
        self.telemetry.emit(
            Event::new(telemetry::MAINTENANCE_CLEANUP_COMPLETED)
                .with_measurement("evicted", evicted as u64)
                .with_measurement("remaining", count as u64),
        );
        evicted
    }

    /// Stops `worker`, records its lifetime for `avg_port_lifetime_ms`, and emits
    /// `pool.port_terminated`.
    async fn terminate(&self, worker: Worker, reason: &str) {
        let lifetime_ms = worker.created_at.elapsed().as_millis() as u64;
        let fp = worker.fingerprint;
        worker.stop(reason).await;
        self.stats.terminations.fetch_add(1, Ordering::SeqCst);
        self.stats.total_lifetime_ms.fetch_add(lifetime_ms, Ordering::SeqCst);
        self.telemetry.emit(
            Event::new(telemetry::POOL_PORT_TERMINATED)
                .with_metadata("fingerprint", fp.to_hex())
                .with_metadata("reason", reason)
                .with_measurement("lifetime_ms", lifetime_ms),
        );
    }

    /// Renders argv for `options`, after substituting the caller's `input`/`output`/`content`
    /// entries with this fingerprint's [`WorkPaths`]. The CLI is always pointed at the pool's own
    /// scratch files — a caller's nominal paths only ever participate in the fingerprint, since a
    /// compile's result is handed back as bytes, never left for the caller to read off disk.
    async fn render_argv(
        &self,
        version: TailwindVersion,
        options: &OptionMap,
        paths: &WorkPaths,
    ) -> Result<Vec<String>, Error> {
        let binary = self.binary_provider.resolve(version).await?;
        validation::validate_non_empty("tailwind binary path", &binary)?;
        let mut effective_options = options.clone();
        effective_options.insert(
            "input".to_string(),
            OptionValue::Path(paths.input.to_string_lossy().into_owned()),
        );
        effective_options.insert(
            "output".to_string(),
            OptionValue::Path(paths.output.to_string_lossy().into_owned()),
        );
        effective_options.insert(
            "content".to_string(),
            OptionValue::Path(paths.content.to_string_lossy().into_owned()),
        );
        let mut argv = vec![binary];
        argv.extend(self.cli_renderer.render(version, &effective_options));
        Ok(argv)
    }

    /// The acquisition protocol: reuse a live, matching, idle Worker if one exists; otherwise
    /// evict the least-recently-used idle Worker if the pool is already at capacity, then spawn a
    /// fresh one. Mirrors `NailgunPool::acquire`/`find_usable`/`find_lru_idle`.
    async fn find_or_create(
        &self,
        fp: Fingerprint,
        argv: &[String],
    ) -> Result<OwnedMutexGuard<Option<Worker>>, Error> {
        let slot = {
            let mut entries = self.entries.lock().await;

            if let Some(guard) = Self::find_usable(&mut entries, fp).await {
                self.stats.port_reuses.fetch_add(1, Ordering::SeqCst);
                self.telemetry.emit(
                    Event::new(telemetry::POOL_PORT_REUSED).with_metadata("fingerprint", fp.to_hex()),
                );
                return Ok(guard);
            }

            if entries.len() >= self.config.max_pool_size {
                if let Some(idx) = Self::find_lru_idle(&entries).await {
                    let evicted = entries.swap_remove(idx);
                    if let Some(worker) = evicted.worker.lock_owned().await.take() {
                        self.terminate(worker, "evicted for new fingerprint").await;
                    }
                } else {
                    self.stats.pool_exhaustions.fetch_add(1, Ordering::SeqCst);
                    return Err(Error::PoolExhausted {
                        fingerprint: fp,
                        pool_size: entries.len(),
                        max_pool_size: self.config.max_pool_size,
                    });
                }
            }

            let worker = Arc::new(Mutex::new(None));
            entries.push(PoolEntry {
                fingerprint: fp,
                last_used: Mutex::new(Instant::now()),
                worker: worker.clone(),
            });
            worker.lock_owned().await
        };

        let mut slot = slot;
        let paths = WorkPaths::derive(&self.config.scratch_root, &fp);
        paths.ensure().await?;
        let cwd = paths.input.parent().unwrap_or(&self.config.scratch_root).to_owned();
        let startup_timeout = self.config.startup_timeout;
        let argv = argv.to_vec();
        let worker = retry::with_backoff(
            || {
                let argv = argv.clone();
                let cwd = cwd.clone();
                async move { Worker::start(fp, &argv, &cwd, startup_timeout).await }
            },
            self.config.retry_max_attempts,
            self.config.retry_base_delay,
            self.config.retry_factor,
        )
        .await?;
        *slot = Some(worker);
        self.stats.port_creations.fetch_add(1, Ordering::SeqCst);
        self.telemetry.emit(
            Event::new(telemetry::POOL_PORT_CREATED).with_metadata("fingerprint", fp.to_hex()),
        );
        Ok(slot)
    }

    async fn find_usable(entries: &mut [PoolEntry], fp: Fingerprint) -> Option<OwnedMutexGuard<Option<Worker>>> {
        for entry in entries.iter() {
            if entry.fingerprint != fp {
                continue;
            }
            let Ok(guard) = entry.worker.clone().try_lock_owned() else {
                continue;
            };
            if guard.is_none() {
                continue;
            }
            if !guard.as_ref().unwrap().is_alive().await {
                continue;
            }
            *entry.last_used.lock().await = Instant::now();
            return Some(guard);
        }
        None
    }

    async fn find_lru_idle(entries: &[PoolEntry]) -> Option<usize> {
        let mut lru: Option<(usize, Instant)> = None;
        for (idx, entry) in entries.iter().enumerate() {
            if entry.worker.try_lock().is_err() {
                continue;
            }
            let last_used = *entry.last_used.lock().await;
            if lru.is_none_or(|(_, oldest)| last_used < oldest) {
                lru = Some((idx, last_used));
            }
        }
        lru.map(|(idx, _)| idx)
    }
}

fn fingerprint_for(version: TailwindVersion, options: &OptionMap) -> Fingerprint {
    let mut map = options.clone();
    let version_str = match version {
        TailwindVersion::V3 => "v3",
        TailwindVersion::V4 => "v4",
    };
    map.insert(
        FINGERPRINT_VERSION_KEY.to_string(),
        OptionValue::Path(version_str.to_string()),
    );
    fingerprint::fingerprint(&map)
}
