//! Per-resource scheduling: one OS thread per `template-resource`, each
//! running its own fetch/debounce/render/commit cycle, sleeping on a
//! cancellable condition variable so shutdown doesn't have to wait out a
//! long poll interval.
//!
//! Mirrors the teacher's chunked `thread::spawn` + `join` dispatch in its
//! parallel publish engine, but each resource gets its own long-lived
//! thread rather than a short-lived one per unit of work, since resources
//! run forever until shutdown rather than completing once.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use confd_backend::{Backend, WatchOutcome, WatchUnsupported};
use confd_commit::CommitOutcome;
use confd_render::Renderer;
use confd_retry::calculate_delay;
use confd_snapshot::Snapshot;
use confd_types::{ConfdError, FailureMode, KeyFingerprint, TemplateResource};

/// Recorded once per resource cycle. `NullMetrics` is the default — no
/// metrics backend ships in this crate, but `confd-core` wires a counting
/// implementation into its `/metrics` HTTP endpoint.
pub trait Metrics: Send + Sync {
    fn cycle_committed(&self, resource: &str) {
        let _ = resource;
    }
    fn cycle_unchanged(&self, resource: &str) {
        let _ = resource;
    }
    fn cycle_failed(&self, resource: &str, error: &str) {
        let _ = (resource, error);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetrics;

impl Metrics for NullMetrics {}

/// Per-resource runtime knobs, resolved from global config + any
/// per-resource overrides before the scheduler starts.
#[derive(Debug, Clone)]
pub struct ResourceSchedule {
    pub resource: TemplateResource,
    pub watch: bool,
    pub interval: Duration,
    pub debounce: Duration,
    pub failure_mode: FailureMode,
    pub check_timeout: Option<Duration>,
    pub retry: confd_retry::RetryStrategyConfig,
    pub commit_options: confd_commit::CommitOptions,
}

/// A cancellable sleep shared by every resource thread. `trigger` wakes
/// every sleeping thread immediately instead of letting them run out their
/// interval, so graceful shutdown is prompt even with hour-long intervals.
#[derive(Default)]
pub struct ShutdownSignal {
    state: Mutex<bool>,
    cond: Condvar,
    fatal: Mutex<Option<String>>,
}

impl ShutdownSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { state: Mutex::new(false), cond: Condvar::new(), fatal: Mutex::new(None) })
    }

    pub fn trigger(&self) {
        *self.state.lock().expect("shutdown mutex poisoned") = true;
        self.cond.notify_all();
    }

    /// Records a fatal, fail-fast error and triggers shutdown of every
    /// resource thread sharing this signal. The first fatal reason wins;
    /// later calls only trigger shutdown without overwriting it.
    pub fn trigger_fatal(&self, reason: String) {
        let mut fatal = self.fatal.lock().expect("fatal mutex poisoned");
        if fatal.is_none() {
            *fatal = Some(reason);
        }
        drop(fatal);
        self.trigger();
    }

    pub fn fatal_reason(&self) -> Option<String> {
        self.fatal.lock().expect("fatal mutex poisoned").clone()
    }

    pub fn is_triggered(&self) -> bool {
        *self.state.lock().expect("shutdown mutex poisoned")
    }

    /// Sleeps up to `dur`, waking early if `trigger` is called. Returns
    /// `true` if shutdown was signaled, `false` if the sleep ran its course.
    pub fn sleep(&self, dur: Duration) -> bool {
        let guard = self.state.lock().expect("shutdown mutex poisoned");
        let (guard, _) = self
            .cond
            .wait_timeout_while(guard, dur, |triggered| !*triggered)
            .expect("shutdown condvar poisoned");
        *guard
    }
}

/// Handle to the running per-resource threads; `shutdown` stops them and
/// `join` waits for them to exit.
pub struct Scheduler {
    shutdown: Arc<ShutdownSignal>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawns one thread per resource. `backend` and `metrics` are shared
    /// read-only across every resource thread behind their `Arc`s.
    pub fn spawn(
        schedules: Vec<ResourceSchedule>,
        backend: Arc<dyn Backend>,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        let shutdown = ShutdownSignal::new();
        let handles = schedules
            .into_iter()
            .map(|schedule| {
                let backend = Arc::clone(&backend);
                let metrics = Arc::clone(&metrics);
                let shutdown = Arc::clone(&shutdown);
                thread::spawn(move || run_resource(schedule, backend, metrics, shutdown))
            })
            .collect();
        Self { shutdown, handles }
    }

    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// `Some(reason)` once a resource thread has hit a non-retryable error
    /// under `FailureMode::FailFast`, which also triggers shutdown of every
    /// other resource thread sharing this scheduler.
    pub fn fatal_reason(&self) -> Option<String> {
        self.shutdown.fatal_reason()
    }

    pub fn join(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

enum CycleOutcome {
    NoChange,
    Committed(CommitOutcome),
}

struct ResourceState {
    watch: bool,
    wait_index: Option<u64>,
    last_fingerprint: Option<KeyFingerprint>,
}

fn run_resource(
    schedule: ResourceSchedule,
    backend: Arc<dyn Backend>,
    metrics: Arc<dyn Metrics>,
    shutdown: Arc<ShutdownSignal>,
) {
    let renderer = Renderer::new();
    let retry_config = schedule.retry.clone();
    let mut state = ResourceState { watch: schedule.watch, wait_index: None, last_fingerprint: None };
    let mut attempt: u32 = 0;

    loop {
        if shutdown.is_triggered() {
            return;
        }

        match run_cycle(&schedule, &backend, &renderer, &mut state, &shutdown) {
            Ok(CycleOutcome::Committed(outcome)) => {
                attempt = 0;
                metrics.cycle_committed(&schedule.resource.name);
                log::info!(
                    "resource {}: committed (checked={}, reloaded={})",
                    schedule.resource.name,
                    outcome.checked,
                    outcome.reloaded
                );
                if shutdown.sleep(schedule.interval) {
                    return;
                }
            }
            Ok(CycleOutcome::NoChange) => {
                attempt = 0;
                metrics.cycle_unchanged(&schedule.resource.name);
                if !state.watch && shutdown.sleep(schedule.interval) {
                    return;
                }
            }
            Err(e) => {
                log::warn!("resource {}: cycle failed: {e}", schedule.resource.name);
                metrics.cycle_failed(&schedule.resource.name, &e.to_string());
                if !e.is_retryable() && schedule.failure_mode == FailureMode::FailFast {
                    let reason = format!("resource {}: fatal error (fail-fast): {e}", schedule.resource.name);
                    log::error!("{reason}");
                    shutdown.trigger_fatal(reason);
                    return;
                }
                attempt += 1;
                let delay = calculate_delay(&retry_config, attempt);
                if shutdown.sleep(delay) {
                    return;
                }
            }
        }
    }
}

fn run_cycle(
    schedule: &ResourceSchedule,
    backend: &Arc<dyn Backend>,
    renderer: &Renderer,
    state: &mut ResourceState,
    shutdown: &Arc<ShutdownSignal>,
) -> Result<CycleOutcome, ConfdError> {
    let resource = &schedule.resource;

    if state.watch {
        let prefix = resource.prefix.clone().unwrap_or_else(|| "/".to_string());
        match backend.watch_prefix(&prefix, state.wait_index, schedule.interval)? {
            Ok(WatchOutcome::Unchanged { wait_index }) => {
                state.wait_index = wait_index;
                return Ok(CycleOutcome::NoChange);
            }
            Ok(WatchOutcome::Changed { wait_index }) => {
                state.wait_index =
                    settle_debounce(backend, &prefix, wait_index, schedule.debounce, shutdown)?;
            }
            Err(WatchUnsupported) => {
                log::info!("resource {}: backend has no watch support, falling back to polling", resource.name);
                state.watch = false;
            }
        }
    }

    let snapshot = backend.get_values(&resource.keys)?;
    let fingerprint =
        KeyFingerprint::from_pairs(snapshot.values.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    if state.last_fingerprint.as_ref() == Some(&fingerprint) && !resource.reload_on_no_change {
        return Ok(CycleOutcome::NoChange);
    }
    state.last_fingerprint = Some(fingerprint);

    let rendered = renderer.render(&resource.src, &Snapshot::from_kv(snapshot), resource.output_format)?;
    let outcome = confd_commit::commit_with_options(
        resource,
        &rendered,
        schedule.check_timeout,
        schedule.commit_options,
    )?;
    Ok(CycleOutcome::Committed(outcome))
}

/// After a watch reports a change, keep re-arming a short long-poll until
/// one comes back quiet for the full `debounce` window, resetting the
/// deadline every time another change lands in the meantime.
fn settle_debounce(
    backend: &Arc<dyn Backend>,
    prefix: &str,
    mut wait_index: Option<u64>,
    debounce: Duration,
    shutdown: &Arc<ShutdownSignal>,
) -> Result<Option<u64>, ConfdError> {
    if debounce.is_zero() {
        return Ok(wait_index);
    }

    let mut deadline = Instant::now() + debounce;
    loop {
        if shutdown.is_triggered() {
            return Ok(wait_index);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(wait_index);
        }
        match backend.watch_prefix(prefix, wait_index, remaining)? {
            Ok(WatchOutcome::Unchanged { .. }) => return Ok(wait_index),
            Ok(WatchOutcome::Changed { wait_index: new_index }) => {
                wait_index = new_index;
                deadline = Instant::now() + debounce;
            }
            Err(WatchUnsupported) => return Ok(wait_index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confd_types::{BackendKind, KvSnapshot};
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct CountingBackend {
        calls: AtomicUsize,
        value: String,
    }

    impl Backend for CountingBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Env
        }

        fn get_values(&self, _keys: &[String]) -> Result<KvSnapshot, ConfdError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut values = BTreeMap::new();
            values.insert("/app/name".to_string(), self.value.clone());
            Ok(KvSnapshot { values })
        }

        fn health_check(&self) -> Result<(), ConfdError> {
            Ok(())
        }
    }

    fn resource(dir: &Path, name: &str) -> TemplateResource {
        let src = dir.join("t.tmpl");
        fs::write(&src, "name={{getv \"/app/name\"}}").unwrap();
        TemplateResource {
            name: name.to_string(),
            src,
            dest: dir.join("out.conf"),
            keys: vec!["/app".to_string()],
            mode: None,
            uid: None,
            gid: None,
            check_cmd: None,
            reload_cmd: None,
            prefix: Some("/app".to_string()),
            reload_on_no_change: false,
            output_format: None,
        }
    }

    #[test]
    fn shutdown_signal_wakes_sleeping_thread_immediately() {
        let signal = ShutdownSignal::new();
        let waiter = Arc::clone(&signal);
        let handle = thread::spawn(move || waiter.sleep(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        signal.trigger();
        let woke_due_to_shutdown = handle.join().unwrap();
        assert!(woke_due_to_shutdown);
    }

    #[test]
    fn onetime_cycle_commits_rendered_output() {
        let dir = tempdir().unwrap();
        let backend: Arc<dyn Backend> =
            Arc::new(CountingBackend { calls: AtomicUsize::new(0), value: "demo".to_string() });
        let schedule = ResourceSchedule {
            resource: resource(dir.path(), "demo"),
            watch: false,
            interval: Duration::from_secs(600),
            debounce: Duration::ZERO,
            failure_mode: FailureMode::BestEffort,
            check_timeout: None,
            retry: confd_retry::RetryStrategyConfig::default(),
            commit_options: confd_commit::CommitOptions::default(),
        };
        let renderer = Renderer::new();
        let shutdown = ShutdownSignal::new();
        let mut state = ResourceState { watch: false, wait_index: None, last_fingerprint: None };
        let outcome = run_cycle(&schedule, &backend, &renderer, &mut state, &shutdown).unwrap();
        assert!(matches!(outcome, CycleOutcome::Committed(_)));
        assert_eq!(fs::read_to_string(dir.path().join("out.conf")).unwrap(), "name=demo");
    }

    #[test]
    fn unchanged_fingerprint_skips_commit() {
        let dir = tempdir().unwrap();
        let backend: Arc<dyn Backend> =
            Arc::new(CountingBackend { calls: AtomicUsize::new(0), value: "demo".to_string() });
        let schedule = ResourceSchedule {
            resource: resource(dir.path(), "demo"),
            watch: false,
            interval: Duration::from_secs(600),
            debounce: Duration::ZERO,
            failure_mode: FailureMode::BestEffort,
            check_timeout: None,
            retry: confd_retry::RetryStrategyConfig::default(),
            commit_options: confd_commit::CommitOptions::default(),
        };
        let renderer = Renderer::new();
        let shutdown = ShutdownSignal::new();
        let mut state = ResourceState { watch: false, wait_index: None, last_fingerprint: None };
        run_cycle(&schedule, &backend, &renderer, &mut state, &shutdown).unwrap();
        let second = run_cycle(&schedule, &backend, &renderer, &mut state, &shutdown).unwrap();
        assert!(matches!(second, CycleOutcome::NoChange));
    }
}
