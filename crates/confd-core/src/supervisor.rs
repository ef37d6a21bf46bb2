//! Top-level daemon lifecycle: resolve configuration, build a backend,
//! discover resources, spawn the scheduler, and keep the process alive
//! until a signal asks it to stop or reload.
//!
//! Reload (`SIGHUP`) is implemented as a full restart of the backend and
//! scheduler rather than in-place resource-set diffing: the supervisor tears
//! down the current scheduler, re-resolves configuration from disk, and
//! spawns a fresh one. Simpler than diffing, and resource threads are cheap
//! enough to recreate that the restart is unobservable in practice.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use confd_backend::build_backend;
use confd_commit::CommitOptions;
use confd_config::{discover_resources, load_global_config, resolve, CliOverrides, ResolvedConfig};
use confd_render::Renderer;
use confd_retry::RetryPolicy;
use confd_scheduler::{ResourceSchedule, Scheduler};
use confd_snapshot::Snapshot;
use confd_types::TemplateResource;

use crate::discovery::resolve_srv;
use crate::http::{self, Readiness};
use crate::metrics::CountingMetrics;
use crate::notify;

const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(60);

/// Which of confd-rs's six run modes a [`Supervisor`] should execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Run every resource's cycle once and exit.
    Onetime,
    /// Run forever, long-polling/watching backends that support it.
    Watch,
    /// Run forever, polling on each resource's configured interval.
    Default,
    /// Fetch and render every resource without committing anything.
    Preflight,
    /// Load and validate configuration files only.
    CheckConfig,
    /// `check-config` plus a live backend connectivity probe.
    Validate,
}

pub struct Supervisor {
    config_path: PathBuf,
    cli: CliOverrides,
    http_addr: Option<String>,
    commit_options: CommitOptions,
}

impl Supervisor {
    pub fn new(config_path: PathBuf, cli: CliOverrides) -> Self {
        Self {
            config_path,
            cli,
            http_addr: Some("0.0.0.0:4001".to_string()),
            commit_options: CommitOptions::default(),
        }
    }

    pub fn with_http_addr(mut self, addr: Option<String>) -> Self {
        self.http_addr = addr;
        self
    }

    pub fn with_commit_options(mut self, options: CommitOptions) -> Self {
        self.commit_options = options;
        self
    }

    fn load(&self) -> Result<(ResolvedConfig, Vec<TemplateResource>)> {
        let file = load_global_config(&self.config_path)
            .with_context(|| format!("loading config file {}", self.config_path.display()))?;
        let resolved = resolve(&file, &self.cli).context("resolving configuration")?;
        let resources = discover_resources(&resolved.confdir)
            .with_context(|| format!("discovering resources under {}", resolved.confdir.display()))?;
        Ok((resolved, resources))
    }

    pub fn run(&self, mode: ExecutionMode) -> Result<()> {
        match mode {
            ExecutionMode::CheckConfig => self.run_check_config(),
            ExecutionMode::Validate => self.run_validate(),
            ExecutionMode::Preflight => self.run_preflight(),
            ExecutionMode::Onetime => self.run_onetime(),
            ExecutionMode::Watch | ExecutionMode::Default => self.run_daemon(mode),
        }
    }

    fn run_check_config(&self) -> Result<()> {
        let (resolved, resources) = self.load()?;
        log::info!(
            "config ok: backend={:?} confdir={} resources={}",
            resolved.backend.kind,
            resolved.confdir.display(),
            resources.len()
        );
        Ok(())
    }

    fn run_validate(&self) -> Result<()> {
        let (resolved, _resources) = self.load()?;
        let backend = build_backend_with_discovery(&resolved)?;
        backend.health_check().context("backend health check failed")?;
        log::info!("backend {:?} reachable", resolved.backend.kind);
        Ok(())
    }

    /// Connects, health-checks, and fetches every resource's declared keys
    /// without rendering or committing anything — a pure connectivity/data
    /// probe, not a dry run of the render pipeline.
    fn run_preflight(&self) -> Result<()> {
        let (resolved, resources) = self.load()?;
        let backend = build_backend_with_discovery(&resolved)?;
        backend.health_check().context("backend health check failed")?;
        for resource in &resources {
            backend
                .get_values(&resource.keys)
                .with_context(|| format!("fetching keys for resource {}", resource.name))?;
            log::info!("resource {}: keys fetched", resource.name);
        }
        Ok(())
    }

    fn run_onetime(&self) -> Result<()> {
        let (resolved, resources) = self.load()?;
        let backend = build_backend_with_discovery(&resolved)?;
        let renderer = Renderer::new();
        for resource in &resources {
            let snapshot = backend
                .get_values(&resource.keys)
                .with_context(|| format!("fetching keys for resource {}", resource.name))?;
            let rendered = renderer
                .render(&resource.src, &Snapshot::from_kv(snapshot), resource.output_format)
                .with_context(|| format!("rendering resource {}", resource.name))?;
            let outcome = confd_commit::commit_with_options(
                resource,
                &rendered,
                Some(DEFAULT_CHECK_TIMEOUT),
                self.commit_options,
            )
            .with_context(|| format!("committing resource {}", resource.name))?;
            log::info!(
                "resource {}: changed={} checked={} reloaded={}",
                resource.name,
                outcome.changed,
                outcome.checked,
                outcome.reloaded
            );
        }
        Ok(())
    }

    fn run_daemon(&self, mode: ExecutionMode) -> Result<()> {
        let notify_hook = notify::from_env();
        let mut reload = true;
        while reload {
            reload = self.run_one_generation(mode, notify_hook.as_ref())?;
        }
        notify_hook.stopping();
        Ok(())
    }

    /// Runs one backend/scheduler lifetime. Returns `Ok(true)` if it exited
    /// because of a reload request (caller should start another
    /// generation), `Ok(false)` on a clean shutdown, `Err` if a resource hit
    /// a fatal fail-fast error.
    fn run_one_generation(&self, mode: ExecutionMode, notify_hook: &dyn notify::NotifyHook) -> Result<bool> {
        let (resolved, resources) = self.load()?;
        let backend = build_backend_with_discovery(&resolved)?;
        let backend: Arc<dyn confd_backend::Backend> = Arc::from(backend);

        let default_retry = RetryPolicy::Default.to_config();
        let retry_config = confd_retry::RetryStrategyConfig {
            max_attempts: resolved.backend.retry_max_attempts.unwrap_or(default_retry.max_attempts),
            base_delay: resolved.backend.retry_base_delay.unwrap_or(default_retry.base_delay),
            max_delay: resolved.backend.retry_max_delay.unwrap_or(default_retry.max_delay),
            ..default_retry
        };

        let watch = matches!(mode, ExecutionMode::Watch) || resolved.watch;
        let schedules: Vec<ResourceSchedule> = resources
            .into_iter()
            .map(|resource| ResourceSchedule {
                resource,
                watch,
                interval: resolved.interval,
                debounce: resolved.debounce,
                failure_mode: resolved.failure_mode,
                check_timeout: Some(DEFAULT_CHECK_TIMEOUT),
                retry: retry_config.clone(),
                commit_options: self.commit_options,
            })
            .collect();

        let metrics = Arc::new(CountingMetrics::new());
        let scheduler = Scheduler::spawn(schedules, backend.clone(), metrics.clone());
        let shutdown = Arc::new(AtomicBool::new(false));
        let reload = Arc::new(AtomicBool::new(false));

        let mut signals = Signals::new([SIGTERM, SIGINT, SIGHUP]).context("registering signal handlers")?;
        let signals_handle = signals.handle();
        let shutdown_for_signals = Arc::clone(&shutdown);
        let reload_for_signals = Arc::clone(&reload);
        let signal_thread = thread::spawn(move || {
            for sig in signals.forever() {
                match sig {
                    SIGHUP => {
                        reload_for_signals.store(true, Ordering::SeqCst);
                        shutdown_for_signals.store(true, Ordering::SeqCst);
                        break;
                    }
                    _ => {
                        shutdown_for_signals.store(true, Ordering::SeqCst);
                        break;
                    }
                }
            }
        });

        let readiness = Readiness::new(Arc::clone(&backend));
        notify_hook.ready();

        let http_thread = match &self.http_addr {
            Some(addr) => {
                let scheduler_shutdown = confd_scheduler::ShutdownSignal::new();
                let handle =
                    http::spawn(addr, Arc::clone(&readiness), Arc::clone(&metrics), Arc::clone(&scheduler_shutdown))
                        .ok();
                handle.map(|h| (h, scheduler_shutdown))
            }
            None => None,
        };

        let mut fatal_reason = None;
        while !shutdown.load(Ordering::SeqCst) {
            if let Some(reason) = scheduler.fatal_reason() {
                fatal_reason = Some(reason);
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            thread::sleep(Duration::from_millis(200));
        }

        signals_handle.close();
        let _ = signal_thread.join();

        scheduler.shutdown();
        scheduler.join();

        if let Some((handle, http_shutdown)) = http_thread {
            http_shutdown.trigger();
            let _ = handle.join();
        }

        if let Some(reason) = fatal_reason {
            anyhow::bail!(reason);
        }

        if reload.load(Ordering::SeqCst) {
            notify_hook.reloading();
            log::info!("reloading on SIGHUP");
            return Ok(true);
        }

        Ok(false)
    }
}

fn build_backend_with_discovery(resolved: &ResolvedConfig) -> Result<Box<dyn confd_backend::Backend>> {
    let mut backend_config = resolved.backend.clone();
    if backend_config.nodes.is_empty() {
        if let (Some(domain), Some(record)) = (&backend_config.srv_domain, &backend_config.srv_record) {
            backend_config.nodes = resolve_srv(domain, record).context("resolving SRV nodes")?;
        }
    }
    build_backend(&backend_config).map_err(anyhow::Error::from)
}
