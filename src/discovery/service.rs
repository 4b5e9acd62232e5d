//! Discovery service
//!
//! Drives one backend on a fixed interval, folds each sample into the
//! membership registry and publishes the resulting transitions. A second
//! task sweeps stale entries and publishes `Lost` for each.
//!
//! ```text
//!   Stopped --start--> Running --stop--> Stopped
//!                        |
//!                        +-- discovery cycle  every interval
//!                        +-- sweep cycle      every sweep_multiplier x interval
//! ```
//!
//! A failed or timed-out sample counts as zero observations. Only the sweep
//! decides that a node is gone.
//!
//! Cycles never overlap: each one applies its registry change and publishes
//! the resulting events before the next may touch the registry, so every
//! observer sees a node's transitions in registry order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};

use super::backend::{create_backend, dedup_by_id, SharedBackend};
use super::bus::{EventBus, ObserverId};
use super::error::{BackendError, DiscoveryError};
use super::event::{FnObserver, MembershipEvent, MembershipObserver};
use super::membership::{MemberEntry, MembershipRegistry, MembershipStats};
use super::node::ObservedNode;
use crate::config::DiscoveryConfig;
use crate::metrics;

// ============================================================================
// Shared State
// ============================================================================

struct Inner {
    config: DiscoveryConfig,
    backend: SharedBackend,
    registry: MembershipRegistry,
    bus: EventBus,
    /// Serialises cycles from registry mutation through publish
    cycle: Mutex<()>,
    /// Held for reading while a cycle writes to the registry; set while
    /// `stop` drains tasks so late results are discarded
    stopping: RwLock<bool>,
}

impl Inner {
    async fn sample(&self) -> Vec<ObservedNode> {
        let backend = self.backend.name();
        let timeout = self.config.timeout();
        let _timer = metrics::start_sample_timer(backend);

        let result = match tokio::time::timeout(timeout, self.backend.sample()).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(timeout)),
        };

        match result {
            Ok(nodes) => dedup_by_id(nodes),
            Err(e) => {
                tracing::warn!(backend, error = %e, "Discovery sample failed, treating as empty");
                metrics::record_sample_error(backend, e.kind());
                Vec::new()
            }
        }
    }

    async fn discovery_cycle(&self) -> Vec<MembershipEvent> {
        let observed = self.sample().await;
        let observed_count = observed.len();

        let _cycle = self.cycle.lock().await;
        let gate = self.stopping.read().await;
        if *gate {
            tracing::debug!(observed = observed_count, "Discarding sample that finished after stop");
            return Vec::new();
        }

        let events = self
            .registry
            .apply(observed, self.backend.pins_entries())
            .await;
        let members = self.registry.len().await;
        drop(gate);

        tracing::debug!(
            observed = observed_count,
            transitions = events.len(),
            members,
            "Discovery cycle complete"
        );
        metrics::record_cycle("discovery");
        metrics::set_members(members);

        self.emit(&events);
        events
    }

    async fn sweep_cycle(&self) -> Vec<MembershipEvent> {
        let _cycle = self.cycle.lock().await;
        let gate = self.stopping.read().await;
        if *gate {
            return Vec::new();
        }

        let lost = self
            .registry
            .sweep_stale(self.config.staleness_threshold())
            .await;
        let members = self.registry.len().await;
        drop(gate);

        metrics::record_cycle("sweep");
        metrics::set_members(members);

        let events: Vec<MembershipEvent> = lost.into_iter().map(MembershipEvent::lost).collect();
        self.emit(&events);
        events
    }

    fn emit(&self, events: &[MembershipEvent]) {
        for event in events {
            tracing::info!(
                kind = %event.kind,
                id = %event.node.id,
                ip = %event.node.ip,
                port = event.node.port,
                "Membership transition"
            );
            metrics::record_event(event.kind.as_str());
            self.bus.publish(event);
        }
    }
}

struct RunState {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

// ============================================================================
// Discovery Service
// ============================================================================

/// Orchestrator for one discovery backend
pub struct DiscoveryService {
    inner: Arc<Inner>,
    run: Mutex<Option<RunState>>,
    running: AtomicBool,
}

impl DiscoveryService {
    /// Create a service around an existing backend
    ///
    /// Configuration is validated here, before any task exists.
    pub fn new(config: DiscoveryConfig, backend: SharedBackend) -> Result<Self, DiscoveryError> {
        config
            .validate()
            .map_err(|e| DiscoveryError::Config(e.to_string()))?;

        let bus = EventBus::new(config.observer_queue_capacity);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                backend,
                registry: MembershipRegistry::new(),
                bus,
                cycle: Mutex::new(()),
                stopping: RwLock::new(false),
            }),
            run: Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    /// Create a service with the backend named in the configuration
    ///
    /// Unparseable static addresses surface as [`DiscoveryError::Config`].
    pub fn from_config(config: DiscoveryConfig) -> Result<Self, DiscoveryError> {
        config
            .validate()
            .map_err(|e| DiscoveryError::Config(e.to_string()))?;

        let backend = create_backend(&config).map_err(|e| {
            if e.is_config() {
                DiscoveryError::Config(e.to_string())
            } else {
                DiscoveryError::Backend(e)
            }
        })?;
        Self::new(config, backend)
    }

    /// Start the discovery and sweep tasks
    pub async fn start(&self) -> Result<(), DiscoveryError> {
        let mut run = self.run.lock().await;
        if run.is_some() {
            return Err(DiscoveryError::AlreadyRunning);
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            self.spawn_discovery_task(shutdown_rx.clone()),
            self.spawn_sweep_task(shutdown_rx),
        ];

        *run = Some(RunState { shutdown, tasks });
        self.running.store(true, Ordering::SeqCst);

        let config = &self.inner.config;
        tracing::info!(
            backend = self.inner.backend.name(),
            interval = ?config.interval(),
            sweep = ?config.sweep_interval(),
            staleness = ?config.staleness_threshold(),
            "Discovery service started"
        );
        Ok(())
    }

    /// Stop all tasks; a no-op when already stopped
    ///
    /// In-flight cycles get the configured grace period, then are aborted.
    /// Samples that complete after this call begins never reach the
    /// registry.
    pub async fn stop(&self) {
        let mut run = self.run.lock().await;
        let Some(state) = run.take() else {
            tracing::debug!("Discovery service already stopped");
            return;
        };

        *self.inner.stopping.write().await = true;
        let _ = state.shutdown.send(true);

        let deadline = Instant::now() + self.inner.config.shutdown_grace();
        for mut handle in state.tasks {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                tracing::warn!("Abandoning discovery task after shutdown grace period");
                handle.abort();
                let _ = handle.await;
            }
        }

        *self.inner.stopping.write().await = false;
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("Discovery service stopped");
    }

    /// Stop and release the backend; the service cannot be restarted
    pub async fn close(&self) {
        self.stop().await;
        self.inner.backend.shutdown().await;
    }

    fn spawn_discovery_task(&self, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let inner = self.inner.clone();

        tokio::spawn(async move {
            let mut ticker = interval(inner.config.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        tracing::debug!("Discovery task shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        inner.discovery_cycle().await;
                    }
                }
            }
        })
    }

    fn spawn_sweep_task(&self, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let inner = self.inner.clone();

        tokio::spawn(async move {
            let period = inner.config.sweep_interval();
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        tracing::debug!("Sweep task shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        inner.sweep_cycle().await;
                    }
                }
            }
        })
    }

    /// Run one discovery cycle now and return the emitted events
    pub async fn run_cycle_once(&self) -> Vec<MembershipEvent> {
        self.inner.discovery_cycle().await
    }

    /// Run one sweep now and return the emitted `Lost` events
    pub async fn sweep_once(&self) -> Vec<MembershipEvent> {
        self.inner.sweep_cycle().await
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    /// Register an observer; must be called within a Tokio runtime
    pub fn subscribe(&self, observer: Arc<dyn MembershipObserver>) -> ObserverId {
        self.inner.bus.subscribe(observer)
    }

    /// Register a plain callback
    pub fn subscribe_fn<F>(&self, name: impl Into<String>, callback: F) -> ObserverId
    where
        F: Fn(&MembershipEvent) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(FnObserver::new(name, callback)))
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.inner.bus.unsubscribe(id)
    }

    pub fn observer_count(&self) -> usize {
        self.inner.bus.len()
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of current members
    pub async fn members(&self) -> Vec<MemberEntry> {
        self.inner.registry.snapshot().await
    }

    pub async fn member_count(&self) -> usize {
        self.inner.registry.len().await
    }

    pub async fn stats(&self) -> MembershipStats {
        self.inner.registry.stats().await
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.inner.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.backend.name()
    }
}

// ============================================================================
// Tests
// ============================================================================
