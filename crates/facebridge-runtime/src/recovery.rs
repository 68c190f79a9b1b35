//! Recovery coordinator
//!
//! Polls component health on its own interval and spawns a
//! reinitialization for each unhealthy component, at most once per cooldown.
//! Reinitializations run on their own tasks: a hung one only blocks further
//! attempts for that component, never the frame loop or the other components.
//! A reinitialization that panics marks its component `Fatal` until a later
//! attempt completes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use facebridge_client::{ClientError, ClientMonitor, ConnectionState, ProtocolClient};
use facebridge_core::{ErrorKind, HealthSnapshot, HealthSource};
use facebridge_rules::{RuleRepository, TransformationEngine};
use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

/// A component the coordinator can bring back
#[async_trait]
pub trait Recoverable: HealthSource + Send + Sync {
    async fn reinitialize(self: Arc<Self>);
}

/// Reloads the rule file on the blocking pool
#[async_trait]
impl Recoverable for TransformationEngine {
    async fn reinitialize(self: Arc<Self>) {
        let reload = tokio::task::spawn_blocking(move || TransformationEngine::reinitialize(&self));
        let health = match reload.await {
            Ok(health) => health,
            Err(e) => match e.try_into_panic() {
                Ok(payload) => std::panic::resume_unwind(payload),
                Err(e) => {
                    tracing::debug!(error = %e, "engine reload cancelled");
                    return;
                }
            },
        };
        if !health.is_healthy {
            tracing::warn!(
                error = health.last_error_message.as_deref().unwrap_or(""),
                "engine still unhealthy after reinitialization"
            );
        }
    }
}

/// Client adapter: reconnects with the current rule declarations
pub struct ClientRecovery {
    client: Arc<Mutex<ProtocolClient>>,
    monitor: ClientMonitor,
    repository: Arc<RuleRepository>,
}

impl ClientRecovery {
    pub fn new(client: Arc<Mutex<ProtocolClient>>, monitor: ClientMonitor, repository: Arc<RuleRepository>) -> Self {
        ClientRecovery {
            client,
            monitor,
            repository,
        }
    }
}

impl HealthSource for ClientRecovery {
    fn component(&self) -> &'static str {
        "client"
    }

    /// A client that has never connected counts as unhealthy so the first
    /// poll establishes the session.
    fn health(&self) -> HealthSnapshot {
        let snapshot = self.monitor.health();
        if snapshot.is_healthy && self.monitor.state() == ConnectionState::Disconnected {
            return HealthSnapshot::unhealthy(ErrorKind::Transport, "not connected");
        }
        snapshot
    }
}

#[async_trait]
impl Recoverable for ClientRecovery {
    async fn reinitialize(self: Arc<Self>) {
        let declarations = self.repository.current().declarations();
        let mut client = self.client.lock().await;
        match client.reinitialize(&declarations).await {
            Ok(()) => tracing::info!(parameters = declarations.len(), "client session ready"),
            Err(ClientError::BackoffPending(wait)) => {
                tracing::debug!(?wait, "client backoff still pending")
            }
            Err(ClientError::Cancelled) => {}
            Err(e) => tracing::warn!(error = %e, "client reinitialization failed"),
        }
    }
}

/// Combined health published by the coordinator
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AggregateHealth {
    pub is_healthy: bool,
    pub components: BTreeMap<String, HealthSnapshot>,
    /// Reinitializations started so far, per component
    pub reinitializations: BTreeMap<String, u64>,
    pub timestamp: SystemTime,
}

impl Default for AggregateHealth {
    fn default() -> Self {
        AggregateHealth {
            is_healthy: true,
            components: BTreeMap::new(),
            reinitializations: BTreeMap::new(),
            timestamp: SystemTime::now(),
        }
    }
}

/// Text of a task panic, or the join error itself when the task did not panic
pub fn panic_message(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => {
            if let Some(text) = payload.downcast_ref::<&str>() {
                text.to_string()
            } else if let Some(text) = payload.downcast_ref::<String>() {
                text.clone()
            } else {
                "non-string panic payload".to_string()
            }
        }
        Err(err) => err.to_string(),
    }
}

struct Tracked {
    component: Arc<dyn Recoverable>,
    cooldown: Duration,
    last_attempt: Option<Instant>,
    in_flight: Option<JoinHandle<()>>,
    attempts: u64,
    /// Set when the last reinitialization panicked; overrides reported health
    fault: Option<HealthSnapshot>,
}

impl Tracked {
    /// Collect a finished reinitialization, recording a panic as `Fatal`
    fn reap(&mut self) {
        let finished = match self.in_flight.as_mut() {
            Some(handle) if handle.is_finished() => handle.now_or_never(),
            _ => None,
        };
        let Some(result) = finished else { return };
        self.in_flight = None;

        match result {
            Ok(()) => self.fault = None,
            Err(e) if e.is_panic() => {
                let message = panic_message(e);
                tracing::error!(
                    component = self.component.component(),
                    error = %message,
                    "reinitialization panicked"
                );
                self.fault = Some(HealthSnapshot::unhealthy(
                    ErrorKind::Fatal,
                    format!("reinitialization panicked: {message}"),
                ));
            }
            Err(e) => tracing::debug!(
                component = self.component.component(),
                error = %e,
                "reinitialization cancelled"
            ),
        }
    }
}

/// Health-driven reinitialization loop
pub struct RecoveryCoordinator {
    interval: Duration,
    components: Vec<Tracked>,
    /// Reported in aggregate health but never reinitialized
    observed: Vec<Arc<dyn HealthSource + Send + Sync>>,
    health_tx: watch::Sender<AggregateHealth>,
}

impl RecoveryCoordinator {
    pub fn new(interval: Duration) -> Self {
        let (health_tx, _) = watch::channel(AggregateHealth::default());
        RecoveryCoordinator {
            interval,
            components: Vec::new(),
            observed: Vec::new(),
            health_tx,
        }
    }

    /// Watch a component; `cooldown` is the minimum gap between attempts
    pub fn register(&mut self, component: Arc<dyn Recoverable>, cooldown: Duration) {
        tracing::debug!(component = component.component(), ?cooldown, "recovery registered");
        self.components.push(Tracked {
            component,
            cooldown,
            last_attempt: None,
            in_flight: None,
            attempts: 0,
            fault: None,
        });
    }

    /// Include a component in aggregate health without managing it
    pub fn observe(&mut self, source: Arc<dyn HealthSource + Send + Sync>) {
        tracing::debug!(component = source.component(), "health observed");
        self.observed.push(source);
    }

    /// Aggregate health updates
    pub fn subscribe(&self) -> watch::Receiver<AggregateHealth> {
        self.health_tx.subscribe()
    }

    pub fn aggregate(&self) -> AggregateHealth {
        self.health_tx.borrow().clone()
    }

    /// One polling round. Must run inside a tokio runtime.
    pub fn tick(&mut self) -> AggregateHealth {
        let now = Instant::now();
        let mut aggregate = AggregateHealth::default();

        for tracked in &mut self.components {
            let name = tracked.component.component();
            tracked.reap();
            let snapshot = match &tracked.fault {
                Some(fault) => fault.clone(),
                None => tracked.component.health(),
            };

            let cooled = tracked
                .last_attempt
                .map_or(true, |at| now.duration_since(at) >= tracked.cooldown);

            if !snapshot.is_healthy {
                if tracked.in_flight.is_some() {
                    tracing::debug!(component = name, "reinitialization still running");
                } else if cooled {
                    tracing::info!(
                        component = name,
                        kind = ?snapshot.last_error_kind,
                        error = snapshot.last_error_message.as_deref().unwrap_or(""),
                        "reinitializing unhealthy component"
                    );
                    tracked.last_attempt = Some(now);
                    tracked.attempts += 1;
                    let component = Arc::clone(&tracked.component);
                    tracked.in_flight = Some(tokio::spawn(async move {
                        component.reinitialize().await;
                    }));
                }
            }

            aggregate.is_healthy &= snapshot.is_healthy;
            aggregate.components.insert(name.to_string(), snapshot);
            aggregate
                .reinitializations
                .insert(name.to_string(), tracked.attempts);
        }

        for source in &self.observed {
            let snapshot = source.health();
            aggregate.is_healthy &= snapshot.is_healthy;
            aggregate
                .components
                .insert(source.component().to_string(), snapshot);
        }

        self.health_tx.send_replace(aggregate.clone());
        aggregate
    }

    /// Poll until cancelled, then abort outstanding reinitializations
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let aggregate = self.tick();
                    tracing::trace!(healthy = aggregate.is_healthy, "health polled");
                }
            }
        }

        for tracked in &mut self.components {
            if let Some(handle) = tracked.in_flight.take() {
                handle.abort();
            }
        }
        tracing::debug!("recovery coordinator stopped");
    }

    /// Run on a new task
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}
