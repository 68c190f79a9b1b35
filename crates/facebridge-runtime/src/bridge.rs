//! Bridge assembly
//!
//! Builds the repository, engine, client, pipeline and coordinator from a
//! [`BridgeConfig`] and ties their lifetimes to one cancellation token.

use std::sync::Arc;

use facebridge_client::{ClientMonitor, ProtocolClient};
use facebridge_core::TrackingFrame;
use facebridge_rules::{RuleRepository, RuleWatcher, TransformationEngine};
use facebridge_transport::{Connector, WsConnector};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    AggregateHealth, BridgeConfig, ClientRecovery, Pipeline, PipelineStats, RecoveryCoordinator,
    RuntimeResult,
};

/// Bridge builder
pub struct Bridge {
    config: BridgeConfig,
    connector: Arc<dyn Connector>,
    cancel: CancellationToken,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        Bridge {
            config,
            connector: Arc::new(WsConnector),
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the transport, e.g. with an in-process test double
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Tie shutdown to an application-wide token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Validate the configuration and start all tasks.
    ///
    /// Only configuration errors fail here; an unreachable peer or a broken
    /// rule file is reported through health and recovered in the background.
    pub fn start(self, frames: mpsc::Receiver<TrackingFrame>) -> RuntimeResult<BridgeHandle> {
        let Bridge {
            config,
            connector,
            cancel,
        } = self;
        config.validate()?;

        let repository = Arc::new(RuleRepository::new());
        let rules = repository.load(&config.rule_path);
        tracing::info!(
            path = %config.rule_path.display(),
            status = ?rules.status(),
            rules = rules.len(),
            "initial rule load"
        );

        let engine = Arc::new(
            TransformationEngine::with_config(Arc::clone(&repository), config.engine_config())
                .with_rule_path(config.rule_path.clone()),
        );

        let watcher = if config.watch_rules {
            match RuleWatcher::spawn(
                Arc::clone(&repository),
                config.rule_path.clone(),
                config.rule_debounce,
                cancel.child_token(),
            ) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    tracing::warn!(error = %e, "rule file watching disabled");
                    None
                }
            }
        } else {
            None
        };

        let client = ProtocolClient::with_connector(
            config.client_config(),
            connector,
            cancel.child_token(),
        );
        let monitor = client.monitor();
        let client = Arc::new(Mutex::new(client));

        let mut coordinator = RecoveryCoordinator::new(config.recovery.interval);
        coordinator.register(engine.clone(), config.recovery.engine_cooldown);
        coordinator.register(
            Arc::new(ClientRecovery::new(
                Arc::clone(&client),
                monitor.clone(),
                Arc::clone(&repository),
            )),
            config.recovery.client_cooldown,
        );

        let pipeline = Pipeline::new(Arc::clone(&engine), Arc::clone(&client));
        let (pipeline_task, pipeline_health) = pipeline.spawn(frames, cancel.child_token());
        coordinator.observe(pipeline_health);

        let health = coordinator.subscribe();
        let coordinator_task = coordinator.spawn(cancel.child_token());

        tracing::info!(endpoint = %config.endpoint(), discovery = ?config.discovery, "bridge started");

        Ok(BridgeHandle {
            cancel,
            engine,
            client,
            monitor,
            health,
            watcher,
            pipeline_task,
            coordinator_task,
        })
    }
}

/// Running bridge
pub struct BridgeHandle {
    cancel: CancellationToken,
    engine: Arc<TransformationEngine>,
    client: Arc<Mutex<ProtocolClient>>,
    monitor: ClientMonitor,
    health: watch::Receiver<AggregateHealth>,
    watcher: Option<RuleWatcher>,
    pipeline_task: JoinHandle<PipelineStats>,
    coordinator_task: JoinHandle<()>,
}

impl BridgeHandle {
    pub fn engine(&self) -> &Arc<TransformationEngine> {
        &self.engine
    }

    pub fn client(&self) -> &Arc<Mutex<ProtocolClient>> {
        &self.client
    }

    pub fn client_monitor(&self) -> &ClientMonitor {
        &self.monitor
    }

    /// Aggregate health as last published by the coordinator
    pub fn health(&self) -> AggregateHealth {
        self.health.borrow().clone()
    }

    pub fn subscribe_health(&self) -> watch::Receiver<AggregateHealth> {
        self.health.clone()
    }

    /// Cancel everything and wait for the tasks to finish
    pub async fn shutdown(self) -> PipelineStats {
        self.cancel.cancel();

        if let Some(watcher) = self.watcher {
            watcher.stop().await;
        }
        if let Err(e) = self.coordinator_task.await {
            tracing::warn!(error = %e, "recovery task ended abnormally");
        }
        let stats = match self.pipeline_task.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!(error = %e, "pipeline task ended abnormally");
                PipelineStats::default()
            }
        };

        self.client.lock().await.shutdown().await;
        tracing::info!("bridge stopped");
        stats
    }
}
