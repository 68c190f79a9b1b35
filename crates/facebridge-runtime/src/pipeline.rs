//! Frame pipeline
//!
//! Frames are handled one at a time in arrival order: transform, then send.
//! Every frame is evaluated and its outputs published. The client is shared
//! with the recovery coordinator; when it is busy reconnecting or not
//! `Ready` the frame is not sent, and it is never queued for later.

use std::sync::Arc;

use facebridge_client::ProtocolClient;
use facebridge_core::{ErrorKind, HealthSnapshot, HealthSource, OutputParameter, TrackingFrame};
use facebridge_rules::TransformationEngine;
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::recovery::panic_message;

/// What happened to one frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Sent,
    /// Client not `Ready`
    NotReady,
    /// Client locked by a reinitialization
    Busy,
    /// Sync or send failed; client is now faulted
    Failed,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_received: u64,
    pub frames_sent: u64,
    pub dropped_not_ready: u64,
    pub dropped_busy: u64,
    pub failures: u64,
    pub abandoned_rules: u64,
}

/// Health of the frame loop task. Unhealthy only once the loop has panicked.
#[derive(Debug, Default)]
pub struct PipelineHealth {
    snapshot: RwLock<HealthSnapshot>,
}

impl PipelineHealth {
    fn mark_fatal(&self, message: String) {
        *self.snapshot.write() = HealthSnapshot::unhealthy(ErrorKind::Fatal, message);
    }
}

impl HealthSource for PipelineHealth {
    fn component(&self) -> &'static str {
        "pipeline"
    }

    fn health(&self) -> HealthSnapshot {
        self.snapshot.read().clone()
    }
}

/// Sequential frame processor
pub struct Pipeline {
    engine: Arc<TransformationEngine>,
    client: Arc<Mutex<ProtocolClient>>,
    /// Rule generation last declared to the peer
    synced_generation: Option<u64>,
    stats: PipelineStats,
    outputs_tx: watch::Sender<Vec<OutputParameter>>,
}

impl Pipeline {
    pub fn new(engine: Arc<TransformationEngine>, client: Arc<Mutex<ProtocolClient>>) -> Self {
        let (outputs_tx, _) = watch::channel(Vec::new());
        Pipeline {
            engine,
            client,
            synced_generation: None,
            stats: PipelineStats::default(),
            outputs_tx,
        }
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Outputs of the most recent evaluated frame, sent or not
    pub fn subscribe_outputs(&self) -> watch::Receiver<Vec<OutputParameter>> {
        self.outputs_tx.subscribe()
    }

    /// Handle one frame
    pub async fn process(&mut self, frame: TrackingFrame) -> FrameOutcome {
        self.stats.frames_received += 1;

        let (rules, result) = self.engine.transform_current(&frame);
        self.stats.abandoned_rules += result.abandoned.len() as u64;
        self.outputs_tx.send_replace(result.outputs.clone());

        let Ok(mut client) = self.client.try_lock() else {
            self.stats.dropped_busy += 1;
            return FrameOutcome::Busy;
        };
        if !client.is_ready() {
            self.stats.dropped_not_ready += 1;
            return FrameOutcome::NotReady;
        }

        // A new session or a reload may have introduced parameters
        if self.synced_generation != Some(rules.generation()) {
            match client.synchronize_parameters(&rules.declarations()).await {
                Ok(created) => {
                    tracing::debug!(generation = rules.generation(), created, "rules synchronized");
                    self.synced_generation = Some(rules.generation());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "parameter synchronization failed");
                    self.stats.failures += 1;
                    return FrameOutcome::Failed;
                }
            }
        }

        match client.send_tracking(&result.outputs, frame.face_found).await {
            Ok(()) => {
                self.stats.frames_sent += 1;
                FrameOutcome::Sent
            }
            Err(e) => {
                tracing::warn!(error = %e, "frame delivery failed");
                self.stats.failures += 1;
                FrameOutcome::Failed
            }
        }
    }

    /// Consume frames until the channel closes or `cancel` fires
    pub async fn run(
        mut self,
        mut frames: mpsc::Receiver<TrackingFrame>,
        cancel: CancellationToken,
    ) -> PipelineStats {
        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                frame = frames.recv() => frame,
            };
            let Some(frame) = frame else { break };
            self.process(frame).await;
        }

        tracing::info!(
            received = self.stats.frames_received,
            sent = self.stats.frames_sent,
            dropped = self.stats.dropped_not_ready + self.stats.dropped_busy,
            "pipeline stopped"
        );
        self.stats
    }

    /// Run on a new task whose panic is logged and reported through the
    /// returned health source instead of being lost until shutdown
    pub fn spawn(
        self,
        frames: mpsc::Receiver<TrackingFrame>,
        cancel: CancellationToken,
    ) -> (JoinHandle<PipelineStats>, Arc<PipelineHealth>) {
        let health = Arc::new(PipelineHealth::default());
        let task = supervise(tokio::spawn(self.run(frames, cancel)), Arc::clone(&health));
        (task, health)
    }
}

fn supervise(inner: JoinHandle<PipelineStats>, health: Arc<PipelineHealth>) -> JoinHandle<PipelineStats> {
    tokio::spawn(async move {
        match inner.await {
            Ok(stats) => stats,
            Err(e) if e.is_panic() => {
                let message = panic_message(e);
                tracing::error!(error = %message, "frame pipeline panicked");
                health.mark_fatal(format!("pipeline panicked: {message}"));
                PipelineStats::default()
            }
            Err(e) => {
                tracing::debug!(error = %e, "frame pipeline cancelled");
                PipelineStats::default()
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use facebridge_client::ClientConfig;
    use facebridge_rules::RuleRepository;

    use super::*;

    #[tokio::test]
    async fn test_frames_evaluated_but_not_sent_while_not_ready() {
        let repo = Arc::new(RuleRepository::new());
        repo.load_str(r#"[{"name": "A", "func": "HeadRotX", "min": -1, "max": 1, "defaultValue": 0}]"#);
        let engine = Arc::new(TransformationEngine::new(repo));
        let client = Arc::new(Mutex::new(ProtocolClient::new(
            ClientConfig::default(),
            CancellationToken::new(),
        )));

        let mut pipeline = Pipeline::new(Arc::clone(&engine), Arc::clone(&client));
        let outputs = pipeline.subscribe_outputs();
        let frame = TrackingFrame::new(0).with_head_rotation(facebridge_core::Vec3::new(0.5, 0.0, 0.0));
        assert_eq!(pipeline.process(frame).await, FrameOutcome::NotReady);
        assert_eq!(outputs.borrow().len(), 1);
        assert_eq!(outputs.borrow()[0].value, 0.5);

        // Held by a reinitialization
        let guard = client.lock().await;
        assert_eq!(pipeline.process(TrackingFrame::new(1)).await, FrameOutcome::Busy);
        assert_eq!(outputs.borrow()[0].value, 0.0);
        drop(guard);

        assert_eq!(pipeline.stats().dropped_not_ready, 1);
        assert_eq!(pipeline.stats().dropped_busy, 1);
        assert_eq!(pipeline.stats().frames_sent, 0);
        assert_eq!(engine.stats().frames, 2);
        assert_eq!(client.lock().await.frames_sent(), 0);
    }

    #[tokio::test]
    async fn test_run_ends_when_channel_closes() {
        let engine = Arc::new(TransformationEngine::new(Arc::new(RuleRepository::new())));
        let client = Arc::new(Mutex::new(ProtocolClient::new(
            ClientConfig::default(),
            CancellationToken::new(),
        )));
        let pipeline = Pipeline::new(engine, client);

        let (tx, rx) = mpsc::channel(4);
        tx.send(TrackingFrame::new(0)).await.unwrap();
        tx.send(TrackingFrame::new(1)).await.unwrap();
        drop(tx);

        let stats = pipeline.run(rx, CancellationToken::new()).await;
        assert_eq!(stats.frames_received, 2);
        assert_eq!(stats.frames_sent, 0);
    }

    #[tokio::test]
    async fn test_spawned_pipeline_stays_healthy() {
        let engine = Arc::new(TransformationEngine::new(Arc::new(RuleRepository::new())));
        let client = Arc::new(Mutex::new(ProtocolClient::new(
            ClientConfig::default(),
            CancellationToken::new(),
        )));
        let (tx, rx) = mpsc::channel(4);
        tx.send(TrackingFrame::new(0)).await.unwrap();
        drop(tx);

        let (task, health) = Pipeline::new(engine, client).spawn(rx, CancellationToken::new());
        let stats = task.await.unwrap();
        assert_eq!(stats.frames_received, 1);
        assert!(health.health().is_healthy);
    }

    #[tokio::test]
    async fn test_panicked_pipeline_reported_fatal() {
        let health = Arc::new(PipelineHealth::default());
        let inner: JoinHandle<PipelineStats> = tokio::spawn(async { panic!("frame loop exploded") });

        let stats = supervise(inner, Arc::clone(&health)).await.unwrap();
        assert_eq!(stats, PipelineStats::default());
        let snapshot = health.health();
        assert!(!snapshot.is_healthy);
        assert_eq!(snapshot.last_error_kind, Some(ErrorKind::Fatal));
        assert!(snapshot
            .last_error_message
            .unwrap()
            .contains("frame loop exploded"));
    }
}
