//! Broker orchestrator for wiring together all components.
//!
//! This module provides the `BrokerOrchestrator` that builds the request
//! intake, the transfer queue and the move engine from one resolved
//! configuration, and controls the engine's lifetime.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::intake::RequestIntake;
use crate::mover::MoveEngine;
use crate::plugins::PluginPipeline;
use crate::queue::{transfer_queue, QueueReceiver};
use crate::transport::Transport;

/// Broker orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Initial state, not started.
    Stopped,
    /// Starting up.
    Starting,
    /// The move engine is consuming the queue.
    Running,
    /// Shutting down gracefully.
    ShuttingDown,
}

/// Events emitted by the orchestrator.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// Orchestrator state changed.
    StateChanged(OrchestratorState),
    /// Error occurred.
    Error { message: String },
}

/// Owns every broker component and the engine task.
pub struct BrokerOrchestrator<T: Transport> {
    /// Resolved configuration.
    config: Arc<Config>,
    /// Plugin chain shared by intake and engine.
    pipeline: Arc<PluginPipeline>,
    /// Outbound transport.
    transport: Arc<T>,
    /// Front door; clone it for every inbound message source.
    intake: RequestIntake<T>,
    /// Consumer side of the queue, handed to the engine on start.
    queue: Mutex<Option<QueueReceiver>>,
    /// Current state.
    state: Arc<RwLock<OrchestratorState>>,
    /// Running engine task.
    engine_task: Mutex<Option<JoinHandle<()>>>,
    /// Cancellation token for graceful shutdown.
    shutdown_token: CancellationToken,
    /// Event sender.
    event_tx: broadcast::Sender<OrchestratorEvent>,
}

impl<T: Transport> BrokerOrchestrator<T> {
    /// Creates a new orchestrator. The configuration is validated here.
    pub fn new(config: Config, pipeline: PluginPipeline, transport: T) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let config = Arc::new(config);
        let pipeline = Arc::new(pipeline);
        let transport = Arc::new(transport);

        let (queue_tx, queue_rx) = transfer_queue();
        let intake = RequestIntake::new(
            Arc::clone(&pipeline),
            queue_tx,
            Arc::clone(&transport),
            config.link.allow_deployment_destination,
        );

        info!(
            xfer_root = ?config.link.xfer_root,
            plugins = ?pipeline.names(),
            "Broker configured"
        );

        let (event_tx, _) = broadcast::channel(64);

        Ok(Self {
            config,
            pipeline,
            transport,
            intake,
            queue: Mutex::new(Some(queue_rx)),
            state: Arc::new(RwLock::new(OrchestratorState::Stopped)),
            engine_task: Mutex::new(None),
            shutdown_token: CancellationToken::new(),
            event_tx,
        })
    }

    /// Returns the resolved configuration.
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Returns a handle for submitting requests.
    pub fn intake(&self) -> RequestIntake<T> {
        self.intake.clone()
    }

    /// Token cancelled when the orchestrator stops.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Returns the current state.
    pub async fn state(&self) -> OrchestratorState {
        *self.state.read().await
    }

    /// Returns a receiver for orchestrator events.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    /// Starts the move engine.
    ///
    /// An orchestrator runs once; starting it again after [`stop`](Self::stop)
    /// fails because the queue went down with the engine.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Stopped {
                anyhow::bail!("Orchestrator is not stopped (current state: {:?})", *state);
            }
            *state = OrchestratorState::Starting;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Starting));

        info!("Starting broker orchestrator...");

        let Some(queue) = self.queue.lock().await.take() else {
            *self.state.write().await = OrchestratorState::Stopped;
            let message = "Orchestrator cannot be restarted".to_string();
            self.emit_event(OrchestratorEvent::Error {
                message: message.clone(),
            });
            anyhow::bail!(message);
        };

        let engine = MoveEngine::new(
            &self.config.link,
            Arc::clone(&self.pipeline),
            Arc::clone(&self.transport),
        );
        let handle = tokio::spawn(engine.run(queue, self.shutdown_token.clone()));
        *self.engine_task.lock().await = Some(handle);

        *self.state.write().await = OrchestratorState::Running;
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Running));

        info!("Broker orchestrator started");
        Ok(())
    }

    /// Stops the move engine.
    ///
    /// An item already being processed finishes first; queued items are dropped.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == OrchestratorState::Stopped {
                return Ok(());
            }
            if *state == OrchestratorState::ShuttingDown {
                anyhow::bail!("Orchestrator is already shutting down");
            }
            *state = OrchestratorState::ShuttingDown;
        }
        self.emit_event(OrchestratorEvent::StateChanged(
            OrchestratorState::ShuttingDown,
        ));

        info!("Stopping broker orchestrator...");

        self.shutdown_token.cancel();

        if let Some(handle) = self.engine_task.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Move engine task ended abnormally");
                self.emit_event(OrchestratorEvent::Error {
                    message: e.to_string(),
                });
            }
        }

        *self.state.write().await = OrchestratorState::Stopped;
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));

        info!("Broker orchestrator stopped");
        Ok(())
    }

    fn emit_event(&self, event: OrchestratorEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("No orchestrator event subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use link_protocol::{LinkRequest, StatusCode};
    use tempfile::TempDir;

    use super::*;
    use crate::transport::ChannelTransport;

    fn create_test_config(temp_dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.link.xfer_root = temp_dir.path().join("allxfer");
        config.link.poll_interval_ms = 10;
        config
    }

    #[tokio::test]
    async fn test_orchestrator_creation() {
        let temp_dir = TempDir::new().unwrap();
        let (transport, _rx) = ChannelTransport::new();

        let orchestrator =
            BrokerOrchestrator::new(create_test_config(&temp_dir), PluginPipeline::new(), transport)
                .unwrap();
        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
    }

    #[tokio::test]
    async fn test_orchestrator_rejects_invalid_config() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = create_test_config(&temp_dir);
        config.link.poll_interval_ms = 0;
        let (transport, _rx) = ChannelTransport::new();

        assert!(BrokerOrchestrator::new(config, PluginPipeline::new(), transport).is_err());
    }

    #[tokio::test]
    async fn test_orchestrator_state_transitions() {
        let temp_dir = TempDir::new().unwrap();
        let (transport, _rx) = ChannelTransport::new();
        let orchestrator =
            BrokerOrchestrator::new(create_test_config(&temp_dir), PluginPipeline::new(), transport)
                .unwrap();
        let mut events = orchestrator.subscribe();

        orchestrator.start().await.unwrap();
        assert_eq!(orchestrator.state().await, OrchestratorState::Running);
        assert!(orchestrator.start().await.is_err());

        orchestrator.stop().await.unwrap();
        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
        assert!(orchestrator.shutdown_token().is_cancelled());

        let mut seen = Vec::new();
        while let Ok(OrchestratorEvent::StateChanged(state)) = events.try_recv() {
            seen.push(state);
        }
        assert_eq!(
            seen,
            vec![
                OrchestratorState::Starting,
                OrchestratorState::Running,
                OrchestratorState::ShuttingDown,
                OrchestratorState::Stopped,
            ]
        );

        // stopping twice is a no-op
        orchestrator.stop().await.unwrap();
        // the queue went down with the engine
        assert!(orchestrator.start().await.is_err());
    }

    #[tokio::test]
    async fn test_orchestrator_processes_requests() {
        let temp_dir = TempDir::new().unwrap();
        let config = create_test_config(&temp_dir);
        let outbox = config.link.xfer_root.join("appa").join("outbox");
        std::fs::create_dir_all(&outbox).unwrap();
        std::fs::write(outbox.join("a.jpg"), b"payload").unwrap();

        let (transport, mut deliveries) = ChannelTransport::new();
        let orchestrator =
            BrokerOrchestrator::new(config, PluginPipeline::new(), transport).unwrap();
        orchestrator.start().await.unwrap();

        orchestrator
            .intake()
            .handle(
                Some(LinkRequest::new("a.jpg", "appb").with_ids("t-1", "c-1")),
                "appa",
            )
            .await;

        let mut statuses = Vec::new();
        while statuses.len() < 3 {
            let delivery = tokio::time::timeout(Duration::from_secs(5), deliveries.recv())
                .await
                .unwrap()
                .unwrap();
            statuses.push((delivery.app_id, delivery.response.status()));
        }
        assert_eq!(
            statuses,
            vec![
                ("appa".to_string(), StatusCode::Pending),
                ("appa".to_string(), StatusCode::Successful),
                ("appb".to_string(), StatusCode::Successful),
            ]
        );

        orchestrator.stop().await.unwrap();
    }
}
