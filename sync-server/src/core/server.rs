//! Server wiring - adapter feed, consumer workers, graceful shutdown

use std::sync::Arc;
use std::time::Duration;

use shared::error::SyncResult;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::consumer::ConsumerRuntime;
use crate::core::tasks::{BackgroundTasks, TaskKind};
use crate::core::{Config, SyncState};
use crate::fleet::{FleetProjection, RideMachine, VehicleMachine};
use crate::twin::TwinAdapter;

/// Twin feed channel capacity (burst headroom for the notification feed)
const FEED_CHANNEL_CAPACITY: usize = 1024;

/// The synchronization core service
pub struct SyncServer {
    config: Config,
    state: SyncState,
}

impl SyncServer {
    pub fn new(config: Config) -> SyncResult<Self> {
        let state = SyncState::initialize(&config)?;
        Ok(Self { config, state })
    }

    pub fn with_state(config: Config, state: SyncState) -> Self {
        Self { config, state }
    }

    /// Downstream projection read handle
    pub fn projection(&self) -> Arc<FleetProjection> {
        self.state.projection.clone()
    }

    /// The bus this server produces to and consumes from
    ///
    /// Ride-service producers publish their lifecycle events here.
    pub fn bus(&self) -> Arc<dyn crate::bus::EventBus> {
        self.state.bus.clone()
    }

    /// Start the adapter and consumer workers
    ///
    /// The returned handle owns the twin feed sender; the host process
    /// forwards platform notifications into it.
    pub fn start(&self) -> RunningServer {
        let shutdown = CancellationToken::new();

        let adapter = Arc::new(TwinAdapter::new(
            self.config.topic.clone(),
            self.state.bus.clone(),
            self.state.registry.clone(),
            self.state.checkpoint.clone(),
            self.config.retry_policy(),
        ));

        let (feed_tx, feed_rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        let mut tasks = BackgroundTasks::with_token(shutdown.clone());
        {
            let adapter = adapter.clone();
            let token = shutdown.clone();
            tasks.spawn("twin_adapter", TaskKind::Listener, async move {
                adapter.run(feed_rx, token).await;
            });
        }

        let runtime = ConsumerRuntime::with_full_assignment(
            self.state.bus.clone(),
            self.state.validator.clone(),
            self.state.store.clone(),
            self.state.projection.clone(),
            VehicleMachine::new(self.config.battery_maintenance_threshold),
            RideMachine::new(self.config.reservation_window_ms),
            self.config.worker_config(),
        );
        let consumer = runtime.spawn(shutdown.clone());

        tracing::info!(topic = %self.config.topic, "Sync server started");
        RunningServer {
            feed: feed_tx,
            adapter,
            tasks,
            consumer,
            shutdown_timeout: Duration::from_millis(self.config.shutdown_timeout_ms),
        }
    }
}

/// Handle over a started server
pub struct RunningServer {
    /// Twin-platform notification feed (host forwards raw JSON here)
    pub feed: mpsc::Sender<serde_json::Value>,
    adapter: Arc<TwinAdapter>,
    tasks: BackgroundTasks,
    consumer: crate::consumer::ConsumerHandle,
    shutdown_timeout: Duration,
}

impl RunningServer {
    /// Adapter counters (published / dead-lettered / alerts)
    pub fn adapter_stats(&self) -> &crate::twin::AdapterStats {
        self.adapter.stats()
    }

    /// Graceful shutdown: stop the feed, drain in-flight work, stop workers
    pub async fn shutdown(self) {
        drop(self.feed);
        self.tasks.shutdown(self.shutdown_timeout).await;
        self.consumer.shutdown().await;
        tracing::info!("Sync server stopped");
    }
}
