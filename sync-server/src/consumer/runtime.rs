//! Consumer runtime - one worker task per assigned partition
//!
//! Partitions are the unit of ordering and parallelism: workers on
//! different partitions proceed fully in parallel, while events for one
//! vehicle key are strictly serialized by partition assignment. The
//! assignment is explicit; rebalancing hands a partition to a new
//! instance, which resumes from the last committed offset only.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::fleet::{FleetProjection, RideMachine, VehicleMachine};
use crate::schema::SchemaValidator;

use super::store::ConsumerStore;
use super::worker::{PartitionWorker, WorkerConfig};

/// Consumer runtime for one service instance
pub struct ConsumerRuntime {
    bus: Arc<dyn EventBus>,
    validator: Arc<SchemaValidator>,
    store: ConsumerStore,
    projection: Arc<FleetProjection>,
    vehicles: VehicleMachine,
    rides: RideMachine,
    config: WorkerConfig,
    /// Partitions owned by this instance
    assignment: Vec<u32>,
}

impl ConsumerRuntime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: Arc<dyn EventBus>,
        validator: Arc<SchemaValidator>,
        store: ConsumerStore,
        projection: Arc<FleetProjection>,
        vehicles: VehicleMachine,
        rides: RideMachine,
        config: WorkerConfig,
        assignment: Vec<u32>,
    ) -> Self {
        Self {
            bus,
            validator,
            store,
            projection,
            vehicles,
            rides,
            config,
            assignment,
        }
    }

    /// Runtime assigned every partition of the bus (single-instance setup)
    #[allow(clippy::too_many_arguments)]
    pub fn with_full_assignment(
        bus: Arc<dyn EventBus>,
        validator: Arc<SchemaValidator>,
        store: ConsumerStore,
        projection: Arc<FleetProjection>,
        vehicles: VehicleMachine,
        rides: RideMachine,
        config: WorkerConfig,
    ) -> Self {
        let assignment = (0..bus.partitions()).collect();
        Self::new(
            bus, validator, store, projection, vehicles, rides, config, assignment,
        )
    }

    pub fn assignment(&self) -> &[u32] {
        &self.assignment
    }

    /// Spawn one worker per assigned partition
    pub fn spawn(self, shutdown: CancellationToken) -> ConsumerHandle {
        let mut handles = Vec::with_capacity(self.assignment.len());
        for &partition in &self.assignment {
            let worker = PartitionWorker::new(
                partition,
                self.bus.clone(),
                self.validator.clone(),
                self.store.clone(),
                self.projection.clone(),
                self.vehicles.clone(),
                self.rides.clone(),
                self.config.clone(),
            );
            let token = shutdown.clone();
            handles.push(tokio::spawn(async move {
                worker.run(token).await;
            }));
        }

        tracing::info!(
            partitions = ?self.assignment,
            "Consumer runtime started"
        );
        ConsumerHandle { shutdown, handles }
    }
}

/// Handle over the running workers
pub struct ConsumerHandle {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl ConsumerHandle {
    /// Graceful shutdown: stop fetching, drain in-flight applications
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for handle in self.handles {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "Partition worker panicked");
            }
        }
        tracing::info!("Consumer runtime stopped");
    }
}
