//! Composition root for the orchestration core.
//!
//! Wires the identity store, registry, telemetry channel and stats
//! aggregator together, and is the only component that touches the
//! external collaborators: worker processes and the persistence layer.
//! Startup order is storage -> recovery -> serve; shutdown drains by
//! stopping every running campaign and closing all observer queues.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::identity::{IdentityStore, UnknownCity};
use crate::model::{Campaign, Identity, IngestionKind, Platform, StatsSnapshot, TelemetryEvent};
use crate::registry::{CampaignRegistry, RegistryError};
use crate::stats::StatsAggregator;
use crate::storage::Storage;
use crate::telemetry::{ObserverHandle, TelemetryChannel};
use crate::worker::{WorkerHandle, WorkerSupervisor};

/// Default grace period for a worker to acknowledge a halt signal.
pub const DEFAULT_HALT_GRACE: Duration = Duration::from_secs(5);

/// Process-wide orchestrator, constructed once at startup and shared
/// behind an `Arc` by every handler.
pub struct Orchestrator {
    identities: Arc<IdentityStore>,
    channel: Arc<TelemetryChannel>,
    stats: Arc<StatsAggregator>,
    registry: CampaignRegistry,
    storage: Storage,
    supervisor: Arc<dyn WorkerSupervisor>,
    workers: Mutex<HashMap<String, WorkerHandle>>,
    halt_grace: Duration,
}

impl Orchestrator {
    pub fn new(
        storage: Storage,
        supervisor: Arc<dyn WorkerSupervisor>,
        cities: &[String],
        halt_grace: Duration,
    ) -> Self {
        let identities = Arc::new(IdentityStore::new());
        for city in cities {
            identities.provision(city);
        }

        let channel = Arc::new(TelemetryChannel::new());
        let stats = Arc::new(StatsAggregator::new(Arc::clone(&channel)));
        let registry = CampaignRegistry::new(
            Arc::clone(&identities),
            Arc::clone(&channel),
            Arc::clone(&stats),
        );

        Self {
            identities,
            channel,
            stats,
            registry,
            storage,
            supervisor,
            workers: Mutex::new(HashMap::new()),
            halt_grace,
        }
    }

    /// Reload campaigns that survived the previous process and relaunch
    /// their workers. Returns how many were reinstated.
    pub async fn recover(&self) -> anyhow::Result<usize> {
        let survivors = self.storage.load_surviving_campaigns().await?;
        let count = survivors.len();

        for campaign in survivors {
            self.registry.restore(campaign.clone());
            self.launch_worker(&campaign);
        }

        if count > 0 {
            info!(count, "Recovered campaigns from previous run");
        }
        Ok(count)
    }

    /// Start a campaign: insert it into the registry, persist the record
    /// and launch its worker. Worker or persistence trouble is logged but
    /// never fails an already-inserted campaign.
    pub async fn start_campaign(
        &self,
        city: &str,
        platform: Platform,
        mode: &str,
    ) -> Result<Campaign, RegistryError> {
        let campaign = self.registry.start(city, platform, mode)?;

        if let Err(e) = self.storage.insert_campaign(&campaign).await {
            warn!(id = %campaign.id, error = %e, "Failed to persist campaign");
        }
        self.launch_worker(&campaign);

        Ok(campaign)
    }

    /// Stop a campaign: signal its worker, wait out the grace period, then
    /// remove the record. A double stop returns
    /// [`RegistryError::NotFound`], which callers treat as benign.
    ///
    /// One campaign's unresponsive worker never blocks another campaign:
    /// only this call waits, and only on its own worker.
    pub async fn stop_campaign(&self, id: &str) -> Result<(), RegistryError> {
        self.registry.begin_stop(id)?;

        if let Err(e) = self.storage.mark_stopping(id).await {
            warn!(id, error = %e, "Failed to persist stopping state");
        }

        let handle = self.workers.lock().unwrap().remove(id);
        if let Some(handle) = handle {
            if let Err(timeout) = handle.halt(self.halt_grace).await {
                warn!(id, "Worker unresponsive to halt, forcing stop");
                self.channel.publish(TelemetryEvent::Log {
                    message: format!("{timeout}; stop forced"),
                });
            }
        }

        self.registry.finish_stop(id);
        if let Err(e) = self.storage.delete_campaign(id).await {
            warn!(id, error = %e, "Failed to delete persisted campaign");
        }

        Ok(())
    }

    /// Worker ingestion path for per-campaign lead reports. Absent ids are
    /// a no-op (a worker may trail its final report past the stop).
    pub async fn record_leads(&self, id: &str, count: u32) {
        if let Some(campaign) = self.registry.record_leads(id, count) {
            if let Err(e) = self
                .storage
                .update_lead_count(&campaign.id, campaign.lead_count)
                .await
            {
                warn!(id, error = %e, "Failed to persist lead count");
            }
        }
    }

    /// Worker ingestion path for campaign-agnostic counters.
    pub fn record_ingestion(&self, kind: IngestionKind, amount: u32) {
        self.stats
            .on_ingestion(kind, u64::from(amount), self.registry.running_count());
    }

    /// Fan a worker log line out to observers.
    pub fn report_log(&self, message: &str) {
        info!(worker_message = message, "Worker log");
        self.channel.publish(TelemetryEvent::Log {
            message: message.to_string(),
        });
    }

    /// Register a telemetry observer, seeded with a full state snapshot.
    pub fn subscribe(&self) -> ObserverHandle {
        self.registry.subscribe_observer()
    }

    pub fn list_campaigns(&self) -> Vec<Campaign> {
        self.registry.list()
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot(self.registry.running_count())
    }

    /// Identity for the rendering-surface collaborator.
    pub fn identity(&self, city: &str) -> Result<Arc<Identity>, UnknownCity> {
        self.identities.get(city)
    }

    /// Stop every running campaign and close all observer queues. Called
    /// once before process exit.
    pub async fn drain(&self) {
        let ids: Vec<String> = self
            .registry
            .list()
            .into_iter()
            .map(|c| c.id)
            .collect();

        info!(campaigns = ids.len(), "Draining orchestrator");
        for id in ids {
            if let Err(e) = self.stop_campaign(&id).await {
                debug!(id = %id, error = %e, "Campaign already gone during drain");
            }
        }

        self.channel.close_all();
    }

    fn launch_worker(&self, campaign: &Campaign) {
        let identity = match self.identities.get(&campaign.city) {
            Ok(identity) => identity,
            Err(e) => {
                // Registry validated the city at start; losing it here
                // means the store was bypassed.
                warn!(id = %campaign.id, error = %e, "No identity for campaign city");
                return;
            }
        };

        match self.supervisor.launch(campaign, &identity) {
            Ok(handle) => {
                self.workers
                    .lock()
                    .unwrap()
                    .insert(campaign.id.clone(), handle);
            }
            Err(e) => {
                warn!(id = %campaign.id, error = %e, "Failed to launch worker");
                self.channel.publish(TelemetryEvent::Log {
                    message: format!("worker launch failed for {}: {e}", campaign.id),
                });
            }
        }
    }
}
