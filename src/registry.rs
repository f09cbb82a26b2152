//! Campaign lifecycle registry.
//!
//! The registry is the single writer for the campaign set. All mutations
//! happen behind one mutex, and every telemetry event describing a
//! mutation is published while that mutex is held, so no observer can see
//! the list and the event stream disagree. Nothing here awaits: worker
//! signalling and persistence happen in the orchestrator, outside the
//! lock.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};

use crate::identity::IdentityStore;
use crate::model::{Campaign, CampaignStatus, IngestionKind, Platform, TelemetryEvent};
use crate::stats::StatsAggregator;
use crate::telemetry::{ObserverHandle, TelemetryChannel};

/// Typed errors for registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Start requested for a city with no provisioned identity. Rejected,
    /// never retried.
    #[error("no identity provisioned for city '{0}'")]
    UnknownCity(String),

    /// Stop requested for an absent campaign id. Benign: double stops are
    /// a normal outcome, not a fault.
    #[error("campaign not found: {0}")]
    NotFound(String),
}

/// In-memory table of campaign records, keyed by campaign id and kept in
/// insertion order.
pub struct CampaignRegistry {
    identities: Arc<IdentityStore>,
    channel: Arc<TelemetryChannel>,
    stats: Arc<StatsAggregator>,
    campaigns: Mutex<Vec<Campaign>>,
}

impl CampaignRegistry {
    pub fn new(
        identities: Arc<IdentityStore>,
        channel: Arc<TelemetryChannel>,
        stats: Arc<StatsAggregator>,
    ) -> Self {
        Self {
            identities,
            channel,
            stats,
            campaigns: Mutex::new(Vec::new()),
        }
    }

    /// Create a campaign in `running` state.
    ///
    /// Fails with [`RegistryError::UnknownCity`] when the city has no
    /// identity. The `campaign_update` event is published atomically with
    /// the insertion.
    pub fn start(
        &self,
        city: &str,
        platform: Platform,
        mode: &str,
    ) -> Result<Campaign, RegistryError> {
        self.identities
            .get(city)
            .map_err(|e| RegistryError::UnknownCity(e.0))?;

        let mut campaigns = self.campaigns.lock().unwrap();

        let id = generate_id(&campaigns, platform, city);
        let campaign = Campaign {
            id,
            city: city.to_string(),
            platform,
            mode: mode.to_string(),
            status: CampaignStatus::Running,
            start_time: Utc::now(),
            lead_count: 0,
        };

        campaigns.push(campaign.clone());
        info!(id = %campaign.id, city, %platform, mode, "Campaign started");
        self.emit_update(&campaign, running_count(&campaigns));

        Ok(campaign)
    }

    /// Reinstate a persisted campaign after a restart, keeping its id,
    /// start time and lead count. The record re-enters `running` state.
    pub fn restore(&self, mut campaign: Campaign) {
        campaign.status = CampaignStatus::Running;

        let mut campaigns = self.campaigns.lock().unwrap();
        if campaigns.iter().any(|c| c.id == campaign.id) {
            debug!(id = %campaign.id, "Campaign already present, skipping restore");
            return;
        }

        info!(id = %campaign.id, city = %campaign.city, "Campaign restored");
        campaigns.push(campaign.clone());
        self.emit_update(&campaign, running_count(&campaigns));
    }

    /// Transition a running campaign to `stopping`.
    ///
    /// Returns the record so the caller can signal its worker. A second
    /// stop for the same id (absent or already stopping) is `NotFound`.
    pub fn begin_stop(&self, id: &str) -> Result<Campaign, RegistryError> {
        let mut campaigns = self.campaigns.lock().unwrap();

        let campaign = campaigns
            .iter_mut()
            .find(|c| c.id == id && c.status == CampaignStatus::Running)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        campaign.status = CampaignStatus::Stopping;
        debug!(id, "Campaign stopping");
        Ok(campaign.clone())
    }

    /// Complete a stop: mark the campaign `stopped`, remove it from the
    /// table and publish the removal. No-op for unknown ids.
    pub fn finish_stop(&self, id: &str) -> Option<Campaign> {
        let mut campaigns = self.campaigns.lock().unwrap();

        let index = campaigns.iter().position(|c| c.id == id)?;
        let mut campaign = campaigns.remove(index);
        campaign.status = CampaignStatus::Stopped;

        info!(id, lead_count = campaign.lead_count, "Campaign stopped");
        self.emit_update(&campaign, running_count(&campaigns));
        Some(campaign)
    }

    /// Increment a campaign's lead count from the worker ingestion path.
    ///
    /// A trailing report for an id that already left the registry is a
    /// deliberate no-op, because a worker may race its final update
    /// against the stop.
    pub fn record_leads(&self, id: &str, delta: u32) -> Option<Campaign> {
        let mut campaigns = self.campaigns.lock().unwrap();

        let Some(campaign) = campaigns.iter_mut().find(|c| c.id == id) else {
            debug!(id, delta, "Lead report for absent campaign, ignoring");
            return None;
        };

        campaign.lead_count += i64::from(delta);
        let campaign = campaign.clone();
        let running = running_count(&campaigns);

        self.channel.publish(TelemetryEvent::CampaignUpdate {
            data: campaign.clone(),
        });
        self.stats
            .on_ingestion(IngestionKind::Leads, u64::from(delta), running);
        Some(campaign)
    }

    /// Snapshot of all campaigns in insertion order. Never observes a
    /// partially updated record.
    pub fn list(&self) -> Vec<Campaign> {
        self.campaigns.lock().unwrap().clone()
    }

    /// Count of campaigns currently in `running` state.
    pub fn running_count(&self) -> usize {
        running_count(&self.campaigns.lock().unwrap())
    }

    /// Register a telemetry observer seeded with a consistent full
    /// snapshot: one `stats_update` plus one `campaign_update` per running
    /// campaign, built under the registry lock so no diff event can
    /// interleave.
    pub fn subscribe_observer(&self) -> ObserverHandle {
        let campaigns = self.campaigns.lock().unwrap();
        let running = running_count(&campaigns);

        let mut initial = Vec::with_capacity(running + 1);
        initial.push(TelemetryEvent::StatsUpdate {
            data: self.stats.snapshot(running),
        });
        initial.extend(
            campaigns
                .iter()
                .filter(|c| c.status == CampaignStatus::Running)
                .map(|c| TelemetryEvent::CampaignUpdate { data: c.clone() }),
        );

        self.channel.subscribe_with(initial)
    }

    fn emit_update(&self, campaign: &Campaign, running: usize) {
        self.channel.publish(TelemetryEvent::CampaignUpdate {
            data: campaign.clone(),
        });
        self.stats.on_campaign_change(running);
    }
}

fn running_count(campaigns: &[Campaign]) -> usize {
    campaigns
        .iter()
        .filter(|c| c.status == CampaignStatus::Running)
        .count()
}

/// Generate a fresh `{platform}_{city}_{millis}` id.
///
/// Millisecond timestamps can collide under rapid concurrent starts, so
/// the candidate is checked against the table and the timestamp bumped
/// until unique.
fn generate_id(campaigns: &[Campaign], platform: Platform, city: &str) -> String {
    let mut millis = Utc::now().timestamp_millis();
    loop {
        let id = format!("{platform}_{city}_{millis}");
        if !campaigns.iter().any(|c| c.id == id) {
            return id;
        }
        millis += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (Arc<TelemetryChannel>, CampaignRegistry) {
        let identities = Arc::new(IdentityStore::new());
        identities.provision("Delhi");
        identities.provision("Mumbai");

        let channel = Arc::new(TelemetryChannel::new());
        let stats = Arc::new(StatsAggregator::new(Arc::clone(&channel)));
        let registry = CampaignRegistry::new(identities, Arc::clone(&channel), stats);
        (channel, registry)
    }

    #[test]
    fn test_start_unknown_city_leaves_registry_unchanged() {
        let (_channel, registry) = registry();

        let err = registry
            .start("Atlantis", Platform::Both, "fresh24")
            .unwrap_err();

        assert_eq!(err, RegistryError::UnknownCity("Atlantis".to_string()));
        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_start_inserts_running_campaign_with_expected_id() {
        let (_channel, registry) = registry();

        let campaign = registry.start("Delhi", Platform::Both, "fresh24").unwrap();

        assert!(campaign.id.starts_with("both_Delhi_"));
        assert_eq!(campaign.status, CampaignStatus::Running);
        assert_eq!(campaign.lead_count, 0);

        let list = registry.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, campaign.id);
    }

    #[test]
    fn test_rapid_starts_never_share_an_id() {
        let (_channel, registry) = registry();

        let mut ids = Vec::new();
        for _ in 0..50 {
            ids.push(registry.start("Delhi", Platform::Both, "fresh24").unwrap().id);
        }

        let mut unique = ids.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), ids.len());
        assert_eq!(registry.running_count(), 50);
    }

    #[test]
    fn test_list_preserves_insertion_order() {
        let (_channel, registry) = registry();

        let a = registry.start("Delhi", Platform::Facebook, "m1").unwrap();
        let b = registry.start("Mumbai", Platform::Olx, "m2").unwrap();
        let c = registry.start("Delhi", Platform::Both, "m3").unwrap();

        let ids: Vec<String> = registry.list().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
    }

    #[test]
    fn test_stop_twice_yields_not_found_second_time() {
        let (_channel, registry) = registry();
        let campaign = registry.start("Delhi", Platform::Olx, "fresh24").unwrap();

        assert!(registry.begin_stop(&campaign.id).is_ok());
        assert_eq!(
            registry.begin_stop(&campaign.id).unwrap_err(),
            RegistryError::NotFound(campaign.id.clone())
        );

        registry.finish_stop(&campaign.id);
        assert!(registry.list().is_empty());
        assert_eq!(
            registry.begin_stop(&campaign.id).unwrap_err(),
            RegistryError::NotFound(campaign.id)
        );
    }

    #[test]
    fn test_running_count_tracks_lifecycle() {
        let (_channel, registry) = registry();

        let a = registry.start("Delhi", Platform::Both, "fresh24").unwrap();
        let _b = registry.start("Mumbai", Platform::Both, "fresh24").unwrap();
        assert_eq!(registry.running_count(), 2);

        registry.begin_stop(&a.id).unwrap();
        assert_eq!(registry.running_count(), 1);
        // Still listed while stopping; removed only once stopped.
        assert_eq!(registry.list().len(), 2);

        registry.finish_stop(&a.id);
        assert_eq!(registry.running_count(), 1);
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn test_record_leads_is_monotonic_and_benign_when_absent() {
        let (_channel, registry) = registry();
        let campaign = registry.start("Delhi", Platform::Both, "fresh24").unwrap();

        let updated = registry.record_leads(&campaign.id, 3).unwrap();
        assert_eq!(updated.lead_count, 3);
        let updated = registry.record_leads(&campaign.id, 2).unwrap();
        assert_eq!(updated.lead_count, 5);

        assert!(registry.record_leads("ghost_campaign", 10).is_none());
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn test_restore_keeps_id_and_leads_and_dedupes() {
        let (_channel, registry) = registry();

        let persisted = Campaign {
            id: "olx_Mumbai_1700000000000".to_string(),
            city: "Mumbai".to_string(),
            platform: Platform::Olx,
            mode: "fresh24".to_string(),
            status: CampaignStatus::Stopping,
            start_time: Utc::now(),
            lead_count: 12,
        };

        registry.restore(persisted.clone());
        registry.restore(persisted.clone());

        let list = registry.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, persisted.id);
        assert_eq!(list[0].status, CampaignStatus::Running);
        assert_eq!(list[0].lead_count, 12);
    }

    #[tokio::test]
    async fn test_start_emits_update_atomically_with_insertion() {
        let (_channel, registry) = registry();
        let mut observer = registry.subscribe_observer();

        // Empty snapshot first.
        match observer.next().await.unwrap() {
            TelemetryEvent::StatsUpdate { data } => assert_eq!(data.active_campaigns, 0),
            other => panic!("expected stats update, got {other:?}"),
        }

        let campaign = registry.start("Delhi", Platform::Both, "fresh24").unwrap();

        match observer.next().await.unwrap() {
            TelemetryEvent::CampaignUpdate { data } => {
                assert_eq!(data.id, campaign.id);
                assert_eq!(data.status, CampaignStatus::Running);
            }
            other => panic!("expected campaign update, got {other:?}"),
        }
        match observer.next().await.unwrap() {
            TelemetryEvent::StatsUpdate { data } => assert_eq!(data.active_campaigns, 1),
            other => panic!("expected stats update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_subscribe_snapshot_matches_registry_state() {
        let (_channel, registry) = registry();
        let a = registry.start("Delhi", Platform::Facebook, "m1").unwrap();
        let b = registry.start("Mumbai", Platform::Olx, "m2").unwrap();

        let mut observer = registry.subscribe_observer();

        match observer.next().await.unwrap() {
            TelemetryEvent::StatsUpdate { data } => {
                assert_eq!(data.active_campaigns, registry.list().len() as u64);
            }
            other => panic!("expected stats update, got {other:?}"),
        }
        for expected in [&a, &b] {
            match observer.next().await.unwrap() {
                TelemetryEvent::CampaignUpdate { data } => assert_eq!(&data.id, &expected.id),
                other => panic!("expected campaign update, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_stop_emits_removal_event() {
        let (_channel, registry) = registry();
        let campaign = registry.start("Delhi", Platform::Both, "fresh24").unwrap();

        let mut observer = registry.subscribe_observer();
        // Drain the subscribe snapshot: stats + the one running campaign.
        observer.next().await.unwrap();
        observer.next().await.unwrap();

        registry.begin_stop(&campaign.id).unwrap();
        registry.finish_stop(&campaign.id).unwrap();

        match observer.next().await.unwrap() {
            TelemetryEvent::CampaignUpdate { data } => {
                assert_eq!(data.id, campaign.id);
                assert_eq!(data.status, CampaignStatus::Stopped);
            }
            other => panic!("expected campaign update, got {other:?}"),
        }
        match observer.next().await.unwrap() {
            TelemetryEvent::StatsUpdate { data } => assert_eq!(data.active_campaigns, 0),
            other => panic!("expected stats update, got {other:?}"),
        }
    }
}
