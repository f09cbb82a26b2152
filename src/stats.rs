//! Rollup counters derived from campaign activity and worker ingestion.
//!
//! The aggregator owns only the accumulated ingestion counters. The
//! `activeCampaigns` figure is always recomputed from the registry at
//! snapshot time — it is never incremented or decremented on its own, so
//! it cannot drift from the authoritative campaign set.

use std::sync::{Arc, Mutex};

use crate::model::{IngestionKind, StatsSnapshot, TelemetryEvent};
use crate::telemetry::TelemetryChannel;

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    total_leads: u64,
    messages_sent: u64,
    numbers_found: u64,
}

/// Derives [`StatsSnapshot`]s and publishes them through the channel.
pub struct StatsAggregator {
    counters: Mutex<Counters>,
    channel: Arc<TelemetryChannel>,
}

impl StatsAggregator {
    pub fn new(channel: Arc<TelemetryChannel>) -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            channel,
        }
    }

    /// Record an ingestion event from a worker and publish a fresh
    /// snapshot. `active_campaigns` is supplied by the caller from the
    /// registry's running count.
    pub fn on_ingestion(&self, kind: IngestionKind, amount: u64, active_campaigns: usize) {
        {
            let mut counters = self.counters.lock().unwrap();
            match kind {
                IngestionKind::Leads => counters.total_leads += amount,
                IngestionKind::MessagesSent => counters.messages_sent += amount,
                IngestionKind::NumbersFound => counters.numbers_found += amount,
            }
        }
        self.publish(active_campaigns);
    }

    /// React to a campaign transition (start, stop, restore): the running
    /// count may have changed, so push an updated snapshot to observers.
    pub fn on_campaign_change(&self, active_campaigns: usize) {
        self.publish(active_campaigns);
    }

    /// Pure read of the current rollup.
    pub fn snapshot(&self, active_campaigns: usize) -> StatsSnapshot {
        let counters = *self.counters.lock().unwrap();
        StatsSnapshot {
            total_leads: counters.total_leads,
            messages_sent: counters.messages_sent,
            numbers_found: counters.numbers_found,
            active_campaigns: active_campaigns as u64,
        }
    }

    fn publish(&self, active_campaigns: usize) {
        self.channel.publish(TelemetryEvent::StatsUpdate {
            data: self.snapshot(active_campaigns),
        });
    }
}
