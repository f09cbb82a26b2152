//! SQLite persistence for campaign records.
//!
//! The in-memory registry is the source of truth; this layer only exists
//! so campaigns survive a backend restart. Rows are written behind the
//! registry (write-behind), reloaded once at boot, and deleted when a
//! campaign completes its stop. A storage failure is never allowed to
//! fail a registry operation — callers log and carry on.

use anyhow::Context;
use chrono::{TimeZone, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::model::{Campaign, CampaignStatus, Platform};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance and initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:caravan.db?mode=rwc" or "sqlite::memory:")
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    async fn initialize_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                city TEXT NOT NULL,
                platform TEXT NOT NULL,
                mode TEXT NOT NULL,
                status TEXT NOT NULL,
                start_ts INTEGER NOT NULL,
                lead_count INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persist a freshly started campaign.
    pub async fn insert_campaign(&self, campaign: &Campaign) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO campaigns (id, city, platform, mode, status, start_ts, lead_count)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&campaign.id)
        .bind(&campaign.city)
        .bind(campaign.platform.as_str())
        .bind(&campaign.mode)
        .bind(status_str(campaign.status))
        .bind(campaign.start_time.timestamp_millis())
        .bind(campaign.lead_count)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record that a stop is underway, so a crash mid-stop does not
    /// resurrect the campaign at the next boot.
    pub async fn mark_stopping(&self, id: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE campaigns SET status = 'stopping' WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Persist an updated lead count.
    pub async fn update_lead_count(&self, id: &str, lead_count: i64) -> anyhow::Result<()> {
        sqlx::query("UPDATE campaigns SET lead_count = ? WHERE id = ?")
            .bind(lead_count)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Remove a completed campaign.
    pub async fn delete_campaign(&self, id: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM campaigns WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Load the campaigns that should be reinstated after a restart.
    ///
    /// Rows caught mid-`stopping` by the crash are treated as stopped and
    /// purged; only running rows are returned, oldest first.
    pub async fn load_surviving_campaigns(&self) -> anyhow::Result<Vec<Campaign>> {
        sqlx::query("DELETE FROM campaigns WHERE status != 'running'")
            .execute(&self.pool)
            .await?;

        let rows = sqlx::query(
            r#"
            SELECT id, city, platform, mode, start_ts, lead_count
            FROM campaigns
            ORDER BY start_ts ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut campaigns = Vec::with_capacity(rows.len());
        for row in rows {
            let platform_raw: String = row.get("platform");
            let platform = Platform::from_str(&platform_raw)
                .with_context(|| format!("corrupt platform column: '{platform_raw}'"))?;

            let start_ts: i64 = row.get("start_ts");
            let start_time = Utc
                .timestamp_millis_opt(start_ts)
                .single()
                .with_context(|| format!("corrupt start_ts column: {start_ts}"))?;

            campaigns.push(Campaign {
                id: row.get("id"),
                city: row.get("city"),
                platform,
                mode: row.get("mode"),
                status: CampaignStatus::Running,
                start_time,
                lead_count: row.get("lead_count"),
            });
        }

        Ok(campaigns)
    }
}

fn status_str(status: CampaignStatus) -> &'static str {
    match status {
        CampaignStatus::Running => "running",
        CampaignStatus::Stopping => "stopping",
        CampaignStatus::Stopped => "stopped",
    }
}
