//! Worker collaborator boundary.
//!
//! The core treats the worker performing the actual per-campaign work as
//! an opaque external process. This module owns only the boundary: launch
//! a worker for a campaign, signal it to halt, and force-kill it if the
//! grace period expires. Workers report progress back over the HTTP
//! ingestion endpoints, not through this interface.

use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::info;

use crate::model::{Campaign, Identity};

/// Worker unresponsive to the halt signal. Non-fatal: the core forces the
/// campaign's state transition regardless.
#[derive(Debug, Error)]
#[error("worker for campaign '{campaign_id}' did not acknowledge halt within {grace:?}")]
pub struct WorkerTimeout {
    pub campaign_id: String,
    pub grace: Duration,
}

/// Launches workers. Implementations own nothing about the worker's
/// internal behavior.
pub trait WorkerSupervisor: Send + Sync {
    fn launch(&self, campaign: &Campaign, identity: &Identity) -> anyhow::Result<WorkerHandle>;
}

enum HandleInner {
    /// A spawned worker process. Halt is signalled over its stdin.
    Process(Child),
    /// No real worker behind this campaign; halt acknowledges instantly.
    Detached,
}

/// Handle to one launched worker, consumed by [`halt`](Self::halt).
pub struct WorkerHandle {
    campaign_id: String,
    inner: HandleInner,
}

impl WorkerHandle {
    /// A handle with no process behind it.
    pub fn detached(campaign_id: &str) -> Self {
        Self {
            campaign_id: campaign_id.to_string(),
            inner: HandleInner::Detached,
        }
    }

    /// Cooperatively halt the worker: signal it, then wait up to `grace`
    /// for it to exit. On expiry the process is killed and
    /// [`WorkerTimeout`] is returned so the caller can log the forced
    /// transition.
    pub async fn halt(self, grace: Duration) -> Result<(), WorkerTimeout> {
        match self.inner {
            HandleInner::Detached => Ok(()),
            HandleInner::Process(mut child) => {
                if let Some(mut stdin) = child.stdin.take() {
                    // Best effort: a worker that already exited has no stdin to hear it.
                    let _ = stdin.write_all(b"halt\n").await;
                    let _ = stdin.shutdown().await;
                }

                match timeout(grace, child.wait()).await {
                    Ok(status) => {
                        info!(
                            campaign_id = %self.campaign_id,
                            status = ?status.ok(),
                            "Worker exited"
                        );
                        Ok(())
                    }
                    Err(_) => {
                        let _ = child.start_kill();
                        Err(WorkerTimeout {
                            campaign_id: self.campaign_id,
                            grace,
                        })
                    }
                }
            }
        }
    }
}

/// Spawns one subprocess per campaign from a configured shell command.
///
/// The campaign and its identity are handed over via environment
/// variables, so the command can be anything from a Python bot to a shell
/// wrapper.
pub struct ProcessSupervisor {
    command: String,
}

impl ProcessSupervisor {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl WorkerSupervisor for ProcessSupervisor {
    fn launch(&self, campaign: &Campaign, identity: &Identity) -> anyhow::Result<WorkerHandle> {
        let child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("CARAVAN_CAMPAIGN_ID", &campaign.id)
            .env("CARAVAN_CITY", &campaign.city)
            .env("CARAVAN_PLATFORM", campaign.platform.as_str())
            .env("CARAVAN_MODE", &campaign.mode)
            .env("CARAVAN_USER_AGENT", &identity.user_agent)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        info!(
            campaign_id = %campaign.id,
            pid = child.id(),
            "Worker launched"
        );

        Ok(WorkerHandle {
            campaign_id: campaign.id.clone(),
            inner: HandleInner::Process(child),
        })
    }
}

/// Supervisor used when no worker command is configured: campaigns run as
/// bookkeeping-only records and halts acknowledge immediately.
pub struct DetachedSupervisor;

impl WorkerSupervisor for DetachedSupervisor {
    fn launch(&self, campaign: &Campaign, _identity: &Identity) -> anyhow::Result<WorkerHandle> {
        Ok(WorkerHandle::detached(&campaign.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CampaignStatus, HeaderOverride, Platform};
    use chrono::Utc;

    fn campaign() -> Campaign {
        Campaign {
            id: "both_Delhi_1700000000000".to_string(),
            city: "Delhi".to_string(),
            platform: Platform::Both,
            mode: "fresh24".to_string(),
            status: CampaignStatus::Running,
            start_time: Utc::now(),
            lead_count: 0,
        }
    }

    fn identity() -> Identity {
        Identity {
            city: "Delhi".to_string(),
            user_agent: "test-agent".to_string(),
            header_policy: vec![HeaderOverride {
                name: "Accept-Language".to_string(),
                value: "en-US".to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn test_detached_halt_acknowledges_immediately() {
        let handle = DetachedSupervisor
            .launch(&campaign(), &identity())
            .unwrap();

        assert!(handle.halt(Duration::from_millis(10)).await.is_ok());
    }

    #[tokio::test]
    async fn test_cooperative_worker_exits_within_grace() {
        // Worker that exits as soon as the halt line arrives on stdin.
        let supervisor = ProcessSupervisor::new("read -r _line; exit 0");
        let handle = supervisor.launch(&campaign(), &identity()).unwrap();

        assert!(handle.halt(Duration::from_secs(5)).await.is_ok());
    }

    #[tokio::test]
    async fn test_unresponsive_worker_times_out_and_is_killed() {
        // Worker that ignores stdin entirely.
        let supervisor = ProcessSupervisor::new("exec sleep 30");
        let handle = supervisor.launch(&campaign(), &identity()).unwrap();

        let err = handle.halt(Duration::from_millis(100)).await.unwrap_err();
        assert_eq!(err.campaign_id, "both_Delhi_1700000000000");
    }
}
