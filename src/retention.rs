use crate::db::Database;
use crate::error::Result;
use crate::predicate::Predicate;
use chrono::Utc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const DAY_MS: i64 = 86_400_000;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub channels_swept: usize,
    pub deleted: u64,
    /// Channels skipped because their predicate was invalid or the delete
    /// failed.
    pub failed: Vec<String>,
}

/// Purges cached messages older than their channel's TTL. Local only; the
/// remote copies are left alone.
#[derive(Clone)]
pub struct RetentionSweeper {
    db: Database,
}

impl RetentionSweeper {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(Utc::now().timestamp_millis()).await
    }

    /// Sweeps as if the current time were `now_ms`. Channels without a
    /// positive TTL are never touched, and one channel failing does not
    /// stop the rest.
    pub async fn sweep_at(&self, now_ms: i64) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for channel in self.db.get_channels().await? {
            if channel.ttl_days <= 0 {
                continue;
            }

            // An unparseable predicate must not widen into "delete everything old".
            let predicate = match Predicate::parse(&channel.predicate) {
                Ok(p) => p,
                Err(e) => {
                    warn!("Not sweeping channel {}: {}", channel.name, e);
                    report.failed.push(channel.name);
                    continue;
                }
            };

            let cutoff = now_ms.saturating_sub(channel.ttl_days.saturating_mul(DAY_MS));
            match self.db.delete_expired(&predicate, cutoff).await {
                Ok(deleted) => {
                    if deleted > 0 {
                        info!(
                            "Expired {} messages from channel {} (ttl {}d)",
                            deleted, channel.name, channel.ttl_days
                        );
                    }
                    report.channels_swept += 1;
                    report.deleted += deleted;
                }
                Err(e) => {
                    warn!("Sweeping channel {} failed: {}", channel.name, e);
                    report.failed.push(channel.name);
                }
            }
        }

        Ok(report)
    }

    /// Sweeps once after `delay`, then every `interval` if one is given.
    pub fn spawn(self, delay: Duration, interval: Option<Duration>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            loop {
                if let Err(e) = self.sweep().await {
                    error!("Retention sweep failed: {}", e);
                }
                match interval {
                    Some(every) => tokio::time::sleep(every).await,
                    None => break,
                }
            }
        })
    }
}
