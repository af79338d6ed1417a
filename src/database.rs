//! Managed database inventory and snapshot history.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::aws::{DatabaseCatalog, DatabaseDescription, SnapshotDescription};
use crate::error::FleetError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotInfo {
    pub id: String,
    pub created: DateTime<Utc>,
    pub size_gb: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseInfo {
    pub id: String,
    pub name: String,
    pub multi_az: bool,
    /// Backup retention period above zero.
    pub snapshots_enabled: bool,
    /// Oldest first.
    pub snapshots: Vec<SnapshotInfo>,
}

impl DatabaseInfo {
    pub fn latest_snapshot(&self) -> crate::error::Result<&SnapshotInfo> {
        if !self.snapshots_enabled {
            return Err(FleetError::SnapshotsDisabled(self.id.clone()));
        }
        self.snapshots
            .last()
            .ok_or_else(|| FleetError::NoSnapshots(self.id.clone()))
    }

    /// Id of the newest snapshot, empty when snapshots are disabled or absent.
    pub fn latest_snapshot_id(&self) -> &str {
        self.latest_snapshot()
            .map(|snapshot| snapshot.id.as_str())
            .unwrap_or_default()
    }
}

pub struct DatabaseManager {
    catalog: Arc<dyn DatabaseCatalog>,
}

impl DatabaseManager {
    pub fn new(catalog: Arc<dyn DatabaseCatalog>) -> Self {
        Self { catalog }
    }

    /// All databases whose identifier contains `filter`, each with its
    /// snapshot history.
    pub async fn fetch(&self, filter: Option<&str>) -> Result<Vec<DatabaseInfo>> {
        let descriptions = self
            .catalog
            .describe_databases()
            .await
            .context("unable to describe databases")?;

        let filter = filter.unwrap_or_default();
        let mut databases = Vec::new();
        for description in descriptions
            .into_iter()
            .filter(|d| d.identifier.contains(filter))
        {
            let snapshots = self
                .fetch_snapshots(&description.identifier)
                .await
                .context("could not load snapshots")?;
            databases.push(to_info(description, snapshots));
        }

        info!(databases = databases.len(), "Fetched databases");
        Ok(databases)
    }

    /// Snapshots of one database, oldest first.
    pub async fn fetch_snapshots(&self, identifier: &str) -> Result<Vec<SnapshotInfo>> {
        let descriptions = self
            .catalog
            .describe_snapshots(identifier)
            .await
            .with_context(|| format!("unable to list DB snapshots for {identifier}"))?;

        let mut snapshots: Vec<SnapshotInfo> = descriptions
            .into_iter()
            .filter_map(to_snapshot)
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.created);

        Ok(snapshots)
    }
}

fn to_info(description: DatabaseDescription, snapshots: Vec<SnapshotInfo>) -> DatabaseInfo {
    DatabaseInfo {
        id: description.identifier,
        name: description.db_name.unwrap_or_default(),
        multi_az: description.multi_az,
        snapshots_enabled: description.backup_retention_days > 0,
        snapshots,
    }
}

// Snapshots still being created have no timestamp yet.
fn to_snapshot(description: SnapshotDescription) -> Option<SnapshotInfo> {
    let Some(created) = description.created else {
        debug!(snapshot_id = %description.identifier, "Skipping snapshot without creation time");
        return None;
    };

    Some(SnapshotInfo {
        id: description.identifier,
        created,
        size_gb: description.allocated_storage_gb,
    })
}
