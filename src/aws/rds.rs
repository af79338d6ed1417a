//! RDS-backed database catalog.

use async_trait::async_trait;
use aws_sdk_rds::Client;
use tracing::debug;

use super::{DatabaseCatalog, DatabaseDescription, SnapshotDescription};
use crate::error::{FleetError, Result};

pub struct RdsClient {
    client: Client,
}

impl RdsClient {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }
}

#[async_trait]
impl DatabaseCatalog for RdsClient {
    async fn describe_databases(&self) -> Result<Vec<DatabaseDescription>> {
        let mut pages = self.client.describe_db_instances().into_paginator().send();

        let mut databases = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| FleetError::aws("aws::rds", e))?;
            databases.extend(page.db_instances().iter().filter_map(|db| {
                Some(DatabaseDescription {
                    identifier: db.db_instance_identifier()?.to_string(),
                    db_name: db.db_name().map(str::to_string),
                    multi_az: db.multi_az().unwrap_or(false),
                    backup_retention_days: db.backup_retention_period().unwrap_or(0),
                })
            }));
        }

        debug!(databases = databases.len(), "Fetched RDS instances");

        Ok(databases)
    }

    async fn describe_snapshots(&self, identifier: &str) -> Result<Vec<SnapshotDescription>> {
        let mut pages = self
            .client
            .describe_db_snapshots()
            .db_instance_identifier(identifier)
            .into_paginator()
            .send();

        let mut snapshots = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| FleetError::aws("aws::rds", e))?;
            snapshots.extend(page.db_snapshots().iter().filter_map(|snapshot| {
                Some(SnapshotDescription {
                    identifier: snapshot.db_snapshot_identifier()?.to_string(),
                    created: snapshot.snapshot_create_time().and_then(super::to_chrono),
                    allocated_storage_gb: snapshot.allocated_storage().unwrap_or(0),
                })
            }));
        }

        debug!(
            db_instance_identifier = %identifier,
            snapshots = snapshots.len(),
            "Fetched RDS snapshots"
        );

        Ok(snapshots)
    }
}
