//! Cloud control-plane capabilities consumed by the fleet pipeline.
//!
//! The traits here are the only view the pipeline has of AWS. The
//! submodules implement them over the AWS SDK; tests implement them with
//! in-memory fakes.

pub mod ec2;
pub mod rds;
pub mod ssm;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::Result;
use crate::instance::InstanceState;

/// Provider-side instance query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceQuery {
    /// Glob matched against the `Name` tag, e.g. `*web*`.
    pub name_glob: Option<String>,
    pub states: Vec<InstanceState>,
}

/// A key/value tag attached to an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

/// Raw instance description as returned by the inventory.
#[derive(Debug, Clone)]
pub struct InstanceDescription {
    pub instance_id: String,
    pub tags: Vec<Tag>,
    pub image_id: String,
    pub launch_time: Option<DateTime<Utc>>,
    pub state: String,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
}

impl InstanceDescription {
    /// Value of the first `Name` tag, if any.
    pub fn name_tag(&self) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.key == "Name")
            .map(|tag| tag.value.as_str())
    }
}

/// Machine image metadata needed for aging.
#[derive(Debug, Clone)]
pub struct ImageDescription {
    pub image_id: String,
    /// RFC 3339 creation date as reported by the registry.
    pub creation_date: Option<String>,
}

/// Raw managed-database description.
#[derive(Debug, Clone)]
pub struct DatabaseDescription {
    pub identifier: String,
    pub db_name: Option<String>,
    pub multi_az: bool,
    pub backup_retention_days: i32,
}

/// Raw database snapshot description.
#[derive(Debug, Clone)]
pub struct SnapshotDescription {
    pub identifier: String,
    pub created: Option<DateTime<Utc>>,
    pub allocated_storage_gb: i32,
}

#[async_trait]
pub trait Inventory: Send + Sync {
    async fn describe_instances(&self, query: &InstanceQuery) -> Result<Vec<InstanceDescription>>;

    /// Request a reboot. Success means the request was accepted, nothing more.
    async fn reboot_instance(&self, instance_id: &str) -> Result<()>;
}

#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// `Ok(None)` when the registry has no image with this id.
    async fn describe_image(&self, image_id: &str) -> Result<Option<ImageDescription>>;
}

#[async_trait]
pub trait AgentRegistry: Send + Sync {
    /// Ids of every instance registered with the fleet agent.
    async fn managed_instance_ids(&self) -> Result<Vec<String>>;
}

#[async_trait]
pub trait DatabaseCatalog: Send + Sync {
    async fn describe_databases(&self) -> Result<Vec<DatabaseDescription>>;

    async fn describe_snapshots(&self, identifier: &str) -> Result<Vec<SnapshotDescription>>;
}

/// Load the shared SDK configuration.
///
/// Region resolution priority:
/// 1. Explicit region (--region or the environment's config entry)
/// 2. AWS SDK defaults (environment variables, ~/.aws/config, IMDS)
pub async fn load_sdk_config(profile: Option<&str>, region: Option<&str>) -> aws_config::SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());

    if let Some(p) = profile {
        debug!(profile = %p, "Using AWS profile");
        loader = loader.profile_name(p);
    }

    match region {
        Some(r) => {
            info!(region = %r, "Using explicit AWS region from configuration");
            loader = loader.region(aws_config::Region::new(r.to_string()));
        }
        None => debug!("Using default AWS region from AWS SDK (environment/credentials file/IMDS)"),
    }

    loader.load().await
}

/// Convert an SDK timestamp to chrono.
pub(crate) fn to_chrono(dt: &aws_sdk_ec2::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos())
}
