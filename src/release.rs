//! Deployed release, config package and schema lookups through each
//! environment's status endpoints.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FleetError, Result};

#[derive(Debug, Deserialize)]
struct ReleaseResponse {
    package: Package,
}

#[derive(Debug, Deserialize)]
struct Package {
    #[serde(default)]
    name: String,
    #[serde(default)]
    hashref: String,
    #[serde(default)]
    timestamp: String,
}

#[derive(Debug, Deserialize)]
struct ConfigResponse {
    hashref: String,
    #[serde(default)]
    timestamp: String,
}

#[derive(Debug, Deserialize)]
struct SchemaResponse {
    #[serde(rename = "kinetic-platform-schema")]
    core: SchemaChange,
    #[serde(rename = "kinetic-cas-kiehls-schema", default)]
    kiehls: SchemaChange,
}

/// Release currently deployed to one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseInfo {
    pub environment: String,
    pub name: String,
    pub hashref: String,
    pub timestamp: String,
}

/// Configuration package currently deployed to one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigInfo {
    pub environment: String,
    pub hashref: String,
    pub timestamp: String,
}

/// Latest sqitch change applied to one database schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaChange {
    #[serde(default)]
    pub change: String,
    #[serde(default)]
    pub change_id: String,
    #[serde(default)]
    pub planned_at: String,
    #[serde(default)]
    pub script_hash: String,
}

/// Schema state of one environment's core and kiehls databases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaInfo {
    pub environment: String,
    pub core: SchemaChange,
    pub kiehls: SchemaChange,
}

pub struct ReleaseChecker {
    client: reqwest::Client,
}

impl ReleaseChecker {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| FleetError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// GET `url` and decode the JSON body. Anything but 200 is an error.
    async fn get<T: DeserializeOwned>(
        &self,
        environment: &str,
        url: &str,
        kind: &str,
    ) -> Result<T> {
        let failed = |reason: String| FleetError::Release {
            environment: environment.to_string(),
            reason,
        };

        debug!(environment = %environment, url = %url, kind, "Requesting status endpoint");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(failed(format!("received non-200 response: {status}")));
        }

        response
            .json()
            .await
            .map_err(|e| failed(format!("invalid {kind} payload: {e}")))
    }

    pub async fn fetch(&self, environment: &str, url: &str) -> Result<ReleaseInfo> {
        let body: ReleaseResponse = self.get(environment, url, "release").await?;

        Ok(ReleaseInfo {
            environment: environment.to_string(),
            name: body.package.name,
            hashref: body.package.hashref,
            timestamp: body.package.timestamp,
        })
    }

    pub async fn fetch_config(&self, environment: &str, url: &str) -> Result<ConfigInfo> {
        let body: ConfigResponse = self.get(environment, url, "config").await?;

        Ok(ConfigInfo {
            environment: environment.to_string(),
            hashref: body.hashref,
            timestamp: body.timestamp,
        })
    }

    pub async fn fetch_schema(&self, environment: &str, url: &str) -> Result<SchemaInfo> {
        let body: SchemaResponse = self.get(environment, url, "schema").await?;

        Ok(SchemaInfo {
            environment: environment.to_string(),
            core: body.core,
            kiehls: body.kiehls,
        })
    }

    /// Query every `(environment, url)` pair in order; the first failure
    /// aborts.
    pub async fn fetch_all(&self, endpoints: &[(String, String)]) -> Result<Vec<ReleaseInfo>> {
        let mut releases = Vec::with_capacity(endpoints.len());
        for (environment, url) in endpoints {
            releases.push(self.fetch(environment, url).await?);
        }
        Ok(releases)
    }

    pub async fn fetch_all_config(
        &self,
        endpoints: &[(String, String)],
    ) -> Result<Vec<ConfigInfo>> {
        let mut configs = Vec::with_capacity(endpoints.len());
        for (environment, url) in endpoints {
            configs.push(self.fetch_config(environment, url).await?);
        }
        Ok(configs)
    }

    pub async fn fetch_all_schema(
        &self,
        endpoints: &[(String, String)],
    ) -> Result<Vec<SchemaInfo>> {
        let mut schemas = Vec::with_capacity(endpoints.len());
        for (environment, url) in endpoints {
            schemas.push(self.fetch_schema(environment, url).await?);
        }
        Ok(schemas)
    }
}
