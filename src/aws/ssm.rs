//! SSM-backed fleet agent registry.

use async_trait::async_trait;
use aws_sdk_ssm::Client;
use tracing::debug;

use super::AgentRegistry;
use crate::error::{FleetError, Result};

pub struct SsmClient {
    client: Client,
}

impl SsmClient {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }
}

#[async_trait]
impl AgentRegistry for SsmClient {
    async fn managed_instance_ids(&self) -> Result<Vec<String>> {
        debug!("Sending DescribeInstanceInformation API request");

        let mut pages = self
            .client
            .describe_instance_information()
            .into_paginator()
            .send();

        let mut ids = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| FleetError::aws("aws::ssm", e))?;
            ids.extend(
                page.instance_information_list()
                    .iter()
                    .filter_map(|info| info.instance_id())
                    .map(str::to_string),
            );
        }

        debug!(managed_instances = ids.len(), "Fetched SSM managed instances");

        Ok(ids)
    }
}
