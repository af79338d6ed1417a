//! EC2-backed inventory and image registry.

use async_trait::async_trait;
use aws_sdk_ec2::Client;
use aws_sdk_ec2::types::Filter;
use tracing::{debug, info};

use super::{ImageDescription, ImageRegistry, InstanceDescription, InstanceQuery, Inventory, Tag};
use crate::error::{FleetError, Result};

pub struct Ec2Client {
    client: Client,
    region: String,
}

impl Ec2Client {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        let region = config
            .region()
            .map(|r| r.as_ref())
            .unwrap_or("unknown")
            .to_string();

        debug!(region = %region, "AWS EC2 client initialized");

        Self {
            client: Client::new(config),
            region,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

/// Translate an inventory query into EC2 API filters.
pub(crate) fn build_filters(query: &InstanceQuery) -> Vec<Filter> {
    let mut filters = Vec::new();

    if let Some(glob) = &query.name_glob {
        filters.push(Filter::builder().name("tag:Name").values(glob).build());
    }

    if !query.states.is_empty() {
        filters.push(
            Filter::builder()
                .name("instance-state-name")
                .set_values(Some(
                    query
                        .states
                        .iter()
                        .map(|s| s.provider_name().to_string())
                        .collect(),
                ))
                .build(),
        );
    }

    filters
}

fn describe(instance: &aws_sdk_ec2::types::Instance) -> Option<InstanceDescription> {
    let instance_id = instance.instance_id()?.to_string();

    let tags = instance
        .tags()
        .iter()
        .filter_map(|tag| {
            Some(Tag {
                key: tag.key()?.to_string(),
                value: tag.value().unwrap_or_default().to_string(),
            })
        })
        .collect();

    Some(InstanceDescription {
        instance_id,
        tags,
        image_id: instance.image_id().unwrap_or_default().to_string(),
        launch_time: instance.launch_time().and_then(super::to_chrono),
        state: instance
            .state()
            .and_then(|s| s.name())
            .map(|n| n.as_str().to_string())
            .unwrap_or_default(),
        public_ip: instance.public_ip_address().map(str::to_string),
        private_ip: instance.private_ip_address().map(str::to_string),
    })
}

#[async_trait]
impl Inventory for Ec2Client {
    async fn describe_instances(&self, query: &InstanceQuery) -> Result<Vec<InstanceDescription>> {
        let filters = build_filters(query);
        debug!(
            region = %self.region,
            applied_filters = filters.len(),
            "Sending DescribeInstances API request"
        );

        let mut pages = self
            .client
            .describe_instances()
            .set_filters(Some(filters))
            .into_paginator()
            .send();

        let mut descriptions = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| FleetError::aws("aws::ec2", e))?;
            descriptions.extend(
                page.reservations()
                    .iter()
                    .flat_map(|r| r.instances())
                    .filter_map(describe),
            );
        }

        debug!(
            region = %self.region,
            total_instances = descriptions.len(),
            "Received response from DescribeInstances API"
        );

        Ok(descriptions)
    }

    async fn reboot_instance(&self, instance_id: &str) -> Result<()> {
        info!(
            instance_id = %instance_id,
            region = %self.region,
            api_action = "RebootInstances",
            "Sending reboot request to AWS EC2 API"
        );

        self.client
            .reboot_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| FleetError::aws("aws::ec2", e))?;

        Ok(())
    }
}

#[async_trait]
impl ImageRegistry for Ec2Client {
    async fn describe_image(&self, image_id: &str) -> Result<Option<ImageDescription>> {
        debug!(image_id = %image_id, "Sending DescribeImages API request");

        let result = self
            .client
            .describe_images()
            .image_ids(image_id)
            .send()
            .await;

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                let err = FleetError::aws("aws::ec2", e);
                if err.is_not_found() {
                    debug!(image_id = %image_id, error = %err, "Image not found");
                    return Ok(None);
                }
                return Err(err);
            }
        };

        Ok(resp.images().first().map(|image| ImageDescription {
            image_id: image.image_id().unwrap_or(image_id).to_string(),
            creation_date: image.creation_date().map(str::to_string),
        }))
    }
}
