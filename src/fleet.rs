//! Fleet manager: owns the working set for one command and drives the
//! fetch, filter, enrich and scan stages over it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::aws::{AgentRegistry, ImageRegistry, InstanceDescription, InstanceQuery, Inventory};
use crate::error::FleetError;
use crate::filter;
use crate::instance::{InstanceRecord, InstanceState, age_in_days};
use crate::scan::{self, JumpSettings, ScanSummary};
use crate::ssh::{DEFAULT_TARGET_USER, HostKeyPolicy, RouteFactory};

/// Capability handles the manager works through.
#[derive(Clone)]
pub struct FleetClients {
    pub inventory: Arc<dyn Inventory>,
    pub images: Arc<dyn ImageRegistry>,
    pub agents: Arc<dyn AgentRegistry>,
    pub routes: Arc<dyn RouteFactory>,
}

#[derive(Debug, Clone)]
pub struct FleetOptions {
    /// Also fetch shutting-down, stopping and terminated instances.
    pub include_all_states: bool,
    pub target_user: String,
    pub host_key_policy: HostKeyPolicy,
    pub scan_concurrency: usize,
}

impl Default for FleetOptions {
    fn default() -> Self {
        Self {
            include_all_states: false,
            target_user: DEFAULT_TARGET_USER.to_string(),
            host_key_policy: HostKeyPolicy::default(),
            scan_concurrency: 1,
        }
    }
}

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct FleetManager {
    clients: FleetClients,
    options: FleetOptions,
    clock: Clock,
    instances: Vec<InstanceRecord>,
}

impl FleetManager {
    pub fn new(clients: FleetClients, options: FleetOptions) -> Self {
        Self {
            clients,
            options,
            clock: Box::new(Utc::now),
            instances: Vec::new(),
        }
    }

    /// Replace the clock used for age computations.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Box::new(clock);
        self
    }

    pub fn instances(&self) -> &[InstanceRecord] {
        &self.instances
    }

    pub fn into_instances(self) -> Vec<InstanceRecord> {
        self.instances
    }

    /// Stable sort, youngest instance first.
    pub fn sort_by_instance_age(&mut self) {
        self.instances.sort_by_key(|record| record.instance_age_days);
    }

    /// Replace the working set with the instances matching `name_filter`.
    ///
    /// The name is matched as a substring of the `Name` tag. On failure the
    /// working set is left empty.
    pub async fn fetch_instances(&mut self, name_filter: Option<&str>) -> Result<()> {
        self.instances.clear();

        let states = if self.options.include_all_states {
            InstanceState::ALL_QUERY
        } else {
            InstanceState::DEFAULT_QUERY
        };
        let query = InstanceQuery {
            name_glob: name_filter
                .filter(|name| !name.is_empty())
                .map(|name| format!("*{name}*")),
            states: states.to_vec(),
        };

        debug!(
            name_glob = ?query.name_glob,
            include_all_states = self.options.include_all_states,
            "Fetching instances"
        );

        let descriptions = self
            .clients
            .inventory
            .describe_instances(&query)
            .await
            .context("failed to describe instances")?;

        let now = (self.clock)();
        let mut seen = HashSet::new();
        for description in descriptions {
            if !seen.insert(description.instance_id.clone()) {
                debug!(instance_id = %description.instance_id, "Skipping duplicate instance");
                continue;
            }
            self.instances.push(to_record(description, now));
        }

        info!(instances = self.instances.len(), "Fetched instances");
        Ok(())
    }

    /// Narrow the working set in place.
    pub fn filter<P>(&mut self, predicate: P)
    where
        P: Fn(&InstanceRecord) -> bool,
    {
        let before = self.instances.len();
        filter::filter(&mut self.instances, predicate);
        debug!(before, after = self.instances.len(), "Filtered instances");
    }

    /// Fill in `image_age_days` for every record.
    ///
    /// Stops at the first failing lookup. Records before it keep their
    /// computed age; the rest stay unknown.
    pub async fn fetch_image_ages(&mut self) -> Result<()> {
        let now = (self.clock)();
        let mut ages: HashMap<String, u64> = HashMap::new();

        for record in self.instances.iter_mut() {
            let age = match ages.get(&record.image_id) {
                Some(age) => *age,
                None => {
                    let age = image_age(self.clients.images.as_ref(), &record.image_id, now)
                        .await
                        .context("unable to scan image ages")?;
                    ages.insert(record.image_id.clone(), age);
                    age
                }
            };
            record.image_age_days = Some(age);
        }

        debug!(images = ages.len(), "Fetched image ages");
        Ok(())
    }

    /// Mark which records are registered with the fleet agent.
    pub async fn fetch_agent_status(&mut self) -> Result<()> {
        if self.instances.is_empty() {
            return Ok(());
        }

        let managed: HashSet<String> = self
            .clients
            .agents
            .managed_instance_ids()
            .await
            .context("cannot describe SSM instance information")?
            .into_iter()
            .collect();

        for record in self.instances.iter_mut() {
            record.agent_managed = managed.contains(&record.id);
        }

        debug!(managed = managed.len(), "Fetched agent status");
        Ok(())
    }

    /// Run the remote diagnostics against every record through the bastion.
    pub async fn jump_scan(&mut self, bastion_host: &str, bastion_user: &str) -> ScanSummary {
        let settings = JumpSettings {
            bastion_host: bastion_host.to_string(),
            bastion_user: bastion_user.to_string(),
            target_user: self.options.target_user.clone(),
            host_key_policy: self.options.host_key_policy,
            concurrency: self.options.scan_concurrency,
        };

        scan::jump_scan(&mut self.instances, self.clients.routes.as_ref(), &settings).await
    }

    /// Ask the provider to reboot one instance. Completion is not verified.
    pub async fn reboot(&self, instance_id: &str) -> Result<()> {
        self.clients
            .inventory
            .reboot_instance(instance_id)
            .await
            .with_context(|| format!("failed to reboot instance {instance_id}"))?;

        info!(instance_id = %instance_id, "Reboot requested");
        Ok(())
    }
}

fn to_record(description: InstanceDescription, now: DateTime<Utc>) -> InstanceRecord {
    let mut record = InstanceRecord::new(
        description.instance_id.as_str(),
        InstanceState::from_provider(&description.state),
    );
    record.name = description.name_tag().unwrap_or_default().to_string();

    record.instance_age_days = match description.launch_time {
        Some(launch) => age_in_days(launch, now),
        None => {
            debug!(instance_id = %record.id, "Instance has no launch time, age set to 0");
            0
        }
    };

    record.image_id = description.image_id;
    record.public_ip = description.public_ip.unwrap_or_default();
    record.private_ip = description.private_ip.unwrap_or_default();
    record
}

async fn image_age(
    images: &dyn ImageRegistry,
    image_id: &str,
    now: DateTime<Utc>,
) -> crate::error::Result<u64> {
    let image = images
        .describe_image(image_id)
        .await?
        .ok_or_else(|| FleetError::ImageNotFound(image_id.to_string()))?;

    let invalid = |reason: String| FleetError::InvalidTimestamp {
        image_id: image_id.to_string(),
        reason,
    };

    let created = image
        .creation_date
        .as_deref()
        .ok_or_else(|| invalid("creation date missing".to_string()))?;
    let created = DateTime::parse_from_rfc3339(created)
        .map_err(|e| invalid(e.to_string()))?
        .with_timezone(&Utc);

    Ok(age_in_days(created, now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::{ImageDescription, Tag};
    use crate::error::Result as FleetResult;
    use crate::instance::RebootStatus;
    use crate::scan::tests::FakeRoutes;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::sync::Mutex;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    #[derive(Default)]
    struct FakeInventory {
        instances: Vec<InstanceDescription>,
        fail: bool,
        queries: Mutex<Vec<InstanceQuery>>,
        reboots: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Inventory for FakeInventory {
        async fn describe_instances(
            &self,
            query: &InstanceQuery,
        ) -> FleetResult<Vec<InstanceDescription>> {
            self.queries.lock().unwrap().push(query.clone());
            if self.fail {
                return Err(FleetError::aws("aws::ec2", "RequestLimitExceeded"));
            }
            Ok(self.instances.clone())
        }

        async fn reboot_instance(&self, instance_id: &str) -> FleetResult<()> {
            if self.fail {
                return Err(FleetError::aws("aws::ec2", "InvalidInstanceID.NotFound"));
            }
            self.reboots.lock().unwrap().push(instance_id.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeImages {
        created: HashMap<String, String>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ImageRegistry for FakeImages {
        async fn describe_image(&self, image_id: &str) -> FleetResult<Option<ImageDescription>> {
            self.calls.lock().unwrap().push(image_id.to_string());
            Ok(self.created.get(image_id).map(|date| ImageDescription {
                image_id: image_id.to_string(),
                creation_date: Some(date.clone()),
            }))
        }
    }

    struct FakeAgents {
        ids: Option<Vec<String>>,
    }

    #[async_trait]
    impl AgentRegistry for FakeAgents {
        async fn managed_instance_ids(&self) -> FleetResult<Vec<String>> {
            self.ids
                .clone()
                .ok_or_else(|| FleetError::aws("aws::ssm", "AccessDeniedException"))
        }
    }

    fn description(id: &str, name: &str, image: &str, age_days: i64) -> InstanceDescription {
        InstanceDescription {
            instance_id: id.to_string(),
            tags: vec![Tag {
                key: "Name".to_string(),
                value: name.to_string(),
            }],
            image_id: image.to_string(),
            launch_time: Some(now() - Duration::days(age_days)),
            state: "running".to_string(),
            public_ip: None,
            private_ip: Some(format!("10.0.0.{age_days}")),
        }
    }

    struct Harness {
        inventory: Arc<FakeInventory>,
        images: Arc<FakeImages>,
        manager: FleetManager,
    }

    fn harness(
        inventory: FakeInventory,
        images: FakeImages,
        agents: Option<Vec<String>>,
        options: FleetOptions,
    ) -> Harness {
        let inventory = Arc::new(inventory);
        let images = Arc::new(images);
        let clients = FleetClients {
            inventory: inventory.clone(),
            images: images.clone(),
            agents: Arc::new(FakeAgents { ids: agents }),
            routes: Arc::new(FakeRoutes::healthy()),
        };
        Harness {
            inventory,
            images,
            manager: FleetManager::new(clients, options).with_clock(now),
        }
    }

    fn images(entries: &[(&str, &str)]) -> FakeImages {
        FakeImages {
            created: entries
                .iter()
                .map(|(id, date)| (id.to_string(), date.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    fn ids(manager: &FleetManager) -> Vec<&str> {
        manager.instances().iter().map(|r| r.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_fetch_instances_builds_records() {
        let mut launchless = description("i-2", "", "ami-1", 0);
        launchless.launch_time = None;
        launchless.tags.clear();
        let inventory = FakeInventory {
            instances: vec![description("i-1", "web-1", "ami-1", 120), launchless],
            ..Default::default()
        };
        let mut h = harness(inventory, FakeImages::default(), None, FleetOptions::default());

        h.manager.fetch_instances(Some("web")).await.unwrap();

        let query = h.inventory.queries.lock().unwrap()[0].clone();
        assert_eq!(query.name_glob.as_deref(), Some("*web*"));
        assert_eq!(query.states, InstanceState::DEFAULT_QUERY.to_vec());

        let records = h.manager.instances();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "web-1");
        assert_eq!(records[0].instance_age_days, 120);
        assert_eq!(records[0].image_age_days, None);
        assert!(!records[0].agent_managed);
        assert_eq!(records[0].state, InstanceState::Running);
        assert_eq!(records[1].name, "");
        assert_eq!(records[1].instance_age_days, 0);
    }

    #[tokio::test]
    async fn test_fetch_instances_all_states_without_name() {
        let options = FleetOptions {
            include_all_states: true,
            ..Default::default()
        };
        let mut h = harness(FakeInventory::default(), FakeImages::default(), None, options);

        h.manager.fetch_instances(Some("")).await.unwrap();

        let query = h.inventory.queries.lock().unwrap()[0].clone();
        assert_eq!(query.name_glob, None);
        assert_eq!(query.states, InstanceState::ALL_QUERY.to_vec());
        assert!(h.manager.instances().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_instances_drops_duplicate_ids() {
        let inventory = FakeInventory {
            instances: vec![
                description("i-1", "web-1", "ami-1", 5),
                description("i-1", "web-1", "ami-1", 5),
                description("i-2", "web-2", "ami-1", 6),
            ],
            ..Default::default()
        };
        let mut h = harness(inventory, FakeImages::default(), None, FleetOptions::default());

        h.manager.fetch_instances(None).await.unwrap();
        assert_eq!(ids(&h.manager), vec!["i-1", "i-2"]);
    }

    #[tokio::test]
    async fn test_fetch_instances_failure_leaves_set_empty() {
        let inventory = FakeInventory {
            instances: vec![description("i-1", "web-1", "ami-1", 5)],
            ..Default::default()
        };
        let mut h = harness(inventory, FakeImages::default(), None, FleetOptions::default());
        h.manager.fetch_instances(None).await.unwrap();
        assert_eq!(h.manager.instances().len(), 1);

        let failing = FakeInventory {
            fail: true,
            ..Default::default()
        };
        let mut h = harness(failing, FakeImages::default(), None, FleetOptions::default());
        let err = h.manager.fetch_instances(None).await.unwrap_err();
        assert!(err.to_string().contains("failed to describe instances"));
        assert!(h.manager.instances().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_image_ages_memoizes_shared_images() {
        let inventory = FakeInventory {
            instances: vec![
                description("i-1", "a", "ami-1", 1),
                description("i-2", "b", "ami-1", 2),
                description("i-3", "c", "ami-2", 3),
            ],
            ..Default::default()
        };
        let registry = images(&[
            ("ami-1", "2024-01-01T00:00:00.000Z"),
            ("ami-2", "2024-05-22T00:00:00Z"),
        ]);
        let mut h = harness(inventory, registry, None, FleetOptions::default());

        h.manager.fetch_instances(None).await.unwrap();
        h.manager.fetch_image_ages().await.unwrap();

        let ages: Vec<Option<u64>> = h
            .manager
            .instances()
            .iter()
            .map(|r| r.image_age_days)
            .collect();
        assert_eq!(ages, vec![Some(152), Some(152), Some(10)]);
        assert_eq!(*h.images.calls.lock().unwrap(), vec!["ami-1", "ami-2"]);
    }

    #[tokio::test]
    async fn test_fetch_image_ages_partial_commit() {
        let inventory = FakeInventory {
            instances: vec![
                description("i-1", "a", "ami-1", 1),
                description("i-2", "b", "ami-missing", 2),
                description("i-3", "c", "ami-1", 3),
            ],
            ..Default::default()
        };
        let registry = images(&[("ami-1", "2024-05-01T00:00:00Z")]);
        let mut h = harness(inventory, registry, None, FleetOptions::default());

        h.manager.fetch_instances(None).await.unwrap();
        let err = h.manager.fetch_image_ages().await.unwrap_err();

        assert!(err.to_string().contains("unable to scan image ages"));
        assert!(format!("{err:#}").contains("ami-missing"));
        let ages: Vec<Option<u64>> = h
            .manager
            .instances()
            .iter()
            .map(|r| r.image_age_days)
            .collect();
        assert_eq!(ages, vec![Some(31), None, None]);
    }

    #[tokio::test]
    async fn test_fetch_image_ages_invalid_timestamp() {
        let inventory = FakeInventory {
            instances: vec![description("i-1", "a", "ami-1", 1)],
            ..Default::default()
        };
        let mut h = harness(
            inventory,
            images(&[("ami-1", "yesterday")]),
            None,
            FleetOptions::default(),
        );

        h.manager.fetch_instances(None).await.unwrap();
        let err = h.manager.fetch_image_ages().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FleetError>(),
            Some(FleetError::InvalidTimestamp { .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_agent_status_marks_managed() {
        let inventory = FakeInventory {
            instances: vec![
                description("i-1", "a", "ami-1", 1),
                description("i-2", "b", "ami-1", 2),
            ],
            ..Default::default()
        };
        let agents = Some(vec!["i-2".to_string(), "i-9".to_string()]);
        let mut h = harness(inventory, FakeImages::default(), agents, FleetOptions::default());

        h.manager.fetch_instances(None).await.unwrap();
        h.manager.fetch_agent_status().await.unwrap();

        let managed: Vec<bool> = h.manager.instances().iter().map(|r| r.agent_managed).collect();
        assert_eq!(managed, vec![false, true]);
    }

    #[tokio::test]
    async fn test_fetch_agent_status_failure_changes_nothing() {
        let inventory = FakeInventory {
            instances: vec![description("i-1", "a", "ami-1", 1)],
            ..Default::default()
        };
        let mut h = harness(inventory, FakeImages::default(), None, FleetOptions::default());

        h.manager.fetch_instances(None).await.unwrap();
        let err = h.manager.fetch_agent_status().await.unwrap_err();
        assert!(err.to_string().contains("cannot describe SSM instance information"));
        assert!(!h.manager.instances()[0].agent_managed);
    }

    #[tokio::test]
    async fn test_empty_working_set_stages_are_noops() {
        let mut h = harness(
            FakeInventory::default(),
            FakeImages::default(),
            None,
            FleetOptions::default(),
        );

        h.manager.fetch_image_ages().await.unwrap();
        h.manager.fetch_agent_status().await.unwrap();
        let summary = h.manager.jump_scan("bastion", "ops").await;
        assert_eq!(summary, ScanSummary::default());
        assert!(h.images.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_jump_scan_populates_diagnostics() {
        let inventory = FakeInventory {
            instances: vec![description("i-1", "a", "ami-1", 1)],
            ..Default::default()
        };
        let mut h = harness(inventory, FakeImages::default(), None, FleetOptions::default());

        h.manager.fetch_instances(None).await.unwrap();
        let summary = h.manager.jump_scan("bastion", "ops").await;

        assert_eq!(summary.unreachable, 0);
        let record = &h.manager.instances()[0];
        assert_eq!(record.reboot_required, RebootStatus::Required);
        h.manager.filter(filter::needs_reboot);
        assert_eq!(ids(&h.manager), vec!["i-1"]);
    }

    #[tokio::test]
    async fn test_sort_by_instance_age_is_stable() {
        let inventory = FakeInventory {
            instances: vec![
                description("i-1", "a", "ami-1", 30),
                description("i-2", "b", "ami-1", 10),
                description("i-3", "c", "ami-1", 30),
                description("i-4", "d", "ami-1", 5),
            ],
            ..Default::default()
        };
        let mut h = harness(inventory, FakeImages::default(), None, FleetOptions::default());

        h.manager.fetch_instances(None).await.unwrap();
        h.manager.sort_by_instance_age();
        assert_eq!(ids(&h.manager), vec!["i-4", "i-2", "i-1", "i-3"]);

        let records = h.manager.into_instances();
        assert_eq!(records[0].instance_age_days, 5);
    }

    #[tokio::test]
    async fn test_reboot_requests_single_instance() {
        let h = harness(
            FakeInventory::default(),
            FakeImages::default(),
            None,
            FleetOptions::default(),
        );
        h.manager.reboot("i-0abc").await.unwrap();
        assert_eq!(*h.inventory.reboots.lock().unwrap(), vec!["i-0abc"]);
    }

    #[tokio::test]
    async fn test_reboot_error_names_instance() {
        let failing = FakeInventory {
            fail: true,
            ..Default::default()
        };
        let h = harness(failing, FakeImages::default(), None, FleetOptions::default());
        let err = h.manager.reboot("i-0abc").await.unwrap_err();
        assert!(err.to_string().contains("i-0abc"));
    }
}
