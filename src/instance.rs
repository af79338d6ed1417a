//! Instance records and the fields the pipeline fills in.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle state of an instance.
///
/// `NoConnection` never comes from the provider; the remote scanner sets it
/// when a host could not be reached or a diagnostic command failed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Stopping,
    Stopped,
    Terminated,
    NoConnection,
    Unknown(String),
}

impl InstanceState {
    /// States fetched when no wider listing is requested.
    pub const DEFAULT_QUERY: &'static [InstanceState] =
        &[InstanceState::Pending, InstanceState::Running];

    /// States fetched in "include all" mode.
    pub const ALL_QUERY: &'static [InstanceState] = &[
        InstanceState::Pending,
        InstanceState::Running,
        InstanceState::ShuttingDown,
        InstanceState::Stopping,
        InstanceState::Terminated,
    ];

    /// Parse the provider's state name (e.g. `shutting-down`).
    pub fn from_provider(name: &str) -> Self {
        match name {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "shutting-down" => Self::ShuttingDown,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            "terminated" => Self::Terminated,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Name used in provider-side filters.
    pub fn provider_name(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::ShuttingDown => "shutting-down",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Terminated => "terminated",
            Self::NoConnection => "no-connection",
            Self::Unknown(name) => name,
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoConnection => write!(f, "No Connection"),
            other => write!(f, "{}", other.provider_name()),
        }
    }
}

impl Serialize for InstanceState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Outcome of the pending-reboot marker check.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RebootStatus {
    #[default]
    Unscanned,
    Required,
    NotRequired,
    Unknown(String),
}

impl RebootStatus {
    pub const REQUIRED_MARKER: &'static str = "reboot required";
    pub const NOT_REQUIRED_MARKER: &'static str = "no";

    /// Interpret the marker command's output.
    pub fn from_output(output: &str) -> Self {
        match output.trim() {
            Self::REQUIRED_MARKER => Self::Required,
            Self::NOT_REQUIRED_MARKER => Self::NotRequired,
            "" => Self::Unscanned,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for RebootStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unscanned => Ok(()),
            Self::Required => f.write_str(Self::REQUIRED_MARKER),
            Self::NotRequired => f.write_str(Self::NOT_REQUIRED_MARKER),
            Self::Unknown(raw) => f.write_str(raw),
        }
    }
}

impl Serialize for RebootStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One fleet instance and everything the scan has learned about it.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceRecord {
    pub id: String,
    pub name: String,
    pub image_id: String,
    pub instance_age_days: u64,
    /// `None` until image ages are fetched.
    pub image_age_days: Option<u64>,
    pub agent_managed: bool,
    pub state: InstanceState,
    pub public_ip: String,
    pub private_ip: String,
    pub os_version: String,
    pub reboot_required: RebootStatus,
    pub security_updates: u32,
    pub uptime: String,
}

impl InstanceRecord {
    /// Create a record with every enrichment field at its zero value.
    pub fn new(id: impl Into<String>, state: InstanceState) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            image_id: String::new(),
            instance_age_days: 0,
            image_age_days: None,
            agent_managed: false,
            state,
            public_ip: String::new(),
            private_ip: String::new(),
            os_version: String::new(),
            reboot_required: RebootStatus::Unscanned,
            security_updates: 0,
            uptime: String::new(),
        }
    }

    /// Image age for display, `N/A` when not yet fetched.
    pub fn image_age_display(&self) -> String {
        self.image_age_days
            .map(|days| days.to_string())
            .unwrap_or_else(|| "N/A".to_string())
    }
}

/// Whole days elapsed between `then` and `now`.
///
/// Counts whole hours and divides by 24, so 90 days and 3 hours is 90.
/// Timestamps in the future yield 0.
pub fn age_in_days(then: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let hours = (now - then).num_hours();
    if hours <= 0 { 0 } else { (hours / 24) as u64 }
}
