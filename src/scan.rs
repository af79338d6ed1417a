//! Remote diagnostic scan through a bastion host.
//!
//! Each instance is reached over its own jump route and asked a fixed set of
//! questions (OS release, uptime, pending reboot, pending security updates).
//! A host that cannot be reached or fails a command is marked
//! `No Connection`; it never stops the scan of the others.

use std::sync::atomic::{AtomicUsize, Ordering};

use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::instance::{InstanceRecord, InstanceState, RebootStatus};
use crate::ssh::{DEFAULT_TARGET_USER, HostKeyPolicy, JumpRoute, RemoteSession, RouteFactory};

pub const OS_VERSION_COMMAND: &str = r#"lsb_release -d | cut -f2 | awk '{print $2}'"#;
pub const UPTIME_COMMAND: &str = r#"uptime | awk '{print $3 " "  $4}' | tr -d ','"#;
pub const REBOOT_REQUIRED_COMMAND: &str =
    "if [ -f /var/run/reboot-required ]; then echo 'reboot required'; else echo 'no'; fi";
pub const SECURITY_UPDATES_COMMAND: &str =
    "sudo cat /var/lib/update-notifier/updates-available | grep 'security updates' | cut -d' ' -f1";

/// Bastion and target parameters shared by every route in one scan.
#[derive(Debug, Clone)]
pub struct JumpSettings {
    pub bastion_host: String,
    pub bastion_user: String,
    pub target_user: String,
    pub host_key_policy: HostKeyPolicy,
    /// Number of hosts scanned at once; 1 scans strictly in order.
    pub concurrency: usize,
}

impl JumpSettings {
    pub fn new(bastion_host: impl Into<String>, bastion_user: impl Into<String>) -> Self {
        Self {
            bastion_host: bastion_host.into(),
            bastion_user: bastion_user.into(),
            target_user: DEFAULT_TARGET_USER.to_string(),
            host_key_policy: HostKeyPolicy::default(),
            concurrency: 1,
        }
    }

    fn route_for(&self, record: &InstanceRecord) -> JumpRoute {
        JumpRoute {
            bastion_host: self.bastion_host.clone(),
            bastion_user: self.bastion_user.clone(),
            target_host: record.private_ip.clone(),
            target_user: self.target_user.clone(),
            host_key_policy: self.host_key_policy,
        }
    }
}

/// Counts from one scan pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanSummary {
    pub scanned: usize,
    pub unreachable: usize,
}

/// Remove every newline from command output.
pub fn strip_newlines(output: &str) -> String {
    output.replace(['\r', '\n'], "")
}

/// Count of pending security updates.
///
/// Anything that is not an integer, including empty output from hosts
/// without update-notifier, counts as 0.
pub fn parse_security_updates(output: &str) -> u32 {
    output.trim().parse().unwrap_or(0)
}

/// Run the diagnostic commands over an open session.
///
/// Fields are written as each command returns, so a failure part-way keeps
/// whatever was already collected.
pub async fn scan_instance(
    session: &mut dyn RemoteSession,
    record: &mut InstanceRecord,
) -> Result<()> {
    let os_version = session.execute(OS_VERSION_COMMAND).await?;
    record.os_version = strip_newlines(&os_version);

    let uptime = session.execute(UPTIME_COMMAND).await?;
    record.uptime = strip_newlines(&uptime);

    let reboot = session.execute(REBOOT_REQUIRED_COMMAND).await?;
    record.reboot_required = RebootStatus::from_output(&strip_newlines(&reboot));

    let updates = session.execute(SECURITY_UPDATES_COMMAND).await?;
    record.security_updates = parse_security_updates(&updates);

    Ok(())
}

/// Scan one record. Returns false when it ended up `No Connection`.
async fn scan_record(
    factory: &dyn RouteFactory,
    settings: &JumpSettings,
    record: &mut InstanceRecord,
) -> bool {
    let route = settings.route_for(record);

    let mut session = match factory.open(&route).await {
        Ok(session) => session,
        Err(e) => {
            warn!(
                instance_id = %record.id,
                instance_name = %record.name,
                private_ip = %record.private_ip,
                error = %e,
                "Target scan failed, could not open jump route"
            );
            record.state = InstanceState::NoConnection;
            return false;
        }
    };

    let result = scan_instance(session.as_mut(), record).await;
    session.close().await;

    match result {
        Ok(()) => {
            debug!(
                instance_id = %record.id,
                os_version = %record.os_version,
                reboot_required = %record.reboot_required,
                security_updates = record.security_updates,
                "Target scan complete"
            );
            true
        }
        Err(e) => {
            warn!(
                instance_id = %record.id,
                instance_name = %record.name,
                error = %e,
                "Target scan failed while running diagnostics"
            );
            record.state = InstanceState::NoConnection;
            false
        }
    }
}

/// Scan every record through the bastion. Never fails; unreachable hosts are
/// reflected in their own record and in the returned summary.
pub async fn jump_scan(
    records: &mut [InstanceRecord],
    factory: &dyn RouteFactory,
    settings: &JumpSettings,
) -> ScanSummary {
    let total = records.len();
    if total == 0 {
        debug!("Jump scan skipped, working set is empty");
        return ScanSummary::default();
    }

    let concurrency = settings.concurrency.max(1);
    info!(
        instances = total,
        bastion = %settings.bastion_host,
        concurrency,
        "Starting jump scan"
    );

    let unreachable = AtomicUsize::new(0);
    futures::stream::iter(records.iter_mut())
        .for_each_concurrent(concurrency, |record| {
            let unreachable = &unreachable;
            async move {
                if !scan_record(factory, settings, record).await {
                    unreachable.fetch_add(1, Ordering::Relaxed);
                }
            }
        })
        .await;

    let summary = ScanSummary {
        scanned: total,
        unreachable: unreachable.into_inner(),
    };

    info!(
        scanned = summary.scanned,
        unreachable = summary.unreachable,
        "Jump scan finished"
    );

    summary
}
