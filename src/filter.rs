//! In-place predicate filtering of the working set.
//!
//! Predicates are plain closures over `&InstanceRecord`. Successive calls to
//! [`filter`] compose as a logical AND; anything fancier is written as a
//! single closure by the caller.

use crate::instance::{InstanceRecord, InstanceState, RebootStatus};

/// Age threshold used by the aging report.
pub const DEFAULT_AGE_THRESHOLD_DAYS: u64 = 90;

/// Keep only the records matching `predicate`, preserving their order.
pub fn filter<P>(records: &mut Vec<InstanceRecord>, predicate: P)
where
    P: Fn(&InstanceRecord) -> bool,
{
    records.retain(|record| predicate(record));
}

pub fn is_running(record: &InstanceRecord) -> bool {
    record.state == InstanceState::Running
}

pub fn has_no_public_ip(record: &InstanceRecord) -> bool {
    record.public_ip.is_empty()
}

pub fn needs_reboot(record: &InstanceRecord) -> bool {
    record.reboot_required == RebootStatus::Required
}

/// Instance or image older than `days`. An unfetched image age counts as 0.
pub fn older_than(days: u64) -> impl Fn(&InstanceRecord) -> bool {
    move |record| {
        record.instance_age_days > days || record.image_age_days.unwrap_or(0) > days
    }
}

pub fn reboot_status_is(status: RebootStatus) -> impl Fn(&InstanceRecord) -> bool {
    move |record| record.reboot_required == status
}

pub fn agent_managed_is(managed: bool) -> impl Fn(&InstanceRecord) -> bool {
    move |record| record.agent_managed == managed
}
