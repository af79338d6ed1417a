//! kubectl-style tables for instance, database and status listings.

use colored::Colorize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::database::{DatabaseInfo, SnapshotInfo};
use crate::instance::{InstanceRecord, InstanceState, RebootStatus};
use crate::release::{ConfigInfo, ReleaseInfo, SchemaInfo};

#[derive(Tabled)]
struct InventoryRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "AMI ID")]
    image_id: String,
    #[tabled(rename = "INSTANCE AGE")]
    instance_age: u64,
    #[tabled(rename = "AMI AGE")]
    image_age: String,
    #[tabled(rename = "SSM")]
    ssm: bool,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "PUBLIC IP")]
    public_ip: String,
    #[tabled(rename = "PRIVATE IP")]
    private_ip: String,
}

#[derive(Tabled)]
struct AgingRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "AMI ID")]
    image_id: String,
    #[tabled(rename = "INSTANCE AGE")]
    instance_age: u64,
    #[tabled(rename = "AMI AGE")]
    image_age: String,
    #[tabled(rename = "STATE")]
    state: String,
}

#[derive(Tabled)]
struct ScanRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "INSTANCE AGE")]
    instance_age: u64,
    #[tabled(rename = "UPTIME")]
    uptime: String,
    #[tabled(rename = "REBOOT")]
    reboot: String,
    #[tabled(rename = "UPDATES")]
    updates: u32,
    #[tabled(rename = "OS")]
    os: String,
    #[tabled(rename = "PRIVATE IP")]
    private_ip: String,
    #[tabled(rename = "STATE")]
    state: String,
}

#[derive(Tabled)]
struct SsmRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "SSM")]
    ssm: bool,
    #[tabled(rename = "STATE")]
    state: String,
}

#[derive(Tabled)]
struct DatabaseRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "MULTI AZ")]
    multi_az: bool,
    #[tabled(rename = "LATEST SNAPSHOT ID")]
    latest_snapshot: String,
    #[tabled(rename = "SNAPSHOTS")]
    snapshots: usize,
}

#[derive(Tabled)]
struct SnapshotRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "CREATED AT")]
    created: String,
    #[tabled(rename = "SIZE (GiB)")]
    size: i32,
}

#[derive(Tabled)]
struct ReleaseRow {
    #[tabled(rename = "ENV")]
    environment: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "HASHREF")]
    hashref: String,
    #[tabled(rename = "TIMESTAMP")]
    timestamp: String,
}

#[derive(Tabled)]
struct ConfigRow {
    #[tabled(rename = "ENV")]
    environment: String,
    #[tabled(rename = "HASHREF")]
    hashref: String,
    #[tabled(rename = "TIMESTAMP")]
    timestamp: String,
}

#[derive(Tabled)]
struct SchemaRow {
    #[tabled(rename = "ENV")]
    environment: String,
    #[tabled(rename = "CORE CHANGE")]
    core_change: String,
    #[tabled(rename = "CORE PLANNED AT")]
    core_planned_at: String,
    #[tabled(rename = "KIEHLS CHANGE")]
    kiehls_change: String,
    #[tabled(rename = "KIEHLS PLANNED AT")]
    kiehls_planned_at: String,
}

fn state_cell(state: &InstanceState) -> String {
    match state {
        InstanceState::Running => state.to_string().green().to_string(),
        InstanceState::NoConnection => state.to_string().red().to_string(),
        _ => state.to_string(),
    }
}

fn reboot_cell(status: &RebootStatus) -> String {
    match status {
        RebootStatus::Required => status.to_string().yellow().to_string(),
        _ => status.to_string(),
    }
}

fn render<T: Tabled>(rows: &[T]) -> String {
    let mut table = Table::new(rows);
    apply_table_style(&mut table);
    table.to_string()
}

pub fn render_inventory(records: &[InstanceRecord]) -> String {
    let rows: Vec<InventoryRow> = records
        .iter()
        .map(|r| InventoryRow {
            id: r.id.clone(),
            name: r.name.clone(),
            image_id: r.image_id.clone(),
            instance_age: r.instance_age_days,
            image_age: r.image_age_display(),
            ssm: r.agent_managed,
            state: state_cell(&r.state),
            public_ip: r.public_ip.clone(),
            private_ip: r.private_ip.clone(),
        })
        .collect();
    render(&rows)
}

pub fn render_aging(records: &[InstanceRecord]) -> String {
    let rows: Vec<AgingRow> = records
        .iter()
        .map(|r| AgingRow {
            name: r.name.clone(),
            id: r.id.clone(),
            image_id: r.image_id.clone(),
            instance_age: r.instance_age_days,
            image_age: r.image_age_display(),
            state: state_cell(&r.state),
        })
        .collect();
    render(&rows)
}

pub fn render_scan(records: &[InstanceRecord]) -> String {
    let rows: Vec<ScanRow> = records
        .iter()
        .map(|r| ScanRow {
            name: r.name.clone(),
            id: r.id.clone(),
            instance_age: r.instance_age_days,
            uptime: r.uptime.clone(),
            reboot: reboot_cell(&r.reboot_required),
            updates: r.security_updates,
            os: r.os_version.clone(),
            private_ip: r.private_ip.clone(),
            state: state_cell(&r.state),
        })
        .collect();
    render(&rows)
}

pub fn render_ssm(records: &[InstanceRecord]) -> String {
    let rows: Vec<SsmRow> = records
        .iter()
        .map(|r| SsmRow {
            name: r.name.clone(),
            id: r.id.clone(),
            ssm: r.agent_managed,
            state: state_cell(&r.state),
        })
        .collect();
    render(&rows)
}

pub fn render_databases(databases: &[DatabaseInfo]) -> String {
    let rows: Vec<DatabaseRow> = databases
        .iter()
        .map(|db| DatabaseRow {
            id: db.id.clone(),
            multi_az: db.multi_az,
            latest_snapshot: db.latest_snapshot_id().to_string(),
            snapshots: db.snapshots.len(),
        })
        .collect();
    render(&rows)
}

pub fn render_snapshots(snapshots: &[SnapshotInfo]) -> String {
    let rows: Vec<SnapshotRow> = snapshots
        .iter()
        .map(|s| SnapshotRow {
            id: s.id.clone(),
            created: s.created.format("%Y-%m-%d %H:%M:%S").to_string(),
            size: s.size_gb,
        })
        .collect();
    render(&rows)
}

pub fn render_releases(releases: &[ReleaseInfo]) -> String {
    let rows: Vec<ReleaseRow> = releases
        .iter()
        .map(|r| ReleaseRow {
            environment: r.environment.clone(),
            name: r.name.clone(),
            hashref: r.hashref.clone(),
            timestamp: r.timestamp.clone(),
        })
        .collect();
    render(&rows)
}

pub fn render_configs(configs: &[ConfigInfo]) -> String {
    let rows: Vec<ConfigRow> = configs
        .iter()
        .map(|c| ConfigRow {
            environment: c.environment.clone(),
            hashref: c.hashref.clone(),
            timestamp: c.timestamp.clone(),
        })
        .collect();
    render(&rows)
}

/// Changes are shown by change id.
pub fn render_schemas(schemas: &[SchemaInfo]) -> String {
    let rows: Vec<SchemaRow> = schemas
        .iter()
        .map(|s| SchemaRow {
            environment: s.environment.clone(),
            core_change: s.core.change_id.clone(),
            core_planned_at: s.core.planned_at.clone(),
            kiehls_change: s.kiehls.change_id.clone(),
            kiehls_planned_at: s.kiehls.planned_at.clone(),
        })
        .collect();
    render(&rows)
}

/// Borderless kubectl-like style: no separators, two spaces between columns.
fn apply_table_style(table: &mut Table) {
    use tabled::settings::object::Columns;
    use tabled::settings::themes::Theme;
    use tabled::settings::{Modify, Padding};

    let mut theme = Theme::from_style(Style::empty());
    theme.remove_horizontal_lines();
    table.with(theme);
    table.with(Modify::new(Columns::new(..)).with(Padding::new(0, 2, 0, 0)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record() -> InstanceRecord {
        let mut r = InstanceRecord::new("i-0abc", InstanceState::Running);
        r.name = "web-1".to_string();
        r.image_id = "ami-123".to_string();
        r.instance_age_days = 120;
        r.private_ip = "10.0.1.5".to_string();
        r
    }

    #[test]
    fn test_render_inventory_headers_and_unknown_image_age() {
        let out = render_inventory(&[record()]);
        let header = out.lines().next().unwrap();
        assert!(header.starts_with("ID"));
        assert!(header.contains("AMI AGE"));
        assert!(header.contains("PRIVATE IP"));
        assert!(out.contains("N/A"));
        assert!(out.contains("web-1"));
    }

    #[test]
    fn test_render_scan_shows_no_connection() {
        let mut unreachable = record();
        unreachable.state = InstanceState::NoConnection;
        let mut scanned = record();
        scanned.id = "i-0def".to_string();
        scanned.os_version = "22.04.3".to_string();
        scanned.reboot_required = RebootStatus::Required;
        scanned.security_updates = 7;

        let out = render_scan(&[unreachable, scanned]);
        assert_eq!(out.lines().count(), 3);
        assert!(out.contains("No Connection"));
        assert!(out.contains("reboot required"));
        assert!(out.contains("22.04.3"));
    }

    #[test]
    fn test_render_databases_latest_snapshot() {
        let db = DatabaseInfo {
            id: "orders-db".to_string(),
            name: "orders".to_string(),
            multi_az: true,
            snapshots_enabled: true,
            snapshots: vec![SnapshotInfo {
                id: "rds:orders-db-1".to_string(),
                created: Utc.with_ymd_and_hms(2024, 5, 1, 3, 0, 0).unwrap(),
                size_gb: 20,
            }],
        };
        let out = render_databases(&[db]);
        assert!(out.contains("LATEST SNAPSHOT ID"));
        assert!(out.contains("rds:orders-db-1"));
    }

    #[test]
    fn test_render_snapshots_formats_created_at() {
        let snapshot = SnapshotInfo {
            id: "rds:orders-db-1".to_string(),
            created: Utc.with_ymd_and_hms(2024, 5, 1, 3, 4, 5).unwrap(),
            size_gb: 20,
        };
        let out = render_snapshots(&[snapshot]);
        assert!(out.contains("2024-05-01 03:04:05"));
    }

    #[test]
    fn test_render_has_no_borders() {
        let out = render_ssm(&[record()]);
        assert!(!out.contains('|'));
        assert!(!out.contains('+'));
    }

    #[test]
    fn test_render_schemas_shows_change_ids() {
        use crate::release::SchemaChange;

        let schema = SchemaInfo {
            environment: "prod".to_string(),
            core: SchemaChange {
                change: "add_orders_index".to_string(),
                change_id: "c0ffee".to_string(),
                planned_at: "2024-05-01".to_string(),
                script_hash: "aa11".to_string(),
            },
            kiehls: SchemaChange::default(),
        };
        let out = render_schemas(&[schema]);

        let header = out.lines().next().unwrap();
        assert!(header.starts_with("ENV"));
        assert!(header.contains("CORE PLANNED AT"));
        assert!(header.contains("KIEHLS CHANGE"));
        assert!(out.contains("c0ffee"));
        assert!(!out.contains("add_orders_index"));
    }

    #[test]
    fn test_render_configs() {
        let out = render_configs(&[ConfigInfo {
            environment: "dit".to_string(),
            hashref: "9f8e7d6".to_string(),
            timestamp: "2024-05-29T08:15:00Z".to_string(),
        }]);
        assert!(out.lines().next().unwrap().contains("HASHREF"));
        assert!(out.contains("9f8e7d6"));
    }
}
