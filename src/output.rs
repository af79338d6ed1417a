//! Output formatting module.

pub mod table;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::config::OutputFormat;
use crate::database::{DatabaseInfo, SnapshotInfo};
use crate::instance::InstanceRecord;
use crate::release::{ConfigInfo, ReleaseInfo, SchemaInfo};

/// Column set used when rendering instances as a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceView {
    Inventory,
    Aging,
    Scan,
    Ssm,
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{json}");
    Ok(())
}

pub fn print_instances(
    records: &[InstanceRecord],
    view: InstanceView,
    format: OutputFormat,
) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(records);
    }
    if records.is_empty() {
        println!("No instances found.");
        return Ok(());
    }

    let rendered = match view {
        InstanceView::Inventory => table::render_inventory(records),
        InstanceView::Aging => table::render_aging(records),
        InstanceView::Scan => table::render_scan(records),
        InstanceView::Ssm => table::render_ssm(records),
    };
    println!("{rendered}");
    Ok(())
}

pub fn print_databases(databases: &[DatabaseInfo], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(databases),
        OutputFormat::Table if databases.is_empty() => {
            println!("No databases found.");
            Ok(())
        }
        OutputFormat::Table => {
            println!("{}", table::render_databases(databases));
            Ok(())
        }
    }
}

pub fn print_snapshots(snapshots: &[SnapshotInfo], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(snapshots),
        OutputFormat::Table if snapshots.is_empty() => {
            println!("No snapshots found.");
            Ok(())
        }
        OutputFormat::Table => {
            println!("{}", table::render_snapshots(snapshots));
            Ok(())
        }
    }
}

pub fn print_releases(releases: &[ReleaseInfo], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(releases),
        OutputFormat::Table => {
            println!("{}", table::render_releases(releases));
            Ok(())
        }
    }
}

pub fn print_configs(configs: &[ConfigInfo], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(configs),
        OutputFormat::Table => {
            println!("{}", table::render_configs(configs));
            Ok(())
        }
    }
}

pub fn print_schemas(schemas: &[SchemaInfo], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(schemas),
        OutputFormat::Table => {
            println!("{}", table::render_schemas(schemas));
            Ok(())
        }
    }
}
