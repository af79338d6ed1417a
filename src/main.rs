//! fleetscan - EC2 fleet inventory, AMI aging and patch status scanner.

use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Parser;
use colored::Colorize;
use dialoguer::{Confirm, theme::ColorfulTheme};
use tracing::{debug, info};

use fleetscan::aws::ec2::Ec2Client;
use fleetscan::aws::rds::RdsClient;
use fleetscan::aws::ssm::SsmClient;
use fleetscan::config::{
    Args, Command, Config, InstanceCommand, RdsCommand, ScanArgs, Selection, SsmCommand,
    SsmListArgs, StatusCommand,
};
use fleetscan::database::DatabaseManager;
use fleetscan::error::FleetError;
use fleetscan::filter;
use fleetscan::fleet::{FleetClients, FleetManager, FleetOptions};
use fleetscan::logging;
use fleetscan::output::{self, InstanceView};
use fleetscan::release::ReleaseChecker;
use fleetscan::session::SessionManager;
use fleetscan::ssh::openssh::OpenSshRouteFactory;
use fleetscan::ssh::{EnvAgentAuth, HostKeyPolicy, NoRoutes, RouteFactory};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match Config::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    };

    logging::init(&config.log_format, &config.log_level);
    debug!(
        environment = %config.environment,
        config_source = %config.file.source_description(),
        "Starting fleetscan"
    );

    if let Err(e) = run(&config).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(config: &Config) -> Result<()> {
    match &config.command {
        Command::Instance(command) => run_instance(config, command).await,
        Command::Ssm(SsmCommand::List(args)) => run_ssm_list(config, args).await,
        Command::Ssm(SsmCommand::Session { instance_id }) => {
            SessionManager::new(config.profile.clone(), config.region.clone())
                .connect(instance_id)?;
            Ok(())
        }
        Command::Rds(command) => run_rds(config, command).await,
        Command::Status(report) => run_status(config, *report).await,
    }
}

async fn run_instance(config: &Config, command: &InstanceCommand) -> Result<()> {
    match command {
        InstanceCommand::List { selection, ssm } => run_list(config, selection, *ssm).await,
        InstanceCommand::Aging { selection, days } => run_aging(config, selection, *days).await,
        InstanceCommand::Scan(args) => run_scan(config, args).await,
        InstanceCommand::Ssm(args) => run_ssm_list(config, args).await,
        InstanceCommand::Reboot { instance_id, yes } => {
            run_reboot(config, instance_id, *yes).await
        }
    }
}

/// Build a manager over the AWS clients for the active profile and region.
async fn fleet_manager(
    config: &Config,
    options: FleetOptions,
    routes: Arc<dyn RouteFactory>,
) -> FleetManager {
    let sdk_config =
        fleetscan::aws::load_sdk_config(config.profile.as_deref(), config.region.as_deref()).await;
    let ec2 = Arc::new(Ec2Client::new(&sdk_config));

    info!(
        environment = %config.environment,
        profile = %config.profile_display(),
        region = %ec2.region(),
        "AWS clients initialized"
    );

    let clients = FleetClients {
        inventory: ec2.clone(),
        images: ec2,
        agents: Arc::new(SsmClient::new(&sdk_config)),
        routes,
    };
    FleetManager::new(clients, options)
}

fn selection_options(selection: &Selection) -> FleetOptions {
    FleetOptions {
        include_all_states: selection.all,
        ..Default::default()
    }
}

async fn run_list(config: &Config, selection: &Selection, ssm_only: bool) -> Result<()> {
    let mut manager =
        fleet_manager(config, selection_options(selection), Arc::new(NoRoutes)).await;

    manager.fetch_instances(selection.filter.as_deref()).await?;
    manager.fetch_image_ages().await?;
    manager.fetch_agent_status().await?;
    if ssm_only {
        manager.filter(filter::agent_managed_is(true));
    }
    manager.sort_by_instance_age();

    output::print_instances(manager.instances(), InstanceView::Inventory, config.output)
}

async fn run_aging(config: &Config, selection: &Selection, days: u64) -> Result<()> {
    let mut manager =
        fleet_manager(config, selection_options(selection), Arc::new(NoRoutes)).await;

    manager.fetch_instances(selection.filter.as_deref()).await?;
    if !selection.all {
        manager.filter(filter::is_running);
    }
    manager.fetch_image_ages().await?;
    manager.filter(filter::older_than(days));
    manager.sort_by_instance_age();

    output::print_instances(manager.instances(), InstanceView::Aging, config.output)
}

async fn run_scan(config: &Config, args: &ScanArgs) -> Result<()> {
    let (bastion_host, bastion_user) =
        config.bastion(args.jump_host.as_deref(), args.jump_user.as_deref())?;

    // A missing agent is fatal before any host is contacted.
    let routes = OpenSshRouteFactory::new(&EnvAgentAuth::from_env())?;

    let mut options = selection_options(&args.selection);
    if let Some(user) = config.target_user(args.target_user.as_deref()) {
        options.target_user = user;
    }
    if args.strict_host_keys {
        options.host_key_policy = HostKeyPolicy::Strict;
    }
    options.scan_concurrency = usize::from(args.concurrency);

    let mut manager = fleet_manager(config, options, Arc::new(routes)).await;

    manager.fetch_instances(args.selection.filter.as_deref()).await?;
    if !args.selection.all {
        manager.filter(filter::is_running);
    }
    manager.filter(filter::has_no_public_ip);

    let summary = manager.jump_scan(&bastion_host, &bastion_user).await;
    if summary.unreachable > 0 {
        eprintln!(
            "{} {} of {} instances could not be scanned",
            "Warning:".yellow().bold(),
            summary.unreachable,
            summary.scanned
        );
    }

    if args.reboot_only {
        manager.filter(filter::needs_reboot);
    }

    output::print_instances(manager.instances(), InstanceView::Scan, config.output)
}

async fn run_ssm_list(config: &Config, args: &SsmListArgs) -> Result<()> {
    let mut manager = fleet_manager(config, FleetOptions::default(), Arc::new(NoRoutes)).await;

    manager.fetch_instances(args.filter.as_deref()).await?;
    manager.filter(filter::is_running);
    manager.fetch_agent_status().await?;
    manager.filter(filter::agent_managed_is(!args.disabled));
    manager.sort_by_instance_age();

    output::print_instances(manager.instances(), InstanceView::Ssm, config.output)
}

async fn run_reboot(config: &Config, instance_id: &str, yes: bool) -> Result<()> {
    if !yes {
        let proceed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!(
                "Reboot instance '{}' in {}?",
                instance_id, config.environment
            ))
            .default(false)
            .interact()?;

        if !proceed {
            info!(instance_id = %instance_id, "Reboot cancelled");
            return Ok(());
        }
    }

    let manager = fleet_manager(config, FleetOptions::default(), Arc::new(NoRoutes)).await;
    manager.reboot(instance_id).await?;

    println!(
        "{} reboot for instance {}",
        "Requested".green().bold(),
        instance_id.bold()
    );
    Ok(())
}

async fn run_rds(config: &Config, command: &RdsCommand) -> Result<()> {
    let sdk_config =
        fleetscan::aws::load_sdk_config(config.profile.as_deref(), config.region.as_deref()).await;
    let manager = DatabaseManager::new(Arc::new(RdsClient::new(&sdk_config)));

    match command {
        RdsCommand::List { filter } => {
            let databases = manager.fetch(filter.as_deref()).await?;
            output::print_databases(&databases, config.output)
        }
        RdsCommand::Snapshots { identifier } => {
            let snapshots = manager.fetch_snapshots(identifier).await?;
            output::print_snapshots(&snapshots, config.output)
        }
    }
}

async fn run_status(config: &Config, report: StatusCommand) -> Result<()> {
    let endpoints = config.status_endpoints(report);
    if endpoints.is_empty() {
        bail!(FleetError::Config(format!(
            "no {} configured for any environment ({})",
            report.url_key(),
            config.file.source_description()
        )));
    }

    let checker = ReleaseChecker::new()?;
    match report {
        StatusCommand::Release => {
            let releases = checker.fetch_all(&endpoints).await?;
            output::print_releases(&releases, config.output)
        }
        StatusCommand::Config => {
            let configs = checker.fetch_all_config(&endpoints).await?;
            output::print_configs(&configs, config.output)
        }
        StatusCommand::Schema => {
            let schemas = checker.fetch_all_schema(&endpoints).await?;
            output::print_schemas(&schemas, config.output)
        }
    }
}
