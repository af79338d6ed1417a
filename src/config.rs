//! CLI arguments and the optional per-environment config file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde::Deserialize;

use crate::error::FleetError;
use crate::filter::DEFAULT_AGE_THRESHOLD_DAYS;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = env!("BUILD_COMMIT");
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Environments accepted without a config file.
pub const BUILTIN_ENVIRONMENTS: &[&str] = &["dit", "stage", "prod"];

/// EC2 fleet inventory, AMI aging and patch status scanner.
#[derive(Parser, Debug, Clone)]
#[command(name = "fleetscan")]
#[command(about = "EC2 fleet inventory, AMI aging and bastion-relayed patch status scanner")]
#[command(version = const_format::formatcp!(
    "{} (commit: {}, build date: {})",
    VERSION, COMMIT, BUILD_DATE
))]
pub struct Args {
    /// Target environment (dit, stage, prod or one defined in the config file)
    #[arg(short, long, global = true, default_value = "dit", env = "FLEETSCAN_ENV")]
    pub environment: String,

    /// AWS profile to use (overrides the environment's profile)
    #[arg(long, global = true)]
    pub profile: Option<String>,

    /// AWS region (overrides the environment's region)
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// Path to the config file [default: ~/.config/fleetscan/config.yaml]
    #[arg(long, global = true, env = "FLEETSCAN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn", env = "FLEETSCAN_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (pretty or json)
    #[arg(long, global = true, default_value = "pretty", env = "FLEETSCAN_LOG_FORMAT")]
    pub log_format: String,

    /// Verbose output (debug logging)
    #[arg(short, long, global = true, default_value = "false")]
    pub verbose: bool,

    /// Debug output (trace logging for fleetscan)
    #[arg(short, long, global = true, default_value = "false")]
    pub debug: bool,

    /// Output format for listings
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Inspect and manage EC2 instances
    #[command(subcommand)]
    Instance(InstanceCommand),

    /// Interact with instances over SSM
    #[command(subcommand)]
    Ssm(SsmCommand),

    /// Inspect RDS databases
    #[command(subcommand)]
    Rds(RdsCommand),

    /// Query service status endpoints
    #[command(subcommand, alias = "sysinfo")]
    Status(StatusCommand),
}

#[derive(Subcommand, Debug, Clone)]
pub enum InstanceCommand {
    /// List instances with image age and SSM registration
    List {
        #[command(flatten)]
        selection: Selection,

        /// Only instances registered with SSM
        #[arg(long)]
        ssm: bool,
    },

    /// List instances whose instance or image is older than a threshold
    Aging {
        #[command(flatten)]
        selection: Selection,

        /// Age threshold in days
        #[arg(long, default_value_t = DEFAULT_AGE_THRESHOLD_DAYS)]
        days: u64,
    },

    /// Scan private instances through a bastion for OS and reboot status
    #[command(after_help = r#"Examples:
  fleetscan instance scan -j bastion.example.com -u ops
  fleetscan instance scan -f web --reboot-only --concurrency 4"#)]
    Scan(ScanArgs),

    /// List running instances managed by SSM
    Ssm(SsmListArgs),

    /// Request a reboot of one instance
    Reboot {
        /// Instance id to reboot
        #[arg(short, long = "instance-id", value_name = "INSTANCE_ID")]
        instance_id: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum SsmCommand {
    /// List running instances managed by SSM
    List(SsmListArgs),

    /// Start an SSM session on an instance (requires the AWS CLI)
    Session {
        /// Instance to connect to
        #[arg(short, long = "instance", value_name = "INSTANCE_ID")]
        instance_id: String,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum RdsCommand {
    /// List databases with their latest snapshot
    List {
        /// Filter databases by identifier substring
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// List snapshots of one database
    #[command(alias = "snapshot")]
    Snapshots {
        /// Database identifier
        #[arg(short, long)]
        identifier: String,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCommand {
    /// Show the release deployed to each configured environment
    #[command(alias = "platform")]
    Release,
    /// Show the config package deployed to each configured environment
    Config,
    /// Show the latest schema migration of each configured environment
    Schema,
}

impl StatusCommand {
    /// Configuration key holding this report's endpoint.
    pub const fn url_key(self) -> &'static str {
        match self {
            Self::Release => "release_url",
            Self::Config => "config_url",
            Self::Schema => "schema_url",
        }
    }

    fn url(self, env: &EnvironmentConfig) -> Option<&String> {
        match self {
            Self::Release => env.release_url.as_ref(),
            Self::Config => env.config_url.as_ref(),
            Self::Schema => env.schema_url.as_ref(),
        }
    }
}

/// Name filter and state scope shared by instance listings.
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct Selection {
    /// Filter instances by name
    #[arg(short, long)]
    pub filter: Option<String>,

    /// Include all states, not only running instances
    #[arg(short, long)]
    pub all: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ScanArgs {
    #[command(flatten)]
    pub selection: Selection,

    /// Bastion host address [default: environment's bastion.host]
    #[arg(short, long = "jump", value_name = "HOST")]
    pub jump_host: Option<String>,

    /// Bastion login user [default: environment's bastion.user]
    #[arg(short = 'u', long = "jumpuser", value_name = "USER")]
    pub jump_user: Option<String>,

    /// Only show instances that need a reboot
    #[arg(long)]
    pub reboot_only: bool,

    /// Number of instances scanned at once
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    pub concurrency: u16,

    /// Login user on scanned instances [default: environment's target_user or ubuntu]
    #[arg(long)]
    pub target_user: Option<String>,

    /// Verify target host keys against known_hosts
    #[arg(long)]
    pub strict_host_keys: bool,
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct SsmListArgs {
    /// Filter instances by name
    #[arg(short, long)]
    pub filter: Option<String>,

    /// Show instances without SSM instead
    #[arg(long)]
    pub disabled: bool,
}

/// Bastion entry of an environment.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct BastionConfig {
    pub host: String,
    #[serde(default)]
    pub user: Option<String>,
}

/// Per-environment settings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub release_url: Option<String>,
    #[serde(default)]
    pub config_url: Option<String>,
    #[serde(default)]
    pub schema_url: Option<String>,
    #[serde(default)]
    pub bastion: Option<BastionConfig>,
    #[serde(default)]
    pub target_user: Option<String>,
}

/// Where the file configuration came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConfigSource {
    File(String),
    #[default]
    Empty,
}

/// Contents of `config.yaml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentConfig>,
    #[serde(skip)]
    pub source: ConfigSource,
}

impl FileConfig {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Self = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        let absolute_path = std::fs::canonicalize(path)
            .unwrap_or_else(|_| path.to_path_buf())
            .display()
            .to_string();

        config.source = ConfigSource::File(absolute_path);
        Ok(config)
    }

    /// Load the explicit path, else `~/.config/fleetscan/config.yaml` if it
    /// exists, else an empty configuration.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_path = config_dir.join("fleetscan").join("config.yaml");
            if user_path.exists() {
                return Self::load_from_file(&user_path);
            }
        }

        Ok(Self::default())
    }

    pub fn source_description(&self) -> String {
        match &self.source {
            ConfigSource::File(path) => format!("file: {}", path),
            ConfigSource::Empty => "empty (no config file found)".to_string(),
        }
    }

    /// Built-in environments followed by any extra ones from the file.
    pub fn valid_environments(&self) -> Vec<String> {
        let mut valid: Vec<String> = BUILTIN_ENVIRONMENTS.iter().map(|e| e.to_string()).collect();
        for name in self.environments.keys() {
            if !valid.contains(name) {
                valid.push(name.clone());
            }
        }
        valid
    }
}

/// Application configuration derived from CLI args and the config file.
#[derive(Debug, Clone)]
pub struct Config {
    pub environment: String,
    pub profile: Option<String>,
    pub region: Option<String>,
    pub log_level: String,
    pub log_format: String,
    pub output: OutputFormat,
    pub file: FileConfig,
    pub command: Command,
}

impl Config {
    /// Create config from CLI arguments, loading the config file.
    pub fn from_args(args: Args) -> Result<Self, FleetError> {
        let file = FileConfig::load(args.config.as_deref())
            .map_err(|e| FleetError::Config(format!("{e:#}")))?;
        Self::from_parts(args, file)
    }

    pub fn from_parts(args: Args, file: FileConfig) -> Result<Self, FleetError> {
        let valid = file.valid_environments();
        if !valid.contains(&args.environment) {
            return Err(FleetError::InvalidEnvironment {
                name: args.environment,
                valid: valid.join(", "),
            });
        }

        let env_config = file.environments.get(&args.environment).cloned().unwrap_or_default();

        Ok(Self {
            profile: args.profile.or(env_config.profile),
            region: args.region.or(env_config.region),
            log_level: effective_log_level(&args.log_level, args.verbose, args.debug),
            log_format: args.log_format,
            output: args.output,
            environment: args.environment,
            file,
            command: args.command,
        })
    }

    /// Settings of the active environment, if the file defines it.
    pub fn environment_config(&self) -> Option<&EnvironmentConfig> {
        self.file.environments.get(&self.environment)
    }

    /// Bastion host and user: flags first, then the environment's entry.
    pub fn bastion(
        &self,
        host: Option<&str>,
        user: Option<&str>,
    ) -> Result<(String, String), FleetError> {
        let configured = self.environment_config().and_then(|env| env.bastion.as_ref());

        let host = host
            .map(str::to_string)
            .or_else(|| configured.map(|b| b.host.clone()))
            .filter(|h| !h.is_empty())
            .ok_or_else(|| {
                FleetError::Config(format!(
                    "no bastion host given; pass --jump or set environments.{}.bastion.host",
                    self.environment
                ))
            })?;

        let user = user
            .map(str::to_string)
            .or_else(|| configured.and_then(|b| b.user.clone()))
            .unwrap_or_default();

        Ok((host, user))
    }

    pub fn target_user(&self, flag: Option<&str>) -> Option<String> {
        flag.map(str::to_string)
            .or_else(|| self.environment_config().and_then(|env| env.target_user.clone()))
    }

    /// `(environment, url)` for every environment with an endpoint for
    /// `report`, in environment name order.
    pub fn status_endpoints(&self, report: StatusCommand) -> Vec<(String, String)> {
        self.file
            .environments
            .iter()
            .filter_map(|(name, env)| report.url(env).map(|url| (name.clone(), url.clone())))
            .collect()
    }

    pub fn profile_display(&self) -> &str {
        self.profile.as_deref().unwrap_or("default")
    }
}

fn effective_log_level(level: &str, verbose: bool, debug: bool) -> String {
    if debug {
        "info,fleetscan=trace".to_string()
    } else if verbose {
        "debug".to_string()
    } else {
        level.to_string()
    }
}
