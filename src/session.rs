//! Interactive SSM sessions through the AWS CLI.

use std::process::Command;

use tracing::debug;

use crate::error::{FleetError, Result};

pub struct SessionManager {
    profile: Option<String>,
    region: Option<String>,
}

impl SessionManager {
    pub fn new(profile: Option<String>, region: Option<String>) -> Self {
        Self { profile, region }
    }

    fn command(&self, instance_id: &str) -> Command {
        let mut cmd = Command::new("aws");
        cmd.args(["ssm", "start-session", "--target", instance_id]);

        if let Some(ref region) = self.region {
            cmd.args(["--region", region]);
        }
        if let Some(ref profile) = self.profile {
            cmd.args(["--profile", profile]);
        }
        cmd
    }

    /// Open a session on `instance_id`, inheriting the terminal until it ends.
    pub fn connect(&self, instance_id: &str) -> Result<()> {
        let mut cmd = self.command(instance_id);
        debug!("Executing: {:?}", cmd);

        let status = cmd
            .status()
            .map_err(|e| FleetError::Session(format!("Failed to execute aws ssm: {e}")))?;

        if !status.success() {
            return Err(FleetError::Session(format!(
                "Session Manager connection failed with status: {status}"
            )));
        }
        Ok(())
    }
}
