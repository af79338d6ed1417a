//! Bastion-relayed remote shell capability.
//!
//! A [`RouteFactory`] turns a [`JumpRoute`] (local → bastion → target) into a
//! connected [`RemoteSession`]. The scanner only ever talks to these traits.

pub mod openssh;

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{FleetError, Result};

/// SSH port used for both hops.
pub const SSH_PORT: u16 = 22;

/// Connection timeout applied to the bastion hop.
pub const BASTION_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default login user on scanned targets.
pub const DEFAULT_TARGET_USER: &str = "ubuntu";

/// Host key handling for the bastion → target hop.
///
/// `Ignore` is the default: targets are reached by private address and
/// rotate often, so their keys are not verified. This is a known security
/// caveat; `Strict` restores normal known_hosts checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostKeyPolicy {
    #[default]
    Ignore,
    Strict,
}

/// Two-hop route description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JumpRoute {
    pub bastion_host: String,
    pub bastion_user: String,
    pub target_host: String,
    pub target_user: String,
    pub host_key_policy: HostKeyPolicy,
}

#[async_trait]
pub trait RemoteSession: Send {
    /// Run a shell command and return its combined stdout and stderr.
    async fn execute(&mut self, command: &str) -> Result<String>;

    /// Tear down both hops. Safe to call more than once.
    async fn close(&mut self);
}

#[async_trait]
pub trait RouteFactory: Send + Sync {
    async fn open(&self, route: &JumpRoute) -> Result<Box<dyn RemoteSession>>;
}

/// Route factory for commands that never contact hosts.
pub struct NoRoutes;

#[async_trait]
impl RouteFactory for NoRoutes {
    async fn open(&self, route: &JumpRoute) -> Result<Box<dyn RemoteSession>> {
        Err(FleetError::Connection {
            host: route.target_host.clone(),
            reason: "remote access is not configured for this command".to_string(),
        })
    }
}

/// Source of the SSH agent used to authenticate the bastion hop.
pub trait AgentAuth: Send + Sync {
    fn agent_socket(&self) -> Result<PathBuf>;
}

/// Agent lookup through `SSH_AUTH_SOCK`.
#[derive(Debug, Clone)]
pub struct EnvAgentAuth {
    socket: Option<OsString>,
}

impl EnvAgentAuth {
    pub fn from_env() -> Self {
        Self::from_value(std::env::var_os("SSH_AUTH_SOCK"))
    }

    pub fn from_value(socket: Option<OsString>) -> Self {
        Self { socket }
    }
}

impl AgentAuth for EnvAgentAuth {
    fn agent_socket(&self) -> Result<PathBuf> {
        let socket = self
            .socket
            .as_ref()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| FleetError::AgentUnavailable("SSH_AUTH_SOCK is not set".to_string()))?;

        if !socket.exists() {
            return Err(FleetError::AgentUnavailable(format!(
                "failed to open SSH_AUTH_SOCK {}",
                socket.display()
            )));
        }

        Ok(socket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_agent_auth_unset() {
        let auth = EnvAgentAuth::from_value(None);
        let err = auth.agent_socket().unwrap_err();
        assert!(matches!(err, FleetError::AgentUnavailable(_)));
    }

    #[test]
    fn test_env_agent_auth_empty() {
        let auth = EnvAgentAuth::from_value(Some(OsString::new()));
        assert!(auth.agent_socket().is_err());
    }

    #[test]
    fn test_env_agent_auth_missing_path() {
        let auth = EnvAgentAuth::from_value(Some("/nonexistent/agent.sock".into()));
        let err = auth.agent_socket().unwrap_err();
        assert!(err.to_string().contains("/nonexistent/agent.sock"));
    }

    #[test]
    fn test_env_agent_auth_existing_path() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let auth = EnvAgentAuth::from_value(Some(file.path().as_os_str().to_owned()));
        assert_eq!(auth.agent_socket().unwrap(), file.path());
    }

    #[tokio::test]
    async fn test_no_routes_refuses_to_open() {
        let route = JumpRoute {
            bastion_host: "bastion".to_string(),
            bastion_user: "ops".to_string(),
            target_host: "10.0.0.1".to_string(),
            target_user: DEFAULT_TARGET_USER.to_string(),
            host_key_policy: HostKeyPolicy::Ignore,
        };
        let err = NoRoutes.open(&route).await.err().unwrap();
        assert!(matches!(err, FleetError::Connection { ref host, .. } if host == "10.0.0.1"));
    }

    #[test]
    fn test_host_key_policy_defaults_to_ignore() {
        assert_eq!(HostKeyPolicy::default(), HostKeyPolicy::Ignore);
    }
}
