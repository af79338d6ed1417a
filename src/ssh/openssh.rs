//! Two-hop routes over the system OpenSSH client.
//!
//! Each route is an OpenSSH control master (`ssh -f -N -M -S <socket>`)
//! reaching the target through a `ProxyCommand` to the bastion. Commands are
//! multiplexed over the master's socket and `ssh -O exit` releases both hops.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{
    AgentAuth, BASTION_CONNECT_TIMEOUT, HostKeyPolicy, JumpRoute, RemoteSession, RouteFactory,
    SSH_PORT,
};
use crate::error::{FleetError, Result};

const DEFAULT_SSH_PROGRAM: &str = "ssh";

pub struct OpenSshRouteFactory {
    program: String,
    agent_socket: PathBuf,
    control_dir: PathBuf,
    next_id: AtomicU64,
}

impl OpenSshRouteFactory {
    /// Resolve the agent up front; a missing agent is fatal before any host
    /// is contacted.
    pub fn new(auth: &dyn AgentAuth) -> Result<Self> {
        let agent_socket = auth.agent_socket()?;
        debug!(agent_socket = %agent_socket.display(), "Using SSH agent");

        Ok(Self {
            program: DEFAULT_SSH_PROGRAM.to_string(),
            agent_socket,
            control_dir: std::env::temp_dir(),
            next_id: AtomicU64::new(0),
        })
    }

    /// Use a different ssh binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn control_paths(&self) -> (PathBuf, PathBuf) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stem = format!("fleetscan-{}-{}", std::process::id(), id);
        (
            self.control_dir.join(format!("{stem}.sock")),
            self.control_dir.join(format!("{stem}.log")),
        )
    }
}

fn login(user: &str, host: &str) -> String {
    if user.is_empty() {
        host.to_string()
    } else {
        format!("{user}@{host}")
    }
}

/// Options shared by every invocation for `route`.
///
/// A multiplexed call whose control socket is gone falls back to a fresh
/// connection; it must still go through the bastion within the timeout.
fn route_options(program: &str, route: &JumpRoute) -> Vec<String> {
    let timeout = BASTION_CONNECT_TIMEOUT.as_secs();
    let proxy = format!(
        "ProxyCommand={program} -o BatchMode=yes -o ConnectTimeout={timeout} -p {SSH_PORT} -W %h:%p {}",
        login(&route.bastion_user, &route.bastion_host),
    );

    let mut args = vec![
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        format!("ConnectTimeout={timeout}"),
        "-o".to_string(),
        proxy,
    ];

    if route.host_key_policy == HostKeyPolicy::Ignore {
        args.extend(
            [
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "UserKnownHostsFile=/dev/null",
            ]
            .map(str::to_string),
        );
    }

    args.extend(["-p".to_string(), SSH_PORT.to_string()]);
    args
}

/// Arguments starting the control master for `route`.
pub(crate) fn master_args(
    program: &str,
    route: &JumpRoute,
    socket: &Path,
    log: &Path,
) -> Vec<String> {
    let mut args = vec![
        "-f".to_string(),
        "-N".to_string(),
        "-M".to_string(),
        "-S".to_string(),
        socket.display().to_string(),
        "-E".to_string(),
        log.display().to_string(),
    ];
    args.extend(route_options(program, route));
    args.push(login(&route.target_user, &route.target_host));
    args
}

/// Arguments running `command` over an established master.
pub(crate) fn exec_args(
    program: &str,
    route: &JumpRoute,
    socket: &Path,
    command: &str,
) -> Vec<String> {
    let mut args = vec![
        "-S".to_string(),
        socket.display().to_string(),
        "-o".to_string(),
        "ControlMaster=no".to_string(),
    ];
    args.extend(route_options(program, route));
    args.extend([
        login(&route.target_user, &route.target_host),
        "--".to_string(),
        command.to_string(),
    ]);
    args
}

/// Arguments asking the master to exit.
pub(crate) fn exit_args(program: &str, route: &JumpRoute, socket: &Path) -> Vec<String> {
    let mut args = vec![
        "-S".to_string(),
        socket.display().to_string(),
        "-O".to_string(),
        "exit".to_string(),
    ];
    args.extend(route_options(program, route));
    args.push(login(&route.target_user, &route.target_host));
    args
}

#[async_trait]
impl RouteFactory for OpenSshRouteFactory {
    async fn open(&self, route: &JumpRoute) -> Result<Box<dyn RemoteSession>> {
        if route.target_host.is_empty() {
            return Err(FleetError::Connection {
                host: "(none)".to_string(),
                reason: "instance has no private address".to_string(),
            });
        }

        let (socket, log) = self.control_paths();
        debug!(
            bastion = %route.bastion_host,
            target_host = %route.target_host,
            control_socket = %socket.display(),
            "Opening jump route"
        );

        // The master daemonizes and keeps inherited descriptors, so output
        // goes to the -E log file instead of pipes.
        let status = Command::new(&self.program)
            .args(master_args(&self.program, route, &socket, &log))
            .env("SSH_AUTH_SOCK", &self.agent_socket)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| FleetError::Connection {
                host: route.target_host.clone(),
                reason: format!("failed to launch {}: {}", self.program, e),
            })?;

        let log_contents = tokio::fs::read_to_string(&log).await.unwrap_or_default();
        let _ = tokio::fs::remove_file(&log).await;

        if !status.success() {
            let detail = log_contents.trim();
            return Err(FleetError::Connection {
                host: route.target_host.clone(),
                reason: if detail.is_empty() {
                    format!("ssh exited with {status}")
                } else {
                    detail.to_string()
                },
            });
        }

        Ok(Box::new(OpenSshSession {
            program: self.program.clone(),
            agent_socket: self.agent_socket.clone(),
            route: route.clone(),
            socket,
            closed: false,
        }))
    }
}

pub struct OpenSshSession {
    program: String,
    agent_socket: PathBuf,
    route: JumpRoute,
    socket: PathBuf,
    closed: bool,
}

#[async_trait]
impl RemoteSession for OpenSshSession {
    async fn execute(&mut self, command: &str) -> Result<String> {
        let failed = |reason: String| FleetError::CommandFailed {
            host: self.route.target_host.clone(),
            command: command.to_string(),
            reason,
        };

        if self.closed {
            return Err(failed("session already closed".to_string()));
        }

        let output = Command::new(&self.program)
            .args(exec_args(&self.program, &self.route, &self.socket, command))
            .env("SSH_AUTH_SOCK", &self.agent_socket)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(failed(format!("{}: {}", output.status, combined.trim())));
        }

        Ok(combined)
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        match Command::new(&self.program)
            .args(exit_args(&self.program, &self.route, &self.socket))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) if status.success() => {
                debug!(target_host = %self.route.target_host, "Closed jump route");
            }
            Ok(status) => {
                warn!(
                    target_host = %self.route.target_host,
                    %status,
                    "Control master did not exit cleanly"
                );
            }
            Err(e) => {
                warn!(
                    target_host = %self.route.target_host,
                    error = %e,
                    "Failed to stop control master"
                );
            }
        }

        let _ = tokio::fs::remove_file(&self.socket).await;
    }
}

impl Drop for OpenSshSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        warn!(
            target_host = %self.route.target_host,
            control_socket = %self.socket.display(),
            "Jump route dropped without close, stopping control master"
        );
        let _ = std::process::Command::new(&self.program)
            .args(exit_args(&self.program, &self.route, &self.socket))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        let _ = std::fs::remove_file(&self.socket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROXY: &str =
        "ProxyCommand=ssh -o BatchMode=yes -o ConnectTimeout=5 -p 22 -W %h:%p ops@bastion.example.com";

    struct FixedAgent(PathBuf);

    impl AgentAuth for FixedAgent {
        fn agent_socket(&self) -> Result<PathBuf> {
            Ok(self.0.clone())
        }
    }

    fn route(policy: HostKeyPolicy) -> JumpRoute {
        JumpRoute {
            bastion_host: "bastion.example.com".to_string(),
            bastion_user: "ops".to_string(),
            target_host: "10.0.1.5".to_string(),
            target_user: "ubuntu".to_string(),
            host_key_policy: policy,
        }
    }

    fn factory(program: &str) -> OpenSshRouteFactory {
        OpenSshRouteFactory::new(&FixedAgent(PathBuf::from("/tmp/agent.sock")))
            .unwrap()
            .with_program(program)
    }

    #[test]
    fn test_master_args_proxy_through_bastion() {
        let args = master_args(
            "ssh",
            &route(HostKeyPolicy::Ignore),
            Path::new("/tmp/c.sock"),
            Path::new("/tmp/c.log"),
        );

        assert!(args.contains(&"-M".to_string()));
        assert!(args.contains(&"/tmp/c.sock".to_string()));
        assert!(args.contains(&PROXY.to_string()));
        assert_eq!(args.last().map(String::as_str), Some("ubuntu@10.0.1.5"));
    }

    #[test]
    fn test_master_args_host_key_policy() {
        let ignore = master_args(
            "ssh",
            &route(HostKeyPolicy::Ignore),
            Path::new("/tmp/c.sock"),
            Path::new("/tmp/c.log"),
        );
        assert!(ignore.contains(&"StrictHostKeyChecking=no".to_string()));

        let strict = master_args(
            "ssh",
            &route(HostKeyPolicy::Strict),
            Path::new("/tmp/c.sock"),
            Path::new("/tmp/c.log"),
        );
        assert!(!strict.iter().any(|a| a.starts_with("StrictHostKeyChecking")));
    }

    #[test]
    fn test_exec_args_end_with_command() {
        let args = exec_args(
            "ssh",
            &route(HostKeyPolicy::Ignore),
            Path::new("/tmp/c.sock"),
            "uptime",
        );
        assert_eq!(
            &args[args.len() - 3..],
            [
                "ubuntu@10.0.1.5".to_string(),
                "--".to_string(),
                "uptime".to_string()
            ]
        );
    }

    #[test]
    fn test_exec_and_exit_args_never_bypass_bastion() {
        let r = route(HostKeyPolicy::Strict);
        let socket = Path::new("/tmp/c.sock");

        for args in [
            exec_args("ssh", &r, socket, "uptime"),
            exit_args("ssh", &r, socket),
        ] {
            assert!(args.contains(&PROXY.to_string()), "{args:?}");
            assert!(args.contains(&"ConnectTimeout=5".to_string()), "{args:?}");
            assert!(args.contains(&"BatchMode=yes".to_string()), "{args:?}");
            assert!(!args.iter().any(|a| a.starts_with("StrictHostKeyChecking")));
        }

        let exec = exec_args("ssh", &r, socket, "uptime");
        assert!(exec.contains(&"ControlMaster=no".to_string()));
        assert!(!exec.contains(&"-M".to_string()));
    }

    #[test]
    fn test_exec_args_follow_host_key_policy() {
        let args = exec_args(
            "ssh",
            &route(HostKeyPolicy::Ignore),
            Path::new("/tmp/c.sock"),
            "uptime",
        );
        assert!(args.contains(&"UserKnownHostsFile=/dev/null".to_string()));
    }

    #[test]
    fn test_login_without_user() {
        assert_eq!(login("", "bastion"), "bastion");
        assert_eq!(login("ops", "bastion"), "ops@bastion");
    }

    #[test]
    fn test_control_paths_are_unique() {
        let f = factory("ssh");
        let (a, _) = f.control_paths();
        let (b, _) = f.control_paths();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_open_without_private_address_fails() {
        let mut r = route(HostKeyPolicy::Ignore);
        r.target_host.clear();
        let err = factory("ssh").open(&r).await.err().unwrap();
        assert!(matches!(err, FleetError::Connection { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_open_reports_master_failure() {
        let err = factory("false")
            .open(&route(HostKeyPolicy::Ignore))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, FleetError::Connection { ref host, .. } if host == "10.0.1.5"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_session_runs_and_closes() {
        let mut session = factory("true")
            .open(&route(HostKeyPolicy::Ignore))
            .await
            .unwrap();
        assert_eq!(session.execute("uptime").await.unwrap(), "");
        session.close().await;
        assert!(session.execute("uptime").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dropped_session_stops_master() {
        let session = factory("true")
            .open(&route(HostKeyPolicy::Ignore))
            .await
            .unwrap();
        // falls back to the blocking exit in Drop
        drop(session);
    }
}
