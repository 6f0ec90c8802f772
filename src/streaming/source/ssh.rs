// SSH transport
//
// Runs the telemetry command through the system ssh client in batch mode, so
// authentication comes entirely from the user's existing ssh setup. A forced
// TTY (`-tt`) ties the remote process to the connection: closing the client
// hangs up the remote side instead of leaving an orphaned sampler behind.

use super::{spawn_process, RemoteProcess, RemoteTarget, Transport};
use crate::streaming::types::{StreamError, StreamResult};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;

pub struct SshTransport {
    ssh_binary: PathBuf,
    connect_timeout: Duration,
    force_tty: bool,
    extra_options: Vec<String>,
}

impl SshTransport {
    /// Locate `ssh` on PATH
    pub fn new() -> StreamResult<Self> {
        let ssh_binary = which::which("ssh").map_err(|e| {
            StreamError::Config(format!("ssh client not found on PATH: {}", e))
        })?;
        Ok(Self::with_binary(ssh_binary))
    }

    pub fn with_binary(ssh_binary: impl Into<PathBuf>) -> Self {
        Self {
            ssh_binary: ssh_binary.into(),
            connect_timeout: Duration::from_secs(10),
            force_tty: true,
            extra_options: Vec::new(),
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn force_tty(mut self, force_tty: bool) -> Self {
        self.force_tty = force_tty;
        self
    }

    /// Extra `-o Key=Value` options
    pub fn option(mut self, option: impl Into<String>) -> Self {
        self.extra_options.push(option.into());
        self
    }

    /// Arguments passed to ssh for a target and remote command
    pub fn build_args(&self, target: &RemoteTarget, command: &str) -> Vec<String> {
        let connect_secs = self.connect_timeout.as_secs().max(1);
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", connect_secs),
            "-o".to_string(),
            "ServerAliveInterval=5".to_string(),
            "-o".to_string(),
            "ServerAliveCountMax=3".to_string(),
        ];

        for option in &self.extra_options {
            args.push("-o".to_string());
            args.push(option.clone());
        }

        args.push(if self.force_tty { "-tt" } else { "-T" }.to_string());

        if let Some(port) = target.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let Some(user) = &target.user {
            args.push("-l".to_string());
            args.push(user.clone());
        }

        args.push(target.host.clone());
        args.push("--".to_string());
        args.push(command.to_string());
        args
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn launch(&self, target: &RemoteTarget, command: &str) -> StreamResult<RemoteProcess> {
        log::info!("Launching over ssh on {}: {}", target, command);

        let mut cmd = Command::new(&self.ssh_binary);
        cmd.args(self.build_args(target, command));

        spawn_process(cmd, format!("ssh {}", target))
    }

    fn name(&self) -> &'static str {
        "ssh"
    }
}
