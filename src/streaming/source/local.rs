// Local transport: runs the command through `sh -c` on this machine.
// The target host is only used for labelling.

use super::{spawn_process, RemoteProcess, RemoteTarget, Transport};
use crate::streaming::types::StreamResult;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;

pub struct LocalTransport {
    shell: PathBuf,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self {
            shell: PathBuf::from("sh"),
        }
    }

    pub fn with_shell(shell: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn launch(&self, target: &RemoteTarget, command: &str) -> StreamResult<RemoteProcess> {
        log::info!("Launching locally for {}: {}", target, command);

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(command);

        spawn_process(cmd, format!("local {}", target))
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_launch_streams_stdout() {
        let transport = LocalTransport::new();
        let mut process = transport
            .launch(&RemoteTarget::new("localhost"), "printf 'a\\nb\\n'")
            .await
            .unwrap();

        assert_eq!(process.lines.next_line().await.unwrap().as_deref(), Some("a"));
        assert_eq!(process.lines.next_line().await.unwrap().as_deref(), Some("b"));
        assert_eq!(process.lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_connection_error() {
        let transport = LocalTransport::with_shell("/nonexistent/shell");
        let err = transport
            .launch(&RemoteTarget::new("localhost"), "true")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, crate::streaming::types::StreamError::Connection(_)));
    }
}
