// ABOUTME: Adds the certified key to the running ssh-agent.
// ABOUTME: ssh-add picks up <key>-cert.pub next to the key on its own.

use anyhow::{bail, Context, Result};
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Whether an agent socket is advertised in the environment.
pub fn agent_available() -> bool {
    std::env::var_os("SSH_AUTH_SOCK").is_some_and(|sock| !sock.is_empty())
}

/// Run `ssh-add <key>`. The certificate lifetime bounds the agent entry with `-t`.
pub async fn add_to_agent(key_path: &Path, lifetime_secs: u64) -> Result<()> {
    let mut command = Command::new("ssh-add");
    if lifetime_secs > 0 {
        command.arg("-t").arg(lifetime_secs.to_string());
    }
    command.arg(key_path);
    debug!(?command, "running ssh-add");

    let output = command
        .output()
        .await
        .context("Failed to run ssh-add")?;
    if !output.status.success() {
        bail!(
            "ssh-add failed ({}): {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}
