//! Cluster credentials fetched from the control node

use crate::error::{Result, ToolError};
use crate::ssh::Ssh;
use std::path::Path;

pub const API_PORT: u16 = 16443;

/// Replace the API server URL `https://<from>:<port>` with
/// `https://<to>:<port>`. Returns the new text and whether anything changed.
pub fn patch_server_address(content: &str, from: &str, to: &str, port: u16) -> (String, bool) {
    let old = format!("https://{}:{}", from, port);
    let new = format!("https://{}:{}", to, port);
    if content.contains(&old) {
        (content.replace(&old, &new), true)
    } else {
        (content.to_string(), false)
    }
}

/// Fetch `microk8s config` from `host` and write it to `dest`, pointing the
/// server entry at the local tunnel instead of the controller's private
/// address.
pub async fn fetch_microk8s_config(
    ssh: &Ssh,
    host: &str,
    private_address: &str,
    dest: impl AsRef<Path>,
) -> Result<bool> {
    let output = ssh.exec(host, "sudo microk8s config").await?;
    if output.stdout.trim().is_empty() {
        return Err(ToolError::CommandFailed {
            command: "microk8s config".to_string(),
            code: output.code,
            stderr: "empty cluster config".to_string(),
        });
    }

    let (patched, changed) =
        patch_server_address(&output.stdout, private_address, "127.0.0.1", API_PORT);
    let dest = dest.as_ref();
    tokio::fs::write(dest, patched).await?;
    if changed {
        tracing::info!(path = %dest.display(), "cluster config written; server patched to local tunnel");
    } else {
        tracing::warn!(
            path = %dest.display(),
            private_address,
            "cluster config written; private server address not found, left unpatched"
        );
    }
    Ok(changed)
}
