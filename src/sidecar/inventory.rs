//! Inventory of running sidecar instances.
//!
//! The inventory is the supervisor's ground truth for "is my sidecar actually
//! running". Failures never propagate: an inventory that cannot be read is
//! logged and reported as empty.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// A running sidecar as reported by the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeInstance {
    pub app_id: String,
    pub pid: u32,
    #[serde(default)]
    pub http_port: Option<u16>,
    #[serde(default)]
    pub grpc_port: Option<u16>,
}

/// Source of running sidecar instances.
#[async_trait]
pub trait Inventory: Send + Sync {
    /// Instances currently running for `app_id`. Empty on any failure.
    async fn list(&self, app_id: &str) -> Vec<RuntimeInstance>;

    /// Whether at least one instance for `app_id` is running.
    async fn exists(&self, app_id: &str) -> bool {
        !self.list(app_id).await.is_empty()
    }
}

/// Inventory backed by the sidecar CLI's `list -o json` command.
#[derive(Debug, Clone)]
pub struct CliInventory {
    executable: String,
    timeout: Duration,
}

impl CliInventory {
    pub fn new(executable: impl Into<String>, timeout: Duration) -> Self {
        Self {
            executable: executable.into(),
            timeout,
        }
    }

    async fn run_list(&self) -> Result<Vec<u8>, String> {
        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.executable)
                .args(["list", "-o", "json"])
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| format!("timed out after {:?}", self.timeout))?
        .map_err(|e| e.to_string())?;

        if !output.status.success() {
            return Err(format!(
                "exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl Inventory for CliInventory {
    async fn list(&self, app_id: &str) -> Vec<RuntimeInstance> {
        let raw = match self.run_list().await {
            Ok(raw) => raw,
            Err(reason) => {
                tracing::warn!(
                    "Sidecar inventory unavailable ({} list): {}",
                    self.executable,
                    reason
                );
                return Vec::new();
            }
        };

        match parse_instances(&raw) {
            Ok(instances) => instances
                .into_iter()
                .filter(|instance| instance.app_id == app_id)
                .collect(),
            Err(e) => {
                tracing::warn!("Malformed sidecar inventory response: {}", e);
                Vec::new()
            }
        }
    }
}

/// Parse the CLI's JSON listing.
///
/// An empty response or the CLI's "no instances" text counts as no instances.
pub fn parse_instances(raw: &[u8]) -> Result<Vec<RuntimeInstance>, serde_json::Error> {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    if trimmed.is_empty() || !trimmed.starts_with(['[', '{']) {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('{') {
        // A single instance is printed as an object.
        return serde_json::from_str::<RuntimeInstance>(trimmed).map(|i| vec![i]);
    }
    serde_json::from_str(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listing() {
        let raw = br#"[
            {"appId":"orders","httpPort":3500,"grpcPort":50001,"appPort":5000,"pid":4242,"command":"dotnet run"},
            {"appId":"billing","httpPort":3501,"grpcPort":50002,"appPort":5001,"pid":4343}
        ]"#;

        let instances = parse_instances(raw).unwrap();
        assert_eq!(instances.len(), 2);
        assert_eq!(
            instances[0],
            RuntimeInstance {
                app_id: "orders".to_string(),
                pid: 4242,
                http_port: Some(3500),
                grpc_port: Some(50001),
            }
        );
    }

    #[test]
    fn test_parse_empty_and_plain_text() {
        assert!(parse_instances(b"").unwrap().is_empty());
        assert!(parse_instances(b"  \n").unwrap().is_empty());
        assert!(parse_instances(b"No Dapr instances found.").unwrap().is_empty());
    }

    #[test]
    fn test_parse_single_object() {
        let raw = br#"{"appId":"orders","pid":7}"#;
        let instances = parse_instances(raw).unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].http_port, None);
    }

    #[test]
    fn test_parse_malformed() {
        assert!(parse_instances(b"[{\"appId\": 3}]").is_err());
    }

    #[tokio::test]
    async fn test_missing_executable_reads_as_empty() {
        let inventory = CliInventory::new(
            "definitely-not-a-sidecar-cli-binary",
            Duration::from_secs(5),
        );
        assert!(inventory.list("orders").await.is_empty());
        assert!(!inventory.exists("orders").await);
    }
}
