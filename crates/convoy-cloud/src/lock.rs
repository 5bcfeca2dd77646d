//! Deployment lock file
//!
//! Two operators running deploy and destroy against the same topology would
//! race on its fixed security-group names and role tags. The lock is a JSON
//! file `.convoy-<key>.lock` in the infra directory, keyed by the caller
//! (the topology slug in practice).

use crate::error::{CloudError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

const STALE_AFTER_SECS: i64 = 3600;

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    key: String,
    holder: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// RAII guard for a deployment lock
#[derive(Debug)]
pub struct DeploymentLock {
    lock_path: PathBuf,
    released: bool,
}

impl DeploymentLock {
    pub fn path_for(dir: impl AsRef<Path>, key: &str) -> PathBuf {
        dir.as_ref().join(format!(".convoy-{}.lock", key))
    }

    /// Take the lock for `key`, replacing a lock older than one hour.
    pub async fn acquire(dir: impl AsRef<Path>, key: &str) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.exists() {
            fs::create_dir_all(dir).await?;
            tracing::debug!("Created lock directory: {}", dir.display());
        }
        let lock_path = Self::path_for(dir, key);

        if lock_path.exists() {
            let content = fs::read_to_string(&lock_path).await?;
            match serde_json::from_str::<LockInfo>(&content) {
                Ok(info) => {
                    let age = Utc::now().signed_duration_since(info.acquired_at);
                    if age.num_seconds() < STALE_AFTER_SECS {
                        return Err(CloudError::LockError(format!(
                            "{} is locked by {} (pid {}) since {}",
                            key, info.holder, info.pid, info.acquired_at
                        )));
                    }
                    tracing::warn!(key, holder = %info.holder, "Removing stale lock");
                }
                Err(e) => {
                    tracing::warn!(key, error = %e, "Replacing unreadable lock file");
                }
            }
        }

        let info = LockInfo {
            key: key.to_string(),
            holder: std::env::var("USER").unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        fs::write(&lock_path, serde_json::to_string_pretty(&info)?).await?;

        tracing::debug!(key, "Acquired deployment lock");
        Ok(Self {
            lock_path,
            released: false,
        })
    }

    /// Release the lock
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("Released deployment lock");
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for DeploymentLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_second_acquire_fails_until_release() {
        let dir = tempdir().unwrap();
        let lock = DeploymentLock::acquire(dir.path(), "three-node").await.unwrap();

        let err = DeploymentLock::acquire(dir.path(), "three-node").await.unwrap_err();
        assert!(matches!(err, CloudError::LockError(_)));

        // Other topologies are independent.
        let other = DeploymentLock::acquire(dir.path(), "two-node").await.unwrap();

        lock.release().await.unwrap();
        DeploymentLock::acquire(dir.path(), "three-node").await.unwrap();
        drop(other);
        assert!(!DeploymentLock::path_for(dir.path(), "two-node").exists());
    }

    #[tokio::test]
    async fn test_stale_lock_is_replaced() {
        let dir = tempdir().unwrap();
        let stale = LockInfo {
            key: "three-node".into(),
            holder: "someone".into(),
            pid: 1,
            acquired_at: Utc::now() - chrono::Duration::hours(2),
        };
        std::fs::write(
            DeploymentLock::path_for(dir.path(), "three-node"),
            serde_json::to_string(&stale).unwrap(),
        )
        .unwrap();

        let lock = DeploymentLock::acquire(dir.path(), "three-node").await;
        assert!(lock.is_ok());
    }

    #[tokio::test]
    async fn test_lock_file_named_after_key() {
        let dir = tempdir().unwrap();
        let _lock = DeploymentLock::acquire(dir.path(), "two-node").await.unwrap();

        let path = dir.path().join(".convoy-two-node.lock");
        let info: LockInfo =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(info.key, "two-node");
        assert_eq!(info.pid, std::process::id());
    }
}
