//! Shared fixtures for pipeline tests

use crate::runtime::{Runtime, Tuning};
use convoy_cloud::memory::MemoryCloud;
use convoy_cloud::{ProvisionWaits, TeardownWaits, WaitConfig};
use convoy_config::Settings;
use convoy_tools::ScriptedRunner;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const DOMAIN: &str = "chat.example.com";

pub fn fast_tuning() -> Tuning {
    let quick = WaitConfig::new(Duration::from_secs(2), Duration::from_millis(10));
    Tuning {
        provision: ProvisionWaits {
            running: quick,
            terminated: quick,
        },
        teardown: TeardownWaits {
            interfaces_detached: WaitConfig::attempts(3, Duration::from_millis(10)),
        },
        port_reachable: quick,
        ssh_login: quick,
        ssh_port: 22,
        api_health: WaitConfig::attempts(3, Duration::from_millis(10)),
        phase_retry_delay: Duration::ZERO,
        settle: Duration::ZERO,
        dns_propagation: None,
        bootstrap_timeout: Duration::from_secs(5),
    }
}

/// Temp workspace with key files, bootstrap scripts and an infra dir.
pub struct Fixture {
    pub dir: TempDir,
    pub cloud: Arc<MemoryCloud>,
    pub runner: Arc<ScriptedRunner>,
}

impl Fixture {
    pub fn new(cloud: MemoryCloud) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let keys = dir.path().join("keys");
        let scripts = dir.path().join("scripts");
        std::fs::create_dir_all(&keys).unwrap();
        std::fs::create_dir_all(&scripts).unwrap();
        std::fs::write(keys.join("id_convoy"), "PRIVATE KEY\n").unwrap();
        std::fs::write(keys.join("id_convoy.pub"), "ssh-ed25519 AAAAC3 convoy@test\n").unwrap();
        std::fs::write(scripts.join("mongodb_bootstrap.sh"), "echo mongo\n").unwrap();
        std::fs::write(scripts.join("app_bootstrap.sh"), "echo app\n").unwrap();
        Self {
            dir,
            cloud: Arc::new(cloud),
            runner: Arc::new(ScriptedRunner::new()),
        }
    }

    pub fn infra_dir(&self) -> PathBuf {
        self.dir.path().join("infra")
    }

    /// Complete settings, with `overrides` applied on top. An empty
    /// override value unsets the key.
    pub fn settings(&self, overrides: &[(&str, &str)]) -> Settings {
        let root = self.dir.path();
        let mut map: HashMap<String, String> = [
            ("SSH_KEY_NAME", "convoy-key".to_string()),
            ("SSH_KEY_PATH", root.join("keys/id_convoy").display().to_string()),
            (
                "SSH_PUBLIC_KEY_PATH",
                root.join("keys/id_convoy.pub").display().to_string(),
            ),
            ("CONVOY_INFRA_DIR", self.infra_dir().display().to_string()),
            ("CONVOY_SCRIPTS_DIR", root.join("scripts").display().to_string()),
            ("DOMAIN", DOMAIN.to_string()),
            ("LETSENCRYPT_EMAIL", "ops@example.com".to_string()),
            ("MONGO_USERNAME", "admin".to_string()),
            ("MONGO_PASSWORD", "s3cr3t".to_string()),
            ("RELEASE", "6.5.0".to_string()),
            ("IMAGE", "rocketchat/rocket.chat".to_string()),
            ("TRAEFIK_RELEASE", "v3.3".to_string()),
            ("ROOT_URL", format!("https://{}", DOMAIN)),
            ("DEPLOYMENT_NAME", "demo".to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        for (key, value) in overrides {
            map.insert(key.to_string(), value.to_string());
        }
        Settings::from_lookup(|k| map.get(k).cloned())
    }

    pub fn runtime(&self, settings: Settings, tuning: Tuning) -> Runtime {
        Runtime::new(
            settings,
            self.cloud.clone(),
            self.cloud.clone(),
            self.cloud.clone(),
            self.runner.clone(),
        )
        .with_tuning(tuning)
    }
}
