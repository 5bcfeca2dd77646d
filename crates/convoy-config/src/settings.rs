//! Process settings
//!
//! Built once in `main` with [`Settings::from_env`] and passed by reference
//! to every pipeline. Real environment variables win over the env file.

use crate::error::{ConfigError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Deployment variables forwarded to descriptors and bootstrap preambles.
pub const DEPLOYMENT_VARS: &[&str] = &[
    "MONGO_USERNAME",
    "MONGO_PASSWORD",
    "MONGO_PORT",
    "REPLSET_NAME",
    "MONGODB_SERVICE_DB",
    "MONGO_URL_DB",
    "DEPLOYMENT_NAMESPACE",
    "K8S_NAMESPACE",
    "NAMESPACE",
    "KUBE_CONFIG_PATH",
    "KUBE_CONFIG_CONTEXT",
    "WORKER_KEY_NAME",
    "CONCURRENT_USERS",
    "CONTROLLER_NODE_NAME",
    "WORKERHA",
    "MONGOHA",
    "CERT_EMAIL",
    "ACME_EMAIL",
    "RELEASE",
    "IMAGE",
    "TRAEFIK_RELEASE",
    "ROOT_URL",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsSettings {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshSettings {
    pub key_name: Option<String>,
    pub private_key_path: Option<PathBuf>,
    pub public_key_path: Option<PathBuf>,
}

/// Validated SSH identity: the key pair name plus both key files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshKeys {
    pub key_name: String,
    pub private_key_path: PathBuf,
    pub public_key_path: PathBuf,
}

impl SshKeys {
    pub fn read_public_key(&self) -> Result<String> {
        Ok(std::fs::read_to_string(&self.public_key_path)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub aws: AwsSettings,
    pub default_os_version: String,
    pub default_instance_type: String,
    pub kubernetes_instance_type: Option<String>,
    pub domain: Option<String>,
    pub letsencrypt_email: Option<String>,
    pub ssh: SshSettings,
    pub deployment_name: Option<String>,
    pub infra_dir: PathBuf,
    pub scripts_dir: PathBuf,
    /// Values of [`DEPLOYMENT_VARS`] that are set.
    pub extra: BTreeMap<String, String>,
}

impl Settings {
    /// Environment first, then the discovered env file.
    pub fn from_env() -> Result<Self> {
        let file_vars = match crate::find_env_file() {
            Some(path) => {
                tracing::info!(path = %path.display(), "loading env file");
                crate::load_env_file(&path)?
            }
            None => BTreeMap::new(),
        };
        Ok(Self::from_lookup(|key| {
            std::env::var(key)
                .ok()
                .or_else(|| file_vars.get(key).cloned())
        }))
    }

    /// Build from an arbitrary lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let path = |key: &str| get(key).map(|v| expand_home(&v));

        let extra = DEPLOYMENT_VARS
            .iter()
            .filter_map(|key| get(key).map(|v| (key.to_string(), v)))
            .collect();

        Self {
            aws: AwsSettings {
                region: get("AWS_DEFAULT_REGION").unwrap_or_else(|| "us-east-1".to_string()),
                access_key_id: get("AWS_ACCESS_KEY_ID"),
                secret_access_key: get("AWS_SECRET_ACCESS_KEY"),
                session_token: get("AWS_SESSION_TOKEN"),
            },
            default_os_version: get("DEFAULT_OS_VERSION").unwrap_or_else(|| "24.04".to_string()),
            default_instance_type: get("DEFAULT_INSTANCE_TYPE")
                .unwrap_or_else(|| "t2.xlarge".to_string()),
            kubernetes_instance_type: get("KUBERNETES_INSTANCE_TYPE"),
            domain: get("DOMAIN").map(|d| d.trim().to_string()),
            letsencrypt_email: get("LETSENCRYPT_EMAIL"),
            ssh: SshSettings {
                key_name: get("SSH_KEY_NAME"),
                private_key_path: path("SSH_KEY_PATH"),
                public_key_path: path("SSH_PUBLIC_KEY_PATH"),
            },
            deployment_name: get("DEPLOYMENT_NAME"),
            infra_dir: path("CONVOY_INFRA_DIR").unwrap_or_else(|| PathBuf::from("./infra")),
            scripts_dir: path("CONVOY_SCRIPTS_DIR").unwrap_or_else(|| PathBuf::from("./scripts")),
            extra,
        }
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.extra.get(key).map(String::as_str)
    }

    pub fn var_or(&self, key: &str, default: &str) -> String {
        self.var(key).unwrap_or(default).to_string()
    }

    pub fn require_var(&self, key: &str) -> Result<&str> {
        self.var(key)
            .ok_or_else(|| ConfigError::MissingVar(key.to_string()))
    }

    /// `true`, `1` and `yes` (any case) are true; anything else, or unset,
    /// is false.
    pub fn flag(&self, key: &str) -> bool {
        self.var(key)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false)
    }

    pub fn require_domain(&self) -> Result<&str> {
        self.domain
            .as_deref()
            .ok_or_else(|| ConfigError::MissingVar("DOMAIN".to_string()))
    }

    pub fn require_letsencrypt_email(&self) -> Result<&str> {
        self.letsencrypt_email
            .as_deref()
            .ok_or_else(|| ConfigError::MissingVar("LETSENCRYPT_EMAIL".to_string()))
    }

    /// Key pair name plus both key files, which must exist.
    pub fn require_ssh(&self) -> Result<SshKeys> {
        let key_name = self
            .ssh
            .key_name
            .clone()
            .ok_or_else(|| ConfigError::MissingVar("SSH_KEY_NAME".to_string()))?;
        let private_key_path = existing_file(
            self.ssh.private_key_path.as_deref(),
            "SSH_KEY_PATH",
            "SSH private key",
        )?;
        let public_key_path = existing_file(
            self.ssh.public_key_path.as_deref(),
            "SSH_PUBLIC_KEY_PATH",
            "SSH public key",
        )?;
        Ok(SshKeys {
            key_name,
            private_key_path,
            public_key_path,
        })
    }

    /// Script under the scripts directory, which must exist.
    pub fn require_script(&self, name: &str) -> Result<PathBuf> {
        let path = self.scripts_dir.join(name);
        if path.is_file() {
            Ok(path)
        } else {
            Err(ConfigError::MissingFile {
                what: format!("bootstrap script {}", name),
                path,
            })
        }
    }
}

fn existing_file(path: Option<&Path>, var: &str, what: &str) -> Result<PathBuf> {
    let path = path.ok_or_else(|| ConfigError::MissingVar(var.to_string()))?;
    if path.is_file() {
        Ok(path.to_path_buf())
    } else {
        Err(ConfigError::MissingFile {
            what: what.to_string(),
            path: path.to_path_buf(),
        })
    }
}

fn expand_home(value: &str) -> PathBuf {
    match value.strip_prefix("~/") {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(value),
        },
        None => PathBuf::from(value),
    }
}
