//! Variables handed to the cluster terraform module

use crate::deployment::DeploymentRun;
use crate::error::Result;
use crate::topology::{CONTROLLER_ROLE, MONGO_MASTER_ROLE, WORKER_ROLE};
use convoy_config::Settings;
use convoy_tools::DeploymentDescriptor;
use std::path::Path;

pub const DEFAULT_KUBE_CONFIG_PATH: &str = "/var/snap/microk8s/current/credentials/client.config";

/// Descriptor for the three-node layout. Every key is always present; slots
/// for replicas and extra workers this layout does not create stay empty.
pub fn three_node_descriptor(
    settings: &Settings,
    run: &DeploymentRun,
    ssh_key_name: &str,
    key_copy: &Path,
) -> Result<DeploymentDescriptor> {
    let mongo = run.resource(MONGO_MASTER_ROLE)?;
    let controller = run.resource(CONTROLLER_ROLE)?;
    let worker = run.resource(WORKER_ROLE)?;
    let var = |key: &str| settings.var_or(key, "");

    let key_file_name = key_copy
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut d = DeploymentDescriptor::new();
    d.set("ssh_key_path", key_copy.display().to_string())
        .set("mongo_master_ip", mongo.public_address()?)
        .set("mongo_master_private_ip", mongo.private_address()?)
        .set("mongo_master_ssh_key_name", ssh_key_name)
        .set("worker_ssh_key_path", key_file_name);
    for i in 1..=4 {
        d.set(format!("mongo_read_replica{}_ip", i), "");
    }
    for i in 1..=4 {
        d.set(format!("mongo_read_replica{}_private_ip", i), "");
    }
    d.set("controller_ip", controller.public_address()?)
        .set("controller_private_ip", controller.private_address()?)
        .set("worker_ip", worker.public_address()?)
        .set("worker_private_ip", worker.private_address()?);
    for i in 2..=5 {
        d.set(format!("worker{}_ip", i), "");
    }
    for i in 2..=5 {
        d.set(format!("worker{}_private_ip", i), "");
    }
    d.set("mongo_username", var("MONGO_USERNAME"))
        .set("mongo_password", var("MONGO_PASSWORD"))
        .set("mongodb_service_db", var("MONGODB_SERVICE_DB"))
        .set(
            "deployment_namespace",
            settings.var_or("DEPLOYMENT_NAMESPACE", "psautoinfra"),
        )
        .set(
            "kube_config_path",
            settings.var_or("KUBE_CONFIG_PATH", DEFAULT_KUBE_CONFIG_PATH),
        )
        .set(
            "kube_config_context",
            settings.var_or("KUBE_CONFIG_CONTEXT", "microk8s"),
        )
        .set("namespace", settings.var_or("NAMESPACE", "psautoinfra"))
        .set("mongo_url_db", settings.var_or("MONGO_URL_DB", "rocketchat"))
        .set("worker_key_name", var("WORKER_KEY_NAME"))
        .set("concurrent_users", settings.var_or("CONCURRENT_USERS", "1"))
        .set("controller_node_name", var("CONTROLLER_NODE_NAME"))
        .set("workerha", settings.flag("WORKERHA"))
        .set("mongoha", settings.flag("MONGOHA"))
        .set(
            "letsencrypt_email",
            settings.letsencrypt_email.clone().unwrap_or_default(),
        )
        .set("domain", settings.domain.clone().unwrap_or_default())
        .set("publicip", controller.public_address()?)
        .set("cert_email", var("CERT_EMAIL"))
        .set("acme_email", var("ACME_EMAIL"));
    Ok(d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::Topology;
    use convoy_cloud::{LifecycleState, ManagedResource};
    use convoy_tools::DescriptorValue;
    use std::collections::HashMap;

    fn node(role: &str, n: u8) -> ManagedResource {
        ManagedResource {
            role: role.to_string(),
            id: format!("i-{}", n),
            state: LifecycleState::Running,
            public_address: Some(format!("203.0.113.{}", n)),
            private_address: Some(format!("10.0.0.{}", n)),
            key_name: Some("convoy".to_string()),
        }
    }

    fn run() -> DeploymentRun {
        let mut run = DeploymentRun::new("demo", Topology::ThreeNode);
        run.record(node(MONGO_MASTER_ROLE, 1));
        run.record(node(CONTROLLER_ROLE, 2));
        run.record(node(WORKER_ROLE, 3));
        run
    }

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        Settings::from_lookup(|k| map.get(k).map(|v| v.to_string()))
    }

    #[test]
    fn test_descriptor_keys_and_defaults() {
        let s = settings(&[
            ("MONGO_USERNAME", "admin"),
            ("WORKERHA", "true"),
            ("DOMAIN", "chat.example.com"),
        ]);
        let d = three_node_descriptor(&s, &run(), "convoy", Path::new("/infra/id_convoy")).unwrap();

        let keys: Vec<&str> = d.keys().collect();
        assert_eq!(keys[0], "ssh_key_path");
        assert_eq!(keys.last(), Some(&"acme_email"));
        assert_eq!(d.len(), 43);

        assert_eq!(d.get("worker_ssh_key_path"), Some(&DescriptorValue::Str("id_convoy".into())));
        assert_eq!(d.get("controller_private_ip"), Some(&DescriptorValue::Str("10.0.0.2".into())));
        assert_eq!(d.get("publicip"), Some(&DescriptorValue::Str("203.0.113.2".into())));
        assert_eq!(d.get("worker5_private_ip"), Some(&DescriptorValue::Str(String::new())));
        assert_eq!(d.get("deployment_namespace"), Some(&DescriptorValue::Str("psautoinfra".into())));
        assert_eq!(d.get("concurrent_users"), Some(&DescriptorValue::Str("1".into())));
        assert_eq!(d.get("workerha"), Some(&DescriptorValue::Bool(true)));
        assert_eq!(d.get("mongoha"), Some(&DescriptorValue::Bool(false)));

        let rendered = d.render();
        assert!(rendered.contains("mongo_username = \"admin\"\n"));
        assert!(rendered.contains("workerha = true\n"));
    }

    #[test]
    fn test_missing_role_is_an_error() {
        let mut partial = DeploymentRun::new("demo", Topology::ThreeNode);
        partial.record(node(MONGO_MASTER_ROLE, 1));
        let s = settings(&[]);
        assert!(three_node_descriptor(&s, &partial, "convoy", Path::new("k")).is_err());
    }
}
