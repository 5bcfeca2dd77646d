//! Cluster layouts
//!
//! Role tags and firewall groups are fixed per topology; the deployment
//! name only lands in the `Deployment` tag.

use convoy_cloud::{IngressRule, RootVolume, SecurityGroupSpec, Tag};
use serde::Serialize;
use std::fmt;

pub const PROJECT: &str = "convoy";

pub const MONGO_ROLE: &str = "convoy-mongo";
pub const APP_ROLE: &str = "convoy-app";
pub const MONGO_MASTER_ROLE: &str = "convoy-mongo-master";
pub const CONTROLLER_ROLE: &str = "convoy-k8s-controller";
pub const WORKER_ROLE: &str = "convoy-k8s-worker";

pub const BASIC_GROUP: &str = "convoy-basic";
pub const APP_GROUP: &str = "convoy-app";
pub const K8S_MONGO_GROUP: &str = "convoy-k8s-mongo";
pub const K8S_CONTROLLER_GROUP: &str = "convoy-k8s-controller";
pub const K8S_WORKER_GROUP: &str = "convoy-k8s-worker";

const ANYWHERE: &str = "0.0.0.0/0";
const MONGO_PORT: i32 = 27017;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topology {
    /// A single database node bootstrapped over ssh.
    Mongo,
    /// Database node plus an application node bootstrapped over ssh.
    TwoNode,
    /// Database, control-plane and worker nodes finished by terraform.
    ThreeNode,
}

impl Topology {
    pub fn slug(&self) -> &'static str {
        match self {
            Topology::Mongo => "mongo",
            Topology::TwoNode => "two-node",
            Topology::ThreeNode => "three-node",
        }
    }

    /// Name of the deployment lock. Topologies that share a role share the
    /// lock.
    pub fn lock_key(&self) -> &'static str {
        match self {
            Topology::Mongo | Topology::TwoNode => Topology::TwoNode.slug(),
            Topology::ThreeNode => Topology::ThreeNode.slug(),
        }
    }

    /// Roles in provisioning order.
    pub fn roles(&self) -> &'static [&'static str] {
        match self {
            Topology::Mongo => &[MONGO_ROLE],
            Topology::TwoNode => &[MONGO_ROLE, APP_ROLE],
            Topology::ThreeNode => &[MONGO_MASTER_ROLE, CONTROLLER_ROLE, WORKER_ROLE],
        }
    }

    pub fn group_names(&self) -> &'static [&'static str] {
        match self {
            Topology::Mongo => &[BASIC_GROUP],
            Topology::TwoNode => &[BASIC_GROUP, APP_GROUP],
            Topology::ThreeNode => &[K8S_MONGO_GROUP, K8S_CONTROLLER_GROUP, K8S_WORKER_GROUP],
        }
    }

    /// Role whose public address the DNS record points at.
    pub fn fronting_role(&self) -> &'static str {
        match self {
            Topology::Mongo => MONGO_ROLE,
            Topology::TwoNode => APP_ROLE,
            Topology::ThreeNode => CONTROLLER_ROLE,
        }
    }

    pub fn group_for_role(&self, role: &str) -> Option<&'static str> {
        match (self, role) {
            (Topology::Mongo | Topology::TwoNode, MONGO_ROLE) => Some(BASIC_GROUP),
            (Topology::TwoNode, APP_ROLE) => Some(APP_GROUP),
            (Topology::ThreeNode, MONGO_MASTER_ROLE) => Some(K8S_MONGO_GROUP),
            (Topology::ThreeNode, CONTROLLER_ROLE) => Some(K8S_CONTROLLER_GROUP),
            (Topology::ThreeNode, WORKER_ROLE) => Some(K8S_WORKER_GROUP),
            _ => None,
        }
    }

    /// Only the cluster nodes get an explicit root volume.
    pub fn root_volume(&self) -> Option<RootVolume> {
        match self {
            Topology::Mongo | Topology::TwoNode => None,
            Topology::ThreeNode => Some(RootVolume::default()),
        }
    }

    pub fn instance_tags(&self, role: &str, deployment: &str) -> Vec<Tag> {
        vec![
            Tag::new("Name", role),
            Tag::new("Project", PROJECT),
            Tag::new("Role", role),
            Tag::new("Deployment", deployment),
        ]
    }

    /// Declared firewall policy. Groups are listed before any rule that
    /// references them is applied, so order within the list does not matter.
    pub fn security_groups(&self) -> Vec<SecurityGroupSpec> {
        match self {
            Topology::Mongo => vec![
                group(BASIC_GROUP, "SSH + MongoDB access", "mongo-sg")
                    .allow(IngressRule::tcp_from_cidr(22, ANYWHERE))
                    .allow(IngressRule::tcp_from_group(MONGO_PORT, BASIC_GROUP)),
            ],
            Topology::TwoNode => vec![
                group(BASIC_GROUP, "SSH + MongoDB access", "mongo-sg")
                    .allow(IngressRule::tcp_from_cidr(22, ANYWHERE))
                    .allow(IngressRule::tcp_from_group(MONGO_PORT, BASIC_GROUP))
                    .allow(IngressRule::tcp_from_group(MONGO_PORT, APP_GROUP)),
                group(APP_GROUP, "SSH + HTTP/HTTPS", "app-sg")
                    .allow(IngressRule::tcp_from_cidr(22, ANYWHERE))
                    .allow(IngressRule::tcp_from_cidr(80, ANYWHERE))
                    .allow(IngressRule::tcp_from_cidr(443, ANYWHERE)),
            ],
            Topology::ThreeNode => vec![
                group(K8S_MONGO_GROUP, "SSH + Mongo access", "mongo-sg")
                    .allow(IngressRule::tcp_from_cidr(22, ANYWHERE))
                    .allow(IngressRule::tcp_from_group(MONGO_PORT, K8S_CONTROLLER_GROUP))
                    .allow(IngressRule::tcp_from_group(MONGO_PORT, K8S_WORKER_GROUP)),
                group(K8S_CONTROLLER_GROUP, "SSH + HTTP/HTTPS", "controller-sg")
                    .allow(IngressRule::tcp_from_cidr(22, ANYWHERE))
                    .allow(IngressRule::tcp_from_cidr(80, ANYWHERE))
                    .allow(IngressRule::tcp_from_cidr(443, ANYWHERE))
                    .allow(IngressRule::all_from_group(K8S_WORKER_GROUP)),
                group(K8S_WORKER_GROUP, "SSH + k8s-node traffic", "worker-sg")
                    .allow(IngressRule::tcp_from_cidr(22, ANYWHERE))
                    .allow(IngressRule::all_from_group(K8S_CONTROLLER_GROUP)),
            ],
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

fn group(name: &str, description: &str, role: &str) -> SecurityGroupSpec {
    SecurityGroupSpec::new(name, description)
        .with_tag("Name", name)
        .with_tag("Project", PROJECT)
        .with_tag("Role", role)
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_cloud::RuleSource;

    fn references_group(rule: &IngressRule) -> bool {
        matches!(rule.source, RuleSource::Group(_))
    }

    #[test]
    fn test_every_role_has_a_declared_group() {
        for topology in [Topology::Mongo, Topology::TwoNode, Topology::ThreeNode] {
            let declared: Vec<String> = topology
                .security_groups()
                .into_iter()
                .map(|g| g.name)
                .collect();
            for role in topology.roles() {
                let group = topology.group_for_role(role).unwrap();
                assert!(declared.iter().any(|d| d == group), "{role} -> {group}");
            }
            assert_eq!(declared.len(), topology.group_names().len());
        }
    }

    #[test]
    fn test_group_references_stay_inside_topology() {
        for topology in [Topology::Mongo, Topology::TwoNode, Topology::ThreeNode] {
            let names = topology.group_names();
            for spec in topology.security_groups() {
                for rule in &spec.ingress {
                    if let RuleSource::Group(source) = &rule.source {
                        assert!(names.contains(&source.as_str()), "{source}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_three_node_policy() {
        let groups = Topology::ThreeNode.security_groups();
        let controller = groups.iter().find(|g| g.name == K8S_CONTROLLER_GROUP).unwrap();
        assert_eq!(controller.ingress.len(), 4);
        assert!(controller.ingress.iter().any(references_group));
        assert!(controller.tags.iter().any(|t| t.key == "Role" && t.value == "controller-sg"));

        let mongo = groups.iter().find(|g| g.name == K8S_MONGO_GROUP).unwrap();
        assert_eq!(
            mongo.ingress.iter().filter(|r| references_group(r)).count(),
            2
        );
    }

    #[test]
    fn test_instance_tags_and_volumes() {
        let tags = Topology::ThreeNode.instance_tags(WORKER_ROLE, "deploy-20250101000000");
        let keys: Vec<&str> = tags.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(keys, ["Name", "Project", "Role", "Deployment"]);
        assert!(Topology::ThreeNode.root_volume().is_some());
        assert!(Topology::TwoNode.root_volume().is_none());
        assert_eq!(Topology::TwoNode.fronting_role(), APP_ROLE);
    }

    #[test]
    fn test_mongo_shares_two_node_resources() {
        assert_eq!(Topology::Mongo.roles(), [MONGO_ROLE]);
        assert_eq!(
            Topology::Mongo.group_for_role(MONGO_ROLE),
            Topology::TwoNode.group_for_role(MONGO_ROLE)
        );
        assert_eq!(Topology::Mongo.lock_key(), Topology::TwoNode.lock_key());
        assert_ne!(Topology::ThreeNode.lock_key(), Topology::TwoNode.lock_key());
        assert_eq!(Topology::Mongo.fronting_role(), MONGO_ROLE);
    }
}
