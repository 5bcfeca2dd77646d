//! Destroy flows
//!
//! Teardown never stops at the first leftover: every step that fails adds a
//! warning to the [`Report`] and the next step runs. Only a missing lock or a
//! broken precondition ends the call with an error.

use crate::args::DestroyArgs;
use crate::deployment::release_lock;
use crate::error::Result;
use crate::orchestrator::KUBECONFIG_FILE;
use crate::runtime::Runtime;
use crate::topology::Topology;
use colored::Colorize;
use convoy_cloud::{CloudTeardown, DeploymentLock, NetworkPolicyManager, Provisioner, Report};
use convoy_tools::terraform::VAR_FILE;
use convoy_tools::{Helm, Kubectl, Terraform};
use std::path::Path;
use std::time::Instant;

/// Manifests applied by the cluster module, deleted from the infra dir when
/// present.
pub const CLUSTER_MANIFESTS: &[&str] = &[
    "redirect-to-https.yaml",
    "rocketchat-ingress-http.yaml",
    "rocketchat-ingress-https.yaml",
];

pub const TRAEFIK_CRDS: &[&str] = &[
    "https://raw.githubusercontent.com/traefik/traefik/v3.3/docs/content/reference/dynamic-configuration/kubernetes-crd-definition-v1.yml",
    "https://raw.githubusercontent.com/traefik/traefik/v3.3/docs/content/reference/dynamic-configuration/kubernetes-crd-rbac.yml",
];

/// Local state left by a three-node deploy, relative to the infra dir.
pub const STATE_ARTIFACTS: &[&str] = &[
    VAR_FILE,
    KUBECONFIG_FILE,
    ".terraform",
    ".terraform.lock.hcl",
    "terraform.tfstate",
    "terraform.tfstate.backup",
];

pub struct Deprovisioner<'a> {
    rt: &'a Runtime,
    provisioner: Provisioner,
    network: NetworkPolicyManager,
}

impl<'a> Deprovisioner<'a> {
    pub fn new(rt: &'a Runtime) -> Self {
        Self {
            rt,
            provisioner: Provisioner::new(
                rt.compute.clone(),
                rt.images.clone(),
                rt.tuning.provision,
            ),
            network: NetworkPolicyManager::new(rt.compute.clone()),
        }
    }

    pub async fn destroy(&self, topology: Topology, args: &DestroyArgs) -> Result<Report> {
        let start = Instant::now();
        let infra_dir = &self.rt.settings.infra_dir;
        let lock = DeploymentLock::acquire(infra_dir, topology.lock_key()).await?;
        tracing::info!(topology = %topology, "starting teardown");

        let mut report = Report::new();
        if topology == Topology::ThreeNode {
            self.release_cluster_software(infra_dir, &mut report).await;
            self.destroy_infra(infra_dir, &mut report).await;
        }

        let roles: Vec<String> = topology.roles().iter().map(|r| r.to_string()).collect();
        let groups: Vec<String> = topology
            .group_names()
            .iter()
            .map(|g| g.to_string())
            .collect();
        let cloud = CloudTeardown::new(&self.provisioner, &self.network, self.rt.tuning.teardown)
            .teardown(&roles, &groups)
            .await;
        report.merge(cloud);

        if topology == Topology::ThreeNode {
            if args.keep_state {
                report.add_success("local state".into(), "kept (--keep-state)".into());
            } else {
                self.remove_local_state(infra_dir, &mut report).await;
            }
        }

        if let Some(message) = release_lock(lock).await {
            report.add_warning("release deployment lock".into(), message);
        }
        report.duration_ms = start.elapsed().as_millis() as u64;
        print_report(topology, &report);
        Ok(report)
    }

    /// Helm releases, ingress manifests and Traefik CRDs. Skipped when no
    /// cluster credentials were ever fetched.
    async fn release_cluster_software(&self, infra_dir: &Path, report: &mut Report) {
        let kubeconfig = infra_dir.join(KUBECONFIG_FILE);
        if !kubeconfig.is_file() {
            report.add_success(
                "cluster cleanup".into(),
                format!("skipped: {} not found", kubeconfig.display()),
            );
            return;
        }

        let helm = Helm::new(self.rt.runner.clone(), &kubeconfig);
        let app_namespace = self.rt.settings.var_or("K8S_NAMESPACE", "rocketchat");
        for (release, namespace) in [("rocketchat", app_namespace.as_str()), ("traefik", "traefik")] {
            let step = format!("helm uninstall {}", release);
            match helm.uninstall(release, namespace).await {
                Ok(()) => report.add_success(step, format!("namespace {}", namespace)),
                Err(e) => report.add_warning(step, e.to_string()),
            }
        }

        let kubectl = Kubectl::new(self.rt.runner.clone(), &kubeconfig);
        let manifests = CLUSTER_MANIFESTS
            .iter()
            .map(|name| infra_dir.join(name))
            .filter(|path| path.is_file())
            .map(|path| path.display().to_string());
        let sources: Vec<String> = manifests
            .chain(TRAEFIK_CRDS.iter().map(|url| url.to_string()))
            .collect();
        for source in sources {
            let step = format!("kubectl delete {}", source);
            match kubectl.delete_manifest(&source).await {
                Ok(()) => report.add_success(step, "deleted".into()),
                Err(e) => report.add_warning(step, e.to_string()),
            }
        }
    }

    /// `terraform destroy`, when a deploy left its variables behind.
    async fn destroy_infra(&self, infra_dir: &Path, report: &mut Report) {
        if !infra_dir.join(VAR_FILE).is_file() {
            report.add_success(
                "terraform destroy".into(),
                format!("skipped: no {} in {}", VAR_FILE, infra_dir.display()),
            );
            return;
        }
        let terraform = Terraform::new(self.rt.runner.clone(), infra_dir)
            .with_env("KUBE_INSECURE_SKIP_TLS_VERIFY", "true");
        if let Err(e) = terraform.init().await {
            report.add_warning("terraform init".into(), e.to_string());
            return;
        }
        match terraform.destroy().await {
            Ok(()) => report.add_success("terraform destroy".into(), "infra destroyed".into()),
            Err(e) => report.add_warning("terraform destroy".into(), e.to_string()),
        }
    }

    async fn remove_local_state(&self, infra_dir: &Path, report: &mut Report) {
        let mut targets: Vec<_> = STATE_ARTIFACTS.iter().map(|n| infra_dir.join(n)).collect();
        if let Some(key) = self
            .rt
            .settings
            .ssh
            .private_key_path
            .as_deref()
            .and_then(Path::file_name)
        {
            targets.push(infra_dir.join(key));
        }

        let mut removed = 0;
        for path in targets {
            let result = if path.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else if path.exists() {
                tokio::fs::remove_file(&path).await
            } else {
                continue;
            };
            match result {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "removed");
                    removed += 1;
                }
                Err(e) => report.add_warning(format!("remove {}", path.display()), e.to_string()),
            }
        }
        report.add_success("local state".into(), format!("{} artifact(s) removed", removed));
    }
}

fn print_report(topology: Topology, report: &Report) {
    println!();
    for record in &report.succeeded {
        println!("{} {}: {}", "✓".green(), record.step, record.message.dimmed());
    }
    for record in &report.warnings {
        println!("{} {}: {}", "⚠".yellow().bold(), record.step, record.message.yellow());
    }
    if report.is_clean() {
        println!("{} {} destroyed", "✓".green().bold(), topology);
    } else {
        println!(
            "{} {} destroyed with {} warning(s)",
            "⚠".yellow().bold(),
            topology,
            report.warnings.len()
        );
    }
}
