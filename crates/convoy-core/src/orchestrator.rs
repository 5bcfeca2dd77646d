//! Deploy flows
//!
//! Both topologies share the same front half: key pair, network, firewall
//! policy, then one instance per role. The two-node flow finishes by piping
//! bootstrap scripts over ssh; the three-node flow hands the addresses to
//! terraform and drives a staged apply with cluster checks in between.

use crate::args::{DeployArgs, DnsArgs};
use crate::deployment::{DeploymentRun, DeploymentSummary, deployment_name, release_lock};
use crate::error::{CoreError, Result};
use crate::progress::StepLogger;
use crate::runtime::Runtime;
use crate::tfvars::three_node_descriptor;
use crate::topology::{
    APP_ROLE, CONTROLLER_ROLE, MONGO_MASTER_ROLE, MONGO_ROLE, Topology, WORKER_ROLE,
};
use chrono::Utc;
use colored::Colorize;
use convoy_cloud::{
    DeploymentLock, DnsChange, InstanceSpec, NetworkPolicyManager, Provisioner, WaitConfig,
    tcp_reachable, wait_for, wait_for_port,
};
use convoy_config::SshKeys;
use convoy_tools::kubeconfig::{self, API_PORT};
use convoy_tools::terraform::VAR_FILE;
use convoy_tools::{
    Kubectl, RemoteScript, Ssh, StagePhase, StagePlan, StagedApplier, Terraform, ToolError,
};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const MONGO_BOOTSTRAP: &str = "mongodb_bootstrap.sh";
pub const APP_BOOTSTRAP: &str = "app_bootstrap.sh";
pub const KUBECONFIG_FILE: &str = "microk8s.config";

/// Exit code of the application bootstrap when its final HTTP probe fails
/// although the service is up.
const APP_BOOTSTRAP_BENIGN_EXIT: i32 = 22;

pub const INFRA_PHASE: &str = "infra";
pub const READY_PHASE: &str = "microk8s-ready";
pub const FULL_PHASE: &str = "full";

/// Infra first (instances, PV check, MicroK8s install), then the readiness
/// gate, then everything.
pub fn three_node_plan(retry_delay: Duration) -> StagePlan {
    StagePlan::new()
        .phase(
            StagePhase::new(INFRA_PHASE)
                .target(format!("aws_instance.{}", MONGO_MASTER_ROLE))
                .target(format!("aws_instance.{}", CONTROLLER_ROLE))
                .target(format!("aws_instance.{}", WORKER_ROLE))
                .target("module.rocketchat.null_resource.check_existing_pvs")
                .target("null_resource.microk8s_install")
                .attempts(2, retry_delay),
        )
        .phase(
            StagePhase::new(READY_PHASE)
                .target("null_resource.wait_for_microk8s_ready")
                .attempts(1, retry_delay),
        )
        .phase(StagePhase::new(FULL_PHASE).attempts(2, retry_delay))
}

fn phase<'p>(plan: &'p StagePlan, name: &str) -> Result<&'p StagePhase> {
    plan.get(name)
        .ok_or_else(|| ToolError::InvalidPlan(format!("missing phase '{}'", name)).into())
}

pub struct Orchestrator<'a> {
    rt: &'a Runtime,
    provisioner: Provisioner,
    network: NetworkPolicyManager,
}

impl<'a> Orchestrator<'a> {
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

    pub async fn deploy(&self, topology: Topology, args: &DeployArgs) -> Result<DeploymentSummary> {
        let settings = &self.rt.settings;
        let name = deployment_name(
            args.deployment_name.as_deref(),
            settings.deployment_name.as_deref(),
            Utc::now(),
        );
        tracing::info!(deployment = %name, topology = %topology, "starting deploy");
        println!("{} {} ({})", "▶ Deployment:".bold(), name.cyan(), topology);

        let lock = DeploymentLock::acquire(&settings.infra_dir, topology.lock_key()).await?;
        let mut log = StepLogger::new();

        let result = match topology {
            Topology::Mongo => self.deploy_mongo(&mut log, &name, args).await,
            Topology::TwoNode => self.deploy_two_node(&mut log, &name, args).await,
            Topology::ThreeNode => self.deploy_three_node(&mut log, &name, args).await,
        };
        if let Some(message) = release_lock(lock).await {
            log.start_step("release deployment lock");
            log.step_warning(&message);
        }
        log.print_summary(&format!("deploy {}", topology));

        let mut summary = result?;
        summary.warnings = log.warnings();
        Ok(summary)
    }

    /// Key pair, network, firewall policy and one running instance per role.
    async fn provision(
        &self,
        log: &mut StepLogger,
        topology: Topology,
        name: &str,
        args: &DeployArgs,
    ) -> Result<(DeploymentRun, SshKeys)> {
        let settings = &self.rt.settings;
        let keys = settings.require_ssh()?;
        let public_key = keys.read_public_key()?;

        log.track(
            format!("import key pair {}", keys.key_name),
            self.provisioner
                .ensure_key_pair(&keys.key_name, public_key.trim().as_bytes()),
        )
        .await?;

        let net = log.track("resolve network", self.network.resolve_network()).await?;
        log.log_detail(&format!("vpc {} / subnet {}", net.vpc_id, net.subnet_id));

        let policy = log
            .track(
                "converge network policy",
                self.network.converge(&net.vpc_id, &topology.security_groups()),
            )
            .await?;
        log.log_detail(&format!(
            "{} group(s), {} rule(s) added, {} already present",
            policy.group_ids.len(),
            policy.applied,
            policy.already_present
        ));

        let mut run = DeploymentRun::new(name, topology);
        for role in topology.roles() {
            let group = topology
                .group_for_role(role)
                .ok_or_else(|| CoreError::Precondition(format!("no group for role {}", role)))?;
            let spec = InstanceSpec {
                os_version: args
                    .os_version
                    .clone()
                    .unwrap_or_else(|| settings.default_os_version.clone()),
                instance_type: self.instance_type(topology, role, args),
                key_name: keys.key_name.clone(),
                subnet_id: net.subnet_id.clone(),
                security_group_ids: vec![policy.group_id(group)?.to_string()],
                root_volume: topology.root_volume(),
                tags: topology.instance_tags(role, name),
            };
            let resource = log
                .track(format!("ensure {}", role), self.provisioner.ensure(role, &spec))
                .await?;
            log.log_detail(&format!(
                "{} {} public {} private {}",
                role,
                resource.id,
                resource.public_address.as_deref().unwrap_or("-"),
                resource.private_address.as_deref().unwrap_or("-"),
            ));
            run.record(resource);
        }
        Ok((run, keys))
    }

    fn instance_type(&self, topology: Topology, role: &str, args: &DeployArgs) -> String {
        if let Some(explicit) = &args.instance_type {
            return explicit.clone();
        }
        let settings = &self.rt.settings;
        match (topology, role) {
            (Topology::ThreeNode, CONTROLLER_ROLE | WORKER_ROLE) => settings
                .kubernetes_instance_type
                .clone()
                .unwrap_or_else(|| settings.default_instance_type.clone()),
            _ => settings.default_instance_type.clone(),
        }
    }

    async fn deploy_mongo(
        &self,
        log: &mut StepLogger,
        name: &str,
        args: &DeployArgs,
    ) -> Result<DeploymentSummary> {
        let settings = &self.rt.settings;
        let script_path = settings.require_script(MONGO_BOOTSTRAP)?;
        let username = settings.require_var("MONGO_USERNAME")?.to_string();
        let password = settings.require_var("MONGO_PASSWORD")?.to_string();

        let (run, keys) = self.provision(log, Topology::Mongo, name, args).await?;
        let ssh = Ssh::new(self.rt.runner.clone(), keys.private_key_path.clone());
        let mongo = run.resource(MONGO_ROLE)?;
        self.bootstrap_mongo(log, &ssh, mongo.public_address()?, &script_path, &username, &password)
            .await?;

        let summary = run.summary();
        print_summary(&summary, &keys.private_key_path)?;
        Ok(summary)
    }

    async fn deploy_two_node(
        &self,
        log: &mut StepLogger,
        name: &str,
        args: &DeployArgs,
    ) -> Result<DeploymentSummary> {
        let settings = &self.rt.settings;
        let tuning = &self.rt.tuning;

        // Inputs first, so a missing variable fails before anything is launched.
        let mongo_script_path = settings.require_script(MONGO_BOOTSTRAP)?;
        let app_script_path = settings.require_script(APP_BOOTSTRAP)?;
        let username = settings.require_var("MONGO_USERNAME")?.to_string();
        let password = settings.require_var("MONGO_PASSWORD")?.to_string();
        let domain = settings.require_domain()?.to_string();
        let email = settings.require_letsencrypt_email()?.to_string();
        let mut app_vars = Vec::new();
        for key in ["RELEASE", "IMAGE", "TRAEFIK_RELEASE", "ROOT_URL"] {
            app_vars.push((key, settings.require_var(key)?.to_string()));
        }
        let mongo_port = settings.var_or("MONGO_PORT", "27017");
        let replset = settings.var_or("REPLSET_NAME", "rs0");

        let (run, keys) = self.provision(log, Topology::TwoNode, name, args).await?;
        let ssh = Ssh::new(self.rt.runner.clone(), keys.private_key_path.clone());

        let mongo = run.resource(MONGO_ROLE)?;
        self.bootstrap_mongo(
            log,
            &ssh,
            mongo.public_address()?,
            &mongo_script_path,
            &username,
            &password,
        )
        .await?;

        let app = run.resource(APP_ROLE)?;
        let app_host = app.public_address()?;
        log.track(
            format!("wait for port {} on {}", tuning.ssh_port, APP_ROLE),
            wait_for_port(app_host, tuning.ssh_port, tuning.port_reachable),
        )
        .await?;
        let mut app_script = RemoteScript::from_file(&app_script_path)
            .await?
            .export("MONGO_USERNAME", &username)
            .export("MONGO_PASSWORD", &password)
            .export("MONGO_HOST", mongo.private_address()?)
            .export("MONGO_PORT", &mongo_port)
            .export("REPLSET", &replset);
        for (key, value) in &app_vars {
            app_script = app_script.export(*key, value);
        }
        app_script = app_script
            .export("DOMAIN", &domain)
            .export("LETSENCRYPT_EMAIL", &email);
        let code = log
            .track(
                format!("bootstrap {}", APP_ROLE),
                self.bootstrap(&ssh, app_host, &app_script, &[APP_BOOTSTRAP_BENIGN_EXIT]),
            )
            .await?;
        if code == APP_BOOTSTRAP_BENIGN_EXIT {
            log.log_detail("bootstrap exited with 22; service reported up, continuing");
        }

        let mut summary = run.summary();
        if args.skip_dns {
            log.log_detail("DNS update skipped");
        } else {
            let change = log
                .track(format!("upsert DNS {}", domain), self.rt.dns.upsert_a_record(&domain, app_host))
                .await?;
            summary.dns = Some(change);
            if let Some(config) = tuning.dns_propagation {
                log.track_soft(
                    format!("wait for {} to resolve", domain),
                    wait_for_dns(&domain, app_host, config),
                )
                .await;
            }
        }

        print_summary(&summary, &keys.private_key_path)?;
        Ok(summary)
    }

    async fn deploy_three_node(
        &self,
        log: &mut StepLogger,
        name: &str,
        args: &DeployArgs,
    ) -> Result<DeploymentSummary> {
        let settings = &self.rt.settings;
        let tuning = &self.rt.tuning;
        let plan = three_node_plan(tuning.phase_retry_delay);
        plan.validate()?;

        let (run, keys) = self.provision(log, Topology::ThreeNode, name, args).await?;
        let controller = run.resource(CONTROLLER_ROLE)?;
        let worker = run.resource(WORKER_ROLE)?;
        let controller_host = controller.public_address()?;
        let worker_host = worker.public_address()?;

        let infra_dir = settings.infra_dir.clone();
        tokio::fs::create_dir_all(&infra_dir).await?;
        let key_copy = log
            .track("copy ssh key into infra dir", copy_private_key(&keys, &infra_dir))
            .await?;

        // Written only now: every role is running and addressed.
        let descriptor = three_node_descriptor(settings, &run, &keys.key_name, &key_copy)?;
        log.track(
            format!("write {}", VAR_FILE),
            descriptor.write(infra_dir.join(VAR_FILE)),
        )
        .await?;

        let ssh = Ssh::new(self.rt.runner.clone(), keys.private_key_path.clone());
        let public_key = keys.read_public_key()?;
        self.reinstall_key(log, &ssh, worker_host, &public_key, "pre-apply").await?;

        if tcp_reachable("127.0.0.1", API_PORT, Duration::from_secs(1)).await {
            log.log_detail(&format!("local listener on {} already present", API_PORT));
        } else {
            log.track_soft(
                format!("open tunnel to {} on {}", CONTROLLER_ROLE, API_PORT),
                ssh.open_tunnel(controller_host, API_PORT),
            )
            .await;
        }

        let terraform = Terraform::new(self.rt.runner.clone(), &infra_dir)
            .with_env("KUBE_INSECURE_SKIP_TLS_VERIFY", "true");
        let applier = StagedApplier::new(&terraform);
        log.track("terraform init", terraform.init()).await?;

        log.track(
            format!("apply phase {}", INFRA_PHASE),
            applier.run_phase(phase(&plan, INFRA_PHASE)?),
        )
        .await?;

        log.log_detail(&format!("letting MicroK8s settle for {:?}", tuning.settle));
        tokio::time::sleep(tuning.settle).await;

        let kubeconfig_path = infra_dir.join(KUBECONFIG_FILE);
        let patched = log
            .track(
                "fetch cluster credentials",
                kubeconfig::fetch_microk8s_config(
                    &ssh,
                    controller_host,
                    controller.private_address()?,
                    &kubeconfig_path,
                ),
            )
            .await?;
        if !patched {
            log.log_detail("cluster config already points at a reachable address");
        }

        log.track(
            format!("apply phase {}", READY_PHASE),
            applier.run_phase(phase(&plan, READY_PHASE)?),
        )
        .await?;

        let kubectl = Kubectl::new(self.rt.runner.clone(), &kubeconfig_path);
        log.track(
            "confirm cluster API",
            kubectl.wait_for_namespace("kube-system", tuning.api_health),
        )
        .await?;

        log.track(
            format!("apply phase {}", FULL_PHASE),
            applier.run_phase(phase(&plan, FULL_PHASE)?),
        )
        .await?;

        self.reinstall_key(log, &ssh, worker_host, &public_key, "post-apply").await?;

        let mut summary = run.summary();
        match (&settings.domain, args.skip_dns) {
            (Some(domain), false) => {
                let change = log
                    .track(
                        format!("upsert DNS {}", domain),
                        self.rt.dns.upsert_a_record(domain, controller_host),
                    )
                    .await?;
                summary.dns = Some(change);
            }
            (None, false) => log.log_detail("DOMAIN not set; DNS update skipped"),
            (_, true) => log.log_detail("DNS update skipped"),
        }

        print_summary(&summary, &keys.private_key_path)?;
        Ok(summary)
    }

    async fn reinstall_key(
        &self,
        log: &mut StepLogger,
        ssh: &Ssh,
        host: &str,
        public_key: &str,
        when: &str,
    ) -> Result<()> {
        log.track(
            format!("wait for ssh on {} ({})", WORKER_ROLE, when),
            ssh.wait_reachable(host, self.rt.tuning.ssh_login),
        )
        .await?;
        log.track(
            format!("reinstall public key on {} ({})", WORKER_ROLE, when),
            ssh.install_public_key(host, public_key),
        )
        .await
    }

    /// Wait for ssh on the database node, then pipe the bootstrap script in
    /// behind its exports.
    async fn bootstrap_mongo(
        &self,
        log: &mut StepLogger,
        ssh: &Ssh,
        host: &str,
        script_path: &Path,
        username: &str,
        password: &str,
    ) -> Result<()> {
        let settings = &self.rt.settings;
        let tuning = &self.rt.tuning;
        log.track(
            format!("wait for port {} on {}", tuning.ssh_port, MONGO_ROLE),
            wait_for_port(host, tuning.ssh_port, tuning.port_reachable),
        )
        .await?;
        let script = RemoteScript::from_file(script_path)
            .await?
            .export("MONGO_PORT", settings.var_or("MONGO_PORT", "27017"))
            .export("REPLSET_NAME", settings.var_or("REPLSET_NAME", "rs0"))
            .export("MONGO_USERNAME", username)
            .export("MONGO_PASSWORD", password);
        log.track(
            format!("bootstrap {}", MONGO_ROLE),
            self.bootstrap(ssh, host, &script, &[]),
        )
        .await?;
        Ok(())
    }

    /// Run a bootstrap script; exit 0 and any code in `tolerated` succeed.
    async fn bootstrap(
        &self,
        ssh: &Ssh,
        host: &str,
        script: &RemoteScript,
        tolerated: &[i32],
    ) -> Result<i32> {
        let code = ssh
            .run_script(host, script, self.rt.tuning.bootstrap_timeout)
            .await?;
        if code == 0 || tolerated.contains(&code) {
            tracing::info!(host, code, "bootstrap finished");
            Ok(code)
        } else {
            Err(ToolError::CommandFailed {
                command: format!("bootstrap on {}", host),
                code: Some(code),
                stderr: "remote script failed; see output above".to_string(),
            }
            .into())
        }
    }

    /// Point `DOMAIN` at the public address of a running role.
    pub async fn update_dns(&self, args: &DnsArgs) -> Result<DnsChange> {
        let domain = self.rt.settings.require_domain()?;
        let role = args.role.as_deref().unwrap_or(APP_ROLE);

        let resource = self
            .provisioner
            .locator()
            .find(role)
            .await?
            .filter(|r| r.state == convoy_cloud::LifecycleState::Running)
            .ok_or_else(|| {
                CoreError::Precondition(format!("no running instance tagged '{}'", role))
            })?;
        let address = resource.public_address()?;
        tracing::info!(role, instance_id = %resource.id, address, "updating DNS");

        let change = self.rt.dns.upsert_a_record(domain, address).await?;
        println!(
            "{} {} → {} (change {} {})",
            "✓".green().bold(),
            domain,
            address,
            change.id,
            change.status
        );
        Ok(change)
    }
}

async fn copy_private_key(keys: &SshKeys, infra_dir: &Path) -> Result<PathBuf> {
    let file_name = keys.private_key_path.file_name().ok_or_else(|| {
        CoreError::Precondition(format!(
            "SSH_KEY_PATH {} has no file name",
            keys.private_key_path.display()
        ))
    })?;
    let dest = infra_dir.join(file_name);
    tokio::fs::copy(&keys.private_key_path, &dest).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&dest, std::fs::Permissions::from_mode(0o600)).await?;
    }
    let dest = tokio::fs::canonicalize(&dest).await?;
    tracing::info!(path = %dest.display(), "copied ssh key");
    Ok(dest)
}

/// Poll name resolution until `domain` resolves to `address`.
async fn wait_for_dns(domain: &str, address: &str, config: WaitConfig) -> Result<()> {
    let expected: IpAddr = address
        .parse()
        .map_err(|_| CoreError::Precondition(format!("'{}' is not an IP address", address)))?;
    let what = format!("{} to resolve to {}", domain, address);
    wait_for(&what, config, || async move {
        match tokio::net::lookup_host((domain, 0)).await {
            Ok(mut addrs) => addrs.any(|a| a.ip() == expected),
            Err(_) => false,
        }
    })
    .await?;
    Ok(())
}

fn print_summary(summary: &DeploymentSummary, key_path: &Path) -> Result<()> {
    println!();
    println!("{}", summary.to_json()?);
    if let Some(hint) = summary.ssh_hint(key_path) {
        println!();
        println!("SSH into {}:", summary.topology.fronting_role());
        println!("  {}", hint);
    }
    Ok(())
}
