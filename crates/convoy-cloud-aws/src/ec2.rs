//! EC2 compute provider

use crate::convert;
use crate::error::{AwsError, sdk};
use async_trait::async_trait;
use aws_sdk_ec2::Client;
use aws_sdk_ec2::primitives::Blob;
use aws_sdk_ec2::types::InstanceType;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use convoy_cloud::{
    ComputeProvider, LaunchRequest, LifecycleState, ManagedResource, Permission,
    Result, SecurityGroup, Tag,
};

#[derive(Clone)]
pub struct Ec2Compute {
    client: Client,
}

impl Ec2Compute {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ComputeProvider for Ec2Compute {
    fn name(&self) -> &str {
        "aws-ec2"
    }

    async fn find_instances(
        &self,
        role: &str,
        states: &[LifecycleState],
    ) -> Result<Vec<ManagedResource>> {
        let state_names: Vec<&str> = states.iter().map(|s| s.as_str()).collect();
        let output = self
            .client
            .describe_instances()
            .filters(convert::filter("tag:Name", &[role]))
            .filters(convert::filter("instance-state-name", &state_names))
            .send()
            .await
            .map_err(|e| sdk("describe_instances", e))?;

        Ok(output
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .filter_map(|i| convert::managed_resource(role, i))
            .collect())
    }

    async fn describe_instance(&self, id: &str) -> Result<Option<ManagedResource>> {
        let output = match self.client.describe_instances().instance_ids(id).send().await {
            Ok(output) => output,
            Err(e) => {
                let err = sdk("describe_instances", e);
                return if err.is_not_found() { Ok(None) } else { Err(err) };
            }
        };

        Ok(output
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .find_map(|i| {
                let role = convert::name_tag(i).unwrap_or_default();
                convert::managed_resource(role, i)
            }))
    }

    async fn run_instance(&self, request: &LaunchRequest) -> Result<String> {
        let mut call = self
            .client
            .run_instances()
            .image_id(&request.image_id)
            .instance_type(InstanceType::from(request.instance_type.as_str()))
            .key_name(&request.key_name)
            .min_count(1)
            .max_count(1)
            .network_interfaces(convert::network_interface(request))
            .set_tag_specifications(Some(convert::tag_specifications(&request.tags)))
            .user_data(STANDARD.encode(request.user_data.as_bytes()));
        if let Some(mapping) = convert::block_device(request) {
            call = call.block_device_mappings(mapping);
        }

        let output = call.send().await.map_err(|e| sdk("run_instances", e))?;
        let id = output
            .instances()
            .first()
            .and_then(|i| i.instance_id())
            .ok_or_else(|| AwsError::missing("run_instances", "instance id"))?;

        tracing::info!(role = %request.role, instance_id = id, "launched instance");
        Ok(id.to_string())
    }

    async fn start_instances(&self, ids: &[String]) -> Result<()> {
        self.client
            .start_instances()
            .set_instance_ids(Some(ids.to_vec()))
            .send()
            .await
            .map_err(|e| sdk("start_instances", e))?;
        Ok(())
    }

    async fn stop_instances(&self, ids: &[String]) -> Result<()> {
        self.client
            .stop_instances()
            .set_instance_ids(Some(ids.to_vec()))
            .send()
            .await
            .map_err(|e| sdk("stop_instances", e))?;
        Ok(())
    }

    async fn terminate_instances(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.client
            .terminate_instances()
            .set_instance_ids(Some(ids.to_vec()))
            .send()
            .await
            .map_err(|e| sdk("terminate_instances", e))?;
        Ok(())
    }

    async fn key_pair_exists(&self, name: &str) -> Result<bool> {
        match self.client.describe_key_pairs().key_names(name).send().await {
            Ok(output) => Ok(!output.key_pairs().is_empty()),
            Err(e) => {
                let err = sdk("describe_key_pairs", e);
                if err.is_not_found() { Ok(false) } else { Err(err) }
            }
        }
    }

    async fn import_key_pair(&self, name: &str, public_key: &[u8]) -> Result<()> {
        self.client
            .import_key_pair()
            .key_name(name)
            .public_key_material(Blob::new(public_key))
            .send()
            .await
            .map_err(|e| sdk("import_key_pair", e))?;
        Ok(())
    }

    async fn default_vpc(&self) -> Result<Option<String>> {
        let output = self
            .client
            .describe_vpcs()
            .filters(convert::filter("isDefault", &["true"]))
            .send()
            .await
            .map_err(|e| sdk("describe_vpcs", e))?;
        Ok(output
            .vpcs()
            .first()
            .and_then(|v| v.vpc_id())
            .map(str::to_string))
    }

    async fn subnets(&self, vpc_id: &str) -> Result<Vec<String>> {
        let output = self
            .client
            .describe_subnets()
            .filters(convert::filter("vpc-id", &[vpc_id]))
            .send()
            .await
            .map_err(|e| sdk("describe_subnets", e))?;
        Ok(output
            .subnets()
            .iter()
            .filter_map(|s| s.subnet_id().map(str::to_string))
            .collect())
    }

    async fn find_security_group(
        &self,
        name: &str,
        vpc_id: Option<&str>,
    ) -> Result<Option<SecurityGroup>> {
        let mut call = self
            .client
            .describe_security_groups()
            .filters(convert::filter("group-name", &[name]));
        if let Some(vpc) = vpc_id {
            call = call.filters(convert::filter("vpc-id", &[vpc]));
        }

        let output = match call.send().await {
            Ok(output) => output,
            Err(e) => {
                let err = sdk("describe_security_groups", e);
                return if err.is_not_found() { Ok(None) } else { Err(err) };
            }
        };
        Ok(output
            .security_groups()
            .iter()
            .find_map(convert::security_group))
    }

    async fn create_security_group(
        &self,
        name: &str,
        description: &str,
        vpc_id: &str,
    ) -> Result<String> {
        let output = self
            .client
            .create_security_group()
            .group_name(name)
            .description(description)
            .vpc_id(vpc_id)
            .send()
            .await
            .map_err(|e| sdk("create_security_group", e))?;
        output
            .group_id()
            .map(str::to_string)
            .ok_or_else(|| AwsError::missing("create_security_group", "group id").into())
    }

    async fn tag_resource(&self, id: &str, tags: &[Tag]) -> Result<()> {
        self.client
            .create_tags()
            .resources(id)
            .set_tags(Some(tags.iter().map(convert::sdk_tag).collect()))
            .send()
            .await
            .map_err(|e| sdk("create_tags", e))?;
        Ok(())
    }

    async fn authorize_ingress(&self, group_id: &str, permission: &Permission) -> Result<()> {
        self.client
            .authorize_security_group_ingress()
            .group_id(group_id)
            .ip_permissions(convert::ip_permission(permission))
            .send()
            .await
            .map_err(|e| sdk("authorize_security_group_ingress", e))?;
        Ok(())
    }

    async fn revoke_ingress(&self, group_id: &str, permissions: &[Permission]) -> Result<()> {
        if permissions.is_empty() {
            return Ok(());
        }
        self.client
            .revoke_security_group_ingress()
            .group_id(group_id)
            .set_ip_permissions(Some(permissions.iter().map(convert::ip_permission).collect()))
            .send()
            .await
            .map_err(|e| sdk("revoke_security_group_ingress", e))?;
        Ok(())
    }

    async fn revoke_egress(&self, group_id: &str, permissions: &[Permission]) -> Result<()> {
        if permissions.is_empty() {
            return Ok(());
        }
        self.client
            .revoke_security_group_egress()
            .group_id(group_id)
            .set_ip_permissions(Some(permissions.iter().map(convert::ip_permission).collect()))
            .send()
            .await
            .map_err(|e| sdk("revoke_security_group_egress", e))?;
        Ok(())
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<()> {
        self.client
            .delete_security_group()
            .group_id(group_id)
            .send()
            .await
            .map_err(|e| sdk("delete_security_group", e))?;
        Ok(())
    }

    async fn network_interfaces(&self, group_id: &str) -> Result<Vec<String>> {
        let output = self
            .client
            .describe_network_interfaces()
            .filters(convert::filter("group-id", &[group_id]))
            .send()
            .await
            .map_err(|e| sdk("describe_network_interfaces", e))?;
        Ok(output
            .network_interfaces()
            .iter()
            .filter_map(|n| n.network_interface_id().map(str::to_string))
            .collect())
    }
}

