//! Route 53 DNS provider

use crate::convert;
use crate::error::{AwsError, sdk};
use async_trait::async_trait;
use aws_sdk_route53::Client;
use aws_sdk_route53::types::{
    Change, ChangeAction, ChangeBatch, ResourceRecord, ResourceRecordSet, RrType,
};
use convoy_cloud::{CloudError, DnsChange, DnsProvider, Result, parent_zone};

pub const RECORD_TTL: i64 = 60;

#[derive(Clone)]
pub struct Route53Dns {
    client: Client,
}

impl Route53Dns {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Id of the hosted zone named exactly `zone` (trailing dot included).
    async fn hosted_zone_id(&self, zone: &str) -> Result<String> {
        let output = self
            .client
            .list_hosted_zones_by_name()
            .dns_name(zone)
            .max_items(1)
            .send()
            .await
            .map_err(|e| sdk("list_hosted_zones_by_name", e))?;

        output
            .hosted_zones()
            .iter()
            .find(|z| z.name() == zone)
            .map(|z| convert::zone_id(z.id()).to_string())
            .ok_or_else(|| CloudError::NotFound(format!("hosted zone {}", zone)))
    }
}

fn build_error(err: impl std::fmt::Display) -> CloudError {
    AwsError::Build("change_resource_record_sets".to_string(), err.to_string()).into()
}

#[async_trait]
impl DnsProvider for Route53Dns {
    async fn upsert_a_record(&self, domain: &str, address: &str) -> Result<DnsChange> {
        let zone = parent_zone(domain)?;
        let zone_id = self.hosted_zone_id(&zone).await?;

        let record = ResourceRecordSet::builder()
            .name(domain)
            .r#type(RrType::A)
            .ttl(RECORD_TTL)
            .resource_records(ResourceRecord::builder().value(address).build().map_err(build_error)?)
            .build()
            .map_err(build_error)?;
        let batch = ChangeBatch::builder()
            .comment(format!("convoy: point {} at {}", domain, address))
            .changes(
                Change::builder()
                    .action(ChangeAction::Upsert)
                    .resource_record_set(record)
                    .build()
                    .map_err(build_error)?,
            )
            .build()
            .map_err(build_error)?;

        let output = self
            .client
            .change_resource_record_sets()
            .hosted_zone_id(&zone_id)
            .change_batch(batch)
            .send()
            .await
            .map_err(|e| sdk("change_resource_record_sets", e))?;

        let change = output
            .change_info()
            .map(|info| DnsChange {
                id: info.id().to_string(),
                status: info.status().as_str().to_string(),
            })
            .ok_or_else(|| AwsError::missing("change_resource_record_sets", "change info"))?;

        tracing::info!(domain, address, zone = %zone, change_id = %change.id, "upserted A record");
        Ok(change)
    }
}
