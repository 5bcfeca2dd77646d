//! AWS provider for Convoy
//!
//! Implements the `convoy-cloud` provider traits on top of the official SDK:
//!
//! - [`Ec2Compute`]: instances, key pairs, VPC/subnets, security groups, ENIs
//! - [`UbuntuImages`]: newest Canonical Ubuntu AMI for an OS version
//! - [`Route53Dns`]: A-record upserts in the parent hosted zone

pub mod convert;
pub mod ec2;
pub mod error;
pub mod images;
pub mod route53;

pub use ec2::Ec2Compute;
pub use error::{AwsError, Result};
pub use images::UbuntuImages;
pub use route53::Route53Dns;

use aws_config::{BehaviorVersion, Region};
use aws_sdk_ec2::config::Credentials;
use convoy_config::AwsSettings;

/// Shared SDK configuration. Explicit keys from settings take precedence
/// over the default credential chain.
pub async fn load_sdk_config(settings: &AwsSettings) -> aws_config::SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(settings.region.clone()));

    if let (Some(access_key), Some(secret_key)) =
        (&settings.access_key_id, &settings.secret_access_key)
    {
        tracing::debug!("using AWS credentials from settings");
        loader = loader.credentials_provider(Credentials::new(
            access_key.clone(),
            secret_key.clone(),
            settings.session_token.clone(),
            None,
            "convoy-settings",
        ));
    }

    loader.load().await
}

/// All three AWS-backed providers sharing one SDK configuration.
pub struct AwsCloud {
    pub compute: Ec2Compute,
    pub images: UbuntuImages,
    pub dns: Route53Dns,
}

impl AwsCloud {
    pub async fn connect(settings: &AwsSettings) -> Self {
        let config = load_sdk_config(settings).await;
        let ec2 = aws_sdk_ec2::Client::new(&config);
        tracing::info!(region = %settings.region, "connected to AWS");
        Self {
            compute: Ec2Compute::new(ec2.clone()),
            images: UbuntuImages::new(ec2),
            dns: Route53Dns::new(aws_sdk_route53::Client::new(&config)),
        }
    }
}
