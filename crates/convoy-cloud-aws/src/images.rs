//! Ubuntu AMI lookup
//!
//! Canonical publishes its images under one owner account with names like
//! `ubuntu/images/hvm-ssd/ubuntu-jammy-22.04-amd64-server-20240612`. Naming
//! drifted over the years, so several patterns are tried in order and the
//! newest image of the first pattern with any match wins.

use crate::convert;
use crate::error::sdk;
use async_trait::async_trait;
use aws_sdk_ec2::Client;
use convoy_cloud::{CloudError, ImageResolver, Result};

pub const CANONICAL_OWNER: &str = "099720109477";

const SUPPORTED: &[&str] = &["18.04", "20.04", "22.04"];

/// Release codename for an Ubuntu version.
pub fn codename(version: &str) -> Option<&'static str> {
    match version {
        "24.04" => Some("noble"),
        "22.04" => Some("jammy"),
        "20.04" => Some("focal"),
        "18.04" => Some("bionic"),
        "16.04" => Some("xenial"),
        _ => None,
    }
}

/// Version actually looked up. 24.04 is served by 22.04 images.
pub fn effective_version(requested: &str) -> Result<&'static str> {
    let requested = requested.trim();
    if requested == "24.04" {
        tracing::warn!("Ubuntu 24.04 images are not used yet, falling back to 22.04");
        return Ok("22.04");
    }
    SUPPORTED
        .iter()
        .find(|v| **v == requested)
        .copied()
        .ok_or_else(|| {
            CloudError::NoMatchingImage(format!(
                "unsupported Ubuntu version '{}' (supported: 18.04, 20.04, 22.04, 24.04)",
                requested
            ))
        })
}

pub fn name_patterns(version: &str, codename: &str) -> Vec<String> {
    vec![
        format!("ubuntu/images/hvm-ssd/ubuntu-{}-{}-*server-*", version, codename),
        format!("ubuntu/images/hvm-ssd/ubuntu-{}-{}-*server-*", codename, version),
        format!("ubuntu/images/hvm-ssd/ubuntu-{}-*amd64-server-*", version),
        format!("ubuntu/images/hvm-ssd/ubuntu-{}-*server-*", version),
        format!("*ubuntu*{}*server*", version),
    ]
}

#[derive(Clone)]
pub struct UbuntuImages {
    client: Client,
}

impl UbuntuImages {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn newest_matching(&self, pattern: &str) -> Result<Option<String>> {
        let output = self
            .client
            .describe_images()
            .owners(CANONICAL_OWNER)
            .filters(convert::filter("name", &[pattern]))
            .filters(convert::filter("state", &["available"]))
            .filters(convert::filter("architecture", &["x86_64"]))
            .filters(convert::filter("root-device-type", &["ebs"]))
            .send()
            .await
            .map_err(|e| sdk("describe_images", e))?;

        let candidates = output.images().iter().filter_map(|image| {
            Some((image.image_id()?, image.creation_date().unwrap_or_default()))
        });
        Ok(convert::newest_image(candidates).map(str::to_string))
    }
}

#[async_trait]
impl ImageResolver for UbuntuImages {
    async fn resolve(&self, os_version: &str) -> Result<String> {
        let version = effective_version(os_version)?;
        let code = codename(version).unwrap_or_default();

        for pattern in name_patterns(version, code) {
            if let Some(image_id) = self.newest_matching(&pattern).await? {
                tracing::info!(version, pattern = %pattern, image_id = %image_id, "resolved Ubuntu image");
                return Ok(image_id);
            }
            tracing::debug!(pattern = %pattern, "no image matched");
        }

        Err(CloudError::NoMatchingImage(format!(
            "no Ubuntu {} image found for owner {}",
            version, CANONICAL_OWNER
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_version() {
        assert_eq!(effective_version("22.04").unwrap(), "22.04");
        assert_eq!(effective_version("24.04").unwrap(), "22.04");
        assert_eq!(effective_version(" 18.04 ").unwrap(), "18.04");
        assert!(matches!(
            effective_version("16.04"),
            Err(CloudError::NoMatchingImage(_))
        ));
        assert!(effective_version("25.10").is_err());
    }

    #[test]
    fn test_name_patterns_order() {
        let patterns = name_patterns("22.04", codename("22.04").unwrap());
        assert_eq!(patterns.len(), 5);
        assert_eq!(patterns[0], "ubuntu/images/hvm-ssd/ubuntu-22.04-jammy-*server-*");
        assert_eq!(patterns[1], "ubuntu/images/hvm-ssd/ubuntu-jammy-22.04-*server-*");
        assert_eq!(patterns[4], "*ubuntu*22.04*server*");
    }

    #[test]
    fn test_codenames() {
        assert_eq!(codename("24.04"), Some("noble"));
        assert_eq!(codename("20.04"), Some("focal"));
        assert_eq!(codename("12.04"), None);
    }
}
