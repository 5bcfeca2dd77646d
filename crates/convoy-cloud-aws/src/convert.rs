//! Conversions between SDK shapes and the engine's model

use aws_sdk_ec2::types::{
    BlockDeviceMapping, EbsBlockDevice, Filter, Instance, InstanceNetworkInterfaceSpecification,
    IpPermission, IpRange, ResourceType, SecurityGroup as SdkSecurityGroup, Tag as SdkTag,
    TagSpecification, UserIdGroupPair, VolumeType,
};
use convoy_cloud::{LaunchRequest, LifecycleState, ManagedResource, Permission, SecurityGroup, Tag};

pub fn filter(name: &str, values: &[&str]) -> Filter {
    values
        .iter()
        .fold(Filter::builder().name(name), |b, v| b.values(*v))
        .build()
}

pub fn sdk_tag(tag: &Tag) -> SdkTag {
    SdkTag::builder().key(&tag.key).value(&tag.value).build()
}

/// Instance view, or `None` when the response lacks an id or a known state.
pub fn managed_resource(role: &str, instance: &Instance) -> Option<ManagedResource> {
    let id = instance.instance_id()?;
    let state = instance
        .state()
        .and_then(|s| s.name())
        .and_then(|n| n.as_str().parse::<LifecycleState>().ok())?;
    Some(ManagedResource {
        role: role.to_string(),
        id: id.to_string(),
        state,
        public_address: instance.public_ip_address().map(str::to_string),
        private_address: instance.private_ip_address().map(str::to_string),
        key_name: instance.key_name().map(str::to_string),
    })
}

/// Value of the `Name` tag, used as the role of a described instance.
pub fn name_tag(instance: &Instance) -> Option<&str> {
    instance
        .tags()
        .iter()
        .find(|t| t.key() == Some("Name"))
        .and_then(|t| t.value())
}

pub fn permission(p: &IpPermission) -> Permission {
    Permission {
        protocol: p.ip_protocol().unwrap_or("-1").to_string(),
        from_port: p.from_port(),
        to_port: p.to_port(),
        cidr_blocks: p
            .ip_ranges()
            .iter()
            .filter_map(|r| r.cidr_ip().map(str::to_string))
            .collect(),
        group_ids: p
            .user_id_group_pairs()
            .iter()
            .filter_map(|g| g.group_id().map(str::to_string))
            .collect(),
    }
}

pub fn ip_permission(p: &Permission) -> IpPermission {
    let mut builder = IpPermission::builder().ip_protocol(&p.protocol);
    if p.protocol != "-1" {
        builder = builder.set_from_port(p.from_port).set_to_port(p.to_port);
    }
    for cidr in &p.cidr_blocks {
        builder = builder.ip_ranges(IpRange::builder().cidr_ip(cidr).build());
    }
    for group in &p.group_ids {
        builder = builder.user_id_group_pairs(UserIdGroupPair::builder().group_id(group).build());
    }
    builder.build()
}

pub fn security_group(g: &SdkSecurityGroup) -> Option<SecurityGroup> {
    Some(SecurityGroup {
        id: g.group_id()?.to_string(),
        name: g.group_name().unwrap_or_default().to_string(),
        vpc_id: g.vpc_id().map(str::to_string),
        ingress: g.ip_permissions().iter().map(permission).collect(),
        egress: g.ip_permissions_egress().iter().map(permission).collect(),
    })
}

/// Public address on device 0, root volume, tags on instance and volumes.
pub fn network_interface(request: &LaunchRequest) -> InstanceNetworkInterfaceSpecification {
    request
        .security_group_ids
        .iter()
        .fold(
            InstanceNetworkInterfaceSpecification::builder()
                .device_index(0)
                .subnet_id(&request.subnet_id)
                .associate_public_ip_address(true)
                .delete_on_termination(true),
            |b, g| b.groups(g),
        )
        .build()
}

pub fn block_device(request: &LaunchRequest) -> Option<BlockDeviceMapping> {
    let root = request.root_volume.as_ref()?;
    Some(
        BlockDeviceMapping::builder()
            .device_name(&root.device_name)
            .ebs(
                EbsBlockDevice::builder()
                    .volume_size(root.size_gib)
                    .volume_type(VolumeType::from(root.volume_type.as_str()))
                    .delete_on_termination(true)
                    .build(),
            )
            .build(),
    )
}

pub fn tag_specifications(tags: &[Tag]) -> Vec<TagSpecification> {
    [ResourceType::Instance, ResourceType::Volume]
        .into_iter()
        .map(|resource| {
            tags.iter()
                .fold(TagSpecification::builder().resource_type(resource), |b, t| {
                    b.tags(sdk_tag(t))
                })
                .build()
        })
        .collect()
}

/// Most recent image by `CreationDate`. ISO-8601 timestamps compare
/// lexically.
pub fn newest_image<'a>(images: impl IntoIterator<Item = (&'a str, &'a str)>) -> Option<&'a str> {
    images
        .into_iter()
        .max_by(|a, b| a.1.cmp(b.1))
        .map(|(id, _)| id)
}

/// `/hostedzone/Z123` -> `Z123`
pub fn zone_id(raw: &str) -> &str {
    raw.rsplit('/').next().unwrap_or(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_ec2::types::{InstanceState, InstanceStateName};
    use convoy_cloud::{IngressRule, RootVolume};
    use std::collections::BTreeMap;

    fn instance(state: InstanceStateName) -> Instance {
        Instance::builder()
            .instance_id("i-0abc")
            .state(InstanceState::builder().name(state).build())
            .public_ip_address("203.0.113.7")
            .private_ip_address("10.0.1.7")
            .key_name("convoy")
            .tags(SdkTag::builder().key("Project").value("convoy").build())
            .tags(SdkTag::builder().key("Name").value("convoy-mongo").build())
            .build()
    }

    #[test]
    fn test_managed_resource_from_instance() {
        let i = instance(InstanceStateName::Running);
        let r = managed_resource("convoy-mongo", &i).unwrap();
        assert_eq!(r.id, "i-0abc");
        assert_eq!(r.state, LifecycleState::Running);
        assert_eq!(r.public_address.as_deref(), Some("203.0.113.7"));
        assert_eq!(r.private_address.as_deref(), Some("10.0.1.7"));
        assert_eq!(name_tag(&i), Some("convoy-mongo"));

        let gone = instance(InstanceStateName::ShuttingDown);
        assert_eq!(
            managed_resource("x", &gone).unwrap().state,
            LifecycleState::ShuttingDown
        );
    }

    #[test]
    fn test_permission_conversion() {
        let mut ids = BTreeMap::new();
        ids.insert("convoy-app".to_string(), "sg-app".to_string());
        let p = IngressRule::tcp_from_group(27017, "convoy-app")
            .resolve(&ids)
            .unwrap();

        let sdk = ip_permission(&p);
        assert_eq!(sdk.ip_protocol(), Some("tcp"));
        assert_eq!(sdk.from_port(), Some(27017));
        assert_eq!(sdk.user_id_group_pairs()[0].group_id(), Some("sg-app"));
        assert_eq!(permission(&sdk), p);

        let all = IngressRule::all_from_group("convoy-app").resolve(&ids).unwrap();
        let sdk = ip_permission(&all);
        assert_eq!(sdk.ip_protocol(), Some("-1"));
        assert_eq!(sdk.from_port(), None);
    }

    #[test]
    fn test_launch_shapes() {
        let request = LaunchRequest {
            role: "convoy-app".into(),
            image_id: "ami-1".into(),
            instance_type: "t2.xlarge".into(),
            key_name: "convoy".into(),
            subnet_id: "subnet-1".into(),
            security_group_ids: vec!["sg-1".into(), "sg-2".into()],
            root_volume: Some(RootVolume::default()),
            tags: vec![Tag::new("Name", "convoy-app")],
            user_data: String::new(),
        };

        let eni = network_interface(&request);
        assert_eq!(eni.device_index(), Some(0));
        assert_eq!(eni.associate_public_ip_address(), Some(true));
        assert_eq!(eni.groups(), ["sg-1".to_string(), "sg-2".to_string()]);

        let disk = block_device(&request).unwrap();
        assert_eq!(disk.device_name(), Some("/dev/sda1"));
        let ebs = disk.ebs().unwrap();
        assert_eq!(ebs.volume_size(), Some(50));
        assert_eq!(ebs.volume_type(), Some(&VolumeType::Gp3));

        let specs = tag_specifications(&request.tags);
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1].resource_type(), Some(&ResourceType::Volume));
    }

    #[test]
    fn test_newest_image_and_zone_id() {
        let images = [
            ("ami-old", "2023-04-01T10:00:00.000Z"),
            ("ami-new", "2024-06-12T08:30:00.000Z"),
            ("ami-mid", "2024-01-20T00:00:00.000Z"),
        ];
        assert_eq!(newest_image(images), Some("ami-new"));
        assert_eq!(newest_image(Vec::new()), None);

        assert_eq!(zone_id("/hostedzone/Z0123ABC"), "Z0123ABC");
        assert_eq!(zone_id("Z0123ABC"), "Z0123ABC");
    }
}
