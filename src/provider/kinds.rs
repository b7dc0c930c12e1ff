//! Resource kinds used by the three-tier topology and their schemas

use converge::KindSchema;
use std::fmt;

/// Every resource kind the topology declares
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AwsKind {
    Vpc,
    InternetGateway,
    Subnet,
    RouteTable,
    RouteTableAssociation,
    Eip,
    NatGateway,
    SecurityGroup,
    SecurityGroupIngressRule,
    SecurityGroupEgressRule,
    LoadBalancer,
    TargetGroup,
    Listener,
    IamRole,
    RolePolicyAttachment,
    InstanceProfile,
    LaunchTemplate,
    AutoscalingGroup,
    AutoscalingPolicy,
    DbSubnetGroup,
    DbInstance,
}

/// How the provider names a new resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    /// `<prefix>-<hex>`, like `vpc-0a1b2c...`
    Prefixed(&'static str),
    /// The ARN is the id
    Arn,
    /// The value of a required input property
    NameProperty(&'static str),
    /// An input prefix plus a generated suffix
    GeneratedName(&'static str),
}

impl AwsKind {
    pub const ALL: [Self; 21] = [
        Self::Vpc,
        Self::InternetGateway,
        Self::Subnet,
        Self::RouteTable,
        Self::RouteTableAssociation,
        Self::Eip,
        Self::NatGateway,
        Self::SecurityGroup,
        Self::SecurityGroupIngressRule,
        Self::SecurityGroupEgressRule,
        Self::LoadBalancer,
        Self::TargetGroup,
        Self::Listener,
        Self::IamRole,
        Self::RolePolicyAttachment,
        Self::InstanceProfile,
        Self::LaunchTemplate,
        Self::AutoscalingGroup,
        Self::AutoscalingPolicy,
        Self::DbSubnetGroup,
        Self::DbInstance,
    ];

    /// Type token recorded in state
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vpc => "aws:ec2/vpc:Vpc",
            Self::InternetGateway => "aws:ec2/internetGateway:InternetGateway",
            Self::Subnet => "aws:ec2/subnet:Subnet",
            Self::RouteTable => "aws:ec2/routeTable:RouteTable",
            Self::RouteTableAssociation => "aws:ec2/routeTableAssociation:RouteTableAssociation",
            Self::Eip => "aws:ec2/eip:Eip",
            Self::NatGateway => "aws:ec2/natGateway:NatGateway",
            Self::SecurityGroup => "aws:ec2/securityGroup:SecurityGroup",
            Self::SecurityGroupIngressRule => {
                "aws:vpc/securityGroupIngressRule:SecurityGroupIngressRule"
            }
            Self::SecurityGroupEgressRule => {
                "aws:vpc/securityGroupEgressRule:SecurityGroupEgressRule"
            }
            Self::LoadBalancer => "aws:lb/loadBalancer:LoadBalancer",
            Self::TargetGroup => "aws:lb/targetGroup:TargetGroup",
            Self::Listener => "aws:lb/listener:Listener",
            Self::IamRole => "aws:iam/role:Role",
            Self::RolePolicyAttachment => "aws:iam/rolePolicyAttachment:RolePolicyAttachment",
            Self::InstanceProfile => "aws:iam/instanceProfile:InstanceProfile",
            Self::LaunchTemplate => "aws:ec2/launchTemplate:LaunchTemplate",
            Self::AutoscalingGroup => "aws:autoscaling/group:Group",
            Self::AutoscalingPolicy => "aws:autoscaling/policy:Policy",
            Self::DbSubnetGroup => "aws:rds/subnetGroup:SubnetGroup",
            Self::DbInstance => "aws:rds/instance:Instance",
        }
    }

    /// ARN service and resource-type segment
    pub fn arn_parts(self) -> (&'static str, &'static str) {
        match self {
            Self::Vpc => ("ec2", "vpc"),
            Self::InternetGateway => ("ec2", "internet-gateway"),
            Self::Subnet => ("ec2", "subnet"),
            Self::RouteTable | Self::RouteTableAssociation => ("ec2", "route-table"),
            Self::Eip => ("ec2", "elastic-ip"),
            Self::NatGateway => ("ec2", "natgateway"),
            Self::SecurityGroup => ("ec2", "security-group"),
            Self::SecurityGroupIngressRule | Self::SecurityGroupEgressRule => {
                ("ec2", "security-group-rule")
            }
            Self::LoadBalancer => ("elasticloadbalancing", "loadbalancer/app"),
            Self::TargetGroup => ("elasticloadbalancing", "targetgroup"),
            Self::Listener => ("elasticloadbalancing", "listener/app"),
            Self::IamRole | Self::RolePolicyAttachment => ("iam", "role"),
            Self::InstanceProfile => ("iam", "instance-profile"),
            Self::LaunchTemplate => ("ec2", "launch-template"),
            Self::AutoscalingGroup => ("autoscaling", "autoScalingGroup"),
            Self::AutoscalingPolicy => ("autoscaling", "scalingPolicy"),
            Self::DbSubnetGroup => ("rds", "subgrp"),
            Self::DbInstance => ("rds", "db"),
        }
    }

    pub fn identity(self) -> Identity {
        match self {
            Self::Vpc => Identity::Prefixed("vpc"),
            Self::InternetGateway => Identity::Prefixed("igw"),
            Self::Subnet => Identity::Prefixed("subnet"),
            Self::RouteTable => Identity::Prefixed("rtb"),
            Self::RouteTableAssociation => Identity::Prefixed("rtbassoc"),
            Self::Eip => Identity::Prefixed("eipalloc"),
            Self::NatGateway => Identity::Prefixed("nat"),
            Self::SecurityGroup => Identity::Prefixed("sg"),
            Self::SecurityGroupIngressRule | Self::SecurityGroupEgressRule => {
                Identity::Prefixed("sgr")
            }
            Self::LoadBalancer | Self::TargetGroup | Self::Listener | Self::AutoscalingPolicy => {
                Identity::Arn
            }
            Self::IamRole | Self::InstanceProfile | Self::DbSubnetGroup => {
                Identity::NameProperty("name")
            }
            Self::RolePolicyAttachment => Identity::Prefixed("rpa"),
            Self::LaunchTemplate => Identity::Prefixed("lt"),
            Self::AutoscalingGroup => Identity::GeneratedName("name_prefix"),
            Self::DbInstance => Identity::NameProperty("identifier"),
        }
    }

    /// Property that must be unique among live resources of the kind
    pub fn unique_name(self) -> Option<&'static str> {
        match self {
            Self::SecurityGroup
            | Self::LoadBalancer
            | Self::TargetGroup
            | Self::IamRole
            | Self::InstanceProfile
            | Self::AutoscalingPolicy
            | Self::DbSubnetGroup => Some("name"),
            Self::DbInstance => Some("identifier"),
            _ => None,
        }
    }

    /// Inputs the provider accepts but never reports back
    pub fn write_only(self) -> &'static [&'static str] {
        match self {
            Self::DbInstance => &["password"],
            _ => &[],
        }
    }

    pub fn schema(self) -> KindSchema {
        let schema = KindSchema::new(self.as_str());
        match self {
            Self::Vpc => schema
                .replaces(&["cidr_block", "instance_tenancy"])
                .mutable(&["enable_dns_hostnames", "enable_dns_support", "tags"])
                .require(&["cidr_block"]),
            Self::InternetGateway => schema.mutable(&["vpc_id", "tags"]).require(&["vpc_id"]),
            Self::Subnet => schema
                .replaces(&["vpc_id", "cidr_block", "availability_zone"])
                .mutable(&["map_public_ip_on_launch", "tags"])
                .require(&["vpc_id", "cidr_block"]),
            Self::RouteTable => schema
                .replaces(&["vpc_id"])
                .mutable(&["routes", "tags"])
                .require(&["vpc_id"]),
            // A subnet holds one association at a time
            Self::RouteTableAssociation => schema
                .replaces(&["subnet_id"])
                .mutable(&["route_table_id"])
                .require(&["subnet_id", "route_table_id"])
                .delete_before_replace(),
            // Addresses count against a small quota; release before allocating
            Self::Eip => schema
                .replaces(&["domain"])
                .mutable(&["tags"])
                .delete_before_replace()
                .delete_before_create(),
            Self::NatGateway => schema
                .replaces(&["allocation_id", "subnet_id"])
                .mutable(&["tags"])
                .require(&["allocation_id", "subnet_id"]),
            Self::SecurityGroup => schema
                .replaces(&["name", "vpc_id", "description"])
                .mutable(&["tags"])
                .require(&["name", "vpc_id"])
                .delete_before_replace(),
            Self::SecurityGroupIngressRule | Self::SecurityGroupEgressRule => schema
                .replaces(&["security_group_id"])
                .mutable(&[
                    "from_port",
                    "to_port",
                    "ip_protocol",
                    "cidr_ipv4",
                    "referenced_security_group_id",
                    "description",
                ])
                .require(&["security_group_id", "ip_protocol"]),
            Self::LoadBalancer => schema
                .replaces(&["name", "internal", "load_balancer_type"])
                .mutable(&[
                    "security_groups",
                    "subnets",
                    "enable_deletion_protection",
                    "tags",
                ])
                .require(&["name", "subnets"])
                .delete_before_replace(),
            Self::TargetGroup => schema
                .replaces(&["name", "port", "protocol", "vpc_id"])
                .mutable(&["health_check", "tags"])
                .require(&["name", "port", "protocol", "vpc_id"])
                .delete_before_replace(),
            Self::Listener => schema
                .replaces(&["load_balancer_arn"])
                .mutable(&["port", "protocol", "default_actions"])
                .require(&["load_balancer_arn", "default_actions"]),
            Self::IamRole => schema
                .replaces(&["name"])
                .mutable(&["assume_role_policy", "tags"])
                .require(&["name", "assume_role_policy"])
                .delete_before_replace(),
            Self::RolePolicyAttachment => schema
                .replaces(&["role", "policy_arn"])
                .require(&["role", "policy_arn"]),
            Self::InstanceProfile => schema
                .replaces(&["name"])
                .mutable(&["role"])
                .require(&["name", "role"])
                .delete_before_replace(),
            Self::LaunchTemplate => schema
                .replaces(&["name_prefix"])
                .mutable(&[
                    "image_id",
                    "instance_type",
                    "key_name",
                    "vpc_security_group_ids",
                    "user_data",
                    "iam_instance_profile",
                ])
                .require(&["image_id", "instance_type"]),
            Self::AutoscalingGroup => schema
                .replaces(&["name_prefix"])
                .mutable(&[
                    "desired_capacity",
                    "min_size",
                    "max_size",
                    "vpc_zone_identifiers",
                    "target_group_arns",
                    "launch_template",
                    "tags",
                ])
                .require(&["min_size", "max_size", "launch_template"]),
            Self::AutoscalingPolicy => schema
                .replaces(&["name", "autoscaling_group_name", "policy_type"])
                .mutable(&["target_tracking_configuration"])
                .require(&["name", "autoscaling_group_name"])
                .delete_before_replace(),
            Self::DbSubnetGroup => schema
                .replaces(&["name"])
                .mutable(&["subnet_ids", "tags"])
                .require(&["name", "subnet_ids"])
                .delete_before_replace(),
            Self::DbInstance => schema
                .replaces(&["identifier", "engine", "username", "db_subnet_group_name"])
                .mutable(&[
                    "engine_version",
                    "instance_class",
                    "allocated_storage",
                    "password",
                    "vpc_security_group_ids",
                    "skip_final_snapshot",
                ])
                .require(&["identifier", "engine", "instance_class", "username", "password"])
                .delete_before_replace(),
        }
    }
}

impl fmt::Display for AwsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::{PropertyBehavior, ReplaceOrder};
    use std::collections::BTreeSet;

    #[test]
    fn test_type_tokens_are_distinct() {
        let tokens: BTreeSet<_> = AwsKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(tokens.len(), AwsKind::ALL.len());
        assert_eq!(AwsKind::Vpc.to_string(), "aws:ec2/vpc:Vpc");
    }

    #[test]
    fn test_schema_behaviors() {
        let subnet = AwsKind::Subnet.schema();
        assert_eq!(
            subnet.behavior_of("cidr_block"),
            PropertyBehavior::ForcesReplacement
        );
        assert_eq!(subnet.behavior_of("tags"), PropertyBehavior::Mutable);

        let asg = AwsKind::AutoscalingGroup.schema();
        assert_eq!(asg.behavior_of("desired_capacity"), PropertyBehavior::Mutable);
        assert_eq!(asg.replace_order(), ReplaceOrder::CreateBeforeDelete);
    }

    #[test]
    fn test_uniquely_named_kinds_delete_before_replace() {
        for kind in AwsKind::ALL {
            if let Some(name) = kind.unique_name() {
                let schema = kind.schema();
                assert_eq!(
                    schema.replace_order(),
                    ReplaceOrder::DeleteBeforeCreate,
                    "{kind}"
                );
                assert_eq!(
                    schema.behavior_of(name),
                    PropertyBehavior::ForcesReplacement,
                    "{kind}"
                );
            }
        }
    }

    #[test]
    fn test_write_only_properties_are_declared() {
        for kind in AwsKind::ALL {
            for property in kind.write_only() {
                assert!(kind.schema().declares(property));
            }
        }
    }

    #[test]
    fn test_only_addresses_delete_before_create() {
        let kinds: Vec<_> = AwsKind::ALL
            .into_iter()
            .filter(|k| k.schema().is_delete_before_create())
            .collect();
        assert_eq!(kinds, vec![AwsKind::Eip]);
    }
}
