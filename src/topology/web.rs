//! Web tier: instance role, launch template, autoscaling group and its CPU policy

use super::security::Groups;
use super::vpc::Network;
use super::{component, resource};
use crate::provider::AwsKind;
use anyhow::{Result, bail};
use converge::{Declaration, NodePath, OutputRef, ResourceNode, Value};

const SSM_CORE_POLICY: &str = "arn:aws:iam::aws:policy/AmazonSSMManagedInstanceCore";

/// Autoscaling group bounds and the target-tracking CPU percentage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scaling {
    pub min_size: i64,
    pub max_size: i64,
    pub desired_capacity: i64,
    pub cpu_target: f64,
}

impl Scaling {
    /// Fill in unset values
    ///
    /// Desired capacity falls back to the minimum size, then 1. The minimum
    /// falls back to desired capacity and the maximum to the larger of the
    /// two. CPU target defaults to 50%.
    ///
    /// Only `None` counts as unset: an explicit `0` is kept as configured,
    /// so a stack can scale its web tier down to zero instances.
    pub fn resolve(
        min: Option<f64>,
        max: Option<f64>,
        desired: Option<f64>,
        cpu: Option<f64>,
    ) -> Result<Self> {
        let min = min.map(|v| whole("webMinSize", v)).transpose()?;
        let max = max.map(|v| whole("webMaxSize", v)).transpose()?;
        let desired = desired
            .map(|v| whole("webDesiredCapacity", v))
            .transpose()?;

        let desired_capacity = desired.or(min).unwrap_or(1);
        let min_size = min.unwrap_or(desired_capacity);
        let max_size = max.unwrap_or_else(|| min_size.max(desired_capacity));

        let cpu_target = cpu.unwrap_or(50.0);
        if cpu_target.is_nan() || cpu_target <= 0.0 || cpu_target > 100.0 {
            bail!("webCpuTarget must be within (0, 100], got {cpu_target}");
        }

        Ok(Self {
            min_size,
            max_size,
            desired_capacity,
            cpu_target,
        })
    }
}

#[allow(clippy::cast_possible_truncation)]
fn whole(key: &str, value: f64) -> Result<i64> {
    if value < 0.0 || value.fract() != 0.0 || !value.is_finite() {
        bail!("{key} must be a whole, non-negative number, got {value}");
    }
    Ok(value as i64)
}

pub struct WebArgs<'a> {
    pub project: &'a str,
    pub network: &'a Network,
    pub groups: &'a Groups,
    pub target_group_arn: OutputRef,
    pub instance_type: &'a str,
    pub key_name: &'a str,
    pub image_id: &'a str,
    /// Already base64-encoded
    pub user_data: &'a str,
    pub scaling: Scaling,
    /// Nodes every web resource waits for
    pub depends_on: Vec<NodePath>,
}

fn assume_role_policy() -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Action": ["sts:AssumeRole"],
            "Principal": { "Service": ["ec2.amazonaws.com"] },
        }],
    })
    .to_string()
}

pub fn declare(decl: &mut Declaration, name: &str, args: &WebArgs<'_>) {
    let root = component(decl, "Web", name);
    let project = args.project;
    let node = |kind: AwsKind, local: &str| -> ResourceNode {
        args.depends_on
            .iter()
            .fold(resource(kind, root.child(local)), |node, dep| {
                node.with_dependency(dep.clone())
            })
    };

    let role = decl.add(
        node(AwsKind::IamRole, "ssm_role")
            .with_input("name", format!("{project}-ssm-role"))
            .with_input("assume_role_policy", assume_role_policy()),
    );
    decl.add(
        node(AwsKind::RolePolicyAttachment, "ssm_core")
            .with_input("role", role.output("name"))
            .with_input("policy_arn", SSM_CORE_POLICY),
    );
    let profile = decl.add(
        node(AwsKind::InstanceProfile, "ssm_instance_profile")
            .with_input("name", format!("{project}-ssm-instance-profile"))
            .with_input("role", role.output("name")),
    );

    let template = decl.add(
        node(AwsKind::LaunchTemplate, "web")
            .with_input("name_prefix", format!("{project}-launch-template"))
            .with_input("image_id", args.image_id)
            .with_input("instance_type", args.instance_type)
            .with_input("key_name", args.key_name)
            .with_input(
                "vpc_security_group_ids",
                Value::list([args.groups.web.clone()]),
            )
            .with_input("user_data", args.user_data)
            .with_input(
                "iam_instance_profile",
                Value::map([("name", profile.output("name"))]),
            ),
    );

    let scaling = args.scaling;
    let asg = decl.add(
        node(AwsKind::AutoscalingGroup, "web_asg")
            .with_input("name_prefix", format!("{project}-asg"))
            .with_input("desired_capacity", scaling.desired_capacity)
            .with_input("min_size", scaling.min_size)
            .with_input("max_size", scaling.max_size)
            .with_input(
                "vpc_zone_identifiers",
                Value::list([
                    args.network.priv_sub_web1.clone(),
                    args.network.priv_sub_web2.clone(),
                ]),
            )
            .with_input(
                "target_group_arns",
                Value::list([args.target_group_arn.clone()]),
            )
            .with_input(
                "launch_template",
                Value::map([
                    ("id", template.id().into()),
                    ("version", Value::from("$Latest")),
                ]),
            )
            .with_input(
                "tags",
                Value::list([Value::map([
                    ("key", Value::from("Name")),
                    ("value", Value::from(format!("{project}-web"))),
                    ("propagate_at_launch", Value::from(true)),
                ])]),
            ),
    );

    decl.add(
        node(AwsKind::AutoscalingPolicy, "cpu_target")
            .with_input("name", format!("{project}-cpu-policy"))
            .with_input("autoscaling_group_name", asg.output("name"))
            .with_input("policy_type", "TargetTrackingScaling")
            .with_input(
                "target_tracking_configuration",
                Value::map([
                    (
                        "predefined_metric_specification",
                        Value::map([("predefined_metric_type", "ASGAverageCPUUtilization")]),
                    ),
                    ("target_value", Value::from(scaling.cpu_target)),
                ]),
            ),
    );
}
