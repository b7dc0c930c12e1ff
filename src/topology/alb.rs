//! Application load balancer in front of the web tier

use super::security::Groups;
use super::vpc::Network;
use super::{component, name_tag, resource};
use crate::provider::AwsKind;
use converge::{Declaration, OutputRef, Value};

pub struct Balancer {
    pub target_group_arn: OutputRef,
    pub dns_name: OutputRef,
    pub zone_id: OutputRef,
}

pub fn declare(
    decl: &mut Declaration,
    name: &str,
    project: &str,
    network: &Network,
    groups: &Groups,
) -> Balancer {
    let root = component(decl, "Alb", name);

    let alb = decl.add(
        resource(AwsKind::LoadBalancer, root.child("alb"))
            .with_input("name", format!("{project}-alb"))
            .with_input("internal", false)
            .with_input("load_balancer_type", "application")
            .with_input("security_groups", Value::list([groups.alb.clone()]))
            .with_input(
                "subnets",
                Value::list([network.pub_sub_nat1.clone(), network.pub_sub_nat2.clone()]),
            )
            .with_input("enable_deletion_protection", false)
            .with_input("tags", name_tag(format!("{project}-alb"))),
    );

    let health_check = Value::map([
        ("path", Value::from("/")),
        ("protocol", Value::from("HTTP")),
        ("matcher", Value::from("200-399")),
        ("interval", Value::from(30)),
        ("timeout", Value::from(5)),
        ("healthy_threshold", Value::from(5)),
        ("unhealthy_threshold", Value::from(2)),
    ]);
    let target = decl.add(
        resource(AwsKind::TargetGroup, root.child("alb_target"))
            .with_input("name", format!("{project}-tg"))
            .with_input("port", 80)
            .with_input("protocol", "HTTP")
            .with_input("vpc_id", network.vpc_id.clone())
            .with_input("health_check", health_check),
    );

    decl.add(
        resource(AwsKind::Listener, root.child("alb_listener"))
            .with_input("load_balancer_arn", alb.output("arn"))
            .with_input("port", 80)
            .with_input("protocol", "HTTP")
            .with_input(
                "default_actions",
                Value::list([Value::map([
                    ("type", Value::from("forward")),
                    ("target_group_arn", target.output("arn").into()),
                ])]),
            ),
    );

    Balancer {
        target_group_arn: target.output("arn"),
        dns_name: alb.output("dns_name"),
        zone_id: alb.output("zone_id"),
    }
}
