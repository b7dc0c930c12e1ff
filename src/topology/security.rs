//! Security groups for the three tiers and the rules between them

use super::vpc::Network;
use super::{component, resource};
use crate::provider::AwsKind;
use converge::{Declaration, NodePath, OutputRef, ResourceNode};

pub struct Groups {
    pub alb: OutputRef,
    pub web: OutputRef,
    pub db: OutputRef,
}

/// Where a rule lets traffic come from or go to
enum Peer<'a> {
    Anywhere,
    Group(&'a OutputRef),
}

struct Rule<'a> {
    local: &'static str,
    kind: AwsKind,
    group: &'a OutputRef,
    port: i64,
    protocol: &'static str,
    peer: Peer<'a>,
    description: &'static str,
}

impl Rule<'_> {
    fn node(&self, root: &NodePath) -> ResourceNode {
        let node = resource(self.kind, root.child(self.local))
            .with_input("security_group_id", self.group.clone())
            .with_input("from_port", self.port)
            .with_input("to_port", self.port)
            .with_input("ip_protocol", self.protocol)
            .with_input("description", self.description);
        match self.peer {
            Peer::Anywhere => node.with_input("cidr_ipv4", "0.0.0.0/0"),
            Peer::Group(group) => node.with_input("referenced_security_group_id", group.clone()),
        }
    }
}

pub fn declare(decl: &mut Declaration, name: &str, network: &Network) -> Groups {
    let root = component(decl, "SecGroup", name);

    let mut group = |local: &str, group_name: &str| {
        decl.add(
            resource(AwsKind::SecurityGroup, root.child(local))
                .with_input("name", group_name)
                .with_input("vpc_id", network.vpc_id.clone()),
        )
        .id()
    };
    let alb = group("alb_sec_group", "alb_security_group");
    let web = group("web_sec_group", "web_security_group");
    let db = group("db_sec_group", "db_security_group");

    let ingress = |local, group, port, peer, description| Rule {
        local,
        kind: AwsKind::SecurityGroupIngressRule,
        group,
        port,
        protocol: "tcp",
        peer,
        description,
    };
    // Port 0 with protocol -1 means every port
    let egress = |local, group, description| Rule {
        local,
        kind: AwsKind::SecurityGroupEgressRule,
        group,
        port: 0,
        protocol: "-1",
        peer: Peer::Anywhere,
        description,
    };

    let rules = [
        ingress("alb_http", &alb, 80, Peer::Anywhere, "Allow HTTP from Internet to ALB"),
        ingress("alb_https", &alb, 443, Peer::Anywhere, "Allow HTTPS from Internet to ALB"),
        ingress("web_http", &web, 80, Peer::Group(&alb), "Allow HTTP from ALB to Web Servers"),
        ingress("db_mysql", &db, 3306, Peer::Group(&web), "Allow MySQL from Web Servers to DB"),
        egress("alb_egress", &alb, "Allow all outbound from ALB"),
        egress("web_egress", &web, "Allow all outbound from Web Servers"),
        egress("db_egress", &db, "Allow all outbound from DB"),
    ];
    for rule in &rules {
        decl.add(rule.node(&root));
    }

    Groups { alb, web, db }
}
