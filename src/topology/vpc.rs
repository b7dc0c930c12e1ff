//! Network: VPC, internet gateway, subnets and the public route table

use super::{component, name_tag, resource};
use crate::provider::AwsKind;
use converge::{Declaration, NodePath, OutputRef, Value};

pub struct VpcArgs<'a> {
    pub project: &'a str,
    pub region: &'a str,
    pub cidr: &'a str,
    pub pub_sub_nat1: &'a str,
    pub pub_sub_nat2: &'a str,
    pub priv_sub_web1: &'a str,
    pub priv_sub_web2: &'a str,
    pub priv_sub_db1: &'a str,
    pub priv_sub_db2: &'a str,
}

/// Outputs consumed by the other components
pub struct Network {
    pub vpc_id: OutputRef,
    /// Node of the internet gateway, for ordering-only dependencies
    pub internet_gateway: NodePath,
    pub pub_sub_nat1: OutputRef,
    pub pub_sub_nat2: OutputRef,
    pub priv_sub_web1: OutputRef,
    pub priv_sub_web2: OutputRef,
    pub priv_sub_db1: OutputRef,
    pub priv_sub_db2: OutputRef,
}

pub fn declare(decl: &mut Declaration, name: &str, args: &VpcArgs<'_>) -> Network {
    let root = component(decl, "Vpc", name);
    let zones = [format!("{}a", args.region), format!("{}b", args.region)];

    let vpc = decl.add(
        resource(AwsKind::Vpc, root.child("vpc"))
            .with_input("cidr_block", args.cidr)
            .with_input("instance_tenancy", "default")
            .with_input("enable_dns_hostnames", true)
            .with_input("enable_dns_support", true)
            .with_input("tags", name_tag(format!("{}-vpc", args.project))),
    );

    let igw = decl.add(
        resource(AwsKind::InternetGateway, root.child("internet_gateway"))
            .with_input("vpc_id", vpc.id())
            .with_input("tags", name_tag(format!("{}-igw", args.project))),
    );

    let mut subnet = |local: &str, cidr: &str, zone: &str, public: bool| {
        decl.add(
            resource(AwsKind::Subnet, root.child(local))
                .with_input("vpc_id", vpc.id())
                .with_input("cidr_block", cidr)
                .with_input("availability_zone", zone)
                .with_input("map_public_ip_on_launch", public)
                .with_input("tags", name_tag(local)),
        )
    };
    let pub1 = subnet("pub_sub_nat_1", args.pub_sub_nat1, &zones[0], true);
    let pub2 = subnet("pub_sub_nat_2", args.pub_sub_nat2, &zones[1], true);
    let web1 = subnet("priv_sub_web_1", args.priv_sub_web1, &zones[0], false);
    let web2 = subnet("priv_sub_web_2", args.priv_sub_web2, &zones[1], false);
    let db1 = subnet("priv_sub_db_1", args.priv_sub_db1, &zones[0], false);
    let db2 = subnet("priv_sub_db_2", args.priv_sub_db2, &zones[1], false);

    let public_rt = decl.add(
        resource(AwsKind::RouteTable, root.child("public_route_table"))
            .with_input("vpc_id", vpc.id())
            .with_input(
                "routes",
                Value::list([Value::map([
                    ("cidr_block", Value::from("0.0.0.0/0")),
                    ("gateway_id", igw.id().into()),
                ])]),
            )
            .with_input("tags", name_tag("public_route_table")),
    );

    for (local, subnet) in [("pb1a_rt_connection", &pub1), ("pb2b_rt_connection", &pub2)] {
        decl.add(
            resource(AwsKind::RouteTableAssociation, root.child(local))
                .with_input("subnet_id", subnet.id())
                .with_input("route_table_id", public_rt.id()),
        );
    }

    Network {
        vpc_id: vpc.id(),
        internet_gateway: igw.path().clone(),
        pub_sub_nat1: pub1.id(),
        pub_sub_nat2: pub2.id(),
        priv_sub_web1: web1.id(),
        priv_sub_web2: web2.id(),
        priv_sub_db1: db1.id(),
        priv_sub_db2: db2.id(),
    }
}
