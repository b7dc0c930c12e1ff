//! NAT gateways and the private route tables behind them

use super::vpc::Network;
use super::{component, name_tag, resource};
use crate::provider::AwsKind;
use converge::{Declaration, NodePath, OutputRef, Value};

pub struct Gateways {
    /// Every node of the component, for dependants that wait on all of it
    pub resources: Vec<NodePath>,
}

pub fn declare(decl: &mut Declaration, name: &str, network: &Network) -> Gateways {
    let root = component(decl, "Nat", name);
    let mut resources = Vec::new();

    let mut gateway = |index: u8, subnet: &OutputRef| {
        let eip = decl.add(
            resource(AwsKind::Eip, root.child(format!("eip_nat_{index}")))
                .with_input("domain", "vpc")
                .with_input("tags", name_tag(format!("eip_nat_{index}"))),
        );
        let nat = decl.add(
            resource(AwsKind::NatGateway, root.child(format!("nat_{index}")))
                .with_input("allocation_id", eip.id())
                .with_input("subnet_id", subnet.clone())
                .with_input("tags", name_tag(format!("nat-{index}")))
                .with_dependency(network.internet_gateway.clone()),
        );
        (eip, nat)
    };
    let (eip1, nat1) = gateway(1, &network.pub_sub_nat1);
    let (eip2, nat2) = gateway(2, &network.pub_sub_nat2);
    resources.extend([eip1, nat1.clone(), eip2, nat2.clone()].map(|h| h.path().clone()));

    // Web subnets route through the first gateway, database subnets through the second
    let tiers = [
        (1, &nat1, [("priv_sub_web_1_rt", &network.priv_sub_web1), ("priv_sub_web_2_rt", &network.priv_sub_web2)]),
        (2, &nat2, [("priv_sub_db_1_rt", &network.priv_sub_db1), ("priv_sub_db_2_rt", &network.priv_sub_db2)]),
    ];
    for (index, nat, associations) in tiers {
        let table = decl.add(
            resource(AwsKind::RouteTable, root.child(format!("private_rt_{index}")))
                .with_input("vpc_id", network.vpc_id.clone())
                .with_input(
                    "routes",
                    Value::list([Value::map([
                        ("cidr_block", Value::from("0.0.0.0/0")),
                        ("nat_gateway_id", nat.id().into()),
                    ])]),
                )
                .with_input("tags", name_tag(format!("private_rt_{index}"))),
        );
        resources.push(table.path().clone());

        for (local, subnet) in associations {
            let association = decl.add(
                resource(AwsKind::RouteTableAssociation, root.child(local))
                    .with_input("subnet_id", subnet.clone())
                    .with_input("route_table_id", table.id()),
            );
            resources.push(association.path().clone());
        }
    }

    Gateways { resources }
}
