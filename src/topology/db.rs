//! MySQL database tier in the private database subnets

use super::security::Groups;
use super::vpc::Network;
use super::{component, name_tag, resource};
use crate::provider::AwsKind;
use converge::{Declaration, OutputRef, Secret, Value};

pub struct DbArgs<'a> {
    pub project: &'a str,
    pub username: &'a str,
    pub password: Secret,
    pub network: &'a Network,
    pub groups: &'a Groups,
}

pub struct Database {
    pub endpoint: OutputRef,
}

pub fn declare(decl: &mut Declaration, name: &str, args: &DbArgs<'_>) -> Database {
    let root = component(decl, "Db", name);
    let project = args.project;

    let subnet_group = decl.add(
        resource(AwsKind::DbSubnetGroup, root.child("db_subnet_group"))
            .with_input("name", format!("{project}-db-subnet-group"))
            .with_input(
                "subnet_ids",
                Value::list([
                    args.network.priv_sub_db1.clone(),
                    args.network.priv_sub_db2.clone(),
                ]),
            )
            .with_input("tags", name_tag(format!("{project}-db-subnet-group"))),
    );

    let db = decl.add(
        resource(AwsKind::DbInstance, root.child("db"))
            .with_input("identifier", format!("{project}-db"))
            .with_input("engine", "mysql")
            .with_input("engine_version", "8.0")
            .with_input("instance_class", "db.t3.micro")
            .with_input("allocated_storage", 20)
            .with_input("username", args.username)
            .with_input("password", args.password.clone())
            .with_input("db_subnet_group_name", subnet_group.output("name"))
            .with_input("vpc_security_group_ids", Value::list([args.groups.db.clone()]))
            .with_input("skip_final_snapshot", true),
    );

    Database {
        endpoint: db.output("endpoint"),
    }
}
