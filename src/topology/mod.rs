//! The three-tier topology
//!
//! Components are declared leaf-first: network, NAT, security groups, load
//! balancer, then the web and database tiers that consume their outputs.
//! Every component is a subtree of the declaration's component tree.

mod alb;
mod db;
mod nat;
mod security;
mod vpc;
mod web;

pub use web::Scaling;

use crate::config::StackConfig;
use crate::provider::AwsKind;
use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use converge::{Declaration, NodePath, ResourceNode, Secret, Value};
use std::fs;

/// Component type labels shown in the resource tree
pub const COMPONENT_PREFIX: &str = "tierstack:index";

/// Installed on every web instance unless `webUserDataFile` is set
const DEFAULT_USER_DATA: &str = "#!/bin/bash
yum update -y
amazon-linux-extras install -y nginx1
systemctl enable --now nginx
";

/// Everything the topology reads from `[config]`
#[derive(Debug, Clone)]
pub struct TopologyInputs {
    pub project: String,
    pub region: String,
    pub vpc_cidr: String,
    pub pub_sub_nat1: String,
    pub pub_sub_nat2: String,
    pub priv_sub_web1: String,
    pub priv_sub_web2: String,
    pub priv_sub_db1: String,
    pub priv_sub_db2: String,
    pub db_username: String,
    pub db_password: Secret,
    pub web_instance_type: String,
    pub key_name: String,
    pub web_image_id: String,
    /// Base64-encoded instance user data
    pub user_data: String,
    pub scaling: Scaling,
}

impl TopologyInputs {
    pub fn from_config(config: &StackConfig) -> Result<Self> {
        let region = config.require_str("awsRegion")?.to_string();
        let user_data = match config.get_str("webUserDataFile")? {
            Some(file) => {
                let path = crate::paths::expand(file);
                fs::read(&path)
                    .with_context(|| format!("Could not read user data {}", path.display()))?
            }
            None => DEFAULT_USER_DATA.as_bytes().to_vec(),
        };
        let web_image_id = match config.get_str("webImageId")? {
            Some(image) => image.to_string(),
            None => amazon_linux_image(&region),
        };

        // Stack-level defaults: min 2, max 4, desired = min, CPU 50
        let min = config.get_f64("webMinSize")?.unwrap_or(2.0);
        let max = config.get_f64("webMaxSize")?.unwrap_or(4.0);
        let desired = config.get_f64("webDesiredCapacity")?.unwrap_or(min);
        let cpu = config.get_f64("webCpuTarget")?.unwrap_or(50.0);
        let scaling = Scaling::resolve(Some(min), Some(max), Some(desired), Some(cpu))?;

        Ok(Self {
            project: config.require_str("projectName")?.to_string(),
            vpc_cidr: config.require_str("vpcCidr")?.to_string(),
            pub_sub_nat1: config.require_str("pubSubNat1")?.to_string(),
            pub_sub_nat2: config.require_str("pubSubNat2")?.to_string(),
            priv_sub_web1: config.require_str("privSubWeb1")?.to_string(),
            priv_sub_web2: config.require_str("privSubWeb2")?.to_string(),
            priv_sub_db1: config.require_str("privSubDb1")?.to_string(),
            priv_sub_db2: config.require_str("privSubDb2")?.to_string(),
            db_username: config.require_str("dbUsername")?.to_string(),
            db_password: config.require_secret("dbPassword")?,
            web_instance_type: config.require_str("webInstanceType")?.to_string(),
            key_name: config.require_str("keyName")?.to_string(),
            user_data: STANDARD.encode(user_data),
            web_image_id,
            scaling,
            region,
        })
    }
}

/// Declare the whole topology with its `albDns`, `albZoneId` and `dbEndpoint` exports
pub fn declare(inputs: &TopologyInputs) -> Declaration {
    let mut decl = Declaration::new();

    let network = vpc::declare(
        &mut decl,
        "vpc",
        &vpc::VpcArgs {
            project: &inputs.project,
            region: &inputs.region,
            cidr: &inputs.vpc_cidr,
            pub_sub_nat1: &inputs.pub_sub_nat1,
            pub_sub_nat2: &inputs.pub_sub_nat2,
            priv_sub_web1: &inputs.priv_sub_web1,
            priv_sub_web2: &inputs.priv_sub_web2,
            priv_sub_db1: &inputs.priv_sub_db1,
            priv_sub_db2: &inputs.priv_sub_db2,
        },
    );
    let gateways = nat::declare(&mut decl, "nat", &network);
    let groups = security::declare(&mut decl, "secGroup", &network);
    let balancer = alb::declare(&mut decl, "alb", &inputs.project, &network, &groups);
    web::declare(
        &mut decl,
        "web",
        &web::WebArgs {
            project: &inputs.project,
            network: &network,
            groups: &groups,
            target_group_arn: balancer.target_group_arn.clone(),
            instance_type: &inputs.web_instance_type,
            key_name: &inputs.key_name,
            image_id: &inputs.web_image_id,
            user_data: &inputs.user_data,
            scaling: inputs.scaling,
            depends_on: gateways.resources.clone(),
        },
    );
    let database = db::declare(
        &mut decl,
        "db",
        &db::DbArgs {
            project: &inputs.project,
            username: &inputs.db_username,
            password: inputs.db_password.clone(),
            network: &network,
            groups: &groups,
        },
    );

    decl.export("albDns", balancer.dns_name);
    decl.export("albZoneId", balancer.zone_id);
    decl.export("dbEndpoint", database.endpoint);
    decl
}

/// Register a component subtree and return its root path
fn component(decl: &mut Declaration, component_type: &str, name: &str) -> NodePath {
    decl.component(format!("{COMPONENT_PREFIX}:{component_type}"), NodePath::root(name))
}

fn resource(kind: AwsKind, path: NodePath) -> ResourceNode {
    ResourceNode::new(kind.as_str(), path)
}

fn name_tag(name: impl Into<String>) -> Value {
    Value::map([("Name", Value::String(name.into()))])
}

/// Stand-in for the most recent Amazon Linux 2 image lookup
fn amazon_linux_image(region: &str) -> String {
    let hash = blake3::hash(format!("amzn2-ami-hvm-x86_64-gp2/{region}").as_bytes());
    format!("ami-{}", &hash.to_hex()[..17])
}
