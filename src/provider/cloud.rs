//! Deterministic in-process cloud
//!
//! Resources live in an inventory keyed by id, persisted as JSON beside
//! the state snapshot so separate CLI runs see the same cloud. Ids and
//! computed attributes (ARNs, DNS names, endpoints) are derived from a
//! BLAKE3 hash of the stack, the node path and a serial number.

use super::kinds::{AwsKind, Identity};
use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use converge::{Attributes, CallContext, Created, NodePath, ProviderError};
use serde::{Deserialize, Serialize};
use serde_json::{Value as Json, json};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Account id used in every ARN
pub const ACCOUNT_ID: &str = "000000000000";

/// Provider setting: delay every call by this many milliseconds
pub const LATENCY_SETTING: &str = "simulated_latency_ms";

/// Provider setting: every n-th call fails with a throttling error
pub const THROTTLE_SETTING: &str = "simulated_throttle_every";

const ELB_ZONE_ID: &str = "Z35SXDOTRQ7X7K";
const MYSQL_PORT: u16 = 3306;

/// One resource as the cloud sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudResource {
    pub kind: String,
    /// Node that created it
    pub path: NodePath,
    pub attributes: Attributes,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Inventory {
    #[serde(default)]
    serial: u64,
    #[serde(default)]
    resources: BTreeMap<String, CloudResource>,
}

/// The simulated cloud shared by every kind's provider
#[derive(Debug, Default)]
pub struct SimulatedCloud {
    file: Option<PathBuf>,
    inventory: Mutex<Inventory>,
    calls: AtomicU64,
}

impl SimulatedCloud {
    /// A cloud that forgets everything when dropped
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the inventory at `path`, creating it on first write
    pub fn open(path: &Path) -> Result<Self> {
        let inventory = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read cloud inventory {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse cloud inventory {}", path.display()))?
        } else {
            Inventory::default()
        };
        Ok(Self {
            file: Some(path.to_path_buf()),
            inventory: Mutex::new(inventory),
            calls: AtomicU64::new(0),
        })
    }

    /// Snapshot of every live resource, by id
    pub fn resources(&self) -> BTreeMap<String, CloudResource> {
        self.lock().resources.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().resources.is_empty()
    }

    /// Change a live resource behind the engine's back
    #[cfg(test)]
    pub fn tamper(&self, id: &str, attribute: &str, value: Json) -> Result<(), ProviderError> {
        self.mutate(|inventory| {
            let resource = inventory
                .resources
                .get_mut(id)
                .ok_or_else(|| ProviderError::NotFound { id: id.to_string() })?;
            resource.attributes.insert(attribute.to_string(), value);
            Ok(())
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inventory> {
        match self.inventory.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Apply `change` to a copy of the inventory and keep it only once saved
    fn mutate<T, F>(&self, change: F) -> Result<T, ProviderError>
    where
        F: FnOnce(&mut Inventory) -> Result<T, ProviderError>,
    {
        let mut inventory = self.lock();
        let mut draft = inventory.clone();
        let out = change(&mut draft)?;
        self.save(&draft)?;
        *inventory = draft;
        Ok(out)
    }

    fn save(&self, inventory: &Inventory) -> Result<(), ProviderError> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let persist = || -> std::io::Result<()> {
            if let Some(dir) = file.parent() {
                fs::create_dir_all(dir)?;
            }
            let content = serde_json::to_string_pretty(inventory)?;
            let tmp = file.with_extension("json.tmp");
            fs::write(&tmp, content)?;
            fs::rename(&tmp, file)
        };
        persist().map_err(|e| {
            ProviderError::permanent(format!(
                "failed to persist cloud inventory {}: {e}",
                file.display()
            ))
        })
    }

    /// Latency, throttling and cancellation common to every call
    fn begin(&self, ctx: &CallContext<'_>) -> Result<(), ProviderError> {
        if ctx.cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        let latency = setting_u64(ctx, LATENCY_SETTING);
        if latency > 0 && !ctx.cancel.sleep(Duration::from_millis(latency)) {
            return Err(ProviderError::Cancelled);
        }
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        let every = setting_u64(ctx, THROTTLE_SETTING);
        if every > 0 && call % every == 0 {
            return Err(ProviderError::transient("Throttling: Rate exceeded"));
        }
        Ok(())
    }

    pub fn create(
        &self,
        kind: AwsKind,
        ctx: &CallContext<'_>,
        inputs: &Attributes,
    ) -> Result<Created, ProviderError> {
        self.begin(ctx)?;
        validate(kind, inputs)?;

        self.mutate(|inventory| {
            if let Some(property) = kind.unique_name() {
                let name = inputs.get(property);
                let taken = inventory.resources.values().any(|r| {
                    r.kind == kind.as_str() && name.is_some() && r.attributes.get(property) == name
                });
                if taken {
                    return Err(ProviderError::permanent(format!(
                        "{kind} with {property} {} already exists",
                        name.map_or_else(String::new, ToString::to_string)
                    )));
                }
            }

            inventory.serial += 1;
            let id = new_id(kind, ctx, inputs, inventory.serial)?;
            if inventory.resources.contains_key(&id) {
                return Err(ProviderError::permanent(format!("{kind} {id} already exists")));
            }
            let attributes = computed(kind, ctx, &id, inputs, None);
            inventory.resources.insert(
                id.clone(),
                CloudResource {
                    kind: kind.as_str().to_string(),
                    path: ctx.path.clone(),
                    attributes: attributes.clone(),
                    created_at: Utc::now(),
                },
            );
            log::debug!("Simulated create {kind} {id} for {}", ctx.path);
            Ok(Created { id, attributes })
        })
    }

    pub fn read(
        &self,
        kind: AwsKind,
        ctx: &CallContext<'_>,
        id: &str,
    ) -> Result<Attributes, ProviderError> {
        self.begin(ctx)?;
        self.lock()
            .resources
            .get(id)
            .filter(|r| r.kind == kind.as_str())
            .map(|r| r.attributes.clone())
            .ok_or_else(|| ProviderError::NotFound { id: id.to_string() })
    }

    pub fn update(
        &self,
        kind: AwsKind,
        ctx: &CallContext<'_>,
        id: &str,
        inputs: &Attributes,
    ) -> Result<Attributes, ProviderError> {
        self.begin(ctx)?;
        validate(kind, inputs)?;

        self.mutate(|inventory| {
            let resource = inventory
                .resources
                .get_mut(id)
                .filter(|r| r.kind == kind.as_str())
                .ok_or_else(|| ProviderError::NotFound { id: id.to_string() })?;
            resource.attributes = computed(kind, ctx, id, inputs, Some(&resource.attributes));
            log::debug!("Simulated update {kind} {id}");
            Ok(resource.attributes.clone())
        })
    }

    pub fn delete(&self, kind: AwsKind, ctx: &CallContext<'_>, id: &str) -> Result<(), ProviderError> {
        self.begin(ctx)?;
        self.mutate(|inventory| {
            match inventory.resources.get(id) {
                Some(r) if r.kind == kind.as_str() => {}
                _ => return Err(ProviderError::NotFound { id: id.to_string() }),
            }
            inventory.resources.remove(id);
            log::debug!("Simulated delete {kind} {id}");
            Ok(())
        })
    }
}

fn setting_u64(ctx: &CallContext<'_>, key: &str) -> u64 {
    ctx.config
        .setting(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn str_input<'i>(inputs: &'i Attributes, key: &str) -> Option<&'i str> {
    inputs.get(key).and_then(Json::as_str)
}

fn hex(seed: &str, len: usize) -> String {
    let hash = blake3::hash(seed.as_bytes()).to_hex();
    hash[..len.min(hash.len())].to_string()
}

/// Checks a real provider would make before accepting the request
fn validate(kind: AwsKind, inputs: &Attributes) -> Result<(), ProviderError> {
    if kind == AwsKind::AutoscalingGroup {
        let size = |key| inputs.get(key).and_then(Json::as_f64);
        if let (Some(min), Some(max)) = (size("min_size"), size("max_size")) {
            let desired = size("desired_capacity").unwrap_or(min);
            if min > max || desired < min || desired > max {
                return Err(ProviderError::permanent(format!(
                    "ValidationError: desired capacity {desired} must lie within [{min}, {max}]"
                )));
            }
        }
    }
    if let Identity::NameProperty(property) = kind.identity() {
        if str_input(inputs, property).is_none_or(str::is_empty) {
            return Err(ProviderError::permanent(format!(
                "{kind} requires a non-empty `{property}`"
            )));
        }
    }
    Ok(())
}

fn new_id(
    kind: AwsKind,
    ctx: &CallContext<'_>,
    inputs: &Attributes,
    serial: u64,
) -> Result<String, ProviderError> {
    let seed = format!("{}/{}/{}/{serial}", ctx.config.project, ctx.config.stack, ctx.path);
    let id = match kind.identity() {
        Identity::Prefixed(prefix) => format!("{prefix}-{}", hex(&seed, 17)),
        Identity::Arn => {
            let (service, resource) = kind.arn_parts();
            let name = str_input(inputs, "name").unwrap_or_else(|| ctx.path.name());
            format!(
                "arn:aws:{service}:{}:{ACCOUNT_ID}:{resource}/{name}/{}",
                ctx.config.region,
                hex(&seed, 16)
            )
        }
        Identity::NameProperty(property) => str_input(inputs, property)
            .map(str::to_string)
            .ok_or_else(|| {
                ProviderError::permanent(format!("{kind} requires a string `{property}`"))
            })?,
        Identity::GeneratedName(property) => {
            let prefix = str_input(inputs, property).unwrap_or("tierstack-");
            format!("{prefix}{}", hex(&seed, 26))
        }
    };
    Ok(id)
}

fn arn(kind: AwsKind, region: &str, id: &str) -> String {
    if kind.identity() == Identity::Arn {
        return id.to_string();
    }
    let (service, resource) = kind.arn_parts();
    let region = if service == "iam" { "" } else { region };
    format!("arn:aws:{service}:{region}:{ACCOUNT_ID}:{resource}/{id}")
}

/// Attributes reported for a resource with `inputs`
fn computed(
    kind: AwsKind,
    ctx: &CallContext<'_>,
    id: &str,
    inputs: &Attributes,
    previous: Option<&Attributes>,
) -> Attributes {
    let region = ctx.config.region.as_str();
    let mut attributes: Attributes = inputs
        .iter()
        .filter(|(name, _)| !kind.write_only().contains(&name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    attributes.insert("arn".into(), json!(arn(kind, region, id)));

    match kind {
        AwsKind::LoadBalancer => {
            let name = str_input(inputs, "name").unwrap_or("lb");
            attributes.insert(
                "dns_name".into(),
                json!(format!("{name}-{}.{region}.elb.amazonaws.com", hex(id, 10))),
            );
            attributes.insert("zone_id".into(), json!(ELB_ZONE_ID));
        }
        AwsKind::Eip => {
            let octet = u8::from_str_radix(&hex(id, 2), 16).unwrap_or(0) % 254 + 1;
            attributes.insert("public_ip".into(), json!(format!("198.51.100.{octet}")));
            attributes.insert("allocation_id".into(), json!(id));
        }
        AwsKind::AutoscalingGroup => {
            attributes.insert("name".into(), json!(id));
        }
        AwsKind::LaunchTemplate => {
            let version = previous
                .and_then(|p| p.get("latest_version"))
                .and_then(Json::as_u64)
                .map_or(1, |v| v + 1);
            attributes.insert("latest_version".into(), json!(version));
        }
        AwsKind::DbInstance => {
            let address = format!("{id}.c{}.{region}.rds.amazonaws.com", hex(id, 11));
            attributes.insert("endpoint".into(), json!(format!("{address}:{MYSQL_PORT}")));
            attributes.insert("address".into(), json!(address));
            attributes.insert("port".into(), json!(MYSQL_PORT));
        }
        _ => {}
    }
    attributes
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::{CancelToken, ProviderContext};
    use tempfile::TempDir;

    fn context() -> ProviderContext {
        ProviderContext::new("shop", "dev", "eu-central-1")
    }

    fn call<'a>(
        config: &'a ProviderContext,
        path: &'a NodePath,
        cancel: &'a CancelToken,
    ) -> CallContext<'a> {
        CallContext {
            config,
            path,
            cancel,
            attempt: 1,
        }
    }

    fn inputs(pairs: &[(&str, Json)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_create_assigns_prefixed_ids_and_arns() {
        let cloud = SimulatedCloud::in_memory();
        let config = context();
        let path: NodePath = "vpc/vpc".parse().unwrap();
        let cancel = CancelToken::new();
        let ctx = call(&config, &path, &cancel);

        let created = cloud
            .create(AwsKind::Vpc, &ctx, &inputs(&[("cidr_block", json!("10.0.0.0/16"))]))
            .unwrap();
        assert!(created.id.starts_with("vpc-"));
        assert_eq!(created.id.len(), "vpc-".len() + 17);
        assert_eq!(
            created.attributes["arn"],
            json!(format!("arn:aws:ec2:eu-central-1:{ACCOUNT_ID}:vpc/{}", created.id))
        );
        assert_eq!(created.attributes["cidr_block"], json!("10.0.0.0/16"));
        assert_eq!(cloud.read(AwsKind::Vpc, &ctx, &created.id).unwrap(), created.attributes);
    }

    #[test]
    fn test_load_balancer_reports_dns_name() {
        let cloud = SimulatedCloud::in_memory();
        let config = context();
        let path: NodePath = "alb/alb".parse().unwrap();
        let cancel = CancelToken::new();
        let ctx = call(&config, &path, &cancel);

        let created = cloud
            .create(
                AwsKind::LoadBalancer,
                &ctx,
                &inputs(&[("name", json!("shop-alb")), ("subnets", json!(["a", "b"]))]),
            )
            .unwrap();
        assert!(created.id.starts_with("arn:aws:elasticloadbalancing:eu-central-1:"));
        let dns = created.attributes["dns_name"].as_str().unwrap();
        assert!(dns.starts_with("shop-alb-"));
        assert!(dns.ends_with(".eu-central-1.elb.amazonaws.com"));
    }

    #[test]
    fn test_unique_names_are_enforced() {
        let cloud = SimulatedCloud::in_memory();
        let config = context();
        let cancel = CancelToken::new();
        let a: NodePath = "sg/a".parse().unwrap();
        let b: NodePath = "sg/b".parse().unwrap();
        let group = inputs(&[("name", json!("web")), ("vpc_id", json!("vpc-1"))]);

        cloud
            .create(AwsKind::SecurityGroup, &call(&config, &a, &cancel), &group)
            .unwrap();
        let err = cloud
            .create(AwsKind::SecurityGroup, &call(&config, &b, &cancel), &group)
            .unwrap_err();
        assert!(matches!(err, ProviderError::Permanent { .. }));
    }

    #[test]
    fn test_password_is_never_reported() {
        let cloud = SimulatedCloud::in_memory();
        let config = context();
        let path: NodePath = "db/db".parse().unwrap();
        let cancel = CancelToken::new();
        let created = cloud
            .create(
                AwsKind::DbInstance,
                &call(&config, &path, &cancel),
                &inputs(&[
                    ("identifier", json!("shop-db")),
                    ("password", json!("hunter2")),
                ]),
            )
            .unwrap();
        assert_eq!(created.id, "shop-db");
        assert!(!created.attributes.contains_key("password"));
        let endpoint = created.attributes["endpoint"].as_str().unwrap();
        assert!(endpoint.starts_with("shop-db."));
        assert!(endpoint.ends_with(":3306"));
        assert!(!format!("{:?}", cloud.resources()).contains("hunter2"));
    }

    #[test]
    fn test_launch_template_versions_on_update() {
        let cloud = SimulatedCloud::in_memory();
        let config = context();
        let path: NodePath = "web/lt".parse().unwrap();
        let cancel = CancelToken::new();
        let ctx = call(&config, &path, &cancel);
        let created = cloud
            .create(
                AwsKind::LaunchTemplate,
                &ctx,
                &inputs(&[("instance_type", json!("t3.micro"))]),
            )
            .unwrap();
        assert_eq!(created.attributes["latest_version"], json!(1));

        let updated = cloud
            .update(
                AwsKind::LaunchTemplate,
                &ctx,
                &created.id,
                &inputs(&[("instance_type", json!("t3.small"))]),
            )
            .unwrap();
        assert_eq!(updated["latest_version"], json!(2));
        assert_eq!(updated["instance_type"], json!("t3.small"));
    }

    #[test]
    fn test_autoscaling_bounds_validated() {
        let cloud = SimulatedCloud::in_memory();
        let config = context();
        let path: NodePath = "web/asg".parse().unwrap();
        let cancel = CancelToken::new();
        let err = cloud
            .create(
                AwsKind::AutoscalingGroup,
                &call(&config, &path, &cancel),
                &inputs(&[
                    ("min_size", json!(3)),
                    ("max_size", json!(2)),
                    ("launch_template", json!({"id": "lt-1"})),
                ]),
            )
            .unwrap_err();
        assert!(err.to_string().contains("ValidationError"));
    }

    #[test]
    fn test_delete_and_kind_mismatch() {
        let cloud = SimulatedCloud::in_memory();
        let config = context();
        let path: NodePath = "nat/eip".parse().unwrap();
        let cancel = CancelToken::new();
        let ctx = call(&config, &path, &cancel);
        let created = cloud.create(AwsKind::Eip, &ctx, &Attributes::new()).unwrap();

        assert!(matches!(
            cloud.delete(AwsKind::Vpc, &ctx, &created.id),
            Err(ProviderError::NotFound { .. })
        ));
        cloud.delete(AwsKind::Eip, &ctx, &created.id).unwrap();
        assert!(matches!(
            cloud.delete(AwsKind::Eip, &ctx, &created.id),
            Err(ProviderError::NotFound { .. })
        ));
        assert!(cloud.is_empty());
    }

    #[test]
    fn test_throttling_and_cancellation() {
        let cloud = SimulatedCloud::in_memory();
        let config = context().with_setting(THROTTLE_SETTING, "2");
        let path: NodePath = "vpc/igw".parse().unwrap();
        let cancel = CancelToken::new();
        let ctx = call(&config, &path, &cancel);
        let gateway = inputs(&[("vpc_id", json!("vpc-1"))]);

        cloud.create(AwsKind::InternetGateway, &ctx, &gateway).unwrap();
        let err = cloud
            .create(AwsKind::InternetGateway, &ctx, &gateway)
            .unwrap_err();
        assert!(err.is_retryable());

        cancel.cancel();
        assert_eq!(
            cloud.create(AwsKind::InternetGateway, &ctx, &gateway),
            Err(ProviderError::Cancelled)
        );
    }

    #[test]
    fn test_inventory_persists() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("dev.cloud.json");
        let config = context();
        let path: NodePath = "vpc/vpc".parse().unwrap();
        let cancel = CancelToken::new();

        let id = {
            let cloud = SimulatedCloud::open(&file).unwrap();
            cloud
                .create(
                    AwsKind::Vpc,
                    &call(&config, &path, &cancel),
                    &inputs(&[("cidr_block", json!("10.0.0.0/16"))]),
                )
                .unwrap()
                .id
        };

        let reopened = SimulatedCloud::open(&file).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.resources()[&id].path, path);
    }
}
