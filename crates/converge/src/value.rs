//! Input values, output references and secrets
//!
//! [`Value`] is the tagged union the graph builder walks to discover
//! implicit dependencies: every [`Value::Output`] found inside a node's
//! inputs is an edge from the producing node.

use crate::node::NodePath;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Attribute snapshot as stored in state and exchanged with providers
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Attribute every provider-created resource exposes
pub const ID_ATTRIBUTE: &str = "id";

/// Handle to an attribute produced by another node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputRef {
    producer: NodePath,
    attribute: String,
}

impl OutputRef {
    pub fn new(producer: NodePath, attribute: impl Into<String>) -> Self {
        Self {
            producer,
            attribute: attribute.into(),
        }
    }

    pub fn producer(&self) -> &NodePath {
        &self.producer
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.producer, self.attribute)
    }
}

/// Opaque secret handle
///
/// The plaintext is only reachable through [`Secret::expose`]; formatting
/// never prints it and state snapshots only keep its fingerprint.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Arc<str>);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Arc::from(value.into()))
    }

    /// Plaintext, for provider calls only
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Stable, non-reversible marker used in state snapshots
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new_derive_key("converge state snapshot secret v1");
        hasher.update(self.0.as_bytes());
        format!("secret:{}", &hasher.finalize().to_hex()[..32])
    }

    /// Swap every occurrence of the plaintext inside `value` for the
    /// fingerprint
    pub fn redact(&self, value: &mut serde_json::Value) {
        if self.0.is_empty() {
            return;
        }
        match value {
            serde_json::Value::String(s) if s.contains(&*self.0) => {
                *s = s.replace(&*self.0, &self.fingerprint());
            }
            serde_json::Value::Array(items) => items.iter_mut().for_each(|v| self.redact(v)),
            serde_json::Value::Object(entries) => {
                entries.values_mut().for_each(|v| self.redact(v));
            }
            _ => {}
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// How secrets are rendered when a value is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretMode {
    /// Plaintext (provider calls)
    Reveal,
    /// Fingerprint (state snapshots, diffs, display)
    Fingerprint,
}

/// An input property value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Secret(Secret),
    /// Pending reference to another node's attribute
    Output(OutputRef),
}

impl Value {
    /// Build a list value
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// Build a map value
    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Visit every output reference, depth first
    pub fn visit_refs<F: FnMut(&OutputRef)>(&self, f: &mut F) {
        match self {
            Self::Output(r) => f(r),
            Self::List(items) => items.iter().for_each(|v| v.visit_refs(f)),
            Self::Map(entries) => entries.values().for_each(|v| v.visit_refs(f)),
            _ => {}
        }
    }

    /// Every secret, depth first
    pub fn secrets(&self) -> Vec<&Secret> {
        match self {
            Self::Secret(secret) => vec![secret],
            Self::List(items) => items.iter().flat_map(Value::secrets).collect(),
            Self::Map(entries) => entries.values().flat_map(Value::secrets).collect(),
            _ => Vec::new(),
        }
    }

    /// Output references contained in this value
    pub fn output_refs(&self) -> Vec<OutputRef> {
        let mut refs = Vec::new();
        self.visit_refs(&mut |r| refs.push(r.clone()));
        refs
    }

    /// Whether any part of this value is still an unresolved reference
    pub fn is_pending(&self) -> bool {
        !self.output_refs().is_empty()
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Resolve into a plain JSON value
    ///
    /// `lookup` supplies the values of output references; the first
    /// reference it cannot resolve is returned as the error.
    pub fn resolve<F>(&self, lookup: &F, secrets: SecretMode) -> Result<serde_json::Value, OutputRef>
    where
        F: Fn(&OutputRef) -> Option<serde_json::Value>,
    {
        Ok(match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(x) => serde_json::Number::from_f64(*x)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|v| v.resolve(lookup, secrets))
                    .collect::<Result<_, _>>()?,
            ),
            Self::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| Ok::<_, OutputRef>((k.clone(), v.resolve(lookup, secrets)?)))
                    .collect::<Result<_, _>>()?,
            ),
            Self::Secret(secret) => serde_json::Value::String(match secrets {
                SecretMode::Reveal => secret.expose().to_string(),
                SecretMode::Fingerprint => secret.fingerprint(),
            }),
            Self::Output(r) => lookup(r).ok_or_else(|| r.clone())?,
        })
    }

    /// Resolve a value that contains no references
    pub fn to_literal(&self, secrets: SecretMode) -> Option<serde_json::Value> {
        self.resolve(&|_: &OutputRef| None, secrets).ok()
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Self::String(s.clone())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<u16> for Value {
    fn from(i: u16) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<OutputRef> for Value {
    fn from(r: OutputRef) -> Self {
        Self::Output(r)
    }
}

impl From<Secret> for Value {
    fn from(s: Secret) -> Self {
        Self::Secret(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Self::Map(entries)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}
