//! Per-kind resource schemas
//!
//! A schema tells the planner which properties a kind accepts, which are
//! required, and whether changing a property can be done in place or forces
//! the resource to be replaced.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What changing a property does to the resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyBehavior {
    /// Provider can update the property in place
    Mutable,
    /// Provider must destroy and recreate the resource
    ForcesReplacement,
}

/// Order of the two halves of a replacement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplaceOrder {
    /// Create the new resource, then delete the old one
    CreateBeforeDelete,
    /// Delete the old resource, then create the new one
    DeleteBeforeCreate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PropertySchema {
    behavior: PropertyBehavior,
    required: bool,
}

/// Schema and capability flags for one resource kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindSchema {
    kind: String,
    properties: BTreeMap<String, PropertySchema>,
    create_before_replace: bool,
    delete_before_create: bool,
}

impl KindSchema {
    /// An empty schema; kinds replace create-before-delete by default
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            properties: BTreeMap::new(),
            create_before_replace: true,
            delete_before_create: false,
        }
    }

    /// Declare properties that can be updated in place
    pub fn mutable(mut self, names: &[&str]) -> Self {
        for name in names {
            self.declare(name, PropertyBehavior::Mutable);
        }
        self
    }

    /// Declare properties whose change forces a replacement
    pub fn replaces(mut self, names: &[&str]) -> Self {
        for name in names {
            self.declare(name, PropertyBehavior::ForcesReplacement);
        }
        self
    }

    /// Mark already-declared properties as required
    pub fn require(mut self, names: &[&str]) -> Self {
        for name in names {
            if let Some(property) = self.properties.get_mut(*name) {
                property.required = true;
            } else {
                self.properties.insert(
                    (*name).to_string(),
                    PropertySchema {
                        behavior: PropertyBehavior::ForcesReplacement,
                        required: true,
                    },
                );
            }
        }
        self
    }

    /// Replace by deleting first (names that must stay unique, fixed addresses)
    pub fn delete_before_replace(mut self) -> Self {
        self.create_before_replace = false;
        self
    }

    /// Orphaned instances are deleted before anything else is created
    pub fn delete_before_create(mut self) -> Self {
        self.delete_before_create = true;
        self
    }

    fn declare(&mut self, name: &str, behavior: PropertyBehavior) {
        let required = self.properties.get(name).is_some_and(|p| p.required);
        self.properties
            .insert(name.to_string(), PropertySchema { behavior, required });
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Whether the kind accepts this property
    pub fn declares(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// Behavior of a property; undeclared properties force replacement
    pub fn behavior_of(&self, name: &str) -> PropertyBehavior {
        self.properties
            .get(name)
            .map_or(PropertyBehavior::ForcesReplacement, |p| p.behavior)
    }

    /// Required property names
    pub fn required(&self) -> impl Iterator<Item = &str> {
        self.properties
            .iter()
            .filter(|(_, p)| p.required)
            .map(|(name, _)| name.as_str())
    }

    pub fn replace_order(&self) -> ReplaceOrder {
        if self.create_before_replace {
            ReplaceOrder::CreateBeforeDelete
        } else {
            ReplaceOrder::DeleteBeforeCreate
        }
    }

    pub fn is_delete_before_create(&self) -> bool {
        self.delete_before_create
    }
}
