//! # Constraint Model
//!
//! A constraint is one pending edit the remote solver must incorporate:
//! a resource property change, an edge that must (not) exist, or a global
//! change to the set of resources.
//!
//! Constraints accumulate client-side in a [`ConstraintBatch`] until the
//! batch is submitted. Within one batch the last staged constraint for a
//! given [`ConstraintKey`] wins; across batches nothing is coalesced.

use crate::primitives::MAX_PENDING_CONSTRAINTS;
use crate::types::{ArchsyncError, PropertyValue, TopologyId, edge_key};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// OPERATORS
// =============================================================================

/// What a resource-scoped constraint does to its property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceOperator {
    /// Set the property to the value.
    Equals,
    /// Append the value to a list property.
    Add,
    /// Remove the value from a list property, or the property itself when the
    /// value is null.
    Remove,
}

/// What an edge-scoped constraint requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeOperator {
    MustExist,
    MustNotExist,
}

/// What a global constraint does to the resource set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlobalOperator {
    Add,
    Remove,
    /// Rename `node` to `replacement`, keeping its properties and edges.
    Replace,
    /// Adopt an existing piece of infrastructure.
    Import,
}

// =============================================================================
// CONSTRAINT
// =============================================================================

/// The scope a constraint applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintScope {
    Resource,
    Edge,
    Global,
}

/// A pending edit not yet reflected in the current environment version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum Constraint {
    Resource {
        operator: ResourceOperator,
        target: TopologyId,
        property: String,
        #[serde(default)]
        value: PropertyValue,
    },
    Edge {
        operator: EdgeOperator,
        source: TopologyId,
        target: TopologyId,
    },
    Global {
        operator: GlobalOperator,
        node: TopologyId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        replacement: Option<TopologyId>,
    },
}

impl Constraint {
    /// `target.property = value`
    #[must_use]
    pub fn set_property(target: TopologyId, property: impl Into<String>, value: PropertyValue) -> Self {
        Self::Resource {
            operator: ResourceOperator::Equals,
            target,
            property: property.into(),
            value,
        }
    }

    /// Require an edge between two resources.
    #[must_use]
    pub fn connect(source: TopologyId, target: TopologyId) -> Self {
        Self::Edge {
            operator: EdgeOperator::MustExist,
            source,
            target,
        }
    }

    /// Forbid an edge between two resources.
    #[must_use]
    pub fn disconnect(source: TopologyId, target: TopologyId) -> Self {
        Self::Edge {
            operator: EdgeOperator::MustNotExist,
            source,
            target,
        }
    }

    /// Add a new resource.
    #[must_use]
    pub fn add_resource(node: TopologyId) -> Self {
        Self::Global {
            operator: GlobalOperator::Add,
            node,
            replacement: None,
        }
    }

    /// Remove a resource (and every edge touching it).
    #[must_use]
    pub fn remove_resource(node: TopologyId) -> Self {
        Self::Global {
            operator: GlobalOperator::Remove,
            node,
            replacement: None,
        }
    }

    /// The scope of this constraint.
    #[must_use]
    pub fn scope(&self) -> ConstraintScope {
        match self {
            Self::Resource { .. } => ConstraintScope::Resource,
            Self::Edge { .. } => ConstraintScope::Edge,
            Self::Global { .. } => ConstraintScope::Global,
        }
    }

    /// The coalescing key: `(scope, target, property)`.
    #[must_use]
    pub fn key(&self) -> ConstraintKey {
        match self {
            Self::Resource {
                target, property, ..
            } => ConstraintKey {
                scope: ConstraintScope::Resource,
                target: target.to_string(),
                property: Some(property.clone()),
            },
            Self::Edge { source, target, .. } => ConstraintKey {
                scope: ConstraintScope::Edge,
                target: edge_key(source, target),
                property: None,
            },
            Self::Global { node, .. } => ConstraintKey {
                scope: ConstraintScope::Global,
                target: node.to_string(),
                property: None,
            },
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource {
                operator,
                target,
                property,
                value,
            } => write!(f, "{target}.{property} {operator:?} {value}"),
            Self::Edge {
                operator,
                source,
                target,
            } => write!(f, "{source} -> {target} {operator:?}"),
            Self::Global {
                operator,
                node,
                replacement: Some(r),
            } => write!(f, "{operator:?} {node} => {r}"),
            Self::Global {
                operator, node, ..
            } => write!(f, "{operator:?} {node}"),
        }
    }
}

/// Identity of a constraint for last-write-wins coalescing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConstraintKey {
    pub scope: ConstraintScope,
    pub target: String,
    pub property: Option<String>,
}

// =============================================================================
// BATCH
// =============================================================================

/// The pending, unsubmitted constraints for one environment.
///
/// A batch is only valid against the version it was computed from
/// (`base_version`); the store discards it when a different version is
/// installed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstraintBatch {
    base_version: Option<u64>,
    constraints: Vec<Constraint>,
}

impl ConstraintBatch {
    /// Create an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a constraint computed against `base_version`.
    ///
    /// An earlier constraint with the same key is dropped and the new one is
    /// appended, so submission order follows the most recent staging order.
    /// Returns `true` when an earlier constraint was replaced.
    pub fn stage(&mut self, base_version: u64, constraint: Constraint) -> Result<bool, ArchsyncError> {
        if self.base_version != Some(base_version) {
            self.constraints.clear();
            self.base_version = Some(base_version);
        }

        let key = constraint.key();
        let before = self.constraints.len();
        self.constraints.retain(|c| c.key() != key);
        let replaced = self.constraints.len() != before;

        if !replaced && self.constraints.len() >= MAX_PENDING_CONSTRAINTS {
            return Err(ArchsyncError::BatchFull(MAX_PENDING_CONSTRAINTS));
        }

        self.constraints.push(constraint);
        Ok(replaced)
    }

    /// The version the batch was computed against.
    #[must_use]
    pub fn base_version(&self) -> Option<u64> {
        self.base_version
    }

    /// Staged constraints in submission order.
    #[must_use]
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Drop every staged constraint.
    pub fn clear(&mut self) {
        self.constraints.clear();
        self.base_version = None;
    }
}

// =============================================================================
// TESTS
// =============================================================================
