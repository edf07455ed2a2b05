//! # Diff Model
//!
//! The difference between two environment versions, per resource and per
//! edge.
//!
//! ## Orientation
//!
//! Diffs are always computed *from* a source *to* a target:
//! - `Added`: present in the target, absent from the source
//! - `Removed`: present in the source, absent from the target
//! - `Changed`: present in both with at least one differing property
//!
//! `Added`/`Removed` entries never carry a property map; `Changed` entries
//! always carry a non-empty one. [`TopologyDiff::validate`] enforces this on
//! payloads received from the server.

use crate::types::{ArchsyncError, EnvironmentVersion, PropertyValue, TopologyId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Status of one diff entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffStatus {
    Added,
    Removed,
    Changed,
}

/// Old and new value of one property (`None` = absent on that side).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyChange {
    pub old: Option<PropertyValue>,
    pub new: Option<PropertyValue>,
}

/// One resource or edge entry of a diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    pub status: DiffStatus,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertyChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TopologyId>,
}

impl Diff {
    #[must_use]
    pub fn added(target: Option<TopologyId>) -> Self {
        Self {
            status: DiffStatus::Added,
            properties: BTreeMap::new(),
            target,
        }
    }

    #[must_use]
    pub fn removed(target: Option<TopologyId>) -> Self {
        Self {
            status: DiffStatus::Removed,
            properties: BTreeMap::new(),
            target,
        }
    }

    /// Whether `status` and `properties` agree.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        match self.status {
            DiffStatus::Changed => !self.properties.is_empty(),
            DiffStatus::Added | DiffStatus::Removed => self.properties.is_empty(),
        }
    }
}

/// Per-resource and per-edge differences between two versions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologyDiff {
    /// Keyed by the resource's canonical `TopologyId` string.
    #[serde(default)]
    pub resources: BTreeMap<String, Diff>,
    /// Keyed by the canonical edge key (`source -> target`).
    #[serde(default)]
    pub edges: BTreeMap<String, Diff>,
}

impl TopologyDiff {
    /// Compute the diff from `source` to `target`.
    #[must_use]
    pub fn between(source: &EnvironmentVersion, target: &EnvironmentVersion) -> Self {
        let mut diff = Self::default();

        for (id, resource) in &target.resources {
            match source.resources.get(id) {
                None => {
                    diff.resources
                        .insert(id.to_string(), Diff::added(Some(id.clone())));
                }
                Some(before) => {
                    let properties = property_changes(&before.properties, &resource.properties);
                    if !properties.is_empty() {
                        diff.resources.insert(
                            id.to_string(),
                            Diff {
                                status: DiffStatus::Changed,
                                properties,
                                target: Some(id.clone()),
                            },
                        );
                    }
                }
            }
        }
        for id in source.resources.keys() {
            if !target.resources.contains_key(id) {
                diff.resources
                    .insert(id.to_string(), Diff::removed(Some(id.clone())));
            }
        }

        for edge in target.edges.difference(&source.edges) {
            diff.edges.insert(edge.key(), Diff::added(None));
        }
        for edge in source.edges.difference(&target.edges) {
            diff.edges.insert(edge.key(), Diff::removed(None));
        }

        diff
    }

    /// True when neither resources nor edges differ.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.edges.is_empty()
    }

    /// Total number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len() + self.edges.len()
    }

    /// Reject payloads whose entries break the status/properties invariant.
    pub fn validate(&self) -> Result<(), ArchsyncError> {
        let bad = self
            .resources
            .iter()
            .chain(self.edges.iter())
            .find(|(_, d)| !d.is_consistent());
        match bad {
            Some((key, d)) => Err(ArchsyncError::Transport(format!(
                "malformed diff entry '{key}': status {:?} with {} changed properties",
                d.status,
                d.properties.len()
            ))),
            None => Ok(()),
        }
    }

    /// Render the diff for display, relative to the named environments.
    #[must_use]
    pub fn view(&self, source_name: &str, target_name: &str) -> DiffView {
        let rows = |entries: &BTreeMap<String, Diff>, kind: EntryKind| {
            entries
                .iter()
                .map(|(key, d)| DiffRow::render(kind, key, d, target_name))
                .collect::<Vec<_>>()
        };
        DiffView {
            source: source_name.to_string(),
            target: target_name.to_string(),
            resources: rows(&self.resources, EntryKind::Resource),
            edges: rows(&self.edges, EntryKind::Edge),
        }
    }
}

fn property_changes(
    before: &BTreeMap<String, PropertyValue>,
    after: &BTreeMap<String, PropertyValue>,
) -> BTreeMap<String, PropertyChange> {
    let mut changes = BTreeMap::new();
    for (key, new) in after {
        let old = before.get(key);
        if old != Some(new) {
            changes.insert(
                key.clone(),
                PropertyChange {
                    old: old.cloned(),
                    new: Some(new.clone()),
                },
            );
        }
    }
    for (key, old) in before {
        if !after.contains_key(key) {
            changes.insert(
                key.clone(),
                PropertyChange {
                    old: Some(old.clone()),
                    new: None,
                },
            );
        }
    }
    changes
}

// =============================================================================
// RENDERING
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Resource,
    Edge,
}

/// One modified property as shown in a `Changed` row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyRow {
    pub property: String,
    pub old: Option<PropertyValue>,
    pub new: Option<PropertyValue>,
}

/// A display row: status badge for `Added`/`Removed`, property table for
/// `Changed`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffRow {
    pub kind: EntryKind,
    pub key: String,
    pub status: DiffStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<PropertyRow>,
}

impl DiffRow {
    fn render(kind: EntryKind, key: &str, diff: &Diff, target: &str) -> Self {
        let (badge, properties) = match diff.status {
            DiffStatus::Added => (Some(format!("only in {target}")), Vec::new()),
            DiffStatus::Removed => (Some(format!("missing from {target}")), Vec::new()),
            DiffStatus::Changed => (
                None,
                diff.properties
                    .iter()
                    .map(|(property, change)| PropertyRow {
                        property: property.clone(),
                        old: change.old.clone(),
                        new: change.new.clone(),
                    })
                    .collect(),
            ),
        };
        Self {
            kind,
            key: key.to_string(),
            status: diff.status,
            badge,
            properties,
        }
    }
}

/// A rendered diff between two named environments.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffView {
    pub source: String,
    pub target: String,
    pub resources: Vec<DiffRow>,
    pub edges: Vec<DiffRow>,
}

impl DiffView {
    /// All rows, resources first.
    pub fn rows(&self) -> impl Iterator<Item = &DiffRow> {
        self.resources.iter().chain(self.edges.iter())
    }
}

// =============================================================================
// TESTS
// =============================================================================
