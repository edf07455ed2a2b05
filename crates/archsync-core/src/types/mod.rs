//! # Core Type Definitions
//!
//! This module contains the value types shared by every other part of the engine:
//! - Graph identifiers (`TopologyId`, `EdgeKey`)
//! - Graph contents (`Resource`, `Edge`, `PropertyValue`)
//! - The unit of history (`EnvironmentVersion`)
//! - Validation feedback (`ConfigError`)
//! - Error types (`ArchsyncError`, `ErrorKind`)
//!
//! ## Determinism Guarantees
//!
//! All collections are `BTreeMap`/`BTreeSet`, so iteration order (and therefore
//! diff output, serialized JSON and constraint listings) is stable.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Property values are opaque JSON.
pub type PropertyValue = serde_json::Value;

// =============================================================================
// TOPOLOGY IDENTIFIER
// =============================================================================

/// Identifies a resource (or an edge endpoint) within an architecture graph.
///
/// The canonical string form is `provider:type:name`. The name segment may
/// itself contain `:`; the first two separators are the only structural ones.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopologyId {
    /// Cloud provider, e.g. `aws`.
    pub provider: String,
    /// Resource type, e.g. `ec2`.
    pub kind: String,
    /// Logical name, e.g. `web`.
    pub name: String,
}

impl TopologyId {
    /// Create a new identifier from its three segments.
    #[must_use]
    pub fn new(provider: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Parse the canonical `provider:type:name` form.
    pub fn parse(s: &str) -> Result<Self, ArchsyncError> {
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(p), Some(k), Some(n)) if !p.is_empty() && !k.is_empty() && !n.is_empty() => {
                Ok(Self::new(p, k, n))
            }
            _ => Err(ArchsyncError::InvalidTopologyId(s.to_string())),
        }
    }
}

impl fmt::Display for TopologyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.provider, self.kind, self.name)
    }
}

impl FromStr for TopologyId {
    type Err = ArchsyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for TopologyId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TopologyId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// RESOURCE
// =============================================================================

/// A node in the architecture graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: TopologyId,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
    /// Adopted from existing infrastructure rather than authored in the editor.
    #[serde(default)]
    pub imported: bool,
}

impl Resource {
    /// Create an authored resource with no properties.
    #[must_use]
    pub fn new(id: TopologyId) -> Self {
        Self {
            id,
            properties: BTreeMap::new(),
            imported: false,
        }
    }

    /// Builder-style property setter.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Mark the resource as imported.
    #[must_use]
    pub fn imported(mut self) -> Self {
        self.imported = true;
        self
    }

    /// Get a property value.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }
}

// =============================================================================
// EDGE
// =============================================================================

/// Canonical string identity of an edge: `source -> target`.
pub type EdgeKey = String;

/// A directed connection between two resources.
///
/// Identity, ordering and equality use the endpoints only; routing metadata
/// rides along but never distinguishes two edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub source: TopologyId,
    pub target: TopologyId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PropertyValue>,
}

impl Edge {
    /// Create an edge without metadata.
    #[must_use]
    pub fn new(source: TopologyId, target: TopologyId) -> Self {
        Self {
            source,
            target,
            metadata: None,
        }
    }

    /// The canonical key used in diffs and constraint dedup.
    #[must_use]
    pub fn key(&self) -> EdgeKey {
        edge_key(&self.source, &self.target)
    }

    /// Whether either endpoint is the given resource.
    #[must_use]
    pub fn touches(&self, id: &TopologyId) -> bool {
        &self.source == id || &self.target == id
    }
}

/// Build the canonical edge key from two endpoints.
#[must_use]
pub fn edge_key(source: &TopologyId, target: &TopologyId) -> EdgeKey {
    format!("{source} -> {target}")
}

impl PartialEq for Edge {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.target == other.target
    }
}

impl Eq for Edge {}

impl PartialOrd for Edge {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Edge {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.source, &self.target).cmp(&(&other.source, &other.target))
    }
}

// =============================================================================
// CONFIG ERROR
// =============================================================================

/// A validation problem tied (optionally) to one resource property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<TopologyId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    pub message: String,
}

impl ConfigError {
    /// An error about a resource as a whole.
    #[must_use]
    pub fn resource(resource: TopologyId, message: impl Into<String>) -> Self {
        Self {
            resource: Some(resource),
            property: None,
            message: message.into(),
        }
    }

    /// An error about one property of a resource.
    #[must_use]
    pub fn property(
        resource: TopologyId,
        property: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            resource: Some(resource),
            property: Some(property.into()),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.resource, &self.property) {
            (Some(r), Some(p)) => write!(f, "{r}.{p}: {}", self.message),
            (Some(r), None) => write!(f, "{r}: {}", self.message),
            _ => f.write_str(&self.message),
        }
    }
}

// =============================================================================
// ENVIRONMENT VERSION
// =============================================================================

/// An immutable snapshot of one environment's graph at one point in history.
///
/// A new edit always produces a new `EnvironmentVersion`; the engine shares
/// snapshots as `Arc<EnvironmentVersion>` and never mutates one in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentVersion {
    pub architecture_id: String,
    pub environment_id: String,
    /// Strictly increasing along the history chain of one environment.
    pub version: u64,
    #[serde(default)]
    pub resources: BTreeMap<TopologyId, Resource>,
    #[serde(default)]
    pub edges: BTreeSet<Edge>,
    #[serde(default)]
    pub config_errors: Vec<ConfigError>,
}

impl EnvironmentVersion {
    /// Create an empty version.
    #[must_use]
    pub fn new(
        architecture_id: impl Into<String>,
        environment_id: impl Into<String>,
        version: u64,
    ) -> Self {
        Self {
            architecture_id: architecture_id.into(),
            environment_id: environment_id.into(),
            version,
            resources: BTreeMap::new(),
            edges: BTreeSet::new(),
            config_errors: Vec::new(),
        }
    }

    /// Builder-style resource insertion.
    #[must_use]
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resources.insert(resource.id.clone(), resource);
        self
    }

    /// Builder-style edge insertion.
    #[must_use]
    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.insert(edge);
        self
    }

    /// Look up a resource by id.
    #[must_use]
    pub fn resource(&self, id: &TopologyId) -> Option<&Resource> {
        self.resources.get(id)
    }

    /// Check whether an edge between the two endpoints exists.
    #[must_use]
    pub fn has_edge(&self, source: &TopologyId, target: &TopologyId) -> bool {
        self.edges
            .iter()
            .any(|e| &e.source == source && &e.target == target)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Coarse classification of an `ArchsyncError`, for callers that pick a UI
/// treatment without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    StaleVersion,
    Config,
    Transport,
    /// Rejected locally before any I/O (misuse of the store's operations).
    Usage,
}

/// Errors that can occur in the engine.
///
/// - No silent failures
/// - Every failure is recoverable at the call site
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArchsyncError {
    /// The requested (architecture, environment, version) does not exist.
    #[error("No such state: {architecture}/{environment} ({})", describe_version(.version))]
    NotFound {
        architecture: String,
        environment: String,
        version: Option<u64>,
    },

    /// The server has moved past the version the client last saw.
    #[error("Stale version: client last saw v{local}, server is at v{remote}")]
    StaleVersion { local: u64, remote: u64 },

    /// One or more constraints are invalid against the resource schema.
    #[error("Configuration rejected: {}", join_config_errors(.0))]
    Config(Vec<ConfigError>),

    /// Network failure, timeout, or an unusable response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// An apply is already outstanding for this environment.
    #[error("An apply is already in flight for this environment")]
    ApplyInFlight,

    /// There are no staged constraints to apply.
    #[error("No staged constraints to apply")]
    EmptyBatch,

    /// No version has been loaded yet.
    #[error("No environment version loaded")]
    NotLoaded,

    /// The pending batch has reached its size limit.
    #[error("Pending batch is full ({0} constraints)")]
    BatchFull(usize),

    /// `confirm_overwrite` was called without a pending stale apply.
    #[error("No overwrite is awaiting confirmation")]
    NoOverwritePending,

    /// The acting principal may not force an overwrite.
    #[error("Overwriting a newer version is not permitted")]
    OverwriteNotPermitted,

    /// A topology identifier could not be parsed.
    #[error("Invalid topology id '{0}': expected provider:type:name")]
    InvalidTopologyId(String),

    /// Unusable local input (configuration file, constraint file, flags).
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ArchsyncError {
    /// Classify the error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::StaleVersion { .. } => ErrorKind::StaleVersion,
            Self::Config(_) => ErrorKind::Config,
            Self::Transport(_) => ErrorKind::Transport,
            Self::ApplyInFlight
            | Self::EmptyBatch
            | Self::NotLoaded
            | Self::BatchFull(_)
            | Self::NoOverwritePending
            | Self::OverwriteNotPermitted
            | Self::InvalidTopologyId(_)
            | Self::InvalidInput(_) => ErrorKind::Usage,
        }
    }
}

fn describe_version(version: &Option<u64>) -> String {
    version.map_or_else(|| "latest".to_string(), |v| format!("v{v}"))
}

fn join_config_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn topology_id_round_trips_canonical_form() {
        let id = TopologyId::parse("aws:ec2:web").expect("parse");
        assert_eq!(id.provider, "aws");
        assert_eq!(id.kind, "ec2");
        assert_eq!(id.name, "web");
        assert_eq!(id.to_string(), "aws:ec2:web");
    }

    #[test]
    fn topology_id_name_keeps_extra_separators() {
        let id: TopologyId = "aws:subnet:vpc-0:private".parse().expect("parse");
        assert_eq!(id.name, "vpc-0:private");
    }

    #[test]
    fn topology_id_rejects_missing_segments() {
        for bad in ["", "aws", "aws:ec2", "aws::web", ":ec2:web", "aws:ec2:"] {
            assert!(
                matches!(TopologyId::parse(bad), Err(ArchsyncError::InvalidTopologyId(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn topology_id_serializes_as_string_map_key() {
        let version = EnvironmentVersion::new("arch", "dev", 1)
            .with_resource(Resource::new(TopologyId::new("aws", "s3", "assets")));
        let value = serde_json::to_value(&version).expect("serialize");
        assert!(value["resources"].get("aws:s3:assets").is_some());
        assert_eq!(value["resources"]["aws:s3:assets"]["id"], json!("aws:s3:assets"));
    }

    #[test]
    fn edge_identity_ignores_metadata() {
        let a = TopologyId::new("aws", "lambda", "api");
        let b = TopologyId::new("aws", "dynamodb", "table");
        let plain = Edge::new(a.clone(), b.clone());
        let routed = Edge {
            metadata: Some(json!({"path": [[0, 0], [1, 1]]})),
            ..Edge::new(a, b)
        };
        assert_eq!(plain, routed);

        let mut set = BTreeSet::new();
        set.insert(plain);
        set.insert(routed);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn edge_key_is_canonical() {
        let edge = Edge::new(
            TopologyId::new("aws", "lambda", "api"),
            TopologyId::new("aws", "dynamodb", "table"),
        );
        assert_eq!(edge.key(), "aws:lambda:api -> aws:dynamodb:table");
    }

    #[test]
    fn error_kinds_classify_variants() {
        assert_eq!(
            ArchsyncError::StaleVersion { local: 1, remote: 2 }.kind(),
            ErrorKind::StaleVersion
        );
        assert_eq!(ArchsyncError::Config(vec![]).kind(), ErrorKind::Config);
        assert_eq!(ArchsyncError::Transport("x".into()).kind(), ErrorKind::Transport);
        assert_eq!(ArchsyncError::ApplyInFlight.kind(), ErrorKind::Usage);
    }

    #[test]
    fn not_found_message_names_the_state() {
        let err = ArchsyncError::NotFound {
            architecture: "arch".into(),
            environment: "prod".into(),
            version: Some(7),
        };
        assert_eq!(err.to_string(), "No such state: arch/prod (v7)");
    }

    #[test]
    fn config_error_display_includes_target() {
        let err = ConfigError::property(TopologyId::new("aws", "ec2", "web"), "ram", "unknown property");
        assert_eq!(err.to_string(), "aws:ec2:web.ram: unknown property");
    }
}
