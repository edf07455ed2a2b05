//! # Backend Seam
//!
//! The remote version store and constraint solver, as seen by the engine.
//!
//! The engine never performs I/O itself: every network round-trip goes
//! through an [`EnvironmentBackend`]. The app crate provides the HTTP
//! implementation; [`crate::memory::InMemoryBackend`] is the reference
//! implementation used by tests and the development server.
//!
//! Implementations map their failures onto [`ArchsyncError`]:
//! - missing architecture/environment/version -> `NotFound`
//! - optimistic-concurrency rejection -> `StaleVersion`
//! - structured validation rejection -> `Config`
//! - anything else -> `Transport`

use crate::constraint::Constraint;
use crate::diff::TopologyDiff;
use crate::history::Direction;
use crate::types::{ArchsyncError, EnvironmentVersion};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;

/// Addresses one environment of one architecture.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EnvironmentKey {
    pub architecture_id: String,
    pub environment_id: String,
}

impl EnvironmentKey {
    #[must_use]
    pub fn new(architecture_id: impl Into<String>, environment_id: impl Into<String>) -> Self {
        Self {
            architecture_id: architecture_id.into(),
            environment_id: environment_id.into(),
        }
    }

    /// `NotFound` for this environment at the given version.
    #[must_use]
    pub fn not_found(&self, version: Option<u64>) -> ArchsyncError {
        ArchsyncError::NotFound {
            architecture: self.architecture_id.clone(),
            environment: self.environment_id.clone(),
            version,
        }
    }

    /// Whether a fetched version belongs to this environment.
    #[must_use]
    pub fn owns(&self, version: &EnvironmentVersion) -> bool {
        version.architecture_id == self.architecture_id
            && version.environment_id == self.environment_id
    }
}

impl fmt::Display for EnvironmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.architecture_id, self.environment_id)
    }
}

/// A constraint batch submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyRequest {
    /// The version the batch was computed against.
    pub version: u64,
    /// Highest version the client has seen. `None` forces the apply even if
    /// the server has moved on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_head: Option<u64>,
    pub constraints: Vec<Constraint>,
}

impl ApplyRequest {
    #[must_use]
    pub fn is_forced(&self) -> bool {
        self.expected_head.is_none()
    }
}

/// Remote operations the engine depends on.
pub trait EnvironmentBackend: Send + Sync {
    /// Fetch a version; `None` means the environment's current version.
    fn fetch(
        &self,
        key: &EnvironmentKey,
        version: Option<u64>,
    ) -> impl Future<Output = Result<EnvironmentVersion, ArchsyncError>> + Send;

    /// Version number of the neighbor of `version` in `direction`, if any.
    fn neighbor(
        &self,
        key: &EnvironmentKey,
        version: u64,
        direction: Direction,
    ) -> impl Future<Output = Result<Option<u64>, ArchsyncError>> + Send;

    /// Version number the server currently considers current.
    fn current_version(
        &self,
        key: &EnvironmentKey,
    ) -> impl Future<Output = Result<u64, ArchsyncError>> + Send {
        async move { self.fetch(key, None).await.map(|v| v.version) }
    }

    /// Move the server-side current pointer.
    fn select(
        &self,
        key: &EnvironmentKey,
        version: u64,
    ) -> impl Future<Output = Result<(), ArchsyncError>> + Send;

    /// Submit a constraint batch; returns the solver's resulting version.
    fn apply(
        &self,
        key: &EnvironmentKey,
        request: &ApplyRequest,
    ) -> impl Future<Output = Result<EnvironmentVersion, ArchsyncError>> + Send;

    /// Constraints that produced the environment's current version.
    fn constraints(
        &self,
        key: &EnvironmentKey,
    ) -> impl Future<Output = Result<Vec<Constraint>, ArchsyncError>> + Send;

    /// Diff from `source`'s current version to `target`'s current version.
    fn diff(
        &self,
        architecture_id: &str,
        source: &str,
        target: &str,
    ) -> impl Future<Output = Result<TopologyDiff, ArchsyncError>> + Send;

    /// Whether the two environments' current versions are equivalent.
    fn in_sync(
        &self,
        architecture_id: &str,
        source: &str,
        target: &str,
    ) -> impl Future<Output = Result<bool, ArchsyncError>> + Send;
}
