//! # In-Memory Version Store
//!
//! A complete, deterministic implementation of the backend contract:
//! per-environment version logs with parent links, a server-side current
//! pointer, optimistic-concurrency checks and the reference solver.
//!
//! Used directly by the engine's tests and wrapped by the development
//! server in the app crate.
//!
//! ## History Shape
//!
//! Every version records the version it was computed from (`parent`).
//! - previous(N) = parent of N
//! - next(N) = the newest version whose parent is N
//!
//! Applying against an older version therefore creates a new branch whose
//! newest member shadows the old forward chain, which keeps history linear
//! from the client's point of view.

use crate::backend::{ApplyRequest, EnvironmentBackend, EnvironmentKey};
use crate::constraint::Constraint;
use crate::diff::TopologyDiff;
use crate::history::Direction;
use crate::primitives::MAX_SOLVER_BATCH;
use crate::solver::{ResourceSchema, solve};
use crate::types::{ArchsyncError, ConfigError, Edge, EnvironmentVersion, Resource};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
struct StoredVersion {
    snapshot: Arc<EnvironmentVersion>,
    parent: Option<u64>,
    constraints: Vec<Constraint>,
}

#[derive(Debug, Default)]
struct EnvironmentLog {
    versions: BTreeMap<u64, StoredVersion>,
    /// Highest version number ever assigned.
    head: u64,
    /// The server-side current pointer.
    current: u64,
}

impl EnvironmentLog {
    fn get(&self, key: &EnvironmentKey, version: u64) -> Result<&StoredVersion, ArchsyncError> {
        self.versions
            .get(&version)
            .ok_or_else(|| key.not_found(Some(version)))
    }

    fn current(&self, key: &EnvironmentKey) -> Result<&StoredVersion, ArchsyncError> {
        self.get(key, self.current)
    }

    fn push(&mut self, snapshot: EnvironmentVersion, parent: Option<u64>, constraints: Vec<Constraint>) -> Arc<EnvironmentVersion> {
        let snapshot = Arc::new(snapshot);
        self.head = snapshot.version;
        self.current = snapshot.version;
        self.versions.insert(
            snapshot.version,
            StoredVersion {
                snapshot: Arc::clone(&snapshot),
                parent,
                constraints,
            },
        );
        snapshot
    }
}

/// Reference version store and solver.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    environments: Mutex<BTreeMap<EnvironmentKey, EnvironmentLog>>,
    schema: ResourceSchema,
    submissions: AtomicU64,
}

impl InMemoryBackend {
    /// Create an empty store with an unconstrained schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that validates properties against `schema`.
    #[must_use]
    pub fn with_schema(schema: ResourceSchema) -> Self {
        Self {
            schema,
            ..Self::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<EnvironmentKey, EnvironmentLog>> {
        self.environments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of constraint batches that reached the solver.
    #[must_use]
    pub fn submissions(&self) -> u64 {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Create an environment at version 1.
    pub fn create_environment(
        &self,
        key: &EnvironmentKey,
        resources: Vec<Resource>,
        edges: Vec<Edge>,
    ) -> Result<Arc<EnvironmentVersion>, ArchsyncError> {
        if self.lock().contains_key(key) {
            return Err(ArchsyncError::InvalidInput(format!("{key} already exists")));
        }
        let mut snapshot = EnvironmentVersion::new(&key.architecture_id, &key.environment_id, 1);
        snapshot.resources = resources.into_iter().map(|r| (r.id.clone(), r)).collect();
        snapshot.edges = edges.into_iter().collect();
        self.seed(snapshot)
    }

    /// Append a snapshot as the new head and current version.
    ///
    /// The snapshot's version must be greater than every existing version of
    /// its environment.
    pub fn seed(&self, snapshot: EnvironmentVersion) -> Result<Arc<EnvironmentVersion>, ArchsyncError> {
        let key = EnvironmentKey::new(&snapshot.architecture_id, &snapshot.environment_id);
        let mut environments = self.lock();
        let log = environments.entry(key).or_default();
        if !log.versions.is_empty() && snapshot.version <= log.head {
            return Err(ArchsyncError::StaleVersion {
                local: snapshot.version,
                remote: log.head,
            });
        }
        let parent = (!log.versions.is_empty()).then_some(log.current);
        Ok(log.push(snapshot, parent, Vec::new()))
    }

    /// Fetch a version (`None` = current).
    pub fn get(&self, key: &EnvironmentKey, version: Option<u64>) -> Result<Arc<EnvironmentVersion>, ArchsyncError> {
        let environments = self.lock();
        let log = environments.get(key).ok_or_else(|| key.not_found(version))?;
        let stored = match version {
            Some(v) => log.get(key, v)?,
            None => log.current(key)?,
        };
        Ok(Arc::clone(&stored.snapshot))
    }

    /// The neighbor of `version` in `direction`.
    pub fn neighbor_of(
        &self,
        key: &EnvironmentKey,
        version: u64,
        direction: Direction,
    ) -> Result<Option<u64>, ArchsyncError> {
        let environments = self.lock();
        let log = environments
            .get(key)
            .ok_or_else(|| key.not_found(Some(version)))?;
        let stored = log.get(key, version)?;
        Ok(match direction {
            Direction::Previous => stored.parent,
            Direction::Next => log
                .versions
                .iter()
                .rev()
                .find(|(_, v)| v.parent == Some(version))
                .map(|(n, _)| *n),
        })
    }

    /// Move the current pointer.
    pub fn set_current(&self, key: &EnvironmentKey, version: u64) -> Result<u64, ArchsyncError> {
        let mut environments = self.lock();
        let log = environments
            .get_mut(key)
            .ok_or_else(|| key.not_found(Some(version)))?;
        log.get(key, version)?;
        log.current = version;
        Ok(version)
    }

    /// Solve and record a constraint batch.
    pub fn submit(&self, key: &EnvironmentKey, request: &ApplyRequest) -> Result<Arc<EnvironmentVersion>, ArchsyncError> {
        let mut environments = self.lock();
        let log = environments
            .get_mut(key)
            .ok_or_else(|| key.not_found(Some(request.version)))?;
        let base = Arc::clone(&log.get(key, request.version)?.snapshot);

        if let Some(expected) = request.expected_head
            && log.current > expected
        {
            return Err(ArchsyncError::StaleVersion {
                local: expected,
                remote: log.current,
            });
        }
        if request.constraints.len() > MAX_SOLVER_BATCH {
            return Err(ArchsyncError::Config(vec![ConfigError {
                resource: None,
                property: None,
                message: format!(
                    "batch of {} constraints exceeds the limit of {}",
                    request.constraints.len(),
                    MAX_SOLVER_BATCH
                ),
            }]));
        }

        self.submissions.fetch_add(1, Ordering::SeqCst);
        let mut solved = solve(&base, &request.constraints, &self.schema)?;
        solved.version = log.head.saturating_add(1);
        Ok(log.push(solved, Some(request.version), request.constraints.clone()))
    }

    /// Constraints along the parent chain of the current version, oldest first.
    pub fn history_constraints(&self, key: &EnvironmentKey) -> Result<Vec<Constraint>, ArchsyncError> {
        let environments = self.lock();
        let log = environments.get(key).ok_or_else(|| key.not_found(None))?;

        let mut chain = Vec::new();
        let mut cursor = Some(log.current);
        while let Some(version) = cursor {
            let stored = log.get(key, version)?;
            chain.push(stored.constraints.clone());
            cursor = stored.parent;
        }
        Ok(chain.into_iter().rev().flatten().collect())
    }

    /// Diff between two environments' current versions.
    pub fn diff_environments(
        &self,
        architecture_id: &str,
        source: &str,
        target: &str,
    ) -> Result<TopologyDiff, ArchsyncError> {
        let source = self.get(&EnvironmentKey::new(architecture_id, source), None)?;
        let target = self.get(&EnvironmentKey::new(architecture_id, target), None)?;
        Ok(TopologyDiff::between(&source, &target))
    }
}

impl EnvironmentBackend for InMemoryBackend {
    async fn fetch(&self, key: &EnvironmentKey, version: Option<u64>) -> Result<EnvironmentVersion, ArchsyncError> {
        self.get(key, version).map(|v| (*v).clone())
    }

    async fn neighbor(
        &self,
        key: &EnvironmentKey,
        version: u64,
        direction: Direction,
    ) -> Result<Option<u64>, ArchsyncError> {
        self.neighbor_of(key, version, direction)
    }

    async fn current_version(&self, key: &EnvironmentKey) -> Result<u64, ArchsyncError> {
        self.get(key, None).map(|v| v.version)
    }

    async fn select(&self, key: &EnvironmentKey, version: u64) -> Result<(), ArchsyncError> {
        self.set_current(key, version).map(|_| ())
    }

    async fn apply(&self, key: &EnvironmentKey, request: &ApplyRequest) -> Result<EnvironmentVersion, ArchsyncError> {
        self.submit(key, request).map(|v| (*v).clone())
    }

    async fn constraints(&self, key: &EnvironmentKey) -> Result<Vec<Constraint>, ArchsyncError> {
        self.history_constraints(key)
    }

    async fn diff(&self, architecture_id: &str, source: &str, target: &str) -> Result<TopologyDiff, ArchsyncError> {
        self.diff_environments(architecture_id, source, target)
    }

    async fn in_sync(&self, architecture_id: &str, source: &str, target: &str) -> Result<bool, ArchsyncError> {
        self.diff_environments(architecture_id, source, target)
            .map(|d| d.is_empty())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TopologyId;
    use serde_json::json;

    fn key() -> EnvironmentKey {
        EnvironmentKey::new("arch", "dev")
    }

    fn web() -> TopologyId {
        TopologyId::new("aws", "ec2", "web")
    }

    fn request(version: u64, expected_head: Option<u64>, value: &str) -> ApplyRequest {
        ApplyRequest {
            version,
            expected_head,
            constraints: vec![Constraint::set_property(web(), "instanceType", json!(value))],
        }
    }

    fn backend() -> InMemoryBackend {
        let backend = InMemoryBackend::new();
        backend
            .create_environment(&key(), vec![Resource::new(web())], vec![])
            .expect("create");
        backend
    }

    #[test]
    fn apply_assigns_next_version_and_links_parent() {
        let b = backend();
        let v2 = b.submit(&key(), &request(1, Some(1), "a")).expect("apply");
        assert_eq!(v2.version, 2);
        assert_eq!(b.neighbor_of(&key(), 2, Direction::Previous).expect("prev"), Some(1));
        assert_eq!(b.neighbor_of(&key(), 1, Direction::Next).expect("next"), Some(2));
        assert_eq!(b.neighbor_of(&key(), 2, Direction::Next).expect("next"), None);
    }

    #[test]
    fn stale_expected_head_is_rejected() {
        let b = backend();
        b.submit(&key(), &request(1, Some(1), "a")).expect("apply");
        let stale = b.submit(&key(), &request(1, Some(1), "b"));
        assert_eq!(stale, Err(ArchsyncError::StaleVersion { local: 1, remote: 2 }));
        assert_eq!(b.submissions(), 1);

        let forced = b.submit(&key(), &request(1, None, "b")).expect("forced");
        assert_eq!(forced.version, 3);
    }

    #[test]
    fn branching_shadows_old_forward_chain() {
        let b = backend();
        b.submit(&key(), &request(1, Some(1), "a")).expect("v2");
        b.submit(&key(), &request(2, Some(2), "b")).expect("v3");
        let v4 = b.submit(&key(), &request(2, Some(3), "c")).expect("v4");

        assert_eq!(v4.version, 4);
        assert_eq!(b.neighbor_of(&key(), 2, Direction::Next).expect("next"), Some(4));
        assert_eq!(b.neighbor_of(&key(), 4, Direction::Previous).expect("prev"), Some(2));
    }

    #[test]
    fn constraints_follow_the_current_chain() {
        let b = backend();
        b.submit(&key(), &request(1, Some(1), "a")).expect("v2");
        b.submit(&key(), &request(2, Some(2), "b")).expect("v3");
        b.submit(&key(), &request(2, Some(3), "c")).expect("v4");

        let listed = b.history_constraints(&key()).expect("list");
        assert_eq!(
            listed,
            vec![
                Constraint::set_property(web(), "instanceType", json!("a")),
                Constraint::set_property(web(), "instanceType", json!("c")),
            ]
        );
    }

    #[test]
    fn missing_state_is_not_found() {
        let b = backend();
        assert!(matches!(
            b.get(&key(), Some(9)),
            Err(ArchsyncError::NotFound { version: Some(9), .. })
        ));
        assert!(matches!(
            b.get(&EnvironmentKey::new("arch", "nope"), None),
            Err(ArchsyncError::NotFound { .. })
        ));
    }

    #[test]
    fn set_current_moves_the_default_fetch() {
        let b = backend();
        b.submit(&key(), &request(1, Some(1), "a")).expect("v2");
        b.set_current(&key(), 1).expect("select");
        assert_eq!(b.get(&key(), None).expect("get").version, 1);
        assert!(b.set_current(&key(), 42).is_err());
    }

    #[test]
    fn environments_are_created_once() {
        let b = backend();
        let again = b.create_environment(&key(), vec![], vec![]);
        assert!(matches!(again, Err(ArchsyncError::InvalidInput(_))));
    }

    #[test]
    fn seed_rejects_non_increasing_versions() {
        let b = backend();
        let again = b.seed(EnvironmentVersion::new("arch", "dev", 1));
        assert!(matches!(again, Err(ArchsyncError::StaleVersion { .. })));
        let later = b.seed(EnvironmentVersion::new("arch", "dev", 5)).expect("seed");
        assert_eq!(later.version, 5);
    }
}
