//! # Environment Version Store
//!
//! The single owner of one environment's client-side state:
//! - the current `EnvironmentVersion` and its history pointers
//! - the pending constraint batch
//! - the in-flight apply flag
//! - the overwrite conflict gate
//!
//! All methods take `&self`. State sits behind a `std::sync::Mutex` that is
//! released before every backend call, so the returned futures are `Send`
//! and a slow network round-trip never blocks readers.
//!
//! ## Apply Pipeline
//!
//! ```text
//! stage ─► batch ─► apply(force) ─► [current_version check] ─► backend.apply
//!                                          │                        │
//!                                   StaleVersion              new version
//!                                          ▼                        ▼
//!                                  conflict gate pending    install + notify
//! ```

use crate::backend::{ApplyRequest, EnvironmentBackend, EnvironmentKey};
use crate::conflict::{ConflictGate, ConflictState};
use crate::constraint::{Constraint, ConstraintBatch};
use crate::diff::TopologyDiff;
use crate::history::{Direction, HistoryPointers, Navigation};
use crate::types::{ArchsyncError, EnvironmentVersion};
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// =============================================================================
// OPTIONS & EVENTS
// =============================================================================

/// Per-store settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Whether the acting principal may force an apply over a newer version.
    pub can_overwrite: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            can_overwrite: true,
        }
    }
}

/// Change notifications delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// A version was loaded (initial load or explicit select).
    Loaded { version: u64 },
    /// Undo/redo moved the current version.
    Navigated {
        from: u64,
        to: u64,
        direction: Direction,
    },
    /// A constraint batch produced a new version.
    Applied {
        from: u64,
        to: u64,
        diff: TopologyDiff,
    },
    /// Installing another version dropped unsubmitted constraints.
    BatchDiscarded { base_version: u64, count: usize },
}

#[derive(Default)]
struct StoreState {
    current: Option<Arc<EnvironmentVersion>>,
    pointers: HistoryPointers,
    known_head: u64,
    batch: ConstraintBatch,
    in_flight: bool,
    conflict: ConflictGate,
    subscribers: Vec<Sender<ChangeEvent>>,
}

impl StoreState {
    fn emit(&mut self, event: &ChangeEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Replace the current version. A batch computed against any other
    /// version is discarded.
    fn install(&mut self, snapshot: Arc<EnvironmentVersion>, pointers: HistoryPointers) {
        if let Some(base_version) = self.batch.base_version()
            && base_version != snapshot.version
            && !self.batch.is_empty()
        {
            let count = self.batch.len();
            self.batch.clear();
            tracing::info!(
                base_version,
                count,
                "Discarded pending constraints computed against another version"
            );
            self.emit(&ChangeEvent::BatchDiscarded {
                base_version,
                count,
            });
        }
        if self.batch.is_empty() && self.conflict.clear() {
            tracing::info!(
                version = snapshot.version,
                "Dropped overwrite confirmation: its batch no longer exists"
            );
        }
        self.known_head = self.known_head.max(snapshot.version);
        self.current = Some(snapshot);
        self.pointers = pointers;
    }

    /// Reserve the pipeline for one submission of the current batch.
    fn claim(&mut self) -> Result<Claim, ArchsyncError> {
        if self.in_flight {
            return Err(ArchsyncError::ApplyInFlight);
        }
        let base = self.current.clone().ok_or(ArchsyncError::NotLoaded)?;
        if self.batch.is_empty() {
            return Err(ArchsyncError::EmptyBatch);
        }
        self.in_flight = true;
        Ok(Claim {
            base,
            known_head: self.known_head,
            submitted: self.batch.constraints().to_vec(),
        })
    }
}

/// What an apply submits, captured while the in-flight flag is taken.
struct Claim {
    base: Arc<EnvironmentVersion>,
    known_head: u64,
    submitted: Vec<Constraint>,
}

/// Clears the in-flight flag however the apply future ends.
struct InFlightGuard<'a> {
    state: &'a Mutex<StoreState>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight = false;
    }
}

/// Returns the conflict gate to idle however a confirmed overwrite ends.
struct ResolveGuard<'a> {
    state: &'a Mutex<StoreState>,
}

impl Drop for ResolveGuard<'_> {
    fn drop(&mut self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .conflict
            .reset();
    }
}

// =============================================================================
// STORE
// =============================================================================

/// Client-side state for one `(architecture, environment)`.
pub struct EnvironmentStore<B> {
    key: EnvironmentKey,
    backend: Arc<B>,
    state: Mutex<StoreState>,
}

impl<B: EnvironmentBackend> EnvironmentStore<B> {
    /// Create an empty store. Nothing is fetched until [`Self::load`].
    #[must_use]
    pub fn new(backend: Arc<B>, key: EnvironmentKey, options: StoreOptions) -> Self {
        Self {
            key,
            backend,
            state: Mutex::new(StoreState {
                conflict: ConflictGate::new(options.can_overwrite),
                ..StoreState::default()
            }),
        }
    }

    #[must_use]
    pub fn key(&self) -> &EnvironmentKey {
        &self.key
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register for change notifications. Dropped receivers are pruned on
    /// the next event.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = mpsc::channel();
        self.lock().subscribers.push(tx);
        rx
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    /// The current version, if one has been loaded.
    #[must_use]
    pub fn current(&self) -> Option<Arc<EnvironmentVersion>> {
        self.lock().current.clone()
    }

    #[must_use]
    pub fn pointers(&self) -> HistoryPointers {
        self.lock().pointers
    }

    /// Highest version this client has observed.
    #[must_use]
    pub fn known_head(&self) -> u64 {
        self.lock().known_head
    }

    // -------------------------------------------------------------------------
    // Loading
    // -------------------------------------------------------------------------

    /// Fetch a version (`None` = the server's current one) and its neighbors,
    /// then make it current.
    pub async fn load(&self, version: Option<u64>) -> Result<Arc<EnvironmentVersion>, ArchsyncError> {
        let fetched = self.fetch_checked(version).await?;
        let previous = self
            .backend
            .neighbor(&self.key, fetched.version, Direction::Previous)
            .await?;
        let next = self
            .backend
            .neighbor(&self.key, fetched.version, Direction::Next)
            .await?;

        let snapshot = Arc::new(fetched);
        {
            let mut state = self.lock();
            state.install(Arc::clone(&snapshot), HistoryPointers::new(previous, next));
            state.emit(&ChangeEvent::Loaded {
                version: snapshot.version,
            });
        }
        tracing::info!("Loaded {} v{}", self.key, snapshot.version);
        Ok(snapshot)
    }

    /// Move the server-side current pointer, then load that version.
    pub async fn select(&self, version: u64) -> Result<Arc<EnvironmentVersion>, ArchsyncError> {
        self.backend.select(&self.key, version).await?;
        self.load(Some(version)).await
    }

    /// The constraints that produced the server's current version.
    pub async fn list_constraints(&self) -> Result<Vec<Constraint>, ArchsyncError> {
        self.backend.constraints(&self.key).await
    }

    async fn fetch_checked(&self, version: Option<u64>) -> Result<EnvironmentVersion, ArchsyncError> {
        let fetched = self.backend.fetch(&self.key, version).await?;
        if !self.key.owns(&fetched) {
            return Err(ArchsyncError::Transport(format!(
                "requested {} but received {}/{}",
                self.key, fetched.architecture_id, fetched.environment_id
            )));
        }
        if let Some(requested) = version
            && fetched.version != requested
        {
            return Err(ArchsyncError::Transport(format!(
                "requested v{requested} but received v{}",
                fetched.version
            )));
        }
        Ok(fetched)
    }

    // -------------------------------------------------------------------------
    // Navigation
    // -------------------------------------------------------------------------

    /// Undo: move to the previous version.
    pub async fn go_to_previous(&self) -> Result<Navigation, ArchsyncError> {
        self.step(Direction::Previous).await
    }

    /// Redo: move to the next version.
    pub async fn go_to_next(&self) -> Result<Navigation, ArchsyncError> {
        self.step(Direction::Next).await
    }

    async fn step(&self, direction: Direction) -> Result<Navigation, ArchsyncError> {
        let (from, target) = {
            let state = self.lock();
            match (&state.current, state.pointers.get(direction)) {
                (Some(current), Some(target)) => (current.version, target),
                _ => return Ok(Navigation::Unavailable),
            }
        };

        let fetched = self.fetch_checked(Some(target)).await?;
        let far = self.backend.neighbor(&self.key, target, direction).await?;

        let snapshot = Arc::new(fetched);
        {
            let mut state = self.lock();
            state.install(
                Arc::clone(&snapshot),
                HistoryPointers::after_step(direction, from, far),
            );
            state.emit(&ChangeEvent::Navigated {
                from,
                to: target,
                direction,
            });
        }
        tracing::info!("{}: v{} -> v{} ({})", self.key, from, target, direction.as_str());
        Ok(Navigation::Moved(snapshot))
    }

    // -------------------------------------------------------------------------
    // Constraint batch
    // -------------------------------------------------------------------------

    /// Stage a constraint against the current version.
    ///
    /// Returns `true` when it replaced an earlier constraint with the same key.
    pub fn stage(&self, constraint: Constraint) -> Result<bool, ArchsyncError> {
        let mut state = self.lock();
        let base = state
            .current
            .as_ref()
            .map(|c| c.version)
            .ok_or(ArchsyncError::NotLoaded)?;
        tracing::debug!(base, %constraint, "Staging constraint");
        state.batch.stage(base, constraint)
    }

    /// Staged constraints in submission order.
    #[must_use]
    pub fn unapplied_constraints(&self) -> Vec<Constraint> {
        self.lock().batch.constraints().to_vec()
    }

    /// Drop every staged constraint. Returns how many were dropped.
    pub fn discard_constraints(&self) -> usize {
        let mut state = self.lock();
        let count = state.batch.len();
        state.batch.clear();
        state.conflict.clear();
        count
    }

    /// Whether `apply` would submit right now.
    #[must_use]
    pub fn can_apply(&self) -> bool {
        let state = self.lock();
        !state.in_flight && !state.batch.is_empty()
    }

    /// Submit the staged batch.
    ///
    /// With `force = false` the server's current version is checked first; if
    /// another client has moved it past [`Self::known_head`] nothing is
    /// submitted, the batch is kept and the conflict gate goes pending.
    pub async fn apply(&self, force: bool) -> Result<Arc<EnvironmentVersion>, ArchsyncError> {
        let claim = self.lock().claim()?;
        self.submit(claim, force).await
    }

    async fn submit(&self, claim: Claim, force: bool) -> Result<Arc<EnvironmentVersion>, ArchsyncError> {
        let _in_flight = InFlightGuard { state: &self.state };
        let Claim {
            base,
            known_head,
            submitted,
        } = claim;

        if !force {
            let remote = self.backend.current_version(&self.key).await?;
            if remote > known_head {
                return Err(self.reject_stale(submitted, known_head, remote));
            }
        }

        let request = ApplyRequest {
            version: base.version,
            expected_head: (!force).then_some(known_head),
            constraints: submitted,
        };
        tracing::info!(
            "Applying {} constraint(s) to {} v{}{}",
            request.constraints.len(),
            self.key,
            base.version,
            if force { " (forced)" } else { "" }
        );

        let result = match self.backend.apply(&self.key, &request).await {
            Ok(result) => result,
            Err(ArchsyncError::StaleVersion { remote, .. }) => {
                return Err(self.reject_stale(request.constraints, known_head, remote));
            }
            Err(err) => {
                tracing::warn!("Apply to {} failed: {}", self.key, err);
                return Err(err);
            }
        };

        if !self.key.owns(&result) || result.version <= known_head {
            return Err(ArchsyncError::Transport(format!(
                "non-monotonic apply result: v{} after v{}",
                result.version, known_head
            )));
        }

        let installed = Arc::new(result);
        let diff = TopologyDiff::between(&base, &installed);
        {
            let mut state = self.lock();
            let leftovers: Vec<Constraint> = state
                .batch
                .constraints()
                .iter()
                .filter(|c| !request.constraints.contains(c))
                .cloned()
                .collect();
            state.batch.clear();
            state.install(
                Arc::clone(&installed),
                HistoryPointers::after_apply(base.version),
            );
            state.conflict.reset();
            for constraint in leftovers {
                if let Err(err) = state.batch.stage(installed.version, constraint) {
                    tracing::warn!("Could not carry a staged constraint forward: {}", err);
                }
            }
            state.emit(&ChangeEvent::Applied {
                from: base.version,
                to: installed.version,
                diff,
            });
        }
        tracing::info!("Applied {} v{} -> v{}", self.key, base.version, installed.version);
        Ok(installed)
    }

    fn reject_stale(&self, constraints: Vec<Constraint>, local: u64, remote: u64) -> ArchsyncError {
        self.lock().conflict.record_stale(constraints, local, remote);
        tracing::warn!(
            "{} is stale: client last saw v{}, server is at v{}",
            self.key,
            local,
            remote
        );
        ArchsyncError::StaleVersion { local, remote }
    }

    // -------------------------------------------------------------------------
    // Overwrite conflicts
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn conflict_state(&self) -> ConflictState {
        self.lock().conflict.state().clone()
    }

    #[must_use]
    pub fn attempted_overwrite(&self) -> bool {
        self.lock().conflict.attempted_overwrite()
    }

    #[must_use]
    pub fn will_overwrite_state(&self) -> bool {
        self.lock().conflict.will_overwrite_state()
    }

    #[must_use]
    pub fn can_overwrite_state(&self) -> bool {
        self.lock().conflict.can_overwrite_state()
    }

    /// Cancel a pending overwrite. The batch is left untouched.
    pub fn clear_attempted_overwrite(&self) -> bool {
        self.lock().conflict.clear()
    }

    /// Force the pending batch over the newer server version.
    pub async fn confirm_overwrite(&self) -> Result<Arc<EnvironmentVersion>, ArchsyncError> {
        let claim = {
            let mut state = self.lock();
            if !state.conflict.attempted_overwrite() {
                return Err(ArchsyncError::NoOverwritePending);
            }
            if !state.conflict.can_overwrite_state() {
                return Err(ArchsyncError::OverwriteNotPermitted);
            }
            // The gate stays pending if the pipeline is busy.
            let claim = state.claim()?;
            state.conflict.begin_resolve();
            claim
        };
        let _resolve = ResolveGuard { state: &self.state };
        self.submit(claim, true).await
    }
}

impl<B> fmt::Debug for EnvironmentStore<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("EnvironmentStore")
            .field("key", &self.key)
            .field("current", &state.current.as_ref().map(|c| c.version))
            .field("pointers", &state.pointers)
            .field("known_head", &state.known_head)
            .field("pending", &state.batch.len())
            .field("in_flight", &state.in_flight)
            .field("conflict", state.conflict.state())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
