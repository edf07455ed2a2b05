//! # archsync-core
//!
//! The version and constraint reconciliation engine for infrastructure
//! architecture graphs - THE LOGIC.
//!
//! This crate tracks the graph of one environment, batches local edits as
//! constraints, submits them to a remote solver, walks linear version history
//! and detects when another client has moved the environment on.
//!
//! ## Layout
//!
//! - `types`, `constraint`, `diff` → the value model
//! - `store`, `history`, `conflict` → the client-side state machine
//! - `sync` → environment comparison
//! - `backend` → the seam to the remote version store
//! - `solver`, `memory` → a reference version store
//!
//! ## Architectural Constraints
//!
//! - No network code and no async runtime: I/O goes through `EnvironmentBackend`
//! - Deterministic: `BTreeMap`/`BTreeSet` everywhere
//! - Only `EnvironmentStore` writes the current version, the batch and the
//!   conflict state; everyone else reads `Arc` snapshots

// =============================================================================
// MODULES
// =============================================================================

pub mod backend;
pub mod conflict;
pub mod constraint;
pub mod diff;
pub mod history;
pub mod memory;
pub mod primitives;
pub mod solver;
pub mod store;
pub mod sync;
pub mod types;
pub mod workspace;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    ArchsyncError, ConfigError, Edge, EdgeKey, EnvironmentVersion, ErrorKind, PropertyValue,
    Resource, TopologyId, edge_key,
};

// =============================================================================
// RE-EXPORTS: Constraints & Diffs
// =============================================================================

pub use constraint::{
    Constraint, ConstraintBatch, ConstraintKey, ConstraintScope, EdgeOperator, GlobalOperator,
    ResourceOperator,
};
pub use diff::{Diff, DiffRow, DiffStatus, DiffView, EntryKind, PropertyChange, PropertyRow, TopologyDiff};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use backend::{ApplyRequest, EnvironmentBackend, EnvironmentKey};
pub use conflict::{ConflictGate, ConflictState};
pub use history::{Direction, HistoryPointers, Navigation};
pub use store::{ChangeEvent, EnvironmentStore, StoreOptions};
pub use sync::SyncEngine;
pub use workspace::Workspace;

// =============================================================================
// RE-EXPORTS: Reference Backend
// =============================================================================

pub use memory::InMemoryBackend;
pub use solver::{ResourceSchema, solve};

// =============================================================================
// RE-EXPORTS: Limits
// =============================================================================

pub use primitives::{DEFAULT_ENVIRONMENT, MAX_PENDING_CONSTRAINTS, MAX_SOLVER_BATCH};
