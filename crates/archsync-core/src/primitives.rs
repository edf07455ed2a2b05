//! # Primitives
//!
//! Hardcoded limits and names for the engine.
//!
//! These are compiled in and immutable at runtime.

/// The environment every architecture starts with.
pub const DEFAULT_ENVIRONMENT: &str = "default";

/// Maximum number of distinct constraints in one pending batch.
///
/// Staging past this fails with `BatchFull`; re-staging an existing key is
/// always allowed because it does not grow the batch.
pub const MAX_PENDING_CONSTRAINTS: usize = 512;

/// Maximum number of constraints the reference solver accepts per request.
pub const MAX_SOLVER_BATCH: usize = 2048;
