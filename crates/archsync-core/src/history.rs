//! # Version History
//!
//! History is a linear chain per environment. The client only ever holds the
//! two neighbors of the current version, by version number:
//!
//! ```text
//!   previous ◄── current ──► next
//! ```
//!
//! Navigation moves the current pointer and never deletes anything. Applying
//! new constraints while not at the head abandons the forward branch: the new
//! version's `next` is unset and the old forward versions become unreachable.

use crate::types::EnvironmentVersion;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which neighbor to look up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Previous,
    Next,
}

impl Direction {
    /// Path segment used by the HTTP contract.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Previous => "previous",
            Self::Next => "next",
        }
    }
}

/// Neighbors of the current version in the linear history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPointers {
    pub previous: Option<u64>,
    pub next: Option<u64>,
}

impl HistoryPointers {
    #[must_use]
    pub fn new(previous: Option<u64>, next: Option<u64>) -> Self {
        Self { previous, next }
    }

    /// Pointers right after an apply: the base is behind us, nothing ahead.
    #[must_use]
    pub fn after_apply(base_version: u64) -> Self {
        Self {
            previous: Some(base_version),
            next: None,
        }
    }

    /// Pointers after stepping one place in `direction`, away from `left`.
    ///
    /// `far` is the newly fetched neighbor on the far side of the target.
    #[must_use]
    pub fn after_step(direction: Direction, left: u64, far: Option<u64>) -> Self {
        match direction {
            Direction::Previous => Self {
                previous: far,
                next: Some(left),
            },
            Direction::Next => Self {
                previous: Some(left),
                next: far,
            },
        }
    }

    /// The pointer in the given direction.
    #[must_use]
    pub fn get(&self, direction: Direction) -> Option<u64> {
        match direction {
            Direction::Previous => self.previous,
            Direction::Next => self.next,
        }
    }
}

/// Outcome of an undo/redo request.
#[derive(Debug, Clone, PartialEq)]
pub enum Navigation {
    /// The store moved to this version.
    Moved(Arc<EnvironmentVersion>),
    /// There is no neighbor in that direction; no I/O was performed.
    Unavailable,
}

impl Navigation {
    /// The version moved to, if any.
    #[must_use]
    pub fn version(&self) -> Option<&Arc<EnvironmentVersion>> {
        match self {
            Self::Moved(v) => Some(v),
            Self::Unavailable => None,
        }
    }
}
