//! # Overwrite Conflict Detection
//!
//! A client-side confirmation gate in front of forced applies. The server is
//! the source of truth for staleness; this only records that the user tried
//! to apply over a newer version and is being asked to confirm.
//!
//! ```text
//!            apply(force=false) -> StaleVersion
//!   Idle ───────────────────────────────────────► PendingConfirmation
//!    ▲  ▲                                              │        │
//!    │  └──────────── clear_attempted_overwrite ───────┘        │
//!    │                                              confirm     │
//!    └──────── apply(force=true) finished ◄── Resolving ◄───────┘
//! ```

use crate::constraint::Constraint;

/// Where the overwrite confirmation flow currently is.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ConflictState {
    #[default]
    Idle,
    /// A non-forced apply was rejected as stale and awaits user confirmation.
    PendingConfirmation {
        /// Snapshot of the batch that was refused.
        constraints: Vec<Constraint>,
        /// Highest version the client had seen when it tried.
        local_version: u64,
        /// Version the server reported.
        remote_version: u64,
    },
    /// The user confirmed; a forced apply is running.
    Resolving,
}

/// The conflict state plus the acting principal's permission to force.
#[derive(Debug, Clone, Default)]
pub struct ConflictGate {
    state: ConflictState,
    can_overwrite: bool,
}

impl ConflictGate {
    #[must_use]
    pub fn new(can_overwrite: bool) -> Self {
        Self {
            state: ConflictState::Idle,
            can_overwrite,
        }
    }

    #[must_use]
    pub fn state(&self) -> &ConflictState {
        &self.state
    }

    /// The user invoked `apply()` while stale and has not resolved it yet.
    #[must_use]
    pub fn attempted_overwrite(&self) -> bool {
        matches!(self.state, ConflictState::PendingConfirmation { .. })
    }

    /// The server confirmed the client is behind, so a forced apply would
    /// clobber newer work.
    #[must_use]
    pub fn will_overwrite_state(&self) -> bool {
        matches!(
            self.state,
            ConflictState::PendingConfirmation { local_version, remote_version, .. }
                if remote_version > local_version
        )
    }

    /// Whether the principal may force the overwrite.
    #[must_use]
    pub fn can_overwrite_state(&self) -> bool {
        self.can_overwrite
    }

    /// Idle -> PendingConfirmation (also refreshes an existing pending record).
    pub fn record_stale(&mut self, constraints: Vec<Constraint>, local_version: u64, remote_version: u64) {
        self.state = ConflictState::PendingConfirmation {
            constraints,
            local_version,
            remote_version,
        };
    }

    /// PendingConfirmation -> Idle without submitting anything.
    ///
    /// Returns `false` when nothing was pending.
    pub fn clear(&mut self) -> bool {
        let was_pending = self.attempted_overwrite();
        if was_pending {
            self.state = ConflictState::Idle;
        }
        was_pending
    }

    /// PendingConfirmation -> Resolving. Any other state is left unchanged.
    pub fn begin_resolve(&mut self) {
        if self.attempted_overwrite() {
            self.state = ConflictState::Resolving;
        }
    }

    /// Back to Idle once a forced apply finished, whatever its outcome.
    pub fn reset(&mut self) {
        self.state = ConflictState::Idle;
    }
}
