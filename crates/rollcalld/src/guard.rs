//! Session guard: the state machine that locks an operator into an active
//! capture scope until explicitly terminated.
//!
//! The guard itself is pure state; credential and cohort validation results
//! are supplied by the caller. Enforcement of the locked-mode allow-list
//! happens in the router, uniformly, before any endpoint logic.

use rollcall_core::CohortRef;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GuardError {
    #[error("operator is not an administrator")]
    NotAdministrator,
    #[error("no capture session in progress")]
    NotStarted,
    #[error("capture session already locked to a cohort")]
    AlreadyLocked,
    #[error("invalid course or semester selection")]
    InvalidCohort,
    #[error("incorrect password")]
    InvalidCredential,
}

/// Where one operator's capture session currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No active scope.
    #[default]
    Idle,
    /// Operator opened the capture entry point but has not chosen a cohort.
    CohortSelectionPending,
    /// Recognition in progress; navigation restricted to the allow-list.
    Locked(CohortRef),
}

/// Per-operator-session guard instance.
#[derive(Debug, Default)]
pub struct SessionGuard {
    state: SessionState,
}

impl SessionGuard {
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The cohort recognition is scoped to, if locked.
    pub fn active_cohort(&self) -> Option<CohortRef> {
        match self.state {
            SessionState::Locked(cohort) => Some(cohort),
            _ => None,
        }
    }

    /// Enter the capture entry point. Requires the administrator role.
    /// Re-entry is a no-op: an already pending or locked session keeps its
    /// state (the capture page is on the allow-list).
    pub fn begin(&mut self, is_admin: bool) -> Result<SessionState, GuardError> {
        if !is_admin {
            return Err(GuardError::NotAdministrator);
        }
        if self.state == SessionState::Idle {
            self.state = SessionState::CohortSelectionPending;
        }
        Ok(self.state)
    }

    /// Lock onto a cohort. `cohort_valid` is the caller's verdict on whether
    /// the (course, semester) pair resolves to active records; an invalid
    /// selection leaves the state at `CohortSelectionPending`.
    pub fn select_cohort(
        &mut self,
        cohort: CohortRef,
        cohort_valid: bool,
    ) -> Result<(), GuardError> {
        match self.state {
            SessionState::Idle => Err(GuardError::NotStarted),
            SessionState::Locked(_) => Err(GuardError::AlreadyLocked),
            SessionState::CohortSelectionPending => {
                if !cohort_valid {
                    return Err(GuardError::InvalidCohort);
                }
                self.state = SessionState::Locked(cohort);
                tracing::info!(%cohort, "capture session locked");
                Ok(())
            }
        }
    }

    /// Explicit termination. `credential_ok` is the caller's verdict on the
    /// re-submitted password; on failure all scope state is retained.
    pub fn terminate(&mut self, credential_ok: bool) -> Result<(), GuardError> {
        if !credential_ok {
            return Err(GuardError::InvalidCredential);
        }
        tracing::info!(state = ?self.state, "capture session terminated");
        self.state = SessionState::Idle;
        Ok(())
    }

    /// Forced teardown (logout or allow-list violation): clears all state
    /// without a credential check.
    pub fn teardown(&mut self) {
        self.state = SessionState::Idle;
    }
}
