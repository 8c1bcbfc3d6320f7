//! Request routing and the locked-mode allow-list.
//!
//! While an operator's guard is `Locked`, any endpoint outside the fixed
//! allow-list forces an immediate session teardown. This check runs before
//! any endpoint logic, uniformly for every request.

use crate::guard::SessionState;

/// Every request surface the daemon serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Login,
    Logout,
    /// Capture entry point: starting a session and selecting a cohort.
    CapturePage,
    Recognize,
    Checkout,
    EndCapture,
    StaticAsset,
    // Administrative surfaces, fenced off while a capture session is locked.
    Dashboard,
    ManageIdentities,
    EnrollIdentity,
    PolicySettings,
    AttendanceReport,
}

impl Endpoint {
    /// The fixed allow-list of endpoints reachable while `Locked`.
    pub fn allowed_while_locked(self) -> bool {
        matches!(
            self,
            Endpoint::Login
                | Endpoint::Logout
                | Endpoint::CapturePage
                | Endpoint::Recognize
                | Endpoint::Checkout
                | Endpoint::EndCapture
                | Endpoint::StaticAsset
        )
    }

    /// Everything except login and static assets requires an
    /// operator with the administrator role.
    pub fn requires_admin(self) -> bool {
        !matches!(self, Endpoint::Login | Endpoint::Logout | Endpoint::StaticAsset)
    }
}

/// Verdict of the pre-handler routing check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Proceed,
    /// Locked session tried to leave the allow-list: log the operator out
    /// and clear all scope state before any handler runs.
    Teardown,
}

pub fn check(state: SessionState, endpoint: Endpoint) -> RouteDecision {
    match state {
        SessionState::Locked(_) if !endpoint.allowed_while_locked() => RouteDecision::Teardown,
        _ => RouteDecision::Proceed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::CohortRef;

    const LOCKED: SessionState = SessionState::Locked(CohortRef {
        course_id: 1,
        semester_id: 1,
    });

    #[test]
    fn test_everything_allowed_when_not_locked() {
        for state in [SessionState::Idle, SessionState::CohortSelectionPending] {
            for endpoint in [
                Endpoint::Dashboard,
                Endpoint::ManageIdentities,
                Endpoint::PolicySettings,
                Endpoint::Recognize,
            ] {
                assert_eq!(check(state, endpoint), RouteDecision::Proceed);
            }
        }
    }

    #[test]
    fn test_allow_list_honored_while_locked() {
        for endpoint in [
            Endpoint::Login,
            Endpoint::Logout,
            Endpoint::CapturePage,
            Endpoint::Recognize,
            Endpoint::Checkout,
            Endpoint::EndCapture,
            Endpoint::StaticAsset,
        ] {
            assert_eq!(check(LOCKED, endpoint), RouteDecision::Proceed);
        }
    }

    #[test]
    fn test_admin_endpoints_torn_down_while_locked() {
        for endpoint in [
            Endpoint::Dashboard,
            Endpoint::ManageIdentities,
            Endpoint::EnrollIdentity,
            Endpoint::PolicySettings,
            Endpoint::AttendanceReport,
        ] {
            assert_eq!(check(LOCKED, endpoint), RouteDecision::Teardown);
        }
    }
}
