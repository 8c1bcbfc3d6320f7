//! First-class domain outcomes for the attendance ledger.
//!
//! These are results, not errors: callers must branch on every variant.

use chrono::NaiveTime;

use crate::policy::AttendanceStatus;
use crate::types::CohortRef;

/// Outcome of a check-in attempt for an already-recognized identity.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckInOutcome {
    /// First recognition of the day (or a previously absentee-swept row was
    /// filled in): a record now carries this status and check-in time.
    Marked { status: AttendanceStatus },
    /// A record with a check-in already exists; nothing was written. Carries
    /// the status fixed at the first recognition of the day.
    AlreadyMarked { status: AttendanceStatus },
    /// The identity belongs to a different cohort than the active scope;
    /// nothing was written. Carries the identity's actual cohort for display.
    ScopeMismatch { actual: CohortRef },
}

/// Outcome of a check-out attempt for an already-recognized identity.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutOutcome {
    CheckedOut { time: NaiveTime },
    AlreadyCheckedOut,
    /// No record with a check-in exists for today; check-out never creates one.
    NoCheckIn,
    ScopeMismatch { actual: CohortRef },
}
