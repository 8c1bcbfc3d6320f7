//! SQLite persistence and the storage-invariant operations.
//!
//! The attendance ledger, the absentee/auto-checkout sweeps, and the
//! duplicate-enrollment guard live here because their contracts are defined
//! by the uniqueness and write-once constraints the schema enforces.

mod auth;
mod enroll;
mod ledger;
mod schema;
mod store;

pub use auth::Operator;
pub use enroll::{EnrollError, NewIdentity};
pub use ledger::SweepReport;
pub use store::{AttendanceRow, Identity, Store, StoreError};
