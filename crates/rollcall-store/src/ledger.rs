//! Attendance ledger: check-in, check-out, absentee marking, auto-checkout.
//!
//! Every operation here is idempotent under repeated recognition of the same
//! person on the same day. The UNIQUE(identity_id, date) constraint is the
//! storage backstop; the "already marked" checks are the concurrency guard.

use chrono::{Days, NaiveDate, NaiveTime};
use rollcall_core::{AttendanceStatus, CheckInOutcome, CheckOutOutcome, CohortRef};

use crate::store::{fmt_date, raw_attendance_row, finish_attendance_row, Identity, Store, StoreError};

/// Counts reported by the auto-checkout sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub updated: usize,
    /// Rows selected but already checked out by the time of the write.
    pub skipped: usize,
    /// Per-date breakdown of updated rows, ascending by date.
    pub by_date: Vec<(NaiveDate, usize)>,
}

impl Store {
    /// Record a check-in for a recognized identity.
    ///
    /// The status established at the first recognition of the day is final:
    /// later recognitions return `AlreadyMarked` with the original status,
    /// even if the clock has since crossed a cutoff. A row left by the
    /// absentee sweep (status set, check-in NULL) is filled in and
    /// reclassified instead.
    pub fn check_in(
        &self,
        identity: &Identity,
        scope: CohortRef,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<CheckInOutcome, StoreError> {
        if identity.cohort() != scope {
            tracing::info!(
                identity_id = identity.id,
                actual = %identity.cohort(),
                scope = %scope,
                "check-in refused: cohort outside active scope"
            );
            return Ok(CheckInOutcome::ScopeMismatch {
                actual: identity.cohort(),
            });
        }

        match self.attendance_on(identity.id, date)? {
            None => {
                let status = self.policy()?.classify(time);
                self.insert_attendance(identity.id, date, Some(time), status, false)?;
                tracing::info!(identity_id = identity.id, %status, %time, "checked in");
                Ok(CheckInOutcome::Marked { status })
            }
            Some(row) if row.check_in.is_none() => {
                let status = self.policy()?.classify(time);
                self.fill_check_in(row.id, time, status)?;
                tracing::info!(
                    identity_id = identity.id,
                    %status,
                    %time,
                    "filled check-in on existing row"
                );
                Ok(CheckInOutcome::Marked { status })
            }
            Some(row) => Ok(CheckInOutcome::AlreadyMarked { status: row.status }),
        }
    }

    /// Record a check-out. Requires an existing row with a check-in; writes
    /// the check-out time once and never recomputes the status.
    pub fn check_out(
        &self,
        identity: &Identity,
        scope: CohortRef,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<CheckOutOutcome, StoreError> {
        if identity.cohort() != scope {
            return Ok(CheckOutOutcome::ScopeMismatch {
                actual: identity.cohort(),
            });
        }

        let row = match self.attendance_on(identity.id, date)? {
            Some(row) if row.check_in.is_some() => row,
            _ => return Ok(CheckOutOutcome::NoCheckIn),
        };

        if row.check_out.is_some() {
            return Ok(CheckOutOutcome::AlreadyCheckedOut);
        }

        if self.set_check_out_if_null(row.id, time)? {
            tracing::info!(identity_id = identity.id, %time, "checked out");
            Ok(CheckOutOutcome::CheckedOut { time })
        } else {
            // Lost a race with a concurrent check-out.
            Ok(CheckOutOutcome::AlreadyCheckedOut)
        }
    }

    /// Create an absent row (check-in NULL) for every authorized, active
    /// identity with no attendance record on `date` and no approved leave
    /// covering it. Safe to re-run: rows that exist are excluded by the
    /// NOT EXISTS predicate. Returns the number of rows created.
    pub fn mark_absentees(&self, date: NaiveDate) -> Result<usize, StoreError> {
        let date_s = fmt_date(date);
        let mut stmt = self.conn.prepare(
            "SELECT i.id FROM identities i \
             WHERE i.authorized = 1 AND i.active = 1 \
               AND NOT EXISTS (SELECT 1 FROM attendance a \
                               WHERE a.identity_id = i.id AND a.date = ?1) \
               AND NOT EXISTS (SELECT 1 FROM leaves l \
                               WHERE l.identity_id = i.id AND l.status = 'approved' \
                                 AND l.start_date <= ?1 AND l.end_date >= ?1)",
        )?;
        let ids: Vec<i64> = stmt
            .query_map([&date_s], |row| row.get(0))?
            .collect::<Result<_, _>>()?;

        for &id in &ids {
            self.insert_attendance(id, date, None, AttendanceStatus::Absent, false)?;
        }
        tracing::info!(date = %date, marked = ids.len(), "absentee sweep complete");
        Ok(ids.len())
    }

    /// Close stale open records: check-in set, check-out NULL, dated at or
    /// before `today - days`, not manually marked. Each gets `default_time`
    /// as its check-out, re-checking NULL immediately before the write so a
    /// concurrent sweep cannot double-process a row.
    pub fn sweep_auto_checkout(
        &self,
        today: NaiveDate,
        days: u64,
        default_time: NaiveTime,
    ) -> Result<SweepReport, StoreError> {
        let cutoff = today
            .checked_sub_days(Days::new(days))
            .unwrap_or(NaiveDate::MIN);

        let mut stmt = self.conn.prepare(
            "SELECT id, identity_id, date, check_in, check_out, status, manually_marked \
             FROM attendance \
             WHERE check_in IS NOT NULL AND check_out IS NULL \
               AND date <= ?1 AND manually_marked = 0 \
             ORDER BY date",
        )?;
        let rows = stmt.query_map([fmt_date(cutoff)], raw_attendance_row)?;

        let mut report = SweepReport {
            updated: 0,
            skipped: 0,
            by_date: Vec::new(),
        };

        for raw in rows {
            let row = finish_attendance_row(raw?)?;
            if self.set_check_out_if_null(row.id, default_time)? {
                report.updated += 1;
                match report.by_date.last_mut() {
                    Some((d, n)) if *d == row.date => *n += 1,
                    _ => report.by_date.push((row.date, 1)),
                }
            } else {
                report.skipped += 1;
            }
        }

        tracing::info!(
            cutoff = %cutoff,
            updated = report.updated,
            skipped = report.skipped,
            "auto-checkout sweep complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enroll::NewIdentity;
    use rollcall_core::Embedding;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    /// Store with one active course/semester pair and one enrolled identity.
    fn store_with_identity() -> (Store, Identity, CohortRef) {
        let mut store = Store::open_in_memory().unwrap();
        let course_id = store.add_course("CS", true).unwrap();
        let semester_id = store.add_semester("Fall", true).unwrap();
        let scope = CohortRef { course_id, semester_id };

        let id = store
            .enroll_identity(
                &NewIdentity {
                    name: "Asha Rao".into(),
                    roll_no: "CS-0001".into(),
                    department_id: 1,
                    course_id,
                    session_id: 1,
                    semester_id,
                    authorized: true,
                },
                &Embedding::new(vec![1.0, 0.0, 0.0]),
                0.45,
            )
            .unwrap();
        let identity = store.identity(id).unwrap().unwrap();
        (store, identity, scope)
    }

    fn enroll_second(store: &mut Store, scope: CohortRef, roll: &str, emb: Vec<f32>) -> Identity {
        let id = store
            .enroll_identity(
                &NewIdentity {
                    name: format!("Student {roll}"),
                    roll_no: roll.into(),
                    department_id: 1,
                    course_id: scope.course_id,
                    session_id: 1,
                    semester_id: scope.semester_id,
                    authorized: true,
                },
                &Embedding::new(emb),
                0.45,
            )
            .unwrap();
        store.identity(id).unwrap().unwrap()
    }

    #[test]
    fn test_check_in_creates_record_with_classified_status() {
        let (store, identity, scope) = store_with_identity();
        let today = d(2026, 3, 2);

        let outcome = store.check_in(&identity, scope, today, t(9, 15)).unwrap();
        assert_eq!(
            outcome,
            CheckInOutcome::Marked { status: AttendanceStatus::Present }
        );

        let row = store.attendance_on(identity.id, today).unwrap().unwrap();
        assert_eq!(row.check_in, Some(t(9, 15)));
        assert_eq!(row.status, AttendanceStatus::Present);
        assert!(!row.manually_marked);
    }

    #[test]
    fn test_check_in_is_idempotent_and_status_is_fixed_at_first_of_day() {
        let (store, identity, scope) = store_with_identity();
        let today = d(2026, 3, 2);

        store.check_in(&identity, scope, today, t(9, 15)).unwrap();
        // Second recognition much later: no mutation, original status returned.
        let second = store.check_in(&identity, scope, today, t(10, 45)).unwrap();
        assert_eq!(
            second,
            CheckInOutcome::AlreadyMarked { status: AttendanceStatus::Present }
        );

        let row = store.attendance_on(identity.id, today).unwrap().unwrap();
        assert_eq!(row.check_in, Some(t(9, 15)));
        assert_eq!(row.status, AttendanceStatus::Present);
    }

    #[test]
    fn test_late_and_absent_classification_on_first_recognition() {
        let (mut store, _first, scope) = store_with_identity();
        let today = d(2026, 3, 2);

        let late = enroll_second(&mut store, scope, "CS-0002", vec![0.0, 1.0, 0.0]);
        let outcome = store.check_in(&late, scope, today, t(10, 45)).unwrap();
        assert_eq!(outcome, CheckInOutcome::Marked { status: AttendanceStatus::Late });

        let absent = enroll_second(&mut store, scope, "CS-0003", vec![0.0, 0.0, 1.0]);
        let outcome = store.check_in(&absent, scope, today, t(11, 30)).unwrap();
        assert_eq!(outcome, CheckInOutcome::Marked { status: AttendanceStatus::Absent });
    }

    #[test]
    fn test_scope_mismatch_writes_nothing() {
        let (store, identity, _scope) = store_with_identity();
        let other = CohortRef { course_id: 99, semester_id: 99 };
        let today = d(2026, 3, 2);

        let outcome = store.check_in(&identity, other, today, t(9, 0)).unwrap();
        assert_eq!(
            outcome,
            CheckInOutcome::ScopeMismatch { actual: identity.cohort() }
        );
        assert!(store.attendance_on(identity.id, today).unwrap().is_none());

        let outcome = store.check_out(&identity, other, today, t(17, 0)).unwrap();
        assert_eq!(
            outcome,
            CheckOutOutcome::ScopeMismatch { actual: identity.cohort() }
        );
    }

    #[test]
    fn test_check_in_fills_absentee_swept_row() {
        let (store, identity, scope) = store_with_identity();
        let today = d(2026, 3, 2);

        store.mark_absentees(today).unwrap();
        let row = store.attendance_on(identity.id, today).unwrap().unwrap();
        assert_eq!(row.status, AttendanceStatus::Absent);
        assert!(row.check_in.is_none());

        let outcome = store.check_in(&identity, scope, today, t(9, 0)).unwrap();
        assert_eq!(outcome, CheckInOutcome::Marked { status: AttendanceStatus::Present });
        let row = store.attendance_on(identity.id, today).unwrap().unwrap();
        assert_eq!(row.check_in, Some(t(9, 0)));
        assert_eq!(row.status, AttendanceStatus::Present);
    }

    #[test]
    fn test_check_out_requires_check_in() {
        let (store, identity, scope) = store_with_identity();
        let today = d(2026, 3, 2);

        let outcome = store.check_out(&identity, scope, today, t(17, 0)).unwrap();
        assert_eq!(outcome, CheckOutOutcome::NoCheckIn);

        // An absentee row without a check-in still counts as no check-in.
        store.mark_absentees(today).unwrap();
        let outcome = store.check_out(&identity, scope, today, t(17, 0)).unwrap();
        assert_eq!(outcome, CheckOutOutcome::NoCheckIn);
    }

    #[test]
    fn test_check_out_single_write_then_already_checked_out() {
        let (store, identity, scope) = store_with_identity();
        let today = d(2026, 3, 2);

        store.check_in(&identity, scope, today, t(9, 0)).unwrap();
        let first = store.check_out(&identity, scope, today, t(17, 0)).unwrap();
        assert_eq!(first, CheckOutOutcome::CheckedOut { time: t(17, 0) });

        let second = store.check_out(&identity, scope, today, t(18, 0)).unwrap();
        assert_eq!(second, CheckOutOutcome::AlreadyCheckedOut);

        let row = store.attendance_on(identity.id, today).unwrap().unwrap();
        assert_eq!(row.check_out, Some(t(17, 0)));
        // Status untouched by checkout.
        assert_eq!(row.status, AttendanceStatus::Present);
    }

    #[test]
    fn test_one_record_per_identity_and_day() {
        let (store, identity, scope) = store_with_identity();
        let today = d(2026, 3, 2);

        store.check_in(&identity, scope, today, t(9, 0)).unwrap();
        store.check_in(&identity, scope, today, t(10, 0)).unwrap();
        store.check_out(&identity, scope, today, t(17, 0)).unwrap();
        store.check_out(&identity, scope, today, t(18, 0)).unwrap();

        let count: i64 = store
            .conn
            .query_row(
                "SELECT COUNT(*) FROM attendance WHERE identity_id = ?1 AND date = ?2",
                rusqlite::params![identity.id, fmt_date(today)],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_mark_absentees_skips_marked_and_on_leave() {
        let (mut store, checked_in, scope) = store_with_identity();
        let on_leave = enroll_second(&mut store, scope, "CS-0002", vec![0.0, 1.0, 0.0]);
        let pending_leave = enroll_second(&mut store, scope, "CS-0003", vec![0.0, 0.0, 1.0]);
        let today = d(2026, 3, 2);

        store.check_in(&checked_in, scope, today, t(9, 0)).unwrap();
        store
            .add_leave(on_leave.id, d(2026, 3, 1), d(2026, 3, 3), "approved")
            .unwrap();
        // Pending leave does not exempt.
        store
            .add_leave(pending_leave.id, d(2026, 3, 1), d(2026, 3, 3), "pending")
            .unwrap();

        let marked = store.mark_absentees(today).unwrap();
        assert_eq!(marked, 1);
        assert!(store.attendance_on(on_leave.id, today).unwrap().is_none());
        let row = store.attendance_on(pending_leave.id, today).unwrap().unwrap();
        assert_eq!(row.status, AttendanceStatus::Absent);

        // Re-run is a no-op.
        assert_eq!(store.mark_absentees(today).unwrap(), 0);
    }

    #[test]
    fn test_sweep_closes_stale_rows_and_spares_manual_ones() {
        let (mut store, stale, scope) = store_with_identity();
        let manual = enroll_second(&mut store, scope, "CS-0002", vec![0.0, 1.0, 0.0]);
        let today = d(2026, 3, 4);
        let two_days_ago = d(2026, 3, 2);

        store.check_in(&stale, scope, two_days_ago, t(9, 0)).unwrap();
        // Manually marked row, otherwise identical.
        store
            .insert_attendance(
                manual.id,
                two_days_ago,
                Some(t(9, 0)),
                AttendanceStatus::Present,
                true,
            )
            .unwrap();

        let report = store
            .sweep_auto_checkout(today, 1, t(23, 59))
            .unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.by_date, vec![(two_days_ago, 1)]);

        let row = store.attendance_on(stale.id, two_days_ago).unwrap().unwrap();
        assert_eq!(row.check_out, Some(t(23, 59)));

        let row = store.attendance_on(manual.id, two_days_ago).unwrap().unwrap();
        assert!(row.check_out.is_none());
    }

    #[test]
    fn test_sweep_ignores_recent_and_closed_rows() {
        let (store, identity, scope) = store_with_identity();
        let today = d(2026, 3, 4);

        // Today's open row is inside the threshold window.
        store.check_in(&identity, scope, today, t(9, 0)).unwrap();
        let report = store.sweep_auto_checkout(today, 1, t(23, 59)).unwrap();
        assert_eq!(report.updated, 0);

        // A closed old row is never reopened or rewritten.
        let old = d(2026, 3, 1);
        store.check_in(&identity, scope, old, t(9, 0)).unwrap();
        store.check_out(&identity, scope, old, t(17, 0)).unwrap();
        let report = store.sweep_auto_checkout(today, 1, t(23, 59)).unwrap();
        assert_eq!(report.updated, 0);
        let row = store.attendance_on(identity.id, old).unwrap().unwrap();
        assert_eq!(row.check_out, Some(t(17, 0)));
    }

    #[test]
    fn test_policy_rejection_keeps_previous_configuration() {
        let (store, _identity, _scope) = store_with_identity();

        store.set_policy(t(9, 0), t(10, 30)).unwrap();
        let err = store.set_policy(t(11, 0), t(10, 0));
        assert!(err.is_err());

        let policy = store.policy().unwrap();
        assert_eq!(policy.present_cutoff, t(9, 0));
        assert_eq!(policy.late_cutoff, t(10, 30));
    }

    #[test]
    fn test_policy_defaults_materialized_on_first_read() {
        let store = Store::open_in_memory().unwrap();
        let policy = store.policy().unwrap();
        assert_eq!(policy.present_cutoff, t(9, 30));
        assert_eq!(policy.late_cutoff, t(11, 0));
    }
}
