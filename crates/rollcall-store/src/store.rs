use std::path::Path;

use chrono::{NaiveDate, NaiveTime};
use rollcall_core::{
    AttendanceStatus, CohortRef, Embedding, Gallery, GalleryEntry, PolicyConfig, PolicyError,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;

use crate::schema::SCHEMA;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

/// An enrolled person. `embedding` is NULL until enrollment binds one;
/// identities without an embedding are excluded from matching.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: i64,
    pub name: String,
    pub roll_no: String,
    pub department_id: i64,
    pub course_id: i64,
    pub session_id: i64,
    pub semester_id: i64,
    pub authorized: bool,
    pub active: bool,
    pub embedding: Option<Embedding>,
}

impl Identity {
    pub fn cohort(&self) -> CohortRef {
        CohortRef {
            course_id: self.course_id,
            semester_id: self.semester_id,
        }
    }
}

/// One (identity, date) attendance row.
#[derive(Debug, Clone)]
pub struct AttendanceRow {
    pub id: i64,
    pub identity_id: i64,
    pub date: NaiveDate,
    pub check_in: Option<NaiveTime>,
    pub check_out: Option<NaiveTime>,
    pub status: AttendanceStatus,
    pub manually_marked: bool,
}

/// SQLite-backed store. One connection; the daemon confines it to the
/// engine thread, the CLI uses it directly.
pub struct Store {
    pub(crate) conn: Connection,
}

pub(crate) const DATE_FMT: &str = "%Y-%m-%d";
pub(crate) const TIME_FMT: &str = "%H:%M:%S";

pub(crate) fn fmt_date(d: NaiveDate) -> String {
    d.format(DATE_FMT).to_string()
}

pub(crate) fn fmt_time(t: NaiveTime) -> String {
    t.format(TIME_FMT).to_string()
}

fn parse_date(s: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(s, DATE_FMT)
        .map_err(|e| StoreError::CorruptRow(format!("bad date {s:?}: {e}")))
}

fn parse_time(s: &str) -> Result<NaiveTime, StoreError> {
    NaiveTime::parse_from_str(s, TIME_FMT)
        .map_err(|e| StoreError::CorruptRow(format!("bad time {s:?}: {e}")))
}

fn identity_from_row(row: &Row<'_>) -> rusqlite::Result<(Identity, Option<String>)> {
    let raw_embedding: Option<String> = row.get(9)?;
    Ok((
        Identity {
            id: row.get(0)?,
            name: row.get(1)?,
            roll_no: row.get(2)?,
            department_id: row.get(3)?,
            course_id: row.get(4)?,
            session_id: row.get(5)?,
            semester_id: row.get(6)?,
            authorized: row.get(7)?,
            active: row.get(8)?,
            embedding: None,
        },
        raw_embedding,
    ))
}

const IDENTITY_COLS: &str =
    "id, name, roll_no, department_id, course_id, session_id, semester_id, \
     authorized, active, embedding";

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        tracing::info!(path = %path.display(), "store opened");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Test support: run a raw statement against the underlying connection,
    /// e.g. to simulate storage faults.
    #[cfg(feature = "test-util")]
    pub fn execute_raw(&self, sql: &str) -> Result<usize, StoreError> {
        Ok(self.conn.execute(sql, [])?)
    }

    // --- cohort reference data ---

    pub fn add_course(&self, name: &str, active: bool) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO courses (name, active) VALUES (?1, ?2)",
            params![name, active],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn add_semester(&self, name: &str, active: bool) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO semesters (name, active) VALUES (?1, ?2)",
            params![name, active],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// True when both halves of the cohort resolve to active rows.
    pub fn cohort_active(&self, cohort: CohortRef) -> Result<bool, StoreError> {
        let course: Option<bool> = self
            .conn
            .query_row(
                "SELECT active FROM courses WHERE id = ?1",
                params![cohort.course_id],
                |row| row.get(0),
            )
            .optional()?;
        let semester: Option<bool> = self
            .conn
            .query_row(
                "SELECT active FROM semesters WHERE id = ?1",
                params![cohort.semester_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(course == Some(true) && semester == Some(true))
    }

    pub fn course_name(&self, id: i64) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT name FROM courses WHERE id = ?1", params![id], |r| {
                r.get(0)
            })
            .optional()?)
    }

    pub fn semester_name(&self, id: i64) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT name FROM semesters WHERE id = ?1",
                params![id],
                |r| r.get(0),
            )
            .optional()?)
    }

    // --- identities ---

    pub fn identity(&self, id: i64) -> Result<Option<Identity>, StoreError> {
        let found = self
            .conn
            .query_row(
                &format!("SELECT {IDENTITY_COLS} FROM identities WHERE id = ?1"),
                params![id],
                identity_from_row,
            )
            .optional()?;
        match found {
            Some((mut identity, raw)) => {
                identity.embedding = decode_embedding(identity.id, raw.as_deref());
                Ok(Some(identity))
            }
            None => Ok(None),
        }
    }

    pub fn identity_by_roll(&self, roll_no: &str) -> Result<Option<Identity>, StoreError> {
        let found = self
            .conn
            .query_row(
                &format!("SELECT {IDENTITY_COLS} FROM identities WHERE roll_no = ?1"),
                params![roll_no],
                identity_from_row,
            )
            .optional()?;
        match found {
            Some((mut identity, raw)) => {
                identity.embedding = decode_embedding(identity.id, raw.as_deref());
                Ok(Some(identity))
            }
            None => Ok(None),
        }
    }

    /// All identities, embeddings omitted. For listings.
    pub fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {IDENTITY_COLS} FROM identities ORDER BY roll_no"
        ))?;
        let rows = stmt.query_map([], identity_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            let (identity, _) = row?;
            out.push(identity);
        }
        Ok(out)
    }

    /// Build the matchable gallery: every authorized, active identity with a
    /// present embedding. A row whose embedding fails to decode is logged
    /// and skipped; the rest of the gallery stays valid.
    pub fn load_gallery(&self) -> Result<Gallery, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, embedding FROM identities \
             WHERE authorized = 1 AND active = 1 AND embedding IS NOT NULL \
             ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (identity_id, raw) = row?;
            match serde_json::from_str::<Vec<f32>>(&raw) {
                Ok(values) => entries.push(GalleryEntry {
                    identity_id,
                    embedding: Embedding::new(values),
                }),
                Err(e) => {
                    tracing::warn!(identity_id, error = %e, "skipping undecodable embedding");
                }
            }
        }
        tracing::info!(count = entries.len(), "gallery loaded");
        Ok(Gallery::new(entries))
    }

    // --- attendance rows ---

    pub fn attendance_on(
        &self,
        identity_id: i64,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRow>, StoreError> {
        let found = self
            .conn
            .query_row(
                "SELECT id, identity_id, date, check_in, check_out, status, manually_marked \
                 FROM attendance WHERE identity_id = ?1 AND date = ?2",
                params![identity_id, fmt_date(date)],
                raw_attendance_row,
            )
            .optional()?;
        found.map(finish_attendance_row).transpose()
    }

    pub(crate) fn insert_attendance(
        &self,
        identity_id: i64,
        date: NaiveDate,
        check_in: Option<NaiveTime>,
        status: AttendanceStatus,
        manually_marked: bool,
    ) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO attendance (identity_id, date, check_in, status, manually_marked) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                identity_id,
                fmt_date(date),
                check_in.map(fmt_time),
                status.as_str(),
                manually_marked
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub(crate) fn fill_check_in(
        &self,
        row_id: i64,
        time: NaiveTime,
        status: AttendanceStatus,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE attendance SET check_in = ?1, status = ?2 WHERE id = ?3",
            params![fmt_time(time), status.as_str(), row_id],
        )?;
        Ok(())
    }

    /// Set check-out only if it is still unset. Returns whether a write
    /// happened; the WHERE clause is the concurrency re-check.
    pub(crate) fn set_check_out_if_null(
        &self,
        row_id: i64,
        time: NaiveTime,
    ) -> Result<bool, StoreError> {
        let changed = self.conn.execute(
            "UPDATE attendance SET check_out = ?1 WHERE id = ?2 AND check_out IS NULL",
            params![fmt_time(time), row_id],
        )?;
        Ok(changed == 1)
    }

    // --- policy singleton ---

    /// Read the policy, materializing the defaults on first read.
    pub fn policy(&self) -> Result<PolicyConfig, StoreError> {
        let found = self
            .conn
            .query_row(
                "SELECT present_cutoff, late_cutoff FROM policy WHERE id = 1",
                [],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        match found {
            Some((present, late)) => Ok(PolicyConfig::new(parse_time(&present)?, parse_time(&late)?)?),
            None => {
                let defaults = PolicyConfig::default_cutoffs();
                self.conn.execute(
                    "INSERT INTO policy (id, present_cutoff, late_cutoff) VALUES (1, ?1, ?2)",
                    params![fmt_time(defaults.present_cutoff), fmt_time(defaults.late_cutoff)],
                )?;
                tracing::info!("policy row absent; materialized defaults");
                Ok(defaults)
            }
        }
    }

    /// Persist new cutoffs. Ordering is validated before the write; an
    /// invalid pair is rejected and the stored configuration is untouched.
    pub fn set_policy(
        &self,
        present_cutoff: NaiveTime,
        late_cutoff: NaiveTime,
    ) -> Result<PolicyConfig, StoreError> {
        let policy = PolicyConfig::new(present_cutoff, late_cutoff)?;
        self.conn.execute(
            "INSERT INTO policy (id, present_cutoff, late_cutoff) VALUES (1, ?1, ?2) \
             ON CONFLICT (id) DO UPDATE SET present_cutoff = ?1, late_cutoff = ?2",
            params![fmt_time(policy.present_cutoff), fmt_time(policy.late_cutoff)],
        )?;
        Ok(policy)
    }

    // --- leave ---

    pub fn add_leave(
        &self,
        identity_id: i64,
        start: NaiveDate,
        end: NaiveDate,
        status: &str,
    ) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO leaves (identity_id, start_date, end_date, status) \
             VALUES (?1, ?2, ?3, ?4)",
            params![identity_id, fmt_date(start), fmt_date(end), status],
        )?;
        Ok(self.conn.last_insert_rowid())
    }
}

pub(crate) fn encode_embedding(embedding: &Embedding) -> Result<String, StoreError> {
    serde_json::to_string(&embedding.values)
        .map_err(|e| StoreError::CorruptRow(format!("unencodable embedding: {e}")))
}

pub(crate) fn decode_embedding(identity_id: i64, raw: Option<&str>) -> Option<Embedding> {
    let raw = raw?;
    match serde_json::from_str::<Vec<f32>>(raw) {
        Ok(values) => Some(Embedding::new(values)),
        Err(e) => {
            tracing::warn!(identity_id, error = %e, "undecodable embedding on identity row");
            None
        }
    }
}

pub(crate) struct RawAttendance {
    id: i64,
    identity_id: i64,
    date: String,
    check_in: Option<String>,
    check_out: Option<String>,
    status: String,
    manually_marked: bool,
}

pub(crate) fn raw_attendance_row(row: &Row<'_>) -> rusqlite::Result<RawAttendance> {
    Ok(RawAttendance {
        id: row.get(0)?,
        identity_id: row.get(1)?,
        date: row.get(2)?,
        check_in: row.get(3)?,
        check_out: row.get(4)?,
        status: row.get(5)?,
        manually_marked: row.get(6)?,
    })
}

pub(crate) fn finish_attendance_row(raw: RawAttendance) -> Result<AttendanceRow, StoreError> {
    let status = AttendanceStatus::parse(&raw.status)
        .ok_or_else(|| StoreError::CorruptRow(format!("bad status {:?}", raw.status)))?;
    Ok(AttendanceRow {
        id: raw.id,
        identity_id: raw.identity_id,
        date: parse_date(&raw.date)?,
        check_in: raw.check_in.as_deref().map(parse_time).transpose()?,
        check_out: raw.check_out.as_deref().map(parse_time).transpose()?,
        status,
        manually_marked: raw.manually_marked,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enroll::NewIdentity;

    fn new_identity(roll: &str) -> NewIdentity {
        NewIdentity {
            name: format!("Student {roll}"),
            roll_no: roll.into(),
            department_id: 1,
            course_id: 1,
            session_id: 1,
            semester_id: 1,
            authorized: true,
        }
    }

    #[test]
    fn test_load_gallery_skips_undecodable_embedding() {
        let mut store = Store::open_in_memory().unwrap();
        store
            .enroll_identity(&new_identity("R-1"), &Embedding::new(vec![1.0, 0.0]), 0.45)
            .unwrap();

        // A row whose embedding column is not valid JSON, planted directly.
        store
            .conn
            .execute(
                "INSERT INTO identities \
                 (name, roll_no, department_id, course_id, session_id, semester_id, \
                  authorized, active, embedding) \
                 VALUES ('Broken Row', 'R-X', 1, 1, 1, 1, 1, 1, 'not-json')",
                [],
            )
            .unwrap();

        store
            .enroll_identity(&new_identity("R-2"), &Embedding::new(vec![0.0, 1.0]), 0.45)
            .unwrap();

        // The corrupt row is skipped; everyone else stays matchable.
        let gallery = store.load_gallery().unwrap();
        assert_eq!(gallery.len(), 2);
        let m = gallery
            .best_match(&Embedding::new(vec![0.95, 0.0]), 0.45)
            .unwrap();
        let r1 = store.identity_by_roll("R-1").unwrap().unwrap();
        assert_eq!(m.identity_id, r1.id);
    }

    #[test]
    fn test_load_gallery_excludes_unauthorized_and_inactive() {
        let mut store = Store::open_in_memory().unwrap();
        let mut unauthorized = new_identity("R-1");
        unauthorized.authorized = false;
        store
            .enroll_identity(&unauthorized, &Embedding::new(vec![1.0, 0.0]), 0.45)
            .unwrap();
        let active = store
            .enroll_identity(&new_identity("R-2"), &Embedding::new(vec![0.0, 1.0]), 0.45)
            .unwrap();

        let gallery = store.load_gallery().unwrap();
        assert_eq!(gallery.len(), 1);
        let m = gallery
            .best_match(&Embedding::new(vec![0.0, 1.0]), 0.45)
            .unwrap();
        assert_eq!(m.identity_id, active);
    }
}
