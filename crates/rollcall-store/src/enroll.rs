//! Enrollment with the duplicate-biometric guard.
//!
//! The guard and the identity insert run in one SQLite transaction, so a
//! rejected enrollment leaves no half-created identity behind.

use rollcall_core::Embedding;
use rusqlite::params;
use thiserror::Error;

use crate::store::{decode_embedding, encode_embedding, Store, StoreError};

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("face already enrolled to identity {conflict_id} ({conflict_name})")]
    DuplicateBiometric {
        conflict_id: i64,
        conflict_name: String,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Fields of a not-yet-committed identity. Cohort ids are opaque foreign
/// keys managed by the surrounding administration screens.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub name: String,
    pub roll_no: String,
    pub department_id: i64,
    pub course_id: i64,
    pub session_id: i64,
    pub semester_id: i64,
    pub authorized: bool,
}

impl Store {
    /// Enroll a new identity with its embedding.
    ///
    /// The candidate embedding is compared against every committed identity
    /// with the same distance function and tolerance the match engine uses;
    /// any hit aborts the transaction with `DuplicateBiometric` naming the
    /// conflicting identity.
    pub fn enroll_identity(
        &mut self,
        new: &NewIdentity,
        embedding: &Embedding,
        tolerance: f32,
    ) -> Result<i64, EnrollError> {
        let tx = self.conn.transaction()?;

        if let Some((conflict_id, conflict_name)) =
            find_biometric_conflict(&tx, embedding, tolerance, None)?
        {
            tracing::warn!(
                roll_no = %new.roll_no,
                conflict_id,
                "enrollment rejected: embedding already bound to another identity"
            );
            return Err(EnrollError::DuplicateBiometric {
                conflict_id,
                conflict_name,
            });
        }

        let encoded = encode_embedding(embedding)?;
        tx.execute(
            "INSERT INTO identities \
             (name, roll_no, department_id, course_id, session_id, semester_id, \
              authorized, active, embedding) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8)",
            params![
                new.name,
                new.roll_no,
                new.department_id,
                new.course_id,
                new.session_id,
                new.semester_id,
                new.authorized,
                encoded,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        tracing::info!(identity_id = id, roll_no = %new.roll_no, "identity enrolled");
        Ok(id)
    }

    /// Replace an existing identity's embedding, checking for conflicts
    /// against every *other* identity.
    pub fn reenroll_identity(
        &mut self,
        identity_id: i64,
        embedding: &Embedding,
        tolerance: f32,
    ) -> Result<(), EnrollError> {
        let tx = self.conn.transaction()?;

        if let Some((conflict_id, conflict_name)) =
            find_biometric_conflict(&tx, embedding, tolerance, Some(identity_id))?
        {
            return Err(EnrollError::DuplicateBiometric {
                conflict_id,
                conflict_name,
            });
        }

        let encoded = encode_embedding(embedding)?;
        let changed = tx.execute(
            "UPDATE identities SET embedding = ?1 WHERE id = ?2",
            params![encoded, identity_id],
        )?;
        if changed == 0 {
            return Err(EnrollError::Sqlite(rusqlite::Error::QueryReturnedNoRows));
        }
        tx.commit()?;

        tracing::info!(identity_id, "identity re-enrolled");
        Ok(())
    }
}

/// Scan committed embeddings for one within `tolerance` of the candidate.
/// Returns the first conflicting (id, name) in id order.
fn find_biometric_conflict(
    tx: &rusqlite::Transaction<'_>,
    candidate: &Embedding,
    tolerance: f32,
    exclude_id: Option<i64>,
) -> Result<Option<(i64, String)>, rusqlite::Error> {
    let mut stmt = tx.prepare(
        "SELECT id, name, embedding FROM identities \
         WHERE embedding IS NOT NULL ORDER BY id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    for row in rows {
        let (id, name, raw) = row?;
        if exclude_id == Some(id) {
            continue;
        }
        let Some(existing) = decode_embedding(id, Some(&raw)) else {
            continue;
        };
        if candidate.distance(&existing) <= tolerance {
            return Ok(Some((id, name)));
        }
    }
    Ok(None)
}
