//! Operator accounts and credential verification.
//!
//! Authentication *storage* proper is an external concern; the store carries
//! just enough for the daemon to verify logins and the password re-check
//! required to terminate a capture session.

use rand::RngCore;
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::store::{Store, StoreError};

#[derive(Debug, Clone)]
pub struct Operator {
    pub id: i64,
    pub username: String,
    pub is_admin: bool,
}

fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl Store {
    /// Whether any operator account exists (first-run bootstrap check).
    pub fn has_operators(&self) -> Result<bool, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM operators", [], |row| row.get(0))?;
        Ok(count > 0)
    }

    pub fn create_operator(
        &self,
        username: &str,
        password: &str,
        is_admin: bool,
    ) -> Result<i64, StoreError> {
        let mut salt_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt_bytes);
        let salt = hex_encode(&salt_bytes);
        let hash = hash_password(password, &salt);

        self.conn.execute(
            "INSERT INTO operators (username, password_hash, salt, is_admin) \
             VALUES (?1, ?2, ?3, ?4)",
            params![username, hash, salt, is_admin],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Verify a username/password pair; `None` on unknown user or bad password.
    pub fn verify_operator(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<Operator>, StoreError> {
        let found = self
            .conn
            .query_row(
                "SELECT id, username, password_hash, salt, is_admin \
                 FROM operators WHERE username = ?1",
                params![username],
                |row| {
                    Ok((
                        Operator {
                            id: row.get(0)?,
                            username: row.get(1)?,
                            is_admin: row.get(4)?,
                        },
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        Ok(found.and_then(|(operator, hash, salt)| {
            if hash_password(password, &salt) == hash {
                Some(operator)
            } else {
                tracing::info!(username, "password verification failed");
                None
            }
        }))
    }

    /// Re-verify the password of a known operator (session termination).
    pub fn verify_operator_password(
        &self,
        operator_id: i64,
        password: &str,
    ) -> Result<bool, StoreError> {
        let found = self
            .conn
            .query_row(
                "SELECT password_hash, salt FROM operators WHERE id = ?1",
                params![operator_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        Ok(match found {
            Some((hash, salt)) => hash_password(password, &salt) == hash,
            None => false,
        })
    }
}
