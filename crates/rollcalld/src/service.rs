//! Endpoint orchestration: operator sessions, routing enforcement, and the
//! JSON reply shapes the D-Bus surface returns verbatim.
//!
//! Every handler resolves its operator through [`Service::route`] first, so
//! the locked-mode allow-list applies uniformly before any endpoint logic.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{NaiveDate, NaiveTime};
use rollcall_core::CohortRef;
use rollcall_store::{NewIdentity, Operator, StoreError};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::engine::{
    CheckoutOutcome, EngineError, EngineHandle, EnrollOutcome, RecognizeOutcome, ReenrollOutcome,
};
use crate::extract::decode_image_payload;
use crate::guard::{GuardError, SessionGuard, SessionState};
use crate::router::{self, Endpoint, RouteDecision};

pub struct Service {
    engine: EngineHandle,
    sessions: Mutex<HashMap<Uuid, Operator>>,
    guards: Mutex<HashMap<Uuid, SessionGuard>>,
}

fn error_reply(message: impl std::fmt::Display) -> Value {
    json!({ "status": "error", "message": message.to_string() })
}

/// Infrastructure failures are logged server-side and surfaced generically.
fn internal_error(context: &str, e: EngineError) -> Value {
    tracing::error!(context, error = %e, "request failed");
    error_reply("An internal server error occurred.")
}

impl Service {
    pub fn new(engine: EngineHandle) -> Self {
        Self {
            engine,
            sessions: Mutex::new(HashMap::new()),
            guards: Mutex::new(HashMap::new()),
        }
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Operator>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_guards(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, SessionGuard>> {
        self.guards.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn guard_state(&self, token: Uuid) -> SessionState {
        self.lock_guards()
            .get(&token)
            .map(|g| g.state())
            .unwrap_or_default()
    }

    /// Remove every trace of an operator session: auth plus guard scope.
    fn drop_session(&self, token: Uuid) {
        self.lock_sessions().remove(&token);
        self.lock_guards().remove(&token);
    }

    /// The uniform pre-handler check. Resolves the operator, applies the
    /// locked-mode allow-list (tearing the session down on violation), and
    /// enforces the administrator requirement.
    fn route(&self, token: Uuid, endpoint: Endpoint) -> Result<Operator, Value> {
        let operator = self
            .lock_sessions()
            .get(&token)
            .cloned()
            .ok_or_else(|| error_reply("Not authenticated."))?;

        if router::check(self.guard_state(token), endpoint) == RouteDecision::Teardown {
            tracing::warn!(
                operator = %operator.username,
                ?endpoint,
                "locked session left the allow-list; forcing logout"
            );
            self.drop_session(token);
            return Err(json!({
                "status": "session_terminated",
                "message": "Capture session was active. Please log in again to access other admin features.",
            }));
        }

        if endpoint.requires_admin() && !operator.is_admin {
            return Err(error_reply("Administrator role required."));
        }
        Ok(operator)
    }

    // --- authentication ---

    pub async fn login(&self, username: &str, password: &str) -> Value {
        match self
            .engine
            .verify_login(username.to_string(), password.to_string())
            .await
        {
            Ok(Some(operator)) => {
                let token = Uuid::new_v4();
                tracing::info!(username = %operator.username, "operator logged in");
                let is_admin = operator.is_admin;
                self.lock_sessions().insert(token, operator);
                json!({ "status": "success", "token": token.to_string(), "is_admin": is_admin })
            }
            Ok(None) => error_reply("Invalid username or password."),
            Err(e) => internal_error("login", e),
        }
    }

    pub fn logout(&self, token: Uuid) -> Value {
        self.drop_session(token);
        json!({ "status": "success" })
    }

    // --- capture session lifecycle ---

    pub fn start_capture(&self, token: Uuid) -> Value {
        let operator = match self.route(token, Endpoint::CapturePage) {
            Ok(op) => op,
            Err(reply) => return reply,
        };

        let mut guards = self.lock_guards();
        let guard = guards.entry(token).or_default();
        match guard.begin(operator.is_admin) {
            Ok(SessionState::Locked(cohort)) => json!({
                "status": "success",
                "state": "locked",
                "course_id": cohort.course_id,
                "semester_id": cohort.semester_id,
            }),
            Ok(_) => json!({ "status": "success", "state": "cohort_selection_pending" }),
            Err(e) => error_reply(e),
        }
    }

    pub async fn select_cohort(&self, token: Uuid, course_id: i64, semester_id: i64) -> Value {
        if let Err(reply) = self.route(token, Endpoint::CapturePage) {
            return reply;
        }
        let cohort = CohortRef { course_id, semester_id };

        let valid = match self.engine.cohort_active(cohort).await {
            Ok(v) => v,
            Err(e) => return internal_error("select_cohort", e),
        };

        let mut guards = self.lock_guards();
        let guard = guards.entry(token).or_default();
        match guard.select_cohort(cohort, valid) {
            Ok(()) => json!({ "status": "success", "state": "locked" }),
            Err(e) => error_reply(e),
        }
    }

    pub async fn end_capture(&self, token: Uuid, password: &str) -> Value {
        let operator = match self.route(token, Endpoint::EndCapture) {
            Ok(op) => op,
            Err(reply) => return reply,
        };

        let credential_ok = match self
            .engine
            .verify_password(operator.id, password.to_string())
            .await
        {
            Ok(ok) => ok,
            Err(e) => return internal_error("end_capture", e),
        };

        let mut guards = self.lock_guards();
        let guard = guards.entry(token).or_default();
        match guard.terminate(credential_ok) {
            Ok(()) => {
                guards.remove(&token);
                json!({ "status": "success", "message": "Capture session ended." })
            }
            Err(GuardError::InvalidCredential) => json!({
                "status": "invalid_credential",
                "message": "Incorrect password. Please try again.",
            }),
            Err(e) => error_reply(e),
        }
    }

    // --- recognition endpoints ---

    /// Active scope comes from session state, never from the request.
    fn active_scope(&self, token: Uuid) -> Option<CohortRef> {
        self.lock_guards()
            .get(&token)
            .and_then(|g| g.active_cohort())
    }

    pub async fn recognize(&self, token: Uuid, image_payload: &str) -> Value {
        if let Err(reply) = self.route(token, Endpoint::Recognize) {
            return reply;
        }
        let Some(scope) = self.active_scope(token) else {
            return error_reply("No course and semester selected for capture session.");
        };
        let frame = match decode_image_payload(image_payload) {
            Ok(frame) => frame,
            Err(e) => return error_reply(e),
        };

        match self.engine.recognize(frame, scope).await {
            Ok(RecognizeOutcome::NoFaceDetected) => {
                json!({ "status": "no_face", "message": "No face detected." })
            }
            Ok(RecognizeOutcome::NotRecognized) => json!({
                "status": "not_recognized",
                "message": "Face detected, but not recognized.",
            }),
            Ok(RecognizeOutcome::ScopeMismatch { name, actual }) => json!({
                "status": "scope_mismatch",
                "name": name,
                "message": format!("Student is not in the selected cohort ({actual})."),
                "course_id": actual.course_id,
                "semester_id": actual.semester_id,
            }),
            Ok(RecognizeOutcome::AlreadyMarked { name, status }) => json!({
                "status": "already_marked",
                "name": name,
                "attendance_status": status.to_string(),
            }),
            Ok(RecognizeOutcome::Marked { name, status }) => json!({
                "status": "success",
                "name": name,
                "attendance_status": status.to_string(),
            }),
            Err(e) => internal_error("recognize", e),
        }
    }

    pub async fn checkout(&self, token: Uuid, image_payload: &str) -> Value {
        if let Err(reply) = self.route(token, Endpoint::Checkout) {
            return reply;
        }
        let Some(scope) = self.active_scope(token) else {
            return error_reply("No course and semester selected for capture session.");
        };
        let frame = match decode_image_payload(image_payload) {
            Ok(frame) => frame,
            Err(e) => return error_reply(e),
        };

        match self.engine.checkout(frame, scope).await {
            Ok(CheckoutOutcome::NoFaceDetected) => {
                json!({ "status": "no_face", "message": "No face detected." })
            }
            Ok(CheckoutOutcome::NotRecognized) => json!({
                "status": "not_recognized",
                "message": "Face detected, but not recognized.",
            }),
            Ok(CheckoutOutcome::ScopeMismatch { name, actual }) => json!({
                "status": "scope_mismatch",
                "name": name,
                "course_id": actual.course_id,
                "semester_id": actual.semester_id,
            }),
            Ok(CheckoutOutcome::NoCheckIn { name }) => json!({
                "status": "no_check_in",
                "name": name,
                "message": "No check-in record found for today.",
            }),
            Ok(CheckoutOutcome::AlreadyCheckedOut { name }) => json!({
                "status": "already_checked_out",
                "name": name,
                "message": "Already checked out today.",
            }),
            Ok(CheckoutOutcome::CheckedOut { name, time }) => json!({
                "status": "success",
                "name": name,
                "checkout_time": time.format("%H:%M:%S").to_string(),
            }),
            Err(e) => internal_error("checkout", e),
        }
    }

    // --- administrative endpoints (torn down while locked) ---

    pub async fn list_identities(&self, token: Uuid) -> Value {
        if let Err(reply) = self.route(token, Endpoint::ManageIdentities) {
            return reply;
        }
        match self.engine.list_identities().await {
            Ok(identities) => {
                let rows: Vec<Value> = identities
                    .iter()
                    .map(|i| {
                        json!({
                            "id": i.id,
                            "name": i.name,
                            "roll_no": i.roll_no,
                            "course_id": i.course_id,
                            "semester_id": i.semester_id,
                            "authorized": i.authorized,
                            "active": i.active,
                        })
                    })
                    .collect();
                json!({ "status": "success", "identities": rows })
            }
            Err(e) => internal_error("list_identities", e),
        }
    }

    pub async fn set_policy(&self, token: Uuid, present_cutoff: &str, late_cutoff: &str) -> Value {
        if let Err(reply) = self.route(token, Endpoint::PolicySettings) {
            return reply;
        }
        let (Ok(present), Ok(late)) = (
            NaiveTime::parse_from_str(present_cutoff, "%H:%M"),
            NaiveTime::parse_from_str(late_cutoff, "%H:%M"),
        ) else {
            return error_reply("Cutoff times must be in HH:MM format.");
        };

        match self.engine.set_policy(present, late).await {
            Ok(policy) => json!({
                "status": "success",
                "present_cutoff": policy.present_cutoff.format("%H:%M").to_string(),
                "late_cutoff": policy.late_cutoff.format("%H:%M").to_string(),
            }),
            // Ordering violations are client errors, not infrastructure ones.
            Err(EngineError::Store(StoreError::Policy(e))) => error_reply(e),
            Err(e) => internal_error("set_policy", e),
        }
    }

    pub async fn enroll(&self, token: Uuid, new: NewIdentity, image_payload: &str) -> Value {
        if let Err(reply) = self.route(token, Endpoint::EnrollIdentity) {
            return reply;
        }
        let frame = match decode_image_payload(image_payload) {
            Ok(frame) => frame,
            Err(e) => return error_reply(e),
        };

        match self.engine.enroll(new, frame).await {
            Ok(EnrollOutcome::Enrolled { identity_id }) => {
                json!({ "status": "success", "identity_id": identity_id })
            }
            Ok(EnrollOutcome::NoFaceDetected) => json!({
                "status": "no_face",
                "message": "No face detected in the uploaded image.",
            }),
            Ok(EnrollOutcome::DuplicateBiometric { conflict_id, conflict_name }) => json!({
                "status": "duplicate_biometric",
                "conflict_id": conflict_id,
                "message": format!("This face is already registered to '{conflict_name}'."),
            }),
            Err(e) => internal_error("enroll", e),
        }
    }

    pub async fn reenroll(&self, token: Uuid, roll_no: &str, image_payload: &str) -> Value {
        if let Err(reply) = self.route(token, Endpoint::EnrollIdentity) {
            return reply;
        }
        let frame = match decode_image_payload(image_payload) {
            Ok(frame) => frame,
            Err(e) => return error_reply(e),
        };

        match self.engine.reenroll(roll_no.to_string(), frame).await {
            Ok(ReenrollOutcome::Updated { identity_id }) => {
                json!({ "status": "success", "identity_id": identity_id })
            }
            Ok(ReenrollOutcome::UnknownIdentity) => json!({
                "status": "unknown_identity",
                "message": format!("No identity with roll number '{roll_no}'."),
            }),
            Ok(ReenrollOutcome::NoFaceDetected) => json!({
                "status": "no_face",
                "message": "No face detected in the uploaded image.",
            }),
            Ok(ReenrollOutcome::DuplicateBiometric { conflict_id, conflict_name }) => json!({
                "status": "duplicate_biometric",
                "conflict_id": conflict_id,
                "message": format!("This face is already registered to '{conflict_name}'."),
            }),
            Err(e) => internal_error("reenroll", e),
        }
    }

    pub async fn mark_absent(&self, token: Uuid, date: &str) -> Value {
        if let Err(reply) = self.route(token, Endpoint::AttendanceReport) {
            return reply;
        }
        let Ok(date) = NaiveDate::parse_from_str(date, "%Y-%m-%d") else {
            return error_reply("Date must be in YYYY-MM-DD format.");
        };
        match self.engine.mark_absentees(date).await {
            Ok(marked) => json!({ "status": "success", "marked": marked }),
            Err(e) => internal_error("mark_absent", e),
        }
    }

    pub async fn rebuild_gallery(&self, token: Uuid) -> Value {
        if let Err(reply) = self.route(token, Endpoint::ManageIdentities) {
            return reply;
        }
        match self.engine.rebuild_gallery().await {
            Ok(count) => json!({ "status": "success", "gallery_size": count }),
            Err(e) => internal_error("rebuild_gallery", e),
        }
    }

    pub fn status(&self) -> Value {
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "active_sessions": self.lock_sessions().len(),
        })
    }
}
