use std::sync::Arc;

use rollcall_store::NewIdentity;
use uuid::Uuid;
use zbus::interface;

use crate::service::Service;

/// D-Bus interface for the attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
///
/// Every method returns a JSON-encoded reply with a `status` field;
/// session-scoped methods take the token issued by `login`.
pub struct AttendanceService {
    service: Arc<Service>,
}

impl AttendanceService {
    pub fn new(service: Arc<Service>) -> Self {
        Self { service }
    }
}

fn parse_token(token: &str) -> Result<Uuid, zbus::fdo::Error> {
    token
        .parse()
        .map_err(|_| zbus::fdo::Error::InvalidArgs("malformed session token".into()))
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Authenticate an operator and issue a session token.
    async fn login(&self, username: &str, password: &str) -> zbus::fdo::Result<String> {
        tracing::info!(username, "login requested");
        Ok(self.service.login(username, password).await.to_string())
    }

    /// End an operator session and discard its capture state.
    async fn logout(&self, token: &str) -> zbus::fdo::Result<String> {
        let token = parse_token(token)?;
        Ok(self.service.logout(token).to_string())
    }

    /// Open the capture flow for the calling operator.
    async fn start_capture(&self, token: &str) -> zbus::fdo::Result<String> {
        let token = parse_token(token)?;
        Ok(self.service.start_capture(token).to_string())
    }

    /// Lock the capture session to a course and semester.
    async fn select_cohort(
        &self,
        token: &str,
        course_id: i64,
        semester_id: i64,
    ) -> zbus::fdo::Result<String> {
        let token = parse_token(token)?;
        Ok(self
            .service
            .select_cohort(token, course_id, semester_id)
            .await
            .to_string())
    }

    /// Close a locked capture session; requires the operator's password.
    async fn end_capture(&self, token: &str, password: &str) -> zbus::fdo::Result<String> {
        let token = parse_token(token)?;
        Ok(self.service.end_capture(token, password).await.to_string())
    }

    /// Mark attendance from a single camera frame (base64 data URI).
    async fn recognize(&self, token: &str, image_payload: &str) -> zbus::fdo::Result<String> {
        let token = parse_token(token)?;
        Ok(self.service.recognize(token, image_payload).await.to_string())
    }

    /// Record a check-out from a single camera frame.
    async fn checkout(&self, token: &str, image_payload: &str) -> zbus::fdo::Result<String> {
        let token = parse_token(token)?;
        Ok(self.service.checkout(token, image_payload).await.to_string())
    }

    /// List enrolled identities.
    async fn list_identities(&self, token: &str) -> zbus::fdo::Result<String> {
        let token = parse_token(token)?;
        Ok(self.service.list_identities(token).await.to_string())
    }

    /// Update the present/late cutoff times (HH:MM).
    async fn set_policy(
        &self,
        token: &str,
        present_cutoff: &str,
        late_cutoff: &str,
    ) -> zbus::fdo::Result<String> {
        let token = parse_token(token)?;
        Ok(self
            .service
            .set_policy(token, present_cutoff, late_cutoff)
            .await
            .to_string())
    }

    /// Enroll a new identity from a photo.
    #[allow(clippy::too_many_arguments)]
    async fn enroll(
        &self,
        token: &str,
        name: &str,
        roll_no: &str,
        department_id: i64,
        course_id: i64,
        session_id: i64,
        semester_id: i64,
        image_payload: &str,
    ) -> zbus::fdo::Result<String> {
        let token = parse_token(token)?;
        let new = NewIdentity {
            name: name.to_string(),
            roll_no: roll_no.to_string(),
            department_id,
            course_id,
            session_id,
            semester_id,
            authorized: true,
        };
        Ok(self.service.enroll(token, new, image_payload).await.to_string())
    }

    /// Replace an enrolled identity's face from a new photo.
    async fn reenroll(
        &self,
        token: &str,
        roll_no: &str,
        image_payload: &str,
    ) -> zbus::fdo::Result<String> {
        let token = parse_token(token)?;
        Ok(self
            .service
            .reenroll(token, roll_no, image_payload)
            .await
            .to_string())
    }

    /// Mark everyone without a record for a date (YYYY-MM-DD) as absent.
    async fn mark_absent(&self, token: &str, date: &str) -> zbus::fdo::Result<String> {
        let token = parse_token(token)?;
        Ok(self.service.mark_absent(token, date).await.to_string())
    }

    /// Reload the matchable gallery from the store.
    async fn rebuild_gallery(&self, token: &str) -> zbus::fdo::Result<String> {
        let token = parse_token(token)?;
        Ok(self.service.rebuild_gallery(token).await.to_string())
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(self.service.status().to_string())
    }
}
