//! Engine thread: owns the store connection, the extractor, and the gallery.
//!
//! All persistence and matching runs on one dedicated OS thread; handlers
//! talk to it over an mpsc channel with oneshot replies. The gallery is
//! rebuilt lazily when absent and invalidated wholesale after enrollment
//! changes; a failed rebuild keeps the previously built gallery so a
//! transient storage fault does not become a recognition outage.

use chrono::{Local, NaiveDate, NaiveTime};
use image::DynamicImage;
use rollcall_core::{
    AttendanceStatus, CheckInOutcome, CheckOutOutcome, CohortRef, Gallery, PolicyConfig,
};
use rollcall_store::{EnrollError, Identity, NewIdentity, Operator, Store, StoreError, SweepReport};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::extract::{ExtractError, FaceExtractor};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("extractor error: {0}")]
    Extract(#[from] ExtractError),
    #[error("enrollment error: {0}")]
    Enroll(EnrollError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Outcome of one recognition frame. Every variant is a first-class result
/// the caller must branch on; none of them are retried automatically.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognizeOutcome {
    NoFaceDetected,
    NotRecognized,
    ScopeMismatch { name: String, actual: CohortRef },
    AlreadyMarked { name: String, status: AttendanceStatus },
    Marked { name: String, status: AttendanceStatus },
}

/// Outcome of one checkout frame.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckoutOutcome {
    NoFaceDetected,
    NotRecognized,
    ScopeMismatch { name: String, actual: CohortRef },
    NoCheckIn { name: String },
    AlreadyCheckedOut { name: String },
    CheckedOut { name: String, time: NaiveTime },
}

/// Outcome of enrolling a new identity from a photo.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrollOutcome {
    Enrolled { identity_id: i64 },
    NoFaceDetected,
    DuplicateBiometric { conflict_id: i64, conflict_name: String },
}

/// Outcome of replacing an existing identity's embedding from a new photo.
#[derive(Debug, Clone, PartialEq)]
pub enum ReenrollOutcome {
    Updated { identity_id: i64 },
    UnknownIdentity,
    NoFaceDetected,
    DuplicateBiometric { conflict_id: i64, conflict_name: String },
}

enum EngineRequest {
    Recognize {
        frame: DynamicImage,
        scope: CohortRef,
        reply: oneshot::Sender<Result<RecognizeOutcome, EngineError>>,
    },
    Checkout {
        frame: DynamicImage,
        scope: CohortRef,
        reply: oneshot::Sender<Result<CheckoutOutcome, EngineError>>,
    },
    Enroll {
        new: NewIdentity,
        frame: DynamicImage,
        reply: oneshot::Sender<Result<EnrollOutcome, EngineError>>,
    },
    Reenroll {
        roll_no: String,
        frame: DynamicImage,
        reply: oneshot::Sender<Result<ReenrollOutcome, EngineError>>,
    },
    RebuildGallery {
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
    VerifyLogin {
        username: String,
        password: String,
        reply: oneshot::Sender<Result<Option<Operator>, EngineError>>,
    },
    VerifyPassword {
        operator_id: i64,
        password: String,
        reply: oneshot::Sender<Result<bool, EngineError>>,
    },
    CohortActive {
        cohort: CohortRef,
        reply: oneshot::Sender<Result<bool, EngineError>>,
    },
    ListIdentities {
        reply: oneshot::Sender<Result<Vec<Identity>, EngineError>>,
    },
    SetPolicy {
        present_cutoff: NaiveTime,
        late_cutoff: NaiveTime,
        reply: oneshot::Sender<Result<PolicyConfig, EngineError>>,
    },
    MarkAbsentees {
        date: NaiveDate,
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
    Sweep {
        days: u64,
        checkout_time: NaiveTime,
        reply: oneshot::Sender<Result<SweepReport, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(
        &self,
        request: EngineRequest,
        reply_rx: oneshot::Receiver<Result<T, EngineError>>,
    ) -> Result<T, EngineError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn recognize(
        &self,
        frame: DynamicImage,
        scope: CohortRef,
    ) -> Result<RecognizeOutcome, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.call(EngineRequest::Recognize { frame, scope, reply }, rx)
            .await
    }

    pub async fn checkout(
        &self,
        frame: DynamicImage,
        scope: CohortRef,
    ) -> Result<CheckoutOutcome, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.call(EngineRequest::Checkout { frame, scope, reply }, rx)
            .await
    }

    pub async fn enroll(
        &self,
        new: NewIdentity,
        frame: DynamicImage,
    ) -> Result<EnrollOutcome, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.call(EngineRequest::Enroll { new, frame, reply }, rx).await
    }

    pub async fn reenroll(
        &self,
        roll_no: String,
        frame: DynamicImage,
    ) -> Result<ReenrollOutcome, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.call(EngineRequest::Reenroll { roll_no, frame, reply }, rx)
            .await
    }

    pub async fn rebuild_gallery(&self) -> Result<usize, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.call(EngineRequest::RebuildGallery { reply }, rx).await
    }

    pub async fn verify_login(
        &self,
        username: String,
        password: String,
    ) -> Result<Option<Operator>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.call(
            EngineRequest::VerifyLogin { username, password, reply },
            rx,
        )
        .await
    }

    pub async fn verify_password(
        &self,
        operator_id: i64,
        password: String,
    ) -> Result<bool, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.call(
            EngineRequest::VerifyPassword { operator_id, password, reply },
            rx,
        )
        .await
    }

    pub async fn cohort_active(&self, cohort: CohortRef) -> Result<bool, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.call(EngineRequest::CohortActive { cohort, reply }, rx).await
    }

    pub async fn list_identities(&self) -> Result<Vec<Identity>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.call(EngineRequest::ListIdentities { reply }, rx).await
    }

    pub async fn set_policy(
        &self,
        present_cutoff: NaiveTime,
        late_cutoff: NaiveTime,
    ) -> Result<PolicyConfig, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.call(
            EngineRequest::SetPolicy { present_cutoff, late_cutoff, reply },
            rx,
        )
        .await
    }

    pub async fn mark_absentees(&self, date: NaiveDate) -> Result<usize, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.call(EngineRequest::MarkAbsentees { date, reply }, rx).await
    }

    pub async fn sweep(
        &self,
        days: u64,
        checkout_time: NaiveTime,
    ) -> Result<SweepReport, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.call(EngineRequest::Sweep { days, checkout_time, reply }, rx)
            .await
    }
}

/// Everything the engine thread owns.
struct EngineState {
    store: Store,
    extractor: Box<dyn FaceExtractor>,
    gallery: Option<Gallery>,
    tolerance: f32,
}

impl EngineState {
    /// Lazy build: an absent gallery is loaded on first use.
    fn ensure_gallery(&mut self) -> Result<&Gallery, EngineError> {
        if self.gallery.is_none() {
            self.gallery = Some(self.store.load_gallery()?);
        }
        match &self.gallery {
            Some(g) => Ok(g),
            None => unreachable!("gallery just populated"),
        }
    }

    /// Wholesale replacement. On failure the previous gallery is kept.
    fn rebuild_gallery(&mut self) -> Result<usize, EngineError> {
        match self.store.load_gallery() {
            Ok(gallery) => {
                let count = gallery.len();
                self.gallery = Some(gallery);
                Ok(count)
            }
            Err(e) => {
                tracing::error!(error = %e, "gallery rebuild failed; keeping previous gallery");
                Err(e.into())
            }
        }
    }

    /// Extract the first face from a frame and resolve it to an enrolled
    /// identity, or report why that was not possible.
    fn resolve_face(&mut self, frame: &DynamicImage) -> Result<Resolved, EngineError> {
        let faces = self.extractor.extract(frame)?;
        let Some(face) = faces.first() else {
            return Ok(Resolved::NoFace);
        };
        if faces.len() > 1 {
            tracing::debug!(count = faces.len(), "multiple faces in frame; using the first");
        }

        let probe = face.embedding();
        let Some(found) = self.ensure_gallery()?.best_match(&probe, self.tolerance) else {
            return Ok(Resolved::NoMatch);
        };

        match self.store.identity(found.identity_id)? {
            Some(identity) => Ok(Resolved::Identity(identity)),
            None => {
                tracing::warn!(
                    identity_id = found.identity_id,
                    "matched identity no longer in store; gallery is stale"
                );
                Ok(Resolved::NoMatch)
            }
        }
    }
}

enum Resolved {
    NoFace,
    NoMatch,
    Identity(Identity),
}

fn run_recognize(
    state: &mut EngineState,
    frame: &DynamicImage,
    scope: CohortRef,
    date: NaiveDate,
    time: NaiveTime,
) -> Result<RecognizeOutcome, EngineError> {
    let identity = match state.resolve_face(frame)? {
        Resolved::NoFace => return Ok(RecognizeOutcome::NoFaceDetected),
        Resolved::NoMatch => return Ok(RecognizeOutcome::NotRecognized),
        Resolved::Identity(identity) => identity,
    };

    let outcome = match state.store.check_in(&identity, scope, date, time)? {
        CheckInOutcome::Marked { status } => RecognizeOutcome::Marked {
            name: identity.name,
            status,
        },
        CheckInOutcome::AlreadyMarked { status } => RecognizeOutcome::AlreadyMarked {
            name: identity.name,
            status,
        },
        CheckInOutcome::ScopeMismatch { actual } => RecognizeOutcome::ScopeMismatch {
            name: identity.name,
            actual,
        },
    };
    Ok(outcome)
}

fn run_checkout(
    state: &mut EngineState,
    frame: &DynamicImage,
    scope: CohortRef,
    date: NaiveDate,
    time: NaiveTime,
) -> Result<CheckoutOutcome, EngineError> {
    let identity = match state.resolve_face(frame)? {
        Resolved::NoFace => return Ok(CheckoutOutcome::NoFaceDetected),
        Resolved::NoMatch => return Ok(CheckoutOutcome::NotRecognized),
        Resolved::Identity(identity) => identity,
    };

    let outcome = match state.store.check_out(&identity, scope, date, time)? {
        CheckOutOutcome::CheckedOut { time } => CheckoutOutcome::CheckedOut {
            name: identity.name,
            time,
        },
        CheckOutOutcome::AlreadyCheckedOut => CheckoutOutcome::AlreadyCheckedOut {
            name: identity.name,
        },
        CheckOutOutcome::NoCheckIn => CheckoutOutcome::NoCheckIn {
            name: identity.name,
        },
        CheckOutOutcome::ScopeMismatch { actual } => CheckoutOutcome::ScopeMismatch {
            name: identity.name,
            actual,
        },
    };
    Ok(outcome)
}

fn run_enroll(
    state: &mut EngineState,
    new: &NewIdentity,
    frame: &DynamicImage,
) -> Result<EnrollOutcome, EngineError> {
    let faces = state.extractor.extract(frame)?;
    let Some(face) = faces.first() else {
        return Ok(EnrollOutcome::NoFaceDetected);
    };
    // A face with no embedding can never be matched again; refuse to bind it.
    if face.embedding.is_empty() {
        return Err(ExtractError::EmptyEmbedding.into());
    }

    let tolerance = state.tolerance;
    match state.store.enroll_identity(new, &face.embedding(), tolerance) {
        Ok(identity_id) => {
            // Invalidate so the next match sees the new enrollee.
            state.gallery = None;
            Ok(EnrollOutcome::Enrolled { identity_id })
        }
        Err(EnrollError::DuplicateBiometric {
            conflict_id,
            conflict_name,
        }) => Ok(EnrollOutcome::DuplicateBiometric {
            conflict_id,
            conflict_name,
        }),
        Err(e) => Err(EngineError::Enroll(e)),
    }
}

fn run_reenroll(
    state: &mut EngineState,
    roll_no: &str,
    frame: &DynamicImage,
) -> Result<ReenrollOutcome, EngineError> {
    let Some(identity) = state.store.identity_by_roll(roll_no)? else {
        return Ok(ReenrollOutcome::UnknownIdentity);
    };
    let faces = state.extractor.extract(frame)?;
    let Some(face) = faces.first() else {
        return Ok(ReenrollOutcome::NoFaceDetected);
    };
    if face.embedding.is_empty() {
        return Err(ExtractError::EmptyEmbedding.into());
    }

    let tolerance = state.tolerance;
    match state
        .store
        .reenroll_identity(identity.id, &face.embedding(), tolerance)
    {
        Ok(()) => {
            state.gallery = None;
            Ok(ReenrollOutcome::Updated {
                identity_id: identity.id,
            })
        }
        Err(EnrollError::DuplicateBiometric {
            conflict_id,
            conflict_name,
        }) => Ok(ReenrollOutcome::DuplicateBiometric {
            conflict_id,
            conflict_name,
        }),
        Err(e) => Err(EngineError::Enroll(e)),
    }
}

/// Spawn the engine on a dedicated OS thread and return a handle.
pub fn spawn_engine(
    store: Store,
    extractor: Box<dyn FaceExtractor>,
    tolerance: f32,
) -> EngineHandle {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            let mut state = EngineState {
                store,
                extractor,
                gallery: None,
                tolerance,
            };
            tracing::info!(tolerance, "engine thread started");

            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Recognize { frame, scope, reply } => {
                        let now = Local::now();
                        let result =
                            run_recognize(&mut state, &frame, scope, now.date_naive(), now.time());
                        let _ = reply.send(result);
                    }
                    EngineRequest::Checkout { frame, scope, reply } => {
                        let now = Local::now();
                        let result =
                            run_checkout(&mut state, &frame, scope, now.date_naive(), now.time());
                        let _ = reply.send(result);
                    }
                    EngineRequest::Enroll { new, frame, reply } => {
                        let result = run_enroll(&mut state, &new, &frame);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Reenroll { roll_no, frame, reply } => {
                        let result = run_reenroll(&mut state, &roll_no, &frame);
                        let _ = reply.send(result);
                    }
                    EngineRequest::RebuildGallery { reply } => {
                        let _ = reply.send(state.rebuild_gallery());
                    }
                    EngineRequest::VerifyLogin { username, password, reply } => {
                        let result = state
                            .store
                            .verify_operator(&username, &password)
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::VerifyPassword { operator_id, password, reply } => {
                        let result = state
                            .store
                            .verify_operator_password(operator_id, &password)
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::CohortActive { cohort, reply } => {
                        let result = state.store.cohort_active(cohort).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::ListIdentities { reply } => {
                        let result = state.store.list_identities().map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::SetPolicy { present_cutoff, late_cutoff, reply } => {
                        let result = state
                            .store
                            .set_policy(present_cutoff, late_cutoff)
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::MarkAbsentees { date, reply } => {
                        let result = state.store.mark_absentees(date).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Sweep { days, checkout_time, reply } => {
                        let today = Local::now().date_naive();
                        let result = state
                            .store
                            .sweep_auto_checkout(today, days, checkout_time)
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::DetectedFace;
    use chrono::{NaiveDate, NaiveTime};

    /// Test extractor: the frame's width picks the returned embedding, so a
    /// test frame of width N stands in for "a photo of person N".
    /// Width 1 means no face in frame; width 2 means a face whose embedding
    /// came back empty.
    struct WidthKeyedExtractor;

    impl FaceExtractor for WidthKeyedExtractor {
        fn extract(&mut self, frame: &DynamicImage) -> Result<Vec<DetectedFace>, ExtractError> {
            if frame.width() <= 1 {
                return Ok(vec![]);
            }
            if frame.width() == 2 {
                return Ok(vec![DetectedFace {
                    bbox: [0.0, 0.0, 2.0, 2.0],
                    embedding: vec![],
                }]);
            }
            Ok(vec![DetectedFace {
                bbox: [0.0, 0.0, frame.width() as f32, frame.height() as f32],
                embedding: vec![frame.width() as f32, 0.0, 0.0],
            }])
        }
    }

    fn frame(width: u32) -> DynamicImage {
        DynamicImage::new_rgb8(width, 4)
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn new_identity(roll: &str, course_id: i64, semester_id: i64) -> NewIdentity {
        NewIdentity {
            name: format!("Student {roll}"),
            roll_no: roll.into(),
            department_id: 1,
            course_id,
            session_id: 1,
            semester_id,
            authorized: true,
        }
    }

    /// Engine state over an in-memory store with policy 09:30/11:00, one
    /// active cohort, and identities enrolled at embeddings [10,0,0],
    /// [20,0,0], [30,0,0] (frame widths 10, 20, 30).
    fn test_state() -> (EngineState, CohortRef) {
        let mut store = Store::open_in_memory().unwrap();
        let course_id = store.add_course("CS", true).unwrap();
        let semester_id = store.add_semester("Fall", true).unwrap();
        let scope = CohortRef { course_id, semester_id };
        store.set_policy(t(9, 30), t(11, 0)).unwrap();

        for width in [10.0f32, 20.0, 30.0] {
            store
                .enroll_identity(
                    &new_identity(&format!("R-{width}"), course_id, semester_id),
                    &rollcall_core::Embedding::new(vec![width, 0.0, 0.0]),
                    0.45,
                )
                .unwrap();
        }

        let state = EngineState {
            store,
            extractor: Box::new(WidthKeyedExtractor),
            gallery: None,
            tolerance: 0.45,
        };
        (state, scope)
    }

    #[test]
    fn test_recognize_day_scenario() {
        let (mut state, scope) = test_state();
        let today = d(2026, 3, 2);

        // 09:15 → present.
        let first = run_recognize(&mut state, &frame(10), scope, today, t(9, 15)).unwrap();
        assert!(matches!(
            first,
            RecognizeOutcome::Marked { status: AttendanceStatus::Present, .. }
        ));

        // Same person at 10:45 → already marked, status unchanged.
        let again = run_recognize(&mut state, &frame(10), scope, today, t(10, 45)).unwrap();
        assert!(matches!(
            again,
            RecognizeOutcome::AlreadyMarked { status: AttendanceStatus::Present, .. }
        ));

        // A never-seen person at 10:45 → late.
        let late = run_recognize(&mut state, &frame(20), scope, today, t(10, 45)).unwrap();
        assert!(matches!(
            late,
            RecognizeOutcome::Marked { status: AttendanceStatus::Late, .. }
        ));

        // 11:30 → absent.
        let absent = run_recognize(&mut state, &frame(30), scope, today, t(11, 30)).unwrap();
        assert!(matches!(
            absent,
            RecognizeOutcome::Marked { status: AttendanceStatus::Absent, .. }
        ));
    }

    #[test]
    fn test_recognize_no_face_and_unknown_face() {
        let (mut state, scope) = test_state();
        let today = d(2026, 3, 2);

        let none = run_recognize(&mut state, &frame(1), scope, today, t(9, 0)).unwrap();
        assert_eq!(none, RecognizeOutcome::NoFaceDetected);

        // Width 90 is far from every enrolled embedding.
        let unknown = run_recognize(&mut state, &frame(90), scope, today, t(9, 0)).unwrap();
        assert_eq!(unknown, RecognizeOutcome::NotRecognized);
    }

    #[test]
    fn test_empty_embedding_never_false_matches() {
        let (mut state, scope) = test_state();
        let today = d(2026, 3, 2);

        // An extractor that finds a face but produces no embedding must not
        // resolve to the first enrolled identity.
        let outcome = run_recognize(&mut state, &frame(2), scope, today, t(9, 0)).unwrap();
        assert_eq!(outcome, RecognizeOutcome::NotRecognized);

        // And such a face is never enrollable.
        let err = run_enroll(
            &mut state,
            &new_identity("R-2", scope.course_id, scope.semester_id),
            &frame(2),
        );
        assert!(matches!(
            err,
            Err(EngineError::Extract(ExtractError::EmptyEmbedding))
        ));
    }

    #[test]
    fn test_recognize_scope_mismatch_reports_actual_cohort() {
        let (mut state, scope) = test_state();
        let today = d(2026, 3, 2);
        let foreign = CohortRef { course_id: 77, semester_id: 78 };

        let outcome = run_recognize(&mut state, &frame(10), foreign, today, t(9, 0)).unwrap();
        match outcome {
            RecognizeOutcome::ScopeMismatch { actual, .. } => assert_eq!(actual, scope),
            other => panic!("expected ScopeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_checkout_flow() {
        let (mut state, scope) = test_state();
        let today = d(2026, 3, 2);

        // Checkout before any check-in.
        let early = run_checkout(&mut state, &frame(10), scope, today, t(17, 0)).unwrap();
        assert!(matches!(early, CheckoutOutcome::NoCheckIn { .. }));

        run_recognize(&mut state, &frame(10), scope, today, t(9, 0)).unwrap();

        let out = run_checkout(&mut state, &frame(10), scope, today, t(17, 0)).unwrap();
        assert!(matches!(
            out,
            CheckoutOutcome::CheckedOut { time, .. } if time == t(17, 0)
        ));

        let again = run_checkout(&mut state, &frame(10), scope, today, t(18, 0)).unwrap();
        assert!(matches!(again, CheckoutOutcome::AlreadyCheckedOut { .. }));
    }

    #[test]
    fn test_enroll_invalidates_gallery_and_rejects_duplicates() {
        let (mut state, scope) = test_state();
        let today = d(2026, 3, 2);

        // Width 40 is unknown at first.
        let before = run_recognize(&mut state, &frame(40), scope, today, t(9, 0)).unwrap();
        assert_eq!(before, RecognizeOutcome::NotRecognized);

        let enrolled = run_enroll(
            &mut state,
            &new_identity("R-40", scope.course_id, scope.semester_id),
            &frame(40),
        )
        .unwrap();
        assert!(matches!(enrolled, EnrollOutcome::Enrolled { .. }));

        // Gallery was invalidated: the new enrollee is now recognized.
        let after = run_recognize(&mut state, &frame(40), scope, today, t(9, 0)).unwrap();
        assert!(matches!(after, RecognizeOutcome::AlreadyMarked { .. })
            || matches!(after, RecognizeOutcome::Marked { .. }));

        // Enrolling the same face under a new roll number is rejected.
        let dup = run_enroll(
            &mut state,
            &new_identity("R-41", scope.course_id, scope.semester_id),
            &frame(40),
        )
        .unwrap();
        assert!(matches!(dup, EnrollOutcome::DuplicateBiometric { .. }));
    }

    #[test]
    fn test_failed_rebuild_keeps_previous_gallery() {
        let (mut state, scope) = test_state();
        let today = d(2026, 3, 2);

        // First recognition builds the gallery lazily.
        let outcome = run_recognize(&mut state, &frame(10), scope, today, t(9, 0)).unwrap();
        assert!(matches!(outcome, RecognizeOutcome::Marked { .. }));

        // Storage fault: the identities table disappears out from under us.
        state
            .store
            .execute_raw("ALTER TABLE identities RENAME TO identities_hidden")
            .unwrap();
        assert!(state.rebuild_gallery().is_err());

        // The previously built gallery is retained, not cleared.
        let gallery = state.gallery.as_ref().unwrap();
        assert_eq!(gallery.len(), 3);

        // Once storage recovers, recognition picks up where it left off.
        state
            .store
            .execute_raw("ALTER TABLE identities_hidden RENAME TO identities")
            .unwrap();
        let again = run_recognize(&mut state, &frame(10), scope, today, t(10, 0)).unwrap();
        assert!(matches!(again, RecognizeOutcome::AlreadyMarked { .. }));
    }

    #[test]
    fn test_reenroll_rebinds_recognition_to_the_new_face() {
        let (mut state, scope) = test_state();
        let today = d(2026, 3, 2);

        let unknown = run_reenroll(&mut state, "R-404", &frame(50)).unwrap();
        assert_eq!(unknown, ReenrollOutcome::UnknownIdentity);

        // Replace the first identity's face (width 10) with width 50.
        let outcome = run_reenroll(&mut state, "R-10", &frame(50)).unwrap();
        assert!(matches!(outcome, ReenrollOutcome::Updated { .. }));

        // Gallery was invalidated: the new face resolves, the old does not.
        let new_face = run_recognize(&mut state, &frame(50), scope, today, t(9, 0)).unwrap();
        assert!(matches!(new_face, RecognizeOutcome::Marked { .. }));
        let old_face = run_recognize(&mut state, &frame(10), scope, today, t(9, 0)).unwrap();
        assert_eq!(old_face, RecognizeOutcome::NotRecognized);

        // Re-enrolling onto another enrollee's face is refused.
        let dup = run_reenroll(&mut state, "R-10", &frame(20)).unwrap();
        assert!(matches!(dup, ReenrollOutcome::DuplicateBiometric { .. }));
    }

    #[test]
    fn test_enroll_requires_a_face() {
        let (mut state, scope) = test_state();
        let outcome = run_enroll(
            &mut state,
            &new_identity("R-50", scope.course_id, scope.semester_id),
            &frame(1),
        )
        .unwrap();
        assert_eq!(outcome, EnrollOutcome::NoFaceDetected);
    }
}
