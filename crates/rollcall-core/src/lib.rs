//! Embedding matching and attendance classification.
//!
//! Pure domain logic: no I/O, no clock reads. Embeddings come from an
//! external extraction collaborator; persistence lives in rollcall-store.

pub mod gallery;
pub mod outcome;
pub mod policy;
pub mod types;

pub use gallery::{Gallery, GalleryEntry, GalleryMatch};
pub use outcome::{CheckInOutcome, CheckOutOutcome};
pub use policy::{AttendanceStatus, PolicyConfig, PolicyError};
pub use types::{CohortRef, Embedding, DEFAULT_TOLERANCE};
