use serde::{Deserialize, Serialize};

/// Maximum distance between two embeddings for them to be treated as the
/// same person. Tuned for 128-dimensional encodings on a normalized space.
pub const DEFAULT_TOLERANCE: f32 = 0.45;

/// Face embedding vector (typically 128-dimensional).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Lower = more similar. Embeddings of different lengths, or empty ones,
    /// are never the same person: their distance is infinite. Comparing over
    /// a shared prefix instead would let a truncated extractor output sit at
    /// distance zero from every enrolled identity.
    pub fn distance(&self, other: &Embedding) -> f32 {
        if self.values.is_empty() || self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// The (course, semester) pairing that scopes which identities may be
/// recognized during an active capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CohortRef {
    pub course_id: i64,
    pub semester_id: i64,
}

impl std::fmt::Display for CohortRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "course {} / semester {}", self.course_id, self.semester_id)
    }
}
