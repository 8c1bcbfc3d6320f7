//! Attendance time policy: maps a check-in time of day to a status.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("present cutoff {present} must be earlier than late cutoff {late}")]
    InvalidCutoffs { present: NaiveTime, late: NaiveTime },
}

/// Attendance status of one person on one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Absent => "absent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "present" => Some(AttendanceStatus::Present),
            "late" => Some(AttendanceStatus::Late),
            "absent" => Some(AttendanceStatus::Absent),
            _ => None,
        }
    }
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Singleton policy configuration: two ordered cutoff times.
///
/// Arrival at or before `present_cutoff` is present; at or before
/// `late_cutoff` is late; anything later is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub present_cutoff: NaiveTime,
    pub late_cutoff: NaiveTime,
}

impl PolicyConfig {
    /// Build a policy, rejecting cutoffs that are not strictly ordered.
    pub fn new(present_cutoff: NaiveTime, late_cutoff: NaiveTime) -> Result<Self, PolicyError> {
        if present_cutoff >= late_cutoff {
            return Err(PolicyError::InvalidCutoffs {
                present: present_cutoff,
                late: late_cutoff,
            });
        }
        Ok(Self {
            present_cutoff,
            late_cutoff,
        })
    }

    /// Default cutoffs: present until 09:30, late until 11:00.
    pub fn default_cutoffs() -> Self {
        Self {
            present_cutoff: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            late_cutoff: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
        }
    }

    /// Classify a check-in time of day. Pure; the caller must use the same
    /// clock reading it records on the attendance row.
    pub fn classify(&self, time_of_day: NaiveTime) -> AttendanceStatus {
        if time_of_day <= self.present_cutoff {
            AttendanceStatus::Present
        } else if time_of_day <= self.late_cutoff {
            AttendanceStatus::Late
        } else {
            AttendanceStatus::Absent
        }
    }
}
