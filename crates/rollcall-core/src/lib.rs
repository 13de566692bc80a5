//! rollcall-core: Attendance domain model and decision logic.
//!
//! Holds the student and attendance record types, the embedding matcher,
//! the once-per-day attendance guard and report filtering. Face detection
//! and encoding are collaborators behind [`FaceAnalyzer`].

pub mod analyzer;
pub mod guard;
pub mod matcher;
pub mod report;
pub mod types;

pub use analyzer::{AnalyzerError, FaceAnalyzer};
pub use guard::{AttendanceGuard, AttendanceLog, MarkOutcome};
pub use matcher::{
    tolerance_for_cosine, EuclideanMatcher, Identity, MatchPolicy, Matcher, DEFAULT_TOLERANCE,
};
pub use report::{AttendanceReport, DateRange, ReportSummary, StudentTally};
pub use types::{AttendanceRecord, AttendanceStatus, Embedding, FaceLocation, GalleryEntry, Student};
