//! rollcall-store: Flat-file persistence.
//!
//! Students and attendance live in two CSV tables; face embeddings live in
//! a single JSON blob that is rewritten on every change.

pub mod gallery;
pub mod records;

pub use gallery::{EmbeddingGallery, GalleryError};
pub use records::{export_report, RecordStore, StoreError};

/// File names inside the data directory.
pub const STUDENTS_FILE: &str = "students.csv";
pub const ATTENDANCE_FILE: &str = "attendance.csv";
pub const GALLERY_FILE: &str = "face_encodings.json";
