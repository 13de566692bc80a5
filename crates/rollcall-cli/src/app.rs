//! Application state: one record store and one gallery per process,
//! passed explicitly to every operation.

use crate::config::Config;
use chrono::NaiveDateTime;
use rollcall_core::{
    AnalyzerError, AttendanceGuard, Embedding, EuclideanMatcher, FaceAnalyzer, FaceLocation,
    Identity, MarkOutcome, Matcher, Student,
};
use rollcall_hw::{CameraError, Frame, FrameSource};
use rollcall_store::{EmbeddingGallery, GalleryError, RecordStore, StoreError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error("no registered student named {0}")]
    UnknownStudent(String),
    #[error("no face detected in any captured frame")]
    NoFaceDetected,
    #[error("face analysis failed: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
}

/// What a removal actually deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Removal {
    pub student: bool,
    pub embedding: bool,
}

/// Decision for one recognized (or unrecognized) face.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub identity: Identity,
    /// `None` when the face is unknown, or matched a gallery name that has
    /// no student row.
    pub outcome: Option<MarkOutcome>,
}

/// Result of an enrollment.
#[derive(Debug, Clone)]
pub struct EnrollResult {
    pub confidence: f32,
    pub frames_used: usize,
    /// Whether an existing embedding was replaced.
    pub replaced: bool,
}

pub struct App {
    records: RecordStore,
    gallery: EmbeddingGallery,
    matcher: EuclideanMatcher,
}

impl App {
    pub fn open(config: &Config) -> Result<Self, AppError> {
        let records = RecordStore::open(&config.data_dir)?;
        let gallery = EmbeddingGallery::open(config.gallery_path())?;
        Ok(Self::new(records, gallery, config.matcher()))
    }

    pub fn new(records: RecordStore, gallery: EmbeddingGallery, matcher: EuclideanMatcher) -> Self {
        Self {
            records,
            gallery,
            matcher,
        }
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn gallery(&self) -> &EmbeddingGallery {
        &self.gallery
    }

    pub fn register(
        &mut self,
        name: &str,
        student_id: &str,
        at: NaiveDateTime,
    ) -> Result<Student, AppError> {
        let student = Student::new(name, student_id, at);
        self.records.add_student(student.clone())?;
        Ok(student)
    }

    /// Remove the student row and its embedding together. Attendance
    /// history is kept.
    pub fn remove(&mut self, name: &str) -> Result<Removal, AppError> {
        let student = self.records.remove_student(name)?;
        let embedding = self.gallery.remove(name)?;
        Ok(Removal { student, embedding })
    }

    /// Mark a registered student present at `now`.
    pub fn mark(&mut self, name: &str, now: NaiveDateTime) -> Result<MarkOutcome, AppError> {
        let student_id = self
            .records
            .student(name)
            .map(|s| s.student_id.clone())
            .ok_or_else(|| AppError::UnknownStudent(name.to_string()))?;

        let outcome = AttendanceGuard::new(&mut self.records).try_mark(
            name,
            &student_id,
            now.date(),
            now.time(),
        )?;
        Ok(outcome)
    }

    pub fn identify(&self, embedding: &Embedding) -> Identity {
        self.matcher.identify(embedding, self.gallery.all())
    }

    /// Identify `embedding` and, if it belongs to a registered student,
    /// mark them present. Unknown faces persist nothing.
    pub fn recognize_and_mark(
        &mut self,
        embedding: &Embedding,
        now: NaiveDateTime,
    ) -> Result<Recognition, AppError> {
        let identity = self.identify(embedding);
        let outcome = match identity.name() {
            Some(name) if self.records.student(name).is_some() => Some(self.mark(name, now)?),
            Some(name) => {
                tracing::warn!(name, "gallery entry has no registered student; not marking");
                None
            }
            None => None,
        };
        Ok(Recognition { identity, outcome })
    }

    /// Store `embedding` as the face of a registered student.
    pub fn enroll_embedding(&mut self, name: &str, embedding: Embedding) -> Result<bool, AppError> {
        if self.records.student(name).is_none() {
            return Err(AppError::UnknownStudent(name.to_string()));
        }
        let replaced = self.gallery.contains(name);
        self.gallery.put(name, embedding)?;
        Ok(replaced)
    }

    /// Capture up to `frames` frames, encode the most confident face and
    /// store it for `name`.
    pub fn enroll_from<S, A>(
        &mut self,
        name: &str,
        source: &mut S,
        analyzer: &mut A,
        frames: usize,
    ) -> Result<EnrollResult, AppError>
    where
        S: FrameSource + ?Sized,
        A: FaceAnalyzer + ?Sized,
    {
        if self.records.student(name).is_none() {
            return Err(AppError::UnknownStudent(name.to_string()));
        }

        let mut best: Option<(FaceLocation, Frame)> = None;
        let mut frames_used = 0;
        for _ in 0..frames {
            let Some(frame) = source.next_frame()? else {
                break;
            };
            frames_used += 1;

            let faces = analyzer.locate_faces(&frame.image)?;
            let Some(face) = faces
                .into_iter()
                .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            else {
                continue;
            };
            if best
                .as_ref()
                .map_or(true, |(prev, _)| face.confidence > prev.confidence)
            {
                best = Some((face, frame));
            }
        }

        let (face, frame) = best.ok_or(AppError::NoFaceDetected)?;
        tracing::info!(name, confidence = face.confidence, frames_used, "enroll: best face selected");

        let embedding = analyzer
            .encode_faces(&frame.image, std::slice::from_ref(&face))?
            .into_iter()
            .next()
            .ok_or(AppError::NoFaceDetected)?;
        let replaced = self.enroll_embedding(name, embedding)?;

        Ok(EnrollResult {
            confidence: face.confidence,
            frames_used,
            replaced,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;
    use image::RgbImage;
    use rollcall_core::MatchPolicy;

    pub(crate) fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    pub(crate) fn open_app(dir: &std::path::Path) -> App {
        let records = RecordStore::open(dir).unwrap();
        let gallery = EmbeddingGallery::open(dir.join(rollcall_store::GALLERY_FILE)).unwrap();
        App::new(records, gallery, EuclideanMatcher::new(0.6, MatchPolicy::FirstWithin))
    }

    /// Frames whose top-left pixel encodes which face they show.
    pub(crate) struct ScriptedFrames(pub Vec<u8>);

    impl FrameSource for ScriptedFrames {
        fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
            if self.0.is_empty() {
                return Ok(None);
            }
            let tag = self.0.remove(0);
            let mut image = RgbImage::new(64, 64);
            image.put_pixel(0, 0, image::Rgb([tag, 0, 0]));
            Ok(Some(Frame::new(image, 0)))
        }
    }

    /// Tag 0 = no face; tag n = one face with confidence n/10 and
    /// embedding [n, 0].
    pub(crate) struct TaggedAnalyzer;

    fn tag(image: &RgbImage) -> u8 {
        image.get_pixel(0, 0).0[0]
    }

    impl FaceAnalyzer for TaggedAnalyzer {
        fn locate_faces(&mut self, image: &RgbImage) -> Result<Vec<FaceLocation>, AnalyzerError> {
            let t = tag(image);
            if t == 0 {
                return Ok(Vec::new());
            }
            Ok(vec![FaceLocation {
                x: 8.0,
                y: 8.0,
                width: 32.0,
                height: 32.0,
                confidence: t as f32 / 10.0,
            }])
        }

        fn encode_faces(
            &mut self,
            image: &RgbImage,
            faces: &[FaceLocation],
        ) -> Result<Vec<Embedding>, AnalyzerError> {
            let t = tag(image) as f32;
            Ok(faces.iter().map(|_| Embedding::new(vec![t, 0.0])).collect())
        }
    }

    #[test]
    fn test_register_and_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = open_app(dir.path());

        app.register("Alice", "S-1", at(1, 8)).unwrap();
        let err = app.register("Alice", "S-2", at(1, 9)).unwrap_err();
        assert!(matches!(err, AppError::Store(StoreError::DuplicateName(_))));
        assert_eq!(app.records().list_students().len(), 1);
    }

    #[test]
    fn test_remove_drops_embedding_keeps_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = open_app(dir.path());
        app.register("Alice", "S-1", at(1, 8)).unwrap();
        app.enroll_embedding("Alice", Embedding::new(vec![1.0, 0.0])).unwrap();
        app.mark("Alice", at(1, 9)).unwrap();

        let removal = app.remove("Alice").unwrap();
        assert_eq!(removal, Removal { student: true, embedding: true });
        assert!(app.gallery().get("Alice").is_none());
        assert!(app.records().student("Alice").is_none());
        assert_eq!(app.records().all_attendance().len(), 1);

        assert_eq!(app.remove("Alice").unwrap(), Removal { student: false, embedding: false });
    }

    #[test]
    fn test_mark_unknown_student() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = open_app(dir.path());
        assert!(matches!(app.mark("Ghost", at(1, 9)), Err(AppError::UnknownStudent(_))));
    }

    #[test]
    fn test_recognize_marks_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = open_app(dir.path());
        app.register("Alice", "S-1", at(1, 8)).unwrap();
        app.register("Bob", "S-2", at(1, 8)).unwrap();
        app.enroll_embedding("Alice", Embedding::new(vec![1.0, 0.0])).unwrap();
        app.enroll_embedding("Bob", Embedding::new(vec![0.0, 1.0])).unwrap();

        let candidate = Embedding::new(vec![0.0, 1.0]);
        let first = app.recognize_and_mark(&candidate, at(2, 9)).unwrap();
        assert_eq!(first.identity.name(), Some("Bob"));
        assert!(matches!(first.outcome, Some(MarkOutcome::Marked(_))));

        let second = app.recognize_and_mark(&candidate, at(2, 10)).unwrap();
        assert_eq!(second.outcome, Some(MarkOutcome::AlreadyMarked));
        assert_eq!(app.records().attendance_on(at(2, 0).date()).len(), 1);
    }

    #[test]
    fn test_unknown_face_appends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = open_app(dir.path());
        app.register("Alice", "S-1", at(1, 8)).unwrap();
        app.enroll_embedding("Alice", Embedding::new(vec![1.0, 0.0])).unwrap();

        let result = app
            .recognize_and_mark(&Embedding::new(vec![-5.0, 5.0]), at(2, 9))
            .unwrap();
        assert_eq!(result.identity, Identity::Unknown);
        assert_eq!(result.outcome, None);
        assert!(app.records().all_attendance().is_empty());
    }

    #[test]
    fn test_enroll_requires_registration() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = open_app(dir.path());
        let err = app
            .enroll_embedding("Ghost", Embedding::new(vec![1.0]))
            .unwrap_err();
        assert!(matches!(err, AppError::UnknownStudent(_)));
    }

    #[test]
    fn test_enroll_from_picks_most_confident_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = open_app(dir.path());
        app.register("Alice", "S-1", at(1, 8)).unwrap();

        let mut source = ScriptedFrames(vec![0, 3, 7, 5]);
        let result = app.enroll_from("Alice", &mut source, &mut TaggedAnalyzer, 4).unwrap();

        assert!((result.confidence - 0.7).abs() < 1e-6);
        assert_eq!(result.frames_used, 4);
        assert!(!result.replaced);
        assert_eq!(app.gallery().get("Alice").unwrap().values, vec![7.0, 0.0]);
    }

    #[test]
    fn test_enroll_from_without_face() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = open_app(dir.path());
        app.register("Alice", "S-1", at(1, 8)).unwrap();

        let mut source = ScriptedFrames(vec![0, 0]);
        let err = app
            .enroll_from("Alice", &mut source, &mut TaggedAnalyzer, 5)
            .unwrap_err();
        assert!(matches!(err, AppError::NoFaceDetected));
        assert!(app.gallery().is_empty());
    }
}
