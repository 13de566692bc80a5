//! Recognition session: a dedicated thread that reads frames, identifies
//! faces on every Nth frame and marks attendance, streaming decisions and
//! annotated frames to the caller over a bounded channel.

use crate::app::{App, AppError, Recognition};
use crate::config::Config;
use chrono::NaiveDateTime;
use rollcall_core::{AnalyzerError, AttendanceRecord, FaceAnalyzer, FaceLocation, Identity, MarkOutcome};
use rollcall_hw::frame::{draw_face_box, KNOWN_COLOR, UNKNOWN_COLOR};
use rollcall_hw::{CameraError, Frame, FrameSource, StillImages};
use std::path::Path;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("camera unavailable: {0}")]
    CameraUnavailable(#[source] CameraError),
    #[error("failed to read frame: {0}")]
    FrameReadFailure(#[source] CameraError),
    #[error("face analysis failed: {0}")]
    Analysis(#[from] AnalyzerError),
    #[error(transparent)]
    App(#[from] AppError),
    #[error("session thread panicked")]
    ThreadPanicked,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Analyze every Nth frame.
    pub sample_interval: u64,
    pub event_capacity: usize,
    /// Stop after this many frames.
    pub max_frames: Option<u64>,
    /// Timestamp source for attendance records.
    pub clock: fn() -> NaiveDateTime,
}

impl SessionConfig {
    pub fn from_config(config: &Config, max_frames: Option<u64>) -> Self {
        Self {
            sample_interval: config.sample_interval,
            event_capacity: config.event_capacity,
            max_frames,
            clock: local_now,
        }
    }
}

/// Still images from `dir`, each held for one full sampling interval so
/// every file is analyzed once.
pub fn still_images(dir: &Path, sample_interval: u64) -> Result<StillImages, CameraError> {
    let repeat = usize::try_from(sample_interval.max(1)).unwrap_or(usize::MAX);
    Ok(StillImages::from_dir(dir)?.with_repeat(repeat))
}

fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// What happened to one face in an analyzed frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FaceOutcome {
    Marked(AttendanceRecord),
    AlreadyMarked,
    /// Matched a gallery entry that has no student row.
    NotRegistered,
    Unknown,
}

impl From<Recognition> for FaceOutcome {
    fn from(recognition: Recognition) -> Self {
        match (recognition.outcome, recognition.identity.is_known()) {
            (Some(MarkOutcome::Marked(record)), _) => FaceOutcome::Marked(record),
            (Some(MarkOutcome::AlreadyMarked), _) => FaceOutcome::AlreadyMarked,
            (None, true) => FaceOutcome::NotRegistered,
            (None, false) => FaceOutcome::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FaceReport {
    pub sequence: u32,
    pub location: FaceLocation,
    pub identity: Identity,
    pub outcome: FaceOutcome,
}

/// A frame with face boxes drawn onto it. `faces` is empty for frames that
/// were not analyzed.
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    pub frame: Frame,
    pub faces: Vec<FaceReport>,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Frame(AnnotatedFrame),
    Face(FaceReport),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopReason {
    Cancelled,
    #[default]
    SourceExhausted,
    FrameLimit,
    /// The event receiver was dropped.
    ConsumerGone,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub frames: u64,
    pub analyzed_frames: u64,
    pub marked: usize,
    pub already_marked: usize,
    pub not_registered: usize,
    pub unknown: usize,
    /// Display frames dropped because the consumer lagged.
    pub dropped_frames: u64,
    pub stop: StopReason,
}

impl SessionSummary {
    fn count(&mut self, outcome: &FaceOutcome) {
        match outcome {
            FaceOutcome::Marked(_) => self.marked += 1,
            FaceOutcome::AlreadyMarked => self.already_marked += 1,
            FaceOutcome::NotRegistered => self.not_registered += 1,
            FaceOutcome::Unknown => self.unknown += 1,
        }
    }
}

/// Run a session to completion on the calling thread.
///
/// Must not be called from within an async context: decisions are sent
/// with `blocking_send`.
pub fn run_session<S, A>(
    app: &mut App,
    source: &mut S,
    analyzer: &mut A,
    config: &SessionConfig,
    events: &mpsc::Sender<SessionEvent>,
    cancel: &CancellationToken,
) -> Result<SessionSummary, SessionError>
where
    S: FrameSource + ?Sized,
    A: FaceAnalyzer + ?Sized,
{
    let interval = config.sample_interval.max(1);
    let mut summary = SessionSummary::default();
    let consumer_gone = || {
        if cancel.is_cancelled() {
            StopReason::Cancelled
        } else {
            StopReason::ConsumerGone
        }
    };

    tracing::info!(interval, max_frames = ?config.max_frames, "session started");

    let stop = 'frames: loop {
        if cancel.is_cancelled() {
            break StopReason::Cancelled;
        }
        if config.max_frames.is_some_and(|max| summary.frames >= max) {
            break StopReason::FrameLimit;
        }

        let Some(mut frame) = source.next_frame().map_err(SessionError::FrameReadFailure)? else {
            break StopReason::SourceExhausted;
        };
        summary.frames += 1;

        let mut faces = Vec::new();
        if summary.frames % interval == 0 {
            summary.analyzed_frames += 1;
            faces = analyze_frame(app, analyzer, &mut frame, (config.clock)())?;
            for report in &faces {
                summary.count(&report.outcome);
                if events.blocking_send(SessionEvent::Face(report.clone())).is_err() {
                    break 'frames consumer_gone();
                }
            }
        }

        match events.try_send(SessionEvent::Frame(AnnotatedFrame { frame, faces })) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => summary.dropped_frames += 1,
            Err(TrySendError::Closed(_)) => break consumer_gone(),
        }
    };
    summary.stop = stop;

    tracing::info!(
        frames = summary.frames,
        analyzed = summary.analyzed_frames,
        marked = summary.marked,
        stop = ?summary.stop,
        "session finished"
    );
    Ok(summary)
}

/// Identify every face in `frame`, mark recognized students and draw the
/// face boxes.
fn analyze_frame<A: FaceAnalyzer + ?Sized>(
    app: &mut App,
    analyzer: &mut A,
    frame: &mut Frame,
    now: NaiveDateTime,
) -> Result<Vec<FaceReport>, SessionError> {
    let analyzed = analyzer.analyze(&frame.image)?;
    let mut reports = Vec::with_capacity(analyzed.len());

    for (location, embedding) in analyzed {
        let recognition = app.recognize_and_mark(&embedding, now)?;
        let identity = recognition.identity.clone();
        let outcome = FaceOutcome::from(recognition);

        match &outcome {
            FaceOutcome::Marked(record) => {
                tracing::debug!(name = %record.name, date = %record.date, "attendance marked")
            }
            FaceOutcome::AlreadyMarked => {
                tracing::debug!(name = identity.label(), "already marked today")
            }
            FaceOutcome::NotRegistered | FaceOutcome::Unknown => {
                tracing::debug!(label = identity.label(), confidence = location.confidence, "face not marked")
            }
        }

        let color = if identity.is_known() { KNOWN_COLOR } else { UNKNOWN_COLOR };
        draw_face_box(&mut frame.image, &location, color);

        reports.push(FaceReport {
            sequence: frame.sequence,
            location,
            identity,
            outcome,
        });
    }
    Ok(reports)
}

/// Application state handed back by a finished session thread.
pub struct SessionOutcome {
    pub app: App,
    pub result: Result<SessionSummary, SessionError>,
}

/// Handle to a running session thread.
pub struct SessionHandle {
    events: mpsc::Receiver<SessionEvent>,
    cancel: CancellationToken,
    thread: std::thread::JoinHandle<SessionOutcome>,
}

impl SessionHandle {
    /// Next event, or `None` once the session thread has finished.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Token that stops the session; it is checked once per frame.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the thread and take back the application state.
    pub async fn join(self) -> Result<SessionOutcome, SessionError> {
        let SessionHandle { events, thread, .. } = self;
        // Unblocks a sender waiting on a full channel.
        drop(events);
        tokio::task::spawn_blocking(move || thread.join())
            .await
            .map_err(|_| SessionError::ThreadPanicked)?
            .map_err(|_| SessionError::ThreadPanicked)
    }
}

/// Spawn a session on a dedicated OS thread.
///
/// The frame source and analyzer are built on that thread, so neither
/// needs to be `Send`. A source that fails to open ends the session with
/// [`SessionError::CameraUnavailable`].
pub fn spawn_session<S, A, OpenSource, LoadAnalyzer>(
    app: App,
    open_source: OpenSource,
    load_analyzer: LoadAnalyzer,
    config: SessionConfig,
) -> SessionHandle
where
    S: FrameSource,
    A: FaceAnalyzer,
    OpenSource: FnOnce() -> Result<S, CameraError> + Send + 'static,
    LoadAnalyzer: FnOnce() -> Result<A, AnalyzerError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.event_capacity.max(1));
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let thread = std::thread::Builder::new()
        .name("rollcall-session".into())
        .spawn(move || {
            let mut app = app;
            let result = open_and_run(&mut app, open_source, load_analyzer, &config, &tx, &token);
            if let Err(e) = &result {
                tracing::error!(error = %e, "session stopped");
            }
            SessionOutcome { app, result }
        })
        .expect("failed to spawn session thread");

    SessionHandle {
        events: rx,
        cancel,
        thread,
    }
}

fn open_and_run<S, A>(
    app: &mut App,
    open_source: impl FnOnce() -> Result<S, CameraError>,
    load_analyzer: impl FnOnce() -> Result<A, AnalyzerError>,
    config: &SessionConfig,
    events: &mpsc::Sender<SessionEvent>,
    cancel: &CancellationToken,
) -> Result<SessionSummary, SessionError>
where
    S: FrameSource,
    A: FaceAnalyzer,
{
    let mut source = open_source().map_err(SessionError::CameraUnavailable)?;
    let mut analyzer = load_analyzer()?;
    run_session(app, &mut source, &mut analyzer, config, events, cancel)
}
