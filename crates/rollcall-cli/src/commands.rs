//! Subcommand handlers. Operator messages go to stdout.

use crate::app::{App, AppError};
use crate::config::Config;
use crate::session::{spawn_session, still_images, FaceOutcome, FaceReport, SessionConfig, SessionEvent, StopReason};
use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use rollcall_core::{DateRange, MarkOutcome};
use rollcall_hw::{Camera, StillImages};
use rollcall_store::export_report;
use rollcall_vision::OnnxFaceAnalyzer;
use std::path::{Path, PathBuf};

pub fn register(app: &mut App, name: &str, student_id: &str) -> Result<()> {
    if name.trim().is_empty() || student_id.trim().is_empty() {
        bail!("Please fill in all fields");
    }
    let student = app.register(name, student_id, Local::now().naive_local())?;
    println!(
        "Student {} registered successfully! Run `rollcall enroll \"{}\"` to capture their face.",
        student.name, student.name
    );
    Ok(())
}

pub fn students(app: &App) {
    let students = app.records().list_students();
    if students.is_empty() {
        println!("No students registered yet.");
        return;
    }

    println!("{:<24} {:<12} {:<20} {}", "NAME", "STUDENT ID", "REGISTERED", "FACE");
    for s in students {
        let face = if app.gallery().contains(&s.name) { "enrolled" } else { "-" };
        println!(
            "{:<24} {:<12} {:<20} {}",
            s.name,
            s.student_id,
            s.registration_date.format("%Y-%m-%d %H:%M:%S"),
            face
        );
    }
    println!();
    println!("Total Registered Students: {}", students.len());
}

pub fn remove(app: &mut App, name: &str) -> Result<()> {
    let removal = app.remove(name)?;
    if !removal.student && !removal.embedding {
        bail!("no registered student named {name}");
    }
    println!("Student {name} removed successfully!");
    Ok(())
}

pub fn enroll(app: &mut App, config: &Config, name: &str, image: Option<&Path>) -> Result<()> {
    if app.records().student(name).is_none() {
        return Err(AppError::UnknownStudent(name.to_string()).into());
    }

    let model_dir = config.model_dir();
    let mut analyzer = OnnxFaceAnalyzer::load(&model_dir)
        .with_context(|| format!("loading face models from {}", model_dir.display()))?;

    let result = match image {
        Some(path) => {
            let mut source = StillImages::new(vec![path.to_path_buf()]);
            app.enroll_from(name, &mut source, &mut analyzer, 1)?
        }
        None => {
            let mut camera =
                Camera::open(&config.camera_device, config.frame_width, config.frame_height)?;
            println!("Look at the camera...");
            app.enroll_from(name, &mut camera, &mut analyzer, config.enroll_frames)?
        }
    };

    let verb = if result.replaced { "updated" } else { "enrolled" };
    println!(
        "Face {verb} for {name} (confidence {:.2}, {} frame(s) examined)",
        result.confidence, result.frames_used
    );
    Ok(())
}

pub fn mark(app: &mut App, name: &str) -> Result<()> {
    match app.mark(name, Local::now().naive_local())? {
        MarkOutcome::Marked(record) => println!(
            "Attendance marked for {} at {}",
            record.name,
            record.time.format("%H:%M:%S")
        ),
        MarkOutcome::AlreadyMarked => println!("Attendance already marked for today"),
    }
    Ok(())
}

pub async fn take(
    app: App,
    config: &Config,
    max_frames: Option<u64>,
    frames_dir: Option<PathBuf>,
    preview: Option<PathBuf>,
) -> Result<()> {
    if app.records().list_students().is_empty() {
        println!("No students registered yet. Please register students first.");
        return Ok(());
    }
    if app.gallery().is_empty() {
        println!("Warning: no faces enrolled; every face will be reported as Unknown.");
    }

    let session_config = SessionConfig::from_config(config, max_frames);
    let interval = session_config.sample_interval;
    let model_dir = config.model_dir();
    let load_analyzer = move || OnnxFaceAnalyzer::load(&model_dir);

    let mut handle = match frames_dir {
        Some(dir) => spawn_session(
            app,
            move || still_images(&dir, interval),
            load_analyzer,
            session_config,
        ),
        None => {
            let device = config.camera_device.clone();
            let (width, height) = (config.frame_width, config.frame_height);
            spawn_session(
                app,
                move || Camera::open(&device, width, height),
                load_analyzer,
                session_config,
            )
        }
    };
    let cancel = handle.cancellation_token();

    println!("Face detection is running. Press Ctrl-C to stop.");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut stopping = false;

    loop {
        tokio::select! {
            event = handle.next_event() => match event {
                Some(SessionEvent::Face(report)) => println!("{}", describe(&report)),
                Some(SessionEvent::Frame(annotated)) => {
                    if let Some(path) = &preview {
                        if !annotated.faces.is_empty() {
                            if let Err(e) = annotated.frame.image.save(path) {
                                tracing::warn!(path = %path.display(), error = %e, "failed to write preview");
                            }
                        }
                    }
                }
                None => break,
            },
            _ = &mut ctrl_c, if !stopping => {
                println!("Stopping...");
                stopping = true;
                cancel.cancel();
            }
        }
    }

    let outcome = handle.join().await?;
    let summary = outcome.result?;

    let why = match summary.stop {
        StopReason::Cancelled => "stopped",
        StopReason::SourceExhausted => "no more frames",
        StopReason::FrameLimit => "frame limit reached",
        StopReason::ConsumerGone => "display closed",
    };
    println!(
        "Session ended ({why}): {} frames, {} analyzed, {} marked, {} already marked, {} unknown",
        summary.frames,
        summary.analyzed_frames,
        summary.marked,
        summary.already_marked,
        summary.unknown + summary.not_registered
    );
    today(&outcome.app);
    Ok(())
}

/// One line of operator feedback for a face decision.
fn describe(report: &FaceReport) -> String {
    let label = report.identity.label();
    match &report.outcome {
        FaceOutcome::Marked(record) => format!(
            "Attendance marked for {} at {}",
            record.name,
            record.time.format("%H:%M:%S")
        ),
        FaceOutcome::AlreadyMarked => format!("{label}: Attendance already marked for today"),
        FaceOutcome::NotRegistered => format!("{label}: enrolled face has no student record"),
        FaceOutcome::Unknown => format!("Unknown face in frame {}", report.sequence),
    }
}

pub fn today(app: &App) {
    let today = Local::now().date_naive();
    let records = app.records().attendance_on(today);
    if records.is_empty() {
        println!("No attendance recorded today yet.");
        return;
    }

    println!("{:<24} {:<10} {}", "NAME", "TIME", "STATUS");
    for r in &records {
        println!("{:<24} {:<10} {}", r.name, r.time.format("%H:%M:%S"), r.status);
    }
    println!();
    println!("Students Present Today: {}", records.len());
}

pub fn report(
    app: &App,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    export_dir: Option<&Path>,
) -> Result<()> {
    if app.records().all_attendance().is_empty() {
        println!("No attendance records available yet.");
        return Ok(());
    }

    let range = report_range(from, to, Local::now().date_naive());
    if range.is_inverted() {
        tracing::warn!(%range, "start date is after end date");
    }
    let report = app.records().report(range);
    if report.is_empty() {
        println!("No attendance records found for the selected date range.");
        return Ok(());
    }

    println!("Attendance Records ({range})");
    println!("{:<24} {:<12} {:<12} {:<10} {}", "NAME", "STUDENT ID", "DATE", "TIME", "STATUS");
    for r in &report.records {
        println!(
            "{:<24} {:<12} {:<12} {:<10} {}",
            r.name,
            r.student_id,
            r.date.to_string(),
            r.time.format("%H:%M:%S"),
            r.status
        );
    }

    let summary = report.summary();
    println!();
    println!("Total Records: {}", summary.total_records);
    println!("Unique Students: {}", summary.unique_students);
    println!("Days Covered: {}", summary.days_covered);

    println!();
    println!("Attendance Summary by Student");
    println!("{:<24} {:<12} {}", "NAME", "STUDENT ID", "DAYS PRESENT");
    for tally in report.by_student() {
        println!("{:<24} {:<12} {}", tally.name, tally.student_id, tally.days_present);
    }

    if let Some(dir) = export_dir {
        let (path, rows) = export_report(&report, dir)?;
        println!();
        println!("Exported {rows} records to {}", path.display());
    }
    Ok(())
}

/// Missing bounds default to `today`; a lone bound selects that one day.
fn report_range(from: Option<NaiveDate>, to: Option<NaiveDate>, today: NaiveDate) -> DateRange {
    match (from, to) {
        (Some(start), Some(end)) => DateRange::new(start, end),
        (Some(day), None) | (None, Some(day)) => DateRange::day(day),
        (None, None) => DateRange::day(today),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{AttendanceRecord, FaceLocation, Identity};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn report_for(identity: Identity, outcome: FaceOutcome) -> FaceReport {
        FaceReport {
            sequence: 30,
            location: FaceLocation { x: 0.0, y: 0.0, width: 10.0, height: 10.0, confidence: 0.9 },
            identity,
            outcome,
        }
    }

    #[test]
    fn test_report_range_defaults() {
        assert_eq!(report_range(None, None, day(5)), DateRange::day(day(5)));
        assert_eq!(report_range(Some(day(2)), None, day(5)), DateRange::day(day(2)));
        assert_eq!(
            report_range(Some(day(2)), Some(day(3)), day(5)),
            DateRange::new(day(2), day(3))
        );
    }

    #[test]
    fn test_describe_outcomes() {
        let alice = Identity::Known { name: "Alice".into(), distance: 0.1 };
        let record = AttendanceRecord::present(
            "Alice",
            "S-1",
            day(2),
            chrono::NaiveTime::from_hms_opt(9, 5, 0).unwrap(),
        );

        assert_eq!(
            describe(&report_for(alice.clone(), FaceOutcome::Marked(record))),
            "Attendance marked for Alice at 09:05:00"
        );
        assert_eq!(
            describe(&report_for(alice, FaceOutcome::AlreadyMarked)),
            "Alice: Attendance already marked for today"
        );
        assert_eq!(
            describe(&report_for(Identity::Unknown, FaceOutcome::Unknown)),
            "Unknown face in frame 30"
        );
    }
}
