//! CSV-backed student and attendance tables.
//!
//! Every mutation is written through to disk before it returns. The
//! attendance table is append-only; the student table is appended on
//! registration and rewritten on removal.

use crate::{ATTENDANCE_FILE, STUDENTS_FILE};
use chrono::NaiveDate;
use rollcall_core::{AttendanceLog, AttendanceRecord, AttendanceReport, DateRange, Student};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const STUDENT_COLUMNS: [&str; 3] = ["name", "student_id", "registration_date"];
const ATTENDANCE_COLUMNS: [&str; 5] = ["name", "student_id", "date", "time", "status"];

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("student with this name already exists: {0}")]
    DuplicateName(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed table {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn csv_err(path: &Path, source: csv::Error) -> StoreError {
    StoreError::Csv {
        path: path.to_path_buf(),
        source,
    }
}

/// Student and attendance tables under one data directory.
///
/// Both tables are loaded on open. The set of (name, date) pairs already
/// in the attendance table is indexed from the file, so the daily guard
/// survives a restart.
pub struct RecordStore {
    students_path: PathBuf,
    attendance_path: PathBuf,
    students: Vec<Student>,
    attendance: Vec<AttendanceRecord>,
    marked: HashSet<(String, NaiveDate)>,
}

impl RecordStore {
    /// Open (creating if needed) the tables inside `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

        let students_path = dir.join(STUDENTS_FILE);
        let attendance_path = dir.join(ATTENDANCE_FILE);
        ensure_table(&students_path, &STUDENT_COLUMNS)?;
        ensure_table(&attendance_path, &ATTENDANCE_COLUMNS)?;

        let students: Vec<Student> = read_table(&students_path)?;
        let attendance: Vec<AttendanceRecord> = read_table(&attendance_path)?;
        let marked = attendance
            .iter()
            .map(|r| (r.name.clone(), r.date))
            .collect();

        tracing::info!(
            dir = %dir.display(),
            students = students.len(),
            records = attendance.len(),
            "record store opened"
        );

        Ok(Self {
            students_path,
            attendance_path,
            students,
            attendance,
            marked,
        })
    }

    pub fn list_students(&self) -> &[Student] {
        &self.students
    }

    pub fn student(&self, name: &str) -> Option<&Student> {
        self.students.iter().find(|s| s.name == name)
    }

    /// Register a student. Fails with `DuplicateName` if the name is taken.
    pub fn add_student(&mut self, student: Student) -> Result<(), StoreError> {
        if student.name.trim().is_empty() {
            return Err(StoreError::MissingField("name"));
        }
        if student.student_id.trim().is_empty() {
            return Err(StoreError::MissingField("student_id"));
        }
        if self.student(&student.name).is_some() {
            return Err(StoreError::DuplicateName(student.name));
        }

        append_row(&self.students_path, &student)?;
        tracing::info!(name = %student.name, student_id = %student.student_id, "student registered");
        self.students.push(student);
        Ok(())
    }

    /// Remove a student row. Returns `false` (and writes nothing) if absent.
    /// Attendance records for the student are left untouched.
    pub fn remove_student(&mut self, name: &str) -> Result<bool, StoreError> {
        let Some(pos) = self.students.iter().position(|s| s.name == name) else {
            return Ok(false);
        };

        let mut remaining = self.students.clone();
        remaining.remove(pos);
        rewrite_table(&self.students_path, &STUDENT_COLUMNS, &remaining)?;
        self.students = remaining;

        tracing::info!(name, "student removed");
        Ok(true)
    }

    /// Append one record to the attendance log. Does not consult the guard.
    pub fn append_attendance(&mut self, record: AttendanceRecord) -> Result<(), StoreError> {
        append_row(&self.attendance_path, &record)?;
        self.marked.insert((record.name.clone(), record.date));
        self.attendance.push(record);
        Ok(())
    }

    /// Records whose date lies in `range` (inclusive), in log order.
    pub fn list_attendance(&self, range: DateRange) -> Vec<AttendanceRecord> {
        self.attendance
            .iter()
            .filter(|r| range.contains(r.date))
            .cloned()
            .collect()
    }

    pub fn attendance_on(&self, date: NaiveDate) -> Vec<AttendanceRecord> {
        self.list_attendance(DateRange::day(date))
    }

    pub fn all_attendance(&self) -> &[AttendanceRecord] {
        &self.attendance
    }

    pub fn report(&self, range: DateRange) -> AttendanceReport {
        AttendanceReport::build(range, &self.attendance)
    }
}

impl AttendanceLog for RecordStore {
    type Error = StoreError;

    fn is_marked(&self, name: &str, date: NaiveDate) -> Result<bool, StoreError> {
        Ok(self.marked.contains(&(name.to_string(), date)))
    }

    fn append(&mut self, record: &AttendanceRecord) -> Result<(), StoreError> {
        self.append_attendance(record.clone())
    }
}

/// Write `report` as `attendance_report_{start}_to_{end}.csv` inside `dir`.
/// Returns the written path and the number of data rows.
pub fn export_report(report: &AttendanceReport, dir: &Path) -> Result<(PathBuf, usize), StoreError> {
    fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    let path = dir.join(report.range.export_file_name());
    rewrite_table(&path, &ATTENDANCE_COLUMNS, &report.records)?;
    tracing::info!(path = %path.display(), rows = report.records.len(), "attendance report exported");
    Ok((path, report.records.len()))
}

/// Create `path` with a header row if it is missing or empty.
fn ensure_table(path: &Path, columns: &[&str]) -> Result<(), StoreError> {
    let empty = match fs::metadata(path) {
        Ok(meta) => meta.len() == 0,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => return Err(io_err(path, e)),
    };
    if empty {
        tracing::debug!(path = %path.display(), "creating table");
        rewrite_table::<AttendanceRecord>(path, columns, &[])?;
    }
    Ok(())
}

fn read_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| csv_err(path, e))?;
    reader
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| csv_err(path, e))
}

fn append_row<T: Serialize>(path: &Path, row: &T) -> Result<(), StoreError> {
    let mut file = OpenOptions::new()
        .read(true)
        .append(true)
        .open(path)
        .map_err(|e| io_err(path, e))?;

    // A table edited by hand may lack the final newline.
    if !ends_with_newline(&mut file).map_err(|e| io_err(path, e))? {
        file.write_all(b"\n").map_err(|e| io_err(path, e))?;
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    writer.serialize(row).map_err(|e| csv_err(path, e))?;
    writer.flush().map_err(|e| io_err(path, e))
}

fn ends_with_newline(file: &mut fs::File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Replace `path` with a header row plus `rows`, via a temp file + rename.
fn rewrite_table<T: Serialize>(path: &Path, columns: &[&str], rows: &[T]) -> Result<(), StoreError> {
    let tmp = path.with_extension("csv.tmp");
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&tmp)
            .map_err(|e| csv_err(&tmp, e))?;
        writer.write_record(columns).map_err(|e| csv_err(&tmp, e))?;
        for row in rows {
            writer.serialize(row).map_err(|e| csv_err(&tmp, e))?;
        }
        writer.flush().map_err(|e| io_err(&tmp, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| io_err(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDateTime, NaiveTime};
    use rollcall_core::{AttendanceGuard, MarkOutcome};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn nine() -> NaiveTime {
        NaiveTime::from_hms_opt(9, 0, 0).unwrap()
    }

    fn registered_at() -> NaiveDateTime {
        day(1).and_hms_opt(8, 0, 0).unwrap()
    }

    fn student(name: &str, id: &str) -> Student {
        Student::new(name, id, registered_at())
    }

    #[test]
    fn test_open_creates_tables_with_headers() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        assert!(store.list_students().is_empty());

        let students = fs::read_to_string(dir.path().join(STUDENTS_FILE)).unwrap();
        assert_eq!(students.trim_end(), "name,student_id,registration_date");
        let attendance = fs::read_to_string(dir.path().join(ATTENDANCE_FILE)).unwrap();
        assert_eq!(attendance.trim_end(), "name,student_id,date,time,status");
    }

    #[test]
    fn test_add_student_then_list() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = RecordStore::open(dir.path()).unwrap();
        store.add_student(student("Alice", "S-1")).unwrap();

        assert_eq!(store.list_students().len(), 1);
        assert_eq!(store.student("Alice").unwrap().student_id, "S-1");

        let reopened = RecordStore::open(dir.path()).unwrap();
        assert_eq!(reopened.list_students(), &[student("Alice", "S-1")]);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = RecordStore::open(dir.path()).unwrap();
        store.add_student(student("Alice", "S-1")).unwrap();

        let err = store.add_student(student("Alice", "S-9")).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateName(ref n) if n == "Alice"));
        assert_eq!(store.list_students().len(), 1);
    }

    #[test]
    fn test_blank_fields_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = RecordStore::open(dir.path()).unwrap();

        let err = store.add_student(student("  ", "S-1")).unwrap_err();
        assert!(matches!(err, StoreError::MissingField("name")));
        let err = store.add_student(student("Alice", "")).unwrap_err();
        assert!(matches!(err, StoreError::MissingField("student_id")));
    }

    #[test]
    fn test_remove_student_keeps_attendance() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = RecordStore::open(dir.path()).unwrap();
        store.add_student(student("Alice", "S-1")).unwrap();
        store.add_student(student("Bob", "S-2")).unwrap();
        store
            .append_attendance(AttendanceRecord::present("Alice", "S-1", day(1), nine()))
            .unwrap();

        assert!(store.remove_student("Alice").unwrap());
        assert!(!store.remove_student("Alice").unwrap());

        let reopened = RecordStore::open(dir.path()).unwrap();
        assert_eq!(reopened.list_students(), &[student("Bob", "S-2")]);
        assert_eq!(reopened.all_attendance().len(), 1);
        assert_eq!(reopened.all_attendance()[0].name, "Alice");
    }

    #[test]
    fn test_guard_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = RecordStore::open(dir.path()).unwrap();
            let outcome = AttendanceGuard::new(&mut store)
                .try_mark("Alice", "S-1", day(2), nine())
                .unwrap();
            assert!(outcome.is_marked());
        }

        let mut store = RecordStore::open(dir.path()).unwrap();
        let outcome = AttendanceGuard::new(&mut store)
            .try_mark("Alice", "S-1", day(2), NaiveTime::from_hms_opt(11, 0, 0).unwrap())
            .unwrap();
        assert_eq!(outcome, MarkOutcome::AlreadyMarked);
        assert_eq!(store.attendance_on(day(2)).len(), 1);
    }

    #[test]
    fn test_list_attendance_range_and_export() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = RecordStore::open(dir.path()).unwrap();
        for d in 1..=5 {
            store
                .append_attendance(AttendanceRecord::present("Alice", "S-1", day(d), nine()))
                .unwrap();
            store
                .append_attendance(AttendanceRecord::present("Bob", "S-2", day(d), nine()))
                .unwrap();
        }

        let range = DateRange::new(day(2), day(3));
        let listed = store.list_attendance(range);
        assert_eq!(listed.len(), 4);
        assert!(listed.iter().all(|r| range.contains(r.date)));

        let report = store.report(range);
        let out = dir.path().join("exports");
        let (path, rows) = export_report(&report, &out).unwrap();
        assert_eq!(rows, listed.len());
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "attendance_report_2024-01-02_to_2024-01-03.csv"
        );

        let exported: Vec<AttendanceRecord> = read_table(&path).unwrap();
        assert_eq!(exported, listed);
    }

    #[test]
    fn test_export_empty_report_has_header() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        let (path, rows) = export_report(&store.report(DateRange::day(day(1))), dir.path()).unwrap();
        assert_eq!(rows, 0);
        let text = fs::read_to_string(path).unwrap();
        assert_eq!(text.trim_end(), "name,student_id,date,time,status");
    }

    #[test]
    fn test_reads_existing_table_and_appends_after_missing_newline() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(ATTENDANCE_FILE),
            "name,student_id,date,time,status\nAlice,S-1,2024-01-01,09:00:00,Present",
        )
        .unwrap();

        let mut store = RecordStore::open(dir.path()).unwrap();
        assert!(store.is_marked("Alice", day(1)).unwrap());
        store
            .append_attendance(AttendanceRecord::present("Bob", "S-2", day(1), nine()))
            .unwrap();

        let reopened = RecordStore::open(dir.path()).unwrap();
        let names: Vec<&str> = reopened.all_attendance().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["Alice", "Bob"]);
    }

    #[test]
    fn test_student_registration_date_format() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = RecordStore::open(dir.path()).unwrap();
        store.add_student(student("Alice", "S-1")).unwrap();

        let text = fs::read_to_string(dir.path().join(STUDENTS_FILE)).unwrap();
        assert!(text.contains("Alice,S-1,2024-01-01 08:00:00"), "got: {text}");
    }
}
