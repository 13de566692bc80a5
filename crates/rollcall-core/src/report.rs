//! Date-range attendance reports.

use crate::types::AttendanceRecord;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn day(date: NaiveDate) -> Self {
        Self::new(date, date)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// True when `start` is after `end`; such a range selects nothing.
    pub fn is_inverted(&self) -> bool {
        self.start > self.end
    }

    /// File name for a CSV export of this range.
    pub fn export_file_name(&self) -> String {
        format!("attendance_report_{}_to_{}.csv", self.start, self.end)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportSummary {
    pub total_records: usize,
    pub unique_students: usize,
    pub days_covered: usize,
}

/// Days present for one student within a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentTally {
    pub name: String,
    /// Student ID from the student's first record in the range.
    pub student_id: String,
    pub days_present: usize,
}

/// Attendance records selected by a date range, in log order.
#[derive(Debug, Clone)]
pub struct AttendanceReport {
    pub range: DateRange,
    pub records: Vec<AttendanceRecord>,
}

impl AttendanceReport {
    pub fn build<'a, I>(range: DateRange, records: I) -> Self
    where
        I: IntoIterator<Item = &'a AttendanceRecord>,
    {
        let records = records
            .into_iter()
            .filter(|r| range.contains(r.date))
            .cloned()
            .collect();
        Self { range, records }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn summary(&self) -> ReportSummary {
        let students: BTreeSet<&str> = self.records.iter().map(|r| r.name.as_str()).collect();
        let days: BTreeSet<NaiveDate> = self.records.iter().map(|r| r.date).collect();
        ReportSummary {
            total_records: self.records.len(),
            unique_students: students.len(),
            days_covered: days.len(),
        }
    }

    /// Per-student tallies, sorted by name.
    pub fn by_student(&self) -> Vec<StudentTally> {
        let mut tallies: BTreeMap<&str, StudentTally> = BTreeMap::new();
        for record in &self.records {
            tallies
                .entry(record.name.as_str())
                .or_insert_with(|| StudentTally {
                    name: record.name.clone(),
                    student_id: record.student_id.clone(),
                    days_present: 0,
                })
                .days_present += 1;
        }
        tallies.into_values().collect()
    }
}
