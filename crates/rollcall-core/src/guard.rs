//! Once-per-day attendance guard.
//!
//! The "already marked" check is answered by the durable attendance log
//! itself, so a process restart cannot open a window for a second mark.

use crate::types::AttendanceRecord;
use chrono::{NaiveDate, NaiveTime};

/// Durable, append-only attendance log the guard consults and writes to.
pub trait AttendanceLog {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Whether `name` already has a record on `date`.
    fn is_marked(&self, name: &str, date: NaiveDate) -> Result<bool, Self::Error>;

    /// Persist one record. Must be durable when this returns `Ok`.
    fn append(&mut self, record: &AttendanceRecord) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkOutcome {
    /// First mark for this (name, date); the record was appended.
    Marked(AttendanceRecord),
    /// The pair was already marked; nothing was appended.
    AlreadyMarked,
}

impl MarkOutcome {
    pub fn is_marked(&self) -> bool {
        matches!(self, MarkOutcome::Marked(_))
    }
}

/// Enforces at most one attendance record per student per calendar day.
pub struct AttendanceGuard<'a, L: AttendanceLog> {
    log: &'a mut L,
}

impl<'a, L: AttendanceLog> AttendanceGuard<'a, L> {
    pub fn new(log: &'a mut L) -> Self {
        Self { log }
    }

    /// Transition (name, date) from unmarked to marked, appending a
    /// `Present` record. Returns `AlreadyMarked` without writing if the
    /// log already holds a record for the pair.
    pub fn try_mark(
        &mut self,
        name: &str,
        student_id: &str,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<MarkOutcome, L::Error> {
        if self.log.is_marked(name, date)? {
            tracing::debug!(name, date = %date, "attendance already marked");
            return Ok(MarkOutcome::AlreadyMarked);
        }

        let record = AttendanceRecord::present(name, student_id, date, time);
        self.log.append(&record)?;
        tracing::info!(name, student_id, date = %date, time = %record.time, "attendance marked");
        Ok(MarkOutcome::Marked(record))
    }
}
