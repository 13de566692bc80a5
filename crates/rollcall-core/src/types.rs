use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bounding box for a located face, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceLocation {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl FaceLocation {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Clamp the box to a `width` x `height` frame, returning integer
    /// `(x, y, w, h)`. `None` if nothing of the box is inside the frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.max(0.0).min(width as f32);
        let y0 = self.y.max(0.0).min(height as f32);
        let x1 = (self.x + self.width).max(0.0).min(width as f32);
        let y1 = (self.y + self.height).max(0.0).min(height as f32);

        let w = (x1 - x0).floor() as u32;
        let h = (y1 - y0).floor() as u32;
        if w == 0 || h == 0 {
            return None;
        }
        Some((x0.floor() as u32, y0.floor() as u32, w, h))
    }
}

/// Face embedding vector produced by an encoder model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance between two embeddings.
    ///
    /// Embeddings of different dimension (or empty ones) are incomparable
    /// and yield `f32::INFINITY`, so they never fall within a tolerance.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
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

/// One named entry of the embedding gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub name: String,
    pub embedding: Embedding,
}

/// A registered student. `name` is the unique identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub name: String,
    pub student_id: String,
    #[serde(with = "datetime_format")]
    pub registration_date: NaiveDateTime,
}

impl Student {
    pub fn new(
        name: impl Into<String>,
        student_id: impl Into<String>,
        registration_date: NaiveDateTime,
    ) -> Self {
        Self {
            name: name.into().trim().to_string(),
            student_id: student_id.into().trim().to_string(),
            registration_date: registration_date.with_nanosecond(0).unwrap_or(registration_date),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttendanceStatus::Present => f.write_str("Present"),
        }
    }
}

/// One row of the append-only attendance log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub name: String,
    pub student_id: String,
    pub date: NaiveDate,
    #[serde(with = "time_format")]
    pub time: NaiveTime,
    pub status: AttendanceStatus,
}

impl AttendanceRecord {
    /// A `Present` record, with the time truncated to whole seconds.
    pub fn present(
        name: impl Into<String>,
        student_id: impl Into<String>,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Self {
        Self {
            name: name.into(),
            student_id: student_id.into(),
            date,
            time: time.with_nanosecond(0).unwrap_or(time),
            status: AttendanceStatus::Present,
        }
    }
}

/// `YYYY-MM-DD HH:MM:SS`, the format of the student table.
pub mod datetime_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(raw.trim(), FORMAT).map_err(serde::de::Error::custom)
    }
}

/// `HH:MM:SS`, the time column of the attendance table.
pub mod time_format {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%H:%M:%S";

    pub fn serialize<S: Serializer>(value: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(raw.trim(), FORMAT).map_err(serde::de::Error::custom)
    }
}
