//! Gallery matching by Euclidean embedding distance.

use crate::types::{Embedding, GalleryEntry};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default distance tolerance for unit-length ArcFace embeddings.
///
/// Equals `tolerance_for_cosine(0.40)`, the usual ArcFace acceptance
/// similarity.
pub const DEFAULT_TOLERANCE: f32 = 1.095_445;

/// Euclidean distance between unit vectors whose cosine similarity is
/// `similarity`: `sqrt(2 * (1 - cos))`.
pub fn tolerance_for_cosine(similarity: f32) -> f32 {
    (2.0 * (1.0 - similarity)).max(0.0).sqrt()
}

/// How to pick among several gallery entries within tolerance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchPolicy {
    /// The first entry in gallery order within tolerance wins, even if a
    /// later entry is closer.
    #[default]
    FirstWithin,
    /// The closest entry within tolerance wins.
    Nearest,
}

impl FromStr for MatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first-within" | "first" => Ok(Self::FirstWithin),
            "nearest" => Ok(Self::Nearest),
            other => Err(format!("unknown match policy: {other} (expected first-within or nearest)")),
        }
    }
}

impl fmt::Display for MatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FirstWithin => f.write_str("first-within"),
            Self::Nearest => f.write_str("nearest"),
        }
    }
}

/// Outcome of matching a candidate embedding.
#[derive(Debug, Clone, PartialEq)]
pub enum Identity {
    Known { name: String, distance: f32 },
    Unknown,
}

impl Identity {
    pub fn name(&self) -> Option<&str> {
        match self {
            Identity::Known { name, .. } => Some(name),
            Identity::Unknown => None,
        }
    }

    /// Text drawn next to the face box.
    pub fn label(&self) -> &str {
        self.name().unwrap_or("Unknown")
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Identity::Known { .. })
    }
}

/// Strategy for identifying a candidate embedding against a gallery.
pub trait Matcher {
    fn identify(&self, candidate: &Embedding, gallery: &[GalleryEntry]) -> Identity;
}

/// Euclidean-distance matcher: an entry matches when `distance <= tolerance`.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub tolerance: f32,
    pub policy: MatchPolicy,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            policy: MatchPolicy::default(),
        }
    }
}

impl EuclideanMatcher {
    pub fn new(tolerance: f32, policy: MatchPolicy) -> Self {
        Self { tolerance, policy }
    }
}

impl Matcher for EuclideanMatcher {
    fn identify(&self, candidate: &Embedding, gallery: &[GalleryEntry]) -> Identity {
        let mut best: Option<(&GalleryEntry, f32)> = None;

        for entry in gallery {
            let distance = candidate.euclidean_distance(&entry.embedding);
            if distance > self.tolerance {
                continue;
            }
            match self.policy {
                MatchPolicy::FirstWithin => {
                    best = Some((entry, distance));
                    break;
                }
                MatchPolicy::Nearest => {
                    if best.map_or(true, |(_, d)| distance < d) {
                        best = Some((entry, distance));
                    }
                }
            }
        }

        match best {
            Some((entry, distance)) => {
                tracing::trace!(name = %entry.name, distance, policy = %self.policy, "gallery match");
                Identity::Known {
                    name: entry.name.clone(),
                    distance,
                }
            }
            None => Identity::Unknown,
        }
    }
}
