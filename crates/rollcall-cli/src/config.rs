use rollcall_core::{EuclideanMatcher, MatchPolicy, DEFAULT_TOLERANCE};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Name of the optional config file inside the data directory.
pub const CONFIG_FILE: &str = "rollcall.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Runtime configuration: defaults, then `rollcall.toml`, then
/// `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding the student/attendance tables and the gallery.
    pub data_dir: PathBuf,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Directory containing the SCRFD and ArcFace ONNX models
    /// (default: `<data_dir>/models`).
    pub model_dir: Option<PathBuf>,
    /// Maximum embedding distance for a positive match.
    pub match_tolerance: f32,
    pub match_policy: MatchPolicy,
    /// Run recognition on every Nth captured frame.
    pub sample_interval: u64,
    /// Number of frames to capture per enrollment.
    pub enroll_frames: usize,
    /// Capacity of the session event channel.
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            model_dir: None,
            camera_device: "/dev/video0".to_string(),
            frame_width: 640,
            frame_height: 480,
            match_tolerance: DEFAULT_TOLERANCE,
            match_policy: MatchPolicy::default(),
            sample_interval: 30,
            enroll_frames: 5,
            event_capacity: 16,
        }
    }
}

impl Config {
    /// Load configuration. An explicit path must exist; otherwise
    /// `ROLLCALL_CONFIG` or `<data_dir>/rollcall.toml` is used if present.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(explicit, |key| std::env::var(key).ok())
    }

    fn load_with(
        explicit: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let file = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => lookup("ROLLCALL_CONFIG").map(PathBuf::from).or_else(|| {
                let candidate = lookup("ROLLCALL_DATA_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(default_data_dir)
                    .join(CONFIG_FILE);
                candidate.exists().then_some(candidate)
            }),
        };

        let mut config = match file {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(lookup);
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("ROLLCALL_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("ROLLCALL_MODEL_DIR") {
            self.model_dir = Some(PathBuf::from(dir));
        }
        if let Some(device) = lookup("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = device;
        }
        override_parsed(&lookup, "ROLLCALL_FRAME_WIDTH", &mut self.frame_width);
        override_parsed(&lookup, "ROLLCALL_FRAME_HEIGHT", &mut self.frame_height);
        override_parsed(&lookup, "ROLLCALL_MATCH_TOLERANCE", &mut self.match_tolerance);
        override_parsed(&lookup, "ROLLCALL_MATCH_POLICY", &mut self.match_policy);
        override_parsed(&lookup, "ROLLCALL_SAMPLE_INTERVAL", &mut self.sample_interval);
        override_parsed(&lookup, "ROLLCALL_ENROLL_FRAMES", &mut self.enroll_frames);
        override_parsed(&lookup, "ROLLCALL_EVENT_CAPACITY", &mut self.event_capacity);
    }

    fn validate(&mut self) -> Result<(), ConfigError> {
        if !self.match_tolerance.is_finite() || self.match_tolerance <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "match_tolerance must be a positive number, got {}",
                self.match_tolerance
            )));
        }
        self.sample_interval = self.sample_interval.max(1);
        self.enroll_frames = self.enroll_frames.max(1);
        self.event_capacity = self.event_capacity.max(1);
        Ok(())
    }

    pub fn matcher(&self) -> EuclideanMatcher {
        EuclideanMatcher::new(self.match_tolerance, self.match_policy)
    }

    /// Model directory, resolved against the final data directory unless
    /// set explicitly.
    pub fn model_dir(&self) -> PathBuf {
        self.model_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("models"))
    }

    pub fn gallery_path(&self) -> PathBuf {
        self.data_dir.join(rollcall_store::GALLERY_FILE)
    }
}

/// Replace `slot` with the parsed value of `key`; unparsable values are
/// logged and ignored.
fn override_parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable environment override"),
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}
