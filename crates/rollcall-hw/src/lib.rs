//! rollcall-hw: Frame acquisition for attendance sessions.
//!
//! Provides V4L2-based webcam capture, a still-image frame source for
//! offline runs, and drawing of face boxes onto frames.

pub mod camera;
pub mod frame;
pub mod source;

pub use camera::{Camera, CameraError, PixelFormat};
pub use frame::Frame;
pub use source::{FrameSource, StillImages};
