//! rollcall-vision: Face detection and encoding via ONNX Runtime.
//!
//! SCRFD locates faces, ArcFace turns each face crop into a 512-d
//! embedding. Together they implement [`rollcall_core::FaceAnalyzer`].

pub mod detector;
pub mod encoder;

use image::RgbImage;
use rollcall_core::{AnalyzerError, Embedding, FaceAnalyzer, FaceLocation};
use std::path::Path;

pub use detector::{DetectorError, FaceDetector};
pub use encoder::{EncoderError, FaceEncoder};

/// File name of the SCRFD detection model inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// File name of the ArcFace recognition model inside the model directory.
pub const ENCODER_MODEL_FILE: &str = "w600k_r50.onnx";

/// SCRFD + ArcFace pair loaded from one model directory.
pub struct OnnxFaceAnalyzer {
    detector: FaceDetector,
    encoder: FaceEncoder,
}

impl OnnxFaceAnalyzer {
    pub fn load(model_dir: &Path) -> Result<Self, AnalyzerError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let encoder = FaceEncoder::load(&model_dir.join(ENCODER_MODEL_FILE))?;
        Ok(Self { detector, encoder })
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn locate_faces(&mut self, image: &RgbImage) -> Result<Vec<FaceLocation>, AnalyzerError> {
        Ok(self.detector.detect(image)?)
    }

    fn encode_faces(
        &mut self,
        image: &RgbImage,
        faces: &[FaceLocation],
    ) -> Result<Vec<Embedding>, AnalyzerError> {
        faces
            .iter()
            .map(|face| self.encoder.encode(image, face).map_err(AnalyzerError::from))
            .collect()
    }
}
