//! Face detection/encoding collaborator.

use crate::types::{Embedding, FaceLocation};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

/// Locates faces in an RGB frame and encodes them into embeddings.
pub trait FaceAnalyzer {
    fn locate_faces(&mut self, image: &RgbImage) -> Result<Vec<FaceLocation>, AnalyzerError>;

    /// One embedding per entry of `faces`, in the same order.
    fn encode_faces(
        &mut self,
        image: &RgbImage,
        faces: &[FaceLocation],
    ) -> Result<Vec<Embedding>, AnalyzerError>;

    /// Locate then encode, pairing each location with its embedding.
    fn analyze(&mut self, image: &RgbImage) -> Result<Vec<(FaceLocation, Embedding)>, AnalyzerError> {
        let faces = self.locate_faces(image)?;
        if faces.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self.encode_faces(image, &faces)?;
        if embeddings.len() != faces.len() {
            return Err(AnalyzerError::InferenceFailed(format!(
                "encoder returned {} embeddings for {} faces",
                embeddings.len(),
                faces.len()
            )));
        }
        Ok(faces.into_iter().zip(embeddings).collect())
    }
}

impl<T: FaceAnalyzer + ?Sized> FaceAnalyzer for Box<T> {
    fn locate_faces(&mut self, image: &RgbImage) -> Result<Vec<FaceLocation>, AnalyzerError> {
        (**self).locate_faces(image)
    }

    fn encode_faces(
        &mut self,
        image: &RgbImage,
        faces: &[FaceLocation],
    ) -> Result<Vec<Embedding>, AnalyzerError> {
        (**self).encode_faces(image, faces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ShortEncoder;

    impl FaceAnalyzer for ShortEncoder {
        fn locate_faces(&mut self, _: &RgbImage) -> Result<Vec<FaceLocation>, AnalyzerError> {
            Ok(vec![
                FaceLocation { x: 0.0, y: 0.0, width: 4.0, height: 4.0, confidence: 0.9 },
                FaceLocation { x: 4.0, y: 4.0, width: 4.0, height: 4.0, confidence: 0.8 },
            ])
        }

        fn encode_faces(&mut self, _: &RgbImage, _: &[FaceLocation]) -> Result<Vec<Embedding>, AnalyzerError> {
            Ok(vec![Embedding::new(vec![0.0; 4])])
        }
    }

    #[test]
    fn test_analyze_rejects_count_mismatch() {
        let image = RgbImage::new(8, 8);
        let result = ShortEncoder.analyze(&image);
        assert!(matches!(result, Err(AnalyzerError::InferenceFailed(_))));
    }
}
