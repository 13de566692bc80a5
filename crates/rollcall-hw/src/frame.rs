//! Frame type and pixel work: YUYV conversion and face box drawing.

use image::{Rgb, RgbImage};
use rollcall_core::FaceLocation;

/// Box and label band colour for a recognized face.
pub const KNOWN_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
/// Box and label band colour for an unknown face.
pub const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 64, 0]);

const BOX_THICKNESS: u32 = 2;
const LABEL_BAND_HEIGHT: u32 = 35;

/// A captured RGB camera frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub sequence: u32,
    pub timestamp: std::time::Instant,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u32) -> Self {
        Self {
            image,
            sequence,
            timestamp: std::time::Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Convert packed YUYV (4:2:2) to RGB using BT.601 integer coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }

    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::InvalidLength {
        expected,
        actual: yuyv.len(),
    })
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| (x >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e + 128),
        clamp(298 * c - 100 * d - 208 * e + 128),
        clamp(298 * c + 516 * d + 128),
    ]
}

/// Draw a face box with a filled label band along its bottom edge.
///
/// The band marks where the presentation layer places the identity text.
pub fn draw_face_box(image: &mut RgbImage, face: &FaceLocation, color: Rgb<u8>) {
    let Some((x, y, w, h)) = face.clamp_to(image.width(), image.height()) else {
        return;
    };

    let t = BOX_THICKNESS.min(w).min(h);
    fill_rect(image, x, y, w, t, color);
    fill_rect(image, x, y + h - t, w, t, color);
    fill_rect(image, x, y, t, h, color);
    fill_rect(image, x + w - t, y, t, h, color);

    let band = LABEL_BAND_HEIGHT.min(h);
    fill_rect(image, x, y + h - band, w, band, color);
}

fn fill_rect(image: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    let x_end = (x + w).min(image.width());
    let y_end = (y + h).min(image.height());
    for py in y..y_end {
        for px in x..x_end {
            image.put_pixel(px, py, color);
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid YUYV length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
