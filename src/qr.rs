//! QR code rendering.
//!
//! URLs are encoded at error-correction level H and rasterized to a fixed
//! square with a one-module light border. Every pixel is pure black or pure
//! white so scanners can binarize the printed symbol without guessing.

use image::{GrayImage, Luma};
use qrcode::{Color, EcLevel, QrCode};

use crate::error::PipelineError;

/// Side length of the rendered QR raster in pixels.
pub const QR_SIZE: u32 = 500;

/// Light modules around the symbol.
pub const QR_MARGIN_MODULES: usize = 1;

const DARK: Luma<u8> = Luma([0u8]);
const LIGHT: Luma<u8> = Luma([255u8]);

/// Turns text into a QR raster.
pub trait Encode: Send + Sync {
    fn encode(&self, data: &str) -> Result<GrayImage, PipelineError>;
}

/// Level-H encoder producing `size` x `size` rasters.
#[derive(Debug, Clone, Copy)]
pub struct QrEncoder {
    size: u32,
}

impl QrEncoder {
    pub fn new(size: u32) -> Self {
        Self { size }
    }
}

impl Default for QrEncoder {
    fn default() -> Self {
        Self::new(QR_SIZE)
    }
}

impl Encode for QrEncoder {
    fn encode(&self, data: &str) -> Result<GrayImage, PipelineError> {
        let code = QrCode::with_error_correction_level(data, EcLevel::H).map_err(|e| {
            PipelineError::encoding(format!("{} ({} bytes of input)", e, data.len()))
        })?;
        Ok(rasterize(&code, self.size))
    }
}

/// Nearest-neighbour sample the module grid (plus margin) onto a square raster.
///
/// The module grid rarely divides the output size evenly, so individual
/// modules may differ by one pixel in width. Colors stay strictly two-tone.
fn rasterize(code: &QrCode, size: u32) -> GrayImage {
    GrayImage::from_fn(size, size, |x, y| match module_at(code, size, x, y) {
        Color::Dark => DARK,
        Color::Light => LIGHT,
    })
}

/// Module color covering raster pixel `(x, y)` of a `size` x `size` rendering.
pub fn module_at(code: &QrCode, size: u32, x: u32, y: u32) -> Color {
    let modules = code.width();
    let span = (modules + 2 * QR_MARGIN_MODULES) as u64;
    let mx = (x as u64 * span / size as u64) as usize;
    let my = (y as u64 * span / size as u64) as usize;
    let inside = QR_MARGIN_MODULES..QR_MARGIN_MODULES + modules;
    if inside.contains(&mx) && inside.contains(&my) {
        code[(mx - QR_MARGIN_MODULES, my - QR_MARGIN_MODULES)]
    } else {
        Color::Light
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_is_fixed_square() {
        let encoder = QrEncoder::default();
        for url in ["https://example.com/x", "a", "https://example.com/".repeat(20).as_str()] {
            let img = encoder.encode(url).unwrap();
            assert_eq!(img.dimensions(), (QR_SIZE, QR_SIZE));
        }
    }

    #[test]
    fn test_custom_size() {
        let img = QrEncoder::new(123).encode("https://example.com/x").unwrap();
        assert_eq!(img.dimensions(), (123, 123));
    }

    #[test]
    fn test_only_black_and_white() {
        let img = QrEncoder::default().encode("https://example.com/x").unwrap();
        assert!(img.pixels().all(|p| p[0] == 0 || p[0] == 255));
        assert!(img.pixels().any(|p| p[0] == 0));
    }

    #[test]
    fn test_one_module_light_border() {
        let img = QrEncoder::default().encode("https://example.com/x").unwrap();
        let code = QrCode::with_error_correction_level("https://example.com/x", EcLevel::H).unwrap();
        let module_px = QR_SIZE / (code.width() as u32 + 2);
        // The border is light; the finder pattern corner right after it is dark.
        for i in 0..QR_SIZE {
            assert_eq!(img.get_pixel(i, 0)[0], 255);
            assert_eq!(img.get_pixel(0, i)[0], 255);
        }
        assert_eq!(img.get_pixel(module_px + 1, module_px + 1)[0], 0);
    }

    #[test]
    fn test_module_centers_match_matrix() {
        let url = "https://example.com/x";
        let img = QrEncoder::default().encode(url).unwrap();
        let code = QrCode::with_error_correction_level(url, EcLevel::H).unwrap();
        let span = (code.width() + 2) as f64;
        let center = |m: usize| (((m + 1) as f64 + 0.5) * QR_SIZE as f64 / span) as u32;
        for my in 0..code.width() {
            for mx in 0..code.width() {
                let expected = match code[(mx, my)] {
                    Color::Dark => 0,
                    Color::Light => 255,
                };
                let p = img.get_pixel(center(mx), center(my));
                assert_eq!(p[0], expected, "module ({mx}, {my})");
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let encoder = QrEncoder::default();
        let a = encoder.encode("https://example.com/x").unwrap();
        let b = encoder.encode("https://example.com/x").unwrap();
        assert_eq!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn test_over_capacity_fails() {
        // Version 40-H holds at most 1273 bytes.
        let url = format!("https://example.com/{}", "x".repeat(1300));
        let err = QrEncoder::default().encode(&url).unwrap_err();
        assert!(matches!(err, PipelineError::Encoding { .. }));
    }

    #[test]
    fn test_capacity_boundary() {
        let fits = "x".repeat(1273);
        assert!(QrEncoder::default().encode(&fits).is_ok());
        let too_long = "x".repeat(1274);
        assert!(QrEncoder::default().encode(&too_long).is_err());
    }
}
