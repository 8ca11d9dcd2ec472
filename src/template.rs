//! Background template loading.

use image::{ImageFormat, ImageReader, RgbaImage};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;

/// Decoded template raster.
#[derive(Debug, Clone)]
pub struct TemplateImage {
    pub pixels: RgbaImage,
    pub width: u32,
    pub height: u32,
}

/// Reads the template asset from a fixed path.
///
/// The file is read on every call; the asset is treated as immutable, so
/// concurrent readers need no coordination.
#[derive(Debug, Clone)]
pub struct TemplateLoader {
    path: PathBuf,
}

impl TemplateLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<TemplateImage, PipelineError> {
        let bytes = fs::read(&self.path)
            .map_err(|e| PipelineError::asset(&self.path, format!("failed to read: {}", e)))?;
        decode_template(&self.path, &bytes)
    }
}

fn decode_template(path: &Path, bytes: &[u8]) -> Result<TemplateImage, PipelineError> {
    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| PipelineError::asset(path, format!("failed to sniff format: {}", e)))?;
    if reader.format().is_none() {
        reader.set_format(ImageFormat::Png);
    }
    let pixels = reader
        .decode()
        .map_err(|e| PipelineError::asset(path, format!("not a decodable raster: {}", e)))?
        .to_rgba8();
    let (width, height) = pixels.dimensions();
    if width == 0 || height == 0 {
        return Err(PipelineError::asset(path, "image has no pixels"));
    }
    Ok(TemplateImage {
        pixels,
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn scratch_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("qr_pdf_service-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn test_load_reports_dimensions() {
        let path = scratch_path("template-dims.png");
        RgbaImage::from_pixel(640, 900, Rgba([10, 20, 30, 255]))
            .save(&path)
            .unwrap();

        let template = TemplateLoader::new(&path).load().unwrap();
        assert_eq!((template.width, template.height), (640, 900));
        assert_eq!(template.pixels.get_pixel(5, 5), &Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn test_shipped_template_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("assets/template.png");
        let template = TemplateLoader::new(path).load().unwrap();
        assert_eq!((template.width, template.height), (1240, 1754));
    }

    #[test]
    fn test_missing_file_is_asset_error() {
        let err = TemplateLoader::new(scratch_path("does-not-exist.png"))
            .load()
            .unwrap_err();
        assert!(matches!(err, PipelineError::Asset { .. }));
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn test_garbage_file_is_asset_error() {
        let path = scratch_path("garbage.png");
        fs::write(&path, b"definitely not a png").unwrap();
        let err = TemplateLoader::new(&path).load().unwrap_err();
        assert!(matches!(err, PipelineError::Asset { .. }));
        assert!(err.is_configuration_fault());
    }
}
