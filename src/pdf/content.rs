//! PDF content stream generation for the page image and caption.
//!
//! This module provides:
//! - Full-bleed image placement
//! - Centered caption text for standard and CID fonts
//! - String encoding for PDF (escaped literals and hex glyph ids)

use anyhow::Result;
use lopdf::Dictionary;
use std::io::Write;

use super::fonts::{Glyph, ShapedText};

/// Resource name of the caption font on the page.
pub const CAPTION_FONT_RESOURCE: &str = "F1";

/// Resource name of the page image.
pub const PAGE_IMAGE_RESOURCE: &str = "Im1";

/// Caption placement derived from the page size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptionLayout {
    pub font_size: f64,
    /// Baseline distance from the top edge of the page.
    pub baseline_from_top: f64,
}

impl CaptionLayout {
    /// Font size `round(0.03 * width)`, baseline `round(0.9 * height)` from the top.
    pub fn for_page(width: u32, height: u32) -> Self {
        Self {
            font_size: (0.03 * width as f64).round(),
            baseline_from_top: (0.9 * height as f64).round(),
        }
    }
}

/// Builder for the page's content stream and XObject resources.
pub struct ContentBuilder {
    pub content_parts: Vec<String>,
    pub xobjects: Dictionary,
    page_width: f64,
    page_height: f64,
}

impl ContentBuilder {
    pub fn new(page_width: u32, page_height: u32) -> Self {
        Self {
            content_parts: Vec::new(),
            xobjects: Dictionary::new(),
            page_width: page_width as f64,
            page_height: page_height as f64,
        }
    }

    /// Draw an image XObject stretched over the whole page.
    pub fn add_full_page_image(&mut self, name: &str, image_id: lopdf::ObjectId) {
        self.xobjects.set(name, lopdf::Object::Reference(image_id));
        self.content_parts.push(format!(
            "q {} 0 0 {} 0 0 cm /{} Do Q ",
            fmt_num(self.page_width),
            fmt_num(self.page_height),
            name
        ));
    }

    /// Draw `text` centered horizontally with its baseline at the layout position.
    pub fn add_caption(&mut self, text: &ShapedText, layout: CaptionLayout) {
        let x = (self.page_width - text.width_at(layout.font_size)) / 2.0;
        // PDF user space grows upwards from the bottom edge.
        let y = self.page_height - layout.baseline_from_top;
        let operand = match text {
            ShapedText::Standard { text, .. } => format!("({})", escape_pdf_string(text)),
            ShapedText::Cid { glyphs, .. } => format!("<{}>", encode_glyph_ids(glyphs)),
        };
        self.content_parts.push(format!(
            "q BT 0 g /{} {} Tf {} {} Td {} Tj ET Q ",
            CAPTION_FONT_RESOURCE,
            fmt_num(layout.font_size),
            fmt_num(x),
            fmt_num(y),
            operand
        ));
    }

    /// Build the final content bytes
    pub fn build_content_bytes(&self) -> Vec<u8> {
        self.content_parts.join("").into_bytes()
    }
}

/// Format a coordinate without float noise: integers stay integers, the rest
/// keeps at most three decimals.
fn fmt_num(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        let s = format!("{:.3}", v);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

/// Escape special characters in PDF strings
pub fn escape_pdf_string(s: &str) -> String {
    let mut result = String::new();
    for c in s.chars() {
        match c {
            '(' => result.push_str(r"\("),
            ')' => result.push_str(r"\)"),
            '\\' => result.push_str(r"\\"),
            '\n' => result.push_str(r"\n"),
            '\r' => result.push_str(r"\r"),
            '\t' => result.push_str(r"\t"),
            _ => result.push(c),
        }
    }
    result
}

/// Encode glyph ids as big-endian hex for an Identity-H font.
pub fn encode_glyph_ids(glyphs: &[Glyph]) -> String {
    glyphs.iter().map(|g| format!("{:04X}", g.id)).collect()
}

/// Compress data using zlib/flate2
pub fn compress_data(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}
