//! Caption fonts and text metrics.
//!
//! Printable ASCII is drawn with the standard Helvetica-Bold Type1 font, whose
//! advance widths are built in below. Anything else needs a TrueType fallback
//! face, embedded as a Type0/CIDFontType2 font keyed by glyph id.

use anyhow::{Context, Result, anyhow};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use ttf_parser::Face;

use crate::error::PipelineError;

/// Advance widths of Helvetica-Bold for U+0020..=U+007E, in 1/1000 em
/// (WinAnsiEncoding, so 0x27 is `quotesingle` and 0x60 is `grave`).
#[rustfmt::skip]
const HELVETICA_BOLD_WIDTHS: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556,                               // '0'..'9'
    333, 333, 584, 584, 584, 611, 975,                                              // ':'..'@'
    722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833,                // 'A'..'M'
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611,                // 'N'..'Z'
    333, 278, 333, 584, 556, 333,                                                   // '['..'`'
    556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889,                // 'a'..'m'
    611, 611, 611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500,                // 'n'..'z'
    389, 280, 389, 584,                                                             // '{'..'~'
];

pub const STANDARD_CAPTION_FONT: &str = "Helvetica-Bold";

/// Width of `c` in Helvetica-Bold, if the built-in table covers it.
pub fn helvetica_bold_width(c: char) -> Option<u16> {
    match c {
        ' '..='~' => Some(HELVETICA_BOLD_WIDTHS[c as usize - 0x20]),
        _ => None,
    }
}

/// TrueType face used when a caption leaves printable ASCII.
#[derive(Debug, Clone)]
pub struct FallbackFont {
    data: Arc<Vec<u8>>,
    index: u32,
    name: String,
}

impl FallbackFont {
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = fs::read(path)
            .with_context(|| format!("Failed to read font file: {:?}", path))?;
        let name = {
            let face = Face::parse(&data, 0)
                .map_err(|e| anyhow!("Failed to parse font file {:?}: {}", path, e))?;
            postscript_name(&face).unwrap_or_else(|| file_stem_name(path))
        };
        Ok(Self {
            data: Arc::new(data),
            index: 0,
            name,
        })
    }

    /// Look for a bold Unicode sans face among the system fonts.
    pub fn discover() -> Option<Self> {
        let mut db = fontdb::Database::new();
        db.load_system_fonts();

        let families = [
            fontdb::Family::Name("Noto Sans"),
            fontdb::Family::Name("DejaVu Sans"),
            fontdb::Family::Name("Liberation Sans"),
            fontdb::Family::Name("Arial Unicode MS"),
            fontdb::Family::Name("Arial"),
            fontdb::Family::SansSerif,
        ];
        let query = fontdb::Query {
            families: &families,
            weight: fontdb::Weight::BOLD,
            ..Default::default()
        };

        let id = db.query(&query)?;
        let name = db.face(id).map(|info| info.post_script_name.clone())?;
        let (data, index) = db.with_face_data(id, |data, index| (data.to_vec(), index))?;
        // Validate before handing it out.
        Face::parse(&data, index).ok()?;
        Some(Self {
            data: Arc::new(data),
            index,
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn face(&self) -> Result<Face<'_>, PipelineError> {
        Face::parse(&self.data, self.index)
            .map_err(|e| PipelineError::render(format!("fallback font {}: {}", self.name, e)))
    }
}

fn postscript_name(face: &Face<'_>) -> Option<String> {
    face.names()
        .into_iter()
        .filter(|n| n.name_id == ttf_parser::name_id::POST_SCRIPT_NAME)
        .find_map(|n| n.to_string())
}

fn file_stem_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("CaptionFallback")
        .to_string()
}

/// Fonts available to the caption renderer. Built once, shared by all requests.
#[derive(Debug, Clone, Default)]
pub struct CaptionFonts {
    fallback: Option<FallbackFont>,
}

impl CaptionFonts {
    pub fn standard_only() -> Self {
        Self { fallback: None }
    }

    pub fn with_fallback(fallback: FallbackFont) -> Self {
        Self {
            fallback: Some(fallback),
        }
    }

    /// Measure `text` and pick the font that will draw it.
    pub fn shape(&self, text: &str) -> Result<ShapedText, PipelineError> {
        let widths: Option<Vec<u16>> = text.chars().map(helvetica_bold_width).collect();
        if let Some(widths) = widths {
            return Ok(ShapedText::Standard {
                text: text.to_string(),
                width_units: widths.iter().map(|&w| w as u32).sum(),
            });
        }

        let offending = text
            .chars()
            .find(|c| helvetica_bold_width(*c).is_none())
            .unwrap_or('\u{FFFD}');
        let fallback = self.fallback.as_ref().ok_or_else(|| {
            PipelineError::render(format!(
                "caption character {:?} (U+{:04X}) needs a fallback font and none is configured",
                offending, offending as u32
            ))
        })?;

        let face = fallback.face()?;
        let units_per_em = face.units_per_em() as u32;
        let mut glyphs = Vec::with_capacity(text.len());
        for c in text.chars() {
            let gid = face
                .glyph_index(c)
                .filter(|g| g.0 != 0)
                .ok_or_else(|| {
                    PipelineError::render(format!(
                        "font {} has no glyph for {:?} (U+{:04X})",
                        fallback.name, c, c as u32
                    ))
                })?;
            let advance = face.glyph_hor_advance(gid).unwrap_or(0) as u32;
            glyphs.push(Glyph {
                id: gid.0,
                width: (advance * 1000 / units_per_em) as u16,
            });
        }
        Ok(ShapedText::Cid {
            font: fallback.clone(),
            glyphs,
        })
    }
}

/// A glyph id with its advance width in 1/1000 em.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Glyph {
    pub id: u16,
    pub width: u16,
}

/// Caption text resolved against a font.
#[derive(Debug, Clone)]
pub enum ShapedText {
    Standard { text: String, width_units: u32 },
    Cid { font: FallbackFont, glyphs: Vec<Glyph> },
}

impl ShapedText {
    /// Advance width in 1/1000 em.
    pub fn width_units(&self) -> u32 {
        match self {
            ShapedText::Standard { width_units, .. } => *width_units,
            ShapedText::Cid { glyphs, .. } => glyphs.iter().map(|g| g.width as u32).sum(),
        }
    }

    /// Width in points at `font_size`.
    pub fn width_at(&self, font_size: f64) -> f64 {
        self.width_units() as f64 * font_size / 1000.0
    }
}

/// Add the standard caption font to the document.
pub fn create_standard_font(doc: &mut Document) -> ObjectId {
    let mut font_dict = Dictionary::new();
    font_dict.set("Type", "Font");
    font_dict.set("Subtype", "Type1");
    font_dict.set("BaseFont", STANDARD_CAPTION_FONT);
    font_dict.set("Encoding", "WinAnsiEncoding");
    doc.add_object(Object::Dictionary(font_dict))
}

/// Embed a CID-keyed font for the given glyphs.
///
/// Content streams address glyphs directly (`CIDToGIDMap /Identity`), so the
/// widths array only has to cover the glyphs the caption uses.
pub fn embed_cid_font(
    doc: &mut Document,
    font: &FallbackFont,
    glyphs: &[Glyph],
) -> Result<ObjectId, PipelineError> {
    let face = font.face()?;
    let scale = |v: i16| (v as i64) * 1000 / face.units_per_em() as i64;
    let bbox = face.global_bounding_box();
    let safe_name = font.name.replace(' ', "-");

    let mut cid_font = Dictionary::new();
    cid_font.set("Type", "Font");
    cid_font.set("Subtype", "CIDFontType2");
    cid_font.set("BaseFont", safe_name.as_str());
    cid_font.set("CIDSystemInfo", {
        let mut cid_system = Dictionary::new();
        cid_system.set("Registry", Object::String("Adobe".into(), StringFormat::Literal));
        cid_system.set("Ordering", Object::String("Identity".into(), StringFormat::Literal));
        cid_system.set("Supplement", 0i64);
        Object::Dictionary(cid_system)
    });
    cid_font.set("CIDToGIDMap", "Identity");
    cid_font.set("DW", 1000i64);

    let used: BTreeMap<u16, u16> = glyphs.iter().map(|g| (g.id, g.width)).collect();
    let mut widths = Vec::with_capacity(used.len() * 2);
    for (gid, width) in used {
        widths.push(Object::Integer(gid as i64));
        widths.push(Object::Array(vec![Object::Integer(width as i64)]));
    }
    cid_font.set("W", Object::Array(widths));

    let mut font_descriptor = Dictionary::new();
    font_descriptor.set("Type", "FontDescriptor");
    font_descriptor.set("FontName", safe_name.as_str());
    font_descriptor.set("Flags", 4i64); // Symbolic
    font_descriptor.set(
        "FontBBox",
        vec![
            Object::Integer(scale(bbox.x_min)),
            Object::Integer(scale(bbox.y_min)),
            Object::Integer(scale(bbox.x_max)),
            Object::Integer(scale(bbox.y_max)),
        ],
    );
    font_descriptor.set("ItalicAngle", 0i64);
    font_descriptor.set("Ascent", scale(face.ascender()));
    font_descriptor.set("Descent", scale(face.descender()));
    font_descriptor.set("CapHeight", scale(face.capital_height().unwrap_or(face.ascender())));
    font_descriptor.set("StemV", 120i64);

    let mut font_stream_dict = Dictionary::new();
    font_stream_dict.set("Length1", font.data.len() as i64);
    let font_stream_id = doc.add_object(Stream::new(font_stream_dict, font.data.to_vec()));
    font_descriptor.set("FontFile2", Object::Reference(font_stream_id));

    let descriptor_id = doc.add_object(Object::Dictionary(font_descriptor));
    cid_font.set("FontDescriptor", Object::Reference(descriptor_id));
    let cid_font_id = doc.add_object(Object::Dictionary(cid_font));

    let mut type0_font = Dictionary::new();
    type0_font.set("Type", "Font");
    type0_font.set("Subtype", "Type0");
    type0_font.set("BaseFont", safe_name.as_str());
    type0_font.set("Encoding", "Identity-H");
    type0_font.set("DescendantFonts", vec![Object::Reference(cid_font_id)]);

    Ok(doc.add_object(Object::Dictionary(type0_font)))
}
