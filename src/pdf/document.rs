//! Assembly of the single-page output document.

use lopdf::{Dictionary, Document, Object, Stream, StringFormat};
use image::RgbaImage;
use std::io::{self, Write};

use crate::error::PipelineError;
use super::content::{CaptionLayout, ContentBuilder, PAGE_IMAGE_RESOURCE, compress_data};
use super::fonts::{CaptionFonts, ShapedText, create_standard_font, embed_cid_font};
use super::resources::page_resources;

const DOCUMENT_TITLE: &str = "QR Instructions";
const PRODUCER: &str = concat!("qr_pdf_service ", env!("CARGO_PKG_VERSION"));

/// A finished single-page document waiting to be serialized.
///
/// Serialization consumes the value, so a document is written at most once.
#[derive(Debug)]
pub struct PdfDocument {
    doc: Document,
    width: u32,
    height: u32,
}

impl PdfDocument {
    pub fn page_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Serialize into `out`. The caller still owns finalizing the sink.
    pub fn write_to<W: Write>(mut self, out: &mut W) -> io::Result<()> {
        self.doc
            .save_to(out)
            .map_err(|e| io::Error::other(e.to_string()))
    }

    #[cfg(test)]
    pub fn to_bytes(self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }
}

/// Split an RGBA raster into FlateDecode-ready RGB samples and, when any
/// pixel is translucent, a separate alpha plane.
fn split_alpha(image: &RgbaImage) -> (Vec<u8>, Option<Vec<u8>>) {
    let mut rgb = Vec::with_capacity(image.as_raw().len() / 4 * 3);
    let mut alpha = Vec::with_capacity(image.as_raw().len() / 4);
    let mut translucent = false;
    for px in image.pixels() {
        rgb.extend_from_slice(&px.0[..3]);
        alpha.push(px.0[3]);
        translucent |= px.0[3] != 255;
    }
    (rgb, translucent.then_some(alpha))
}

fn image_xobject(
    doc: &mut Document,
    samples: &[u8],
    width: u32,
    height: u32,
    color_space: &str,
) -> Result<lopdf::ObjectId, PipelineError> {
    let compressed_bytes = compress_data(samples)
        .map_err(|e| PipelineError::render(format!("failed to compress image data: {}", e)))?;

    let mut img_dict = Dictionary::new();
    img_dict.set("Type", "XObject");
    img_dict.set("Subtype", "Image");
    img_dict.set("Width", width as i64);
    img_dict.set("Height", height as i64);
    img_dict.set("ColorSpace", color_space);
    img_dict.set("BitsPerComponent", 8_i64);
    img_dict.set("Filter", "FlateDecode");

    let mut img_stream = Stream::new(img_dict, compressed_bytes);
    img_stream.allows_compression = false;
    Ok(doc.add_object(img_stream))
}

/// Build a `width` x `height` point page with `image` stretched over it and
/// `caption` centered near the bottom.
pub fn assemble(
    image: &RgbaImage,
    width: u32,
    height: u32,
    caption: &str,
    fonts: &CaptionFonts,
) -> Result<PdfDocument, PipelineError> {
    if width == 0 || height == 0 {
        return Err(PipelineError::render(format!(
            "page size {}x{} is empty",
            width, height
        )));
    }

    // Shape first: an unsupported caption should fail before any encoding work.
    let shaped = fonts.shape(caption)?;

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = match &shaped {
        ShapedText::Standard { .. } => create_standard_font(&mut doc),
        ShapedText::Cid { font, glyphs } => embed_cid_font(&mut doc, font, glyphs)?,
    };

    let (rgb, alpha) = split_alpha(image);
    let (img_w, img_h) = image.dimensions();
    let image_id = image_xobject(&mut doc, &rgb, img_w, img_h, "DeviceRGB")?;
    if let Some(alpha) = alpha {
        let mask_id = image_xobject(&mut doc, &alpha, img_w, img_h, "DeviceGray")?;
        if let Ok(Object::Stream(stream)) = doc.get_object_mut(image_id) {
            stream.dict.set("SMask", Object::Reference(mask_id));
        }
    }

    let mut builder = ContentBuilder::new(width, height);
    builder.add_full_page_image(PAGE_IMAGE_RESOURCE, image_id);
    builder.add_caption(&shaped, CaptionLayout::for_page(width, height));

    let content_id = doc.add_object(Stream::new(Dictionary::new(), builder.build_content_bytes()));
    let resources_id = doc.add_object(Object::Dictionary(page_resources(
        font_id,
        &builder.xobjects,
    )));

    let mut page = Dictionary::new();
    page.set("Type", "Page");
    page.set("Parent", Object::Reference(pages_id));
    page.set(
        "MediaBox",
        vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(width as i64),
            Object::Integer(height as i64),
        ],
    );
    page.set("Contents", Object::Reference(content_id));
    page.set("Resources", Object::Reference(resources_id));
    let page_id = doc.add_object(Object::Dictionary(page));

    let mut pages = Dictionary::new();
    pages.set("Type", "Pages");
    pages.set("Kids", vec![Object::Reference(page_id)]);
    pages.set("Count", 1_i64);
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let mut catalog = Dictionary::new();
    catalog.set("Type", "Catalog");
    catalog.set("Pages", Object::Reference(pages_id));
    let catalog_id = doc.add_object(Object::Dictionary(catalog));

    // No CreationDate: identical input must serialize to identical bytes.
    let mut info = Dictionary::new();
    info.set("Title", Object::String(DOCUMENT_TITLE.into(), StringFormat::Literal));
    info.set("Producer", Object::String(PRODUCER.into(), StringFormat::Literal));
    let info_id = doc.add_object(Object::Dictionary(info));

    doc.trailer.set("Root", Object::Reference(catalog_id));
    doc.trailer.set("Info", Object::Reference(info_id));

    Ok(PdfDocument { doc, width, height })
}
