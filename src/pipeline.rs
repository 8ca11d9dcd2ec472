//! The per-request generation pipeline.
//!
//! Stages run strictly in order and the first failure ends the run:
//! encode the URL, load the template, stamp the QR code onto it, then
//! assemble the PDF. Nothing is shared between runs except read-only inputs.

use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::compose::{composite, qr_placement, qr_to_rgba};
use crate::error::PipelineError;
use crate::pdf::{CaptionFonts, PdfDocument, assemble};
use crate::qr::Encode;
use crate::template::TemplateLoader;

/// Where a request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    Authenticating,
    Encoding,
    Loading,
    Compositing,
    Assembling,
    Streaming,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validating => "validating",
            Stage::Authenticating => "authenticating",
            Stage::Encoding => "encoding",
            Stage::Loading => "loading",
            Stage::Compositing => "compositing",
            Stage::Assembling => "assembling",
            Stage::Streaming => "streaming",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only inputs shared by every run.
pub struct Pipeline {
    encoder: Arc<dyn Encode>,
    templates: TemplateLoader,
    fonts: CaptionFonts,
}

impl Pipeline {
    pub fn new(encoder: Arc<dyn Encode>, templates: TemplateLoader, fonts: CaptionFonts) -> Self {
        Self {
            encoder,
            templates,
            fonts,
        }
    }

    /// Produce the document for `url`. Blocking; call from a worker thread.
    pub fn run(&self, url: &str, request_id: Uuid) -> Result<PdfDocument, PipelineError> {
        let trace = |stage: Stage| tracing::debug!(%request_id, %stage, "entering stage");

        trace(Stage::Encoding);
        let qr = self.encoder.encode(url)?;
        let qr_size = qr.width();

        trace(Stage::Loading);
        let template = self.templates.load()?;

        trace(Stage::Compositing);
        let placement = qr_placement(template.width, qr_size);
        let composited = composite(
            &template.pixels,
            &qr_to_rgba(qr),
            placement.top,
            placement.left,
        )?;

        trace(Stage::Assembling);
        let document = assemble(&composited, template.width, template.height, url, &self.fonts)?;

        tracing::debug!(
            %request_id,
            width = template.width,
            height = template.height,
            left = placement.left,
            top = placement.top,
            "document assembled"
        );
        Ok(document)
    }
}
