//! Single-page PDF assembly.

pub mod content;
pub mod document;
pub mod fonts;
pub mod resources;
pub mod stream;

pub use document::{PdfDocument, assemble};
pub use fonts::{CaptionFonts, FallbackFont};
pub use stream::{ChunkWriter, forward_chunks};
