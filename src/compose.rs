//! Overlay placement and compositing.
//!
//! The QR symbol is centered horizontally on the template and sits at a fixed
//! distance from the top edge. That distance is tuned to the shipped artwork
//! (`assets/template.png`); a new template needs a new value and a visual check.

use image::{DynamicImage, GrayImage, Rgba, RgbaImage};

use crate::error::PipelineError;

/// Distance in pixels from the template's top edge to the QR symbol.
pub const QR_TOP_OFFSET: u32 = 560;

/// Top-left corner of the overlay on the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub left: u32,
    pub top: u32,
}

/// Center an overlay of side `overlay_size` horizontally at [`QR_TOP_OFFSET`].
///
/// `left = round((width - overlay_size) / 2)`.
pub fn qr_placement(template_width: u32, overlay_size: u32) -> Placement {
    let left = template_width.saturating_sub(overlay_size).div_ceil(2);
    Placement {
        left,
        top: QR_TOP_OFFSET,
    }
}

/// Stamp `overlay` onto a copy of `template` with its top-left corner at `(left, top)`.
///
/// Pixels are blended by the overlay's alpha, so an opaque overlay simply
/// replaces the destination region. An overlay that would extend past the
/// template edge is rejected rather than clipped.
pub fn composite(
    template: &RgbaImage,
    overlay: &RgbaImage,
    top: u32,
    left: u32,
) -> Result<RgbaImage, PipelineError> {
    let (tw, th) = template.dimensions();
    let (ow, oh) = overlay.dimensions();
    let fits = left
        .checked_add(ow)
        .is_some_and(|right| right <= tw)
        && top.checked_add(oh).is_some_and(|bottom| bottom <= th);
    if !fits {
        return Err(PipelineError::Geometry {
            left,
            top,
            overlay_width: ow,
            overlay_height: oh,
            template_width: tw,
            template_height: th,
        });
    }

    let mut out = template.clone();
    for (x, y, src) in overlay.enumerate_pixels() {
        blend_over(out.get_pixel_mut(left + x, top + y), src);
    }
    Ok(out)
}

/// Porter-Duff source-over on straight (non-premultiplied) alpha, rounded to
/// nearest. An opaque destination stays opaque.
fn blend_over(dst: &mut Rgba<u8>, src: &Rgba<u8>) {
    let sa = src[3] as u32;
    match sa {
        255 => *dst = *src,
        0 => {}
        _ => {
            let da = dst[3] as u32;
            let inv = 255 - sa;
            // Output alpha scaled by 255.
            let out_a = sa * 255 + da * inv;
            if out_a == 0 {
                *dst = Rgba([0, 0, 0, 0]);
                return;
            }
            for i in 0..3 {
                let num = src[i] as u32 * sa * 255 + dst[i] as u32 * da * inv;
                dst[i] = ((num + out_a / 2) / out_a) as u8;
            }
            dst[3] = ((out_a + 127) / 255) as u8;
        }
    }
}

/// Expand a grayscale QR raster to opaque RGBA for compositing.
pub fn qr_to_rgba(qr: GrayImage) -> RgbaImage {
    DynamicImage::ImageLuma8(qr).to_rgba8()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BG: Rgba<u8> = Rgba([200, 100, 50, 255]);
    const INK: Rgba<u8> = Rgba([0, 0, 0, 255]);

    #[test]
    fn test_placement_centers_horizontally() {
        assert_eq!(qr_placement(1240, 500), Placement { left: 370, top: 560 });
        // Odd remainder rounds half up.
        assert_eq!(qr_placement(1241, 500).left, 371);
        assert_eq!(qr_placement(1000, 500).left, 250);
    }

    #[test]
    fn test_placement_independent_of_height() {
        assert_eq!(qr_placement(800, 300).top, QR_TOP_OFFSET);
    }

    #[test]
    fn test_opaque_overlay_replaces_region() {
        let template = RgbaImage::from_pixel(40, 30, BG);
        let overlay = RgbaImage::from_pixel(10, 5, INK);
        let out = composite(&template, &overlay, 7, 12).unwrap();

        assert_eq!(out.dimensions(), (40, 30));
        for (x, y, p) in out.enumerate_pixels() {
            let inside = (12..22).contains(&x) && (7..12).contains(&y);
            assert_eq!(*p, if inside { INK } else { BG }, "pixel ({x}, {y})");
        }
        // The input is untouched.
        assert!(template.pixels().all(|p| *p == BG));
    }

    #[test]
    fn test_alpha_overlay_blends() {
        let template = RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255]));
        let overlay = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 128]));
        let out = composite(&template, &overlay, 0, 0).unwrap();
        let p = out.get_pixel(0, 0);
        assert!(p[0] > 100 && p[0] < 155, "got {:?}", p);
        assert_eq!(p[3], 255);
        assert_eq!(out.get_pixel(3, 3), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_translucent_overlay_keeps_opaque_template_opaque() {
        let template = RgbaImage::from_pixel(6, 6, BG);
        let overlay = RgbaImage::from_fn(6, 6, |x, _| Rgba([0, 0, 0, 40 * x as u8]));
        let out = composite(&template, &overlay, 0, 0).unwrap();
        assert!(out.pixels().all(|p| p[3] == 255));
        // Fully transparent overlay pixels leave the template alone.
        assert_eq!(out.get_pixel(0, 0), &BG);
        // 128/255 black over white is 127.
        let white = RgbaImage::from_pixel(1, 1, Rgba([255, 255, 255, 255]));
        let half = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 128]));
        assert_eq!(composite(&white, &half, 0, 0).unwrap().get_pixel(0, 0), &Rgba([127, 127, 127, 255]));
    }

    #[test]
    fn test_blend_over_transparent_destination() {
        let template = RgbaImage::from_pixel(2, 1, Rgba([9, 9, 9, 0]));
        let overlay = RgbaImage::from_pixel(1, 1, Rgba([200, 100, 0, 128]));
        let out = composite(&template, &overlay, 0, 0).unwrap();
        // Nothing underneath: the source shows through unchanged.
        assert_eq!(out.get_pixel(0, 0), &Rgba([200, 100, 0, 128]));
        assert_eq!(out.get_pixel(1, 0), &Rgba([9, 9, 9, 0]));
    }

    #[test]
    fn test_exact_fit_at_corner() {
        let template = RgbaImage::from_pixel(20, 20, BG);
        let overlay = RgbaImage::from_pixel(5, 5, INK);
        let out = composite(&template, &overlay, 15, 15).unwrap();
        assert_eq!(out.get_pixel(19, 19), &INK);
        assert_eq!(out.get_pixel(14, 14), &BG);
    }

    #[test]
    fn test_overflow_right_rejected() {
        let template = RgbaImage::from_pixel(20, 20, BG);
        let overlay = RgbaImage::from_pixel(5, 5, INK);
        let err = composite(&template, &overlay, 0, 16).unwrap_err();
        assert!(matches!(err, PipelineError::Geometry { left: 16, .. }));
    }

    #[test]
    fn test_overflow_bottom_rejected() {
        let template = RgbaImage::from_pixel(20, 20, BG);
        let overlay = RgbaImage::from_pixel(5, 5, INK);
        assert!(composite(&template, &overlay, 16, 0).is_err());
    }

    #[test]
    fn test_overflow_does_not_wrap() {
        let template = RgbaImage::from_pixel(20, 20, BG);
        let overlay = RgbaImage::from_pixel(5, 5, INK);
        assert!(composite(&template, &overlay, 0, u32::MAX - 2).is_err());
    }

    #[test]
    fn test_qr_to_rgba_is_opaque() {
        let qr = GrayImage::from_fn(3, 3, |x, _| image::Luma([if x == 1 { 0 } else { 255 }]));
        let rgba = qr_to_rgba(qr);
        assert_eq!(rgba.get_pixel(1, 0), &INK);
        assert_eq!(rgba.get_pixel(0, 0), &Rgba([255, 255, 255, 255]));
    }
}
