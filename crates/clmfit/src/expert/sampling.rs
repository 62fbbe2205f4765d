//! Sub-pixel image sampling for patch extraction.

use image::GrayImage;
use nalgebra::Point2;

use crate::filter::Patch;

/// Sample a grayscale image at a sub-pixel position with bilinear
/// interpolation. Returns intensity in `[0, 1]`, or `None` out of bounds.
#[inline]
pub fn bilinear_sample(img: &GrayImage, x: f64, y: f64) -> Option<f64> {
    let (w, h) = img.dimensions();
    if w < 2 || h < 2 || x < 0.0 || y < 0.0 {
        return None;
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    if x0 >= w - 1 || y0 >= h - 1 {
        return None;
    }

    let fx = x - x0 as f64;
    let fy = y - y0 as f64;
    let stride = w as usize;
    let idx00 = y0 as usize * stride + x0 as usize;
    let raw = img.as_raw();

    const INV_255: f64 = 1.0 / 255.0;
    let p00 = raw[idx00] as f64 * INV_255;
    let p10 = raw[idx00 + 1] as f64 * INV_255;
    let p01 = raw[idx00 + stride] as f64 * INV_255;
    let p11 = raw[idx00 + stride + 1] as f64 * INV_255;

    Some(
        (1.0 - fx) * (1.0 - fy) * p00
            + fx * (1.0 - fy) * p10
            + (1.0 - fx) * fy * p01
            + fx * fy * p11,
    )
}

/// Extract a single-channel intensity patch centered at `center`.
///
/// Samples on a unit grid with bilinear interpolation; positions outside the
/// image contribute zero, so patches near the border degrade gracefully
/// instead of failing.
pub fn extract_patch(
    img: &GrayImage,
    center: Point2<f64>,
    height: usize,
    width: usize,
) -> Patch {
    let oy = center.y - (height as f64 - 1.0) / 2.0;
    let ox = center.x - (width as f64 - 1.0) / 2.0;
    let mut data = Vec::with_capacity(height * width);
    for r in 0..height {
        for c in 0..width {
            let v = bilinear_sample(img, ox + c as f64, oy + r as f64).unwrap_or(0.0);
            data.push(v);
        }
    }
    Patch::from_raw(1, height, width, data)
}
