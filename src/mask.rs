//! Per-pixel mask arithmetic and compositing primitives
//!
//! All operations allocate a new buffer; inputs are never mutated.

use crate::error::{IdPhotoError, Result};
use image::{GrayImage, Luma, Rgb, RgbImage, RgbaImage};
use imageproc::{distance_transform::Norm, filter::gaussian_blur_f32, morphology::dilate};

/// Values strictly above this are foreground after binarization (50% of 255)
pub const BINARY_THRESHOLD: u8 = 127;

/// Normalize a mask to strictly 0/255 at the 50% threshold
#[must_use]
pub fn binarize(mask: &GrayImage) -> GrayImage {
    map_gray(mask, |v| if v > BINARY_THRESHOLD { 255 } else { 0 })
}

/// True if every pixel is either 0 or 255
#[must_use]
pub fn is_binary(mask: &GrayImage) -> bool {
    mask.as_raw().iter().all(|&v| v == 0 || v == 255)
}

/// Pixel-wise `clamp(minuend - subtrahend, 0, 255)`
pub fn subtract_clamped(minuend: &GrayImage, subtrahend: &GrayImage) -> Result<GrayImage> {
    ensure_same_size("mask subtraction", minuend.dimensions(), subtrahend.dimensions())?;
    let data = minuend
        .as_raw()
        .iter()
        .zip(subtrahend.as_raw())
        .map(|(&a, &b)| a.saturating_sub(b))
        .collect();
    from_raw_gray(minuend.width(), minuend.height(), data)
}

/// Dilate with a `kernel_size` x `kernel_size` square, `iterations` times.
///
/// Repeated square dilations compose into one square of radius
/// `iterations * (kernel_size / 2)`, so a single Chebyshev pass is used.
/// Any non-zero input pixel counts as foreground.
#[must_use]
pub fn dilate_square(mask: &GrayImage, kernel_size: u8, iterations: u8) -> GrayImage {
    let radius = u32::from(kernel_size / 2) * u32::from(iterations);
    if radius == 0 {
        return mask.clone();
    }
    let radius = u8::try_from(radius).unwrap_or(u8::MAX);
    dilate(mask, Norm::LInf, radius)
}

/// Gaussian-feather a mask edge
#[must_use]
pub fn feather(mask: &GrayImage, sigma: f32) -> GrayImage {
    if sigma <= 0.0 {
        return mask.clone();
    }
    gaussian_blur_f32(mask, sigma)
}

/// Extract the alpha channel of an RGBA image
#[must_use]
pub fn alpha_channel(image: &RgbaImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        Luma([image.get_pixel(x, y).0[3]])
    })
}

/// Replace the alpha channel of an RGB(A) source with `alpha`
pub fn with_alpha(color: &RgbImage, alpha: &GrayImage) -> Result<RgbaImage> {
    ensure_same_size("alpha attachment", color.dimensions(), alpha.dimensions())?;
    Ok(RgbaImage::from_fn(color.width(), color.height(), |x, y| {
        let [r, g, b] = color.get_pixel(x, y).0;
        image::Rgba([r, g, b, alpha.get_pixel(x, y).0[0]])
    }))
}

/// Flatten an RGBA image over a solid color
#[must_use]
pub fn flatten_over(image: &RgbaImage, background: [u8; 3]) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b, a] = image.get_pixel(x, y).0;
        Rgb(blend_rgb([r, g, b], background, a))
    })
}

/// Source-over composite of `overlay` onto an opaque `base` using the
/// overlay's own alpha
pub fn alpha_composite(base: &RgbImage, overlay: &RgbaImage) -> Result<RgbImage> {
    ensure_same_size("alpha composite", base.dimensions(), overlay.dimensions())?;
    Ok(RgbImage::from_fn(base.width(), base.height(), |x, y| {
        let [r, g, b, a] = overlay.get_pixel(x, y).0;
        Rgb(blend_rgb([r, g, b], base.get_pixel(x, y).0, a))
    }))
}

/// Select `foreground` where `mask` is high and a solid `background` elsewhere.
///
/// Intermediate mask values blend linearly.
pub fn composite_over_color(
    foreground: &RgbImage,
    background: [u8; 3],
    mask: &GrayImage,
) -> Result<RgbImage> {
    ensure_same_size("background composite", foreground.dimensions(), mask.dimensions())?;
    Ok(RgbImage::from_fn(foreground.width(), foreground.height(), |x, y| {
        Rgb(blend_rgb(
            foreground.get_pixel(x, y).0,
            background,
            mask.get_pixel(x, y).0[0],
        ))
    }))
}

/// Foreground mask from the top-left corner color: 255 where the summed
/// absolute channel difference exceeds `threshold`
#[must_use]
pub fn color_key_mask(image: &RgbImage, threshold: u32) -> GrayImage {
    if image.width() == 0 || image.height() == 0 {
        return GrayImage::new(image.width(), image.height());
    }
    let key = image.get_pixel(0, 0).0;
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let pixel = image.get_pixel(x, y).0;
        let distance: u32 = pixel
            .iter()
            .zip(key.iter())
            .map(|(&p, &k)| u32::from(p.abs_diff(k)))
            .sum();
        Luma([if distance > threshold { 255 } else { 0 }])
    })
}

/// Count of non-zero pixels
#[must_use]
pub fn coverage(mask: &GrayImage) -> usize {
    mask.as_raw().iter().filter(|&&v| v > 0).count()
}

fn blend_rgb(fg: [u8; 3], bg: [u8; 3], alpha: u8) -> [u8; 3] {
    match alpha {
        255 => fg,
        0 => bg,
        a => {
            let a = u32::from(a);
            let mut out = [0u8; 3];
            for ((o, &f), &b) in out.iter_mut().zip(fg.iter()).zip(bg.iter()) {
                *o = ((u32::from(f) * a + u32::from(b) * (255 - a) + 127) / 255) as u8;
            }
            out
        },
    }
}

fn map_gray(mask: &GrayImage, f: impl Fn(u8) -> u8) -> GrayImage {
    let data: Vec<u8> = mask.as_raw().iter().map(|&v| f(v)).collect();
    GrayImage::from_raw(mask.width(), mask.height(), data)
        .unwrap_or_else(|| GrayImage::new(mask.width(), mask.height()))
}

fn from_raw_gray(width: u32, height: u32, data: Vec<u8>) -> Result<GrayImage> {
    GrayImage::from_raw(width, height, data)
        .ok_or_else(|| IdPhotoError::internal("mask buffer size mismatch"))
}

pub(crate) fn ensure_same_size(
    operation: &str,
    left: (u32, u32),
    right: (u32, u32),
) -> Result<()> {
    if left != right {
        return Err(IdPhotoError::internal(format!(
            "{}: size mismatch {}x{} vs {}x{}",
            operation, left.0, left.1, right.0, right.1
        )));
    }
    Ok(())
}
