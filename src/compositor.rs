//! Per-pixel evaluation of a packed uniform block.
//!
//! Every function here is pure: the output depends only on the source pixel,
//! the block, and the optional LUT. [`crate::shader::FRAGMENT_SHADER`] is the
//! GPU rendition of the same math and must be kept in step with it.

use crate::color::{circular_hue_distance, smoothstep, Hsv, Rgb};
use crate::error::{FilterError, FilterResult};
use crate::lut::Lut;
use crate::packer::{PackedChip, PackedChromaKey, PackedCorrection, PackedUniformBlock};
use image::{Rgba, RgbaImage};

/// Fraction of the tolerance over which a chip's weight falls from 1 to 0.
pub const FALLOFF_BAND: f32 = 0.5;

/// Below this saturation a target has no meaningful hue.
const ACHROMATIC_SATURATION: f32 = 1e-4;

/// `1` well inside `tolerance`, `0` at and beyond it, smooth in between.
pub fn falloff(distance: f32, tolerance: f32) -> f32 {
    if tolerance <= 0.0 {
        return if distance <= 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - smoothstep(tolerance * (1.0 - FALLOFF_BAND), tolerance, distance)
}

/// Per-channel HSV window match used by include chips.
pub fn include_weight(chip: &PackedChip, pixel: Hsv) -> f32 {
    let [th, ts, tv] = chip.target_hsv;

    let wh = if ts < ACHROMATIC_SATURATION {
        1.0
    } else {
        falloff(circular_hue_distance(pixel.h, th), chip.tolerance_hue)
    };
    let ws = falloff((pixel.s - ts).abs(), chip.tolerance_saturation);
    let wv = falloff((pixel.v - tv).abs(), chip.tolerance_value);

    wh * ws * wv
}

/// Isotropic HSV radius match used by exclude chips. Hue is normalized to a
/// fraction of a turn so all three axes share the same scale.
pub fn exclude_weight(chip: &PackedChip, pixel: Hsv) -> f32 {
    let [th, ts, tv] = chip.target_hsv;
    let dh = circular_hue_distance(pixel.h, th) / 360.0;
    let ds = pixel.s - ts;
    let dv = pixel.v - tv;
    let distance = (dh * dh + ds * ds + dv * dv).sqrt();
    falloff(distance, chip.tolerance_overall)
}

/// Outcome of the chip stage for one pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection {
    pub include: f32,
    pub exclude: f32,
    /// `include * (1 - exclude)`
    pub selected: f32,
    /// Slot of the strongest matching include chip
    pub winner: Option<usize>,
}

pub fn evaluate_selection(pixel: Hsv, block: &PackedUniformBlock) -> Selection {
    let mut include = 0.0f32;
    let mut any_include = false;
    let mut winner = None;
    let mut exclude = 0.0f32;

    for (slot, chip) in block.active_chips().iter().enumerate() {
        if chip.is_exclude() {
            exclude = exclude.max(exclude_weight(chip, pixel));
        } else {
            any_include = true;
            let w = include_weight(chip, pixel);
            if w > include {
                include = w;
                winner = Some(slot);
            }
        }
    }

    // Nothing constrains the selection without include chips
    if !any_include {
        include = 1.0;
    }

    Selection {
        include,
        exclude,
        selected: include * (1.0 - exclude),
        winner,
    }
}

fn unselected(pixel: Rgb, treatment: [f32; 2]) -> Rgb {
    match treatment[0] as u32 {
        0 => pixel,
        1 => Rgb::gray(pixel.luma()),
        _ => pixel.scale(treatment[1].clamp(0.0, 1.0)),
    }
}

/// Chip stage: blend between the unselected treatment and the winning chip's
/// display color.
pub fn apply_chips(pixel: Rgb, block: &PackedUniformBlock) -> (Rgb, Selection) {
    let selection = evaluate_selection(pixel.to_hsv(), block);

    // Without an include chip the selection is unconstrained and keeps the pixel
    let recolored = match selection.winner {
        Some(slot) => Rgb::from(block.chips[slot].display_rgb).clamped(),
        None => pixel,
    };

    let color = if selection.selected >= 1.0 {
        recolored
    } else if selection.selected <= 0.0 {
        unselected(pixel, block.treatment)
    } else {
        unselected(pixel, block.treatment).lerp(recolored, selection.selected)
    };
    (color, selection)
}

fn chroma(c: Rgb) -> (f32, f32) {
    let cb = -0.168_736 * c.r - 0.331_264 * c.g + 0.5 * c.b;
    let cr = 0.5 * c.r - 0.418_688 * c.g - 0.081_312 * c.b;
    (cb, cr)
}

/// Returns `(mask, spill)`; `mask` is 0 where the source is the key color.
pub fn chroma_key_factors(source: Rgb, key: &PackedChromaKey) -> (f32, f32) {
    let (cb, cr) = chroma(source);
    let (kb, kr) = chroma(Rgb::from(key.key_rgb));
    let distance = ((cb - kb).powi(2) + (cr - kr).powi(2)).sqrt();
    let base = distance - key.similarity;

    let mask = if key.smoothness <= 0.0 {
        if base > 0.0 { 1.0 } else { 0.0 }
    } else {
        (base / key.smoothness).clamp(0.0, 1.0).powf(1.5)
    };

    let spill = if key.spill <= 0.0 {
        1.0
    } else {
        (base / key.spill).clamp(0.0, 1.0).powf(1.5)
    };

    (mask, spill)
}

/// Chroma-key stage. The matte comes from the untouched source pixel and is
/// applied to the already composited color.
pub fn apply_chroma_keys(source: Rgb, color: Rgb, block: &PackedUniformBlock) -> (Rgb, f32) {
    let mut alpha = 1.0;
    let mut color = color;
    for key in block.effective_chroma_keys() {
        let (mask, spill) = chroma_key_factors(source, key);
        alpha *= mask;
        if spill < 1.0 {
            color = Rgb::gray(color.luma()).lerp(color, spill);
        }
    }
    (color, alpha)
}

fn gamma_exponent(gamma: f32) -> f32 {
    if gamma < 0.0 {
        1.0 - gamma
    } else {
        1.0 / (1.0 + gamma)
    }
}

fn powf_rgb(c: Rgb, exponent: f32) -> Rgb {
    Rgb::new(
        c.r.max(0.0).powf(exponent),
        c.g.max(0.0).powf(exponent),
        c.b.max(0.0).powf(exponent),
    )
}

fn contrast_around_mid(c: Rgb, factor: f32) -> Rgb {
    Rgb::new(
        (c.r - 0.5) * factor + 0.5,
        (c.g - 0.5) * factor + 0.5,
        (c.b - 0.5) * factor + 0.5,
    )
}

pub fn apply_correction(color: Rgb, c: &PackedCorrection) -> Rgb {
    let mut out = color;

    if c.gamma != 0.0 {
        out = powf_rgb(out, gamma_exponent(c.gamma));
    }
    if c.contrast != 0.0 {
        out = contrast_around_mid(out, 1.0 + c.contrast);
    }
    if c.brightness != 0.0 {
        out = out.offset(Rgb::gray(c.brightness));
    }
    if c.saturation != 1.0 {
        out = Rgb::gray(out.luma()).lerp(out, c.saturation);
    }
    if c.hue_shift != 0.0 {
        let mut hsv = out.clamped().to_hsv();
        hsv.h = (hsv.h + c.hue_shift).rem_euclid(360.0);
        out = hsv.to_rgb();
    }
    if c.tint != 0.0 {
        // Positive pushes toward magenta
        out = out.offset(Rgb::new(0.05 * c.tint, -0.1 * c.tint, 0.05 * c.tint));
    }

    out.clamped()
}

/// Display-level brightness/contrast/temperature/gamma, already in shader units.
pub fn apply_adjustments(color: Rgb, adjustments: [f32; 4]) -> Rgb {
    let [brightness, contrast, temperature, gamma] = adjustments;
    if adjustments == [1.0, 1.0, 0.0, 1.0] {
        return color;
    }

    let mut out = color.scale(brightness);
    out = contrast_around_mid(out, contrast);
    out = out.offset(Rgb::new(0.1 * temperature, 0.0, -0.1 * temperature));
    if gamma > 0.0 && gamma != 1.0 {
        out = powf_rgb(out.clamped(), 1.0 / gamma);
    }
    out.clamped()
}

/// Final pixel, straight alpha.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositedPixel {
    pub color: Rgb,
    pub alpha: f32,
}

/// Run every stage for one pixel: chips, chroma keys, corrections,
/// adjustments, then the LUT.
pub fn composite_pixel(pixel: Rgb, block: &PackedUniformBlock, lut: Option<&Lut>) -> CompositedPixel {
    let (color, _) = apply_chips(pixel, block);
    let (mut color, alpha) = apply_chroma_keys(pixel, color, block);

    for correction in block.effective_corrections() {
        color = apply_correction(color, correction);
    }
    color = apply_adjustments(color, block.adjustments);

    if block.lut_enabled {
        if let Some(lut) = lut {
            color = lut.sample(color);
        }
    }

    CompositedPixel { color, alpha }
}

/// Composite a whole frame on the CPU.
pub fn composite_frame(frame: &RgbaImage, block: &PackedUniformBlock, lut: Option<&Lut>) -> FilterResult<RgbaImage> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return Err(FilterError::EmptyFrame);
    }

    let mut out = RgbaImage::new(width, height);
    for (src, dst) in frame.pixels().zip(out.pixels_mut()) {
        let [r, g, b, a] = src.0;
        let result = composite_pixel(Rgb::from_rgb8(r, g, b), block, lut);
        let [r, g, b] = result.color.to_rgb8();
        let alpha = (a as f32 * result.alpha.clamp(0.0, 1.0)).round() as u8;
        *dst = Rgba([r, g, b, alpha]);
    }
    Ok(out)
}
