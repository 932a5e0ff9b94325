use crate::color::Rgb;
use anyhow::{Context, Result};
use image::ImageReader;
use std::path::Path;

/// A 3D color lookup table stored as a 2D tiled image.
///
/// The image holds `size` tiles of `size × size` texels; tile `b` is the blue
/// slice, red runs along x and green along y inside a tile. Both the
/// horizontal strip (`size² × size`) and square grid (e.g. 512×512 for
/// size 64) layouts satisfy this.
#[derive(Debug, Clone, PartialEq)]
pub struct Lut {
    size: u32,
    width: u32,
    height: u32,
    data: Vec<Rgb>,
}

impl Lut {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let img = ImageReader::open(path.as_ref())
            .context("Failed to open LUT image")?
            .decode()
            .context("Failed to decode LUT image")?;

        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();
        Self::from_rgb8(width, height, rgb.into_raw())
    }

    /// Build from a raw `width × height × RGB` buffer.
    pub fn from_rgb8(width: u32, height: u32, raw: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if raw.len() != expected {
            anyhow::bail!(
                "LUT buffer holds {} bytes, expected {} for {}x{}",
                raw.len(),
                expected,
                width,
                height
            );
        }

        let size = detect_size(width, height)
            .with_context(|| format!("{}x{} is not a tiled LUT layout", width, height))?;

        let data = raw
            .chunks_exact(3)
            .map(|p| Rgb::from_rgb8(p[0], p[1], p[2]))
            .collect();

        Ok(Self {
            size,
            width,
            height,
            data,
        })
    }

    /// Identity table in strip layout.
    pub fn identity(size: u32) -> Self {
        let size = size.max(2);
        let width = size * size;
        let height = size;
        let step = 1.0 / (size - 1) as f32;

        let mut data = vec![Rgb::BLACK; (width * height) as usize];
        for b in 0..size {
            for g in 0..size {
                for r in 0..size {
                    let x = b * size + r;
                    let idx = (g * width + x) as usize;
                    data[idx] = Rgb::new(r as f32 * step, g as f32 * step, b as f32 * step);
                }
            }
        }

        Self {
            size,
            width,
            height,
            data,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn texel(&self, r: u32, g: u32, b: u32) -> Rgb {
        let tiles_per_row = self.width / self.size;
        let x = (b % tiles_per_row) * self.size + r;
        let y = (b / tiles_per_row) * self.size + g;
        let idx = (y * self.width + x) as usize;
        self.data.get(idx).copied().unwrap_or_default()
    }

    /// Trilinear lookup; input is clamped to [0, 1].
    pub fn sample(&self, color: Rgb) -> Rgb {
        let max = (self.size - 1) as f32;
        let r = color.r.clamp(0.0, 1.0) * max;
        let g = color.g.clamp(0.0, 1.0) * max;
        let b = color.b.clamp(0.0, 1.0) * max;

        let (r0, g0, b0) = (r.floor() as u32, g.floor() as u32, b.floor() as u32);
        let last = self.size - 1;
        let (r1, g1, b1) = ((r0 + 1).min(last), (g0 + 1).min(last), (b0 + 1).min(last));
        let (fr, fg, fb) = (r - r.floor(), g - g.floor(), b - b.floor());

        let c00 = self.texel(r0, g0, b0).lerp(self.texel(r1, g0, b0), fr);
        let c10 = self.texel(r0, g1, b0).lerp(self.texel(r1, g1, b0), fr);
        let c01 = self.texel(r0, g0, b1).lerp(self.texel(r1, g0, b1), fr);
        let c11 = self.texel(r0, g1, b1).lerp(self.texel(r1, g1, b1), fr);

        let c0 = c00.lerp(c10, fg);
        let c1 = c01.lerp(c11, fg);
        c0.lerp(c1, fb)
    }

    /// Flattened RGB floats for texture upload, row-major.
    pub fn to_rgb_f32(&self) -> Vec<f32> {
        self.data.iter().flat_map(|c| c.to_array()).collect()
    }
}

fn detect_size(width: u32, height: u32) -> Option<u32> {
    let texels = width as u64 * height as u64;
    let size = (texels as f64).cbrt().round() as u64;
    if size < 2 || size * size * size != texels {
        return None;
    }

    let size = size as u32;
    if width % size != 0 || height % size != 0 {
        return None;
    }
    let tiles = (width / size) * (height / size);
    (tiles == size).then_some(size)
}
