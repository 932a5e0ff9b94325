use crate::error::{FilterError, FilterResult};
use serde::{Deserialize, Serialize};

/// Linear RGB triple with channels in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f32; 3]", into = "[f32; 3]")]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

/// HSV triple: hue in degrees [0, 360), saturation and value in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Hsv {
    pub h: f32,
    pub s: f32,
    pub v: f32,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0.0, 0.0, 0.0);
    pub const WHITE: Rgb = Rgb::new(1.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub fn from_rgb8(r: u8, g: u8, b: u8) -> Self {
        Self::new(r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0)
    }

    pub fn to_rgb8(self) -> [u8; 3] {
        [to_u8(self.r), to_u8(self.g), to_u8(self.b)]
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.r, self.g, self.b]
    }

    pub fn clamped(self) -> Self {
        Self::new(
            self.r.clamp(0.0, 1.0),
            self.g.clamp(0.0, 1.0),
            self.b.clamp(0.0, 1.0),
        )
    }

    pub fn lerp(self, other: Rgb, t: f32) -> Self {
        Self::new(
            self.r + t * (other.r - self.r),
            self.g + t * (other.g - self.g),
            self.b + t * (other.b - self.b),
        )
    }

    pub fn scale(self, k: f32) -> Self {
        Self::new(self.r * k, self.g * k, self.b * k)
    }

    pub fn offset(self, delta: Rgb) -> Self {
        Self::new(self.r + delta.r, self.g + delta.g, self.b + delta.b)
    }

    /// Rec.601 luma.
    pub fn luma(self) -> f32 {
        0.299 * self.r + 0.587 * self.g + 0.114 * self.b
    }

    pub fn gray(level: f32) -> Self {
        Self::new(level, level, level)
    }

    pub fn to_hsv(self) -> Hsv {
        rgb_to_hsv(self)
    }
}

impl From<[f32; 3]> for Rgb {
    fn from(c: [f32; 3]) -> Self {
        Self::new(c[0], c[1], c[2])
    }
}

impl From<Rgb> for [f32; 3] {
    fn from(c: Rgb) -> Self {
        c.to_array()
    }
}

impl Hsv {
    pub const fn new(h: f32, s: f32, v: f32) -> Self {
        Self { h, s, v }
    }

    pub fn to_rgb(self) -> Rgb {
        hsv_to_rgb(self)
    }
}

fn to_u8(c: f32) -> u8 {
    (c.clamp(0.0, 1.0) * 255.0).round() as u8
}

pub fn rgb_to_hsv(c: Rgb) -> Hsv {
    let max = c.r.max(c.g).max(c.b);
    let min = c.r.min(c.g).min(c.b);
    let delta = max - min;

    let v = max;
    let s = if max == 0.0 { 0.0 } else { delta / max };

    let h = if delta == 0.0 {
        0.0
    } else if max == c.r {
        60.0 * (((c.g - c.b) / delta) % 6.0)
    } else if max == c.g {
        60.0 * (((c.b - c.r) / delta) + 2.0)
    } else {
        60.0 * (((c.r - c.g) / delta) + 4.0)
    };

    let h = if h < 0.0 { h + 360.0 } else { h };
    // -0.0 % 6.0 style edge cases can land exactly on 360
    let h = if h >= 360.0 { h - 360.0 } else { h };

    Hsv::new(h, s, v)
}

pub fn hsv_to_rgb(c: Hsv) -> Rgb {
    let h = c.h.rem_euclid(360.0);
    let chroma = c.v * c.s;
    let x = chroma * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = c.v - chroma;

    let (r, g, b) = if h < 60.0 {
        (chroma, x, 0.0)
    } else if h < 120.0 {
        (x, chroma, 0.0)
    } else if h < 180.0 {
        (0.0, chroma, x)
    } else if h < 240.0 {
        (0.0, x, chroma)
    } else if h < 300.0 {
        (x, 0.0, chroma)
    } else {
        (chroma, 0.0, x)
    };

    Rgb::new(r + m, g + m, b + m)
}

/// Parse `RRGGBB` or `#RRGGBB`, case-insensitive.
pub fn hex_to_rgb(hex: &str) -> FilterResult<Rgb> {
    let digits = hex.strip_prefix('#').unwrap_or(hex);

    if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(FilterError::InvalidColorFormat(hex.to_string()));
    }

    let channel = |range: std::ops::Range<usize>| {
        u8::from_str_radix(&digits[range], 16)
            .map_err(|_| FilterError::InvalidColorFormat(hex.to_string()))
    };

    Ok(Rgb::from_rgb8(channel(0..2)?, channel(2..4)?, channel(4..6)?))
}

/// Format as uppercase `#RRGGBB`.
pub fn rgb_to_hex(c: Rgb) -> String {
    let [r, g, b] = c.to_rgb8();
    format!("#{:02X}{:02X}{:02X}", r, g, b)
}

/// Shortest angular distance between two hues, in degrees [0, 180].
pub fn circular_hue_distance(a: f32, b: f32) -> f32 {
    let d = (a - b).abs().rem_euclid(360.0);
    d.min(360.0 - d)
}

pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-5, "{} != {}", a, b);
    }

    #[test]
    fn test_rgb_to_hsv_primaries() {
        let red = rgb_to_hsv(Rgb::new(1.0, 0.0, 0.0));
        assert_eq!(red, Hsv::new(0.0, 1.0, 1.0));

        let green = rgb_to_hsv(Rgb::new(0.0, 1.0, 0.0));
        assert_close(green.h, 120.0);

        let blue = rgb_to_hsv(Rgb::new(0.0, 0.0, 1.0));
        assert_close(blue.h, 240.0);

        let magenta = rgb_to_hsv(Rgb::new(1.0, 0.0, 1.0));
        assert_close(magenta.h, 300.0);
    }

    #[test]
    fn test_gray_has_zero_saturation() {
        let gray = rgb_to_hsv(Rgb::gray(0.5));
        assert_eq!(gray.s, 0.0);
        assert_eq!(gray.h, 0.0);
        assert_eq!(gray.v, 0.5);
        assert_eq!(rgb_to_hsv(Rgb::BLACK), Hsv::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn test_hsv_round_trip() {
        for &(r, g, b) in &[(0.2, 0.4, 0.6), (0.9, 0.1, 0.3), (0.5, 0.5, 0.1), (0.0, 0.3, 0.3)] {
            let back = hsv_to_rgb(rgb_to_hsv(Rgb::new(r, g, b)));
            assert_close(back.r, r);
            assert_close(back.g, g);
            assert_close(back.b, b);
        }
    }

    #[test]
    fn test_hsv_conversion_is_deterministic() {
        let c = Rgb::new(0.123, 0.456, 0.789);
        let a = rgb_to_hsv(c);
        let b = rgb_to_hsv(c);
        assert_eq!(a.h.to_bits(), b.h.to_bits());
        assert_eq!(a.s.to_bits(), b.s.to_bits());
        assert_eq!(a.v.to_bits(), b.v.to_bits());
    }

    #[test]
    fn test_hex_parsing_accepts_prefix_and_case() {
        assert_eq!(hex_to_rgb("#FF0000").unwrap(), Rgb::new(1.0, 0.0, 0.0));
        assert_eq!(hex_to_rgb("ff0000").unwrap(), Rgb::new(1.0, 0.0, 0.0));
        assert_eq!(hex_to_rgb("#00fF00").unwrap(), Rgb::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn test_hex_parsing_rejects_malformed() {
        for bad in ["", "#", "#FFF", "#FF00000", "GG0000", "#+F0000", "#FF 000", "##FF0000"] {
            assert_eq!(
                hex_to_rgb(bad),
                Err(FilterError::InvalidColorFormat(bad.to_string())),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_hex_round_trip_normalizes_case() {
        for s in ["#ff8800", "A1B2C3", "#000000", "#FFFFFF", "7f7f7f", "#0a0B0c"] {
            let expected = format!("#{}", s.trim_start_matches('#').to_ascii_uppercase());
            assert_eq!(rgb_to_hex(hex_to_rgb(s).unwrap()), expected);
        }
    }

    #[test]
    fn test_hex_round_trip_all_channel_values() {
        for v in 0..=255u8 {
            let s = format!("#{:02X}{:02X}{:02X}", v, 255 - v, v / 2);
            assert_eq!(rgb_to_hex(hex_to_rgb(&s).unwrap()), s);
        }
    }

    #[test]
    fn test_circular_hue_distance_wraps() {
        assert_close(circular_hue_distance(359.0, 1.0), 2.0);
        assert_close(circular_hue_distance(1.0, 359.0), 2.0);
        assert_close(circular_hue_distance(0.0, 240.0), 120.0);
        assert_close(circular_hue_distance(90.0, 270.0), 180.0);
        assert_eq!(circular_hue_distance(42.0, 42.0), 0.0);
    }

    #[test]
    fn test_circular_hue_distance_symmetric_and_bounded() {
        let mut a = 0.0f32;
        while a < 360.0 {
            let mut b = 0.0f32;
            while b < 360.0 {
                let d = circular_hue_distance(a, b);
                assert_eq!(d, circular_hue_distance(b, a));
                assert!(d <= 180.0);
                b += 7.5;
            }
            a += 11.0;
        }
    }

    #[test]
    fn test_rgb_serde_as_array() {
        let c: Rgb = serde_json::from_str("[1.0, 0.5, 0.25]").unwrap();
        assert_eq!(c, Rgb::new(1.0, 0.5, 0.25));
        assert_eq!(serde_json::to_string(&c).unwrap(), "[1.0,0.5,0.25]");
    }
}
