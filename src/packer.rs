use crate::chip::{ColorChip, MAX_CHIPS};
use crate::error::{check_range, FilterError, FilterResult};
use crate::preset::{ChromaKey, ColorCorrection, StageView, MAX_CHROMA_KEYS, MAX_COLOR_CORRECTIONS};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const BRIGHTNESS_RANGE: (f32, f32) = (-100.0, 100.0);
pub const CONTRAST_RANGE: (f32, f32) = (-100.0, 100.0);
pub const TEMPERATURE_RANGE: (f32, f32) = (-100.0, 100.0);
pub const GAMMA_RANGE: (f32, f32) = (0.5, 2.0);

/// How pixels outside every include window are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnselectedTreatment {
    /// Original color, untouched.
    Passthrough,
    /// Rec.601 luma.
    #[default]
    Grayscale,
    /// Original color scaled by the given factor (0.0-1.0).
    Dim(f32),
}

impl UnselectedTreatment {
    pub fn validate(self) -> FilterResult<Self> {
        if let UnselectedTreatment::Dim(level) = self {
            check_range("dim_level", level, 0.0, 1.0)?;
        }
        Ok(self)
    }

    /// `(mode, level)` as written into the uniform block.
    pub fn uniforms(self) -> [f32; 2] {
        match self {
            UnselectedTreatment::Passthrough => [0.0, 1.0],
            UnselectedTreatment::Grayscale => [1.0, 1.0],
            UnselectedTreatment::Dim(level) => [2.0, level],
        }
    }
}

impl fmt::Display for UnselectedTreatment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnselectedTreatment::Passthrough => write!(f, "passthrough"),
            UnselectedTreatment::Grayscale => write!(f, "grayscale"),
            UnselectedTreatment::Dim(level) => write!(f, "dim:{}", level),
        }
    }
}

impl FromStr for UnselectedTreatment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "passthrough" => Ok(UnselectedTreatment::Passthrough),
            "grayscale" | "gray" => Ok(UnselectedTreatment::Grayscale),
            other => {
                let level = other
                    .strip_prefix("dim:")
                    .ok_or_else(|| anyhow::anyhow!("Unknown treatment '{}'", s))?
                    .parse::<f32>()?;
                Ok(UnselectedTreatment::Dim(level).validate()?)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustmentField {
    Brightness,
    Contrast,
    Temperature,
    Gamma,
}

/// User-facing display settings, stored in slider units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamAdjustments {
    brightness: f32,
    contrast: f32,
    temperature: f32,
    gamma: f32,
}

impl Default for StreamAdjustments {
    fn default() -> Self {
        Self {
            brightness: 0.0,
            contrast: 0.0,
            temperature: 0.0,
            gamma: 1.0,
        }
    }
}

impl StreamAdjustments {
    pub fn brightness(&self) -> f32 {
        self.brightness
    }

    pub fn contrast(&self) -> f32 {
        self.contrast
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn gamma(&self) -> f32 {
        self.gamma
    }

    pub fn set_brightness(&mut self, value: f32) -> FilterResult<()> {
        self.brightness = check_range("brightness", value, BRIGHTNESS_RANGE.0, BRIGHTNESS_RANGE.1)?;
        Ok(())
    }

    pub fn set_contrast(&mut self, value: f32) -> FilterResult<()> {
        self.contrast = check_range("contrast", value, CONTRAST_RANGE.0, CONTRAST_RANGE.1)?;
        Ok(())
    }

    pub fn set_temperature(&mut self, value: f32) -> FilterResult<()> {
        self.temperature = check_range("temperature", value, TEMPERATURE_RANGE.0, TEMPERATURE_RANGE.1)?;
        Ok(())
    }

    pub fn set_gamma(&mut self, value: f32) -> FilterResult<()> {
        self.gamma = check_range("gamma", value, GAMMA_RANGE.0, GAMMA_RANGE.1)?;
        Ok(())
    }

    pub fn set(&mut self, field: AdjustmentField, value: f32) -> FilterResult<()> {
        match field {
            AdjustmentField::Brightness => self.set_brightness(value),
            AdjustmentField::Contrast => self.set_contrast(value),
            AdjustmentField::Temperature => self.set_temperature(value),
            AdjustmentField::Gamma => self.set_gamma(value),
        }
    }

    /// Re-check every field, e.g. after deserializing from disk.
    pub fn validate(self) -> FilterResult<Self> {
        let mut checked = Self::default();
        checked.set_brightness(self.brightness)?;
        checked.set_contrast(self.contrast)?;
        checked.set_temperature(self.temperature)?;
        checked.set_gamma(self.gamma)?;
        Ok(checked)
    }

    pub fn is_neutral(&self) -> bool {
        *self == Self::default()
    }

    /// Shader values: `[brightness, contrast, temperature, gamma]`.
    pub fn uniforms(&self) -> [f32; 4] {
        [
            1.0 + self.brightness / 100.0,
            1.0 + self.contrast / 100.0,
            self.temperature / 100.0,
            self.gamma,
        ]
    }
}

/// One chip slot. Every per-chip uniform array is a projection of this
/// struct, so index `k` always refers to the same chip.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PackedChip {
    pub target_rgb: [f32; 3],
    /// Hue in degrees
    pub target_hsv: [f32; 3],
    pub display_rgb: [f32; 3],
    pub tolerance_hue: f32,
    pub tolerance_saturation: f32,
    pub tolerance_value: f32,
    pub tolerance_overall: f32,
    /// 0.0 include, 1.0 exclude
    pub mode: f32,
}

impl PackedChip {
    fn from_chip(chip: &ColorChip) -> Self {
        let hsv = chip.target_hsv();
        Self {
            target_rgb: chip.target_color().to_array(),
            target_hsv: [hsv.h, hsv.s, hsv.v],
            display_rgb: chip.display_color.to_array(),
            tolerance_hue: chip.tolerances.hue,
            tolerance_saturation: chip.tolerances.saturation,
            tolerance_value: chip.tolerances.value,
            tolerance_overall: chip.tolerances.overall,
            mode: chip.mode().flag(),
        }
    }

    pub fn is_exclude(&self) -> bool {
        self.mode >= 0.5
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PackedChromaKey {
    pub key_rgb: [f32; 3],
    pub similarity: f32,
    pub smoothness: f32,
    pub spill: f32,
}

impl From<&ChromaKey> for PackedChromaKey {
    fn from(key: &ChromaKey) -> Self {
        Self {
            key_rgb: key.key_color.to_array(),
            similarity: key.similarity,
            smoothness: key.smoothness,
            spill: key.spill,
        }
    }
}

/// Correction slot with every field resolved; padding is neutral.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackedCorrection {
    pub gamma: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub brightness: f32,
    pub hue_shift: f32,
    pub tint: f32,
}

impl Default for PackedCorrection {
    fn default() -> Self {
        Self {
            gamma: ColorCorrection::NEUTRAL_GAMMA,
            contrast: ColorCorrection::NEUTRAL_CONTRAST,
            saturation: ColorCorrection::NEUTRAL_SATURATION,
            brightness: 0.0,
            hue_shift: 0.0,
            tint: 0.0,
        }
    }
}

impl From<&ColorCorrection> for PackedCorrection {
    fn from(c: &ColorCorrection) -> Self {
        let neutral = Self::default();
        Self {
            gamma: c.gamma.unwrap_or(neutral.gamma),
            contrast: c.contrast.unwrap_or(neutral.contrast),
            saturation: c.saturation.unwrap_or(neutral.saturation),
            brightness: c.brightness.unwrap_or(neutral.brightness),
            hue_shift: c.hue_shift.unwrap_or(neutral.hue_shift),
            tint: c.tint.unwrap_or(neutral.tint),
        }
    }
}

/// Flat, fixed-capacity parameters consumed by the compositor.
///
/// Built once per state change by [`pack`] and then only read. Slots past
/// the counts hold neutral values and are never consulted.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedUniformBlock {
    pub chips: [PackedChip; MAX_CHIPS],
    pub active_count: u32,
    pub chroma_keys: [PackedChromaKey; MAX_CHROMA_KEYS],
    pub chroma_key_count: u32,
    pub corrections: [PackedCorrection; MAX_COLOR_CORRECTIONS],
    pub correction_count: u32,
    pub lut_enabled: bool,
    pub adjustments: [f32; 4],
    pub treatment: [f32; 2],
}

impl Default for PackedUniformBlock {
    fn default() -> Self {
        Self {
            chips: [PackedChip::default(); MAX_CHIPS],
            active_count: 0,
            chroma_keys: [PackedChromaKey::default(); MAX_CHROMA_KEYS],
            chroma_key_count: 0,
            corrections: [PackedCorrection::default(); MAX_COLOR_CORRECTIONS],
            correction_count: 0,
            lut_enabled: false,
            adjustments: StreamAdjustments::default().uniforms(),
            treatment: UnselectedTreatment::default().uniforms(),
        }
    }
}

impl PackedUniformBlock {
    /// Chip slots the compositor may read; never more than the array holds.
    pub fn effective_count(&self) -> usize {
        (self.active_count as usize).min(MAX_CHIPS)
    }

    pub fn effective_chroma_keys(&self) -> &[PackedChromaKey] {
        &self.chroma_keys[..(self.chroma_key_count as usize).min(MAX_CHROMA_KEYS)]
    }

    pub fn effective_corrections(&self) -> &[PackedCorrection] {
        &self.corrections[..(self.correction_count as usize).min(MAX_COLOR_CORRECTIONS)]
    }

    pub fn active_chips(&self) -> &[PackedChip] {
        &self.chips[..self.effective_count()]
    }

    pub fn validate(&self) -> FilterResult<()> {
        let checks = [
            (self.active_count as usize, MAX_CHIPS),
            (self.chroma_key_count as usize, MAX_CHROMA_KEYS),
            (self.correction_count as usize, MAX_COLOR_CORRECTIONS),
        ];
        for (active_count, capacity) in checks {
            if active_count > capacity {
                return Err(FilterError::MalformedUniformBlock { active_count, capacity });
            }
        }
        Ok(())
    }

    /// Serialize as parallel little-endian arrays in upload order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1024);
        let mut put = |v: f32| out.extend_from_slice(&v.to_le_bytes());

        for chip in &self.chips {
            chip.target_rgb.iter().for_each(|&v| put(v));
        }
        for chip in &self.chips {
            chip.target_hsv.iter().for_each(|&v| put(v));
        }
        for chip in &self.chips {
            chip.display_rgb.iter().for_each(|&v| put(v));
        }
        for chip in &self.chips {
            put(chip.tolerance_hue);
        }
        for chip in &self.chips {
            put(chip.tolerance_saturation);
        }
        for chip in &self.chips {
            put(chip.tolerance_value);
        }
        for chip in &self.chips {
            put(chip.tolerance_overall);
        }
        for chip in &self.chips {
            put(chip.mode);
        }

        for key in &self.chroma_keys {
            key.key_rgb.iter().for_each(|&v| put(v));
        }
        for key in &self.chroma_keys {
            put(key.similarity);
            put(key.smoothness);
            put(key.spill);
        }

        for c in &self.corrections {
            put(c.gamma);
            put(c.contrast);
            put(c.saturation);
            put(c.brightness);
            put(c.hue_shift);
            put(c.tint);
        }

        self.adjustments.iter().for_each(|&v| put(v));
        self.treatment.iter().for_each(|&v| put(v));

        for count in [
            self.active_count,
            self.chroma_key_count,
            self.correction_count,
            self.lut_enabled as u32,
        ] {
            out.extend_from_slice(&count.to_le_bytes());
        }
        out
    }
}

/// Build a uniform block from the active chips and the active preset's stages.
///
/// All chip arrays come from a single pass over `chips`, in the order given.
/// Inactive chips are skipped.
pub fn pack(
    chips: &[&ColorChip],
    stages: StageView<'_>,
    adjustments: &StreamAdjustments,
    treatment: UnselectedTreatment,
) -> PackedUniformBlock {
    let mut block = PackedUniformBlock::default();

    let mut count = 0;
    for chip in chips.iter().filter(|c| c.active) {
        if count == MAX_CHIPS {
            crate::log_warn!("pack: more than {} active chips, extra chips ignored", MAX_CHIPS);
            break;
        }
        block.chips[count] = PackedChip::from_chip(chip);
        count += 1;
    }
    block.active_count = count as u32;

    for (slot, key) in block.chroma_keys.iter_mut().zip(stages.chroma_keys) {
        *slot = key.into();
    }
    block.chroma_key_count = stages.chroma_keys.len().min(MAX_CHROMA_KEYS) as u32;

    for (slot, correction) in block.corrections.iter_mut().zip(stages.color_corrections) {
        *slot = correction.into();
    }
    block.correction_count = stages.color_corrections.len().min(MAX_COLOR_CORRECTIONS) as u32;

    block.lut_enabled = stages.lut.is_some();
    block.adjustments = adjustments.uniforms();
    block.treatment = treatment.uniforms();
    block
}

/// Number of include and exclude chips among the packed slots.
pub fn mode_counts(block: &PackedUniformBlock) -> (usize, usize) {
    let exclude = block.active_chips().iter().filter(|c| c.is_exclude()).count();
    (block.effective_count() - exclude, exclude)
}
