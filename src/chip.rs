use crate::color::{Hsv, Rgb};
use crate::error::{check_range, FilterResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hard ceiling on simultaneous chips, shared with the shader's array sizes.
pub const MAX_CHIPS: usize = 10;

pub const HUE_TOLERANCE_RANGE: (f32, f32) = (0.0, 60.0);
pub const SATURATION_TOLERANCE_RANGE: (f32, f32) = (0.01, 0.5);
pub const VALUE_TOLERANCE_RANGE: (f32, f32) = (0.01, 0.5);
pub const OVERALL_TOLERANCE_RANGE: (f32, f32) = (0.001, 0.1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChipId(pub u64);

impl fmt::Display for ChipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chip-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChipMode {
    /// Matching pixels are revealed (and recolored).
    Include,
    /// Matching pixels are suppressed, even where an include chip matches.
    Exclude,
}

impl ChipMode {
    /// Value written into the packed mode array.
    pub fn flag(self) -> f32 {
        match self {
            ChipMode::Include => 0.0,
            ChipMode::Exclude => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToleranceField {
    Hue,
    Saturation,
    Value,
    Overall,
}

impl ToleranceField {
    pub fn name(self) -> &'static str {
        match self {
            ToleranceField::Hue => "tolerance_hue",
            ToleranceField::Saturation => "tolerance_saturation",
            ToleranceField::Value => "tolerance_value",
            ToleranceField::Overall => "tolerance_overall",
        }
    }

    pub fn range(self) -> (f32, f32) {
        match self {
            ToleranceField::Hue => HUE_TOLERANCE_RANGE,
            ToleranceField::Saturation => SATURATION_TOLERANCE_RANGE,
            ToleranceField::Value => VALUE_TOLERANCE_RANGE,
            ToleranceField::Overall => OVERALL_TOLERANCE_RANGE,
        }
    }

    pub fn validate(self, value: f32) -> FilterResult<f32> {
        let (min, max) = self.range();
        check_range(self.name(), value, min, max)
    }
}

/// Per-chip matching window. Hue is in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerances {
    pub hue: f32,
    pub saturation: f32,
    pub value: f32,
    /// Isotropic HSV radius, used by exclude chips.
    pub overall: f32,
}

impl Tolerances {
    pub fn defaults_for(mode: ChipMode) -> Self {
        match mode {
            ChipMode::Include => Self {
                hue: 15.0,
                saturation: 0.4,
                value: 0.3,
                overall: 0.05,
            },
            ChipMode::Exclude => Self {
                hue: 2.0,
                saturation: 0.05,
                value: 0.05,
                overall: 0.02,
            },
        }
    }

    pub fn get(&self, field: ToleranceField) -> f32 {
        match field {
            ToleranceField::Hue => self.hue,
            ToleranceField::Saturation => self.saturation,
            ToleranceField::Value => self.value,
            ToleranceField::Overall => self.overall,
        }
    }

    fn slot(&mut self, field: ToleranceField) -> &mut f32 {
        match field {
            ToleranceField::Hue => &mut self.hue,
            ToleranceField::Saturation => &mut self.saturation,
            ToleranceField::Value => &mut self.value,
            ToleranceField::Overall => &mut self.overall,
        }
    }

    /// Set one field. Out-of-range input is rejected and the old value kept.
    pub fn set(&mut self, field: ToleranceField, value: f32) -> FilterResult<()> {
        *self.slot(field) = field.validate(value)?;
        Ok(())
    }
}

/// One user-picked color region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorChip {
    pub id: ChipId,
    target_color: Rgb,
    pub display_color: Rgb,
    mode: ChipMode,
    pub tolerances: Tolerances,
    pub active: bool,
}

impl ColorChip {
    pub fn new(id: ChipId, target_color: Rgb, mode: ChipMode) -> Self {
        let target_color = target_color.clamped();
        Self {
            id,
            target_color,
            display_color: target_color,
            mode,
            tolerances: Tolerances::defaults_for(mode),
            active: true,
        }
    }

    pub fn target_color(&self) -> Rgb {
        self.target_color
    }

    pub fn target_hsv(&self) -> Hsv {
        self.target_color.to_hsv()
    }

    pub fn mode(&self) -> ChipMode {
        self.mode
    }

    pub fn reset_tolerances(&mut self) {
        self.tolerances = Tolerances::defaults_for(self.mode);
    }

    /// Mode defaults for the tolerances and the picked color for display.
    pub fn reset(&mut self) {
        self.reset_tolerances();
        self.display_color = self.target_color;
    }
}
