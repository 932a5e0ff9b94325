use crate::chip::ColorChip;
use crate::color::Rgb;
use crate::error::{FilterError, FilterResult};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const MAX_CHROMA_KEYS: usize = 4;
pub const MAX_COLOR_CORRECTIONS: usize = 4;

pub const ORIGINAL_PRESET_ID: &str = "original";
pub const CUSTOM_PRESET_ID: &str = "custom";

/// Green/blue-screen style matte against a single key color.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChromaKey {
    pub key_color: Rgb,
    /// Chroma distance below which pixels are fully keyed (0.0-1.0)
    pub similarity: f32,
    /// Width of the soft edge above `similarity` (0.0-1.0, 0 = hard edge)
    pub smoothness: f32,
    /// Spill suppression range (0.0-1.0, <= 0 disables)
    pub spill: f32,
}

/// One grading pass. Missing fields are neutral.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ColorCorrection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gamma: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contrast: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saturation: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<f32>,
    /// Degrees
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hue_shift: Option<f32>,
    /// Green (-1) to magenta (+1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tint: Option<f32>,
}

impl ColorCorrection {
    pub const NEUTRAL_GAMMA: f32 = 0.0;
    pub const NEUTRAL_CONTRAST: f32 = 0.0;
    pub const NEUTRAL_SATURATION: f32 = 1.0;

    fn ranges(&self) -> [(&'static str, Option<f32>, f32, f32); 6] {
        [
            ("gamma", self.gamma, -3.0, 3.0),
            ("contrast", self.contrast, -4.0, 4.0),
            ("saturation", self.saturation, 0.0, 5.0),
            ("brightness", self.brightness, -1.0, 1.0),
            ("hue_shift", self.hue_shift, -180.0, 180.0),
            ("tint", self.tint, -1.0, 1.0),
        ]
    }
}

/// The chroma-key / correction / LUT stages of a static preset.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StaticStages {
    #[serde(default)]
    pub chroma_keys: Vec<ChromaKey>,
    #[serde(default)]
    pub color_corrections: Vec<ColorCorrection>,
    /// LUT image file name, relative to the LUT asset directory
    #[serde(default)]
    pub lut: Option<String>,
    #[serde(default)]
    pub enable_lut: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterConfig {
    Static(StaticStages),
    /// Synthesized from the chip registry at pick time. Carries no
    /// chroma-key, correction or LUT stages.
    ChipComposite { chips: Vec<ColorChip> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterPreset {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub config: FilterConfig,
}

/// Borrowed view of the stages a preset contributes to the packed block.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StageView<'a> {
    pub chroma_keys: &'a [ChromaKey],
    pub color_corrections: &'a [ColorCorrection],
    /// Set only when the preset enables its LUT
    pub lut: Option<&'a str>,
}

impl FilterPreset {
    pub fn new_static(id: &str, name: &str, stages: StaticStages) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            config: FilterConfig::Static(stages),
        }
    }

    pub fn stages(&self) -> StageView<'_> {
        match &self.config {
            FilterConfig::Static(stages) => StageView {
                chroma_keys: &stages.chroma_keys,
                color_corrections: &stages.color_corrections,
                lut: if stages.enable_lut { stages.lut.as_deref() } else { None },
            },
            FilterConfig::ChipComposite { .. } => StageView::default(),
        }
    }

    pub fn is_chip_composite(&self) -> bool {
        matches!(self.config, FilterConfig::ChipComposite { .. })
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            anyhow::bail!("Preset id must not be empty");
        }

        let stages = match &self.config {
            FilterConfig::Static(stages) => stages,
            FilterConfig::ChipComposite { .. } => {
                anyhow::bail!("Preset '{}': chip composites cannot be loaded from configuration", self.id)
            }
        };

        if stages.chroma_keys.len() > MAX_CHROMA_KEYS {
            anyhow::bail!(
                "Preset '{}' has {} chroma keys (max {})",
                self.id,
                stages.chroma_keys.len(),
                MAX_CHROMA_KEYS
            );
        }
        if stages.color_corrections.len() > MAX_COLOR_CORRECTIONS {
            anyhow::bail!(
                "Preset '{}' has {} color corrections (max {})",
                self.id,
                stages.color_corrections.len(),
                MAX_COLOR_CORRECTIONS
            );
        }
        if stages.enable_lut && stages.lut.is_none() {
            anyhow::bail!("Preset '{}' enables a LUT but names none", self.id);
        }

        for key in &stages.chroma_keys {
            for channel in key.key_color.to_array() {
                if !(0.0..=1.0).contains(&channel) {
                    anyhow::bail!("Preset '{}': key color channel {} out of range [0.0, 1.0]", self.id, channel);
                }
            }
            if !(0.0..=1.0).contains(&key.similarity) {
                anyhow::bail!("Preset '{}': similarity {} out of range [0.0, 1.0]", self.id, key.similarity);
            }
            if !(0.0..=1.0).contains(&key.smoothness) {
                anyhow::bail!("Preset '{}': smoothness {} out of range [0.0, 1.0]", self.id, key.smoothness);
            }
            if !(-1.0..=1.0).contains(&key.spill) {
                anyhow::bail!("Preset '{}': spill {} out of range [-1.0, 1.0]", self.id, key.spill);
            }
        }

        for correction in &stages.color_corrections {
            for (name, value, min, max) in correction.ranges() {
                if let Some(v) = value {
                    if !(min..=max).contains(&v) {
                        anyhow::bail!("Preset '{}': {} {} out of range [{}, {}]", self.id, name, v, min, max);
                    }
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetFile {
    pub presets: Vec<FilterPreset>,
}

/// Static presets plus the synthesized custom preset, and which one is active.
#[derive(Debug, Clone)]
pub struct PresetStore {
    presets: Vec<FilterPreset>,
    custom: Option<FilterPreset>,
    active: String,
}

impl Default for PresetStore {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PresetStore {
    pub fn builtin() -> Self {
        Self {
            presets: builtin_presets(),
            custom: None,
            active: ORIGINAL_PRESET_ID.to_string(),
        }
    }

    /// Built-in presets, then entries from a preset file (same id replaces).
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .context("Failed to read preset file")?;

        let file: PresetFile = serde_json::from_str(&content)
            .context("Failed to parse preset file")?;

        let mut store = Self::builtin();
        for preset in file.presets {
            store.insert(preset)?;
        }
        Ok(store)
    }

    /// Add or replace a static preset after validating it.
    pub fn insert(&mut self, preset: FilterPreset) -> Result<()> {
        preset.validate()?;
        if preset.id == CUSTOM_PRESET_ID {
            anyhow::bail!("Preset id '{}' is reserved", CUSTOM_PRESET_ID);
        }

        match self.presets.iter_mut().find(|p| p.id == preset.id) {
            Some(existing) => *existing = preset,
            None => self.presets.push(preset),
        }
        Ok(())
    }

    pub fn list(&self) -> impl Iterator<Item = &FilterPreset> {
        self.presets.iter().chain(self.custom.iter())
    }

    pub fn get(&self, id: &str) -> Option<&FilterPreset> {
        self.list().find(|p| p.id == id)
    }

    pub fn active(&self) -> &FilterPreset {
        // `active` only ever names a known preset and the built-ins are never
        // removed, so the first entry is a formality
        self.get(&self.active).unwrap_or(&self.presets[0])
    }

    pub fn active_id(&self) -> &str {
        &self.active
    }

    pub fn select_preset(&mut self, id: &str) -> FilterResult<&FilterPreset> {
        if self.get(id).is_none() {
            crate::log_warn!("select_preset: unknown preset '{}'", id);
            return Err(FilterError::NotFound(id.to_string()));
        }

        self.active = id.to_string();
        Ok(self.active())
    }

    /// Build a preset that relies on chip compositing alone.
    pub fn synthesize_custom_preset(chips: &[&ColorChip]) -> FilterPreset {
        FilterPreset {
            id: CUSTOM_PRESET_ID.to_string(),
            name: "Custom".to_string(),
            config: FilterConfig::ChipComposite {
                chips: chips.iter().map(|c| (*c).clone()).collect(),
            },
        }
    }

    /// Replace the custom preset with a fresh synthesis and make it active.
    pub fn activate_custom(&mut self, chips: &[&ColorChip]) -> &FilterPreset {
        self.custom = Some(Self::synthesize_custom_preset(chips));
        self.active = CUSTOM_PRESET_ID.to_string();
        self.active()
    }

    /// Re-synthesize an existing custom preset from the current chips without
    /// changing which preset is active.
    pub fn refresh_custom(&mut self, chips: &[&ColorChip]) {
        if self.custom.is_some() {
            self.custom = Some(Self::synthesize_custom_preset(chips));
        }
    }
}

fn builtin_presets() -> Vec<FilterPreset> {
    let lut = |file: &str| StaticStages {
        lut: Some(file.to_string()),
        enable_lut: true,
        ..Default::default()
    };

    vec![
        FilterPreset::new_static(ORIGINAL_PRESET_ID, "Original", StaticStages::default()),
        FilterPreset::new_static(
            "red",
            "Red",
            StaticStages {
                color_corrections: vec![ColorCorrection {
                    saturation: Some(2.0),
                    ..Default::default()
                }],
                ..lut("red-filter.png")
            },
        ),
        FilterPreset::new_static(
            "blue",
            "Blue",
            StaticStages {
                color_corrections: vec![ColorCorrection {
                    saturation: Some(1.5),
                    contrast: Some(0.2),
                    ..Default::default()
                }],
                ..lut("blue-filter.png")
            },
        ),
        FilterPreset::new_static("green", "Green", lut("green-filter.png")),
        FilterPreset::new_static(
            "blue-enhanced",
            "Blue (Enhanced)",
            StaticStages {
                chroma_keys: vec![ChromaKey {
                    key_color: Rgb::from_rgb8(80, 101, 102),
                    similarity: 10.0 / 255.0,
                    smoothness: 0.031,
                    spill: 0.195,
                }],
                color_corrections: vec![ColorCorrection {
                    gamma: Some(-0.06),
                    contrast: Some(0.23),
                    saturation: Some(1.39),
                    ..Default::default()
                }],
                ..lut("blue-isolated.png")
            },
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::{ChipId, ChipMode};

    #[test]
    fn test_builtins_validate() {
        let store = PresetStore::builtin();
        for preset in store.list() {
            preset.validate().unwrap();
        }
        assert_eq!(store.active().id, ORIGINAL_PRESET_ID);
    }

    #[test]
    fn test_original_has_no_stages() {
        let store = PresetStore::builtin();
        assert_eq!(store.active().stages(), StageView::default());
    }

    #[test]
    fn test_select_unknown_is_not_found() {
        let mut store = PresetStore::builtin();
        assert_eq!(
            store.select_preset("sepia").unwrap_err(),
            FilterError::NotFound("sepia".to_string())
        );
        assert_eq!(store.active_id(), ORIGINAL_PRESET_ID);
    }

    #[test]
    fn test_select_switches_active() {
        let mut store = PresetStore::builtin();
        let preset = store.select_preset("blue").unwrap();
        assert_eq!(preset.stages().lut, Some("blue-filter.png"));
        assert_eq!(store.active_id(), "blue");
    }

    #[test]
    fn test_refresh_custom_keeps_active() {
        let red = ColorChip::new(ChipId(1), Rgb::new(1.0, 0.0, 0.0), ChipMode::Include);
        let blue = ColorChip::new(ChipId(2), Rgb::new(0.0, 0.0, 1.0), ChipMode::Include);

        let mut store = PresetStore::builtin();
        // Nothing to refresh before a custom preset exists
        store.refresh_custom(&[&red]);
        assert!(store.get(CUSTOM_PRESET_ID).is_none());

        store.activate_custom(&[&red]);
        store.select_preset("green").unwrap();
        store.refresh_custom(&[&red, &blue]);

        assert_eq!(store.active_id(), "green");
        match &store.get(CUSTOM_PRESET_ID).unwrap().config {
            FilterConfig::ChipComposite { chips } => assert_eq!(chips.len(), 2),
            other => panic!("unexpected config {:?}", other),
        }
    }

    #[test]
    fn test_custom_preset_has_only_chips() {
        let chip = ColorChip::new(ChipId(7), Rgb::new(1.0, 0.0, 0.0), ChipMode::Include);
        let preset = PresetStore::synthesize_custom_preset(&[&chip]);
        assert!(preset.is_chip_composite());
        assert_eq!(preset.stages(), StageView::default());

        let mut store = PresetStore::builtin();
        assert!(store.select_preset(CUSTOM_PRESET_ID).is_err());
        store.activate_custom(&[&chip]);
        assert_eq!(store.active().id, CUSTOM_PRESET_ID);
        assert!(store.select_preset(CUSTOM_PRESET_ID).is_ok());
    }

    #[test]
    fn test_disabled_lut_is_hidden() {
        let preset = FilterPreset::new_static(
            "muted",
            "Muted",
            StaticStages {
                lut: Some("x.png".to_string()),
                enable_lut: false,
                ..Default::default()
            },
        );
        assert_eq!(preset.stages().lut, None);
    }

    #[test]
    fn test_validate_rejects_bad_presets() {
        let too_many = FilterPreset::new_static(
            "keys",
            "Keys",
            StaticStages {
                chroma_keys: vec![
                    ChromaKey {
                        key_color: Rgb::new(0.0, 1.0, 0.0),
                        similarity: 0.4,
                        smoothness: 0.1,
                        spill: 0.1,
                    };
                    MAX_CHROMA_KEYS + 1
                ],
                ..Default::default()
            },
        );
        assert!(too_many.validate().is_err());

        let bad_range = FilterPreset::new_static(
            "sat",
            "Sat",
            StaticStages {
                color_corrections: vec![ColorCorrection {
                    saturation: Some(9.0),
                    ..Default::default()
                }],
                ..Default::default()
            },
        );
        assert!(bad_range.validate().is_err());

        let missing_lut = FilterPreset::new_static(
            "lut",
            "Lut",
            StaticStages {
                enable_lut: true,
                ..Default::default()
            },
        );
        assert!(missing_lut.validate().is_err());
    }

    #[test]
    fn test_preset_json_schema() {
        let json = r#"{
            "presets": [
                {
                    "id": "warm",
                    "name": "Warm",
                    "kind": "static",
                    "color_corrections": [{ "hue_shift": 10.0, "tint": 0.2 }],
                    "lut": "warm.png",
                    "enable_lut": true
                },
                { "id": "original", "name": "Untouched", "kind": "static" }
            ]
        }"#;
        let file: PresetFile = serde_json::from_str(json).unwrap();

        let mut store = PresetStore::builtin();
        let count = store.list().count();
        for preset in file.presets {
            store.insert(preset).unwrap();
        }
        assert_eq!(store.list().count(), count + 1);
        assert_eq!(store.get("original").unwrap().name, "Untouched");
        assert_eq!(store.get("warm").unwrap().stages().color_corrections[0].hue_shift, Some(10.0));
    }

    #[test]
    fn test_custom_id_is_reserved() {
        let mut store = PresetStore::builtin();
        let preset = FilterPreset::new_static(CUSTOM_PRESET_ID, "Mine", StaticStages::default());
        assert!(store.insert(preset).is_err());
    }
}
