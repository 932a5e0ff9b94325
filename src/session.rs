use crate::chip::{ChipId, ChipMode, ToleranceField};
use crate::color::Rgb;
use crate::error::{check_range, FilterError, FilterResult};
use crate::lut::Lut;
use crate::packer::{pack, AdjustmentField, StreamAdjustments, UnselectedTreatment};
use crate::preset::{PresetStore, ORIGINAL_PRESET_ID};
use crate::registry::ChipRegistry;
use crate::render::PublishedState;
use image::RgbaImage;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Eyedropper state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PickState {
    #[default]
    Idle,
    Picking(ChipMode),
}

/// Edits queued by the UI or CLI and applied between frames.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterCommand {
    AddChip { color: Rgb, mode: ChipMode },
    RemoveChip(ChipId),
    ToggleChip(ChipId),
    SetDisplayColor(ChipId, Rgb),
    SetTolerance(ChipId, ToleranceField, f32),
    ResetTolerances(ChipId),
    /// Tolerances back to defaults and display color back to the picked color
    ResetChip(ChipId),
    SetEditing(Option<ChipId>),
    BeginPick(ChipMode),
    /// Sample the most recent source frame at `(x, y)`
    CommitPick { x: u32, y: u32 },
    CancelPick,
    SelectPreset(String),
    ClearChips,
    ResetAll,
    SetTreatment(UnselectedTreatment),
    SetAdjustment(AdjustmentField, f32),
}

/// Everything the user can change, plus the bookkeeping needed to decide
/// when a repack is due.
pub struct FilterSession {
    registry: ChipRegistry,
    presets: PresetStore,
    adjustments: StreamAdjustments,
    treatment: UnselectedTreatment,
    pick: PickState,
    lut_dir: Option<PathBuf>,
    lut_cache: HashMap<String, Option<Arc<Lut>>>,
    dirty: bool,
    version: u64,
}

impl Default for FilterSession {
    fn default() -> Self {
        Self::new(PresetStore::builtin())
    }
}

impl FilterSession {
    pub fn new(presets: PresetStore) -> Self {
        Self {
            registry: ChipRegistry::new(),
            presets,
            adjustments: StreamAdjustments::default(),
            treatment: UnselectedTreatment::default(),
            pick: PickState::Idle,
            lut_dir: None,
            lut_cache: HashMap::new(),
            dirty: true,
            version: 0,
        }
    }

    /// Directory LUT file names are resolved against.
    pub fn with_lut_dir(mut self, dir: PathBuf) -> Self {
        self.lut_dir = Some(dir);
        self.lut_cache.clear();
        self
    }

    /// Make a LUT available under `name` without touching the filesystem.
    pub fn register_lut(&mut self, name: &str, lut: Lut) {
        self.lut_cache.insert(name.to_string(), Some(Arc::new(lut)));
        self.dirty = true;
    }

    pub fn registry(&self) -> &ChipRegistry {
        &self.registry
    }

    pub fn presets(&self) -> &PresetStore {
        &self.presets
    }

    pub fn adjustments(&self) -> &StreamAdjustments {
        &self.adjustments
    }

    pub fn treatment(&self) -> UnselectedTreatment {
        self.treatment
    }

    pub fn pick_state(&self) -> PickState {
        self.pick
    }

    /// True when an edit has not been published yet.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn touched<T>(&mut self, result: FilterResult<T>) -> FilterResult<T> {
        if result.is_ok() {
            self.dirty = true;
            self.presets.refresh_custom(&self.registry.list());
        }
        result
    }

    /// Add a chip and switch to the custom preset built from the registry.
    pub fn add_chip(&mut self, color: Rgb, mode: ChipMode) -> FilterResult<ChipId> {
        let id = self.registry.add_chip(color, mode)?;
        self.registry.set_editing(Some(id))?;
        self.presets.activate_custom(&self.registry.list());
        self.dirty = true;
        crate::log_info!("Added {:?} chip {} ({})", mode, id, crate::color::rgb_to_hex(color));
        Ok(id)
    }

    pub fn remove_chip(&mut self, id: ChipId) -> FilterResult<()> {
        let result = self.registry.remove_chip(id).map(|_| ());
        self.touched(result)
    }

    pub fn toggle_chip(&mut self, id: ChipId) -> FilterResult<bool> {
        let result = self.registry.toggle_active(id);
        self.touched(result)
    }

    pub fn set_display_color(&mut self, id: ChipId, color: Rgb) -> FilterResult<()> {
        let result = self.registry.set_display_color(id, color);
        self.touched(result)
    }

    pub fn set_tolerance(&mut self, id: ChipId, field: ToleranceField, value: f32) -> FilterResult<()> {
        let result = self.registry.set_tolerance(id, field, value);
        self.touched(result)
    }

    pub fn reset_tolerances(&mut self, id: ChipId) -> FilterResult<()> {
        let result = self.registry.reset_tolerances(id);
        self.touched(result)
    }

    pub fn reset_chip(&mut self, id: ChipId) -> FilterResult<()> {
        let result = self.registry.reset_chip(id);
        self.touched(result)
    }

    pub fn set_editing(&mut self, id: Option<ChipId>) -> FilterResult<()> {
        self.registry.set_editing(id)
    }

    pub fn begin_pick(&mut self, mode: ChipMode) {
        self.pick = PickState::Picking(mode);
    }

    pub fn cancel_pick(&mut self) {
        if self.pick != PickState::Idle {
            crate::log_info!("Pick cancelled");
        }
        self.pick = PickState::Idle;
    }

    /// Sample `frame` at `(x, y)` and add a chip in the pending pick mode.
    ///
    /// Returns `Ok(None)` when no pick is in progress. The pick ends whether
    /// or not the chip could be added.
    pub fn commit_pick(&mut self, frame: &RgbaImage, x: u32, y: u32) -> FilterResult<Option<ChipId>> {
        let mode = match self.pick {
            PickState::Idle => return Ok(None),
            PickState::Picking(mode) => mode,
        };

        self.pick = PickState::Idle;

        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(FilterError::EmptyFrame);
        }
        check_range("pick_x", x as f32, 0.0, (width - 1) as f32)?;
        check_range("pick_y", y as f32, 0.0, (height - 1) as f32)?;

        let [r, g, b, _] = frame.get_pixel(x, y).0;
        self.add_chip(Rgb::from_rgb8(r, g, b), mode).map(Some)
    }

    /// Switch to a named preset. Abandons an in-flight pick.
    pub fn select_preset(&mut self, id: &str) -> FilterResult<()> {
        self.cancel_pick();
        self.presets.select_preset(id)?;
        self.dirty = true;
        crate::log_info!("Preset selected: {}", id);
        Ok(())
    }

    /// Remove every chip. Abandons an in-flight pick.
    pub fn clear_chips(&mut self) {
        self.cancel_pick();
        self.registry.clear();
        if self.presets.active().is_chip_composite() {
            self.presets.activate_custom(&[]);
        }
        self.dirty = true;
    }

    /// Clear chips and go back to the original preset.
    pub fn reset_all(&mut self) {
        self.clear_chips();
        if let Err(e) = self.presets.select_preset(ORIGINAL_PRESET_ID) {
            crate::log_error!("Reset could not restore the original preset: {}", e);
        }
        self.dirty = true;
    }

    pub fn set_treatment(&mut self, treatment: UnselectedTreatment) -> FilterResult<()> {
        self.treatment = treatment.validate()?;
        self.dirty = true;
        Ok(())
    }

    pub fn set_adjustment(&mut self, field: AdjustmentField, value: f32) -> FilterResult<()> {
        let result = self.adjustments.set(field, value);
        self.touched(result)
    }

    pub fn set_adjustments(&mut self, adjustments: StreamAdjustments) -> FilterResult<()> {
        self.adjustments = adjustments.validate()?;
        self.dirty = true;
        Ok(())
    }

    /// Apply one queued command. `frame` is the latest source frame, used by
    /// pick commits.
    pub fn apply(&mut self, command: FilterCommand, frame: Option<&RgbaImage>) -> FilterResult<()> {
        match command {
            FilterCommand::AddChip { color, mode } => self.add_chip(color, mode).map(|_| ()),
            FilterCommand::RemoveChip(id) => self.remove_chip(id),
            FilterCommand::ToggleChip(id) => self.toggle_chip(id).map(|_| ()),
            FilterCommand::SetDisplayColor(id, color) => self.set_display_color(id, color),
            FilterCommand::SetTolerance(id, field, value) => self.set_tolerance(id, field, value),
            FilterCommand::ResetTolerances(id) => self.reset_tolerances(id),
            FilterCommand::ResetChip(id) => self.reset_chip(id),
            FilterCommand::SetEditing(id) => self.set_editing(id),
            FilterCommand::BeginPick(mode) => {
                self.begin_pick(mode);
                Ok(())
            }
            FilterCommand::CommitPick { x, y } => match frame {
                Some(frame) => self.commit_pick(frame, x, y).map(|_| ()),
                None => {
                    self.cancel_pick();
                    Err(FilterError::EmptyFrame)
                }
            },
            FilterCommand::CancelPick => {
                self.cancel_pick();
                Ok(())
            }
            FilterCommand::SelectPreset(id) => self.select_preset(&id),
            FilterCommand::ClearChips => {
                self.clear_chips();
                Ok(())
            }
            FilterCommand::ResetAll => {
                self.reset_all();
                Ok(())
            }
            FilterCommand::SetTreatment(treatment) => self.set_treatment(treatment),
            FilterCommand::SetAdjustment(field, value) => self.set_adjustment(field, value),
        }
    }

    fn resolve_lut(&mut self, name: &str) -> Option<Arc<Lut>> {
        if let Some(cached) = self.lut_cache.get(name) {
            return cached.clone();
        }

        let loaded = match &self.lut_dir {
            Some(dir) => {
                let path = dir.join(name);
                match Lut::load_from_file(&path) {
                    Ok(lut) => {
                        crate::log_info!("Loaded LUT: {} ({}³)", name, lut.size());
                        Some(Arc::new(lut))
                    }
                    Err(e) => {
                        crate::log_warn!("LUT '{}' unavailable, grading disabled: {:#}", name, e);
                        None
                    }
                }
            }
            None => {
                crate::log_warn!("No LUT directory configured, '{}' disabled", name);
                None
            }
        };

        self.lut_cache.insert(name.to_string(), loaded.clone());
        loaded
    }

    /// Pack the current state into a fresh snapshot and clear the dirty flag.
    pub fn build_state(&mut self) -> PublishedState {
        let lut_name = self.presets.active().stages().lut.map(str::to_string);
        let lut = lut_name.as_deref().and_then(|name| self.resolve_lut(name));

        let chips = self.registry.list_active();
        let mut block = pack(&chips, self.presets.active().stages(), &self.adjustments, self.treatment);
        block.lut_enabled = lut.is_some();

        self.version += 1;
        self.dirty = false;

        PublishedState {
            block,
            lut,
            version: self.version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::ColorChip;
    use crate::preset::{FilterConfig, CUSTOM_PRESET_ID};
    use image::Rgba;

    fn frame() -> RgbaImage {
        RgbaImage::from_fn(4, 4, |x, _| {
            if x < 2 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        })
    }

    #[test]
    fn test_add_chip_switches_to_custom_and_edits() {
        let mut session = FilterSession::default();
        let id = session.add_chip(Rgb::new(1.0, 0.0, 0.0), ChipMode::Include).unwrap();
        assert_eq!(session.presets().active_id(), CUSTOM_PRESET_ID);
        assert_eq!(session.registry().editing(), Some(id));
        assert!(session.is_dirty());
    }

    fn custom_chips(session: &FilterSession) -> Vec<ColorChip> {
        match &session.presets().get(CUSTOM_PRESET_ID).unwrap().config {
            FilterConfig::ChipComposite { chips } => chips.clone(),
            other => panic!("unexpected config {:?}", other),
        }
    }

    #[test]
    fn test_custom_preset_follows_chip_edits() {
        let mut session = FilterSession::default();
        let red = session.add_chip(Rgb::new(1.0, 0.0, 0.0), ChipMode::Include).unwrap();
        let blue = session.add_chip(Rgb::new(0.0, 0.0, 1.0), ChipMode::Include).unwrap();

        session.toggle_chip(red).unwrap();
        session.set_display_color(blue, Rgb::new(0.0, 1.0, 0.0)).unwrap();
        let chips = custom_chips(&session);
        assert!(!chips[0].active);
        assert_eq!(chips[1].display_color, Rgb::new(0.0, 1.0, 0.0));

        session.remove_chip(red).unwrap();
        assert_eq!(custom_chips(&session).len(), 1);
    }

    #[test]
    fn test_reset_chip_command() {
        let mut session = FilterSession::default();
        let id = session.add_chip(Rgb::new(1.0, 0.0, 0.0), ChipMode::Include).unwrap();
        session.set_display_color(id, Rgb::new(0.0, 0.0, 1.0)).unwrap();
        session.set_tolerance(id, ToleranceField::Value, 0.45).unwrap();
        session.build_state();

        session.apply(FilterCommand::ResetChip(id), None).unwrap();
        assert!(session.is_dirty());
        let chip = session.registry().get(id).unwrap();
        assert_eq!(chip.display_color, Rgb::new(1.0, 0.0, 0.0));
        assert_eq!(chip.tolerances.value, 0.3);
        assert_eq!(custom_chips(&session)[0].display_color, Rgb::new(1.0, 0.0, 0.0));

        assert!(matches!(
            session.apply(FilterCommand::ResetChip(ChipId(99)), None),
            Err(FilterError::NotFound(_))
        ));
    }

    #[test]
    fn test_pick_commit_samples_frame() {
        let mut session = FilterSession::default();
        assert_eq!(session.commit_pick(&frame(), 0, 0), Ok(None));

        session.begin_pick(ChipMode::Exclude);
        let id = session.commit_pick(&frame(), 3, 1).unwrap().unwrap();
        let chip = session.registry().get(id).unwrap();
        assert_eq!(chip.target_color(), Rgb::new(0.0, 0.0, 1.0));
        assert_eq!(chip.mode(), ChipMode::Exclude);
        assert_eq!(session.pick_state(), PickState::Idle);
    }

    #[test]
    fn test_pick_out_of_bounds_adds_nothing() {
        let mut session = FilterSession::default();
        session.begin_pick(ChipMode::Include);
        let err = session.commit_pick(&frame(), 9, 0).unwrap_err();
        assert!(matches!(err, FilterError::InvalidRange { field: "pick_x", .. }));
        assert!(session.registry().is_empty());
        assert_eq!(session.pick_state(), PickState::Idle);
    }

    #[test]
    fn test_preset_select_and_clear_cancel_pick() {
        let mut session = FilterSession::default();
        session.begin_pick(ChipMode::Include);
        session.select_preset("blue").unwrap();
        assert_eq!(session.pick_state(), PickState::Idle);

        session.begin_pick(ChipMode::Include);
        session.clear_chips();
        assert_eq!(session.pick_state(), PickState::Idle);

        // Unknown preset still cancels but changes nothing else
        session.begin_pick(ChipMode::Include);
        assert!(session.select_preset("nope").is_err());
        assert_eq!(session.pick_state(), PickState::Idle);
        assert_eq!(session.presets().active_id(), "blue");
    }

    #[test]
    fn test_pick_at_capacity_fails_cleanly() {
        let mut session = FilterSession::default();
        for i in 0..crate::chip::MAX_CHIPS {
            session.add_chip(Rgb::new(i as f32 / 10.0, 0.2, 0.2), ChipMode::Include).unwrap();
        }
        session.begin_pick(ChipMode::Include);
        let err = session.commit_pick(&frame(), 0, 0).unwrap_err();
        assert!(matches!(err, FilterError::CapacityExceeded { .. }));
        assert_eq!(session.registry().len(), crate::chip::MAX_CHIPS);
        assert_eq!(session.pick_state(), PickState::Idle);
    }

    #[test]
    fn test_reset_all_returns_to_original() {
        let mut session = FilterSession::default();
        session.add_chip(Rgb::new(1.0, 0.0, 0.0), ChipMode::Include).unwrap();
        session.reset_all();
        assert!(session.registry().is_empty());
        assert_eq!(session.presets().active_id(), ORIGINAL_PRESET_ID);
    }

    #[test]
    fn test_build_state_bumps_version_and_clears_dirty() {
        let mut session = FilterSession::default();
        let first = session.build_state();
        assert_eq!(first.version, 1);
        assert!(!session.is_dirty());

        session.add_chip(Rgb::new(0.0, 1.0, 0.0), ChipMode::Include).unwrap();
        let second = session.build_state();
        assert_eq!(second.version, 2);
        assert_eq!(second.block.active_count, 1);
    }

    #[test]
    fn test_rejected_edit_leaves_session_clean() {
        let mut session = FilterSession::default();
        let id = session.add_chip(Rgb::new(1.0, 0.0, 0.0), ChipMode::Include).unwrap();
        session.build_state();

        assert!(session.set_tolerance(id, ToleranceField::Hue, 99.0).is_err());
        assert!(session.remove_chip(ChipId(1234)).is_err());
        assert!(session.set_adjustment(AdjustmentField::Gamma, 5.0).is_err());
        assert!(!session.is_dirty());
    }

    #[test]
    fn test_missing_lut_disables_stage() {
        let dir = std::env::temp_dir().join(format!("chromasift_session_luts_{}", std::process::id()));
        let mut session = FilterSession::default().with_lut_dir(dir);
        session.select_preset("green").unwrap();
        let state = session.build_state();
        assert!(state.lut.is_none());
        assert!(!state.block.lut_enabled);
    }

    #[test]
    fn test_registered_lut_is_published() {
        let mut session = FilterSession::default();
        session.register_lut("red-filter.png", Lut::identity(4));
        session.select_preset("red").unwrap();
        let state = session.build_state();
        assert!(state.block.lut_enabled);
        assert_eq!(state.lut.map(|l| l.size()), Some(4));
        assert_eq!(state.block.correction_count, 1);
    }

    #[test]
    fn test_apply_dispatches_commands() {
        let mut session = FilterSession::default();
        let f = frame();
        session.apply(FilterCommand::BeginPick(ChipMode::Include), Some(&f)).unwrap();
        session.apply(FilterCommand::CommitPick { x: 0, y: 0 }, Some(&f)).unwrap();
        assert_eq!(session.registry().len(), 1);

        session
            .apply(FilterCommand::SetTreatment(UnselectedTreatment::Passthrough), None)
            .unwrap();
        assert_eq!(session.treatment(), UnselectedTreatment::Passthrough);

        session.apply(FilterCommand::BeginPick(ChipMode::Include), None).unwrap();
        assert_eq!(
            session.apply(FilterCommand::CommitPick { x: 0, y: 0 }, None),
            Err(FilterError::EmptyFrame)
        );
        assert_eq!(session.pick_state(), PickState::Idle);

        session.apply(FilterCommand::ResetAll, None).unwrap();
        assert!(session.registry().is_empty());
    }
}
