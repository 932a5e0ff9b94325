use crate::chip::{ChipId, ChipMode, ColorChip, ToleranceField, MAX_CHIPS};
use crate::color::Rgb;
use crate::error::{check_range, FilterError, FilterResult};

#[derive(Debug, Clone)]
struct Slot {
    chip: ColorChip,
    /// Insertion sequence; listing order is ascending `seq`.
    seq: u64,
}

/// Fixed-capacity arena of color chips.
///
/// Slots are reused after removal, so physical slot index says nothing about
/// order. `list`/`list_active` return chips in insertion order, which is the
/// order the packer writes them into the uniform arrays.
#[derive(Debug, Clone)]
pub struct ChipRegistry {
    slots: [Option<Slot>; MAX_CHIPS],
    occupancy: u16,
    next_id: u64,
    next_seq: u64,
    editing: Option<ChipId>,
}

impl Default for ChipRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChipRegistry {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
            occupancy: 0,
            next_id: 1,
            next_seq: 0,
            editing: None,
        }
    }

    pub fn len(&self) -> usize {
        self.occupancy.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.occupancy == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= MAX_CHIPS
    }

    /// Add a chip with mode-appropriate default tolerances.
    ///
    /// The chip is fully built before it is placed, so a failed add leaves
    /// the registry untouched.
    pub fn add_chip(&mut self, target_color: Rgb, mode: ChipMode) -> FilterResult<ChipId> {
        validate_color("target_color", target_color)?;

        let free = (0..MAX_CHIPS)
            .find(|&i| self.occupancy & (1 << i) == 0)
            .ok_or(FilterError::CapacityExceeded { capacity: MAX_CHIPS })?;

        let id = ChipId(self.next_id);
        self.next_id += 1;

        self.slots[free] = Some(Slot {
            chip: ColorChip::new(id, target_color, mode),
            seq: self.next_seq,
        });
        self.next_seq += 1;
        self.occupancy |= 1 << free;

        Ok(id)
    }

    /// Remove a chip. Unknown ids return `NotFound` and change nothing.
    pub fn remove_chip(&mut self, id: ChipId) -> FilterResult<ColorChip> {
        let index = match self.slot_index(id) {
            Some(index) => index,
            None => {
                crate::log_warn!("remove_chip: {} is not in the registry", id);
                return Err(FilterError::NotFound(id.to_string()));
            }
        };

        self.occupancy &= !(1 << index);
        let slot = self.slots[index].take();

        if self.editing == Some(id) {
            self.editing = None;
        }

        slot.map(|s| s.chip)
            .ok_or_else(|| FilterError::NotFound(id.to_string()))
    }

    /// Flip the active flag and return the new value.
    pub fn toggle_active(&mut self, id: ChipId) -> FilterResult<bool> {
        let chip = self.chip_mut(id)?;
        chip.active = !chip.active;
        Ok(chip.active)
    }

    pub fn set_display_color(&mut self, id: ChipId, color: Rgb) -> FilterResult<()> {
        validate_color("display_color", color)?;
        self.chip_mut(id)?.display_color = color;
        Ok(())
    }

    pub fn set_tolerance(&mut self, id: ChipId, field: ToleranceField, value: f32) -> FilterResult<()> {
        self.chip_mut(id)?.tolerances.set(field, value)
    }

    pub fn reset_tolerances(&mut self, id: ChipId) -> FilterResult<()> {
        self.chip_mut(id)?.reset_tolerances();
        Ok(())
    }

    /// Restore default tolerances and the picked display color.
    pub fn reset_chip(&mut self, id: ChipId) -> FilterResult<()> {
        self.chip_mut(id)?.reset();
        Ok(())
    }

    pub fn get(&self, id: ChipId) -> Option<&ColorChip> {
        self.slot_index(id)
            .and_then(|i| self.slots[i].as_ref())
            .map(|s| &s.chip)
    }

    /// Every chip, active or not, in insertion order.
    pub fn list(&self) -> Vec<&ColorChip> {
        let mut slots: Vec<&Slot> = self.slots.iter().flatten().collect();
        slots.sort_by_key(|s| s.seq);
        slots.into_iter().map(|s| &s.chip).collect()
    }

    /// Active chips in insertion order.
    pub fn list_active(&self) -> Vec<&ColorChip> {
        self.list().into_iter().filter(|c| c.active).collect()
    }

    pub fn clear(&mut self) {
        self.slots = std::array::from_fn(|_| None);
        self.occupancy = 0;
        self.editing = None;
    }

    pub fn editing(&self) -> Option<ChipId> {
        self.editing
    }

    /// Point the editor at a chip, or clear it with `None`.
    pub fn set_editing(&mut self, id: Option<ChipId>) -> FilterResult<()> {
        if let Some(id) = id {
            if self.slot_index(id).is_none() {
                return Err(FilterError::NotFound(id.to_string()));
            }
        }
        self.editing = id;
        Ok(())
    }

    fn slot_index(&self, id: ChipId) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| s.chip.id == id))
    }

    fn chip_mut(&mut self, id: ChipId) -> FilterResult<&mut ColorChip> {
        let index = self
            .slot_index(id)
            .ok_or_else(|| FilterError::NotFound(id.to_string()))?;
        self.slots[index]
            .as_mut()
            .map(|s| &mut s.chip)
            .ok_or_else(|| FilterError::NotFound(id.to_string()))
    }
}

fn validate_color(field: &'static str, c: Rgb) -> FilterResult<()> {
    for channel in [c.r, c.g, c.b] {
        check_range(field, channel, 0.0, 1.0)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn red() -> Rgb {
        Rgb::new(1.0, 0.0, 0.0)
    }

    #[test]
    fn test_add_assigns_mode_defaults() {
        let mut registry = ChipRegistry::new();
        let inc = registry.add_chip(red(), ChipMode::Include).unwrap();
        let exc = registry.add_chip(red(), ChipMode::Exclude).unwrap();

        assert_eq!(registry.get(inc).unwrap().tolerances.hue, 15.0);
        assert_eq!(registry.get(exc).unwrap().tolerances.overall, 0.02);
        assert_ne!(inc, exc);
    }

    #[test]
    fn test_capacity_exceeded_on_eleventh_chip() {
        let mut registry = ChipRegistry::new();
        for i in 0..MAX_CHIPS {
            registry
                .add_chip(Rgb::new(i as f32 / 10.0, 0.5, 0.5), ChipMode::Include)
                .unwrap();
        }
        assert!(registry.is_full());

        let err = registry.add_chip(red(), ChipMode::Exclude).unwrap_err();
        assert_eq!(err, FilterError::CapacityExceeded { capacity: MAX_CHIPS });
        assert_eq!(registry.len(), MAX_CHIPS);
    }

    #[test]
    fn test_inactive_chips_count_toward_capacity() {
        let mut registry = ChipRegistry::new();
        let ids: Vec<_> = (0..MAX_CHIPS)
            .map(|_| registry.add_chip(red(), ChipMode::Include).unwrap())
            .collect();
        for id in &ids {
            registry.toggle_active(*id).unwrap();
        }
        assert!(registry.list_active().is_empty());
        assert!(registry.add_chip(red(), ChipMode::Include).is_err());
    }

    #[test]
    fn test_remove_unknown_is_not_found_and_harmless() {
        let mut registry = ChipRegistry::new();
        let id = registry.add_chip(red(), ChipMode::Include).unwrap();
        assert_eq!(
            registry.remove_chip(ChipId(999)),
            Err(FilterError::NotFound("chip-999".to_string()))
        );
        assert_eq!(registry.len(), 1);

        registry.remove_chip(id).unwrap();
        assert!(registry.remove_chip(id).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_clears_editing_pointer() {
        let mut registry = ChipRegistry::new();
        let a = registry.add_chip(red(), ChipMode::Include).unwrap();
        let b = registry.add_chip(red(), ChipMode::Include).unwrap();

        registry.set_editing(Some(a)).unwrap();
        registry.remove_chip(b).unwrap();
        assert_eq!(registry.editing(), Some(a));

        registry.remove_chip(a).unwrap();
        assert_eq!(registry.editing(), None);
        assert!(registry.set_editing(Some(a)).is_err());
    }

    #[test]
    fn test_list_keeps_insertion_order_across_slot_reuse() {
        let mut registry = ChipRegistry::new();
        let a = registry.add_chip(Rgb::new(0.1, 0.0, 0.0), ChipMode::Include).unwrap();
        let b = registry.add_chip(Rgb::new(0.2, 0.0, 0.0), ChipMode::Include).unwrap();
        let c = registry.add_chip(Rgb::new(0.3, 0.0, 0.0), ChipMode::Exclude).unwrap();

        registry.remove_chip(a).unwrap();
        // Reuses slot 0 but must list last
        let d = registry.add_chip(Rgb::new(0.4, 0.0, 0.0), ChipMode::Include).unwrap();

        let order: Vec<ChipId> = registry.list().iter().map(|c| c.id).collect();
        assert_eq!(order, vec![b, c, d]);

        registry.toggle_active(c).unwrap();
        let active: Vec<ChipId> = registry.list_active().iter().map(|c| c.id).collect();
        assert_eq!(active, vec![b, d]);
    }

    #[test]
    fn test_setters_validate_ranges() {
        let mut registry = ChipRegistry::new();
        let id = registry.add_chip(red(), ChipMode::Include).unwrap();

        assert!(registry.set_tolerance(id, ToleranceField::Value, 0.6).is_err());
        assert_eq!(registry.get(id).unwrap().tolerances.value, 0.3);

        registry.set_tolerance(id, ToleranceField::Hue, 60.0).unwrap();
        assert_eq!(registry.get(id).unwrap().tolerances.hue, 60.0);

        assert!(registry.set_display_color(id, Rgb::new(1.2, 0.0, 0.0)).is_err());
        registry.set_display_color(id, Rgb::new(0.0, 0.0, 1.0)).unwrap();
        assert_eq!(registry.get(id).unwrap().display_color, Rgb::new(0.0, 0.0, 1.0));
        assert_eq!(registry.get(id).unwrap().target_color(), red());

        registry.reset_tolerances(id).unwrap();
        assert_eq!(registry.get(id).unwrap().tolerances.hue, 15.0);
    }

    #[test]
    fn test_unknown_ids_on_mutators() {
        let mut registry = ChipRegistry::new();
        let ghost = ChipId(42);
        assert!(matches!(registry.toggle_active(ghost), Err(FilterError::NotFound(_))));
        assert!(registry.reset_tolerances(ghost).is_err());
        assert!(registry.reset_chip(ghost).is_err());
        assert!(registry.set_tolerance(ghost, ToleranceField::Hue, 10.0).is_err());
    }

    #[test]
    fn test_clear() {
        let mut registry = ChipRegistry::new();
        let id = registry.add_chip(red(), ChipMode::Include).unwrap();
        registry.set_editing(Some(id)).unwrap();
        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.editing(), None);
        assert!(registry.add_chip(red(), ChipMode::Include).is_ok());
    }
}
