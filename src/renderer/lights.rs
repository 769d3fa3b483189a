// Light registry
//
// Lights are named and persistent. Value edits only change what gets written
// into the light buffer; adding, removing or toggling a light is a structural
// change that reassigns buffer slots on the next restructure.

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Light type as the lighting shader sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum LightKind {
    Ambient = 0,
    Directional = 1,
    Point = 2,
    Spot = 3,
}

impl LightKind {
    /// Positional lights are masked by a stencil shadow volume.
    pub fn casts_shadow_volume(self) -> bool {
        matches!(self, LightKind::Point | LightKind::Spot)
    }
}

/// Parameters of one light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightDesc {
    pub kind: LightKind,
    pub position: Vec3,
    pub direction: Vec3,
    pub color: Vec3,
    pub radius: f32,
    pub attenuation: f32,
    /// Cosines of the inner and outer cone angles (spot lights).
    pub cone_inner: f32,
    pub cone_outer: f32,
}

impl LightDesc {
    pub fn ambient(color: Vec3) -> Self {
        Self {
            kind: LightKind::Ambient,
            color,
            ..Self::default()
        }
    }

    pub fn directional(direction: Vec3, color: Vec3) -> Self {
        Self {
            kind: LightKind::Directional,
            direction: direction.normalize_or_zero(),
            color,
            ..Self::default()
        }
    }

    pub fn point(position: Vec3, color: Vec3, radius: f32) -> Self {
        Self {
            kind: LightKind::Point,
            position,
            color,
            radius,
            ..Self::default()
        }
    }

    pub fn spot(position: Vec3, direction: Vec3, color: Vec3, radius: f32, inner: f32, outer: f32) -> Self {
        Self {
            kind: LightKind::Spot,
            position,
            direction: direction.normalize_or_zero(),
            color,
            radius,
            cone_inner: inner.cos(),
            cone_outer: outer.cos(),
            ..Self::default()
        }
    }

    fn to_gpu(self) -> GpuLight {
        GpuLight {
            position: self.position.extend(1.0).to_array(),
            direction: self.direction.extend(0.0).to_array(),
            color: self.color.extend(1.0).to_array(),
            radius: self.radius,
            attenuation: self.attenuation,
            cone_inner: self.cone_inner,
            cone_outer: self.cone_outer,
            kind: self.kind as u32,
            _pad: [0; 3],
        }
    }
}

impl Default for LightDesc {
    fn default() -> Self {
        Self {
            kind: LightKind::Point,
            position: Vec3::ZERO,
            direction: Vec3::NEG_Y,
            color: Vec3::ONE,
            radius: 10.0,
            attenuation: 1.0,
            cone_inner: 1.0,
            cone_outer: 1.0,
        }
    }
}

/// std430 layout of one entry in the light buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuLight {
    pub position: [f32; 4],
    pub direction: [f32; 4],
    pub color: [f32; 4],
    pub radius: f32,
    pub attenuation: f32,
    pub cone_inner: f32,
    pub cone_outer: f32,
    pub kind: u32,
    pub _pad: [u32; 3],
}

/// One registered light.
#[derive(Debug, Clone, PartialEq)]
pub struct LightRecord {
    pub name: String,
    pub desc: LightDesc,
    pub active: bool,
    /// Index into the light buffer; `None` while inactive or over capacity.
    pub slot: Option<usize>,
}

/// An active light in buffer order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveLight {
    pub slot: usize,
    pub kind: LightKind,
}

/// All lights, in registration order.
#[derive(Debug)]
pub struct LightRegistry {
    records: Vec<LightRecord>,
    by_name: HashMap<String, usize>,
    capacity: usize,
    structure_dirty: bool,
    generation: u64,
}

impl LightRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Vec::new(),
            by_name: HashMap::new(),
            capacity,
            structure_dirty: false,
            generation: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bumped by every restructure.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&LightRecord> {
        self.by_name.get(name).map(|&i| &self.records[i])
    }

    /// Registers an active light. Returns false if the name is taken.
    pub fn create(&mut self, name: &str, desc: LightDesc) -> bool {
        if self.by_name.contains_key(name) {
            log::debug!("Light '{}' already exists", name);
            return false;
        }
        self.by_name.insert(name.to_string(), self.records.len());
        self.records.push(LightRecord {
            name: name.to_string(),
            desc,
            active: true,
            slot: None,
        });
        self.structure_dirty = true;
        true
    }

    /// Creates or updates `name` and makes sure it is active.
    pub fn submit(&mut self, name: &str, desc: LightDesc) {
        if !self.create(name, desc) {
            self.update(name, desc);
            self.set_active(name, true);
        }
    }

    /// Replaces the parameters of an existing light.
    pub fn update(&mut self, name: &str, desc: LightDesc) -> bool {
        self.modify(name, |d| *d = desc)
    }

    pub fn set_kind(&mut self, name: &str, kind: LightKind) -> bool {
        self.modify(name, |d| d.kind = kind)
    }

    pub fn set_position(&mut self, name: &str, position: Vec3) -> bool {
        self.modify(name, |d| d.position = position)
    }

    pub fn set_direction(&mut self, name: &str, direction: Vec3) -> bool {
        self.modify(name, |d| d.direction = direction.normalize_or_zero())
    }

    pub fn set_color(&mut self, name: &str, color: Vec3) -> bool {
        self.modify(name, |d| d.color = color)
    }

    pub fn set_radius(&mut self, name: &str, radius: f32) -> bool {
        self.modify(name, |d| d.radius = radius)
    }

    pub fn set_attenuation(&mut self, name: &str, attenuation: f32) -> bool {
        self.modify(name, |d| d.attenuation = attenuation)
    }

    /// Cone angles in radians.
    pub fn set_cone(&mut self, name: &str, inner: f32, outer: f32) -> bool {
        self.modify(name, |d| {
            d.cone_inner = inner.cos();
            d.cone_outer = outer.cos();
        })
    }

    pub fn set_active(&mut self, name: &str, active: bool) -> bool {
        let Some(&index) = self.by_name.get(name) else {
            return false;
        };
        let record = &mut self.records[index];
        if record.active != active {
            record.active = active;
            self.structure_dirty = true;
        }
        true
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let Some(index) = self.by_name.remove(name) else {
            return false;
        };
        let removed = self.records.remove(index);
        for i in self.by_name.values_mut() {
            if *i > index {
                *i -= 1;
            }
        }
        if removed.active {
            self.structure_dirty = true;
        }
        true
    }

    fn modify<F: FnOnce(&mut LightDesc)>(&mut self, name: &str, edit: F) -> bool {
        match self.by_name.get(name) {
            Some(&index) => {
                edit(&mut self.records[index].desc);
                true
            }
            None => {
                log::debug!("No light named '{}'", name);
                false
            }
        }
    }

    pub fn needs_restructure(&self) -> bool {
        self.structure_dirty
    }

    /// Reassigns dense slots to the active lights, in registration order.
    ///
    /// Returns true if anything changed; the caller must then treat every
    /// descriptor that depends on light slots as stale.
    pub fn restructure(&mut self) -> bool {
        if !self.structure_dirty {
            return false;
        }
        let mut next = 0;
        let mut dropped = 0;
        for record in &mut self.records {
            record.slot = None;
            if !record.active {
                continue;
            }
            if next < self.capacity {
                record.slot = Some(next);
                next += 1;
            } else {
                dropped += 1;
            }
        }
        if dropped > 0 {
            log::warn!(
                "Light buffer holds {} lights, {} active lights not drawn",
                self.capacity,
                dropped
            );
        }
        self.structure_dirty = false;
        self.generation += 1;
        log::debug!("Lights restructured: {} active, generation {}", next, self.generation);
        true
    }

    /// Active lights in buffer order.
    pub fn active(&self) -> Vec<ActiveLight> {
        let mut active: Vec<ActiveLight> = self
            .records
            .iter()
            .filter_map(|r| {
                r.slot.map(|slot| ActiveLight {
                    slot,
                    kind: r.desc.kind,
                })
            })
            .collect();
        active.sort_by_key(|l| l.slot);
        active
    }

    /// Dense buffer contents, entry `i` for slot `i`.
    pub fn pack(&self) -> Vec<GpuLight> {
        let mut packed = vec![GpuLight::zeroed(); self.active().len()];
        for record in &self.records {
            if let Some(slot) = record.slot {
                packed[slot] = record.desc.to_gpu();
            }
        }
        packed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> LightRegistry {
        let mut lights = LightRegistry::new(8);
        lights.create("sun", LightDesc::directional(Vec3::NEG_Y, Vec3::ONE));
        lights.create("lamp", LightDesc::point(Vec3::new(1.0, 2.0, 3.0), Vec3::X, 5.0));
        lights.create("torch", LightDesc::point(Vec3::ZERO, Vec3::Y, 2.0));
        lights.create("sky", LightDesc::ambient(Vec3::splat(0.1)));
        lights.restructure();
        lights
    }

    fn slots(lights: &LightRegistry) -> Vec<(String, Option<usize>)> {
        ["sun", "lamp", "torch", "sky"]
            .iter()
            .map(|n| (n.to_string(), lights.get(n).and_then(|r| r.slot)))
            .collect()
    }

    #[test]
    fn gpu_light_is_80_bytes() {
        assert_eq!(std::mem::size_of::<GpuLight>(), 80);
    }

    #[test]
    fn slots_follow_registration_order() {
        let lights = registry();
        let slots: Vec<_> = slots(&lights).into_iter().map(|(_, s)| s).collect();
        assert_eq!(slots, vec![Some(0), Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn deactivation_compacts_densely() {
        let mut lights = registry();
        let generation = lights.generation();
        lights.set_active("lamp", false);
        assert!(lights.restructure());
        assert_eq!(lights.generation(), generation + 1);

        let slots: Vec<_> = slots(&lights).into_iter().map(|(_, s)| s).collect();
        assert_eq!(slots, vec![Some(0), None, Some(1), Some(2)]);

        let packed = lights.pack();
        assert_eq!(packed.len(), 3);
        assert_eq!(packed[1].kind, LightKind::Point as u32);
        assert_eq!(packed[1].color, [0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn value_edits_keep_slots() {
        let mut lights = registry();
        let generation = lights.generation();
        lights.set_position("torch", Vec3::new(9.0, 9.0, 9.0));
        lights.set_color("torch", Vec3::Z);
        assert!(!lights.needs_restructure());
        assert!(!lights.restructure());
        assert_eq!(lights.generation(), generation);
        assert_eq!(lights.pack()[2].position, [9.0, 9.0, 9.0, 1.0]);
    }

    #[test]
    fn remove_reindexes_names() {
        let mut lights = registry();
        assert!(lights.remove("sun"));
        assert!(!lights.remove("sun"));
        lights.restructure();
        assert_eq!(lights.get("sky").and_then(|r| r.slot), Some(2));
        assert!(lights.set_radius("sky", 3.0));
        assert_eq!(lights.get("sky").map(|r| r.desc.radius), Some(3.0));
    }

    #[test]
    fn submit_reactivates() {
        let mut lights = registry();
        lights.set_active("lamp", false);
        lights.restructure();
        lights.submit("lamp", LightDesc::point(Vec3::ZERO, Vec3::ONE, 1.0));
        assert!(lights.needs_restructure());
        lights.restructure();
        assert_eq!(lights.get("lamp").and_then(|r| r.slot), Some(1));
        assert_eq!(lights.get("lamp").map(|r| r.desc.radius), Some(1.0));
    }

    #[test]
    fn over_capacity_lights_are_dropped() {
        let mut lights = LightRegistry::new(2);
        for name in ["a", "b", "c"] {
            lights.create(name, LightDesc::default());
        }
        lights.restructure();
        assert_eq!(lights.active().len(), 2);
        assert_eq!(lights.get("c").and_then(|r| r.slot), None);
    }

    #[test]
    fn only_positional_lights_cast_volumes() {
        let kinds: Vec<bool> = registry()
            .active()
            .iter()
            .map(|l| l.kind.casts_shadow_volume())
            .collect();
        assert_eq!(kinds, vec![false, true, true, false]);
    }
}
