// Per-slot uniform regions
//
// Scene uniforms and the light buffer hold one aligned region per frame slot
// and are bound once with dynamic offsets. The driver only writes a slot's
// region after waiting on that slot's fences, so no region is ever written
// while the GPU reads it.

use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};

use super::lights::GpuLight;
use crate::error::{GpuError, GpuResult};
use crate::gpu::{GpuContext, Scoped};
use crate::scene::FrameCamera;

/// std140 scene uniform block.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SceneUniforms {
    pub view: [f32; 16],
    pub projection: [f32; 16],
    pub view_position: [f32; 4],
    pub light_count: u32,
    pub _pad: [u32; 3],
}

impl SceneUniforms {
    pub fn new(camera: &FrameCamera, light_count: u32) -> Self {
        Self {
            view: camera.view.to_cols_array(),
            projection: camera.projection.to_cols_array(),
            view_position: camera.position.extend(1.0).to_array(),
            light_count,
            _pad: [0; 3],
        }
    }
}

/// A host-visible buffer split into one region per frame slot.
pub struct SlotRegions {
    gpu: Arc<dyn GpuContext>,
    buffer: Scoped<vk::Buffer>,
    region_size: u64,
    slots: usize,
}

impl SlotRegions {
    pub fn new(
        gpu: &Arc<dyn GpuContext>,
        payload: u64,
        slots: usize,
        usage: vk::BufferUsageFlags,
    ) -> GpuResult<Self> {
        let region_size = gpu.limits().align_region(payload.max(1));
        let buffer = gpu.create_buffer(region_size * slots as u64, usage)?;
        Ok(Self {
            gpu: Arc::clone(gpu),
            buffer: Scoped::new(gpu, buffer),
            region_size,
            slots,
        })
    }

    pub fn buffer(&self) -> vk::Buffer {
        self.buffer.get()
    }

    pub fn region_size(&self) -> u64 {
        self.region_size
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Dynamic offset of `slot`'s region.
    pub fn offset(&self, slot: usize) -> u32 {
        (self.region_size * slot as u64) as u32
    }

    /// Writes `data` at the start of `slot`'s region.
    pub fn write(&self, slot: usize, data: &[u8]) -> GpuResult<()> {
        if data.len() as u64 > self.region_size || slot >= self.slots {
            return Err(GpuError::Allocation(format!(
                "{} bytes for slot {} do not fit a {} byte region of {} slots",
                data.len(),
                slot,
                self.region_size,
                self.slots
            )));
        }
        self.gpu.write_buffer(self.buffer.get(), u64::from(self.offset(slot)), data)
    }
}

/// Scene uniforms and light buffer of all slots.
pub struct FrameUniforms {
    pub scene: SlotRegions,
    pub lights: SlotRegions,
}

impl FrameUniforms {
    pub fn new(gpu: &Arc<dyn GpuContext>, slots: usize, light_capacity: usize) -> GpuResult<Self> {
        let scene = SlotRegions::new(
            gpu,
            std::mem::size_of::<SceneUniforms>() as u64,
            slots,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
        )?;
        let lights = SlotRegions::new(
            gpu,
            (std::mem::size_of::<GpuLight>() * light_capacity) as u64,
            slots,
            vk::BufferUsageFlags::STORAGE_BUFFER,
        )?;
        Ok(Self { scene, lights })
    }

    pub fn slots(&self) -> usize {
        self.scene.slots()
    }

    /// Writes the slot's scene block and dense light array.
    pub fn write(&self, slot: usize, camera: &FrameCamera, lights: &[GpuLight]) -> GpuResult<()> {
        let uniforms = SceneUniforms::new(camera, lights.len() as u32);
        self.scene.write(slot, bytemuck::bytes_of(&uniforms))?;
        self.lights.write(slot, bytemuck::cast_slice(lights))
    }

    pub fn dynamic_offsets(&self, slot: usize) -> [u32; 2] {
        [self.scene.offset(slot), self.lights.offset(slot)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{Completion, HeadlessContext};

    #[test]
    fn scene_block_is_160_bytes() {
        assert_eq!(std::mem::size_of::<SceneUniforms>(), 160);
    }

    #[test]
    fn regions_are_aligned_and_disjoint() {
        let headless = Arc::new(HeadlessContext::new(
            vk::Extent2D {
                width: 8,
                height: 8,
            },
            3,
            Completion::Immediate,
        ));
        let gpu: Arc<dyn GpuContext> = headless.clone();
        let uniforms = FrameUniforms::new(&gpu, 3, 4).unwrap();

        assert_eq!(uniforms.scene.region_size(), 256);
        assert_eq!(uniforms.lights.region_size(), 512);
        assert_eq!(uniforms.dynamic_offsets(2), [512, 1024]);

        let light = GpuLight {
            radius: 7.0,
            ..GpuLight::zeroed()
        };
        uniforms
            .write(1, &FrameCamera::default(), &[light, light])
            .unwrap();

        let bytes = headless.buffer_contents(uniforms.lights.buffer());
        let region = &bytes[512..512 + 160];
        assert_eq!(region, bytemuck::cast_slice::<GpuLight, u8>(&[light, light]));
        // Slot 0 untouched
        assert!(bytes[..512].iter().all(|&b| b == 0));
    }

    #[test]
    fn oversized_write_is_refused() {
        let headless = Arc::new(HeadlessContext::new(
            vk::Extent2D {
                width: 8,
                height: 8,
            },
            2,
            Completion::Immediate,
        ));
        let gpu: Arc<dyn GpuContext> = headless.clone();
        let regions = SlotRegions::new(&gpu, 16, 2, vk::BufferUsageFlags::UNIFORM_BUFFER).unwrap();
        assert!(regions.write(0, &[0u8; 300]).is_err());
        assert!(regions.write(2, &[0u8; 4]).is_err());
    }
}
