// Scene contracts - what the renderer consumes from the outside world
//
// Meshes, materials and skeletons live in external containers. The renderer
// only sees opaque handles plus the GPU bindings a container hands back.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Opaque handle to a mesh owned by the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshHandle(pub u32);

/// Opaque handle to a material owned by the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialHandle(pub u32);

/// Opaque handle to a skeleton (and its baked animations).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SkeletonHandle(pub u32);

/// Vertex layout of static meshes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

/// Vertex layout of skinned meshes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SkinnedVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub joints: [u32; 4],
    pub weights: [f32; 4],
}

/// GPU buffers backing a mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshBuffers {
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    /// Triangle list with adjacency, used to extrude shadow volumes.
    pub shadow_index_buffer: vk::Buffer,
    pub shadow_index_count: u32,
}

/// How a material is bound: one albedo texture plus a parameter block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterialBinding {
    pub albedo: vk::ImageView,
    pub sampler: vk::Sampler,
    pub params: vk::Buffer,
    pub params_size: u64,
}

/// Baked bone matrices of one animation, sampled by the skinning shader.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoneSnapshot {
    pub texture: vk::ImageView,
    pub sampler: vk::Sampler,
    pub ticks_per_second: f32,
    pub duration: f32,
}

/// Animation state of a skinned draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkinnedState {
    pub skeleton: SkeletonHandle,
    pub animation: u32,
    /// Seconds since the animation started.
    pub time: f32,
    pub looping: bool,
}

impl SkinnedState {
    /// Animation position in ticks, wrapped or clamped to the duration.
    pub fn tick(&self, snapshot: &BoneSnapshot) -> f32 {
        let ticks = self.time * snapshot.ticks_per_second;
        if snapshot.duration <= 0.0 {
            return 0.0;
        }
        if self.looping {
            ticks.rem_euclid(snapshot.duration)
        } else {
            ticks.clamp(0.0, snapshot.duration)
        }
    }
}

/// One queued mesh draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawRequest {
    pub transform: Mat4,
    pub mesh: MeshHandle,
    pub material: MaterialHandle,
    pub skinned: Option<SkinnedState>,
}

/// One queued screen-space quad for the UI subpass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayRequest {
    /// Maps the unit quad to normalized device coordinates.
    pub transform: Mat4,
    pub material: MaterialHandle,
}

/// Camera state for a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameCamera {
    pub view: Mat4,
    pub projection: Mat4,
    pub position: Vec3,
}

impl Default for FrameCamera {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            position: Vec3::ZERO,
        }
    }
}

/// Lookup of GPU bindings for scene handles.
///
/// Called concurrently from the recording workers.
pub trait SceneResources: Send + Sync {
    fn mesh(&self, mesh: MeshHandle) -> Option<MeshBuffers>;
    fn material(&self, material: MaterialHandle) -> Option<MaterialBinding>;
    fn bone_snapshot(&self, skeleton: SkeletonHandle, animation: u32) -> Option<BoneSnapshot>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> BoneSnapshot {
        BoneSnapshot {
            texture: vk::ImageView::null(),
            sampler: vk::Sampler::null(),
            ticks_per_second: 10.0,
            duration: 25.0,
        }
    }

    #[test]
    fn vertex_sizes_match_shader_layout() {
        assert_eq!(std::mem::size_of::<MeshVertex>(), 32);
        assert_eq!(std::mem::size_of::<SkinnedVertex>(), 64);
    }

    #[test]
    fn looping_animation_wraps() {
        let state = SkinnedState {
            skeleton: SkeletonHandle(0),
            animation: 0,
            time: 3.0,
            looping: true,
        };
        assert!((state.tick(&snapshot()) - 5.0).abs() < 1e-4);
    }

    #[test]
    fn one_shot_animation_clamps() {
        let state = SkinnedState {
            skeleton: SkeletonHandle(0),
            animation: 0,
            time: 3.0,
            looping: false,
        };
        assert_eq!(state.tick(&snapshot()), 25.0);
    }
}
