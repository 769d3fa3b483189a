// Shared fixtures for the frame driver tests: a headless device and a tiny
// scene with one mesh and one material living on it.

#![allow(dead_code)]

use std::sync::Arc;

use ash::vk;
use deferred_renderer::backend::{Completion, HeadlessContext};
use deferred_renderer::gpu::GpuContext;
use deferred_renderer::scene::{
    BoneSnapshot, MaterialBinding, MaterialHandle, MeshBuffers, MeshHandle, SceneResources,
    SkeletonHandle,
};
use deferred_renderer::{FrameCamera, Renderer, RendererSettings};

pub const MESH: MeshHandle = MeshHandle(0);
pub const MATERIAL: MaterialHandle = MaterialHandle(0);
pub const SKELETON: SkeletonHandle = SkeletonHandle(0);
/// Looking this mesh up panics, like a scene with a bug in it.
pub const BROKEN_MESH: MeshHandle = MeshHandle(666);

pub fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

pub struct TestScene {
    mesh: MeshBuffers,
    material: MaterialBinding,
    bones: BoneSnapshot,
}

impl TestScene {
    pub fn new(gpu: &Arc<dyn GpuContext>) -> Self {
        let buffer = |size: u64, usage| gpu.create_buffer(size, usage).unwrap();
        let mesh = MeshBuffers {
            vertex_buffer: buffer(96, vk::BufferUsageFlags::VERTEX_BUFFER),
            index_buffer: buffer(12, vk::BufferUsageFlags::INDEX_BUFFER),
            index_count: 3,
            shadow_index_buffer: buffer(24, vk::BufferUsageFlags::INDEX_BUFFER),
            shadow_index_count: 6,
        };
        let material = MaterialBinding {
            albedo: gpu.create_texture(1, 1, &[255; 4]).unwrap().view,
            sampler: gpu.create_sampler().unwrap(),
            params: buffer(16, vk::BufferUsageFlags::UNIFORM_BUFFER),
            params_size: 16,
        };
        // 10 ticks per second, 25 ticks long
        let bones = BoneSnapshot {
            texture: gpu.create_texture(4, 25, &[0; 400]).unwrap().view,
            sampler: material.sampler,
            ticks_per_second: 10.0,
            duration: 25.0,
        };
        Self {
            mesh,
            material,
            bones,
        }
    }
}

impl SceneResources for TestScene {
    fn mesh(&self, mesh: MeshHandle) -> Option<MeshBuffers> {
        assert_ne!(mesh, BROKEN_MESH, "scene lookup blew up");
        (mesh == MESH).then_some(self.mesh)
    }

    fn material(&self, material: MaterialHandle) -> Option<MaterialBinding> {
        (material == MATERIAL).then_some(self.material)
    }

    fn bone_snapshot(&self, skeleton: SkeletonHandle, animation: u32) -> Option<BoneSnapshot> {
        (skeleton == SKELETON && animation == 0).then_some(self.bones)
    }
}

/// A renderer on a headless device, plus the device itself for inspection.
pub struct Harness {
    pub renderer: Renderer,
    pub gpu: Arc<HeadlessContext>,
}

impl Harness {
    pub fn new(images: u32, completion: Completion) -> Self {
        let settings = RendererSettings {
            worker_threads: 2,
            light_capacity: 8,
            ..RendererSettings::default()
        };
        Self::with_settings(images, completion, settings)
    }

    pub fn with_settings(images: u32, completion: Completion, settings: RendererSettings) -> Self {
        let size = extent(320, 240);
        let gpu = Arc::new(HeadlessContext::new(size, images, completion));
        let dyn_gpu: Arc<dyn GpuContext> = gpu.clone();
        let scene = Arc::new(TestScene::new(&dyn_gpu));
        let renderer = Renderer::new(dyn_gpu, scene, size, settings).unwrap();
        Self { renderer, gpu }
    }

    /// One frame drawing the test mesh once.
    pub fn frame(&mut self) -> deferred_renderer::FrameOutcome {
        self.renderer.begin_frame(FrameCamera::default());
        self.renderer.submit_draw(glam::Mat4::IDENTITY, MESH, MATERIAL);
        self.renderer.end_frame().unwrap()
    }
}
