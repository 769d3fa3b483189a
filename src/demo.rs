// Demo scene - a spinning cube on a floor, a few lights and a UI panel
//
// Owns its GPU buffers and textures and hands the renderer raw bindings
// through SceneResources.

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use glam::{Mat4, Quat, Vec3};

use deferred_renderer::gpu::{GpuContext, GpuImage, Scoped};
use deferred_renderer::scene::{
    BoneSnapshot, MaterialBinding, MaterialHandle, MeshBuffers, MeshHandle, MeshVertex,
    SceneResources, SkeletonHandle,
};
use deferred_renderer::{GpuResult, LightDesc, Renderer};

pub const CUBE: MeshHandle = MeshHandle(0);
pub const FLOOR: MeshHandle = MeshHandle(1);
pub const CHECKER: MaterialHandle = MaterialHandle(0);
pub const PANEL: MaterialHandle = MaterialHandle(1);

/// Seconds the flashing spot light stays in each state.
const FLASH_PERIOD: f32 = 3.0;

pub struct DemoScene {
    meshes: Vec<MeshBuffers>,
    materials: Vec<MaterialBinding>,
    // Keep the GPU objects alive for as long as the bindings above are handed out
    _buffers: Vec<Scoped<vk::Buffer>>,
    _textures: Vec<Scoped<GpuImage>>,
    _sampler: Scoped<vk::Sampler>,
}

impl DemoScene {
    pub fn new(gpu: &Arc<dyn GpuContext>) -> GpuResult<Self> {
        let mut buffers = Vec::new();
        let mut upload = |usage: vk::BufferUsageFlags, bytes: &[u8]| -> GpuResult<vk::Buffer> {
            let buffer = Scoped::new(gpu, gpu.create_buffer(bytes.len() as u64, usage)?);
            gpu.write_buffer(buffer.get(), 0, bytes)?;
            let handle = buffer.get();
            buffers.push(buffer);
            Ok(handle)
        };

        let mut meshes = Vec::new();
        for (vertices, indices) in [cube(), floor(12.0)] {
            let shadow = adjacency(&vertices, &indices);
            meshes.push(MeshBuffers {
                vertex_buffer: upload(
                    vk::BufferUsageFlags::VERTEX_BUFFER,
                    bytemuck::cast_slice(&vertices),
                )?,
                index_buffer: upload(vk::BufferUsageFlags::INDEX_BUFFER, bytemuck::cast_slice(&indices))?,
                index_count: indices.len() as u32,
                shadow_index_buffer: upload(
                    vk::BufferUsageFlags::INDEX_BUFFER,
                    bytemuck::cast_slice(&shadow),
                )?,
                shadow_index_count: shadow.len() as u32,
            });
        }

        let sampler = Scoped::new(gpu, gpu.create_sampler()?);
        let checker = Scoped::new(gpu, gpu.create_texture(8, 8, &checker_pixels(8))?);
        let white = Scoped::new(gpu, gpu.create_texture(1, 1, &[255; 4])?);

        let tints: [[f32; 4]; 2] = [[1.0, 1.0, 1.0, 1.0], [0.1, 0.2, 0.4, 0.6]];
        let mut materials = Vec::new();
        for (texture, tint) in [&checker, &white].into_iter().zip(tints) {
            let params = upload(vk::BufferUsageFlags::UNIFORM_BUFFER, bytemuck::cast_slice(&tint))?;
            materials.push(MaterialBinding {
                albedo: texture.get().view,
                sampler: sampler.get(),
                params,
                params_size: std::mem::size_of_val(&tint) as u64,
            });
        }

        log::info!("Demo scene: {} meshes, {} materials", meshes.len(), materials.len());
        Ok(Self {
            meshes,
            materials,
            _buffers: buffers,
            _textures: vec![checker, white],
            _sampler: sampler,
        })
    }

    /// Queues this frame's draws, lights and overlay.
    pub fn populate(&self, renderer: &mut Renderer, time: f32) {
        let spin = Quat::from_rotation_y(time * 0.7) * Quat::from_rotation_x(time * 0.3);
        renderer.submit_draw(
            Mat4::from_rotation_translation(spin, Vec3::new(0.0, 1.0, 0.0)),
            CUBE,
            CHECKER,
        );
        renderer.submit_draw(Mat4::IDENTITY, FLOOR, CHECKER);

        renderer.submit_light("ambient", LightDesc::ambient(Vec3::splat(0.08)));
        renderer.submit_light(
            "sun",
            LightDesc::directional(Vec3::new(-0.4, -1.0, -0.3), Vec3::new(0.4, 0.38, 0.35)),
        );
        let orbit = Vec3::new(time.cos() * 4.0, 3.0, time.sin() * 4.0);
        renderer.submit_light("orbit", LightDesc::point(orbit, Vec3::new(1.0, 0.7, 0.4), 12.0));

        // Toggling a light on and off restructures the light buffer
        let flash_on = (time / FLASH_PERIOD) as u32 % 2 == 0;
        if flash_on {
            renderer.submit_light(
                "flash",
                LightDesc::spot(
                    Vec3::new(0.0, 6.0, 0.0),
                    Vec3::NEG_Y,
                    Vec3::new(0.3, 0.5, 1.0),
                    10.0,
                    0.3,
                    0.5,
                ),
            );
        } else {
            renderer.lights_mut().set_active("flash", false);
        }

        // Panel in the top-left corner, in normalized device coordinates
        let panel = Mat4::from_translation(Vec3::new(-0.95, -0.95, 0.0))
            * Mat4::from_scale(Vec3::new(0.5, 0.15, 1.0));
        renderer.submit_overlay(panel, PANEL);
    }
}

impl SceneResources for DemoScene {
    fn mesh(&self, mesh: MeshHandle) -> Option<MeshBuffers> {
        self.meshes.get(mesh.0 as usize).copied()
    }

    fn material(&self, material: MaterialHandle) -> Option<MaterialBinding> {
        self.materials.get(material.0 as usize).copied()
    }

    fn bone_snapshot(&self, _skeleton: SkeletonHandle, _animation: u32) -> Option<BoneSnapshot> {
        None
    }
}

fn vertex(position: Vec3, normal: Vec3, uv: [f32; 2]) -> MeshVertex {
    MeshVertex {
        position: position.to_array(),
        normal: normal.to_array(),
        uv,
    }
}

/// Unit cube with split vertices per face.
pub fn cube() -> (Vec<MeshVertex>, Vec<u32>) {
    let faces = [
        (Vec3::X, Vec3::Y),
        (Vec3::NEG_X, Vec3::Y),
        (Vec3::Y, Vec3::Z),
        (Vec3::NEG_Y, Vec3::Z),
        (Vec3::Z, Vec3::Y),
        (Vec3::NEG_Z, Vec3::Y),
    ];
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for (normal, up) in faces {
        let right = up.cross(normal);
        let base = vertices.len() as u32;
        for (u, v) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
            let position = (normal + right * (u * 2.0 - 1.0) + up * (v * 2.0 - 1.0)) * 0.5;
            vertices.push(vertex(position, normal, [u, v]));
        }
        indices.extend([base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    (vertices, indices)
}

/// Square in the XZ plane facing up.
pub fn floor(size: f32) -> (Vec<MeshVertex>, Vec<u32>) {
    let h = size * 0.5;
    let vertices = vec![
        vertex(Vec3::new(-h, 0.0, h), Vec3::Y, [0.0, 0.0]),
        vertex(Vec3::new(h, 0.0, h), Vec3::Y, [size, 0.0]),
        vertex(Vec3::new(h, 0.0, -h), Vec3::Y, [size, size]),
        vertex(Vec3::new(-h, 0.0, -h), Vec3::Y, [0.0, size]),
    ];
    (vertices, vec![0, 1, 2, 0, 2, 3])
}

/// Triangle list with adjacency for shadow volume extrusion.
///
/// Vertices are welded by position, so split normals and uvs do not break
/// edges apart. Open edges point back at the triangle's own third vertex.
pub fn adjacency(vertices: &[MeshVertex], indices: &[u32]) -> Vec<u32> {
    let mut welded = HashMap::new();
    let canonical: Vec<u32> = vertices
        .iter()
        .enumerate()
        .map(|(i, v)| *welded.entry(v.position.map(f32::to_bits)).or_insert(i as u32))
        .collect();
    let weld = |i: u32| canonical[i as usize];

    // Directed edge -> vertex opposite to it in its triangle
    let mut opposite = HashMap::new();
    for tri in indices.chunks_exact(3) {
        for k in 0..3 {
            let (a, b, c) = (tri[k], tri[(k + 1) % 3], tri[(k + 2) % 3]);
            opposite.insert((weld(a), weld(b)), c);
        }
    }

    let mut out = Vec::with_capacity(indices.len() * 2);
    for tri in indices.chunks_exact(3) {
        for k in 0..3 {
            let (a, b, c) = (tri[k], tri[(k + 1) % 3], tri[(k + 2) % 3]);
            let neighbour = opposite.get(&(weld(b), weld(a))).copied().unwrap_or(c);
            out.extend([a, neighbour]);
        }
    }
    out
}

fn checker_pixels(size: u32) -> Vec<u8> {
    (0..size * size)
        .flat_map(|i| {
            let (x, y) = (i % size, i / size);
            let shade = if (x + y) % 2 == 0 { 230 } else { 90 };
            [shade, shade, shade, 255]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_cube_has_full_adjacency() {
        let (vertices, indices) = cube();
        let adj = adjacency(&vertices, &indices);
        assert_eq!(adj.len(), indices.len() * 2);

        for tri in adj.chunks_exact(6) {
            let corners = [tri[0], tri[2], tri[4]].map(|i| vertices[i as usize].position);
            for &n in &[tri[1], tri[3], tri[5]] {
                // Every neighbour vertex lies off the triangle
                assert!(!corners.contains(&vertices[n as usize].position));
            }
        }
    }

    #[test]
    fn open_edges_fall_back_to_own_vertex() {
        let (vertices, indices) = floor(2.0);
        let adj = adjacency(&vertices, &indices);
        // First triangle (0, 1, 2): edge 0-1 is open, so its neighbour is 2
        assert_eq!(&adj[0..2], &[0, 2]);
        // Edge 2-0 is shared with the second triangle, whose third vertex is 3
        assert_eq!(&adj[4..6], &[2, 3]);
    }

    #[test]
    fn checker_alternates() {
        let pixels = checker_pixels(2);
        assert_eq!(pixels.len(), 16);
        assert_ne!(pixels[0], pixels[4]);
        assert_eq!(pixels[0], pixels[12]);
    }
}
