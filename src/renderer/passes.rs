// Secondary command buffer recording, one function per graph step content
//
// Everything a recording thread needs for a frame is in the immutable
// FrameSnapshot; the only shared mutable state it touches is its own
// partition of the descriptor set cache.

use std::sync::Arc;

use ash::vk::{self, Handle};
use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use super::descriptor_cache::{BindingTarget, DescriptorSetCache, SetKey};
use super::lights::LightKind;
use super::pipelines::{PipelineId, PipelineLibrary, SetLayoutKind, PUSH_STAGES};
use super::render_graph::{AttachmentRole, PassId, StepContent, PASS_ORDER};
use super::uniforms::SceneUniforms;
use crate::error::GpuResult;
use crate::gpu::{DescriptorWrite, GpuCommand, GpuContext, Recording};
use crate::scene::{DrawRequest, MaterialHandle, OverlayRequest, SceneResources};

/// Push constant block of every draw.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DrawPush {
    pub model: [f32; 16],
    pub light_index: u32,
    /// Animation tick for skinned draws.
    pub tick: f32,
    pub _pad: [u32; 2],
}

impl DrawPush {
    fn new(model: Mat4, light_index: u32, tick: f32) -> Self {
        Self {
            model: model.to_cols_array(),
            light_index,
            tick,
            _pad: [0; 2],
        }
    }
}

/// One unit of secondary recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordTask {
    StaticGeometry,
    SkinnedGeometry,
    Occlusion,
    OcclusionBlur,
    /// Shadow volume (if any) and lighting for the light in buffer slot `slot`.
    Light { slot: usize, kind: LightKind },
    UiOverlay,
    Composite,
}

impl RecordTask {
    /// Render pass and subpass the task continues.
    pub fn location(self) -> (PassId, u32) {
        let content = match self {
            RecordTask::StaticGeometry => StepContent::StaticGeometry,
            RecordTask::SkinnedGeometry => StepContent::SkinnedGeometry,
            RecordTask::Occlusion => StepContent::Occlusion,
            RecordTask::OcclusionBlur => StepContent::OcclusionBlur,
            RecordTask::Light { .. } => StepContent::Lighting,
            RecordTask::UiOverlay => StepContent::UiOverlay,
            RecordTask::Composite => StepContent::Composite,
        };
        PASS_ORDER
            .iter()
            .find(|step| step.contents.contains(&content))
            .map(|step| (step.pass, step.subpass))
            .unwrap_or((PassId::Main, 0))
    }
}

/// Everything the frame's secondary buffers are recorded against.
pub struct FrameSnapshot {
    pub frame: u64,
    pub slot: usize,
    pub extent: vk::Extent2D,
    pub draws: Vec<DrawRequest>,
    pub overlays: Vec<OverlayRequest>,
    /// Active lights in light-buffer order.
    pub lights: Vec<(usize, LightKind)>,
    pub scene_buffer: vk::Buffer,
    pub light_buffer: vk::Buffer,
    pub light_region_size: u64,
    /// Dynamic offsets of this slot's scene and light regions.
    pub dynamic_offsets: [u32; 2],
    /// Identity of scene/light bindings; changes on restructure or reallocation.
    pub light_generation: u64,
    pub surface_generation: u64,
    pub render_passes: [vk::RenderPass; 3],
    /// G-buffer, occlusion and this image's main framebuffer.
    pub framebuffers: [vk::Framebuffer; 3],
    pub pipelines: Vec<vk::Pipeline>,
    pub attachment_views: Vec<(AttachmentRole, vk::ImageView)>,
    pub attachment_sampler: vk::Sampler,
}

impl FrameSnapshot {
    fn pass_index(pass: PassId) -> usize {
        match pass {
            PassId::GBuffer => 0,
            PassId::Occlusion => 1,
            PassId::Main => 2,
        }
    }

    pub fn render_pass(&self, pass: PassId) -> vk::RenderPass {
        self.render_passes[Self::pass_index(pass)]
    }

    pub fn framebuffer(&self, pass: PassId) -> vk::Framebuffer {
        self.framebuffers[Self::pass_index(pass)]
    }

    pub fn pipeline(&self, id: PipelineId) -> vk::Pipeline {
        PipelineId::ALL
            .iter()
            .position(|&p| p == id)
            .and_then(|i| self.pipelines.get(i).copied())
            .unwrap_or_else(vk::Pipeline::null)
    }

    fn view(&self, role: AttachmentRole) -> vk::ImageView {
        self.attachment_views
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, view)| *view)
            .unwrap_or_else(vk::ImageView::null)
    }

    /// Tasks of the frame in graph order, lighting expanded per light.
    pub fn tasks(&self) -> Vec<RecordTask> {
        let mut tasks = Vec::new();
        for step in PASS_ORDER {
            for content in step.contents {
                match content {
                    StepContent::StaticGeometry => tasks.push(RecordTask::StaticGeometry),
                    StepContent::SkinnedGeometry => tasks.push(RecordTask::SkinnedGeometry),
                    StepContent::Occlusion => tasks.push(RecordTask::Occlusion),
                    StepContent::OcclusionBlur => tasks.push(RecordTask::OcclusionBlur),
                    StepContent::Lighting => tasks.extend(
                        self.lights
                            .iter()
                            .map(|&(slot, kind)| RecordTask::Light { slot, kind }),
                    ),
                    StepContent::UiOverlay => tasks.push(RecordTask::UiOverlay),
                    StepContent::Composite => tasks.push(RecordTask::Composite),
                }
            }
        }
        tasks
    }
}

/// Long-lived state shared by all recording threads.
pub struct RecordContext {
    pub gpu: Arc<dyn GpuContext>,
    pub cache: DescriptorSetCache,
    pub library: PipelineLibrary,
    pub scene: Arc<dyn SceneResources>,
}

/// Records `task` into `buffer` on behalf of `thread`.
pub fn record_task(
    ctx: &RecordContext,
    snapshot: &FrameSnapshot,
    thread: usize,
    task: RecordTask,
    buffer: vk::CommandBuffer,
) -> GpuResult<()> {
    let (pass, subpass) = task.location();
    let mut rec = Recorder {
        ctx,
        snapshot,
        thread,
        commands: Vec::new(),
    };

    match task {
        RecordTask::StaticGeometry => rec.geometry(false)?,
        RecordTask::SkinnedGeometry => rec.geometry(true)?,
        RecordTask::Occlusion => rec.occlusion()?,
        RecordTask::OcclusionBlur => rec.occlusion_blur()?,
        RecordTask::Light { slot, kind } => rec.light(slot, kind)?,
        RecordTask::UiOverlay => rec.ui_overlay()?,
        RecordTask::Composite => rec.composite()?,
    }

    let recording = Recording::Secondary {
        render_pass: snapshot.render_pass(pass),
        subpass,
        framebuffer: snapshot.framebuffer(pass),
    };
    ctx.gpu.record(buffer, recording, &rec.commands)
}

fn draws_of(snapshot: &FrameSnapshot, skinned: bool) -> impl Iterator<Item = &DrawRequest> {
    snapshot
        .draws
        .iter()
        .filter(move |d| d.skinned.is_some() == skinned)
}

struct Recorder<'a> {
    ctx: &'a RecordContext,
    snapshot: &'a FrameSnapshot,
    thread: usize,
    commands: Vec<GpuCommand>,
}

impl Recorder<'_> {
    fn bind_pipeline(&mut self, id: PipelineId) {
        self.commands.push(GpuCommand::BindPipeline(self.snapshot.pipeline(id)));
    }

    fn bind_set(&mut self, id: PipelineId, first_set: u32, set: vk::DescriptorSet, dynamic_offsets: Vec<u32>) {
        self.commands.push(GpuCommand::BindDescriptorSets {
            layout: self.ctx.library.layout(id),
            first_set,
            sets: vec![set],
            dynamic_offsets,
        });
    }

    fn push(&mut self, id: PipelineId, push: DrawPush) {
        self.commands.push(GpuCommand::PushConstants {
            layout: self.ctx.library.layout(id),
            stages: PUSH_STAGES,
            data: bytemuck::bytes_of(&push).to_vec(),
        });
    }

    fn fullscreen_triangle(&mut self) {
        self.commands.push(GpuCommand::Draw {
            vertex_count: 3,
            instance_count: 1,
        });
    }

    fn cached_set<F>(&self, key: SetKey, target: BindingTarget, kind: SetLayoutKind, bind: F) -> GpuResult<vk::DescriptorSet>
    where
        F: FnOnce() -> Vec<DescriptorWrite>,
    {
        self.ctx.cache.get_or_create(
            key,
            target,
            self.ctx.library.set_layout(kind),
            self.snapshot.frame,
            bind,
        )
    }

    /// Scene uniforms + light buffer at set 0.
    fn bind_scene(&mut self, id: PipelineId) -> GpuResult<()> {
        let snapshot = self.snapshot;
        let set = self.cached_set(
            SetKey::shared(self.thread, id, 0),
            BindingTarget::LightBuffer {
                generation: snapshot.light_generation,
            },
            SetLayoutKind::Scene,
            || {
                vec![
                    DescriptorWrite::Buffer {
                        binding: 0,
                        kind: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                        buffer: snapshot.scene_buffer,
                        offset: 0,
                        range: std::mem::size_of::<SceneUniforms>() as u64,
                    },
                    DescriptorWrite::Buffer {
                        binding: 1,
                        kind: vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
                        buffer: snapshot.light_buffer,
                        offset: 0,
                        range: snapshot.light_region_size,
                    },
                ]
            },
        )?;
        self.bind_set(id, 0, set, snapshot.dynamic_offsets.to_vec());
        Ok(())
    }

    /// Attachment-backed set whose target is the current surface.
    fn bind_surface_set(
        &mut self,
        id: PipelineId,
        first_set: u32,
        kind: SetLayoutKind,
        inputs: &[AttachmentRole],
    ) -> GpuResult<()> {
        let snapshot = self.snapshot;
        let (descriptor, layout, sampler) = match kind {
            SetLayoutKind::GBufferInputs | SetLayoutKind::CompositeInputs => (
                vk::DescriptorType::INPUT_ATTACHMENT,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::Sampler::null(),
            ),
            _ => (
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                snapshot.attachment_sampler,
            ),
        };
        let set = self.cached_set(
            SetKey::shared(self.thread, id, first_set),
            BindingTarget::Surface {
                generation: snapshot.surface_generation,
            },
            kind,
            || {
                inputs
                    .iter()
                    .enumerate()
                    .map(|(binding, &role)| DescriptorWrite::Image {
                        binding: binding as u32,
                        kind: descriptor,
                        view: snapshot.view(role),
                        sampler,
                        layout,
                    })
                    .collect()
            },
        )?;
        self.bind_set(id, first_set, set, Vec::new());
        Ok(())
    }

    fn bind_material(&mut self, id: PipelineId, first_set: u32, draw_material: MaterialHandle) -> GpuResult<bool> {
        let Some(material) = self.ctx.scene.material(draw_material) else {
            log::trace!("Material {:?} not resident, draw skipped", draw_material);
            return Ok(false);
        };
        let set = self.cached_set(
            SetKey::object(self.thread, id, first_set, u64::from(draw_material.0)),
            BindingTarget::Object {
                primary: material.albedo.as_raw(),
                secondary: material.params.as_raw(),
            },
            SetLayoutKind::Material,
            || {
                vec![
                    DescriptorWrite::Image {
                        binding: 0,
                        kind: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                        view: material.albedo,
                        sampler: material.sampler,
                        layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    },
                    DescriptorWrite::Buffer {
                        binding: 1,
                        kind: vk::DescriptorType::UNIFORM_BUFFER,
                        buffer: material.params,
                        offset: 0,
                        range: material.params_size,
                    },
                ]
            },
        )?;
        self.bind_set(id, first_set, set, Vec::new());
        Ok(true)
    }

    /// Binds the bone snapshot of a skinned draw; returns its animation tick.
    fn bind_bones(&mut self, id: PipelineId, first_set: u32, draw: &DrawRequest) -> GpuResult<Option<f32>> {
        let Some(state) = draw.skinned else {
            return Ok(None);
        };
        let Some(snapshot) = self.ctx.scene.bone_snapshot(state.skeleton, state.animation) else {
            log::trace!("No bone snapshot for {:?}/{}", state.skeleton, state.animation);
            return Ok(None);
        };
        let object = (u64::from(state.skeleton.0) << 32) | u64::from(state.animation);
        let set = self.cached_set(
            SetKey::object(self.thread, id, first_set, object),
            BindingTarget::Object {
                primary: snapshot.texture.as_raw(),
                secondary: snapshot.sampler.as_raw(),
            },
            SetLayoutKind::Bones,
            || {
                vec![DescriptorWrite::Image {
                    binding: 0,
                    kind: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    view: snapshot.texture,
                    sampler: snapshot.sampler,
                    layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                }]
            },
        )?;
        self.bind_set(id, first_set, set, Vec::new());
        Ok(Some(state.tick(&snapshot)))
    }

    fn geometry(&mut self, skinned: bool) -> GpuResult<()> {
        let id = if skinned {
            PipelineId::GBufferSkinned
        } else {
            PipelineId::GBufferStatic
        };
        let snapshot = self.snapshot;
        let mut draws = draws_of(snapshot, skinned).peekable();
        if draws.peek().is_none() {
            return Ok(());
        }
        self.bind_pipeline(id);
        self.bind_scene(id)?;

        for draw in draws {
            let Some(mesh) = self.ctx.scene.mesh(draw.mesh) else {
                log::trace!("Mesh {:?} not resident, draw skipped", draw.mesh);
                continue;
            };
            if !self.bind_material(id, 1, draw.material)? {
                continue;
            }
            let tick = if skinned {
                match self.bind_bones(id, 2, draw)? {
                    Some(tick) => tick,
                    None => continue,
                }
            } else {
                0.0
            };
            self.push(id, DrawPush::new(draw.transform, 0, tick));
            self.commands.push(GpuCommand::BindVertexBuffer(mesh.vertex_buffer));
            self.commands.push(GpuCommand::BindIndexBuffer(mesh.index_buffer));
            self.commands.push(GpuCommand::DrawIndexed {
                index_count: mesh.index_count,
                instance_count: 1,
            });
        }
        Ok(())
    }

    fn occlusion(&mut self) -> GpuResult<()> {
        let id = PipelineId::Occlusion;
        self.bind_pipeline(id);
        self.bind_scene(id)?;
        self.bind_surface_set(
            id,
            1,
            SetLayoutKind::OcclusionInputs,
            &[AttachmentRole::Position, AttachmentRole::Normal],
        )?;
        self.fullscreen_triangle();
        Ok(())
    }

    fn occlusion_blur(&mut self) -> GpuResult<()> {
        let id = PipelineId::OcclusionBlur;
        self.bind_pipeline(id);
        self.bind_surface_set(id, 0, SetLayoutKind::BlurInput, &[AttachmentRole::Occlusion])?;
        self.fullscreen_triangle();
        Ok(())
    }

    /// Extrudes every occluder away from the light into the stencil buffer.
    fn shadow_volumes(&mut self, light_index: u32) -> GpuResult<()> {
        for skinned in [false, true] {
            let id = if skinned {
                PipelineId::ShadowVolumeSkinned
            } else {
                PipelineId::ShadowVolumeStatic
            };
            let snapshot = self.snapshot;
            let mut draws = draws_of(snapshot, skinned).peekable();
            if draws.peek().is_none() {
                continue;
            }
            self.bind_pipeline(id);
            self.bind_scene(id)?;
            for draw in draws {
                let Some(mesh) = self.ctx.scene.mesh(draw.mesh) else {
                    continue;
                };
                if mesh.shadow_index_count == 0 {
                    continue;
                }
                let tick = if skinned {
                    match self.bind_bones(id, 1, draw)? {
                        Some(tick) => tick,
                        None => continue,
                    }
                } else {
                    0.0
                };
                // One draw, both faces: front increments, back decrements
                self.push(id, DrawPush::new(draw.transform, light_index, tick));
                self.commands.push(GpuCommand::BindVertexBuffer(mesh.vertex_buffer));
                self.commands.push(GpuCommand::BindIndexBuffer(mesh.shadow_index_buffer));
                self.commands.push(GpuCommand::DrawIndexed {
                    index_count: mesh.shadow_index_count,
                    instance_count: 1,
                });
            }
        }
        Ok(())
    }

    fn light(&mut self, slot: usize, kind: LightKind) -> GpuResult<()> {
        let light_index = slot as u32;
        let id = if kind.casts_shadow_volume() {
            self.commands.push(GpuCommand::ClearStencil {
                extent: self.snapshot.extent,
                value: 0,
            });
            self.shadow_volumes(light_index)?;
            PipelineId::LightingStenciled
        } else {
            PipelineId::LightingUnmasked
        };

        self.bind_pipeline(id);
        self.bind_scene(id)?;
        self.bind_surface_set(
            id,
            1,
            SetLayoutKind::GBufferInputs,
            &[
                AttachmentRole::Albedo,
                AttachmentRole::Position,
                AttachmentRole::Normal,
                AttachmentRole::BlurredOcclusion,
            ],
        )?;
        self.push(id, DrawPush::new(Mat4::IDENTITY, light_index, 0.0));
        self.fullscreen_triangle();
        Ok(())
    }

    fn ui_overlay(&mut self) -> GpuResult<()> {
        if self.snapshot.overlays.is_empty() {
            return Ok(());
        }
        let id = PipelineId::UiOverlay;
        self.bind_pipeline(id);
        let snapshot = self.snapshot;
        for overlay in &snapshot.overlays {
            if !self.bind_material(id, 0, overlay.material)? {
                continue;
            }
            self.push(id, DrawPush::new(overlay.transform, 0, 0.0));
            // Two triangles generated from the vertex index
            self.commands.push(GpuCommand::Draw {
                vertex_count: 6,
                instance_count: 1,
            });
        }
        Ok(())
    }

    fn composite(&mut self) -> GpuResult<()> {
        let id = PipelineId::Composite;
        self.bind_pipeline(id);
        self.bind_surface_set(
            id,
            0,
            SetLayoutKind::CompositeInputs,
            &[AttachmentRole::RenderColor, AttachmentRole::Ui],
        )?;
        self.fullscreen_triangle();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_block_fits_the_range() {
        assert!(std::mem::size_of::<DrawPush>() as u32 <= crate::renderer::pipelines::PUSH_CONSTANT_SIZE);
    }

    #[test]
    fn tasks_land_in_their_subpasses() {
        assert_eq!(RecordTask::StaticGeometry.location(), (PassId::GBuffer, 0));
        assert_eq!(RecordTask::Occlusion.location(), (PassId::Occlusion, 0));
        assert_eq!(RecordTask::OcclusionBlur.location(), (PassId::Main, 0));
        assert_eq!(
            RecordTask::Light {
                slot: 3,
                kind: LightKind::Spot
            }
            .location(),
            (PassId::Main, 1)
        );
        assert_eq!(RecordTask::UiOverlay.location(), (PassId::Main, 2));
        assert_eq!(RecordTask::Composite.location(), (PassId::Main, 3));
    }
}
