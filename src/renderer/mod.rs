// =============================================================================
// RENDERER - Frame driver and the public frame API
// =============================================================================
//
// Application side:
//
//   begin_frame(camera) -> submit_draw / submit_skinned_draw / submit_light /
//   submit_overlay ... -> end_frame()
//
// end_frame does the whole frame on the calling thread, fanning secondary
// recording out to the worker pool:
//
// ┌────────────────────────────────────────────────────────────────────────────┐
// │ ensure surface ─> acquire ─> wait slot fences ─> lights + uniforms ─>      │
// │ record secondaries (workers) ─> assemble primary ─> submit compute ─>      │
// │ submit graphics ─> present ─> retire descriptor sets                       │
// └────────────────────────────────────────────────────────────────────────────┘

pub mod descriptor_cache;
pub mod frame_slots;
pub mod lights;
pub mod passes;
pub mod pipelines;
pub mod render_graph;
pub mod surface;
pub mod uniforms;
pub mod workers;

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use glam::Mat4;

use crate::config::Config;
use crate::error::{GpuError, GpuResult, RenderError};
use crate::gpu::{
    GpuCommand, GpuContext, PresentOutcome, QueueKind, Recording, Scoped, Submission,
};
use crate::scene::{
    DrawRequest, FrameCamera, MaterialHandle, MeshHandle, OverlayRequest, SceneResources,
    SkinnedState,
};
use descriptor_cache::{BindingTarget, DescriptorSetCache};
use lights::{LightDesc, LightRegistry};
use passes::{FrameSnapshot, RecordContext, RecordTask};
use pipelines::{PipelineId, PipelineLibrary};
use render_graph::{PassId, PASS_ORDER};
use surface::{SurfaceState, SwapchainLifecycle};
use uniforms::FrameUniforms;
use workers::WorkerPool;

/// Frame core settings, usually taken from `Config`.
#[derive(Debug, Clone)]
pub struct RendererSettings {
    /// Recording workers besides the driver thread.
    pub worker_threads: usize,
    pub light_capacity: usize,
    pub descriptor_sets_per_thread: u32,
    pub slow_fence_warn: Duration,
    pub clear_color: [f32; 4],
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            light_capacity: 1024,
            descriptor_sets_per_thread: 256,
            slow_fence_warn: Duration::from_millis(250),
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl RendererSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            worker_threads: config.renderer.resolved_worker_threads(),
            light_capacity: config.renderer.light_capacity,
            descriptor_sets_per_thread: config.renderer.descriptor_sets_per_thread,
            slow_fence_warn: Duration::from_millis(config.renderer.slow_fence_warn_ms),
            clear_color: config.graphics.clear_color,
        }
    }
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub presented: u64,
    /// Frames with nothing to present to (zero extent, surface still stale).
    pub skipped: u64,
    /// Frames abandoned after acquisition.
    pub dropped: u64,
    pub recreations: u64,
}

/// What happened to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { slot: usize },
    /// Submitted, but the surface went stale at present.
    SubmittedStale { slot: usize },
    Skipped,
    Dropped,
}

/// The frame driver.
///
/// Field order matters for teardown: workers are joined first, then the
/// surface resources go, then the session objects they were built from.
pub struct Renderer {
    workers: WorkerPool,
    lifecycle: SwapchainLifecycle,
    uniforms: Option<FrameUniforms>,
    attachment_sampler: Scoped<vk::Sampler>,
    ctx: Arc<RecordContext>,
    gpu: Arc<dyn GpuContext>,
    settings: RendererSettings,
    lights: LightRegistry,
    /// Identity of the scene/light bindings; bumped on restructure or reallocation.
    binding_generation: u64,
    frame: u64,
    stats: FrameStats,
    in_frame: bool,
    camera: FrameCamera,
    draws: Vec<DrawRequest>,
    overlays: Vec<OverlayRequest>,
}

impl Renderer {
    /// Builds the session objects and starts the workers.
    ///
    /// The swapchain itself is created lazily by the first `end_frame`.
    pub fn new(
        gpu: Arc<dyn GpuContext>,
        scene: Arc<dyn SceneResources>,
        extent: vk::Extent2D,
        settings: RendererSettings,
    ) -> GpuResult<Self> {
        let library = PipelineLibrary::new(&gpu)?;
        // Partition 0 belongs to the driver thread
        let cache = DescriptorSetCache::new(
            &gpu,
            settings.worker_threads + 1,
            settings.descriptor_sets_per_thread,
        )?;
        let ctx = Arc::new(RecordContext {
            gpu: Arc::clone(&gpu),
            cache,
            library,
            scene,
        });
        let workers = WorkerPool::new(&ctx, settings.worker_threads)?;
        let lifecycle = SwapchainLifecycle::new(&gpu, extent, settings.slow_fence_warn);
        let attachment_sampler = Scoped::new(&gpu, gpu.create_sampler()?);

        log::info!(
            "Renderer ready: {} workers, light capacity {}",
            settings.worker_threads,
            settings.light_capacity
        );

        Ok(Self {
            workers,
            lifecycle,
            uniforms: None,
            attachment_sampler,
            ctx,
            gpu,
            lights: LightRegistry::new(settings.light_capacity),
            settings,
            binding_generation: 0,
            frame: 0,
            stats: FrameStats::default(),
            in_frame: false,
            camera: FrameCamera::default(),
            draws: Vec::new(),
            overlays: Vec::new(),
        })
    }

    // =========================================================================
    // FRAME API
    // =========================================================================

    pub fn begin_frame(&mut self, camera: FrameCamera) {
        debug_assert!(!self.in_frame, "begin_frame called twice without end_frame");
        self.in_frame = true;
        self.camera = camera;
        self.draws.clear();
        self.overlays.clear();
    }

    pub fn submit_draw(&mut self, transform: Mat4, mesh: MeshHandle, material: MaterialHandle) {
        debug_assert!(self.in_frame, "submit_draw outside begin_frame/end_frame");
        self.draws.push(DrawRequest {
            transform,
            mesh,
            material,
            skinned: None,
        });
    }

    pub fn submit_skinned_draw(
        &mut self,
        transform: Mat4,
        mesh: MeshHandle,
        material: MaterialHandle,
        state: SkinnedState,
    ) {
        debug_assert!(self.in_frame, "submit_skinned_draw outside begin_frame/end_frame");
        self.draws.push(DrawRequest {
            transform,
            mesh,
            material,
            skinned: Some(state),
        });
    }

    /// Creates or updates the named light and makes it active.
    pub fn submit_light(&mut self, name: &str, desc: LightDesc) {
        self.lights.submit(name, desc);
    }

    pub fn submit_overlay(&mut self, transform: Mat4, material: MaterialHandle) {
        debug_assert!(self.in_frame, "submit_overlay outside begin_frame/end_frame");
        self.overlays.push(OverlayRequest {
            transform,
            material,
        });
    }

    /// Renders and presents everything submitted since `begin_frame`.
    ///
    /// Stale surfaces are handled here. Errors are either resource exhaustion,
    /// after which the application should shut down, or a failed GPU call.
    pub fn end_frame(&mut self) -> Result<FrameOutcome, RenderError> {
        debug_assert!(self.in_frame, "end_frame without begin_frame");
        self.in_frame = false;
        let draws = std::mem::take(&mut self.draws);
        let overlays = std::mem::take(&mut self.overlays);

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Live surface and an image to draw into
        // ─────────────────────────────────────────────────────────────────────
        let Some((slot, acquire)) = self.acquire_slot()? else {
            self.stats.skipped += 1;
            return Ok(FrameOutcome::Skipped);
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Wait until the slot's previous frame is done with it
        // ─────────────────────────────────────────────────────────────────────
        self.surface_resources_mut()?.slots.wait_and_reset(slot)?;

        // Past this point the slot's fences are unsignaled; every failure has to
        // go through abandon_frame so they get signaled again
        let mut compute_submitted = false;
        let submitted = self.record_and_submit(slot, acquire, draws, overlays, &mut compute_submitted);
        let (render_finished, drawing_fence) = match submitted {
            Ok(signals) => signals,
            Err(e) => return self.abandon_frame(slot, acquire, compute_submitted, e),
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 7: Present
        // ─────────────────────────────────────────────────────────────────────
        let slots = &mut self.surface_resources_mut()?.slots;
        slots.signal_on_submit(slot, &[render_finished], drawing_fence);
        let present_wait = slots.take_present_wait(slot);

        let outcome = match self.gpu.present(slot as u32, &present_wait) {
            Ok(PresentOutcome::Presented) => FrameOutcome::Presented { slot },
            Ok(PresentOutcome::Suboptimal) => {
                log::debug!("Swapchain suboptimal at present");
                self.lifecycle.invalidate();
                FrameOutcome::Presented { slot }
            }
            Ok(PresentOutcome::Stale) | Err(GpuError::SurfaceStale) => {
                log::debug!("Swapchain stale at present");
                self.lifecycle.invalidate();
                FrameOutcome::SubmittedStale { slot }
            }
            Err(e) => return Err(e.into()),
        };
        if matches!(outcome, FrameOutcome::Presented { .. }) {
            self.stats.presented += 1;
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 8: Hand back descriptor sets no frame in flight can use
        // ─────────────────────────────────────────────────────────────────────
        self.finish_frame()?;
        Ok(outcome)
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Window size changed; the swapchain is rebuilt on the next frame.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.lifecycle.resize(width, height);
    }

    pub fn lights(&self) -> &LightRegistry {
        &self.lights
    }

    pub fn lights_mut(&mut self) -> &mut LightRegistry {
        &mut self.lights
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Frames begun so far, also the stamp of the next frame.
    pub fn frame_index(&self) -> u64 {
        self.frame
    }

    pub fn descriptor_cache(&self) -> &DescriptorSetCache {
        &self.ctx.cache
    }

    pub fn surface(&self) -> &SwapchainLifecycle {
        &self.lifecycle
    }

    pub fn uniforms(&self) -> Option<&FrameUniforms> {
        self.uniforms.as_ref()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.worker_count()
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    /// Brings the surface back if needed, then acquires. A stale acquire
    /// triggers one recreation and a second try.
    fn acquire_slot(&mut self) -> GpuResult<Option<(usize, vk::Semaphore)>> {
        for _ in 0..2 {
            if !self.prepare_surface()? {
                return Ok(None);
            }
            match self.surface_resources_mut()?.slots.acquire() {
                Ok(Some(acquired)) => return Ok(Some(acquired)),
                Ok(None) | Err(GpuError::SurfaceStale) => {
                    log::debug!("Swapchain stale at acquire");
                    self.lifecycle.invalidate();
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Recreates the surface when invalidated and rebinds what depended on it.
    fn prepare_surface(&mut self) -> GpuResult<bool> {
        if self.lifecycle.state() == SurfaceState::Live {
            return Ok(true);
        }
        if !self.lifecycle.ensure_live(&self.ctx.library)? {
            return Ok(false);
        }
        if self.lifecycle.generation() > 1 {
            self.stats.recreations += 1;
        }
        self.ctx.cache.invalidate_where(self.frame, BindingTarget::is_surface);

        let slots = self.surface_resources()?.slots.len();
        if self.uniforms.as_ref().map(FrameUniforms::slots) != Some(slots) {
            // Old regions may still be bound by retired sets; the device is idle
            self.uniforms = Some(FrameUniforms::new(&self.gpu, slots, self.settings.light_capacity)?);
            self.binding_generation += 1;
            self.ctx
                .cache
                .invalidate_where(self.frame, BindingTarget::is_light_buffer);
        }
        Ok(true)
    }

    fn write_uniforms(&self, slot: usize) -> GpuResult<()> {
        let uniforms = self.uniforms.as_ref().ok_or(GpuError::SurfaceStale)?;
        uniforms.write(slot, &self.camera, &self.lights.pack())
    }

    fn snapshot(
        &self,
        slot: usize,
        draws: Vec<DrawRequest>,
        overlays: Vec<OverlayRequest>,
    ) -> GpuResult<FrameSnapshot> {
        let resources = self.surface_resources()?;
        let uniforms = self.uniforms.as_ref().ok_or(GpuError::SurfaceStale)?;
        let passes = PassId::ALL.map(|pass| resources.render_pass(pass));
        let framebuffers = PassId::ALL.map(|pass| resources.framebuffer(pass, slot));

        Ok(FrameSnapshot {
            frame: self.frame,
            slot,
            extent: resources.extent(),
            draws,
            overlays,
            lights: self
                .lights
                .active()
                .iter()
                .map(|light| (light.slot, light.kind))
                .collect(),
            scene_buffer: uniforms.scene.buffer(),
            light_buffer: uniforms.lights.buffer(),
            light_region_size: uniforms.lights.region_size(),
            dynamic_offsets: uniforms.dynamic_offsets(slot),
            light_generation: self.binding_generation,
            surface_generation: resources.generation,
            render_passes: passes,
            framebuffers,
            pipelines: PipelineId::ALL
                .iter()
                .map(|&id| resources.pipelines.get(id))
                .collect(),
            attachment_views: resources.attachment_views(),
            attachment_sampler: self.attachment_sampler.get(),
        })
    }

    /// Steps 3 to 6 of a frame: uniforms, recording and both submissions.
    ///
    /// Returns what the graphics submission signals. `compute_submitted` is
    /// set once the compute batch is on the queue.
    fn record_and_submit(
        &mut self,
        slot: usize,
        acquire: vk::Semaphore,
        draws: Vec<DrawRequest>,
        overlays: Vec<OverlayRequest>,
        compute_submitted: &mut bool,
    ) -> GpuResult<(vk::Semaphore, vk::Fence)> {
        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Lights and uniforms for this slot
        // ─────────────────────────────────────────────────────────────────────
        if self.lights.restructure() {
            self.binding_generation += 1;
            self.ctx
                .cache
                .invalidate_where(self.frame, BindingTarget::is_light_buffer);
        }
        self.write_uniforms(slot)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Parallel secondary recording, joined before assembly
        // ─────────────────────────────────────────────────────────────────────
        let snapshot = Arc::new(self.snapshot(slot, draws, overlays)?);
        let tasks = snapshot.tasks();
        let secondaries = self.workers.record_frame(&snapshot, &tasks)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Primaries, in declared graph order
        // ─────────────────────────────────────────────────────────────────────
        let commands = assemble_primary(&snapshot, &tasks, &secondaries, self.settings.clear_color);
        let resources = self.surface_resources()?;
        let frame_slot = resources.slots.slot(slot);
        let graphics_primary = frame_slot.graphics_primary();
        let compute_primary = frame_slot.compute_primary();
        let render_finished = frame_slot.render_finished();
        let compute_finished = frame_slot.compute_finished();
        let drawing_fence = frame_slot.drawing_fence();
        let compute_fence = frame_slot.compute_fence();

        self.gpu.record(compute_primary, Recording::Primary, &[])?;
        self.gpu.record(graphics_primary, Recording::Primary, &commands)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 6: Submit compute, then graphics waiting on it
        // ─────────────────────────────────────────────────────────────────────
        self.gpu.submit(
            QueueKind::Compute,
            &Submission {
                command_buffers: &[compute_primary],
                wait: &[],
                signal: &[compute_finished],
                fence: compute_fence,
            },
        )?;
        *compute_submitted = true;
        self.gpu.submit(
            QueueKind::Graphics,
            &Submission {
                command_buffers: &[graphics_primary],
                wait: &[
                    (acquire, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT),
                    (compute_finished, vk::PipelineStageFlags::VERTEX_INPUT),
                ],
                signal: &[render_finished],
                fence: drawing_fence,
            },
        )?;
        Ok((render_finished, drawing_fence))
    }

    /// Gives up on an acquired frame without breaking the slot.
    ///
    /// Empty submissions consume the acquire semaphore (and the compute
    /// semaphore, if compute work already went out) and signal whichever slot
    /// fences are still unsignaled. The acquired image is released by
    /// recreating the swapchain.
    fn abandon_frame(
        &mut self,
        slot: usize,
        acquire: vk::Semaphore,
        compute_submitted: bool,
        cause: GpuError,
    ) -> Result<FrameOutcome, RenderError> {
        log::error!("Frame {} dropped: {}", self.frame, cause);
        self.stats.dropped += 1;

        let frame_slot = self.surface_resources()?.slots.slot(slot);
        let drawing_fence = frame_slot.drawing_fence();
        let compute_fence = frame_slot.compute_fence();
        let compute_finished = frame_slot.compute_finished();

        let mut wait = vec![(acquire, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)];
        if compute_submitted {
            wait.push((compute_finished, vk::PipelineStageFlags::VERTEX_INPUT));
        } else {
            self.gpu.submit(
                QueueKind::Compute,
                &Submission {
                    command_buffers: &[],
                    wait: &[],
                    signal: &[],
                    fence: compute_fence,
                },
            )?;
        }
        self.gpu.submit(
            QueueKind::Graphics,
            &Submission {
                command_buffers: &[],
                wait: &wait,
                signal: &[],
                fence: drawing_fence,
            },
        )?;
        self.lifecycle.invalidate();
        self.finish_frame()?;

        if cause.is_exhaustion() {
            Err(RenderError::ResourceExhausted(cause))
        } else {
            Ok(FrameOutcome::Dropped)
        }
    }

    fn finish_frame(&mut self) -> GpuResult<()> {
        let in_flight = self
            .lifecycle
            .resources()
            .map(|r| r.slots.len() as u64)
            .unwrap_or(0);
        self.frame += 1;
        let freed = self.ctx.cache.collect(self.frame, in_flight)?;
        if freed > 0 {
            log::trace!("Freed {} retired descriptor sets", freed);
        }
        Ok(())
    }

    fn surface_resources(&self) -> GpuResult<&surface::SurfaceResources> {
        self.lifecycle.resources().ok_or(GpuError::SurfaceStale)
    }

    fn surface_resources_mut(&mut self) -> GpuResult<&mut surface::SurfaceResources> {
        self.lifecycle.resources_mut().ok_or(GpuError::SurfaceStale)
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Shutting down renderer after {} frames", self.frame);
        if let Err(e) = self.gpu.wait_idle() {
            log::error!("wait_idle during renderer shutdown: {}", e);
        }
    }
}

/// Primary command stream for `tasks` and their recorded `secondaries`.
///
/// Walks PASS_ORDER: a new pass begins its render pass, a further subpass of
/// the same pass advances with NextSubpass, and each step executes the
/// secondaries of its tasks in task order.
pub fn assemble_primary(
    snapshot: &FrameSnapshot,
    tasks: &[RecordTask],
    secondaries: &[vk::CommandBuffer],
    clear_color: [f32; 4],
) -> Vec<GpuCommand> {
    debug_assert_eq!(tasks.len(), secondaries.len());
    let mut commands = Vec::new();
    let mut open: Option<PassId> = None;

    for step in PASS_ORDER {
        if open == Some(step.pass) {
            commands.push(GpuCommand::NextSubpass);
        } else {
            if open.is_some() {
                commands.push(GpuCommand::EndRenderPass);
            }
            commands.push(GpuCommand::BeginRenderPass {
                render_pass: snapshot.render_pass(step.pass),
                framebuffer: snapshot.framebuffer(step.pass),
                extent: snapshot.extent,
                clear_values: step.pass.clear_values(clear_color),
            });
            open = Some(step.pass);
        }

        let executed: Vec<vk::CommandBuffer> = tasks
            .iter()
            .zip(secondaries)
            .filter(|(task, _)| task.location() == (step.pass, step.subpass))
            .map(|(_, &buffer)| buffer)
            .collect();
        if !executed.is_empty() {
            commands.push(GpuCommand::ExecuteCommands(executed));
        }
    }
    if open.is_some() {
        commands.push(GpuCommand::EndRenderPass);
    }
    commands
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::lights::LightKind;
    use ash::vk::Handle;

    fn snapshot(lights: Vec<(usize, LightKind)>) -> FrameSnapshot {
        FrameSnapshot {
            frame: 0,
            slot: 0,
            extent: vk::Extent2D {
                width: 64,
                height: 64,
            },
            draws: Vec::new(),
            overlays: Vec::new(),
            lights,
            scene_buffer: vk::Buffer::null(),
            light_buffer: vk::Buffer::null(),
            light_region_size: 0,
            dynamic_offsets: [0; 2],
            light_generation: 0,
            surface_generation: 1,
            render_passes: [1, 2, 3].map(vk::RenderPass::from_raw),
            framebuffers: [4, 5, 6].map(vk::Framebuffer::from_raw),
            pipelines: Vec::new(),
            attachment_views: Vec::new(),
            attachment_sampler: vk::Sampler::null(),
        }
    }

    #[test]
    fn primary_walks_the_graph() {
        let snapshot = snapshot(vec![(0, LightKind::Ambient), (1, LightKind::Point)]);
        let tasks = snapshot.tasks();
        let secondaries: Vec<vk::CommandBuffer> = (100..100 + tasks.len() as u64)
            .map(vk::CommandBuffer::from_raw)
            .collect();

        let commands = assemble_primary(&snapshot, &tasks, &secondaries, [0.0; 4]);
        let shape: Vec<&str> = commands
            .iter()
            .map(|c| match c {
                GpuCommand::BeginRenderPass { .. } => "begin",
                GpuCommand::NextSubpass => "next",
                GpuCommand::EndRenderPass => "end",
                GpuCommand::ExecuteCommands(_) => "exec",
                _ => "other",
            })
            .collect();
        assert_eq!(
            shape,
            [
                "begin", "exec", "end", // g-buffer
                "begin", "exec", "end", // occlusion
                "begin", "exec", "next", "exec", "next", "exec", "next", "exec", "end",
            ]
        );

        // Both lights share the lighting subpass, in buffer order
        let lighting = commands
            .iter()
            .filter_map(|c| match c {
                GpuCommand::ExecuteCommands(buffers) => Some(buffers.clone()),
                _ => None,
            })
            .nth(3)
            .unwrap();
        assert_eq!(lighting, secondaries[4..6].to_vec());
    }

    #[test]
    fn executed_buffers_follow_task_order() {
        let snapshot = snapshot(vec![(0, LightKind::Spot)]);
        let tasks = snapshot.tasks();
        let secondaries: Vec<vk::CommandBuffer> = (1..=tasks.len() as u64)
            .map(vk::CommandBuffer::from_raw)
            .collect();
        let executed: Vec<vk::CommandBuffer> = assemble_primary(&snapshot, &tasks, &secondaries, [0.0; 4])
            .into_iter()
            .filter_map(|c| match c {
                GpuCommand::ExecuteCommands(buffers) => Some(buffers),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(executed, secondaries);
    }

    #[test]
    fn settings_follow_config() {
        let config = Config::parse(
            r#"
            [renderer]
            worker_threads = 3
            light_capacity = 16
            slow_fence_warn_ms = 10
            "#,
        )
        .unwrap();
        let settings = RendererSettings::from_config(&config);
        assert_eq!(settings.worker_threads, 3);
        assert_eq!(settings.light_capacity, 16);
        assert_eq!(settings.slow_fence_warn, Duration::from_millis(10));
    }
}
