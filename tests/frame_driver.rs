// End-to-end frame driver behaviour on the headless device.

mod common;

use ash::vk;
use deferred_renderer::backend::{Completion, Fault, HeadlessContext};
use deferred_renderer::gpu::{GpuCommand, QueueKind};
use deferred_renderer::renderer::lights::GpuLight;
use deferred_renderer::renderer::passes::DrawPush;
use deferred_renderer::renderer::render_graph::PassId;
use deferred_renderer::scene::SkeletonHandle;
use deferred_renderer::{
    FrameCamera, FrameOutcome, LightDesc, LightKind, MeshHandle, RenderError, RendererSettings,
    SkinnedState,
};
use glam::{Mat4, Vec3};

use common::{extent, Harness, BROKEN_MESH, MATERIAL, MESH, SKELETON};

/// Commands of the graphics primary submitted last.
fn last_primary(gpu: &HeadlessContext) -> Vec<GpuCommand> {
    let submission = gpu
        .submissions()
        .into_iter()
        .filter(|s| s.queue == QueueKind::Graphics)
        .last()
        .unwrap();
    gpu.commands(submission.command_buffers[0])
}

/// Secondaries executed by `primary`, grouped per subpass.
fn executed(primary: &[GpuCommand]) -> Vec<Vec<vk::CommandBuffer>> {
    primary
        .iter()
        .filter_map(|c| match c {
            GpuCommand::ExecuteCommands(buffers) => Some(buffers.clone()),
            _ => None,
        })
        .collect()
}

/// Secondaries executed in each subpass of the last render pass begun.
fn main_pass_subpasses(primary: &[GpuCommand]) -> Vec<Vec<vk::CommandBuffer>> {
    let begin = primary
        .iter()
        .rposition(|c| matches!(c, GpuCommand::BeginRenderPass { .. }))
        .unwrap();
    let mut subpasses = vec![Vec::new()];
    for command in &primary[begin + 1..] {
        match command {
            GpuCommand::NextSubpass => subpasses.push(Vec::new()),
            GpuCommand::ExecuteCommands(buffers) => {
                subpasses.last_mut().unwrap().extend(buffers.iter().copied())
            }
            GpuCommand::EndRenderPass => break,
            _ => {}
        }
    }
    subpasses
}

fn light_kinds(gpu: &HeadlessContext, buffer: vk::Buffer, offset: usize, count: usize) -> Vec<u32> {
    let bytes = gpu.buffer_contents(buffer);
    let size = std::mem::size_of::<GpuLight>();
    (0..count)
        .map(|i| {
            let start = offset + i * size;
            bytemuck::pod_read_unaligned::<GpuLight>(&bytes[start..start + size]).kind
        })
        .collect()
}

#[test]
fn frames_cycle_through_slots_and_present() {
    let mut h = Harness::new(3, Completion::Immediate);
    let outcomes: Vec<FrameOutcome> = (0..6).map(|_| h.frame()).collect();

    let slots: Vec<usize> = outcomes
        .iter()
        .map(|o| match o {
            FrameOutcome::Presented { slot } => *slot,
            other => panic!("unexpected outcome {other:?}"),
        })
        .collect();
    assert_eq!(slots, [0, 1, 2, 0, 1, 2]);
    assert_eq!(h.gpu.presented(), [0, 1, 2, 0, 1, 2]);
    assert_eq!(h.renderer.stats().presented, 6);
    assert_eq!(h.renderer.frame_index(), 6);
    assert!(h.gpu.violations().is_empty(), "{:?}", h.gpu.violations());
}

#[test]
fn slot_waits_on_its_own_fences() {
    let mut h = Harness::new(2, Completion::Immediate);
    for _ in 0..4 {
        h.frame();
    }
    // Two fences per frame: drawing and compute of the slot being reused
    let waits = h.gpu.fence_waits();
    assert_eq!(waits.len(), 8);
    assert_eq!(waits[0..2], waits[4..6]);
    assert_eq!(waits[2..4], waits[6..8]);
    assert_ne!(waits[0..2], waits[2..4]);
}

#[test]
fn compute_is_submitted_before_the_graphics_that_waits_on_it() {
    let mut h = Harness::new(2, Completion::Immediate);
    h.frame();

    let submissions = h.gpu.submissions();
    assert_eq!(submissions.len(), 2);
    assert_eq!(submissions[0].queue, QueueKind::Compute);
    assert_eq!(submissions[1].queue, QueueKind::Graphics);
    assert!(submissions[1].wait.contains(&submissions[0].signal[0]));
    assert_ne!(submissions[0].fence, submissions[1].fence);
}

#[test]
fn in_flight_slots_are_not_touched_until_their_work_completes() {
    let mut h = Harness::new(3, Completion::Manual);
    for _ in 0..3 {
        h.frame();
    }
    // Compute and graphics of every slot still executing
    assert_eq!(h.gpu.in_flight(), 6);

    // Finish frame 0 only; slot 0 can be recorded again
    assert!(h.gpu.complete_next());
    assert!(h.gpu.complete_next());
    assert_eq!(h.frame(), FrameOutcome::Presented { slot: 0 });
    assert_eq!(h.gpu.in_flight(), 6);

    h.gpu.complete_all();
    assert!(h.gpu.violations().is_empty(), "{:?}", h.gpu.violations());
}

#[test]
fn primary_follows_the_pass_order() {
    let mut h = Harness::new(2, Completion::Immediate);
    h.frame();

    let resources = h.renderer.surface().resources().unwrap();
    let expected: Vec<vk::RenderPass> = PassId::ALL.iter().map(|&p| resources.render_pass(p)).collect();
    let begun: Vec<vk::RenderPass> = last_primary(&h.gpu)
        .iter()
        .filter_map(|c| match c {
            GpuCommand::BeginRenderPass { render_pass, .. } => Some(*render_pass),
            _ => None,
        })
        .collect();
    assert_eq!(begun, expected);
}

#[test]
fn every_active_light_gets_a_lighting_secondary() {
    let mut h = Harness::new(2, Completion::Immediate);
    h.renderer.begin_frame(FrameCamera::default());
    h.renderer.submit_light("ambient", LightDesc::ambient(Vec3::splat(0.1)));
    h.renderer.submit_light("lamp", LightDesc::point(Vec3::Y, Vec3::ONE, 5.0));
    h.renderer.submit_light("sun", LightDesc::directional(Vec3::NEG_Y, Vec3::ONE));
    h.renderer.submit_draw(Mat4::IDENTITY, MESH, MATERIAL);
    h.renderer.end_frame().unwrap();

    // g-buffer, occlusion, blur, lighting, ui, composite
    let groups = executed(&last_primary(&h.gpu));
    assert_eq!(groups.len(), 6);
    assert_eq!(groups[3].len(), 3);
    assert!(h.gpu.violations().is_empty(), "{:?}", h.gpu.violations());
}

#[test]
fn only_volume_lights_clear_stencil_and_draw_shadows() {
    let mut h = Harness::new(2, Completion::Immediate);
    h.renderer.begin_frame(FrameCamera::default());
    h.renderer.submit_light("ambient", LightDesc::ambient(Vec3::splat(0.1)));
    h.renderer.submit_light("sun", LightDesc::directional(Vec3::NEG_Y, Vec3::ONE));
    h.renderer.submit_light("lamp", LightDesc::point(Vec3::Y, Vec3::ONE, 5.0));
    h.renderer.submit_draw(Mat4::IDENTITY, MESH, MATERIAL);
    h.renderer.end_frame().unwrap();

    let lighting = &main_pass_subpasses(&last_primary(&h.gpu))[1];
    assert_eq!(lighting.len(), 3);
    let per_light: Vec<(usize, Vec<u32>)> = lighting
        .iter()
        .map(|&buffer| {
            let commands = h.gpu.commands(buffer);
            let clears = commands
                .iter()
                .filter(|c| matches!(c, GpuCommand::ClearStencil { value: 0, .. }))
                .count();
            let shadow_draws = commands
                .iter()
                .filter_map(|c| match c {
                    GpuCommand::DrawIndexed { index_count, .. } => Some(*index_count),
                    _ => None,
                })
                .collect();
            (clears, shadow_draws)
        })
        .collect();
    // The test mesh carries 6 shadow indices
    assert_eq!(per_light, [(0, vec![]), (0, vec![]), (1, vec![6])]);

    // Stencil is cleared before the volumes are drawn into it
    let lamp = h.gpu.commands(lighting[2]);
    let clear = lamp
        .iter()
        .position(|c| matches!(c, GpuCommand::ClearStencil { .. }))
        .unwrap();
    let volume = lamp
        .iter()
        .position(|c| matches!(c, GpuCommand::DrawIndexed { .. }))
        .unwrap();
    assert!(clear < volume);
}

#[test]
fn frame_without_lights_still_composites() {
    let mut h = Harness::new(2, Completion::Immediate);
    assert!(matches!(h.frame(), FrameOutcome::Presented { .. }));

    // blur, lighting, ui, composite
    let subpasses = main_pass_subpasses(&last_primary(&h.gpu));
    assert_eq!(subpasses.len(), 4);
    assert_eq!(subpasses[0].len(), 1);
    assert!(subpasses[1].is_empty());
    assert_eq!(subpasses[2].len(), 1);
    assert_eq!(subpasses[3].len(), 1);

    let composite = h.gpu.commands(subpasses[3][0]);
    assert!(composite
        .iter()
        .any(|c| matches!(c, GpuCommand::Draw { vertex_count: 3, .. })));
    assert!(h.gpu.violations().is_empty(), "{:?}", h.gpu.violations());
}

#[test]
fn removing_a_light_packs_the_buffer_densely() {
    let mut h = Harness::new(2, Completion::Immediate);
    h.renderer.submit_light("a", LightDesc::ambient(Vec3::ONE));
    h.renderer.submit_light("b", LightDesc::point(Vec3::ZERO, Vec3::ONE, 3.0));
    h.renderer.submit_light(
        "c",
        LightDesc::spot(Vec3::Y, Vec3::NEG_Y, Vec3::ONE, 4.0, 0.2, 0.4),
    );
    h.frame();
    assert_eq!(h.renderer.lights().get("c").unwrap().slot, Some(2));

    assert!(h.renderer.lights_mut().remove("b"));
    let FrameOutcome::Presented { slot } = h.frame() else {
        panic!("frame not presented");
    };
    assert_eq!(h.renderer.lights().get("c").unwrap().slot, Some(1));

    let uniforms = h.renderer.uniforms().unwrap();
    let offset = uniforms.lights.offset(slot) as usize;
    let kinds = light_kinds(&h.gpu, uniforms.lights.buffer(), offset, 2);
    assert_eq!(kinds, [LightKind::Ambient as u32, LightKind::Spot as u32]);

    let groups = executed(&last_primary(&h.gpu));
    assert_eq!(groups[3].len(), 2);
}

#[test]
fn light_toggle_rebinds_and_retired_sets_are_freed_later() {
    let mut h = Harness::new(2, Completion::Immediate);
    h.renderer.submit_light("lamp", LightDesc::point(Vec3::ZERO, Vec3::ONE, 3.0));
    h.frame();
    h.frame();
    let steady = h.renderer.descriptor_cache().allocations();

    h.renderer.lights_mut().set_active("lamp", false);
    h.frame();
    assert!(h.renderer.descriptor_cache().allocations() > steady);
    assert!(h.renderer.descriptor_cache().retired() > 0);

    for _ in 0..3 {
        h.frame();
    }
    assert_eq!(h.renderer.descriptor_cache().retired(), 0);
    assert!(h.gpu.violations().is_empty(), "{:?}", h.gpu.violations());
}

#[test]
fn descriptor_sets_are_reused_across_frames() {
    let mut h = Harness::new(3, Completion::Immediate);
    h.frame();
    h.frame();
    let allocated = h.renderer.descriptor_cache().allocations();
    for _ in 0..5 {
        h.frame();
    }
    assert_eq!(h.renderer.descriptor_cache().allocations(), allocated);
}

#[test]
fn resize_rebuilds_surface_with_new_image_count() {
    let mut h = Harness::new(3, Completion::Immediate);
    h.frame();
    assert_eq!(h.renderer.surface().resources().unwrap().slots.len(), 3);

    h.gpu.set_image_count(2);
    h.gpu.resize_surface(extent(800, 600));
    h.renderer.resize(800, 600);
    assert_eq!(h.frame(), FrameOutcome::Presented { slot: 0 });

    let resources = h.renderer.surface().resources().unwrap();
    assert_eq!(resources.slots.len(), 2);
    assert_eq!(resources.extent(), extent(800, 600));
    assert_eq!(h.renderer.uniforms().unwrap().slots(), 2);
    assert_eq!(h.renderer.stats().recreations, 1);
    assert!(h.gpu.violations().is_empty(), "{:?}", h.gpu.violations());
}

#[test]
fn stale_surface_is_recreated_within_the_frame() {
    let mut h = Harness::new(2, Completion::Immediate);
    h.frame();
    h.gpu.invalidate_surface();

    assert_eq!(h.frame(), FrameOutcome::Presented { slot: 0 });
    assert_eq!(h.renderer.stats().recreations, 1);
    assert_eq!(h.renderer.surface().generation(), 2);

    // The second frame waited on fresh fences, never on the destroyed ones
    let waits = h.gpu.fence_waits();
    assert_eq!(waits.len(), 4);
    assert!(!waits[2..].contains(&waits[0]));
    assert!(!waits[2..].contains(&waits[1]));
    assert!(!h.gpu.is_live(waits[0]));
    assert!(h.gpu.violations().is_empty(), "{:?}", h.gpu.violations());
}

#[test]
fn minimized_window_skips_until_restored() {
    let mut h = Harness::new(2, Completion::Immediate);
    h.frame();

    h.gpu.resize_surface(extent(0, 0));
    h.renderer.resize(0, 0);
    assert_eq!(h.frame(), FrameOutcome::Skipped);
    assert_eq!(h.frame(), FrameOutcome::Skipped);
    assert_eq!(h.renderer.stats().skipped, 2);
    let presents = h.gpu.presented().len();

    h.gpu.resize_surface(extent(640, 480));
    h.renderer.resize(640, 480);
    assert!(matches!(h.frame(), FrameOutcome::Presented { .. }));
    assert_eq!(h.gpu.presented().len(), presents + 1);
    assert!(h.gpu.violations().is_empty(), "{:?}", h.gpu.violations());
}

#[test]
fn unknown_mesh_is_skipped_without_failing_the_frame() {
    let mut h = Harness::new(2, Completion::Immediate);
    h.renderer.begin_frame(FrameCamera::default());
    h.renderer.submit_draw(Mat4::IDENTITY, MeshHandle(42), MATERIAL);
    assert!(matches!(h.renderer.end_frame().unwrap(), FrameOutcome::Presented { .. }));

    let gbuffer = &executed(&last_primary(&h.gpu))[0];
    let draws = gbuffer
        .iter()
        .flat_map(|&buffer| h.gpu.commands(buffer))
        .filter(|c| matches!(c, GpuCommand::DrawIndexed { .. }))
        .count();
    assert_eq!(draws, 0);
}

/// Commands of every secondary the last primary executed.
fn secondary_commands(gpu: &HeadlessContext) -> Vec<GpuCommand> {
    executed(&last_primary(gpu))
        .into_iter()
        .flatten()
        .flat_map(|buffer| gpu.commands(buffer))
        .collect()
}

fn skinned(skeleton: SkeletonHandle, time: f32) -> SkinnedState {
    SkinnedState {
        skeleton,
        animation: 0,
        time,
        looping: true,
    }
}

#[test]
fn skinned_draw_pushes_its_animation_tick() {
    let mut h = Harness::new(2, Completion::Immediate);
    h.renderer.begin_frame(FrameCamera::default());
    h.renderer
        .submit_skinned_draw(Mat4::IDENTITY, MESH, MATERIAL, skinned(SKELETON, 3.0));
    h.renderer.end_frame().unwrap();

    let gbuffer = &executed(&last_primary(&h.gpu))[0];
    let pushes: Vec<DrawPush> = gbuffer
        .iter()
        .flat_map(|&buffer| h.gpu.commands(buffer))
        .filter_map(|c| match c {
            GpuCommand::PushConstants { data, .. } => Some(bytemuck::pod_read_unaligned(&data)),
            _ => None,
        })
        .collect();
    // 30 ticks wrap to 5 in a 25 tick loop
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].tick, 5.0);
    assert!(h.gpu.violations().is_empty(), "{:?}", h.gpu.violations());
}

#[test]
fn skinned_draw_without_bones_is_skipped() {
    let mut h = Harness::new(2, Completion::Immediate);
    h.renderer.begin_frame(FrameCamera::default());
    h.renderer
        .submit_skinned_draw(Mat4::IDENTITY, MESH, MATERIAL, skinned(SkeletonHandle(7), 1.0));
    assert!(matches!(h.renderer.end_frame().unwrap(), FrameOutcome::Presented { .. }));

    let draws = secondary_commands(&h.gpu)
        .iter()
        .filter(|c| matches!(c, GpuCommand::DrawIndexed { .. }))
        .count();
    assert_eq!(draws, 0);
}

#[test]
fn overlays_are_drawn_only_when_submitted() {
    let quads = |gpu: &HeadlessContext| {
        secondary_commands(gpu)
            .iter()
            .filter(|c| matches!(c, GpuCommand::Draw { vertex_count: 6, .. }))
            .count()
    };

    let mut h = Harness::new(2, Completion::Immediate);
    h.renderer.begin_frame(FrameCamera::default());
    h.renderer.submit_overlay(Mat4::from_scale(Vec3::splat(0.5)), MATERIAL);
    h.renderer.submit_overlay(Mat4::IDENTITY, MATERIAL);
    h.renderer.end_frame().unwrap();
    assert_eq!(quads(&h.gpu), 2);

    h.frame();
    assert_eq!(quads(&h.gpu), 0);
}

#[test]
fn exhausted_descriptor_pool_is_fatal() {
    let settings = RendererSettings {
        worker_threads: 0,
        descriptor_sets_per_thread: 1,
        ..RendererSettings::default()
    };
    let mut h = Harness::with_settings(2, Completion::Immediate, settings);
    h.renderer.begin_frame(FrameCamera::default());
    h.renderer.submit_draw(Mat4::IDENTITY, MESH, MATERIAL);

    let err = h.renderer.end_frame().unwrap_err();
    assert!(matches!(err, RenderError::ResourceExhausted(_)), "{err}");
    assert_eq!(h.renderer.stats().dropped, 1);
    assert!(h.gpu.presented().is_empty());
}

#[test]
fn failed_submit_drops_the_frame_and_the_slot_stays_usable() {
    let mut h = Harness::new(2, Completion::Immediate);
    h.gpu.inject(Fault::Submit(QueueKind::Graphics), vk::Result::ERROR_UNKNOWN);

    assert_eq!(h.frame(), FrameOutcome::Dropped);
    assert_eq!(h.renderer.stats().dropped, 1);
    assert!(h.gpu.presented().is_empty());

    // Every slot comes around again without blocking on its fences
    for _ in 0..4 {
        assert!(matches!(h.frame(), FrameOutcome::Presented { .. }));
    }
    assert_eq!(h.gpu.presented().len(), 4);
    assert!(h.gpu.violations().is_empty(), "{:?}", h.gpu.violations());
}

#[test]
fn dropped_frame_after_compute_still_consumes_its_signal() {
    let mut h = Harness::new(2, Completion::Immediate);
    h.gpu.inject(Fault::Submit(QueueKind::Graphics), vk::Result::ERROR_UNKNOWN);
    assert_eq!(h.frame(), FrameOutcome::Dropped);

    let submissions = h.gpu.submissions();
    assert_eq!(submissions.len(), 2);
    let (compute, graphics) = (&submissions[0], &submissions[1]);
    assert_eq!(compute.queue, QueueKind::Compute);
    assert_eq!(graphics.queue, QueueKind::Graphics);
    assert!(graphics.command_buffers.is_empty());
    assert!(graphics.wait.contains(&compute.signal[0]));
}

#[test]
fn out_of_memory_while_recording_is_fatal() {
    let mut h = Harness::new(2, Completion::Immediate);
    h.gpu.inject(Fault::PrimaryRecord, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
    h.renderer.begin_frame(FrameCamera::default());
    h.renderer.submit_draw(Mat4::IDENTITY, MESH, MATERIAL);

    let err = h.renderer.end_frame().unwrap_err();
    assert!(matches!(err, RenderError::ResourceExhausted(_)), "{err}");
    assert_eq!(h.renderer.stats().dropped, 1);

    // Both fences of the slot were handed back through empty submissions
    let submissions = h.gpu.submissions();
    assert_eq!(submissions.len(), 2);
    assert!(submissions.iter().all(|s| s.command_buffers.is_empty()));
    assert!(submissions.iter().all(|s| h.gpu.is_signaled(s.fence)));
}

#[test]
fn failing_worker_drops_the_frame() {
    let mut h = Harness::new(2, Completion::Immediate);
    h.gpu.inject(Fault::RecordOnThread("record-1".into()), vk::Result::ERROR_UNKNOWN);

    assert_eq!(h.frame(), FrameOutcome::Dropped);
    assert_eq!(h.renderer.stats().dropped, 1);

    h.gpu.clear_faults();
    assert!(matches!(h.frame(), FrameOutcome::Presented { .. }));
    assert!(matches!(h.frame(), FrameOutcome::Presented { .. }));
    assert!(h.gpu.violations().is_empty(), "{:?}", h.gpu.violations());
}

#[test]
fn panicking_worker_drops_the_frame() {
    let mut h = Harness::new(2, Completion::Immediate);
    h.renderer.begin_frame(FrameCamera::default());
    h.renderer.submit_draw(Mat4::IDENTITY, BROKEN_MESH, MATERIAL);
    assert_eq!(h.renderer.end_frame().unwrap(), FrameOutcome::Dropped);
    assert_eq!(h.renderer.stats().dropped, 1);

    assert!(matches!(h.frame(), FrameOutcome::Presented { .. }));
    assert!(h.gpu.violations().is_empty(), "{:?}", h.gpu.violations());
}
