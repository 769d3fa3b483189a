// Swapchain lifecycle
//
//   Live --(stale acquire/present, resize)--> Invalidated
//   Invalidated --(ensure_live)--> Recreating --> Live
//                                           \--> Invalidated (zero extent)
//
// Everything whose size or count follows the swapchain is owned by
// SurfaceResources and torn down as one unit after the device is drained.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;

use super::frame_slots::FrameSlotSet;
use super::pipelines::{PipelineLibrary, PipelineSet};
use super::render_graph::{AttachmentRole, PassId};
use crate::error::{GpuError, GpuResult};
use crate::gpu::{GpuContext, GpuImage, Scoped, SwapchainInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceState {
    Live,
    Invalidated,
    Recreating,
}

/// Size-dependent resources of one swapchain generation.
///
/// Fields drop top to bottom: users before what they reference.
pub struct SurfaceResources {
    pub slots: FrameSlotSet,
    pub pipelines: PipelineSet,
    main_framebuffers: Vec<Scoped<vk::Framebuffer>>,
    gbuffer_framebuffer: Scoped<vk::Framebuffer>,
    occlusion_framebuffer: Scoped<vk::Framebuffer>,
    render_passes: Vec<(PassId, Scoped<vk::RenderPass>)>,
    attachments: Vec<(AttachmentRole, Scoped<GpuImage>)>,
    pub info: SwapchainInfo,
    pub generation: u64,
}

impl SurfaceResources {
    fn build(
        gpu: &Arc<dyn GpuContext>,
        library: &PipelineLibrary,
        info: SwapchainInfo,
        generation: u64,
        slow_wait: Duration,
    ) -> GpuResult<Self> {
        let depth_format = gpu.limits().depth_stencil_format;
        let extent = info.extent;

        let attachments = AttachmentRole::OFFSCREEN
            .iter()
            .map(|&role| {
                let image = gpu.create_image(&role.image_desc(depth_format, extent))?;
                Ok((role, Scoped::new(gpu, image)))
            })
            .collect::<GpuResult<Vec<_>>>()?;

        let render_passes = PassId::ALL
            .iter()
            .map(|&pass| {
                let render_pass = gpu.create_render_pass(&pass.desc(depth_format, info.format))?;
                Ok((pass, Scoped::new(gpu, render_pass)))
            })
            .collect::<GpuResult<Vec<_>>>()?;

        let find_pass = |pass: PassId| {
            render_passes
                .iter()
                .find(|(p, _)| *p == pass)
                .map(|(_, rp)| rp.get())
                .unwrap_or_else(vk::RenderPass::null)
        };
        let view = |role: AttachmentRole| {
            attachments
                .iter()
                .find(|(r, _)| *r == role)
                .map(|(_, image)| image.get().view)
                .unwrap_or_else(vk::ImageView::null)
        };
        let framebuffer = |pass: PassId, final_view: vk::ImageView| -> GpuResult<Scoped<vk::Framebuffer>> {
            let views: Vec<vk::ImageView> = pass
                .attachments()
                .iter()
                .map(|&role| match role {
                    AttachmentRole::FinalColor => final_view,
                    role => view(role),
                })
                .collect();
            Ok(Scoped::new(gpu, gpu.create_framebuffer(find_pass(pass), &views, extent)?))
        };

        let gbuffer_framebuffer = framebuffer(PassId::GBuffer, vk::ImageView::null())?;
        let occlusion_framebuffer = framebuffer(PassId::Occlusion, vk::ImageView::null())?;
        let main_framebuffers = info
            .image_views
            .iter()
            .map(|&image_view| framebuffer(PassId::Main, image_view))
            .collect::<GpuResult<Vec<_>>>()?;

        let pipelines = library.build(find_pass, extent, generation)?;
        let slots = FrameSlotSet::new(gpu, info.image_views.len(), slow_wait)?;

        Ok(Self {
            slots,
            pipelines,
            main_framebuffers,
            gbuffer_framebuffer,
            occlusion_framebuffer,
            render_passes,
            attachments,
            info,
            generation,
        })
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.info.extent
    }

    pub fn image_count(&self) -> usize {
        self.info.image_views.len()
    }

    pub fn render_pass(&self, pass: PassId) -> vk::RenderPass {
        self.render_passes
            .iter()
            .find(|(p, _)| *p == pass)
            .map(|(_, rp)| rp.get())
            .unwrap_or_else(vk::RenderPass::null)
    }

    /// Framebuffer of `pass`; the main pass has one per swapchain image.
    pub fn framebuffer(&self, pass: PassId, image: usize) -> vk::Framebuffer {
        match pass {
            PassId::GBuffer => self.gbuffer_framebuffer.get(),
            PassId::Occlusion => self.occlusion_framebuffer.get(),
            PassId::Main => self
                .main_framebuffers
                .get(image)
                .map(Scoped::get)
                .unwrap_or_else(vk::Framebuffer::null),
        }
    }

    pub fn attachment_views(&self) -> Vec<(AttachmentRole, vk::ImageView)> {
        self.attachments
            .iter()
            .map(|(role, image)| (*role, image.get().view))
            .collect()
    }
}

/// Owns the swapchain and everything sized by it.
pub struct SwapchainLifecycle {
    gpu: Arc<dyn GpuContext>,
    state: SurfaceState,
    requested_extent: vk::Extent2D,
    resources: Option<SurfaceResources>,
    generation: u64,
    slow_wait: Duration,
}

impl SwapchainLifecycle {
    /// Starts invalidated; the first `ensure_live` builds everything.
    pub fn new(gpu: &Arc<dyn GpuContext>, extent: vk::Extent2D, slow_wait: Duration) -> Self {
        Self {
            gpu: Arc::clone(gpu),
            state: SurfaceState::Invalidated,
            requested_extent: extent,
            resources: None,
            generation: 0,
            slow_wait,
        }
    }

    pub fn state(&self) -> SurfaceState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn resources(&self) -> Option<&SurfaceResources> {
        self.resources.as_ref()
    }

    pub fn resources_mut(&mut self) -> Option<&mut SurfaceResources> {
        self.resources.as_mut()
    }

    /// Marks the swapchain stale; recreation happens on the next frame.
    pub fn invalidate(&mut self) {
        if self.state == SurfaceState::Live {
            log::debug!("Swapchain invalidated (generation {})", self.generation);
        }
        self.state = SurfaceState::Invalidated;
    }

    /// Window size changed.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.requested_extent = vk::Extent2D { width, height };
        self.invalidate();
    }

    /// Rebuilds the swapchain if needed.
    ///
    /// Returns `Ok(false)` while the surface has no area; nothing is rebuilt
    /// and the caller skips the frame.
    pub fn ensure_live(&mut self, library: &PipelineLibrary) -> GpuResult<bool> {
        if self.state == SurfaceState::Live {
            return Ok(true);
        }
        self.state = SurfaceState::Recreating;

        // Nothing may still reference what is about to be destroyed
        self.gpu.wait_idle()?;
        self.resources = None;

        let info = match self.gpu.create_swapchain(self.requested_extent) {
            Ok(info) if info.extent.width > 0 && info.extent.height > 0 => info,
            Ok(_) | Err(GpuError::ZeroExtent) => {
                log::debug!("Surface has zero extent, recreation deferred");
                self.state = SurfaceState::Invalidated;
                return Ok(false);
            }
            Err(e) => {
                self.state = SurfaceState::Invalidated;
                return Err(e);
            }
        };

        self.generation += 1;
        let extent = info.extent;
        let images = info.image_views.len();
        match SurfaceResources::build(&self.gpu, library, info, self.generation, self.slow_wait) {
            Ok(resources) => {
                self.resources = Some(resources);
                self.state = SurfaceState::Live;
                log::info!(
                    "Swapchain ready: {}x{}, {} images (generation {})",
                    extent.width,
                    extent.height,
                    images,
                    self.generation
                );
                Ok(true)
            }
            Err(e) => {
                self.state = SurfaceState::Invalidated;
                Err(e)
            }
        }
    }

    /// Drains the device and releases everything, swapchain included.
    pub fn shutdown(&mut self) {
        if let Err(e) = self.gpu.wait_idle() {
            log::error!("wait_idle during shutdown: {}", e);
        }
        self.resources = None;
        self.gpu.destroy_swapchain();
        self.state = SurfaceState::Invalidated;
    }
}

impl Drop for SwapchainLifecycle {
    fn drop(&mut self) {
        if self.resources.is_some() {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{Completion, HeadlessContext};

    fn setup(image_count: u32) -> (Arc<HeadlessContext>, Arc<dyn GpuContext>, PipelineLibrary) {
        let extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let headless = Arc::new(HeadlessContext::new(extent, image_count, Completion::Immediate));
        let gpu: Arc<dyn GpuContext> = headless.clone();
        let library = PipelineLibrary::new(&gpu).unwrap();
        (headless, gpu, library)
    }

    #[test]
    fn slot_count_follows_image_count_across_recreation() {
        let (headless, gpu, library) = setup(3);
        let mut surface = SwapchainLifecycle::new(
            &gpu,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
            Duration::from_secs(1),
        );
        assert!(surface.ensure_live(&library).unwrap());
        let first = surface.resources().unwrap();
        assert_eq!(first.slots.len(), 3);
        let old_fence = first.slots.slot(0).drawing_fence();
        let old_pass = first.render_pass(PassId::Main);

        headless.set_image_count(2);
        headless.resize_surface(vk::Extent2D {
            width: 1024,
            height: 768,
        });
        surface.resize(1024, 768);
        assert_eq!(surface.state(), SurfaceState::Invalidated);
        assert!(surface.ensure_live(&library).unwrap());

        let second = surface.resources().unwrap();
        assert_eq!(second.slots.len(), 2);
        assert_eq!(second.extent().width, 1024);
        assert_eq!(surface.generation(), 2);
        assert!(!headless.is_live(old_fence));
        assert!(!headless.is_live(old_pass));
        assert!(headless.violations().is_empty());
    }

    #[test]
    fn zero_extent_defers_recreation() {
        let (headless, gpu, library) = setup(2);
        let mut surface = SwapchainLifecycle::new(
            &gpu,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
            Duration::from_secs(1),
        );
        assert!(surface.ensure_live(&library).unwrap());

        headless.resize_surface(vk::Extent2D {
            width: 0,
            height: 0,
        });
        surface.resize(0, 0);
        assert!(!surface.ensure_live(&library).unwrap());
        assert_eq!(surface.state(), SurfaceState::Invalidated);
        assert!(surface.resources().is_none());

        headless.resize_surface(vk::Extent2D {
            width: 640,
            height: 480,
        });
        assert!(surface.ensure_live(&library).unwrap());
        assert_eq!(surface.resources().unwrap().extent().height, 480);
    }

    #[test]
    fn main_framebuffer_per_image() {
        let (_headless, gpu, library) = setup(3);
        let mut surface = SwapchainLifecycle::new(
            &gpu,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
            Duration::from_secs(1),
        );
        surface.ensure_live(&library).unwrap();
        let resources = surface.resources().unwrap();
        let framebuffers: Vec<_> = (0..3).map(|i| resources.framebuffer(PassId::Main, i)).collect();
        assert_ne!(framebuffers[0], framebuffers[1]);
        assert_ne!(framebuffers[1], framebuffers[2]);
        assert_eq!(resources.framebuffer(PassId::Main, 3), vk::Framebuffer::null());
    }
}
