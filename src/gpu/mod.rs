//! The narrow GPU interface the renderer is written against.
//!
//! Handles are plain `ash::vk` handles so the Vulkan backend can pass them
//! straight through; the headless backend fabricates them from a counter.
//! Collaborators receive the context explicitly as `Arc<dyn GpuContext>`.

pub mod resource;

pub use resource::{GpuObject, Scoped};

use ash::vk;

use crate::error::GpuResult;

/// Queue a submission goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Graphics,
    Compute,
}

/// Result of asking the presentation engine for the next image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Image { index: u32, suboptimal: bool },
    Stale,
}

/// Result of queueing an image for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    Stale,
}

/// What a (re)created swapchain looks like.
#[derive(Debug, Clone)]
pub struct SwapchainInfo {
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub image_views: Vec<vk::ImageView>,
}

/// Device limits the renderer needs for dynamic-offset regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    pub min_uniform_offset_alignment: u64,
    pub min_storage_offset_alignment: u64,
    /// Best supported combined depth/stencil format.
    pub depth_stencil_format: vk::Format,
}

impl DeviceLimits {
    /// Rounds `size` up to an offset usable for both uniform and storage regions.
    pub fn align_region(&self, size: u64) -> u64 {
        let align = self
            .min_uniform_offset_alignment
            .max(self.min_storage_offset_alignment)
            .max(1);
        size.div_ceil(align) * align
    }
}

/// A device image with its default view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
}

/// Parameters for a render-target image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
    pub extent: vk::Extent2D,
}

/// One subpass of a render pass, in attachment-index terms.
#[derive(Debug, Clone, Default)]
pub struct SubpassDesc {
    pub inputs: Vec<vk::AttachmentReference>,
    pub colors: Vec<vk::AttachmentReference>,
    pub depth_stencil: Option<vk::AttachmentReference>,
    pub preserve: Vec<u32>,
}

/// Everything needed to create a render pass.
#[derive(Debug, Clone, Default)]
pub struct RenderPassDesc {
    pub label: &'static str,
    pub attachments: Vec<vk::AttachmentDescription>,
    pub subpasses: Vec<SubpassDesc>,
    pub dependencies: Vec<vk::SubpassDependency>,
}

/// Vertex stream consumed by a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexLayout {
    /// No vertex buffer; positions are generated in the shader.
    None,
    /// `scene::MeshVertex`
    Static,
    /// `scene::SkinnedVertex`
    Skinned,
}

/// Stencil configuration of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StencilMode {
    Disabled,
    /// Two-sided: front faces increment, back faces decrement.
    ShadowVolume,
    /// Pass only where the stencil value is zero.
    EqualZero,
}

/// Colour output of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    Opaque,
    Additive,
    Alpha,
    NoColorWrite,
}

/// Fixed-function and shader state of one graphics pipeline.
#[derive(Debug, Clone, Copy)]
pub struct GraphicsPipelineDesc {
    pub label: &'static str,
    pub vertex_shader: vk::ShaderModule,
    /// Extrudes shadow volumes from adjacency triangles.
    pub geometry_shader: Option<vk::ShaderModule>,
    pub fragment_shader: vk::ShaderModule,
    pub vertex_layout: VertexLayout,
    pub topology: vk::PrimitiveTopology,
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
    /// Baked viewport and scissor size.
    pub extent: vk::Extent2D,
    pub cull_mode: vk::CullModeFlags,
    pub depth_test: bool,
    pub depth_write: bool,
    pub stencil: StencilMode,
    pub blend: BlendMode,
    pub color_attachment_count: u32,
}

/// One binding of a descriptor set layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutBinding {
    pub binding: u32,
    pub kind: vk::DescriptorType,
    pub stages: vk::ShaderStageFlags,
}

/// An update written into a descriptor set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorWrite {
    Buffer {
        binding: u32,
        kind: vk::DescriptorType,
        buffer: vk::Buffer,
        offset: u64,
        range: u64,
    },
    Image {
        binding: u32,
        kind: vk::DescriptorType,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    },
}

/// Clear value for a render pass attachment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

/// How a command buffer is begun.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recording {
    Primary,
    /// Continues `subpass` of `render_pass` inside `framebuffer`.
    Secondary {
        render_pass: vk::RenderPass,
        subpass: u32,
        framebuffer: vk::Framebuffer,
    },
}

/// A single recorded command. Backends translate these one to one.
#[derive(Debug, Clone, PartialEq)]
pub enum GpuCommand {
    /// Begins a render pass whose subpasses execute secondary buffers.
    BeginRenderPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: Vec<ClearValue>,
    },
    NextSubpass,
    EndRenderPass,
    ExecuteCommands(Vec<vk::CommandBuffer>),
    BindPipeline(vk::Pipeline),
    BindDescriptorSets {
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: Vec<vk::DescriptorSet>,
        dynamic_offsets: Vec<u32>,
    },
    PushConstants {
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        data: Vec<u8>,
    },
    BindVertexBuffer(vk::Buffer),
    BindIndexBuffer(vk::Buffer),
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    /// Clears the stencil aspect of the bound depth-stencil attachment.
    ClearStencil { extent: vk::Extent2D, value: u32 },
}

/// One queue submission.
#[derive(Debug, Clone, Copy)]
pub struct Submission<'a> {
    pub command_buffers: &'a [vk::CommandBuffer],
    pub wait: &'a [(vk::Semaphore, vk::PipelineStageFlags)],
    pub signal: &'a [vk::Semaphore],
    pub fence: vk::Fence,
}

/// Device operations the frame core relies on.
///
/// Implementations must be callable from the driver thread and all recording
/// workers at once; each worker only ever passes its own pools.
pub trait GpuContext: Send + Sync {
    fn limits(&self) -> DeviceLimits;

    // Synchronization
    fn create_semaphore(&self) -> GpuResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn create_fence(&self, signaled: bool) -> GpuResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    /// Blocks until every fence is signaled.
    fn wait_for_fences(&self, fences: &[vk::Fence]) -> GpuResult<()>;
    fn reset_fences(&self, fences: &[vk::Fence]) -> GpuResult<()>;
    /// Drains all queues.
    fn wait_idle(&self) -> GpuResult<()>;

    // Presentation
    /// Replaces the current swapchain. Fails with `ZeroExtent` while minimized.
    fn create_swapchain(&self, extent: vk::Extent2D) -> GpuResult<SwapchainInfo>;
    fn destroy_swapchain(&self);
    fn acquire_next_image(&self, semaphore: vk::Semaphore) -> GpuResult<AcquireOutcome>;
    fn present(&self, image_index: u32, wait: &[vk::Semaphore]) -> GpuResult<PresentOutcome>;

    // Commands
    fn create_command_pool(&self, queue: QueueKind) -> GpuResult<vk::CommandPool>;
    fn reset_command_pool(&self, pool: vk::CommandPool) -> GpuResult<()>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> GpuResult<Vec<vk::CommandBuffer>>;
    /// Begins, records `commands` and ends `buffer`.
    fn record(
        &self,
        buffer: vk::CommandBuffer,
        recording: Recording,
        commands: &[GpuCommand],
    ) -> GpuResult<()>;
    fn submit(&self, queue: QueueKind, submission: &Submission<'_>) -> GpuResult<()>;

    // Descriptors
    fn create_descriptor_set_layout(
        &self,
        bindings: &[LayoutBinding],
    ) -> GpuResult<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> GpuResult<vk::DescriptorPool>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> GpuResult<vk::DescriptorSet>;
    fn free_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        sets: &[vk::DescriptorSet],
    ) -> GpuResult<()>;
    fn write_descriptors(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]);

    // Memory and images
    /// Host-visible buffer.
    fn create_buffer(&self, size: u64, usage: vk::BufferUsageFlags) -> GpuResult<vk::Buffer>;
    fn write_buffer(&self, buffer: vk::Buffer, offset: u64, data: &[u8]) -> GpuResult<()>;
    fn destroy_buffer(&self, buffer: vk::Buffer);
    fn create_image(&self, desc: &ImageDesc) -> GpuResult<GpuImage>;
    /// Sampled RGBA8 texture filled with `pixels`.
    fn create_texture(&self, width: u32, height: u32, pixels: &[u8]) -> GpuResult<GpuImage>;
    fn destroy_image(&self, image: GpuImage);
    fn create_sampler(&self) -> GpuResult<vk::Sampler>;
    fn destroy_sampler(&self, sampler: vk::Sampler);

    // Passes and pipelines
    fn create_render_pass(&self, desc: &RenderPassDesc) -> GpuResult<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> GpuResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
    /// Loads the SPIR-V module called `name`.
    fn create_shader_module(&self, name: &str) -> GpuResult<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_size: u32,
    ) -> GpuResult<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> GpuResult<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);
}
