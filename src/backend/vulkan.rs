// Vulkan GPU context
//
// Implements the renderer's GpuContext on top of ash. Owns the device, the
// swapchain and every memory allocation handed out through the interface.
// Device calls go straight through; only queue access and the allocator
// are locked.

use ash::extensions::khr;
use ash::vk;
use ash::vk::Handle;
use gpu_allocator::vulkan::Allocation;
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::buffer;
use super::device::{check, VulkanDevice};
use super::pipeline;
use super::shader;
use super::swapchain::Swapchain;
use super::sync;
use crate::config::Config;
use crate::error::{GpuError, GpuResult};
use crate::gpu::{
    AcquireOutcome, ClearValue, DescriptorWrite, DeviceLimits, GpuCommand, GpuContext, GpuImage,
    GraphicsPipelineDesc, ImageDesc, LayoutBinding, PresentOutcome, QueueKind, Recording,
    RenderPassDesc, Submission, SwapchainInfo,
};

pub struct VulkanContext {
    swapchain: Mutex<Option<Swapchain>>,
    swapchain_loader: khr::Swapchain,
    present_mode: vk::PresentModeKHR,
    shader_dir: PathBuf,

    // Keyed by raw buffer / image handle
    buffers: Mutex<HashMap<u64, Allocation>>,
    images: Mutex<HashMap<u64, Allocation>>,

    // Texture uploads record into a one-shot buffer from here
    upload_pool: Mutex<vk::CommandPool>,

    device: Arc<VulkanDevice>,
}

impl VulkanContext {
    pub fn new(config: &Config, display: RawDisplayHandle, window: RawWindowHandle) -> GpuResult<Self> {
        let device = Arc::new(VulkanDevice::new(
            &config.window.title,
            config.debug.validation_layers,
            display,
            window,
        )?);

        let swapchain_loader = khr::Swapchain::new(&device.instance, &device.device);

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.queue_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let upload_pool = check("vkCreateCommandPool", unsafe {
            device.device.create_command_pool(&pool_info, None)
        })?;

        Ok(Self {
            swapchain: Mutex::new(None),
            swapchain_loader,
            present_mode: config.present_mode(),
            shader_dir: config.renderer.shader_dir.clone(),
            buffers: Mutex::new(HashMap::new()),
            images: Mutex::new(HashMap::new()),
            upload_pool: Mutex::new(upload_pool),
            device,
        })
    }

    fn raw(&self) -> &ash::Device {
        &self.device.device
    }

    /// Copies `staging` into `image` and leaves it ready for sampling.
    fn upload_texture(
        &self,
        image: vk::Image,
        width: u32,
        height: u32,
        staging: vk::Buffer,
    ) -> GpuResult<()> {
        let device = self.raw();
        let pool = self.upload_pool.lock();

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = check("vkAllocateCommandBuffers", unsafe {
            device.allocate_command_buffers(&alloc_info)
        })?[0];

        let range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        let to_transfer = vk::ImageMemoryBarrier::builder()
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(range)
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .build();
        let to_shader = vk::ImageMemoryBarrier::builder()
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(range)
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ)
            .build();
        let region = vk::BufferImageCopy {
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
            ..Default::default()
        };

        let begin = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        let result = (|| {
            check("vkBeginCommandBuffer", unsafe { device.begin_command_buffer(cmd, &begin) })?;
            unsafe {
                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[to_transfer],
                );
                device.cmd_copy_buffer_to_image(
                    cmd,
                    staging,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[to_shader],
                );
            }
            check("vkEndCommandBuffer", unsafe { device.end_command_buffer(cmd) })?;

            let buffers = [cmd];
            let submit = vk::SubmitInfo::builder().command_buffers(&buffers).build();
            let queue = self.device.queue.lock();
            check("vkQueueSubmit", unsafe {
                device.queue_submit(*queue, &[submit], vk::Fence::null())
            })?;
            check("vkQueueWaitIdle", unsafe { device.queue_wait_idle(*queue) })
        })();

        unsafe { device.free_command_buffers(*pool, &[cmd]) };
        result
    }

    fn record_command(&self, buffer: vk::CommandBuffer, command: &GpuCommand) {
        let device = self.raw();
        unsafe {
            match command {
                GpuCommand::BeginRenderPass {
                    render_pass,
                    framebuffer,
                    extent,
                    clear_values,
                } => {
                    let clear_values: Vec<vk::ClearValue> =
                        clear_values.iter().map(|&c| to_vk_clear(c)).collect();
                    let info = vk::RenderPassBeginInfo::builder()
                        .render_pass(*render_pass)
                        .framebuffer(*framebuffer)
                        .render_area(vk::Rect2D {
                            offset: vk::Offset2D { x: 0, y: 0 },
                            extent: *extent,
                        })
                        .clear_values(&clear_values);
                    device.cmd_begin_render_pass(
                        buffer,
                        &info,
                        vk::SubpassContents::SECONDARY_COMMAND_BUFFERS,
                    );
                }
                GpuCommand::NextSubpass => {
                    device.cmd_next_subpass(buffer, vk::SubpassContents::SECONDARY_COMMAND_BUFFERS)
                }
                GpuCommand::EndRenderPass => device.cmd_end_render_pass(buffer),
                GpuCommand::ExecuteCommands(secondaries) => {
                    if !secondaries.is_empty() {
                        device.cmd_execute_commands(buffer, secondaries);
                    }
                }
                GpuCommand::BindPipeline(pipeline) => {
                    device.cmd_bind_pipeline(buffer, vk::PipelineBindPoint::GRAPHICS, *pipeline)
                }
                GpuCommand::BindDescriptorSets {
                    layout,
                    first_set,
                    sets,
                    dynamic_offsets,
                } => device.cmd_bind_descriptor_sets(
                    buffer,
                    vk::PipelineBindPoint::GRAPHICS,
                    *layout,
                    *first_set,
                    sets,
                    dynamic_offsets,
                ),
                GpuCommand::PushConstants {
                    layout,
                    stages,
                    data,
                } => device.cmd_push_constants(buffer, *layout, *stages, 0, data),
                GpuCommand::BindVertexBuffer(vertices) => {
                    device.cmd_bind_vertex_buffers(buffer, 0, &[*vertices], &[0])
                }
                GpuCommand::BindIndexBuffer(indices) => {
                    device.cmd_bind_index_buffer(buffer, *indices, 0, vk::IndexType::UINT32)
                }
                GpuCommand::Draw {
                    vertex_count,
                    instance_count,
                } => device.cmd_draw(buffer, *vertex_count, *instance_count, 0, 0),
                GpuCommand::DrawIndexed {
                    index_count,
                    instance_count,
                } => device.cmd_draw_indexed(buffer, *index_count, *instance_count, 0, 0, 0),
                GpuCommand::ClearStencil { extent, value } => {
                    let attachment = vk::ClearAttachment {
                        aspect_mask: vk::ImageAspectFlags::STENCIL,
                        color_attachment: 0,
                        clear_value: vk::ClearValue {
                            depth_stencil: vk::ClearDepthStencilValue {
                                depth: 1.0,
                                stencil: *value,
                            },
                        },
                    };
                    let rect = vk::ClearRect {
                        rect: vk::Rect2D {
                            offset: vk::Offset2D { x: 0, y: 0 },
                            extent: *extent,
                        },
                        base_array_layer: 0,
                        layer_count: 1,
                    };
                    device.cmd_clear_attachments(buffer, &[attachment], &[rect]);
                }
            }
        }
    }
}

fn to_vk_clear(value: ClearValue) -> vk::ClearValue {
    match value {
        ClearValue::Color(float32) => vk::ClearValue {
            color: vk::ClearColorValue { float32 },
        },
        ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
        },
    }
}

impl GpuContext for VulkanContext {
    fn limits(&self) -> DeviceLimits {
        let limits = &self.device.properties.limits;
        DeviceLimits {
            min_uniform_offset_alignment: limits.min_uniform_buffer_offset_alignment,
            min_storage_offset_alignment: limits.min_storage_buffer_offset_alignment,
            depth_stencil_format: self.device.depth_stencil_format,
        }
    }

    fn create_semaphore(&self) -> GpuResult<vk::Semaphore> {
        sync::create_semaphore(self.raw())
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.raw().destroy_semaphore(semaphore, None) }
    }

    fn create_fence(&self, signaled: bool) -> GpuResult<vk::Fence> {
        sync::create_fence(self.raw(), signaled)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.raw().destroy_fence(fence, None) }
    }

    fn wait_for_fences(&self, fences: &[vk::Fence]) -> GpuResult<()> {
        sync::wait_all(self.raw(), fences)
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> GpuResult<()> {
        sync::reset(self.raw(), fences)
    }

    fn wait_idle(&self) -> GpuResult<()> {
        self.device.wait_idle()
    }

    fn create_swapchain(&self, extent: vk::Extent2D) -> GpuResult<SwapchainInfo> {
        let mut current = self.swapchain.lock();
        let old = current
            .as_ref()
            .map(|s| s.swapchain)
            .unwrap_or_else(vk::SwapchainKHR::null);

        let swapchain = Swapchain::new(
            Arc::clone(&self.device),
            self.swapchain_loader.clone(),
            extent,
            self.present_mode,
            old,
        )?;

        let info = SwapchainInfo {
            format: swapchain.format,
            extent: swapchain.extent,
            image_views: swapchain.image_views.clone(),
        };
        // Retires the old chain
        *current = Some(swapchain);
        Ok(info)
    }

    fn destroy_swapchain(&self) {
        self.swapchain.lock().take();
    }

    fn acquire_next_image(&self, semaphore: vk::Semaphore) -> GpuResult<AcquireOutcome> {
        match self.swapchain.lock().as_ref() {
            Some(swapchain) => swapchain.acquire_next_image(semaphore),
            None => Ok(AcquireOutcome::Stale),
        }
    }

    fn present(&self, image_index: u32, wait: &[vk::Semaphore]) -> GpuResult<PresentOutcome> {
        let swapchain = self.swapchain.lock();
        let Some(swapchain) = swapchain.as_ref() else {
            return Ok(PresentOutcome::Stale);
        };
        let queue = self.device.queue.lock();
        swapchain.present(*queue, image_index, wait)
    }

    fn create_command_pool(&self, _queue: QueueKind) -> GpuResult<vk::CommandPool> {
        // Graphics and compute share one family
        let info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(self.device.queue_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        check("vkCreateCommandPool", unsafe {
            self.raw().create_command_pool(&info, None)
        })
    }

    fn reset_command_pool(&self, pool: vk::CommandPool) -> GpuResult<()> {
        check("vkResetCommandPool", unsafe {
            self.raw()
                .reset_command_pool(pool, vk::CommandPoolResetFlags::empty())
        })
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.raw().destroy_command_pool(pool, None) }
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> GpuResult<Vec<vk::CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(level)
            .command_buffer_count(count);
        check("vkAllocateCommandBuffers", unsafe {
            self.raw().allocate_command_buffers(&info)
        })
    }

    fn record(
        &self,
        buffer: vk::CommandBuffer,
        recording: Recording,
        commands: &[GpuCommand],
    ) -> GpuResult<()> {
        let device = self.raw();
        match recording {
            Recording::Primary => {
                let begin = vk::CommandBufferBeginInfo::builder()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
                check("vkBeginCommandBuffer", unsafe {
                    device.begin_command_buffer(buffer, &begin)
                })?;
            }
            Recording::Secondary {
                render_pass,
                subpass,
                framebuffer,
            } => {
                let inheritance = vk::CommandBufferInheritanceInfo::builder()
                    .render_pass(render_pass)
                    .subpass(subpass)
                    .framebuffer(framebuffer);
                let begin = vk::CommandBufferBeginInfo::builder()
                    .flags(
                        vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
                            | vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE,
                    )
                    .inheritance_info(&inheritance);
                check("vkBeginCommandBuffer", unsafe {
                    device.begin_command_buffer(buffer, &begin)
                })?;
            }
        }

        for command in commands {
            self.record_command(buffer, command);
        }

        check("vkEndCommandBuffer", unsafe { device.end_command_buffer(buffer) })
    }

    fn submit(&self, _queue: QueueKind, submission: &Submission<'_>) -> GpuResult<()> {
        let (wait_semaphores, wait_stages): (Vec<_>, Vec<_>) =
            submission.wait.iter().copied().unzip();

        let info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(submission.command_buffers)
            .signal_semaphores(submission.signal)
            .build();

        let queue = self.device.queue.lock();
        check("vkQueueSubmit", unsafe {
            self.raw().queue_submit(*queue, &[info], submission.fence)
        })
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[LayoutBinding],
    ) -> GpuResult<vk::DescriptorSetLayout> {
        pipeline::create_set_layout(self.raw(), bindings)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.raw().destroy_descriptor_set_layout(layout, None) }
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> GpuResult<vk::DescriptorPool> {
        let info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(max_sets)
            .pool_sizes(sizes);
        check("vkCreateDescriptorPool", unsafe {
            self.raw().create_descriptor_pool(&info, None)
        })
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.raw().destroy_descriptor_pool(pool, None) }
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> GpuResult<vk::DescriptorSet> {
        let layouts = [layout];
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        // Pool exhaustion is expected to surface; logged by the cache
        let sets = unsafe { self.raw().allocate_descriptor_sets(&info) }
            .map_err(|code| GpuError::from_vk("vkAllocateDescriptorSets", code))?;
        Ok(sets[0])
    }

    fn free_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        sets: &[vk::DescriptorSet],
    ) -> GpuResult<()> {
        if sets.is_empty() {
            return Ok(());
        }
        check("vkFreeDescriptorSets", unsafe {
            self.raw().free_descriptor_sets(pool, sets)
        })
    }

    fn write_descriptors(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
        // Every write gets both info slots so the writes below can borrow by index
        let buffer_infos: Vec<vk::DescriptorBufferInfo> = writes
            .iter()
            .map(|w| match *w {
                DescriptorWrite::Buffer {
                    buffer,
                    offset,
                    range,
                    ..
                } => vk::DescriptorBufferInfo {
                    buffer,
                    offset,
                    range,
                },
                DescriptorWrite::Image { .. } => vk::DescriptorBufferInfo::default(),
            })
            .collect();
        let image_infos: Vec<vk::DescriptorImageInfo> = writes
            .iter()
            .map(|w| match *w {
                DescriptorWrite::Image {
                    view,
                    sampler,
                    layout,
                    ..
                } => vk::DescriptorImageInfo {
                    sampler,
                    image_view: view,
                    image_layout: layout,
                },
                DescriptorWrite::Buffer { .. } => vk::DescriptorImageInfo::default(),
            })
            .collect();

        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let builder = vk::WriteDescriptorSet::builder().dst_set(set);
                match *w {
                    DescriptorWrite::Buffer { binding, kind, .. } => builder
                        .dst_binding(binding)
                        .descriptor_type(kind)
                        .buffer_info(std::slice::from_ref(&buffer_infos[i]))
                        .build(),
                    DescriptorWrite::Image { binding, kind, .. } => builder
                        .dst_binding(binding)
                        .descriptor_type(kind)
                        .image_info(std::slice::from_ref(&image_infos[i]))
                        .build(),
                }
            })
            .collect();

        unsafe { self.raw().update_descriptor_sets(&vk_writes, &[]) }
    }

    fn create_buffer(&self, size: u64, usage: vk::BufferUsageFlags) -> GpuResult<vk::Buffer> {
        let (buffer, allocation) = buffer::create_host_buffer(&self.device, size, usage)?;
        self.buffers.lock().insert(buffer.as_raw(), allocation);
        Ok(buffer)
    }

    fn write_buffer(&self, buffer: vk::Buffer, offset: u64, data: &[u8]) -> GpuResult<()> {
        let mut buffers = self.buffers.lock();
        let allocation = buffers
            .get_mut(&buffer.as_raw())
            .ok_or_else(|| GpuError::Allocation(format!("unknown buffer {:#x}", buffer.as_raw())))?;
        buffer::write_mapped(allocation, offset, data)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let allocation = self.buffers.lock().remove(&buffer.as_raw());
        unsafe { self.raw().destroy_buffer(buffer, None) };
        if let Some(allocation) = allocation {
            buffer::free(&self.device, allocation);
        }
    }

    fn create_image(&self, desc: &ImageDesc) -> GpuResult<GpuImage> {
        let (image, allocation) = buffer::create_image(&self.device, desc)?;
        self.images.lock().insert(image.image.as_raw(), allocation);
        Ok(image)
    }

    fn create_texture(&self, width: u32, height: u32, pixels: &[u8]) -> GpuResult<GpuImage> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(GpuError::Allocation(format!(
                "texture {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            )));
        }

        let image = self.create_image(&ImageDesc {
            format: vk::Format::R8G8B8A8_UNORM,
            usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            aspect: vk::ImageAspectFlags::COLOR,
            extent: vk::Extent2D { width, height },
        })?;

        let staging = self
            .create_buffer(pixels.len() as u64, vk::BufferUsageFlags::TRANSFER_SRC)
            .and_then(|staging| {
                self.write_buffer(staging, 0, pixels)
                    .and_then(|()| self.upload_texture(image.image, width, height, staging))
                    .map(|()| staging)
                    .inspect_err(|_| self.destroy_buffer(staging))
            });

        match staging {
            Ok(staging) => {
                self.destroy_buffer(staging);
                Ok(image)
            }
            Err(e) => {
                self.destroy_image(image);
                Err(e)
            }
        }
    }

    fn destroy_image(&self, image: GpuImage) {
        let allocation = self.images.lock().remove(&image.image.as_raw());
        unsafe {
            self.raw().destroy_image_view(image.view, None);
            self.raw().destroy_image(image.image, None);
        }
        if let Some(allocation) = allocation {
            buffer::free(&self.device, allocation);
        }
    }

    fn create_sampler(&self) -> GpuResult<vk::Sampler> {
        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .max_lod(0.0);
        check("vkCreateSampler", unsafe { self.raw().create_sampler(&info, None) })
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.raw().destroy_sampler(sampler, None) }
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> GpuResult<vk::RenderPass> {
        pipeline::create_render_pass(self.raw(), desc)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.raw().destroy_render_pass(render_pass, None) }
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> GpuResult<vk::Framebuffer> {
        pipeline::create_framebuffer(self.raw(), render_pass, views, extent)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.raw().destroy_framebuffer(framebuffer, None) }
    }

    fn create_shader_module(&self, name: &str) -> GpuResult<vk::ShaderModule> {
        shader::load_shader_module(self.raw(), &self.shader_dir, name)
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.raw().destroy_shader_module(module, None) }
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_size: u32,
    ) -> GpuResult<vk::PipelineLayout> {
        pipeline::create_pipeline_layout(self.raw(), set_layouts, push_constant_size)
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.raw().destroy_pipeline_layout(layout, None) }
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> GpuResult<vk::Pipeline> {
        pipeline::create_graphics_pipeline(self.raw(), desc)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.raw().destroy_pipeline(pipeline, None) }
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        let _ = self.device.wait_idle();
        self.swapchain.lock().take();

        unsafe {
            self.raw()
                .destroy_command_pool(*self.upload_pool.lock(), None);
        }

        // Anything still registered here outlived its owner
        let leaked_buffers: Vec<(u64, Allocation)> = self.buffers.lock().drain().collect();
        let leaked_images: Vec<(u64, Allocation)> = self.images.lock().drain().collect();
        if !leaked_buffers.is_empty() || !leaked_images.is_empty() {
            log::warn!(
                "Releasing {} buffers and {} images at shutdown",
                leaked_buffers.len(),
                leaked_images.len()
            );
        }
        for (raw, allocation) in leaked_buffers {
            unsafe { self.raw().destroy_buffer(vk::Buffer::from_raw(raw), None) };
            buffer::free(&self.device, allocation);
        }
        for (_, allocation) in leaked_images {
            buffer::free(&self.device, allocation);
        }
    }
}
