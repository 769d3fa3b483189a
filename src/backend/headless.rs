// Headless device - software stand-in for the GPU
//
// Simulates fences, semaphores, a swapchain that can go stale, and command
// recording. Every recorded command is kept so callers can inspect what a
// frame produced. Misuse (touching destroyed handles, re-recording or
// resetting buffers the "GPU" is still executing) is collected as violations.

use std::collections::{HashMap, HashSet, VecDeque};

use ash::vk::{self, Handle};
use parking_lot::{Condvar, Mutex};

use crate::error::{GpuError, GpuResult};
use crate::gpu::{
    AcquireOutcome, DescriptorWrite, DeviceLimits, GpuCommand, GpuContext, GpuImage,
    GraphicsPipelineDesc, ImageDesc, LayoutBinding, PresentOutcome, QueueKind, Recording,
    RenderPassDesc, Submission, SwapchainInfo,
};

/// When submitted work is considered finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Fences are signaled as soon as the work is submitted.
    Immediate,
    /// Work stays in flight until `complete_next`/`complete_all` is called.
    Manual,
}

/// Counters exposed for assertions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub descriptor_sets_allocated: usize,
    pub command_buffers_allocated: usize,
    pub submissions: usize,
    pub presents: usize,
    pub swapchains_created: usize,
    pub pipelines_created: usize,
    pub shader_modules_created: usize,
}

/// A submission as the simulated queue saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRecord {
    pub queue: QueueKind,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub wait: Vec<vk::Semaphore>,
    pub signal: Vec<vk::Semaphore>,
    pub fence: vk::Fence,
}

/// A failure the device reports instead of doing the work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The next submission to this queue fails.
    Submit(QueueKind),
    /// The next primary command buffer fails to record.
    PrimaryRecord,
    /// Every recording made from the named thread fails until cleared.
    RecordOnThread(String),
}

#[derive(Debug)]
struct InFlight {
    fence: u64,
    buffers: Vec<u64>,
}

#[derive(Debug)]
struct HeadlessSwapchain {
    views: Vec<u64>,
    next_image: u32,
}

#[derive(Debug)]
struct State {
    next_handle: u64,
    live: HashSet<u64>,
    fences: HashMap<u64, bool>,
    pool_buffers: HashMap<u64, Vec<u64>>,
    descriptor_pools: HashMap<u64, (u32, u32)>,
    set_pool: HashMap<u64, u64>,
    records: HashMap<u64, (Recording, Vec<GpuCommand>)>,
    buffers: HashMap<u64, Vec<u8>>,
    descriptor_writes: HashMap<u64, Vec<DescriptorWrite>>,
    in_flight: VecDeque<InFlight>,
    submissions: Vec<SubmitRecord>,
    presented: Vec<u32>,
    fence_waits: Vec<vk::Fence>,
    swapchain: Option<HeadlessSwapchain>,
    surface_extent: vk::Extent2D,
    image_count: u32,
    stale: bool,
    stats: HeadlessStats,
    violations: Vec<String>,
    faults: Vec<(Fault, vk::Result)>,
}

impl State {
    fn alloc(&mut self) -> u64 {
        let raw = self.next_handle;
        self.next_handle += 1;
        self.live.insert(raw);
        raw
    }

    fn release(&mut self, raw: u64, what: &str) {
        if raw != 0 && !self.live.remove(&raw) {
            self.violations
                .push(format!("{what} {raw:#x} destroyed twice or never created"));
        }
    }

    fn check(&mut self, raw: u64, what: &str) {
        if raw != 0 && !self.live.contains(&raw) {
            self.violations.push(format!("{what} {raw:#x} used after destroy"));
        }
    }

    /// Takes the first fault matching `hit`. Thread faults stay armed.
    fn trip(&mut self, hit: impl Fn(&Fault) -> bool) -> Option<vk::Result> {
        let index = self.faults.iter().position(|(fault, _)| hit(fault))?;
        let code = self.faults[index].1;
        if !matches!(self.faults[index].0, Fault::RecordOnThread(_)) {
            self.faults.remove(index);
        }
        Some(code)
    }

    fn is_executing(&self, buffer: u64) -> bool {
        self.in_flight.iter().any(|f| f.buffers.contains(&buffer))
    }

    fn finish_one(&mut self) -> bool {
        match self.in_flight.pop_front() {
            Some(work) => {
                if work.fence != 0 {
                    self.fences.insert(work.fence, true);
                }
                true
            }
            None => false,
        }
    }

    /// Secondary buffers reachable from `buffer` through `ExecuteCommands`.
    fn executed_from(&self, buffer: u64) -> Vec<u64> {
        let mut out = vec![buffer];
        if let Some((_, commands)) = self.records.get(&buffer) {
            for command in commands {
                if let GpuCommand::ExecuteCommands(children) = command {
                    out.extend(children.iter().map(|c| c.as_raw()));
                }
            }
        }
        out
    }
}

/// Software `GpuContext`.
pub struct HeadlessContext {
    state: Mutex<State>,
    signaled: Condvar,
    completion: Completion,
}

impl HeadlessContext {
    pub fn new(extent: vk::Extent2D, image_count: u32, completion: Completion) -> Self {
        Self {
            state: Mutex::new(State {
                next_handle: 1,
                live: HashSet::new(),
                fences: HashMap::new(),
                pool_buffers: HashMap::new(),
                descriptor_pools: HashMap::new(),
                set_pool: HashMap::new(),
                records: HashMap::new(),
                buffers: HashMap::new(),
                descriptor_writes: HashMap::new(),
                in_flight: VecDeque::new(),
                submissions: Vec::new(),
                presented: Vec::new(),
                fence_waits: Vec::new(),
                swapchain: None,
                surface_extent: extent,
                image_count,
                stale: false,
                stats: HeadlessStats::default(),
                violations: Vec::new(),
                faults: Vec::new(),
            }),
            signaled: Condvar::new(),
            completion,
        }
    }

    /// Resizes the simulated window; the swapchain goes stale.
    pub fn resize_surface(&self, extent: vk::Extent2D) {
        let mut state = self.state.lock();
        state.surface_extent = extent;
        state.stale = true;
    }

    /// Marks the swapchain out of date without changing its size.
    pub fn invalidate_surface(&self) {
        self.state.lock().stale = true;
    }

    /// Image count used by the next swapchain creation.
    pub fn set_image_count(&self, image_count: u32) {
        self.state.lock().image_count = image_count;
    }

    /// Arms a failure that surfaces as `code`.
    pub fn inject(&self, fault: Fault, code: vk::Result) {
        self.state.lock().faults.push((fault, code));
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    /// Finishes the oldest in-flight submission.
    pub fn complete_next(&self) -> bool {
        let finished = self.state.lock().finish_one();
        self.signaled.notify_all();
        finished
    }

    /// Finishes every in-flight submission.
    pub fn complete_all(&self) {
        let mut state = self.state.lock();
        while state.finish_one() {}
        drop(state);
        self.signaled.notify_all();
    }

    pub fn is_signaled(&self, fence: vk::Fence) -> bool {
        self.state.lock().fences.get(&fence.as_raw()).copied().unwrap_or(false)
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    pub fn stats(&self) -> HeadlessStats {
        self.state.lock().stats.clone()
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    pub fn is_live<H: Handle>(&self, handle: H) -> bool {
        self.state.lock().live.contains(&handle.as_raw())
    }

    /// Commands last recorded into `buffer`.
    pub fn commands(&self, buffer: vk::CommandBuffer) -> Vec<GpuCommand> {
        self.state
            .lock()
            .records
            .get(&buffer.as_raw())
            .map(|(_, commands)| commands.clone())
            .unwrap_or_default()
    }

    /// How `buffer` was last begun.
    pub fn recording(&self, buffer: vk::CommandBuffer) -> Option<Recording> {
        self.state.lock().records.get(&buffer.as_raw()).map(|(r, _)| *r)
    }

    pub fn submissions(&self) -> Vec<SubmitRecord> {
        self.state.lock().submissions.clone()
    }

    pub fn presented(&self) -> Vec<u32> {
        self.state.lock().presented.clone()
    }

    /// Fences passed to `wait_for_fences`, in call order.
    pub fn fence_waits(&self) -> Vec<vk::Fence> {
        self.state.lock().fence_waits.clone()
    }

    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Vec<u8> {
        self.state.lock().buffers.get(&buffer.as_raw()).cloned().unwrap_or_default()
    }

    pub fn descriptor_writes(&self, set: vk::DescriptorSet) -> Vec<DescriptorWrite> {
        self.state
            .lock()
            .descriptor_writes
            .get(&set.as_raw())
            .cloned()
            .unwrap_or_default()
    }

    fn handle<H: Handle>(&self) -> H {
        H::from_raw(self.state.lock().alloc())
    }

    fn release<H: Handle>(&self, handle: H, what: &str) {
        self.state.lock().release(handle.as_raw(), what);
    }

    fn referenced(command: &GpuCommand) -> Vec<(u64, &'static str)> {
        match command {
            GpuCommand::BeginRenderPass {
                render_pass,
                framebuffer,
                ..
            } => vec![
                (render_pass.as_raw(), "render pass"),
                (framebuffer.as_raw(), "framebuffer"),
            ],
            GpuCommand::ExecuteCommands(buffers) => buffers
                .iter()
                .map(|b| (b.as_raw(), "secondary command buffer"))
                .collect(),
            GpuCommand::BindPipeline(pipeline) => vec![(pipeline.as_raw(), "pipeline")],
            GpuCommand::BindDescriptorSets { layout, sets, .. } => {
                let mut out = vec![(layout.as_raw(), "pipeline layout")];
                out.extend(sets.iter().map(|s| (s.as_raw(), "descriptor set")));
                out
            }
            GpuCommand::PushConstants { layout, .. } => vec![(layout.as_raw(), "pipeline layout")],
            GpuCommand::BindVertexBuffer(buffer) | GpuCommand::BindIndexBuffer(buffer) => {
                vec![(buffer.as_raw(), "buffer")]
            }
            _ => Vec::new(),
        }
    }
}

impl GpuContext for HeadlessContext {
    fn limits(&self) -> DeviceLimits {
        DeviceLimits {
            min_uniform_offset_alignment: 256,
            min_storage_offset_alignment: 256,
            depth_stencil_format: vk::Format::D24_UNORM_S8_UINT,
        }
    }

    fn create_semaphore(&self) -> GpuResult<vk::Semaphore> {
        Ok(self.handle())
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.release(semaphore, "semaphore");
    }

    fn create_fence(&self, signaled: bool) -> GpuResult<vk::Fence> {
        let mut state = self.state.lock();
        let raw = state.alloc();
        state.fences.insert(raw, signaled);
        Ok(vk::Fence::from_raw(raw))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        state.fences.remove(&fence.as_raw());
        state.release(fence.as_raw(), "fence");
    }

    fn wait_for_fences(&self, fences: &[vk::Fence]) -> GpuResult<()> {
        let mut state = self.state.lock();
        for fence in fences {
            state.check(fence.as_raw(), "fence");
            state.fence_waits.push(*fence);
        }
        loop {
            let all_signaled = fences
                .iter()
                .all(|f| state.fences.get(&f.as_raw()).copied().unwrap_or(true));
            if all_signaled {
                return Ok(());
            }
            self.signaled.wait(&mut state);
        }
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> GpuResult<()> {
        let mut state = self.state.lock();
        for fence in fences {
            state.check(fence.as_raw(), "fence");
            state.fences.insert(fence.as_raw(), false);
        }
        Ok(())
    }

    fn wait_idle(&self) -> GpuResult<()> {
        self.complete_all();
        Ok(())
    }

    fn create_swapchain(&self, _extent: vk::Extent2D) -> GpuResult<SwapchainInfo> {
        let mut state = self.state.lock();
        if let Some(old) = state.swapchain.take() {
            for view in old.views {
                state.release(view, "swapchain image view");
            }
        }
        let extent = state.surface_extent;
        if extent.width == 0 || extent.height == 0 {
            return Err(GpuError::ZeroExtent);
        }
        let views: Vec<u64> = (0..state.image_count).map(|_| state.alloc()).collect();
        state.stale = false;
        state.stats.swapchains_created += 1;
        state.swapchain = Some(HeadlessSwapchain {
            views: views.clone(),
            next_image: 0,
        });
        Ok(SwapchainInfo {
            format: vk::Format::B8G8R8A8_SRGB,
            extent,
            image_views: views.into_iter().map(vk::ImageView::from_raw).collect(),
        })
    }

    fn destroy_swapchain(&self) {
        let mut state = self.state.lock();
        if let Some(old) = state.swapchain.take() {
            for view in old.views {
                state.release(view, "swapchain image view");
            }
        }
    }

    fn acquire_next_image(&self, semaphore: vk::Semaphore) -> GpuResult<AcquireOutcome> {
        let mut state = self.state.lock();
        state.check(semaphore.as_raw(), "semaphore");
        if state.stale {
            return Ok(AcquireOutcome::Stale);
        }
        let swapchain = state.swapchain.as_mut().ok_or(GpuError::SurfaceStale)?;
        let index = swapchain.next_image;
        swapchain.next_image = (index + 1) % swapchain.views.len() as u32;
        Ok(AcquireOutcome::Image {
            index,
            suboptimal: false,
        })
    }

    fn present(&self, image_index: u32, wait: &[vk::Semaphore]) -> GpuResult<PresentOutcome> {
        let mut state = self.state.lock();
        for semaphore in wait {
            state.check(semaphore.as_raw(), "semaphore");
        }
        if state.stale {
            return Ok(PresentOutcome::Stale);
        }
        state.presented.push(image_index);
        state.stats.presents += 1;
        Ok(PresentOutcome::Presented)
    }

    fn create_command_pool(&self, _queue: QueueKind) -> GpuResult<vk::CommandPool> {
        let mut state = self.state.lock();
        let raw = state.alloc();
        state.pool_buffers.insert(raw, Vec::new());
        Ok(vk::CommandPool::from_raw(raw))
    }

    fn reset_command_pool(&self, pool: vk::CommandPool) -> GpuResult<()> {
        let mut state = self.state.lock();
        state.check(pool.as_raw(), "command pool");
        let buffers = state.pool_buffers.get(&pool.as_raw()).cloned().unwrap_or_default();
        for buffer in buffers {
            if state.is_executing(buffer) {
                state
                    .violations
                    .push(format!("command pool {:#x} reset while executing", pool.as_raw()));
            }
            state.records.remove(&buffer);
        }
        Ok(())
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state.lock();
        if let Some(buffers) = state.pool_buffers.remove(&pool.as_raw()) {
            for buffer in buffers {
                state.records.remove(&buffer);
                state.release(buffer, "command buffer");
            }
        }
        state.release(pool.as_raw(), "command pool");
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        _level: vk::CommandBufferLevel,
        count: u32,
    ) -> GpuResult<Vec<vk::CommandBuffer>> {
        let mut state = self.state.lock();
        state.check(pool.as_raw(), "command pool");
        let raws: Vec<u64> = (0..count).map(|_| state.alloc()).collect();
        state
            .pool_buffers
            .entry(pool.as_raw())
            .or_default()
            .extend(raws.iter().copied());
        state.stats.command_buffers_allocated += count as usize;
        Ok(raws.into_iter().map(vk::CommandBuffer::from_raw).collect())
    }

    fn record(
        &self,
        buffer: vk::CommandBuffer,
        recording: Recording,
        commands: &[GpuCommand],
    ) -> GpuResult<()> {
        let mut state = self.state.lock();
        state.check(buffer.as_raw(), "command buffer");
        let current = std::thread::current();
        let thread = current.name();
        let fault = state.trip(|fault| match fault {
            Fault::PrimaryRecord => recording == Recording::Primary,
            Fault::RecordOnThread(name) => thread == Some(name.as_str()),
            Fault::Submit(_) => false,
        });
        if let Some(code) = fault {
            return Err(GpuError::from_vk("vkEndCommandBuffer", code));
        }
        if state.is_executing(buffer.as_raw()) {
            state.violations.push(format!(
                "command buffer {:#x} re-recorded while executing",
                buffer.as_raw()
            ));
        }
        if let Recording::Secondary {
            render_pass,
            framebuffer,
            ..
        } = recording
        {
            state.check(render_pass.as_raw(), "render pass");
            state.check(framebuffer.as_raw(), "framebuffer");
        }
        for command in commands {
            for (raw, what) in Self::referenced(command) {
                state.check(raw, what);
            }
        }
        state
            .records
            .insert(buffer.as_raw(), (recording, commands.to_vec()));
        Ok(())
    }

    fn submit(&self, queue: QueueKind, submission: &Submission<'_>) -> GpuResult<()> {
        let mut state = self.state.lock();
        if let Some(code) = state.trip(|fault| *fault == Fault::Submit(queue)) {
            return Err(GpuError::from_vk("vkQueueSubmit", code));
        }
        let mut executing = Vec::new();
        for buffer in submission.command_buffers {
            state.check(buffer.as_raw(), "command buffer");
            executing.extend(state.executed_from(buffer.as_raw()));
        }
        for (semaphore, _) in submission.wait {
            state.check(semaphore.as_raw(), "semaphore");
        }
        for semaphore in submission.signal {
            state.check(semaphore.as_raw(), "semaphore");
        }
        state.check(submission.fence.as_raw(), "fence");
        state.submissions.push(SubmitRecord {
            queue,
            command_buffers: submission.command_buffers.to_vec(),
            wait: submission.wait.iter().map(|(s, _)| *s).collect(),
            signal: submission.signal.to_vec(),
            fence: submission.fence,
        });
        state.stats.submissions += 1;
        state.in_flight.push_back(InFlight {
            fence: submission.fence.as_raw(),
            buffers: executing,
        });
        if self.completion == Completion::Immediate {
            while state.finish_one() {}
        }
        drop(state);
        self.signaled.notify_all();
        Ok(())
    }

    fn create_descriptor_set_layout(
        &self,
        _bindings: &[LayoutBinding],
    ) -> GpuResult<vk::DescriptorSetLayout> {
        Ok(self.handle())
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.release(layout, "descriptor set layout");
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        _sizes: &[vk::DescriptorPoolSize],
    ) -> GpuResult<vk::DescriptorPool> {
        let mut state = self.state.lock();
        let raw = state.alloc();
        state.descriptor_pools.insert(raw, (max_sets, 0));
        Ok(vk::DescriptorPool::from_raw(raw))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.state.lock();
        state.descriptor_pools.remove(&pool.as_raw());
        let sets: Vec<u64> = state
            .set_pool
            .iter()
            .filter(|(_, p)| **p == pool.as_raw())
            .map(|(s, _)| *s)
            .collect();
        for set in sets {
            state.set_pool.remove(&set);
            state.release(set, "descriptor set");
        }
        state.release(pool.as_raw(), "descriptor pool");
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> GpuResult<vk::DescriptorSet> {
        let mut state = self.state.lock();
        state.check(pool.as_raw(), "descriptor pool");
        state.check(layout.as_raw(), "descriptor set layout");
        let (max_sets, used) = state
            .descriptor_pools
            .get(&pool.as_raw())
            .copied()
            .unwrap_or((0, 0));
        if used >= max_sets {
            return Err(GpuError::PoolExhausted {
                pool: "vkAllocateDescriptorSets",
            });
        }
        state.descriptor_pools.insert(pool.as_raw(), (max_sets, used + 1));
        let raw = state.alloc();
        state.set_pool.insert(raw, pool.as_raw());
        state.stats.descriptor_sets_allocated += 1;
        Ok(vk::DescriptorSet::from_raw(raw))
    }

    fn free_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        sets: &[vk::DescriptorSet],
    ) -> GpuResult<()> {
        let mut state = self.state.lock();
        for set in sets {
            state.set_pool.remove(&set.as_raw());
            state.descriptor_writes.remove(&set.as_raw());
            state.release(set.as_raw(), "descriptor set");
            if let Some((_, used)) = state.descriptor_pools.get_mut(&pool.as_raw()) {
                *used = used.saturating_sub(1);
            }
        }
        Ok(())
    }

    fn write_descriptors(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
        let mut state = self.state.lock();
        state.check(set.as_raw(), "descriptor set");
        state
            .descriptor_writes
            .entry(set.as_raw())
            .or_default()
            .extend_from_slice(writes);
    }

    fn create_buffer(&self, size: u64, _usage: vk::BufferUsageFlags) -> GpuResult<vk::Buffer> {
        let mut state = self.state.lock();
        let raw = state.alloc();
        state.buffers.insert(raw, vec![0; size as usize]);
        Ok(vk::Buffer::from_raw(raw))
    }

    fn write_buffer(&self, buffer: vk::Buffer, offset: u64, data: &[u8]) -> GpuResult<()> {
        let mut state = self.state.lock();
        state.check(buffer.as_raw(), "buffer");
        let contents = state
            .buffers
            .get_mut(&buffer.as_raw())
            .ok_or(GpuError::Allocation("write to unknown buffer".into()))?;
        let start = offset as usize;
        let end = start + data.len();
        if end > contents.len() {
            return Err(GpuError::Allocation(format!(
                "write of {} bytes at {start} overflows buffer of {}",
                data.len(),
                contents.len()
            )));
        }
        contents[start..end].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut state = self.state.lock();
        state.buffers.remove(&buffer.as_raw());
        state.release(buffer.as_raw(), "buffer");
    }

    fn create_image(&self, desc: &ImageDesc) -> GpuResult<GpuImage> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(GpuError::ZeroExtent);
        }
        let mut state = self.state.lock();
        Ok(GpuImage {
            image: vk::Image::from_raw(state.alloc()),
            view: vk::ImageView::from_raw(state.alloc()),
            format: desc.format,
        })
    }

    fn create_texture(&self, _width: u32, _height: u32, _pixels: &[u8]) -> GpuResult<GpuImage> {
        let mut state = self.state.lock();
        Ok(GpuImage {
            image: vk::Image::from_raw(state.alloc()),
            view: vk::ImageView::from_raw(state.alloc()),
            format: vk::Format::R8G8B8A8_UNORM,
        })
    }

    fn destroy_image(&self, image: GpuImage) {
        let mut state = self.state.lock();
        state.release(image.view.as_raw(), "image view");
        state.release(image.image.as_raw(), "image");
    }

    fn create_sampler(&self) -> GpuResult<vk::Sampler> {
        Ok(self.handle())
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.release(sampler, "sampler");
    }

    fn create_render_pass(&self, _desc: &RenderPassDesc) -> GpuResult<vk::RenderPass> {
        Ok(self.handle())
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.release(render_pass, "render pass");
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        views: &[vk::ImageView],
        _extent: vk::Extent2D,
    ) -> GpuResult<vk::Framebuffer> {
        let mut state = self.state.lock();
        state.check(render_pass.as_raw(), "render pass");
        for view in views {
            state.check(view.as_raw(), "image view");
        }
        Ok(vk::Framebuffer::from_raw(state.alloc()))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.release(framebuffer, "framebuffer");
    }

    fn create_shader_module(&self, _name: &str) -> GpuResult<vk::ShaderModule> {
        let mut state = self.state.lock();
        state.stats.shader_modules_created += 1;
        Ok(vk::ShaderModule::from_raw(state.alloc()))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.release(module, "shader module");
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        _push_constant_size: u32,
    ) -> GpuResult<vk::PipelineLayout> {
        let mut state = self.state.lock();
        for layout in set_layouts {
            state.check(layout.as_raw(), "descriptor set layout");
        }
        Ok(vk::PipelineLayout::from_raw(state.alloc()))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.release(layout, "pipeline layout");
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> GpuResult<vk::Pipeline> {
        let mut state = self.state.lock();
        state.check(desc.render_pass.as_raw(), "render pass");
        state.check(desc.layout.as_raw(), "pipeline layout");
        state.check(desc.vertex_shader.as_raw(), "shader module");
        state.check(desc.fragment_shader.as_raw(), "shader module");
        if let Some(geometry) = desc.geometry_shader {
            state.check(geometry.as_raw(), "shader module");
        }
        state.stats.pipelines_created += 1;
        Ok(vk::Pipeline::from_raw(state.alloc()))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.release(pipeline, "pipeline");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn extent() -> vk::Extent2D {
        vk::Extent2D {
            width: 640,
            height: 480,
        }
    }

    #[test]
    fn manual_fence_blocks_until_completed() {
        let gpu = Arc::new(HeadlessContext::new(extent(), 2, Completion::Manual));
        let fence = gpu.create_fence(false).unwrap();
        gpu.submit(
            QueueKind::Graphics,
            &Submission {
                command_buffers: &[],
                wait: &[],
                signal: &[],
                fence,
            },
        )
        .unwrap();
        assert!(!gpu.is_signaled(fence));

        let completer = {
            let gpu = Arc::clone(&gpu);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                gpu.complete_next();
            })
        };
        gpu.wait_for_fences(&[fence]).unwrap();
        assert!(gpu.is_signaled(fence));
        completer.join().unwrap();
    }

    #[test]
    fn stale_surface_reports_on_acquire_and_present() {
        let gpu = HeadlessContext::new(extent(), 3, Completion::Immediate);
        let info = gpu.create_swapchain(extent()).unwrap();
        assert_eq!(info.image_views.len(), 3);
        let semaphore = gpu.create_semaphore().unwrap();
        assert!(matches!(
            gpu.acquire_next_image(semaphore).unwrap(),
            AcquireOutcome::Image { index: 0, .. }
        ));
        gpu.invalidate_surface();
        assert_eq!(gpu.acquire_next_image(semaphore).unwrap(), AcquireOutcome::Stale);
        assert_eq!(gpu.present(0, &[]).unwrap(), PresentOutcome::Stale);
    }

    #[test]
    fn zero_extent_refuses_swapchain() {
        let gpu = HeadlessContext::new(extent(), 2, Completion::Immediate);
        gpu.resize_surface(vk::Extent2D {
            width: 0,
            height: 0,
        });
        assert_eq!(gpu.create_swapchain(extent()).unwrap_err(), GpuError::ZeroExtent);
    }

    #[test]
    fn descriptor_pool_runs_out() {
        let gpu = HeadlessContext::new(extent(), 2, Completion::Immediate);
        let layout = gpu.create_descriptor_set_layout(&[]).unwrap();
        let pool = gpu.create_descriptor_pool(1, &[]).unwrap();
        gpu.allocate_descriptor_set(pool, layout).unwrap();
        assert!(gpu.allocate_descriptor_set(pool, layout).unwrap_err().is_exhaustion());
    }

    #[test]
    fn submit_fault_fires_once() {
        let gpu = HeadlessContext::new(extent(), 2, Completion::Immediate);
        let fence = gpu.create_fence(false).unwrap();
        let submission = Submission {
            command_buffers: &[],
            wait: &[],
            signal: &[],
            fence,
        };
        gpu.inject(Fault::Submit(QueueKind::Graphics), vk::Result::ERROR_DEVICE_LOST);
        gpu.submit(QueueKind::Compute, &submission).unwrap();
        let err = gpu.submit(QueueKind::Graphics, &submission).unwrap_err();
        assert!(matches!(err, GpuError::Vulkan { code: vk::Result::ERROR_DEVICE_LOST, .. }));
        gpu.submit(QueueKind::Graphics, &submission).unwrap();
        assert_eq!(gpu.stats().submissions, 2);
    }

    #[test]
    fn thread_fault_only_hits_that_thread() {
        let gpu = Arc::new(HeadlessContext::new(extent(), 2, Completion::Immediate));
        let pool = gpu.create_command_pool(QueueKind::Graphics).unwrap();
        let buffers = gpu
            .allocate_command_buffers(pool, vk::CommandBufferLevel::PRIMARY, 2)
            .unwrap();
        gpu.inject(Fault::RecordOnThread("faulty".into()), vk::Result::ERROR_UNKNOWN);

        gpu.record(buffers[0], Recording::Primary, &[]).unwrap();
        let failed = {
            let gpu = Arc::clone(&gpu);
            let buffer = buffers[1];
            thread::Builder::new()
                .name("faulty".into())
                .spawn(move || gpu.record(buffer, Recording::Primary, &[]).is_err())
                .unwrap()
                .join()
                .unwrap()
        };
        assert!(failed);

        gpu.clear_faults();
        gpu.record(buffers[1], Recording::Primary, &[]).unwrap();
    }

    #[test]
    fn use_after_destroy_is_flagged() {
        let gpu = HeadlessContext::new(extent(), 2, Completion::Immediate);
        let fence = gpu.create_fence(true).unwrap();
        gpu.destroy_fence(fence);
        gpu.wait_for_fences(&[fence]).unwrap();
        assert_eq!(gpu.violations().len(), 1);
    }
}
