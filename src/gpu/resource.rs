//! Scoped ownership of GPU objects.
//!
//! A `Scoped<T>` destroys its handle when dropped, so early returns on error
//! paths cannot leak semaphores, fences or pools.

use std::fmt;
use std::sync::Arc;

use ash::vk;

use super::{GpuContext, GpuImage};

/// A GPU object that knows how to destroy itself.
pub trait GpuObject: Copy + Send + Sync + 'static {
    fn destroy(self, gpu: &dyn GpuContext);
}

macro_rules! gpu_object {
    ($($ty:ty => $destroy:ident),* $(,)?) => {
        $(
            impl GpuObject for $ty {
                fn destroy(self, gpu: &dyn GpuContext) {
                    gpu.$destroy(self);
                }
            }
        )*
    };
}

gpu_object! {
    vk::Semaphore => destroy_semaphore,
    vk::Fence => destroy_fence,
    vk::CommandPool => destroy_command_pool,
    vk::DescriptorPool => destroy_descriptor_pool,
    vk::DescriptorSetLayout => destroy_descriptor_set_layout,
    vk::Buffer => destroy_buffer,
    vk::Sampler => destroy_sampler,
    vk::RenderPass => destroy_render_pass,
    vk::Framebuffer => destroy_framebuffer,
    vk::ShaderModule => destroy_shader_module,
    vk::PipelineLayout => destroy_pipeline_layout,
    vk::Pipeline => destroy_pipeline,
    GpuImage => destroy_image,
}

/// Owns one GPU object and destroys it on drop.
pub struct Scoped<T: GpuObject> {
    gpu: Arc<dyn GpuContext>,
    handle: T,
}

impl<T: GpuObject> Scoped<T> {
    pub fn new(gpu: &Arc<dyn GpuContext>, handle: T) -> Self {
        Self {
            gpu: Arc::clone(gpu),
            handle,
        }
    }

    #[inline]
    pub fn get(&self) -> T {
        self.handle
    }
}

impl<T: GpuObject> Drop for Scoped<T> {
    fn drop(&mut self) {
        self.handle.destroy(&*self.gpu);
    }
}

impl<T: GpuObject + fmt::Debug> fmt::Debug for Scoped<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Scoped").field(&self.handle).finish()
    }
}
