// Synchronization primitives
//
// Fences for GPU-CPU sync, semaphores for GPU-GPU sync. Frame slots own
// these through the context; this file only wraps the raw calls.

use ash::vk;

use super::device::check;
use crate::error::GpuResult;

pub fn create_semaphore(device: &ash::Device) -> GpuResult<vk::Semaphore> {
    let info = vk::SemaphoreCreateInfo::builder();
    check("vkCreateSemaphore", unsafe { device.create_semaphore(&info, None) })
}

/// Fences used for frame pacing start signaled so the first wait passes.
pub fn create_fence(device: &ash::Device, signaled: bool) -> GpuResult<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };
    let info = vk::FenceCreateInfo::builder().flags(flags);
    check("vkCreateFence", unsafe { device.create_fence(&info, None) })
}

/// Blocks without timeout; slow waits are reported by the caller.
pub fn wait_all(device: &ash::Device, fences: &[vk::Fence]) -> GpuResult<()> {
    if fences.is_empty() {
        return Ok(());
    }
    check("vkWaitForFences", unsafe {
        device.wait_for_fences(fences, true, u64::MAX)
    })
}

pub fn reset(device: &ash::Device, fences: &[vk::Fence]) -> GpuResult<()> {
    if fences.is_empty() {
        return Ok(());
    }
    check("vkResetFences", unsafe { device.reset_fences(fences) })
}
