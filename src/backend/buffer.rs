// Buffer and image memory
//
// All device memory goes through gpu-allocator. Host buffers stay mapped
// for their whole life; attachment images live in device-local memory.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

use super::device::{check, VulkanDevice};
use crate::error::{GpuError, GpuResult};
use crate::gpu::{GpuImage, ImageDesc};

fn allocate(
    device: &VulkanDevice,
    name: &str,
    requirements: vk::MemoryRequirements,
    location: MemoryLocation,
    linear: bool,
) -> GpuResult<Allocation> {
    let mut guard = device.allocator.lock();
    let allocator = guard
        .as_mut()
        .ok_or_else(|| GpuError::Allocation("allocator already shut down".into()))?;

    allocator
        .allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })
        .map_err(|e| {
            log::error!("Allocating {} failed: {}", name, e);
            GpuError::Allocation(e.to_string())
        })
}

/// Return an allocation to the allocator
pub fn free(device: &VulkanDevice, allocation: Allocation) {
    if let Some(allocator) = device.allocator.lock().as_mut() {
        if let Err(e) = allocator.free(allocation) {
            log::error!("Freeing allocation failed: {}", e);
        }
    }
}

/// Create a persistently mapped, host-visible buffer
pub fn create_host_buffer(
    device: &VulkanDevice,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
) -> GpuResult<(vk::Buffer, Allocation)> {
    let buffer_info = vk::BufferCreateInfo::builder()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = check("vkCreateBuffer", unsafe {
        device.device.create_buffer(&buffer_info, None)
    })?;

    let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };
    let allocation = match allocate(device, "host buffer", requirements, MemoryLocation::CpuToGpu, true) {
        Ok(allocation) => allocation,
        Err(e) => {
            unsafe { device.device.destroy_buffer(buffer, None) };
            return Err(e);
        }
    };

    let bound = check("vkBindBufferMemory", unsafe {
        device
            .device
            .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
    });
    if let Err(e) = bound {
        free(device, allocation);
        unsafe { device.device.destroy_buffer(buffer, None) };
        return Err(e);
    }

    Ok((buffer, allocation))
}

/// Copy `data` into a mapped allocation at `offset`
pub fn write_mapped(allocation: &mut Allocation, offset: u64, data: &[u8]) -> GpuResult<()> {
    let mapped = allocation
        .mapped_slice_mut()
        .ok_or_else(|| GpuError::Allocation("buffer memory is not host visible".into()))?;

    let start = offset as usize;
    let end = start + data.len();
    if end > mapped.len() {
        return Err(GpuError::Allocation(format!(
            "write of {} bytes at {} overruns a {} byte buffer",
            data.len(),
            offset,
            mapped.len()
        )));
    }
    mapped[start..end].copy_from_slice(data);
    Ok(())
}

/// Create a 2D image in device-local memory plus its default view
pub fn create_image(
    device: &VulkanDevice,
    desc: &ImageDesc,
) -> GpuResult<(GpuImage, Allocation)> {
    let image_info = vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::TYPE_2D)
        .extent(vk::Extent3D {
            width: desc.extent.width,
            height: desc.extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .format(desc.format)
        .tiling(vk::ImageTiling::OPTIMAL)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .usage(desc.usage)
        .samples(vk::SampleCountFlags::TYPE_1)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let image = check("vkCreateImage", unsafe {
        device.device.create_image(&image_info, None)
    })?;

    let requirements = unsafe { device.device.get_image_memory_requirements(image) };
    let allocation = match allocate(device, "image", requirements, MemoryLocation::GpuOnly, false) {
        Ok(allocation) => allocation,
        Err(e) => {
            unsafe { device.device.destroy_image(image, None) };
            return Err(e);
        }
    };

    let view = check("vkBindImageMemory", unsafe {
        device
            .device
            .bind_image_memory(image, allocation.memory(), allocation.offset())
    })
    .and_then(|()| {
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: desc.aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        check("vkCreateImageView", unsafe {
            device.device.create_image_view(&view_info, None)
        })
    });

    match view {
        Ok(view) => Ok((
            GpuImage {
                image,
                view,
                format: desc.format,
            },
            allocation,
        )),
        Err(e) => {
            free(device, allocation);
            unsafe { device.device.destroy_image(image, None) };
            Err(e)
        }
    }
}
