// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// A new chain is created from the previous one so in-flight presents
// can retire gracefully; the old chain is destroyed once replaced.

use ash::extensions::khr;
use ash::vk;
use std::sync::Arc;

use super::device::{check, VulkanDevice};
use crate::error::{GpuError, GpuResult};
use crate::gpu::{AcquireOutcome, PresentOutcome};

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    loader: khr::Swapchain,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(
        device: Arc<VulkanDevice>,
        loader: khr::Swapchain,
        requested: vk::Extent2D,
        preferred_mode: vk::PresentModeKHR,
        old: vk::SwapchainKHR,
    ) -> GpuResult<Self> {
        let surface = device.surface;
        let surface_loader = &device.surface_loader;

        // Query surface capabilities
        let surface_caps = check("vkGetPhysicalDeviceSurfaceCapabilitiesKHR", unsafe {
            surface_loader.get_physical_device_surface_capabilities(device.physical_device, surface)
        })?;

        // Choose extent; a minimized window reports 0x0
        let extent = if surface_caps.current_extent.width != u32::MAX {
            surface_caps.current_extent
        } else {
            vk::Extent2D {
                width: requested.width.clamp(
                    surface_caps.min_image_extent.width,
                    surface_caps.max_image_extent.width,
                ),
                height: requested.height.clamp(
                    surface_caps.min_image_extent.height,
                    surface_caps.max_image_extent.height,
                ),
            }
        };
        if extent.width == 0 || extent.height == 0 {
            return Err(GpuError::ZeroExtent);
        }

        log::info!("Creating swapchain: {}x{}", extent.width, extent.height);

        // Query supported formats
        let formats = check("vkGetPhysicalDeviceSurfaceFormatsKHR", unsafe {
            surface_loader.get_physical_device_surface_formats(device.physical_device, surface)
        })?;

        // Query supported present modes
        let present_modes = check("vkGetPhysicalDeviceSurfacePresentModesKHR", unsafe {
            surface_loader.get_physical_device_surface_present_modes(device.physical_device, surface)
        })?;

        // Choose surface format (prefer SRGB)
        let surface_format = formats
            .iter()
            .find(|f| {
                f.format == vk::Format::B8G8R8A8_SRGB
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .or_else(|| formats.first())
            .copied()
            .ok_or_else(|| GpuError::Init("no suitable surface format".into()))?;

        // Configured mode if available, FIFO otherwise (always supported)
        let present_mode = if present_modes.contains(&preferred_mode) {
            preferred_mode
        } else {
            log::warn!("Present mode {:?} unsupported, using FIFO", preferred_mode);
            vk::PresentModeKHR::FIFO
        };

        log::info!("Present mode: {:?}", present_mode);

        // One more than the minimum so acquire rarely blocks
        let mut image_count = surface_caps.min_image_count + 1;
        if surface_caps.max_image_count > 0 && image_count > surface_caps.max_image_count {
            image_count = surface_caps.max_image_count;
        }

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old);

        let swapchain = check("vkCreateSwapchainKHR", unsafe {
            loader.create_swapchain(&create_info, None)
        })?;

        // From here on the chain is owned; drop cleans up on failure
        let mut created = Self {
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            format: surface_format.format,
            extent,
            loader,
            device,
        };

        created.images = check("vkGetSwapchainImagesKHR", unsafe {
            created.loader.get_swapchain_images(swapchain)
        })?;

        log::info!("Created swapchain with {} images", created.images.len());

        for &image in &created.images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = check("vkCreateImageView", unsafe {
                created.device.device.create_image_view(&create_info, None)
            })?;
            created.image_views.push(view);
        }

        Ok(created)
    }

    /// Acquire next image for rendering; blocks until one is available.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> GpuResult<AcquireOutcome> {
        let result = unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => Ok(AcquireOutcome::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::Stale),
            Err(e) => check("vkAcquireNextImageKHR", Err(e)),
        }
    }

    /// Present rendered image to screen
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> GpuResult<PresentOutcome> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.loader.queue_present(queue, &present_info) };

        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Stale),
            Err(e) => check("vkQueuePresentKHR", Err(e)),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}
