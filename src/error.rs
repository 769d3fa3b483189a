//! Error types shared by the GPU backends and the renderer.

use ash::vk;
use thiserror::Error;

/// Failure of a single GPU-facing operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GpuError {
    /// A Vulkan call returned an error code.
    #[error("{operation} failed: {code:?}")]
    Vulkan {
        operation: &'static str,
        code: vk::Result,
    },

    /// The presentation surface no longer matches the swapchain.
    #[error("presentation surface is out of date")]
    SurfaceStale,

    /// The surface has a zero-sized extent (minimized window).
    #[error("surface extent is zero")]
    ZeroExtent,

    /// A fixed-size pool ran out of space.
    #[error("{pool} pool exhausted")]
    PoolExhausted { pool: &'static str },

    /// Device memory allocation failed.
    #[error("allocation failed: {0}")]
    Allocation(String),

    /// A shader module could not be loaded.
    #[error("shader '{name}': {reason}")]
    Shader { name: String, reason: String },

    /// The window system is not supported by this backend.
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// Backend setup failed.
    #[error("initialization failed: {0}")]
    Init(String),
}

impl GpuError {
    /// Map a raw Vulkan result, folding the codes the renderer treats specially.
    pub fn from_vk(operation: &'static str, code: vk::Result) -> Self {
        match code {
            vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::ERROR_SURFACE_LOST_KHR => {
                GpuError::SurfaceStale
            }
            vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL => {
                GpuError::PoolExhausted { pool: operation }
            }
            _ => GpuError::Vulkan { operation, code },
        }
    }

    /// Resource exhaustion ends the session; everything else only ends the frame.
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, GpuError::PoolExhausted { .. })
            || matches!(
                self,
                GpuError::Vulkan {
                    code: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
                        | vk::Result::ERROR_OUT_OF_HOST_MEMORY,
                    ..
                }
            )
    }
}

/// Result alias for GPU operations.
pub type GpuResult<T> = std::result::Result<T, GpuError>;

/// Failure of a whole frame, as seen by the application.
#[derive(Error, Debug)]
pub enum RenderError {
    /// A pool or device heap is exhausted; the renderer cannot continue.
    #[error("resource exhaustion: {0}")]
    ResourceExhausted(GpuError),

    /// A GPU call failed outside of the recoverable paths.
    #[error("gpu failure: {0}")]
    Gpu(#[from] GpuError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_date_maps_to_stale() {
        let err = GpuError::from_vk("vkAcquireNextImageKHR", vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert_eq!(err, GpuError::SurfaceStale);
    }

    #[test]
    fn pool_memory_is_exhaustion() {
        let err = GpuError::from_vk("vkAllocateDescriptorSets", vk::Result::ERROR_OUT_OF_POOL_MEMORY);
        assert!(err.is_exhaustion());
        assert!(!GpuError::SurfaceStale.is_exhaustion());
    }

    #[test]
    fn vulkan_error_names_operation() {
        let err = GpuError::from_vk("vkQueueSubmit", vk::Result::ERROR_DEVICE_LOST);
        assert_eq!(err.to_string(), "vkQueueSubmit failed: ERROR_DEVICE_LOST");
    }
}
