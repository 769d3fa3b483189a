// Backend module - GpuContext implementations
//
// vulkan:   thin wrapper around ash, presents to a real window
// headless: in-memory device for tests and smoke runs; records what the
//           renderer asked for and flags misuse

pub mod buffer;
pub mod device;
pub mod headless;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod vulkan;

pub use device::VulkanDevice;
pub use headless::{Completion, Fault, HeadlessContext};
pub use swapchain::Swapchain;
pub use vulkan::VulkanContext;
