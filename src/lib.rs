//! Frame orchestration core of a deferred Vulkan renderer.
//!
//! The application drives frames through [`Renderer`]:
//! `begin_frame`, any number of `submit_*` calls, then `end_frame`.
//! Everything below that talks to the device through [`gpu::GpuContext`],
//! implemented for real hardware by [`backend::VulkanContext`] and in memory
//! by [`backend::HeadlessContext`].

pub mod backend;
pub mod config;
pub mod error;
pub mod gpu;
pub mod renderer;
pub mod scene;

pub use config::Config;
pub use error::{GpuError, GpuResult, RenderError};
pub use renderer::lights::{LightDesc, LightKind};
pub use renderer::{FrameOutcome, FrameStats, Renderer, RendererSettings};
pub use scene::{FrameCamera, MaterialHandle, MeshHandle, SceneResources, SkinnedState};
