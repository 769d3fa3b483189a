// Pipelines
//
// Shader modules, descriptor set layouts and pipeline layouts live for the
// whole session. Pipelines bake the surface size and reference the render
// passes, so they are rebuilt on every swapchain recreation.

use std::sync::Arc;

use ash::vk;

use super::render_graph::PassId;
use crate::error::GpuResult;
use crate::gpu::{
    BlendMode, GpuContext, GraphicsPipelineDesc, LayoutBinding, Scoped, StencilMode, VertexLayout,
};

/// Push constant block shared by every pipeline.
pub const PUSH_CONSTANT_SIZE: u32 = 128;

/// Stages that see the push constant block.
pub const PUSH_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::VERTEX.as_raw()
        | vk::ShaderStageFlags::GEOMETRY.as_raw()
        | vk::ShaderStageFlags::FRAGMENT.as_raw(),
);

/// Descriptor set layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetLayoutKind {
    /// Dynamic-offset scene uniforms + light buffer.
    Scene,
    /// Albedo texture + material parameters.
    Material,
    /// Bone snapshot texture.
    Bones,
    /// Albedo, position, normal, blurred occlusion as input attachments.
    GBufferInputs,
    /// Position and normal, sampled.
    OcclusionInputs,
    /// Raw occlusion, sampled.
    BlurInput,
    /// Render colour + UI as input attachments.
    CompositeInputs,
}

impl SetLayoutKind {
    pub const ALL: [SetLayoutKind; 7] = [
        SetLayoutKind::Scene,
        SetLayoutKind::Material,
        SetLayoutKind::Bones,
        SetLayoutKind::GBufferInputs,
        SetLayoutKind::OcclusionInputs,
        SetLayoutKind::BlurInput,
        SetLayoutKind::CompositeInputs,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn bindings(self) -> Vec<LayoutBinding> {
        let fragment = vk::ShaderStageFlags::FRAGMENT;
        let all = vk::ShaderStageFlags::VERTEX
            | vk::ShaderStageFlags::GEOMETRY
            | vk::ShaderStageFlags::FRAGMENT;
        let binding = |binding, kind, stages| LayoutBinding {
            binding,
            kind,
            stages,
        };
        match self {
            SetLayoutKind::Scene => vec![
                binding(0, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, all),
                binding(1, vk::DescriptorType::STORAGE_BUFFER_DYNAMIC, all),
            ],
            SetLayoutKind::Material => vec![
                binding(0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, fragment),
                binding(1, vk::DescriptorType::UNIFORM_BUFFER, fragment),
            ],
            SetLayoutKind::Bones => vec![binding(
                0,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::VERTEX,
            )],
            SetLayoutKind::GBufferInputs => (0..4)
                .map(|i| binding(i, vk::DescriptorType::INPUT_ATTACHMENT, fragment))
                .collect(),
            SetLayoutKind::OcclusionInputs => (0..2)
                .map(|i| binding(i, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, fragment))
                .collect(),
            SetLayoutKind::BlurInput => {
                vec![binding(0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, fragment)]
            }
            SetLayoutKind::CompositeInputs => (0..2)
                .map(|i| binding(i, vk::DescriptorType::INPUT_ATTACHMENT, fragment))
                .collect(),
        }
    }
}

/// Every graphics pipeline of the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PipelineId {
    GBufferStatic,
    GBufferSkinned,
    Occlusion,
    OcclusionBlur,
    ShadowVolumeStatic,
    ShadowVolumeSkinned,
    /// Point and spot lights, masked by the shadow volume.
    LightingStenciled,
    /// Ambient and directional lights.
    LightingUnmasked,
    UiOverlay,
    Composite,
}

/// Fixed state of a pipeline, independent of the surface.
struct PipelineTemplate {
    pass: PassId,
    subpass: u32,
    vertex: &'static str,
    geometry: Option<&'static str>,
    fragment: &'static str,
    vertex_layout: VertexLayout,
    topology: vk::PrimitiveTopology,
    cull_mode: vk::CullModeFlags,
    depth_test: bool,
    depth_write: bool,
    stencil: StencilMode,
    blend: BlendMode,
    color_attachment_count: u32,
}

impl PipelineId {
    pub const ALL: [PipelineId; 10] = [
        PipelineId::GBufferStatic,
        PipelineId::GBufferSkinned,
        PipelineId::Occlusion,
        PipelineId::OcclusionBlur,
        PipelineId::ShadowVolumeStatic,
        PipelineId::ShadowVolumeSkinned,
        PipelineId::LightingStenciled,
        PipelineId::LightingUnmasked,
        PipelineId::UiOverlay,
        PipelineId::Composite,
    ];

    fn index(self) -> usize {
        self as usize
    }

    fn label(self) -> &'static str {
        match self {
            PipelineId::GBufferStatic => "gbuffer_static",
            PipelineId::GBufferSkinned => "gbuffer_skinned",
            PipelineId::Occlusion => "occlusion",
            PipelineId::OcclusionBlur => "occlusion_blur",
            PipelineId::ShadowVolumeStatic => "shadow_volume_static",
            PipelineId::ShadowVolumeSkinned => "shadow_volume_skinned",
            PipelineId::LightingStenciled => "lighting_stenciled",
            PipelineId::LightingUnmasked => "lighting_unmasked",
            PipelineId::UiOverlay => "ui_overlay",
            PipelineId::Composite => "composite",
        }
    }

    /// Set layouts in set-index order.
    pub fn set_layouts(self) -> &'static [SetLayoutKind] {
        use SetLayoutKind::*;
        match self {
            PipelineId::GBufferStatic => &[Scene, Material],
            PipelineId::GBufferSkinned => &[Scene, Material, Bones],
            PipelineId::Occlusion => &[Scene, OcclusionInputs],
            PipelineId::OcclusionBlur => &[BlurInput],
            PipelineId::ShadowVolumeStatic => &[Scene],
            PipelineId::ShadowVolumeSkinned => &[Scene, Bones],
            PipelineId::LightingStenciled | PipelineId::LightingUnmasked => &[Scene, GBufferInputs],
            PipelineId::UiOverlay => &[Material],
            PipelineId::Composite => &[CompositeInputs],
        }
    }

    fn template(self) -> PipelineTemplate {
        let geometry = |vertex, vertex_layout| PipelineTemplate {
            pass: PassId::GBuffer,
            vertex,
            fragment: "gbuffer.frag",
            vertex_layout,
            cull_mode: vk::CullModeFlags::BACK,
            depth_test: true,
            depth_write: true,
            color_attachment_count: 3,
            ..fullscreen()
        };
        let shadow = |vertex, vertex_layout| PipelineTemplate {
            pass: PassId::Main,
            subpass: 1,
            vertex,
            geometry: Some("shadow_volume.geom"),
            fragment: "shadow_volume.frag",
            vertex_layout,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST_WITH_ADJACENCY,
            depth_test: true,
            stencil: StencilMode::ShadowVolume,
            blend: BlendMode::NoColorWrite,
            ..fullscreen()
        };

        match self {
            PipelineId::GBufferStatic => geometry("gbuffer_static.vert", VertexLayout::Static),
            PipelineId::GBufferSkinned => geometry("gbuffer_skinned.vert", VertexLayout::Skinned),
            PipelineId::Occlusion => PipelineTemplate {
                pass: PassId::Occlusion,
                fragment: "occlusion.frag",
                ..fullscreen()
            },
            PipelineId::OcclusionBlur => PipelineTemplate {
                fragment: "blur.frag",
                ..fullscreen()
            },
            PipelineId::ShadowVolumeStatic => shadow("shadow_static.vert", VertexLayout::Static),
            PipelineId::ShadowVolumeSkinned => shadow("shadow_skinned.vert", VertexLayout::Skinned),
            PipelineId::LightingStenciled => PipelineTemplate {
                subpass: 1,
                fragment: "lighting.frag",
                stencil: StencilMode::EqualZero,
                blend: BlendMode::Additive,
                ..fullscreen()
            },
            PipelineId::LightingUnmasked => PipelineTemplate {
                subpass: 1,
                fragment: "lighting.frag",
                blend: BlendMode::Additive,
                ..fullscreen()
            },
            PipelineId::UiOverlay => PipelineTemplate {
                subpass: 2,
                vertex: "ui.vert",
                fragment: "ui.frag",
                blend: BlendMode::Alpha,
                ..fullscreen()
            },
            PipelineId::Composite => PipelineTemplate {
                subpass: 3,
                ..fullscreen()
            },
        }
    }

    /// Render pass and subpass the pipeline draws in.
    pub fn location(self) -> (PassId, u32) {
        let template = self.template();
        (template.pass, template.subpass)
    }
}

/// Full-screen triangle in main subpass 0; the base every template edits.
fn fullscreen() -> PipelineTemplate {
    PipelineTemplate {
        pass: PassId::Main,
        subpass: 0,
        vertex: "fullscreen.vert",
        geometry: None,
        fragment: "composite.frag",
        vertex_layout: VertexLayout::None,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        cull_mode: vk::CullModeFlags::NONE,
        depth_test: false,
        depth_write: false,
        stencil: StencilMode::Disabled,
        blend: BlendMode::Opaque,
        color_attachment_count: 1,
    }
}

/// Every shader module a pipeline references, loaded once.
const SHADERS: [&str; 14] = [
    "gbuffer_static.vert",
    "gbuffer_skinned.vert",
    "gbuffer.frag",
    "fullscreen.vert",
    "occlusion.frag",
    "blur.frag",
    "shadow_static.vert",
    "shadow_skinned.vert",
    "shadow_volume.geom",
    "shadow_volume.frag",
    "lighting.frag",
    "ui.vert",
    "ui.frag",
    "composite.frag",
];

/// Session-lifetime shader modules and layouts.
pub struct PipelineLibrary {
    gpu: Arc<dyn GpuContext>,
    // Field order is drop order: pipeline layouts before the set layouts
    pipeline_layouts: Vec<Scoped<vk::PipelineLayout>>,
    set_layouts: Vec<Scoped<vk::DescriptorSetLayout>>,
    shaders: Vec<(&'static str, Scoped<vk::ShaderModule>)>,
}

impl PipelineLibrary {
    pub fn new(gpu: &Arc<dyn GpuContext>) -> GpuResult<Self> {
        let shaders = SHADERS
            .iter()
            .map(|&name| Ok((name, Scoped::new(gpu, gpu.create_shader_module(name)?))))
            .collect::<GpuResult<Vec<_>>>()?;

        let set_layouts = SetLayoutKind::ALL
            .iter()
            .map(|kind| {
                let layout = gpu.create_descriptor_set_layout(&kind.bindings())?;
                Ok(Scoped::new(gpu, layout))
            })
            .collect::<GpuResult<Vec<_>>>()?;

        let pipeline_layouts = PipelineId::ALL
            .iter()
            .map(|id| {
                let sets: Vec<vk::DescriptorSetLayout> = id
                    .set_layouts()
                    .iter()
                    .map(|kind| set_layouts[kind.index()].get())
                    .collect();
                let layout = gpu.create_pipeline_layout(&sets, PUSH_CONSTANT_SIZE)?;
                Ok(Scoped::new(gpu, layout))
            })
            .collect::<GpuResult<Vec<_>>>()?;

        log::info!(
            "Loaded {} shader modules, {} pipeline layouts",
            shaders.len(),
            pipeline_layouts.len()
        );

        Ok(Self {
            gpu: Arc::clone(gpu),
            pipeline_layouts,
            set_layouts,
            shaders,
        })
    }

    pub fn set_layout(&self, kind: SetLayoutKind) -> vk::DescriptorSetLayout {
        self.set_layouts[kind.index()].get()
    }

    pub fn layout(&self, id: PipelineId) -> vk::PipelineLayout {
        self.pipeline_layouts[id.index()].get()
    }

    fn shader(&self, name: &str) -> vk::ShaderModule {
        self.shaders
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, module)| module.get())
            .unwrap_or_else(vk::ShaderModule::null)
    }

    /// Builds every pipeline against the current render passes.
    pub fn build<F>(&self, render_pass: F, extent: vk::Extent2D, version: u64) -> GpuResult<PipelineSet>
    where
        F: Fn(PassId) -> vk::RenderPass,
    {
        let pipelines = PipelineId::ALL
            .iter()
            .map(|&id| {
                let t = id.template();
                let desc = GraphicsPipelineDesc {
                    label: id.label(),
                    vertex_shader: self.shader(t.vertex),
                    geometry_shader: t.geometry.map(|g| self.shader(g)),
                    fragment_shader: self.shader(t.fragment),
                    vertex_layout: t.vertex_layout,
                    topology: t.topology,
                    layout: self.layout(id),
                    render_pass: render_pass(t.pass),
                    subpass: t.subpass,
                    extent,
                    cull_mode: t.cull_mode,
                    depth_test: t.depth_test,
                    depth_write: t.depth_write,
                    stencil: t.stencil,
                    blend: t.blend,
                    color_attachment_count: t.color_attachment_count,
                };
                let pipeline = self.gpu.create_graphics_pipeline(&desc)?;
                Ok(Scoped::new(&self.gpu, pipeline))
            })
            .collect::<GpuResult<Vec<_>>>()?;

        log::debug!(
            "Built {} pipelines at {}x{} (version {})",
            pipelines.len(),
            extent.width,
            extent.height,
            version
        );
        Ok(PipelineSet { pipelines, version })
    }
}

/// Pipelines of one surface generation.
pub struct PipelineSet {
    pipelines: Vec<Scoped<vk::Pipeline>>,
    version: u64,
}

impl PipelineSet {
    pub fn get(&self, id: PipelineId) -> vk::Pipeline {
        self.pipelines[id.index()].get()
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{Completion, HeadlessContext};

    #[test]
    fn library_builds_every_pipeline() {
        let headless = Arc::new(HeadlessContext::new(
            vk::Extent2D {
                width: 16,
                height: 16,
            },
            2,
            Completion::Immediate,
        ));
        let gpu: Arc<dyn GpuContext> = headless.clone();
        let library = PipelineLibrary::new(&gpu).unwrap();
        let pass = gpu.create_render_pass(&Default::default()).unwrap();

        let set = library
            .build(
                |_| pass,
                vk::Extent2D {
                    width: 16,
                    height: 16,
                },
                1,
            )
            .unwrap();

        assert_eq!(headless.stats().shader_modules_created, SHADERS.len());
        assert_eq!(headless.stats().pipelines_created, PipelineId::ALL.len());
        assert_ne!(set.get(PipelineId::Composite), set.get(PipelineId::UiOverlay));
        drop(set);
        drop(library);
        gpu.destroy_render_pass(pass);
        assert!(headless.violations().is_empty());
    }

    #[test]
    fn shaders_referenced_by_templates_are_loaded() {
        for id in PipelineId::ALL {
            let t = id.template();
            assert!(SHADERS.contains(&t.vertex), "{:?}", id);
            assert!(SHADERS.contains(&t.fragment), "{:?}", id);
            if let Some(g) = t.geometry {
                assert!(SHADERS.contains(&g), "{:?}", id);
            }
        }
    }

    #[test]
    fn lighting_variants_differ_only_in_stencil() {
        let stenciled = PipelineId::LightingStenciled.template();
        let unmasked = PipelineId::LightingUnmasked.template();
        assert_eq!(stenciled.stencil, StencilMode::EqualZero);
        assert_eq!(unmasked.stencil, StencilMode::Disabled);
        assert_eq!(stenciled.blend, unmasked.blend);
        assert_eq!(PipelineId::LightingStenciled.location(), (PassId::Main, 1));
        assert_eq!(PipelineId::ShadowVolumeStatic.location(), (PassId::Main, 1));
    }
}
