// Render pass and graphics pipeline creation
//
// Translates the renderer's pass and pipeline descriptions into Vulkan
// objects. The graphics pipeline covers: vertex input, shaders,
// rasterization, depth/stencil, blending.

use ash::vk;

use super::device::check;
use crate::error::GpuResult;
use crate::gpu::{
    BlendMode, GraphicsPipelineDesc, LayoutBinding, RenderPassDesc, StencilMode, VertexLayout,
};

/// Stages that may read push constants
const PUSH_CONSTANT_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::VERTEX.as_raw()
        | vk::ShaderStageFlags::GEOMETRY.as_raw()
        | vk::ShaderStageFlags::FRAGMENT.as_raw(),
);

pub fn create_render_pass(device: &ash::Device, desc: &RenderPassDesc) -> GpuResult<vk::RenderPass> {
    let subpasses: Vec<vk::SubpassDescription> = desc
        .subpasses
        .iter()
        .map(|subpass| {
            let mut builder = vk::SubpassDescription::builder()
                .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                .input_attachments(&subpass.inputs)
                .color_attachments(&subpass.colors)
                .preserve_attachments(&subpass.preserve);
            if let Some(depth) = subpass.depth_stencil.as_ref() {
                builder = builder.depth_stencil_attachment(depth);
            }
            builder.build()
        })
        .collect();

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(&desc.attachments)
        .subpasses(&subpasses)
        .dependencies(&desc.dependencies);

    log::debug!(
        "Creating render pass '{}' ({} attachments, {} subpasses)",
        desc.label,
        desc.attachments.len(),
        desc.subpasses.len()
    );
    check("vkCreateRenderPass", unsafe {
        device.create_render_pass(&render_pass_info, None)
    })
}

pub fn create_framebuffer(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    views: &[vk::ImageView],
    extent: vk::Extent2D,
) -> GpuResult<vk::Framebuffer> {
    let framebuffer_info = vk::FramebufferCreateInfo::builder()
        .render_pass(render_pass)
        .attachments(views)
        .width(extent.width)
        .height(extent.height)
        .layers(1);

    check("vkCreateFramebuffer", unsafe {
        device.create_framebuffer(&framebuffer_info, None)
    })
}

pub fn create_set_layout(
    device: &ash::Device,
    bindings: &[LayoutBinding],
) -> GpuResult<vk::DescriptorSetLayout> {
    let bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
        .iter()
        .map(|b| {
            vk::DescriptorSetLayoutBinding::builder()
                .binding(b.binding)
                .descriptor_type(b.kind)
                .descriptor_count(1)
                .stage_flags(b.stages)
                .build()
        })
        .collect();

    let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
    check("vkCreateDescriptorSetLayout", unsafe {
        device.create_descriptor_set_layout(&info, None)
    })
}

pub fn create_pipeline_layout(
    device: &ash::Device,
    set_layouts: &[vk::DescriptorSetLayout],
    push_constant_size: u32,
) -> GpuResult<vk::PipelineLayout> {
    let push_constant_range = vk::PushConstantRange::builder()
        .stage_flags(PUSH_CONSTANT_STAGES)
        .offset(0)
        .size(push_constant_size)
        .build();

    let ranges: &[vk::PushConstantRange] = if push_constant_size > 0 {
        std::slice::from_ref(&push_constant_range)
    } else {
        &[]
    };

    let layout_info = vk::PipelineLayoutCreateInfo::builder()
        .set_layouts(set_layouts)
        .push_constant_ranges(ranges);

    check("vkCreatePipelineLayout", unsafe {
        device.create_pipeline_layout(&layout_info, None)
    })
}

fn attribute(location: u32, format: vk::Format, offset: u32) -> vk::VertexInputAttributeDescription {
    vk::VertexInputAttributeDescription::builder()
        .binding(0)
        .location(location)
        .format(format)
        .offset(offset)
        .build()
}

/// Vertex input for a layout: position, normal, uv, then joints and weights when skinned
fn vertex_input(
    layout: VertexLayout,
) -> (
    Vec<vk::VertexInputBindingDescription>,
    Vec<vk::VertexInputAttributeDescription>,
) {
    let stride = match layout {
        VertexLayout::None => return (Vec::new(), Vec::new()),
        VertexLayout::Static => 32,
        VertexLayout::Skinned => 64,
    };

    let binding = vk::VertexInputBindingDescription::builder()
        .binding(0)
        .stride(stride)
        .input_rate(vk::VertexInputRate::VERTEX)
        .build();

    let mut attributes = vec![
        attribute(0, vk::Format::R32G32B32_SFLOAT, 0),
        attribute(1, vk::Format::R32G32B32_SFLOAT, 12),
        attribute(2, vk::Format::R32G32_SFLOAT, 24),
    ];
    if layout == VertexLayout::Skinned {
        attributes.push(attribute(3, vk::Format::R32G32B32A32_UINT, 32));
        attributes.push(attribute(4, vk::Format::R32G32B32A32_SFLOAT, 48));
    }

    (vec![binding], attributes)
}

fn stencil_state(mode: StencilMode) -> (bool, vk::StencilOpState, vk::StencilOpState) {
    let base = vk::StencilOpState {
        fail_op: vk::StencilOp::KEEP,
        pass_op: vk::StencilOp::KEEP,
        depth_fail_op: vk::StencilOp::KEEP,
        compare_op: vk::CompareOp::ALWAYS,
        compare_mask: 0xff,
        write_mask: 0xff,
        reference: 0,
    };
    match mode {
        StencilMode::Disabled => (false, base, base),
        // Depth-pass counting: entering a volume increments, leaving decrements
        StencilMode::ShadowVolume => (
            true,
            vk::StencilOpState {
                pass_op: vk::StencilOp::INCREMENT_AND_WRAP,
                ..base
            },
            vk::StencilOpState {
                pass_op: vk::StencilOp::DECREMENT_AND_WRAP,
                ..base
            },
        ),
        StencilMode::EqualZero => {
            let equal = vk::StencilOpState {
                compare_op: vk::CompareOp::EQUAL,
                write_mask: 0,
                ..base
            };
            (true, equal, equal)
        }
    }
}

fn blend_attachment(mode: BlendMode) -> vk::PipelineColorBlendAttachmentState {
    let builder = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA);
    match mode {
        BlendMode::Opaque => builder.blend_enable(false),
        BlendMode::Additive => builder
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::ONE)
            .dst_color_blend_factor(vk::BlendFactor::ONE)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE)
            .alpha_blend_op(vk::BlendOp::ADD),
        BlendMode::Alpha => builder
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD),
        BlendMode::NoColorWrite => builder
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::empty()),
    }
    .build()
}

pub fn create_graphics_pipeline(
    device: &ash::Device,
    desc: &GraphicsPipelineDesc,
) -> GpuResult<vk::Pipeline> {
    // Shader stages
    let entry_point = c"main";

    let mut shader_stages = vec![vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::VERTEX)
        .module(desc.vertex_shader)
        .name(entry_point)
        .build()];
    if let Some(geometry) = desc.geometry_shader {
        shader_stages.push(
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::GEOMETRY)
                .module(geometry)
                .name(entry_point)
                .build(),
        );
    }
    shader_stages.push(
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(desc.fragment_shader)
            .name(entry_point)
            .build(),
    );

    // Vertex input
    let (bindings, attributes) = vertex_input(desc.vertex_layout);
    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    // Input assembly
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(desc.topology)
        .primitive_restart_enable(false);

    // Viewport and scissor are baked; pipelines are rebuilt with the swapchain
    let viewport = vk::Viewport::builder()
        .x(0.0)
        .y(0.0)
        .width(desc.extent.width as f32)
        .height(desc.extent.height as f32)
        .min_depth(0.0)
        .max_depth(1.0)
        .build();

    let scissor = vk::Rect2D::builder()
        .offset(vk::Offset2D { x: 0, y: 0 })
        .extent(desc.extent)
        .build();

    let viewports = &[viewport];
    let scissors = &[scissor];
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewports(viewports)
        .scissors(scissors);

    // Rasterization
    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(desc.cull_mode)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(false);

    // Multisampling (disabled)
    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let (stencil_test, front, back) = stencil_state(desc.stencil);
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(desc.depth_test)
        .depth_write_enable(desc.depth_write)
        .depth_compare_op(vk::CompareOp::LESS)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(stencil_test)
        .front(front)
        .back(back);

    let color_blend_attachments =
        vec![blend_attachment(desc.blend); desc.color_attachment_count as usize];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blending)
        .layout(desc.layout)
        .render_pass(desc.render_pass)
        .subpass(desc.subpass)
        .build();

    let pipelines = check("vkCreateGraphicsPipelines", unsafe {
        device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
            .map_err(|(_, e)| e)
    })?;

    log::debug!("Created pipeline '{}'", desc.label);
    Ok(pipelines[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skinned_input_extends_static() {
        let (static_bindings, static_attrs) = vertex_input(VertexLayout::Static);
        let (skinned_bindings, skinned_attrs) = vertex_input(VertexLayout::Skinned);
        assert_eq!(static_bindings[0].stride as usize, std::mem::size_of::<crate::scene::MeshVertex>());
        assert_eq!(
            skinned_bindings[0].stride as usize,
            std::mem::size_of::<crate::scene::SkinnedVertex>()
        );
        assert_eq!(static_attrs.len(), 3);
        assert_eq!(skinned_attrs.len(), 5);
        assert!(vertex_input(VertexLayout::None).0.is_empty());
    }

    #[test]
    fn shadow_volume_counts_both_faces() {
        let (enabled, front, back) = stencil_state(StencilMode::ShadowVolume);
        assert!(enabled);
        assert_eq!(front.pass_op, vk::StencilOp::INCREMENT_AND_WRAP);
        assert_eq!(back.pass_op, vk::StencilOp::DECREMENT_AND_WRAP);

        let (_, lit, _) = stencil_state(StencilMode::EqualZero);
        assert_eq!(lit.compare_op, vk::CompareOp::EQUAL);
        assert_eq!(lit.write_mask, 0);
    }
}
