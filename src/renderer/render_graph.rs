// Render graph - the fixed pass/subpass order and the attachments joining it
//
//   G-buffer pass      albedo, position, normal, depth/stencil
//   Occlusion pass     position + normal -> occlusion
//   Main pass   0      occlusion blur
//               1      per light: stencil clear, shadow volume, lighting
//               2      UI overlay
//               3      composite -> swapchain image
//
// The order lives in PASS_ORDER as data. The driver walks it to assemble the
// primary command buffer, so the recorded order never depends on which worker
// finished first.

use ash::vk;

use crate::gpu::{ClearValue, ImageDesc, RenderPassDesc, SubpassDesc};

/// Role of an attachment image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttachmentRole {
    Albedo,
    Position,
    Normal,
    Depth,
    Occlusion,
    BlurredOcclusion,
    /// Lit scene, source of the composite.
    RenderColor,
    Ui,
    /// The swapchain image.
    FinalColor,
}

impl AttachmentRole {
    /// Every role backed by an image the renderer allocates itself.
    pub const OFFSCREEN: [AttachmentRole; 8] = [
        AttachmentRole::Albedo,
        AttachmentRole::Position,
        AttachmentRole::Normal,
        AttachmentRole::Depth,
        AttachmentRole::Occlusion,
        AttachmentRole::BlurredOcclusion,
        AttachmentRole::RenderColor,
        AttachmentRole::Ui,
    ];

    pub fn format(self, depth_format: vk::Format, swapchain_format: vk::Format) -> vk::Format {
        match self {
            AttachmentRole::Albedo | AttachmentRole::Ui => vk::Format::R8G8B8A8_UNORM,
            AttachmentRole::Position | AttachmentRole::Normal | AttachmentRole::RenderColor => {
                vk::Format::R16G16B16A16_SFLOAT
            }
            AttachmentRole::Depth => depth_format,
            AttachmentRole::Occlusion | AttachmentRole::BlurredOcclusion => vk::Format::R8_UNORM,
            AttachmentRole::FinalColor => swapchain_format,
        }
    }

    fn usage(self) -> vk::ImageUsageFlags {
        match self {
            AttachmentRole::Depth => {
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::INPUT_ATTACHMENT
            }
            AttachmentRole::Occlusion => {
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED
            }
            AttachmentRole::BlurredOcclusion | AttachmentRole::RenderColor | AttachmentRole::Ui => {
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::INPUT_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT
            }
            AttachmentRole::Albedo | AttachmentRole::Position | AttachmentRole::Normal => {
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::INPUT_ATTACHMENT
                    | vk::ImageUsageFlags::SAMPLED
            }
            AttachmentRole::FinalColor => vk::ImageUsageFlags::COLOR_ATTACHMENT,
        }
    }

    fn aspect(self) -> vk::ImageAspectFlags {
        match self {
            AttachmentRole::Depth => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
            _ => vk::ImageAspectFlags::COLOR,
        }
    }

    /// Image parameters at `extent`.
    pub fn image_desc(self, depth_format: vk::Format, extent: vk::Extent2D) -> ImageDesc {
        ImageDesc {
            format: self.format(depth_format, vk::Format::UNDEFINED),
            usage: self.usage(),
            aspect: self.aspect(),
            extent,
        }
    }
}

/// The three render passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    GBuffer,
    Occlusion,
    Main,
}

impl PassId {
    pub const ALL: [PassId; 3] = [PassId::GBuffer, PassId::Occlusion, PassId::Main];

    /// Attachments of the pass, in framebuffer order.
    pub fn attachments(self) -> &'static [AttachmentRole] {
        match self {
            PassId::GBuffer => &[
                AttachmentRole::Albedo,
                AttachmentRole::Position,
                AttachmentRole::Normal,
                AttachmentRole::Depth,
            ],
            PassId::Occlusion => &[AttachmentRole::Occlusion],
            PassId::Main => &[
                AttachmentRole::FinalColor,
                AttachmentRole::Albedo,
                AttachmentRole::Position,
                AttachmentRole::Normal,
                AttachmentRole::BlurredOcclusion,
                AttachmentRole::RenderColor,
                AttachmentRole::Ui,
                AttachmentRole::Depth,
            ],
        }
    }

    pub fn subpass_count(self) -> u32 {
        match self {
            PassId::GBuffer | PassId::Occlusion => 1,
            PassId::Main => 4,
        }
    }

    pub fn clear_values(self, clear_color: [f32; 4]) -> Vec<ClearValue> {
        self.attachments()
            .iter()
            .map(|role| match role {
                AttachmentRole::Depth => ClearValue::DepthStencil {
                    depth: 1.0,
                    stencil: 0,
                },
                AttachmentRole::FinalColor | AttachmentRole::RenderColor => {
                    ClearValue::Color(clear_color)
                }
                AttachmentRole::Occlusion | AttachmentRole::BlurredOcclusion => {
                    ClearValue::Color([1.0; 4])
                }
                _ => ClearValue::Color([0.0; 4]),
            })
            .collect()
    }

    pub fn desc(self, depth_format: vk::Format, swapchain_format: vk::Format) -> RenderPassDesc {
        match self {
            PassId::GBuffer => gbuffer_pass(depth_format),
            PassId::Occlusion => occlusion_pass(),
            PassId::Main => main_pass(depth_format, swapchain_format),
        }
    }
}

/// What a graph step records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepContent {
    StaticGeometry,
    SkinnedGeometry,
    Occlusion,
    OcclusionBlur,
    /// Expanded to one buffer per active light, in light-buffer order.
    Lighting,
    UiOverlay,
    Composite,
}

/// One (render pass, subpass) step and the secondary buffers it executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphStep {
    pub pass: PassId,
    pub subpass: u32,
    pub contents: &'static [StepContent],
}

pub const PASS_ORDER: &[GraphStep] = &[
    GraphStep {
        pass: PassId::GBuffer,
        subpass: 0,
        contents: &[StepContent::StaticGeometry, StepContent::SkinnedGeometry],
    },
    GraphStep {
        pass: PassId::Occlusion,
        subpass: 0,
        contents: &[StepContent::Occlusion],
    },
    GraphStep {
        pass: PassId::Main,
        subpass: 0,
        contents: &[StepContent::OcclusionBlur],
    },
    GraphStep {
        pass: PassId::Main,
        subpass: 1,
        contents: &[StepContent::Lighting],
    },
    GraphStep {
        pass: PassId::Main,
        subpass: 2,
        contents: &[StepContent::UiOverlay],
    },
    GraphStep {
        pass: PassId::Main,
        subpass: 3,
        contents: &[StepContent::Composite],
    },
];

fn color_attachment(
    format: vk::Format,
    load_op: vk::AttachmentLoadOp,
    store_op: vk::AttachmentStoreOp,
    initial_layout: vk::ImageLayout,
    final_layout: vk::ImageLayout,
) -> vk::AttachmentDescription {
    vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op,
        store_op,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout,
        final_layout,
        ..Default::default()
    }
}

fn reference(attachment: u32, layout: vk::ImageLayout) -> vk::AttachmentReference {
    vk::AttachmentReference { attachment, layout }
}

fn dependency(
    src_subpass: u32,
    dst_subpass: u32,
    src: (vk::PipelineStageFlags, vk::AccessFlags),
    dst: (vk::PipelineStageFlags, vk::AccessFlags),
) -> vk::SubpassDependency {
    vk::SubpassDependency {
        src_subpass,
        dst_subpass,
        src_stage_mask: src.0,
        dst_stage_mask: dst.0,
        src_access_mask: src.1,
        dst_access_mask: dst.1,
        dependency_flags: vk::DependencyFlags::BY_REGION,
    }
}

const COLOR_WRITE: (vk::PipelineStageFlags, vk::AccessFlags) = (
    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
    vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
);
const SHADER_READ: (vk::PipelineStageFlags, vk::AccessFlags) = (
    vk::PipelineStageFlags::FRAGMENT_SHADER,
    vk::AccessFlags::SHADER_READ,
);
const INPUT_READ: (vk::PipelineStageFlags, vk::AccessFlags) = (
    vk::PipelineStageFlags::FRAGMENT_SHADER,
    vk::AccessFlags::INPUT_ATTACHMENT_READ,
);

fn depth_write() -> (vk::PipelineStageFlags, vk::AccessFlags) {
    (
        vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
    )
}

fn depth_read_write() -> (vk::PipelineStageFlags, vk::AccessFlags) {
    (
        vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
    )
}

fn gbuffer_pass(depth_format: vk::Format) -> RenderPassDesc {
    let read_only = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
    let mut attachments: Vec<vk::AttachmentDescription> = [
        AttachmentRole::Albedo,
        AttachmentRole::Position,
        AttachmentRole::Normal,
    ]
    .iter()
    .map(|role| {
        color_attachment(
            role.format(depth_format, vk::Format::UNDEFINED),
            vk::AttachmentLoadOp::CLEAR,
            vk::AttachmentStoreOp::STORE,
            vk::ImageLayout::UNDEFINED,
            read_only,
        )
    })
    .collect();
    attachments.push(vk::AttachmentDescription {
        format: depth_format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::CLEAR,
        stencil_store_op: vk::AttachmentStoreOp::STORE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ..Default::default()
    });

    let color = vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL;
    RenderPassDesc {
        label: "gbuffer",
        attachments,
        subpasses: vec![SubpassDesc {
            colors: vec![reference(0, color), reference(1, color), reference(2, color)],
            depth_stencil: Some(reference(3, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)),
            ..Default::default()
        }],
        dependencies: vec![
            // Last frame's lighting read these attachments
            dependency(vk::SUBPASS_EXTERNAL, 0, INPUT_READ, COLOR_WRITE),
            dependency(vk::SUBPASS_EXTERNAL, 0, depth_read_write(), depth_write()),
            dependency(0, vk::SUBPASS_EXTERNAL, COLOR_WRITE, SHADER_READ),
            dependency(0, vk::SUBPASS_EXTERNAL, depth_write(), depth_read_write()),
        ],
    }
}

fn occlusion_pass() -> RenderPassDesc {
    RenderPassDesc {
        label: "occlusion",
        attachments: vec![color_attachment(
            vk::Format::R8_UNORM,
            vk::AttachmentLoadOp::CLEAR,
            vk::AttachmentStoreOp::STORE,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )],
        subpasses: vec![SubpassDesc {
            colors: vec![reference(0, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)],
            ..Default::default()
        }],
        dependencies: vec![
            dependency(vk::SUBPASS_EXTERNAL, 0, COLOR_WRITE, SHADER_READ),
            dependency(vk::SUBPASS_EXTERNAL, 0, SHADER_READ, COLOR_WRITE),
            dependency(0, vk::SUBPASS_EXTERNAL, COLOR_WRITE, SHADER_READ),
        ],
    }
}

fn main_pass(depth_format: vk::Format, swapchain_format: vk::Format) -> RenderPassDesc {
    let read_only = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
    let color = vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL;
    let depth_layout = vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;
    let clear = vk::AttachmentLoadOp::CLEAR;
    let load = vk::AttachmentLoadOp::LOAD;
    let store = vk::AttachmentStoreOp::STORE;
    let discard = vk::AttachmentStoreOp::DONT_CARE;

    let attachments = vec![
        // 0: presented image
        color_attachment(swapchain_format, clear, store, vk::ImageLayout::UNDEFINED, vk::ImageLayout::PRESENT_SRC_KHR),
        // 1-3: G-buffer, read as input attachments
        color_attachment(vk::Format::R8G8B8A8_UNORM, load, discard, read_only, read_only),
        color_attachment(vk::Format::R16G16B16A16_SFLOAT, load, discard, read_only, read_only),
        color_attachment(vk::Format::R16G16B16A16_SFLOAT, load, discard, read_only, read_only),
        // 4: blurred occlusion
        color_attachment(vk::Format::R8_UNORM, clear, discard, vk::ImageLayout::UNDEFINED, read_only),
        // 5: render colour
        color_attachment(vk::Format::R16G16B16A16_SFLOAT, clear, discard, vk::ImageLayout::UNDEFINED, read_only),
        // 6: UI
        color_attachment(vk::Format::R8G8B8A8_UNORM, clear, discard, vk::ImageLayout::UNDEFINED, read_only),
        // 7: depth/stencil from the G-buffer pass; stencil is cleared per light
        vk::AttachmentDescription {
            format: depth_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: load,
            store_op: discard,
            stencil_load_op: clear,
            stencil_store_op: discard,
            initial_layout: depth_layout,
            final_layout: depth_layout,
            ..Default::default()
        },
    ];

    let subpasses = vec![
        SubpassDesc {
            colors: vec![reference(4, color)],
            preserve: vec![1, 2, 3, 7],
            ..Default::default()
        },
        SubpassDesc {
            inputs: vec![
                reference(1, read_only),
                reference(2, read_only),
                reference(3, read_only),
                reference(4, read_only),
            ],
            colors: vec![reference(5, color)],
            depth_stencil: Some(reference(7, depth_layout)),
            ..Default::default()
        },
        SubpassDesc {
            colors: vec![reference(6, color)],
            preserve: vec![5],
            ..Default::default()
        },
        SubpassDesc {
            inputs: vec![reference(5, read_only), reference(6, read_only)],
            colors: vec![reference(0, color)],
            ..Default::default()
        },
    ];

    let dependencies = vec![
        dependency(vk::SUBPASS_EXTERNAL, 0, COLOR_WRITE, SHADER_READ),
        dependency(vk::SUBPASS_EXTERNAL, 1, depth_write(), depth_read_write()),
        // Swapchain image: wait for the acquire before the layout transition
        dependency(
            vk::SUBPASS_EXTERNAL,
            3,
            (vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT, vk::AccessFlags::empty()),
            COLOR_WRITE,
        ),
        dependency(0, 1, COLOR_WRITE, INPUT_READ),
        dependency(1, 3, COLOR_WRITE, INPUT_READ),
        dependency(2, 3, COLOR_WRITE, INPUT_READ),
        dependency(
            3,
            vk::SUBPASS_EXTERNAL,
            COLOR_WRITE,
            (vk::PipelineStageFlags::BOTTOM_OF_PIPE, vk::AccessFlags::MEMORY_READ),
        ),
    ];

    RenderPassDesc {
        label: "main",
        attachments,
        subpasses,
        dependencies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEPTH: vk::Format = vk::Format::D24_UNORM_S8_UINT;
    const SWAP: vk::Format = vk::Format::B8G8R8A8_SRGB;

    #[test]
    fn order_is_gbuffer_occlusion_then_main_subpasses() {
        let steps: Vec<(PassId, u32)> = PASS_ORDER.iter().map(|s| (s.pass, s.subpass)).collect();
        assert_eq!(
            steps,
            vec![
                (PassId::GBuffer, 0),
                (PassId::Occlusion, 0),
                (PassId::Main, 0),
                (PassId::Main, 1),
                (PassId::Main, 2),
                (PassId::Main, 3),
            ]
        );
    }

    #[test]
    fn every_subpass_of_every_pass_appears_once() {
        for pass in PassId::ALL {
            let subpasses: Vec<u32> = PASS_ORDER
                .iter()
                .filter(|s| s.pass == pass)
                .map(|s| s.subpass)
                .collect();
            let expected: Vec<u32> = (0..pass.subpass_count()).collect();
            assert_eq!(subpasses, expected, "{pass:?}");
            assert_eq!(pass.desc(DEPTH, SWAP).subpasses.len() as u32, pass.subpass_count());
        }
    }

    #[test]
    fn attachment_lists_match_descriptions() {
        for pass in PassId::ALL {
            let desc = pass.desc(DEPTH, SWAP);
            assert_eq!(desc.attachments.len(), pass.attachments().len());
            for (role, attachment) in pass.attachments().iter().zip(&desc.attachments) {
                assert_eq!(attachment.format, role.format(DEPTH, SWAP), "{pass:?} {role:?}");
            }
            assert_eq!(pass.clear_values([0.0; 4]).len(), desc.attachments.len());
        }
    }

    #[test]
    fn subpass_edges_are_explicit() {
        let desc = PassId::Main.desc(DEPTH, SWAP);
        let edges: Vec<(u32, u32)> = desc
            .dependencies
            .iter()
            .filter(|d| d.src_subpass != vk::SUBPASS_EXTERNAL && d.dst_subpass != vk::SUBPASS_EXTERNAL)
            .map(|d| (d.src_subpass, d.dst_subpass))
            .collect();
        assert_eq!(edges, vec![(0, 1), (1, 3), (2, 3)]);
        assert!(desc
            .dependencies
            .iter()
            .any(|d| d.src_subpass == 3 && d.dst_subpass == vk::SUBPASS_EXTERNAL));
    }

    #[test]
    fn lighting_reads_gbuffer_as_inputs() {
        let desc = PassId::Main.desc(DEPTH, SWAP);
        let lighting = &desc.subpasses[1];
        let inputs: Vec<u32> = lighting.inputs.iter().map(|r| r.attachment).collect();
        assert_eq!(inputs, vec![1, 2, 3, 4]);
        assert_eq!(lighting.depth_stencil.map(|r| r.attachment), Some(7));
    }
}
