//! Composites the overlay onto the compute output.
//!
//! The pass loads the target, so the traced image stays visible around and
//! behind the widgets. Each overlay rectangle becomes an attachment clear of
//! that region, which needs no pipeline, vertex data or font atlas.

use ash::vk;

use raytracer_rhi::command::{CommandBuffer, ImageTransition};
use raytracer_rhi::rendering::{ColorAttachment, RenderingConfig};

use crate::overlay::{DrawList, OverlayRect};

/// Overlay output -> presentation engine.
pub fn attachment_to_present() -> ImageTransition {
    ImageTransition {
        old_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        src_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        dst_access: vk::AccessFlags::empty(),
    }
}

/// Clear command for one rectangle of color attachment 0.
pub fn clear_for(rect: &OverlayRect) -> (vk::ClearAttachment, vk::ClearRect) {
    let attachment = vk::ClearAttachment {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        color_attachment: 0,
        clear_value: vk::ClearValue {
            color: vk::ClearColorValue {
                float32: rect.color,
            },
        },
    };
    let clear_rect = vk::ClearRect {
        rect: vk::Rect2D {
            offset: vk::Offset2D {
                x: rect.x as i32,
                y: rect.y as i32,
            },
            extent: vk::Extent2D {
                width: rect.width,
                height: rect.height,
            },
        },
        base_array_layer: 0,
        layer_count: 1,
    };
    (attachment, clear_rect)
}

#[derive(Debug, Default)]
pub struct OverlayStage;

impl OverlayStage {
    pub fn new() -> Self {
        Self
    }

    /// Records the overlay pass into `cmd`, which must be recording.
    ///
    /// `target` must be in `COLOR_ATTACHMENT_OPTIMAL` (as the compute stage
    /// leaves it) and is left in `PRESENT_SRC_KHR`.
    pub fn record(
        &self,
        cmd: &CommandBuffer,
        target: vk::Image,
        target_view: vk::ImageView,
        draw_list: &DrawList,
    ) {
        let rendering = RenderingConfig::from_extent(draw_list.extent())
            .with_color_attachment(ColorAttachment::new(target_view).load())
            .build();

        cmd.begin_rendering(&rendering.info());
        for rect in draw_list.rects() {
            let (attachment, clear_rect) = clear_for(rect);
            cmd.clear_attachments(&[attachment], &[clear_rect]);
        }
        cmd.end_rendering();

        attachment_to_present().record(cmd, target);
    }
}
