//! Dynamic rendering helpers (Vulkan 1.3).
//!
//! The overlay pass draws on top of the compute output, so its single color
//! attachment is normally loaded rather than cleared.
//!
//! # Example
//!
//! ```no_run
//! use ash::vk;
//! use raytracer_rhi::command::CommandBuffer;
//! use raytracer_rhi::rendering::{ColorAttachment, RenderingConfig};
//!
//! # fn example(view: vk::ImageView, cmd: &CommandBuffer) {
//! let bundle = RenderingConfig::from_extent(vk::Extent2D { width: 800, height: 600 })
//!     .with_color_attachment(ColorAttachment::new(view).load())
//!     .build();
//! cmd.begin_rendering(&bundle.info());
//! cmd.end_rendering();
//! # }
//! ```

use ash::vk;

/// One color attachment of a dynamic rendering pass.
#[derive(Clone, Copy)]
pub struct ColorAttachment {
    pub image_view: vk::ImageView,
    pub layout: vk::ImageLayout,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear_color: [f32; 4],
}

impl ColorAttachment {
    /// Attachment in `COLOR_ATTACHMENT_OPTIMAL` that clears to black and stores.
    #[inline]
    pub fn new(image_view: vk::ImageView) -> Self {
        Self {
            image_view,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }

    /// Keep the existing contents instead of clearing them.
    #[inline]
    pub fn load(mut self) -> Self {
        self.load_op = vk::AttachmentLoadOp::LOAD;
        self
    }

    pub fn to_rendering_attachment_info(&self) -> vk::RenderingAttachmentInfo<'static> {
        vk::RenderingAttachmentInfo::default()
            .image_view(self.image_view)
            .image_layout(self.layout)
            .load_op(self.load_op)
            .store_op(self.store_op)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            })
    }
}

impl std::fmt::Debug for ColorAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColorAttachment")
            .field("image_view", &self.image_view)
            .field("layout", &self.layout)
            .field("load_op", &self.load_op)
            .field("store_op", &self.store_op)
            .field("clear_color", &self.clear_color)
            .finish()
    }
}

/// Rendering pass configuration.
#[derive(Clone, Debug)]
pub struct RenderingConfig {
    pub color_attachments: Vec<ColorAttachment>,
    pub render_area: vk::Rect2D,
}

impl RenderingConfig {
    #[inline]
    pub fn from_extent(extent: vk::Extent2D) -> Self {
        Self {
            color_attachments: Vec::new(),
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
        }
    }

    #[inline]
    pub fn with_color_attachment(mut self, attachment: ColorAttachment) -> Self {
        self.color_attachments.push(attachment);
        self
    }

    pub fn build(&self) -> RenderingInfoBundle {
        RenderingInfoBundle {
            color_attachments: self
                .color_attachments
                .iter()
                .map(ColorAttachment::to_rendering_attachment_info)
                .collect(),
            render_area: self.render_area,
        }
    }
}

/// Owns the attachment infos a `VkRenderingInfo` points at.
pub struct RenderingInfoBundle {
    color_attachments: Vec<vk::RenderingAttachmentInfo<'static>>,
    render_area: vk::Rect2D,
}

impl RenderingInfoBundle {
    /// The returned info borrows this bundle.
    pub fn info(&self) -> vk::RenderingInfo<'_> {
        vk::RenderingInfo::default()
            .render_area(self.render_area)
            .layer_count(1)
            .color_attachments(&self.color_attachments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_attachment_load_keeps_contents() {
        let attachment = ColorAttachment::new(vk::ImageView::null()).load();
        let info = attachment.to_rendering_attachment_info();
        assert_eq!(info.load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(info.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(info.image_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn test_default_attachment_clears() {
        let attachment = ColorAttachment::new(vk::ImageView::null());
        assert_eq!(attachment.load_op, vk::AttachmentLoadOp::CLEAR);
        let info = attachment.to_rendering_attachment_info();
        assert_eq!(
            unsafe { info.clear_value.color.float32 },
            [0.0, 0.0, 0.0, 1.0]
        );
    }

    #[test]
    fn test_bundle_info() {
        let extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let bundle = RenderingConfig::from_extent(extent)
            .with_color_attachment(ColorAttachment::new(vk::ImageView::null()).load())
            .build();
        let info = bundle.info();
        assert_eq!(info.render_area.extent, extent);
        assert_eq!(info.layer_count, 1);
        assert_eq!(info.color_attachment_count, 1);
    }
}
