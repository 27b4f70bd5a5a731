//! The ray-tracing compute pass.
//!
//! Binding interface of the compute program (set 0):
//!
//! | Binding | Resource                              |
//! |---------|---------------------------------------|
//! | 0       | output storage image (surface image)  |
//! | 1       | accumulation storage image            |
//! | 2       | object storage buffer ([`GpuSphere`]) |
//! | 3       | scene uniform ([`GpuSceneUniform`])   |
//!
//! The program runs in 8x8 workgroups over the output resolution.
//!
//! [`GpuSphere`]: crate::gpu_types::GpuSphere
//! [`GpuSceneUniform`]: crate::gpu_types::GpuSceneUniform

use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::info;

use raytracer_rhi::RhiResult;
use raytracer_rhi::buffer::Buffer;
use raytracer_rhi::command::{CommandBuffer, ImageTransition};
use raytracer_rhi::descriptor::{
    DescriptorBindingBuilder, DescriptorSetLayout, storage_image_info, update_descriptor_sets,
};
use raytracer_rhi::device::Device;
use raytracer_rhi::pipeline::{Pipeline, PipelineLayout};
use raytracer_rhi::shader::Shader;

pub const WORKGROUP_SIZE: u32 = 8;

pub const OUTPUT_IMAGE_BINDING: u32 = 0;
pub const ACCUMULATION_IMAGE_BINDING: u32 = 1;
pub const OBJECT_BUFFER_BINDING: u32 = 2;
pub const SCENE_UNIFORM_BINDING: u32 = 3;

/// Layout of the program's single descriptor set.
pub fn binding_layout() -> [vk::DescriptorSetLayoutBinding<'static>; 4] {
    let stage = vk::ShaderStageFlags::COMPUTE;
    [
        DescriptorBindingBuilder::storage_image(OUTPUT_IMAGE_BINDING, stage),
        DescriptorBindingBuilder::storage_image(ACCUMULATION_IMAGE_BINDING, stage),
        DescriptorBindingBuilder::storage_buffer(OBJECT_BUFFER_BINDING, stage),
        DescriptorBindingBuilder::uniform_buffer(SCENE_UNIFORM_BINDING, stage),
    ]
}

/// Workgroups covering `extent`, rounding partial tiles up.
pub fn dispatch_groups(extent: vk::Extent2D) -> (u32, u32) {
    (
        extent.width.div_ceil(WORKGROUP_SIZE),
        extent.height.div_ceil(WORKGROUP_SIZE),
    )
}

/// Acquired surface image -> writable by the program. Contents are discarded.
///
/// The source stage matches the stage the acquire semaphore is waited at,
/// so the transition is ordered after the presentation engine releases the image.
pub fn target_to_storage() -> ImageTransition {
    ImageTransition {
        old_layout: vk::ImageLayout::UNDEFINED,
        new_layout: vk::ImageLayout::GENERAL,
        src_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
        dst_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
        src_access: vk::AccessFlags::empty(),
        dst_access: vk::AccessFlags::SHADER_WRITE,
    }
}

/// Previous frame's accumulation writes -> this frame's reads and writes.
pub fn accumulation_hazard() -> ImageTransition {
    ImageTransition {
        old_layout: vk::ImageLayout::GENERAL,
        new_layout: vk::ImageLayout::GENERAL,
        src_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
        dst_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
        src_access: vk::AccessFlags::SHADER_WRITE,
        dst_access: vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
    }
}

/// Program output -> overlay pass, which loads the existing pixels.
pub fn target_to_attachment() -> ImageTransition {
    ImageTransition {
        old_layout: vk::ImageLayout::GENERAL,
        new_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        src_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
        dst_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access: vk::AccessFlags::SHADER_WRITE,
        dst_access: vk::AccessFlags::COLOR_ATTACHMENT_READ
            | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
    }
}

/// Resources bound for one dispatch.
#[derive(Clone, Copy)]
pub struct ComputeBindings<'a> {
    pub target_view: vk::ImageView,
    pub accumulation_view: vk::ImageView,
    pub objects: &'a Buffer,
    pub scene_uniform: &'a Buffer,
}

/// Owns the compute pipeline and its layouts.
pub struct ComputeStage {
    device: Arc<Device>,
    // Field order is drop order: pipeline before its layouts.
    pipeline: Pipeline,
    pipeline_layout: PipelineLayout,
    set_layout: DescriptorSetLayout,
}

impl ComputeStage {
    /// Loads the SPIR-V program at `shader_path` and builds the pipeline.
    pub fn new(device: Arc<Device>, shader_path: &Path) -> RhiResult<Self> {
        let set_layout = DescriptorSetLayout::new(device.clone(), &binding_layout())?;
        let pipeline_layout = PipelineLayout::new(device.clone(), &[set_layout.handle()])?;

        // The module is only needed while the pipeline is created.
        let shader = Shader::from_spirv_file(
            device.clone(),
            shader_path,
            vk::ShaderStageFlags::COMPUTE,
        )?;
        let pipeline = Pipeline::create_compute(device.clone(), &shader, &pipeline_layout)?;

        info!("Compute stage ready ({})", shader_path.display());

        Ok(Self {
            device,
            pipeline,
            pipeline_layout,
            set_layout,
        })
    }

    #[inline]
    pub fn set_layout(&self) -> &DescriptorSetLayout {
        &self.set_layout
    }

    /// Points `binding_table` at this frame's resources.
    ///
    /// The target changes with every acquisition, so this runs every frame.
    /// The table must not be in use by pending GPU work.
    pub fn update_bindings(&self, binding_table: vk::DescriptorSet, bindings: &ComputeBindings<'_>) {
        let target_info = [storage_image_info(bindings.target_view)];
        let accumulation_info = [storage_image_info(bindings.accumulation_view)];
        let object_info = [bindings.objects.descriptor_info()];
        let uniform_info = [bindings.scene_uniform.descriptor_info()];

        let writes = [
            vk::WriteDescriptorSet::default()
                .dst_set(binding_table)
                .dst_binding(OUTPUT_IMAGE_BINDING)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .image_info(&target_info),
            vk::WriteDescriptorSet::default()
                .dst_set(binding_table)
                .dst_binding(ACCUMULATION_IMAGE_BINDING)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .image_info(&accumulation_info),
            vk::WriteDescriptorSet::default()
                .dst_set(binding_table)
                .dst_binding(OBJECT_BUFFER_BINDING)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .buffer_info(&object_info),
            vk::WriteDescriptorSet::default()
                .dst_set(binding_table)
                .dst_binding(SCENE_UNIFORM_BINDING)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&uniform_info),
        ];

        update_descriptor_sets(&self.device, &writes);
    }

    /// Records the dispatch into `cmd`, which must be recording.
    ///
    /// Leaves `target` in `COLOR_ATTACHMENT_OPTIMAL` for the overlay pass.
    pub fn record(
        &self,
        cmd: &CommandBuffer,
        target: vk::Image,
        accumulation: vk::Image,
        binding_table: vk::DescriptorSet,
        extent: vk::Extent2D,
    ) {
        let to_storage = target_to_storage();
        let hazard = accumulation_hazard();
        cmd.pipeline_barrier(
            to_storage.src_stage,
            to_storage.dst_stage,
            &[to_storage.barrier(target), hazard.barrier(accumulation)],
        );

        cmd.bind_pipeline(self.pipeline.bind_point(), self.pipeline.handle());
        cmd.bind_descriptor_sets(
            self.pipeline.bind_point(),
            self.pipeline_layout.handle(),
            0,
            &[binding_table],
        );

        let (groups_x, groups_y) = dispatch_groups(extent);
        cmd.dispatch(groups_x, groups_y, 1);

        target_to_attachment().record(cmd, target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raytracer_rhi::descriptor::pool_sizes_for;

    #[test]
    fn test_dispatch_800x600() {
        let extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        assert_eq!(dispatch_groups(extent), (100, 75));
    }

    #[test]
    fn test_dispatch_rounds_up() {
        let extent = vk::Extent2D {
            width: 801,
            height: 1,
        };
        assert_eq!(dispatch_groups(extent), (101, 1));

        let extent = vk::Extent2D {
            width: 1366,
            height: 768,
        };
        assert_eq!(dispatch_groups(extent), (171, 96));
    }

    #[test]
    fn test_binding_layout_matches_program() {
        let bindings = binding_layout();
        let summary: Vec<(u32, vk::DescriptorType)> = bindings
            .iter()
            .map(|b| (b.binding, b.descriptor_type))
            .collect();
        assert_eq!(
            summary,
            vec![
                (0, vk::DescriptorType::STORAGE_IMAGE),
                (1, vk::DescriptorType::STORAGE_IMAGE),
                (2, vk::DescriptorType::STORAGE_BUFFER),
                (3, vk::DescriptorType::UNIFORM_BUFFER),
            ]
        );
        assert!(
            bindings
                .iter()
                .all(|b| b.stage_flags == vk::ShaderStageFlags::COMPUTE && b.descriptor_count == 1)
        );
    }

    #[test]
    fn test_pool_sizes_for_two_slots() {
        let sizes = pool_sizes_for(&binding_layout(), 2);
        let storage_images = sizes
            .iter()
            .find(|s| s.ty == vk::DescriptorType::STORAGE_IMAGE)
            .map(|s| s.descriptor_count);
        assert_eq!(storage_images, Some(4));
    }

    #[test]
    fn test_transitions_are_scoped() {
        let first = target_to_storage();
        assert_eq!(first.new_layout, vk::ImageLayout::GENERAL);
        assert_eq!(first.dst_stage, vk::PipelineStageFlags::COMPUTE_SHADER);

        let second = target_to_attachment();
        assert_eq!(second.old_layout, first.new_layout);
        assert_eq!(second.new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(second.src_stage, vk::PipelineStageFlags::COMPUTE_SHADER);
        assert_eq!(
            second.dst_stage,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert!(
            second
                .dst_access
                .contains(vk::AccessFlags::COLOR_ATTACHMENT_READ)
        );
    }
}
