//! Host mirrors of the compute program's buffer layouts.
//!
//! Both structs follow std140/std430 rules: every `vec3` starts on a
//! 16-byte boundary, and trailing scalars pack into the remaining word.
//! They are `#[repr(C)]` and `Pod` so they upload with a plain byte copy.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use raytracer_scene::{Object, Scene};

/// Scene uniform (binding 3).
///
/// # Memory Layout
///
/// - Offset 0: camera forward
/// - Offset 16: camera right
/// - Offset 32: camera up
/// - Offset 48: camera position
/// - Offset 60: object count
/// - Offset 64: accumulated frame count
/// - Total size: 80 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuSceneUniform {
    pub camera_forward: Vec3,
    pub _pad0: f32,
    pub camera_right: Vec3,
    pub _pad1: f32,
    pub camera_up: Vec3,
    pub _pad2: f32,
    pub camera_position: Vec3,
    pub object_count: u32,
    /// Zero tells the program to overwrite the accumulation image.
    pub frame_count: u32,
    pub _pad3: [u32; 3],
}

impl GpuSceneUniform {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn from_scene(scene: &Scene) -> Self {
        let camera = scene.camera();
        Self {
            camera_forward: camera.forward(),
            camera_right: camera.right(),
            camera_up: camera.up(),
            camera_position: camera.position(),
            object_count: scene.objects().len() as u32,
            frame_count: scene.frame_count(),
            ..Self::zeroed()
        }
    }
}

/// One sphere record in the object buffer (binding 2).
///
/// # Memory Layout
///
/// - Offset 0: center
/// - Offset 12: radius
/// - Offset 16: color
/// - Offset 28: padding
/// - Total size: 32 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuSphere {
    pub center: Vec3,
    pub radius: f32,
    pub color: Vec3,
    pub _padding: f32,
}

impl GpuSphere {
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

impl From<&Object> for GpuSphere {
    fn from(object: &Object) -> Self {
        Self {
            center: object.center,
            radius: object.radius,
            color: object.color,
            _padding: 0.0,
        }
    }
}

/// Packs objects into GPU records, preserving order.
pub fn pack_objects(objects: &[Object]) -> Vec<GpuSphere> {
    objects.iter().map(GpuSphere::from).collect()
}
