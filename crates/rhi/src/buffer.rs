//! Host-visible GPU buffers.
//!
//! Every buffer here is allocated in `CpuToGpu` memory and stays persistently
//! mapped for its whole life, so per-frame uploads are a plain memcpy with no
//! map/unmap or allocation.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use raytracer_rhi::device::Device;
//! use raytracer_rhi::buffer::{Buffer, BufferUsage};
//!
//! # fn example(device: Arc<Device>) -> Result<(), raytracer_rhi::RhiError> {
//! let uniform = Buffer::new(device, BufferUsage::Uniform, 80)?;
//! uniform.write_data(0, &[0u8; 80])?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// How a buffer is bound to shaders.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Small, read-only per-dispatch constants.
    Uniform,
    /// Variable-length record arrays read by shaders.
    Storage,
}

impl BufferUsage {
    /// Usage flags the buffer is created with.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::Storage => vk::BufferUsageFlags::STORAGE_BUFFER,
        }
    }

    /// Descriptor type a binding table slot must declare for this buffer.
    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            BufferUsage::Uniform => vk::DescriptorType::UNIFORM_BUFFER,
            BufferUsage::Storage => vk::DescriptorType::STORAGE_BUFFER,
        }
    }

    /// Both kinds are rewritten by the host every frame.
    pub fn memory_location(self) -> MemoryLocation {
        MemoryLocation::CpuToGpu
    }

    /// Short label used for allocation names and logs.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Uniform => "uniform",
            BufferUsage::Storage => "storage",
        }
    }
}

/// Persistently mapped buffer backed by gpu-allocator.
///
/// The allocation is returned to the device's allocator on drop, before the
/// `VkBuffer` is destroyed. The mapping stays valid for the buffer's whole
/// life, so [`Buffer::write_data`] never maps or allocates.
///
/// # Safety Contract
///
/// `write_data` is a plain host write. The caller must make sure no pending
/// GPU work reads the buffer while it is written; the frame loop does this by
/// waiting on the owning slot's fence first.
///
/// # Thread Safety
///
/// `Buffer` is `Send`. Concurrent `write_data` calls to overlapping ranges
/// are a data race and must be serialized by the caller.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    usage: BufferUsage,
}

impl Buffer {
    /// Creates a mapped buffer of `size` bytes.
    ///
    /// # Arguments
    ///
    /// * `device` - Device whose allocator backs the memory
    /// * `usage` - How shaders will bind the buffer
    /// * `size` - Size in bytes; must be non-zero
    ///
    /// # Errors
    ///
    /// Fails for a zero size, or when creation, allocation or binding fails.
    /// A partially created buffer is released before returning.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use raytracer_rhi::device::Device;
    /// use raytracer_rhi::buffer::{Buffer, BufferUsage};
    ///
    /// # fn example(device: Arc<Device>) -> Result<(), raytracer_rhi::RhiError> {
    /// // Room for 32 spheres of 32 bytes each.
    /// let objects = Buffer::new(device, BufferUsage::Storage, 32 * 32)?;
    /// assert_eq!(objects.size(), 1024);
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(device: Arc<Device>, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidHandle(
                "Buffer size must be greater than 0".to_string(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = device
            .allocator()
            .lock()
            .map_err(|_| RhiError::AllocatorPoisoned)
            .and_then(|mut allocator| {
                allocator
                    .allocate(&AllocationCreateDesc {
                        name: usage.name(),
                        requirements,
                        location: usage.memory_location(),
                        linear: true,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })
                    .map_err(RhiError::from)
            });

        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        // From here on, Drop releases the buffer and allocation on error.
        let this = Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            usage,
        };

        if let Some(allocation) = &this.allocation {
            unsafe {
                this.device.handle().bind_buffer_memory(
                    this.buffer,
                    allocation.memory(),
                    allocation.offset(),
                )?;
            }
            if allocation.mapped_ptr().is_none() {
                return Err(RhiError::InvalidHandle(format!(
                    "{} buffer memory is not host mapped",
                    usage.name()
                )));
            }
        }

        debug!("Created {} buffer: {} bytes", usage.name(), size);
        Ok(this)
    }

    /// Copies `data` into the mapped memory at `offset`.
    ///
    /// An empty slice is a no-op. The memory is host-coherent, so no flush
    /// is needed before the next submission.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::OutOfBounds`] when `offset + data.len()` exceeds
    /// the buffer size; nothing is written in that case.
    pub fn write_data(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        check_bounds(offset, data.len() as u64, self.size)?;

        let mapped_ptr = self
            .allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_ptr())
            .ok_or_else(|| RhiError::InvalidHandle("Buffer memory is not mapped".to_string()))?;

        // SAFETY: bounds checked above; the mapping lives as long as the allocation.
        unsafe {
            let dst = mapped_ptr.as_ptr().cast::<u8>().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }

        Ok(())
    }

    /// Descriptor info covering the whole buffer.
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo::default()
            .buffer(self.buffer)
            .offset(0)
            .range(self.size)
    }

    /// Raw handle; valid only while this `Buffer` exists.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size in bytes as requested at creation.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }

        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator().lock() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free buffer allocation: {:?}", e);
                    }
                }
                Err(_) => error!("Allocator poisoned, leaking {} buffer", self.usage.name()),
            }
        }

        debug!("Destroyed {} buffer", self.usage.name());
    }
}

fn check_bounds(offset: u64, len: u64, size: u64) -> RhiResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(RhiError::OutOfBounds { offset, len, size }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_usage_flags() {
        assert_eq!(
            BufferUsage::Uniform.to_vk_usage(),
            vk::BufferUsageFlags::UNIFORM_BUFFER
        );
        assert_eq!(
            BufferUsage::Storage.descriptor_type(),
            vk::DescriptorType::STORAGE_BUFFER
        );
    }

    #[test]
    fn test_buffers_are_host_visible() {
        for usage in [BufferUsage::Uniform, BufferUsage::Storage] {
            assert_eq!(usage.memory_location(), MemoryLocation::CpuToGpu);
        }
    }

    #[test]
    fn test_bounds_check() {
        assert!(check_bounds(0, 80, 80).is_ok());
        assert!(check_bounds(16, 64, 80).is_ok());
        assert!(matches!(
            check_bounds(16, 65, 80),
            Err(RhiError::OutOfBounds {
                offset: 16,
                len: 65,
                size: 80
            })
        ));
        assert!(check_bounds(u64::MAX, 1, 80).is_err());
    }
}
