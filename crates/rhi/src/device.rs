//! Vulkan logical device wrapper.
//!
//! Device selection and creation belong to the embedding application. This
//! module takes ownership of an already-created `ash::Device`, retrieves the
//! graphics queue and sets up gpu-allocator on top of it.
//!
//! # Example
//!
//! ```no_run
//! use ash::vk;
//! use tessera_rhi::device::Device;
//!
//! # fn create(instance: &ash::Instance, raw: ash::Device, gpu: vk::PhysicalDevice) {
//! // `raw` was created by the application with one graphics queue in family 0.
//! let device = Device::from_raw(instance, raw, gpu, 0).expect("Failed to wrap device");
//! let queue = device.graphics_queue();
//! # }
//! ```

use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::error::RhiResult;

/// Vulkan logical device wrapper.
///
/// Owns the `ash::Device` and destroys it on drop, after the allocator.
///
/// # Thread Safety
///
/// The [`Device`] is shared across threads using `Arc`. Recording workers only
/// use the device for command-buffer calls; queue submission happens on the
/// main thread. The allocator is protected by a `Mutex`.
pub struct Device {
    /// Vulkan logical device handle.
    device: ash::Device,
    /// Physical device handle.
    physical_device: vk::PhysicalDevice,
    /// Limits of the physical device (alignment, anisotropy).
    limits: vk::PhysicalDeviceLimits,
    /// GPU memory allocator. Dropped before the device is destroyed.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    /// Graphics queue handle.
    graphics_queue: vk::Queue,
    /// Graphics queue family index.
    graphics_family: u32,
}

impl Device {
    /// Wraps an externally created logical device.
    ///
    /// `device` must have been created from `physical_device` with at least one
    /// queue in `graphics_family`. Ownership moves into the returned wrapper.
    ///
    /// # Errors
    ///
    /// Returns an error if allocator initialization fails. The device is
    /// destroyed in that case.
    pub fn from_raw(
        instance: &ash::Instance,
        device: ash::Device,
        physical_device: vk::PhysicalDevice,
        graphics_family: u32,
    ) -> RhiResult<Arc<Self>> {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let limits = properties.limits;

        debug!(
            "Device limits: minUniformBufferOffsetAlignment={}, maxSamplerAnisotropy={}",
            limits.min_uniform_buffer_offset_alignment, limits.max_sampler_anisotropy
        );

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        debug!("Graphics queue retrieved from family {}", graphics_family);

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        });

        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                error!("Failed to initialize GPU memory allocator: {}", e);
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };

        info!("GPU memory allocator initialized");

        Ok(Arc::new(Self {
            device,
            physical_device,
            limits,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            graphics_queue,
            graphics_family,
        }))
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// Returns the physical device handle.
    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Returns the physical device limits.
    #[inline]
    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.limits
    }

    /// Returns the graphics queue handle.
    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Returns the graphics queue family index.
    #[inline]
    pub fn graphics_family(&self) -> u32 {
        self.graphics_family
    }

    /// Returns a reference to the GPU memory allocator.
    #[inline]
    pub fn allocator(&self) -> &Mutex<Allocator> {
        &self.allocator
    }

    /// Waits for the device to become idle.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait fails.
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Submits command buffers to the graphics queue.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    /// - All command buffers are valid and recorded
    /// - Synchronization is properly handled
    /// - The fence (if provided) is not in use
    ///
    /// # Errors
    ///
    /// Returns an error if the submission fails.
    pub unsafe fn submit_graphics(
        &self,
        submit_infos: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> RhiResult<()> {
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, submit_infos, fence)?;
        }
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }

            // All allocations must have been freed by their owners by now.
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: ash::Device is Send+Sync, the remaining fields are plain handles or
// data, and the allocator is behind a Mutex.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}
