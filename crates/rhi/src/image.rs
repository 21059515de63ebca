//! Sampled textures.
//!
//! [`SampledImage`] bundles an RGBA8 image, its view and a sampler, the three
//! objects a combined-image-sampler descriptor needs. The pixel upload itself
//! is driven by the resource packer; this module only owns the objects and
//! knows which pipeline barriers a layout change requires.
//!
//! # Resource Destruction
//!
//! Resources are destroyed in the following order:
//! 1. Sampler
//! 2. Image view
//! 3. Memory allocation
//! 4. Image

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Pixel format of every texture uploaded through the packer.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Stage and access masks for one side of an image layout transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub dst_access: vk::AccessFlags,
}

/// Returns the barrier masks for an `old -> new` layout transition.
///
/// Only the two transitions of a texture upload are specialised. Anything
/// else falls back to a full `ALL_COMMANDS` barrier and logs a warning.
pub fn layout_transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> TransitionMasks {
    match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => TransitionMasks {
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            src_access: vk::AccessFlags::empty(),
            dst_stage: vk::PipelineStageFlags::TRANSFER,
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
        },
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
            TransitionMasks {
                src_stage: vk::PipelineStageFlags::TRANSFER,
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
                dst_access: vk::AccessFlags::SHADER_READ,
            }
        }
        _ => {
            warn!("Unhandled layout transition: {:?} -> {:?}", old, new);
            TransitionMasks {
                src_stage: vk::PipelineStageFlags::ALL_COMMANDS,
                src_access: vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
                dst_stage: vk::PipelineStageFlags::ALL_COMMANDS,
                dst_access: vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            }
        }
    }
}

/// Sampler parameters for packed textures.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplerDesc {
    /// `None` disables anisotropic filtering.
    pub max_anisotropy: Option<f32>,
}

impl SamplerDesc {
    /// Clamps a requested anisotropy against the device limit.
    ///
    /// Values `<= 1.0` disable anisotropy.
    pub fn clamped(requested: f32, device_max: f32) -> Self {
        let value = requested.min(device_max);
        Self {
            max_anisotropy: (value > 1.0).then_some(value),
        }
    }

    fn create_info(&self) -> vk::SamplerCreateInfo<'static> {
        vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(self.max_anisotropy.is_some())
            .max_anisotropy(self.max_anisotropy.unwrap_or(1.0))
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(0.0)
    }
}

/// Device-local RGBA8 texture with view and sampler.
pub struct SampledImage {
    device: Arc<Device>,
    image: vk::Image,
    view: vk::ImageView,
    sampler: vk::Sampler,
    allocation: Option<Allocation>,
    extent: vk::Extent2D,
}

impl SampledImage {
    /// Creates the image (in `UNDEFINED` layout), its memory, view and sampler.
    ///
    /// # Errors
    ///
    /// Returns an error if the extent is empty or any Vulkan object or
    /// allocation fails. Objects created before the failure are released.
    pub fn new(device: Arc<Device>, extent: vk::Extent2D, sampler: SamplerDesc) -> RhiResult<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::PackError(
                "Image dimensions must be greater than 0".to_string(),
            ));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(TEXTURE_FORMAT)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None)? };

        // From here on, partially built state is released by Drop.
        let mut texture = Self {
            device,
            image,
            view: vk::ImageView::null(),
            sampler: vk::Sampler::null(),
            allocation: None,
            extent,
        };

        let requirements = unsafe {
            texture
                .device
                .handle()
                .get_image_memory_requirements(image)
        };

        let allocation = texture
            .device
            .allocator()
            .lock()
            .allocate(&AllocationCreateDesc {
                name: "texture",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .inspect_err(|e| error!("Failed to allocate texture memory: {}", e))?;

        let (memory, offset) = unsafe { (allocation.memory(), allocation.offset()) };
        texture.allocation = Some(allocation);
        unsafe {
            texture
                .device
                .handle()
                .bind_image_memory(image, memory, offset)?;
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(TEXTURE_FORMAT)
            .subresource_range(color_subresource_range());
        texture.view = unsafe { texture.device.handle().create_image_view(&view_info, None)? };

        texture.sampler = unsafe {
            texture
                .device
                .handle()
                .create_sampler(&sampler.create_info(), None)?
        };

        debug!(
            "Created texture {}x{} (anisotropy: {:?})",
            extent.width, extent.height, sampler.max_anisotropy
        );

        Ok(texture)
    }

    /// Returns the Vulkan image handle.
    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Descriptor for a combined image sampler in `SHADER_READ_ONLY_OPTIMAL`.
    pub fn descriptor(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo::default()
            .sampler(self.sampler)
            .image_view(self.view)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
    }
}

impl Drop for SampledImage {
    fn drop(&mut self) {
        unsafe {
            if self.sampler != vk::Sampler::null() {
                self.device.handle().destroy_sampler(self.sampler, None);
            }
            if self.view != vk::ImageView::null() {
                self.device.handle().destroy_image_view(self.view, None);
            }
        }

        if let Some(allocation) = self.allocation.take()
            && let Err(e) = self.device.allocator().lock().free(allocation)
        {
            error!("Failed to free texture allocation: {:?}", e);
        }

        unsafe {
            self.device.handle().destroy_image(self.image, None);
        }

        debug!(
            "Destroyed texture {}x{}",
            self.extent.width, self.extent.height
        );
    }
}

/// Single-mip, single-layer colour subresource.
pub fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_transition_masks() {
        let to_dst = layout_transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        assert_eq!(to_dst.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert!(to_dst.src_access.is_empty());
        assert_eq!(to_dst.dst_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(to_dst.dst_access, vk::AccessFlags::TRANSFER_WRITE);

        let to_read = layout_transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(to_read.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_read.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(to_read.dst_access, vk::AccessFlags::SHADER_READ);
    }

    #[test]
    fn test_unknown_transition_falls_back_to_full_barrier() {
        let masks = layout_transition_masks(
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
        assert_eq!(masks.src_stage, vk::PipelineStageFlags::ALL_COMMANDS);
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::ALL_COMMANDS);
    }

    #[test]
    fn test_sampler_anisotropy_clamped_to_device() {
        assert_eq!(SamplerDesc::clamped(16.0, 8.0).max_anisotropy, Some(8.0));
        assert_eq!(SamplerDesc::clamped(4.0, 16.0).max_anisotropy, Some(4.0));
        assert_eq!(SamplerDesc::clamped(1.0, 16.0).max_anisotropy, None);
        // A device without anisotropy reports a limit of 1.0.
        assert_eq!(SamplerDesc::clamped(16.0, 1.0).max_anisotropy, None);
    }

    #[test]
    fn test_sampler_create_info() {
        let info = SamplerDesc::clamped(16.0, 16.0).create_info();
        assert_eq!(info.address_mode_u, vk::SamplerAddressMode::REPEAT);
        assert_eq!(info.address_mode_w, vk::SamplerAddressMode::REPEAT);
        assert_eq!(info.anisotropy_enable, vk::TRUE);
        assert_eq!(info.compare_enable, vk::FALSE);
        assert_eq!(info.border_color, vk::BorderColor::INT_OPAQUE_BLACK);

        let plain = SamplerDesc::clamped(0.0, 16.0).create_info();
        assert_eq!(plain.anisotropy_enable, vk::FALSE);
        assert_eq!(plain.max_anisotropy, 1.0);
    }
}
