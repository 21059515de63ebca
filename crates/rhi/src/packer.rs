//! Device-memory packing allocator.
//!
//! [`ResourcePacker`] folds many small CPU-side buffers into a single
//! device-local buffer per call. Each request is padded to the usage's
//! alignment, written into a host-visible staging buffer at its cumulative
//! offset, and the whole range is copied to device-local memory with one
//! one-shot command buffer. The packer also owns the per-worker command pools
//! used for secondary command buffer recording.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tessera_core::RendererConfig;
//! use tessera_rhi::buffer::BufferUsage;
//! use tessera_rhi::device::Device;
//! use tessera_rhi::packer::{BufferAllocRequest, ResourcePacker};
//!
//! # fn example(device: Arc<Device>) -> Result<(), tessera_rhi::RhiError> {
//! let mut packer = ResourcePacker::new(device, &RendererConfig::default())?;
//!
//! let a = [1.0f32; 50];
//! let b = [2u32; 25];
//! let mut requests = [
//!     BufferAllocRequest::from_slice(&a),
//!     BufferAllocRequest::from_slice(&b),
//! ];
//! let id = packer.pack_buffers(&mut requests, BufferUsage::Uniform)?;
//! assert_eq!(requests[1].buffer, Some(id));
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use tessera_core::RendererConfig;
use tracing::{debug, error, info};

use crate::buffer::{Buffer, BufferUsage};
use crate::command::{CommandBuffer, CommandPool};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::image::{SampledImage, SamplerDesc};
use crate::sync::Fence;

/// Minimum alignment for index data (`VK_INDEX_TYPE_UINT32`).
pub const INDEX_ALIGNMENT: vk::DeviceSize = 4;

// =============================================================================
// Requests and layout
// =============================================================================

/// Identifier of a packed device-local buffer owned by a [`ResourcePacker`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PackedBufferId(usize);

impl PackedBufferId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// One logical buffer to be packed.
///
/// `aligned_size`, `buffer` and `offset` are filled in by a successful
/// [`ResourcePacker::pack_buffers`]; a failed pack leaves them unchanged.
#[derive(Clone, Debug)]
pub struct BufferAllocRequest<'a> {
    /// Bytes to upload.
    pub data: &'a [u8],
    /// Size after padding to the pack alignment.
    pub aligned_size: vk::DeviceSize,
    /// Packed buffer holding this request, once packed.
    pub buffer: Option<PackedBufferId>,
    /// Byte offset of this request inside the packed buffer.
    pub offset: vk::DeviceSize,
}

impl<'a> BufferAllocRequest<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            aligned_size: 0,
            buffer: None,
            offset: 0,
        }
    }

    /// Request over the raw bytes of a slice of plain-old-data values.
    pub fn from_slice<T: bytemuck::Pod>(values: &'a [T]) -> Self {
        Self::new(bytemuck::cast_slice(values))
    }

    /// Unpadded size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.data.len() as vk::DeviceSize
    }
}

/// Rounds `size` up to the next multiple of `alignment`.
///
/// An alignment of 0 is treated as 1.
#[inline]
pub fn pad_to_alignment(size: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    let alignment = alignment.max(1);
    let remainder = size % alignment;
    if remainder == 0 {
        size
    } else {
        size + (alignment - remainder)
    }
}

/// Placement of a sequence of requests inside one packed buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PackLayout {
    /// Start offset of each request, in request order.
    pub offsets: Vec<vk::DeviceSize>,
    /// Padded size of each request.
    pub padded: Vec<vk::DeviceSize>,
    /// Sum of all padded sizes.
    pub total: vk::DeviceSize,
}

/// Lays out `sizes` back to back, each padded to `alignment`.
pub fn compute_layout<I>(sizes: I, alignment: vk::DeviceSize) -> PackLayout
where
    I: IntoIterator<Item = vk::DeviceSize>,
{
    let mut layout = PackLayout::default();
    for size in sizes {
        let padded = pad_to_alignment(size, alignment);
        layout.offsets.push(layout.total);
        layout.padded.push(padded);
        layout.total += padded;
    }
    layout
}

/// Writes each request's offset, padded size and buffer from `layout`.
///
/// Only called once the upload has completed, so a failed pack leaves every
/// request untouched.
fn assign_placements(
    requests: &mut [BufferAllocRequest<'_>],
    layout: &PackLayout,
    id: PackedBufferId,
) {
    for (request, (&offset, &padded)) in requests
        .iter_mut()
        .zip(layout.offsets.iter().zip(&layout.padded))
    {
        request.offset = offset;
        request.aligned_size = padded;
        request.buffer = Some(id);
    }
}

/// Combines a queried memory alignment with the per-usage device rules.
///
/// Uniform data honours `minUniformBufferOffsetAlignment`; index data (and
/// geometry, which carries indices) is at least 4-byte aligned.
pub fn required_alignment(
    queried: vk::DeviceSize,
    usage: BufferUsage,
    limits: &vk::PhysicalDeviceLimits,
) -> vk::DeviceSize {
    let queried = queried.max(1);
    match usage {
        BufferUsage::Uniform => queried.max(limits.min_uniform_buffer_offset_alignment),
        BufferUsage::Index | BufferUsage::Geometry => queried.max(INDEX_ALIGNMENT),
        BufferUsage::Vertex | BufferUsage::Staging => queried,
    }
}

// =============================================================================
// ResourcePacker
// =============================================================================

/// Packs buffers and textures into device-local memory.
///
/// Owns every packed buffer and image it creates; they are released when the
/// packer is dropped. Uploads are synchronous: each call blocks on a fence
/// until the copy has completed on the graphics queue.
pub struct ResourcePacker {
    device: Arc<Device>,
    /// Transient pool for one-shot upload command buffers.
    upload_pool: CommandPool,
    upload_fence: Fence,
    /// One resettable pool per recording worker.
    worker_pools: Vec<CommandPool>,
    buffers: Vec<Buffer>,
    images: Vec<SampledImage>,
    /// Queried alignment cache, keyed by usage.
    alignments: HashMap<BufferUsage, vk::DeviceSize>,
    max_anisotropy: f32,
}

impl ResourcePacker {
    /// Creates a packer with its upload pool and fence, plus one worker
    /// command pool per configured worker.
    ///
    /// # Errors
    ///
    /// Returns an error if a command pool or the fence cannot be created.
    pub fn new(device: Arc<Device>, config: &RendererConfig) -> RhiResult<Self> {
        let upload_pool = CommandPool::new_transient(device.clone(), device.graphics_family())?;
        let upload_fence = Fence::new(device.clone(), false)?;

        let mut packer = Self {
            device,
            upload_pool,
            upload_fence,
            worker_pools: Vec::new(),
            buffers: Vec::new(),
            images: Vec::new(),
            alignments: HashMap::new(),
            max_anisotropy: config.max_anisotropy,
        };
        packer.create_command_pools(config.worker_count)?;

        info!(
            "Resource packer created ({} worker pool(s), max anisotropy {})",
            config.worker_count, config.max_anisotropy
        );
        Ok(packer)
    }

    /// Returns the device the packer allocates from.
    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Creates `count` resettable command pools on the graphics family.
    ///
    /// Any previously created pools are destroyed first, which also frees the
    /// command buffers allocated from them.
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn create_command_pools(&mut self, count: usize) -> RhiResult<()> {
        self.worker_pools.clear();

        let family = self.device.graphics_family();
        let pools = (0..count)
            .map(|_| CommandPool::new(self.device.clone(), family))
            .collect::<RhiResult<Vec<_>>>()?;
        self.worker_pools = pools;

        info!("Created {} worker command pool(s)", count);
        Ok(())
    }

    /// Returns the worker command pool at `index`.
    #[inline]
    pub fn command_pool(&self, index: usize) -> Option<&CommandPool> {
        self.worker_pools.get(index)
    }

    #[inline]
    pub fn command_pool_count(&self) -> usize {
        self.worker_pools.len()
    }

    /// Returns the Vulkan handle of a packed buffer.
    #[inline]
    pub fn buffer_handle(&self, id: PackedBufferId) -> Option<vk::Buffer> {
        self.buffers.get(id.0).map(Buffer::handle)
    }

    /// Returns the size of a packed buffer in bytes.
    #[inline]
    pub fn buffer_size(&self, id: PackedBufferId) -> Option<vk::DeviceSize> {
        self.buffers.get(id.0).map(Buffer::size)
    }

    /// Alignment used for packing `usage`, queried once and cached.
    ///
    /// # Errors
    ///
    /// Returns an error if the scratch buffer cannot be created.
    pub fn alignment(&mut self, usage: BufferUsage) -> RhiResult<vk::DeviceSize> {
        if let Some(&alignment) = self.alignments.get(&usage) {
            return Ok(alignment);
        }

        let queried = self.query_alignment(usage)?;
        let alignment = required_alignment(queried, usage, self.device.limits());
        debug!(
            "Alignment for {} buffers: {} (queried {})",
            usage.name(),
            alignment,
            queried
        );

        self.alignments.insert(usage, alignment);
        Ok(alignment)
    }

    /// Queries memory requirements of a 1-byte buffer with `usage`'s flags.
    fn query_alignment(&self, usage: BufferUsage) -> RhiResult<vk::DeviceSize> {
        let info = vk::BufferCreateInfo::default()
            .size(1)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let device = self.device.handle();
        unsafe {
            let scratch = device.create_buffer(&info, None)?;
            let requirements = device.get_buffer_memory_requirements(scratch);
            device.destroy_buffer(scratch, None);
            Ok(requirements.alignment)
        }
    }

    /// Packs `requests` into one device-local buffer of `usage`.
    ///
    /// On success every request carries its padded size, its offset and the
    /// returned id.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::PackError`] for a staging usage or when all
    /// requests are empty, [`RhiError::NoSuitableMemoryType`] if no memory
    /// type fits, or any Vulkan error from the upload.
    pub fn pack_buffers(
        &mut self,
        requests: &mut [BufferAllocRequest<'_>],
        usage: BufferUsage,
    ) -> RhiResult<PackedBufferId> {
        if usage == BufferUsage::Staging {
            return Err(RhiError::PackError(
                "Staging is not a packable usage".to_string(),
            ));
        }

        let alignment = self.alignment(usage)?;
        let layout = compute_layout(requests.iter().map(BufferAllocRequest::size), alignment);

        if layout.total == 0 {
            return Err(RhiError::PackError(format!(
                "Nothing to pack for {} buffer ({} empty request(s))",
                usage.name(),
                requests.len()
            )));
        }

        let staging = Buffer::new(self.device.clone(), BufferUsage::Staging, layout.total)?;
        for (request, &offset) in requests.iter().zip(&layout.offsets) {
            staging.write_data(offset, request.data)?;
        }

        let packed = Buffer::new(self.device.clone(), usage, layout.total)
            .inspect_err(|e| error!("Failed to create packed {} buffer: {}", usage.name(), e))?;

        let region = vk::BufferCopy::default()
            .src_offset(0)
            .dst_offset(0)
            .size(layout.total);
        self.submit_one_shot(|cmd| cmd.copy_buffer(staging.handle(), packed.handle(), &[region]))?;
        drop(staging);

        let id = PackedBufferId(self.buffers.len());
        self.buffers.push(packed);
        assign_placements(requests, &layout, id);

        debug!(
            "Packed {} request(s) into {} buffer #{}: {} bytes (alignment {})",
            requests.len(),
            usage.name(),
            id.0,
            layout.total,
            alignment
        );

        Ok(id)
    }

    /// Uploads RGBA8 pixels into a sampled texture.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::PackError`] if `pixels.len() != width * height * 4`
    /// or the extent is empty, or any error from image creation and upload.
    pub fn pack_image(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> RhiResult<vk::DescriptorImageInfo> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(RhiError::PackError(format!(
                "Expected {} bytes of RGBA8 data for {}x{}, got {}",
                expected,
                width,
                height,
                pixels.len()
            )));
        }

        let extent = vk::Extent2D { width, height };
        let sampler = SamplerDesc::clamped(
            self.max_anisotropy,
            self.device.limits().max_sampler_anisotropy,
        );
        let texture = SampledImage::new(self.device.clone(), extent, sampler)?;
        let staging = Buffer::new_with_data(self.device.clone(), BufferUsage::Staging, pixels)?;

        self.submit_one_shot(|cmd| {
            cmd.transition_image_layout(
                texture.image(),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );
            cmd.copy_buffer_to_image(staging.handle(), texture.image(), extent);
            cmd.transition_image_layout(
                texture.image(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
        })?;

        let descriptor = texture.descriptor();
        self.images.push(texture);

        debug!("Packed {}x{} texture #{}", width, height, self.images.len() - 1);
        Ok(descriptor)
    }

    /// Records `record` into a fresh command buffer, submits it and waits.
    fn submit_one_shot<F>(&self, record: F) -> RhiResult<()>
    where
        F: FnOnce(&CommandBuffer),
    {
        let handles = self.upload_pool.allocate_command_buffers(1)?;
        let cmd = CommandBuffer::from_handle(self.device.clone(), handles[0]);

        let result = (|| {
            cmd.begin()?;
            record(&cmd);
            cmd.end()?;

            let command_buffers = [cmd.handle()];
            let submit = vk::SubmitInfo::default().command_buffers(&command_buffers);
            unsafe {
                self.device
                    .submit_graphics(&[submit], self.upload_fence.handle())?;
            }

            self.upload_fence.wait(u64::MAX)?;
            self.upload_fence.reset()
        })();

        if let Err(e) = &result {
            error!("One-shot upload failed: {}", e);
            // The fence may never signal; make sure nothing is still executing.
            let _ = self.device.wait_idle();
        }

        self.upload_pool.free(&handles);
        result
    }
}

impl Drop for ResourcePacker {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during packer drop: {}", e);
        }
        info!(
            "Resource packer destroyed ({} buffer(s), {} image(s), {} pool(s))",
            self.buffers.len(),
            self.images.len(),
            self.worker_pools.len()
        );
    }
}
