//! Per-frame acquire, record, submit and present.

use std::sync::Arc;

use ash::prelude::VkResult;
use ash::vk;
use glam::Mat4;
use tessera_rhi::command::CommandPool;
use tessera_rhi::device::Device;
use tessera_rhi::sync::{Fence, Semaphore};
use tracing::{debug, error, info, warn};

use crate::error::RenderResult;
use crate::frame::{self, FrameTargets, SurfaceStatus};
use crate::frame_recorder::FrameRecorder;
use crate::material::MaterialRegistry;

/// The swapchain side of the frame loop, implemented by whoever owns the
/// surface and its framebuffers.
pub trait PresentSurface {
    /// Acquires the next image, signalling `signal` when it is ready.
    ///
    /// Returns the image index and whether the swapchain is suboptimal.
    fn acquire_next_image(&mut self, signal: vk::Semaphore) -> VkResult<(u32, bool)>;

    /// Presents `image_index` on `queue` once `wait` is signaled.
    ///
    /// Returns whether the swapchain is suboptimal.
    fn present(&mut self, queue: vk::Queue, image_index: u32, wait: vk::Semaphore)
    -> VkResult<bool>;

    /// Rebuilds the swapchain, render pass and framebuffers for the current
    /// surface size. The device is idle when this is called.
    ///
    /// # Errors
    ///
    /// Returns an error if the swapchain cannot be rebuilt.
    fn recreate(&mut self) -> RenderResult<()>;

    /// Current render pass, framebuffers and extent.
    fn targets(&self) -> FrameTargets;
}

/// Semaphores for one swapchain image.
struct ImageSync {
    image_available: Semaphore,
    render_finished: Semaphore,
}

impl ImageSync {
    fn create_all(device: &Arc<Device>, count: usize) -> RenderResult<Vec<Self>> {
        (0..count)
            .map(|_| {
                Ok(Self {
                    image_available: Semaphore::new(device.clone())?,
                    render_finished: Semaphore::new(device.clone())?,
                })
            })
            .collect()
    }
}

/// Acquire-semaphore slot and pending rebuild of a [`FrameLoop`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct FrameCursor {
    /// Acquire semaphores cycle independently of the acquired image index.
    slot: usize,
    needs_rebuild: bool,
}

impl FrameCursor {
    fn request_rebuild(&mut self) {
        self.needs_rebuild = true;
    }

    /// An image was acquired but its frame will not be submitted.
    ///
    /// The slot's acquire semaphore stays signaled with no waiter, so the
    /// per-image sync objects must be recreated before the slot is reused.
    fn abandon_acquired(&mut self) {
        self.needs_rebuild = true;
    }

    /// Advances to the next slot after a submitted frame was presented.
    fn presented(&mut self, slot_count: usize, status: SurfaceStatus) {
        self.slot = (self.slot + 1) % slot_count.max(1);
        if status.needs_rebuild() {
            self.needs_rebuild = true;
        }
    }

    fn rebuilt(&mut self) {
        *self = Self::default();
    }
}

/// Drives one frame at a time through a [`PresentSurface`].
///
/// A single frame is in flight: every drawable owns one secondary command
/// buffer that is re-recorded each frame.
pub struct FrameLoop<S: PresentSurface> {
    device: Arc<Device>,
    surface: S,
    targets: FrameTargets,
    primary_pool: CommandPool,
    primaries: Vec<vk::CommandBuffer>,
    image_sync: Vec<ImageSync>,
    cursor: FrameCursor,
    in_flight: Fence,
    frame_count: u64,
}

impl<S: PresentSurface> FrameLoop<S> {
    /// Creates the loop with one primary command buffer and semaphore pair per
    /// swapchain image.
    ///
    /// # Errors
    ///
    /// Returns an error if the command pool, command buffers or sync objects
    /// cannot be created.
    pub fn new(device: Arc<Device>, surface: S) -> RenderResult<Self> {
        let targets = surface.targets();
        let primary_pool = CommandPool::new(device.clone(), device.graphics_family())?;
        let primaries = primary_pool.allocate_command_buffers(targets.image_count() as u32)?;
        let image_sync = ImageSync::create_all(&device, targets.image_count())?;
        let in_flight = Fence::new(device.clone(), true)?;

        info!(
            "Frame loop created: {} image(s), {}x{}",
            targets.image_count(),
            targets.extent.width,
            targets.extent.height
        );

        Ok(Self {
            device,
            surface,
            targets,
            primary_pool,
            primaries,
            image_sync,
            cursor: FrameCursor::default(),
            in_flight,
            frame_count: 0,
        })
    }

    #[inline]
    pub fn surface(&self) -> &S {
        &self.surface
    }

    #[inline]
    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    #[inline]
    pub fn targets(&self) -> &FrameTargets {
        &self.targets
    }

    #[inline]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Requests a rebuild before the next frame, e.g. after a window resize.
    pub fn request_rebuild(&mut self) {
        self.cursor.request_rebuild();
    }

    /// Renders and presents one frame.
    ///
    /// Returns the worst surface status seen. Out-of-date or suboptimal
    /// results schedule a rebuild at the start of the next frame; an
    /// out-of-date acquire skips the frame. A frame that fails after its
    /// image was acquired also schedules a rebuild, which replaces the
    /// semaphore left signaled by the acquire.
    ///
    /// # Errors
    ///
    /// Returns any recording, submission or rebuild error, or a Vulkan error
    /// other than out-of-date and suboptimal.
    pub fn render_frame(
        &mut self,
        recorder: &FrameRecorder,
        materials: &mut MaterialRegistry,
        view_projection: Mat4,
    ) -> RenderResult<SurfaceStatus> {
        if self.cursor.needs_rebuild {
            debug!("Rebuild requested, rebuilding before acquire");
            self.rebuild(materials)?;
        }

        if self.image_sync.is_empty() {
            warn!("Surface has no images, skipping frame");
            self.cursor.request_rebuild();
            return Ok(SurfaceStatus::OutOfDate);
        }

        self.in_flight.wait(u64::MAX)?;

        let acquire_semaphore = self.image_sync[self.cursor.slot]
            .image_available
            .handle();
        let acquired = frame::acquire_status(self.surface.acquire_next_image(acquire_semaphore))?;
        let Some((image_index, acquire_status)) = acquired else {
            self.cursor.request_rebuild();
            return Ok(SurfaceStatus::OutOfDate);
        };

        let image = image_index as usize;
        let (Some(&primary), Some(sync)) = (self.primaries.get(image), self.image_sync.get(image))
        else {
            warn!(
                "Acquired image {} outside {} tracked image(s), rebuilding",
                image_index,
                self.primaries.len()
            );
            self.cursor.abandon_acquired();
            return Ok(SurfaceStatus::OutOfDate);
        };
        let render_finished = sync.render_finished.handle();

        let submitted = self.record_and_submit(
            recorder,
            image,
            primary,
            acquire_semaphore,
            render_finished,
            view_projection,
        );
        if let Err(e) = submitted {
            warn!(
                "Frame for image {} abandoned after acquire, rebuilding next frame",
                image_index
            );
            self.cursor.abandon_acquired();
            return Err(e);
        }

        let present_status = frame::present_status(self.surface.present(
            self.device.graphics_queue(),
            image_index,
            render_finished,
        ))?;

        self.frame_count += 1;

        let status = acquire_status.worst(present_status);
        self.cursor.presented(self.image_sync.len(), status);
        if status.needs_rebuild() {
            debug!("Surface {:?}, rebuilding next frame", status);
        }
        Ok(status)
    }

    fn record_and_submit(
        &self,
        recorder: &FrameRecorder,
        image: usize,
        primary: vk::CommandBuffer,
        acquire_semaphore: vk::Semaphore,
        render_finished: vk::Semaphore,
        view_projection: Mat4,
    ) -> RenderResult<()> {
        recorder.record_image(&self.targets, image, primary, view_projection)?;

        // Only reset once work is guaranteed to be submitted.
        self.in_flight.reset()?;

        let wait_semaphores = [acquire_semaphore];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [render_finished];
        let command_buffers = [primary];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .submit_graphics(&[submit_info], self.in_flight.handle())
                .inspect_err(|e| error!("Frame submission failed: {}", e))?;
        }
        Ok(())
    }

    /// Rebuilds everything that depends on the swapchain, plus the per-image
    /// semaphores and the in-flight fence.
    ///
    /// # Errors
    ///
    /// Returns an error if the surface, pipelines or per-image objects cannot
    /// be recreated.
    pub fn rebuild(&mut self, materials: &mut MaterialRegistry) -> RenderResult<()> {
        self.device.wait_idle()?;
        // A frame abandoned after the fence was reset would never signal it.
        self.in_flight = Fence::new(self.device.clone(), true)?;

        self.surface.recreate()?;
        self.targets = self.surface.targets();

        materials.recreate_pipelines(self.targets.render_pass, self.targets.extent)?;

        self.primary_pool.free(&self.primaries);
        self.primaries = self
            .primary_pool
            .allocate_command_buffers(self.targets.image_count() as u32)?;

        self.image_sync = ImageSync::create_all(&self.device, self.targets.image_count())?;
        self.cursor.rebuilt();

        info!(
            "Rebuilt frame loop: {} image(s), {}x{}",
            self.targets.image_count(),
            self.targets.extent.width,
            self.targets.extent.height
        );
        Ok(())
    }
}

impl<S: PresentSurface> Drop for FrameLoop<S> {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during frame loop drop: {}", e);
        }
        self.primary_pool.free(&self.primaries);
        debug!("Frame loop destroyed after {} frame(s)", self.frame_count);
    }
}
