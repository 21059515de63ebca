//! The contract between the frame recorder and recordable geometry.

use std::sync::Arc;

use ash::vk;
use glam::Mat4;
use parking_lot::Mutex;
use tessera_rhi::packer::ResourcePacker;

use crate::error::RenderResult;

/// Everything a drawable needs to record its secondary command buffer.
#[derive(Clone, Copy, Debug)]
pub struct RecordContext {
    /// Render pass the secondary buffer continues.
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
    /// Framebuffer of the swapchain image being recorded.
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub view_projection: Mat4,
}

/// One independently recordable piece of geometry.
///
/// A drawable owns a single secondary command buffer, allocated once from the
/// command pool of the worker it is assigned to and re-recorded every frame
/// on that worker.
pub trait Drawable: Send {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Uploads the drawable's GPU buffers. Called once on the main thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the geometry is invalid or the upload fails.
    fn create_buffers(&mut self, packer: &mut ResourcePacker) -> RenderResult<()>;

    /// Records the secondary command buffer for one frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the drawable is not prepared or recording fails.
    fn record(&mut self, ctx: &RecordContext) -> RenderResult<()>;

    fn set_command_pool(&mut self, pool: vk::CommandPool);

    fn set_command_buffer(&mut self, command_buffer: vk::CommandBuffer);

    /// The secondary command buffer, or null before preparation.
    fn command_buffer(&self) -> vk::CommandBuffer;
}

/// Drawable shared between the main thread and its recording worker.
pub type SharedDrawable = Arc<Mutex<dyn Drawable>>;

/// Wraps a drawable for registration with the recorder.
pub fn shared<D: Drawable + 'static>(drawable: D) -> SharedDrawable {
    Arc::new(Mutex::new(drawable))
}
