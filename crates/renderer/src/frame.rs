//! Render targets and surface status.

use ash::prelude::VkResult;
use ash::vk;
use tessera_rhi::RhiResult;
use tracing::debug;

/// The render pass and per-image framebuffers drawn into each frame.
///
/// Owned by whoever owns the swapchain; the renderer only borrows handles.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameTargets {
    pub render_pass: vk::RenderPass,
    /// One framebuffer per swapchain image, in image order.
    pub framebuffers: Vec<vk::Framebuffer>,
    pub extent: vk::Extent2D,
}

impl FrameTargets {
    pub fn new(
        render_pass: vk::RenderPass,
        framebuffers: Vec<vk::Framebuffer>,
        extent: vk::Extent2D,
    ) -> Self {
        Self {
            render_pass,
            framebuffers,
            extent,
        }
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.framebuffers.len()
    }

    #[inline]
    pub fn framebuffer(&self, image_index: usize) -> Option<vk::Framebuffer> {
        self.framebuffers.get(image_index).copied()
    }
}

/// How well the surface still matches the swapchain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum SurfaceStatus {
    #[default]
    Optimal,
    /// Presentable, but the swapchain should be rebuilt.
    Suboptimal,
    /// Not presentable until the swapchain is rebuilt.
    OutOfDate,
}

impl SurfaceStatus {
    #[inline]
    pub fn needs_rebuild(self) -> bool {
        self != SurfaceStatus::Optimal
    }

    /// The more severe of two statuses.
    #[inline]
    pub fn worst(self, other: SurfaceStatus) -> SurfaceStatus {
        self.max(other)
    }
}

/// Classifies the result of `vkAcquireNextImageKHR`.
///
/// Returns `None` when the swapchain is out of date and no image was acquired.
///
/// # Errors
///
/// Any other Vulkan error is returned unchanged.
pub fn acquire_status(result: VkResult<(u32, bool)>) -> RhiResult<Option<(u32, SurfaceStatus)>> {
    match result {
        Ok((index, false)) => Ok(Some((index, SurfaceStatus::Optimal))),
        Ok((index, true)) => {
            debug!("Swapchain suboptimal during acquire");
            Ok(Some((index, SurfaceStatus::Suboptimal)))
        }
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
            debug!("Swapchain out of date during acquire");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Classifies the result of `vkQueuePresentKHR`.
///
/// # Errors
///
/// Any Vulkan error other than out-of-date or suboptimal is returned
/// unchanged.
pub fn present_status(result: VkResult<bool>) -> RhiResult<SurfaceStatus> {
    match result {
        Ok(false) => Ok(SurfaceStatus::Optimal),
        Ok(true) | Err(vk::Result::SUBOPTIMAL_KHR) => {
            debug!("Swapchain suboptimal during present");
            Ok(SurfaceStatus::Suboptimal)
        }
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
            debug!("Swapchain out of date during present");
            Ok(SurfaceStatus::OutOfDate)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_rhi::RhiError;

    #[test]
    fn test_acquire_status() {
        assert_eq!(
            acquire_status(Ok((2, false))).unwrap(),
            Some((2, SurfaceStatus::Optimal))
        );
        assert_eq!(
            acquire_status(Ok((0, true))).unwrap(),
            Some((0, SurfaceStatus::Suboptimal))
        );
        assert_eq!(
            acquire_status(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            None
        );
        assert!(matches!(
            acquire_status(Err(vk::Result::ERROR_DEVICE_LOST)),
            Err(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST))
        ));
    }

    #[test]
    fn test_present_status() {
        assert_eq!(present_status(Ok(false)).unwrap(), SurfaceStatus::Optimal);
        assert_eq!(present_status(Ok(true)).unwrap(), SurfaceStatus::Suboptimal);
        assert_eq!(
            present_status(Err(vk::Result::SUBOPTIMAL_KHR)).unwrap(),
            SurfaceStatus::Suboptimal
        );
        assert_eq!(
            present_status(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            SurfaceStatus::OutOfDate
        );
        assert!(present_status(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());
    }

    #[test]
    fn test_surface_status_ordering() {
        assert!(!SurfaceStatus::Optimal.needs_rebuild());
        assert!(SurfaceStatus::Suboptimal.needs_rebuild());
        assert_eq!(
            SurfaceStatus::Suboptimal.worst(SurfaceStatus::OutOfDate),
            SurfaceStatus::OutOfDate
        );
        assert_eq!(
            SurfaceStatus::Optimal.worst(SurfaceStatus::Suboptimal),
            SurfaceStatus::Suboptimal
        );
    }

    #[test]
    fn test_frame_targets() {
        let targets = FrameTargets::new(
            vk::RenderPass::null(),
            vec![vk::Framebuffer::null(); 3],
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        );
        assert_eq!(targets.image_count(), 3);
        assert!(targets.framebuffer(2).is_some());
        assert!(targets.framebuffer(3).is_none());
    }
}
