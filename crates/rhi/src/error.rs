//! RHI-specific error types.

use gpu_allocator::AllocationError;
use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(AllocationError),

    /// No memory type satisfies the requested usage and location
    #[error("No suitable memory type for the requested allocation")]
    NoSuitableMemoryType,

    /// Shader loading error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// Invalid packing request (empty batch, bad pixel data, unsupported usage)
    #[error("Pack error: {0}")]
    PackError(String),

    /// Invalid handle error
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),
}

impl From<AllocationError> for RhiError {
    fn from(err: AllocationError) -> Self {
        match err {
            AllocationError::NoCompatibleMemoryTypeFound => Self::NoSuitableMemoryType,
            other => Self::AllocatorError(other),
        }
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    #[test]
    fn test_no_compatible_memory_maps_to_dedicated_variant() {
        let err = RhiError::from(AllocationError::NoCompatibleMemoryTypeFound);
        assert!(matches!(err, RhiError::NoSuitableMemoryType));
    }

    #[test]
    fn test_other_allocator_errors_preserved() {
        let err = RhiError::from(AllocationError::OutOfMemory);
        assert!(matches!(err, RhiError::AllocatorError(AllocationError::OutOfMemory)));
    }

    #[test]
    fn test_vulkan_result_conversion() {
        let err: RhiError = vk::Result::ERROR_DEVICE_LOST.into();
        assert!(matches!(err, RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST)));
    }
}
