//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate provides a safe abstraction over Vulkan using the `ash` crate.
//! It handles:
//! - Wrapping an externally created logical device
//! - Command pool and command buffer recording
//! - Buffer, image and descriptor management
//! - Pipeline and shader module creation
//! - Packing buffers and textures into device-local memory

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod packer;
pub mod pipeline;
pub mod shader;
pub mod sync;
pub mod vertex;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
