//! CPU-side resources for the frame-construction core.
//!
//! This crate prepares data for upload:
//! - Mesh geometry validated for indexed triangle-list drawing
//! - Material shading parameters and their uniform block layout
//! - Per-draw push constant layout
//! - The texture registry, with file decoding and batched upload

mod error;

pub mod material;
pub mod mesh;
pub mod texture;
pub mod ubo;

pub use error::{ResourceError, ResourceResult};
pub use material::MaterialParams;
pub use mesh::MeshData;
pub use texture::{Texture, TextureData, TextureId, TextureRegistry};
pub use ubo::{DrawPushConstants, MaterialUniform};
