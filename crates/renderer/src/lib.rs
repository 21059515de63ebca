//! Parallel command recording and presentation.
//!
//! This crate turns drawables into frames:
//! - [`FrameRecorder`] records one secondary command buffer per drawable on
//!   the worker pool and assembles them into per-image primaries
//! - [`MaterialRegistry`] owns material pipelines and descriptor sets
//! - [`FrameLoop`] acquires, submits and presents, rebuilding on resize

pub mod drawable;
pub mod error;
pub mod frame;
pub mod frame_loop;
pub mod frame_recorder;
pub mod material;
pub mod mesh;

pub use drawable::{Drawable, RecordContext, SharedDrawable, shared};
pub use error::{RenderError, RenderResult};
pub use frame::{FrameTargets, SurfaceStatus};
pub use frame_loop::{FrameLoop, PresentSurface};
pub use frame_recorder::{FrameRecorder, RecordSchedule, partition_round_robin};
pub use material::{
    DEFAULT_MATERIAL, Material, MaterialEvent, MaterialId, MaterialRegistry, MaterialState,
    ShaderVariant,
};
pub use mesh::{GeometryBinding, MeshDrawable, upload_meshes};
