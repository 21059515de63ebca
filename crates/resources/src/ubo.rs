//! GPU-visible data layouts for materials and draws.
//!
//! All structures use `#[repr(C)]` and implement `bytemuck::Pod` so they can
//! be handed to the packer or to `vkCmdPushConstants` as raw bytes.
//!
//! - [`MaterialUniform`] is the per-material uniform block (set 0, binding 0)
//! - [`DrawPushConstants`] is the per-draw push constant block (vertex stage)
//!
//! # Example
//!
//! ```
//! use tessera_resources::ubo::{DrawPushConstants, MaterialUniform};
//! use glam::Mat4;
//!
//! let push = DrawPushConstants::new(Mat4::IDENTITY, Mat4::IDENTITY);
//! let bytes: &[u8] = bytemuck::bytes_of(&push);
//! assert_eq!(bytes.len(), 128);
//! assert_eq!(MaterialUniform::size(), 128);
//! ```

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

/// Per-material shading parameters as seen by the fragment shader.
///
/// Colours are stored as `vec4` with the alpha lane unused so the block has
/// no implicit padding.
///
/// # Memory Layout (std140)
///
/// | Offset | Size | Field |
/// |--------|------|-------|
/// | 0      | 16   | ambient |
/// | 16     | 16   | diffuse |
/// | 32     | 16   | specular |
/// | 48     | 16   | transmittance |
/// | 64     | 16   | emissive |
/// | 80     | 4    | shininess |
/// | 84     | 4    | ior |
/// | 88     | 4    | dissolve |
/// | 92     | 4    | illum |
/// | 96     | 4    | roughness |
/// | 100    | 4    | metallic |
/// | 104    | 4    | sheen |
/// | 108    | 4    | clearcoat_thickness |
/// | 112    | 4    | clearcoat_roughness |
/// | 116    | 4    | anisotropy |
/// | 120    | 4    | anisotropy_rotation |
/// | 124    | 4    | has_texture |
///
/// Total size: 128 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MaterialUniform {
    pub ambient: Vec4,
    pub diffuse: Vec4,
    pub specular: Vec4,
    pub transmittance: Vec4,
    pub emissive: Vec4,
    pub shininess: f32,
    pub ior: f32,
    pub dissolve: f32,
    pub illum: f32,
    pub roughness: f32,
    pub metallic: f32,
    pub sheen: f32,
    pub clearcoat_thickness: f32,
    pub clearcoat_roughness: f32,
    pub anisotropy: f32,
    pub anisotropy_rotation: f32,
    /// 1 when a diffuse texture is bound at binding 1, otherwise 0.
    pub has_texture: u32,
}

impl MaterialUniform {
    /// Returns the size of this structure in bytes.
    #[inline]
    pub const fn size() -> usize {
        std::mem::size_of::<Self>()
    }
}

/// Per-draw matrices pushed to the vertex stage.
///
/// # Memory Layout
///
/// | Offset | Size | Field |
/// |--------|------|-------|
/// | 0      | 64   | mvp |
/// | 64     | 64   | model |
///
/// Total size: 128 bytes, the smallest maxPushConstantsSize Vulkan guarantees.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct DrawPushConstants {
    /// `view_projection * model`.
    pub mvp: Mat4,
    pub model: Mat4,
}

impl DrawPushConstants {
    #[inline]
    pub fn new(view_projection: Mat4, model: Mat4) -> Self {
        Self {
            mvp: view_projection * model,
            model,
        }
    }

    /// Returns the size of this structure in bytes.
    #[inline]
    pub const fn size() -> usize {
        std::mem::size_of::<Self>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use std::mem::{offset_of, size_of};

    #[test]
    fn test_material_uniform_size() {
        assert_eq!(size_of::<MaterialUniform>(), 128);
        assert_eq!(MaterialUniform::size(), 128);
    }

    #[test]
    fn test_material_uniform_std140_offsets() {
        assert_eq!(offset_of!(MaterialUniform, ambient), 0);
        assert_eq!(offset_of!(MaterialUniform, diffuse), 16);
        assert_eq!(offset_of!(MaterialUniform, specular), 32);
        assert_eq!(offset_of!(MaterialUniform, transmittance), 48);
        assert_eq!(offset_of!(MaterialUniform, emissive), 64);
        assert_eq!(offset_of!(MaterialUniform, shininess), 80);
        assert_eq!(offset_of!(MaterialUniform, illum), 92);
        assert_eq!(offset_of!(MaterialUniform, roughness), 96);
        assert_eq!(offset_of!(MaterialUniform, clearcoat_roughness), 112);
        assert_eq!(offset_of!(MaterialUniform, has_texture), 124);
    }

    #[test]
    fn test_push_constants_size() {
        assert_eq!(size_of::<DrawPushConstants>(), 128);
        assert_eq!(DrawPushConstants::size(), 128);
    }

    #[test]
    fn test_push_constants_mvp() {
        let view_projection = Mat4::perspective_rh(45.0_f32.to_radians(), 1.0, 0.1, 100.0);
        let model = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));

        let push = DrawPushConstants::new(view_projection, model);

        assert_eq!(push.mvp, view_projection * model);
        assert_eq!(push.model, model);
    }

    #[test]
    fn test_bytemuck_cast() {
        let uniform = MaterialUniform::default();
        assert_eq!(bytemuck::bytes_of(&uniform).len(), MaterialUniform::size());

        let push = DrawPushConstants::default();
        assert_eq!(bytemuck::bytes_of(&push).len(), DrawPushConstants::size());
    }
}
