//! Material shading parameters.

use glam::Vec3;

use crate::texture::TextureId;
use crate::ubo::MaterialUniform;

/// Shading parameters of one material.
///
/// Colours are linear RGB in `[0, 1]`. Scalar ranges follow the usual MTL
/// conventions (shininess up to 1000, ior in `0.001..=10`, dissolve 1.0 for
/// fully opaque).
#[derive(Clone, Debug, PartialEq)]
pub struct MaterialParams {
    pub ambient: Vec3,
    pub diffuse: Vec3,
    pub specular: Vec3,
    /// Transmission filter.
    pub transmittance: Vec3,
    pub emissive: Vec3,
    /// Specular exponent.
    pub shininess: f32,
    /// Index of refraction.
    pub ior: f32,
    /// Opacity; 0.0 is fully transparent.
    pub dissolve: f32,
    /// Illumination model number.
    pub illum: f32,
    pub roughness: f32,
    pub metallic: f32,
    pub sheen: f32,
    pub clearcoat_thickness: f32,
    pub clearcoat_roughness: f32,
    pub anisotropy: f32,
    pub anisotropy_rotation: f32,
    /// Selects the textured shader variant when set.
    pub diffuse_texture: Option<TextureId>,
}

impl Default for MaterialParams {
    fn default() -> Self {
        Self {
            ambient: Vec3::ZERO,
            diffuse: Vec3::splat(0.8),
            specular: Vec3::ZERO,
            transmittance: Vec3::ZERO,
            emissive: Vec3::ZERO,
            shininess: 0.0,
            ior: 1.0,
            dissolve: 1.0,
            illum: 0.0,
            roughness: 0.0,
            metallic: 0.0,
            sheen: 0.0,
            clearcoat_thickness: 0.0,
            clearcoat_roughness: 0.0,
            anisotropy: 0.0,
            anisotropy_rotation: 0.0,
            diffuse_texture: None,
        }
    }
}

impl MaterialParams {
    /// Builder-style setter for the diffuse texture.
    pub fn with_diffuse_texture(mut self, texture: TextureId) -> Self {
        self.diffuse_texture = Some(texture);
        self
    }

    #[inline]
    pub fn has_texture(&self) -> bool {
        self.diffuse_texture.is_some()
    }

    /// Converts to the std140 uniform block layout.
    pub fn to_uniform(&self) -> MaterialUniform {
        MaterialUniform {
            ambient: self.ambient.extend(1.0),
            diffuse: self.diffuse.extend(1.0),
            specular: self.specular.extend(1.0),
            transmittance: self.transmittance.extend(1.0),
            emissive: self.emissive.extend(1.0),
            shininess: self.shininess,
            ior: self.ior,
            dissolve: self.dissolve,
            illum: self.illum,
            roughness: self.roughness,
            metallic: self.metallic,
            sheen: self.sheen,
            clearcoat_thickness: self.clearcoat_thickness,
            clearcoat_roughness: self.clearcoat_roughness,
            anisotropy: self.anisotropy,
            anisotropy_rotation: self.anisotropy_rotation,
            has_texture: u32::from(self.has_texture()),
        }
    }
}
