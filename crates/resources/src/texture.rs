//! Texture registry.
//!
//! Textures are registered by name, decoded to RGBA8 on the CPU and uploaded
//! in one batch through the resource packer. Registering a name twice returns
//! the existing [`TextureId`] without touching the first texture.
//!
//! # Example
//!
//! ```no_run
//! use tessera_resources::texture::{TextureData, TextureRegistry};
//!
//! # fn example() -> Result<(), tessera_resources::ResourceError> {
//! let mut textures = TextureRegistry::new();
//! let brick = textures.load("brick", "assets/brick.png")?;
//! let white = textures.insert("white", TextureData::from_rgba8("white", 1, 1, vec![255; 4])?);
//! assert_ne!(brick, white);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::path::Path;

use ash::vk;
use tessera_core::{Arena, Handle};
use tessera_rhi::packer::ResourcePacker;
use tracing::{debug, error, info};

use crate::error::{ResourceError, ResourceResult};

/// Identity of a registered texture.
pub type TextureId = Handle<Texture>;

/// Decoded RGBA8 pixels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    /// Tightly packed rows, 4 bytes per pixel.
    pub pixels: Vec<u8>,
}

impl TextureData {
    /// Wraps raw RGBA8 pixels.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::InvalidPixelData`] if the size is empty or the
    /// buffer length is not `width * height * 4`.
    pub fn from_rgba8(
        name: &str,
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    ) -> ResourceResult<Self> {
        let expected = width as usize * height as usize * 4;
        if expected == 0 || pixels.len() != expected {
            return Err(ResourceError::InvalidPixelData {
                name: name.to_string(),
                expected,
                actual: pixels.len(),
            });
        }

        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Decodes an image file and converts it to RGBA8.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::FileNotFound`] for a missing file, or
    /// [`ResourceError::Image`] if decoding fails.
    pub fn load(path: impl AsRef<Path>) -> ResourceResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ResourceError::FileNotFound(path.to_path_buf()));
        }

        let rgba = image::open(path)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        debug!("Decoded {:?}: {}x{}", path, width, height);

        Ok(Self {
            width,
            height,
            pixels: rgba.into_raw(),
        })
    }
}

/// A registered texture.
#[derive(Debug)]
pub struct Texture {
    name: String,
    width: u32,
    height: u32,
    /// Released once the texture is uploaded.
    pixels: Vec<u8>,
    descriptor: Option<vk::DescriptorImageInfo>,
}

impl Texture {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    pub fn is_uploaded(&self) -> bool {
        self.descriptor.is_some()
    }

    /// Combined image sampler descriptor, once uploaded.
    #[inline]
    pub fn descriptor(&self) -> Option<vk::DescriptorImageInfo> {
        self.descriptor
    }
}

/// Name-keyed store of textures.
#[derive(Default)]
pub struct TextureRegistry {
    textures: Arena<Texture>,
    names: HashMap<String, TextureId>,
}

impl TextureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers decoded pixels under `name`, or returns the existing id.
    pub fn insert(&mut self, name: &str, data: TextureData) -> TextureId {
        if let Some(&id) = self.names.get(name) {
            debug!("Texture '{}' already registered", name);
            return id;
        }

        let id = self.textures.insert(Texture {
            name: name.to_string(),
            width: data.width,
            height: data.height,
            pixels: data.pixels,
            descriptor: None,
        });
        self.names.insert(name.to_string(), id);

        debug!(
            "Registered texture '{}' ({}x{})",
            name, data.width, data.height
        );
        id
    }

    /// Loads `path` and registers it under `name`.
    ///
    /// A name that is already registered returns its id without reading the
    /// file.
    ///
    /// # Errors
    ///
    /// Returns any error from [`TextureData::load`].
    pub fn load(&mut self, name: &str, path: impl AsRef<Path>) -> ResourceResult<TextureId> {
        if let Some(&id) = self.names.get(name) {
            return Ok(id);
        }

        let data = TextureData::load(path)?;
        Ok(self.insert(name, data))
    }

    #[inline]
    pub fn find(&self, name: &str) -> Option<TextureId> {
        self.names.get(name).copied()
    }

    #[inline]
    pub fn get(&self, id: TextureId) -> Option<&Texture> {
        self.textures.get(id)
    }

    /// Descriptor of an uploaded texture.
    #[inline]
    pub fn descriptor(&self, id: TextureId) -> Option<vk::DescriptorImageInfo> {
        self.textures.get(id).and_then(Texture::descriptor)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.textures.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    /// Uploads every texture not yet on the device, returning how many were
    /// uploaded. CPU pixel data is released after each upload.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Upload`] on the first failed upload; textures
    /// uploaded before it keep their descriptors.
    pub fn upload_all(&mut self, packer: &mut ResourcePacker) -> ResourceResult<usize> {
        let mut uploaded = 0;

        for (_, texture) in self.textures.iter_mut() {
            if texture.is_uploaded() {
                continue;
            }

            let descriptor = packer
                .pack_image(&texture.pixels, texture.width, texture.height)
                .inspect_err(|e| error!("Failed to upload texture '{}': {}", texture.name, e))?;

            texture.descriptor = Some(descriptor);
            texture.pixels = Vec::new();
            uploaded += 1;
        }

        if uploaded > 0 {
            info!("Uploaded {} texture(s)", uploaded);
        }
        Ok(uploaded)
    }
}
