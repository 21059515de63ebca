//! Materials, their pipelines and descriptor sets.
//!
//! A [`Material`] moves through a small lifecycle:
//!
//! ```text
//! Uninitialized --build--> PipelineBuilt --bind--> DescriptorBound --activate--> Active
//!                               ^                                                  |
//!                               +---------------------invalidate-------------------+
//! ```
//!
//! After a resize the pipeline is rebuilt and the material goes straight back
//! to `Active`; its uniform block and descriptor set survive.
//!
//! [`MaterialRegistry`] owns the shared descriptor set layout and pipeline
//! layout, builds one pipeline per material and packs every material's
//! uniform block into a single uniform buffer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ash::vk;
use parking_lot::RwLock;
use tessera_core::{Arena, Handle, RendererConfig};
use tessera_resources::{DrawPushConstants, MaterialParams, MaterialUniform, TextureRegistry};
use tessera_rhi::buffer::BufferUsage;
use tessera_rhi::command::CommandBuffer;
use tessera_rhi::descriptor::{self, DescriptorPool, DescriptorSetLayout};
use tessera_rhi::device::Device;
use tessera_rhi::packer::{BufferAllocRequest, ResourcePacker};
use tessera_rhi::pipeline::{
    CompareOp, CullMode, FrontFace, GraphicsPipelineBuilder, Pipeline, PipelineLayout,
};
use tessera_rhi::shader::{Shader, ShaderStage};
use tessera_rhi::vertex::Vertex;
use tracing::{debug, error, info};

use crate::error::{RenderError, RenderResult};

/// Name of the material every registry starts with.
pub const DEFAULT_MATERIAL: &str = "default";

/// Identity of a registered material. Stable across pipeline rebuilds.
pub type MaterialId = Handle<Arc<Material>>;

// =============================================================================
// Lifecycle
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaterialState {
    Uninitialized,
    PipelineBuilt,
    DescriptorBound,
    Active,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaterialEvent {
    /// A pipeline was built for the current render pass.
    BuildPipeline,
    /// The uniform block was uploaded and the descriptor set written.
    BindDescriptors,
    /// The material may be used for drawing.
    Activate,
    /// The render target changed; the pipeline must be rebuilt.
    Invalidate,
}

impl MaterialState {
    /// Returns the state after `event`, or `None` if the event is illegal.
    ///
    /// `descriptors_bound` tells whether the material already owns a
    /// descriptor set: binding happens once, and re-activation after a
    /// rebuild is only allowed once it has.
    pub fn transition(self, event: MaterialEvent, descriptors_bound: bool) -> Option<Self> {
        use MaterialEvent as E;
        use MaterialState as S;

        match (self, event) {
            (S::Uninitialized, E::BuildPipeline) => Some(S::PipelineBuilt),
            (S::PipelineBuilt, E::BindDescriptors) if !descriptors_bound => {
                Some(S::DescriptorBound)
            }
            (S::DescriptorBound, E::Activate) => Some(S::Active),
            (S::PipelineBuilt, E::Activate) if descriptors_bound => Some(S::Active),
            (S::Active | S::PipelineBuilt, E::Invalidate) => Some(S::PipelineBuilt),
            _ => None,
        }
    }
}

/// Shader pair used by a material.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderVariant {
    /// `material.{vert,frag}.spv`
    Plain,
    /// `materialTexture.{vert,frag}.spv`, samples binding 1.
    Textured,
}

impl ShaderVariant {
    pub fn for_params(params: &MaterialParams) -> Self {
        if params.has_texture() {
            ShaderVariant::Textured
        } else {
            ShaderVariant::Plain
        }
    }

    /// File stem of the compiled shader pair.
    pub fn stem(self) -> &'static str {
        match self {
            ShaderVariant::Plain => "material",
            ShaderVariant::Textured => "materialTexture",
        }
    }

    pub fn shader_paths(self, dir: &Path) -> (PathBuf, PathBuf) {
        (
            ShaderStage::Vertex.spirv_path(dir, self.stem()),
            ShaderStage::Fragment.spirv_path(dir, self.stem()),
        )
    }
}

// =============================================================================
// Material
// =============================================================================

struct MaterialInner {
    state: MaterialState,
    pipeline: Option<Pipeline>,
    descriptor_set: Option<vk::DescriptorSet>,
}

/// A material: shading parameters plus the pipeline and descriptor set used
/// to draw with them.
///
/// Recording workers only take the read lock; the write lock is taken on the
/// main thread between frames.
pub struct Material {
    name: String,
    params: MaterialParams,
    variant: ShaderVariant,
    layout: Arc<PipelineLayout>,
    inner: RwLock<MaterialInner>,
}

impl Material {
    fn new(
        name: &str,
        params: MaterialParams,
        layout: Arc<PipelineLayout>,
        pipeline: Pipeline,
    ) -> RenderResult<Self> {
        let mut inner = MaterialInner {
            state: MaterialState::Uninitialized,
            pipeline: Some(pipeline),
            descriptor_set: None,
        };
        Self::apply(&mut inner, name, MaterialEvent::BuildPipeline)?;

        Ok(Self {
            name: name.to_string(),
            variant: ShaderVariant::for_params(&params),
            params,
            layout,
            inner: RwLock::new(inner),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn params(&self) -> &MaterialParams {
        &self.params
    }

    #[inline]
    pub fn variant(&self) -> ShaderVariant {
        self.variant
    }

    #[inline]
    pub fn state(&self) -> MaterialState {
        self.inner.read().state
    }

    #[inline]
    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.layout.handle()
    }

    /// Current pipeline handle, if one is built.
    pub fn pipeline(&self) -> Option<vk::Pipeline> {
        self.inner.read().pipeline.as_ref().map(Pipeline::handle)
    }

    pub fn descriptor_set(&self) -> Option<vk::DescriptorSet> {
        self.inner.read().descriptor_set
    }

    /// Binds the pipeline and descriptor set into `cmd` and pushes the draw
    /// matrices.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::NotActive`] unless the material is active.
    pub fn bind(&self, cmd: &CommandBuffer, push: &DrawPushConstants) -> RenderResult<()> {
        let inner = self.inner.read();

        let (Some(pipeline), Some(set), MaterialState::Active) =
            (inner.pipeline.as_ref(), inner.descriptor_set, inner.state)
        else {
            return Err(RenderError::NotActive {
                material: self.name.clone(),
                state: inner.state,
            });
        };

        cmd.bind_pipeline(pipeline.handle());
        cmd.push_constants(self.layout.handle(), vk::ShaderStageFlags::VERTEX, 0, push);
        cmd.bind_descriptor_sets(self.layout.handle(), 0, &[set]);
        Ok(())
    }

    fn apply(inner: &mut MaterialInner, name: &str, event: MaterialEvent) -> RenderResult<()> {
        let next = inner
            .state
            .transition(event, inner.descriptor_set.is_some())
            .ok_or_else(|| RenderError::MaterialState {
                material: name.to_string(),
                state: inner.state,
                event,
            })?;

        debug!("Material '{}': {:?} -> {:?}", name, inner.state, next);
        inner.state = next;
        Ok(())
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Owns every material and the layouts they share.
pub struct MaterialRegistry {
    device: Arc<Device>,
    shader_dir: PathBuf,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    set_layout: DescriptorSetLayout,
    pipeline_layout: Arc<PipelineLayout>,
    /// One pool per `bind_descriptors` batch.
    descriptor_pools: Vec<DescriptorPool>,
    materials: Arena<Arc<Material>>,
    names: HashMap<String, MaterialId>,
    default_material: MaterialId,
}

impl MaterialRegistry {
    /// Creates the shared layouts and the `"default"` material.
    ///
    /// # Errors
    ///
    /// Returns an error if a layout cannot be created or the default
    /// material's shaders cannot be loaded.
    pub fn new(
        device: Arc<Device>,
        config: &RendererConfig,
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
    ) -> RenderResult<Self> {
        let bindings = [
            descriptor::uniform_buffer_binding(0, vk::ShaderStageFlags::FRAGMENT),
            descriptor::combined_image_sampler_binding(1, vk::ShaderStageFlags::FRAGMENT),
        ];
        let set_layout = DescriptorSetLayout::new(device.clone(), &bindings)?;

        let push_range = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .offset(0)
            .size(DrawPushConstants::size() as u32);
        let pipeline_layout = Arc::new(PipelineLayout::new(
            device.clone(),
            &[set_layout.handle()],
            &[push_range],
        )?);

        let shader_dir = config.shader_dir.clone();
        let default_pipeline = build_pipeline(
            &device,
            &shader_dir,
            render_pass,
            &pipeline_layout,
            ShaderVariant::Plain,
        )?;
        let default = Material::new(
            DEFAULT_MATERIAL,
            MaterialParams::default(),
            pipeline_layout.clone(),
            default_pipeline,
        )?;

        let mut materials = Arena::new();
        let default_material = materials.insert(Arc::new(default));
        let names = HashMap::from([(DEFAULT_MATERIAL.to_string(), default_material)]);

        info!(
            "Material registry created (shaders in {:?}, extent {}x{})",
            shader_dir, extent.width, extent.height
        );

        Ok(Self {
            device,
            shader_dir,
            render_pass,
            extent,
            set_layout,
            pipeline_layout,
            descriptor_pools: Vec::new(),
            materials,
            names,
            default_material,
        })
    }

    /// Creates a material, or returns the existing one with the same name.
    ///
    /// # Errors
    ///
    /// Returns an error if the shaders cannot be loaded or the pipeline
    /// cannot be built.
    pub fn create_material(
        &mut self,
        name: &str,
        params: MaterialParams,
    ) -> RenderResult<MaterialId> {
        if let Some(&id) = self.names.get(name) {
            debug!("Material '{}' already exists", name);
            return Ok(id);
        }

        let variant = ShaderVariant::for_params(&params);
        let pipeline = self.build_pipeline(variant)?;
        let material = Material::new(name, params, self.pipeline_layout.clone(), pipeline)?;

        let id = self.materials.insert(Arc::new(material));
        self.names.insert(name.to_string(), id);

        info!("Created material '{}' ({:?})", name, variant);
        Ok(id)
    }

    #[inline]
    pub fn find(&self, name: &str) -> Option<MaterialId> {
        self.names.get(name).copied()
    }

    #[inline]
    pub fn get(&self, id: MaterialId) -> Option<&Arc<Material>> {
        self.materials.get(id)
    }

    #[inline]
    pub fn default_material(&self) -> MaterialId {
        self.default_material
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.materials.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    #[inline]
    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout.handle()
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Uploads uniform blocks and writes descriptor sets for every material
    /// that has none yet, then activates them. Returns how many were bound.
    ///
    /// Textured materials need their texture uploaded first.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::TextureNotUploaded`] for a textured material
    /// whose texture has no descriptor, or any packing or Vulkan error.
    pub fn bind_descriptors(
        &mut self,
        packer: &mut ResourcePacker,
        textures: &TextureRegistry,
    ) -> RenderResult<usize> {
        let pending: Vec<Arc<Material>> = self
            .materials
            .iter()
            .filter(|(_, m)| {
                let inner = m.inner.read();
                inner.state == MaterialState::PipelineBuilt && inner.descriptor_set.is_none()
            })
            .map(|(_, m)| m.clone())
            .collect();

        if pending.is_empty() {
            return Ok(0);
        }

        let image_infos = pending
            .iter()
            .map(|m| match m.params.diffuse_texture {
                Some(texture) => textures
                    .descriptor(texture)
                    .map(|info| Some([info]))
                    .ok_or_else(|| RenderError::TextureNotUploaded {
                        material: m.name.clone(),
                    }),
                None => Ok(None),
            })
            .collect::<RenderResult<Vec<_>>>()?;

        let uniforms: Vec<MaterialUniform> =
            pending.iter().map(|m| m.params.to_uniform()).collect();
        let mut requests: Vec<BufferAllocRequest<'_>> = uniforms
            .iter()
            .map(|u| BufferAllocRequest::new(bytemuck::bytes_of(u)))
            .collect();
        let buffer_id = packer.pack_buffers(&mut requests, BufferUsage::Uniform)?;
        let buffer = packer.buffer_handle(buffer_id).ok_or_else(|| {
            RenderError::Recorder(format!("Packed uniform buffer {:?} is missing", buffer_id))
        })?;

        let count = pending.len() as u32;
        let pool = DescriptorPool::new(
            self.device.clone(),
            count,
            &descriptor::material_pool_sizes(count),
        )?;
        let sets = pool.allocate(&vec![self.set_layout.handle(); pending.len()])?;

        let buffer_infos: Vec<[vk::DescriptorBufferInfo; 1]> = requests
            .iter()
            .map(|r| {
                [descriptor::buffer_info(
                    buffer,
                    r.offset,
                    MaterialUniform::size() as vk::DeviceSize,
                )]
            })
            .collect();

        let mut writes = Vec::with_capacity(pending.len() * 2);
        for (i, &set) in sets.iter().enumerate() {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(0)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(&buffer_infos[i]),
            );
            if let Some(image_info) = &image_infos[i] {
                writes.push(
                    vk::WriteDescriptorSet::default()
                        .dst_set(set)
                        .dst_binding(1)
                        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                        .image_info(image_info),
                );
            }
        }
        descriptor::update_descriptor_sets(&self.device, &writes);

        for (material, &set) in pending.iter().zip(&sets) {
            let mut inner = material.inner.write();
            Material::apply(&mut inner, &material.name, MaterialEvent::BindDescriptors)?;
            inner.descriptor_set = Some(set);
            Material::apply(&mut inner, &material.name, MaterialEvent::Activate)?;
        }

        self.descriptor_pools.push(pool);
        info!("Bound descriptors for {} material(s)", count);
        Ok(pending.len())
    }

    /// Rebuilds every pipeline against a new render pass and extent.
    ///
    /// Descriptor sets and uniform data are kept. The device must be idle.
    ///
    /// # Errors
    ///
    /// Returns an error if a pipeline cannot be rebuilt; materials already
    /// rebuilt stay usable.
    pub fn recreate_pipelines(
        &mut self,
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
    ) -> RenderResult<()> {
        self.render_pass = render_pass;
        self.extent = extent;

        let materials: Vec<Arc<Material>> = self.materials.iter().map(|(_, m)| m.clone()).collect();
        for material in &materials {
            let pipeline = self.build_pipeline(material.variant)?;

            let mut inner = material.inner.write();
            Material::apply(&mut inner, &material.name, MaterialEvent::Invalidate)?;
            inner.pipeline = Some(pipeline);
            if inner.descriptor_set.is_some() {
                Material::apply(&mut inner, &material.name, MaterialEvent::Activate)?;
            }
        }

        info!(
            "Recreated {} material pipeline(s) for {}x{}",
            materials.len(),
            extent.width,
            extent.height
        );
        Ok(())
    }

    fn build_pipeline(&self, variant: ShaderVariant) -> RenderResult<Pipeline> {
        build_pipeline(
            &self.device,
            &self.shader_dir,
            self.render_pass,
            &self.pipeline_layout,
            variant,
        )
    }
}

fn build_pipeline(
    device: &Arc<Device>,
    shader_dir: &Path,
    render_pass: vk::RenderPass,
    layout: &PipelineLayout,
    variant: ShaderVariant,
) -> RenderResult<Pipeline> {
    let (vert_path, frag_path) = variant.shader_paths(shader_dir);

    let vert = Shader::from_spirv_file(device.clone(), &vert_path, ShaderStage::Vertex, "main")?;
    let frag = Shader::from_spirv_file(device.clone(), &frag_path, ShaderStage::Fragment, "main")?;

    GraphicsPipelineBuilder::new()
        .vertex_shader(&vert)
        .fragment_shader(&frag)
        .vertex_binding(Vertex::binding_description())
        .vertex_attributes(&Vertex::attribute_descriptions())
        .cull_mode(CullMode::Front)
        .front_face(FrontFace::CounterClockwise)
        .depth_test_enable(true)
        .depth_write_enable(true)
        .depth_compare_op(CompareOp::Less)
        .render_pass(render_pass, 0)
        .build(device.clone(), layout)
        .inspect_err(|e| error!("Failed to build {:?} material pipeline: {}", variant, e))
        .map_err(RenderError::from)
}

impl Drop for MaterialRegistry {
    fn drop(&mut self) {
        debug!(
            "Destroying material registry ({} material(s), {} descriptor pool(s))",
            self.materials.len(),
            self.descriptor_pools.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use MaterialEvent as E;
    use MaterialState as S;

    #[test]
    fn test_initial_lifecycle() {
        let built = S::Uninitialized.transition(E::BuildPipeline, false);
        assert_eq!(built, Some(S::PipelineBuilt));

        let bound = S::PipelineBuilt.transition(E::BindDescriptors, false);
        assert_eq!(bound, Some(S::DescriptorBound));

        let active = S::DescriptorBound.transition(E::Activate, true);
        assert_eq!(active, Some(S::Active));
    }

    #[test]
    fn test_resize_skips_descriptor_bound() {
        let invalidated = S::Active.transition(E::Invalidate, true);
        assert_eq!(invalidated, Some(S::PipelineBuilt));
        assert_eq!(S::PipelineBuilt.transition(E::Activate, true), Some(S::Active));
        // Descriptors are bound once only.
        assert_eq!(S::PipelineBuilt.transition(E::BindDescriptors, true), None);
    }

    #[test]
    fn test_illegal_transitions() {
        assert_eq!(S::Uninitialized.transition(E::Activate, false), None);
        assert_eq!(S::Uninitialized.transition(E::BindDescriptors, false), None);
        assert_eq!(S::PipelineBuilt.transition(E::Activate, false), None);
        assert_eq!(S::Active.transition(E::BuildPipeline, true), None);
        assert_eq!(S::DescriptorBound.transition(E::Invalidate, true), None);
    }

    #[test]
    fn test_rebuild_before_binding() {
        // A material created before the first resize is rebuilt but stays
        // unbound.
        assert_eq!(
            S::PipelineBuilt.transition(E::Invalidate, false),
            Some(S::PipelineBuilt)
        );
    }

    #[test]
    fn test_shader_variant() {
        assert_eq!(
            ShaderVariant::for_params(&MaterialParams::default()),
            ShaderVariant::Plain
        );

        let (vert, frag) = ShaderVariant::Textured.shader_paths(Path::new("shaders"));
        assert_eq!(vert, PathBuf::from("shaders/materialTexture.vert.spv"));
        assert_eq!(frag, PathBuf::from("shaders/materialTexture.frag.spv"));

        let (vert, _) = ShaderVariant::Plain.shader_paths(Path::new("shaders"));
        assert_eq!(vert, PathBuf::from("shaders/material.vert.spv"));
    }
}
