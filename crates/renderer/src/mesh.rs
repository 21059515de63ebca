//! Mesh drawables.
//!
//! A [`MeshDrawable`] is one mesh fragment drawn with one material. Its vertex
//! and index data live in packed device-local buffers; [`upload_meshes`] packs
//! all vertex arrays of a batch into one buffer and all index arrays into
//! another.

use std::sync::Arc;

use ash::vk;
use glam::Mat4;
use tessera_resources::{DrawPushConstants, MeshData};
use tessera_rhi::buffer::BufferUsage;
use tessera_rhi::command::{self, CommandBuffer};
use tessera_rhi::device::Device;
use tessera_rhi::packer::{BufferAllocRequest, PackedBufferId, ResourcePacker};
use tracing::{debug, info};

use crate::drawable::{Drawable, RecordContext};
use crate::error::{RenderError, RenderResult};
use crate::material::Material;

/// Location of a mesh's data inside packed buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GeometryBinding {
    pub vertex_buffer: vk::Buffer,
    pub vertex_offset: vk::DeviceSize,
    pub index_buffer: vk::Buffer,
    pub index_offset: vk::DeviceSize,
    pub index_count: u32,
}

/// Indexed triangle mesh drawn with a single material.
pub struct MeshDrawable {
    device: Arc<Device>,
    mesh: MeshData,
    material: Arc<Material>,
    transform: Mat4,
    geometry: Option<GeometryBinding>,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
}

impl MeshDrawable {
    pub fn new(device: Arc<Device>, mesh: MeshData, material: Arc<Material>) -> Self {
        Self {
            device,
            mesh,
            material,
            transform: Mat4::IDENTITY,
            geometry: None,
            command_pool: vk::CommandPool::null(),
            command_buffer: vk::CommandBuffer::null(),
        }
    }

    /// Sets the model matrix.
    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    #[inline]
    pub fn mesh(&self) -> &MeshData {
        &self.mesh
    }

    #[inline]
    pub fn material(&self) -> &Arc<Material> {
        &self.material
    }

    #[inline]
    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    /// Updates the model matrix used from the next recording on.
    #[inline]
    pub fn set_transform(&mut self, transform: Mat4) {
        self.transform = transform;
    }

    #[inline]
    pub fn geometry(&self) -> Option<&GeometryBinding> {
        self.geometry.as_ref()
    }

    /// Pool the secondary command buffer was allocated from.
    #[inline]
    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }
}

impl Drawable for MeshDrawable {
    fn name(&self) -> &str {
        &self.mesh.name
    }

    fn create_buffers(&mut self, packer: &mut ResourcePacker) -> RenderResult<()> {
        if self.geometry.is_some() {
            return Ok(());
        }
        upload_meshes(std::slice::from_mut(self), packer)
    }

    fn record(&mut self, ctx: &RecordContext) -> RenderResult<()> {
        if self.command_buffer == vk::CommandBuffer::null() {
            return Err(RenderError::Recorder(format!(
                "Mesh '{}' has no command buffer",
                self.mesh.name
            )));
        }
        let geometry = self.geometry.ok_or_else(|| {
            RenderError::Recorder(format!("Mesh '{}' has no uploaded buffers", self.mesh.name))
        })?;

        let cmd = CommandBuffer::from_handle(self.device.clone(), self.command_buffer);
        cmd.reset()?;
        cmd.begin_secondary(ctx.render_pass, ctx.subpass, ctx.framebuffer)?;

        cmd.set_viewport(&command::full_viewport(ctx.extent));
        cmd.set_scissor(&command::full_scissor(ctx.extent));

        let push = DrawPushConstants::new(ctx.view_projection, self.transform);
        self.material.bind(&cmd, &push)?;

        cmd.bind_vertex_buffers(0, &[geometry.vertex_buffer], &[geometry.vertex_offset]);
        cmd.bind_index_buffer(
            geometry.index_buffer,
            geometry.index_offset,
            vk::IndexType::UINT32,
        );
        cmd.draw_indexed(geometry.index_count, 1, 0, 0, 0);

        cmd.end()?;
        Ok(())
    }

    fn set_command_pool(&mut self, pool: vk::CommandPool) {
        self.command_pool = pool;
    }

    fn set_command_buffer(&mut self, command_buffer: vk::CommandBuffer) {
        self.command_buffer = command_buffer;
    }

    fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }
}

/// Uploads the geometry of every mesh in `meshes` with two packing calls.
///
/// Meshes that already have buffers are uploaded again and rebound.
///
/// # Errors
///
/// Returns [`tessera_resources::ResourceError::InvalidMesh`] (wrapped) for
/// invalid geometry before anything is uploaded, or any packing error.
pub fn upload_meshes(meshes: &mut [MeshDrawable], packer: &mut ResourcePacker) -> RenderResult<()> {
    if meshes.is_empty() {
        return Ok(());
    }
    for drawable in meshes.iter() {
        drawable.mesh.validate()?;
    }

    let mut vertex_requests: Vec<BufferAllocRequest<'_>> = meshes
        .iter()
        .map(|d| BufferAllocRequest::new(d.mesh.vertex_bytes()))
        .collect();
    let vertex_id = packer.pack_buffers(&mut vertex_requests, BufferUsage::Vertex)?;

    let mut index_requests: Vec<BufferAllocRequest<'_>> = meshes
        .iter()
        .map(|d| BufferAllocRequest::new(d.mesh.index_bytes()))
        .collect();
    let index_id = packer.pack_buffers(&mut index_requests, BufferUsage::Index)?;

    let vertex_buffer = packed_handle(packer, vertex_id)?;
    let index_buffer = packed_handle(packer, index_id)?;

    let vertex_offsets: Vec<vk::DeviceSize> = vertex_requests.iter().map(|r| r.offset).collect();
    let index_offsets: Vec<vk::DeviceSize> = index_requests.iter().map(|r| r.offset).collect();

    for (i, drawable) in meshes.iter_mut().enumerate() {
        drawable.geometry = Some(GeometryBinding {
            vertex_buffer,
            vertex_offset: vertex_offsets[i],
            index_buffer,
            index_offset: index_offsets[i],
            index_count: drawable.mesh.index_count(),
        });
        debug!(
            "Mesh '{}': vertices @ {}, indices @ {}",
            drawable.mesh.name, vertex_offsets[i], index_offsets[i]
        );
    }

    info!("Uploaded {} mesh(es)", meshes.len());
    Ok(())
}

fn packed_handle(packer: &ResourcePacker, id: PackedBufferId) -> RenderResult<vk::Buffer> {
    packer
        .buffer_handle(id)
        .ok_or_else(|| RenderError::Recorder(format!("Packed buffer {:?} is missing", id)))
}
