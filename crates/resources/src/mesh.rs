//! CPU-side mesh geometry.

use tessera_rhi::vertex::Vertex;

use crate::error::{ResourceError, ResourceResult};

/// Vertex and index data of one indexed triangle list.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    /// Mesh name, used in logs and errors.
    pub name: String,
    pub vertices: Vec<Vertex>,
    /// 32-bit indices into `vertices`, three per triangle.
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(name: impl Into<String>, vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self {
            name: name.into(),
            vertices,
            indices,
        }
    }

    /// Checks that the mesh can be uploaded and drawn.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::InvalidMesh`] if there are no vertices or no
    /// indices, the index count is not a multiple of 3, or an index is out of
    /// range.
    pub fn validate(&self) -> ResourceResult<()> {
        let invalid = |reason: String| ResourceError::InvalidMesh {
            name: self.name.clone(),
            reason,
        };

        if self.vertices.is_empty() {
            return Err(invalid("no vertices".to_string()));
        }
        if self.indices.is_empty() {
            return Err(invalid("no indices".to_string()));
        }
        if !self.indices.len().is_multiple_of(3) {
            return Err(invalid(format!(
                "index count {} is not a multiple of 3",
                self.indices.len()
            )));
        }
        if let Some(&index) = self
            .indices
            .iter()
            .find(|&&i| i as usize >= self.vertices.len())
        {
            return Err(invalid(format!(
                "index {} out of range for {} vertices",
                index,
                self.vertices.len()
            )));
        }

        Ok(())
    }

    #[inline]
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    #[inline]
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    #[inline]
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec2, Vec3};

    fn triangle() -> MeshData {
        let vertices = vec![
            Vertex::new(Vec3::new(0.0, 0.0, 0.0), Vec3::Z, Vec2::new(0.0, 0.0)),
            Vertex::new(Vec3::new(1.0, 0.0, 0.0), Vec3::Z, Vec2::new(1.0, 0.0)),
            Vertex::new(Vec3::new(0.0, 1.0, 0.0), Vec3::Z, Vec2::new(0.0, 1.0)),
        ];
        MeshData::new("triangle", vertices, vec![0, 1, 2])
    }

    #[test]
    fn test_valid_mesh() {
        let mesh = triangle();
        assert!(mesh.validate().is_ok());
        assert_eq!(mesh.index_count(), 3);
        assert_eq!(mesh.triangle_count(), 1);
        assert_eq!(mesh.vertex_bytes().len(), 3 * 32);
        assert_eq!(mesh.index_bytes().len(), 12);
    }

    #[test]
    fn test_index_out_of_range() {
        let mut mesh = triangle();
        mesh.indices[2] = 3;
        let err = mesh.validate().unwrap_err();
        assert!(matches!(err, ResourceError::InvalidMesh { .. }));
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_partial_triangle() {
        let mut mesh = triangle();
        mesh.indices.push(0);
        assert!(mesh.validate().is_err());
    }

    #[test]
    fn test_empty_mesh() {
        let mesh = MeshData::new("empty", Vec::new(), Vec::new());
        assert!(mesh.validate().is_err());

        let mut no_indices = triangle();
        no_indices.indices.clear();
        assert!(no_indices.validate().is_err());
    }
}
