//! Test data builders for meshes, datasets and render settings

use glam::DVec3;
use std::sync::Arc;
use volvis_rs::config::{CompositingMode, PartitionMode, RayFunctionSettings, RenderSettings};
use volvis_rs::pipeline::MemoryDatabase;
use volvis_rs::types::{Cell, Dataset, DomainData, UnstructuredMesh};

/// Builder for one domain of tetrahedra with `density` and `material`
/// nodal variables
pub struct DomainBuilder {
    domain: u32,
    points: Vec<DVec3>,
    cells: Vec<Cell>,
    density: Vec<f64>,
    material: Vec<f64>,
}

impl DomainBuilder {
    pub fn new(domain: u32) -> Self {
        Self {
            domain,
            points: Vec::new(),
            cells: Vec::new(),
            density: Vec::new(),
            material: Vec::new(),
        }
    }

    /// Add a tetrahedron with its own four points.
    pub fn tet(mut self, corners: [[f64; 3]; 4], density: [f64; 4]) -> Self {
        let base = self.points.len() as u32;
        self.points.extend(corners.iter().map(|c| DVec3::from_array(*c)));
        self.density.extend(density);
        self.material.extend([self.domain as f64; 4]);
        self.cells.push(Cell::tet([base, base + 1, base + 2, base + 3]));
        self
    }

    /// Add an `n`³ hexahedral grid over the box at `origin` with edge `size`.
    pub fn grid(mut self, n: usize, origin: [f64; 3], size: f64, field: impl Fn(DVec3) -> f64) -> Self {
        let base = self.points.len() as u32;
        let origin = DVec3::from_array(origin);
        let h = size / n as f64;
        let index = |i: usize, j: usize, k: usize| base + ((k * (n + 1) + j) * (n + 1) + i) as u32;
        for k in 0..=n {
            for j in 0..=n {
                for i in 0..=n {
                    let p = origin + DVec3::new(i as f64, j as f64, k as f64) * h;
                    self.density.push(field(p));
                    self.material.push(self.domain as f64);
                    self.points.push(p);
                }
            }
        }
        for k in 0..n {
            for j in 0..n {
                for i in 0..n {
                    self.cells.push(Cell::hex([
                        index(i, j, k),
                        index(i + 1, j, k),
                        index(i + 1, j + 1, k),
                        index(i, j + 1, k),
                        index(i, j, k + 1),
                        index(i + 1, j, k + 1),
                        index(i + 1, j + 1, k + 1),
                        index(i, j + 1, k + 1),
                    ]));
                }
            }
        }
        self
    }

    pub fn build(self) -> DomainData {
        DomainData::new(self.domain, UnstructuredMesh::new(self.points, self.cells))
            .with_var("density", self.density)
            .with_var("material", self.material)
    }
}

/// Single-timestep in-memory database over `domains`.
pub fn database(domains: Vec<DomainData>) -> Arc<MemoryDatabase> {
    Arc::new(MemoryDatabase::from_dataset("mesh", Dataset::new(domains)))
}

/// Settings for an image-space render of `size`×`size` pixels.
pub fn image_space_settings(size: usize, depth: usize) -> RenderSettings {
    RenderSettings {
        width: size,
        height: size,
        depth_samples: depth,
        ray_function: RayFunctionSettings::MaximumIntensity,
        partition: PartitionMode::Uniform,
        compositing: CompositingMode::GatherToRoot { root: 0 },
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_builder() {
        let domain = DomainBuilder::new(3)
            .tet([[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]], [1.0; 4])
            .grid(2, [0.0; 3], 1.0, |p| p.x)
            .build();
        assert_eq!(domain.mesh.num_cells(), 1 + 8);
        assert_eq!(domain.mesh.num_points(), 4 + 27);
        assert!(domain.mesh.validate().is_ok());
        assert_eq!(domain.var("material").map(|m| m[0]), Some(3.0));
    }
}
