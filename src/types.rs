//! Core data types for VolVis-RS
//!
//! Mesh and dataset value types shared by the pipeline and the renderer.
//!
//! # Main Types
//!
//! - [`Bounds`] - Axis-aligned box in world space
//! - [`CellKind`] / [`Cell`] - Native volumetric primitives (points, tets, hexes, wedges, pyramids)
//! - [`UnstructuredMesh`] - Point coordinates plus cell connectivity
//! - [`DomainData`] - One domain of a decomposed dataset: mesh + nodal variables
//! - [`Dataset`] - The collection of domains a pipeline stage produces
//! - [`Extents`] - Running min/max of a variable
//!
//! Node ordering of hexahedra, wedges and pyramids follows the common
//! finite-element convention: bottom face counter-clockwise, then top face.

use crate::pipeline::error::{PipelineError, PipelineResult};
use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Axis-aligned bounding box in world space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl Bounds {
    pub fn new(min: [f64; 3], max: [f64; 3]) -> Self {
        Self { min, max }
    }

    /// The unit cube `[0,1]^3`
    pub fn unit() -> Self {
        Self::new([0.0; 3], [1.0; 3])
    }

    /// An inverted box that any `include` call will replace
    pub fn empty() -> Self {
        Self {
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
        }
    }

    pub fn is_empty(&self) -> bool {
        (0..3).any(|i| self.min[i] > self.max[i])
    }

    pub fn include(&mut self, p: DVec3) {
        let p = p.to_array();
        for i in 0..3 {
            self.min[i] = self.min[i].min(p[i]);
            self.max[i] = self.max[i].max(p[i]);
        }
    }

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a DVec3>) -> Self {
        let mut b = Self::empty();
        for p in points {
            b.include(*p);
        }
        b
    }

    pub fn min_point(&self) -> DVec3 {
        DVec3::from_array(self.min)
    }

    pub fn max_point(&self) -> DVec3 {
        DVec3::from_array(self.max)
    }

    pub fn intersects(&self, other: &Bounds) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && (0..3).all(|i| self.min[i] <= other.max[i] && other.min[i] <= self.max[i])
    }

    /// True when `other` lies entirely inside `self`
    pub fn contains(&self, other: &Bounds) -> bool {
        other.is_empty() || (0..3).all(|i| self.min[i] <= other.min[i] && other.max[i] <= self.max[i])
    }

    pub fn intersection(&self, other: &Bounds) -> Bounds {
        let mut out = Bounds::empty();
        for i in 0..3 {
            out.min[i] = self.min[i].max(other.min[i]);
            out.max[i] = self.max[i].min(other.max[i]);
        }
        out
    }
}

/// Running min/max of a scalar variable
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extents {
    pub min: f64,
    pub max: f64,
}

impl Extents {
    pub fn empty() -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }

    #[inline]
    pub fn include(&mut self, v: f64) {
        if v.is_nan() {
            return;
        }
        self.min = self.min.min(v);
        self.max = self.max.max(v);
    }

    pub fn merge(&mut self, other: &Extents) {
        if !other.is_empty() {
            self.include(other.min);
            self.include(other.max);
        }
    }

    pub fn from_values(values: &[f64]) -> Self {
        let mut e = Self::empty();
        for &v in values {
            e.include(v);
        }
        e
    }

    /// Map `v` to `[0,1]` across the range; a flat range maps everything to 0.
    pub fn normalize(&self, v: f64) -> f64 {
        let span = self.max - self.min;
        if self.is_empty() || span <= 0.0 {
            0.0
        } else {
            ((v - self.min) / span).clamp(0.0, 1.0)
        }
    }
}

/// Native cell shapes understood by the extractor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellKind {
    Point,
    Tetrahedron,
    Pyramid,
    Wedge,
    Hexahedron,
}

impl CellKind {
    /// Number of nodes defining this shape
    pub fn node_count(self) -> usize {
        match self {
            CellKind::Point => 1,
            CellKind::Tetrahedron => 4,
            CellKind::Pyramid => 5,
            CellKind::Wedge => 6,
            CellKind::Hexahedron => 8,
        }
    }

    /// Stable wire tag
    pub fn tag(self) -> u32 {
        match self {
            CellKind::Point => 0,
            CellKind::Tetrahedron => 1,
            CellKind::Pyramid => 2,
            CellKind::Wedge => 3,
            CellKind::Hexahedron => 4,
        }
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        Some(match tag {
            0 => CellKind::Point,
            1 => CellKind::Tetrahedron,
            2 => CellKind::Pyramid,
            3 => CellKind::Wedge,
            4 => CellKind::Hexahedron,
            _ => return None,
        })
    }

    /// Decomposition into tetrahedra, as local node indices.
    ///
    /// The hexahedron split is the five-tet split; it does not need a
    /// consistent diagonal with neighbours because samples are taken
    /// pointwise, not by face.
    pub fn tetrahedra(self) -> &'static [[usize; 4]] {
        match self {
            CellKind::Point => &[],
            CellKind::Tetrahedron => &[[0, 1, 2, 3]],
            CellKind::Pyramid => &[[0, 1, 2, 4], [0, 2, 3, 4]],
            CellKind::Wedge => &[[0, 1, 2, 3], [1, 2, 3, 4], [2, 3, 4, 5]],
            CellKind::Hexahedron => &[
                [0, 1, 3, 4],
                [1, 2, 3, 6],
                [1, 4, 5, 6],
                [3, 4, 6, 7],
                [1, 3, 4, 6],
            ],
        }
    }
}

/// One cell: its shape plus node indices into the owning mesh's points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub kind: CellKind,
    pub nodes: Vec<u32>,
}

impl Cell {
    pub fn new(kind: CellKind, nodes: Vec<u32>) -> Self {
        Self { kind, nodes }
    }

    pub fn tet(nodes: [u32; 4]) -> Self {
        Self::new(CellKind::Tetrahedron, nodes.to_vec())
    }

    pub fn hex(nodes: [u32; 8]) -> Self {
        Self::new(CellKind::Hexahedron, nodes.to_vec())
    }
}

/// Point coordinates plus cell connectivity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnstructuredMesh {
    pub points: Vec<DVec3>,
    pub cells: Vec<Cell>,
}

impl UnstructuredMesh {
    pub fn new(points: Vec<DVec3>, cells: Vec<Cell>) -> Self {
        Self { points, cells }
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::from_points(&self.points)
    }

    pub fn cell_bounds(&self, cell: &Cell) -> Bounds {
        Bounds::from_points(cell.nodes.iter().map(|&n| &self.points[n as usize]))
    }

    /// Check every cell has the right node count and only references
    /// existing points.
    pub fn validate(&self) -> PipelineResult<()> {
        for (i, cell) in self.cells.iter().enumerate() {
            if cell.nodes.len() != cell.kind.node_count() {
                return Err(PipelineError::InvalidConnectivity(format!(
                    "cell {} is a {:?} with {} nodes",
                    i,
                    cell.kind,
                    cell.nodes.len()
                )));
            }
            if let Some(&bad) = cell.nodes.iter().find(|&&n| n as usize >= self.points.len()) {
                return Err(PipelineError::InvalidConnectivity(format!(
                    "cell {} references point {} of {}",
                    i,
                    bad,
                    self.points.len()
                )));
            }
        }
        Ok(())
    }
}

/// One domain of a decomposed dataset
#[derive(Debug, Clone, PartialEq)]
pub struct DomainData {
    pub domain: u32,
    pub mesh: UnstructuredMesh,
    /// Nodal scalar variables, one value per mesh point
    pub point_vars: BTreeMap<String, Vec<f64>>,
    /// Material name per cell; empty when the domain is untagged
    pub cell_materials: Vec<String>,
}

impl DomainData {
    pub fn new(domain: u32, mesh: UnstructuredMesh) -> Self {
        Self {
            domain,
            mesh,
            point_vars: BTreeMap::new(),
            cell_materials: Vec::new(),
        }
    }

    /// Tag every cell with a material, in cell order.
    pub fn with_materials<S: Into<String>>(mut self, materials: impl IntoIterator<Item = S>) -> Self {
        self.cell_materials = materials.into_iter().map(Into::into).collect();
        self
    }

    pub fn cell_material(&self, cell: usize) -> Option<&str> {
        self.cell_materials.get(cell).map(String::as_str)
    }

    /// Keep the cells `keep` accepts, with their material tags. Points and
    /// nodal variables are shared by index and stay whole.
    pub fn retain_cells(&mut self, mut keep: impl FnMut(usize, &Cell) -> bool) {
        let flags: Vec<bool> = self.mesh.cells.iter().enumerate().map(|(i, c)| keep(i, c)).collect();
        let mut cells = flags.iter().copied();
        self.mesh.cells.retain(|_| cells.next().unwrap_or(false));
        if !self.cell_materials.is_empty() {
            let mut tags = flags.iter().copied();
            self.cell_materials.retain(|_| tags.next().unwrap_or(false));
        }
    }

    pub fn with_var(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.point_vars.insert(name.into(), values);
        self
    }

    pub fn var(&self, name: &str) -> Option<&[f64]> {
        self.point_vars.get(name).map(Vec::as_slice)
    }
}

/// The collection of domains a pipeline stage works on
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub domains: Vec<DomainData>,
}

impl Dataset {
    pub fn new(domains: Vec<DomainData>) -> Self {
        Self { domains }
    }

    pub fn is_empty(&self) -> bool {
        self.num_cells() == 0
    }

    pub fn num_cells(&self) -> usize {
        self.domains.iter().map(|d| d.mesh.num_cells()).sum()
    }

    pub fn bounds(&self) -> Bounds {
        let mut b = Bounds::empty();
        for d in &self.domains {
            for p in &d.mesh.points {
                b.include(*p);
            }
        }
        b
    }

    pub fn extents(&self, var: &str) -> Extents {
        let mut e = Extents::empty();
        for values in self.domains.iter().filter_map(|d| d.var(var)) {
            e.merge(&Extents::from_values(values));
        }
        e
    }
}
