//! Sample volume: per-pixel depth stacks for one horizontal strip.
//!
//! Primitives are rasterized by sampling at integer image-space positions.
//! Non-tetrahedral cells go through their tetrahedral decomposition; each
//! sample inside a tet gets barycentric interpolation of the vertex values.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::render::arbitrator::SampleArbitrator;
use crate::render::primitive::Primitive;
use crate::types::CellKind;
use glam::DVec3;
use std::ops::Range;
use std::sync::Arc;

/// Inside test tolerance for barycentric weights
const INSIDE_EPS: f64 = 1e-9;
/// Tets with |6·volume| below this are skipped
const DEGENERATE_VOLUME: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct Volume {
    width: usize,
    rows: Range<usize>,
    depth: usize,
    nvars: usize,
    values: Vec<f64>,
    valid: Vec<bool>,
    arbitrator: Option<Arc<dyn SampleArbitrator>>,
    samples_written: usize,
}

impl Volume {
    /// A volume covering image rows `rows` at full width.
    pub fn new(width: usize, rows: Range<usize>, depth: usize, nvars: usize) -> Self {
        let cells = width * rows.len() * depth;
        Self {
            width,
            rows,
            depth,
            nvars,
            values: vec![0.0; cells * nvars],
            valid: vec![false; cells],
            arbitrator: None,
            samples_written: 0,
        }
    }

    pub fn with_arbitrator(mut self, arbitrator: Arc<dyn SampleArbitrator>) -> Self {
        self.arbitrator = Some(arbitrator);
        self
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn rows(&self) -> Range<usize> {
        self.rows.clone()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn nvars(&self) -> usize {
        self.nvars
    }

    /// Number of valid samples
    pub fn valid_samples(&self) -> usize {
        self.valid.iter().filter(|v| **v).count()
    }

    /// Sample writes attempted, including ones the arbitrator rejected
    pub fn samples_written(&self) -> usize {
        self.samples_written
    }

    fn slot(&self, x: usize, row: usize, z: usize) -> usize {
        ((row - self.rows.start) * self.width + x) * self.depth + z
    }

    /// The depth stack at pixel (`x`, image row `y`).
    pub fn ray(&self, x: usize, y: usize) -> Option<Ray<'_>> {
        if x >= self.width || !self.rows.contains(&y) {
            return None;
        }
        let start = self.slot(x, y, 0);
        Some(Ray {
            values: &self.values[start * self.nvars..(start + self.depth) * self.nvars],
            valid: &self.valid[start..start + self.depth],
            nvars: self.nvars,
        })
    }

    fn write(&mut self, x: usize, row: usize, z: usize, sample: &[f64]) {
        let s = self.slot(x, row, z);
        let dst = s * self.nvars..(s + 1) * self.nvars;
        self.samples_written += 1;
        if self.valid[s] {
            if let Some(arb) = &self.arbitrator {
                if !arb.should_replace(&self.values[dst.clone()], sample) {
                    return;
                }
            }
        }
        self.values[dst].copy_from_slice(sample);
        self.valid[s] = true;
    }

    /// Sample `primitive` into this volume. Parts outside the strip are
    /// clipped.
    pub fn rasterize(&mut self, primitive: &Primitive) -> PipelineResult<()> {
        if primitive.nvars != self.nvars {
            return Err(PipelineError::VariableCountMismatch {
                expected: self.nvars,
                found: primitive.nvars,
            });
        }
        if primitive.vertices.len() != primitive.kind.node_count() {
            return Err(PipelineError::InvalidConnectivity(format!(
                "{:?} with {} vertices",
                primitive.kind,
                primitive.vertices.len()
            )));
        }

        if primitive.kind == CellKind::Point {
            let p = primitive.vertices[0].round();
            if let Some((x, y, z)) = self.to_index(p) {
                self.write(x, y, z, primitive.vertex_values(0));
            }
            return Ok(());
        }

        let mut sample = vec![0.0; self.nvars];
        for tet in primitive.kind.tetrahedra() {
            self.rasterize_tet(primitive, tet, &mut sample);
        }
        Ok(())
    }

    fn to_index(&self, p: DVec3) -> Option<(usize, usize, usize)> {
        if p.x < 0.0 || p.y < 0.0 || p.z < 0.0 {
            return None;
        }
        let (x, y, z) = (p.x as usize, p.y as usize, p.z as usize);
        (x < self.width && self.rows.contains(&y) && z < self.depth).then_some((x, y, z))
    }

    fn rasterize_tet(&mut self, primitive: &Primitive, tet: &[usize; 4], sample: &mut [f64]) {
        let v = tet.map(|i| primitive.vertices[i]);
        let total = det(v[0], v[1], v[2], v[3]);
        if total.abs() < DEGENERATE_VOLUME {
            return;
        }

        let lo = v[0].min(v[1]).min(v[2]).min(v[3]).ceil();
        let hi = v[0].max(v[1]).max(v[2]).max(v[3]).floor();
        let Some(xs) = clip(lo.x, hi.x, 0, self.width) else {
            return;
        };
        let Some(ys) = clip(lo.y, hi.y, self.rows.start, self.rows.end) else {
            return;
        };
        let Some(zs) = clip(lo.z, hi.z, 0, self.depth) else {
            return;
        };

        for y in ys {
            for x in xs.clone() {
                for z in zs.clone() {
                    let p = DVec3::new(x as f64, y as f64, z as f64);
                    let w = [
                        det(p, v[1], v[2], v[3]) / total,
                        det(v[0], p, v[2], v[3]) / total,
                        det(v[0], v[1], p, v[3]) / total,
                        det(v[0], v[1], v[2], p) / total,
                    ];
                    if w.iter().any(|&b| b < -INSIDE_EPS) {
                        continue;
                    }
                    for (k, s) in sample.iter_mut().enumerate() {
                        *s = (0..4)
                            .map(|j| w[j] * primitive.vertex_values(tet[j])[k])
                            .sum();
                    }
                    self.write(x, y, z, sample);
                }
            }
        }
    }
}

/// Six times the signed volume of (a, b, c, d).
fn det(a: DVec3, b: DVec3, c: DVec3, d: DVec3) -> f64 {
    (b - a).dot((c - a).cross(d - a))
}

/// Integer range `[lo, hi]` clipped to `[min, max)`.
fn clip(lo: f64, hi: f64, min: usize, max: usize) -> Option<Range<usize>> {
    let lo = lo.max(min as f64);
    let hi = hi.min(max as f64 - 1.0);
    (lo <= hi).then(|| lo as usize..hi as usize + 1)
}

/// One pixel's depth-ordered samples.
#[derive(Debug, Clone, Copy)]
pub struct Ray<'a> {
    values: &'a [f64],
    valid: &'a [bool],
    nvars: usize,
}

impl<'a> Ray<'a> {
    pub fn new(values: &'a [f64], valid: &'a [bool], nvars: usize) -> Self {
        Self {
            values,
            valid,
            nvars,
        }
    }

    pub fn depth(&self) -> usize {
        self.valid.len()
    }

    pub fn nvars(&self) -> usize {
        self.nvars
    }

    pub fn is_valid(&self, i: usize) -> bool {
        self.valid.get(i).copied().unwrap_or(false)
    }

    pub fn value(&self, i: usize, var: usize) -> f64 {
        self.values[i * self.nvars + var]
    }

    pub fn has_samples(&self) -> bool {
        self.valid.iter().any(|v| *v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::id::CellId;
    use crate::render::arbitrator::RelativeValueArbitrator;

    fn tet(values: [f64; 4]) -> Primitive {
        Primitive::new(
            CellKind::Tetrahedron,
            CellId::new(0, 0),
            vec![
                DVec3::new(0.0, 0.0, 0.0),
                DVec3::new(8.0, 0.0, 0.0),
                DVec3::new(0.0, 8.0, 0.0),
                DVec3::new(0.0, 0.0, 8.0),
            ],
            values.to_vec(),
            1,
        )
    }

    #[test]
    fn test_tet_interpolation() {
        let mut vol = Volume::new(10, 0..10, 10, 1);
        vol.rasterize(&tet([0.0, 8.0, 0.0, 0.0])).unwrap();
        // value equals x inside the tet
        let ray = vol.ray(4, 2).unwrap();
        assert!(ray.is_valid(0));
        assert!((ray.value(0, 0) - 4.0).abs() < 1e-9);
        assert!(ray.is_valid(2));
        assert!(!ray.is_valid(3));
        assert!(!vol.ray(9, 9).unwrap().has_samples());
        // tet holds 1+3+6+10+15+21+28+36+45 = 165 lattice points
        assert_eq!(vol.valid_samples(), 165);
    }

    #[test]
    fn test_strip_clipping() {
        let mut vol = Volume::new(10, 4..6, 10, 1);
        vol.rasterize(&tet([1.0; 4])).unwrap();
        assert!(vol.ray(0, 3).is_none());
        assert!(vol.ray(0, 4).unwrap().has_samples());
        assert!(vol.ray(0, 5).unwrap().has_samples());
    }

    #[test]
    fn test_hex_fills_cube() {
        let corners = [
            [0.0, 0.0, 0.0],
            [2.0, 0.0, 0.0],
            [2.0, 2.0, 0.0],
            [0.0, 2.0, 0.0],
            [0.0, 0.0, 2.0],
            [2.0, 0.0, 2.0],
            [2.0, 2.0, 2.0],
            [0.0, 2.0, 2.0],
        ];
        let hex = Primitive::new(
            CellKind::Hexahedron,
            CellId::new(0, 1),
            corners.iter().map(|c| DVec3::from_array(*c)).collect(),
            vec![1.0; 8],
            1,
        );
        let mut vol = Volume::new(4, 0..4, 4, 1);
        vol.rasterize(&hex).unwrap();
        assert_eq!(vol.valid_samples(), 27);
    }

    #[test]
    fn test_degenerate_tet_writes_nothing() {
        let flat = Primitive::new(
            CellKind::Tetrahedron,
            CellId::new(0, 0),
            vec![DVec3::ZERO, DVec3::X * 4.0, DVec3::Y * 4.0, DVec3::new(1.0, 1.0, 0.0)],
            vec![1.0; 4],
            1,
        );
        let mut vol = Volume::new(8, 0..8, 8, 1);
        vol.rasterize(&flat).unwrap();
        assert_eq!(vol.valid_samples(), 0);
    }

    #[test]
    fn test_arbitrated_points() {
        let point = |v: f64| {
            Primitive::new(CellKind::Point, CellId::new(0, 0), vec![DVec3::new(1.0, 1.0, 1.0)], vec![v], 1)
        };
        let mut vol = Volume::new(3, 0..3, 3, 1)
            .with_arbitrator(Arc::new(RelativeValueArbitrator::new(0, true)));
        vol.rasterize(&point(5.0)).unwrap();
        vol.rasterize(&point(2.0)).unwrap();
        vol.rasterize(&point(7.0)).unwrap();
        assert_eq!(vol.ray(1, 1).unwrap().value(1, 0), 7.0);
        assert_eq!(vol.samples_written(), 3);

        let mut wrong = Volume::new(3, 0..3, 3, 2);
        assert!(wrong.rasterize(&point(1.0)).is_err());
    }
}
