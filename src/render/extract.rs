//! Cell extraction: dataset cells → projected primitives in a [`CellList`].
//!
//! Each cell is projected through the view and tagged with the integer
//! pixel rectangle it can write. Cells with zero projected area, or whose
//! rectangle misses the image, are dropped before serialization.
//!
//! Jitter offsets come from an RNG seeded by the cell's identity, so a cell
//! is perturbed the same way on whichever rank extracts it.

use crate::pipeline::context::ExecutionContext;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::CellId;
use crate::render::cell_list::CellList;
use crate::render::primitive::{Footprint, Primitive};
use crate::render::view::View;
use crate::types::{CellKind, Dataset};
use glam::DVec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Projected extents thinner than this (in pixels) count as zero area
const MIN_PROJECTED_EXTENT: f64 = 1e-9;

/// Cells between progress reports
const PROGRESS_INTERVAL: usize = 4096;

/// Counts from one extraction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub stored: usize,
    pub dropped: usize,
}

/// Deterministic per-cell RNG.
pub fn jitter_rng(seed: u64, id: CellId) -> StdRng {
    StdRng::seed_from_u64(seed ^ id.0.wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

/// Perturb projected vertices in place. Cells move as a whole along depth;
/// points move in all three axes. Offsets stay within half a sample.
pub fn apply_jitter(kind: CellKind, vertices: &mut [DVec3], seed: u64, id: CellId) {
    let mut rng = jitter_rng(seed, id);
    if kind == CellKind::Point {
        for v in vertices.iter_mut() {
            *v += DVec3::new(
                rng.gen_range(-0.5..0.5),
                rng.gen_range(-0.5..0.5),
                rng.gen_range(-0.5..0.5),
            );
        }
    } else {
        let dz = rng.gen_range(-0.5..0.5);
        for v in vertices.iter_mut() {
            v.z += dz;
        }
    }
}

/// Integer pixel rectangle a projected primitive may sample, clipped to the
/// image. `None` when it has zero area or lies outside.
pub fn footprint(kind: CellKind, vertices: &[DVec3], width: usize, height: usize) -> Option<Footprint> {
    let (w, h) = (width as i64, height as i64);
    let clip = |lo: i64, hi: i64, n: i64| (lo.max(0), hi.min(n - 1));

    if kind == CellKind::Point {
        let p = vertices.first()?.round();
        let (x, y) = (p.x as i64, p.y as i64);
        if x < 0 || y < 0 || x >= w || y >= h {
            return None;
        }
        return Some(Footprint::new(x as i32, x as i32, y as i32, y as i32));
    }

    let lo = vertices.iter().copied().reduce(DVec3::min)?;
    let hi = vertices.iter().copied().reduce(DVec3::max)?;
    if hi.x - lo.x < MIN_PROJECTED_EXTENT || hi.y - lo.y < MIN_PROJECTED_EXTENT {
        return None;
    }
    if !(lo.x.is_finite() && lo.y.is_finite() && hi.x.is_finite() && hi.y.is_finite()) {
        return None;
    }
    let (minx, maxx) = clip(lo.x.ceil() as i64, hi.x.floor() as i64, w);
    let (miny, maxy) = clip(lo.y.ceil() as i64, hi.y.floor() as i64, h);
    let f = Footprint::new(minx as i32, maxx as i32, miny as i32, maxy as i32);
    (!f.is_empty()).then_some(f)
}

/// Extract every cell of `dataset` into `cells`.
///
/// `variables` fixes the value order per vertex and must match the list's
/// variable count.
pub fn extract_dataset(
    dataset: &Dataset,
    variables: &[String],
    view: &View,
    jitter_seed: Option<u64>,
    cells: &mut CellList,
    ctx: &mut ExecutionContext,
) -> PipelineResult<ExtractStats> {
    if variables.len() != cells.nvars() {
        return Err(PipelineError::VariableCountMismatch {
            expected: cells.nvars(),
            found: variables.len(),
        });
    }

    let total = dataset.num_cells();
    let mut stats = ExtractStats::default();
    let mut done = 0;

    for domain in &dataset.domains {
        let columns: Vec<&[f64]> = variables
            .iter()
            .map(|v| {
                domain
                    .var(v)
                    .ok_or_else(|| PipelineError::UnknownVariable(v.clone()))
            })
            .collect::<PipelineResult<_>>()?;
        let projected: Vec<DVec3> = domain.mesh.points.iter().map(|p| view.project(*p)).collect();

        for (ci, cell) in domain.mesh.cells.iter().enumerate() {
            if done % PROGRESS_INTERVAL == 0 {
                ctx.update_progress("extract", done, total)?;
            }
            done += 1;

            let id = CellId::new(domain.domain, ci as u32);
            let mut vertices: Vec<DVec3> = cell.nodes.iter().map(|&n| projected[n as usize]).collect();
            if let Some(seed) = jitter_seed {
                apply_jitter(cell.kind, &mut vertices, seed, id);
            }
            let Some(f) = footprint(cell.kind, &vertices, view.width, view.height) else {
                stats.dropped += 1;
                continue;
            };

            let mut values = Vec::with_capacity(cell.nodes.len() * columns.len());
            for &n in &cell.nodes {
                values.extend(columns.iter().map(|col| col[n as usize]));
            }
            let primitive = Primitive::new(cell.kind, id, vertices, values, columns.len());
            cells.store(&primitive, f.minx, f.maxx, f.miny, f.maxy)?;
            stats.stored += 1;
        }
    }

    tracing::debug!(
        "Extracted {} primitives, dropped {} (zero area or off screen)",
        stats.stored,
        stats.dropped
    );
    Ok(stats)
}
