//! Ray functions: reduce one pixel's depth stack to a color and a depth.
//!
//! All functions read variable 0 (the primary variable) unless noted.
//! A ray with no usable samples returns `None` and the pixel keeps the
//! background. `extents[k]` is the global range of variable `k`.

use crate::render::volume::Ray;
use crate::types::Extents;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Opacity at which compositing stops walking the ray
pub const EARLY_TERMINATION_OPACITY: f64 = 0.99;

/// A shaded pixel: color plus normalized depth in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shade {
    pub color: [u8; 3],
    pub depth: f32,
}

pub trait RayFunction: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    fn shade(&self, ray: &Ray<'_>, extents: &[Extents], background: [u8; 3]) -> Option<Shade>;
}

/// One transfer function control point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlPoint {
    /// Position in the normalized `[0, 1]` value range
    pub position: f64,
    pub color: [u8; 3],
    pub opacity: f64,
}

/// Piecewise-linear value → (color, opacity) map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferFunction {
    /// Sorted by position
    pub points: Vec<ControlPoint>,
    /// Fixed value range; `None` uses the data extents
    #[serde(default)]
    pub range: Option<[f64; 2]>,
}

impl Default for TransferFunction {
    fn default() -> Self {
        Self {
            points: vec![
                ControlPoint {
                    position: 0.0,
                    color: [0, 0, 64],
                    opacity: 0.0,
                },
                ControlPoint {
                    position: 0.5,
                    color: [32, 160, 96],
                    opacity: 0.15,
                },
                ControlPoint {
                    position: 1.0,
                    color: [255, 240, 160],
                    opacity: 0.6,
                },
            ],
            range: None,
        }
    }
}

impl TransferFunction {
    /// Normalize `value` against the fixed range, or `extents` when unset.
    pub fn normalize(&self, value: f64, extents: &Extents) -> f64 {
        match self.range {
            Some([lo, hi]) => Extents { min: lo, max: hi }.normalize(value),
            None => extents.normalize(value),
        }
    }

    /// Color (0..1 per channel) and opacity at normalized position `t`.
    pub fn lookup(&self, t: f64) -> ([f64; 3], f64) {
        let Some(first) = self.points.first() else {
            return ([0.0; 3], 0.0);
        };
        if t <= first.position {
            return (unit_color(first.color), first.opacity);
        }
        for pair in self.points.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if t <= b.position {
                let span = b.position - a.position;
                let f = if span > 0.0 { (t - a.position) / span } else { 1.0 };
                let ca = unit_color(a.color);
                let cb = unit_color(b.color);
                let color = [0, 1, 2].map(|i| ca[i] + (cb[i] - ca[i]) * f);
                return (color, a.opacity + (b.opacity - a.opacity) * f);
            }
        }
        let last = &self.points[self.points.len() - 1];
        (unit_color(last.color), last.opacity)
    }
}

fn unit_color(c: [u8; 3]) -> [f64; 3] {
    c.map(|v| v as f64 / 255.0)
}

fn to_rgb(c: [f64; 3]) -> [u8; 3] {
    c.map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
}

/// Range of variable `var`; unit range when unknown or empty.
fn variable_range(extents: &[Extents], var: usize) -> Extents {
    extents
        .get(var)
        .filter(|e| !e.is_empty())
        .copied()
        .unwrap_or(Extents { min: 0.0, max: 1.0 })
}

fn depth_fraction(i: f64, depth: usize) -> f32 {
    if depth <= 1 {
        0.0
    } else {
        (i / (depth - 1) as f64) as f32
    }
}

/// Front-to-back opacity accumulation.
#[derive(Debug, Clone, Default)]
pub struct CompositeRayFunction {
    pub transfer: TransferFunction,
}

impl CompositeRayFunction {
    pub fn new(transfer: TransferFunction) -> Self {
        Self { transfer }
    }
}

impl RayFunction for CompositeRayFunction {
    fn name(&self) -> &'static str {
        "Composite"
    }

    fn shade(&self, ray: &Ray<'_>, extents: &[Extents], background: [u8; 3]) -> Option<Shade> {
        let range = variable_range(extents, 0);
        let mut color = [0.0f64; 3];
        let mut alpha = 0.0f64;
        let mut first_hit = None;

        for i in 0..ray.depth() {
            if !ray.is_valid(i) {
                continue;
            }
            let t = self.transfer.normalize(ray.value(i, 0), &range);
            let (c, a) = self.transfer.lookup(t);
            if a <= 0.0 {
                continue;
            }
            first_hit.get_or_insert(i);
            let w = (1.0 - alpha) * a;
            for k in 0..3 {
                color[k] += w * c[k];
            }
            alpha += w;
            if alpha >= EARLY_TERMINATION_OPACITY {
                break;
            }
        }

        let first_hit = first_hit?;
        let bg = unit_color(background);
        let blended = [0, 1, 2].map(|k| color[k] + (1.0 - alpha) * bg[k]);
        Some(Shade {
            color: to_rgb(blended),
            depth: depth_fraction(first_hit as f64, ray.depth()),
        })
    }
}

/// Neighbouring valid samples `(i, j)` whose values bracket `value`, with
/// the fractional position of the crossing between them.
fn first_crossing(ray: &Ray<'_>, value: f64) -> Option<(usize, usize, f64)> {
    let mut prev: Option<usize> = None;
    for i in 0..ray.depth() {
        if !ray.is_valid(i) {
            continue;
        }
        let v = ray.value(i, 0);
        if v == value {
            return Some((i, i, 0.0));
        }
        if let Some(p) = prev {
            let pv = ray.value(p, 0);
            if (pv < value && value < v) || (pv > value && value > v) {
                return Some((p, i, (value - pv) / (v - pv)));
            }
        }
        prev = Some(i);
    }
    None
}

/// First sample crossing a threshold.
///
/// The crossing snaps to the nearer bracketing sample: past the midpoint it
/// is the later one, otherwise the earlier one. The color comes from
/// variable 1 at that sample, normalized against its own range, through the
/// transfer function when a second variable exists, else from depth.
#[derive(Debug, Clone)]
pub struct ThresholdRayFunction {
    pub value: f64,
    pub transfer: TransferFunction,
}

impl ThresholdRayFunction {
    pub fn new(value: f64, transfer: TransferFunction) -> Self {
        Self { value, transfer }
    }

    /// Sample index the crossing is attributed to.
    pub fn crossing_sample(&self, ray: &Ray<'_>) -> Option<usize> {
        let (i, j, in_between) = first_crossing(ray, self.value)?;
        Some(if in_between > 0.5 { j } else { i })
    }
}

impl RayFunction for ThresholdRayFunction {
    fn name(&self) -> &'static str {
        "Threshold"
    }

    fn shade(&self, ray: &Ray<'_>, extents: &[Extents], _background: [u8; 3]) -> Option<Shade> {
        let idx = self.crossing_sample(ray)?;
        let depth = depth_fraction(idx as f64, ray.depth());
        let color = if ray.nvars() > 1 {
            let t = self.transfer.normalize(ray.value(idx, 1), &variable_range(extents, 1));
            to_rgb(self.transfer.lookup(t).0)
        } else {
            let g = 1.0 - 0.7 * depth as f64;
            to_rgb([g; 3])
        };
        Some(Shade { color, depth })
    }
}

/// Grey level from the interpolated depth where the ray meets a value.
#[derive(Debug, Clone)]
pub struct DistanceToValueRayFunction {
    pub value: f64,
}

impl DistanceToValueRayFunction {
    pub fn new(value: f64) -> Self {
        Self { value }
    }
}

impl RayFunction for DistanceToValueRayFunction {
    fn name(&self) -> &'static str {
        "DistanceToValue"
    }

    fn shade(&self, ray: &Ray<'_>, _extents: &[Extents], _background: [u8; 3]) -> Option<Shade> {
        let (i, j, in_between) = first_crossing(ray, self.value)?;
        let position = i as f64 + (j - i) as f64 * in_between;
        let depth = depth_fraction(position, ray.depth());
        let g = 1.0 - depth as f64;
        Some(Shade {
            color: to_rgb([g; 3]),
            depth,
        })
    }
}

/// Largest value along the ray, colored through the transfer function.
#[derive(Debug, Clone, Default)]
pub struct MaximumIntensityRayFunction {
    pub transfer: TransferFunction,
}

impl MaximumIntensityRayFunction {
    pub fn new(transfer: TransferFunction) -> Self {
        Self { transfer }
    }
}

impl RayFunction for MaximumIntensityRayFunction {
    fn name(&self) -> &'static str {
        "MaximumIntensity"
    }

    fn shade(&self, ray: &Ray<'_>, extents: &[Extents], _background: [u8; 3]) -> Option<Shade> {
        let (idx, max) = (0..ray.depth())
            .filter(|&i| ray.is_valid(i))
            .map(|i| (i, ray.value(i, 0)))
            .filter(|(_, v)| !v.is_nan())
            .fold(None, |best: Option<(usize, f64)>, (i, v)| match best {
                Some((_, b)) if b >= v => best,
                _ => Some((i, v)),
            })?;
        let t = self.transfer.normalize(max, &variable_range(extents, 0));
        Some(Shade {
            color: to_rgb(self.transfer.lookup(t).0),
            depth: depth_fraction(idx as f64, ray.depth()),
        })
    }
}
