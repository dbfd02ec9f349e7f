//! World → image-space projection.
//!
//! Image space: `x` in `[0, width-1]` (columns), `y` in `[0, height-1]`
//! (rows, top to bottom), `z` in `[0, depth-1]` (front to back). Samples
//! live at integer positions.

use crate::types::Bounds;
use glam::{DMat4, DVec3, DVec4};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct View {
    /// World to clip space; clip depth runs 0..1
    world_to_clip: DMat4,
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl View {
    pub fn new(world_to_clip: DMat4, width: usize, height: usize, depth: usize) -> Self {
        Self {
            world_to_clip,
            width,
            height,
            depth,
        }
    }

    /// A view where world coordinates already are image coordinates.
    pub fn image_space(width: usize, height: usize, depth: usize) -> Self {
        let sx = 2.0 / (width.max(2) - 1) as f64;
        let sy = 2.0 / (height.max(2) - 1) as f64;
        let sz = 1.0 / (depth.max(2) - 1) as f64;
        let m = DMat4::from_cols(
            DVec4::new(sx, 0.0, 0.0, 0.0),
            DVec4::new(0.0, -sy, 0.0, 0.0),
            DVec4::new(0.0, 0.0, sz, 0.0),
            DVec4::new(-1.0, 1.0, 0.0, 1.0),
        );
        Self::new(m, width, height, depth)
    }

    /// Orthographic view down -Z framing `bounds`, square pixels.
    pub fn fit_bounds(bounds: &Bounds, width: usize, height: usize, depth: usize) -> Self {
        let center = (bounds.min_point() + bounds.max_point()) * 0.5;
        let half = ((bounds.max_point() - bounds.min_point()) * 0.5).max(DVec3::splat(1e-6)) * 1.05;
        let aspect = width as f64 / height.max(1) as f64;
        let half_w = half.x.max(half.y * aspect);
        let half_h = half_w / aspect;

        let eye = center + DVec3::new(0.0, 0.0, half.z + 1.0);
        let look = DMat4::look_at_rh(eye, center, DVec3::Y);
        let ortho = DMat4::orthographic_rh(-half_w, half_w, -half_h, half_h, 0.5, 2.0 * half.z + 1.5);
        Self::new(ortho * look, width, height, depth)
    }

    /// Perspective view from `eye` towards `target`.
    #[allow(clippy::too_many_arguments)]
    pub fn look_at(
        eye: DVec3,
        target: DVec3,
        up: DVec3,
        fov_y_radians: f64,
        near: f64,
        far: f64,
        width: usize,
        height: usize,
        depth: usize,
    ) -> Self {
        let aspect = width as f64 / height.max(1) as f64;
        let proj = DMat4::perspective_rh(fov_y_radians, aspect, near, far);
        Self::new(proj * DMat4::look_at_rh(eye, target, up), width, height, depth)
    }

    pub fn world_to_clip(&self) -> &DMat4 {
        &self.world_to_clip
    }

    /// Project a world point into image space.
    pub fn project(&self, p: DVec3) -> DVec3 {
        let ndc = self.world_to_clip.project_point3(p);
        DVec3::new(
            (ndc.x + 1.0) * 0.5 * (self.width.saturating_sub(1)) as f64,
            (1.0 - ndc.y) * 0.5 * (self.height.saturating_sub(1)) as f64,
            ndc.z * (self.depth.saturating_sub(1)) as f64,
        )
    }
}
