//! Tiled image compositor: assembles per-rank strips into one image.
//!
//! Each rank owns a contiguous row strip, and strips are in rank order, so
//! a gather that places blocks at prefix-sum displacements is already the
//! final row order.

use crate::config::CompositingMode;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::render::comm::Communicator;
use crate::render::image::Image;
use crate::render::partition::ImagePartition;

#[derive(Debug, Clone)]
pub struct TiledImageCompositor {
    mode: CompositingMode,
    width: usize,
    height: usize,
}

impl TiledImageCompositor {
    pub fn new(mode: CompositingMode, width: usize, height: usize) -> Self {
        Self {
            mode,
            width,
            height,
        }
    }

    /// Collective. Returns the full image on the ranks that receive it
    /// (the root, or every rank for [`CompositingMode::AllGather`]).
    pub fn composite(
        &self,
        comm: &dyn Communicator,
        partition: &ImagePartition,
        strip: &Image,
    ) -> PipelineResult<Option<Image>> {
        let rows = partition.partition_rows(comm.rank());
        let fits = strip.width() == self.width && strip.rows() == rows;
        // every rank learns about a bad strip before any gather starts
        let any_bad = comm.size() > 1 && comm.all_reduce_any(!fits)?;
        if !fits {
            return Err(PipelineError::InvalidInput(format!(
                "rank {} strip covers rows {:?} at width {}, owns {:?} at width {}",
                comm.rank(),
                strip.rows(),
                strip.width(),
                rows,
                self.width
            )));
        }
        if any_bad {
            return Err(PipelineError::InvalidInput(format!(
                "rank {}: a peer's strip does not match the partition",
                comm.rank()
            )));
        }

        if comm.size() == 1 {
            return Ok(Some(strip.clone()));
        }

        let root = match self.mode {
            CompositingMode::GatherToRoot { root } => root,
            CompositingMode::AllGather => 0,
        };
        let pixel_counts: Vec<usize> = (0..comm.size())
            .map(|r| partition.partition_rows(r).len() * self.width)
            .collect();

        let rgb_counts: Vec<usize> = pixel_counts.iter().map(|p| p * 3).collect();
        let depth_counts: Vec<usize> = pixel_counts.iter().map(|p| p * 4).collect();
        let rgb = comm.gatherv(root, strip.rgb(), &rgb_counts)?;
        let depth = comm.gatherv(root, bytemuck::cast_slice(strip.depth()), &depth_counts)?;

        let assembled = match (rgb, depth) {
            (Some(rgb), Some(depth)) => {
                let depth: Vec<f32> = depth.chunks_exact(4).map(bytemuck::pod_read_unaligned).collect();
                Some(Image::from_parts(self.width, self.height, rgb, depth)?)
            }
            _ => None,
        };
        if assembled.is_some() {
            tracing::debug!("Gathered {}x{} image at rank {}", self.width, self.height, root);
        }

        match self.mode {
            CompositingMode::GatherToRoot { .. } => Ok(assembled),
            CompositingMode::AllGather => {
                let rgb = comm.broadcast(root, assembled.as_ref().map(|i| i.rgb().to_vec()))?;
                let depth = comm.broadcast(
                    root,
                    assembled.as_ref().map(|i| bytemuck::cast_slice(i.depth()).to_vec()),
                )?;
                let depth: Vec<f32> = depth.chunks_exact(4).map(bytemuck::pod_read_unaligned).collect();
                Ok(Some(Image::from_parts(self.width, self.height, rgb, depth)?))
            }
        }
    }
}
